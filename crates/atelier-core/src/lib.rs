pub mod config;
pub mod errors;
pub mod events;
pub mod ids;
pub mod image;
pub mod synthesis;

pub use config::GenerationConfig;
pub use errors::SynthesisError;
pub use events::GenerationEvent;
pub use ids::{GenerationId, SessionId};
pub use image::ImageData;
pub use synthesis::{NewImageRequest, RefineImageRequest, StepCallback, SynthesisEngine};
