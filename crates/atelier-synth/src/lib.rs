pub mod http;
pub mod mock;

pub use http::HttpEngine;
pub use mock::{MockEngine, MockRender};
