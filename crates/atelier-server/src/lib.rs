pub mod client;
pub mod config;
pub mod event_bridge;
pub mod handlers;
pub mod rpc;
pub mod server;
pub mod wire;

pub use config::AppConfig;
pub use handlers::HandlerState;
pub use server::{start, ServerHandle};
