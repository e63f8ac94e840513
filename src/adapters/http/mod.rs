//! HTTP/WebSocket gateway built on axum.

pub mod audit;
pub mod auth;
pub mod error;
pub mod gateway;
pub mod peer;
pub mod security;
pub mod state;
pub mod swarms;
pub mod system;
pub mod tasks;
pub mod ws;

pub use auth::StaticTokenAuth;
pub use error::{ApiError, ApiResult};
pub use gateway::Gateway;
pub use state::AppState;
pub use ws::WsHub;
