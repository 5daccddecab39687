//! HTTP and WebSocket surface of the calling core

pub mod calls_handler;
pub mod context;
pub mod dto;
pub mod error;
pub mod metrics_handler;
pub mod monitoring;
pub mod router;
pub mod state;
pub mod transfer_handler;
pub mod websocket;

pub use context::AgentContext;
pub use dto::ApiResponse;
pub use error::HttpError;
pub use metrics_handler::init_metrics;
pub use router::build_router;
pub use state::AppState;
