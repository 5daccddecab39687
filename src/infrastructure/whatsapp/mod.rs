//! External calling provider (WhatsApp Business Calling API)
pub mod client;
pub mod error;

pub use client::{CallingProvider, WhatsAppClient};
pub use error::{ApiError, ProviderError};
