//! Interface layer: REST API and WebSocket notifications

pub mod api;
