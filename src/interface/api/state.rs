//! Shared handler state

use crate::application::calling::CallManager;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<CallManager>,
}

impl AppState {
    pub fn new(manager: Arc<CallManager>) -> Self {
        Self { manager }
    }
}
