//! Shared application state for both transports.

use std::sync::Arc;

use kinema_core::{InferenceExecutor, LifecycleManager};

/// Handles shared by every HTTP handler and RPC worker.
///
/// Both fields are `Arc`s, so cloning the state per request is cheap.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<LifecycleManager>,
    pub executor: Arc<InferenceExecutor>,
}

impl AppState {
    pub fn new(lifecycle: Arc<LifecycleManager>, executor: Arc<InferenceExecutor>) -> Self {
        Self {
            lifecycle,
            executor,
        }
    }
}
