//! Application state.

use vinfer_worker::InferenceService;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub service: InferenceService,
}

impl AppState {
    pub fn new(config: ApiConfig, service: InferenceService) -> Self {
        Self { config, service }
    }
}
