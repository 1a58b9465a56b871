use std::sync::Arc;

use crate::config::AppConfig;

/// Settings shared by everything a run spawns.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}
