use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::strategy::Executor;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<Executor>,

    /// Same config the executor was built from
    pub config: Arc<AppConfig>,

    /// Application start time
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(executor: Arc<Executor>, config: Arc<AppConfig>) -> Self {
        Self {
            executor,
            config,
            start_time: Utc::now(),
        }
    }

    /// Get system uptime in seconds
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds()
    }
}
