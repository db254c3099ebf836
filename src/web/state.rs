use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::engine::{BatchEvaluator, InferenceEngine};

/// Shared handles for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<InferenceEngine>,
    pub evaluator: Arc<BatchEvaluator>,
    pub default_limit: usize,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(engine: Arc<InferenceEngine>, evaluator: BatchEvaluator, default_limit: usize) -> Self {
        Self {
            engine,
            evaluator: Arc::new(evaluator),
            default_limit,
            started_at: Utc::now(),
        }
    }

    pub fn from_config(engine: Arc<InferenceEngine>, config: &ServiceConfig) -> Self {
        Self::new(
            engine,
            BatchEvaluator::new(&config.evaluation),
            config.evaluation.default_limit,
        )
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
