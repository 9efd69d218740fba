pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod execution;
pub mod external;
pub mod metrics;
pub mod models;
pub mod polymarket;
pub mod queue;
pub mod services;

use std::sync::Arc;

use crate::db::CopyStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CopyStore>,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}
