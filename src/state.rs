use crate::config::config::Config;
use access_control::access::PermissionService;
use access_control::metrics::PermissionMetrics;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
  pub pg_pool: PgPool,
  pub config: Arc<Config>,
  pub permission: Arc<PermissionService>,
  pub metrics: AppMetrics,
}

#[derive(Clone)]
pub struct AppMetrics {
  #[allow(dead_code)]
  pub registry: Arc<prometheus_client::registry::Registry>,
  pub permission_metrics: Arc<PermissionMetrics>,
}

impl Default for AppMetrics {
  fn default() -> Self {
    Self::new()
  }
}

impl AppMetrics {
  pub fn new() -> Self {
    let mut registry = prometheus_client::registry::Registry::default();
    let permission_metrics = Arc::new(PermissionMetrics::register(&mut registry));
    Self {
      registry: Arc::new(registry),
      permission_metrics,
    }
  }
}
