use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

pub const PERMISSION_METRICS_TICK_INTERVAL: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct PermissionMetrics {
  total_check_count: Gauge,
  check_from_cache_count: Gauge,
  store_write_failure_count: Gauge,
  swept_entry_count: Gauge,
}

impl PermissionMetrics {
  fn init() -> Self {
    Self {
      total_check_count: Gauge::default(),
      check_from_cache_count: Gauge::default(),
      store_write_failure_count: Gauge::default(),
      swept_entry_count: Gauge::default(),
    }
  }

  pub fn register(registry: &mut Registry) -> Self {
    let metrics = Self::init();
    let permission_registry = registry.sub_registry_with_prefix("permission");
    permission_registry.register(
      "total_check_count",
      "total resolved permission decisions",
      metrics.total_check_count.clone(),
    );
    permission_registry.register(
      "check_from_cache_count",
      "permission decisions served from the cache",
      metrics.check_from_cache_count.clone(),
    );
    permission_registry.register(
      "store_write_failure_count",
      "permission cache writes that failed and were swallowed",
      metrics.store_write_failure_count.clone(),
    );
    permission_registry.register(
      "swept_entry_count",
      "expired permission cache entries removed by the sweep",
      metrics.swept_entry_count.clone(),
    );
    metrics
  }

  pub fn record_check_count(&self, total: i64, from_cache: i64) {
    self.total_check_count.set(total);
    self.check_from_cache_count.set(from_cache);
  }

  pub fn record_cache_maintenance(&self, write_failures: i64, swept: i64) {
    self.store_write_failure_count.set(write_failures);
    self.swept_entry_count.set(swept);
  }
}

/// Counters shared by the cache and the resolution paths. Published to
/// [PermissionMetrics] on every tick.
#[derive(Clone, Default)]
pub struct MetricsCalState {
  pub(crate) total_check: Arc<AtomicI64>,
  pub(crate) check_from_cache: Arc<AtomicI64>,
  pub(crate) store_write_failure: Arc<AtomicI64>,
  pub(crate) swept_entry: Arc<AtomicI64>,
}

impl MetricsCalState {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn total_check(&self) -> i64 {
    self.total_check.load(Ordering::Relaxed)
  }

  pub fn check_from_cache(&self) -> i64 {
    self.check_from_cache.load(Ordering::Relaxed)
  }

  pub fn store_write_failure(&self) -> i64 {
    self.store_write_failure.load(Ordering::Relaxed)
  }

  pub fn swept_entry(&self) -> i64 {
    self.swept_entry.load(Ordering::Relaxed)
  }
}

/// Collect and record metrics for permission resolution
pub fn tick_metric(state: MetricsCalState, metrics: Arc<PermissionMetrics>) {
  tokio::spawn(async move {
    let mut interval = interval(PERMISSION_METRICS_TICK_INTERVAL);
    loop {
      interval.tick().await;

      metrics.record_check_count(state.total_check(), state.check_from_cache());
      metrics.record_cache_maintenance(state.store_write_failure(), state.swept_entry());
    }
  });
}
