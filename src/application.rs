use crate::config::config::{Config, DatabaseSetting};
use crate::state::{AppMetrics, AppState};
use access_control::access::PermissionService;
use access_control::cache::spawn_sweep_task;
use access_control::clock::SystemClock;
use access_control::metrics::tick_metric;
use access_control::pg::{PgAccessStore, PgPermissionCacheStore};
use access_control::registry::load_registry;
use anyhow::Context;
use app_error::AppError;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct Application {
  state: AppState,
}

impl Application {
  /// Starts the background tasks that keep the permission cache and its metrics current.
  pub async fn build(config: Config, state: AppState) -> Result<Self, anyhow::Error> {
    if let Some(every) = config.permission.sweep_interval() {
      info!(
        "[permission]: sweep expired cache entries every {}s",
        every.as_secs()
      );
      spawn_sweep_task(state.permission.cache().clone(), every);
    }
    tick_metric(
      state.permission.metrics_state(),
      state.metrics.permission_metrics.clone(),
    );
    Ok(Self { state })
  }

  pub async fn run_until_stopped(self) -> Result<(), anyhow::Error> {
    info!("nas server is running, press ctrl-c to stop");
    tokio::signal::ctrl_c()
      .await
      .context("fail to listen for shutdown signal")?;
    info!("shutting down");
    self.state.pg_pool.close().await;
    Ok(())
  }
}

pub async fn init_state(config: &Config) -> Result<AppState, AppError> {
  info!("Connecting to postgres database with setting: {}", config.db_settings);
  let pg_pool = get_connection_pool(&config.db_settings).await?;
  migrate(&pg_pool).await?;

  let access = Arc::new(PgAccessStore::new(pg_pool.clone()));
  let cache_store = Arc::new(PgPermissionCacheStore::new(pg_pool.clone()));
  let registry = load_registry(access.as_ref()).await?;
  let permission = Arc::new(PermissionService::new(
    access,
    cache_store,
    Arc::new(SystemClock),
    registry,
    config.permission.settings(),
  ));

  Ok(AppState {
    pg_pool,
    config: Arc::new(config.clone()),
    permission,
    metrics: AppMetrics::new(),
  })
}

async fn get_connection_pool(setting: &DatabaseSetting) -> Result<PgPool, AppError> {
  let options = setting.pg_connect_options()?;
  let pool = PgPoolOptions::new()
    .max_connections(setting.max_connections)
    .acquire_timeout(Duration::from_secs(10))
    .idle_timeout(Duration::from_secs(60))
    .connect_with(options)
    .await
    .map_err(|e| {
      AppError::DBError(format!(
        "Failed to connect to postgres database: {}, {}",
        setting, e
      ))
    })?;
  Ok(pool)
}

async fn migrate(pool: &PgPool) -> Result<(), AppError> {
  sqlx::migrate!("./migrations")
    .set_ignore_missing(true)
    .run(pool)
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to run migrations: {}", e)))?;
  Ok(())
}
