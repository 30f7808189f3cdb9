use crate::clock::Clock;
use crate::metrics::MetricsCalState;
use crate::store::PermissionCacheStore;
use app_error::AppError;
use chrono::Duration;
use database_entity::dto::{CacheStats, EffectivePermission, PermissionCacheEntry, ResourceKind};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, instrument, trace, warn};

pub const DEFAULT_PERMISSION_TTL_SECS: i64 = 3600;

/// TTL cache of resolved decisions in front of the resolvers.
///
/// Reads never fail: a store error is logged and treated as a miss. Writes and
/// invalidations report their errors, the caller decides whether to swallow them.
pub struct PermissionCache {
  store: Arc<dyn PermissionCacheStore>,
  clock: Arc<dyn Clock>,
  ttl: Duration,
  enabled: bool,
  metrics_state: MetricsCalState,
}

impl PermissionCache {
  pub fn new(
    store: Arc<dyn PermissionCacheStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    enabled: bool,
    metrics_state: MetricsCalState,
  ) -> Self {
    Self {
      store,
      clock,
      ttl,
      enabled,
      metrics_state,
    }
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  pub fn clock(&self) -> &Arc<dyn Clock> {
    &self.clock
  }

  pub async fn get(
    &self,
    user_id: i64,
    kind: ResourceKind,
    resource_id: i64,
  ) -> Option<PermissionCacheEntry> {
    self
      .get_many(user_id, kind, &[resource_id])
      .await
      .remove(&resource_id)
  }

  /// Live entries for `resource_ids`, keyed by resource id. Expired entries are
  /// never returned even if the store still holds them.
  #[instrument(level = "debug", skip_all)]
  pub async fn get_many(
    &self,
    user_id: i64,
    kind: ResourceKind,
    resource_ids: &[i64],
  ) -> HashMap<i64, PermissionCacheEntry> {
    if !self.enabled || resource_ids.is_empty() {
      return HashMap::new();
    }
    let now = self.clock.now();
    match self.store.get_live(user_id, kind, resource_ids, now).await {
      Ok(entries) => {
        let hits = entries
          .into_iter()
          .filter(|entry| entry.is_live(now))
          .map(|entry| (entry.resource_id, entry))
          .collect::<HashMap<_, _>>();
        trace!(
          "[permission]: cache hit {}/{} for user:{} kind:{}",
          hits.len(),
          resource_ids.len(),
          user_id,
          kind
        );
        hits
      },
      Err(err) => {
        warn!("[permission]: cache read failed, treat as miss: {}", err);
        HashMap::new()
      },
    }
  }

  /// Upserts one decision. Role-default decisions are never cached and return `None`.
  /// `ttl` overrides the configured TTL for this entry only.
  pub async fn set(
    &self,
    user_id: i64,
    kind: ResourceKind,
    resource_id: i64,
    permission: &EffectivePermission,
    ttl: Option<Duration>,
  ) -> Result<Option<PermissionCacheEntry>, AppError> {
    let mut entries = self
      .set_many(user_id, kind, &[(resource_id, *permission)], ttl)
      .await?;
    Ok(entries.pop())
  }

  /// Upserts every cacheable decision in one batched write and returns what was written.
  #[instrument(level = "debug", skip_all, err)]
  pub async fn set_many(
    &self,
    user_id: i64,
    kind: ResourceKind,
    permissions: &[(i64, EffectivePermission)],
    ttl: Option<Duration>,
  ) -> Result<Vec<PermissionCacheEntry>, AppError> {
    let kind = kind.ensure_storage()?;
    if !self.enabled {
      return Ok(vec![]);
    }
    let cached_at = self.clock.now();
    let expires_at = cached_at + ttl.unwrap_or(self.ttl);
    let entries = permissions
      .iter()
      .filter_map(|(resource_id, permission)| {
        permission.source.map(|source| PermissionCacheEntry {
          user_id,
          resource_kind: kind,
          resource_id: *resource_id,
          capabilities: permission.capabilities,
          is_owner: permission.is_owner,
          source,
          source_resource_id: permission.source_resource_id,
          cached_at,
          expires_at,
        })
      })
      .collect::<Vec<_>>();
    if entries.is_empty() {
      return Ok(entries);
    }

    if let Err(err) = self.store.upsert(&entries).await {
      self
        .metrics_state
        .store_write_failure
        .fetch_add(1, Ordering::Relaxed);
      return Err(AppError::StoreWriteFailure(err.to_string()));
    }
    Ok(entries)
  }

  #[instrument(level = "debug", skip_all, err)]
  pub async fn invalidate_user(&self, user_id: i64) -> Result<u64, AppError> {
    if !self.enabled {
      return Ok(0);
    }
    let deleted = self.store.delete_for_user(user_id).await?;
    trace!("[permission]: invalidate user:{} removed {}", user_id, deleted);
    Ok(deleted)
  }

  /// Removes every entry on the resource. For a folder this includes the entries of
  /// its whole subtree and every entry inherited from it.
  #[instrument(level = "debug", skip_all, err)]
  pub async fn invalidate_resource(
    &self,
    kind: ResourceKind,
    resource_id: i64,
  ) -> Result<u64, AppError> {
    let kind = kind.ensure_storage()?;
    if !self.enabled {
      return Ok(0);
    }
    let deleted = self.store.delete_for_resource(kind, resource_id).await?;
    trace!(
      "[permission]: invalidate {}:{} removed {}",
      kind,
      resource_id,
      deleted
    );
    Ok(deleted)
  }

  #[instrument(level = "debug", skip_all, err)]
  pub async fn invalidate_users_on_resource(
    &self,
    user_ids: &[i64],
    kind: ResourceKind,
    resource_id: i64,
  ) -> Result<u64, AppError> {
    let kind = kind.ensure_storage()?;
    if !self.enabled {
      return Ok(0);
    }
    let deleted = self
      .store
      .delete_for_users_on_resource(user_ids, kind, resource_id)
      .await?;
    Ok(deleted)
  }

  /// Deletes entries past their expiry and leaves the rest untouched. Runs even
  /// when the cache is disabled so entries written before are eventually dropped.
  #[instrument(level = "debug", skip_all, err)]
  pub async fn sweep_expired(&self) -> Result<u64, AppError> {
    let deleted = self.store.delete_expired(self.clock.now()).await?;
    self
      .metrics_state
      .swept_entry
      .fetch_add(deleted as i64, Ordering::Relaxed);
    if deleted > 0 {
      info!("[permission]: swept {} expired cache entries", deleted);
    }
    Ok(deleted)
  }

  pub async fn stats(&self) -> Result<CacheStats, AppError> {
    let mut stats = self.store.stats(self.clock.now()).await?;
    stats.cache_enabled = self.enabled;
    Ok(stats)
  }
}

/// Runs [PermissionCache::sweep_expired] on a fixed interval until the runtime
/// shuts down. The first tick is skipped so startup is not delayed.
pub fn spawn_sweep_task(cache: Arc<PermissionCache>, every: std::time::Duration) {
  tokio::spawn(async move {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
      interval.tick().await;
      if let Err(err) = cache.sweep_expired().await {
        error!("[permission]: sweep expired cache entries failed: {}", err);
      }
    }
  });
}
