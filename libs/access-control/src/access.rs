use crate::cache::{PermissionCache, DEFAULT_PERMISSION_TTL_SECS};
use crate::clock::Clock;
use crate::metrics::MetricsCalState;
use crate::optimizer::{BulkOptimizer, DEFAULT_MAX_BATCH_SIZE};
use crate::registry::RolePermissionRegistry;
use crate::resolver::{Resolver, DEFAULT_MAX_HIERARCHY_DEPTH};
use crate::store::{AccessStore, PermissionCacheStore};
use app_error::AppError;
use chrono::Duration;
use database_entity::dto::{
  Action, CacheStats, EffectivePermission, Identity, ResourceKind, WarmCacheStats,
};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, instrument, trace};

#[derive(Debug, Clone)]
pub struct PermissionSettings {
  pub cache_enabled: bool,
  pub cache_ttl: Duration,
  pub max_batch_size: usize,
  pub max_hierarchy_depth: usize,
  pub warm_limit: usize,
}

impl Default for PermissionSettings {
  fn default() -> Self {
    Self {
      cache_enabled: true,
      cache_ttl: Duration::seconds(DEFAULT_PERMISSION_TTL_SECS),
      max_batch_size: DEFAULT_MAX_BATCH_SIZE,
      max_hierarchy_depth: DEFAULT_MAX_HIERARCHY_DEPTH,
      warm_limit: 100,
    }
  }
}

/// Entry point for permission decisions on files and folders.
///
/// Every decision is default-deny: an action is allowed only when the owner,
/// direct, group, inherited or role-default source that applies grants it.
/// Collaborators that mutate grants, ownership, roles or group membership must
/// call the matching `on_*_changed` hook and wait for it before reporting success.
pub struct PermissionService {
  access: Arc<dyn AccessStore>,
  cache: Arc<PermissionCache>,
  resolver: Resolver,
  optimizer: BulkOptimizer,
  metrics_state: MetricsCalState,
  warm_limit: usize,
}

impl PermissionService {
  pub fn new(
    access: Arc<dyn AccessStore>,
    cache_store: Arc<dyn PermissionCacheStore>,
    clock: Arc<dyn Clock>,
    registry: RolePermissionRegistry,
    settings: PermissionSettings,
  ) -> Self {
    let metrics_state = MetricsCalState::new();
    let registry = Arc::new(registry);
    let cache = Arc::new(PermissionCache::new(
      cache_store,
      clock,
      settings.cache_ttl,
      settings.cache_enabled,
      metrics_state.clone(),
    ));
    let resolver = Resolver::new(
      access.clone(),
      registry.clone(),
      settings.max_hierarchy_depth,
    );
    let optimizer = BulkOptimizer::new(
      access.clone(),
      cache.clone(),
      registry,
      metrics_state.clone(),
      settings.max_batch_size,
      settings.max_hierarchy_depth,
    );
    info!(
      "[permission]: cache enabled:{}, ttl:{}s, batch:{}, depth:{}",
      settings.cache_enabled,
      settings.cache_ttl.num_seconds(),
      settings.max_batch_size,
      settings.max_hierarchy_depth
    );
    Self {
      access,
      cache,
      resolver,
      optimizer,
      metrics_state,
      warm_limit: settings.warm_limit,
    }
  }

  pub fn cache(&self) -> &Arc<PermissionCache> {
    &self.cache
  }

  pub fn resolver(&self) -> &Resolver {
    &self.resolver
  }

  pub fn metrics_state(&self) -> MetricsCalState {
    self.metrics_state.clone()
  }

  /// Returns [AppError::RecordNotFound] if the resource does not exist.
  #[instrument(level = "debug", skip_all, err)]
  pub async fn check_single(
    &self,
    identity: &Identity,
    kind: ResourceKind,
    id: i64,
    action: Action,
  ) -> Result<bool, AppError> {
    let permission = self.resolve_single(identity, kind, id).await?;
    let allowed = permission.allows(action);
    trace!(
      "[permission]: user:{} {:?} {}:{} => {}",
      identity.id,
      action,
      kind,
      id,
      allowed
    );
    Ok(allowed)
  }

  pub async fn resolve_single(
    &self,
    identity: &Identity,
    kind: ResourceKind,
    id: i64,
  ) -> Result<EffectivePermission, AppError> {
    let kind = kind.ensure_storage()?;
    self
      .metrics_state
      .total_check
      .fetch_add(1, Ordering::Relaxed);
    if let Some(entry) = self.cache.get(identity.id, kind, id).await {
      self
        .metrics_state
        .check_from_cache
        .fetch_add(1, Ordering::Relaxed);
      return Ok(entry.to_effective());
    }

    let resource = self
      .access
      .get_resources(kind, &[id])
      .await?
      .into_iter()
      .next()
      .ok_or_else(|| AppError::RecordNotFound(format!("{}:{}", kind, id)))?;
    let permission = self.resolver.resolve(identity, &resource).await?;
    if let Err(err) = self
      .cache
      .set(identity.id, kind, id, &permission, None)
      .await
    {
      error!(
        "[permission]: failed to cache {}:{} for user:{}: {}",
        kind, id, identity.id, err
      );
    }
    Ok(permission)
  }

  /// Decisions for every id that exists. Missing keys mean "not found", not "denied".
  #[instrument(level = "debug", skip_all, err)]
  pub async fn check_bulk(
    &self,
    identity: &Identity,
    kind: ResourceKind,
    ids: &[i64],
    action: Action,
  ) -> Result<HashMap<i64, bool>, AppError> {
    let resolved = self.optimizer.resolve_bulk(identity, kind, ids).await?;
    Ok(
      resolved
        .into_iter()
        .map(|(id, permission)| (id, permission.allows(action)))
        .collect(),
    )
  }

  pub async fn resolve_bulk(
    &self,
    identity: &Identity,
    kind: ResourceKind,
    ids: &[i64],
  ) -> Result<HashMap<i64, EffectivePermission>, AppError> {
    self.optimizer.resolve_bulk(identity, kind, ids).await
  }

  /// `limit` defaults to the configured warm limit.
  pub async fn warm_cache(
    &self,
    identity: &Identity,
    kind: Option<ResourceKind>,
    limit: Option<usize>,
  ) -> Result<WarmCacheStats, AppError> {
    self
      .optimizer
      .warm_cache(identity, kind, limit.unwrap_or(self.warm_limit))
      .await
  }

  pub async fn resolve_subtree(
    &self,
    identity: &Identity,
    root_folder_id: i64,
    depth: u32,
    limit: usize,
    offset: usize,
  ) -> Result<HashMap<i64, EffectivePermission>, AppError> {
    self
      .optimizer
      .resolve_subtree(identity, root_folder_id, depth, limit, offset)
      .await
  }

  /// Call after a grant on the resource was added, changed or revoked, or its
  /// ownership moved. For a folder, the cached decisions of everything below it are
  /// dropped as well.
  #[instrument(level = "debug", skip_all, err)]
  pub async fn on_grant_changed(&self, kind: ResourceKind, id: i64) -> Result<u64, AppError> {
    self.cache.invalidate_resource(kind, id).await
  }

  /// Like [Self::on_grant_changed] when only some users are affected.
  #[instrument(level = "debug", skip_all, err)]
  pub async fn on_grant_changed_for_users(
    &self,
    kind: ResourceKind,
    id: i64,
    user_ids: &[i64],
  ) -> Result<u64, AppError> {
    self
      .cache
      .invalidate_users_on_resource(user_ids, kind, id)
      .await
  }

  /// Call after the user's role or group membership changed.
  #[instrument(level = "debug", skip_all, err)]
  pub async fn on_identity_changed(&self, user_id: i64) -> Result<u64, AppError> {
    self.cache.invalidate_user(user_id).await
  }

  pub async fn sweep_expired(&self) -> Result<u64, AppError> {
    self.cache.sweep_expired().await
  }

  pub async fn cache_stats(&self) -> Result<CacheStats, AppError> {
    self.cache.stats().await
  }
}
