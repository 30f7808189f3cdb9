use crate::store::{AccessStore, PermissionCacheStore};
use app_error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use database::grant::{select_group_grants, select_user_grants};
use database::permission_cache::{
  delete_entries_for_resource, delete_entries_for_user, delete_entries_for_users_on_resource,
  delete_expired_entries, select_cache_stats, select_live_entries, upsert_entries,
};
use database::resource::{select_folder_subtree, select_resources, select_warm_candidates};
use database::role_permission::select_role_permissions;
use database_entity::dto::{CacheStats, Identity, PermissionCacheEntry, ResourceKind, ResourceRef};
use database_entity::pg_row::{GrantRow, RolePermissionRow};
use sqlx::PgPool;
use tracing::warn;

#[derive(Clone)]
pub struct PgAccessStore {
  pg_pool: PgPool,
}

impl PgAccessStore {
  pub fn new(pg_pool: PgPool) -> Self {
    Self { pg_pool }
  }
}

#[async_trait]
impl AccessStore for PgAccessStore {
  async fn get_resources(
    &self,
    kind: ResourceKind,
    ids: &[i64],
  ) -> Result<Vec<ResourceRef>, AppError> {
    let rows = select_resources(&self.pg_pool, kind, ids).await?;
    Ok(rows.into_iter().map(|row| row.into_ref(kind)).collect())
  }

  async fn get_user_grants(
    &self,
    kind: ResourceKind,
    user_id: i64,
    resource_ids: &[i64],
  ) -> Result<Vec<GrantRow>, AppError> {
    select_user_grants(&self.pg_pool, kind, user_id, resource_ids).await
  }

  async fn get_group_grants(
    &self,
    kind: ResourceKind,
    group_ids: &[i64],
    resource_ids: &[i64],
  ) -> Result<Vec<GrantRow>, AppError> {
    select_group_grants(&self.pg_pool, kind, group_ids, resource_ids).await
  }

  async fn get_role_permissions(&self) -> Result<Vec<RolePermissionRow>, AppError> {
    select_role_permissions(&self.pg_pool).await
  }

  async fn get_warm_candidates(
    &self,
    kind: ResourceKind,
    identity: &Identity,
    limit: usize,
  ) -> Result<Vec<ResourceRef>, AppError> {
    let rows = select_warm_candidates(
      &self.pg_pool,
      kind,
      identity.id,
      &identity.group_ids,
      limit as i64,
    )
    .await?;
    Ok(rows.into_iter().map(|row| row.into_ref(kind)).collect())
  }

  async fn get_folder_subtree(
    &self,
    root_id: i64,
    max_depth: u32,
    limit: usize,
    offset: usize,
  ) -> Result<Vec<ResourceRef>, AppError> {
    let rows = select_folder_subtree(
      &self.pg_pool,
      root_id,
      max_depth as i32,
      limit as i64,
      offset as i64,
    )
    .await?;
    Ok(
      rows
        .into_iter()
        .map(|row| row.into_ref(ResourceKind::Folder))
        .collect(),
    )
  }
}

#[derive(Clone)]
pub struct PgPermissionCacheStore {
  pg_pool: PgPool,
}

impl PgPermissionCacheStore {
  pub fn new(pg_pool: PgPool) -> Self {
    Self { pg_pool }
  }
}

#[async_trait]
impl PermissionCacheStore for PgPermissionCacheStore {
  async fn get_live(
    &self,
    user_id: i64,
    kind: ResourceKind,
    resource_ids: &[i64],
    now: DateTime<Utc>,
  ) -> Result<Vec<PermissionCacheEntry>, AppError> {
    let rows = select_live_entries(&self.pg_pool, user_id, kind, resource_ids, now).await?;
    Ok(
      rows
        .into_iter()
        .filter_map(|row| match PermissionCacheEntry::try_from(row) {
          Ok(entry) => Some(entry),
          Err(err) => {
            warn!("[permission]: skip malformed cache row: {}", err);
            None
          },
        })
        .collect(),
    )
  }

  async fn upsert(&self, entries: &[PermissionCacheEntry]) -> Result<(), AppError> {
    upsert_entries(&self.pg_pool, entries).await?;
    Ok(())
  }

  async fn delete_for_user(&self, user_id: i64) -> Result<u64, AppError> {
    delete_entries_for_user(&self.pg_pool, user_id).await
  }

  async fn delete_for_resource(
    &self,
    kind: ResourceKind,
    resource_id: i64,
  ) -> Result<u64, AppError> {
    delete_entries_for_resource(&self.pg_pool, kind, resource_id).await
  }

  async fn delete_for_users_on_resource(
    &self,
    user_ids: &[i64],
    kind: ResourceKind,
    resource_id: i64,
  ) -> Result<u64, AppError> {
    delete_entries_for_users_on_resource(&self.pg_pool, user_ids, kind, resource_id).await
  }

  async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
    delete_expired_entries(&self.pg_pool, now).await
  }

  async fn stats(&self, now: DateTime<Utc>) -> Result<CacheStats, AppError> {
    let row = select_cache_stats(&self.pg_pool, now).await?;
    Ok(row.into_stats(true))
  }
}
