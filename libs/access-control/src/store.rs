use app_error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use database_entity::dto::{CacheStats, Identity, PermissionCacheEntry, ResourceKind, ResourceRef};
use database_entity::pg_row::{GrantRow, RolePermissionRow};

/// Read access to resources, grants and role permissions.
///
/// Every lookup is batched by id so that bulk resolution issues a constant number
/// of round trips per batch. Ids that do not exist are simply absent from the result.
#[async_trait]
pub trait AccessStore: Send + Sync {
  async fn get_resources(
    &self,
    kind: ResourceKind,
    ids: &[i64],
  ) -> Result<Vec<ResourceRef>, AppError>;

  async fn get_user_grants(
    &self,
    kind: ResourceKind,
    user_id: i64,
    resource_ids: &[i64],
  ) -> Result<Vec<GrantRow>, AppError>;

  async fn get_group_grants(
    &self,
    kind: ResourceKind,
    group_ids: &[i64],
    resource_ids: &[i64],
  ) -> Result<Vec<GrantRow>, AppError>;

  async fn get_role_permissions(&self) -> Result<Vec<RolePermissionRow>, AppError>;

  /// Owned, granted or top-level resources of `kind`, ordered by id.
  async fn get_warm_candidates(
    &self,
    kind: ResourceKind,
    identity: &Identity,
    limit: usize,
  ) -> Result<Vec<ResourceRef>, AppError>;

  /// The folder `root_id` and its descendants up to `max_depth` levels, breadth first.
  async fn get_folder_subtree(
    &self,
    root_id: i64,
    max_depth: u32,
    limit: usize,
    offset: usize,
  ) -> Result<Vec<ResourceRef>, AppError>;
}

/// Persistence for resolved permission decisions keyed by `(user, kind, resource)`.
#[async_trait]
pub trait PermissionCacheStore: Send + Sync {
  async fn get_live(
    &self,
    user_id: i64,
    kind: ResourceKind,
    resource_ids: &[i64],
    now: DateTime<Utc>,
  ) -> Result<Vec<PermissionCacheEntry>, AppError>;

  /// Insert or overwrite every entry by its key.
  async fn upsert(&self, entries: &[PermissionCacheEntry]) -> Result<(), AppError>;

  async fn delete_for_user(&self, user_id: i64) -> Result<u64, AppError>;

  /// Deletes entries on the resource. For a folder this also covers every folder and
  /// file below it and every entry inherited from it.
  async fn delete_for_resource(&self, kind: ResourceKind, resource_id: i64)
    -> Result<u64, AppError>;

  async fn delete_for_users_on_resource(
    &self,
    user_ids: &[i64],
    kind: ResourceKind,
    resource_id: i64,
  ) -> Result<u64, AppError>;

  async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError>;

  async fn stats(&self, now: DateTime<Utc>) -> Result<CacheStats, AppError>;
}
