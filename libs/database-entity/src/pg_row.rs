use crate::dto::{
  CacheStats, CapabilitySet, PermissionCacheEntry, PermissionSource, ResourceKind, ResourceRef,
  Role, RoleAction,
};
use app_error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row of either `files` or `folders`. For files `parent_id` is selected from `folder_id`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ResourceRow {
  pub id: i64,
  pub owner_id: i64,
  pub parent_id: Option<i64>,
}

impl ResourceRow {
  pub fn into_ref(self, kind: ResourceKind) -> ResourceRef {
    ResourceRef {
      id: self.id,
      kind,
      owner_id: self.owner_id,
      parent_id: self.parent_id,
    }
  }
}

/// A row of `file_permissions` or `folder_permissions`. Exactly one of
/// `user_id` and `group_id` is set.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GrantRow {
  pub resource_id: i64,
  pub user_id: Option<i64>,
  pub group_id: Option<i64>,
  pub can_read: bool,
  pub can_write: bool,
  pub can_delete: bool,
  pub can_share: bool,
}

impl GrantRow {
  pub fn capabilities(&self) -> CapabilitySet {
    CapabilitySet::new(self.can_read, self.can_write, self.can_delete, self.can_share)
  }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PermissionCacheRow {
  pub user_id: i64,
  pub resource_type: String,
  pub resource_id: i64,
  pub can_read: bool,
  pub can_write: bool,
  pub can_delete: bool,
  pub can_share: bool,
  pub is_owner: bool,
  pub permission_source: String,
  pub source_resource_id: Option<i64>,
  pub cached_at: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
}

impl TryFrom<PermissionCacheRow> for PermissionCacheEntry {
  type Error = AppError;

  fn try_from(row: PermissionCacheRow) -> Result<Self, Self::Error> {
    Ok(PermissionCacheEntry {
      user_id: row.user_id,
      resource_kind: row.resource_type.parse()?,
      resource_id: row.resource_id,
      capabilities: CapabilitySet::new(row.can_read, row.can_write, row.can_delete, row.can_share),
      is_owner: row.is_owner,
      source: row.permission_source.parse::<PermissionSource>()?,
      source_resource_id: row.source_resource_id,
      cached_at: row.cached_at,
      expires_at: row.expires_at,
    })
  }
}

/// One `(role, resource_type, action)` triple joined from `role_permissions` and `permissions`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RolePermissionRow {
  pub role: String,
  pub resource_type: String,
  pub action: String,
}

impl RolePermissionRow {
  pub fn parse(&self) -> Result<(Role, ResourceKind, RoleAction), AppError> {
    Ok((
      self.role.parse()?,
      self.resource_type.parse()?,
      self.action.parse()?,
    ))
  }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CacheStatsRow {
  pub total_entries: Option<i64>,
  pub active_entries: Option<i64>,
  pub expired_entries: Option<i64>,
}

impl CacheStatsRow {
  pub fn into_stats(self, cache_enabled: bool) -> CacheStats {
    CacheStats {
      cache_enabled,
      total_entries: self.total_entries.unwrap_or(0),
      active_entries: self.active_entries.unwrap_or(0),
      expired_entries: self.expired_entries.unwrap_or(0),
    }
  }
}
