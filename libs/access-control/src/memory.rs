use crate::store::{AccessStore, PermissionCacheStore};
use app_error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use database_entity::dto::{
  CacheStats, CapabilitySet, Identity, PermissionCacheEntry, ResourceKind, ResourceRef,
};
use database_entity::pg_row::{GrantRow, RolePermissionRow};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// In-process [AccessStore]. Used by tests and local tooling.
#[derive(Default)]
pub struct MemoryAccessStore {
  resources: DashMap<(ResourceKind, i64), ResourceRef>,
  grants: DashMap<(ResourceKind, i64), Vec<GrantRow>>,
  role_permissions: DashSet<(String, String, String)>,
  fail_reads: AtomicBool,
  resource_reads: AtomicUsize,
}

impl MemoryAccessStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_folder(&self, id: i64, owner_id: i64, parent_id: Option<i64>) {
    self.add_resource(ResourceRef {
      id,
      kind: ResourceKind::Folder,
      owner_id,
      parent_id,
    });
  }

  pub fn add_file(&self, id: i64, owner_id: i64, folder_id: Option<i64>) {
    self.add_resource(ResourceRef {
      id,
      kind: ResourceKind::File,
      owner_id,
      parent_id: folder_id,
    });
  }

  pub fn add_resource(&self, resource: ResourceRef) {
    self.resources.insert((resource.kind, resource.id), resource);
  }

  pub fn set_owner(&self, kind: ResourceKind, id: i64, owner_id: i64) {
    if let Some(mut resource) = self.resources.get_mut(&(kind, id)) {
      resource.owner_id = owner_id;
    }
  }

  pub fn grant_user(
    &self,
    kind: ResourceKind,
    resource_id: i64,
    user_id: i64,
    capabilities: CapabilitySet,
  ) {
    self.push_grant(kind, resource_id, Some(user_id), None, capabilities);
  }

  pub fn grant_group(
    &self,
    kind: ResourceKind,
    resource_id: i64,
    group_id: i64,
    capabilities: CapabilitySet,
  ) {
    self.push_grant(kind, resource_id, None, Some(group_id), capabilities);
  }

  /// Removes every grant on the resource held by `group_id`.
  pub fn revoke_group(&self, kind: ResourceKind, resource_id: i64, group_id: i64) {
    if let Some(mut rows) = self.grants.get_mut(&(kind, resource_id)) {
      rows.retain(|row| row.group_id != Some(group_id));
    }
  }

  /// Removes every grant on the resource held by `user_id`.
  pub fn revoke_user(&self, kind: ResourceKind, resource_id: i64, user_id: i64) {
    if let Some(mut rows) = self.grants.get_mut(&(kind, resource_id)) {
      rows.retain(|row| row.user_id != Some(user_id));
    }
  }

  pub fn set_role_permissions(&self, rows: Vec<RolePermissionRow>) {
    self.role_permissions.clear();
    for row in rows {
      self
        .role_permissions
        .insert((row.role, row.resource_type, row.action));
    }
  }

  /// Makes every read fail, to simulate an unreachable store.
  pub fn set_fail_reads(&self, fail: bool) {
    self.fail_reads.store(fail, Ordering::SeqCst);
  }

  /// Number of `get_resources` calls served so far.
  pub fn resource_reads(&self) -> usize {
    self.resource_reads.load(Ordering::SeqCst)
  }

  /// Folders below `root_id` at any depth, and the files in `root_id` or any of
  /// those folders. A folder already reached is not expanded again.
  pub fn descendants(&self, root_id: i64) -> (HashSet<i64>, HashSet<i64>) {
    let mut folders = HashSet::new();
    let mut frontier = vec![root_id];
    let mut reached = HashSet::from([root_id]);
    while !frontier.is_empty() {
      let parents = frontier.drain(..).collect::<HashSet<_>>();
      for child in self
        .resources
        .iter()
        .filter(|entry| entry.key().0 == ResourceKind::Folder)
        .filter(|entry| matches!(entry.parent_id, Some(p) if parents.contains(&p)))
        .map(|entry| entry.id)
        .collect::<Vec<_>>()
      {
        if reached.insert(child) {
          folders.insert(child);
          frontier.push(child);
        }
      }
    }
    let files = self
      .resources
      .iter()
      .filter(|entry| entry.key().0 == ResourceKind::File)
      .filter(|entry| matches!(entry.parent_id, Some(p) if reached.contains(&p)))
      .map(|entry| entry.id)
      .collect();
    (folders, files)
  }

  fn push_grant(
    &self,
    kind: ResourceKind,
    resource_id: i64,
    user_id: Option<i64>,
    group_id: Option<i64>,
    capabilities: CapabilitySet,
  ) {
    self
      .grants
      .entry((kind, resource_id))
      .or_default()
      .push(GrantRow {
        resource_id,
        user_id,
        group_id,
        can_read: capabilities.can_read,
        can_write: capabilities.can_write,
        can_delete: capabilities.can_delete,
        can_share: capabilities.can_share,
      });
  }

  fn check_reads(&self) -> Result<(), AppError> {
    if self.fail_reads.load(Ordering::SeqCst) {
      return Err(AppError::DBError("memory store reads disabled".to_string()));
    }
    Ok(())
  }

  fn grants_matching<F>(&self, kind: ResourceKind, resource_ids: &[i64], filter: F) -> Vec<GrantRow>
  where
    F: Fn(&GrantRow) -> bool,
  {
    resource_ids
      .iter()
      .filter_map(|id| self.grants.get(&(kind, *id)))
      .flat_map(|rows| rows.iter().filter(|row| filter(row)).cloned().collect::<Vec<_>>())
      .collect()
  }
}

#[async_trait]
impl AccessStore for MemoryAccessStore {
  async fn get_resources(
    &self,
    kind: ResourceKind,
    ids: &[i64],
  ) -> Result<Vec<ResourceRef>, AppError> {
    self.check_reads()?;
    let kind = kind.ensure_storage()?;
    self.resource_reads.fetch_add(1, Ordering::SeqCst);
    Ok(
      ids
        .iter()
        .filter_map(|id| self.resources.get(&(kind, *id)).map(|r| *r))
        .collect(),
    )
  }

  async fn get_user_grants(
    &self,
    kind: ResourceKind,
    user_id: i64,
    resource_ids: &[i64],
  ) -> Result<Vec<GrantRow>, AppError> {
    self.check_reads()?;
    Ok(self.grants_matching(kind, resource_ids, |row| row.user_id == Some(user_id)))
  }

  async fn get_group_grants(
    &self,
    kind: ResourceKind,
    group_ids: &[i64],
    resource_ids: &[i64],
  ) -> Result<Vec<GrantRow>, AppError> {
    self.check_reads()?;
    Ok(self.grants_matching(kind, resource_ids, |row| {
      row.group_id.map(|g| group_ids.contains(&g)).unwrap_or(false)
    }))
  }

  async fn get_role_permissions(&self) -> Result<Vec<RolePermissionRow>, AppError> {
    self.check_reads()?;
    Ok(
      self
        .role_permissions
        .iter()
        .map(|edge| {
          let (role, resource_type, action) = edge.key().clone();
          RolePermissionRow {
            role,
            resource_type,
            action,
          }
        })
        .collect(),
    )
  }

  async fn get_warm_candidates(
    &self,
    kind: ResourceKind,
    identity: &Identity,
    limit: usize,
  ) -> Result<Vec<ResourceRef>, AppError> {
    self.check_reads()?;
    let kind = kind.ensure_storage()?;
    let mut candidates = self
      .resources
      .iter()
      .filter(|entry| entry.key().0 == kind)
      .map(|entry| *entry.value())
      .filter(|resource| {
        let granted = self
          .grants
          .get(&(kind, resource.id))
          .map(|rows| {
            rows.iter().any(|row| {
              row.user_id == Some(identity.id)
                || row
                  .group_id
                  .map(|g| identity.group_ids.contains(&g))
                  .unwrap_or(false)
            })
          })
          .unwrap_or(false);
        let top_level = kind == ResourceKind::Folder && resource.parent_id.is_none();
        resource.owner_id == identity.id || granted || top_level
      })
      .collect::<Vec<_>>();
    candidates.sort_by_key(|resource| resource.id);
    candidates.truncate(limit);
    Ok(candidates)
  }

  async fn get_folder_subtree(
    &self,
    root_id: i64,
    max_depth: u32,
    limit: usize,
    offset: usize,
  ) -> Result<Vec<ResourceRef>, AppError> {
    self.check_reads()?;
    let Some(root) = self.resources.get(&(ResourceKind::Folder, root_id)).map(|r| *r) else {
      return Ok(vec![]);
    };
    let mut tree = vec![];
    let mut seen = HashSet::from([root.id]);
    let mut queue = VecDeque::from([(root, 0u32)]);
    while let Some((folder, depth)) = queue.pop_front() {
      tree.push(folder);
      if depth >= max_depth {
        continue;
      }
      let mut children = self
        .resources
        .iter()
        .filter(|entry| entry.key().0 == ResourceKind::Folder)
        .map(|entry| *entry.value())
        .filter(|child| child.parent_id == Some(folder.id) && !seen.contains(&child.id))
        .collect::<Vec<_>>();
      children.sort_by_key(|child| child.id);
      for child in children {
        seen.insert(child.id);
        queue.push_back((child, depth + 1));
      }
    }
    Ok(tree.into_iter().skip(offset).take(limit).collect())
  }
}

/// In-process [PermissionCacheStore] keyed by `(user, kind, resource)`.
///
/// Folder invalidation reaches the folder's subtree only when the store knows the
/// tree, see [MemoryPermissionCacheStore::with_tree].
#[derive(Default)]
pub struct MemoryPermissionCacheStore {
  entries: DashMap<(i64, ResourceKind, i64), PermissionCacheEntry>,
  tree: Option<Arc<MemoryAccessStore>>,
  fail_writes: AtomicBool,
  fail_reads: AtomicBool,
}

impl MemoryPermissionCacheStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_tree(tree: Arc<MemoryAccessStore>) -> Self {
    Self {
      tree: Some(tree),
      ..Self::default()
    }
  }

  /// Makes every upsert fail, to simulate a store write failure.
  pub fn set_fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }

  pub fn set_fail_reads(&self, fail: bool) {
    self.fail_reads.store(fail, Ordering::SeqCst);
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Raw entry, expired or not.
  pub fn entry(
    &self,
    user_id: i64,
    kind: ResourceKind,
    resource_id: i64,
  ) -> Option<PermissionCacheEntry> {
    self
      .entries
      .get(&(user_id, kind, resource_id))
      .map(|entry| entry.clone())
  }

  fn remove_where<F>(&self, predicate: F) -> u64
  where
    F: Fn(&PermissionCacheEntry) -> bool,
  {
    let before = self.entries.len();
    self.entries.retain(|_, entry| !predicate(entry));
    before.saturating_sub(self.entries.len()) as u64
  }

  fn scope(&self, kind: ResourceKind, resource_id: i64) -> InvalidationScope {
    let (folders, files) = match (kind, &self.tree) {
      (ResourceKind::Folder, Some(tree)) => tree.descendants(resource_id),
      _ => (HashSet::new(), HashSet::new()),
    };
    InvalidationScope {
      kind,
      resource_id,
      folders,
      files,
    }
  }
}

/// Entries touched by a grant change on one resource.
struct InvalidationScope {
  kind: ResourceKind,
  resource_id: i64,
  folders: HashSet<i64>,
  files: HashSet<i64>,
}

impl InvalidationScope {
  fn covers(&self, entry: &PermissionCacheEntry) -> bool {
    if entry.resource_kind == self.kind && entry.resource_id == self.resource_id {
      return true;
    }
    if self.kind != ResourceKind::Folder {
      return false;
    }
    entry.source_resource_id == Some(self.resource_id)
      || match entry.resource_kind {
        ResourceKind::Folder => self.folders.contains(&entry.resource_id),
        ResourceKind::File => self.files.contains(&entry.resource_id),
        ResourceKind::User => false,
      }
  }
}

#[async_trait]
impl PermissionCacheStore for MemoryPermissionCacheStore {
  async fn get_live(
    &self,
    user_id: i64,
    kind: ResourceKind,
    resource_ids: &[i64],
    now: DateTime<Utc>,
  ) -> Result<Vec<PermissionCacheEntry>, AppError> {
    if self.fail_reads.load(Ordering::SeqCst) {
      return Err(AppError::DBError("memory cache reads disabled".to_string()));
    }
    Ok(
      resource_ids
        .iter()
        .filter_map(|id| self.entries.get(&(user_id, kind, *id)))
        .filter(|entry| entry.is_live(now))
        .map(|entry| entry.clone())
        .collect(),
    )
  }

  async fn upsert(&self, entries: &[PermissionCacheEntry]) -> Result<(), AppError> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(AppError::DBError("memory cache writes disabled".to_string()));
    }
    for entry in entries {
      self.entries.insert(
        (entry.user_id, entry.resource_kind, entry.resource_id),
        entry.clone(),
      );
    }
    Ok(())
  }

  async fn delete_for_user(&self, user_id: i64) -> Result<u64, AppError> {
    Ok(self.remove_where(|entry| entry.user_id == user_id))
  }

  async fn delete_for_resource(
    &self,
    kind: ResourceKind,
    resource_id: i64,
  ) -> Result<u64, AppError> {
    let scope = self.scope(kind, resource_id);
    Ok(self.remove_where(|entry| scope.covers(entry)))
  }

  async fn delete_for_users_on_resource(
    &self,
    user_ids: &[i64],
    kind: ResourceKind,
    resource_id: i64,
  ) -> Result<u64, AppError> {
    let scope = self.scope(kind, resource_id);
    Ok(self.remove_where(|entry| user_ids.contains(&entry.user_id) && scope.covers(entry)))
  }

  async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
    Ok(self.remove_where(|entry| !entry.is_live(now)))
  }

  async fn stats(&self, now: DateTime<Utc>) -> Result<CacheStats, AppError> {
    let total = self.entries.len() as i64;
    let active = self
      .entries
      .iter()
      .filter(|entry| entry.is_live(now))
      .count() as i64;
    Ok(CacheStats {
      cache_enabled: true,
      total_entries: total,
      active_entries: active,
      expired_entries: total - active,
    })
  }
}
