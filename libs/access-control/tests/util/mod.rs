#![allow(dead_code)]

use access_control::access::{PermissionService, PermissionSettings};
use access_control::clock::ManualClock;
use access_control::memory::{MemoryAccessStore, MemoryPermissionCacheStore};
use access_control::registry::RolePermissionRegistry;
use database_entity::dto::{Identity, Role};
use std::sync::Arc;

pub struct TestEnv {
  pub access: Arc<MemoryAccessStore>,
  pub cache_store: Arc<MemoryPermissionCacheStore>,
  pub clock: Arc<ManualClock>,
  pub service: PermissionService,
}

pub fn test_env() -> TestEnv {
  test_env_with(PermissionSettings::default())
}

pub fn test_env_with(settings: PermissionSettings) -> TestEnv {
  let access = Arc::new(MemoryAccessStore::new());
  let cache_store = Arc::new(MemoryPermissionCacheStore::with_tree(access.clone()));
  let clock = Arc::new(ManualClock::default());
  let service = PermissionService::new(
    access.clone(),
    cache_store.clone(),
    clock.clone(),
    RolePermissionRegistry::seeded(),
    settings,
  );
  TestEnv {
    access,
    cache_store,
    clock,
    service,
  }
}

pub fn simple_user(id: i64, group_ids: Vec<i64>) -> Identity {
  Identity::new(id, Role::SimpleUser, group_ids)
}

pub fn manager(id: i64) -> Identity {
  Identity::new(id, Role::Manager, vec![])
}

/// Folders `0..=depth`, each the parent of the next. Folder 0 is at the root.
pub fn folder_chain(access: &MemoryAccessStore, depth: i64, owner_id: i64) {
  access.add_folder(0, owner_id, None);
  for id in 1..=depth {
    access.add_folder(id, owner_id, Some(id - 1));
  }
}
