mod util;

use chrono::Duration;
use database_entity::dto::{Action, CapabilitySet, ResourceKind};
use util::{simple_user, test_env};

const OTHER: i64 = 99;

#[tokio::test]
async fn stale_decision_survives_until_grant_hook_runs() {
  let env = test_env();
  env.access.add_folder(10, OTHER, None);
  env
    .access
    .grant_user(ResourceKind::Folder, 10, 1, CapabilitySet::read_only());
  let user = simple_user(1, vec![]);

  assert!(env
    .service
    .check_single(&user, ResourceKind::Folder, 10, Action::Read)
    .await
    .unwrap());

  env.access.revoke_user(ResourceKind::Folder, 10, 1);
  // not invalidated yet: the cached allow is still served
  assert!(env
    .service
    .check_single(&user, ResourceKind::Folder, 10, Action::Read)
    .await
    .unwrap());

  env
    .service
    .on_grant_changed(ResourceKind::Folder, 10)
    .await
    .unwrap();
  assert!(!env
    .service
    .check_single(&user, ResourceKind::Folder, 10, Action::Read)
    .await
    .unwrap());
}

#[tokio::test]
async fn folder_hook_drops_files_that_inherited_from_it() {
  let env = test_env();
  env.access.add_folder(10, OTHER, None);
  env.access.add_file(100, OTHER, Some(10));
  env.access.add_file(101, OTHER, Some(10));
  env.access.add_file(102, 1, Some(10));
  env
    .access
    .grant_user(ResourceKind::Folder, 10, 1, CapabilitySet::full());
  let user = simple_user(1, vec![]);

  let decisions = env
    .service
    .check_bulk(&user, ResourceKind::File, &[100, 101, 102], Action::Delete)
    .await
    .unwrap();
  assert!(decisions.values().all(|allowed| *allowed));
  assert_eq!(env.cache_store.len(), 3);

  env.access.revoke_user(ResourceKind::Folder, 10, 1);
  let removed = env
    .service
    .on_grant_changed(ResourceKind::Folder, 10)
    .await
    .unwrap();
  // the owned file sits in the folder's subtree, so it goes too
  assert_eq!(removed, 3);
  assert!(env.cache_store.entry(1, ResourceKind::File, 102).is_none());

  let decisions = env
    .service
    .check_bulk(&user, ResourceKind::File, &[100, 101, 102], Action::Delete)
    .await
    .unwrap();
  assert_eq!(decisions[&100], false);
  assert_eq!(decisions[&101], false);
  assert_eq!(decisions[&102], true);
}

#[tokio::test]
async fn narrowing_grant_on_intermediate_folder_refreshes_subtree() {
  let env = test_env();
  env.access.add_folder(20, OTHER, None);
  env.access.add_folder(10, OTHER, Some(20));
  env.access.add_folder(11, OTHER, Some(10));
  env.access.add_file(500, OTHER, Some(10));
  env
    .access
    .grant_group(ResourceKind::Folder, 20, 1, CapabilitySet::read_only());
  let user = simple_user(1, vec![1]);

  assert!(env
    .service
    .check_single(&user, ResourceKind::Folder, 11, Action::Read)
    .await
    .unwrap());
  assert!(env
    .service
    .check_single(&user, ResourceKind::File, 500, Action::Read)
    .await
    .unwrap());

  // both entries were inherited from folder 20, not from folder 10
  env
    .access
    .grant_user(ResourceKind::Folder, 10, 1, CapabilitySet::none());
  let removed = env
    .service
    .on_grant_changed(ResourceKind::Folder, 10)
    .await
    .unwrap();
  assert_eq!(removed, 2);

  assert!(!env
    .service
    .check_single(&user, ResourceKind::Folder, 11, Action::Read)
    .await
    .unwrap());
  assert!(!env
    .service
    .check_single(&user, ResourceKind::File, 500, Action::Read)
    .await
    .unwrap());
}

#[tokio::test]
async fn targeted_hook_reaches_the_subtree_of_listed_users() {
  let env = test_env();
  env.access.add_folder(20, OTHER, None);
  env.access.add_folder(10, OTHER, Some(20));
  env.access.add_file(500, OTHER, Some(10));
  env
    .access
    .grant_group(ResourceKind::Folder, 20, 1, CapabilitySet::read_only());
  for user_id in [1, 2] {
    let user = simple_user(user_id, vec![1]);
    env
      .service
      .check_single(&user, ResourceKind::File, 500, Action::Read)
      .await
      .unwrap();
  }

  let removed = env
    .service
    .on_grant_changed_for_users(ResourceKind::Folder, 10, &[1])
    .await
    .unwrap();
  assert_eq!(removed, 1);
  assert!(env.cache_store.entry(1, ResourceKind::File, 500).is_none());
  assert!(env.cache_store.entry(2, ResourceKind::File, 500).is_some());
}

#[tokio::test]
async fn folder_hook_terminates_on_cyclic_folders() {
  let env = test_env();
  env.access.add_folder(30, OTHER, Some(31));
  env.access.add_folder(31, OTHER, Some(30));
  env.access.add_file(600, OTHER, Some(31));
  env
    .access
    .grant_user(ResourceKind::Folder, 30, 1, CapabilitySet::read_only());
  env
    .access
    .grant_user(ResourceKind::Folder, 31, 1, CapabilitySet::read_only());
  env
    .access
    .grant_user(ResourceKind::File, 600, 1, CapabilitySet::read_only());
  let user = simple_user(1, vec![]);
  env
    .service
    .check_bulk(&user, ResourceKind::Folder, &[30, 31], Action::Read)
    .await
    .unwrap();
  env
    .service
    .check_single(&user, ResourceKind::File, 600, Action::Read)
    .await
    .unwrap();
  assert_eq!(env.cache_store.len(), 3);

  let removed = env
    .service
    .on_grant_changed(ResourceKind::Folder, 30)
    .await
    .unwrap();
  assert_eq!(removed, 3);
  assert!(env.cache_store.is_empty());
}

#[tokio::test]
async fn file_hook_does_not_touch_folders_with_the_same_id() {
  let env = test_env();
  env.access.add_folder(10, 1, None);
  env.access.add_file(10, 1, None);
  let user = simple_user(1, vec![]);
  env
    .service
    .resolve_bulk(&user, ResourceKind::Folder, &[10])
    .await
    .unwrap();
  env
    .service
    .resolve_bulk(&user, ResourceKind::File, &[10])
    .await
    .unwrap();

  let removed = env
    .service
    .on_grant_changed(ResourceKind::File, 10)
    .await
    .unwrap();
  assert_eq!(removed, 1);
  assert!(env.cache_store.entry(1, ResourceKind::Folder, 10).is_some());
}

#[tokio::test]
async fn identity_hook_drops_every_entry_of_the_user() {
  let env = test_env();
  env.access.add_folder(10, OTHER, None);
  env.access.add_folder(11, OTHER, None);
  env
    .access
    .grant_group(ResourceKind::Folder, 10, 1, CapabilitySet::read_only());
  env
    .access
    .grant_group(ResourceKind::Folder, 11, 1, CapabilitySet::read_only());
  let member = simple_user(1, vec![1]);
  let other = simple_user(2, vec![1]);

  for user in [&member, &other] {
    env
      .service
      .check_bulk(user, ResourceKind::Folder, &[10, 11], Action::Read)
      .await
      .unwrap();
  }
  assert_eq!(env.cache_store.len(), 4);

  // user 1 leaves group 1
  let former_member = simple_user(1, vec![]);
  let removed = env.service.on_identity_changed(1).await.unwrap();
  assert_eq!(removed, 2);
  assert_eq!(env.cache_store.len(), 2);

  let decisions = env
    .service
    .check_bulk(&former_member, ResourceKind::Folder, &[10, 11], Action::Read)
    .await
    .unwrap();
  assert!(decisions.values().all(|allowed| !allowed));
}

#[tokio::test]
async fn targeted_hook_only_drops_listed_users() {
  let env = test_env();
  env.access.add_folder(10, OTHER, None);
  env.access.add_folder(11, OTHER, Some(10));
  env
    .access
    .grant_group(ResourceKind::Folder, 10, 1, CapabilitySet::read_only());
  for user_id in [1, 2] {
    let user = simple_user(user_id, vec![1]);
    env
      .service
      .check_bulk(&user, ResourceKind::Folder, &[10, 11], Action::Read)
      .await
      .unwrap();
  }
  assert_eq!(env.cache_store.len(), 4);

  let removed = env
    .service
    .on_grant_changed_for_users(ResourceKind::Folder, 10, &[1])
    .await
    .unwrap();
  assert_eq!(removed, 2);
  assert!(env.cache_store.entry(1, ResourceKind::Folder, 10).is_none());
  assert!(env.cache_store.entry(1, ResourceKind::Folder, 11).is_none());
  assert!(env.cache_store.entry(2, ResourceKind::Folder, 10).is_some());
  assert!(env.cache_store.entry(2, ResourceKind::Folder, 11).is_some());
}

#[tokio::test]
async fn expired_entries_are_misses_and_get_swept() {
  let env = test_env();
  env.access.add_folder(10, OTHER, None);
  env.access.add_folder(11, 1, None);
  env
    .access
    .grant_user(ResourceKind::Folder, 10, 1, CapabilitySet::read_only());
  let user = simple_user(1, vec![]);

  env
    .service
    .check_single(&user, ResourceKind::Folder, 10, Action::Read)
    .await
    .unwrap();
  env.clock.advance(Duration::minutes(30));
  env
    .service
    .check_single(&user, ResourceKind::Folder, 11, Action::Read)
    .await
    .unwrap();

  // revoked without calling the hook; the stale allow expires with its entry
  env.access.revoke_user(ResourceKind::Folder, 10, 1);
  env.clock.advance(Duration::minutes(31));

  let stats = env.service.cache_stats().await.unwrap();
  assert!(stats.cache_enabled);
  assert_eq!(stats.total_entries, 2);
  assert_eq!(stats.expired_entries, 1);
  assert_eq!(stats.active_entries, 1);

  assert_eq!(env.service.sweep_expired().await.unwrap(), 1);
  assert!(env.cache_store.entry(1, ResourceKind::Folder, 10).is_none());
  assert!(env.cache_store.entry(1, ResourceKind::Folder, 11).is_some());
  assert_eq!(env.service.metrics_state().swept_entry(), 1);

  assert!(!env
    .service
    .check_single(&user, ResourceKind::Folder, 10, Action::Read)
    .await
    .unwrap());
}

#[tokio::test]
async fn invalidating_the_user_kind_is_rejected() {
  let env = test_env();
  let err = env
    .service
    .on_grant_changed(ResourceKind::User, 1)
    .await
    .unwrap_err();
  assert!(err.is_invalid_kind());
}
