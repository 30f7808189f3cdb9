mod util;

use access_control::access::PermissionSettings;
use database_entity::dto::{Action, CapabilitySet, PermissionSource, ResourceKind};
use util::{folder_chain, manager, simple_user, test_env, test_env_with};

const OTHER: i64 = 99;

#[tokio::test]
async fn no_source_and_no_role_permission_is_denied() {
  let env = test_env();
  env.access.add_folder(10, OTHER, None);
  let user = simple_user(1, vec![]);

  for action in Action::ALL {
    let allowed = env
      .service
      .check_single(&user, ResourceKind::Folder, 10, action)
      .await
      .unwrap();
    assert!(!allowed, "{:?} should be denied", action);
  }
}

#[tokio::test]
async fn owner_gets_everything_despite_conflicting_grant() {
  let env = test_env();
  env.access.add_folder(10, 1, None);
  env
    .access
    .grant_user(ResourceKind::Folder, 10, 1, CapabilitySet::none());
  let user = simple_user(1, vec![]);

  let permission = env
    .service
    .resolve_single(&user, ResourceKind::Folder, 10)
    .await
    .unwrap();
  assert!(permission.is_owner);
  assert_eq!(permission.source, Some(PermissionSource::Owner));
  assert_eq!(permission.capabilities, CapabilitySet::full());
  for action in Action::ALL {
    assert!(env
      .service
      .check_single(&user, ResourceKind::Folder, 10, action)
      .await
      .unwrap());
  }
}

#[tokio::test]
async fn group_grants_on_one_resource_are_merged() {
  let env = test_env();
  env.access.add_folder(10, OTHER, None);
  env.access.grant_group(
    ResourceKind::Folder,
    10,
    1,
    CapabilitySet::new(true, false, false, false),
  );
  env.access.grant_group(
    ResourceKind::Folder,
    10,
    2,
    CapabilitySet::new(false, true, false, false),
  );
  let user = simple_user(1, vec![1, 2]);

  let permission = env
    .service
    .resolve_single(&user, ResourceKind::Folder, 10)
    .await
    .unwrap();
  assert_eq!(permission.source, Some(PermissionSource::Group));
  assert_eq!(
    permission.capabilities,
    CapabilitySet::new(true, true, false, false)
  );
}

#[tokio::test]
async fn direct_grant_wins_over_broader_group_grant() {
  let env = test_env();
  env.access.add_file(100, OTHER, None);
  env
    .access
    .grant_user(ResourceKind::File, 100, 1, CapabilitySet::read_only());
  env
    .access
    .grant_group(ResourceKind::File, 100, 1, CapabilitySet::full());
  let user = simple_user(1, vec![1]);

  assert!(env
    .service
    .check_single(&user, ResourceKind::File, 100, Action::Read)
    .await
    .unwrap());
  assert!(!env
    .service
    .check_single(&user, ResourceKind::File, 100, Action::Write)
    .await
    .unwrap());
}

#[tokio::test]
async fn nearest_ancestor_wins_over_broader_grandparent() {
  let env = test_env();
  env.access.add_folder(20, OTHER, None);
  env.access.add_folder(10, OTHER, Some(20));
  env.access.add_folder(5, OTHER, Some(10));
  env
    .access
    .grant_group(ResourceKind::Folder, 10, 1, CapabilitySet::read_only());
  env.access.grant_group(
    ResourceKind::Folder,
    20,
    1,
    CapabilitySet::new(true, true, false, false),
  );
  let user = simple_user(1, vec![1]);

  let permission = env
    .service
    .resolve_single(&user, ResourceKind::Folder, 5)
    .await
    .unwrap();
  assert_eq!(permission.source, Some(PermissionSource::Inherited));
  assert_eq!(permission.source_resource_id, Some(10));
  assert_eq!(permission.capabilities, CapabilitySet::read_only());
  assert!(!permission.is_owner);
}

#[tokio::test]
async fn inherited_ownership_is_not_ownership() {
  let env = test_env();
  env.access.add_folder(10, 1, None);
  env.access.add_folder(11, OTHER, Some(10));
  let user = simple_user(1, vec![]);

  let permission = env
    .service
    .resolve_single(&user, ResourceKind::Folder, 11)
    .await
    .unwrap();
  assert_eq!(permission.capabilities, CapabilitySet::full());
  assert_eq!(permission.source, Some(PermissionSource::Inherited));
  assert!(!permission.is_owner);
}

#[tokio::test]
async fn revoking_an_ancestor_grant_refreshes_descendants() {
  let env = test_env();
  env.access.add_folder(10, OTHER, None);
  env.access.add_folder(11, OTHER, Some(10));
  env
    .access
    .grant_group(ResourceKind::Folder, 10, 1, CapabilitySet::read_only());
  let user = simple_user(1, vec![1]);

  assert!(env
    .service
    .check_single(&user, ResourceKind::Folder, 11, Action::Read)
    .await
    .unwrap());
  assert!(env
    .service
    .check_single(&user, ResourceKind::Folder, 10, Action::Read)
    .await
    .unwrap());

  env.access.revoke_group(ResourceKind::Folder, 10, 1);
  let removed = env
    .service
    .on_grant_changed(ResourceKind::Folder, 10)
    .await
    .unwrap();
  assert_eq!(removed, 2);

  assert!(!env
    .service
    .check_single(&user, ResourceKind::Folder, 10, Action::Read)
    .await
    .unwrap());
  assert!(!env
    .service
    .check_single(&user, ResourceKind::Folder, 11, Action::Read)
    .await
    .unwrap());
}

#[tokio::test]
async fn files_inherit_from_their_folder() {
  let env = test_env();
  env.access.add_folder(10, OTHER, None);
  env.access.add_file(100, OTHER, Some(10));
  env.access.add_file(101, OTHER, None);
  env
    .access
    .grant_user(ResourceKind::Folder, 10, 1, CapabilitySet::read_only());
  let user = simple_user(1, vec![]);

  let permission = env
    .service
    .resolve_single(&user, ResourceKind::File, 100)
    .await
    .unwrap();
  assert_eq!(permission.source, Some(PermissionSource::Inherited));
  assert_eq!(permission.source_resource_id, Some(10));
  assert!(permission.allows(Action::Read));
  assert!(!permission.allows(Action::Write));

  assert!(!env
    .service
    .check_single(&user, ResourceKind::File, 101, Action::Read)
    .await
    .unwrap());
}

#[tokio::test]
async fn role_default_applies_but_is_not_cached() {
  let env = test_env();
  env.access.add_folder(10, OTHER, None);
  let user = manager(1);

  let permission = env
    .service
    .resolve_single(&user, ResourceKind::Folder, 10)
    .await
    .unwrap();
  assert_eq!(permission.source, None);
  assert_eq!(permission.capabilities, CapabilitySet::full());
  assert!(env
    .cache_store
    .entry(1, ResourceKind::Folder, 10)
    .is_none());
  assert!(env.cache_store.is_empty());
}

#[tokio::test]
async fn unknown_resource_is_not_found_and_not_cached() {
  let env = test_env();
  let user = simple_user(1, vec![]);

  let err = env
    .service
    .check_single(&user, ResourceKind::File, 404, Action::Read)
    .await
    .unwrap_err();
  assert!(err.is_record_not_found());
  assert!(env.cache_store.is_empty());
}

#[tokio::test]
async fn user_kind_is_rejected() {
  let env = test_env();
  let user = simple_user(1, vec![]);
  let err = env
    .service
    .check_single(&user, ResourceKind::User, 1, Action::Read)
    .await
    .unwrap_err();
  assert!(err.is_invalid_kind());
}

#[tokio::test]
async fn ancestor_chain_deeper_than_cap_is_no_match() {
  let env = test_env();
  folder_chain(&env.access, 70, OTHER);
  env
    .access
    .grant_user(ResourceKind::Folder, 0, 1, CapabilitySet::read_only());
  let user = simple_user(1, vec![]);

  // 30 ancestors: within the cap of 64.
  assert!(env
    .service
    .check_single(&user, ResourceKind::Folder, 30, Action::Read)
    .await
    .unwrap());
  // 70 ancestors: the walk gives up before reaching folder 0.
  assert!(!env
    .service
    .check_single(&user, ResourceKind::Folder, 70, Action::Read)
    .await
    .unwrap());
  // 64 ancestors: folder 0 is the last one examined.
  assert!(env
    .service
    .check_single(&user, ResourceKind::Folder, 64, Action::Read)
    .await
    .unwrap());
  assert!(!env
    .service
    .check_single(&user, ResourceKind::Folder, 65, Action::Read)
    .await
    .unwrap());
}

#[tokio::test]
async fn configured_depth_cap_is_honoured() {
  let env = test_env_with(PermissionSettings {
    max_hierarchy_depth: 2,
    ..Default::default()
  });
  folder_chain(&env.access, 3, OTHER);
  env
    .access
    .grant_user(ResourceKind::Folder, 0, 1, CapabilitySet::read_only());
  let user = simple_user(1, vec![]);

  assert!(env
    .service
    .check_single(&user, ResourceKind::Folder, 2, Action::Read)
    .await
    .unwrap());
  assert!(!env
    .service
    .check_single(&user, ResourceKind::Folder, 3, Action::Read)
    .await
    .unwrap());
}

#[tokio::test]
async fn cyclic_or_broken_parents_resolve_to_no_match() {
  let env = test_env();
  env.access.add_folder(1, OTHER, Some(2));
  env.access.add_folder(2, OTHER, Some(1));
  env.access.add_folder(3, OTHER, Some(3));
  env.access.add_folder(5, OTHER, Some(404));
  let user = simple_user(1, vec![]);

  for id in [1, 2, 3, 5] {
    assert!(!env
      .service
      .check_single(&user, ResourceKind::Folder, id, Action::Read)
      .await
      .unwrap());
  }
  let bulk = env
    .service
    .check_bulk(&user, ResourceKind::Folder, &[1, 2, 3, 5], Action::Read)
    .await
    .unwrap();
  assert_eq!(bulk.len(), 4);
  assert!(bulk.values().all(|allowed| !allowed));
}

#[tokio::test]
async fn cache_write_failure_does_not_fail_the_decision() {
  let env = test_env();
  env.access.add_folder(10, 1, None);
  env.access.add_folder(11, 1, None);
  env.cache_store.set_fail_writes(true);
  let user = simple_user(1, vec![]);

  assert!(env
    .service
    .check_single(&user, ResourceKind::Folder, 10, Action::Delete)
    .await
    .unwrap());
  let bulk = env
    .service
    .check_bulk(&user, ResourceKind::Folder, &[10, 11], Action::Share)
    .await
    .unwrap();
  assert_eq!(bulk.get(&10), Some(&true));
  assert_eq!(bulk.get(&11), Some(&true));
  assert!(env.cache_store.is_empty());
  assert_eq!(env.service.metrics_state().store_write_failure(), 2);
}

#[tokio::test]
async fn cache_read_failure_is_a_miss() {
  let env = test_env();
  env.access.add_folder(10, 1, None);
  let user = simple_user(1, vec![]);
  assert!(env
    .service
    .check_single(&user, ResourceKind::Folder, 10, Action::Read)
    .await
    .unwrap());

  env.cache_store.set_fail_reads(true);
  assert!(env
    .service
    .check_single(&user, ResourceKind::Folder, 10, Action::Read)
    .await
    .unwrap());
  assert_eq!(env.service.metrics_state().check_from_cache(), 0);
}

#[tokio::test]
async fn disabled_cache_resolves_every_time() {
  let env = test_env_with(PermissionSettings {
    cache_enabled: false,
    ..Default::default()
  });
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
  assert!(env.cache_store.is_empty());

  env.access.revoke_user(ResourceKind::Folder, 10, 1);
  assert!(!env
    .service
    .check_single(&user, ResourceKind::Folder, 10, Action::Read)
    .await
    .unwrap());
  assert!(!env.service.cache_stats().await.unwrap().cache_enabled);
}
