use crate::store::AccessStore;
use app_error::AppError;
use database_entity::dto::{Action, CapabilitySet, ResourceKind, Role, RoleAction};
use database_entity::pg_row::RolePermissionRow;
use std::collections::{HashMap, HashSet};
use tracing::{info, trace, warn};

/// Static mapping from role to the `(resource kind, action)` pairs it may perform.
/// Loaded once at startup; anything not listed is denied.
#[derive(Debug, Clone, Default)]
pub struct RolePermissionRegistry {
  permissions: HashMap<Role, HashSet<(ResourceKind, RoleAction)>>,
}

impl RolePermissionRegistry {
  pub fn new<I>(edges: I) -> Self
  where
    I: IntoIterator<Item = (Role, ResourceKind, RoleAction)>,
  {
    let mut permissions: HashMap<Role, HashSet<(ResourceKind, RoleAction)>> = HashMap::new();
    for (role, kind, action) in edges {
      permissions.entry(role).or_default().insert((kind, action));
    }
    Self { permissions }
  }

  /// The built-in role table, used when the store has no role permissions yet.
  pub fn seeded() -> Self {
    let mut edges = vec![];
    for kind in [ResourceKind::File, ResourceKind::Folder, ResourceKind::User] {
      for action in RoleAction::ALL {
        edges.push((Role::Admin, kind, action));
      }
    }
    for kind in [ResourceKind::File, ResourceKind::Folder] {
      for action in RoleAction::ALL {
        edges.push((Role::Manager, kind, action));
      }
      edges.push((Role::SimpleUser, kind, RoleAction::Create));
    }
    edges.push((Role::Manager, ResourceKind::User, RoleAction::Read));
    edges.push((Role::SimpleUser, ResourceKind::User, RoleAction::Read));
    Self::new(edges)
  }

  /// Builds the registry from stored rows. Rows that do not parse are skipped.
  pub fn from_rows(rows: &[RolePermissionRow]) -> Self {
    let edges = rows.iter().filter_map(|row| match row.parse() {
      Ok(edge) => Some(edge),
      Err(err) => {
        warn!("[permission]: skip invalid role permission {:?}: {}", row, err);
        None
      },
    });
    Self::new(edges)
  }

  pub fn len(&self) -> usize {
    self.permissions.values().map(|set| set.len()).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn role_allows(&self, role: Role, kind: ResourceKind, action: RoleAction) -> bool {
    let allowed = self
      .permissions
      .get(&role)
      .map(|set| set.contains(&(kind, action)))
      .unwrap_or(false);
    trace!(
      "[permission]: role {} {} {} => {}",
      role,
      kind,
      action.as_str(),
      allowed
    );
    allowed
  }

  /// The capability set a role holds on a kind when no grant applies.
  pub fn capabilities_for(&self, role: Role, kind: ResourceKind) -> CapabilitySet {
    let allows = |action: Action| self.role_allows(role, kind, action.role_action());
    CapabilitySet::new(
      allows(Action::Read),
      allows(Action::Write),
      allows(Action::Delete),
      allows(Action::Share),
    )
  }
}

/// Loads the registry from the store, falling back to [RolePermissionRegistry::seeded]
/// when nothing is stored yet.
pub async fn load_registry(store: &dyn AccessStore) -> Result<RolePermissionRegistry, AppError> {
  let rows = store.get_role_permissions().await?;
  if rows.is_empty() {
    warn!("[permission]: no role permissions stored, using built-in role table");
    return Ok(RolePermissionRegistry::seeded());
  }
  let registry = RolePermissionRegistry::from_rows(&rows);
  info!("[permission]: loaded {} role permissions", registry.len());
  Ok(registry)
}
