use app_error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Kind of resource a permission refers to. `User` only appears in role
/// permissions; grants and cache entries are always scoped to `File` or `Folder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
  File,
  Folder,
  User,
}

impl ResourceKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResourceKind::File => "file",
      ResourceKind::Folder => "folder",
      ResourceKind::User => "user",
    }
  }

  /// Returns the kind unchanged if it names a storage resource, i.e. a file or a folder.
  pub fn ensure_storage(self) -> Result<Self, AppError> {
    match self {
      ResourceKind::File | ResourceKind::Folder => Ok(self),
      ResourceKind::User => Err(AppError::InvalidKind(format!(
        "{} is not a storage resource",
        self
      ))),
    }
  }
}

impl Display for ResourceKind {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ResourceKind {
  type Err = AppError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "file" => Ok(ResourceKind::File),
      "folder" => Ok(ResourceKind::Folder),
      "user" => Ok(ResourceKind::User),
      other => Err(AppError::InvalidKind(other.to_string())),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
  Admin,
  Manager,
  SimpleUser,
}

impl Role {
  pub fn as_str(&self) -> &'static str {
    match self {
      Role::Admin => "ADMIN",
      Role::Manager => "MANAGER",
      Role::SimpleUser => "SIMPLE_USER",
    }
  }
}

/// Case-insensitive. `USER` is accepted for `SIMPLE_USER`, anything else is rejected.
impl FromStr for Role {
  type Err = AppError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_uppercase().as_str() {
      "ADMIN" => Ok(Role::Admin),
      "MANAGER" => Ok(Role::Manager),
      "SIMPLE_USER" | "USER" => Ok(Role::SimpleUser),
      _ => Err(AppError::InvalidRequest(format!("unknown role: {}", s))),
    }
  }
}

impl Display for Role {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Action half of a role permission pair `(resource kind, action)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoleAction {
  Create,
  Read,
  Update,
  Delete,
  Manage,
  Share,
}

impl RoleAction {
  pub const ALL: [RoleAction; 6] = [
    RoleAction::Create,
    RoleAction::Read,
    RoleAction::Update,
    RoleAction::Delete,
    RoleAction::Manage,
    RoleAction::Share,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      RoleAction::Create => "CREATE",
      RoleAction::Read => "READ",
      RoleAction::Update => "UPDATE",
      RoleAction::Delete => "DELETE",
      RoleAction::Manage => "MANAGE",
      RoleAction::Share => "SHARE",
    }
  }
}

impl FromStr for RoleAction {
  type Err = AppError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_uppercase().as_str() {
      "CREATE" => Ok(RoleAction::Create),
      "READ" => Ok(RoleAction::Read),
      "UPDATE" => Ok(RoleAction::Update),
      "DELETE" => Ok(RoleAction::Delete),
      "MANAGE" => Ok(RoleAction::Manage),
      "SHARE" => Ok(RoleAction::Share),
      other => Err(AppError::InvalidRequest(format!(
        "unknown role action: {}",
        other
      ))),
    }
  }
}

/// The four capabilities a grant can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
  Read,
  Write,
  Delete,
  Share,
}

impl Action {
  pub const ALL: [Action; 4] = [Action::Read, Action::Write, Action::Delete, Action::Share];

  /// The role permission consulted when no grant source applies.
  pub fn role_action(&self) -> RoleAction {
    match self {
      Action::Read => RoleAction::Read,
      Action::Write => RoleAction::Update,
      Action::Delete => RoleAction::Delete,
      Action::Share => RoleAction::Share,
    }
  }
}

impl FromStr for Action {
  type Err = AppError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "read" => Ok(Action::Read),
      "write" => Ok(Action::Write),
      "delete" => Ok(Action::Delete),
      "share" => Ok(Action::Share),
      other => Err(AppError::InvalidRequest(format!("unknown action: {}", other))),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilitySet {
  pub can_read: bool,
  pub can_write: bool,
  pub can_delete: bool,
  pub can_share: bool,
}

impl CapabilitySet {
  pub fn new(can_read: bool, can_write: bool, can_delete: bool, can_share: bool) -> Self {
    Self {
      can_read,
      can_write,
      can_delete,
      can_share,
    }
  }

  pub fn full() -> Self {
    Self::new(true, true, true, true)
  }

  pub fn none() -> Self {
    Self::default()
  }

  pub fn read_only() -> Self {
    Self::new(true, false, false, false)
  }

  /// Flag-wise OR. Used to combine co-equal group grants on one resource.
  pub fn union(self, other: CapabilitySet) -> Self {
    Self {
      can_read: self.can_read || other.can_read,
      can_write: self.can_write || other.can_write,
      can_delete: self.can_delete || other.can_delete,
      can_share: self.can_share || other.can_share,
    }
  }

  pub fn allows(&self, action: Action) -> bool {
    match action {
      Action::Read => self.can_read,
      Action::Write => self.can_write,
      Action::Delete => self.can_delete,
      Action::Share => self.can_share,
    }
  }

  pub fn any(&self) -> bool {
    self.can_read || self.can_write || self.can_delete || self.can_share
  }
}

/// Which resolution path produced a decision. Role defaults have no source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionSource {
  Owner,
  Direct,
  Group,
  Inherited,
}

impl PermissionSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      PermissionSource::Owner => "owner",
      PermissionSource::Direct => "direct",
      PermissionSource::Group => "group",
      PermissionSource::Inherited => "inherited",
    }
  }
}

impl FromStr for PermissionSource {
  type Err = AppError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "owner" => Ok(PermissionSource::Owner),
      "direct" => Ok(PermissionSource::Direct),
      "group" => Ok(PermissionSource::Group),
      "inherited" => Ok(PermissionSource::Inherited),
      other => Err(AppError::InvalidRequest(format!(
        "unknown permission source: {}",
        other
      ))),
    }
  }
}

/// The caller on whose behalf a decision is made, as provided by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
  pub id: i64,
  pub role: Role,
  pub group_ids: Vec<i64>,
}

impl Identity {
  pub fn new(id: i64, role: Role, group_ids: Vec<i64>) -> Self {
    Self {
      id,
      role,
      group_ids,
    }
  }
}

/// A file or a folder as seen by the resolver. For a folder `parent_id` is the
/// parent folder; for a file it is the containing folder. `None` means root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
  pub id: i64,
  pub kind: ResourceKind,
  pub owner_id: i64,
  pub parent_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectivePermission {
  pub capabilities: CapabilitySet,
  pub is_owner: bool,
  /// `None` when the decision falls back to the role default.
  pub source: Option<PermissionSource>,
  /// The ancestor folder an inherited decision was taken from.
  pub source_resource_id: Option<i64>,
}

impl EffectivePermission {
  pub fn owner() -> Self {
    Self {
      capabilities: CapabilitySet::full(),
      is_owner: true,
      source: Some(PermissionSource::Owner),
      source_resource_id: None,
    }
  }

  pub fn granted(capabilities: CapabilitySet, source: PermissionSource) -> Self {
    Self {
      capabilities,
      is_owner: false,
      source: Some(source),
      source_resource_id: None,
    }
  }

  pub fn role_default(capabilities: CapabilitySet) -> Self {
    Self {
      capabilities,
      is_owner: false,
      source: None,
      source_resource_id: None,
    }
  }

  /// Re-labels an ancestor's own decision as inherited by a descendant.
  pub fn inherited_from(self, ancestor_id: i64) -> Self {
    Self {
      capabilities: self.capabilities,
      is_owner: false,
      source: Some(PermissionSource::Inherited),
      source_resource_id: Some(ancestor_id),
    }
  }

  pub fn allows(&self, action: Action) -> bool {
    self.capabilities.allows(action)
  }

  pub fn is_cacheable(&self) -> bool {
    self.source.is_some()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionCacheEntry {
  pub user_id: i64,
  pub resource_kind: ResourceKind,
  pub resource_id: i64,
  pub capabilities: CapabilitySet,
  pub is_owner: bool,
  pub source: PermissionSource,
  pub source_resource_id: Option<i64>,
  pub cached_at: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
}

impl PermissionCacheEntry {
  pub fn is_live(&self, now: DateTime<Utc>) -> bool {
    self.expires_at > now
  }

  pub fn to_effective(&self) -> EffectivePermission {
    EffectivePermission {
      capabilities: self.capabilities,
      is_owner: self.is_owner,
      source: Some(self.source),
      source_resource_id: self.source_resource_id,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
  pub cache_enabled: bool,
  pub total_entries: i64,
  pub active_entries: i64,
  pub expired_entries: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmCacheStats {
  pub files_warmed: usize,
  pub folders_warmed: usize,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn union_is_most_permissive() {
    let a = CapabilitySet::new(true, false, false, false);
    let b = CapabilitySet::new(false, true, false, false);
    assert_eq!(a.union(b), CapabilitySet::new(true, true, false, false));
    assert!(!CapabilitySet::none().any());
  }

  #[test]
  fn kind_parsing_rejects_unknown_kinds() {
    assert_eq!("Folder".parse::<ResourceKind>().unwrap(), ResourceKind::Folder);
    assert!("bucket".parse::<ResourceKind>().unwrap_err().is_invalid_kind());
    assert!(ResourceKind::User.ensure_storage().unwrap_err().is_invalid_kind());
    assert_eq!(
      ResourceKind::File.ensure_storage().unwrap(),
      ResourceKind::File
    );
  }

  #[test]
  fn legacy_role_names_map_to_simple_user() {
    assert_eq!("user".parse::<Role>().unwrap(), Role::SimpleUser);
    assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
    assert_eq!("SIMPLE_USER".parse::<Role>().unwrap(), Role::SimpleUser);
  }

  #[test]
  fn unknown_role_name_is_rejected() {
    assert!("AUDITOR".parse::<Role>().is_err());
    assert!("".parse::<Role>().is_err());
  }

  #[test]
  fn inherited_keeps_capabilities_but_not_ownership() {
    let inherited = EffectivePermission::owner().inherited_from(10);
    assert_eq!(inherited.capabilities, CapabilitySet::full());
    assert!(!inherited.is_owner);
    assert_eq!(inherited.source, Some(PermissionSource::Inherited));
    assert_eq!(inherited.source_resource_id, Some(10));
  }

  #[test]
  fn write_maps_to_update_role_action() {
    assert_eq!(Action::Write.role_action(), RoleAction::Update);
    assert_eq!(Action::Share.role_action(), RoleAction::Share);
  }
}
