use crate::registry::RolePermissionRegistry;
use crate::store::AccessStore;
use app_error::AppError;
use database_entity::dto::{
  CapabilitySet, EffectivePermission, Identity, PermissionSource, ResourceKind, ResourceRef,
};
use database_entity::pg_row::GrantRow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{instrument, trace, warn};

pub const DEFAULT_MAX_HIERARCHY_DEPTH: usize = 64;

/// OR-merges grant rows per resource id.
pub(crate) fn fold_grants<'a, I>(rows: I) -> HashMap<i64, CapabilitySet>
where
  I: IntoIterator<Item = &'a GrantRow>,
{
  let mut merged: HashMap<i64, CapabilitySet> = HashMap::new();
  for row in rows {
    let entry = merged.entry(row.resource_id).or_default();
    *entry = entry.union(row.capabilities());
  }
  merged
}

/// Applies owner > direct > group on a single resource.
///
/// `direct` is the identity's own grant on the resource and `group` the union of
/// the grants of every group the identity belongs to. A present source wins even
/// if a lower one would be more permissive.
pub fn merge_direct(
  identity: &Identity,
  resource: &ResourceRef,
  direct: Option<CapabilitySet>,
  group: Option<CapabilitySet>,
) -> Option<EffectivePermission> {
  if resource.owner_id == identity.id {
    return Some(EffectivePermission::owner());
  }
  if let Some(capabilities) = direct {
    return Some(EffectivePermission::granted(
      capabilities,
      PermissionSource::Direct,
    ));
  }
  group.map(|capabilities| EffectivePermission::granted(capabilities, PermissionSource::Group))
}

/// Resolves one resource at a time: owner, direct and group grants on the
/// resource itself, then the nearest ancestor folder, then the role default.
pub struct Resolver {
  access: Arc<dyn AccessStore>,
  registry: Arc<RolePermissionRegistry>,
  max_depth: usize,
}

impl Resolver {
  pub fn new(
    access: Arc<dyn AccessStore>,
    registry: Arc<RolePermissionRegistry>,
    max_depth: usize,
  ) -> Self {
    Self {
      access,
      registry,
      max_depth,
    }
  }

  pub fn registry(&self) -> &Arc<RolePermissionRegistry> {
    &self.registry
  }

  /// Owner, direct and group grants on exactly this resource. `None` if none applies.
  pub async fn resolve_direct(
    &self,
    identity: &Identity,
    resource: &ResourceRef,
  ) -> Result<Option<EffectivePermission>, AppError> {
    if resource.owner_id == identity.id {
      return Ok(Some(EffectivePermission::owner()));
    }

    let ids = [resource.id];
    let user_grants = self
      .access
      .get_user_grants(resource.kind, identity.id, &ids)
      .await?;
    let direct = fold_grants(&user_grants).remove(&resource.id);
    if direct.is_some() {
      return Ok(merge_direct(identity, resource, direct, None));
    }

    if identity.group_ids.is_empty() {
      return Ok(None);
    }
    let group_grants = self
      .access
      .get_group_grants(resource.kind, &identity.group_ids, &ids)
      .await?;
    let group = fold_grants(&group_grants).remove(&resource.id);
    Ok(merge_direct(identity, resource, None, group))
  }

  /// Walks up from the resource's parent folder and returns the first ancestor
  /// that yields an owner, direct or group result, relabelled as inherited.
  ///
  /// Never fails. A missing parent, a store error, a cycle or a chain deeper than
  /// the configured cap all end the walk with `None`.
  #[instrument(level = "debug", skip_all)]
  pub async fn resolve_inherited(
    &self,
    identity: &Identity,
    resource: &ResourceRef,
  ) -> Option<EffectivePermission> {
    let mut visited = HashSet::new();
    if resource.kind == ResourceKind::Folder {
      visited.insert(resource.id);
    }

    let mut next = resource.parent_id;
    let mut depth = 0;
    while let Some(ancestor_id) = next {
      if depth >= self.max_depth {
        warn!(
          "[permission]: ancestor chain of {}:{} exceeds depth {}",
          resource.kind, resource.id, self.max_depth
        );
        return None;
      }
      if !visited.insert(ancestor_id) {
        warn!(
          "[permission]: folder cycle at {} while resolving {}:{}",
          ancestor_id, resource.kind, resource.id
        );
        return None;
      }
      depth += 1;

      let ancestor = match self
        .access
        .get_resources(ResourceKind::Folder, &[ancestor_id])
        .await
      {
        Ok(folders) => match folders.into_iter().next() {
          Some(folder) => folder,
          None => {
            warn!(
              "[permission]: missing ancestor folder {} of {}:{}",
              ancestor_id, resource.kind, resource.id
            );
            return None;
          },
        },
        Err(err) => {
          warn!("[permission]: ancestor lookup failed: {}", err);
          return None;
        },
      };

      match self.resolve_direct(identity, &ancestor).await {
        Ok(Some(permission)) => {
          trace!(
            "[permission]: {}:{} inherits from folder {}",
            resource.kind,
            resource.id,
            ancestor_id
          );
          return Some(permission.inherited_from(ancestor_id));
        },
        Ok(None) => next = ancestor.parent_id,
        Err(err) => {
          warn!("[permission]: ancestor grant lookup failed: {}", err);
          return None;
        },
      }
    }
    None
  }

  pub fn role_default(&self, identity: &Identity, kind: ResourceKind) -> EffectivePermission {
    EffectivePermission::role_default(self.registry.capabilities_for(identity.role, kind))
  }

  /// Full precedence: owner > direct > group > inherited > role default.
  pub async fn resolve(
    &self,
    identity: &Identity,
    resource: &ResourceRef,
  ) -> Result<EffectivePermission, AppError> {
    if let Some(permission) = self.resolve_direct(identity, resource).await? {
      return Ok(permission);
    }
    if let Some(permission) = self.resolve_inherited(identity, resource).await {
      return Ok(permission);
    }
    Ok(self.role_default(identity, resource.kind))
  }
}
