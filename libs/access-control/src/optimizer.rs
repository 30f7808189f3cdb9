use crate::cache::PermissionCache;
use crate::metrics::MetricsCalState;
use crate::registry::RolePermissionRegistry;
use crate::resolver::{fold_grants, merge_direct};
use crate::store::AccessStore;
use app_error::AppError;
use database_entity::dto::{
  EffectivePermission, Identity, ResourceKind, ResourceRef, WarmCacheStats,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;

/// What is known about one folder while widening ancestor chains.
#[derive(Debug, Clone, Copy)]
struct FolderLink {
  parent_id: Option<i64>,
  /// Owner, direct or group result on the folder itself.
  own: Option<EffectivePermission>,
}

/// One requested resource still looking for an ancestor that applies.
struct AncestorWalk {
  resource_id: i64,
  current: i64,
  depth: usize,
  visited: HashSet<i64>,
}

/// Resolves many resources of one kind with a constant number of store round trips
/// per batch, then writes the cacheable results back in a single upsert.
pub struct BulkOptimizer {
  access: Arc<dyn AccessStore>,
  cache: Arc<PermissionCache>,
  registry: Arc<RolePermissionRegistry>,
  metrics_state: MetricsCalState,
  max_batch_size: usize,
  max_depth: usize,
}

impl BulkOptimizer {
  pub fn new(
    access: Arc<dyn AccessStore>,
    cache: Arc<PermissionCache>,
    registry: Arc<RolePermissionRegistry>,
    metrics_state: MetricsCalState,
    max_batch_size: usize,
    max_depth: usize,
  ) -> Self {
    Self {
      access,
      cache,
      registry,
      metrics_state,
      max_batch_size: max_batch_size.max(1),
      max_depth,
    }
  }

  /// Effective permissions for every id that names an existing resource. Unknown
  /// ids are left out of the map.
  #[instrument(level = "debug", skip_all, err)]
  pub async fn resolve_bulk(
    &self,
    identity: &Identity,
    kind: ResourceKind,
    ids: &[i64],
  ) -> Result<HashMap<i64, EffectivePermission>, AppError> {
    let kind = kind.ensure_storage()?;
    let mut unique = ids.to_vec();
    unique.sort_unstable();
    unique.dedup();

    let mut resolved = HashMap::with_capacity(unique.len());
    for chunk in unique.chunks(self.max_batch_size) {
      resolved.extend(self.resolve_chunk(identity, kind, chunk).await?);
    }
    debug!(
      "[permission]: resolved {}/{} {} for user:{}",
      resolved.len(),
      unique.len(),
      kind,
      identity.id
    );
    Ok(resolved)
  }

  async fn resolve_chunk(
    &self,
    identity: &Identity,
    kind: ResourceKind,
    ids: &[i64],
  ) -> Result<HashMap<i64, EffectivePermission>, AppError> {
    let hits = self.cache.get_many(identity.id, kind, ids).await;
    self
      .metrics_state
      .total_check
      .fetch_add(ids.len() as i64, Ordering::Relaxed);
    self
      .metrics_state
      .check_from_cache
      .fetch_add(hits.len() as i64, Ordering::Relaxed);

    let mut output = hits
      .iter()
      .map(|(id, entry)| (*id, entry.to_effective()))
      .collect::<HashMap<_, _>>();
    let misses = ids
      .iter()
      .filter(|id| !hits.contains_key(id))
      .copied()
      .collect::<Vec<_>>();
    if misses.is_empty() {
      return Ok(output);
    }

    let resources = self.access.get_resources(kind, &misses).await?;
    let own = self.resolve_own_batch(identity, kind, &resources).await?;

    let mut resolved: HashMap<i64, EffectivePermission> = HashMap::with_capacity(resources.len());
    let mut walks = vec![];
    let mut links: HashMap<i64, Option<FolderLink>> = HashMap::new();
    for resource in &resources {
      let own_result = own.get(&resource.id).copied().flatten();
      if kind == ResourceKind::Folder {
        links.insert(
          resource.id,
          Some(FolderLink {
            parent_id: resource.parent_id,
            own: own_result,
          }),
        );
      }
      match (own_result, resource.parent_id) {
        (Some(permission), _) => {
          resolved.insert(resource.id, permission);
        },
        (None, Some(parent_id)) => {
          let mut visited = HashSet::from([parent_id]);
          if kind == ResourceKind::Folder && !visited.insert(resource.id) {
            warn!("[permission]: folder {} is its own parent", resource.id);
            continue;
          }
          walks.push(AncestorWalk {
            resource_id: resource.id,
            current: parent_id,
            depth: 1,
            visited,
          });
        },
        (None, None) => {},
      }
    }

    resolved.extend(self.resolve_inherited_batch(identity, walks, links).await);

    let role_default = EffectivePermission::role_default(
      self.registry.capabilities_for(identity.role, kind),
    );
    for resource in &resources {
      resolved.entry(resource.id).or_insert(role_default);
    }

    let cacheable = resolved
      .iter()
      .filter(|(_, permission)| permission.is_cacheable())
      .map(|(id, permission)| (*id, *permission))
      .collect::<Vec<_>>();
    if let Err(err) = self
      .cache
      .set_many(identity.id, kind, &cacheable, None)
      .await
    {
      error!(
        "[permission]: failed to cache {} resolved {} for user:{}: {}",
        cacheable.len(),
        kind,
        identity.id,
        err
      );
    }

    output.extend(resolved);
    Ok(output)
  }

  /// Owner, direct and group results for each resource, in at most two grant queries.
  async fn resolve_own_batch(
    &self,
    identity: &Identity,
    kind: ResourceKind,
    resources: &[ResourceRef],
  ) -> Result<HashMap<i64, Option<EffectivePermission>>, AppError> {
    let not_owned = resources
      .iter()
      .filter(|resource| resource.owner_id != identity.id)
      .map(|resource| resource.id)
      .collect::<Vec<_>>();

    let direct = if not_owned.is_empty() {
      HashMap::new()
    } else {
      fold_grants(
        &self
          .access
          .get_user_grants(kind, identity.id, &not_owned)
          .await?,
      )
    };
    let group = if not_owned.is_empty() || identity.group_ids.is_empty() {
      HashMap::new()
    } else {
      fold_grants(
        &self
          .access
          .get_group_grants(kind, &identity.group_ids, &not_owned)
          .await?,
      )
    };

    Ok(
      resources
        .iter()
        .map(|resource| {
          (
            resource.id,
            merge_direct(
              identity,
              resource,
              direct.get(&resource.id).copied(),
              group.get(&resource.id).copied(),
            ),
          )
        })
        .collect(),
    )
  }

  /// Widens every pending walk one level at a time. Each level costs one folder
  /// lookup plus the grant lookups for folders not seen before, shared by all walks.
  /// Store failures and anomalies end the affected walks without a result.
  async fn resolve_inherited_batch(
    &self,
    identity: &Identity,
    mut walks: Vec<AncestorWalk>,
    mut links: HashMap<i64, Option<FolderLink>>,
  ) -> HashMap<i64, EffectivePermission> {
    let mut inherited = HashMap::new();
    while !walks.is_empty() {
      let unknown = walks
        .iter()
        .map(|walk| walk.current)
        .filter(|id| !links.contains_key(id))
        .collect::<HashSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();
      if !unknown.is_empty() {
        match self.load_folder_links(identity, &unknown).await {
          Ok(loaded) => links.extend(loaded),
          Err(err) => {
            warn!("[permission]: ancestor lookup failed: {}", err);
            return inherited;
          },
        }
      }

      let mut next_level = Vec::with_capacity(walks.len());
      for mut walk in walks {
        let link = match links.get(&walk.current).copied().flatten() {
          Some(link) => link,
          None => {
            warn!(
              "[permission]: missing ancestor folder {} of resource {}",
              walk.current, walk.resource_id
            );
            continue;
          },
        };
        if let Some(permission) = link.own {
          inherited.insert(walk.resource_id, permission.inherited_from(walk.current));
          continue;
        }
        let Some(parent_id) = link.parent_id else {
          continue;
        };
        if walk.depth >= self.max_depth {
          warn!(
            "[permission]: ancestor chain of resource {} exceeds depth {}",
            walk.resource_id, self.max_depth
          );
          continue;
        }
        if !walk.visited.insert(parent_id) {
          warn!(
            "[permission]: folder cycle at {} while resolving resource {}",
            parent_id, walk.resource_id
          );
          continue;
        }
        walk.current = parent_id;
        walk.depth += 1;
        next_level.push(walk);
      }
      walks = next_level;
    }
    inherited
  }

  async fn load_folder_links(
    &self,
    identity: &Identity,
    folder_ids: &[i64],
  ) -> Result<HashMap<i64, Option<FolderLink>>, AppError> {
    let folders = self
      .access
      .get_resources(ResourceKind::Folder, folder_ids)
      .await?;
    let own = self
      .resolve_own_batch(identity, ResourceKind::Folder, &folders)
      .await?;

    let mut links = folder_ids
      .iter()
      .map(|id| (*id, None))
      .collect::<HashMap<i64, Option<FolderLink>>>();
    for folder in folders {
      links.insert(
        folder.id,
        Some(FolderLink {
          parent_id: folder.parent_id,
          own: own.get(&folder.id).copied().flatten(),
        }),
      );
    }
    Ok(links)
  }

  /// Resolves and caches the resources `identity` is most likely to open next.
  /// `kind` restricts warming to one kind, `limit` caps the resources per kind.
  #[instrument(level = "debug", skip_all, err)]
  pub async fn warm_cache(
    &self,
    identity: &Identity,
    kind: Option<ResourceKind>,
    limit: usize,
  ) -> Result<WarmCacheStats, AppError> {
    let mut stats = WarmCacheStats::default();
    if !self.cache.is_enabled() || limit == 0 {
      return Ok(stats);
    }
    let kinds = match kind {
      Some(kind) => vec![kind.ensure_storage()?],
      None => vec![ResourceKind::File, ResourceKind::Folder],
    };
    for kind in kinds {
      let candidates = self
        .access
        .get_warm_candidates(kind, identity, limit)
        .await?;
      let ids = candidates.iter().map(|r| r.id).collect::<Vec<_>>();
      let resolved = self.resolve_bulk(identity, kind, &ids).await?;
      match kind {
        ResourceKind::File => stats.files_warmed = resolved.len(),
        _ => stats.folders_warmed = resolved.len(),
      }
    }
    debug!(
      "[permission]: warmed {} files, {} folders for user:{}",
      stats.files_warmed, stats.folders_warmed, identity.id
    );
    Ok(stats)
  }

  /// Effective permissions of the folder `root_id` and its descendants, at most
  /// `depth` levels down, paginated breadth first.
  #[instrument(level = "debug", skip_all, err)]
  pub async fn resolve_subtree(
    &self,
    identity: &Identity,
    root_id: i64,
    depth: u32,
    limit: usize,
    offset: usize,
  ) -> Result<HashMap<i64, EffectivePermission>, AppError> {
    let root = self
      .access
      .get_resources(ResourceKind::Folder, &[root_id])
      .await?;
    if root.is_empty() {
      return Err(AppError::RecordNotFound(format!("folder:{}", root_id)));
    }
    let depth = depth.min(self.max_depth as u32);
    let folders = self
      .access
      .get_folder_subtree(root_id, depth, limit, offset)
      .await?;
    let ids = folders.iter().map(|folder| folder.id).collect::<Vec<_>>();
    self.resolve_bulk(identity, ResourceKind::Folder, &ids).await
  }
}
