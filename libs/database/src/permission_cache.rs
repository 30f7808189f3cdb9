use app_error::AppError;
use chrono::{DateTime, Utc};
use database_entity::dto::{PermissionCacheEntry, ResourceKind};
use database_entity::pg_row::{CacheStatsRow, PermissionCacheRow};
use sqlx::{Executor, Postgres, QueryBuilder};
use tracing::instrument;

/// Live entries of one user for the given resources of a single kind.
#[instrument(level = "trace", skip_all, err)]
pub async fn select_live_entries<'a, E: Executor<'a, Database = Postgres>>(
  executor: E,
  user_id: i64,
  kind: ResourceKind,
  resource_ids: &[i64],
  now: DateTime<Utc>,
) -> Result<Vec<PermissionCacheRow>, AppError> {
  if resource_ids.is_empty() {
    return Ok(vec![]);
  }
  let rows = sqlx::query_as::<_, PermissionCacheRow>(
    r#"
      SELECT user_id, resource_type, resource_id,
             can_read, can_write, can_delete, can_share,
             is_owner, permission_source, source_resource_id,
             cached_at, expires_at
      FROM permission_cache
      WHERE user_id = $1
        AND resource_type = $2
        AND resource_id = ANY($3)
        AND expires_at > $4
    "#,
  )
  .bind(user_id)
  .bind(kind.as_str())
  .bind(resource_ids)
  .bind(now)
  .fetch_all(executor)
  .await?;
  Ok(rows)
}

/// Inserts or refreshes entries in one statement. The unique key
/// `(user_id, resource_type, resource_id)` makes concurrent writers of the same
/// key overwrite each other.
#[instrument(level = "trace", skip_all, err)]
pub async fn upsert_entries<'a, E: Executor<'a, Database = Postgres>>(
  executor: E,
  entries: &[PermissionCacheEntry],
) -> Result<u64, AppError> {
  if entries.is_empty() {
    return Ok(0);
  }

  let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
    "INSERT INTO permission_cache (user_id, resource_type, resource_id, \
     can_read, can_write, can_delete, can_share, is_owner, permission_source, \
     source_resource_id, cached_at, expires_at) ",
  );
  builder.push_values(entries, |mut b, entry| {
    b.push_bind(entry.user_id)
      .push_bind(entry.resource_kind.as_str())
      .push_bind(entry.resource_id)
      .push_bind(entry.capabilities.can_read)
      .push_bind(entry.capabilities.can_write)
      .push_bind(entry.capabilities.can_delete)
      .push_bind(entry.capabilities.can_share)
      .push_bind(entry.is_owner)
      .push_bind(entry.source.as_str())
      .push_bind(entry.source_resource_id)
      .push_bind(entry.cached_at)
      .push_bind(entry.expires_at);
  });
  builder.push(
    " ON CONFLICT (user_id, resource_type, resource_id) DO UPDATE SET \
     can_read = EXCLUDED.can_read, \
     can_write = EXCLUDED.can_write, \
     can_delete = EXCLUDED.can_delete, \
     can_share = EXCLUDED.can_share, \
     is_owner = EXCLUDED.is_owner, \
     permission_source = EXCLUDED.permission_source, \
     source_resource_id = EXCLUDED.source_resource_id, \
     cached_at = EXCLUDED.cached_at, \
     expires_at = EXCLUDED.expires_at",
  );
  let result = builder.build().execute(executor).await?;
  Ok(result.rows_affected())
}

#[instrument(level = "trace", skip_all, err)]
pub async fn delete_entries_for_user<'a, E: Executor<'a, Database = Postgres>>(
  executor: E,
  user_id: i64,
) -> Result<u64, AppError> {
  let result = sqlx::query("DELETE FROM permission_cache WHERE user_id = $1")
    .bind(user_id)
    .execute(executor)
    .await?;
  Ok(result.rows_affected())
}

/// Folders under the folder bound as `$1`, the folder included. The path array keeps
/// corrupted parent links from looping the query.
const FOLDER_SUBTREE_CTE: &str = r#"
  WITH RECURSIVE subtree AS (
    SELECT f.id, ARRAY[f.id] AS path
    FROM folders f
    WHERE f.id = $1

    UNION ALL

    SELECT f.id, st.path || f.id
    FROM folders f
    INNER JOIN subtree st ON f.parent_id = st.id
    WHERE NOT f.id = ANY(st.path)
  )
"#;

/// Entries on the folder, on every folder and file below it, and every entry
/// inherited from it. `$1` is the folder id.
const FOLDER_SCOPE: &str = r#"
  (
    (resource_type = 'folder' AND resource_id IN (SELECT id FROM subtree))
    OR (resource_type = 'file' AND resource_id IN (
      SELECT fi.id FROM files fi WHERE fi.folder_id IN (SELECT id FROM subtree)
    ))
    OR (resource_type = 'folder' AND resource_id = $1)
    OR source_resource_id = $1
  )
"#;

/// Deletes every entry for the resource. For a folder, every entry on its subtree
/// and every entry inherited from it are deleted as well.
#[instrument(level = "trace", skip_all, err)]
pub async fn delete_entries_for_resource<'a, E: Executor<'a, Database = Postgres>>(
  executor: E,
  kind: ResourceKind,
  resource_id: i64,
) -> Result<u64, AppError> {
  let result = match kind {
    ResourceKind::Folder => {
      let sql = format!(
        "{cte} DELETE FROM permission_cache WHERE {scope}",
        cte = FOLDER_SUBTREE_CTE,
        scope = FOLDER_SCOPE,
      );
      sqlx::query(&sql).bind(resource_id).execute(executor).await?
    },
    _ => {
      sqlx::query(
        "DELETE FROM permission_cache WHERE resource_type = $1 AND resource_id = $2",
      )
      .bind(kind.as_str())
      .bind(resource_id)
      .execute(executor)
      .await?
    },
  };
  Ok(result.rows_affected())
}

/// Same as [delete_entries_for_resource] restricted to `user_ids`.
#[instrument(level = "trace", skip_all, err)]
pub async fn delete_entries_for_users_on_resource<'a, E: Executor<'a, Database = Postgres>>(
  executor: E,
  user_ids: &[i64],
  kind: ResourceKind,
  resource_id: i64,
) -> Result<u64, AppError> {
  if user_ids.is_empty() {
    return Ok(0);
  }
  let result = match kind {
    ResourceKind::Folder => {
      let sql = format!(
        "{cte} DELETE FROM permission_cache WHERE user_id = ANY($2) AND {scope}",
        cte = FOLDER_SUBTREE_CTE,
        scope = FOLDER_SCOPE,
      );
      sqlx::query(&sql)
        .bind(resource_id)
        .bind(user_ids)
        .execute(executor)
        .await?
    },
    _ => {
      sqlx::query(
        r#"
          DELETE FROM permission_cache
          WHERE user_id = ANY($1) AND resource_type = $2 AND resource_id = $3
        "#,
      )
      .bind(user_ids)
      .bind(kind.as_str())
      .bind(resource_id)
      .execute(executor)
      .await?
    },
  };
  Ok(result.rows_affected())
}

#[instrument(level = "trace", skip_all, err)]
pub async fn delete_expired_entries<'a, E: Executor<'a, Database = Postgres>>(
  executor: E,
  now: DateTime<Utc>,
) -> Result<u64, AppError> {
  let result = sqlx::query("DELETE FROM permission_cache WHERE expires_at <= $1")
    .bind(now)
    .execute(executor)
    .await?;
  Ok(result.rows_affected())
}

#[instrument(level = "trace", skip_all, err)]
pub async fn select_cache_stats<'a, E: Executor<'a, Database = Postgres>>(
  executor: E,
  now: DateTime<Utc>,
) -> Result<CacheStatsRow, AppError> {
  let row = sqlx::query_as::<_, CacheStatsRow>(
    r#"
      SELECT
        COUNT(*) AS total_entries,
        COUNT(*) FILTER (WHERE expires_at > $1) AS active_entries,
        COUNT(*) FILTER (WHERE expires_at <= $1) AS expired_entries
      FROM permission_cache
    "#,
  )
  .bind(now)
  .fetch_one(executor)
  .await?;
  Ok(row)
}
