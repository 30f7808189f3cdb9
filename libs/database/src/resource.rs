use app_error::AppError;
use database_entity::dto::ResourceKind;
use database_entity::pg_row::ResourceRow;
use sqlx::{Executor, Postgres};
use tracing::instrument;

/// Table name, parent column, grant table and grant foreign key for a storage kind.
pub(crate) struct ResourceTable {
  pub table: &'static str,
  pub parent_column: &'static str,
  pub grant_table: &'static str,
  pub grant_column: &'static str,
}

pub(crate) fn resource_table(kind: ResourceKind) -> Result<ResourceTable, AppError> {
  match kind.ensure_storage()? {
    ResourceKind::File => Ok(ResourceTable {
      table: "files",
      parent_column: "folder_id",
      grant_table: "file_permissions",
      grant_column: "file_id",
    }),
    _ => Ok(ResourceTable {
      table: "folders",
      parent_column: "parent_id",
      grant_table: "folder_permissions",
      grant_column: "folder_id",
    }),
  }
}

#[instrument(level = "trace", skip_all, err)]
pub async fn select_resources<'a, E: Executor<'a, Database = Postgres>>(
  executor: E,
  kind: ResourceKind,
  ids: &[i64],
) -> Result<Vec<ResourceRow>, AppError> {
  if ids.is_empty() {
    return Ok(vec![]);
  }
  let t = resource_table(kind)?;
  let sql = format!(
    "SELECT id, owner_id, {parent} AS parent_id FROM {table} WHERE id = ANY($1)",
    parent = t.parent_column,
    table = t.table,
  );
  let rows = sqlx::query_as::<_, ResourceRow>(&sql)
    .bind(ids)
    .fetch_all(executor)
    .await?;
  Ok(rows)
}

/// Resources a user is likely to touch soon: owned or granted to the user or one of
/// their groups. Top-level folders are included as well. Ordered by id and bounded
/// by `limit`.
#[instrument(level = "trace", skip_all, err)]
pub async fn select_warm_candidates<'a, E: Executor<'a, Database = Postgres>>(
  executor: E,
  kind: ResourceKind,
  user_id: i64,
  group_ids: &[i64],
  limit: i64,
) -> Result<Vec<ResourceRow>, AppError> {
  let t = resource_table(kind)?;
  let top_level = if kind == ResourceKind::Folder {
    "OR r.parent_id IS NULL"
  } else {
    ""
  };
  let sql = format!(
    r#"
      SELECT r.id, r.owner_id, r.{parent} AS parent_id
      FROM {table} r
      WHERE r.owner_id = $1
        {top_level}
        OR EXISTS (
          SELECT 1 FROM {grant_table} p
          WHERE p.{grant_column} = r.id
            AND (p.user_id = $1 OR p.group_id = ANY($2))
        )
      ORDER BY r.id
      LIMIT $3
    "#,
    parent = t.parent_column,
    table = t.table,
    grant_table = t.grant_table,
    grant_column = t.grant_column,
    top_level = top_level,
  );
  let rows = sqlx::query_as::<_, ResourceRow>(&sql)
    .bind(user_id)
    .bind(group_ids)
    .bind(limit)
    .fetch_all(executor)
    .await?;
  Ok(rows)
}

/// Folders under `root_id` (inclusive) up to `max_depth` levels deep, breadth first.
/// A folder already on the current path is never revisited, so corrupted parent
/// links cannot loop the query.
#[instrument(level = "trace", skip_all, err)]
pub async fn select_folder_subtree<'a, E: Executor<'a, Database = Postgres>>(
  executor: E,
  root_id: i64,
  max_depth: i32,
  limit: i64,
  offset: i64,
) -> Result<Vec<ResourceRow>, AppError> {
  let rows = sqlx::query_as::<_, ResourceRow>(
    r#"
      WITH RECURSIVE folder_tree AS (
        SELECT f.id, f.owner_id, f.parent_id, 0 AS depth, ARRAY[f.id] AS path
        FROM folders f
        WHERE f.id = $1

        UNION ALL

        SELECT f.id, f.owner_id, f.parent_id, ft.depth + 1, ft.path || f.id
        FROM folders f
        INNER JOIN folder_tree ft ON f.parent_id = ft.id
        WHERE ft.depth < $2 AND NOT f.id = ANY(ft.path)
      )
      SELECT id, owner_id, parent_id
      FROM folder_tree
      ORDER BY depth, id
      LIMIT $3 OFFSET $4
    "#,
  )
  .bind(root_id)
  .bind(max_depth)
  .bind(limit)
  .bind(offset)
  .fetch_all(executor)
  .await?;
  Ok(rows)
}
