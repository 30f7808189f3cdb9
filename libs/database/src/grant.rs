use crate::resource::resource_table;
use app_error::AppError;
use database_entity::dto::ResourceKind;
use database_entity::pg_row::GrantRow;
use sqlx::{Executor, Postgres};
use tracing::instrument;

/// Grants held directly by `user_id` on any of `resource_ids`.
#[instrument(level = "trace", skip_all, err)]
pub async fn select_user_grants<'a, E: Executor<'a, Database = Postgres>>(
  executor: E,
  kind: ResourceKind,
  user_id: i64,
  resource_ids: &[i64],
) -> Result<Vec<GrantRow>, AppError> {
  if resource_ids.is_empty() {
    return Ok(vec![]);
  }
  let t = resource_table(kind)?;
  let sql = format!(
    r#"
      SELECT {column} AS resource_id, user_id, group_id,
             can_read, can_write, can_delete, can_share
      FROM {grant_table}
      WHERE user_id = $1 AND {column} = ANY($2)
    "#,
    column = t.grant_column,
    grant_table = t.grant_table,
  );
  let rows = sqlx::query_as::<_, GrantRow>(&sql)
    .bind(user_id)
    .bind(resource_ids)
    .fetch_all(executor)
    .await?;
  Ok(rows)
}

/// Grants held by any of `group_ids` on any of `resource_ids`. The caller merges
/// rows that land on the same resource.
#[instrument(level = "trace", skip_all, err)]
pub async fn select_group_grants<'a, E: Executor<'a, Database = Postgres>>(
  executor: E,
  kind: ResourceKind,
  group_ids: &[i64],
  resource_ids: &[i64],
) -> Result<Vec<GrantRow>, AppError> {
  if group_ids.is_empty() || resource_ids.is_empty() {
    return Ok(vec![]);
  }
  let t = resource_table(kind)?;
  let sql = format!(
    r#"
      SELECT {column} AS resource_id, user_id, group_id,
             can_read, can_write, can_delete, can_share
      FROM {grant_table}
      WHERE group_id = ANY($1) AND {column} = ANY($2)
    "#,
    column = t.grant_column,
    grant_table = t.grant_table,
  );
  let rows = sqlx::query_as::<_, GrantRow>(&sql)
    .bind(group_ids)
    .bind(resource_ids)
    .fetch_all(executor)
    .await?;
  Ok(rows)
}
