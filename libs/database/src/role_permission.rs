use app_error::AppError;
use database_entity::pg_row::RolePermissionRow;
use sqlx::{Executor, Postgres};
use tracing::instrument;

#[instrument(level = "trace", skip_all, err)]
pub async fn select_role_permissions<'a, E: Executor<'a, Database = Postgres>>(
  executor: E,
) -> Result<Vec<RolePermissionRow>, AppError> {
  let rows = sqlx::query_as::<_, RolePermissionRow>(
    r#"
      SELECT rp.role, p.resource_type, p.action
      FROM role_permissions rp
      JOIN permissions p ON p.id = rp.permission_id
    "#,
  )
  .fetch_all(executor)
  .await?;
  Ok(rows)
}
