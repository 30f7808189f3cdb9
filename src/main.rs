use nas_server::application::{init_state, Application};
use nas_server::config::config::get_configuration;
use nas_server::telemetry::init_subscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Load .env before reading any NAS_* variable.
  dotenvy::dotenv().ok();

  let level = std::env::var("RUST_LOG").unwrap_or("info".to_string());
  println!("NAS server with RUST_LOG={}", level);
  let filters = vec![
    format!("nas_server={}", level),
    format!("access_control={}", level),
    format!("database={}", level),
    format!("sqlx={}", level),
  ];
  let conf =
    get_configuration().map_err(|e| anyhow::anyhow!("Failed to read configuration: {}", e))?;
  init_subscriber(&conf.app_env, filters)?;

  let state = init_state(&conf)
    .await
    .map_err(|e| anyhow::anyhow!("Failed to initialize application state: {}", e))?;
  let application = Application::build(conf, state).await?;
  application.run_until_stopped().await?;

  Ok(())
}
