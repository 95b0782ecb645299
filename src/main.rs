use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;
use taskboard::broadcast::Broadcast;
use taskboard::config::Config;
use taskboard::database::{PgTaskTable, setup_database};
use taskboard::logs::LogFetcher;
use taskboard::routes::routes;
use taskboard::service::{TaskService, spawn_reclamation};
use taskboard::table::{MemoryTaskTable, TaskTable};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();
  let config = Config::from_env()?;

  let table: Arc<dyn TaskTable> = match &config.database_url {
    Some(url) => Arc::new(PgTaskTable::new(setup_database(url).await?)),
    None => {
      info!("DATABASE_URL not set, keeping tasks in memory");
      Arc::new(MemoryTaskTable::new())
    }
  };

  let service = Arc::new(TaskService::new(table, Broadcast::new()));
  let reclamation = spawn_reclamation(service.clone(), config.gc_interval, config.retention);
  let logs = LogFetcher::new(config.log_accept_invalid_certs, config.log_timeout)?;

  let api = routes(service, logs, config.static_dir.clone());
  let (address, server) = warp::serve(api).try_bind_with_graceful_shutdown(([0, 0, 0, 0], config.server_port), async {
    let _ = tokio::signal::ctrl_c().await;
  })?;
  info!("Listening on {}", address);
  server.await;

  reclamation.abort();
  info!("Shut down");
  Ok(())
}
