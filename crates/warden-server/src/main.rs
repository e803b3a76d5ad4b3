mod config;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use warden_api::AppStateInner;
use warden_api::auth::CredentialVerifier;
use warden_db::Database;
use warden_gateway::{Dispatcher, Server};
use warden_store::Repository;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warden=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = if config.db_path == ":memory:" {
        Database::open_in_memory()?
    } else {
        Database::open(&PathBuf::from(&config.db_path))?
    };
    info!("database ready at {}", config.db_path);

    let repo = Arc::new(Repository::new(db, config.repository()));
    let sweeper = repo.spawn_sweeper(config.sweep_interval);
    let verifier = CredentialVerifier::new(repo.clone(), config.verifier());
    let dispatcher = Dispatcher::new(AppStateInner::new(repo, verifier));

    let server = Server::bind(config.bind_addr(), dispatcher).await?;
    info!("Warden back-end listening on {}", server.local_addr()?);

    server
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    sweeper.abort();
    info!("Warden back-end stopped");
    Ok(())
}
