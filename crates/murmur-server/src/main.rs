mod config;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use murmur_api::auth::AppStateInner;
use murmur_api::routes;
use murmur_db::Database;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Init database
    let db = Database::open(&config.db_path)
        .with_context(|| format!("opening database at {}", config.db_path.display()))?;

    let key_ttl = chrono::Duration::try_days(config.key_ttl_days)
        .context("MURMUR_KEY_TTL_DAYS is out of range")?;
    let state = AppStateInner::new(Arc::new(db), Some(key_ttl));
    let app = routes::app(state);

    let addr = config.addr()?;
    info!("Murmur server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
