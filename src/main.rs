use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use carpark_forecast::artifact::{ArtifactStore, FsArtifactStore};
use carpark_forecast::config::ServiceConfig;
use carpark_forecast::gateway::{self, AppState};
use carpark_forecast::repository::{create_pool, run_migrations, PgRepository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carpark_forecast=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env().context("invalid configuration")?;

    let pool = create_pool(&config.database_url)
        .await
        .context("failed to connect to the database")?;
    run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;
    tracing::info!("database ready");

    let store = FsArtifactStore::new(&config.artifact_dir);
    // Models load lazily; this only reports what is deployed.
    match store.list_lot_ids().await {
        Ok(ids) => tracing::info!(
            artifact_dir = %store.root().display(),
            deployed = ids.len(),
            "artifact store ready"
        ),
        Err(e) => tracing::warn!(
            artifact_dir = %store.root().display(),
            error = %e,
            "artifact store not readable yet"
        ),
    }

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;
    if config.log_inputs {
        tracing::info!("LOG_PRED=1, logging forecast input windows");
    }

    let state = AppState::new(config, Arc::new(store), Arc::new(PgRepository::new(pool)));
    let app = gateway::router(state);

    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
