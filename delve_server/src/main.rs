use delve_core::{
    FileResearchStore, MemoryResearchStore, PersistenceAdapter, ResearchConfig,
    ResearchOrchestrator,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod routes;

use routes::{router, AppState};

const DEFAULT_BIND: &str = "127.0.0.1:8787";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "delve=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ResearchConfig::load()?;

    // Trails survive restarts only when a data directory is configured.
    let store: Arc<dyn PersistenceAdapter> = match config.data_dir {
        Some(_) => {
            let dir = config.research_dir();
            info!(target: "delve.server", dir = %dir.display(), "using file research store");
            Arc::new(FileResearchStore::new(dir))
        }
        None => Arc::new(MemoryResearchStore::new()),
    };
    if config.serper_api_key.is_none() {
        warn!(target: "delve.server", "SERPER_API_KEY not set, searches go to DuckDuckGo only");
    }

    let orchestrator = Arc::new(ResearchOrchestrator::from_config(&config, store)?);
    let app = router(Arc::new(AppState {
        orchestrator,
        config,
    }));

    let bind = std::env::var("DELVE_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(target: "delve.server", addr = %bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!(target: "delve.server", "shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(target: "delve.server", error = %err, "ctrl-c handler failed");
    }
}
