use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use docvault::{create_router, AppState, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docvault=info,server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();
    let bind = config.bind.clone();

    let state = Arc::new(AppState::open(config).context("Failed to initialize storage")?);
    tracing::info!(
        data_dir = %state.config.data_dir.display(),
        upload_dir = %state.config.upload_dir.display(),
        max_upload_bytes = state.config.max_upload_bytes,
        "storage ready"
    );

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {bind}"))?;

    tracing::info!("document service listening on http://{bind}");
    tracing::info!("   POST   /auth/register, /auth/login");
    tracing::info!("   GET    /documents, /documents/:id, /documents/download/:id");
    tracing::info!("   POST   /documents   PUT/DELETE /documents/:id");
    tracing::info!("   GET    /analytics/dashboard, /analytics/expiring, /analytics/stats");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
