//! RACS: a proxy exposing a subset of the S3 HTTP API while striping
//! objects across N heterogeneous backend repositories via erasure
//! coding (§1, §2).

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use racs_server::cli::{self, Args};
use racs_server::state::AppState;
use racs_server::{metrics, router};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| args.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = cli::load_config(&args)?;
    info!(k = config.racs.k, m = config.m(), repositories = config.repositories.len(), "loaded configuration");

    let metrics_handle = metrics::install_recorder();
    let state = Arc::new(AppState::build(&config, metrics_handle)?);

    let app = router::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.racs.host, config.racs.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "racs-server listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutting down");
        })
        .await?;

    Ok(())
}
