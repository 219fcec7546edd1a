//! Demo server: opens the control database, starts the connection reaper and serves the
//! common routes with per-request agency resolution.
//!
//! Run from repo root: `cargo run -p demo-server`

use agency_router::{common_routes, AppState, Settings};
use tokio::net::TcpListener;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("agency_router=info,demo_server=info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let state = AppState::connect(&settings).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = state.reaper(&settings).spawn(shutdown_rx);

    let app = common_routes(state.clone());
    let listener = TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!("agency router listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let _ = shutdown_tx.send(true);
    reaper.await?;
    state.router.registry().shutdown().await;
    Ok(())
}
