//! Serve mode: cache store, refresh loop, and the HTTP API in one process.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use appdash_api::{ApiState, build_router};
use appdash_refresh::{HttpControlPlane, HttpRoster, RefreshController, RefreshScheduler};
use appdash_state::StateStore;

use crate::config::DashboardConfig;

pub async fn run_serve(config: DashboardConfig) -> anyhow::Result<()> {
    config.validate()?;
    info!("appdash daemon starting");

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.db_path();

    // ── Subsystems ───────────────────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "cache store opened");

    let control_plane = Arc::new(HttpControlPlane::with_timeout(
        config.upstream.control_plane.clone(),
        config.upstream_timeout(),
    ));
    let roster = Arc::new(HttpRoster::with_timeout(
        config.upstream.roster.clone(),
        config.upstream_timeout(),
    ));
    info!(
        control_plane = %config.upstream.control_plane,
        roster = %config.upstream.roster,
        "upstream clients configured"
    );

    let controller = Arc::new(RefreshController::new(store.clone(), control_plane, roster));
    let scheduler =
        RefreshScheduler::new(Arc::clone(&controller)).with_mutation_delay(config.mutation_delay());

    // ── Background tasks ─────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Cold start: fill an empty cache without holding up the listener.
    let warm_controller = Arc::clone(&controller);
    tokio::spawn(async move {
        match warm_controller.ensure_warm().await {
            Ok(true) => info!("cold start refresh done"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "cold start check failed"),
        }
    });

    let loop_scheduler = scheduler.clone();
    let interval = config.refresh_interval();
    let refresh_handle = tokio::spawn(async move {
        loop_scheduler.run(interval, shutdown_rx).await;
    });

    // ── API server ───────────────────────────────────────────────

    let state = ApiState::new(store, scheduler)
        .with_ingest_token(config.logs.ingest_token.clone())
        .with_page_size(config.logs.page_size);
    let router = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c; shutting down");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = refresh_handle.await;

    info!("appdash daemon stopped");
    Ok(())
}
