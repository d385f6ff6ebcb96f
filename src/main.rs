// =============================================================================
// riptide — Main Entry Point
// =============================================================================
//
// The engine starts Killed: the operator must explicitly POST
// /api/v1/control/start before any liquidation event can open a position.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod cascade;
mod config;
mod db;
mod decision_log;
mod error;
mod exchange;
mod execution;
mod ingress;
mod keyed_lock;
mod position;
mod reconcile;
mod scheduler;
mod strategy;
mod types;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::{EngineConfig, VenueConfig};
use crate::exchange::stream::{run_liquidation_stream_forever, LiquidationEvent};
use crate::ingress::LiquidationIngress;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("riptide starting up");

    let venue = VenueConfig::from_env()?;
    let engine_config = EngineConfig::from_env();

    info!(bind_addr = %engine_config.bind_addr, base_url = %venue.base_url, "engine starting in SAFE mode (killed)");

    // ── Database ──────────────────────────────────────────────────────
    let pool = db::pool::connect(&venue.database_url).await?;

    // ── Shared state ──────────────────────────────────────────────────
    let state = Arc::new(AppState::new(pool.clone(), venue.clone(), engine_config.clone()));

    // ── Liquidation stream ingestion ──────────────────────────────────
    let (stream_tx, stream_rx) = mpsc::channel::<LiquidationEvent>(256);
    let (decision_tx, mut decision_rx) = mpsc::channel::<db::models::LiquidationRow>(256);

    let ingress = Arc::new(LiquidationIngress::new(pool.clone(), decision_tx));
    tokio::spawn(ingress.run(stream_rx));

    let ws_base_url = venue.ws_base_url.clone();
    tokio::spawn(run_liquidation_stream_forever(ws_base_url, stream_tx));

    // ── Decision loop: one liquidation event at a time, fed by ingress ──
    let decision_state = state.clone();
    tokio::spawn(async move {
        while let Some(liquidation) = decision_rx.recv().await {
            if decision_state.mode().await != crate::types::EngineMode::Running {
                continue;
            }
            let Ok(Some(strategy)) = db::strategy::get_active(&decision_state.pool).await else {
                continue;
            };
            if strategy.params.paused {
                continue;
            }
            let Ok(Some(session)) = db::sessions::get_active(&decision_state.pool, strategy.id).await else {
                warn!("liquidation received with no active trade session, dropping");
                continue;
            };
            let now_ms = crate::exchange::ExchangeClient::timestamp_ms() as i64;
            match decision_state
                .strategy_engine
                .on_liquidation(&liquidation, &strategy.params, &session, now_ms)
                .await
            {
                Ok(log) => info!(symbol = %liquidation.symbol, decision = %log.final_decision, "liquidation processed"),
                Err(err) => warn!(symbol = %liquidation.symbol, %err, "liquidation processing failed"),
            }
        }
    });

    // ── Background scheduler (cascade, exit monitor, reconcile, sweeps) ─
    state.scheduler.clone().spawn();

    // ── One-shot historical rebuild at boot ─────────────────────────────
    {
        let resume_from = db::income::get_last_rebuilt_start_ts(&pool).await.ok().flatten();
        match state.scheduler.rebuild_history(resume_from).await {
            Ok(applied) if applied > 0 => info!(applied, "historical P&L rebuild applied income events at boot"),
            Ok(_) => {}
            Err(err) => warn!(%err, "historical P&L rebuild failed at boot"),
        }
    }

    // ── API server ────────────────────────────────────────────────────
    let bind_addr = engine_config.bind_addr.clone();
    let api_state = state.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    info!("all subsystems running, awaiting operator start command");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    info!("riptide shut down complete");
    Ok(())
}
