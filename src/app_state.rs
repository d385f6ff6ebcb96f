// Central application state shared across the API router and the background
// scheduler. Far smaller than the teacher's dashboard-oriented `AppState`
// (no candle buffers, no WebSocket sequence counters, no regime/indicator
// caches) since this engine has no push-feed UI — state lives in the
// database, and the API reads it fresh per request rather than off a cached
// snapshot.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::cascade::CascadeDetector;
use crate::config::{EngineConfig, VenueConfig};
use crate::db::DbPool;
use crate::error::EngineError;
use crate::exchange::ExchangeClient;
use crate::scheduler::Scheduler;
use crate::strategy::StrategyEngine;
use crate::types::EngineMode;

/// Central application state, held behind an `Arc` by every Axum handler and
/// the background scheduler.
pub struct AppState {
    pub pool: DbPool,
    pub exchange: Arc<ExchangeClient>,
    pub cascade: Arc<CascadeDetector>,
    pub strategy_engine: Arc<StrategyEngine>,
    pub scheduler: Arc<Scheduler>,
    pub config: EngineConfig,
    pub venue: VenueConfig,

    /// Process-level safety switch (distinct from a `Strategy.paused` flag).
    /// Starts `Killed` — the engine must be explicitly armed, mirroring the
    /// teacher's "start in the safest mode" convention (`RuntimeConfig`
    /// forcing `Demo`+`Paused` on first boot).
    mode: RwLock<EngineMode>,
}

impl AppState {
    pub fn new(pool: DbPool, venue: VenueConfig, config: EngineConfig) -> Self {
        let exchange = Arc::new(ExchangeClient::new(
            venue.api_key.clone(),
            venue.api_secret.clone(),
            venue.base_url.clone(),
            config.recv_window_ms,
            config.rate_limit_buffer_pct,
        ));
        let cascade = Arc::new(CascadeDetector::new(exchange.clone()));
        let strategy_engine = Arc::new(StrategyEngine::new(pool.clone(), exchange.clone(), cascade.clone()));
        let scheduler = Arc::new(Scheduler::new(pool.clone(), exchange.clone(), cascade.clone(), config.clone()));

        Self {
            pool,
            exchange,
            cascade,
            strategy_engine,
            scheduler,
            config,
            venue,
            mode: RwLock::new(EngineMode::default()),
        }
    }

    pub async fn mode(&self) -> EngineMode {
        *self.mode.read().await
    }

    pub async fn arm(&self) {
        *self.mode.write().await = EngineMode::Running;
        info!("engine armed — trading enabled");
    }

    /// Emergency stop (§6): cancels every non-protective pending order for
    /// the active session and flips the process-level switch to `Killed`.
    /// Protective TP/SL orders are left resting, same rule the scheduler's
    /// cancellation policy follows (§5 "Session stop... protective orders
    /// are left in place").
    pub async fn emergency_stop(&self) -> Result<usize, EngineError> {
        *self.mode.write().await = EngineMode::Killed;
        warn!("emergency stop triggered via API");

        let Some(strategy) = crate::db::strategy::get_active(&self.pool).await? else {
            return Ok(0);
        };
        let Some(session) = crate::db::sessions::get_active(&self.pool, strategy.id).await? else {
            return Ok(0);
        };
        let cancelled = crate::db::orders::cancel_non_protective_pending(&self.pool, session.id).await?;
        for order in &cancelled {
            if let Err(err) = self.exchange.cancel_order(&order.symbol, &order.venue_order_id).await {
                warn!(venue_order_id = %order.venue_order_id, %err, "failed to cancel order on venue during emergency stop");
            }
        }
        Ok(cancelled.len())
    }

    pub fn emergency_pin_matches(&self, pin: &str) -> bool {
        crate::api::auth::constant_time_eq(pin.as_bytes(), self.venue.emergency_stop_pin.as_bytes())
    }
}
