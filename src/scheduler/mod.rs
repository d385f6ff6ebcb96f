// Background tick coordinator (§4.6): cascade detection, exit-monitor P&L
// recompute, protective-order reconciliation, orphan-position sweep, and
// liquidation retention, each its own `tokio::spawn` + `tokio::time::interval`
// loop. Grounded on `main.rs` steps 7-10's ad-hoc per-job spawn+interval
// loops, consolidated into one owned `Scheduler` struct per Design Notes §9
// "Singleton engines" (explicit construction instead of module statics).
//
// Every loop uses `MissedTickBehavior::Skip` and does its work inline between
// `interval.tick().await` calls, so a slow pass is never run concurrently
// with itself — the loop body IS the tick-in-progress guard, the same
// property the teacher's sequential per-job loops rely on.

pub mod exit_monitor;

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::cascade::CascadeDetector;
use crate::config::EngineConfig;
use crate::db::{self, DbPool};
use crate::exchange::ExchangeClient;
use crate::position::protective_orders;
use crate::reconcile::{exit_fills, history, orphan};
use crate::strategy::sizing;

pub struct Scheduler {
    pool: DbPool,
    exchange: Arc<ExchangeClient>,
    cascade: Arc<CascadeDetector>,
    config: EngineConfig,
}

impl Scheduler {
    pub fn new(
        pool: DbPool,
        exchange: Arc<ExchangeClient>,
        cascade: Arc<CascadeDetector>,
        config: EngineConfig,
    ) -> Self {
        Self { pool, exchange, cascade, config }
    }

    fn now_ms(&self) -> i64 {
        ExchangeClient::timestamp_ms() as i64
    }

    /// Spawn every tick loop. Each loop independently re-reads the active
    /// strategy/session on every tick, so a pause, parameter edit, or session
    /// rollover takes effect on the very next tick without a restart.
    pub fn spawn(self: Arc<Self>) {
        self.clone().spawn_cascade_tick();
        self.clone().spawn_exit_monitor_tick();
        self.clone().spawn_protective_order_tick();
        self.clone().spawn_orphan_sweep_tick();
        self.spawn_retention_sweep_tick();
    }

    fn spawn_cascade_tick(self: Arc<Self>) {
        let period = self.config.cascade_tick();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let strategy = match db::strategy::get_active(&self.pool).await {
                    Ok(Some(row)) => row.params,
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(%err, "cascade tick: failed to load active strategy");
                        continue;
                    }
                };
                self.cascade.tick(&strategy, self.now_ms()).await;
            }
        });
    }

    fn spawn_exit_monitor_tick(self: Arc<Self>) {
        let period = self.config.exit_monitor_tick();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(session) = self.active_session().await else { continue };
                match exit_monitor::tick(&self.pool, &self.exchange, &session).await {
                    Ok(_updated) => {}
                    Err(err) => warn!(%err, "exit monitor tick failed"),
                }
            }
        });
    }

    fn spawn_protective_order_tick(self: Arc<Self>) {
        let period = self.config.reconcile_tick();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some((strategy, session)) = self.active_strategy_and_session().await else { continue };
                let now_ms = self.now_ms();

                match exit_fills::detect(&self.pool, &self.exchange, &session, now_ms).await {
                    Ok(closed) if closed > 0 => info!(closed, "exit-fill detection closed positions"),
                    Ok(_) => {}
                    Err(err) => warn!(%err, "exit-fill detection failed"),
                }

                let open = match db::positions::list_open(&self.pool, session.id).await {
                    Ok(rows) => rows,
                    Err(err) => {
                        warn!(%err, "protective-order reconciliation: failed to list open positions");
                        continue;
                    }
                };
                for position in &open {
                    let stop_distance_pct =
                        sizing::stop_loss_distance_pct(&strategy, None, position.avg_entry_price);
                    if let Err(err) = protective_orders::reconcile(
                        &self.pool,
                        &self.exchange,
                        position,
                        &strategy,
                        stop_distance_pct,
                        now_ms,
                    )
                    .await
                    {
                        warn!(symbol = %position.symbol, %err, "protective-order reconciliation failed for position");
                    }
                }
            }
        });
    }

    fn spawn_orphan_sweep_tick(self: Arc<Self>) {
        let period = self.config.orphan_sweep_tick();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some((strategy, session)) = self.active_strategy_and_session().await else { continue };
                let now_ms = self.now_ms();
                match orphan::sweep(&self.pool, &self.exchange, &session, &strategy, now_ms).await {
                    Ok(adopted) if adopted > 0 => info!(adopted, "orphan sweep adopted positions"),
                    Ok(_) => {}
                    Err(err) => warn!(%err, "orphan sweep failed"),
                }
            }
        });
    }

    fn spawn_retention_sweep_tick(self: Arc<Self>) {
        let period = self.config.retention_sweep_tick();
        let retain_days = 30;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let now_ms = self.now_ms();
                match db::liquidations::delete_older_than(&self.pool, now_ms, retain_days).await {
                    Ok(deleted) if deleted > 0 => info!(deleted, "liquidation retention sweep pruned rows"),
                    Ok(_) => {}
                    Err(err) => warn!(%err, "liquidation retention sweep failed"),
                }
            }
        });
    }

    async fn active_session(&self) -> Option<db::models::TradeSessionRow> {
        let strategy = match db::strategy::get_active(&self.pool).await {
            Ok(Some(row)) => row,
            Ok(None) => return None,
            Err(err) => {
                warn!(%err, "failed to load active strategy");
                return None;
            }
        };
        match db::sessions::get_active(&self.pool, strategy.id).await {
            Ok(session) => session,
            Err(err) => {
                warn!(%err, "failed to load active session");
                None
            }
        }
    }

    async fn active_strategy_and_session(
        &self,
    ) -> Option<(crate::db::models::StrategyParams, db::models::TradeSessionRow)> {
        let strategy = match db::strategy::get_active(&self.pool).await {
            Ok(Some(row)) => row,
            Ok(None) => return None,
            Err(err) => {
                warn!(%err, "failed to load active strategy");
                return None;
            }
        };
        let session = match db::sessions::get_active(&self.pool, strategy.id).await {
            Ok(Some(session)) => session,
            Ok(None) => return None,
            Err(err) => {
                warn!(%err, "failed to load active session");
                return None;
            }
        };
        Some((strategy.params, session))
    }

    /// Run the historical P&L rebuild once (not part of the regular tick
    /// set — invoked at boot and on demand from the operator API, per §4.5).
    pub async fn rebuild_history(&self, resume_from_ms: Option<i64>) -> Result<usize, crate::error::EngineError> {
        let Some((_, session)) = self.active_strategy_and_session().await else {
            return Ok(0);
        };
        let now_ms = self.now_ms();
        history::rebuild(&self.pool, &self.exchange, &session, resume_from_ms, now_ms).await
    }
}
