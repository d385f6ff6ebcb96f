// The per-event decision pipeline (§4.3): runs the six-gate chain under a
// per-(symbol, side) lock, branches into "plan a layer" vs "plan a new
// entry", submits the order, and on a successful fill applies it to the
// position and (re)places protective orders. Modeled on the teacher's
// `InsuranceGate::check_all` for the gate-chain shape, generalized from one
// combined check into the named gates in `strategy::gates`.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use crate::cascade::CascadeDetector;
use crate::db::models::{LiquidationRow, PositionRow, TradeSessionRow};
use crate::db::{self, DbPool, StrategyParams};
use crate::decision_log::DecisionLog;
use crate::error::EngineError;
use crate::exchange::ExchangeClient;
use crate::execution;
use crate::keyed_lock::KeyedMutex;
use crate::position::{manager, protective_orders};
use crate::strategy::gates::{self, CooldownTracker};
use crate::strategy::sizing;
use crate::types::Side;

pub struct StrategyEngine {
    pool: DbPool,
    exchange: Arc<ExchangeClient>,
    cascade: Arc<CascadeDetector>,
    cooldown: CooldownTracker,
    locks: KeyedMutex<(String, Side)>,
}

impl StrategyEngine {
    pub fn new(pool: DbPool, exchange: Arc<ExchangeClient>, cascade: Arc<CascadeDetector>) -> Self {
        Self {
            pool,
            exchange,
            cascade,
            cooldown: CooldownTracker::new(),
            locks: KeyedMutex::new(),
        }
    }

    /// Evaluate one liquidation event end to end. Returns the decision log
    /// for every outcome short of an internal invariant violation, which
    /// propagates as `Err` per §7 ("fatal for that decision").
    #[instrument(skip(self, liquidation, strategy, session), fields(symbol = %liquidation.symbol))]
    pub async fn on_liquidation(
        &self,
        liquidation: &LiquidationRow,
        strategy: &StrategyParams,
        session: &TradeSessionRow,
        now_ms: i64,
    ) -> Result<DecisionLog, EngineError> {
        let symbol = liquidation.symbol.clone();
        let side = liquidation.side().opposite();
        let mut log = DecisionLog::new(&symbol, side.to_string(), now_ms);

        if !strategy.selected_assets.iter().any(|s| s == &symbol) {
            log.record_block("pause", "symbol not in selected_assets");
            return Ok(log);
        }

        let _guard = self.locks.lock((symbol.clone(), side)).await;

        if let Err(e) = gates::pause_gate(strategy) {
            return Ok(blocked(log, "pause", e));
        }
        log.record_pass("pause");

        if let Err(e) = gates::cascade_gate(&self.cascade, &symbol) {
            return Ok(blocked(log, "cascade", e));
        }
        log.record_pass("cascade");

        let existing_position = db::positions::get_open(&self.pool, session.id, &symbol, side).await?;
        if let Some(pos) = &existing_position {
            if pos.layers_filled >= pos.max_layers {
                log.record_block("max_layers", format!("{} layers already filled", pos.max_layers));
                return Ok(log);
            }
        }
        log.record_pass("max_layers");

        if let Err(e) = self.cooldown.check(&symbol, side, now_ms, strategy.layer_delay_seconds) {
            return Ok(blocked(log, "cooldown", e));
        }
        log.record_pass("cooldown");

        if let Err(e) = gates::percentile_gate(
            &self.pool,
            &symbol,
            liquidation.notional,
            now_ms,
            strategy.percentile_threshold,
        )
        .await
        {
            return Ok(blocked(log, "percentile", e));
        }
        log.record_pass("percentile");

        if let Err(e) = gates::portfolio_limit_gate(
            &self.pool,
            session.id,
            &symbol,
            side,
            strategy.max_portfolio_symbols,
        )
        .await
        {
            return Ok(blocked(log, "portfolio", e));
        }
        log.record_pass("portfolio");

        let price = liquidation.price;
        let this_layer_qty = sizing::layer_quantity(
            session.current_balance,
            strategy.position_size_percent,
            strategy.leverage,
            price,
        );
        let stop_distance_pct = sizing::stop_loss_distance_pct(strategy, None, price);

        let (existing_qty, existing_cost, existing_reserved, existing_position_id, layers_filled_before) =
            match &existing_position {
                Some(pos) => (pos.quantity, pos.total_cost, pos.reserved_risk_dollars, Some(pos.id), pos.layers_filled),
                None => (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO, None, 0),
            };
        let quantity_filled_after = existing_qty + this_layer_qty;
        let avg_entry_price_after = if quantity_filled_after.is_zero() {
            price
        } else {
            (existing_cost + this_layer_qty * price) / quantity_filled_after
        };
        let layers_filled_after = layers_filled_before + 1;

        let projected_reserved_risk = match gates::risk_budget_gate(
            &self.pool,
            session.id,
            existing_position_id,
            existing_reserved,
            avg_entry_price_after,
            quantity_filled_after,
            this_layer_qty,
            layers_filled_after,
            strategy,
            stop_distance_pct,
        )
        .await
        {
            Ok(projected) => projected,
            Err(e) => return Ok(blocked(log, "risk_budget", e)),
        };
        log.record_pass("risk_budget");

        let plan = if existing_position.is_some() { "layer" } else { "entry" };
        log.record_qualified(plan);

        let order = match execution::submit_entry_order(&self.exchange, &symbol, side, this_layer_qty, price, strategy).await {
            Ok(order) => order,
            Err(err) => {
                warn!(symbol = %symbol, %side, %err, "entry order submission failed");
                if let Err(log_err) = db::trade_errors::record_if_permanent(&self.pool, &err, now_ms).await {
                    warn!(%log_err, "failed to record trade-entry-error");
                }
                log.record_block("execution", format!("order submission failed: {err}"));
                return Ok(log);
            }
        };

        self.cooldown.arm(&symbol, side, now_ms);

        let filled_qty = if order.executed_qty.is_zero() { this_layer_qty } else { order.executed_qty };
        let fill_price = order.avg_price.unwrap_or(price);

        let (position, _fill) = manager::apply_entry_fill(
            &self.pool,
            session,
            &symbol,
            side,
            None,
            &order.venue_order_id,
            filled_qty,
            fill_price,
            Decimal::ZERO,
            strategy.leverage,
            strategy.max_layers,
            now_ms,
        )
        .await?;

        db::positions::update_reserved_risk(&self.pool, position.id, projected_reserved_risk).await?;

        if let Err(err) = self
            .reconcile_protective_orders(&position, strategy, stop_distance_pct, now_ms)
            .await
        {
            warn!(symbol = %symbol, %err, "protective order placement failed after entry fill");
        }

        info!(symbol = %symbol, %side, plan, position_id = position.id, "qualifying decision executed");
        Ok(log)
    }

    async fn reconcile_protective_orders(
        &self,
        position: &PositionRow,
        strategy: &StrategyParams,
        stop_distance_pct: Decimal,
        now_ms: i64,
    ) -> Result<(), EngineError> {
        protective_orders::reconcile(&self.pool, &self.exchange, position, strategy, stop_distance_pct, now_ms).await
    }
}

fn blocked(mut log: DecisionLog, gate: &str, err: EngineError) -> DecisionLog {
    log.record_block(gate, err.to_string());
    log
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::connect;
    use crate::db::strategy::test_support::sample_params;
    use crate::db::{sessions, strategy};

    #[tokio::test]
    async fn pause_blocks_before_touching_any_other_gate() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let mut params = sample_params();
        params.paused = true;
        let strat = strategy::create(&pool, &params, 1_000).await.unwrap();
        let session = sessions::start(&pool, strat.id, Decimal::new(10_000, 0), 1_000).await.unwrap();

        let exchange = Arc::new(ExchangeClient::new("k", "s", "https://fapi.binance.com", 5000, 20.0));
        let cascade = Arc::new(CascadeDetector::new(exchange.clone()));
        let engine = StrategyEngine::new(pool.clone(), exchange, cascade);

        let liquidation = LiquidationRow {
            id: 1,
            venue_event_id: "e1".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: "long".to_string(),
            quantity: Decimal::new(1, 0),
            price: Decimal::new(60_000, 0),
            notional: Decimal::new(60_000, 0),
            venue_ts: 1_000,
            ingested_at: 1_000,
        };

        let log = engine.on_liquidation(&liquidation, &params.clone(), &session, 1_000).await.unwrap();
        assert!(log.is_blocked());
        assert_eq!(log.blocking_gate.as_deref(), Some("pause"));
    }

    #[tokio::test]
    async fn unselected_symbol_is_blocked_without_acquiring_the_lock() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let params = sample_params();
        let strat = strategy::create(&pool, &params, 1_000).await.unwrap();
        let session = sessions::start(&pool, strat.id, Decimal::new(10_000, 0), 1_000).await.unwrap();

        let exchange = Arc::new(ExchangeClient::new("k", "s", "https://fapi.binance.com", 5000, 20.0));
        let cascade = Arc::new(CascadeDetector::new(exchange.clone()));
        let engine = StrategyEngine::new(pool.clone(), exchange, cascade);

        let liquidation = LiquidationRow {
            id: 1,
            venue_event_id: "e1".to_string(),
            symbol: "DOGEUSDT".to_string(),
            side: "long".to_string(),
            quantity: Decimal::new(1, 0),
            price: Decimal::new(1, 1),
            notional: Decimal::new(100, 0),
            venue_ts: 1_000,
            ingested_at: 1_000,
        };

        let log = engine.on_liquidation(&liquidation, &params, &session, 1_000).await.unwrap();
        assert!(log.is_blocked());
    }
}
