// Protective-order reconciliation (§4.4): take-profit as a LIMIT reduce-only
// order, stop-loss as a STOP_MARKET reduce-only order. Runs unconditionally
// on every layer fill (cancel-then-replace, no "has the pair drifted?"
// check) and on the scheduler's periodic reconciliation tick (place new
// before cancelling stale, minimizing the unguarded window — §4.4).

use rust_decimal::Decimal;
use tracing::{instrument, warn};

use crate::db::models::PositionRow;
use crate::db::{self, DbPool, StrategyParams};
use crate::error::EngineError;
use crate::exchange::ExchangeClient;
use crate::types::{OrderPurpose, OrderType, Side};

fn take_profit_price(position: &PositionRow, profit_target_percent: Decimal) -> Decimal {
    let pct = profit_target_percent / Decimal::new(100, 0);
    match position.side() {
        Side::Long => position.avg_entry_price * (Decimal::ONE + pct),
        Side::Short => position.avg_entry_price * (Decimal::ONE - pct),
    }
}

fn stop_loss_price(position: &PositionRow, stop_distance_pct: Decimal) -> Decimal {
    match position.side() {
        Side::Long => position.avg_entry_price * (Decimal::ONE - stop_distance_pct),
        Side::Short => position.avg_entry_price * (Decimal::ONE + stop_distance_pct),
    }
}

/// Place a fresh (TP, SL) pair for `position` and cancel whatever protective
/// orders were previously tracked for it. Always runs both legs even if only
/// one drifted — the spec resolves this cancel-then-replace unconditionally
/// rather than diffing the existing pair (see DESIGN.md).
#[instrument(skip(pool, exchange, position, strategy), fields(position_id = position.id))]
pub async fn reconcile(
    pool: &DbPool,
    exchange: &ExchangeClient,
    position: &PositionRow,
    strategy: &StrategyParams,
    stop_distance_pct: Decimal,
    now_ms: i64,
) -> Result<(), EngineError> {
    let stale = db::orders::protective_orders_for_position(pool, position.id).await?;

    let exit_side = position.side().exit_order_side();
    let tp_price = take_profit_price(position, strategy.profit_target_percent);
    let sl_price = stop_loss_price(position, stop_distance_pct);

    let tp_resp = exchange
        .place_order(
            &position.symbol,
            exit_side,
            "LIMIT",
            position.quantity,
            Some(tp_price),
            None,
            true,
            Some("GTC"),
            None,
        )
        .await?;
    db::orders::create(
        pool,
        &tp_resp.venue_order_id,
        position.session_id,
        Some(position.id),
        &position.symbol,
        position.side(),
        OrderPurpose::TakeProfit,
        OrderType::Limit,
        Some(tp_price),
        position.quantity,
        Some(position.layers_filled),
        now_ms,
    )
    .await?;

    let sl_resp = exchange
        .place_order(
            &position.symbol,
            exit_side,
            "STOP_MARKET",
            position.quantity,
            None,
            Some(sl_price),
            true,
            None,
            None,
        )
        .await?;
    db::orders::create(
        pool,
        &sl_resp.venue_order_id,
        position.session_id,
        Some(position.id),
        &position.symbol,
        position.side(),
        OrderPurpose::StopLoss,
        OrderType::Market,
        None,
        position.quantity,
        Some(position.layers_filled),
        now_ms,
    )
    .await?;

    for order in &stale {
        if let Err(err) = exchange.cancel_order(&position.symbol, &order.venue_order_id).await {
            warn!(venue_order_id = %order.venue_order_id, %err, "failed to cancel stale protective order");
            continue;
        }
        db::orders::mark_status(pool, order.id, crate::types::OrderStatus::Cancelled, None).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_position(side: Side, avg_entry: Decimal) -> PositionRow {
        PositionRow {
            id: 1,
            session_id: 1,
            symbol: "BTCUSDT".to_string(),
            side: side.to_string(),
            quantity: Decimal::new(1, 0),
            avg_entry_price: avg_entry,
            total_cost: avg_entry,
            leverage: 5,
            layers_filled: 1,
            max_layers: 3,
            reserved_risk_dollars: Decimal::ZERO,
            realized_pnl: None,
            unrealized_pnl: Decimal::ZERO,
            is_open: true,
            opened_at: 1_000,
            closed_at: None,
        }
    }

    #[test]
    fn long_take_profit_is_above_entry_stop_below() {
        let position = sample_position(Side::Long, Decimal::new(100, 0));
        let tp = take_profit_price(&position, Decimal::new(2, 0));
        let sl = stop_loss_price(&position, Decimal::new(2, 2));
        assert_eq!(tp, Decimal::new(102, 0));
        assert_eq!(sl, Decimal::new(98, 0));
    }

    #[test]
    fn short_take_profit_is_below_entry_stop_above() {
        let position = sample_position(Side::Short, Decimal::new(100, 0));
        let tp = take_profit_price(&position, Decimal::new(2, 0));
        let sl = stop_loss_price(&position, Decimal::new(2, 2));
        assert_eq!(tp, Decimal::new(98, 0));
        assert_eq!(sl, Decimal::new(102, 0));
    }
}
