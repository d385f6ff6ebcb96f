// Exit-fill detection. Protective TP/SL orders and operator-initiated
// manual closes execute on the venue without a push notification reaching
// this engine — there is no user-data-stream listener here, only the
// `forceOrder` liquidation stream (§6). Detected instead by polling
// `userTrades` per open position's symbol and matching each trade's
// `orderId` against the pending exit orders tracked for that position.
// Grounded on `reconcile.rs`'s matched-set polling shape, applied to order
// fills instead of spot balances.

use tracing::{info, instrument, warn};

use crate::db::models::{PositionRow, TradeSessionRow};
use crate::db::{self, DbPool};
use crate::error::EngineError;
use crate::exchange::ExchangeClient;
use crate::position::manager;
use crate::types::OrderStatus;

/// For every open position in `session`, apply any exit fill found among
/// its pending TP/SL/manual-close orders. Returns how many positions closed
/// this pass.
#[instrument(skip(pool, exchange, session), fields(session_id = session.id))]
pub async fn detect(
    pool: &DbPool,
    exchange: &ExchangeClient,
    session: &TradeSessionRow,
    now_ms: i64,
) -> Result<usize, EngineError> {
    let open = db::positions::list_open(pool, session.id).await?;
    let mut closed = 0usize;

    for position in &open {
        match detect_for_position(pool, exchange, session, position, now_ms).await {
            Ok(did_close) if did_close => closed += 1,
            Ok(_) => {}
            Err(err) => warn!(symbol = %position.symbol, %err, "exit-fill detection failed for position"),
        }
    }

    Ok(closed)
}

async fn detect_for_position(
    pool: &DbPool,
    exchange: &ExchangeClient,
    session: &TradeSessionRow,
    position: &PositionRow,
    now_ms: i64,
) -> Result<bool, EngineError> {
    let pending = db::orders::pending_exit_orders_for_position(pool, position.id).await?;
    if pending.is_empty() {
        return Ok(false);
    }

    let trades = exchange
        .get_user_trades(&position.symbol, position.opened_at, now_ms, 1000)
        .await?;

    let mut closed = false;
    for order in &pending {
        let Some(trade) = trades.iter().find(|t| t.order_id == order.venue_order_id) else {
            continue;
        };

        db::orders::mark_status(pool, order.id, OrderStatus::Filled, Some(trade.time)).await?;

        let updated = manager::apply_exit_fill(
            pool,
            session,
            position,
            Some(order.id),
            &trade.trade_id,
            trade.qty,
            trade.price,
            trade.commission,
            trade.time,
        )
        .await?;

        if !updated.is_open {
            info!(symbol = %position.symbol, position_id = position.id, purpose = %order.purpose(), "position closed by exit fill");
            closed = true;
        }
    }

    Ok(closed)
}

#[cfg(test)]
mod tests {
    use crate::db::pool::connect;
    use crate::db::strategy::test_support::sample_params;
    use crate::db::{orders, positions, sessions, strategy};
    use crate::types::{OrderPurpose, OrderStatus, OrderType, Side};
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn manual_close_is_visible_as_a_pending_exit_order() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let strat = strategy::create(&pool, &sample_params(), 1_000).await.unwrap();
        let session = sessions::start(&pool, strat.id, Decimal::new(10_000, 0), 1_000).await.unwrap();
        let position = positions::create(
            &pool, session.id, "BTCUSDT", Side::Long,
            Decimal::new(1, 0), Decimal::new(60_000, 0), Decimal::new(60_000, 0), 5, 3, 1_000,
        ).await.unwrap();

        assert!(orders::pending_exit_orders_for_position(&pool, position.id).await.unwrap().is_empty());

        let order = orders::create(
            &pool, "manual-1", session.id, Some(position.id), "BTCUSDT", Side::Long,
            OrderPurpose::ManualClose, OrderType::Limit, Some(Decimal::new(61_000, 0)),
            Decimal::new(1, 0), None, 2_000,
        ).await.unwrap();

        let pending = orders::pending_exit_orders_for_position(&pool, position.id).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].purpose(), OrderPurpose::ManualClose);

        orders::mark_status(&pool, order.id, OrderStatus::Filled, Some(2_500)).await.unwrap();
        assert!(orders::pending_exit_orders_for_position(&pool, position.id).await.unwrap().is_empty());
    }

    #[test]
    fn order_purpose_round_trips_through_display() {
        assert_eq!(OrderPurpose::ManualClose.to_string(), "manual_close");
    }
}
