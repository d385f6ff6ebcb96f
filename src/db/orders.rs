// Order repository. Orders are created before venue submission; status
// transitions are driven by venue acks and user-data events (§3).

use rust_decimal::Decimal;

use crate::db::models::OrderRow;
use crate::db::DbPool;
use crate::error::EngineError;
use crate::types::{OrderPurpose, OrderStatus, OrderType, Side};

#[allow(clippy::too_many_arguments)]
pub async fn create(
    pool: &DbPool,
    venue_order_id: &str,
    session_id: i64,
    position_id: Option<i64>,
    symbol: &str,
    side: Side,
    purpose: OrderPurpose,
    order_type: OrderType,
    price: Option<Decimal>,
    quantity: Decimal,
    layer_number: Option<i64>,
    created_at: i64,
) -> Result<OrderRow, EngineError> {
    let id = sqlx::query(
        r#"
        INSERT INTO "order"
            (venue_order_id, session_id, position_id, symbol, side, purpose, order_type,
             price, quantity, status, layer_number, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)
        "#,
    )
    .bind(venue_order_id)
    .bind(session_id)
    .bind(position_id)
    .bind(symbol)
    .bind(side.to_string())
    .bind(purpose.to_string())
    .bind(order_type.to_string())
    .bind(price)
    .bind(quantity)
    .bind(layer_number)
    .bind(created_at)
    .execute(pool)
    .await?
    .last_insert_rowid();

    get(pool, id).await
}

pub async fn get(pool: &DbPool, id: i64) -> Result<OrderRow, EngineError> {
    sqlx::query_as::<_, OrderRow>(r#"SELECT * FROM "order" WHERE id = ?"#)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(EngineError::from)
}

pub async fn get_by_venue_id(
    pool: &DbPool,
    venue_order_id: &str,
    session_id: i64,
) -> Result<Option<OrderRow>, EngineError> {
    sqlx::query_as::<_, OrderRow>(
        r#"SELECT * FROM "order" WHERE venue_order_id = ? AND session_id = ?"#,
    )
    .bind(venue_order_id)
    .bind(session_id)
    .fetch_optional(pool)
    .await
    .map_err(EngineError::from)
}

/// The live protective-order pair (TP, SL) for a position, if placed and
/// not yet filled/cancelled — used by the reconciliation tick to detect a
/// missing or mismatched pair.
pub async fn protective_orders_for_position(
    pool: &DbPool,
    position_id: i64,
) -> Result<Vec<OrderRow>, EngineError> {
    sqlx::query_as::<_, OrderRow>(
        r#"SELECT * FROM "order" WHERE position_id = ? AND purpose IN ('take_profit', 'stop_loss')
           AND status = 'pending'"#,
    )
    .bind(position_id)
    .fetch_all(pool)
    .await
    .map_err(EngineError::from)
}

/// Every still-pending exit-side order for a position — protective (TP/SL)
/// plus any manual close — used by exit-fill detection to catch every way a
/// position can close. Kept separate from `protective_orders_for_position`,
/// which protective-order reconciliation uses to decide what to cancel-and-
/// replace: a manual close in flight must never be swept up as "stale".
pub async fn pending_exit_orders_for_position(
    pool: &DbPool,
    position_id: i64,
) -> Result<Vec<OrderRow>, EngineError> {
    sqlx::query_as::<_, OrderRow>(
        r#"SELECT * FROM "order" WHERE position_id = ?
           AND purpose IN ('take_profit', 'stop_loss', 'manual_close') AND status = 'pending'"#,
    )
    .bind(position_id)
    .fetch_all(pool)
    .await
    .map_err(EngineError::from)
}

pub async fn mark_status(
    pool: &DbPool,
    id: i64,
    status: OrderStatus,
    filled_at: Option<i64>,
) -> Result<(), EngineError> {
    sqlx::query(r#"UPDATE "order" SET status = ?, filled_at = ? WHERE id = ?"#)
        .bind(status.to_string())
        .bind(filled_at)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Cancel every non-protective pending order for a session — used on
/// operator stop, per §4.3's "Suspension and cancellation" rule that
/// protective orders are left in place.
pub async fn cancel_non_protective_pending(
    pool: &DbPool,
    session_id: i64,
) -> Result<Vec<OrderRow>, EngineError> {
    let pending = sqlx::query_as::<_, OrderRow>(
        r#"SELECT * FROM "order" WHERE session_id = ? AND status = 'pending' AND purpose = 'entry'"#,
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    for order in &pending {
        mark_status(pool, order.id, OrderStatus::Cancelled, None).await?;
    }
    Ok(pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::connect;
    use crate::db::{positions, sessions, strategy};
    use crate::db::strategy::test_support::sample_params;

    #[tokio::test]
    async fn protective_orders_filters_by_purpose_and_status() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let strat = strategy::create(&pool, &sample_params(), 1_000).await.unwrap();
        let session = sessions::start(&pool, strat.id, Decimal::new(10_000, 0), 1_000)
            .await
            .unwrap();
        let position = positions::create(
            &pool, session.id, "BTCUSDT", Side::Long,
            Decimal::new(1, 0), Decimal::new(60_000, 0), Decimal::new(60_000, 0), 5, 3, 1_000,
        ).await.unwrap();

        create(
            &pool, "tp-1", session.id, Some(position.id), "BTCUSDT", Side::Long,
            OrderPurpose::TakeProfit, OrderType::Limit, Some(Decimal::new(61_000, 0)),
            Decimal::new(1, 0), None, 1_000,
        ).await.unwrap();
        let sl = create(
            &pool, "sl-1", session.id, Some(position.id), "BTCUSDT", Side::Long,
            OrderPurpose::StopLoss, OrderType::Market, None,
            Decimal::new(1, 0), None, 1_000,
        ).await.unwrap();
        mark_status(&pool, sl.id, OrderStatus::Filled, Some(2_000)).await.unwrap();

        let live = protective_orders_for_position(&pool, position.id).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].purpose(), OrderPurpose::TakeProfit);
    }
}
