// Fill repository. §3: "(venue trade identifier, session) is unique — the
// enforcement point for idempotency."

use rust_decimal::Decimal;

use crate::db::models::FillRow;
use crate::db::DbPool;
use crate::error::EngineError;
use crate::types::{FillSide, Side};

#[allow(clippy::too_many_arguments)]
pub async fn insert_or_fetch(
    pool: &DbPool,
    venue_trade_id: &str,
    session_id: i64,
    order_id: Option<i64>,
    position_id: i64,
    symbol: &str,
    side: FillSide,
    quantity: Decimal,
    price: Decimal,
    notional: Decimal,
    commission: Decimal,
    layer_number: Option<i64>,
    filled_at: i64,
) -> Result<(FillRow, bool), EngineError> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO fill
            (venue_trade_id, session_id, order_id, position_id, symbol, side, quantity, price,
             notional, commission, layer_number, filled_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (venue_trade_id, session_id) DO NOTHING
        "#,
    )
    .bind(venue_trade_id)
    .bind(session_id)
    .bind(order_id)
    .bind(position_id)
    .bind(symbol)
    .bind(side.to_string())
    .bind(quantity)
    .bind(price)
    .bind(notional)
    .bind(commission)
    .bind(layer_number)
    .bind(filled_at)
    .execute(pool)
    .await?;

    let was_new = inserted.rows_affected() == 1;

    let row = sqlx::query_as::<_, FillRow>(
        "SELECT * FROM fill WHERE venue_trade_id = ? AND session_id = ?",
    )
    .bind(venue_trade_id)
    .bind(session_id)
    .fetch_one(pool)
    .await?;

    Ok((row, was_new))
}

/// Look up a fill by its idempotency key without inserting — used by
/// `position::manager` to decide whether a fill has already been applied
/// before touching any position-state arithmetic.
pub async fn get_by_venue_trade_id(
    pool: &DbPool,
    venue_trade_id: &str,
    session_id: i64,
) -> Result<Option<FillRow>, EngineError> {
    sqlx::query_as::<_, FillRow>("SELECT * FROM fill WHERE venue_trade_id = ? AND session_id = ?")
        .bind(venue_trade_id)
        .bind(session_id)
        .fetch_optional(pool)
        .await
        .map_err(EngineError::from)
}

pub async fn list_for_position(pool: &DbPool, position_id: i64) -> Result<Vec<FillRow>, EngineError> {
    sqlx::query_as::<_, FillRow>("SELECT * FROM fill WHERE position_id = ? ORDER BY filled_at ASC")
        .bind(position_id)
        .fetch_all(pool)
        .await
        .map_err(EngineError::from)
}

/// Net signed quantity across every fill for a position, entries positive
/// and exits negative relative to `position_side` — used to detect "flat"
/// for `closePositionIfFlat`.
pub async fn net_quantity(
    pool: &DbPool,
    position_id: i64,
    position_side: Side,
) -> Result<Decimal, EngineError> {
    let fills = list_for_position(pool, position_id).await?;
    let entry_side = match position_side {
        Side::Long => FillSide::Buy,
        Side::Short => FillSide::Sell,
    };
    Ok(fills
        .iter()
        .map(|f| {
            if f.side() == entry_side {
                f.quantity
            } else {
                -f.quantity
            }
        })
        .sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::connect;
    use crate::db::{positions, sessions, strategy};
    use crate::db::strategy::test_support::sample_params;

    async fn setup() -> (DbPool, i64, i64) {
        let pool = connect("sqlite::memory:").await.unwrap();
        let strat = strategy::create(&pool, &sample_params(), 1_000).await.unwrap();
        let session = sessions::start(&pool, strat.id, Decimal::new(10_000, 0), 1_000)
            .await
            .unwrap();
        let position = positions::create(
            &pool, session.id, "BTCUSDT", Side::Long,
            Decimal::new(1, 0), Decimal::new(60_000, 0), Decimal::new(60_000, 0), 5, 3, 1_000,
        ).await.unwrap();
        (pool, session.id, position.id)
    }

    #[tokio::test]
    async fn reapplying_same_trade_id_is_a_noop() {
        let (pool, session_id, position_id) = setup().await;
        let (first, new1) = insert_or_fetch(
            &pool, "t1", session_id, None, position_id, "BTCUSDT", FillSide::Buy,
            Decimal::new(1, 0), Decimal::new(60_000, 0), Decimal::new(60_000, 0),
            Decimal::ZERO, Some(1), 1_000,
        ).await.unwrap();
        assert!(new1);

        let (second, new2) = insert_or_fetch(
            &pool, "t1", session_id, None, position_id, "BTCUSDT", FillSide::Buy,
            Decimal::new(99, 0), Decimal::new(1, 0), Decimal::new(1, 0),
            Decimal::ZERO, Some(1), 9_999,
        ).await.unwrap();
        assert!(!new2);
        assert_eq!(first.id, second.id);
        assert_eq!(second.quantity, Decimal::new(1, 0));
    }

    #[tokio::test]
    async fn get_by_venue_trade_id_finds_only_matching_session() {
        let (pool, session_id, position_id) = setup().await;
        insert_or_fetch(
            &pool, "t1", session_id, None, position_id, "BTCUSDT", FillSide::Buy,
            Decimal::new(1, 0), Decimal::new(60_000, 0), Decimal::new(60_000, 0),
            Decimal::ZERO, Some(1), 1_000,
        ).await.unwrap();

        assert!(get_by_venue_trade_id(&pool, "t1", session_id).await.unwrap().is_some());
        assert!(get_by_venue_trade_id(&pool, "t1", session_id + 1).await.unwrap().is_none());
        assert!(get_by_venue_trade_id(&pool, "missing", session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn net_quantity_nets_entries_against_exits() {
        let (pool, session_id, position_id) = setup().await;
        insert_or_fetch(
            &pool, "e1", session_id, None, position_id, "BTCUSDT", FillSide::Buy,
            Decimal::new(2, 0), Decimal::new(60_000, 0), Decimal::new(120_000, 0),
            Decimal::ZERO, Some(1), 1_000,
        ).await.unwrap();
        insert_or_fetch(
            &pool, "x1", session_id, None, position_id, "BTCUSDT", FillSide::Sell,
            Decimal::new(2, 0), Decimal::new(61_000, 0), Decimal::new(122_000, 0),
            Decimal::ZERO, None, 2_000,
        ).await.unwrap();

        let net = net_quantity(&pool, position_id, Side::Long).await.unwrap();
        assert_eq!(net, Decimal::ZERO);
    }
}
