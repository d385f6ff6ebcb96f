// Position repository: pure CRUD against the `position` table. Business
// logic (weighted-average recompute, reserved-risk, fill application) lives
// in `position::manager` — this module only reads and writes rows.

use rust_decimal::Decimal;

use crate::db::models::PositionRow;
use crate::db::DbPool;
use crate::error::EngineError;
use crate::types::Side;

pub async fn get_open(
    pool: &DbPool,
    session_id: i64,
    symbol: &str,
    side: Side,
) -> Result<Option<PositionRow>, EngineError> {
    sqlx::query_as::<_, PositionRow>(
        "SELECT * FROM position WHERE session_id = ? AND symbol = ? AND side = ? AND is_open = 1",
    )
    .bind(session_id)
    .bind(symbol)
    .bind(side.to_string())
    .fetch_optional(pool)
    .await
    .map_err(EngineError::from)
}

pub async fn get(pool: &DbPool, id: i64) -> Result<PositionRow, EngineError> {
    sqlx::query_as::<_, PositionRow>("SELECT * FROM position WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(EngineError::from)
}

pub async fn list_open(pool: &DbPool, session_id: i64) -> Result<Vec<PositionRow>, EngineError> {
    sqlx::query_as::<_, PositionRow>(
        "SELECT * FROM position WHERE session_id = ? AND is_open = 1",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await
    .map_err(EngineError::from)
}

pub async fn count_open_symbols(pool: &DbPool, session_id: i64) -> Result<i64, EngineError> {
    // Hedged long+short on the same symbol counts as one, per §4.3's
    // portfolio-limit gate — count distinct symbols, not distinct rows.
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(DISTINCT symbol) FROM position WHERE session_id = ? AND is_open = 1",
    )
    .bind(session_id)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Create a new position on its first entry fill. The partial unique index
/// on (session_id, symbol, side) WHERE is_open=1 enforces the "at most one
/// open position" invariant at the database layer; a conflict here is a bug
/// (the strategy engine's per-(symbol,side) lock should have prevented it).
pub async fn create(
    pool: &DbPool,
    session_id: i64,
    symbol: &str,
    side: Side,
    quantity: Decimal,
    avg_entry_price: Decimal,
    total_cost: Decimal,
    leverage: i64,
    max_layers: i64,
    opened_at: i64,
) -> Result<PositionRow, EngineError> {
    let id = sqlx::query(
        r#"
        INSERT INTO position
            (session_id, symbol, side, quantity, avg_entry_price, total_cost, leverage,
             layers_filled, max_layers, reserved_risk_dollars, unrealized_pnl, is_open, opened_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, '0', '0', 1, ?)
        "#,
    )
    .bind(session_id)
    .bind(symbol)
    .bind(side.to_string())
    .bind(quantity)
    .bind(avg_entry_price)
    .bind(total_cost)
    .bind(leverage)
    .bind(max_layers)
    .bind(opened_at)
    .execute(pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            EngineError::invariant(format!(
                "open position already exists for {symbol} {side}: {db_err}"
            ))
        }
        other => EngineError::from(other),
    })?
    .last_insert_rowid();

    get(pool, id).await
}

/// Apply a layer fill to an existing open position: new aggregate quantity
/// and weighted-average entry are supplied by the caller (position::manager
/// owns that arithmetic) so this stays a pure write.
pub async fn apply_layer(
    pool: &DbPool,
    id: i64,
    new_quantity: Decimal,
    new_avg_entry_price: Decimal,
    new_total_cost: Decimal,
    new_layers_filled: i64,
) -> Result<PositionRow, EngineError> {
    sqlx::query(
        "UPDATE position SET quantity = ?, avg_entry_price = ?, total_cost = ?, layers_filled = ? \
         WHERE id = ?",
    )
    .bind(new_quantity)
    .bind(new_avg_entry_price)
    .bind(new_total_cost)
    .bind(new_layers_filled)
    .bind(id)
    .execute(pool)
    .await?;
    get(pool, id).await
}

/// Apply an exit fill that reduces (but does not necessarily zero) the
/// position quantity.
pub async fn apply_exit(
    pool: &DbPool,
    id: i64,
    new_quantity: Decimal,
) -> Result<PositionRow, EngineError> {
    sqlx::query("UPDATE position SET quantity = ? WHERE id = ?")
        .bind(new_quantity)
        .bind(id)
        .execute(pool)
        .await?;
    get(pool, id).await
}

pub async fn update_unrealized_pnl(
    pool: &DbPool,
    id: i64,
    unrealized_pnl: Decimal,
) -> Result<(), EngineError> {
    sqlx::query("UPDATE position SET unrealized_pnl = ? WHERE id = ?")
        .bind(unrealized_pnl)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn update_reserved_risk(
    pool: &DbPool,
    id: i64,
    reserved_risk_dollars: Decimal,
) -> Result<(), EngineError> {
    sqlx::query("UPDATE position SET reserved_risk_dollars = ? WHERE id = ?")
        .bind(reserved_risk_dollars)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Sum of `reserved_risk_dollars` across all open positions in the session,
/// excluding `exclude_position_id` if given — used by the risk-budget gate
/// to compute "existing reserved risk" before adding this layer's delta.
pub async fn sum_reserved_risk(
    pool: &DbPool,
    session_id: i64,
    exclude_position_id: Option<i64>,
) -> Result<Decimal, EngineError> {
    let rows = list_open(pool, session_id).await?;
    Ok(rows
        .into_iter()
        .filter(|p| Some(p.id) != exclude_position_id)
        .map(|p| p.reserved_risk_dollars)
        .sum())
}

/// Mark a position closed: `is_open=0`, `closed_at`, `realized_pnl` in
/// absolute terms. The only close path the engine initiates — see §4.4.
pub async fn close(
    pool: &DbPool,
    id: i64,
    realized_pnl: Decimal,
    closed_at: i64,
) -> Result<PositionRow, EngineError> {
    sqlx::query(
        "UPDATE position SET is_open = 0, quantity = '0', closed_at = ?, realized_pnl = ? WHERE id = ?",
    )
    .bind(closed_at)
    .bind(realized_pnl)
    .bind(id)
    .execute(pool)
    .await?;
    get(pool, id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::connect;
    use crate::db::{sessions, strategy};
    use crate::db::strategy::test_support::sample_params;

    async fn setup_session() -> (DbPool, i64) {
        let pool = connect("sqlite::memory:").await.unwrap();
        let strat = strategy::create(&pool, &sample_params(), 1_000).await.unwrap();
        let session = sessions::start(&pool, strat.id, Decimal::new(10_000, 0), 1_000)
            .await
            .unwrap();
        (pool, session.id)
    }

    #[tokio::test]
    async fn at_most_one_open_position_per_session_symbol_side() {
        let (pool, session_id) = setup_session().await;
        create(
            &pool,
            session_id,
            "BTCUSDT",
            Side::Long,
            Decimal::new(1, 0),
            Decimal::new(60_000, 0),
            Decimal::new(60_000, 0),
            5,
            3,
            1_000,
        )
        .await
        .unwrap();

        let conflict = create(
            &pool,
            session_id,
            "BTCUSDT",
            Side::Long,
            Decimal::new(1, 0),
            Decimal::new(61_000, 0),
            Decimal::new(61_000, 0),
            5,
            3,
            2_000,
        )
        .await;
        assert!(conflict.is_err());
    }

    #[tokio::test]
    async fn count_open_symbols_counts_hedged_pair_once() {
        let (pool, session_id) = setup_session().await;
        create(
            &pool, session_id, "BTCUSDT", Side::Long,
            Decimal::new(1, 0), Decimal::new(60_000, 0), Decimal::new(60_000, 0), 5, 3, 1_000,
        ).await.unwrap();
        create(
            &pool, session_id, "BTCUSDT", Side::Short,
            Decimal::new(1, 0), Decimal::new(60_000, 0), Decimal::new(60_000, 0), 5, 3, 1_000,
        ).await.unwrap();

        let count = count_open_symbols(&pool, session_id).await.unwrap();
        assert_eq!(count, 1);
    }
}
