// Append-only liquidation event log. §3: "venue event identifier is
// globally unique across the log"; §4.1: a conflict on insert is not an
// error, the existing row is fetched and processing continues.

use rust_decimal::Decimal;
use sqlx::Row;
use tracing::debug;

use crate::db::models::LiquidationRow;
use crate::db::DbPool;
use crate::error::EngineError;

/// Insert a new liquidation row, or — on a venue-event-id conflict — fetch
/// and return the row that is already there. Never returns `Err` for the
/// conflict case; §4.1 explicitly treats it as a no-op against state.
pub async fn insert_or_fetch(
    pool: &DbPool,
    venue_event_id: &str,
    symbol: &str,
    side: &str,
    quantity: Decimal,
    price: Decimal,
    notional: Decimal,
    venue_ts: i64,
    ingested_at: i64,
) -> Result<(LiquidationRow, bool), EngineError> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO liquidations
            (venue_event_id, symbol, side, quantity, price, notional, venue_ts, ingested_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (venue_event_id) DO NOTHING
        "#,
    )
    .bind(venue_event_id)
    .bind(symbol)
    .bind(side)
    .bind(quantity)
    .bind(price)
    .bind(notional)
    .bind(venue_ts)
    .bind(ingested_at)
    .execute(pool)
    .await?;

    let was_new = inserted.rows_affected() == 1;
    if !was_new {
        debug!(venue_event_id, "liquidation already persisted, fetching existing row");
    }

    let row = sqlx::query_as::<_, LiquidationRow>(
        "SELECT * FROM liquidations WHERE venue_event_id = ?",
    )
    .bind(venue_event_id)
    .fetch_one(pool)
    .await?;

    Ok((row, was_new))
}

/// Same-symbol liquidation notionals within the last `window_secs` seconds,
/// ending at `now_ms`. The percentile gate's window (60s) is a system
/// constant independent of the strategy setting — callers pass it explicitly
/// rather than reading it from `Strategy`.
pub async fn recent_notionals(
    pool: &DbPool,
    symbol: &str,
    now_ms: i64,
    window_secs: i64,
) -> Result<Vec<Decimal>, EngineError> {
    let since = now_ms - window_secs * 1000;
    let rows = sqlx::query("SELECT notional FROM liquidations WHERE symbol = ? AND venue_ts >= ?")
        .bind(symbol)
        .bind(since)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|r| r.get::<Decimal, _>("notional"))
        .collect())
}

/// Same-symbol liquidation notionals in the window, split by side, for the
/// cascade detector's LQ indicator and dominant-side computation.
pub async fn recent_notionals_by_side(
    pool: &DbPool,
    symbol: &str,
    now_ms: i64,
    window_secs: i64,
) -> Result<Vec<(String, Decimal)>, EngineError> {
    let since = now_ms - window_secs * 1000;
    let rows = sqlx::query(
        "SELECT side, notional FROM liquidations WHERE symbol = ? AND venue_ts >= ? ORDER BY venue_ts ASC",
    )
    .bind(symbol)
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| (r.get::<String, _>("side"), r.get::<Decimal, _>("notional")))
        .collect())
}

/// Retention sweep: delete liquidation rows older than `retain_days` days,
/// relative to `now_ms`. Run on the scheduler's retention tick.
pub async fn delete_older_than(
    pool: &DbPool,
    now_ms: i64,
    retain_days: i64,
) -> Result<u64, EngineError> {
    let cutoff = now_ms - retain_days * 24 * 60 * 60 * 1000;
    let result = sqlx::query("DELETE FROM liquidations WHERE ingested_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::connect;

    async fn test_pool() -> DbPool {
        connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn insert_or_fetch_is_idempotent() {
        let pool = test_pool().await;
        let (first, was_new_1) = insert_or_fetch(
            &pool,
            "9001",
            "XUSDT",
            "long",
            Decimal::new(10, 1),
            Decimal::new(1000, 1),
            Decimal::new(1000, 1),
            1_700_000_000_000,
            1_700_000_000_050,
        )
        .await
        .unwrap();
        assert!(was_new_1);

        let (second, was_new_2) = insert_or_fetch(
            &pool,
            "9001",
            "XUSDT",
            "long",
            Decimal::new(10, 1),
            Decimal::new(1000, 1),
            Decimal::new(1000, 1),
            1_700_000_000_000,
            1_700_000_000_999,
        )
        .await
        .unwrap();
        assert!(!was_new_2);
        assert_eq!(first.id, second.id);

        let count: i64 = sqlx::query("SELECT COUNT(*) AS c FROM liquidations")
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("c");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn recent_notionals_respects_window() {
        let pool = test_pool().await;
        insert_or_fetch(
            &pool,
            "a",
            "XUSDT",
            "long",
            Decimal::ONE,
            Decimal::ONE,
            Decimal::new(50, 0),
            1_000_000,
            1_000_000,
        )
        .await
        .unwrap();
        insert_or_fetch(
            &pool,
            "b",
            "XUSDT",
            "long",
            Decimal::ONE,
            Decimal::ONE,
            Decimal::new(500, 0),
            1_060_000,
            1_060_000,
        )
        .await
        .unwrap();

        let within = recent_notionals(&pool, "XUSDT", 1_060_000, 60).await.unwrap();
        assert_eq!(within.len(), 2);

        let narrow = recent_notionals(&pool, "XUSDT", 1_060_000, 1).await.unwrap();
        assert_eq!(narrow.len(), 1);
        assert_eq!(narrow[0], Decimal::new(500, 0));
    }
}
