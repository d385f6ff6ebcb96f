// Trade-entry-error log (§7 Permanent venue error: "log, write a
// trade-entry-error record with {reason, symbol, side, payload}, abort the
// decision"). Append-only, read by the operator API for the failure feed.

use crate::db::DbPool;
use crate::error::EngineError;

pub async fn record(
    pool: &DbPool,
    reason: &str,
    symbol: &str,
    side: &str,
    payload: &str,
    occurred_at: i64,
) -> Result<(), EngineError> {
    sqlx::query(
        "INSERT INTO trade_entry_error (reason, symbol, side, payload, occurred_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(reason)
    .bind(symbol)
    .bind(side)
    .bind(payload)
    .bind(occurred_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a `EngineError::Permanent` directly, extracting its fields. A
/// no-op for any other error variant — only permanent failures are
/// non-qualifying-and-loggable in this table (§7).
pub async fn record_if_permanent(pool: &DbPool, err: &EngineError, occurred_at: i64) -> Result<(), EngineError> {
    if let EngineError::Permanent { reason, symbol, side, payload } = err {
        record(pool, reason, symbol, side, payload, occurred_at).await?;
    }
    Ok(())
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TradeEntryErrorRow {
    pub id: i64,
    pub reason: String,
    pub symbol: String,
    pub side: String,
    pub payload: String,
    pub occurred_at: i64,
}

pub async fn recent(pool: &DbPool, limit: i64) -> Result<Vec<TradeEntryErrorRow>, EngineError> {
    sqlx::query_as::<_, TradeEntryErrorRow>(
        "SELECT * FROM trade_entry_error ORDER BY occurred_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(EngineError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::connect;

    #[tokio::test]
    async fn record_if_permanent_ignores_other_variants() {
        let pool = connect("sqlite::memory:").await.unwrap();
        record_if_permanent(&pool, &EngineError::transient("blip"), 1_000).await.unwrap();
        assert!(recent(&pool, 10).await.unwrap().is_empty());

        let permanent = EngineError::permanent("insufficient margin", "BTCUSDT", "long", "{}");
        record_if_permanent(&pool, &permanent, 2_000).await.unwrap();
        let rows = recent(&pool, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].reason, "insufficient margin");
    }
}
