// Income-event mirror table + earliest-timestamp cursor, for the historical
// P&L rebuild flow (§4.5).

use rust_decimal::Decimal;

use crate::db::models::IncomeEventRow;
use crate::db::DbPool;
use crate::error::EngineError;

/// Insert an income event, or no-op if `venue_income_id` was already
/// imported. Returns `true` when the row is new.
pub async fn insert_or_skip(
    pool: &DbPool,
    venue_income_id: &str,
    symbol: Option<&str>,
    income_type: &str,
    income: Decimal,
    venue_ts: i64,
    imported_at: i64,
) -> Result<bool, EngineError> {
    let result = sqlx::query(
        r#"
        INSERT INTO income_event (venue_income_id, symbol, income_type, income, venue_ts, imported_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (venue_income_id) DO NOTHING
        "#,
    )
    .bind(venue_income_id)
    .bind(symbol)
    .bind(income_type)
    .bind(income)
    .bind(venue_ts)
    .bind(imported_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn exists(pool: &DbPool, venue_income_id: &str) -> Result<bool, EngineError> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM income_event WHERE venue_income_id = ?")
            .bind(venue_income_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.is_some())
}

pub async fn sum_by_type(pool: &DbPool, income_type: &str) -> Result<Decimal, EngineError> {
    let rows: Vec<IncomeEventRow> =
        sqlx::query_as("SELECT * FROM income_event WHERE income_type = ?")
            .bind(income_type)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|r| r.income).sum())
}

/// Read the cached earliest-timestamp marker, if the rebuild has run at
/// least once. Avoids re-pagination purely to answer "records begin at".
pub async fn get_earliest_ts(pool: &DbPool) -> Result<Option<i64>, EngineError> {
    let row: Option<(Option<i64>,)> =
        sqlx::query_as("SELECT earliest_venue_ts FROM income_cursor WHERE id = 1")
            .fetch_optional(pool)
            .await?;
    Ok(row.and_then(|(v,)| v))
}

/// Read the cursor marking where the last rebuild left off, so a fresh
/// rebuild call resumes forward instead of re-paginating from the beginning.
pub async fn get_last_rebuilt_start_ts(pool: &DbPool) -> Result<Option<i64>, EngineError> {
    let row: Option<(Option<i64>,)> =
        sqlx::query_as("SELECT last_rebuilt_start_ts FROM income_cursor WHERE id = 1")
            .fetch_optional(pool)
            .await?;
    Ok(row.and_then(|(v,)| v))
}

pub async fn update_cursor(
    pool: &DbPool,
    earliest_venue_ts: i64,
    last_rebuilt_start_ts: i64,
) -> Result<(), EngineError> {
    sqlx::query(
        r#"
        INSERT INTO income_cursor (id, earliest_venue_ts, last_rebuilt_start_ts)
        VALUES (1, ?, ?)
        ON CONFLICT (id) DO UPDATE SET
            earliest_venue_ts = MIN(COALESCE(income_cursor.earliest_venue_ts, ?), excluded.earliest_venue_ts),
            last_rebuilt_start_ts = excluded.last_rebuilt_start_ts
        "#,
    )
    .bind(earliest_venue_ts)
    .bind(last_rebuilt_start_ts)
    .bind(earliest_venue_ts)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::connect;

    #[tokio::test]
    async fn insert_or_skip_is_idempotent() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let first = insert_or_skip(
            &pool, "sync-pnl-t1", Some("BTCUSDT"), "REALIZED_PNL",
            Decimal::new(150, 0), 1_000, 1_000,
        ).await.unwrap();
        assert!(first);

        let second = insert_or_skip(
            &pool, "sync-pnl-t1", Some("BTCUSDT"), "REALIZED_PNL",
            Decimal::new(999, 0), 9_999, 9_999,
        ).await.unwrap();
        assert!(!second);

        let sum = sum_by_type(&pool, "REALIZED_PNL").await.unwrap();
        assert_eq!(sum, Decimal::new(150, 0));
    }

    #[tokio::test]
    async fn cursor_tracks_earliest_timestamp() {
        let pool = connect("sqlite::memory:").await.unwrap();
        update_cursor(&pool, 5_000, 5_000).await.unwrap();
        update_cursor(&pool, 1_000, 9_000).await.unwrap();

        let earliest = get_earliest_ts(&pool).await.unwrap();
        assert_eq!(earliest, Some(1_000));
        assert_eq!(get_last_rebuilt_start_ts(&pool).await.unwrap(), Some(9_000));
    }
}
