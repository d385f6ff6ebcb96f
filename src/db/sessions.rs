// Trade sessions: one active session per strategy, archived never deleted.

use rust_decimal::Decimal;

use crate::db::models::TradeSessionRow;
use crate::db::DbPool;
use crate::error::EngineError;

pub async fn start(
    pool: &DbPool,
    strategy_id: i64,
    starting_balance: Decimal,
    now_ms: i64,
) -> Result<TradeSessionRow, EngineError> {
    let id = sqlx::query(
        "INSERT INTO trade_session (strategy_id, starting_balance, current_balance, running_pnl, \
         trade_count, is_active, started_at) VALUES (?, ?, ?, '0', 0, 1, ?)",
    )
    .bind(strategy_id)
    .bind(starting_balance)
    .bind(starting_balance)
    .bind(now_ms)
    .execute(pool)
    .await?
    .last_insert_rowid();

    get(pool, id).await
}

pub async fn get(pool: &DbPool, id: i64) -> Result<TradeSessionRow, EngineError> {
    sqlx::query_as::<_, TradeSessionRow>("SELECT * FROM trade_session WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(EngineError::from)
}

pub async fn get_active(pool: &DbPool, strategy_id: i64) -> Result<Option<TradeSessionRow>, EngineError> {
    sqlx::query_as::<_, TradeSessionRow>(
        "SELECT * FROM trade_session WHERE strategy_id = ? AND is_active = 1 ORDER BY id DESC LIMIT 1",
    )
    .bind(strategy_id)
    .fetch_optional(pool)
    .await
    .map_err(EngineError::from)
}

/// Archive the current session (is_active=false, ended_at=now) and start a
/// fresh one. Per §6: "never deletes history".
pub async fn start_new_session(
    pool: &DbPool,
    strategy_id: i64,
    starting_balance: Decimal,
    now_ms: i64,
) -> Result<TradeSessionRow, EngineError> {
    if let Some(active) = get_active(pool, strategy_id).await? {
        end(pool, active.id, now_ms).await?;
    }
    start(pool, strategy_id, starting_balance, now_ms).await
}

pub async fn end(pool: &DbPool, id: i64, now_ms: i64) -> Result<(), EngineError> {
    sqlx::query("UPDATE trade_session SET is_active = 0, ended_at = ? WHERE id = ?")
        .bind(now_ms)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn record_trade(
    pool: &DbPool,
    id: i64,
    balance_delta: Decimal,
    pnl_delta: Decimal,
) -> Result<(), EngineError> {
    sqlx::query(
        "UPDATE trade_session SET current_balance = current_balance + ?, \
         running_pnl = running_pnl + ?, trade_count = trade_count + 1 WHERE id = ?",
    )
    .bind(balance_delta)
    .bind(pnl_delta)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::connect;
    use crate::db::strategy;
    use crate::db::strategy::test_support::sample_params;

    #[tokio::test]
    async fn start_new_session_archives_previous() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let strat = strategy::create(&pool, &sample_params(), 1_000).await.unwrap();

        let s1 = start(&pool, strat.id, Decimal::new(10_000, 0), 1_000).await.unwrap();
        let s2 = start_new_session(&pool, strat.id, Decimal::new(10_000, 0), 2_000)
            .await
            .unwrap();

        assert_ne!(s1.id, s2.id);
        let s1_after = get(&pool, s1.id).await.unwrap();
        assert!(!s1_after.is_active);
        assert_eq!(s1_after.ended_at, Some(2_000));
        assert!(s2.is_active);
    }
}
