// The one mutable `Strategy` configuration entity, plus its audit log.
// Unlike the teacher's `RuntimeConfig` (a hot-reloadable JSON file), this is
// a database-backed entity per SPEC_FULL.md §2: it is explicit, operator-
// created, never auto-created, and every change is recorded.

use rust_decimal::Decimal;
use sqlx::Row;

use crate::db::models::{StrategyParams, StrategyRow};
use crate::db::DbPool;
use crate::error::EngineError;

fn row_from_sqlx(row: &sqlx::sqlite::SqliteRow) -> Result<StrategyRow, EngineError> {
    let selected_assets: String = row.try_get("selected_assets")?;
    let selected_assets: Vec<String> = serde_json::from_str(&selected_assets)
        .map_err(|e| EngineError::invariant(format!("corrupt selected_assets JSON: {e}")))?;
    let margin_mode_str: String = row.try_get("margin_mode")?;
    let order_type_str: String = row.try_get("order_type")?;

    let margin_mode = match margin_mode_str.as_str() {
        "cross" => crate::types::MarginMode::Cross,
        _ => crate::types::MarginMode::Isolated,
    };
    let order_type = match order_type_str.as_str() {
        "limit" => crate::types::OrderType::Limit,
        _ => crate::types::OrderType::Market,
    };

    Ok(StrategyRow {
        id: row.try_get("id")?,
        params: StrategyParams {
            selected_assets,
            percentile_threshold: row.try_get("percentile_threshold")?,
            max_layers: row.try_get("max_layers")?,
            position_size_percent: row.try_get("position_size_percent")?,
            profit_target_percent: row.try_get("profit_target_percent")?,
            stop_loss_percent: row.try_get("stop_loss_percent")?,
            use_adaptive_atr: row.try_get::<i64, _>("use_adaptive_atr")? != 0,
            atr_multiplier: row.try_get("atr_multiplier")?,
            leverage: row.try_get("leverage")?,
            margin_mode,
            hedge_mode: row.try_get::<i64, _>("hedge_mode")? != 0,
            order_type,
            slippage_tolerance_percent: row.try_get("slippage_tolerance_percent")?,
            max_retry_duration_ms: row.try_get("max_retry_duration_ms")?,
            order_delay_ms: row.try_get("order_delay_ms")?,
            layer_delay_seconds: row.try_get("layer_delay_seconds")?,
            ret_high_threshold: row.try_get("ret_high_threshold")?,
            ret_medium_threshold: row.try_get("ret_medium_threshold")?,
            risk_level: row.try_get("risk_level")?,
            max_portfolio_risk_dollars: row.try_get("max_portfolio_risk_dollars")?,
            max_portfolio_symbols: row.try_get("max_portfolio_symbols")?,
            cascade_auto_enabled: row.try_get::<i64, _>("cascade_auto_enabled")? != 0,
            paused: row.try_get::<i64, _>("paused")? != 0,
            is_active: row.try_get::<i64, _>("is_active")? != 0,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn create(
    pool: &DbPool,
    params: &StrategyParams,
    now_ms: i64,
) -> Result<StrategyRow, EngineError> {
    let selected_assets_json = serde_json::to_string(&params.selected_assets)
        .map_err(|e| EngineError::invariant(format!("failed to serialize selected_assets: {e}")))?;

    let id = sqlx::query(
        r#"
        INSERT INTO strategy (
            selected_assets, percentile_threshold, max_layers, position_size_percent,
            profit_target_percent, stop_loss_percent, use_adaptive_atr, atr_multiplier,
            leverage, margin_mode, hedge_mode, order_type, slippage_tolerance_percent,
            max_retry_duration_ms, order_delay_ms, layer_delay_seconds, ret_high_threshold,
            ret_medium_threshold, risk_level, max_portfolio_risk_dollars, max_portfolio_symbols,
            cascade_auto_enabled, paused, is_active, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(selected_assets_json)
    .bind(params.percentile_threshold)
    .bind(params.max_layers)
    .bind(params.position_size_percent)
    .bind(params.profit_target_percent)
    .bind(params.stop_loss_percent)
    .bind(params.use_adaptive_atr as i64)
    .bind(params.atr_multiplier)
    .bind(params.leverage)
    .bind(params.margin_mode.to_string())
    .bind(params.hedge_mode as i64)
    .bind(params.order_type.to_string())
    .bind(params.slippage_tolerance_percent)
    .bind(params.max_retry_duration_ms)
    .bind(params.order_delay_ms)
    .bind(params.layer_delay_seconds)
    .bind(params.ret_high_threshold)
    .bind(params.ret_medium_threshold)
    .bind(params.risk_level)
    .bind(params.max_portfolio_risk_dollars)
    .bind(params.max_portfolio_symbols)
    .bind(params.cascade_auto_enabled as i64)
    .bind(params.paused as i64)
    .bind(params.is_active as i64)
    .bind(now_ms)
    .bind(now_ms)
    .execute(pool)
    .await?
    .last_insert_rowid();

    get(pool, id).await
}

pub async fn get(pool: &DbPool, id: i64) -> Result<StrategyRow, EngineError> {
    let row = sqlx::query("SELECT * FROM strategy WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    row_from_sqlx(&row)
}

pub async fn get_active(pool: &DbPool) -> Result<Option<StrategyRow>, EngineError> {
    let row = sqlx::query("SELECT * FROM strategy WHERE is_active = 1 ORDER BY id DESC LIMIT 1")
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_from_sqlx).transpose()
}

/// Replace the mutable fields of a strategy and write an audit entry
/// capturing the before/after JSON snapshot (§3 "Strategy change").
pub async fn update(
    pool: &DbPool,
    id: i64,
    new_params: &StrategyParams,
    session_id: Option<i64>,
    now_ms: i64,
) -> Result<StrategyRow, EngineError> {
    let before = get(pool, id).await?;
    let before_json = serde_json::to_string(&before.params)
        .map_err(|e| EngineError::invariant(format!("failed to snapshot strategy: {e}")))?;
    let after_json = serde_json::to_string(new_params)
        .map_err(|e| EngineError::invariant(format!("failed to snapshot strategy: {e}")))?;

    let selected_assets_json = serde_json::to_string(&new_params.selected_assets)
        .map_err(|e| EngineError::invariant(format!("failed to serialize selected_assets: {e}")))?;

    sqlx::query(
        r#"
        UPDATE strategy SET
            selected_assets = ?, percentile_threshold = ?, max_layers = ?,
            position_size_percent = ?, profit_target_percent = ?, stop_loss_percent = ?,
            use_adaptive_atr = ?, atr_multiplier = ?, leverage = ?, margin_mode = ?,
            hedge_mode = ?, order_type = ?, slippage_tolerance_percent = ?,
            max_retry_duration_ms = ?, order_delay_ms = ?, layer_delay_seconds = ?,
            ret_high_threshold = ?, ret_medium_threshold = ?, risk_level = ?,
            max_portfolio_risk_dollars = ?, max_portfolio_symbols = ?,
            cascade_auto_enabled = ?, paused = ?, is_active = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(selected_assets_json)
    .bind(new_params.percentile_threshold)
    .bind(new_params.max_layers)
    .bind(new_params.position_size_percent)
    .bind(new_params.profit_target_percent)
    .bind(new_params.stop_loss_percent)
    .bind(new_params.use_adaptive_atr as i64)
    .bind(new_params.atr_multiplier)
    .bind(new_params.leverage)
    .bind(new_params.margin_mode.to_string())
    .bind(new_params.hedge_mode as i64)
    .bind(new_params.order_type.to_string())
    .bind(new_params.slippage_tolerance_percent)
    .bind(new_params.max_retry_duration_ms)
    .bind(new_params.order_delay_ms)
    .bind(new_params.layer_delay_seconds)
    .bind(new_params.ret_high_threshold)
    .bind(new_params.ret_medium_threshold)
    .bind(new_params.risk_level)
    .bind(new_params.max_portfolio_risk_dollars)
    .bind(new_params.max_portfolio_symbols)
    .bind(new_params.cascade_auto_enabled as i64)
    .bind(new_params.paused as i64)
    .bind(new_params.is_active as i64)
    .bind(now_ms)
    .bind(id)
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO strategy_changes (strategy_id, session_id, before_json, after_json, changed_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(session_id)
    .bind(before_json)
    .bind(after_json)
    .bind(now_ms)
    .execute(pool)
    .await?;

    get(pool, id).await
}

pub async fn delete(pool: &DbPool, id: i64) -> Result<(), EngineError> {
    sqlx::query("DELETE FROM strategy WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[allow(dead_code)]
fn unused_decimal_hint(_: Decimal) {}

/// Shared sample `StrategyParams` builder, reused by other modules' tests
/// (position manager, sessions) that need a strategy row to hang fixtures
/// off of.
#[cfg(test)]
pub mod test_support {
    use super::StrategyParams;
    use crate::types::{MarginMode, OrderType};
    use rust_decimal::Decimal;

    pub fn sample_params() -> StrategyParams {
        StrategyParams {
            selected_assets: vec!["BTCUSDT".into(), "ETHUSDT".into()],
            percentile_threshold: 90.0,
            max_layers: 3,
            position_size_percent: Decimal::new(10, 0),
            profit_target_percent: Decimal::new(2, 0),
            stop_loss_percent: Decimal::new(2, 0),
            use_adaptive_atr: false,
            atr_multiplier: None,
            leverage: 5,
            margin_mode: MarginMode::Isolated,
            hedge_mode: true,
            order_type: OrderType::Market,
            slippage_tolerance_percent: Decimal::new(5, 1),
            max_retry_duration_ms: 10_000,
            order_delay_ms: 0,
            layer_delay_seconds: 120,
            ret_high_threshold: 35.0,
            ret_medium_threshold: 25.0,
            risk_level: 3,
            max_portfolio_risk_dollars: Decimal::new(500, 0),
            max_portfolio_symbols: 5,
            cascade_auto_enabled: true,
            paused: true,
            is_active: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::connect;
    use test_support::sample_params;

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let created = create(&pool, &sample_params(), 1_000).await.unwrap();
        let fetched = get(&pool, created.id).await.unwrap();
        assert_eq!(fetched.params.selected_assets, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(fetched.params.max_layers, 3);
        assert!(fetched.params.paused);
    }

    #[tokio::test]
    async fn update_writes_audit_entry() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let created = create(&pool, &sample_params(), 1_000).await.unwrap();

        let mut changed = sample_params();
        changed.stop_loss_percent = Decimal::new(10, 0);
        update(&pool, created.id, &changed, None, 2_000).await.unwrap();

        let count: i64 = sqlx::query("SELECT COUNT(*) AS c FROM strategy_changes")
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("c");
        assert_eq!(count, 1);

        let fetched = get(&pool, created.id).await.unwrap();
        assert_eq!(fetched.params.stop_loss_percent, Decimal::new(10, 0));
    }
}
