// Row structs for every table in `migrations/0001_init.sql`. Monetary and
// quantity columns are declared `Decimal` directly — the `rust_decimal`
// sqlx feature encodes/decodes them against SQLite's TEXT affinity, so no
// manual parsing is needed at the call site. All timestamps are epoch-ms
// `i64`, per the Design Notes' "global time zone must never leak into
// decision logic" rule: there is no `chrono::DateTime` anywhere in this
// layer, only UTC epoch-ms.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{FillSide, MarginMode, OrderPurpose, OrderStatus, OrderType, Side};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LiquidationRow {
    pub id: i64,
    pub venue_event_id: String,
    pub symbol: String,
    pub side: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub notional: Decimal,
    pub venue_ts: i64,
    pub ingested_at: i64,
}

impl LiquidationRow {
    pub fn side(&self) -> Side {
        match self.side.as_str() {
            "long" => Side::Long,
            _ => Side::Short,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyParams {
    pub selected_assets: Vec<String>,
    pub percentile_threshold: f64,
    pub max_layers: i64,
    pub position_size_percent: Decimal,
    pub profit_target_percent: Decimal,
    pub stop_loss_percent: Decimal,
    pub use_adaptive_atr: bool,
    pub atr_multiplier: Option<Decimal>,
    pub leverage: i64,
    pub margin_mode: MarginMode,
    pub hedge_mode: bool,
    pub order_type: OrderType,
    pub slippage_tolerance_percent: Decimal,
    pub max_retry_duration_ms: i64,
    pub order_delay_ms: i64,
    pub layer_delay_seconds: i64,
    pub ret_high_threshold: f64,
    pub ret_medium_threshold: f64,
    pub risk_level: i64,
    pub max_portfolio_risk_dollars: Decimal,
    pub max_portfolio_symbols: i64,
    pub cascade_auto_enabled: bool,
    pub paused: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct StrategyRow {
    pub id: i64,
    pub params: StrategyParams,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TradeSessionRow {
    pub id: i64,
    pub strategy_id: i64,
    pub starting_balance: Decimal,
    pub current_balance: Decimal,
    pub running_pnl: Decimal,
    pub trade_count: i64,
    pub is_active: bool,
    pub started_at: i64,
    pub ended_at: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct PositionRow {
    pub id: i64,
    pub session_id: i64,
    pub symbol: String,
    pub side: String,
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
    pub total_cost: Decimal,
    pub leverage: i64,
    pub layers_filled: i64,
    pub max_layers: i64,
    pub reserved_risk_dollars: Decimal,
    pub realized_pnl: Option<Decimal>,
    pub unrealized_pnl: Decimal,
    pub is_open: bool,
    pub opened_at: i64,
    pub closed_at: Option<i64>,
}

impl PositionRow {
    pub fn side(&self) -> Side {
        match self.side.as_str() {
            "long" => Side::Long,
            _ => Side::Short,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderRow {
    pub id: i64,
    pub venue_order_id: String,
    pub session_id: i64,
    pub position_id: Option<i64>,
    pub symbol: String,
    pub side: String,
    pub purpose: String,
    pub order_type: String,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub status: String,
    pub layer_number: Option<i64>,
    pub created_at: i64,
    pub filled_at: Option<i64>,
}

impl OrderRow {
    pub fn status(&self) -> OrderStatus {
        match self.status.as_str() {
            "filled" => OrderStatus::Filled,
            "cancelled" => OrderStatus::Cancelled,
            "rejected" => OrderStatus::Rejected,
            _ => OrderStatus::Pending,
        }
    }

    pub fn purpose(&self) -> OrderPurpose {
        match self.purpose.as_str() {
            "take_profit" => OrderPurpose::TakeProfit,
            "stop_loss" => OrderPurpose::StopLoss,
            "manual_close" => OrderPurpose::ManualClose,
            _ => OrderPurpose::Entry,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FillRow {
    pub id: i64,
    pub venue_trade_id: String,
    pub session_id: i64,
    pub order_id: Option<i64>,
    pub position_id: i64,
    pub symbol: String,
    pub side: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub notional: Decimal,
    pub commission: Decimal,
    pub layer_number: Option<i64>,
    pub filled_at: i64,
}

impl FillRow {
    pub fn side(&self) -> FillSide {
        match self.side.as_str() {
            "buy" => FillSide::Buy,
            _ => FillSide::Sell,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IncomeEventRow {
    pub id: i64,
    pub venue_income_id: String,
    pub symbol: Option<String>,
    pub income_type: String,
    pub income: Decimal,
    pub venue_ts: i64,
    pub imported_at: i64,
}
