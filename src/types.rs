// Shared types used across the counter-liquidation trading engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Balance snapshot for a single asset from the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(default)]
    pub free: rust_decimal::Decimal,
    #[serde(default)]
    pub locked: rust_decimal::Decimal,
}

/// The side of a liquidated position — which direction the venue force-closed.
/// The engine counter-trades the opposite direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// The counter-trade direction for a liquidated side: a liquidated long
    /// produces a short entry, a liquidated short a long entry.
    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// Venue order side to *open* a position on this side.
    pub fn entry_order_side(self) -> &'static str {
        match self {
            Side::Long => "BUY",
            Side::Short => "SELL",
        }
    }

    /// Venue order side to *close* a position on this side. Protective orders
    /// are always reduce-only on this side.
    pub fn exit_order_side(self) -> &'static str {
        match self {
            Side::Long => "SELL",
            Side::Short => "BUY",
        }
    }

    /// Invert a venue-reported offsetting order side into the liquidated
    /// side: a venue SELL liquidated a long, a venue BUY liquidated a short.
    pub fn from_offsetting_order_side(venue_side: &str) -> Option<Side> {
        match venue_side.to_ascii_uppercase().as_str() {
            "SELL" => Some(Side::Long),
            "BUY" => Some(Side::Short),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// Fill side as reported against an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillSide {
    Buy,
    Sell,
}

impl fmt::Display for FillSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillSide::Buy => write!(f, "buy"),
            FillSide::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "market"),
            OrderType::Limit => write!(f, "limit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginMode {
    Isolated,
    Cross,
}

impl fmt::Display for MarginMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarginMode::Isolated => write!(f, "isolated"),
            MarginMode::Cross => write!(f, "cross"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    Rejected,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::Filled => write!(f, "filled"),
            OrderStatus::Cancelled => write!(f, "cancelled"),
            OrderStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// What an order is *for* within the engine's own bookkeeping — distinct
/// from the venue's order type (market/limit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPurpose {
    Entry,
    TakeProfit,
    StopLoss,
    /// Operator-initiated close via the control surface (§6), distinct from
    /// the automatic TP/SL pair so reconciliation never treats one as stale
    /// cover for the other.
    ManualClose,
}

impl fmt::Display for OrderPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderPurpose::Entry => write!(f, "entry"),
            OrderPurpose::TakeProfit => write!(f, "take_profit"),
            OrderPurpose::StopLoss => write!(f, "stop_loss"),
            OrderPurpose::ManualClose => write!(f, "manual_close"),
        }
    }
}

/// Process-level safety state (distinct from a per-`Strategy` `paused` flag).
/// Mirrors the teacher's "start in the safest mode" convention in
/// `runtime_config::RuntimeConfig` (forced `Demo`+`Paused` on first boot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineMode {
    Running,
    Killed,
}

impl Default for EngineMode {
    fn default() -> Self {
        Self::Killed
    }
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineMode::Running => write!(f, "running"),
            EngineMode::Killed => write!(f, "killed"),
        }
    }
}

/// Cascade traffic light (§4.2), ordered so `>=` comparisons read naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeLight {
    Green,
    Yellow,
    Orange,
    Red,
}

impl fmt::Display for CascadeLight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CascadeLight::Green => write!(f, "green"),
            CascadeLight::Yellow => write!(f, "yellow"),
            CascadeLight::Orange => write!(f, "orange"),
            CascadeLight::Red => write!(f, "red"),
        }
    }
}

impl CascadeLight {
    /// `true` when this light, combined with `auto_enabled`, should block
    /// new entries for the symbol (§4.2: light ∈ {orange, red} ∧ autoBlock).
    pub fn blocks_entries(self) -> bool {
        matches!(self, CascadeLight::Orange | CascadeLight::Red)
    }

    /// One level down (de-escalation never skips a level, per §4.2's
    /// hysteresis rule). Green has no lower level.
    pub fn step_down(self) -> CascadeLight {
        match self {
            CascadeLight::Red => CascadeLight::Orange,
            CascadeLight::Orange => CascadeLight::Yellow,
            CascadeLight::Yellow => CascadeLight::Green,
            CascadeLight::Green => CascadeLight::Green,
        }
    }
}

/// Quality-of-reversal informational bucket (§4.2). Never gates a decision,
/// logged alongside the decision envelope for later review only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReversalQuality {
    Poor,
    Ok,
    Good,
    Excellent,
}

impl fmt::Display for ReversalQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReversalQuality::Poor => write!(f, "poor"),
            ReversalQuality::Ok => write!(f, "ok"),
            ReversalQuality::Good => write!(f, "good"),
            ReversalQuality::Excellent => write!(f, "excellent"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_opposite_is_involution() {
        assert_eq!(Side::Long.opposite(), Side::Short);
        assert_eq!(Side::Short.opposite(), Side::Long);
        assert_eq!(Side::Long.opposite().opposite(), Side::Long);
    }

    #[test]
    fn offsetting_order_side_inverts_correctly() {
        assert_eq!(Side::from_offsetting_order_side("SELL"), Some(Side::Long));
        assert_eq!(Side::from_offsetting_order_side("buy"), Some(Side::Short));
        assert_eq!(Side::from_offsetting_order_side("GARBAGE"), None);
    }

    #[test]
    fn cascade_light_ordering_and_blocking() {
        assert!(CascadeLight::Red > CascadeLight::Green);
        assert!(!CascadeLight::Green.blocks_entries());
        assert!(!CascadeLight::Yellow.blocks_entries());
        assert!(CascadeLight::Orange.blocks_entries());
        assert!(CascadeLight::Red.blocks_entries());
    }
}
