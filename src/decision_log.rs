// Auditable record of one liquidation-triggered decision, replacing the
// teacher's `DecisionEnvelope` with one tailored to the six-gate chain of
// §4.3 instead of the teacher's four-layer signal pipeline. Timestamps are
// epoch-ms, not an RFC3339 string, per the engine-wide UTC-epoch-ms rule.

use serde::Serialize;
use uuid::Uuid;

const PENDING: &str = "pending";
const PASS: &str = "pass";

#[derive(Debug, Clone, Serialize)]
pub struct DecisionLog {
    pub id: String,
    pub symbol: String,
    pub side: String,
    pub pause_gate: String,
    pub cascade_gate: String,
    pub max_layers_gate: String,
    pub cooldown_gate: String,
    pub percentile_gate: String,
    pub portfolio_gate: String,
    pub risk_budget_gate: String,
    pub final_decision: String,
    pub blocking_gate: Option<String>,
    pub reason: Option<String>,
    pub created_at_ms: i64,
}

impl DecisionLog {
    pub fn new(symbol: impl Into<String>, side: impl Into<String>, created_at_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side: side.into(),
            pause_gate: PENDING.to_string(),
            cascade_gate: PENDING.to_string(),
            max_layers_gate: PENDING.to_string(),
            cooldown_gate: PENDING.to_string(),
            percentile_gate: PENDING.to_string(),
            portfolio_gate: PENDING.to_string(),
            risk_budget_gate: PENDING.to_string(),
            final_decision: PENDING.to_string(),
            blocking_gate: None,
            reason: None,
            created_at_ms,
        }
    }

    fn field_mut(&mut self, gate: &str) -> Option<&mut String> {
        match gate {
            "pause" => Some(&mut self.pause_gate),
            "cascade" => Some(&mut self.cascade_gate),
            "max_layers" => Some(&mut self.max_layers_gate),
            "cooldown" => Some(&mut self.cooldown_gate),
            "percentile" => Some(&mut self.percentile_gate),
            "portfolio" => Some(&mut self.portfolio_gate),
            "risk_budget" => Some(&mut self.risk_budget_gate),
            _ => None,
        }
    }

    pub fn record_pass(&mut self, gate: &str) {
        if let Some(field) = self.field_mut(gate) {
            *field = PASS.to_string();
        }
    }

    /// Mark `gate` as the blocking gate and finalize the decision as blocked.
    /// Subsequent gates are left `pending` since they never ran.
    pub fn record_block(&mut self, gate: &str, reason: impl Into<String>) {
        let reason = reason.into();
        if let Some(field) = self.field_mut(gate) {
            *field = format!("block: {reason}");
        }
        self.blocking_gate = Some(gate.to_string());
        self.reason = Some(reason);
        self.final_decision = "blocked".to_string();
    }

    pub fn record_qualified(&mut self, plan: &str) {
        self.final_decision = plan.to_string();
    }

    pub fn is_blocked(&self) -> bool {
        self.final_decision == "blocked"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_log_has_all_gates_pending() {
        let log = DecisionLog::new("BTCUSDT", "short", 1_000);
        assert_eq!(log.pause_gate, "pending");
        assert_eq!(log.final_decision, "pending");
    }

    #[test]
    fn record_block_stops_at_first_failure() {
        let mut log = DecisionLog::new("BTCUSDT", "short", 1_000);
        log.record_pass("pause");
        log.record_pass("cascade");
        log.record_block("cooldown", "cooldown active");
        assert!(log.is_blocked());
        assert_eq!(log.blocking_gate.as_deref(), Some("cooldown"));
        assert_eq!(log.percentile_gate, "pending");
    }
}
