// Ambient engine configuration — bind address, tick intervals, retention
// window, venue credentials, database URL. Read from the process environment
// with defaults, following the teacher's `runtime_config` defaulting style
// (`default_*()` helper functions paired with `#[serde(default = "...")]`),
// adapted from a hot-reloadable JSON file to env-at-boot since these values
// are process-lifetime constants, not something an operator edits live.
//
// The *trading* `Strategy` entity (symbols, sizing, cascade thresholds) is
// NOT part of this struct — it is a durable, audited, DB-backed entity (§3),
// loaded/edited through `db::strategy` and the operator API instead.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_cascade_tick_ms() -> u64 {
    1_000
}

fn default_exit_monitor_tick_ms() -> u64 {
    2_000
}

fn default_reconcile_tick_ms() -> u64 {
    60_000
}

fn default_orphan_sweep_tick_ms() -> u64 {
    30_000
}

fn default_retention_sweep_tick_ms() -> u64 {
    3_600_000
}

fn default_dedup_window_secs() -> i64 {
    3_600
}

fn default_event_lock_grace_ms() -> u64 {
    500
}

fn default_income_page_size() -> u32 {
    1_000
}

fn default_recv_window_ms() -> u64 {
    5_000
}

fn default_rate_limit_buffer_pct() -> f64 {
    20.0
}

/// Process-lifetime tunables for the engine's own background machinery.
/// Everything here is a `Duration`/count, never a trading parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Address the operator API binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// How often the cascade detector recomputes traffic lights per symbol.
    #[serde(default = "default_cascade_tick_ms")]
    pub cascade_tick_ms: u64,

    /// How often the exit monitor recomputes unrealized P&L for open
    /// positions. Never closes a position — see §9 Open Question 3.
    #[serde(default = "default_exit_monitor_tick_ms")]
    pub exit_monitor_tick_ms: u64,

    /// How often account/position reconciliation against the venue runs.
    #[serde(default = "default_reconcile_tick_ms")]
    pub reconcile_tick_ms: u64,

    /// How often the orphan-position sweep runs.
    #[serde(default = "default_orphan_sweep_tick_ms")]
    pub orphan_sweep_tick_ms: u64,

    /// How often stale dedup/lock entries are reclaimed.
    #[serde(default = "default_retention_sweep_tick_ms")]
    pub retention_sweep_tick_ms: u64,

    /// How long a liquidation event id is remembered in the in-memory dedup
    /// map before it is eligible for eviction.
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: i64,

    /// Grace period a per-event-id lock is held after processing completes,
    /// to absorb near-simultaneous re-deliveries from the stream.
    #[serde(default = "default_event_lock_grace_ms")]
    pub event_lock_grace_ms: u64,

    /// Page size used when paginating the income endpoint during historical
    /// P&L rebuild.
    #[serde(default = "default_income_page_size")]
    pub income_page_size: u32,

    /// `recvWindow` attached to every signed request.
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,

    /// Fraction of the venue's rate-limit weight budget to hold in reserve.
    #[serde(default = "default_rate_limit_buffer_pct")]
    pub rate_limit_buffer_pct: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            cascade_tick_ms: default_cascade_tick_ms(),
            exit_monitor_tick_ms: default_exit_monitor_tick_ms(),
            reconcile_tick_ms: default_reconcile_tick_ms(),
            orphan_sweep_tick_ms: default_orphan_sweep_tick_ms(),
            retention_sweep_tick_ms: default_retention_sweep_tick_ms(),
            dedup_window_secs: default_dedup_window_secs(),
            event_lock_grace_ms: default_event_lock_grace_ms(),
            income_page_size: default_income_page_size(),
            recv_window_ms: default_recv_window_ms(),
            rate_limit_buffer_pct: default_rate_limit_buffer_pct(),
        }
    }
}

impl EngineConfig {
    /// Build from the process environment, falling back to defaults for any
    /// var that is unset or fails to parse.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("RIPTIDE_BIND_ADDR") {
            cfg.bind_addr = v;
        }
        if let Some(v) = parse_env_u64("RIPTIDE_CASCADE_TICK_MS") {
            cfg.cascade_tick_ms = v;
        }
        if let Some(v) = parse_env_u64("RIPTIDE_EXIT_MONITOR_TICK_MS") {
            cfg.exit_monitor_tick_ms = v;
        }
        if let Some(v) = parse_env_u64("RIPTIDE_RECONCILE_TICK_MS") {
            cfg.reconcile_tick_ms = v;
        }
        if let Some(v) = parse_env_u64("RIPTIDE_ORPHAN_SWEEP_TICK_MS") {
            cfg.orphan_sweep_tick_ms = v;
        }
        if let Some(v) = parse_env_u64("RIPTIDE_RETENTION_SWEEP_TICK_MS") {
            cfg.retention_sweep_tick_ms = v;
        }
        if let Some(v) = env::var("RIPTIDE_DEDUP_WINDOW_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            cfg.dedup_window_secs = v;
        }
        if let Some(v) = parse_env_u64("RIPTIDE_EVENT_LOCK_GRACE_MS") {
            cfg.event_lock_grace_ms = v;
        }
        if let Some(v) = env::var("RIPTIDE_INCOME_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            cfg.income_page_size = v;
        }
        if let Some(v) = parse_env_u64("RIPTIDE_RECV_WINDOW_MS") {
            cfg.recv_window_ms = v;
        }
        if let Some(v) = env::var("RIPTIDE_RATE_LIMIT_BUFFER_PCT")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            cfg.rate_limit_buffer_pct = v;
        }

        cfg
    }

    pub fn cascade_tick(&self) -> Duration {
        Duration::from_millis(self.cascade_tick_ms)
    }

    pub fn exit_monitor_tick(&self) -> Duration {
        Duration::from_millis(self.exit_monitor_tick_ms)
    }

    pub fn reconcile_tick(&self) -> Duration {
        Duration::from_millis(self.reconcile_tick_ms)
    }

    pub fn orphan_sweep_tick(&self) -> Duration {
        Duration::from_millis(self.orphan_sweep_tick_ms)
    }

    pub fn retention_sweep_tick(&self) -> Duration {
        Duration::from_millis(self.retention_sweep_tick_ms)
    }
}

fn parse_env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Venue credentials and database location — required, no sensible default,
/// so these fail loudly at boot rather than silently running against nothing.
#[derive(Clone)]
pub struct VenueConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub ws_base_url: String,
    pub database_url: String,
    /// Shared secret compared in constant time against the admin bearer
    /// token and (separately) the emergency-stop PIN.
    pub admin_token: String,
    pub emergency_stop_pin: String,
}

impl VenueConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_key: env::var("RIPTIDE_API_KEY").context("RIPTIDE_API_KEY not set")?,
            api_secret: env::var("RIPTIDE_API_SECRET").context("RIPTIDE_API_SECRET not set")?,
            base_url: env::var("RIPTIDE_BASE_URL")
                .unwrap_or_else(|_| "https://fapi.binance.com".to_string()),
            ws_base_url: env::var("RIPTIDE_WS_BASE_URL")
                .unwrap_or_else(|_| "wss://fstream.binance.com".to_string()),
            database_url: env::var("RIPTIDE_DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://riptide.db".to_string()),
            admin_token: env::var("RIPTIDE_ADMIN_TOKEN")
                .context("RIPTIDE_ADMIN_TOKEN not set")?,
            emergency_stop_pin: env::var("RIPTIDE_EMERGENCY_STOP_PIN")
                .context("RIPTIDE_EMERGENCY_STOP_PIN not set")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.cascade_tick_ms, 1_000);
        assert_eq!(cfg.income_page_size, 1_000);
        assert!((cfg.rate_limit_buffer_pct - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.reconcile_tick_ms, 60_000);
        assert_eq!(cfg.event_lock_grace_ms, 500);
    }

    #[test]
    fn env_override_takes_precedence() {
        env::set_var("RIPTIDE_CASCADE_TICK_MS", "2500");
        let cfg = EngineConfig::from_env();
        assert_eq!(cfg.cascade_tick_ms, 2500);
        env::remove_var("RIPTIDE_CASCADE_TICK_MS");
    }
}
