// Typed error taxonomy (spec §7). Subsystems return `EngineError`; task-loop
// boundaries convert to `anyhow::Result` via `.context(...)`, matching the
// teacher's use of `anyhow` around exchange/database calls.

use thiserror::Error;

/// The five-way classification from §7. Each arm carries exactly what its
/// handling policy needs — nothing more.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Retry with backoff: network blips, exchange 5xx, rate-limit back-pressure.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Not retryable. Logged to `trade_entry_error` and surfaced to the
    /// operator; the triggering decision is abandoned.
    #[error("permanent failure for {symbol} {side}: {reason}")]
    Permanent {
        reason: String,
        symbol: String,
        side: String,
        payload: String,
    },

    /// A uniqueness constraint (liquidation event id, fill trade id) was hit.
    /// Not an error in the operational sense — the caller should treat this
    /// as "already applied" and continue.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// A gate in the ordered chain rejected the decision. Carries the gate's
    /// block reason verbatim for the decision log.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// An internal invariant was violated (e.g. applying a fill to a position
    /// that does not exist, or a negative reserved-risk result). These
    /// indicate a bug, not an environmental condition, and are logged at
    /// `error!` rather than `warn!`.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl EngineError {
    pub fn permanent(
        reason: impl Into<String>,
        symbol: impl Into<String>,
        side: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self::Permanent {
            reason: reason.into(),
            symbol: symbol.into(),
            side: side.into(),
            payload: payload.into(),
        }
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn duplicate(msg: impl Into<String>) -> Self {
        Self::Duplicate(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    /// Whether a task loop should retry the operation that produced this
    /// error, as opposed to logging and moving on.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }
}

/// Maps a `reqwest` transport/status error onto the taxonomy. Exchange calls
/// that return a 5xx or time out are transient; 4xx (bad request, rejected
/// order) are permanent since retrying with the same payload will not help.
impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return EngineError::Transient(err.to_string());
        }
        match err.status() {
            Some(status) if status.is_server_error() => EngineError::Transient(err.to_string()),
            _ => EngineError::Permanent {
                reason: err.to_string(),
                symbol: String::new(),
                side: String::new(),
                payload: String::new(),
            },
        }
    }
}

/// A uniqueness-constraint violation from `sqlx` is routed to `Duplicate`;
/// every other database error is transient (pool exhaustion, lock timeout,
/// disk I/O) since it is almost always environmental, not a bad payload.
impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return EngineError::Duplicate(db_err.message().to_string());
            }
        }
        EngineError::Transient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(EngineError::transient("timeout").is_retryable());
        assert!(!EngineError::duplicate("dup").is_retryable());
        assert!(!EngineError::precondition("blocked").is_retryable());
        assert!(!EngineError::invariant("bug").is_retryable());
        assert!(!EngineError::permanent("bad", "BTCUSDT", "long", "{}").is_retryable());
    }
}
