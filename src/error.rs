use thiserror::Error;

/// Reasons the risk manager declines a prospective entry. Entries are
/// reported and simply do not occur; nothing here halts the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskRejection {
    #[error("notional {notional:.2} below minimum trade size {minimum:.2}")]
    BelowMinimumNotional { notional: f64, minimum: f64 },
    #[error("entry price must be positive (got {0})")]
    NonPositivePrice(f64),
    #[error("ATR must be positive and finite (got {0})")]
    InvalidAtr(f64),
    #[error("circuit breaker active: {0}")]
    CircuitBreaker(BreakerReason),
    #[error("signal action is not an entry")]
    NotAnEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BreakerReason {
    #[error("daily loss limit exceeded")]
    DailyLoss,
    #[error("consecutive loss limit exceeded")]
    ConsecutiveLosses,
    #[error("external feed or connectivity failure")]
    External,
}

/// Reasons the portfolio manager declines an entry request. Rejections
/// are reported, never silently downsized.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AllocationRejection {
    #[error("strategy '{0}' has no allocation")]
    UnknownStrategy(String),
    #[error("position cap reached ({open}/{max})")]
    PositionCapReached { open: u32, max: u32 },
    #[error("requested notional {requested:.2} exceeds allocation headroom {available:.2}")]
    AllocationExceeded { requested: f64, available: f64 },
    #[error("rebalance refused while positions are open for '{0}'")]
    RebalanceWhileOpen(String),
}

/// Fatal errors for a single replay request. No partial result is
/// published when one of these is raised.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReplayError {
    #[error("no candles in the requested range")]
    EmptyRange,
    #[error("replay cancelled")]
    Cancelled,
    #[error("malformed backtest response field: {0}")]
    MalformedValue(String),
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("data gap for {symbol}: {detail}")]
    DataGap { symbol: String, detail: String },
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("risk rejected: {0}")]
    RiskRejected(#[from] RiskRejection),
    #[error("allocation rejected: {0}")]
    AllocationRejected(#[from] AllocationRejection),
    #[error("replay error: {0}")]
    Replay(#[from] ReplayError),
}

impl CoreError {
    pub fn configuration(detail: impl Into<String>) -> Self {
        CoreError::Configuration(detail.into())
    }

    pub fn data_gap(symbol: impl Into<String>, detail: impl Into<String>) -> Self {
        CoreError::DataGap {
            symbol: symbol.into(),
            detail: detail.into(),
        }
    }

    /// Recoverable per-symbol errors are isolated to that symbol's
    /// evaluation cycle; everything else is fatal to the request.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::DataGap { .. } | CoreError::InsufficientData(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverability_split_matches_propagation_policy() {
        assert!(CoreError::data_gap("BTCUSDT", "out of order").is_recoverable());
        assert!(CoreError::InsufficientData("rsi(14)".to_string()).is_recoverable());
        assert!(!CoreError::configuration("bad period").is_recoverable());
        assert!(!CoreError::Replay(ReplayError::EmptyRange).is_recoverable());
    }

    #[test]
    fn rejection_messages_carry_context() {
        let rejection = RiskRejection::BelowMinimumNotional {
            notional: 5.0,
            minimum: 10.0,
        };
        let text = rejection.to_string();
        assert!(text.contains("5.00"));
        assert!(text.contains("10.00"));
    }
}
