//! Engine error taxonomy.
//!
//! Pure computation errors (`Validation`, `MalformedAccount`) and
//! state-machine violations are typed values. Remote failures from the
//! ledger or the submitter are carried as `Remote` with the original
//! message text untouched, so callers can make their own retry decision.

use thiserror::Error;

/// Every failure the engine can surface across its public boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Input rejected before any computation or encoding.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Account absent on the ledger.
    #[error("account not found: {0}")]
    NotFound(String),

    /// Market creation collided with an existing account.
    ///
    /// The orchestrator absorbs this; it never reaches an end user.
    #[error("market already exists at {0}")]
    AlreadyExists(String),

    /// Mutating operation attempted on a market that is not Open.
    #[error("market {0} is not open for trading")]
    MarketClosed(u64),

    /// Illegal market state transition (resolve twice, claim before resolve).
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Decoding would read past the buffer or found an impossible value.
    #[error("malformed account: {0}")]
    MalformedAccount(String),

    /// The snapshot a trade was prepared from no longer describes an Open market.
    #[error("stale quote: {0}")]
    StaleQuote(String),

    /// Claim against a losing side or an empty position.
    #[error("claim rejected: {0}")]
    ClaimRejected(String),

    /// Remote rejection or transport failure, message kept verbatim.
    #[error("{0}")]
    Remote(String),

    /// Confirmation was not observed within the caller's window.
    #[error("timed out after {0} ms waiting for confirmation")]
    Timeout(u64),
}

impl EngineError {
    /// Whether this error means "the account does not exist yet".
    ///
    /// A buffer too short to be real is indistinguishable from an absent
    /// account, so both map to the same caller behaviour.
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::MalformedAccount(_))
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::AlreadyExists(_) => "already_exists",
            Self::MarketClosed(_) => "market_closed",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::MalformedAccount(_) => "malformed_account",
            Self::StaleQuote(_) => "stale_quote",
            Self::ClaimRejected(_) => "claim_rejected",
            Self::Remote(_) => "remote",
            Self::Timeout(_) => "timeout",
        }
    }

    pub(crate) fn remote(err: &anyhow::Error) -> Self {
        Self::Remote(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_covers_not_found_and_malformed() {
        assert!(EngineError::NotFound("x".into()).is_absent());
        assert!(EngineError::MalformedAccount("short".into()).is_absent());
        assert!(!EngineError::Validation("amount".into()).is_absent());
    }

    #[test]
    fn test_remote_keeps_message_verbatim() {
        let err = anyhow::anyhow!("custom program error: 0x1771");
        let engine = EngineError::remote(&err);
        assert_eq!(engine.to_string(), "custom program error: 0x1771");
    }
}
