//! Error types for the CampusLedger engine.
//!
//! All errors use the `CL_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Input validation errors
//! - 2xx: Lookup / authorization errors
//! - 3xx: Funds errors
//! - 4xx: Lifecycle / conflict errors
//! - 5xx: Concurrency errors
//! - 9xx: General / internal errors

use thiserror::Error;

use crate::Money;

/// Central error enum for all CampusLedger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// The amount is zero, negative, above the ceiling, or not an exact
    /// two-digit decimal.
    #[error("CL_ERR_100: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// Self-transfer, self-purchase, or self-loan.
    #[error("CL_ERR_101: Self reference rejected: {reason}")]
    SelfReference { reason: String },

    /// A non-amount field is outside its allowed set or range.
    #[error("CL_ERR_102: Invalid input: {reason}")]
    InvalidInput { reason: String },

    // =================================================================
    // Lookup / Authorization Errors (2xx)
    // =================================================================
    /// A wallet, card, loan, listing, subscription or pocket does not exist.
    #[error("CL_ERR_200: {entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The actor is not allowed to touch this entity or drive this transition.
    #[error("CL_ERR_201: Forbidden: {reason}")]
    Forbidden { reason: String },

    // =================================================================
    // Funds Errors (3xx)
    // =================================================================
    /// Not enough wallet (or pocket) balance.
    #[error("CL_ERR_300: Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Money, available: Money },

    /// Not enough unspent allocation on a budget card.
    #[error("CL_ERR_301: Insufficient budget: need {needed}, remaining {available}")]
    InsufficientBudget { needed: Money, available: Money },

    /// A monthly or spending limit would be exceeded.
    #[error("CL_ERR_302: Limit exceeded: limit {limit}, headroom {available}")]
    LimitExceeded { limit: Money, available: Money },

    // =================================================================
    // Lifecycle / Conflict Errors (4xx)
    // =================================================================
    /// An illegal lifecycle transition.
    #[error("CL_ERR_400: Invalid state for {entity}: cannot {attempted} while {current}")]
    InvalidState {
        entity: &'static str,
        current: String,
        attempted: String,
    },

    /// A duplicate resource or a lost race for a unique resource.
    #[error("CL_ERR_401: Conflict: {reason}")]
    Conflict { reason: String },

    // =================================================================
    // Concurrency Errors (5xx)
    // =================================================================
    /// A row lock could not be acquired within the configured timeout.
    /// Safe to retry.
    #[error("CL_ERR_500: Busy: timed out after {waited_ms}ms waiting for {resource}")]
    Busy { resource: String, waited_ms: u64 },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("CL_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Reconciliation found the ledger and the balances disagree.
    #[error("CL_ERR_901: Invariant violation: {reason}")]
    InvariantViolation { reason: String },

    /// Configuration error (invalid config file, bad values, etc.).
    #[error("CL_ERR_902: Configuration error: {0}")]
    Configuration(String),
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Text returned to callers in place of internal failure details.
pub const GENERIC_FAILURE_MESSAGE: &str = "CL_ERR_900: The operation could not be completed";

impl LedgerError {
    /// Whether the caller may retry the same request unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    /// Message safe to show to the end user. Internal and integrity failures
    /// are collapsed to a generic text; they are logged in full elsewhere.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) | Self::InvariantViolation { .. } => {
                GENERIC_FAILURE_MESSAGE.to_string()
            }
            other => other.to_string(),
        }
    }

    /// Short code (`CL_ERR_xxx`) for structured logs and API mapping.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount { .. } => "CL_ERR_100",
            Self::SelfReference { .. } => "CL_ERR_101",
            Self::InvalidInput { .. } => "CL_ERR_102",
            Self::NotFound { .. } => "CL_ERR_200",
            Self::Forbidden { .. } => "CL_ERR_201",
            Self::InsufficientFunds { .. } => "CL_ERR_300",
            Self::InsufficientBudget { .. } => "CL_ERR_301",
            Self::LimitExceeded { .. } => "CL_ERR_302",
            Self::InvalidState { .. } => "CL_ERR_400",
            Self::Conflict { .. } => "CL_ERR_401",
            Self::Busy { .. } => "CL_ERR_500",
            Self::Internal(_) => "CL_ERR_900",
            Self::InvariantViolation { .. } => "CL_ERR_901",
            Self::Configuration(_) => "CL_ERR_902",
        }
    }

    pub fn invalid_amount(reason: impl Into<String>) -> Self {
        Self::InvalidAmount {
            reason: reason.into(),
        }
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(
        entity: &'static str,
        current: impl ToString,
        attempted: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            entity,
            current: current.to_string(),
            attempted: attempted.into(),
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = LedgerError::not_found("wallet", "abc");
        let msg = format!("{err}");
        assert!(msg.starts_with("CL_ERR_200"), "Got: {msg}");
        assert!(msg.contains("wallet not found: abc"));
    }

    #[test]
    fn insufficient_funds_carries_available() {
        let err = LedgerError::InsufficientFunds {
            needed: Money::from_cents(10_000),
            available: Money::from_cents(5_000),
        };
        let msg = format!("{err}");
        assert!(msg.contains("need 100.00"));
        assert!(msg.contains("have 50.00"));
    }

    #[test]
    fn invalid_state_names_both_states() {
        let err = LedgerError::invalid_state("loan", "active", "decline");
        let msg = err.to_string();
        assert!(msg.contains("cannot decline while active"), "Got: {msg}");
    }

    #[test]
    fn only_busy_is_retryable() {
        let busy = LedgerError::Busy {
            resource: "wallet".into(),
            waited_ms: 10,
        };
        assert!(busy.is_retryable());
        assert!(!LedgerError::conflict("dup").is_retryable());
        assert!(!LedgerError::Internal("x".into()).is_retryable());
    }

    #[test]
    fn internal_details_are_hidden() {
        let err = LedgerError::Internal("row 42 vanished from table".into());
        assert_eq!(err.public_message(), GENERIC_FAILURE_MESSAGE);
        let err = LedgerError::forbidden("not your card");
        assert!(err.public_message().contains("not your card"));
    }

    #[test]
    fn code_matches_display_prefix() {
        let errors = [
            LedgerError::invalid_amount("x"),
            LedgerError::invalid_input("x"),
            LedgerError::conflict("x"),
            LedgerError::Configuration("x".into()),
            LedgerError::InvariantViolation { reason: "x".into() },
        ];
        for err in errors {
            assert!(err.to_string().starts_with(err.code()), "{err}");
        }
    }
}
