//! Per-call context, call results, and the checks every engine shares.

use campusledger_store::CommitReceipt;
use campusledger_types::{
    EngineConfig, LedgerEntry, LedgerError, Money, RequestId, Result, UserId, Wallet,
};
use serde_json::{Map, Value};

/// Caller-supplied context of one operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpContext {
    /// Idempotency key. Set it when the caller may retry.
    pub request_id: Option<RequestId>,
    /// Free-text description copied onto the created entries.
    pub note: Option<String>,
    /// Merged into the metadata of every created entry.
    pub metadata: Map<String, Value>,
}

impl OpContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_request(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    #[must_use]
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Apply note and metadata to an entry the engine built.
    pub(crate) fn decorate(&self, entry: LedgerEntry) -> LedgerEntry {
        let entry = entry.with_metadata(&self.metadata);
        match (&self.note, &entry.description) {
            (Some(note), None) => entry.described(note.clone()),
            _ => entry,
        }
    }
}

/// Result of a successful operation: the primary entity, every wallet the
/// operation touched (post-commit state), and the ledger entries it wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub wallets: Vec<Wallet>,
    pub entries: Vec<LedgerEntry>,
    pub scheduled: Vec<LedgerEntry>,
}

impl<T> Outcome<T> {
    pub(crate) fn new(value: T, wallets: Vec<Wallet>, receipt: CommitReceipt) -> Self {
        Self {
            value,
            wallets,
            entries: receipt.entries,
            scheduled: receipt.scheduled,
        }
    }

    /// The touched wallet of `owner`, if any.
    #[must_use]
    pub fn wallet(&self, owner: UserId) -> Option<&Wallet> {
        self.wallets.iter().find(|w| w.owner == owner)
    }
}

/// Boundary check for every amount: strictly positive and under the ceiling.
pub(crate) fn validate_amount(amount: Money, config: &EngineConfig) -> Result<()> {
    if !amount.is_positive() {
        return Err(LedgerError::invalid_amount(format!(
            "amount must be greater than zero, got {amount}"
        )));
    }
    if amount > config.max_amount {
        return Err(LedgerError::invalid_amount(format!(
            "amount {amount} exceeds the maximum of {}",
            config.max_amount
        )));
    }
    Ok(())
}

pub(crate) fn ensure_owner(actor: UserId, owner: UserId, what: &str) -> Result<()> {
    if actor == owner {
        Ok(())
    } else {
        Err(LedgerError::forbidden(format!(
            "{what} does not belong to {actor}"
        )))
    }
}

/// Log a failed operation at the right level and pass the result through.
/// Internal and integrity failures carry full context into the log; callers
/// show them via `LedgerError::public_message`.
pub(crate) fn finish<T>(operation: &'static str, result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        match err {
            LedgerError::Internal(_) | LedgerError::InvariantViolation { .. } => {
                tracing::error!(operation, code = err.code(), error = %err, "Operation failed");
            }
            _ => {
                tracing::warn!(operation, code = err.code(), error = %err, "Operation rejected");
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use campusledger_types::EntryType;

    use super::*;

    #[test]
    fn amount_bounds() {
        let config = EngineConfig::default();
        assert!(validate_amount(Money::from_cents(1), &config).is_ok());
        assert!(validate_amount(config.max_amount, &config).is_ok());
        for bad in [Money::ZERO, -Money::from_cents(1), config.max_amount + Money::from_cents(1)] {
            assert!(matches!(
                validate_amount(bad, &config),
                Err(LedgerError::InvalidAmount { .. })
            ));
        }
    }

    #[test]
    fn decorate_keeps_engine_description() {
        let ctx = OpContext::new().with_note("lunch").with_meta("channel", "app");
        let owner = UserId::new();
        let bare = LedgerEntry::completed(owner, EntryType::CardPayment, Money::from_cents(1), "USD");
        let decorated = ctx.decorate(bare.clone());
        assert_eq!(decorated.description.as_deref(), Some("lunch"));
        assert_eq!(decorated.metadata["channel"], "app");

        let described = ctx.decorate(bare.described("Payment to Cafe"));
        assert_eq!(described.description.as_deref(), Some("Payment to Cafe"));
    }

    #[test]
    fn owner_check() {
        let me = UserId::new();
        assert!(ensure_owner(me, me, "card").is_ok());
        assert!(matches!(
            ensure_owner(UserId::new(), me, "card"),
            Err(LedgerError::Forbidden { .. })
        ));
    }
}
