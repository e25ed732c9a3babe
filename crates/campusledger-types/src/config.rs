//! Configuration for a CampusLedger engine instance.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BillingCycle, LedgerError, Money, Result, constants};

/// Engine-wide settings shared by every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// The single currency every wallet and ledger entry is denominated in.
    pub currency: String,
    /// Bounded wait for each lock acquisition before failing with `Busy`.
    pub lock_timeout_ms: u64,
    /// Ceiling for any single operation amount.
    pub max_amount: Money,
    /// Number of processed request ids remembered for idempotency.
    pub idempotency_cache_size: usize,
    /// Billing cycle used when a subscription does not name one.
    pub default_billing_cycle: BillingCycle,
}

impl EngineConfig {
    /// Parse a JSON document. Missing fields fall back to defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(LedgerError::Configuration(format!(
                "currency must be a three-letter ISO code, got {:?}",
                self.currency
            )));
        }
        if self.lock_timeout_ms == 0 {
            return Err(LedgerError::Configuration(
                "lock_timeout_ms must be > 0".into(),
            ));
        }
        if !self.max_amount.is_positive() {
            return Err(LedgerError::Configuration(format!(
                "max_amount must be positive, got {}",
                self.max_amount
            )));
        }
        if self.idempotency_cache_size == 0 {
            return Err(LedgerError::Configuration(
                "idempotency_cache_size must be > 0".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: constants::DEFAULT_CURRENCY.to_string(),
            lock_timeout_ms: constants::DEFAULT_LOCK_TIMEOUT_MS,
            max_amount: Money::from_cents(constants::DEFAULT_MAX_AMOUNT_CENTS),
            idempotency_cache_size: constants::DEFAULT_IDEMPOTENCY_CACHE_SIZE,
            default_billing_cycle: BillingCycle::Monthly,
        }
    }
}
