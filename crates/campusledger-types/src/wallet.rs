//! Wallet model: the one main balance holder per user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{LedgerError, Money, Result, UserId};

/// A user's main wallet. Keyed by its owner; a user has exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub owner: UserId,
    pub balance: Money,
    pub currency: String,
    /// A frozen wallet accepts credits but rejects every debit.
    pub frozen: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create an empty wallet for `owner`.
    #[must_use]
    pub fn new(owner: UserId, currency: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            owner,
            balance: Money::ZERO,
            currency: currency.into(),
            frozen: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Remove `amount` from the balance.
    ///
    /// # Errors
    /// [`LedgerError::Forbidden`] if the wallet is frozen,
    /// [`LedgerError::InsufficientFunds`] if the balance is below `amount`.
    pub fn debit(&mut self, amount: Money) -> Result<()> {
        if self.frozen {
            return Err(LedgerError::forbidden(format!(
                "wallet of {} is frozen",
                self.owner
            )));
        }
        let rest = self
            .balance
            .checked_sub_non_negative(amount)
            .ok_or(LedgerError::InsufficientFunds {
                needed: amount,
                available: self.balance,
            })?;
        self.balance = rest;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Add `amount` to the balance.
    pub fn credit(&mut self, amount: Money) {
        self.balance += amount;
        self.updated_at = Utc::now();
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl Wallet {
    pub fn dummy_funded(owner: UserId, balance: Money) -> Self {
        let mut wallet = Self::new(owner, crate::constants::DEFAULT_CURRENCY);
        wallet.balance = balance;
        wallet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_wallet_is_empty() {
        let wallet = Wallet::new(UserId::new(), "USD");
        assert_eq!(wallet.balance, Money::ZERO);
        assert!(!wallet.frozen);
    }

    #[test]
    fn debit_and_credit() {
        let mut wallet = Wallet::dummy_funded(UserId::new(), Money::from_cents(10_000));
        wallet.debit(Money::from_cents(3_000)).unwrap();
        wallet.credit(Money::from_cents(50));
        assert_eq!(wallet.balance, Money::from_cents(7_050));
    }

    #[test]
    fn debit_exact_balance_leaves_zero() {
        let mut wallet = Wallet::dummy_funded(UserId::new(), Money::from_cents(100));
        wallet.debit(Money::from_cents(100)).unwrap();
        assert_eq!(wallet.balance, Money::ZERO);
    }

    #[test]
    fn overdraft_rejected_and_balance_untouched() {
        let mut wallet = Wallet::dummy_funded(UserId::new(), Money::from_cents(100));
        let err = wallet.debit(Money::from_cents(101)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                needed: Money::from_cents(101),
                available: Money::from_cents(100),
            }
        );
        assert_eq!(wallet.balance, Money::from_cents(100));
    }

    #[test]
    fn frozen_wallet_rejects_debit_but_accepts_credit() {
        let mut wallet = Wallet::dummy_funded(UserId::new(), Money::from_cents(100));
        wallet.frozen = true;
        assert!(matches!(
            wallet.debit(Money::from_cents(1)),
            Err(LedgerError::Forbidden { .. })
        ));
        wallet.credit(Money::from_cents(1));
        assert_eq!(wallet.balance, Money::from_cents(101));
    }
}
