//! Savings pockets: named goal balances funded from the wallet.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{LedgerError, Money, PocketId, Result, UserId};

/// A savings pocket holds real money moved out of its owner's wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavingsPocket {
    pub id: PocketId,
    pub owner: UserId,
    pub name: String,
    pub balance: Money,
    pub goal: Money,
    /// A locked pocket rejects withdrawals.
    pub locked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SavingsPocket {
    #[must_use]
    pub fn new(owner: UserId, name: impl Into<String>, goal: Money) -> Self {
        let now = Utc::now();
        Self {
            id: PocketId::new(),
            owner,
            name: name.into(),
            balance: Money::ZERO,
            goal,
            locked: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Progress towards the goal in percent, capped at 100.
    #[must_use]
    pub fn progress_percentage(&self) -> Decimal {
        if !self.goal.is_positive() {
            return Decimal::ZERO;
        }
        let pct = self.balance.as_decimal() / self.goal.as_decimal() * Decimal::ONE_HUNDRED;
        pct.min(Decimal::ONE_HUNDRED).round_dp(2)
    }

    pub fn deposit(&mut self, amount: Money) {
        self.balance += amount;
        self.updated_at = Utc::now();
    }

    pub fn withdraw(&mut self, amount: Money) -> Result<()> {
        if self.locked {
            return Err(LedgerError::forbidden(format!(
                "savings pocket {} is locked",
                self.id
            )));
        }
        self.balance = self
            .balance
            .checked_sub_non_negative(amount)
            .ok_or(LedgerError::InsufficientFunds {
                needed: amount,
                available: self.balance,
            })?;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deposit_withdraw_and_progress() {
        let mut pocket = SavingsPocket::new(UserId::new(), "Laptop", Money::from_cents(100_000));
        pocket.deposit(Money::from_cents(25_000));
        assert_eq!(pocket.progress_percentage(), Decimal::new(25, 0));
        pocket.withdraw(Money::from_cents(5_000)).unwrap();
        assert_eq!(pocket.balance, Money::from_cents(20_000));
    }

    #[test]
    fn progress_caps_at_hundred() {
        let mut pocket = SavingsPocket::new(UserId::new(), "Trip", Money::from_cents(100));
        pocket.deposit(Money::from_cents(300));
        assert_eq!(pocket.progress_percentage(), Decimal::ONE_HUNDRED);
    }

    #[test]
    fn cannot_overdraw_or_withdraw_locked() {
        let mut pocket = SavingsPocket::new(UserId::new(), "Rainy day", Money::from_cents(100));
        pocket.deposit(Money::from_cents(50));
        assert!(matches!(
            pocket.withdraw(Money::from_cents(51)),
            Err(LedgerError::InsufficientFunds { .. })
        ));
        pocket.locked = true;
        assert!(matches!(
            pocket.withdraw(Money::from_cents(10)),
            Err(LedgerError::Forbidden { .. })
        ));
        assert_eq!(pocket.balance, Money::from_cents(50));
    }
}
