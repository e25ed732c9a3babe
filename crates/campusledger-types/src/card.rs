//! Card model: payment cards and budget cards carved out of a wallet.
//!
//! A budget card is a virtual sub-ledger. Money moves into it with an
//! allocation, is consumed by spends, and can be withdrawn back while
//! unspent. Invariants held by every mutation here:
//!
//! ```text
//! 0 <= spent <= allocated
//! monthly_limit set  =>  spent <= monthly_limit
//! ```
//!
//! A payment card never holds money. It debits the wallet directly and only
//! tracks how much went through it, checked against an optional spending
//! limit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{CardId, LedgerError, Money, Result, UserId};

/// What a card is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardPurpose {
    /// Debits the wallet at the point of sale.
    Payment,
    /// Holds an allocation carved out of the wallet.
    Budget,
    /// Groups recurring subscriptions.
    Subscription,
}

impl std::fmt::Display for CardPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Payment => write!(f, "payment"),
            Self::Budget => write!(f, "budget"),
            Self::Subscription => write!(f, "subscription"),
        }
    }
}

/// Reusable or single-use payment card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardKind {
    Standard,
    OneTime,
}

/// A card owned by one user. Budget-card balances live in `allocated`/`spent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetCard {
    pub id: CardId,
    pub owner: UserId,
    pub name: String,
    pub purpose: CardPurpose,
    pub kind: CardKind,
    /// Budget category (`food`, `rent`, ...) for budget cards.
    pub category: Option<String>,
    pub allocated: Money,
    pub spent: Money,
    pub monthly_limit: Option<Money>,
    pub spending_limit: Option<Money>,
    pub frozen: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BudgetCard {
    /// A new card with nothing allocated or spent.
    #[must_use]
    pub fn new(owner: UserId, name: impl Into<String>, purpose: CardPurpose) -> Self {
        let now = Utc::now();
        Self {
            id: CardId::new(),
            owner,
            name: name.into(),
            purpose,
            kind: CardKind::Standard,
            category: None,
            allocated: Money::ZERO,
            spent: Money::ZERO,
            monthly_limit: None,
            spending_limit: None,
            frozen: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Unspent allocation.
    #[must_use]
    pub fn remaining(&self) -> Money {
        self.allocated - self.spent
    }

    /// Share of the allocation already spent, in percent (0 when nothing is allocated).
    #[must_use]
    pub fn spent_percentage(&self) -> Decimal {
        if self.allocated.is_zero() {
            return Decimal::ZERO;
        }
        (self.spent.as_decimal() / self.allocated.as_decimal() * Decimal::ONE_HUNDRED).round_dp(2)
    }

    fn require_purpose(&self, purpose: CardPurpose, attempted: &str) -> Result<()> {
        if self.purpose == purpose {
            Ok(())
        } else {
            Err(LedgerError::invalid_state(
                "card",
                format!("{} card", self.purpose),
                attempted,
            ))
        }
    }

    /// Move `amount` into the card's allocation. The wallet side is handled
    /// by the caller inside the same unit of work.
    pub fn allocate(&mut self, amount: Money) -> Result<()> {
        self.require_purpose(CardPurpose::Budget, "allocate")?;
        self.allocated += amount;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Consume `amount` from the unspent allocation.
    ///
    /// # Errors
    /// [`LedgerError::InsufficientBudget`] when the remaining allocation is
    /// too small, [`LedgerError::LimitExceeded`] when the monthly limit would
    /// be crossed. Both carry the available headroom.
    pub fn spend(&mut self, amount: Money) -> Result<()> {
        self.require_purpose(CardPurpose::Budget, "spend")?;
        let remaining = self.remaining();
        if amount > remaining {
            return Err(LedgerError::InsufficientBudget {
                needed: amount,
                available: remaining,
            });
        }
        if let Some(limit) = self.monthly_limit {
            if self.spent + amount > limit {
                return Err(LedgerError::LimitExceeded {
                    limit,
                    available: (limit - self.spent).max(Money::ZERO),
                });
            }
        }
        self.spent += amount;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Return `amount` of unspent allocation to the caller (who credits the wallet).
    pub fn withdraw(&mut self, amount: Money) -> Result<()> {
        self.require_purpose(CardPurpose::Budget, "withdraw")?;
        let remaining = self.remaining();
        if amount > remaining {
            return Err(LedgerError::InsufficientBudget {
                needed: amount,
                available: remaining,
            });
        }
        self.allocated -= amount;
        if self.allocated < self.spent {
            return Err(LedgerError::InvariantViolation {
                reason: format!(
                    "card {}: allocated {} fell below spent {} after withdrawal",
                    self.id, self.allocated, self.spent
                ),
            });
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// A payment card that is not frozen.
    pub fn ensure_can_pay(&self) -> Result<()> {
        self.require_purpose(CardPurpose::Payment, "pay")?;
        if self.frozen {
            return Err(LedgerError::forbidden(format!("card {} is frozen", self.id)));
        }
        Ok(())
    }

    /// Record a wallet-funded payment made with this card.
    ///
    /// # Errors
    /// [`LedgerError::Forbidden`] if the card is frozen,
    /// [`LedgerError::LimitExceeded`] if the spending limit would be crossed.
    pub fn record_payment(&mut self, amount: Money) -> Result<()> {
        self.ensure_can_pay()?;
        if let Some(limit) = self.spending_limit {
            if self.spent + amount > limit {
                return Err(LedgerError::LimitExceeded {
                    limit,
                    available: (limit - self.spent).max(Money::ZERO),
                });
            }
        }
        self.spent += amount;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
        self.updated_at = Utc::now();
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl BudgetCard {
    pub fn dummy_budget(owner: UserId, allocated: Money, monthly_limit: Option<Money>) -> Self {
        let mut card = Self::new(owner, "Test budget", CardPurpose::Budget);
        card.category = Some("food".into());
        card.allocated = allocated;
        card.monthly_limit = monthly_limit;
        card
    }

    pub fn dummy_payment(owner: UserId, spending_limit: Option<Money>) -> Self {
        let mut card = Self::new(owner, "Test payment", CardPurpose::Payment);
        card.spending_limit = spending_limit;
        card
    }
}
