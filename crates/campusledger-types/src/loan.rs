//! # Loan: a directed lender -> borrower relationship
//!
//! ## State Machine
//!
//! ```text
//!   ┌─────────┐ approve ┌────────┐ repay (full) ┌────────┐
//!   │ PENDING ├────────▶│ ACTIVE ├─────────────▶│ REPAID │
//!   └────┬────┘         └───┬────┘              └────────┘
//!        │ decline          │ cancel (nothing repaid yet)
//!        ▼                  ▼
//!   ┌──────────┐       ┌───────────┐
//!   │ DECLINED │       │ CANCELLED │
//!   └──────────┘       └───────────┘
//! ```
//!
//! `declined`, `cancelled` and `repaid` are terminal. `amount_repaid` never
//! exceeds `amount`; a loan is `repaid` exactly when they are equal.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{LedgerError, LoanId, Money, RepaymentId, Result, UserId};

/// The lifecycle state of a loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    /// Requested by the borrower, waiting for the lender.
    Pending,
    /// Disbursed; repayments are accepted.
    Active,
    /// Refused by the lender. No money moved.
    Declined,
    /// Disbursement reversed by the lender before any repayment.
    Cancelled,
    /// Fully repaid.
    Repaid,
}

impl LoanStatus {
    /// Can a loan in this state move to `target`?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Active | Self::Declined)
                | (Self::Active, Self::Repaid | Self::Cancelled)
        )
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Declined | Self::Cancelled | Self::Repaid)
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Declined => write!(f, "declined"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Repaid => write!(f, "repaid"),
        }
    }
}

/// A peer loan. Never deleted; terminal loans remain as history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub lender: UserId,
    pub borrower: UserId,
    pub amount: Money,
    pub amount_repaid: Money,
    pub status: LoanStatus,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub declined_at: Option<DateTime<Utc>>,
    pub repaid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Loan {
    /// A new `pending` loan request.
    ///
    /// # Errors
    /// [`LedgerError::InvalidAmount`] for a non-positive amount,
    /// [`LedgerError::SelfReference`] when lender and borrower coincide.
    pub fn request(
        lender: UserId,
        borrower: UserId,
        amount: Money,
        description: Option<String>,
        due_date: Option<NaiveDate>,
    ) -> Result<Self> {
        if !amount.is_positive() {
            return Err(LedgerError::invalid_amount(format!(
                "loan amount must be positive, got {amount}"
            )));
        }
        if lender == borrower {
            return Err(LedgerError::SelfReference {
                reason: "cannot borrow from yourself".into(),
            });
        }
        Ok(Self {
            id: LoanId::new(),
            lender,
            borrower,
            amount,
            amount_repaid: Money::ZERO,
            status: LoanStatus::Pending,
            description,
            due_date,
            created_at: Utc::now(),
            approved_at: None,
            declined_at: None,
            repaid_at: None,
            cancelled_at: None,
        })
    }

    #[must_use]
    pub fn amount_remaining(&self) -> Money {
        self.amount - self.amount_repaid
    }

    /// Active and past its due date.
    #[must_use]
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status == LoanStatus::Active && self.due_date.is_some_and(|due| due < today)
    }

    #[must_use]
    pub fn days_overdue(&self, today: NaiveDate) -> i64 {
        match self.due_date {
            Some(due) if self.is_overdue(today) => (today - due).num_days(),
            _ => 0,
        }
    }

    /// Move to `target`, or fail with `InvalidState` naming the current status.
    pub fn transition(&mut self, target: LoanStatus, attempted: &str) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(LedgerError::invalid_state("loan", self.status, attempted));
        }
        self.status = target;
        let now = Utc::now();
        match target {
            LoanStatus::Pending => {}
            LoanStatus::Active => self.approved_at = Some(now),
            LoanStatus::Declined => self.declined_at = Some(now),
            LoanStatus::Repaid => self.repaid_at = Some(now),
            LoanStatus::Cancelled => self.cancelled_at = Some(now),
        }
        Ok(())
    }

    /// Apply a repayment of at most `offered`. The applied amount is clamped
    /// to what remains; the loan becomes `repaid` once nothing remains.
    /// Returns the amount actually applied.
    pub fn apply_repayment(&mut self, offered: Money) -> Result<Money> {
        if self.status != LoanStatus::Active {
            return Err(LedgerError::invalid_state("loan", self.status, "repay"));
        }
        let applied = offered.min(self.amount_remaining());
        self.amount_repaid += applied;
        if self.amount_repaid == self.amount {
            self.transition(LoanStatus::Repaid, "repay")?;
        }
        Ok(applied)
    }
}

/// One repayment event. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanRepayment {
    pub id: RepaymentId,
    pub loan_id: LoanId,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
}

impl LoanRepayment {
    #[must_use]
    pub fn new(loan_id: LoanId, amount: Money) -> Self {
        Self {
            id: RepaymentId::new(),
            loan_id,
            amount,
            created_at: Utc::now(),
        }
    }
}
