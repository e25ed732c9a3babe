//! Peer loan state machine.
//!
//! ```text
//! pending --approve--> active --repay (full)--> repaid
//!    |                   |
//!    +--decline--> declined   +--cancel (nothing repaid)--> cancelled
//! ```
//!
//! Actor checks happen before any lock is taken: lender and borrower of a
//! loan never change. Status checks happen under the loan lock, so two
//! racing transitions on the same loan see each other's result.

use std::sync::Arc;

use campusledger_store::{EntityKey, Row, Store};
use campusledger_types::{
    LedgerError, Loan, LoanId, LoanRepayment, LoanStatus, Money, Result, UserId,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::context::{OpContext, Outcome, finish, validate_amount};
use crate::transfer::{Repaid, TransferEngine};

/// One user's position across their loans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanSummary {
    /// Outstanding on active loans where the user lent.
    pub owed_to_me: Money,
    /// Outstanding on active loans where the user borrowed.
    pub i_owe: Money,
    pub net: Money,
    /// Pending requests waiting for this user's decision.
    pub pending_received: usize,
    /// Pending requests this user sent.
    pub pending_sent: usize,
    pub overdue: usize,
}

#[derive(Clone)]
pub struct LoanBook {
    store: Arc<Store>,
    transfers: TransferEngine,
}

impl LoanBook {
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        let transfers = TransferEngine::new(Arc::clone(&store));
        Self { store, transfers }
    }

    /// Borrower asks lender for `amount`. No money moves.
    ///
    /// # Errors
    /// `InvalidAmount`, `SelfReference`, `NotFound` when either party has no
    /// wallet.
    pub fn request(
        &self,
        borrower: UserId,
        lender: UserId,
        amount: Money,
        description: Option<String>,
        due_date: Option<NaiveDate>,
    ) -> Result<Loan> {
        finish(
            "request_loan",
            self.request_inner(borrower, lender, amount, description, due_date),
        )
    }

    fn request_inner(
        &self,
        borrower: UserId,
        lender: UserId,
        amount: Money,
        description: Option<String>,
        due_date: Option<NaiveDate>,
    ) -> Result<Loan> {
        validate_amount(amount, self.store.config())?;
        let loan = Loan::request(lender, borrower, amount, description, due_date)?;
        self.store.wallet(lender)?;
        self.store.wallet(borrower)?;

        let mut uow = self.store.begin([EntityKey::Loan(loan.id)])?;
        uow.insert(Row::Loan(loan.clone()));
        uow.commit()?;

        tracing::info!(loan = %loan.id, lender = %lender, borrower = %borrower, amount = %amount, "Loan requested");
        Ok(loan)
    }

    /// Lender approves: the amount is disbursed and the loan becomes active.
    pub fn approve(&self, actor: UserId, loan: LoanId, ctx: &OpContext) -> Result<Outcome<Loan>> {
        if let Err(err) = self.ensure_party(actor, loan, Party::Lender, "approve") {
            return finish("approve_loan", Err(err));
        }
        self.transfers.disburse_loan(loan, ctx)
    }

    /// Lender declines a pending request. No money moves.
    pub fn decline(&self, actor: UserId, loan: LoanId) -> Result<Loan> {
        finish("decline_loan", self.decline_inner(actor, loan))
    }

    fn decline_inner(&self, actor: UserId, loan_id: LoanId) -> Result<Loan> {
        self.ensure_party(actor, loan_id, Party::Lender, "decline")?;
        let mut uow = self.store.begin([EntityKey::Loan(loan_id)])?;
        let loan = uow.loan(loan_id)?;
        loan.transition(LoanStatus::Declined, "decline")?;
        let loan = loan.clone();
        uow.commit()?;

        tracing::info!(loan = %loan_id, "Loan declined");
        Ok(loan)
    }

    /// Borrower repays; anything above the remaining amount is not taken.
    pub fn repay(
        &self,
        actor: UserId,
        loan: LoanId,
        amount: Money,
        ctx: &OpContext,
    ) -> Result<Outcome<Repaid>> {
        if let Err(err) = self.ensure_party(actor, loan, Party::Borrower, "repay") {
            return finish("repay_loan", Err(err));
        }
        self.transfers.repay_loan(loan, actor, amount, ctx)
    }

    /// Lender cancels an active loan before any repayment; the borrower
    /// returns the disbursed amount.
    pub fn cancel(&self, actor: UserId, loan: LoanId, ctx: &OpContext) -> Result<Outcome<Loan>> {
        if let Err(err) = self.ensure_party(actor, loan, Party::Lender, "cancel") {
            return finish("cancel_loan", Err(err));
        }
        self.transfers.reverse_loan(loan, ctx)
    }

    pub fn loan(&self, id: LoanId) -> Result<Loan> {
        self.store.loan(id)
    }

    /// Loans where `user` is lender or borrower.
    pub fn loans_of(&self, user: UserId) -> Result<Vec<Loan>> {
        self.store.loans_of(user)
    }

    pub fn repayments(&self, loan: LoanId) -> Result<Vec<LoanRepayment>> {
        self.store.repayments(loan)
    }

    /// Active loans of `user` past their due date on `today`.
    pub fn overdue(&self, user: UserId, today: NaiveDate) -> Result<Vec<Loan>> {
        Ok(self
            .store
            .loans_of(user)?
            .into_iter()
            .filter(|l| l.is_overdue(today))
            .collect())
    }

    pub fn summary(&self, user: UserId, today: NaiveDate) -> Result<LoanSummary> {
        let loans = self.store.loans_of(user)?;
        let active = || loans.iter().filter(|l| l.status == LoanStatus::Active);
        let pending = || loans.iter().filter(|l| l.status == LoanStatus::Pending);

        let owed_to_me: Money = active()
            .filter(|l| l.lender == user)
            .map(Loan::amount_remaining)
            .sum();
        let i_owe: Money = active()
            .filter(|l| l.borrower == user)
            .map(Loan::amount_remaining)
            .sum();
        Ok(LoanSummary {
            owed_to_me,
            i_owe,
            net: owed_to_me - i_owe,
            pending_received: pending().filter(|l| l.lender == user).count(),
            pending_sent: pending().filter(|l| l.borrower == user).count(),
            overdue: active().filter(|l| l.is_overdue(today)).count(),
        })
    }

    fn ensure_party(&self, actor: UserId, id: LoanId, party: Party, attempted: &str) -> Result<()> {
        let loan = self.store.loan(id)?;
        let expected = match party {
            Party::Lender => loan.lender,
            Party::Borrower => loan.borrower,
        };
        if actor == expected {
            Ok(())
        } else {
            Err(LedgerError::forbidden(format!(
                "only the {party} can {attempted} loan {id}"
            )))
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Party {
    Lender,
    Borrower,
}

impl std::fmt::Display for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lender => write!(f, "lender"),
            Self::Borrower => write!(f, "borrower"),
        }
    }
}

#[cfg(test)]
mod tests {
    use campusledger_types::{EngineConfig, Wallet};

    use super::*;

    fn cents(c: i64) -> Money {
        Money::from_cents(c)
    }

    fn book(balances: &[(UserId, i64)]) -> (Arc<Store>, LoanBook) {
        let store = Arc::new(Store::new(EngineConfig::default()).unwrap());
        let mut uow = store.begin([]).unwrap();
        for &(owner, c) in balances {
            uow.insert(Row::Wallet(Wallet::dummy_funded(owner, cents(c))));
        }
        uow.commit().unwrap();
        (Arc::clone(&store), LoanBook::new(store))
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn wrong_actor_is_forbidden() {
        let (lender, borrower) = (UserId::new(), UserId::new());
        let (_, book) = book(&[(lender, 10_000), (borrower, 0)]);
        let loan = book.request(borrower, lender, cents(1_000), None, None).unwrap();
        let ctx = OpContext::new();

        assert!(matches!(
            book.approve(borrower, loan.id, &ctx),
            Err(LedgerError::Forbidden { .. })
        ));
        assert!(matches!(
            book.decline(borrower, loan.id),
            Err(LedgerError::Forbidden { .. })
        ));
        assert!(matches!(
            book.repay(lender, loan.id, cents(1), &ctx),
            Err(LedgerError::Forbidden { .. })
        ));
    }

    #[test]
    fn declined_is_terminal() {
        let (lender, borrower) = (UserId::new(), UserId::new());
        let (store, book) = book(&[(lender, 10_000), (borrower, 0)]);
        let loan = book.request(borrower, lender, cents(1_000), None, None).unwrap();
        book.decline(lender, loan.id).unwrap();

        let err = book.approve(lender, loan.id, &OpContext::new()).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InvalidState {
                entity: "loan",
                current: "declined".into(),
                attempted: "approve".into(),
            }
        );
        assert_eq!(store.wallet(lender).unwrap().balance, cents(10_000));
    }

    #[test]
    fn pending_loan_cannot_be_cancelled() {
        let (lender, borrower) = (UserId::new(), UserId::new());
        let (_, book) = book(&[(lender, 10_000), (borrower, 0)]);
        let loan = book.request(borrower, lender, cents(1_000), None, None).unwrap();
        assert!(matches!(
            book.cancel(lender, loan.id, &OpContext::new()),
            Err(LedgerError::InvalidState { .. })
        ));
    }

    #[test]
    fn request_validation() {
        let (lender, borrower) = (UserId::new(), UserId::new());
        let (_, book) = book(&[(lender, 0), (borrower, 0)]);
        assert!(matches!(
            book.request(borrower, borrower, cents(100), None, None),
            Err(LedgerError::SelfReference { .. })
        ));
        assert!(matches!(
            book.request(borrower, lender, cents(-100), None, None),
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert!(matches!(
            book.request(borrower, UserId::new(), cents(100), None, None),
            Err(LedgerError::NotFound { .. })
        ));
    }

    #[test]
    fn summary_and_overdue() {
        let (me, friend, other) = (UserId::new(), UserId::new(), UserId::new());
        let (_, book) = book(&[(me, 50_000), (friend, 50_000), (other, 0)]);
        let ctx = OpContext::new();

        let lent = book
            .request(friend, me, cents(10_000), None, Some(date(2026, 1, 10)))
            .unwrap();
        book.approve(me, lent.id, &ctx).unwrap();
        book.repay(friend, lent.id, cents(2_500), &ctx).unwrap();

        let borrowed = book.request(me, friend, cents(3_000), None, None).unwrap();
        book.approve(friend, borrowed.id, &ctx).unwrap();

        book.request(other, me, cents(500), None, None).unwrap();

        let summary = book.summary(me, date(2026, 1, 20)).unwrap();
        assert_eq!(summary.owed_to_me, cents(7_500));
        assert_eq!(summary.i_owe, cents(3_000));
        assert_eq!(summary.net, cents(4_500));
        assert_eq!(summary.pending_received, 1);
        assert_eq!(summary.pending_sent, 0);
        assert_eq!(summary.overdue, 1);

        let overdue = book.overdue(me, date(2026, 1, 20)).unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].days_overdue(date(2026, 1, 20)), 10);
        assert!(book.overdue(me, date(2026, 1, 10)).unwrap().is_empty());
        assert_eq!(book.repayments(lent.id).unwrap().len(), 1);
    }
}
