//! Transfer engine: atomic two-party wallet movements.
//!
//! Every operation here follows the same shape:
//! 1. Validate inputs and reject self-references before touching any lock
//! 2. Lock the rows (listing / loan first, then both wallets by owner id)
//! 3. Re-validate under lock (availability, loan status, balances)
//! 4. Debit one wallet, credit the other, update the listing / loan
//! 5. Stage the paired ledger entries and commit
//!
//! Any failure after step 2 drops the unit of work, so nothing from the
//! attempt is ever visible.

use std::sync::Arc;

use campusledger_store::{EntityKey, Store, UnitOfWork};
use campusledger_types::{
    EntryLink, EntryType, LedgerEntry, LedgerError, ListingId, Loan, LoanId, LoanRepayment,
    LoanStatus, MarketplaceOrder, Money, Result, UserId, Wallet,
};

use crate::context::{OpContext, Outcome, finish, validate_amount};

/// A repayment and the loan after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repaid {
    pub loan: Loan,
    pub repayment: LoanRepayment,
}

/// Debit `from`, credit `to`, and stage the matching entry pair. Both
/// entries name the sender and receiver, so each side can find the other.
struct Movement {
    from: UserId,
    to: UserId,
    amount: Money,
    debit: EntryType,
    credit: EntryType,
    link: Option<EntryLink>,
    description: String,
}

impl Movement {
    fn apply(self, uow: &mut UnitOfWork<'_>, ctx: &OpContext) -> Result<(Wallet, Wallet)> {
        uow.wallet(self.from)?.debit(self.amount)?;
        uow.wallet(self.to)?.credit(self.amount);

        let currency = uow.currency().to_string();
        let mut debit = LedgerEntry::completed(self.from, self.debit, self.amount, &currency)
            .between(self.from, self.to)
            .described(self.description.clone());
        let mut credit = LedgerEntry::completed(self.to, self.credit, self.amount, &currency)
            .between(self.from, self.to)
            .described(self.description);
        if let Some(link) = self.link {
            debit = debit.linked(link);
            credit = credit.linked(link);
        }
        uow.append(ctx.decorate(debit))?;
        uow.append(ctx.decorate(credit))?;

        let from = uow.wallet(self.from)?.clone();
        let to = uow.wallet(self.to)?.clone();
        Ok((from, to))
    }
}

#[derive(Clone)]
pub struct TransferEngine {
    store: Arc<Store>,
}

impl TransferEngine {
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Move `amount` from `sender`'s wallet to `receiver`'s.
    ///
    /// # Errors
    /// `InvalidAmount`, `SelfReference` (before locking), `NotFound`,
    /// `Forbidden` (frozen sender), `InsufficientFunds`, `Busy`.
    pub fn transfer(
        &self,
        sender: UserId,
        receiver: UserId,
        amount: Money,
        ctx: &OpContext,
    ) -> Result<Outcome<Money>> {
        finish("transfer", self.transfer_inner(sender, receiver, amount, ctx))
    }

    fn transfer_inner(
        &self,
        sender: UserId,
        receiver: UserId,
        amount: Money,
        ctx: &OpContext,
    ) -> Result<Outcome<Money>> {
        validate_amount(amount, self.store.config())?;
        if sender == receiver {
            return Err(LedgerError::SelfReference {
                reason: "cannot transfer to yourself".into(),
            });
        }

        let mut uow = self
            .store
            .begin([EntityKey::Wallet(sender), EntityKey::Wallet(receiver)])?;
        uow.claim_request(ctx.request_id);
        let (from, to) = Movement {
            from: sender,
            to: receiver,
            amount,
            debit: EntryType::TransferSent,
            credit: EntryType::TransferReceived,
            link: None,
            description: "Wallet transfer".into(),
        }
        .apply(&mut uow, ctx)?;
        let receipt = uow.commit()?;

        tracing::info!(sender = %sender, receiver = %receiver, amount = %amount, "Transfer settled");
        Ok(Outcome::new(amount, vec![from, to], receipt))
    }

    /// Single-phase marketplace settlement: the buyer pays the seller and the
    /// listing is marked sold, in one unit of work. The listing lock
    /// serializes competing buyers, so a listing is sold at most once.
    ///
    /// # Errors
    /// `SelfReference` for the seller's own listing, `Conflict` once the
    /// listing is sold or withdrawn or when seller / price do not match it,
    /// plus the funds errors of a transfer.
    pub fn settle_escrow(
        &self,
        buyer: UserId,
        seller: UserId,
        listing_id: ListingId,
        amount: Money,
        ctx: &OpContext,
    ) -> Result<Outcome<MarketplaceOrder>> {
        finish(
            "settle_escrow",
            self.settle_escrow_inner(buyer, seller, listing_id, amount, ctx),
        )
    }

    fn settle_escrow_inner(
        &self,
        buyer: UserId,
        seller: UserId,
        listing_id: ListingId,
        amount: Money,
        ctx: &OpContext,
    ) -> Result<Outcome<MarketplaceOrder>> {
        validate_amount(amount, self.store.config())?;
        if buyer == seller {
            return Err(LedgerError::SelfReference {
                reason: "cannot buy your own listing".into(),
            });
        }

        let mut uow = self.store.begin([
            EntityKey::Listing(listing_id),
            EntityKey::Wallet(buyer),
            EntityKey::Wallet(seller),
        ])?;
        uow.claim_request(ctx.request_id);

        let listing = uow.listing(listing_id)?;
        if listing.seller != seller {
            return Err(LedgerError::conflict(format!(
                "listing {listing_id} is not sold by {seller}"
            )));
        }
        if listing.price != amount {
            return Err(LedgerError::conflict(format!(
                "listing {listing_id} costs {}, not {amount}",
                listing.price
            )));
        }
        listing.ensure_purchasable(buyer)?;
        listing.mark_sold();
        let title = listing.title.clone();
        let order = MarketplaceOrder::settled(listing, buyer);

        let (buyer_wallet, seller_wallet) = Movement {
            from: buyer,
            to: seller,
            amount,
            debit: EntryType::Purchase,
            credit: EntryType::Sale,
            link: Some(EntryLink::Order {
                order: order.id,
                listing: listing_id,
            }),
            description: format!("Marketplace: {title}"),
        }
        .apply(&mut uow, ctx)?;
        uow.record_order(order.clone());
        let receipt = uow.commit()?;

        tracing::info!(
            order = %order.id,
            listing = %listing_id,
            buyer = %buyer,
            seller = %seller,
            amount = %amount,
            "Escrow settled"
        );
        Ok(Outcome::new(order, vec![buyer_wallet, seller_wallet], receipt))
    }

    /// Approve a pending loan: lender pays borrower, loan becomes `active`.
    ///
    /// # Errors
    /// `InvalidState` unless the loan is `pending` (checked under the loan
    /// lock, so of two racing approve/decline calls only one succeeds),
    /// `InsufficientFunds` if the lender cannot cover it.
    pub fn disburse_loan(&self, loan_id: LoanId, ctx: &OpContext) -> Result<Outcome<Loan>> {
        finish("disburse_loan", self.disburse_loan_inner(loan_id, ctx))
    }

    fn disburse_loan_inner(&self, loan_id: LoanId, ctx: &OpContext) -> Result<Outcome<Loan>> {
        let parties = self.store.loan(loan_id)?;
        let mut uow = self.lock_loan(&parties)?;
        uow.claim_request(ctx.request_id);

        let loan = uow.loan(loan_id)?;
        loan.transition(LoanStatus::Active, "approve")?;
        let loan = loan.clone();

        let wallets = Movement {
            from: loan.lender,
            to: loan.borrower,
            amount: loan.amount,
            debit: EntryType::LoanDisbursement,
            credit: EntryType::LoanReceived,
            link: Some(EntryLink::Loan { loan: loan_id }),
            description: "Loan disbursement".into(),
        }
        .apply(&mut uow, ctx)?;
        let receipt = uow.commit()?;

        tracing::info!(loan = %loan_id, lender = %loan.lender, borrower = %loan.borrower, amount = %loan.amount, "Loan disbursed");
        Ok(Outcome::new(loan, vec![wallets.0, wallets.1], receipt))
    }

    /// Borrower pays back up to `amount`; the applied amount is clamped to
    /// what remains. The loan turns `repaid` when nothing remains.
    pub fn repay_loan(
        &self,
        loan_id: LoanId,
        borrower: UserId,
        amount: Money,
        ctx: &OpContext,
    ) -> Result<Outcome<Repaid>> {
        finish(
            "repay_loan",
            self.repay_loan_inner(loan_id, borrower, amount, ctx),
        )
    }

    fn repay_loan_inner(
        &self,
        loan_id: LoanId,
        borrower: UserId,
        amount: Money,
        ctx: &OpContext,
    ) -> Result<Outcome<Repaid>> {
        validate_amount(amount, self.store.config())?;
        let parties = self.store.loan(loan_id)?;
        if parties.borrower != borrower {
            return Err(LedgerError::forbidden(format!(
                "only the borrower can repay loan {loan_id}"
            )));
        }
        let mut uow = self.lock_loan(&parties)?;
        uow.claim_request(ctx.request_id);

        let loan = uow.loan(loan_id)?;
        let applied = loan.apply_repayment(amount)?;
        let loan = loan.clone();
        let repayment = LoanRepayment::new(loan_id, applied);

        let wallets = Movement {
            from: loan.borrower,
            to: loan.lender,
            amount: applied,
            debit: EntryType::LoanRepayment,
            credit: EntryType::LoanRepaymentReceived,
            link: Some(EntryLink::Loan { loan: loan_id }),
            description: "Loan repayment".into(),
        }
        .apply(
            &mut uow,
            &ctx.clone().with_meta("repayment_id", repayment.id.to_string()),
        )?;
        uow.record_repayment(repayment.clone());
        let receipt = uow.commit()?;

        tracing::info!(
            loan = %loan_id,
            applied = %applied,
            offered = %amount,
            remaining = %loan.amount_remaining(),
            status = %loan.status,
            "Loan repayment applied"
        );
        Ok(Outcome::new(
            Repaid { loan, repayment },
            vec![wallets.0, wallets.1],
            receipt,
        ))
    }

    /// Undo the disbursement of an active loan with nothing repaid yet:
    /// borrower returns the full amount to the lender, loan becomes
    /// `cancelled`. Written as its own entry pair, distinct from repayment.
    pub fn reverse_loan(&self, loan_id: LoanId, ctx: &OpContext) -> Result<Outcome<Loan>> {
        finish("reverse_loan", self.reverse_loan_inner(loan_id, ctx))
    }

    fn reverse_loan_inner(&self, loan_id: LoanId, ctx: &OpContext) -> Result<Outcome<Loan>> {
        let parties = self.store.loan(loan_id)?;
        let mut uow = self.lock_loan(&parties)?;
        uow.claim_request(ctx.request_id);

        let loan = uow.loan(loan_id)?;
        if loan.status == LoanStatus::Active && !loan.amount_repaid.is_zero() {
            return Err(LedgerError::invalid_state(
                "loan",
                format!("active with {} repaid", loan.amount_repaid),
                "cancel",
            ));
        }
        loan.transition(LoanStatus::Cancelled, "cancel")?;
        let loan = loan.clone();

        let wallets = Movement {
            from: loan.borrower,
            to: loan.lender,
            amount: loan.amount,
            debit: EntryType::LoanCancelledReturn,
            credit: EntryType::LoanCancelledRefund,
            link: Some(EntryLink::Loan { loan: loan_id }),
            description: "Loan cancelled".into(),
        }
        .apply(&mut uow, ctx)?;
        let receipt = uow.commit()?;

        tracing::info!(loan = %loan_id, amount = %loan.amount, "Loan reversed");
        Ok(Outcome::new(loan, vec![wallets.0, wallets.1], receipt))
    }

    /// Loan row first, then both wallets. Lender and borrower never change,
    /// so the pre-lock read is enough to name the keys.
    fn lock_loan(&self, loan: &Loan) -> Result<UnitOfWork<'_>> {
        self.store.begin([
            EntityKey::Loan(loan.id),
            EntityKey::Wallet(loan.lender),
            EntityKey::Wallet(loan.borrower),
        ])
    }
}

#[cfg(test)]
mod tests {
    use campusledger_store::Row;
    use campusledger_types::{EngineConfig, Listing};

    use super::*;

    fn cents(c: i64) -> Money {
        Money::from_cents(c)
    }

    fn setup(balances: &[(UserId, i64)]) -> (Arc<Store>, TransferEngine) {
        let store = Arc::new(Store::new(EngineConfig::default()).unwrap());
        let mut uow = store.begin([]).unwrap();
        for &(owner, c) in balances {
            uow.insert(Row::Wallet(Wallet::dummy_funded(owner, cents(c))));
        }
        uow.commit().unwrap();
        let engine = TransferEngine::new(Arc::clone(&store));
        (store, engine)
    }

    #[test]
    fn transfer_moves_exact_amount() {
        let (a, b) = (UserId::new(), UserId::new());
        let (store, engine) = setup(&[(a, 10_000), (b, 0)]);
        let outcome = engine.transfer(a, b, cents(3_000), &OpContext::new()).unwrap();

        assert_eq!(store.wallet(a).unwrap().balance, cents(7_000));
        assert_eq!(store.wallet(b).unwrap().balance, cents(3_000));
        assert_eq!(outcome.wallet(a).unwrap().balance, cents(7_000));
        assert_eq!(outcome.entries.len(), 2);
        assert!(outcome.entries.iter().all(|e| e.amount == cents(3_000)));
        assert_eq!(outcome.entries[0].entry_type, EntryType::TransferSent);
        assert_eq!(outcome.entries[1].receiver, Some(b));
        assert_eq!(outcome.entries[1].sender, Some(a));
    }

    #[test]
    fn transfer_rejections_leave_no_trace() {
        let (a, b) = (UserId::new(), UserId::new());
        let (store, engine) = setup(&[(a, 1_000), (b, 0)]);
        let ctx = OpContext::new();

        assert!(matches!(
            engine.transfer(a, b, cents(1_001), &ctx),
            Err(LedgerError::InsufficientFunds { .. })
        ));
        assert!(matches!(
            engine.transfer(a, a, cents(1), &ctx),
            Err(LedgerError::SelfReference { .. })
        ));
        assert!(matches!(
            engine.transfer(a, b, Money::ZERO, &ctx),
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert!(matches!(
            engine.transfer(a, UserId::new(), cents(1), &ctx),
            Err(LedgerError::NotFound { .. })
        ));
        assert_eq!(store.wallet(a).unwrap().balance, cents(1_000));
        assert!(store.snapshot().unwrap().journal.is_empty());
    }

    #[test]
    fn escrow_sells_once() {
        let (seller, buyer, rival) = (UserId::new(), UserId::new(), UserId::new());
        let (store, engine) = setup(&[(seller, 0), (buyer, 10_000), (rival, 10_000)]);
        let listing = Listing::new(seller, "Desk lamp", None, cents(2_500)).unwrap();
        let listing_id = listing.id;
        let mut uow = store.begin([]).unwrap();
        uow.insert(Row::Listing(listing));
        uow.commit().unwrap();

        let ctx = OpContext::new();
        let outcome = engine
            .settle_escrow(buyer, seller, listing_id, cents(2_500), &ctx)
            .unwrap();
        assert!(outcome.value.escrow_released);
        assert!(store.listing(listing_id).unwrap().sold);
        assert_eq!(store.wallet(seller).unwrap().balance, cents(2_500));
        assert_eq!(store.order(outcome.value.id).unwrap(), outcome.value);

        assert!(matches!(
            engine.settle_escrow(rival, seller, listing_id, cents(2_500), &ctx),
            Err(LedgerError::Conflict { .. })
        ));
        assert_eq!(store.wallet(rival).unwrap().balance, cents(10_000));
    }

    #[test]
    fn escrow_insufficient_funds_keeps_listing_open() {
        let (seller, buyer) = (UserId::new(), UserId::new());
        let (store, engine) = setup(&[(seller, 0), (buyer, 100)]);
        let listing = Listing::new(seller, "Bike", None, cents(9_000)).unwrap();
        let listing_id = listing.id;
        let mut uow = store.begin([]).unwrap();
        uow.insert(Row::Listing(listing));
        uow.commit().unwrap();

        assert!(matches!(
            engine.settle_escrow(buyer, seller, listing_id, cents(9_000), &OpContext::new()),
            Err(LedgerError::InsufficientFunds { .. })
        ));
        let listing = store.listing(listing_id).unwrap();
        assert!(listing.available && !listing.sold);
        assert!(store.orders_of(buyer).unwrap().is_empty());
    }

    fn insert_loan(store: &Store, lender: UserId, borrower: UserId, c: i64) -> LoanId {
        let loan = Loan::request(lender, borrower, cents(c), None, None).unwrap();
        let id = loan.id;
        let mut uow = store.begin([]).unwrap();
        uow.insert(Row::Loan(loan));
        uow.commit().unwrap();
        id
    }

    #[test]
    fn loan_disburse_then_reverse() {
        let (lender, borrower) = (UserId::new(), UserId::new());
        let (store, engine) = setup(&[(lender, 20_000), (borrower, 0)]);
        let id = insert_loan(&store, lender, borrower, 15_000);
        let ctx = OpContext::new();

        engine.disburse_loan(id, &ctx).unwrap();
        assert_eq!(store.wallet(lender).unwrap().balance, cents(5_000));
        assert_eq!(store.loan(id).unwrap().status, LoanStatus::Active);

        let outcome = engine.reverse_loan(id, &ctx).unwrap();
        assert_eq!(outcome.value.status, LoanStatus::Cancelled);
        assert_eq!(store.wallet(lender).unwrap().balance, cents(20_000));
        assert_eq!(store.wallet(borrower).unwrap().balance, Money::ZERO);
        let types: Vec<EntryType> = outcome.entries.iter().map(|e| e.entry_type).collect();
        assert_eq!(
            types,
            [EntryType::LoanCancelledReturn, EntryType::LoanCancelledRefund]
        );
    }

    #[test]
    fn reverse_after_partial_repayment_is_invalid() {
        let (lender, borrower) = (UserId::new(), UserId::new());
        let (store, engine) = setup(&[(lender, 20_000), (borrower, 0)]);
        let id = insert_loan(&store, lender, borrower, 10_000);
        let ctx = OpContext::new();
        engine.disburse_loan(id, &ctx).unwrap();
        engine.repay_loan(id, borrower, cents(100), &ctx).unwrap();

        let err = engine.reverse_loan(id, &ctx).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState { .. }), "{err:?}");
        assert_eq!(store.loan(id).unwrap().status, LoanStatus::Active);
    }

    #[test]
    fn repayment_clamps_to_remaining() {
        let (lender, borrower) = (UserId::new(), UserId::new());
        let (store, engine) = setup(&[(lender, 10_000), (borrower, 50_000)]);
        let id = insert_loan(&store, lender, borrower, 10_000);
        let ctx = OpContext::new();
        engine.disburse_loan(id, &ctx).unwrap();

        let outcome = engine.repay_loan(id, borrower, cents(25_000), &ctx).unwrap();
        assert_eq!(outcome.value.repayment.amount, cents(10_000));
        assert_eq!(outcome.value.loan.status, LoanStatus::Repaid);
        assert_eq!(store.wallet(borrower).unwrap().balance, cents(50_000));
        assert_eq!(store.wallet(lender).unwrap().balance, cents(10_000));
        assert_eq!(store.repayments(id).unwrap().len(), 1);
    }

    #[test]
    fn only_borrower_repays() {
        let (lender, borrower) = (UserId::new(), UserId::new());
        let (store, engine) = setup(&[(lender, 10_000), (borrower, 0)]);
        let id = insert_loan(&store, lender, borrower, 1_000);
        engine.disburse_loan(id, &OpContext::new()).unwrap();
        assert!(matches!(
            engine.repay_loan(id, lender, cents(100), &OpContext::new()),
            Err(LedgerError::Forbidden { .. })
        ));
    }
}
