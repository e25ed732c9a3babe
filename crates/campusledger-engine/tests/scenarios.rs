//! End-to-end scenarios through the public [`Ledger`] facade.
//!
//! Each test opens wallets, funds them with top-ups, runs a flow, and
//! finishes with a full reconciliation so every balance is also proven
//! against the journal.

use campusledger_engine::{Ledger, NewSubscription, OpContext};
use campusledger_store::LedgerQuery;
use campusledger_types::{
    EngineConfig, EntryType, LedgerError, LoanStatus, Money, RequestId, UserId,
};
use chrono::NaiveDate;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn cents(c: i64) -> Money {
    Money::from_cents(c)
}

/// A ledger with one funded wallet per entry of `balances`.
fn ledger_with(balances: &[i64]) -> (Ledger, Vec<UserId>) {
    init_tracing();
    let ledger = Ledger::new(EngineConfig::default()).unwrap();
    let accounts = ledger.accounts();
    let users: Vec<UserId> = balances
        .iter()
        .map(|&balance| {
            let user = UserId::new();
            accounts.open_wallet(user).unwrap();
            if balance > 0 {
                accounts
                    .top_up(user, cents(balance), "bank", &OpContext::new())
                    .unwrap();
            }
            user
        })
        .collect();
    (ledger, users)
}

fn balance(ledger: &Ledger, user: UserId) -> Money {
    ledger.store().wallet(user).unwrap().balance
}

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

#[test]
fn transfer_scenario() {
    let (ledger, users) = ledger_with(&[10_000, 0]);
    let (a, b) = (users[0], users[1]);

    let outcome = ledger
        .transfers()
        .transfer(a, b, cents(3_000), &OpContext::new().with_note("Pizza"))
        .unwrap();

    assert_eq!(balance(&ledger, a), cents(7_000));
    assert_eq!(balance(&ledger, b), cents(3_000));
    assert_eq!(outcome.entries.len(), 2);
    assert!(outcome.entries.iter().all(|e| e.amount == cents(3_000)));
    assert_eq!(
        ledger
            .store()
            .entries(&LedgerQuery::for_owner(b).of_type(EntryType::TransferReceived))
            .unwrap()
            .len(),
        1
    );
    ledger.reconciler().run().unwrap();
}

#[test]
fn conservation_across_transfer() {
    let (ledger, users) = ledger_with(&[50_000, 20_000]);
    let (a, b) = (users[0], users[1]);
    let before = balance(&ledger, a) + balance(&ledger, b);

    ledger.transfers().transfer(a, b, cents(12_345), &OpContext::new()).unwrap();
    ledger.transfers().transfer(b, a, cents(345), &OpContext::new()).unwrap();

    assert_eq!(balance(&ledger, a) + balance(&ledger, b), before);
    ledger.reconciler().run().unwrap();
}

#[test]
fn frozen_wallet_cannot_send_but_can_receive() {
    let (ledger, users) = ledger_with(&[10_000, 10_000]);
    let (a, b) = (users[0], users[1]);
    ledger.accounts().freeze_wallet(a).unwrap();

    assert!(matches!(
        ledger.transfers().transfer(a, b, cents(100), &OpContext::new()),
        Err(LedgerError::Forbidden { .. })
    ));
    ledger.transfers().transfer(b, a, cents(100), &OpContext::new()).unwrap();
    assert_eq!(balance(&ledger, a), cents(10_100));

    ledger.accounts().unfreeze_wallet(a).unwrap();
    ledger.transfers().transfer(a, b, cents(100), &OpContext::new()).unwrap();
}

#[test]
fn retried_request_is_applied_once() {
    let (ledger, users) = ledger_with(&[10_000, 0]);
    let (a, b) = (users[0], users[1]);
    let ctx = OpContext::new().with_request(RequestId::new());

    ledger.transfers().transfer(a, b, cents(1_000), &ctx).unwrap();
    let retry = ledger.transfers().transfer(a, b, cents(1_000), &ctx);

    assert!(matches!(retry, Err(LedgerError::Conflict { .. })));
    assert_eq!(balance(&ledger, b), cents(1_000));
}

// ---------------------------------------------------------------------------
// Budget cards
// ---------------------------------------------------------------------------

#[test]
fn budget_scenario() {
    let (ledger, users) = ledger_with(&[7_000]);
    let a = users[0];
    let budgets = ledger.budgets();
    let ctx = OpContext::new();
    let card = budgets.create_budget_card(a, "Groceries", "groceries", None).unwrap();

    budgets.allocate(a, card.id, cents(5_000), &ctx).unwrap();
    assert_eq!(balance(&ledger, a), cents(2_000));
    assert_eq!(budgets.card(card.id).unwrap().allocated, cents(5_000));

    let spent = budgets.spend(a, card.id, cents(3_000), Some("Market"), &ctx).unwrap();
    assert_eq!(spent.value.spent, cents(3_000));
    assert_eq!(spent.value.remaining(), cents(2_000));

    let before = budgets.card(card.id).unwrap();
    let err = budgets.spend(a, card.id, cents(2_500), None, &ctx).unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientBudget { available, .. } if available == cents(2_000)));
    assert_eq!(budgets.card(card.id).unwrap(), before);

    ledger.reconciler().run().unwrap();
}

#[test]
fn allocation_failure_leaves_no_trace() {
    let (ledger, users) = ledger_with(&[1_000]);
    let a = users[0];
    let card = ledger
        .budgets()
        .create_budget_card(a, "Rent", "rent", None)
        .unwrap();
    let journal_before = ledger.store().snapshot().unwrap().journal.len();

    assert!(matches!(
        ledger.budgets().allocate(a, card.id, cents(1_001), &OpContext::new()),
        Err(LedgerError::InsufficientFunds { .. })
    ));

    assert_eq!(ledger.store().card(card.id).unwrap().allocated, Money::ZERO);
    assert_eq!(balance(&ledger, a), cents(1_000));
    assert_eq!(ledger.store().snapshot().unwrap().journal.len(), journal_before);
}

// ---------------------------------------------------------------------------
// Loans
// ---------------------------------------------------------------------------

#[test]
fn loan_scenario() {
    let (ledger, users) = ledger_with(&[20_000, 1_000]);
    let (lender, borrower) = (users[0], users[1]);
    let loans = ledger.loans();
    let ctx = OpContext::new();

    let loan = loans
        .request(borrower, lender, cents(15_000), Some("Textbooks".into()), None)
        .unwrap();
    assert_eq!(loan.status, LoanStatus::Pending);
    assert_eq!(balance(&ledger, lender), cents(20_000));

    let approved = loans.approve(lender, loan.id, &ctx).unwrap();
    assert_eq!(approved.value.status, LoanStatus::Active);
    assert_eq!(balance(&ledger, lender), cents(5_000));
    assert_eq!(balance(&ledger, borrower), cents(16_000));

    let repaid = loans.repay(borrower, loan.id, cents(15_000), &ctx).unwrap();
    assert_eq!(repaid.value.loan.status, LoanStatus::Repaid);
    assert_eq!(repaid.value.loan.amount_repaid, cents(15_000));
    assert_eq!(balance(&ledger, borrower), cents(1_000));
    assert_eq!(balance(&ledger, lender), cents(20_000));

    assert!(matches!(
        loans.repay(borrower, loan.id, cents(1), &ctx),
        Err(LedgerError::InvalidState { .. })
    ));
    ledger.reconciler().run().unwrap();
}

#[test]
fn approval_without_funds_keeps_loan_pending() {
    let (ledger, users) = ledger_with(&[1_000, 0]);
    let (lender, borrower) = (users[0], users[1]);
    let loan = ledger
        .loans()
        .request(borrower, lender, cents(5_000), None, None)
        .unwrap();

    assert!(matches!(
        ledger.loans().approve(lender, loan.id, &OpContext::new()),
        Err(LedgerError::InsufficientFunds { .. })
    ));
    assert_eq!(ledger.loans().loan(loan.id).unwrap().status, LoanStatus::Pending);
    assert_eq!(balance(&ledger, borrower), Money::ZERO);
}

#[test]
fn cancellation_writes_its_own_entry_pair() {
    let (ledger, users) = ledger_with(&[10_000, 0]);
    let (lender, borrower) = (users[0], users[1]);
    let ctx = OpContext::new();
    let loan = ledger.loans().request(borrower, lender, cents(4_000), None, None).unwrap();
    ledger.loans().approve(lender, loan.id, &ctx).unwrap();

    assert!(matches!(
        ledger.loans().cancel(borrower, loan.id, &ctx),
        Err(LedgerError::Forbidden { .. })
    ));
    let cancelled = ledger.loans().cancel(lender, loan.id, &ctx).unwrap();
    assert_eq!(cancelled.value.status, LoanStatus::Cancelled);
    assert_eq!(balance(&ledger, lender), cents(10_000));

    let returns = ledger
        .store()
        .entries(&LedgerQuery::for_owner(borrower).of_type(EntryType::LoanCancelledReturn))
        .unwrap();
    assert_eq!(returns.len(), 1);
    assert!(
        ledger
            .store()
            .entries(&LedgerQuery::for_owner(borrower).of_type(EntryType::LoanRepayment))
            .unwrap()
            .is_empty()
    );
    ledger.reconciler().run().unwrap();
}

// ---------------------------------------------------------------------------
// Marketplace, subscriptions, savings
// ---------------------------------------------------------------------------

#[test]
fn marketplace_sale_settles_once() {
    let (ledger, users) = ledger_with(&[0, 10_000, 10_000]);
    let (seller, buyer, late) = (users[0], users[1], users[2]);
    let market = ledger.marketplace();
    let listing = market
        .create_listing(seller, "Mini fridge", Some("appliances".into()), cents(6_000))
        .unwrap();

    let order = market.purchase(buyer, listing.id, &OpContext::new()).unwrap().value;
    assert!(order.escrow_released);
    assert_eq!(order.amount, cents(6_000));
    assert!(matches!(
        market.purchase(late, listing.id, &OpContext::new()),
        Err(LedgerError::Conflict { .. })
    ));
    assert_eq!(balance(&ledger, seller), cents(6_000));
    assert_eq!(balance(&ledger, late), cents(10_000));
    ledger.reconciler().run().unwrap();
}

#[test]
fn subscription_billing_cycle() {
    let (ledger, users) = ledger_with(&[3_000]);
    let owner = users[0];
    let subs = ledger.subscriptions();
    let first_bill = NaiveDate::from_ymd_opt(2026, 9, 15).unwrap();
    let cards = ledger.budgets().ensure_default_cards(owner).unwrap();

    let sub = subs
        .subscribe(
            owner,
            NewSubscription::new("Streaming", cents(1_299), first_bill).on_card(cards.subscriptions.id),
            &OpContext::new(),
        )
        .unwrap()
        .value;
    assert_eq!(subs.due(first_bill).unwrap().len(), 1);

    subs.charge(sub.id, &OpContext::new()).unwrap();
    subs.charge(sub.id, &OpContext::new()).unwrap();
    assert!(matches!(
        subs.charge(sub.id, &OpContext::new()),
        Err(LedgerError::InsufficientFunds { .. })
    ));

    let sub = subs.subscription(sub.id).unwrap();
    assert_eq!(sub.total_paid, cents(2_598));
    assert_eq!(sub.next_billing_date, NaiveDate::from_ymd_opt(2026, 11, 15).unwrap());
    assert_eq!(balance(&ledger, owner), cents(402));
    let upcoming = ledger
        .expected_payments()
        .upcoming(owner, NaiveDate::from_ymd_opt(2026, 11, 1).unwrap())
        .unwrap();
    assert_eq!(upcoming.len(), 1);
    ledger.reconciler().run().unwrap();
}

#[test]
fn savings_and_payment_cards_reconcile() {
    let (ledger, users) = ledger_with(&[50_000]);
    let owner = users[0];
    let ctx = OpContext::new();
    let cards = ledger.budgets().ensure_default_cards(owner).unwrap();
    let pocket = ledger.savings().open_pocket(owner, "Spring break", None).unwrap();

    ledger.savings().deposit(owner, pocket.id, cents(20_000), &ctx).unwrap();
    ledger
        .budgets()
        .pay(owner, cards.standard.id, cents(4_500), "Bookstore", &ctx)
        .unwrap();
    ledger
        .savings()
        .withdraw(owner, pocket.id, cents(5_000), None, &ctx)
        .unwrap();

    assert_eq!(balance(&ledger, owner), cents(30_500));
    let report = ledger.reconciler().run().unwrap();
    assert_eq!(report.held, cents(45_500));
    assert_eq!(report.outflows, cents(4_500));
}

#[test]
fn reads_are_stable_without_writes() {
    let (ledger, users) = ledger_with(&[1_000, 1_000]);
    let store = ledger.store();
    assert_eq!(store.wallet(users[0]).unwrap(), store.wallet(users[0]).unwrap());
    let loan = ledger.loans().request(users[1], users[0], cents(10), None, None).unwrap();
    assert_eq!(store.loan(loan.id).unwrap(), store.loan(loan.id).unwrap());
    assert_eq!(store.head_digest().unwrap(), store.head_digest().unwrap());
}
