//! Ledger entries: the system of record.
//!
//! Every successful mutation is represented by one or more entries, each
//! owned by the user whose balance it describes. A `completed` entry is
//! immutable and carries a [`WalletEffect`], so replaying the completed
//! entries of an owner rebuilds that owner's wallet balance exactly.
//! A `scheduled` entry is a known future payment with no balance effect
//! until an explicit charge realizes it.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CardId, EntryId, ListingId, LoanId, Money, OrderId, PocketId, SubscriptionId, UserId};

/// What happened. Serialized in `snake_case` (`transfer_sent`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Topup,
    TransferSent,
    TransferReceived,
    Purchase,
    Sale,
    LoanDisbursement,
    LoanReceived,
    LoanRepayment,
    LoanRepaymentReceived,
    /// Lender side of a cancelled loan: the disbursement comes back.
    LoanCancelledRefund,
    /// Borrower side of a cancelled loan: the disbursement is returned.
    LoanCancelledReturn,
    BudgetAllocation,
    BudgetExpense,
    BudgetWithdrawal,
    CardPayment,
    SubscriptionPayment,
    SavingsDeposit,
    SavingsWithdrawal,
    /// User-declared future bill. Only ever `scheduled`.
    ExpectedPayment,
}

/// How a completed entry moves its owner's wallet balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WalletEffect {
    Credit,
    Debit,
    /// Internal to a card or pocket; the wallet is untouched.
    None,
}

impl EntryType {
    #[must_use]
    pub fn wallet_effect(self) -> WalletEffect {
        match self {
            Self::Topup
            | Self::TransferReceived
            | Self::Sale
            | Self::LoanReceived
            | Self::LoanRepaymentReceived
            | Self::LoanCancelledRefund
            | Self::BudgetWithdrawal
            | Self::SavingsWithdrawal => WalletEffect::Credit,
            Self::TransferSent
            | Self::Purchase
            | Self::LoanDisbursement
            | Self::LoanRepayment
            | Self::LoanCancelledReturn
            | Self::BudgetAllocation
            | Self::CardPayment
            | Self::SubscriptionPayment
            | Self::SavingsDeposit => WalletEffect::Debit,
            Self::BudgetExpense | Self::ExpectedPayment => WalletEffect::None,
        }
    }

    /// Stable `snake_case` tag, identical to the serialized form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Topup => "topup",
            Self::TransferSent => "transfer_sent",
            Self::TransferReceived => "transfer_received",
            Self::Purchase => "purchase",
            Self::Sale => "sale",
            Self::LoanDisbursement => "loan_disbursement",
            Self::LoanReceived => "loan_received",
            Self::LoanRepayment => "loan_repayment",
            Self::LoanRepaymentReceived => "loan_repayment_received",
            Self::LoanCancelledRefund => "loan_cancelled_refund",
            Self::LoanCancelledReturn => "loan_cancelled_return",
            Self::BudgetAllocation => "budget_allocation",
            Self::BudgetExpense => "budget_expense",
            Self::BudgetWithdrawal => "budget_withdrawal",
            Self::CardPayment => "card_payment",
            Self::SubscriptionPayment => "subscription_payment",
            Self::SavingsDeposit => "savings_deposit",
            Self::SavingsWithdrawal => "savings_withdrawal",
            Self::ExpectedPayment => "expected_payment",
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Completed,
    Scheduled,
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Scheduled => write!(f, "scheduled"),
        }
    }
}

/// Recurrence of a user-declared expected payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    OneTime,
    Weekly,
    Monthly,
}

/// The domain object an entry belongs to, besides its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryLink {
    Loan { loan: LoanId },
    Order { order: OrderId, listing: ListingId },
    Subscription { subscription: SubscriptionId },
    Pocket { pocket: PocketId },
    /// Generated occurrence of a recurring expected payment.
    Recurrence { template: EntryId },
}

/// One immutable ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub owner: UserId,
    pub entry_type: EntryType,
    pub status: EntryStatus,
    pub amount: Money,
    pub currency: String,
    pub sender: Option<UserId>,
    pub receiver: Option<UserId>,
    pub card_id: Option<CardId>,
    pub link: Option<EntryLink>,
    pub frequency: Option<Frequency>,
    pub description: Option<String>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    /// Due date of a scheduled entry.
    pub due_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    fn base(
        owner: UserId,
        entry_type: EntryType,
        status: EntryStatus,
        amount: Money,
        currency: &str,
    ) -> Self {
        Self {
            id: EntryId::new(),
            owner,
            entry_type,
            status,
            amount,
            currency: currency.to_string(),
            sender: None,
            receiver: None,
            card_id: None,
            link: None,
            frequency: None,
            description: None,
            metadata: Map::new(),
            created_at: Utc::now(),
            due_at: None,
            completed_at: None,
        }
    }

    /// A completed entry stamped now.
    #[must_use]
    pub fn completed(owner: UserId, entry_type: EntryType, amount: Money, currency: &str) -> Self {
        let mut entry = Self::base(owner, entry_type, EntryStatus::Completed, amount, currency);
        entry.completed_at = Some(entry.created_at);
        entry
    }

    /// A scheduled entry due at the start of `due` (UTC).
    #[must_use]
    pub fn scheduled(
        owner: UserId,
        entry_type: EntryType,
        amount: Money,
        currency: &str,
        due: NaiveDate,
    ) -> Self {
        let mut entry = Self::base(owner, entry_type, EntryStatus::Scheduled, amount, currency);
        entry.due_at = Some(start_of_day(due));
        entry
    }

    #[must_use]
    pub fn between(mut self, sender: UserId, receiver: UserId) -> Self {
        self.sender = Some(sender);
        self.receiver = Some(receiver);
        self
    }

    #[must_use]
    pub fn on_card(mut self, card: CardId) -> Self {
        self.card_id = Some(card);
        self
    }

    #[must_use]
    pub fn linked(mut self, link: EntryLink) -> Self {
        self.link = Some(link);
        self
    }

    #[must_use]
    pub fn recurring(mut self, frequency: Frequency) -> Self {
        self.frequency = Some(frequency);
        self
    }

    #[must_use]
    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Merge caller metadata. Existing keys are overwritten.
    #[must_use]
    pub fn with_metadata(mut self, metadata: &Map<String, Value>) -> Self {
        self.metadata
            .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    #[must_use]
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Signed change this entry applies to its owner's wallet. Zero for
    /// scheduled entries and card-internal types.
    #[must_use]
    pub fn wallet_delta(&self) -> Money {
        if self.status != EntryStatus::Completed {
            return Money::ZERO;
        }
        match self.entry_type.wallet_effect() {
            WalletEffect::Credit => self.amount,
            WalletEffect::Debit => -self.amount,
            WalletEffect::None => Money::ZERO,
        }
    }

    /// Due date of a scheduled entry, as a calendar day.
    #[must_use]
    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_at.map(|at| at.date_naive())
    }
}

/// Midnight UTC at the start of `date`.
#[must_use]
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
