//! # campusledger-types
//!
//! Shared types, errors, and configuration for the **CampusLedger** engine.
//!
//! This crate is the leaf dependency of the workspace. It defines:
//!
//! - **Identifiers**: [`UserId`], [`CardId`], [`LoanId`], [`RepaymentId`], [`ListingId`],
//!   [`OrderId`], [`SubscriptionId`], [`PocketId`], [`EntryId`], [`RequestId`]
//! - **Money**: [`Money`], exact two-digit fixed point
//! - **Accounts**: [`Wallet`], [`BudgetCard`], [`CardPurpose`], [`SavingsPocket`]
//! - **Loans**: [`Loan`], [`LoanStatus`], [`LoanRepayment`]
//! - **Marketplace**: [`Listing`], [`MarketplaceOrder`], [`OrderStatus`]
//! - **Subscriptions**: [`Subscription`], [`SubscriptionStatus`], [`BillingCycle`]
//! - **Ledger**: [`LedgerEntry`], [`EntryType`], [`EntryStatus`], [`EntryLink`], [`WalletEffect`]
//! - **Configuration**: [`EngineConfig`]
//! - **Errors**: [`LedgerError`] with `CL_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod card;
pub mod config;
pub mod constants;
pub mod entry;
pub mod error;
pub mod ids;
pub mod loan;
pub mod marketplace;
pub mod money;
pub mod savings;
pub mod subscription;
pub mod wallet;

// Re-export all primary types at crate root for ergonomic imports:
//   use campusledger_types::{Money, Wallet, Loan, LedgerEntry, ...};

pub use card::*;
pub use config::*;
pub use entry::*;
pub use error::*;
pub use ids::*;
pub use loan::*;
pub use marketplace::*;
pub use money::*;
pub use savings::*;
pub use subscription::*;
pub use wallet::*;

// Constants are accessed via `campusledger_types::constants::FOO`
// (not re-exported to avoid name collisions).
