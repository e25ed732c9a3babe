//! # campusledger-store
//!
//! The consistency layer under every money-moving operation.
//!
//! - [`LockCoordinator`]: per-row exclusive locks, always acquired in the
//!   total order of [`EntityKey`], with a bounded wait that surfaces as a
//!   retryable `Busy` error.
//! - [`Store`]: the account registry and repositories. Typed reads by id,
//!   no lazy navigation.
//! - [`UnitOfWork`]: the explicit transaction scope. Rows are read only
//!   under lock, mutated on staged copies, and written together with their
//!   ledger entries in one [`UnitOfWork::commit`]. Dropping it is the single
//!   rollback point.
//! - [`LedgerStore`]: append-only, hash-chained journal of completed entries
//!   plus the set of scheduled entries.
//! - [`RequestGuard`]: bounded memory of committed request ids.

pub mod idempotency;
pub mod ledger;
pub mod lock;
pub mod registry;
pub mod unit_of_work;

pub use idempotency::RequestGuard;
pub use ledger::{LedgerQuery, LedgerStore};
pub use lock::{EntityKey, LockCoordinator, LockSet};
pub use registry::{Row, Snapshot, Store};
pub use unit_of_work::{CommitReceipt, UnitOfWork};
