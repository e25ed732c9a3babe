//! Lock coordinator: deterministic multi-row locking.
//!
//! Every operation names the rows it will touch up front. The coordinator
//! sorts them by the total order of [`EntityKey`] and acquires them one by
//! one in that order, so no two operations can ever wait on each other in a
//! cycle. The order is:
//!
//! ```text
//! Listing < Loan < Subscription < Card < Pocket < Wallet,  then by id
//! ```
//!
//! which puts a listing, loan or card ahead of the wallets it moves money
//! between, and orders two wallets by owner id.
//!
//! Only the named rows are locked; operations on disjoint rows run in
//! parallel. Waiting is bounded: once the deadline passes the acquisition
//! fails with a retryable [`LedgerError::Busy`] and releases whatever it had
//! already taken.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use campusledger_types::{
    CardId, LedgerError, ListingId, LoanId, PocketId, Result, SubscriptionId, UserId,
};

/// A lockable row. Variant order is the global lock order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    Listing(ListingId),
    Loan(LoanId),
    Subscription(SubscriptionId),
    Card(CardId),
    Pocket(PocketId),
    /// Wallets are keyed by their owner.
    Wallet(UserId),
}

impl EntityKey {
    /// Table name, used in `NotFound` errors and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Listing(_) => "listing",
            Self::Loan(_) => "loan",
            Self::Subscription(_) => "subscription",
            Self::Card(_) => "card",
            Self::Pocket(_) => "pocket",
            Self::Wallet(_) => "wallet",
        }
    }

    fn id_string(&self) -> String {
        match self {
            Self::Listing(id) => id.to_string(),
            Self::Loan(id) => id.to_string(),
            Self::Subscription(id) => id.to_string(),
            Self::Card(id) => id.to_string(),
            Self::Pocket(id) => id.to_string(),
            Self::Wallet(id) => id.to_string(),
        }
    }

    /// `NotFound` error for this row.
    #[must_use]
    pub fn not_found(&self) -> LedgerError {
        LedgerError::not_found(self.kind(), self.id_string())
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id_string())
    }
}

/// Grants exclusive per-row locks in the global order.
pub struct LockCoordinator {
    /// Row -> token of the lock set holding it.
    held: Mutex<HashMap<EntityKey, u64>>,
    released: Condvar,
    next_token: AtomicU64,
}

impl LockCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            next_token: AtomicU64::new(1),
        }
    }

    /// Lock every key in `keys` (duplicates are collapsed), in order, waiting
    /// at most `timeout` in total.
    ///
    /// # Errors
    /// [`LedgerError::Busy`] when the deadline passes. Locks taken so far
    /// are released before returning.
    pub fn acquire(
        &self,
        keys: impl IntoIterator<Item = EntityKey>,
        timeout: Duration,
    ) -> Result<LockSet<'_>> {
        let ordered: BTreeSet<EntityKey> = keys.into_iter().collect();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let deadline = started + timeout;

        let mut set = LockSet {
            coordinator: self,
            token,
            keys: Vec::with_capacity(ordered.len()),
        };
        for key in ordered {
            // On error `set` is dropped and releases what it holds.
            self.lock_one(key, token, started, deadline)?;
            set.keys.push(key);
        }
        Ok(set)
    }

    fn lock_one(&self, key: EntityKey, token: u64, started: Instant, deadline: Instant) -> Result<()> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if !held.contains_key(&key) {
                held.insert(key, token);
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                let waited_ms = u64::try_from(now.duration_since(started).as_millis())
                    .unwrap_or(u64::MAX);
                tracing::warn!(resource = %key, waited_ms, "Lock wait timed out");
                return Err(LedgerError::Busy {
                    resource: key.to_string(),
                    waited_ms,
                });
            }
            tracing::debug!(resource = %key, "Waiting for row lock");
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            held = guard;
        }
    }

    fn release(&self, token: u64, keys: &[EntityKey]) {
        if keys.is_empty() {
            return;
        }
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            if held.get(key) == Some(&token) {
                held.remove(key);
            }
        }
        drop(held);
        self.released.notify_all();
    }

    /// Whether some lock set currently holds `key`.
    pub fn is_locked(&self, key: &EntityKey) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Number of rows currently locked.
    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for LockCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Locks held by one unit of work. Released together on drop.
pub struct LockSet<'a> {
    coordinator: &'a LockCoordinator,
    token: u64,
    keys: Vec<EntityKey>,
}

impl LockSet<'_> {
    #[must_use]
    pub fn covers(&self, key: &EntityKey) -> bool {
        self.keys.binary_search(key).is_ok()
    }

    /// Held keys, in acquisition order.
    #[must_use]
    pub fn keys(&self) -> &[EntityKey] {
        &self.keys
    }
}

impl Drop for LockSet<'_> {
    fn drop(&mut self) {
        self.coordinator.release(self.token, &self.keys);
    }
}

impl fmt::Debug for LockSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockSet")
            .field("token", &self.token)
            .field("keys", &self.keys)
            .finish()
    }
}
