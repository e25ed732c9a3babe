//! Request idempotency guard: a request id commits at most once.
//!
//! Callers that retry after a `Busy` error (or after losing the response)
//! resend the same `RequestId`. The first commit claims it; any later commit
//! carrying it fails with [`LedgerError::Conflict`] and writes nothing.
//!
//! The guard keeps a bounded set so memory stays predictable in a
//! long-running process; the oldest ids are forgotten first.

use std::collections::{HashSet, VecDeque};

use campusledger_types::{LedgerError, RequestId, Result};

/// Bounded set of request ids that already committed.
pub struct RequestGuard {
    seen: HashSet<RequestId>,
    /// Insertion order for eviction (front = oldest).
    order: VecDeque<RequestId>,
    max_size: usize,
}

impl RequestGuard {
    /// # Panics
    /// Panics if `max_size` is zero.
    pub fn new(max_size: usize) -> Self {
        assert!(max_size > 0, "RequestGuard max_size must be > 0");
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            max_size,
        }
    }

    /// Fail if `request` already committed.
    pub fn check(&self, request: RequestId) -> Result<()> {
        if self.seen.contains(&request) {
            return Err(LedgerError::conflict(format!(
                "request {request} was already processed"
            )));
        }
        Ok(())
    }

    /// Remember `request` as committed.
    pub fn claim(&mut self, request: RequestId) -> Result<()> {
        self.check(request)?;
        if self.seen.len() >= self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(request);
        self.order.push_back(request);
        Ok(())
    }

    pub fn is_processed(&self, request: &RequestId) -> bool {
        self.seen.contains(request)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
