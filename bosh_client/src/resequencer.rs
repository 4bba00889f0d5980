//! Restores rid order among completed exchanges.
//!
//! Exchanges overlap, so a response to rid `n + 1` may arrive before the one
//! to rid `n`. In [`ResponseOrder::Ordered`] mode the early one is parked
//! until every lower rid has either completed or been skipped (its exchange
//! failed and its items were requeued under a new rid).

use std::collections::{BTreeMap, BTreeSet};

use crate::config::ResponseOrder;

/// Parks out-of-order completions and releases them in rid order.
#[derive(Debug)]
pub struct Resequencer<T> {
    order: ResponseOrder,
    next: u64,
    parked: BTreeMap<u64, T>,
    skipped: BTreeSet<u64>,
}

impl<T> Resequencer<T> {
    /// Resequencer whose first expected rid is `first_rid`.
    #[must_use]
    pub const fn new(first_rid: u64, order: ResponseOrder) -> Self {
        Self {
            order,
            next: first_rid,
            parked: BTreeMap::new(),
            skipped: BTreeSet::new(),
        }
    }

    /// Record the completion of `rid`; returns everything now deliverable,
    /// in rid order.
    pub fn complete(&mut self, rid: u64, value: T) -> Vec<(u64, T)> {
        if self.order == ResponseOrder::Unordered || rid < self.next {
            return vec![(rid, value)];
        }
        self.parked.insert(rid, value);
        self.release()
    }

    /// Record that `rid` will never complete; returns anything it was
    /// holding back.
    pub fn skip(&mut self, rid: u64) -> Vec<(u64, T)> {
        if self.order == ResponseOrder::Unordered || rid < self.next {
            return Vec::new();
        }
        self.skipped.insert(rid);
        self.release()
    }

    /// Number of completions waiting on a predecessor.
    #[must_use]
    pub fn parked(&self) -> usize {
        self.parked.len()
    }

    /// Drop all parked completions.
    pub fn clear(&mut self) {
        self.parked.clear();
        self.skipped.clear();
    }

    fn release(&mut self) -> Vec<(u64, T)> {
        let mut ready = Vec::new();
        loop {
            if self.skipped.remove(&self.next) {
                self.next += 1;
            } else if let Some(value) = self.parked.remove(&self.next) {
                ready.push((self.next, value));
                self.next += 1;
            } else {
                break;
            }
        }
        ready
    }
}
