//! Bounded-delay write coalescing
//!
//! Each key holds at most one pending value and one deadline. Pushing to a
//! key folds the new value into the pending one and restarts its quiet
//! period, so only the accumulated value survives once the key goes quiet.
//! The queue never sleeps on its own; a driver asks for `next_deadline` and
//! calls `drain_due` when it passes.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

struct Pending<V> {
    value: V,
    deadline: Instant,
}

/// Per-key coalescing queue
pub struct WriteCoalescer<K, V> {
    delay: Duration,
    pending: HashMap<K, Pending<V>>,
}

impl<K, V> WriteCoalescer<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: HashMap::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Queue `value` under `key`, folding into any pending value with `merge`
    ///
    /// Returns the key's new deadline.
    pub fn push<F>(&mut self, key: K, value: V, now: Instant, merge: F) -> Instant
    where
        F: FnOnce(V, V) -> V,
    {
        let deadline = now + self.delay;
        let value = match self.pending.remove(&key) {
            Some(previous) => merge(previous.value, value),
            None => value,
        };
        self.pending.insert(key, Pending { value, deadline });
        deadline
    }

    /// Remove and return every entry whose deadline is at or before `now`
    ///
    /// Entries come back in deadline order.
    pub fn drain_due(&mut self, now: Instant) -> Vec<(K, V)> {
        let due: Vec<K> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(k, _)| k.clone())
            .collect();

        let mut drained: Vec<(Instant, K, V)> = due
            .into_iter()
            .filter_map(|k| self.pending.remove(&k).map(|p| (p.deadline, k, p.value)))
            .collect();
        drained.sort_by_key(|(deadline, _, _)| *deadline);
        drained.into_iter().map(|(_, k, v)| (k, v)).collect()
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    pub fn pending(&self, key: &K) -> Option<&V> {
        self.pending.get(key).map(|p| &p.value)
    }

    /// Drop a pending write
    pub fn cancel(&mut self, key: &K) -> Option<V> {
        self.pending.remove(key).map(|p| p.value)
    }

    /// Drop every pending write whose key matches
    pub fn cancel_where<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&K) -> bool,
    {
        let before = self.pending.len();
        self.pending.retain(|k, _| !predicate(k));
        before - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
