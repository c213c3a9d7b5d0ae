//! Bounded concurrent mailbox
//!
//! A `Mailbox` is a key → body store used twice per process: as the *inbox*
//! (bodies awaiting pickup) and as the *outbox* (bodies awaiting acknowledged
//! delivery). It tracks the total body bytes it holds and refuses optimistic
//! inserts that would push it over its limit.
//!
//! Consumed entries leave a *tombstone* behind: the key stays, the body goes.
//! Any caller can therefore distinguish "not yet arrived" (key absent, keep
//! waiting) from "already delivered and consumed" (key present, body gone,
//! stop retrying) without a race. Tombstones are never removed.
//!
//! All operations are race-free under one mutex plus one condition variable.

use std::hash::Hash;
use std::time::{Duration, Instant};

use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};
use tracing::trace;

/// What a present key holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    /// The body has arrived and has not been consumed yet.
    Body(Bytes),
    /// The body was consumed; the key is retained as a dedup marker.
    Tombstone,
}

impl Slot {
    /// The body, if this slot still has one.
    #[must_use]
    pub fn into_body(self) -> Option<Bytes> {
        match self {
            Self::Body(body) => Some(body),
            Self::Tombstone => None,
        }
    }
}

struct Inner<K> {
    map: HashMap<K, Option<Bytes>>,
    size: usize,
}

/// Bounded concurrent key → body store with tombstones and backpressure.
pub struct Mailbox<K> {
    inner: Mutex<Inner<K>>,
    changed: Condvar,
    limit: usize,
}

impl<K: Hash + Eq + Clone> Mailbox<K> {
    /// Create a mailbox holding at most `limit` body bytes.
    /// `usize::MAX` means unbounded: no accounting, no refusals.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                size: 0,
            }),
            changed: Condvar::new(),
            limit,
        }
    }

    /// Insert `body` under `key`. No-op if the key already exists, tombstone
    /// included: redelivered duplicates must never clobber consumed entries.
    pub fn add(&self, key: K, body: Bytes) {
        let mut inner = self.inner.lock();
        if inner.map.contains_key(&key) {
            trace!("mailbox add: key already present");
            return;
        }
        inner.size = inner.size.saturating_add(body.len());
        inner.map.insert(key, Some(body));
        self.changed.notify_all();
    }

    /// As [`add`](Self::add), but refuse (no mutation) if accepting would push
    /// tracked bytes over the limit. An already-present key reports success.
    #[must_use]
    pub fn try_add(&self, key: K, body: Bytes) -> bool {
        let mut inner = self.inner.lock();
        if inner.map.contains_key(&key) {
            return true;
        }
        let grown = inner.size.saturating_add(body.len());
        if grown > self.limit {
            trace!(
                size = inner.size,
                limit = self.limit,
                "mailbox try_add refused"
            );
            return false;
        }
        inner.size = grown;
        inner.map.insert(key, Some(body));
        self.changed.notify_all();
        true
    }

    /// Replace the body under `key` with a tombstone and release its bytes.
    /// No-op on unbounded mailboxes (nothing is accounted) and on keys that
    /// are absent or already tombstoned.
    pub fn discard(&self, key: &K) {
        if self.limit == usize::MAX {
            return;
        }
        let mut inner = self.inner.lock();
        let Some(slot) = inner.map.get_mut(key) else {
            return;
        };
        let Some(body) = slot.take() else {
            return;
        };
        inner.size = inner.size.saturating_sub(body.len());
        self.changed.notify_all();
    }

    /// Wait until `key` is present, tombstone or not.
    ///
    /// Returns `None` if `timeout` expires first; `None` waits forever. A
    /// tombstoned key returns immediately regardless of the timeout.
    pub fn get(&self, key: &K, timeout: Option<Duration>) -> Option<Slot> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.inner.lock();
        loop {
            if let Some(slot) = inner.map.get(key) {
                return Some(match slot {
                    Some(body) => Slot::Body(body.clone()),
                    None => Slot::Tombstone,
                });
            }
            match deadline {
                None => self.changed.wait(&mut inner),
                Some(deadline) => {
                    let now = Instant::now();
                    let Some(remaining) = deadline.checked_duration_since(now).filter(|r| !r.is_zero()) else {
                        return None;
                    };
                    let _ = self.changed.wait_for(&mut inner, remaining);
                }
            }
        }
    }

    /// True if `key` is present but its body has been consumed.
    #[must_use]
    pub fn is_tombstone(&self, key: &K) -> bool {
        let inner = self.inner.lock();
        matches!(inner.map.get(key), Some(None))
    }

    /// Backpressure gate: wait until tracked bytes fall back under the limit.
    pub fn block(&self) {
        let mut inner = self.inner.lock();
        while inner.size > self.limit {
            trace!(
                size = inner.size,
                limit = self.limit,
                "mailbox over limit, blocking"
            );
            self.changed.wait(&mut inner);
        }
    }

    /// Currently tracked body bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.lock().size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn body(n: usize) -> Bytes {
        Bytes::from(vec![0xab; n])
    }

    #[test]
    fn add_is_idempotent() {
        let mailbox = Mailbox::new(usize::MAX);
        mailbox.add(1u64, body(4));
        mailbox.add(1u64, body(100));
        assert_eq!(
            mailbox.get(&1, Some(Duration::ZERO)),
            Some(Slot::Body(body(4)))
        );
    }

    #[test]
    fn try_add_respects_limit() {
        let mailbox = Mailbox::new(10);
        assert!(mailbox.try_add(1u64, body(6)));
        assert!(!mailbox.try_add(2u64, body(6)));
        assert_eq!(mailbox.size(), 6);
        // An existing key reports success without growing the size.
        assert!(mailbox.try_add(1u64, body(6)));
        assert_eq!(mailbox.size(), 6);
        assert!(mailbox.try_add(2u64, body(4)));
        assert_eq!(mailbox.size(), 10);
    }

    #[test]
    fn discard_leaves_tombstone() {
        let mailbox = Mailbox::new(100);
        mailbox.add(7u64, body(8));
        mailbox.discard(&7);
        assert_eq!(mailbox.size(), 0);
        assert!(mailbox.is_tombstone(&7));

        // Re-adding or re-discarding never re-admits a body.
        mailbox.add(7u64, body(8));
        mailbox.discard(&7);
        assert!(mailbox.is_tombstone(&7));
        assert_eq!(mailbox.size(), 0);
    }

    #[test]
    fn get_on_tombstone_returns_immediately() {
        let mailbox = Mailbox::new(100);
        mailbox.add(7u64, body(8));
        mailbox.discard(&7);
        let start = Instant::now();
        let slot = mailbox.get(&7, Some(Duration::from_secs(10)));
        assert_eq!(slot, Some(Slot::Tombstone));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn get_times_out_on_absent_key() {
        let mailbox: Mailbox<u64> = Mailbox::new(100);
        let slot = mailbox.get(&42, Some(Duration::from_millis(50)));
        assert_eq!(slot, None);
    }

    #[test]
    fn get_wakes_on_add() {
        let mailbox = Arc::new(Mailbox::new(100));
        let writer = Arc::clone(&mailbox);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            writer.add(3u64, body(2));
        });
        let slot = mailbox.get(&3, Some(Duration::from_secs(5)));
        assert_eq!(slot, Some(Slot::Body(body(2))));
        handle.join().unwrap();
    }

    #[test]
    fn block_returns_once_under_limit() {
        let mailbox = Arc::new(Mailbox::new(4));
        mailbox.add(1u64, body(8));
        assert_eq!(mailbox.size(), 8);

        let discarder = Arc::clone(&mailbox);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            discarder.discard(&1);
        });
        mailbox.block();
        assert!(mailbox.size() <= 4);
        handle.join().unwrap();
    }

    #[test]
    fn unbounded_discard_is_a_noop() {
        let mailbox = Mailbox::new(usize::MAX);
        mailbox.add(1u64, body(8));
        mailbox.discard(&1);
        // No accounting on unbounded mailboxes, so the body stays.
        assert_eq!(
            mailbox.get(&1, Some(Duration::ZERO)),
            Some(Slot::Body(body(8)))
        );
    }
}
