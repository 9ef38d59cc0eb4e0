use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use quanta::Clock;
use quanta::Instant;
use tracing::debug;

use crate::error::LimitError;
use crate::types::Current;
use crate::types::Expiry;
use crate::types::Mutation;
use crate::types::StoreInstant;
use crate::types::StoredValue;

/// A key-value store offering an atomic read-modify-write per key.
///
/// `atomic_execute` hands `update` the current state of `key` together with
/// the store's clock, applies the returned [`Mutation`] and yields the result.
/// No other `atomic_execute` on the same key can observe anything between the
/// read and the write.
///
/// `update` runs while the key is held. It must be a pure function of its
/// input and must not call back into the store.
///
/// # Errors
///
/// * [`LimitError::StoreUnavailable`] if the backing medium cannot be reached.
/// * [`LimitError::EntryCorrupt`] if the stored value cannot be interpreted.
/// * Any error returned by `update`, in which case nothing is written.
pub trait AtomicStore: Send + Sync {
    fn atomic_execute<R, F>(&self, key: &str, update: F) -> Result<R, LimitError>
    where
        F: FnOnce(Current) -> Result<(Mutation, R), LimitError>;
}

impl<S: AtomicStore> AtomicStore for Arc<S> {
    fn atomic_execute<R, F>(&self, key: &str, update: F) -> Result<R, LimitError>
    where
        F: FnOnce(Current) -> Result<(Mutation, R), LimitError>,
    {
        self.as_ref().atomic_execute(key, update)
    }
}

impl<S: AtomicStore> AtomicStore for &S {
    fn atomic_execute<R, F>(&self, key: &str, update: F) -> Result<R, LimitError>
    where
        F: FnOnce(Current) -> Result<(Mutation, R), LimitError>,
    {
        (**self).atomic_execute(key, update)
    }
}

#[derive(Debug)]
struct Slot {
    value: StoredValue,
    expires_at: Option<StoreInstant>,
}

impl Slot {
    fn new(
        value: StoredValue,
        expiry: Expiry,
        previous: Option<StoreInstant>,
        now: StoreInstant,
    ) -> Self {
        let expires_at = match expiry {
            Expiry::Keep => previous,
            // Saturates at the end of the clock rather than wrapping.
            Expiry::After(ttl) => Some(now.saturating_add(ttl)),
            Expiry::Never => None,
        };
        Self { value, expires_at }
    }

    fn is_live(&self, now: StoreInstant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }

    fn current(&self, now: StoreInstant) -> Current {
        Current {
            value: Some(self.value),
            expires_at: self.expires_at,
            now,
        }
    }
}

/// An in-process [`AtomicStore`].
///
/// Keys live in a sharded map. The shard lock for a key is held for the whole
/// of `atomic_execute`, so updates to one key are serialised while keys in
/// other shards proceed in parallel.
///
/// Expiry is lazy: an expired slot reads as absent and is replaced or dropped
/// the next time its key is executed. [`MemoryStore::purge_expired`] sweeps
/// the rest.
#[derive(Debug)]
pub struct MemoryStore {
    slots: DashMap<String, Slot>,
    clock: Clock,
    /// A fixed point in time to measure store instants from.
    anchor: Instant,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Clock::new())
    }

    /// Creates a store driven by `clock`, e.g. a `quanta` mock clock in tests.
    pub fn with_clock(clock: Clock) -> Self {
        let anchor = clock.now();
        Self {
            slots: DashMap::new(),
            clock,
            anchor,
        }
    }

    /// The store's clock. Every caller sharing this store sees the same time.
    pub fn now(&self) -> StoreInstant {
        self.clock.now().duration_since(self.anchor)
    }

    /// Writes `value` under `key` unconditionally.
    pub fn set(&self, key: &str, value: StoredValue, expiry: Expiry) -> Result<(), LimitError> {
        self.atomic_execute(key, |_| Ok((Mutation::Set { value, expiry }, ())))
    }

    /// Removes `key`, returning its value if it was still live.
    pub fn remove(&self, key: &str) -> Option<StoredValue> {
        let now = self.now();
        self.slots
            .remove(key)
            .filter(|(_, slot)| slot.is_live(now))
            .map(|(_, slot)| slot.value)
    }

    /// Returns the live value under `key` without touching it.
    ///
    /// Meant for inspection; limiters never read outside `atomic_execute`.
    pub fn peek(&self, key: &str) -> Option<StoredValue> {
        let now = self.now();
        self.slots
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.value)
    }

    /// Drops every expired slot and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.now();
        let mut purged = 0;
        self.slots.retain(|_, slot| {
            let live = slot.is_live(now);
            if !live {
                purged += 1;
            }
            live
        });
        debug!(purged, "purged expired slots");
        purged
    }

    /// Number of slots held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl AtomicStore for MemoryStore {
    fn atomic_execute<R, F>(&self, key: &str, update: F) -> Result<R, LimitError>
    where
        F: FnOnce(Current) -> Result<(Mutation, R), LimitError>,
    {
        // The entry guard holds the key's shard until the write is applied.
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let now = self.now();
                let live = occupied.get().is_live(now);
                let current = if live {
                    occupied.get().current(now)
                } else {
                    Current::absent(now)
                };
                let (mutation, result) = update(current)?;
                match mutation {
                    Mutation::Keep if !live => {
                        occupied.remove();
                    }
                    Mutation::Keep => {}
                    Mutation::Set { value, expiry } => {
                        occupied.insert(Slot::new(value, expiry, current.expires_at, now));
                    }
                }
                Ok(result)
            }
            Entry::Vacant(vacant) => {
                let now = self.now();
                let (mutation, result) = update(Current::absent(now))?;
                if let Mutation::Set { value, expiry } = mutation {
                    vacant.insert(Slot::new(value, expiry, None, now));
                }
                Ok(result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn mock_store() -> (MemoryStore, Arc<quanta::Mock>) {
        let (clock, mock) = Clock::mock();
        (MemoryStore::with_clock(clock), mock)
    }

    fn increment(store: &MemoryStore, key: &str, expiry: Expiry) -> u64 {
        store
            .atomic_execute(key, |current| {
                let next = match current.value {
                    Some(StoredValue::Counter(count)) => count + 1,
                    _ => 1,
                };
                Ok((
                    Mutation::Set {
                        value: StoredValue::Counter(next),
                        expiry,
                    },
                    next,
                ))
            })
            .unwrap()
    }

    #[test]
    fn it_reports_absent_keys() {
        let (store, _mock) = mock_store();
        let seen = store
            .atomic_execute("missing", |current| Ok((Mutation::Keep, current)))
            .unwrap();
        assert_eq!(seen, Current::absent(Duration::ZERO));
        assert!(store.is_empty());
    }

    #[test]
    fn it_keeps_the_first_expiry() {
        let (store, mock) = mock_store();
        increment(&store, "k", Expiry::After(Duration::from_secs(10)));

        mock.increment(Duration::from_secs(4));
        increment(&store, "k", Expiry::Keep);

        mock.increment(Duration::from_secs(5));
        assert_eq!(store.peek("k"), Some(StoredValue::Counter(2)));

        // 10s after the first write, regardless of the second
        mock.increment(Duration::from_secs(1));
        assert_eq!(store.peek("k"), None);
    }

    #[test]
    fn expired_slots_read_as_absent() {
        let (store, mock) = mock_store();
        increment(&store, "k", Expiry::After(Duration::from_millis(50)));
        mock.increment(Duration::from_millis(50));

        assert_eq!(increment(&store, "k", Expiry::Keep), 1);
        // Keep on an expired slot carries no expiry forward
        mock.increment(Duration::from_secs(3600));
        assert_eq!(store.peek("k"), Some(StoredValue::Counter(1)));
    }

    #[test]
    fn keep_on_an_expired_slot_drops_it() {
        let (store, mock) = mock_store();
        increment(&store, "k", Expiry::After(Duration::from_secs(1)));
        mock.increment(Duration::from_secs(2));

        store
            .atomic_execute("k", |_| Ok((Mutation::Keep, ())))
            .unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn failed_updates_write_nothing() {
        let (store, _mock) = mock_store();
        increment(&store, "k", Expiry::Never);

        let result: Result<(), _> = store.atomic_execute("k", |_| {
            Err(LimitError::StoreUnavailable("update refused".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.peek("k"), Some(StoredValue::Counter(1)));
    }

    #[test]
    fn it_purges_only_expired_slots() {
        let (store, mock) = mock_store();
        increment(&store, "short", Expiry::After(Duration::from_secs(1)));
        increment(&store, "long", Expiry::After(Duration::from_secs(60)));
        increment(&store, "forever", Expiry::Never);

        mock.increment(Duration::from_secs(2));
        assert_eq!(store.len(), 3);
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.remove("long"), Some(StoredValue::Counter(1)));
        assert_eq!(store.remove("short"), None);
    }

    #[test]
    fn set_overwrites_any_value() {
        let (store, _mock) = mock_store();
        increment(&store, "k", Expiry::Never);
        store.set("k", StoredValue::Counter(42), Expiry::Keep).unwrap();
        assert_eq!(store.peek("k"), Some(StoredValue::Counter(42)));
    }

    fn read<S: AtomicStore>(store: S, key: &str) -> Option<StoredValue> {
        store
            .atomic_execute(key, |current| Ok((Mutation::Keep, current.value)))
            .unwrap()
    }

    #[test]
    fn shared_handles_see_one_store() {
        let (store, _mock) = mock_store();
        let store = Arc::new(store);

        store.set("k", StoredValue::Counter(7), Expiry::Never).unwrap();
        assert_eq!(read(Arc::clone(&store), "k"), Some(StoredValue::Counter(7)));
        assert_eq!(read(&*store, "k"), Some(StoredValue::Counter(7)));
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        increment(&store, "shared", Expiry::Never);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(store.peek("shared"), Some(StoredValue::Counter(2000)));
    }
}
