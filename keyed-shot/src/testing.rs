use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use quanta::Clock;
use quanta::Mock;

use crate::error::LimitError;
use crate::store::AtomicStore;
use crate::store::MemoryStore;
use crate::types::Current;
use crate::types::Mutation;

pub(crate) fn mock_store() -> (Arc<MemoryStore>, Arc<Mock>) {
    let (clock, mock) = Clock::mock();
    (Arc::new(MemoryStore::with_clock(clock)), mock)
}

/// Counts store round trips and forwards them.
#[derive(Debug, Default)]
pub(crate) struct CountingStore {
    inner: MemoryStore,
    calls: AtomicUsize,
}

impl CountingStore {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AtomicStore for CountingStore {
    fn atomic_execute<R, F>(&self, key: &str, update: F) -> Result<R, LimitError>
    where
        F: FnOnce(Current) -> Result<(Mutation, R), LimitError>,
    {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.atomic_execute(key, update)
    }
}

/// A store whose medium is always unreachable.
#[derive(Debug, Default)]
pub(crate) struct DownStore;

impl AtomicStore for DownStore {
    fn atomic_execute<R, F>(&self, _key: &str, _update: F) -> Result<R, LimitError>
    where
        F: FnOnce(Current) -> Result<(Mutation, R), LimitError>,
    {
        Err(LimitError::StoreUnavailable("connection refused".into()))
    }
}
