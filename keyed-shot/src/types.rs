use std::time::Duration;

/// A point on the store's clock, measured from the store's anchor.
pub type StoreInstant = Duration;

/// Per-key bucket state for the token bucket limiter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketEntry {
    pub stored_permits: f64,
    pub last_refill: StoreInstant,
}

/// The fixed window counter as seen by the limiter.
///
/// `expires_at` is the slot's native expiry, set when the first request of a
/// window is admitted and never extended afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterEntry {
    pub count: u64,
    pub expires_at: Option<StoreInstant>,
}

/// A value held by a store slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StoredValue {
    Counter(u64),
    Bucket(BucketEntry),
}

impl StoredValue {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Counter(_) => "counter",
            Self::Bucket(_) => "token bucket",
        }
    }
}

/// What an update function sees inside the store's critical section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Current {
    /// The live value, `None` if the key is absent or has expired.
    pub value: Option<StoredValue>,
    /// The live value's expiry, if it has one.
    pub expires_at: Option<StoreInstant>,
    /// The store's clock, read while the key is held.
    pub now: StoreInstant,
}

impl Current {
    pub fn absent(now: StoreInstant) -> Self {
        Self {
            value: None,
            expires_at: None,
            now,
        }
    }
}

/// How a `Set` treats the slot's expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Retain the existing expiry (none if the slot was absent).
    Keep,
    /// Expire this long after the store's `now`.
    After(Duration),
    Never,
}

/// The write an update function asks the store to apply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mutation {
    Keep,
    Set { value: StoredValue, expiry: Expiry },
}

/// Reasons why a request might be rejected by a limiter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reason {
    Rejected { retry_after: Duration },
}
