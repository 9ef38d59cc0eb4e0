//! # keyed-shot
//!
//! `keyed-shot` provides per-key admission control backed by a shared store.
//!
//! ## Core Philosophy
//!
//! A rate limiter shared by many callers is only correct if its
//! read-check-update happens as one step. `keyed-shot` keeps no state in the
//! limiters at all: every decision runs inside the store's
//! [`AtomicStore::atomic_execute`], which serialises updates per key while
//! leaving other keys free to proceed.
//!
//! ## Key Concepts
//!
//! * **Store-Owned State**: Counters and buckets live in the store. Limiters
//!   are cheap to build and can be created per request.
//! * **Lazy Evaluation**: Buckets refill and windows expire at the moment of
//!   the request, so there are no background workers or timers.
//! * **Store Time**: `now` comes from the store's clock, so every caller
//!   agrees on elapsed time.
//! * **Fail Closed**: Store failures are errors, never admissions.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use keyed_shot::FixedWindowLimiter;
//! use keyed_shot::MemoryStore;
//! use keyed_shot::Strategy;
//! use keyed_shot::TokenBucketLimiter;
//!
//! let store = Arc::new(MemoryStore::new());
//!
//! let per_minute = FixedWindowLimiter::new(Arc::clone(&store));
//! if per_minute
//!     .try_acquire("login:alice", 5, Duration::from_secs(60))?
//!     .is_continue()
//! {
//!     // Request allowed
//! }
//!
//! let bucket = TokenBucketLimiter::new(store).quota(10.0, 1.0)?;
//! assert!(bucket.process("api:alice")?.is_continue());
//! # Ok::<(), keyed_shot::LimitError>(())
//! ```

use std::fmt::Debug;
use std::ops::ControlFlow;

mod error;
mod fixed_window;
mod store;
#[cfg(test)]
mod testing;
mod token_bucket;
mod types;

pub use error::LimitError;
pub use fixed_window::FixedWindow;
pub use fixed_window::FixedWindowLimiter;
pub use store::AtomicStore;
pub use store::MemoryStore;
pub use token_bucket::TokenBucket;
pub use token_bucket::TokenBucketLimiter;
pub use types::BucketEntry;
pub use types::CounterEntry;
pub use types::Current;
pub use types::Expiry;
pub use types::Mutation;
pub use types::Reason;
pub use types::StoreInstant;
pub use types::StoredValue;

/// The outcome of an admission check.
///
/// `Continue(())` admits the request, `Break(reason)` rejects it.
pub type Decision = ControlFlow<Reason>;

/// A limiter bound to its quota.
///
/// Strategies must be `Send` and `Sync` to allow sharing across thread
/// boundaries via `Arc`.
pub trait Strategy: Debug + Send + Sync {
    /// Attempts to admit a single request for `key`.
    ///
    /// This method never blocks waiting for capacity.
    ///
    /// # Errors
    ///
    /// Returns [`LimitError`] if the store cannot make a decision. An error is
    /// never an admission.
    fn process(&self, key: &str) -> Result<Decision, LimitError>;
}
