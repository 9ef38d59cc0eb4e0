//! # Tower Keyed Shot
//!
//! `tower-keyed-shot` puts the per-key limiters of [`keyed_shot`] in front of a
//! [Tower](https://github.com/tower-rs/tower) service.
//!
//! ## The Keyed Stack
//! Each request is mapped to a key (client address, API token, tenant...) and
//! checked against that key's quota in the shared store:
//!
//! 1. **Admission**: Allowed requests are forwarded to the inner service.
//! 2. **Rejection**: Requests over quota fail immediately with
//!    `ShotError::RateLimited`, carrying a retry hint. Nothing is queued.
//! 3. **Fail Closed**: If the store cannot decide, the request fails with
//!    `ShotError::Store`. [`KeyedRateLimitLayer::with_fail_open`] opts out.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`ShotError`], allowing automatic conversion
//!   to HTTP status codes (429, 503).

mod error;
mod layer;
mod service;
mod utils;


pub use error::ShotError;
pub use layer::KeyedRateLimitLayer;
pub use service::KeyedRateLimitService;
pub use service::ResponseFuture;
pub use utils::ServiceBuilderExt;
