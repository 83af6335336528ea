//! Generation cache with failure circuit breaker
//!
//! Both outcomes of a render are cached under the request fingerprint. A
//! fingerprint holds either a manifest set or a failure record, never both.
//!
//! # Breaker Model
//!
//! - Failures are counted per fingerprint in a `FailureRecord`
//! - Once the count reaches the threshold, the cached error is replayed
//! - A time lane and a request lane each end the pause independently
//! - An expired lane deletes the record, so the next failure starts a new cycle
//! - Any success replaces the record outright
//!
//! # Breaker States
//!
//! | State | Condition | Call behavior |
//! |-------|-----------|---------------|
//! | Normal | no record, or count below threshold | render fresh |
//! | Paused | count at or above threshold, lanes open | replay cached error |
//! | Expired | a lane fired | delete record, render fresh |

pub mod breaker;
pub mod clock;
pub mod fingerprint;
pub mod lock;
pub mod store;

pub use breaker::{BreakerDecision, BreakerPolicy, FailureRecord};
pub use clock::{Clock, ManualClock, SystemClock};
pub use fingerprint::Fingerprint;
pub use lock::{KeyGuard, KeyedLocks};
pub use store::{CacheEntry, InMemoryCache, ManifestCache};
