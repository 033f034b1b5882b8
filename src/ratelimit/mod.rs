//! Token bucket rate limiting and per-identifier state management.

mod backend;
mod bucket;
mod clock;
mod store;
mod sweeper;

pub use backend::AdmissionStore;
pub use bucket::TokenBucket;
pub use clock::{Clock, MockClock, SystemClock};
pub use store::{Decision, StoreConfig, VisitorStore, DEFAULT_CLEANUP_INTERVAL, DEFAULT_EXPIRES_IN};
