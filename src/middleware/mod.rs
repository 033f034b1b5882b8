//! Request admission gate built on an [`AdmissionStore`](crate::ratelimit::AdmissionStore).
//!
//! The gate is framework-agnostic: it takes a request type, a function that
//! extracts the caller identifier from it, and handlers that turn a denial or
//! an extraction failure into a response value.

mod gate;
mod rejection;

pub use gate::{Admission, RateLimitGate};
pub use rejection::Rejection;
