//! Admission store trait for abstracting over store implementations.

/// Trait for admission decision stores.
///
/// This trait lets the [`RateLimitGate`](crate::middleware::RateLimitGate)
/// work with the in-memory `VisitorStore` or any other implementation.
pub trait AdmissionStore: Send + Sync {
    /// Decide whether a unit of work for `identifier` may proceed now.
    fn allow(&self, identifier: &str) -> bool;
}
