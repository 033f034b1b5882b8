//! Turnstile - Per-Identifier Admission Control
//!
//! This crate decides, per caller identity, whether a unit of work may proceed.
//! Each identifier gets its own continuously refilled token bucket inside a
//! [`VisitorStore`](ratelimit::VisitorStore), and a background task evicts
//! identifiers that have not been seen for a configurable window.

pub mod config;
pub mod error;
pub mod middleware;
pub mod ratelimit;
