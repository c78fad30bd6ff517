//! Observability metrics for the front desk service.
//!
//! This module provides metrics collection for monitoring request handling
//! and sequence issuance. All metrics use lock-free atomics for minimal
//! hot-path impact.

pub mod histogram;
pub mod registry;

pub use histogram::Histogram;
pub use registry::{ApiMetrics, MetricsRegistry, SequenceMetrics};
