//! # Observability Infrastructure
//!
//! Structured logging and Prometheus metrics for the splitplane control plane.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, log_settings};
pub use metrics::init_metrics;
