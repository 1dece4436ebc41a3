//! Shared configuration, error types, IDs, and metrics for the plan-lowering crates.
//!
//! Architecture role:
//! - defines the accelerator subsystem configuration parsed from a string map
//! - provides common [`AccelError`] / [`Result`] contracts
//! - hosts lowering counters exported in prometheus text format
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;

pub use config::AcceleratorConfig;
pub use error::{AccelError, Result};
pub use ids::*;
pub use metrics::{LoweringMetrics, global_metrics};
