//! Cost optimization runbooks for cloud resources
//!
//! This crate provides the core functionality for:
//! - Utilization metrics aggregation from a monitoring backend
//! - Threshold-based right-sizing, tiering and scaling recommendations
//! - Savings-based approval gating
//! - Applying changes through resource control backends
//! - Run orchestration, structured logging and metrics

pub mod approval;
pub mod cloud;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod mutate;
pub mod observability;
pub mod recommend;
pub mod runbook;
pub mod tables;

pub use approval::{approve, ApprovalDecision, ApprovalGate};
pub use config::OptimizerConfig;
pub use error::{OptimizerError, Result};
pub use models::*;
pub use observability::{OptimizerMetrics, StructuredLogger};
pub use runbook::{run, ComputeRunbook, DatabaseRunbook, RunReport, RunSummary, Runbook, StorageRunbook};
