//! Recommendation engines
//!
//! Pure classification of utilization samples against the configured
//! thresholds and lookup tables. Nothing in here talks to the provider.

mod compute;
mod database;
mod storage;

pub use compute::VmRecommender;
pub use database::{DatabaseRecommendation, DatabaseRecommender};
pub use storage::{BlobMove, TieringPlan, TieringPolicy};
