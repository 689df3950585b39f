//! Mutators: apply an approved change through the control interfaces
//!
//! Every mutator honors simulate mode by returning a `Simulated` outcome
//! without calling the control plane.

mod compute;
mod database;
mod storage;

pub use compute::{PollPolicy, VmMutator};
pub use database::DatabaseMutator;
pub use storage::BlobTierMutator;
