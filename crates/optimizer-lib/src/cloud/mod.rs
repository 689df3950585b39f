//! Resource control interfaces and their backends
//!
//! The runbooks only see the traits below. Two backends implement them:
//! - [`ArmBackend`]: Azure Resource Manager / Azure Monitor over REST
//! - [`InventoryBackend`]: a JSON inventory file applied in memory, for
//!   offline rehearsal and tests

mod arm;
mod inventory;

pub use arm::{ArmBackend, ArmContext, Credential, ARM_ENDPOINT, LOGIN_ENDPOINT};
pub use inventory::{Inventory, InventoryBackend, InventoryStorageAccount, InventoryVm, Mutation};

use crate::error::Result;
use crate::models::{
    AccessTier, BlobItem, Database, PowerState, Scope, StorageAccount, VirtualMachine,
};

pub use async_trait::async_trait;

/// Compute control plane
#[async_trait]
pub trait ComputeControl: Send + Sync {
    async fn list_vms(&self, scope: &Scope) -> Result<Vec<VirtualMachine>>;

    async fn power_state(&self, vm: &VirtualMachine) -> Result<PowerState>;

    /// Stop and release the VM's compute allocation
    async fn deallocate(&self, vm: &VirtualMachine) -> Result<()>;

    async fn resize(&self, vm: &VirtualMachine, size: &str) -> Result<()>;

    async fn start(&self, vm: &VirtualMachine) -> Result<()>;
}

/// Blob storage control plane
#[async_trait]
pub trait StorageControl: Send + Sync {
    async fn list_accounts(&self, scope: &Scope) -> Result<Vec<StorageAccount>>;

    async fn list_blobs(&self, account: &StorageAccount) -> Result<Vec<BlobItem>>;

    async fn set_blob_tier(
        &self,
        account: &StorageAccount,
        blob: &BlobItem,
        tier: AccessTier,
    ) -> Result<()>;
}

/// Database control plane
#[async_trait]
pub trait DatabaseControl: Send + Sync {
    async fn list_databases(&self, scope: &Scope) -> Result<Vec<Database>>;

    async fn set_service_objective(
        &self,
        database: &Database,
        objective: &str,
        edition: Option<&str>,
    ) -> Result<()>;
}

/// Resource group segment of an ARM resource id
pub fn resource_group_of(resource_id: &str) -> Option<&str> {
    let mut segments = resource_id.split('/');
    while let Some(segment) = segments.next() {
        if segment.eq_ignore_ascii_case("resourceGroups") {
            return segments.next();
        }
    }
    None
}
