//! In-memory backend driven by a JSON inventory file
//!
//! Mutations are applied to the loaded inventory and appended to a log so a
//! rehearsal run can be inspected afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use super::{async_trait, ComputeControl, DatabaseControl, StorageControl};
use crate::error::{OptimizerError, Result};
use crate::metrics::{MetricQuery, MetricsSource};
use crate::models::{
    AccessTier, BlobItem, Database, DatabaseEngine, PowerState, Scope, StorageAccount,
    VirtualMachine,
};

/// VM entry with its current power state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryVm {
    #[serde(flatten)]
    pub vm: VirtualMachine,
    #[serde(default = "default_power_state")]
    pub power_state: PowerState,
}

fn default_power_state() -> PowerState {
    PowerState::Running
}

/// Storage account entry with its blobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryStorageAccount {
    #[serde(flatten)]
    pub account: StorageAccount,
    #[serde(default)]
    pub blobs: Vec<BlobItem>,
}

/// Resources and metric series known to the inventory backend
///
/// `metrics` maps a resource id to series keyed by metric name. A key of the
/// form `"<metric>:<Aggregation>"` takes precedence over the bare name for
/// that aggregation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub virtual_machines: Vec<InventoryVm>,
    #[serde(default)]
    pub storage_accounts: Vec<InventoryStorageAccount>,
    #[serde(default)]
    pub databases: Vec<Database>,
    #[serde(default)]
    pub metrics: HashMap<String, HashMap<String, Vec<f64>>>,
}

/// Mutation applied through the inventory backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mutation {
    Deallocate { vm: String },
    Resize { vm: String, size: String },
    Start { vm: String },
    SetTier {
        account: String,
        blob: String,
        tier: AccessTier,
    },
    SetServiceObjective { database: String, objective: String },
}

pub struct InventoryBackend {
    state: Mutex<Inventory>,
    mutations: Mutex<Vec<Mutation>>,
}

impl InventoryBackend {
    pub fn new(inventory: Inventory) -> Self {
        Self {
            state: Mutex::new(inventory),
            mutations: Mutex::new(Vec::new()),
        }
    }

    /// Load an inventory from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OptimizerError::Inventory(format!("{}: {}", path.display(), e)))?;
        let inventory: Inventory = serde_json::from_str(&content)
            .map_err(|e| OptimizerError::Inventory(format!("{}: {}", path.display(), e)))?;

        info!(
            path = %path.display(),
            vms = inventory.virtual_machines.len(),
            storage_accounts = inventory.storage_accounts.len(),
            databases = inventory.databases.len(),
            "Loaded inventory"
        );
        Ok(Self::new(inventory))
    }

    /// Current state of the inventory, including applied mutations
    pub fn snapshot(&self) -> Inventory {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Mutations applied so far, in order
    pub fn mutations(&self) -> Vec<Mutation> {
        self.mutations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record(&self, mutation: Mutation) {
        debug!(mutation = ?mutation, "Inventory mutation");
        self.mutations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(mutation);
    }

    fn with_vm<T>(&self, vm: &VirtualMachine, f: impl FnOnce(&mut InventoryVm) -> T) -> Result<T> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .virtual_machines
            .iter_mut()
            .find(|entry| entry.vm.id == vm.id)
            .map(f)
            .ok_or_else(|| OptimizerError::NotFound(vm.id.clone()))
    }
}

#[async_trait]
impl ComputeControl for InventoryBackend {
    async fn list_vms(&self, scope: &Scope) -> Result<Vec<VirtualMachine>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .virtual_machines
            .iter()
            .filter(|entry| scope.matches(&entry.vm.resource_group, &entry.vm.name))
            .map(|entry| entry.vm.clone())
            .collect())
    }

    async fn power_state(&self, vm: &VirtualMachine) -> Result<PowerState> {
        self.with_vm(vm, |entry| entry.power_state)
    }

    async fn deallocate(&self, vm: &VirtualMachine) -> Result<()> {
        self.with_vm(vm, |entry| entry.power_state = PowerState::Deallocated)?;
        self.record(Mutation::Deallocate {
            vm: vm.name.clone(),
        });
        Ok(())
    }

    async fn resize(&self, vm: &VirtualMachine, size: &str) -> Result<()> {
        self.with_vm(vm, |entry| entry.vm.size = size.to_string())?;
        self.record(Mutation::Resize {
            vm: vm.name.clone(),
            size: size.to_string(),
        });
        Ok(())
    }

    async fn start(&self, vm: &VirtualMachine) -> Result<()> {
        self.with_vm(vm, |entry| entry.power_state = PowerState::Running)?;
        self.record(Mutation::Start {
            vm: vm.name.clone(),
        });
        Ok(())
    }
}

#[async_trait]
impl StorageControl for InventoryBackend {
    async fn list_accounts(&self, scope: &Scope) -> Result<Vec<StorageAccount>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .storage_accounts
            .iter()
            .filter(|entry| scope.matches(&entry.account.resource_group, &entry.account.name))
            .map(|entry| entry.account.clone())
            .collect())
    }

    async fn list_blobs(&self, account: &StorageAccount) -> Result<Vec<BlobItem>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .storage_accounts
            .iter()
            .find(|entry| entry.account.id == account.id)
            .map(|entry| entry.blobs.clone())
            .ok_or_else(|| OptimizerError::NotFound(account.id.clone()))
    }

    async fn set_blob_tier(
        &self,
        account: &StorageAccount,
        blob: &BlobItem,
        tier: AccessTier,
    ) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let entry = state
                .storage_accounts
                .iter_mut()
                .find(|entry| entry.account.id == account.id)
                .ok_or_else(|| OptimizerError::NotFound(account.id.clone()))?;
            let target = entry
                .blobs
                .iter_mut()
                .find(|b| b.container == blob.container && b.name == blob.name)
                .ok_or_else(|| OptimizerError::NotFound(blob.path()))?;
            target.tier = tier;
        }

        self.record(Mutation::SetTier {
            account: account.name.clone(),
            blob: blob.path(),
            tier,
        });
        Ok(())
    }
}

#[async_trait]
impl DatabaseControl for InventoryBackend {
    async fn list_databases(&self, scope: &Scope) -> Result<Vec<Database>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .databases
            .iter()
            .filter(|db| scope.matches(&db.resource_group, &db.name))
            .cloned()
            .collect())
    }

    async fn set_service_objective(
        &self,
        database: &Database,
        objective: &str,
        _edition: Option<&str>,
    ) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let entry = state
                .databases
                .iter_mut()
                .find(|db| db.id == database.id)
                .ok_or_else(|| OptimizerError::NotFound(database.id.clone()))?;
            match &mut entry.engine {
                DatabaseEngine::Sql {
                    service_objective, ..
                } => *service_objective = objective.to_string(),
                DatabaseEngine::Cosmos { .. } => {
                    return Err(OptimizerError::Unsupported(format!(
                        "{} has no service objective",
                        database.name
                    )))
                }
            }
        }

        self.record(Mutation::SetServiceObjective {
            database: database.name.clone(),
            objective: objective.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl MetricsSource for InventoryBackend {
    async fn query(&self, query: &MetricQuery<'_>) -> Result<Vec<f64>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(series) = state.metrics.get(query.resource_id) else {
            return Ok(Vec::new());
        };

        let qualified = format!("{}:{}", query.metric, query.aggregation);
        let points = series
            .get(&qualified)
            .or_else(|| series.get(query.metric))
            .cloned()
            .unwrap_or_default();
        Ok(points)
    }
}
