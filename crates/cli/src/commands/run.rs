//! Runbook invocation

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use optimizer_lib::cloud::{
    ArmBackend, ArmContext, ComputeControl, Credential, DatabaseControl, InventoryBackend,
    StorageControl,
};
use optimizer_lib::metrics::MetricsSource;
use optimizer_lib::{
    run, ComputeRunbook, DatabaseRunbook, OptimizerConfig, ResourceKind, RunOptions, RunReport,
    Scope, StorageRunbook,
};

/// Resource and metrics backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Azure Resource Manager and Azure Monitor
    Arm,
    /// Local JSON inventory, changes applied in memory
    Inventory,
}

/// Arguments shared by every runbook subcommand
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Resource group to optimize
    #[arg(long, short = 'g')]
    pub resource_group: String,

    /// Only process the resource with this name
    #[arg(long, short = 'n')]
    pub resource_name: Option<String>,

    /// Explicit target configuration (VM size, access tier or service objective)
    #[arg(long, short)]
    pub target: Option<String>,

    /// Approve changes whose savings fall in the manual-approval band
    #[arg(long)]
    pub force: bool,

    /// Log intended changes without applying them
    #[arg(long)]
    pub simulate: bool,
}

impl RunArgs {
    pub fn scope(&self) -> Scope {
        let scope = Scope::new(&self.resource_group);
        match &self.resource_name {
            Some(name) => scope.with_resource_name(name),
            None => scope,
        }
    }

    pub fn options(&self) -> RunOptions {
        RunOptions {
            target: self.target.clone(),
            force: self.force,
            simulate: self.simulate,
        }
    }
}

/// Control and metrics interfaces for one run
pub struct Backends {
    compute: Arc<dyn ComputeControl>,
    storage: Arc<dyn StorageControl>,
    database: Arc<dyn DatabaseControl>,
    metrics: Arc<dyn MetricsSource>,
    inventory: Option<Arc<InventoryBackend>>,
}

impl Backends {
    fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: ComputeControl + StorageControl + DatabaseControl + MetricsSource + 'static,
    {
        Self {
            compute: backend.clone(),
            storage: backend.clone(),
            database: backend.clone(),
            metrics: backend,
            inventory: None,
        }
    }

    pub async fn connect(
        kind: BackendKind,
        subscription: Option<&str>,
        inventory: Option<&Path>,
    ) -> Result<Self> {
        match kind {
            BackendKind::Arm => {
                let subscription = subscription.context(
                    "--subscription (or AZURE_SUBSCRIPTION_ID) is required for the arm backend",
                )?;
                let credential = Credential::from_env()?;
                let context = ArmContext::new(subscription)?;
                let backend = ArmBackend::connect(context, &credential)
                    .await
                    .context("Failed to authenticate against Azure")?;
                Ok(Self::from_backend(Arc::new(backend)))
            }
            BackendKind::Inventory => {
                let path =
                    inventory.context("--inventory is required for the inventory backend")?;
                let backend = Arc::new(InventoryBackend::load(path)?);
                Ok(Self {
                    inventory: Some(backend.clone()),
                    ..Self::from_backend(backend)
                })
            }
        }
    }

    /// Log the changes an inventory-backed run applied
    pub fn log_inventory_mutations(&self) {
        if let Some(inventory) = &self.inventory {
            for mutation in inventory.mutations() {
                info!(mutation = ?mutation, "Inventory mutation applied");
            }
        }
    }
}

/// Run the runbook for `kind` over the scope described by `args`
pub async fn run_runbook(
    kind: ResourceKind,
    backends: &Backends,
    config: &OptimizerConfig,
    args: &RunArgs,
) -> Result<RunReport> {
    let scope = args.scope();
    let options = args.options();

    let report = match kind {
        ResourceKind::Compute => {
            let runbook = ComputeRunbook::new(backends.compute.clone(), backends.metrics.clone(), config);
            run(&runbook, &scope, &options).await
        }
        ResourceKind::Storage => {
            let runbook = StorageRunbook::new(backends.storage.clone(), backends.metrics.clone(), config);
            run(&runbook, &scope, &options).await
        }
        ResourceKind::Database => {
            let runbook =
                DatabaseRunbook::new(backends.database.clone(), backends.metrics.clone(), config);
            run(&runbook, &scope, &options).await
        }
    };

    report.with_context(|| format!("{} runbook failed", kind))
}
