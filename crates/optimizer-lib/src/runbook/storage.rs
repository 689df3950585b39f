//! Blob storage tiering runbook

use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use super::{async_trait, gate_check, Runbook};
use crate::approval::ApprovalGate;
use crate::cloud::StorageControl;
use crate::config::OptimizerConfig;
use crate::error::{OptimizerError, Result};
use crate::metrics::{MetricsAggregator, MetricsSource};
use crate::models::{AccessTier, ExecutionResult, ResourceKind, RunOptions, Scope, StorageAccount};
use crate::mutate::BlobTierMutator;
use crate::observability::StructuredLogger;
use crate::recommend::TieringPolicy;

pub struct StorageRunbook {
    control: Arc<dyn StorageControl>,
    aggregator: MetricsAggregator,
    policy: TieringPolicy,
    gate: ApprovalGate,
    mutator: BlobTierMutator,
}

impl StorageRunbook {
    pub fn new(
        control: Arc<dyn StorageControl>,
        metrics: Arc<dyn MetricsSource>,
        config: &OptimizerConfig,
    ) -> Self {
        Self {
            aggregator: MetricsAggregator::new(metrics, config.lookback_days),
            policy: TieringPolicy::new(&config.storage),
            gate: config.approval,
            mutator: BlobTierMutator::new(control.clone()),
            control,
        }
    }
}

#[async_trait]
impl Runbook for StorageRunbook {
    type Resource = StorageAccount;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Storage
    }

    async fn enumerate(&self, scope: &Scope) -> Result<Vec<StorageAccount>> {
        self.control.list_accounts(scope).await
    }

    fn resource_name(&self, account: &StorageAccount) -> String {
        account.name.clone()
    }

    async fn process(&self, account: &StorageAccount, options: &RunOptions) -> Result<ExecutionResult> {
        let logger = StructuredLogger::new(ResourceKind::Storage, options.simulate);

        let activity = self.aggregator.storage_sample(&account.id).await?;
        debug!(
            account = %account.name,
            transactions = activity.transactions,
            egress_bytes = activity.egress_bytes,
            "Account activity"
        );

        let blobs = self.control.list_blobs(account).await?;
        let now = Utc::now();
        let plan = match &options.target {
            Some(target) => {
                let tier: AccessTier = target
                    .parse()
                    .map_err(OptimizerError::UnknownConfiguration)?;
                self.policy.plan_explicit(&account.name, &blobs, tier, now)
            }
            None => self.policy.plan(&account.name, &blobs, now),
        };

        let rec = plan.recommendation();
        logger.log_recommendation(&account.name, &rec);

        if let Some(result) = gate_check(&account.name, ResourceKind::Storage, &rec, &self.gate, options, &logger) {
            return Ok(result);
        }

        if let Some(recommended) = &rec.recommended {
            logger.log_mutation(&account.name, &rec.current, recommended);
        }
        let outcome = self.mutator.apply(account, &plan, options.simulate).await;

        Ok(
            ExecutionResult::new(&account.name, ResourceKind::Storage, &rec.current, outcome)
                .with_target(rec.recommended.clone(), rec.estimated_savings),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{Inventory, InventoryBackend, InventoryStorageAccount};
    use crate::models::{BlobItem, Outcome};
    use crate::runbook::run;
    use chrono::Duration;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn blob(name: &str, tier: AccessTier, idle_days: i64) -> BlobItem {
        BlobItem {
            container: "data".into(),
            name: name.into(),
            size_bytes: 10 * GIB,
            tier,
            last_accessed: Some(Utc::now() - Duration::days(idle_days)),
            last_modified: None,
        }
    }

    fn account(name: &str, blobs: Vec<BlobItem>) -> InventoryStorageAccount {
        InventoryStorageAccount {
            account: StorageAccount {
                id: format!("/sa/{}", name),
                name: name.into(),
                resource_group: "rg".into(),
            },
            blobs,
        }
    }

    fn backend() -> Arc<InventoryBackend> {
        Arc::new(InventoryBackend::new(Inventory {
            storage_accounts: vec![
                account(
                    "logs",
                    vec![
                        blob("today.log", AccessTier::Hot, 0),
                        blob("last-month.log", AccessTier::Hot, 40),
                        blob("last-year.log", AccessTier::Hot, 400),
                    ],
                ),
                account("fresh", vec![blob("a", AccessTier::Hot, 1)]),
            ],
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn test_stale_blobs_are_tiered() {
        let backend = backend();
        let runbook = StorageRunbook::new(backend.clone(), backend.clone(), &OptimizerConfig::default());
        let report = run(&runbook, &Scope::new("rg"), &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(
            report.results[0].outcome,
            Outcome::Tiered {
                attempted: 2,
                failed: 0
            }
        );
        assert!(matches!(report.results[1].outcome, Outcome::NoAction { .. }));

        let tiers: Vec<AccessTier> = backend.snapshot().storage_accounts[0]
            .blobs
            .iter()
            .map(|b| b.tier)
            .collect();
        assert_eq!(tiers, vec![AccessTier::Hot, AccessTier::Cool, AccessTier::Archive]);
    }

    #[tokio::test]
    async fn test_explicit_tier_and_invalid_tier() {
        let backend = backend();
        let runbook = StorageRunbook::new(backend.clone(), backend.clone(), &OptimizerConfig::default());
        let scope = Scope::new("rg").with_resource_name("fresh");

        let options = RunOptions {
            target: Some("cool".into()),
            simulate: true,
            ..Default::default()
        };
        let report = run(&runbook, &scope, &options).await.unwrap();
        assert!(matches!(report.results[0].outcome, Outcome::Simulated { .. }));
        assert!(backend.mutations().is_empty());

        let options = RunOptions {
            target: Some("glacier".into()),
            ..Default::default()
        };
        let report = run(&runbook, &scope, &options).await.unwrap();
        assert!(!report.results[0].success());
        assert_eq!(report.summary.failed, 1);
    }
}
