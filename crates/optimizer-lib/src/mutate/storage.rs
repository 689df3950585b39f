//! Blob access-tier changes for a storage account

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::cloud::StorageControl;
use crate::models::{Outcome, StorageAccount};
use crate::observability::OptimizerMetrics;
use crate::recommend::TieringPlan;

pub struct BlobTierMutator {
    control: Arc<dyn StorageControl>,
    metrics: OptimizerMetrics,
}

impl BlobTierMutator {
    pub fn new(control: Arc<dyn StorageControl>) -> Self {
        Self {
            control,
            metrics: OptimizerMetrics::new(),
        }
    }

    /// Apply every move in `plan`
    ///
    /// Individual blob failures are logged and counted, they never abort the
    /// rest of the batch.
    pub async fn apply(&self, account: &StorageAccount, plan: &TieringPlan, simulate: bool) -> Outcome {
        if simulate {
            for m in &plan.moves {
                debug!(
                    account = %account.name,
                    blob = %m.blob.path(),
                    from = %m.blob.tier,
                    to = %m.target,
                    "Simulate mode: tier change not applied"
                );
            }
            let recommendation = plan.recommendation();
            return Outcome::Simulated {
                from: recommendation.current,
                to: recommendation.recommended.unwrap_or_default(),
            };
        }

        let start = Instant::now();
        let mut failed = 0;
        for m in &plan.moves {
            match self.control.set_blob_tier(account, &m.blob, m.target).await {
                Ok(()) => debug!(
                    account = %account.name,
                    blob = %m.blob.path(),
                    from = %m.blob.tier,
                    to = %m.target,
                    "Tier changed"
                ),
                Err(e) => {
                    failed += 1;
                    warn!(
                        account = %account.name,
                        blob = %m.blob.path(),
                        to = %m.target,
                        error = %e,
                        "Tier change failed"
                    );
                }
            }
        }
        self.metrics
            .observe_mutation_latency(start.elapsed().as_secs_f64());

        Outcome::Tiered {
            attempted: plan.moves.len(),
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::async_trait;
    use crate::error::{OptimizerError, Result};
    use crate::models::{AccessTier, BlobItem, Scope};
    use crate::recommend::BlobMove;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every blob whose name starts with `bad`
    struct MockStorage {
        set_tier_calls: AtomicUsize,
    }

    impl MockStorage {
        fn new() -> Self {
            Self {
                set_tier_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl StorageControl for MockStorage {
        async fn list_accounts(&self, _scope: &Scope) -> Result<Vec<StorageAccount>> {
            Ok(vec![])
        }

        async fn list_blobs(&self, _account: &StorageAccount) -> Result<Vec<BlobItem>> {
            Ok(vec![])
        }

        async fn set_blob_tier(
            &self,
            _account: &StorageAccount,
            blob: &BlobItem,
            _tier: AccessTier,
        ) -> Result<()> {
            self.set_tier_calls.fetch_add(1, Ordering::SeqCst);
            if blob.name.starts_with("bad") {
                return Err(OptimizerError::Api {
                    status: 409,
                    body: "BlobBeingRehydrated".into(),
                });
            }
            Ok(())
        }
    }

    fn account() -> StorageAccount {
        StorageAccount {
            id: "/sa/logs".into(),
            name: "logs".into(),
            resource_group: "rg".into(),
        }
    }

    fn plan(names: &[&str]) -> TieringPlan {
        TieringPlan {
            account: "logs".into(),
            blobs_scanned: names.len(),
            moves: names
                .iter()
                .map(|name| BlobMove {
                    blob: BlobItem {
                        container: "c".into(),
                        name: name.to_string(),
                        size_bytes: 1 << 30,
                        tier: AccessTier::Hot,
                        last_accessed: None,
                        last_modified: None,
                    },
                    target: AccessTier::Cool,
                    days_idle: Some(45),
                    estimated_savings: 0.01,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_partial_failures_are_counted() {
        let control = Arc::new(MockStorage::new());
        let mutator = BlobTierMutator::new(control.clone());

        let outcome = mutator
            .apply(&account(), &plan(&["a", "bad-1", "b", "bad-2"]), false)
            .await;

        assert_eq!(
            outcome,
            Outcome::Tiered {
                attempted: 4,
                failed: 2
            }
        );
        assert_eq!(control.set_tier_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_simulate_touches_nothing() {
        let control = Arc::new(MockStorage::new());
        let mutator = BlobTierMutator::new(control.clone());

        let outcome = mutator.apply(&account(), &plan(&["a", "b"]), true).await;

        assert_eq!(
            outcome,
            Outcome::Simulated {
                from: "2 blobs".into(),
                to: "2 blobs re-tiered".into()
            }
        );
        assert_eq!(control.set_tier_calls.load(Ordering::SeqCst), 0);
    }
}
