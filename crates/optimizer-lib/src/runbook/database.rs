//! Database scaling runbook

use std::sync::Arc;

use super::{async_trait, gate_check, Runbook};
use crate::approval::ApprovalGate;
use crate::cloud::DatabaseControl;
use crate::config::OptimizerConfig;
use crate::error::Result;
use crate::metrics::{MetricsAggregator, MetricsSource};
use crate::models::{Database, ExecutionResult, ResourceKind, RunOptions, Scope};
use crate::mutate::DatabaseMutator;
use crate::observability::StructuredLogger;
use crate::recommend::DatabaseRecommender;

pub struct DatabaseRunbook {
    control: Arc<dyn DatabaseControl>,
    aggregator: MetricsAggregator,
    recommender: DatabaseRecommender,
    gate: ApprovalGate,
    mutator: DatabaseMutator,
}

impl DatabaseRunbook {
    pub fn new(
        control: Arc<dyn DatabaseControl>,
        metrics: Arc<dyn MetricsSource>,
        config: &OptimizerConfig,
    ) -> Self {
        let recommender = DatabaseRecommender::new(&config.database);
        Self {
            aggregator: MetricsAggregator::new(metrics, config.lookback_days),
            mutator: DatabaseMutator::new(control.clone(), recommender.tiers().clone()),
            recommender,
            gate: config.approval,
            control,
        }
    }
}

#[async_trait]
impl Runbook for DatabaseRunbook {
    type Resource = Database;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Database
    }

    async fn enumerate(&self, scope: &Scope) -> Result<Vec<Database>> {
        self.control.list_databases(scope).await
    }

    fn resource_name(&self, database: &Database) -> String {
        database.name.clone()
    }

    async fn process(&self, database: &Database, options: &RunOptions) -> Result<ExecutionResult> {
        let logger = StructuredLogger::new(ResourceKind::Database, options.simulate);

        let rec = match &options.target {
            Some(target) => self.recommender.explicit(database, target),
            None => {
                let sample = self.aggregator.database_sample(database).await?;
                self.recommender.recommend(database, &sample)
            }
        };
        logger.log_recommendation(&database.name, &rec.recommendation);

        if let Some(result) = gate_check(
            &database.name,
            ResourceKind::Database,
            &rec.recommendation,
            &self.gate,
            options,
            &logger,
        ) {
            return Ok(result);
        }

        if let Some(target) = &rec.recommendation.recommended {
            logger.log_mutation(&database.name, &rec.recommendation.current, target);
        }
        let outcome = self.mutator.apply(database, &rec, options.simulate).await?;

        Ok(ExecutionResult::new(
            &database.name,
            ResourceKind::Database,
            &rec.recommendation.current,
            outcome,
        )
        .with_target(
            rec.recommendation.recommended.clone(),
            rec.recommendation.estimated_savings,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{Inventory, InventoryBackend, Mutation};
    use crate::models::{DatabaseAction, DatabaseEngine, Outcome};
    use crate::runbook::run;
    use std::collections::HashMap;

    fn sql(name: &str, objective: &str) -> Database {
        Database {
            id: format!("/db/{}", name),
            name: name.into(),
            resource_group: "rg".into(),
            engine: DatabaseEngine::Sql {
                server: "sql1".into(),
                service_objective: objective.into(),
            },
        }
    }

    fn series(entries: &[(&str, Vec<f64>)]) -> HashMap<String, Vec<f64>> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn backend() -> Arc<InventoryBackend> {
        Arc::new(InventoryBackend::new(Inventory {
            databases: vec![
                sql("idle", "S2"),
                sql("hot", "S2"),
                Database {
                    id: "/db/docs".into(),
                    name: "docs".into(),
                    resource_group: "rg".into(),
                    engine: DatabaseEngine::Cosmos {
                        provisioned_ru: Some(4000),
                    },
                },
            ],
            metrics: HashMap::from([
                (
                    "/db/idle".to_string(),
                    series(&[
                        ("dtu_consumption_percent", vec![3.0; 168]),
                        ("connection_successful", vec![1.0; 7]),
                    ]),
                ),
                (
                    "/db/hot".to_string(),
                    series(&[
                        ("dtu_consumption_percent", vec![85.0; 168]),
                        ("connection_successful", vec![500.0; 168]),
                    ]),
                ),
                (
                    "/db/docs".to_string(),
                    series(&[("NormalizedRUConsumption", vec![95.0; 168])]),
                ),
            ]),
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn test_scale_down_and_manual_actions() {
        let backend = backend();
        let runbook = DatabaseRunbook::new(backend.clone(), backend.clone(), &OptimizerConfig::default());
        let report = run(&runbook, &Scope::new("rg"), &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(
            report.results[0].outcome,
            Outcome::Resized {
                from: "S2".into(),
                to: "S1".into()
            }
        );
        assert_eq!(
            report.results[1].outcome,
            Outcome::ManualActionRequired {
                action: DatabaseAction::IncreaseDtu
            }
        );
        assert_eq!(
            report.results[2].outcome,
            Outcome::ManualActionRequired {
                action: DatabaseAction::IncreaseRu
            }
        );
        assert_eq!(
            backend.mutations(),
            vec![Mutation::SetServiceObjective {
                database: "idle".into(),
                objective: "S1".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_idle_s4_steps_down_to_s3_not_premium() {
        let backend = Arc::new(InventoryBackend::new(Inventory {
            databases: vec![sql("warehouse", "S4")],
            metrics: HashMap::from([(
                "/db/warehouse".to_string(),
                series(&[("dtu_consumption_percent", vec![2.0; 168])]),
            )]),
            ..Default::default()
        }));
        let runbook = DatabaseRunbook::new(backend.clone(), backend.clone(), &OptimizerConfig::default());
        let options = RunOptions {
            force: true,
            ..Default::default()
        };
        let report = run(&runbook, &Scope::new("rg"), &options).await.unwrap();

        // S4 -> S3 saves 150.26, inside the manual band
        assert_eq!(report.results[0].target.as_deref(), Some("S3"));
        assert!(report.results[0].estimated_savings > 0.0);
        assert_eq!(
            backend.mutations(),
            vec![Mutation::SetServiceObjective {
                database: "warehouse".into(),
                objective: "S3".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_explicit_objective_in_manual_band_needs_force() {
        let backend = Arc::new(InventoryBackend::new(Inventory {
            databases: vec![sql("reporting", "S6")],
            ..Default::default()
        }));
        let runbook = DatabaseRunbook::new(backend.clone(), backend.clone(), &OptimizerConfig::default());
        let scope = Scope::new("rg");

        // S6 -> S3 saves 450.77, inside the manual band
        let mut options = RunOptions {
            target: Some("S3".into()),
            ..Default::default()
        };
        let report = run(&runbook, &scope, &options).await.unwrap();
        assert!(matches!(
            report.results[0].outcome,
            Outcome::ApprovalRequired { .. }
        ));
        assert!(backend.mutations().is_empty());

        options.force = true;
        let report = run(&runbook, &scope, &options).await.unwrap();
        assert_eq!(
            report.results[0].outcome,
            Outcome::Resized {
                from: "S6".into(),
                to: "S3".into()
            }
        );

        // Already at the requested objective
        let report = run(&runbook, &scope, &options).await.unwrap();
        assert!(matches!(report.results[0].outcome, Outcome::NoAction { .. }));
    }
}
