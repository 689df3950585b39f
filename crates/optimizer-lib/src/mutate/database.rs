//! Service objective changes, dispatched on the recommendation's action tag

use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::cloud::DatabaseControl;
use crate::error::{OptimizerError, Result};
use crate::models::{Database, DatabaseAction, Outcome};
use crate::observability::OptimizerMetrics;
use crate::recommend::DatabaseRecommendation;
use crate::tables::DtuTable;

pub struct DatabaseMutator {
    control: Arc<dyn DatabaseControl>,
    tiers: DtuTable,
    metrics: OptimizerMetrics,
}

impl DatabaseMutator {
    pub fn new(control: Arc<dyn DatabaseControl>, tiers: DtuTable) -> Self {
        Self {
            control,
            tiers,
            metrics: OptimizerMetrics::new(),
        }
    }

    /// Only scale-downs and explicit service objectives reach the provider;
    /// every other action is reported for an operator to carry out
    pub async fn apply(
        &self,
        database: &Database,
        rec: &DatabaseRecommendation,
        simulate: bool,
    ) -> Result<Outcome> {
        match rec.action {
            DatabaseAction::ScaleDown | DatabaseAction::SetServiceObjective => {
                let target = rec.recommendation.recommended.as_deref().ok_or_else(|| {
                    OptimizerError::UnknownConfiguration(format!(
                        "no target service objective for {}",
                        database.name
                    ))
                })?;
                let current = database.current_configuration();

                if simulate {
                    return Ok(Outcome::Simulated {
                        from: current,
                        to: target.to_string(),
                    });
                }

                let edition = self.tiers.get(target).map(|t| t.edition.as_str());
                let start = Instant::now();
                info!(
                    database = %database.name,
                    from = %current,
                    to = %target,
                    edition = ?edition,
                    "Setting service objective"
                );
                self.control
                    .set_service_objective(database, target, edition)
                    .await?;
                self.metrics
                    .observe_mutation_latency(start.elapsed().as_secs_f64());

                Ok(Outcome::Resized {
                    from: current,
                    to: target.to_string(),
                })
            }
            DatabaseAction::None => Ok(Outcome::NoAction {
                reason: rec.recommendation.reason.clone(),
            }),
            action => Ok(Outcome::ManualActionRequired { action }),
        }
    }
}
