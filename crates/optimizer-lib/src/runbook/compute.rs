//! VM right-sizing runbook

use std::sync::Arc;

use super::{async_trait, gate_check, Runbook};
use crate::approval::ApprovalGate;
use crate::cloud::ComputeControl;
use crate::config::OptimizerConfig;
use crate::error::{OptimizerError, Result};
use crate::metrics::{MetricsAggregator, MetricsSource};
use crate::models::{ExecutionResult, ResourceKind, RunOptions, Scope, VirtualMachine};
use crate::mutate::{PollPolicy, VmMutator};
use crate::observability::StructuredLogger;
use crate::recommend::VmRecommender;

pub struct ComputeRunbook {
    control: Arc<dyn ComputeControl>,
    aggregator: MetricsAggregator,
    recommender: VmRecommender,
    gate: ApprovalGate,
    mutator: VmMutator,
}

impl ComputeRunbook {
    pub fn new(
        control: Arc<dyn ComputeControl>,
        metrics: Arc<dyn MetricsSource>,
        config: &OptimizerConfig,
    ) -> Self {
        Self::with_poll_policy(control, metrics, config, PollPolicy::from(&config.compute))
    }

    pub fn with_poll_policy(
        control: Arc<dyn ComputeControl>,
        metrics: Arc<dyn MetricsSource>,
        config: &OptimizerConfig,
        poll: PollPolicy,
    ) -> Self {
        Self {
            aggregator: MetricsAggregator::new(metrics, config.lookback_days),
            recommender: VmRecommender::new(&config.compute),
            gate: config.approval,
            mutator: VmMutator::new(control.clone(), poll),
            control,
        }
    }
}

#[async_trait]
impl Runbook for ComputeRunbook {
    type Resource = VirtualMachine;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Compute
    }

    async fn enumerate(&self, scope: &Scope) -> Result<Vec<VirtualMachine>> {
        self.control.list_vms(scope).await
    }

    fn resource_name(&self, vm: &VirtualMachine) -> String {
        vm.name.clone()
    }

    async fn process(&self, vm: &VirtualMachine, options: &RunOptions) -> Result<ExecutionResult> {
        let logger = StructuredLogger::new(ResourceKind::Compute, options.simulate);

        let rec = match &options.target {
            Some(target) => self.recommender.explicit(&vm.size, target),
            None => {
                let sample = self.aggregator.compute_sample(&vm.id).await?;
                self.recommender.recommend(&vm.size, &sample)
            }
        };
        logger.log_recommendation(&vm.name, &rec);

        if let Some(result) = gate_check(&vm.name, ResourceKind::Compute, &rec, &self.gate, options, &logger) {
            return Ok(result);
        }

        let target = rec.recommended.as_deref().ok_or_else(|| {
            OptimizerError::UnknownConfiguration(format!("no target size for {}", vm.name))
        })?;
        logger.log_mutation(&vm.name, &vm.size, target);
        let outcome = self.mutator.resize(vm, target, options.simulate).await?;

        Ok(
            ExecutionResult::new(&vm.name, ResourceKind::Compute, &vm.size, outcome)
                .with_target(Some(target.to_string()), rec.estimated_savings),
        )
    }
}
