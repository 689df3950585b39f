//! VM resize with deallocate/start around it
//!
//! State machine for a running VM:
//! `Running -> Stopping -> Deallocated -> Resizing -> Starting -> Running`.
//! A VM that was not running is resized in place and left stopped.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::cloud::ComputeControl;
use crate::config::ComputeSettings;
use crate::error::{OptimizerError, Result};
use crate::models::{Outcome, PowerState, VirtualMachine};
use crate::observability::OptimizerMetrics;

/// Bounded fixed-interval poll for the deallocated state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), 60)
    }
}

impl From<&ComputeSettings> for PollPolicy {
    fn from(settings: &ComputeSettings) -> Self {
        Self::new(
            Duration::from_secs(settings.poll_interval_secs),
            settings.max_poll_attempts,
        )
    }
}

pub struct VmMutator {
    control: Arc<dyn ComputeControl>,
    poll: PollPolicy,
    metrics: OptimizerMetrics,
}

impl VmMutator {
    pub fn new(control: Arc<dyn ComputeControl>, poll: PollPolicy) -> Self {
        Self {
            control,
            poll,
            metrics: OptimizerMetrics::new(),
        }
    }

    /// Resize `vm` to `target`, restarting it only if it was running
    pub async fn resize(&self, vm: &VirtualMachine, target: &str, simulate: bool) -> Result<Outcome> {
        if simulate {
            return Ok(Outcome::Simulated {
                from: vm.size.clone(),
                to: target.to_string(),
            });
        }

        let start = Instant::now();
        let initial = self.control.power_state(vm).await?;
        let was_running = initial == PowerState::Running;
        debug!(vm = %vm.name, power_state = %initial, "Read power state");

        if was_running {
            info!(vm = %vm.name, "Deallocating");
            self.control.deallocate(vm).await?;
            self.wait_for_deallocation(vm).await?;
        }

        info!(vm = %vm.name, from = %vm.size, to = %target, "Resizing");
        self.control.resize(vm, target).await?;

        if was_running {
            info!(vm = %vm.name, "Starting");
            self.control.start(vm).await?;
        }

        self.metrics
            .observe_mutation_latency(start.elapsed().as_secs_f64());

        Ok(Outcome::Resized {
            from: vm.size.clone(),
            to: target.to_string(),
        })
    }

    async fn wait_for_deallocation(&self, vm: &VirtualMachine) -> Result<()> {
        for attempt in 1..=self.poll.max_attempts {
            self.metrics.inc_power_state_polls();
            let state = self.control.power_state(vm).await?;
            if state == PowerState::Deallocated {
                debug!(vm = %vm.name, attempt, "Deallocated");
                return Ok(());
            }

            debug!(
                vm = %vm.name,
                attempt,
                power_state = %state,
                "Waiting for deallocation"
            );
            if attempt < self.poll.max_attempts {
                tokio::time::sleep(self.poll.interval).await;
            }
        }

        Err(OptimizerError::DeallocationTimedOut {
            resource: vm.name.clone(),
            attempts: self.poll.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::async_trait;
    use crate::models::Scope;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Reports `initial` until deallocated, then `Deallocated` after
    /// `polls_until_deallocated` power-state reads (never if `None`)
    struct MockCompute {
        initial: PowerState,
        polls_until_deallocated: Option<usize>,
        power_state_calls: AtomicUsize,
        calls: Mutex<Vec<String>>,
    }

    impl MockCompute {
        fn new(initial: PowerState, polls_until_deallocated: Option<usize>) -> Self {
            Self {
                initial,
                polls_until_deallocated,
                power_state_calls: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }
    }

    #[async_trait]
    impl ComputeControl for MockCompute {
        async fn list_vms(&self, _scope: &Scope) -> Result<Vec<VirtualMachine>> {
            Ok(vec![])
        }

        async fn power_state(&self, _vm: &VirtualMachine) -> Result<PowerState> {
            let n = self.power_state_calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                return Ok(self.initial);
            }
            match self.polls_until_deallocated {
                Some(limit) if n >= limit => Ok(PowerState::Deallocated),
                _ => Ok(PowerState::Stopping),
            }
        }

        async fn deallocate(&self, _vm: &VirtualMachine) -> Result<()> {
            self.record("deallocate");
            Ok(())
        }

        async fn resize(&self, _vm: &VirtualMachine, size: &str) -> Result<()> {
            self.record(&format!("resize:{}", size));
            Ok(())
        }

        async fn start(&self, _vm: &VirtualMachine) -> Result<()> {
            self.record("start");
            Ok(())
        }
    }

    fn vm() -> VirtualMachine {
        VirtualMachine {
            id: "/vm/web-01".into(),
            name: "web-01".into(),
            resource_group: "rg".into(),
            size: "Standard_D2s_v3".into(),
        }
    }

    fn fast_poll(max_attempts: u32) -> PollPolicy {
        PollPolicy::new(Duration::from_millis(1), max_attempts)
    }

    #[tokio::test]
    async fn test_simulate_never_calls_control_plane() {
        let control = Arc::new(MockCompute::new(PowerState::Running, Some(1)));
        let mutator = VmMutator::new(control.clone(), fast_poll(3));

        let outcome = mutator.resize(&vm(), "Standard_B2s", true).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::Simulated {
                from: "Standard_D2s_v3".into(),
                to: "Standard_B2s".into()
            }
        );
        assert_eq!(control.power_state_calls.load(Ordering::SeqCst), 0);
        assert!(control.calls().is_empty());
    }

    #[tokio::test]
    async fn test_running_vm_is_deallocated_resized_and_restarted() {
        let control = Arc::new(MockCompute::new(PowerState::Running, Some(3)));
        let mutator = VmMutator::new(control.clone(), fast_poll(10));

        let outcome = mutator.resize(&vm(), "Standard_B2s", false).await.unwrap();

        assert!(matches!(outcome, Outcome::Resized { .. }));
        assert_eq!(
            control.calls(),
            vec!["deallocate", "resize:Standard_B2s", "start"]
        );
        // initial read + polls until the third read reports deallocated
        assert_eq!(control.power_state_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_stopped_vm_is_not_restarted() {
        let control = Arc::new(MockCompute::new(PowerState::Deallocated, None));
        let mutator = VmMutator::new(control.clone(), fast_poll(10));

        mutator.resize(&vm(), "Standard_B2s", false).await.unwrap();

        assert_eq!(control.calls(), vec!["resize:Standard_B2s"]);
        assert_eq!(control.power_state_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deallocation_poll_is_bounded() {
        let control = Arc::new(MockCompute::new(PowerState::Running, None));
        let mutator = VmMutator::new(control.clone(), fast_poll(5));

        let err = mutator
            .resize(&vm(), "Standard_B2s", false)
            .await
            .unwrap_err();

        match err {
            OptimizerError::DeallocationTimedOut { resource, attempts } => {
                assert_eq!(resource, "web-01");
                assert_eq!(attempts, 5);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(control.power_state_calls.load(Ordering::SeqCst), 6);
        assert_eq!(control.calls(), vec!["deallocate"]);
    }

    #[test]
    fn test_poll_policy_from_settings() {
        let policy = PollPolicy::from(&ComputeSettings::default());
        assert_eq!(policy, PollPolicy::default());
    }
}
