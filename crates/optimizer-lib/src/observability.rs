//! Observability infrastructure for the runbooks
//!
//! Provides:
//! - Prometheus metrics (resources processed, savings, fetch and mutation latency)
//! - Structured logging of run events with tracing

use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    Encoder, GaugeVec, Histogram, IntCounter, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

use crate::approval::ApprovalDecision;
use crate::models::{ExecutionResult, Recommendation, ResourceKind};
use crate::runbook::RunSummary;

/// Histogram buckets for API call latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<OptimizerMetricsInner> = OnceLock::new();

struct OptimizerMetricsInner {
    resources_processed: IntCounterVec,
    identified_savings: GaugeVec,
    applied_savings: GaugeVec,
    metrics_fetch_latency_seconds: Histogram,
    mutation_latency_seconds: Histogram,
    metric_fetch_errors: IntCounter,
    power_state_polls: IntCounter,
}

impl OptimizerMetricsInner {
    fn new() -> Self {
        Self {
            resources_processed: register_int_counter_vec!(
                "costopt_resources_processed_total",
                "Resources processed by kind and outcome",
                &["kind", "outcome"]
            )
            .expect("Failed to register resources_processed"),

            identified_savings: register_gauge_vec!(
                "costopt_identified_savings_usd",
                "Estimated monthly savings identified by recommendations",
                &["kind"]
            )
            .expect("Failed to register identified_savings"),

            applied_savings: register_gauge_vec!(
                "costopt_applied_savings_usd",
                "Estimated monthly savings of applied or simulated changes",
                &["kind"]
            )
            .expect("Failed to register applied_savings"),

            metrics_fetch_latency_seconds: register_histogram!(
                "costopt_metrics_fetch_latency_seconds",
                "Time spent querying the monitoring backend",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register metrics_fetch_latency_seconds"),

            mutation_latency_seconds: register_histogram!(
                "costopt_mutation_latency_seconds",
                "Time spent applying a change to a resource",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register mutation_latency_seconds"),

            metric_fetch_errors: register_int_counter!(
                "costopt_metric_fetch_errors_total",
                "Total number of failed metric queries"
            )
            .expect("Failed to register metric_fetch_errors"),

            power_state_polls: register_int_counter!(
                "costopt_power_state_polls_total",
                "Total number of VM power state polls while waiting for deallocation"
            )
            .expect("Failed to register power_state_polls"),
        }
    }
}

/// Handle to the process-wide runbook metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct OptimizerMetrics {
    _private: (),
}

impl Default for OptimizerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OptimizerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OptimizerMetricsInner {
        GLOBAL_METRICS.get_or_init(OptimizerMetricsInner::new)
    }

    pub fn observe_metrics_fetch_latency(&self, duration_secs: f64) {
        self.inner().metrics_fetch_latency_seconds.observe(duration_secs);
    }

    pub fn observe_mutation_latency(&self, duration_secs: f64) {
        self.inner().mutation_latency_seconds.observe(duration_secs);
    }

    pub fn inc_metric_fetch_errors(&self) {
        self.inner().metric_fetch_errors.inc();
    }

    pub fn inc_power_state_polls(&self) {
        self.inner().power_state_polls.inc();
    }

    /// Count a finished resource and add its savings to the gauges
    pub fn record_result(&self, result: &ExecutionResult) {
        let kind = result.kind.to_string();
        self.inner()
            .resources_processed
            .with_label_values(&[kind.as_str(), result.outcome.label()])
            .inc();

        if result.target.is_some() && result.estimated_savings > 0.0 {
            self.inner()
                .identified_savings
                .with_label_values(&[kind.as_str()])
                .add(result.estimated_savings);
            if result.outcome.is_applied() {
                self.inner()
                    .applied_savings
                    .with_label_values(&[kind.as_str()])
                    .add(result.estimated_savings);
            }
        }
    }

    /// Render all registered metrics in the Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Structured logger for runbook events
#[derive(Clone)]
pub struct StructuredLogger {
    runbook: ResourceKind,
    simulate: bool,
}

impl StructuredLogger {
    pub fn new(runbook: ResourceKind, simulate: bool) -> Self {
        Self { runbook, simulate }
    }

    pub fn log_run_started(&self, resource_group: &str, resource_count: usize) {
        info!(
            event = "run_started",
            runbook = %self.runbook,
            resource_group = %resource_group,
            resources = resource_count,
            simulate = self.simulate,
            "Optimization run started"
        );
    }

    pub fn log_recommendation(&self, resource: &str, recommendation: &Recommendation) {
        info!(
            event = "recommendation",
            runbook = %self.runbook,
            resource = %resource,
            current = %recommendation.current,
            recommended = ?recommendation.recommended,
            confidence = %recommendation.confidence,
            estimated_savings = recommendation.estimated_savings,
            should_optimize = recommendation.should_optimize,
            reason = %recommendation.reason,
            "Recommendation computed"
        );
    }

    pub fn log_approval(&self, resource: &str, savings: f64, decision: ApprovalDecision) {
        if decision.is_approved() {
            info!(
                event = "approval",
                runbook = %self.runbook,
                resource = %resource,
                savings = savings,
                decision = %decision,
                "Optimization approved"
            );
        } else {
            warn!(
                event = "approval",
                runbook = %self.runbook,
                resource = %resource,
                savings = savings,
                decision = %decision,
                "Optimization requires approval"
            );
        }
    }

    pub fn log_mutation(&self, resource: &str, from: &str, to: &str) {
        if self.simulate {
            info!(
                event = "mutation_simulated",
                runbook = %self.runbook,
                resource = %resource,
                from = %from,
                to = %to,
                "Simulate mode: change not applied"
            );
        } else {
            info!(
                event = "mutation",
                runbook = %self.runbook,
                resource = %resource,
                from = %from,
                to = %to,
                "Applying change"
            );
        }
    }

    pub fn log_result(&self, result: &ExecutionResult) {
        if result.success() {
            info!(
                event = "resource_processed",
                runbook = %self.runbook,
                resource = %result.resource_name,
                current = %result.current,
                target = ?result.target,
                action = result.outcome.label(),
                success = true,
                message = %result.message(),
                "Resource processed"
            );
        } else {
            error!(
                event = "resource_processed",
                runbook = %self.runbook,
                resource = %result.resource_name,
                action = result.outcome.label(),
                success = false,
                message = %result.message(),
                "Resource processing failed"
            );
        }
    }

    pub fn log_summary(&self, summary: &RunSummary) {
        info!(
            event = "run_summary",
            runbook = %self.runbook,
            processed = summary.processed,
            failed = summary.failed,
            identified_savings = summary.identified_savings,
            applied_savings = summary.applied_savings,
            duration_ms = summary.duration_ms,
            "Optimization run complete"
        );
    }
}
