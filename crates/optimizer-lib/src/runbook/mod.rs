//! Runbook orchestration
//!
//! A runbook enumerates the resources in scope and processes them one after
//! another. Each resource is its own failure boundary: a non-fatal error is
//! folded into an `Error` outcome for that resource and the run continues.
//! Fatal errors (authentication, configuration) and enumeration failures
//! abort the run.

mod compute;
mod database;
mod storage;

pub use compute::ComputeRunbook;
pub use database::DatabaseRunbook;
pub use storage::StorageRunbook;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::approval::ApprovalGate;
use crate::error::Result;
use crate::models::{ExecutionResult, Outcome, Recommendation, ResourceKind, RunOptions, Scope};
use crate::observability::{OptimizerMetrics, StructuredLogger};

pub use async_trait::async_trait;

/// A resource-kind specific optimization pipeline
#[async_trait]
pub trait Runbook: Send + Sync {
    type Resource: Send + Sync;

    fn kind(&self) -> ResourceKind;

    /// List resources in scope; failures abort the run
    async fn enumerate(&self, scope: &Scope) -> Result<Vec<Self::Resource>>;

    fn resource_name(&self, resource: &Self::Resource) -> String;

    /// metrics -> recommendation -> approval -> mutation for one resource
    async fn process(&self, resource: &Self::Resource, options: &RunOptions) -> Result<ExecutionResult>;
}

/// Totals over one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub processed: usize,
    pub failed: usize,
    /// Savings of every recommendation that wanted to optimize
    pub identified_savings: f64,
    /// Savings of resized, simulated or tiered resources
    pub applied_savings: f64,
    pub duration_ms: u64,
    /// Result count per outcome label
    pub outcomes: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn from_results(results: &[ExecutionResult], duration: Duration) -> Self {
        results.iter().fold(
            Self {
                duration_ms: duration.as_millis() as u64,
                ..Default::default()
            },
            |mut summary, result| {
                summary.processed += 1;
                if !result.success() {
                    summary.failed += 1;
                }
                if result.target.is_some() {
                    summary.identified_savings += result.estimated_savings;
                    if result.outcome.is_applied() {
                        summary.applied_savings += result.estimated_savings;
                    }
                }
                *summary
                    .outcomes
                    .entry(result.outcome.label().to_string())
                    .or_insert(0) += 1;
                summary
            },
        )
    }
}

/// Ordered per-resource results plus the run summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub kind: ResourceKind,
    pub results: Vec<ExecutionResult>,
    pub summary: RunSummary,
}

/// Turn one resource's processing result into a result record, keeping
/// fatal errors as errors
fn settle(
    kind: ResourceKind,
    name: String,
    result: Result<ExecutionResult>,
) -> Result<ExecutionResult> {
    match result {
        Ok(result) => Ok(result),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => Ok(ExecutionResult::error(name, kind, e.to_string())),
    }
}

/// Run a runbook over every resource in scope
pub async fn run<R: Runbook>(runbook: &R, scope: &Scope, options: &RunOptions) -> Result<RunReport> {
    let start = Instant::now();
    let kind = runbook.kind();
    let logger = StructuredLogger::new(kind, options.simulate);
    let metrics = OptimizerMetrics::new();

    let resources = runbook.enumerate(scope).await?;
    logger.log_run_started(&scope.resource_group, resources.len());

    let mut results = Vec::with_capacity(resources.len());
    for resource in &resources {
        let name = runbook.resource_name(resource);
        let result = settle(kind, name, runbook.process(resource, options).await)?;
        logger.log_result(&result);
        metrics.record_result(&result);
        results.push(result);
    }

    let summary = RunSummary::from_results(&results, start.elapsed());
    logger.log_summary(&summary);

    Ok(RunReport {
        kind,
        results,
        summary,
    })
}

/// Stop point before mutation: a recommendation that does not want to
/// optimize, or savings the gate does not approve
fn gate_check(
    name: &str,
    kind: ResourceKind,
    rec: &Recommendation,
    gate: &ApprovalGate,
    options: &RunOptions,
    logger: &StructuredLogger,
) -> Option<ExecutionResult> {
    if !rec.should_optimize {
        return Some(ExecutionResult::new(
            name,
            kind,
            &rec.current,
            Outcome::NoAction {
                reason: rec.reason.clone(),
            },
        ));
    }

    let decision = gate.evaluate(rec.estimated_savings, options.force);
    logger.log_approval(name, rec.estimated_savings, decision);
    if decision.is_approved() {
        return None;
    }

    Some(
        ExecutionResult::new(
            name,
            kind,
            &rec.current,
            Outcome::ApprovalRequired {
                target: rec.recommended.clone().unwrap_or_default(),
                savings: rec.estimated_savings,
                decision,
            },
        )
        .with_target(rec.recommended.clone(), rec.estimated_savings),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalDecision;
    use crate::error::OptimizerError;
    use crate::models::Confidence;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Processes integers; odd values fail, `fatal_at` aborts
    struct NumberRunbook {
        fatal_at: Option<u32>,
        processed: AtomicUsize,
    }

    #[async_trait]
    impl Runbook for NumberRunbook {
        type Resource = u32;

        fn kind(&self) -> ResourceKind {
            ResourceKind::Compute
        }

        async fn enumerate(&self, _scope: &Scope) -> Result<Vec<u32>> {
            Ok(vec![1, 2, 3, 4])
        }

        fn resource_name(&self, resource: &u32) -> String {
            format!("vm-{}", resource)
        }

        async fn process(&self, resource: &u32, _options: &RunOptions) -> Result<ExecutionResult> {
            self.processed.fetch_add(1, Ordering::SeqCst);
            if Some(*resource) == self.fatal_at {
                return Err(OptimizerError::Authentication("token expired".into()));
            }
            if resource % 2 == 1 {
                return Err(OptimizerError::NotFound(format!("vm-{}", resource)));
            }
            Ok(ExecutionResult::new(
                format!("vm-{}", resource),
                ResourceKind::Compute,
                "Standard_D2s_v3",
                Outcome::Simulated {
                    from: "Standard_D2s_v3".into(),
                    to: "Standard_B2s".into(),
                },
            )
            .with_target(Some("Standard_B2s".into()), 50.0))
        }
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_resource() {
        let runbook = NumberRunbook {
            fatal_at: None,
            processed: AtomicUsize::new(0),
        };
        let report = run(&runbook, &Scope::new("rg"), &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(runbook.processed.load(Ordering::SeqCst), 4);
        assert_eq!(report.results.len(), 4);
        assert!(!report.results[0].success());
        assert_eq!(report.results[0].resource_name, "vm-1");
        assert!(report.results[1].success());

        assert_eq!(report.summary.processed, 4);
        assert_eq!(report.summary.failed, 2);
        assert_eq!(report.summary.outcomes.get("Error"), Some(&2));
        assert_eq!(report.summary.outcomes.get("Simulated"), Some(&2));
        assert!((report.summary.applied_savings - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_run() {
        let runbook = NumberRunbook {
            fatal_at: Some(2),
            processed: AtomicUsize::new(0),
        };
        let err = run(&runbook, &Scope::new("rg"), &RunOptions::default())
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(runbook.processed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_summary_separates_identified_and_applied() {
        let results = vec![
            ExecutionResult::new(
                "a",
                ResourceKind::Compute,
                "x",
                Outcome::Resized {
                    from: "x".into(),
                    to: "y".into(),
                },
            )
            .with_target(Some("y".into()), 40.0),
            ExecutionResult::new(
                "b",
                ResourceKind::Compute,
                "x",
                Outcome::ApprovalRequired {
                    target: "y".into(),
                    savings: 300.0,
                    decision: ApprovalDecision::PendingManualReview,
                },
            )
            .with_target(Some("y".into()), 300.0),
            ExecutionResult::new(
                "c",
                ResourceKind::Compute,
                "x",
                Outcome::NoAction {
                    reason: "within range".into(),
                },
            ),
        ];

        let summary = RunSummary::from_results(&results, Duration::from_millis(12));
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.failed, 0);
        assert!((summary.identified_savings - 340.0).abs() < 1e-9);
        assert!((summary.applied_savings - 40.0).abs() < 1e-9);
        assert_eq!(summary.duration_ms, 12);
    }

    #[test]
    fn test_report_json_with_gated_and_manual_outcomes() {
        let results = vec![
            ExecutionResult::new(
                "orders",
                ResourceKind::Database,
                "S4",
                Outcome::ApprovalRequired {
                    target: "S3".into(),
                    savings: 150.26,
                    decision: ApprovalDecision::PendingManualReview,
                },
            )
            .with_target(Some("S3".into()), 150.26),
            ExecutionResult::new(
                "billing",
                ResourceKind::Database,
                "S2",
                Outcome::ManualActionRequired {
                    action: crate::models::DatabaseAction::IncreaseDtu,
                },
            )
            .with_target(Some("S3".into()), 0.0),
        ];
        let report = RunReport {
            kind: ResourceKind::Database,
            summary: RunSummary::from_results(&results, Duration::from_millis(5)),
            results,
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["results"][0]["outcome"]["type"], "approval_required");
        assert_eq!(json["results"][0]["outcome"]["decision"], "pending_manual_review");
        assert_eq!(json["results"][1]["outcome"]["type"], "manual_action_required");
        assert_eq!(json["results"][1]["outcome"]["action"], "IncreaseDtu");

        let back: RunReport = serde_json::from_value(json).unwrap();
        assert_eq!(back.results, report.results);
        assert_eq!(back.summary, report.summary);
    }

    #[test]
    fn test_gate_check_stops_unapproved_savings() {
        let logger = StructuredLogger::new(ResourceKind::Compute, false);
        let rec = Recommendation {
            current: "S4".into(),
            recommended: Some("S3".into()),
            reason: "underutilized".into(),
            estimated_savings: 300.0,
            confidence: Confidence::High,
            should_optimize: true,
        };
        let gate = ApprovalGate::default();

        let stopped = gate_check("db", ResourceKind::Database, &rec, &gate, &RunOptions::default(), &logger)
            .unwrap();
        assert!(matches!(
            stopped.outcome,
            Outcome::ApprovalRequired {
                decision: ApprovalDecision::PendingManualReview,
                ..
            }
        ));

        let forced = RunOptions {
            force: true,
            ..Default::default()
        };
        assert!(gate_check("db", ResourceKind::Database, &rec, &gate, &forced, &logger).is_none());
    }
}
