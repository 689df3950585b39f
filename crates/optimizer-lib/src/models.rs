//! Core data models for the optimization runbooks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::approval::ApprovalDecision;

/// Kind of resource a runbook operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Compute,
    Storage,
    Database,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Compute => write!(f, "compute"),
            ResourceKind::Storage => write!(f, "storage"),
            ResourceKind::Database => write!(f, "database"),
        }
    }
}

/// Target scope of a runbook invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scope {
    pub resource_group: String,
    /// Restrict the run to a single named resource
    pub resource_name: Option<String>,
}

impl Scope {
    pub fn new(resource_group: impl Into<String>) -> Self {
        Self {
            resource_group: resource_group.into(),
            resource_name: None,
        }
    }

    pub fn with_resource_name(mut self, name: impl Into<String>) -> Self {
        self.resource_name = Some(name.into());
        self
    }

    /// Check whether a resource in this group passes the name filter
    pub fn matches(&self, resource_group: &str, name: &str) -> bool {
        resource_group.eq_ignore_ascii_case(&self.resource_group)
            && self
                .resource_name
                .as_ref()
                .map(|n| n.eq_ignore_ascii_case(name))
                .unwrap_or(true)
    }
}

/// Per-invocation switches shared by every runbook
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    /// Explicit target configuration, bypassing the recommendation
    pub target: Option<String>,
    /// Approve optimizations that fall in the manual-approval band
    pub force: bool,
    /// Log intended changes without touching resources
    pub simulate: bool,
}

/// Scalar aggregates of a resource's utilization over the lookback window
///
/// `average_percent`/`peak_percent` carry CPU%, DTU% or RU% depending on the
/// resource kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSample {
    pub average_percent: f64,
    pub peak_percent: f64,
    pub available_memory_bytes: f64,
    pub disk_ops_per_sec: f64,
    pub transactions: f64,
    pub egress_bytes: f64,
    pub connections: f64,
    /// Number of hourly points behind `average_percent`
    pub data_points: usize,
    pub window_days: u32,
}

impl UtilizationSample {
    /// Average successful connections per day over the window
    pub fn daily_connections(&self) -> f64 {
        if self.window_days == 0 {
            return self.connections;
        }
        self.connections / self.window_days as f64
    }
}

/// Confidence attached to a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Low => write!(f, "Low"),
            Confidence::Medium => write!(f, "Medium"),
            Confidence::High => write!(f, "High"),
        }
    }
}

/// Optimization recommendation derived from a utilization sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub current: String,
    pub recommended: Option<String>,
    pub reason: String,
    /// Estimated monthly savings in USD
    pub estimated_savings: f64,
    pub confidence: Confidence,
    pub should_optimize: bool,
}

impl Recommendation {
    /// A recommendation that leaves the resource as it is
    pub fn keep(current: impl Into<String>, reason: impl Into<String>, confidence: Confidence) -> Self {
        Self {
            current: current.into(),
            recommended: None,
            reason: reason.into(),
            estimated_savings: 0.0,
            confidence,
            should_optimize: false,
        }
    }
}

/// VM power state as reported by the instance view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Running,
    Starting,
    Stopping,
    Stopped,
    Deallocating,
    Deallocated,
    Unknown,
}

impl PowerState {
    /// Parse a `PowerState/<state>` status code
    pub fn from_status_code(code: &str) -> Self {
        let state = code.strip_prefix("PowerState/").unwrap_or(code);
        state.parse().unwrap_or(PowerState::Unknown)
    }
}

impl FromStr for PowerState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "running" => Ok(PowerState::Running),
            "starting" => Ok(PowerState::Starting),
            "stopping" => Ok(PowerState::Stopping),
            "stopped" => Ok(PowerState::Stopped),
            "deallocating" => Ok(PowerState::Deallocating),
            "deallocated" => Ok(PowerState::Deallocated),
            _ => Err(()),
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PowerState::Running => "running",
            PowerState::Starting => "starting",
            PowerState::Stopping => "stopping",
            PowerState::Stopped => "stopped",
            PowerState::Deallocating => "deallocating",
            PowerState::Deallocated => "deallocated",
            PowerState::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Virtual machine as listed by the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub id: String,
    pub name: String,
    pub resource_group: String,
    pub size: String,
}

/// Blob access tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccessTier {
    Hot,
    Cool,
    Archive,
}

impl FromStr for AccessTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hot" => Ok(AccessTier::Hot),
            "cool" => Ok(AccessTier::Cool),
            "archive" => Ok(AccessTier::Archive),
            other => Err(format!("unknown access tier '{}'", other)),
        }
    }
}

impl fmt::Display for AccessTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessTier::Hot => write!(f, "Hot"),
            AccessTier::Cool => write!(f, "Cool"),
            AccessTier::Archive => write!(f, "Archive"),
        }
    }
}

/// Storage account in scope of the storage runbook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageAccount {
    pub id: String,
    pub name: String,
    pub resource_group: String,
}

/// Blob inside a storage account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobItem {
    pub container: String,
    pub name: String,
    pub size_bytes: u64,
    pub tier: AccessTier,
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
}

impl BlobItem {
    /// Size in GiB as used by the per-GB price table
    pub fn size_gb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }

    /// Days since the blob was last read, falling back to its modification time
    pub fn days_since_access(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_accessed
            .or(self.last_modified)
            .map(|ts| (now - ts).num_days().max(0))
    }

    /// `container/name` path used in logs and the mutation API
    pub fn path(&self) -> String {
        format!("{}/{}", self.container, self.name)
    }
}

/// Database offering, which decides the metric family and the actions available
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    /// DTU-based SQL database
    Sql {
        server: String,
        service_objective: String,
    },
    /// Request-unit based document store
    Cosmos {
        #[serde(default)]
        provisioned_ru: Option<u32>,
    },
}

/// Database resource in scope of the database runbook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Database {
    pub id: String,
    pub name: String,
    pub resource_group: String,
    pub engine: DatabaseEngine,
}

impl Database {
    /// Current configuration label (service objective or provisioned throughput)
    pub fn current_configuration(&self) -> String {
        match &self.engine {
            DatabaseEngine::Sql {
                service_objective, ..
            } => service_objective.clone(),
            DatabaseEngine::Cosmos {
                provisioned_ru: Some(ru),
            } => format!("{} RU/s", ru),
            DatabaseEngine::Cosmos { provisioned_ru: None } => "provisioned".to_string(),
        }
    }
}

/// Action tag produced by the database recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseAction {
    None,
    ScaleDown,
    /// Explicitly requested service objective
    SetServiceObjective,
    IncreaseDtu,
    EnableAutoScale,
    IncreaseRu,
}

impl fmt::Display for DatabaseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseAction::None => write!(f, "None"),
            DatabaseAction::ScaleDown => write!(f, "ScaleDown"),
            DatabaseAction::SetServiceObjective => write!(f, "SetServiceObjective"),
            DatabaseAction::IncreaseDtu => write!(f, "IncreaseDTU"),
            DatabaseAction::EnableAutoScale => write!(f, "EnableAutoScale"),
            DatabaseAction::IncreaseRu => write!(f, "IncreaseRU"),
        }
    }
}

/// What happened to a resource during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    NoAction { reason: String },
    Resized { from: String, to: String },
    Simulated { from: String, to: String },
    ApprovalRequired {
        target: String,
        savings: f64,
        decision: ApprovalDecision,
    },
    /// Storage batch: blobs attempted and blobs that failed to move
    Tiered { attempted: usize, failed: usize },
    ManualActionRequired { action: DatabaseAction },
    Error { message: String },
}

impl Outcome {
    /// Short label used for counting and table output
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::NoAction { .. } => "None",
            Outcome::Resized { .. } => "Resized",
            Outcome::Simulated { .. } => "Simulated",
            Outcome::ApprovalRequired { .. } => "ApprovalRequired",
            Outcome::Tiered { .. } => "Tiered",
            Outcome::ManualActionRequired { .. } => "ManualActionRequired",
            Outcome::Error { .. } => "Error",
        }
    }

    /// Whether savings for this outcome were realized (or would be, in simulate mode)
    pub fn is_applied(&self) -> bool {
        matches!(
            self,
            Outcome::Resized { .. } | Outcome::Simulated { .. } | Outcome::Tiered { .. }
        )
    }
}

/// Per-resource result record accumulated over a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub resource_name: String,
    pub kind: ResourceKind,
    pub current: String,
    pub target: Option<String>,
    pub estimated_savings: f64,
    pub outcome: Outcome,
}

impl ExecutionResult {
    pub fn new(
        resource_name: impl Into<String>,
        kind: ResourceKind,
        current: impl Into<String>,
        outcome: Outcome,
    ) -> Self {
        Self {
            resource_name: resource_name.into(),
            kind,
            current: current.into(),
            target: None,
            estimated_savings: 0.0,
            outcome,
        }
    }

    pub fn with_target(mut self, target: Option<String>, estimated_savings: f64) -> Self {
        self.target = target;
        self.estimated_savings = estimated_savings;
        self
    }

    /// Error record for a resource whose processing failed
    pub fn error(resource_name: impl Into<String>, kind: ResourceKind, message: impl Into<String>) -> Self {
        Self::new(
            resource_name,
            kind,
            "",
            Outcome::Error {
                message: message.into(),
            },
        )
    }

    pub fn success(&self) -> bool {
        !matches!(self.outcome, Outcome::Error { .. })
    }

    /// Human-readable message for the outcome
    pub fn message(&self) -> String {
        match &self.outcome {
            Outcome::NoAction { reason } => reason.clone(),
            Outcome::Resized { from, to } => format!("changed {} -> {}", from, to),
            Outcome::Simulated { from, to } => format!("would change {} -> {}", from, to),
            Outcome::ApprovalRequired {
                target,
                savings,
                decision,
            } => format!(
                "change to {} saving ${:.2}/month {}",
                target, savings, decision
            ),
            Outcome::Tiered { attempted, failed } => {
                format!(
                    "{} of {} blobs re-tiered",
                    attempted.saturating_sub(*failed),
                    attempted
                )
            }
            Outcome::ManualActionRequired { action } => {
                format!("{} acknowledged, requires manual action", action)
            }
            Outcome::Error { message } => message.clone(),
        }
    }
}
