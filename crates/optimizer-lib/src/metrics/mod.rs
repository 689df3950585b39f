//! Utilization metrics from the monitoring backend
//!
//! This module defines the monitoring query interface and reduces the
//! returned hourly series into the fixed-shape [`UtilizationSample`] the
//! recommendation engines consume.
//!
//! [`UtilizationSample`]: crate::models::UtilizationSample

mod aggregator;

pub use aggregator::{reduce, MetricsAggregator, SeriesSummary};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

pub use async_trait::async_trait;

/// Aggregation applied by the monitoring backend per time grain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aggregation {
    Average,
    Total,
    Maximum,
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Average => write!(f, "Average"),
            Aggregation::Total => write!(f, "Total"),
            Aggregation::Maximum => write!(f, "Maximum"),
        }
    }
}

/// Query time range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window ending now and reaching `days` back
    pub fn last_days(days: u32) -> Self {
        let end = Utc::now();
        Self {
            start: end - Duration::days(days as i64),
            end,
        }
    }

    pub fn days(&self) -> u32 {
        (self.end - self.start).num_days().max(0) as u32
    }

    /// ISO 8601 `start/end` interval as expected by the monitoring API
    pub fn to_timespan(&self) -> String {
        format!(
            "{}/{}",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}

/// A single named-series request at hourly granularity
#[derive(Debug, Clone, PartialEq)]
pub struct MetricQuery<'a> {
    pub resource_id: &'a str,
    pub metric: &'a str,
    pub window: TimeWindow,
    pub aggregation: Aggregation,
}

/// Monitoring backend interface
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Time-ordered data points for the query; empty when the metric is
    /// unavailable for the resource
    async fn query(&self, query: &MetricQuery<'_>) -> Result<Vec<f64>>;
}

/// Metric names queried per resource kind
pub mod names {
    pub const CPU_PERCENT: &str = "Percentage CPU";
    pub const AVAILABLE_MEMORY: &str = "Available Memory Bytes";
    pub const DISK_READ_OPS: &str = "Disk Read Operations/Sec";
    pub const DISK_WRITE_OPS: &str = "Disk Write Operations/Sec";
    pub const DTU_PERCENT: &str = "dtu_consumption_percent";
    pub const CONNECTIONS: &str = "connection_successful";
    pub const RU_PERCENT: &str = "NormalizedRUConsumption";
    pub const TOTAL_REQUESTS: &str = "TotalRequests";
    pub const TRANSACTIONS: &str = "Transactions";
    pub const EGRESS: &str = "Egress";
}
