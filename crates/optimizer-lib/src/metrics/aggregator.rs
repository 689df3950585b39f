//! Reduction of hourly metric series into utilization samples

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::{names, Aggregation, MetricQuery, MetricsSource, TimeWindow};
use crate::error::Result;
use crate::models::{Database, DatabaseEngine, UtilizationSample};
use crate::observability::OptimizerMetrics;

/// Scalar reduction of one series
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SeriesSummary {
    pub average: f64,
    pub maximum: f64,
    pub total: f64,
    pub count: usize,
}

/// Reduce a series to average/maximum/total; non-finite points are ignored
/// and an empty series reduces to zeros
pub fn reduce(points: &[f64]) -> SeriesSummary {
    let finite: Vec<f64> = points.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return SeriesSummary::default();
    }

    let total: f64 = finite.iter().sum();
    let maximum = finite.iter().copied().fold(f64::MIN, f64::max);

    SeriesSummary {
        average: total / finite.len() as f64,
        maximum,
        total,
        count: finite.len(),
    }
}

/// Fetches the series each runbook needs and reduces them
pub struct MetricsAggregator {
    source: Arc<dyn MetricsSource>,
    lookback_days: u32,
    metrics: OptimizerMetrics,
}

impl MetricsAggregator {
    pub fn new(source: Arc<dyn MetricsSource>, lookback_days: u32) -> Self {
        Self {
            source,
            lookback_days,
            metrics: OptimizerMetrics::new(),
        }
    }

    pub fn lookback_days(&self) -> u32 {
        self.lookback_days
    }

    fn window(&self) -> TimeWindow {
        TimeWindow::last_days(self.lookback_days)
    }

    async fn fetch(
        &self,
        resource_id: &str,
        metric: &str,
        aggregation: Aggregation,
        window: TimeWindow,
    ) -> Result<SeriesSummary> {
        let start = Instant::now();
        let query = MetricQuery {
            resource_id,
            metric,
            window,
            aggregation,
        };
        let result = self.source.query(&query).await;
        self.metrics
            .observe_metrics_fetch_latency(start.elapsed().as_secs_f64());

        let points = result.map_err(|e| {
            self.metrics.inc_metric_fetch_errors();
            e
        })?;

        let summary = reduce(&points);
        debug!(
            resource_id = %resource_id,
            metric = %metric,
            aggregation = %aggregation,
            points = summary.count,
            average = summary.average,
            "Fetched metric series"
        );
        Ok(summary)
    }

    /// Like [`Self::fetch`] but a failed query degrades to a zero summary.
    /// Fatal errors still propagate.
    async fn fetch_or_zero(
        &self,
        resource_id: &str,
        metric: &str,
        aggregation: Aggregation,
        window: TimeWindow,
    ) -> Result<SeriesSummary> {
        match self.fetch(resource_id, metric, aggregation, window).await {
            Ok(summary) => Ok(summary),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(
                    resource_id = %resource_id,
                    metric = %metric,
                    error = %e,
                    "Metric unavailable, using zero"
                );
                Ok(SeriesSummary::default())
            }
        }
    }

    /// VM sample; query failures propagate to the caller
    pub async fn compute_sample(&self, resource_id: &str) -> Result<UtilizationSample> {
        let window = self.window();
        let cpu = self
            .fetch(resource_id, names::CPU_PERCENT, Aggregation::Average, window)
            .await?;
        let cpu_peak = self
            .fetch(resource_id, names::CPU_PERCENT, Aggregation::Maximum, window)
            .await?;
        let memory = self
            .fetch(resource_id, names::AVAILABLE_MEMORY, Aggregation::Average, window)
            .await?;
        let disk_read = self
            .fetch(resource_id, names::DISK_READ_OPS, Aggregation::Average, window)
            .await?;
        let disk_write = self
            .fetch(resource_id, names::DISK_WRITE_OPS, Aggregation::Average, window)
            .await?;

        Ok(UtilizationSample {
            average_percent: cpu.average,
            peak_percent: cpu_peak.maximum.max(cpu.maximum),
            available_memory_bytes: memory.average,
            disk_ops_per_sec: disk_read.average + disk_write.average,
            data_points: cpu.count,
            window_days: self.lookback_days,
            ..Default::default()
        })
    }

    /// Database sample; unavailable series degrade to zero, fatal errors propagate
    pub async fn database_sample(&self, database: &Database) -> Result<UtilizationSample> {
        let window = self.window();
        match &database.engine {
            DatabaseEngine::Sql { .. } => {
                let dtu = self
                    .fetch_or_zero(&database.id, names::DTU_PERCENT, Aggregation::Average, window)
                    .await?;
                let dtu_peak = self
                    .fetch_or_zero(&database.id, names::DTU_PERCENT, Aggregation::Maximum, window)
                    .await?;
                let connections = self
                    .fetch_or_zero(&database.id, names::CONNECTIONS, Aggregation::Total, window)
                    .await?;

                Ok(UtilizationSample {
                    average_percent: dtu.average,
                    peak_percent: dtu_peak.maximum.max(dtu.maximum),
                    connections: connections.total,
                    data_points: dtu.count,
                    window_days: self.lookback_days,
                    ..Default::default()
                })
            }
            DatabaseEngine::Cosmos { .. } => {
                let ru = self
                    .fetch_or_zero(&database.id, names::RU_PERCENT, Aggregation::Maximum, window)
                    .await?;
                let requests = self
                    .fetch_or_zero(&database.id, names::TOTAL_REQUESTS, Aggregation::Total, window)
                    .await?;

                Ok(UtilizationSample {
                    average_percent: ru.average,
                    peak_percent: ru.maximum,
                    transactions: requests.total,
                    data_points: ru.count,
                    window_days: self.lookback_days,
                    ..Default::default()
                })
            }
        }
    }

    /// Storage account sample; unavailable series degrade to zero, fatal errors propagate
    pub async fn storage_sample(&self, account_id: &str) -> Result<UtilizationSample> {
        let window = self.window();
        let transactions = self
            .fetch_or_zero(account_id, names::TRANSACTIONS, Aggregation::Total, window)
            .await?;
        let egress = self
            .fetch_or_zero(account_id, names::EGRESS, Aggregation::Total, window)
            .await?;

        Ok(UtilizationSample {
            transactions: transactions.total,
            egress_bytes: egress.total,
            data_points: transactions.count,
            window_days: self.lookback_days,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OptimizerError;
    use crate::metrics::async_trait;
    use std::collections::HashMap;

    /// Serves fixed series keyed by (metric, aggregation); unknown series fail
    struct FixedSource {
        series: HashMap<(String, Aggregation), Vec<f64>>,
    }

    impl FixedSource {
        fn new(entries: &[(&str, Aggregation, Vec<f64>)]) -> Self {
            Self {
                series: entries
                    .iter()
                    .map(|(m, a, v)| ((m.to_string(), *a), v.clone()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl MetricsSource for FixedSource {
        async fn query(&self, query: &MetricQuery<'_>) -> Result<Vec<f64>> {
            self.series
                .get(&(query.metric.to_string(), query.aggregation))
                .cloned()
                .ok_or_else(|| OptimizerError::Metrics {
                    resource: query.resource_id.to_string(),
                    message: format!("{} not available", query.metric),
                })
        }
    }

    #[test]
    fn test_reduce_empty_series_is_zero() {
        assert_eq!(reduce(&[]), SeriesSummary::default());
    }

    #[test]
    fn test_reduce_ignores_non_finite_points() {
        let summary = reduce(&[2.0, f64::NAN, 4.0, f64::INFINITY]);
        assert_eq!(summary.count, 2);
        assert!((summary.average - 3.0).abs() < f64::EPSILON);
        assert!((summary.maximum - 4.0).abs() < f64::EPSILON);
        assert!((summary.total - 6.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_compute_sample() {
        let source = FixedSource::new(&[
            (names::CPU_PERCENT, Aggregation::Average, vec![4.0, 6.0, 5.0]),
            (names::CPU_PERCENT, Aggregation::Maximum, vec![9.0, 12.0, 7.0]),
            (names::AVAILABLE_MEMORY, Aggregation::Average, vec![1024.0]),
            (names::DISK_READ_OPS, Aggregation::Average, vec![3.0]),
            (names::DISK_WRITE_OPS, Aggregation::Average, vec![1.0]),
        ]);
        let aggregator = MetricsAggregator::new(Arc::new(source), 7);

        let sample = aggregator.compute_sample("/vm/1").await.unwrap();
        assert!((sample.average_percent - 5.0).abs() < f64::EPSILON);
        assert!((sample.peak_percent - 12.0).abs() < f64::EPSILON);
        assert_eq!(sample.data_points, 3);
        assert!((sample.disk_ops_per_sec - 4.0).abs() < f64::EPSILON);
        assert_eq!(sample.window_days, 7);
    }

    #[tokio::test]
    async fn test_compute_sample_propagates_failures() {
        let source = FixedSource::new(&[]);
        let aggregator = MetricsAggregator::new(Arc::new(source), 7);
        assert!(aggregator.compute_sample("/vm/1").await.is_err());
    }

    #[tokio::test]
    async fn test_database_sample_degrades_to_zero() {
        let source = FixedSource::new(&[(
            names::DTU_PERCENT,
            Aggregation::Average,
            vec![8.0; 50],
        )]);
        let aggregator = MetricsAggregator::new(Arc::new(source), 7);
        let database = Database {
            id: "/db/1".into(),
            name: "orders".into(),
            resource_group: "rg".into(),
            engine: DatabaseEngine::Sql {
                server: "sql1".into(),
                service_objective: "S2".into(),
            },
        };

        let sample = aggregator.database_sample(&database).await.unwrap();
        assert_eq!(sample.data_points, 50);
        assert!((sample.average_percent - 8.0).abs() < f64::EPSILON);
        assert_eq!(sample.connections, 0.0);
    }

    #[tokio::test]
    async fn test_storage_sample_without_metrics() {
        let aggregator = MetricsAggregator::new(Arc::new(FixedSource::new(&[])), 30);
        let sample = aggregator.storage_sample("/sa/1").await.unwrap();
        assert_eq!(sample.transactions, 0.0);
        assert_eq!(sample.window_days, 30);
    }

    /// Rejects every query as if the token had expired
    struct ExpiredTokenSource;

    #[async_trait]
    impl MetricsSource for ExpiredTokenSource {
        async fn query(&self, _query: &MetricQuery<'_>) -> Result<Vec<f64>> {
            Err(OptimizerError::Authentication("token expired".into()))
        }
    }

    #[tokio::test]
    async fn test_authentication_failure_is_not_degraded() {
        let aggregator = MetricsAggregator::new(Arc::new(ExpiredTokenSource), 7);
        let database = Database {
            id: "/db/1".into(),
            name: "orders".into(),
            resource_group: "rg".into(),
            engine: DatabaseEngine::Sql {
                server: "sql1".into(),
                service_objective: "S2".into(),
            },
        };

        let err = aggregator.database_sample(&database).await.unwrap_err();
        assert!(err.is_fatal());
        let err = aggregator.storage_sample("/sa/1").await.unwrap_err();
        assert!(matches!(err, OptimizerError::Authentication(_)));
    }
}
