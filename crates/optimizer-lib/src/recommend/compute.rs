//! VM right-sizing recommendation

use crate::config::ComputeSettings;
use crate::models::{Confidence, Recommendation, UtilizationSample};
use crate::tables::ComputeTables;

/// Classifies VM CPU utilization against a three-band threshold ladder
#[derive(Debug, Clone)]
pub struct VmRecommender {
    tables: ComputeTables,
    underutilized_cpu_percent: f64,
    monitor_cpu_percent: f64,
    min_samples: usize,
}

impl VmRecommender {
    pub fn new(settings: &ComputeSettings) -> Self {
        Self {
            tables: ComputeTables::from(settings),
            underutilized_cpu_percent: settings.underutilized_cpu_percent,
            monitor_cpu_percent: settings.monitor_cpu_percent,
            min_samples: settings.min_samples,
        }
    }

    pub fn tables(&self) -> &ComputeTables {
        &self.tables
    }

    /// Recommend a size for a VM given its utilization sample
    pub fn recommend(&self, current_size: &str, sample: &UtilizationSample) -> Recommendation {
        let avg = sample.average_percent;

        if avg < self.underutilized_cpu_percent && sample.data_points > self.min_samples {
            return match self.tables.sizes.downgrade(current_size) {
                Some(target) => Recommendation {
                    current: current_size.to_string(),
                    recommended: Some(target.to_string()),
                    reason: format!(
                        "Underutilized: average CPU {:.1}% over {} samples",
                        avg, sample.data_points
                    ),
                    estimated_savings: self.tables.prices.savings(current_size, target),
                    confidence: Confidence::High,
                    should_optimize: true,
                },
                None => Recommendation::keep(
                    current_size,
                    format!(
                        "Underutilized (average CPU {:.1}%) but no downgrade mapping available for {}",
                        avg, current_size
                    ),
                    Confidence::Medium,
                ),
            };
        }

        if avg < self.monitor_cpu_percent {
            return Recommendation::keep(
                current_size,
                format!(
                    "Low utilization (average CPU {:.1}%, {} samples); monitor longer",
                    avg, sample.data_points
                ),
                Confidence::Low,
            );
        }

        Recommendation::keep(
            current_size,
            format!("Utilization within range (average CPU {:.1}%)", avg),
            Confidence::High,
        )
    }

    /// Recommendation for an explicitly requested size
    pub fn explicit(&self, current_size: &str, target: &str) -> Recommendation {
        let changes = !current_size.eq_ignore_ascii_case(target);
        Recommendation {
            current: current_size.to_string(),
            recommended: changes.then(|| target.to_string()),
            reason: if changes {
                format!("Explicit target size {}", target)
            } else {
                format!("Already at requested size {}", target)
            },
            estimated_savings: self.tables.prices.savings(current_size, target),
            confidence: Confidence::High,
            should_optimize: changes,
        }
    }
}
