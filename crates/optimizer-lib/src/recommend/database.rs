//! Database scaling recommendation
//!
//! DTU databases get a strict "highly underutilized" band that selects the
//! next-lower service objective; request-unit stores only ever produce
//! advisory actions.

use serde::{Deserialize, Serialize};

use crate::config::DatabaseSettings;
use crate::models::{
    Confidence, Database, DatabaseAction, DatabaseEngine, Recommendation, UtilizationSample,
};
use crate::tables::DtuTable;

/// Recommendation plus the action tag the mutator dispatches on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseRecommendation {
    pub recommendation: Recommendation,
    pub action: DatabaseAction,
}

impl DatabaseRecommendation {
    fn keep(recommendation: Recommendation) -> Self {
        Self {
            recommendation,
            action: DatabaseAction::None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseRecommender {
    tiers: DtuTable,
    settings: DatabaseSettings,
}

impl DatabaseRecommender {
    pub fn new(settings: &DatabaseSettings) -> Self {
        Self {
            tiers: DtuTable::from(settings),
            settings: settings.clone(),
        }
    }

    pub fn tiers(&self) -> &DtuTable {
        &self.tiers
    }

    pub fn recommend(&self, database: &Database, sample: &UtilizationSample) -> DatabaseRecommendation {
        match &database.engine {
            DatabaseEngine::Sql {
                service_objective, ..
            } => self.recommend_dtu(service_objective, sample),
            DatabaseEngine::Cosmos { .. } => {
                self.recommend_ru(&database.current_configuration(), sample)
            }
        }
    }

    fn recommend_dtu(&self, current: &str, sample: &UtilizationSample) -> DatabaseRecommendation {
        let s = &self.settings;
        let avg = sample.average_percent;

        if avg < s.highly_underutilized_percent
            && sample.data_points > s.min_samples_strict
            && sample.daily_connections() < s.max_daily_connections
        {
            let Some(tier) = self.tiers.get(current) else {
                return DatabaseRecommendation::keep(Recommendation::keep(
                    current,
                    format!("Highly underutilized but no tier data for {}", current),
                    Confidence::Medium,
                ));
            };

            return match self.tiers.next_lower(tier) {
                Some(target) => DatabaseRecommendation {
                    recommendation: Recommendation {
                        current: current.to_string(),
                        recommended: Some(target.name.clone()),
                        reason: format!(
                            "Highly underutilized: average DTU {:.1}%, {:.1} connections/day",
                            avg,
                            sample.daily_connections()
                        ),
                        estimated_savings: tier.monthly_cost - target.monthly_cost,
                        confidence: Confidence::High,
                        should_optimize: true,
                    },
                    action: DatabaseAction::ScaleDown,
                },
                None => DatabaseRecommendation::keep(Recommendation::keep(
                    current,
                    format!("Highly underutilized but {} is already the lowest tier", current),
                    Confidence::Medium,
                )),
            };
        }

        if avg < s.underutilized_percent && sample.data_points > s.min_samples {
            return DatabaseRecommendation::keep(Recommendation::keep(
                current,
                format!(
                    "Low utilization (average DTU {:.1}%, {} samples); monitor longer",
                    avg, sample.data_points
                ),
                Confidence::Low,
            ));
        }

        if sample.peak_percent > s.scale_up_peak_percent || avg > s.scale_up_average_percent {
            let next_higher = self
                .tiers
                .get(current)
                .and_then(|t| self.tiers.next_higher(t))
                .map(|t| t.name.clone());
            return DatabaseRecommendation {
                recommendation: Recommendation {
                    current: current.to_string(),
                    recommended: next_higher,
                    reason: format!(
                        "Under pressure: average DTU {:.1}%, peak {:.1}%",
                        avg, sample.peak_percent
                    ),
                    estimated_savings: 0.0,
                    confidence: Confidence::Medium,
                    should_optimize: true,
                },
                action: DatabaseAction::IncreaseDtu,
            };
        }

        DatabaseRecommendation::keep(Recommendation::keep(
            current,
            format!("Utilization within range (average DTU {:.1}%)", avg),
            Confidence::High,
        ))
    }

    fn recommend_ru(&self, current: &str, sample: &UtilizationSample) -> DatabaseRecommendation {
        let s = &self.settings;
        let avg = sample.average_percent;

        if avg < s.ru_underutilized_percent && sample.data_points > s.min_samples_strict {
            return DatabaseRecommendation {
                recommendation: Recommendation {
                    current: current.to_string(),
                    recommended: Some("autoscale".to_string()),
                    reason: format!("Low RU consumption ({:.1}%); enable autoscale", avg),
                    estimated_savings: 0.0,
                    confidence: Confidence::Medium,
                    should_optimize: true,
                },
                action: DatabaseAction::EnableAutoScale,
            };
        }

        if avg > s.ru_overutilized_percent {
            return DatabaseRecommendation {
                recommendation: Recommendation {
                    current: current.to_string(),
                    recommended: None,
                    reason: format!("High RU consumption ({:.1}%); increase throughput", avg),
                    estimated_savings: 0.0,
                    confidence: Confidence::Medium,
                    should_optimize: true,
                },
                action: DatabaseAction::IncreaseRu,
            };
        }

        if avg < s.ru_underutilized_percent {
            return DatabaseRecommendation::keep(Recommendation::keep(
                current,
                format!(
                    "Low RU consumption ({:.1}%, {} samples); monitor longer",
                    avg, sample.data_points
                ),
                Confidence::Low,
            ));
        }

        DatabaseRecommendation::keep(Recommendation::keep(
            current,
            format!("RU consumption within range ({:.1}%)", avg),
            Confidence::High,
        ))
    }

    /// Recommendation for an explicitly requested service objective
    pub fn explicit(&self, database: &Database, target: &str) -> DatabaseRecommendation {
        let current = database.current_configuration();
        match &database.engine {
            DatabaseEngine::Sql { .. } if !current.eq_ignore_ascii_case(target) => {
                DatabaseRecommendation {
                    recommendation: Recommendation {
                        current: current.clone(),
                        recommended: Some(target.to_string()),
                        reason: format!("Explicit target service objective {}", target),
                        estimated_savings: self.tiers.savings(&current, target),
                        confidence: Confidence::High,
                        should_optimize: true,
                    },
                    action: DatabaseAction::SetServiceObjective,
                }
            }
            DatabaseEngine::Sql { .. } => DatabaseRecommendation::keep(Recommendation::keep(
                current,
                format!("Already at requested service objective {}", target),
                Confidence::High,
            )),
            DatabaseEngine::Cosmos { .. } => DatabaseRecommendation::keep(Recommendation::keep(
                current,
                "Explicit targets only apply to DTU databases",
                Confidence::Low,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql(objective: &str) -> Database {
        Database {
            id: format!("/sql/{}", objective),
            name: "orders".into(),
            resource_group: "rg".into(),
            engine: DatabaseEngine::Sql {
                server: "sql1".into(),
                service_objective: objective.into(),
            },
        }
    }

    fn cosmos() -> Database {
        Database {
            id: "/cosmos/1".into(),
            name: "catalog".into(),
            resource_group: "rg".into(),
            engine: DatabaseEngine::Cosmos {
                provisioned_ru: Some(4000),
            },
        }
    }

    fn sample(avg: f64, peak: f64, points: usize, connections: f64) -> UtilizationSample {
        UtilizationSample {
            average_percent: avg,
            peak_percent: peak,
            data_points: points,
            connections,
            window_days: 7,
            ..Default::default()
        }
    }

    fn recommender() -> DatabaseRecommender {
        DatabaseRecommender::new(&DatabaseSettings::default())
    }

    #[test]
    fn test_highly_underutilized_scales_to_next_lower_tier() {
        let rec = recommender().recommend(&sql("S2"), &sample(4.0, 12.0, 168, 21.0));
        assert_eq!(rec.action, DatabaseAction::ScaleDown);
        assert_eq!(rec.recommendation.recommended.as_deref(), Some("S1"));
        assert_eq!(rec.recommendation.confidence, Confidence::High);
        assert!((rec.recommendation.estimated_savings - 45.08).abs() < 1e-9);
    }

    #[test]
    fn test_busy_connections_block_strict_band() {
        // 140 connections over 7 days = 20/day
        let rec = recommender().recommend(&sql("S2"), &sample(4.0, 12.0, 168, 140.0));
        assert_eq!(rec.action, DatabaseAction::None);
        assert_eq!(rec.recommendation.confidence, Confidence::Low);
    }

    #[test]
    fn test_strict_band_requires_more_than_48_points() {
        let rec = recommender().recommend(&sql("S2"), &sample(4.0, 12.0, 48, 0.0));
        assert_eq!(rec.action, DatabaseAction::None);
        assert!(!rec.recommendation.should_optimize);
    }

    #[test]
    fn test_lowest_tier_stays() {
        let rec = recommender().recommend(&sql("Basic"), &sample(1.0, 2.0, 168, 0.0));
        assert_eq!(rec.action, DatabaseAction::None);
        assert_eq!(rec.recommendation.confidence, Confidence::Medium);
    }

    #[test]
    fn test_pressure_suggests_increase() {
        let rec = recommender().recommend(&sql("S2"), &sample(60.0, 97.0, 168, 5000.0));
        assert_eq!(rec.action, DatabaseAction::IncreaseDtu);
        assert_eq!(rec.recommendation.recommended.as_deref(), Some("S3"));
    }

    #[test]
    fn test_sustained_average_alone_suggests_increase() {
        let rec = recommender().recommend(&sql("S2"), &sample(85.0, 88.0, 168, 5000.0));
        assert_eq!(rec.action, DatabaseAction::IncreaseDtu);
        assert_eq!(rec.recommendation.recommended.as_deref(), Some("S3"));
        assert_eq!(rec.recommendation.confidence, Confidence::Medium);
    }

    #[test]
    fn test_large_standard_tiers_scale_down_within_edition() {
        let r = recommender();
        for (current, target) in [("S4", "S3"), ("S6", "S4"), ("S7", "S6")] {
            let rec = r.recommend(&sql(current), &sample(2.0, 5.0, 168, 0.0));
            assert_eq!(rec.action, DatabaseAction::ScaleDown);
            assert_eq!(rec.recommendation.recommended.as_deref(), Some(target));
            assert!(rec.recommendation.estimated_savings > 0.0);
        }
    }

    #[test]
    fn test_within_range() {
        let rec = recommender().recommend(&sql("S2"), &sample(45.0, 70.0, 168, 5000.0));
        assert_eq!(rec.action, DatabaseAction::None);
        assert_eq!(rec.recommendation.confidence, Confidence::High);
    }

    #[test]
    fn test_ru_bands() {
        let r = recommender();
        assert_eq!(
            r.recommend(&cosmos(), &sample(5.0, 20.0, 168, 0.0)).action,
            DatabaseAction::EnableAutoScale
        );
        assert_eq!(
            r.recommend(&cosmos(), &sample(85.0, 100.0, 168, 0.0)).action,
            DatabaseAction::IncreaseRu
        );
        assert_eq!(
            r.recommend(&cosmos(), &sample(40.0, 60.0, 168, 0.0)).action,
            DatabaseAction::None
        );
    }

    #[test]
    fn test_explicit_target() {
        let rec = recommender().explicit(&sql("S3"), "S1");
        assert_eq!(rec.action, DatabaseAction::SetServiceObjective);
        assert!((rec.recommendation.estimated_savings - 120.21).abs() < 1e-9);

        let rec = recommender().explicit(&cosmos(), "S1");
        assert_eq!(rec.action, DatabaseAction::None);
    }
}
