//! Blob access-tier recommendation
//!
//! Blobs are classified one by one on days since last access:
//! Hot -> Archive past the hot-archive threshold, Hot -> Cool past the cool
//! threshold, Cool -> Archive past the cool-archive threshold.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StorageSettings;
use crate::models::{AccessTier, BlobItem, Confidence, Recommendation};
use crate::tables::TierTable;

/// A single blob tier change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobMove {
    pub blob: BlobItem,
    pub target: AccessTier,
    pub days_idle: Option<i64>,
    pub estimated_savings: f64,
}

/// Tier changes planned for one storage account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieringPlan {
    pub account: String,
    pub blobs_scanned: usize,
    pub moves: Vec<BlobMove>,
}

impl TieringPlan {
    pub fn total_savings(&self) -> f64 {
        self.moves.iter().map(|m| m.estimated_savings).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Account-level recommendation summarizing the plan
    pub fn recommendation(&self) -> Recommendation {
        let current = format!("{} blobs", self.blobs_scanned);
        if self.moves.is_empty() {
            return Recommendation::keep(
                current,
                "No blobs eligible for a cheaper access tier",
                Confidence::High,
            );
        }

        let to_cool = self.moves.iter().filter(|m| m.target == AccessTier::Cool).count();
        let to_archive = self
            .moves
            .iter()
            .filter(|m| m.target == AccessTier::Archive)
            .count();
        let to_hot = self.moves.len() - to_cool - to_archive;

        let mut parts = Vec::new();
        if to_cool > 0 {
            parts.push(format!("{} to Cool", to_cool));
        }
        if to_archive > 0 {
            parts.push(format!("{} to Archive", to_archive));
        }
        if to_hot > 0 {
            parts.push(format!("{} to Hot", to_hot));
        }

        Recommendation {
            current,
            recommended: Some(format!("{} blobs re-tiered", self.moves.len())),
            reason: parts.join(", "),
            estimated_savings: self.total_savings(),
            confidence: Confidence::High,
            should_optimize: true,
        }
    }
}

/// Age thresholds and prices for blob tiering
#[derive(Debug, Clone)]
pub struct TieringPolicy {
    tiers: TierTable,
    cool_after_days: i64,
    archive_from_cool_after_days: i64,
    archive_from_hot_after_days: i64,
}

impl TieringPolicy {
    pub fn new(settings: &StorageSettings) -> Self {
        Self {
            tiers: TierTable::from(settings),
            cool_after_days: settings.cool_after_days,
            archive_from_cool_after_days: settings.archive_from_cool_after_days,
            archive_from_hot_after_days: settings.archive_from_hot_after_days,
        }
    }

    /// Cheaper tier for a blob, if its idle time warrants one
    pub fn classify(&self, blob: &BlobItem, now: DateTime<Utc>) -> Option<AccessTier> {
        let days = blob.days_since_access(now)?;
        match blob.tier {
            AccessTier::Hot if days >= self.archive_from_hot_after_days => Some(AccessTier::Archive),
            AccessTier::Hot if days >= self.cool_after_days => Some(AccessTier::Cool),
            AccessTier::Cool if days >= self.archive_from_cool_after_days => {
                Some(AccessTier::Archive)
            }
            _ => None,
        }
    }

    /// Monthly savings of moving a blob to `target`
    pub fn savings(&self, blob: &BlobItem, target: AccessTier) -> f64 {
        let current_price = self.tiers.price_per_gb(blob.tier);
        match self.tiers.savings_percent(blob.tier, target) {
            Some(percent) => blob.size_gb() * current_price * percent,
            None => blob.size_gb() * (current_price - self.tiers.price_per_gb(target)),
        }
    }

    /// Plan tier changes for the blobs of one account
    pub fn plan(&self, account: &str, blobs: &[BlobItem], now: DateTime<Utc>) -> TieringPlan {
        let moves = blobs
            .iter()
            .filter_map(|blob| {
                self.classify(blob, now).map(|target| BlobMove {
                    blob: blob.clone(),
                    target,
                    days_idle: blob.days_since_access(now),
                    estimated_savings: self.savings(blob, target),
                })
            })
            .collect();

        TieringPlan {
            account: account.to_string(),
            blobs_scanned: blobs.len(),
            moves,
        }
    }

    /// Plan moving every blob not already in `target`
    pub fn plan_explicit(
        &self,
        account: &str,
        blobs: &[BlobItem],
        target: AccessTier,
        now: DateTime<Utc>,
    ) -> TieringPlan {
        let moves = blobs
            .iter()
            .filter(|blob| blob.tier != target)
            .map(|blob| BlobMove {
                blob: blob.clone(),
                target,
                days_idle: blob.days_since_access(now),
                estimated_savings: self.savings(blob, target),
            })
            .collect();

        TieringPlan {
            account: account.to_string(),
            blobs_scanned: blobs.len(),
            moves,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn blob(name: &str, tier: AccessTier, idle_days: Option<i64>, now: DateTime<Utc>) -> BlobItem {
        BlobItem {
            container: "data".into(),
            name: name.into(),
            size_bytes: 100 * GIB,
            tier,
            last_accessed: idle_days.map(|d| now - Duration::days(d)),
            last_modified: None,
        }
    }

    fn policy() -> TieringPolicy {
        TieringPolicy::new(&StorageSettings::default())
    }

    #[test]
    fn test_classification_ladder() {
        let now = Utc::now();
        let p = policy();

        assert_eq!(p.classify(&blob("a", AccessTier::Hot, Some(10), now), now), None);
        assert_eq!(
            p.classify(&blob("b", AccessTier::Hot, Some(30), now), now),
            Some(AccessTier::Cool)
        );
        assert_eq!(
            p.classify(&blob("c", AccessTier::Hot, Some(200), now), now),
            Some(AccessTier::Archive)
        );
        assert_eq!(p.classify(&blob("d", AccessTier::Cool, Some(60), now), now), None);
        assert_eq!(
            p.classify(&blob("e", AccessTier::Cool, Some(90), now), now),
            Some(AccessTier::Archive)
        );
        assert_eq!(p.classify(&blob("f", AccessTier::Archive, Some(900), now), now), None);
        assert_eq!(p.classify(&blob("g", AccessTier::Hot, None, now), now), None);
    }

    #[test]
    fn test_savings_uses_size_price_and_percentage() {
        let now = Utc::now();
        let b = blob("a", AccessTier::Hot, Some(45), now);
        // 100 GB * 0.0184 * 0.45
        assert!((policy().savings(&b, AccessTier::Cool) - 0.828).abs() < 1e-9);
    }

    #[test]
    fn test_plan_aggregates_moves() {
        let now = Utc::now();
        let blobs = vec![
            blob("fresh", AccessTier::Hot, Some(1), now),
            blob("stale", AccessTier::Hot, Some(40), now),
            blob("ancient", AccessTier::Hot, Some(365), now),
            blob("cold", AccessTier::Cool, Some(120), now),
        ];

        let plan = policy().plan("sa1", &blobs, now);
        assert_eq!(plan.blobs_scanned, 4);
        assert_eq!(plan.moves.len(), 3);

        let rec = plan.recommendation();
        assert!(rec.should_optimize);
        assert_eq!(rec.reason, "1 to Cool, 2 to Archive");
        assert!((rec.estimated_savings - plan.total_savings()).abs() < 1e-12);
    }

    #[test]
    fn test_empty_plan_keeps_account() {
        let now = Utc::now();
        let plan = policy().plan("sa1", &[blob("fresh", AccessTier::Hot, Some(1), now)], now);
        assert!(plan.is_empty());
        assert!(!plan.recommendation().should_optimize);
    }

    #[test]
    fn test_explicit_plan_skips_blobs_already_in_target() {
        let now = Utc::now();
        let blobs = vec![
            blob("a", AccessTier::Hot, Some(1), now),
            blob("b", AccessTier::Cool, Some(1), now),
        ];
        let plan = policy().plan_explicit("sa1", &blobs, AccessTier::Cool, now);
        assert_eq!(plan.moves.len(), 1);
        assert_eq!(plan.moves[0].blob.name, "a");
    }
}
