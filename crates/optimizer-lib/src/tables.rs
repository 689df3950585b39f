//! Read-only lookup tables used by the recommendation engines
//!
//! Tables are built once from [`crate::config::OptimizerConfig`] and handed to
//! the runbooks. Lookups are case-insensitive on the configuration identifier,
//! values keep the casing they were configured with.

use std::collections::HashMap;

use crate::config::{ComputeSettings, DatabaseSettings, StorageSettings};
use crate::models::AccessTier;

/// Current VM size -> recommended downgrade size
#[derive(Debug, Clone, Default)]
pub struct SizeMapping {
    entries: HashMap<String, String>,
}

impl SizeMapping {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
                .collect(),
        }
    }

    pub fn downgrade(&self, size: &str) -> Option<&str> {
        self.entries
            .get(&size.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Configuration identifier -> flat monthly cost in USD
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    entries: HashMap<String, f64>,
}

impl PriceTable {
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: AsRef<str>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v))
                .collect(),
        }
    }

    pub fn monthly_cost(&self, config: &str) -> Option<f64> {
        self.entries.get(&config.to_ascii_lowercase()).copied()
    }

    /// Price difference between two configurations, zero when either is unknown
    pub fn savings(&self, current: &str, target: &str) -> f64 {
        match (self.monthly_cost(current), self.monthly_cost(target)) {
            (Some(c), Some(t)) => c - t,
            _ => 0.0,
        }
    }
}

/// Size mapping and prices for the VM runbook
#[derive(Debug, Clone, Default)]
pub struct ComputeTables {
    pub sizes: SizeMapping,
    pub prices: PriceTable,
}

impl From<&ComputeSettings> for ComputeTables {
    fn from(settings: &ComputeSettings) -> Self {
        Self {
            sizes: SizeMapping::from_pairs(
                settings
                    .sizes
                    .iter()
                    .filter_map(|e| e.downgrade.as_ref().map(|d| (e.size.as_str(), d.clone()))),
            ),
            prices: PriceTable::from_pairs(
                settings.sizes.iter().map(|e| (e.size.as_str(), e.monthly_cost)),
            ),
        }
    }
}

/// Service objective with its DTU capacity and price
#[derive(Debug, Clone, PartialEq)]
pub struct DtuTier {
    pub name: String,
    pub edition: String,
    pub dtu: u32,
    pub monthly_cost: f64,
}

/// Service objective price table for DTU databases
#[derive(Debug, Clone, Default)]
pub struct DtuTable {
    tiers: Vec<DtuTier>,
}

impl DtuTable {
    pub fn new(tiers: Vec<DtuTier>) -> Self {
        Self { tiers }
    }

    pub fn get(&self, name: &str) -> Option<&DtuTier> {
        self.tiers.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Largest cheaper tier of the same edition with less DTU capacity than `current`
    pub fn next_lower(&self, current: &DtuTier) -> Option<&DtuTier> {
        self.tiers
            .iter()
            .filter(|t| t.edition.eq_ignore_ascii_case(&current.edition))
            .filter(|t| t.dtu < current.dtu && t.monthly_cost < current.monthly_cost)
            .max_by_key(|t| t.dtu)
    }

    /// Smallest tier of the same edition with more DTU capacity than `current`
    pub fn next_higher(&self, current: &DtuTier) -> Option<&DtuTier> {
        self.tiers
            .iter()
            .filter(|t| t.edition.eq_ignore_ascii_case(&current.edition))
            .filter(|t| t.dtu > current.dtu)
            .min_by_key(|t| t.dtu)
    }

    /// Price difference between two service objectives, zero when either is unknown
    pub fn savings(&self, current: &str, target: &str) -> f64 {
        match (self.get(current), self.get(target)) {
            (Some(c), Some(t)) => c.monthly_cost - t.monthly_cost,
            _ => 0.0,
        }
    }
}

impl From<&DatabaseSettings> for DtuTable {
    fn from(settings: &DatabaseSettings) -> Self {
        Self::new(
            settings
                .tiers
                .iter()
                .map(|e| DtuTier {
                    name: e.name.clone(),
                    edition: e.edition.clone(),
                    dtu: e.dtu,
                    monthly_cost: e.monthly_cost,
                })
                .collect(),
        )
    }
}

/// Per-GB tier prices and per-transition savings percentages
#[derive(Debug, Clone, Default)]
pub struct TierTable {
    prices: HashMap<AccessTier, f64>,
    savings: HashMap<(AccessTier, AccessTier), f64>,
}

impl TierTable {
    pub fn new(
        prices: impl IntoIterator<Item = (AccessTier, f64)>,
        savings: impl IntoIterator<Item = ((AccessTier, AccessTier), f64)>,
    ) -> Self {
        Self {
            prices: prices.into_iter().collect(),
            savings: savings.into_iter().collect(),
        }
    }

    /// Price per GB-month for a tier
    pub fn price_per_gb(&self, tier: AccessTier) -> f64 {
        self.prices.get(&tier).copied().unwrap_or(0.0)
    }

    /// Fraction of the current tier's cost saved by moving `from` -> `to`
    pub fn savings_percent(&self, from: AccessTier, to: AccessTier) -> Option<f64> {
        self.savings.get(&(from, to)).copied()
    }
}

impl From<&StorageSettings> for TierTable {
    fn from(settings: &StorageSettings) -> Self {
        Self::new(
            settings.tier_prices.iter().map(|p| (p.tier, p.price_per_gb)),
            settings
                .transitions
                .iter()
                .map(|t| ((t.from, t.to), t.savings_percent)),
        )
    }
}
