//! Runbook configuration
//!
//! Thresholds, approval ceilings and lookup tables. Loaded from an optional
//! TOML file layered with `COSTOPT__`-prefixed environment variables; every
//! field falls back to the built-in defaults below.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::approval::ApprovalGate;
use crate::error::Result;
use crate::models::AccessTier;

/// Top-level optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Metrics lookback window in days
    pub lookback_days: u32,
    pub approval: ApprovalGate,
    pub compute: ComputeSettings,
    pub database: DatabaseSettings,
    pub storage: StorageSettings,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            lookback_days: 7,
            approval: ApprovalGate::default(),
            compute: ComputeSettings::default(),
            database: DatabaseSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl OptimizerConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("COSTOPT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: OptimizerConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject settings that would make the decision logic meaningless
    pub fn validate(&self) -> Result<()> {
        if self.lookback_days == 0 {
            return Err(config::ConfigError::Message("lookback_days must be positive".into()).into());
        }
        if self.approval.auto_approve_ceiling > self.approval.manual_approve_ceiling {
            return Err(config::ConfigError::Message(format!(
                "auto_approve_ceiling ({}) exceeds manual_approve_ceiling ({})",
                self.approval.auto_approve_ceiling, self.approval.manual_approve_ceiling
            ))
            .into());
        }
        if self.compute.max_poll_attempts == 0 {
            return Err(config::ConfigError::Message("max_poll_attempts must be positive".into()).into());
        }
        Ok(())
    }
}

/// VM size catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmSizeEntry {
    pub size: String,
    pub monthly_cost: f64,
    #[serde(default)]
    pub downgrade: Option<String>,
}

impl VmSizeEntry {
    fn new(size: &str, monthly_cost: f64, downgrade: Option<&str>) -> Self {
        Self {
            size: size.to_string(),
            monthly_cost,
            downgrade: downgrade.map(str::to_string),
        }
    }
}

/// VM right-sizing thresholds and size catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeSettings {
    pub underutilized_cpu_percent: f64,
    pub monitor_cpu_percent: f64,
    /// Hourly points required before an underutilization verdict is trusted
    pub min_samples: usize,
    pub poll_interval_secs: u64,
    pub max_poll_attempts: u32,
    pub sizes: Vec<VmSizeEntry>,
}

impl Default for ComputeSettings {
    fn default() -> Self {
        Self {
            underutilized_cpu_percent: 10.0,
            monitor_cpu_percent: 20.0,
            min_samples: 24,
            poll_interval_secs: 10,
            max_poll_attempts: 60,
            sizes: default_vm_sizes(),
        }
    }
}

fn default_vm_sizes() -> Vec<VmSizeEntry> {
    vec![
        VmSizeEntry::new("Standard_B1s", 8.76, None),
        VmSizeEntry::new("Standard_B1ms", 17.52, Some("Standard_B1s")),
        VmSizeEntry::new("Standard_B2s", 35.04, Some("Standard_B1ms")),
        VmSizeEntry::new("Standard_B2ms", 70.08, Some("Standard_B2s")),
        VmSizeEntry::new("Standard_B4ms", 140.16, Some("Standard_B2ms")),
        VmSizeEntry::new("Standard_D2s_v3", 85.68, Some("Standard_B2s")),
        VmSizeEntry::new("Standard_D4s_v3", 171.36, Some("Standard_D2s_v3")),
        VmSizeEntry::new("Standard_D8s_v3", 342.72, Some("Standard_D4s_v3")),
        VmSizeEntry::new("Standard_D16s_v3", 685.44, Some("Standard_D8s_v3")),
        VmSizeEntry::new("Standard_E2s_v3", 105.12, Some("Standard_D2s_v3")),
        VmSizeEntry::new("Standard_E4s_v3", 210.24, Some("Standard_E2s_v3")),
        VmSizeEntry::new("Standard_E8s_v3", 420.48, Some("Standard_E4s_v3")),
        VmSizeEntry::new("Standard_F2s_v2", 74.46, Some("Standard_B2s")),
        VmSizeEntry::new("Standard_F4s_v2", 148.92, Some("Standard_F2s_v2")),
        VmSizeEntry::new("Standard_F8s_v2", 297.84, Some("Standard_F4s_v2")),
    ]
}

/// DTU service objective catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DtuTierEntry {
    pub name: String,
    pub edition: String,
    pub dtu: u32,
    pub monthly_cost: f64,
}

impl DtuTierEntry {
    fn new(name: &str, edition: &str, dtu: u32, monthly_cost: f64) -> Self {
        Self {
            name: name.to_string(),
            edition: edition.to_string(),
            dtu,
            monthly_cost,
        }
    }
}

/// Database scaling thresholds and service objective catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub highly_underutilized_percent: f64,
    pub underutilized_percent: f64,
    pub min_samples_strict: usize,
    pub min_samples: usize,
    pub max_daily_connections: f64,
    pub scale_up_peak_percent: f64,
    pub scale_up_average_percent: f64,
    pub ru_underutilized_percent: f64,
    pub ru_overutilized_percent: f64,
    pub tiers: Vec<DtuTierEntry>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            highly_underutilized_percent: 10.0,
            underutilized_percent: 20.0,
            min_samples_strict: 48,
            min_samples: 24,
            max_daily_connections: 10.0,
            scale_up_peak_percent: 90.0,
            scale_up_average_percent: 80.0,
            ru_underutilized_percent: 10.0,
            ru_overutilized_percent: 80.0,
            tiers: default_dtu_tiers(),
        }
    }
}

fn default_dtu_tiers() -> Vec<DtuTierEntry> {
    vec![
        DtuTierEntry::new("Basic", "Basic", 5, 4.99),
        DtuTierEntry::new("S0", "Standard", 10, 15.03),
        DtuTierEntry::new("S1", "Standard", 20, 30.05),
        DtuTierEntry::new("S2", "Standard", 50, 75.13),
        DtuTierEntry::new("S3", "Standard", 100, 150.26),
        DtuTierEntry::new("S4", "Standard", 200, 300.52),
        DtuTierEntry::new("S6", "Standard", 400, 601.03),
        DtuTierEntry::new("S7", "Standard", 800, 1202.06),
        DtuTierEntry::new("P1", "Premium", 125, 465.36),
        DtuTierEntry::new("P2", "Premium", 250, 930.72),
        DtuTierEntry::new("P4", "Premium", 500, 1861.44),
    ]
}

/// Price per GB-month of an access tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierPriceEntry {
    pub tier: AccessTier,
    pub price_per_gb: f64,
}

/// Savings fraction of a tier transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTransitionEntry {
    pub from: AccessTier,
    pub to: AccessTier,
    pub savings_percent: f64,
}

/// Blob tiering thresholds and prices
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub cool_after_days: i64,
    pub archive_from_cool_after_days: i64,
    pub archive_from_hot_after_days: i64,
    pub tier_prices: Vec<TierPriceEntry>,
    pub transitions: Vec<TierTransitionEntry>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            cool_after_days: 30,
            archive_from_cool_after_days: 90,
            archive_from_hot_after_days: 180,
            tier_prices: vec![
                TierPriceEntry {
                    tier: AccessTier::Hot,
                    price_per_gb: 0.0184,
                },
                TierPriceEntry {
                    tier: AccessTier::Cool,
                    price_per_gb: 0.01,
                },
                TierPriceEntry {
                    tier: AccessTier::Archive,
                    price_per_gb: 0.00099,
                },
            ],
            transitions: vec![
                TierTransitionEntry {
                    from: AccessTier::Hot,
                    to: AccessTier::Cool,
                    savings_percent: 0.45,
                },
                TierTransitionEntry {
                    from: AccessTier::Hot,
                    to: AccessTier::Archive,
                    savings_percent: 0.95,
                },
                TierTransitionEntry {
                    from: AccessTier::Cool,
                    to: AccessTier::Archive,
                    savings_percent: 0.90,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = OptimizerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lookback_days, 7);
        assert_eq!(config.approval.auto_approve_ceiling, 100.0);
        assert_eq!(config.approval.manual_approve_ceiling, 500.0);
    }

    #[test]
    fn test_load_from_file_overrides_and_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
lookback_days = 14

[approval]
auto_approve_ceiling = 50.0
manual_approve_ceiling = 250.0

[[compute.sizes]]
size = "Standard_D2s_v3"
monthly_cost = 90.0
downgrade = "Standard_B2ms"
"#
        )
        .unwrap();

        let config = OptimizerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.lookback_days, 14);
        assert_eq!(config.approval.auto_approve_ceiling, 50.0);
        assert_eq!(config.compute.sizes.len(), 1);
        assert_eq!(config.compute.sizes[0].size, "Standard_D2s_v3");
        assert_eq!(config.compute.min_samples, 24);
        assert_eq!(config.storage.cool_after_days, 30);
    }

    #[test]
    fn test_inverted_ceilings_rejected() {
        let mut config = OptimizerConfig::default();
        config.approval = ApprovalGate::new(600.0, 500.0);
        assert!(config.validate().is_err());
    }
}
