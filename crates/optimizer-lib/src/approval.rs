//! Savings-based approval gate
//!
//! Optimizations below the auto-approval ceiling proceed unattended, those
//! between the two ceilings need an explicit force flag, and anything at or
//! above the manual ceiling is always left for out-of-band review.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default auto-approval ceiling in USD per month
pub const DEFAULT_AUTO_APPROVE_CEILING: f64 = 100.0;

/// Default manual-approval ceiling in USD per month
pub const DEFAULT_MANUAL_APPROVE_CEILING: f64 = 500.0;

/// Outcome of the approval gate for one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    AutoApproved,
    /// In the manual band, approved because the run was forced
    ForceApproved,
    PendingManualReview,
    /// At or above the manual ceiling
    Rejected,
}

impl ApprovalDecision {
    pub fn is_approved(&self) -> bool {
        matches!(
            self,
            ApprovalDecision::AutoApproved | ApprovalDecision::ForceApproved
        )
    }
}

impl fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalDecision::AutoApproved => write!(f, "auto-approved"),
            ApprovalDecision::ForceApproved => write!(f, "approved by force flag"),
            ApprovalDecision::PendingManualReview => write!(f, "pending manual approval"),
            ApprovalDecision::Rejected => write!(f, "exceeds manual approval ceiling"),
        }
    }
}

/// Approval thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalGate {
    pub auto_approve_ceiling: f64,
    pub manual_approve_ceiling: f64,
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self {
            auto_approve_ceiling: DEFAULT_AUTO_APPROVE_CEILING,
            manual_approve_ceiling: DEFAULT_MANUAL_APPROVE_CEILING,
        }
    }
}

impl ApprovalGate {
    pub fn new(auto_approve_ceiling: f64, manual_approve_ceiling: f64) -> Self {
        Self {
            auto_approve_ceiling,
            manual_approve_ceiling,
        }
    }

    /// Classify an estimated monthly saving
    pub fn evaluate(&self, savings: f64, force: bool) -> ApprovalDecision {
        if savings < self.auto_approve_ceiling {
            ApprovalDecision::AutoApproved
        } else if savings < self.manual_approve_ceiling {
            if force {
                ApprovalDecision::ForceApproved
            } else {
                ApprovalDecision::PendingManualReview
            }
        } else {
            ApprovalDecision::Rejected
        }
    }
}

/// Boolean form of the gate
pub fn approve(savings: f64, auto_ceiling: f64, manual_ceiling: f64, force: bool) -> bool {
    ApprovalGate::new(auto_ceiling, manual_ceiling)
        .evaluate(savings, force)
        .is_approved()
}
