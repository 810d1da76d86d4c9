//! Confidence tiering.
//!
//! Every result view buckets a numeric confidence into one of four tiers
//! using the same breakpoints, so a "High" plant and a "High" coin grade
//! mean the same thing. Verticals may relabel or recolor a tier through a
//! [`TierPalette`] but cannot move the breakpoints.
//!
//! | Score (0–100) | Tier |
//! |---------------|------|
//! | `>= 90` | [`ConfidenceTier::High`] |
//! | `75 ..< 90` | [`ConfidenceTier::Good`] |
//! | `50 ..< 75` | [`ConfidenceTier::Medium`] |
//! | `< 50` | [`ConfidenceTier::Low`] |
//!
//! Tiers are never stored; they are recomputed from the raw score.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::IdentificationResult;

pub const HIGH_THRESHOLD: f64 = 90.0;
pub const GOOD_THRESHOLD: f64 = 75.0;
pub const MEDIUM_THRESHOLD: f64 = 50.0;

/// Qualitative confidence bucket. Ordered from least to most desirable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    Low,
    Medium,
    Good,
    High,
}

impl ConfidenceTier {
    pub const ALL: [ConfidenceTier; 4] = [
        ConfidenceTier::High,
        ConfidenceTier::Good,
        ConfidenceTier::Medium,
        ConfidenceTier::Low,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceTier::High => "high",
            ConfidenceTier::Good => "good",
            ConfidenceTier::Medium => "medium",
            ConfidenceTier::Low => "low",
        }
    }

    pub fn default_label(self) -> &'static str {
        match self {
            ConfidenceTier::High => "High confidence",
            ConfidenceTier::Good => "Good match",
            ConfidenceTier::Medium => "Possible match",
            ConfidenceTier::Low => "Low confidence",
        }
    }

    pub fn default_color(self) -> &'static str {
        match self {
            ConfidenceTier::High => "#16a34a",
            ConfidenceTier::Good => "#65a30d",
            ConfidenceTier::Medium => "#d97706",
            ConfidenceTier::Low => "#dc2626",
        }
    }
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Native scale of a vertical's confidence values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceScale {
    /// `0.0 ..= 1.0`
    Unit,
    /// `0 ..= 100`
    #[default]
    Percent,
}

impl ConfidenceScale {
    pub fn max(self) -> f64 {
        match self {
            ConfidenceScale::Unit => 1.0,
            ConfidenceScale::Percent => 100.0,
        }
    }

    /// Whether `score` is a finite value inside this scale.
    pub fn contains(self, score: f64) -> bool {
        score.is_finite() && (0.0..=self.max()).contains(&score)
    }

    /// Convert to the canonical 0–100 scale without clamping.
    pub fn to_percent(self, score: f64) -> f64 {
        match self {
            ConfidenceScale::Unit => score * 100.0,
            ConfidenceScale::Percent => score,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceScale::Unit => "unit",
            ConfidenceScale::Percent => "percent",
        }
    }
}

impl fmt::Display for ConfidenceScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfidenceScale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unit" => Ok(ConfidenceScale::Unit),
            "percent" => Ok(ConfidenceScale::Percent),
            other => Err(format!("unknown confidence scale '{}': expected unit or percent", other)),
        }
    }
}

/// Normalize `score` to 0–100, clamping out-of-range values. NaN maps to 0.
pub fn normalize(score: f64, scale: ConfidenceScale) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    scale.to_percent(score).clamp(0.0, 100.0)
}

/// Bucket a confidence score. Total over all `f64` inputs.
pub fn tier(score: f64, scale: ConfidenceScale) -> ConfidenceTier {
    let s = normalize(score, scale);
    if s >= HIGH_THRESHOLD {
        ConfidenceTier::High
    } else if s >= GOOD_THRESHOLD {
        ConfidenceTier::Good
    } else if s >= MEDIUM_THRESHOLD {
        ConfidenceTier::Medium
    } else {
        ConfidenceTier::Low
    }
}

/// Per-tier copy override. Unset fields fall back to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierCopy {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// A vertical's display copy for the four tiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierPalette {
    #[serde(default)]
    pub high: TierCopy,
    #[serde(default)]
    pub good: TierCopy,
    #[serde(default)]
    pub medium: TierCopy,
    #[serde(default)]
    pub low: TierCopy,
}

impl TierPalette {
    fn copy(&self, tier: ConfidenceTier) -> &TierCopy {
        match tier {
            ConfidenceTier::High => &self.high,
            ConfidenceTier::Good => &self.good,
            ConfidenceTier::Medium => &self.medium,
            ConfidenceTier::Low => &self.low,
        }
    }

    pub fn display(&self, tier: ConfidenceTier) -> TierDisplay {
        let copy = self.copy(tier);
        TierDisplay {
            tier,
            label: copy
                .label
                .clone()
                .unwrap_or_else(|| tier.default_label().to_string()),
            color: copy
                .color
                .clone()
                .unwrap_or_else(|| tier.default_color().to_string()),
        }
    }

    /// Pair a result with its tier display, the shape presenters consume.
    pub fn present(&self, result: IdentificationResult) -> PresentedResult {
        let tier = self.display(result.tier());
        PresentedResult { result, tier }
    }
}

/// Resolved tier copy for one result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierDisplay {
    pub tier: ConfidenceTier,
    pub label: String,
    pub color: String,
}

/// A normalized result plus its tier. Presenters never see an untiered score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresentedResult {
    pub result: IdentificationResult,
    pub tier: TierDisplay,
}
