//! Uncertainty stamping.
//!
//! Confidence fuses a few evidence priors (size, source diversity,
//! coordination risk) with weighted log-odds. The interval is a normal
//! approximation around the decay score using the member weights.

use serde::{Deserialize, Serialize};

/// z for a two-sided 95% interval.
const Z_95: f64 = 1.96;

/// Qualitative label derived from confidence bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLabel {
    High,
    Moderate,
    Low,
    Insufficient,
}

impl QualityLabel {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.8 {
            QualityLabel::High
        } else if confidence >= 0.6 {
            QualityLabel::Moderate
        } else if confidence >= 0.4 {
            QualityLabel::Low
        } else {
            QualityLabel::Insufficient
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationRisk {
    Low,
    Medium,
    High,
}

impl CoordinationRisk {
    pub fn from_flag_count(flags: usize) -> Self {
        match flags {
            0 => CoordinationRisk::Low,
            1 => CoordinationRisk::Medium,
            _ => CoordinationRisk::High,
        }
    }

    /// Evidence prior contributed to the confidence fusion.
    fn prior(self) -> f64 {
        match self {
            CoordinationRisk::Low => 0.6,
            CoordinationRisk::Medium => 0.35,
            CoordinationRisk::High => 0.15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreInterval {
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Uncertainty {
    pub confidence: f64,
    pub interval: ScoreInterval,
    pub quality: QualityLabel,
    pub coordination_risk: CoordinationRisk,
    pub disclaimer: String,
}

fn logit(p: f64) -> f64 {
    let p = p.clamp(0.01, 0.99);
    (p / (1.0 - p)).ln()
}

/// Weighted log-odds sum of `(probability, weight)` evidence, mapped back
/// through the logistic. No evidence is neutral (0.5).
fn fuse_evidence<I>(evidence: I) -> f64
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let total: f64 = evidence.into_iter().map(|(p, w)| w * logit(p)).sum();
    (1.0 / (1.0 + (-total).exp())).min(0.999)
}

/// Confidence that a cluster reflects broad, organic attention.
pub fn evidence_confidence(size: usize, distinct_sources: usize, risk: CoordinationRisk) -> f64 {
    let size = size as f64;
    let sources = distinct_sources as f64;
    fuse_evidence([
        (size / (size + 3.0), 1.0),
        (sources / (sources + 1.0), 0.8),
        (risk.prior(), 1.0),
    ])
}

/// `score ± 1.96 · sqrt(Σ w²)`, low end clamped at zero.
pub fn score_interval<I>(score: f64, member_weights: I) -> ScoreInterval
where
    I: IntoIterator<Item = f64>,
{
    let variance: f64 = member_weights.into_iter().map(|w| w * w).sum();
    let half_width = Z_95 * variance.sqrt();
    ScoreInterval {
        low: (score - half_width).max(0.0),
        high: score + half_width,
    }
}
