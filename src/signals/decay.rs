//! Temporal decay for cluster significance (pure math).

use chrono::{DateTime, Utc};

use super::Signal;
use crate::clustering::Candidate;
use crate::config::Thresholds;

/// Compute the decayed weight of a signal using exponential half-life decay.
///
/// `base * 2^(-age_hours / half_life_hours)`, which equals
/// `base * exp(-ln 2 * age_hours / half_life_hours)`.
pub fn decayed_weight(base_weight: f64, age_hours: f64, half_life_hours: f64) -> f64 {
    if half_life_hours <= 0.0 || age_hours < 0.0 {
        return base_weight;
    }
    base_weight * (2.0_f64).powf(-age_hours / half_life_hours)
}

/// Fractional hours between `occurred_at` and `now`, clamped at zero for
/// future-dated signals.
pub fn age_hours(occurred_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let millis = (now - occurred_at).num_milliseconds() as f64;
    (millis / 3_600_000.0).max(0.0)
}

/// Recency-weighted cluster scoring.
#[derive(Debug, Clone, Copy)]
pub struct DecayScorer {
    half_life_hours: f64,
}

impl DecayScorer {
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            half_life_hours: thresholds.half_life_hours,
        }
    }

    pub fn half_life_hours(&self) -> f64 {
        self.half_life_hours
    }

    /// Weight of a single member signal.
    pub fn weight(&self, occurred_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        decayed_weight(1.0, age_hours(occurred_at, now), self.half_life_hours)
    }

    /// Sum of member weights. Always finite and >= 0.
    pub fn score_members<'a, I>(&self, members: I, now: DateTime<Utc>) -> f64
    where
        I: IntoIterator<Item = &'a Signal>,
    {
        members
            .into_iter()
            .map(|s| self.weight(s.occurred_at(), now))
            .sum()
    }

    /// Score one candidate cluster against the run's signal batch.
    pub fn score(&self, candidate: &Candidate, signals: &[Signal], now: DateTime<Utc>) -> f64 {
        self.score_members(candidate.member_signals(signals), now)
    }

    /// Attach scores to every candidate in place.
    pub fn apply(&self, candidates: &mut [Candidate], signals: &[Signal], now: DateTime<Utc>) {
        for candidate in candidates.iter_mut() {
            candidate.cluster.decay_score = self.score(candidate, signals, now);
        }
    }
}
