//! Coordination heuristics: abnormal timing uniformity and single-channel
//! dominance. Flags annotate a cluster; they never suppress it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::uncertainty::CoordinationRisk;
use crate::config::CoordinationConfig;
use crate::signals::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationFlag {
    TimingUniformity,
    SourceDominance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinationReport {
    /// `None` when the cluster is below `minSignalsForTiming`.
    pub timing_score: Option<f64>,
    pub source_dominance: f64,
    pub flags: Vec<(CoordinationFlag, f64)>,
}

impl CoordinationReport {
    pub fn risk(&self) -> CoordinationRisk {
        CoordinationRisk::from_flag_count(self.flags.len())
    }
}

/// Largest fraction of members falling inside any window of width
/// `window_fraction × span`. A zero span with two or more members is
/// perfectly uniform.
pub fn timing_score(times: &[DateTime<Utc>], window_fraction: f64) -> f64 {
    if times.len() < 2 {
        return 0.0;
    }

    let mut millis: Vec<i64> = times.iter().map(|t| t.timestamp_millis()).collect();
    millis.sort_unstable();

    let span = millis[millis.len() - 1] - millis[0];
    if span == 0 {
        return 1.0;
    }
    let width = window_fraction * span as f64;

    let mut best = 0;
    let mut start = 0;
    for end in 0..millis.len() {
        while (millis[end] - millis[start]) as f64 > width {
            start += 1;
        }
        best = best.max(end - start + 1);
    }
    best as f64 / millis.len() as f64
}

/// Share of members from the most common source type.
pub fn source_dominance<'a, I>(source_types: I) -> f64
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut total = 0;
    for st in source_types {
        *counts.entry(st).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }
    let top = counts.values().copied().max().unwrap_or(0);
    top as f64 / total as f64
}

pub fn assess<'a, I>(members: I, config: &CoordinationConfig) -> CoordinationReport
where
    I: IntoIterator<Item = &'a Signal>,
{
    let members: Vec<&Signal> = members.into_iter().collect();
    let mut flags = Vec::new();

    let timing = if members.len() >= config.min_signals_for_timing {
        let times: Vec<DateTime<Utc>> = members.iter().map(|s| s.occurred_at()).collect();
        let score = timing_score(&times, config.timing_window_fraction);
        if score > config.timing_threshold {
            flags.push((CoordinationFlag::TimingUniformity, score));
        }
        Some(score)
    } else {
        None
    };

    let dominance = source_dominance(members.iter().map(|s| s.source_type().as_str()));
    if dominance > config.source_dominance_threshold {
        flags.push((CoordinationFlag::SourceDominance, dominance));
    }

    CoordinationReport {
        timing_score: timing,
        source_dominance: dominance,
        flags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::SourceType;
    use chrono::{Duration, TimeZone};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 10, 0, 0, 0).unwrap()
    }

    fn signal(source: &str, minutes: i64) -> Signal {
        Signal::new("x", "941", SourceType::new(source), base() + Duration::minutes(minutes))
    }

    #[test]
    fn test_evenly_spread_timing_is_low() {
        let times: Vec<_> = (0..10).map(|i| base() + Duration::hours(i * 10)).collect();
        let score = timing_score(&times, 0.1);
        assert!((score - 0.1).abs() < 1e-9, "expected 0.1, got {}", score);
    }

    #[test]
    fn test_burst_timing_is_high() {
        let mut times: Vec<_> = (0..9).map(|i| base() + Duration::seconds(i)).collect();
        times.push(base() + Duration::days(3));
        let score = timing_score(&times, 0.1);
        assert!((score - 0.9).abs() < 1e-9, "expected 0.9, got {}", score);
    }

    #[test]
    fn test_zero_span_is_fully_uniform() {
        let times = vec![base(); 4];
        assert_eq!(timing_score(&times, 0.1), 1.0);
        assert_eq!(timing_score(&times[..1], 0.1), 0.0);
    }

    #[test]
    fn test_source_dominance() {
        assert_eq!(source_dominance(["news", "news", "news", "community"]), 0.75);
        assert_eq!(source_dominance(Vec::<&str>::new()), 0.0);
    }

    #[test]
    fn test_timing_skipped_for_small_clusters() {
        let members = vec![signal("news", 0), signal("community", 0), signal("government", 0)];
        let report = assess(&members, &CoordinationConfig::default());
        assert_eq!(report.timing_score, None);
        assert!(report.flags.is_empty());
        assert_eq!(report.risk(), CoordinationRisk::Low);
    }

    #[test]
    fn test_both_flags_give_high_risk() {
        let members: Vec<Signal> = (0..6).map(|_| signal("news", 0)).collect();
        let report = assess(&members, &CoordinationConfig::default());
        assert_eq!(report.flags.len(), 2, "got {:?}", report.flags);
        assert_eq!(report.risk(), CoordinationRisk::High);
    }

    #[test]
    fn test_single_flag_gives_medium_risk() {
        let members: Vec<Signal> = (0..6)
            .map(|i| signal("news", i * 600))
            .chain(std::iter::once(signal("community", 3000)))
            .collect();
        let report = assess(&members, &CoordinationConfig::default());
        assert_eq!(report.flags, vec![(CoordinationFlag::SourceDominance, 6.0 / 7.0)]);
        assert_eq!(report.risk(), CoordinationRisk::Medium);
    }
}
