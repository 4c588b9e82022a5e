//! Governance layer: daily threshold perturbation, coordination flags and
//! uncertainty stamping.

pub mod coordination;
pub mod perturbation;
pub mod uncertainty;

use chrono::{DateTime, NaiveDate, Utc};

use crate::audit::{AuditDetail, AuditTrail};
use crate::buffer::EffectiveThresholds;
use crate::clustering::Candidate;
use crate::config::{CoordinationConfig, PerturbationConfig, PipelineConfig, Thresholds};
use crate::error::AuditError;
use crate::signals::decay::DecayScorer;
use crate::signals::Signal;

pub use coordination::{CoordinationFlag, CoordinationReport};
pub use uncertainty::{CoordinationRisk, QualityLabel, ScoreInterval, Uncertainty};

#[derive(Debug, Clone)]
pub struct GovernanceLayer {
    thresholds: Thresholds,
    perturbation: PerturbationConfig,
    coordination: CoordinationConfig,
    disclaimer: String,
    scorer: DecayScorer,
}

impl GovernanceLayer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            thresholds: config.thresholds.clone(),
            perturbation: config.governance.perturbation.clone(),
            coordination: config.governance.coordination.clone(),
            disclaimer: config.governance.disclaimer.clone(),
            scorer: DecayScorer::new(&config.thresholds),
        }
    }

    /// Safety-buffer thresholds for the run's calendar date.
    pub fn effective_thresholds(&self, date: NaiveDate) -> EffectiveThresholds {
        perturbation::effective_thresholds(&self.thresholds, &self.perturbation, date)
    }

    /// Stamp every surviving candidate with uncertainty metadata and audit
    /// each raised coordination flag. Flagged clusters are never dropped.
    pub fn annotate(
        &self,
        candidates: &mut [Candidate],
        signals: &[Signal],
        now: DateTime<Utc>,
        audit: &mut AuditTrail<'_>,
    ) -> Result<(), AuditError> {
        for candidate in candidates.iter_mut() {
            let report = coordination::assess(candidate.member_signals(signals), &self.coordination);
            for (flag, score) in &report.flags {
                audit.emit(AuditDetail::CoordinationFlagged {
                    cluster_id: candidate.cluster.cluster_id.clone(),
                    flag: *flag,
                    score: *score,
                })?;
            }

            let weights: Vec<f64> = candidate
                .member_signals(signals)
                .map(|s| self.scorer.weight(s.occurred_at(), now))
                .collect();
            let uncertainty = self.stamp(candidate, &report, weights);
            candidate.cluster.uncertainty = Some(uncertainty);
        }
        Ok(())
    }

    fn stamp(&self, candidate: &Candidate, report: &CoordinationReport, weights: Vec<f64>) -> Uncertainty {
        let cluster = &candidate.cluster;
        let risk = report.risk();
        let confidence =
            uncertainty::evidence_confidence(cluster.size, cluster.distinct_source_types, risk);

        Uncertainty {
            confidence,
            interval: uncertainty::score_interval(cluster.decay_score, weights),
            quality: QualityLabel::from_confidence(confidence),
            coordination_risk: risk,
            disclaimer: self.disclaimer.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::clustering::Cluster;
    use crate::config::tests::test_config;
    use crate::signals::SourceType;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap()
    }

    fn candidate(signals: &[Signal]) -> Candidate {
        let cluster = Cluster {
            cluster_id: "cl-test".to_string(),
            size: signals.len(),
            representative_text: "x".to_string(),
            earliest_at: now() - Duration::hours(60),
            latest_at: now() - Duration::hours(30),
            primary_region: "941".to_string(),
            distinct_source_types: 1,
            decay_score: 4.0,
            uncertainty: None,
        };
        Candidate::new(cluster, (0..signals.len()).collect())
    }

    #[test]
    fn test_annotate_stamps_and_flags() {
        let signals: Vec<Signal> = (0..6)
            .map(|_| {
                Signal::new("x", "941", SourceType::new("news"), now() - Duration::hours(30))
            })
            .collect();
        let mut candidates = vec![candidate(&signals)];
        let layer = GovernanceLayer::new(&test_config());

        let mut sink = MemoryAuditSink::new();
        {
            let mut trail = AuditTrail::new("run", &mut sink);
            layer
                .annotate(&mut candidates, &signals, now(), &mut trail)
                .unwrap();
        }

        assert_eq!(candidates.len(), 1, "flagged clusters must not be dropped");
        let u = candidates[0].cluster.uncertainty.as_ref().expect("stamped");
        assert_eq!(u.coordination_risk, CoordinationRisk::High);
        assert!((0.0..=1.0).contains(&u.confidence));
        assert!(u.interval.low <= 4.0 && u.interval.high >= 4.0);
        assert!(!u.disclaimer.is_empty());
        assert_eq!(sink.count("coordination_flagged"), 2);
    }

    #[test]
    fn test_effective_thresholds_default_is_base() {
        let config = test_config();
        let layer = GovernanceLayer::new(&config);
        let date = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        assert_eq!(
            layer.effective_thresholds(date),
            EffectiveThresholds::base(&config.thresholds)
        );
    }
}
