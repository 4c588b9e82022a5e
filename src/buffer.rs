//! Safety buffer: four ordered gates every cluster must pass.
//!
//! A cluster either advances or is discarded for this run. The first failing
//! stage discards it and writes one `<stage>_failed` audit event; later
//! stages are not evaluated. Nothing is held over to the next run.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::audit::{AuditDetail, AuditTrail};
use crate::clustering::{Candidate, Cluster};
use crate::config::Thresholds;
use crate::error::AuditError;

/// Thresholds in force for one run: the configured base, optionally
/// perturbed by the governance layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveThresholds {
    pub min_delay_hours: f64,
    pub min_cluster_size: usize,
    pub min_sources: usize,
    pub min_volume_score: f64,
}

impl EffectiveThresholds {
    pub fn base(thresholds: &Thresholds) -> Self {
        Self {
            min_delay_hours: thresholds.min_delay_hours,
            min_cluster_size: thresholds.min_cluster_size,
            min_sources: thresholds.min_sources,
            min_volume_score: thresholds.min_volume_score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    TemporalDelay,
    ClusterSize,
    SourceDiversity,
    VolumeScore,
}

impl Stage {
    pub const ORDER: [Stage; 4] = [
        Stage::TemporalDelay,
        Stage::ClusterSize,
        Stage::SourceDiversity,
        Stage::VolumeScore,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::TemporalDelay => "temporal_delay",
            Stage::ClusterSize => "cluster_size",
            Stage::SourceDiversity => "source_diversity",
            Stage::VolumeScore => "volume_score",
        }
    }

    fn passes(&self, cluster: &Cluster, thresholds: &EffectiveThresholds, now: DateTime<Utc>) -> bool {
        match self {
            Stage::TemporalDelay => passes_temporal_delay(cluster, thresholds.min_delay_hours, now),
            Stage::ClusterSize => passes_cluster_size(cluster, thresholds.min_cluster_size),
            Stage::SourceDiversity => passes_source_diversity(cluster, thresholds.min_sources),
            Stage::VolumeScore => passes_volume_score(cluster, thresholds.min_volume_score),
        }
    }

    fn failure(&self, cluster_id: String) -> AuditDetail {
        match self {
            Stage::TemporalDelay => AuditDetail::TemporalDelayFailed { cluster_id },
            Stage::ClusterSize => AuditDetail::ClusterSizeFailed { cluster_id },
            Stage::SourceDiversity => AuditDetail::SourceDiversityFailed { cluster_id },
            Stage::VolumeScore => AuditDetail::VolumeScoreFailed { cluster_id },
        }
    }
}

/// Convert fractional hours to a chrono duration at millisecond precision.
pub(crate) fn hours(h: f64) -> Duration {
    Duration::milliseconds((h * 3_600_000.0).round() as i64)
}

/// The newest member must be at least `min_delay_hours` old.
pub fn passes_temporal_delay(cluster: &Cluster, min_delay_hours: f64, now: DateTime<Utc>) -> bool {
    cluster.latest_at <= now - hours(min_delay_hours)
}

pub fn passes_cluster_size(cluster: &Cluster, min_cluster_size: usize) -> bool {
    cluster.size >= min_cluster_size
}

pub fn passes_source_diversity(cluster: &Cluster, min_sources: usize) -> bool {
    cluster.distinct_source_types >= min_sources
}

pub fn passes_volume_score(cluster: &Cluster, min_volume_score: f64) -> bool {
    cluster.decay_score.is_finite() && cluster.decay_score >= min_volume_score
}

/// First failing stage, or `None` when the cluster clears every gate.
pub fn first_failure(
    cluster: &Cluster,
    thresholds: &EffectiveThresholds,
    now: DateTime<Utc>,
) -> Option<Stage> {
    Stage::ORDER
        .into_iter()
        .find(|stage| !stage.passes(cluster, thresholds, now))
}

#[derive(Debug, Clone)]
pub struct SafetyBuffer {
    thresholds: EffectiveThresholds,
}

impl SafetyBuffer {
    pub fn new(thresholds: EffectiveThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &EffectiveThresholds {
        &self.thresholds
    }

    /// Keep candidates that clear every stage; audit each discard.
    pub fn filter(
        &self,
        candidates: Vec<Candidate>,
        now: DateTime<Utc>,
        audit: &mut AuditTrail<'_>,
    ) -> Result<Vec<Candidate>, AuditError> {
        let mut passed = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match first_failure(&candidate.cluster, &self.thresholds, now) {
                None => passed.push(candidate),
                Some(stage) => {
                    log::debug!(
                        "Cluster {} discarded at {}",
                        candidate.cluster.cluster_id,
                        stage.name()
                    );
                    audit.emit(stage.failure(candidate.cluster.cluster_id.clone()))?;
                }
            }
        }
        Ok(passed)
    }
}
