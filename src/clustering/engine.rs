//! Signals + vectors → candidate topic clusters.

use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};

use super::hdbscan::{cluster_labels, HdbscanParams};
use super::{Candidate, Cluster};
use crate::config::PipelineConfig;
use crate::embeddings::euclidean_distance;
use crate::error::{ClusterInputError, ConfigurationError};
use crate::signals::Signal;

/// Output of one clustering pass. Noise signals are counted, never kept.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusteredBatch {
    pub candidates: Vec<Candidate>,
    pub noise: usize,
}

#[derive(Debug, Clone)]
pub struct ClusterEngine {
    params: HdbscanParams,
}

impl ClusterEngine {
    pub fn new(config: &PipelineConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            params: HdbscanParams::from_config(&config.clustering)?,
        })
    }

    pub fn params(&self) -> &HdbscanParams {
        &self.params
    }

    /// Cluster a batch. `vectors[i]` must be the embedding of `signals[i]`.
    ///
    /// Candidates are ordered by their lowest member index, so identical
    /// input always yields identical ids and ordering.
    pub fn cluster(
        &self,
        signals: &[Signal],
        vectors: &[Vec<f32>],
    ) -> Result<ClusteredBatch, ClusterInputError> {
        validate_inputs(signals, vectors)?;

        let points: Vec<&[f32]> = vectors.iter().map(|v| v.as_slice()).collect();
        let labels = cluster_labels(&points, &self.params);

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        let mut noise = 0;
        for (i, label) in labels.iter().enumerate() {
            match label {
                Some(l) => groups.entry(*l).or_default().push(i),
                None => noise += 1,
            }
        }

        let candidates = groups
            .into_values()
            .map(|members| build_candidate(signals, &points, members))
            .collect::<Vec<_>>();

        log::debug!(
            "Clustered {} signals into {} candidates ({} noise)",
            signals.len(),
            candidates.len(),
            noise
        );

        Ok(ClusteredBatch { candidates, noise })
    }
}

fn validate_inputs(signals: &[Signal], vectors: &[Vec<f32>]) -> Result<(), ClusterInputError> {
    if signals.len() != vectors.len() {
        return Err(ClusterInputError::CountMismatch {
            signals: signals.len(),
            vectors: vectors.len(),
        });
    }
    let Some(expected) = vectors.first().map(|v| v.len()) else {
        return Ok(());
    };
    for (index, v) in vectors.iter().enumerate() {
        if v.len() != expected {
            return Err(ClusterInputError::DimensionMismatch {
                index,
                expected,
                found: v.len(),
            });
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Err(ClusterInputError::NonFinite { index });
        }
    }
    Ok(())
}

fn build_candidate(signals: &[Signal], points: &[&[f32]], members: Vec<usize>) -> Candidate {
    let centroid = centroid(points, &members);

    // Members are in ascending index order, so strict `<` keeps the lowest
    // index on equal distance.
    let mut nearest = members[0];
    let mut nearest_dist = f64::INFINITY;
    for &m in &members {
        let d = euclidean_distance(points[m], &centroid);
        if d < nearest_dist {
            nearest = m;
            nearest_dist = d;
        }
    }

    let earliest = members
        .iter()
        .map(|&m| signals[m].occurred_at())
        .min()
        .unwrap_or_else(|| signals[nearest].occurred_at());
    let latest = members
        .iter()
        .map(|&m| signals[m].occurred_at())
        .max()
        .unwrap_or_else(|| signals[nearest].occurred_at());

    let sources: BTreeSet<&str> = members
        .iter()
        .map(|&m| signals[m].source_type().as_str())
        .collect();

    let cluster = Cluster {
        cluster_id: cluster_id(signals, &members),
        size: members.len(),
        representative_text: signals[nearest].text().to_string(),
        earliest_at: earliest,
        latest_at: latest,
        primary_region: primary_region(signals, &members, nearest),
        distinct_source_types: sources.len(),
        decay_score: 0.0,
        uncertainty: None,
    };

    Candidate::new(cluster, members)
}

fn centroid(points: &[&[f32]], members: &[usize]) -> Vec<f32> {
    let dim = points[members[0]].len();
    let mut sum = vec![0.0_f64; dim];
    for &m in members {
        for (acc, x) in sum.iter_mut().zip(points[m].iter()) {
            *acc += f64::from(*x);
        }
    }
    let n = members.len() as f64;
    sum.into_iter().map(|s| (s / n) as f32).collect()
}

/// Majority region; ties go to the centroid-nearest member's region, then to
/// the lexicographically smallest code.
fn primary_region(signals: &[Signal], members: &[usize], nearest: usize) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for &m in members {
        *counts.entry(signals[m].region_code()).or_insert(0) += 1;
    }
    let top = counts.values().copied().max().unwrap_or(0);
    let tied: Vec<&str> = counts
        .iter()
        .filter(|(_, c)| **c == top)
        .map(|(r, _)| *r)
        .collect();

    let nearest_region = signals[nearest].region_code();
    if tied.contains(&nearest_region) {
        return nearest_region.to_string();
    }
    tied.first()
        .map(|r| r.to_string())
        .unwrap_or_else(|| nearest_region.to_string())
}

/// Opaque id from a hash of the membership. Independent of batch order.
fn cluster_id(signals: &[Signal], members: &[usize]) -> String {
    let mut fingerprints: Vec<String> = members
        .iter()
        .map(|&m| {
            let s = &signals[m];
            format!(
                "{}\u{1f}{}\u{1f}{}\u{1f}{}",
                s.text(),
                s.region_code(),
                s.source_type().as_str(),
                s.occurred_at().timestamp()
            )
        })
        .collect();
    fingerprints.sort();

    let mut hasher = Sha256::new();
    for fp in &fingerprints {
        hasher.update(fp.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hex::encode(hasher.finalize());
    format!("cl-{}", &digest[..12])
}
