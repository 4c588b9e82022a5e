//! Topic clusters: the aggregate unit that may eventually become visible.

pub mod engine;
pub mod hdbscan;

use chrono::{DateTime, Utc};

use crate::governance::Uncertainty;
use crate::signals::Signal;

pub use engine::{ClusterEngine, ClusteredBatch};

/// Aggregate statistics for one topic cluster.
///
/// Holds no source identity or anything finer than a region code.
/// `earliest_at`/`latest_at` are the exact oldest and newest member times so
/// the delay gates measure real age; they stay inside the run and only leave
/// it as a day-granularity range.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub cluster_id: String,
    pub size: usize,
    pub representative_text: String,
    pub earliest_at: DateTime<Utc>,
    pub latest_at: DateTime<Utc>,
    pub primary_region: String,
    pub distinct_source_types: usize,
    pub decay_score: f64,
    pub uncertainty: Option<Uncertainty>,
}

/// A cluster plus its run-scoped membership.
///
/// Member indices point into the run's signal batch and exist only so the
/// decay scorer and governance layer can read member timing and source mix.
/// Candidates are never serialised; `into_cluster` drops the membership.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub cluster: Cluster,
    members: Vec<usize>,
}

impl Candidate {
    pub(crate) fn new(cluster: Cluster, members: Vec<usize>) -> Self {
        Self { cluster, members }
    }

    pub fn members(&self) -> &[usize] {
        &self.members
    }

    pub fn member_signals<'a>(&'a self, signals: &'a [Signal]) -> impl Iterator<Item = &'a Signal> + 'a {
        self.members.iter().filter_map(move |&i| signals.get(i))
    }

    pub fn into_cluster(self) -> Cluster {
        self.cluster
    }
}
