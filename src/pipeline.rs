//! Run orchestration: normalize → encode → cluster → score → buffer →
//! govern → export.
//!
//! Every run recomputes from the batch it is given. Given the same batch,
//! configuration and `now`, two runs produce the same clusters and views.
//! Only the run id and audit timestamps differ.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::{AuditDetail, AuditSink, AuditTrail};
use crate::buffer::SafetyBuffer;
use crate::clustering::{Candidate, Cluster, ClusterEngine};
use crate::config::PipelineConfig;
use crate::embeddings::{HashEncoder, SignalEncoder};
use crate::error::{ConfigurationError, PipelineError};
use crate::export::{ContentValidator, TierExporter, TierView};
use crate::governance::GovernanceLayer;
use crate::signals::decay::DecayScorer;
use crate::signals::{Normalizer, RawRecord, Signal};

/// Shared flag checked between stages. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self, stage: &'static str) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            log::warn!("Run cancelled before stage '{}'", stage);
            return Err(PipelineError::Cancelled { stage });
        }
        Ok(())
    }
}

/// Per-stage counts for operator logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub records: usize,
    pub rejected: usize,
    pub signals: usize,
    pub noise: usize,
    pub candidates: usize,
    pub discarded: usize,
    pub published: usize,
    pub coordination_flags: usize,
    pub withheld_fields: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub clusters: Vec<Cluster>,
    /// Views keyed by tier id.
    pub views: BTreeMap<String, Vec<TierView>>,
    pub stats: RunStats,
}

pub struct Pipeline {
    normalizer: Normalizer,
    encoder: Box<dyn SignalEncoder>,
    engine: ClusterEngine,
    scorer: DecayScorer,
    governance: GovernanceLayer,
    exporter: TierExporter,
}

impl Pipeline {
    /// Validate the configuration and build every component. Any
    /// misconfiguration fails here, before a run can start.
    pub fn new(config: &PipelineConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            normalizer: Normalizer::new(config),
            encoder: Box::new(HashEncoder::default()),
            engine: ClusterEngine::new(config)?,
            scorer: DecayScorer::new(&config.thresholds),
            governance: GovernanceLayer::new(config),
            exporter: TierExporter::new(config)?,
        })
    }

    pub fn with_encoder(mut self, encoder: Box<dyn SignalEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_validator(mut self, validator: Box<dyn ContentValidator>) -> Self {
        self.exporter = self.exporter.with_validator(validator);
        self
    }

    pub fn run(
        &self,
        records: &[RawRecord],
        now: DateTime<Utc>,
        sink: &mut dyn AuditSink,
    ) -> Result<RunOutput, PipelineError> {
        self.run_with_cancel(records, now, sink, &CancellationFlag::new())
    }

    pub fn run_with_cancel(
        &self,
        records: &[RawRecord],
        now: DateTime<Utc>,
        sink: &mut dyn AuditSink,
        cancel: &CancellationFlag,
    ) -> Result<RunOutput, PipelineError> {
        let run_id = Uuid::new_v4().to_string();
        let mut audit = AuditTrail::new(run_id.as_str(), sink);
        let mut stats = RunStats {
            records: records.len(),
            ..RunStats::default()
        };
        log::info!("Run {} started with {} records", run_id, records.len());

        cancel.check("normalize")?;
        let signals = self.normalize(records, &mut audit, &mut stats)?;

        cancel.check("encode")?;
        let texts: Vec<&str> = signals.iter().map(|s| s.text()).collect();
        let vectors = self.encoder.encode_batch(&texts);

        cancel.check("cluster")?;
        let batch = self.engine.cluster(&signals, &vectors)?;
        stats.noise = batch.noise;
        stats.candidates = batch.candidates.len();
        let mut candidates = batch.candidates;

        cancel.check("score")?;
        self.scorer.apply(&mut candidates, &signals, now);

        cancel.check("buffer")?;
        let buffer = SafetyBuffer::new(self.governance.effective_thresholds(now.date_naive()));
        let mut survivors = buffer.filter(candidates, now, &mut audit)?;
        stats.discarded = stats.candidates - survivors.len();

        cancel.check("govern")?;
        let before = audit.emitted();
        self.governance.annotate(&mut survivors, &signals, now, &mut audit)?;
        stats.coordination_flags = audit.emitted() - before;
        let clusters: Vec<Cluster> = survivors.into_iter().map(Candidate::into_cluster).collect();
        stats.published = clusters.len();

        cancel.check("export")?;
        let mut views = BTreeMap::new();
        let mut withheld = Vec::new();
        for tier in self.exporter.tier_ids() {
            let export = self.exporter.export(&clusters, tier, now)?;
            withheld.extend(export.withheld.into_iter().map(|w| (tier.to_string(), w)));
            views.insert(tier.to_string(), export.views);
        }
        stats.withheld_fields = withheld.len();
        for (tier, w) in withheld {
            audit.emit(AuditDetail::ContentWithheld {
                cluster_id: w.cluster_id,
                tier,
                field: w.field,
            })?;
        }
        audit.flush()?;

        log::info!(
            "Run {} finished: {} records, {} rejected, {} noise, {} candidates, {} discarded, {} published",
            run_id,
            stats.records,
            stats.rejected,
            stats.noise,
            stats.candidates,
            stats.discarded,
            stats.published
        );

        Ok(RunOutput {
            run_id,
            generated_at: now,
            clusters,
            views,
            stats,
        })
    }

    fn normalize(
        &self,
        records: &[RawRecord],
        audit: &mut AuditTrail<'_>,
        stats: &mut RunStats,
    ) -> Result<Vec<Signal>, PipelineError> {
        let mut signals = Vec::with_capacity(records.len());
        for (record_index, result) in self.normalizer.normalize_batch(records).into_iter().enumerate() {
            match result {
                Ok(signal) => signals.push(signal),
                Err(e) => {
                    stats.rejected += 1;
                    audit.emit(AuditDetail::RecordRejected {
                        record_index,
                        reason: e.reason_code().to_string(),
                        message: e.to_string(),
                    })?;
                }
            }
        }
        stats.signals = signals.len();
        if stats.rejected > 0 {
            log::warn!("Rejected {} of {} records", stats.rejected, records.len());
        }
        Ok(signals)
    }
}
