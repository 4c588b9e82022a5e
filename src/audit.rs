//! Append-only audit trail for pipeline decisions.
//!
//! Every rejected record, discarded cluster, coordination flag and withheld
//! field produces one event. Events carry reason codes, cluster ids and
//! counts only: never signal text, raw field values or per-signal times.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ContentField;
use crate::error::AuditError;
use crate::governance::CoordinationFlag;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub run_id: String,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub detail: AuditDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AuditDetail {
    RecordRejected {
        record_index: usize,
        reason: String,
        message: String,
    },
    TemporalDelayFailed {
        cluster_id: String,
    },
    ClusterSizeFailed {
        cluster_id: String,
    },
    SourceDiversityFailed {
        cluster_id: String,
    },
    VolumeScoreFailed {
        cluster_id: String,
    },
    CoordinationFlagged {
        cluster_id: String,
        flag: CoordinationFlag,
        score: f64,
    },
    ContentWithheld {
        cluster_id: String,
        tier: String,
        field: ContentField,
    },
}

impl AuditEvent {
    pub fn kind(&self) -> &'static str {
        match &self.detail {
            AuditDetail::RecordRejected { .. } => "record_rejected",
            AuditDetail::TemporalDelayFailed { .. } => "temporal_delay_failed",
            AuditDetail::ClusterSizeFailed { .. } => "cluster_size_failed",
            AuditDetail::SourceDiversityFailed { .. } => "source_diversity_failed",
            AuditDetail::VolumeScoreFailed { .. } => "volume_score_failed",
            AuditDetail::CoordinationFlagged { .. } => "coordination_flagged",
            AuditDetail::ContentWithheld { .. } => "content_withheld",
        }
    }
}

/// Destination for audit events.
pub trait AuditSink {
    fn append(&mut self, event: &AuditEvent) -> Result<(), AuditError>;

    fn flush(&mut self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// JSON Lines file, opened in append mode. Existing lines are never
/// rewritten.
pub struct JsonlAuditLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlAuditLog {
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditLog {
    fn append(&mut self, event: &AuditEvent) -> Result<(), AuditError> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), AuditError> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for JsonlAuditLog {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            log::warn!("Failed to flush audit log {}: {}", self.path.display(), e);
        }
    }
}

/// In-memory sink, mostly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Vec<AuditEvent>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events.iter().filter(|e| e.kind() == kind).count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&mut self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events.push(event.clone());
        Ok(())
    }
}

/// Stamps events with the run id and current time before they reach a sink.
pub struct AuditTrail<'a> {
    run_id: String,
    sink: &'a mut dyn AuditSink,
    emitted: usize,
}

impl<'a> AuditTrail<'a> {
    pub fn new(run_id: impl Into<String>, sink: &'a mut dyn AuditSink) -> Self {
        Self {
            run_id: run_id.into(),
            sink,
            emitted: 0,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    pub fn emit(&mut self, detail: AuditDetail) -> Result<(), AuditError> {
        let event = AuditEvent {
            run_id: self.run_id.clone(),
            recorded_at: Utc::now(),
            detail,
        };
        self.sink.append(&event)?;
        self.emitted += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), AuditError> {
        self.sink.flush()
    }
}
