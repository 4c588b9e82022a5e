//! Error types for pipeline runs
//!
//! Errors are classified by how far they are allowed to travel:
//! - Recoverable: a single malformed record (`SchemaError`), dropped and audited
//! - Fatal at startup: `ConfigurationError`, the run never begins
//! - Fatal mid-run: `ClusterInputError`, `ExportError`, audit I/O, cancellation

use std::path::PathBuf;
use thiserror::Error;

/// A raw record that cannot be expressed as a `Signal`.
///
/// Variants never carry the offending raw value: a bad region field may hold
/// a street address, and that must not leak into logs or the audit sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field {0} has an unsupported value type")]
    WrongType(&'static str),

    #[error("Signal text is empty")]
    EmptyText,

    #[error("Region is not in the valid region set")]
    UnknownRegion,

    #[error("Timestamp could not be parsed")]
    InvalidTimestamp,

    #[error("Source type is not in the configured source-type set")]
    UnknownSourceType,
}

impl SchemaError {
    /// Stable reason code used in audit events.
    pub fn reason_code(&self) -> &'static str {
        match self {
            SchemaError::MissingField(_) => "missing_field",
            SchemaError::WrongType(_) => "wrong_type",
            SchemaError::EmptyText => "empty_text",
            SchemaError::UnknownRegion => "unknown_region",
            SchemaError::InvalidTimestamp => "invalid_timestamp",
            SchemaError::UnknownSourceType => "unknown_source_type",
        }
    }
}

/// Internal invariant violation between signals and their vectors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterInputError {
    #[error("Signal/vector count mismatch: {signals} signals, {vectors} vectors")]
    CountMismatch { signals: usize, vectors: usize },

    #[error("Vector {index} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("Vector {index} contains a non-finite component")]
    NonFinite { index: usize },
}

/// Threshold or table misconfiguration. Always fatal before a run starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("Failed to read config {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Tier '{tier}' delay of {tier_delay}h is below the base delay of {base_delay}h")]
    TierDelayBelowBase {
        tier: String,
        tier_delay: f64,
        base_delay: f64,
    },

    #[error("Unknown region code '{code}' referenced by {context}")]
    UnknownRegionCode { context: String, code: String },

    #[error("Duplicate tier id '{0}'")]
    DuplicateTier(String),

    #[error("Unknown tier '{0}'")]
    UnknownTier(String),
}

impl ConfigurationError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigurationError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Tier export refused to emit. Exports fail closed: nothing is written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExportError {
    #[error("Cluster {0} has no uncertainty metadata and cannot be exported")]
    Unstamped(String),

    #[error("Unknown tier '{0}'")]
    UnknownTier(String),
}

/// Audit sink write failure.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audit event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Anything that stops a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    ClusterInput(#[from] ClusterInputError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error("Run cancelled before stage '{stage}'")]
    Cancelled { stage: &'static str },

    #[error("Another run holds the lock at {0}")]
    LockHeld(PathBuf),

    #[error("Input error: {0}")]
    Input(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl PipelineError {
    /// True when simply re-running on the same batch may succeed.
    ///
    /// Runs are idempotent, so a cancelled or lock-blocked run is safe to
    /// re-trigger. Structural errors are never retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::Cancelled { .. } | PipelineError::LockHeld(_) | PipelineError::Io(_)
        )
    }

    /// Process exit code for operators (sysexits-style).
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Configuration(_) => 78,
            PipelineError::ClusterInput(_) | PipelineError::Export(_) => 70,
            PipelineError::Audit(_) | PipelineError::Io(_) => 74,
            PipelineError::Input(_) => 65,
            PipelineError::LockHeld(_) => 75,
            PipelineError::Cancelled { .. } => 130,
        }
    }

    /// Get an operator-facing recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => {
                "Fix the configuration file; the run was not started."
            }
            PipelineError::ClusterInput(_) => {
                "Internal invariant violated between signals and embeddings. Report this; nothing was exported."
            }
            PipelineError::Export(_) => {
                "A cluster reached export without governance metadata. Nothing was exported."
            }
            PipelineError::Audit(_) => "Check audit log permissions and disk space.",
            PipelineError::Input(_) => "Check the input batch format (JSON array or JSON Lines).",
            PipelineError::LockHeld(_) => {
                "Wait for the running pipeline to finish; the lock is released when it exits."
            }
            PipelineError::Cancelled { .. } => "Re-run the pipeline; runs are idempotent.",
            PipelineError::Io(_) => "Check file permissions and disk space.",
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_never_echoes_value() {
        let err = SchemaError::UnknownRegion;
        assert_eq!(err.to_string(), "Region is not in the valid region set");
        assert_eq!(err.reason_code(), "unknown_region");
    }

    #[test]
    fn test_structural_errors_are_not_recoverable() {
        let err = PipelineError::from(ClusterInputError::CountMismatch {
            signals: 3,
            vectors: 2,
        });
        assert!(!err.is_recoverable());
        assert_eq!(err.exit_code(), 70);

        let err = PipelineError::from(ConfigurationError::DuplicateTier("public".into()));
        assert!(!err.is_recoverable());
        assert_eq!(err.exit_code(), 78);
    }

    #[test]
    fn test_cancelled_is_recoverable() {
        let err = PipelineError::Cancelled { stage: "cluster" };
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("cluster"));
        assert!(!err.recovery_suggestion().is_empty());
    }
}
