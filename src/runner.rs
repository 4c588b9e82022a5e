//! File-based scheduled run: config + input batch in, one JSON file per tier
//! out. Holds the run lock for the duration.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::audit::{AuditSink, JsonlAuditLog, MemoryAuditSink};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::{CancellationFlag, Pipeline, RunOutput};
use crate::run_lock::RunLock;
use crate::signals::RawRecord;
use crate::util::{atomic_write_str, sanitize_file_stem};

const LOCK_FILE: &str = ".civicpulse.lock";

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub input: PathBuf,
    /// Overrides `runtime.outputDir`.
    pub output_dir: Option<PathBuf>,
    /// Evaluation time; defaults to the wall clock.
    pub now: Option<DateTime<Utc>>,
}

/// Parse a batch as a JSON array or as JSON Lines.
///
/// Entries that are not objects become empty records so the normalizer
/// rejects and audits them like any other malformed record.
pub fn parse_records(content: &str) -> Result<Vec<RawRecord>, PipelineError> {
    let trimmed = content.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let values: Vec<Value> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)
            .map_err(|e| PipelineError::Input(format!("Invalid JSON array: {}", e)))?
    } else {
        let mut values = Vec::new();
        for (i, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value = serde_json::from_str(line)
                .map_err(|e| PipelineError::Input(format!("Invalid JSON on line {}: {}", i + 1, e)))?;
            values.push(value);
        }
        values
    };

    Ok(values
        .into_iter()
        .map(|v| match v {
            Value::Object(map) => map,
            _ => RawRecord::new(),
        })
        .collect())
}

pub fn read_records(path: &Path) -> Result<Vec<RawRecord>, PipelineError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
    parse_records(&content)
}

/// Write `{tier}.json` for every tier. Each file is replaced atomically.
pub fn write_views(output_dir: &Path, output: &RunOutput) -> Result<Vec<PathBuf>, PipelineError> {
    let mut written = Vec::with_capacity(output.views.len());
    for (tier, views) in &output.views {
        let path = output_dir.join(format!("{}.json", sanitize_file_stem(tier)));
        let json = serde_json::to_string_pretty(views)
            .map_err(|e| PipelineError::Io(format!("Failed to serialize tier {}: {}", tier, e)))?;
        atomic_write_str(&path, &json)?;
        written.push(path);
    }
    Ok(written)
}

fn resolve_output_dir(config: &PipelineConfig, options: &RunnerOptions) -> Result<PathBuf, PipelineError> {
    if let Some(dir) = options.output_dir.as_ref().or(config.runtime.output_dir.as_ref()) {
        return Ok(dir.clone());
    }
    let home = dirs::home_dir()
        .ok_or_else(|| PipelineError::Io("Could not find home directory".to_string()))?;
    Ok(home.join(".civicpulse").join("out"))
}

/// One complete scheduled run.
pub fn run_from_files(
    config: &PipelineConfig,
    options: &RunnerOptions,
    cancel: &CancellationFlag,
) -> Result<RunOutput, PipelineError> {
    let pipeline = Pipeline::new(config)?;
    let output_dir = resolve_output_dir(config, options)?;

    let lock_path = config
        .runtime
        .lock_path
        .clone()
        .unwrap_or_else(|| output_dir.join(LOCK_FILE));
    let _lock = RunLock::acquire(&lock_path)?;

    let records = read_records(&options.input)?;
    let now = options.now.unwrap_or_else(Utc::now);

    let mut sink: Box<dyn AuditSink> = match &config.runtime.audit_log_path {
        Some(path) => Box::new(JsonlAuditLog::open(path)?),
        None => {
            log::warn!("No runtime.auditLogPath configured; audit events are kept in memory only");
            Box::new(MemoryAuditSink::new())
        }
    };

    let output = pipeline.run_with_cancel(&records, now, sink.as_mut(), cancel)?;
    let written = write_views(&output_dir, &output)?;
    log::info!(
        "Run {} wrote {} tier files to {}",
        output.run_id,
        written.len(),
        output_dir.display()
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::export::TierView;
    use chrono::TimeZone;

    #[test]
    fn test_parse_json_array_and_lines() {
        let array = r#"[{"text": "a"}, {"text": "b"}]"#;
        assert_eq!(parse_records(array).unwrap().len(), 2);

        let lines = "{\"text\": \"a\"}\n\n{\"text\": \"b\"}\n";
        assert_eq!(parse_records(lines).unwrap().len(), 2);

        assert!(parse_records("").unwrap().is_empty());
    }

    #[test]
    fn test_non_object_becomes_empty_record() {
        let records = parse_records(r#"[{"text": "a"}, 42, "loose"]"#).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[1].is_empty());
        assert!(records[2].is_empty());
    }

    #[test]
    fn test_bad_json_line_reports_line_number() {
        let err = parse_records("{\"text\": \"a\"}\n{oops\n").unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));
        assert!(err.to_string().contains("line 2"), "got {}", err);
    }

    #[test]
    fn test_run_from_files_writes_tier_files_and_audit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("batch.jsonl");
        std::fs::write(
            &input,
            concat!(
                "{\"text\": \"Fresh report\", \"region_code\": \"941\", \"source_type\": \"news\", \"occurred_at\": \"2026-10-17T11:00:00Z\"}\n",
                "{\"text\": \"no region\", \"source_type\": \"news\", \"occurred_at\": \"2026-10-17T11:00:00Z\"}\n",
            ),
        )
        .unwrap();

        let mut config = test_config();
        let audit_path = dir.path().join("audit.jsonl");
        config.runtime.audit_log_path = Some(audit_path.clone());

        let out_dir = dir.path().join("out");
        let options = RunnerOptions {
            input,
            output_dir: Some(out_dir.clone()),
            now: Some(Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap()),
        };
        let output = run_from_files(&config, &options, &CancellationFlag::new()).expect("run");
        assert_eq!(output.stats.rejected, 1);

        for tier in ["public", "responder"] {
            let path = out_dir.join(format!("{}.json", tier));
            let views: Vec<TierView> =
                serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
            assert_eq!(views.len(), 1, "tier {}", tier);
        }

        let audit = std::fs::read_to_string(&audit_path).unwrap();
        assert_eq!(audit.lines().count(), 1);
        assert!(audit.contains("record_rejected"));
        RunLock::acquire(&out_dir.join(LOCK_FILE)).expect("lock should be released after the run");
    }

    #[test]
    fn test_run_refused_while_locked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("batch.json");
        std::fs::write(&input, "[]").unwrap();
        let out_dir = dir.path().join("out");
        let _held = RunLock::acquire(&out_dir.join(LOCK_FILE)).expect("hold lock");

        let options = RunnerOptions {
            input,
            output_dir: Some(out_dir),
            now: None,
        };
        let err = run_from_files(&test_config(), &options, &CancellationFlag::new()).unwrap_err();
        assert!(matches!(err, PipelineError::LockHeld(_)), "got {:?}", err);
        assert_eq!(err.exit_code(), 75);
    }
}
