//! Raw record → `Signal` coercion.
//!
//! Upstream collectors hand over loosely-typed key/value maps. Only the keys
//! listed below are ever read; everything else in a record (author, link,
//! coordinates, device ids) is ignored and dropped with the map.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rayon::prelude::*;
use serde_json::Value;

use super::{Signal, SourceType};
use crate::config::{normalize_region_key, PipelineConfig, UnresolvedPolicy, UNRESOLVED_REGION};
use crate::error::SchemaError;

/// One upstream record as delivered by a collector.
pub type RawRecord = serde_json::Map<String, Value>;

const TEXT_KEYS: &[&str] = &["text"];
const REGION_KEYS: &[&str] = &["region_code", "region", "postal_area"];
const TIME_KEYS: &[&str] = &["occurred_at", "published_at", "date"];
const SOURCE_TYPE_KEYS: &[&str] = &["source_type"];

/// Validates raw records against the configured region and source tables.
#[derive(Debug, Clone)]
pub struct Normalizer {
    valid_regions: HashSet<String>,
    aliases: HashMap<String, String>,
    source_types: HashSet<String>,
    unresolved_policy: UnresolvedPolicy,
}

impl Normalizer {
    pub fn new(config: &PipelineConfig) -> Self {
        let valid_regions = config
            .regions
            .valid_codes
            .iter()
            .map(|c| normalize_region_key(c))
            .collect();
        let aliases = config
            .regions
            .aliases
            .iter()
            .map(|(alias, code)| (normalize_region_key(alias), normalize_region_key(code)))
            .collect();
        let source_types = config
            .source_types
            .iter()
            .map(|s| s.trim().to_lowercase())
            .collect();

        Self {
            valid_regions,
            aliases,
            source_types,
            unresolved_policy: config.regions.unresolved_policy,
        }
    }

    /// Coerce a single record.
    pub fn normalize(&self, record: &RawRecord) -> Result<Signal, SchemaError> {
        let text = match first_present(record, TEXT_KEYS) {
            Some(Value::String(s)) => s.trim(),
            Some(_) => return Err(SchemaError::WrongType("text")),
            None => return Err(SchemaError::MissingField("text")),
        };
        if text.is_empty() {
            return Err(SchemaError::EmptyText);
        }

        let region_code = self.resolve_region(record)?;
        let occurred_at = parse_occurred_at(record)?;
        let source_type = self.resolve_source_type(record)?;

        Ok(Signal::new(text, region_code, source_type, occurred_at))
    }

    /// Lazily normalise a batch. Calling again on the same slice restarts
    /// from the first record.
    pub fn signals<'a>(
        &'a self,
        records: &'a [RawRecord],
    ) -> impl Iterator<Item = Result<Signal, SchemaError>> + 'a {
        records.iter().map(move |r| self.normalize(r))
    }

    /// Parallel variant of `signals`. Output order matches input order.
    pub fn normalize_batch(&self, records: &[RawRecord]) -> Vec<Result<Signal, SchemaError>> {
        records.par_iter().map(|r| self.normalize(r)).collect()
    }

    fn resolve_region(&self, record: &RawRecord) -> Result<String, SchemaError> {
        let raw = match first_present(record, REGION_KEYS) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(_) => return Err(SchemaError::WrongType("region_code")),
            None => return Err(SchemaError::MissingField("region_code")),
        };

        let key = normalize_region_key(&raw);
        if self.valid_regions.contains(&key) {
            return Ok(key);
        }
        if let Some(code) = self.aliases.get(&key) {
            return Ok(code.clone());
        }

        match self.unresolved_policy {
            UnresolvedPolicy::Reject => Err(SchemaError::UnknownRegion),
            UnresolvedPolicy::Sentinel => Ok(UNRESOLVED_REGION.to_string()),
        }
    }

    fn resolve_source_type(&self, record: &RawRecord) -> Result<SourceType, SchemaError> {
        let raw = match first_present(record, SOURCE_TYPE_KEYS) {
            Some(Value::String(s)) => s.trim().to_lowercase(),
            Some(_) => return Err(SchemaError::WrongType("source_type")),
            None => return Err(SchemaError::MissingField("source_type")),
        };
        if self.source_types.contains(&raw) {
            Ok(SourceType::new(&raw))
        } else {
            Err(SchemaError::UnknownSourceType)
        }
    }
}

fn first_present<'a>(record: &'a RawRecord, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| record.get(*k))
        .find(|v| !v.is_null())
}

fn parse_occurred_at(record: &RawRecord) -> Result<DateTime<Utc>, SchemaError> {
    match first_present(record, TIME_KEYS) {
        Some(Value::String(s)) => parse_timestamp(s).ok_or(SchemaError::InvalidTimestamp),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or(SchemaError::InvalidTimestamp),
        Some(_) => Err(SchemaError::WrongType("occurred_at")),
        None => Err(SchemaError::MissingField("occurred_at")),
    }
}

/// Parse RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or a bare `YYYY-MM-DD`
/// (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
