//! Normalised civic text signals.
//!
//! A `Signal` is the only per-record type that crosses from the outside world
//! into the pipeline. It has exactly four fields: text, a coarse region code,
//! a coarse source category and the time it occurred. There is nowhere to put
//! an author, handle, URL, device or coordinate.

pub mod decay;
pub mod normalizer;

use chrono::{DateTime, Utc};

/// Coarse publication channel ("news", "government", "community", ...).
///
/// Always one of the configured source types, lower-cased. Never an outlet
/// name or account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceType(String);

impl SourceType {
    pub(crate) fn new(name: &str) -> Self {
        SourceType(name.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One normalised input unit. Immutable once built by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    text: String,
    region_code: String,
    source_type: SourceType,
    occurred_at: DateTime<Utc>,
}

impl Signal {
    pub(crate) fn new(
        text: impl Into<String>,
        region_code: impl Into<String>,
        source_type: SourceType,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            text: text.into(),
            region_code: region_code.into(),
            source_type,
            occurred_at,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn region_code(&self) -> &str {
        &self.region_code
    }

    pub fn source_type(&self) -> &SourceType {
        &self.source_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

pub use normalizer::{Normalizer, RawRecord};
