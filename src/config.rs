//! Pipeline configuration, loaded once per run from `~/.civicpulse/config.json`
//! (or an explicit path) and passed by reference into every component.
//!
//! Nothing here is read from globals after load: the only environment lookup is
//! the perturbation seed override in `load_config`.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Region assigned to input whose region cannot be resolved, when the
/// `sentinel` policy is active.
pub const UNRESOLVED_REGION: &str = "unresolved";

/// Environment variable that overrides `governance.perturbation.secretSeed`.
pub const PERTURBATION_SEED_ENV: &str = "CIVICPULSE_PERTURBATION_SEED";

/// Structural floor for any minimum cluster size.
pub const MIN_CLUSTER_SIZE_FLOOR: usize = 2;

/// Structural floor for the source-diversity threshold.
pub const MIN_SOURCES_FLOOR: usize = 1;

/// Upper bound for any configured delay or delay offset (ten years).
pub const MAX_DELAY_HOURS: f64 = 87_600.0;

fn delay_in_range(hours: f64) -> bool {
    hours.is_finite() && (0.0..=MAX_DELAY_HOURS).contains(&hours)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    pub regions: RegionConfig,
    #[serde(default = "default_source_types")]
    pub source_types: Vec<String>,
    #[serde(default)]
    pub governance: GovernanceConfig,
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierConfig>,
    #[serde(default)]
    pub content_policy: ContentPolicyConfig,
    #[serde(default)]
    pub no_data_scope: NoDataScope,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

// =============================================================================
// Safety buffer thresholds
// =============================================================================

/// Base thresholds for the safety buffer and decay scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    /// Hours a cluster's newest member must age before it may surface.
    #[serde(default = "default_min_delay_hours")]
    pub min_delay_hours: f64,
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    /// Minimum count of distinct source types corroborating a cluster.
    #[serde(default = "default_min_sources")]
    pub min_sources: usize,
    #[serde(default = "default_min_volume_score")]
    pub min_volume_score: f64,
    #[serde(default = "default_half_life_hours")]
    pub half_life_hours: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_delay_hours: default_min_delay_hours(),
            min_cluster_size: default_min_cluster_size(),
            min_sources: default_min_sources(),
            min_volume_score: default_min_volume_score(),
            half_life_hours: default_half_life_hours(),
        }
    }
}

fn default_min_delay_hours() -> f64 {
    24.0
}

fn default_min_cluster_size() -> usize {
    3
}

fn default_min_sources() -> usize {
    2
}

fn default_min_volume_score() -> f64 {
    1.0
}

fn default_half_life_hours() -> f64 {
    72.0
}

// =============================================================================
// Clustering
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteringConfig {
    /// Smallest group the density hierarchy will call a cluster.
    #[serde(default = "default_clustering_min_size")]
    pub min_cluster_size: usize,
    /// Neighbourhood size for core distances (the point itself counts).
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// When the whole batch forms one topic, members must leave the hierarchy
    /// at no less than this fraction of the densest member's density.
    #[serde(default = "default_root_outlier_ratio")]
    pub root_outlier_ratio: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: default_clustering_min_size(),
            min_samples: default_min_samples(),
            root_outlier_ratio: default_root_outlier_ratio(),
        }
    }
}

fn default_clustering_min_size() -> usize {
    2
}

fn default_min_samples() -> usize {
    2
}

fn default_root_outlier_ratio() -> f64 {
    0.25
}

// =============================================================================
// Regions
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnresolvedPolicy {
    /// Drop the record with a schema error.
    #[default]
    Reject,
    /// Keep the record under the `unresolved` sentinel region.
    Sentinel,
}

/// Static region tables. Codes are compared trimmed and upper-cased.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionConfig {
    pub valid_codes: Vec<String>,
    /// Alternate spellings that resolve to a valid code.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    /// Coarser area for each code, used by the `parentArea` resolution ceiling.
    #[serde(default)]
    pub parents: BTreeMap<String, String>,
    #[serde(default)]
    pub unresolved_policy: UnresolvedPolicy,
}

/// Canonical form for region codes and alias keys.
pub fn normalize_region_key(raw: &str) -> String {
    raw.trim().to_uppercase()
}

fn default_source_types() -> Vec<String> {
    vec![
        "news".to_string(),
        "government".to_string(),
        "community".to_string(),
    ]
}

// =============================================================================
// Governance
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceConfig {
    #[serde(default)]
    pub perturbation: PerturbationConfig,
    #[serde(default)]
    pub coordination: CoordinationConfig,
    #[serde(default = "default_disclaimer")]
    pub disclaimer: String,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            perturbation: PerturbationConfig::default(),
            coordination: CoordinationConfig::default(),
            disclaimer: default_disclaimer(),
        }
    }
}

fn default_disclaimer() -> String {
    "Delayed, aggregated public signals. Patterns are indicative only and are not verified reports."
        .to_string()
}

/// Daily threshold offsets keyed by a secret seed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerturbationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing)]
    pub secret_seed: Option<String>,
    #[serde(default)]
    pub max_offsets: MaxOffsets,
    #[serde(default)]
    pub floors: ThresholdFloors,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaxOffsets {
    #[serde(default = "default_delay_offset")]
    pub min_delay_hours: f64,
    #[serde(default = "default_size_offset")]
    pub min_cluster_size: usize,
    #[serde(default)]
    pub min_sources: usize,
    #[serde(default = "default_volume_offset")]
    pub min_volume_score: f64,
}

impl Default for MaxOffsets {
    fn default() -> Self {
        Self {
            min_delay_hours: default_delay_offset(),
            min_cluster_size: default_size_offset(),
            min_sources: 0,
            min_volume_score: default_volume_offset(),
        }
    }
}

fn default_delay_offset() -> f64 {
    6.0
}

fn default_size_offset() -> usize {
    1
}

fn default_volume_offset() -> f64 {
    0.5
}

/// Lowest values perturbation may push a threshold down to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdFloors {
    #[serde(default = "default_size_floor")]
    pub min_cluster_size: usize,
    #[serde(default = "default_sources_floor")]
    pub min_sources: usize,
    #[serde(default)]
    pub min_volume_score: f64,
}

impl Default for ThresholdFloors {
    fn default() -> Self {
        Self {
            min_cluster_size: default_size_floor(),
            min_sources: default_sources_floor(),
            min_volume_score: 0.0,
        }
    }
}

fn default_size_floor() -> usize {
    MIN_CLUSTER_SIZE_FLOOR
}

fn default_sources_floor() -> usize {
    MIN_SOURCES_FLOOR
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinationConfig {
    /// Width of the sliding window as a fraction of the cluster's time span.
    #[serde(default = "default_timing_window_fraction")]
    pub timing_window_fraction: f64,
    #[serde(default = "default_timing_threshold")]
    pub timing_threshold: f64,
    #[serde(default = "default_min_signals_for_timing")]
    pub min_signals_for_timing: usize,
    #[serde(default = "default_source_dominance_threshold")]
    pub source_dominance_threshold: f64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            timing_window_fraction: default_timing_window_fraction(),
            timing_threshold: default_timing_threshold(),
            min_signals_for_timing: default_min_signals_for_timing(),
            source_dominance_threshold: default_source_dominance_threshold(),
        }
    }
}

fn default_timing_window_fraction() -> f64 {
    0.1
}

fn default_timing_threshold() -> f64 {
    0.6
}

fn default_min_signals_for_timing() -> usize {
    5
}

fn default_source_dominance_threshold() -> f64 {
    0.7
}

// =============================================================================
// Tiers
// =============================================================================

/// Coarsest geography a tier may see. There is no variant finer than a
/// region code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionCeiling {
    Region,
    ParentArea,
}

/// Fields a tier may receive. Anything without a variant here cannot be
/// exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentField {
    ClusterId,
    SizeBand,
    RepresentativeText,
    DateRange,
    Region,
    SourceDiversity,
    AttentionLevel,
    Uncertainty,
}

impl ContentField {
    pub const ALL: [ContentField; 8] = [
        ContentField::ClusterId,
        ContentField::SizeBand,
        ContentField::RepresentativeText,
        ContentField::DateRange,
        ContentField::Region,
        ContentField::SourceDiversity,
        ContentField::AttentionLevel,
        ContentField::Uncertainty,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierConfig {
    pub id: String,
    pub delay_hours: f64,
    #[serde(default = "default_resolution_ceiling")]
    pub resolution_ceiling: ResolutionCeiling,
    #[serde(default)]
    pub content_fields: Vec<ContentField>,
}

impl TierConfig {
    pub fn allows(&self, field: ContentField) -> bool {
        self.content_fields.contains(&field)
    }
}

fn default_resolution_ceiling() -> ResolutionCeiling {
    ResolutionCeiling::Region
}

fn default_tiers() -> Vec<TierConfig> {
    vec![
        TierConfig {
            id: "public".to_string(),
            delay_hours: 72.0,
            resolution_ceiling: ResolutionCeiling::Region,
            content_fields: vec![
                ContentField::Region,
                ContentField::DateRange,
                ContentField::SizeBand,
                ContentField::AttentionLevel,
                ContentField::Uncertainty,
            ],
        },
        TierConfig {
            id: "responder".to_string(),
            delay_hours: 24.0,
            resolution_ceiling: ResolutionCeiling::Region,
            content_fields: vec![
                ContentField::ClusterId,
                ContentField::Region,
                ContentField::DateRange,
                ContentField::SizeBand,
                ContentField::RepresentativeText,
                ContentField::SourceDiversity,
                ContentField::AttentionLevel,
                ContentField::Uncertainty,
            ],
        },
    ]
}

// =============================================================================
// Content policy, scope, runtime
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPolicyConfig {
    /// Words that must never appear in an emitted free-text field.
    #[serde(default)]
    pub forbidden_words: Vec<String>,
}

/// Granularity of "no visible pattern" records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoDataScope {
    /// One record for the whole window when nothing is visible.
    #[default]
    Window,
    /// One record per area (at tier resolution) with nothing visible.
    Regions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_log_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            audit_log_path: None,
            lock_path: None,
            output_dir: None,
        }
    }
}

// =============================================================================
// Loading and validation
// =============================================================================

/// Default config location: `~/.civicpulse/config.json`.
pub fn default_config_path() -> Result<PathBuf, ConfigurationError> {
    let home = dirs::home_dir().ok_or_else(|| ConfigurationError::Read {
        path: PathBuf::from("~/.civicpulse/config.json"),
        message: "Could not find home directory".to_string(),
    })?;
    Ok(home.join(".civicpulse").join("config.json"))
}

/// Load and validate configuration from disk.
///
/// The perturbation seed may be supplied through `CIVICPULSE_PERTURBATION_SEED`
/// so it never has to live in the config file.
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigurationError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigurationError::Read {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut config = PipelineConfig::from_json_str(&content)?;
    if let Ok(seed) = std::env::var(PERTURBATION_SEED_ENV) {
        if !seed.is_empty() {
            config.governance.perturbation.secret_seed = Some(seed);
        }
    }

    config.validate()?;
    log::info!(
        "Loaded config from {} ({} tiers, {} regions)",
        path.display(),
        config.tiers.len(),
        config.regions.valid_codes.len()
    );
    Ok(config)
}

impl PipelineConfig {
    /// Parse without validating. Call `validate()` before use.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(json).map_err(|e| ConfigurationError::Parse(e.to_string()))
    }

    pub fn tier(&self, id: &str) -> Option<&TierConfig> {
        self.tiers.iter().find(|t| t.id == id)
    }

    /// Fail fast on any threshold or table misconfiguration.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.validate_thresholds()?;
        self.validate_clustering()?;
        self.validate_regions()?;
        self.validate_source_types()?;
        self.validate_governance()?;
        self.validate_tiers()?;
        Ok(())
    }

    fn validate_thresholds(&self) -> Result<(), ConfigurationError> {
        let t = &self.thresholds;
        if !delay_in_range(t.min_delay_hours) {
            return Err(ConfigurationError::invalid(
                "thresholds.minDelayHours",
                format!(
                    "must be between 0 and {}, got {}",
                    MAX_DELAY_HOURS, t.min_delay_hours
                ),
            ));
        }
        if t.min_cluster_size < MIN_CLUSTER_SIZE_FLOOR {
            return Err(ConfigurationError::invalid(
                "thresholds.minClusterSize",
                format!(
                    "must be >= {}, got {}",
                    MIN_CLUSTER_SIZE_FLOOR, t.min_cluster_size
                ),
            ));
        }
        if t.min_sources < MIN_SOURCES_FLOOR {
            return Err(ConfigurationError::invalid(
                "thresholds.minSources",
                format!("must be >= {}, got {}", MIN_SOURCES_FLOOR, t.min_sources),
            ));
        }
        if !t.min_volume_score.is_finite() || t.min_volume_score < 0.0 {
            return Err(ConfigurationError::invalid(
                "thresholds.minVolumeScore",
                format!("must be finite and >= 0, got {}", t.min_volume_score),
            ));
        }
        if !t.half_life_hours.is_finite() || t.half_life_hours <= 0.0 {
            return Err(ConfigurationError::invalid(
                "thresholds.halfLifeHours",
                format!("must be finite and > 0, got {}", t.half_life_hours),
            ));
        }
        Ok(())
    }

    fn validate_clustering(&self) -> Result<(), ConfigurationError> {
        let c = &self.clustering;
        if c.min_cluster_size < MIN_CLUSTER_SIZE_FLOOR {
            return Err(ConfigurationError::invalid(
                "clustering.minClusterSize",
                format!(
                    "must be >= {}, got {}. A single signal cannot be corroborated.",
                    MIN_CLUSTER_SIZE_FLOOR, c.min_cluster_size
                ),
            ));
        }
        if c.min_samples < 1 || c.min_samples > c.min_cluster_size {
            return Err(ConfigurationError::invalid(
                "clustering.minSamples",
                format!(
                    "must be in [1, {}], got {}",
                    c.min_cluster_size, c.min_samples
                ),
            ));
        }
        if !(c.root_outlier_ratio > 0.0 && c.root_outlier_ratio <= 1.0) {
            return Err(ConfigurationError::invalid(
                "clustering.rootOutlierRatio",
                format!("must be in (0, 1], got {}", c.root_outlier_ratio),
            ));
        }
        Ok(())
    }

    fn validate_regions(&self) -> Result<(), ConfigurationError> {
        let r = &self.regions;
        if r.valid_codes.is_empty() {
            return Err(ConfigurationError::invalid(
                "regions.validCodes",
                "at least one region code is required",
            ));
        }

        let mut valid = HashSet::new();
        for code in &r.valid_codes {
            let key = normalize_region_key(code);
            if key.is_empty() {
                return Err(ConfigurationError::invalid(
                    "regions.validCodes",
                    "region codes must not be empty",
                ));
            }
            if key == normalize_region_key(UNRESOLVED_REGION) {
                return Err(ConfigurationError::invalid(
                    "regions.validCodes",
                    format!("'{}' is reserved", UNRESOLVED_REGION),
                ));
            }
            valid.insert(key);
        }

        for (alias, target) in &r.aliases {
            if !valid.contains(&normalize_region_key(target)) {
                return Err(ConfigurationError::UnknownRegionCode {
                    context: format!("regions.aliases['{}']", alias),
                    code: target.clone(),
                });
            }
        }
        for code in r.parents.keys() {
            if !valid.contains(&normalize_region_key(code)) {
                return Err(ConfigurationError::UnknownRegionCode {
                    context: "regions.parents".to_string(),
                    code: code.clone(),
                });
            }
        }
        Ok(())
    }

    fn validate_source_types(&self) -> Result<(), ConfigurationError> {
        if self.source_types.is_empty() {
            return Err(ConfigurationError::invalid(
                "sourceTypes",
                "at least one source type is required",
            ));
        }
        let mut seen = HashSet::new();
        for st in &self.source_types {
            let key = st.trim().to_lowercase();
            if key.is_empty() || !seen.insert(key) {
                return Err(ConfigurationError::invalid(
                    "sourceTypes",
                    format!("empty or duplicate source type '{}'", st),
                ));
            }
        }
        Ok(())
    }

    fn validate_governance(&self) -> Result<(), ConfigurationError> {
        let g = &self.governance;
        if g.disclaimer.trim().is_empty() {
            return Err(ConfigurationError::invalid(
                "governance.disclaimer",
                "a disclaimer is mandatory",
            ));
        }

        let p = &g.perturbation;
        if p.enabled && p.secret_seed.as_deref().map_or(true, |s| s.is_empty()) {
            return Err(ConfigurationError::invalid(
                "governance.perturbation.secretSeed",
                format!(
                    "perturbation is enabled but no seed is set (config or {})",
                    PERTURBATION_SEED_ENV
                ),
            ));
        }
        let m = &p.max_offsets;
        if !delay_in_range(m.min_delay_hours) {
            return Err(ConfigurationError::invalid(
                "governance.perturbation.maxOffsets.minDelayHours",
                format!("must be between 0 and {}", MAX_DELAY_HOURS),
            ));
        }
        if !m.min_volume_score.is_finite() || m.min_volume_score < 0.0 {
            return Err(ConfigurationError::invalid(
                "governance.perturbation.maxOffsets.minVolumeScore",
                "must be finite and >= 0",
            ));
        }
        let f = &p.floors;
        if f.min_cluster_size < MIN_CLUSTER_SIZE_FLOOR {
            return Err(ConfigurationError::invalid(
                "governance.perturbation.floors.minClusterSize",
                format!("must be >= {}", MIN_CLUSTER_SIZE_FLOOR),
            ));
        }
        if f.min_sources < MIN_SOURCES_FLOOR {
            return Err(ConfigurationError::invalid(
                "governance.perturbation.floors.minSources",
                format!("must be >= {}", MIN_SOURCES_FLOOR),
            ));
        }
        if !f.min_volume_score.is_finite() || f.min_volume_score < 0.0 {
            return Err(ConfigurationError::invalid(
                "governance.perturbation.floors.minVolumeScore",
                "must be finite and >= 0",
            ));
        }

        let c = &g.coordination;
        if !(c.timing_window_fraction > 0.0 && c.timing_window_fraction <= 1.0) {
            return Err(ConfigurationError::invalid(
                "governance.coordination.timingWindowFraction",
                format!("must be in (0, 1], got {}", c.timing_window_fraction),
            ));
        }
        if !(c.timing_threshold > 0.0 && c.timing_threshold <= 1.0) {
            return Err(ConfigurationError::invalid(
                "governance.coordination.timingThreshold",
                format!("must be in (0, 1], got {}", c.timing_threshold),
            ));
        }
        if !(c.source_dominance_threshold > 0.0 && c.source_dominance_threshold <= 1.0) {
            return Err(ConfigurationError::invalid(
                "governance.coordination.sourceDominanceThreshold",
                format!("must be in (0, 1], got {}", c.source_dominance_threshold),
            ));
        }
        if c.min_signals_for_timing < 2 {
            return Err(ConfigurationError::invalid(
                "governance.coordination.minSignalsForTiming",
                "must be >= 2",
            ));
        }
        Ok(())
    }

    fn validate_tiers(&self) -> Result<(), ConfigurationError> {
        if self.tiers.is_empty() {
            return Err(ConfigurationError::invalid(
                "tiers",
                "at least one tier is required",
            ));
        }
        let base = self.thresholds.min_delay_hours;
        let mut ids = HashSet::new();
        for tier in &self.tiers {
            if tier.id.trim().is_empty() {
                return Err(ConfigurationError::invalid("tiers.id", "must not be empty"));
            }
            if !ids.insert(tier.id.as_str()) {
                return Err(ConfigurationError::DuplicateTier(tier.id.clone()));
            }
            if !delay_in_range(tier.delay_hours) {
                return Err(ConfigurationError::invalid(
                    "tiers.delayHours",
                    format!(
                        "tier '{}' must be between 0 and {}, got {}",
                        tier.id, MAX_DELAY_HOURS, tier.delay_hours
                    ),
                ));
            }
            if tier.delay_hours < base {
                return Err(ConfigurationError::TierDelayBelowBase {
                    tier: tier.id.clone(),
                    tier_delay: tier.delay_hours,
                    base_delay: base,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn minimal_json() -> &'static str {
        r#"{
            "regions": { "validCodes": ["941", "946", "100"] }
        }"#
    }

    pub(crate) fn test_config() -> PipelineConfig {
        let config = PipelineConfig::from_json_str(minimal_json()).expect("minimal config parses");
        config.validate().expect("minimal config validates");
        config
    }

    #[test]
    fn test_defaults_applied() {
        let config = test_config();
        assert_eq!(config.thresholds.min_delay_hours, 24.0);
        assert_eq!(config.thresholds.min_cluster_size, 3);
        assert_eq!(config.thresholds.min_sources, 2);
        assert_eq!(config.thresholds.half_life_hours, 72.0);
        assert_eq!(config.clustering.min_cluster_size, 2);
        assert_eq!(config.governance.coordination.source_dominance_threshold, 0.7);
        assert_eq!(config.tiers.len(), 2);
        assert!(!config.governance.perturbation.enabled);
        assert_eq!(config.regions.unresolved_policy, UnresolvedPolicy::Reject);
    }

    #[test]
    fn test_tier_delay_below_base_fails_fast() {
        let mut config = test_config();
        config.tiers[0].delay_hours = 12.0;
        let err = config.validate().unwrap_err();
        assert!(
            matches!(err, ConfigurationError::TierDelayBelowBase { .. }),
            "expected TierDelayBelowBase, got {:?}",
            err
        );
    }

    #[test]
    fn test_unbounded_delays_rejected() {
        let mut config = test_config();
        config.thresholds.min_delay_hours = 1e12;
        for tier in &mut config.tiers {
            tier.delay_hours = 1e12;
        }
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("minDelayHours"), "got {}", err);

        let mut config = test_config();
        config.tiers[1].delay_hours = MAX_DELAY_HOURS + 1.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("delayHours"), "got {}", err);

        let mut config = test_config();
        config.governance.perturbation.max_offsets.min_delay_hours = f64::MAX;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.thresholds.min_delay_hours = MAX_DELAY_HOURS;
        for tier in &mut config.tiers {
            tier.delay_hours = MAX_DELAY_HOURS;
        }
        config.validate().expect("delays at the bound are accepted");
    }

    #[test]
    fn test_duplicate_tier_rejected() {
        let mut config = test_config();
        let dup = config.tiers[0].clone();
        config.tiers.push(dup);
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::DuplicateTier(_))
        ));
    }

    #[test]
    fn test_alias_to_unknown_region_rejected() {
        let mut config = test_config();
        config
            .regions
            .aliases
            .insert("94110".to_string(), "999".to_string());
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownRegionCode { .. }));
        assert!(err.to_string().contains("999"));
    }

    #[test]
    fn test_parent_of_unknown_region_rejected() {
        let mut config = test_config();
        config
            .regions
            .parents
            .insert("555".to_string(), "Bay".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::UnknownRegionCode { .. })
        ));
    }

    #[test]
    fn test_clustering_min_size_floor() {
        let mut config = test_config();
        config.clustering.min_cluster_size = 1;
        config.clustering.min_samples = 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("clustering.minClusterSize"));
    }

    #[test]
    fn test_buffer_min_size_floor() {
        let mut config = test_config();
        config.thresholds.min_cluster_size = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_perturbation_requires_seed() {
        let mut config = test_config();
        config.governance.perturbation.enabled = true;
        assert!(config.validate().is_err());
        config.governance.perturbation.secret_seed = Some("s3cret".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_seed_never_serialized() {
        let mut config = test_config();
        config.governance.perturbation.secret_seed = Some("s3cret".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("s3cret"));
    }

    #[test]
    fn test_reserved_sentinel_region_rejected() {
        let mut config = test_config();
        config.regions.valid_codes.push("Unresolved".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_half_life_must_be_positive() {
        let mut config = test_config();
        config.thresholds.half_life_hours = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, minimal_json()).unwrap();
        let config = load_config(&path).expect("load");
        assert_eq!(config.regions.valid_codes.len(), 3);
    }

    #[test]
    fn test_load_config_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_config(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ConfigurationError::Read { .. }));
    }

    #[test]
    fn test_tier_content_fields_parse_camel_case() {
        let json = r#"{
            "regions": { "validCodes": ["941"] },
            "tiers": [
                { "id": "public", "delayHours": 48, "resolutionCeiling": "parentArea",
                  "contentFields": ["sizeBand", "dateRange"] }
            ]
        }"#;
        let config = PipelineConfig::from_json_str(json).unwrap();
        config.validate().unwrap();
        let tier = config.tier("public").unwrap();
        assert_eq!(tier.resolution_ceiling, ResolutionCeiling::ParentArea);
        assert!(tier.allows(ContentField::SizeBand));
        assert!(!tier.allows(ContentField::RepresentativeText));
    }
}
