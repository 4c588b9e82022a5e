//! Tier exporter: per-audience projections of surviving clusters.
//!
//! Output fields are allow-listed per tier and rendered by an explicit match
//! on `ContentField`, so a new `Cluster` attribute can never reach a tier
//! without a new variant being added and allowed.

pub mod content_policy;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::buffer::hours;
use crate::clustering::Cluster;
use crate::config::{
    normalize_region_key, ContentField, NoDataScope, PipelineConfig, ResolutionCeiling, TierConfig,
    UNRESOLVED_REGION,
};
use crate::error::{ConfigurationError, ExportError};
use crate::governance::Uncertainty;

pub use content_policy::{ContentValidator, WordListValidator};

pub const NO_VISIBLE_PATTERN: &str = "No visible pattern. This does not imply absence of activity.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierView {
    pub tier: String,
    pub generated_at: DateTime<Utc>,
    pub delay_hours: f64,
    pub resolution_ceiling: ResolutionCeiling,
    pub body: TierViewBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TierViewBody {
    Pattern {
        fields: BTreeMap<String, Value>,
        disclaimer: String,
    },
    NoVisiblePattern {
        /// `None` for a whole-window record.
        #[serde(skip_serializing_if = "Option::is_none")]
        area: Option<String>,
        interpretation: String,
    },
}

/// A field dropped by the content policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithheldField {
    pub cluster_id: String,
    pub field: ContentField,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TierExport {
    pub views: Vec<TierView>,
    pub withheld: Vec<WithheldField>,
}

pub struct TierExporter {
    tiers: Vec<TierConfig>,
    valid_codes: BTreeSet<String>,
    parents: HashMap<String, String>,
    scope: NoDataScope,
    validator: Box<dyn ContentValidator>,
}

impl TierExporter {
    pub fn new(config: &PipelineConfig) -> Result<Self, ConfigurationError> {
        let validator = WordListValidator::new(&config.content_policy)?;
        Ok(Self {
            tiers: config.tiers.clone(),
            valid_codes: config
                .regions
                .valid_codes
                .iter()
                .map(|c| normalize_region_key(c))
                .collect(),
            parents: config
                .regions
                .parents
                .iter()
                .map(|(code, parent)| (normalize_region_key(code), parent.trim().to_string()))
                .collect(),
            scope: config.no_data_scope,
            validator: Box::new(validator),
        })
    }

    pub fn with_validator(mut self, validator: Box<dyn ContentValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn tier_ids(&self) -> impl Iterator<Item = &str> {
        self.tiers.iter().map(|t| t.id.as_str())
    }

    /// Build the views for one tier.
    ///
    /// Fails closed: if any cluster lacks uncertainty metadata nothing is
    /// exported for this tier.
    pub fn export(
        &self,
        clusters: &[Cluster],
        tier_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TierExport, ExportError> {
        let tier = self
            .tiers
            .iter()
            .find(|t| t.id == tier_id)
            .ok_or_else(|| ExportError::UnknownTier(tier_id.to_string()))?;

        let mut stamped: Vec<(&Cluster, &Uncertainty)> = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            match &cluster.uncertainty {
                Some(u) => stamped.push((cluster, u)),
                None => return Err(ExportError::Unstamped(cluster.cluster_id.clone())),
            }
        }

        let cutoff = now - hours(tier.delay_hours);
        let mut views = Vec::new();
        let mut withheld = Vec::new();
        let mut visible_areas = BTreeSet::new();

        for (cluster, uncertainty) in stamped {
            if cluster.latest_at > cutoff {
                continue;
            }
            let area = self.area_for(&cluster.primary_region, tier.resolution_ceiling);
            let fields = self.render_fields(tier, cluster, uncertainty, &area, &mut withheld);
            visible_areas.insert(area);
            views.push(self.view(
                tier,
                now,
                TierViewBody::Pattern {
                    fields,
                    disclaimer: uncertainty.disclaimer.clone(),
                },
            ));
        }

        match self.scope {
            NoDataScope::Window => {
                if views.is_empty() {
                    views.push(self.no_data_view(tier, now, None));
                }
            }
            NoDataScope::Regions => {
                for area in self.scope_areas(tier.resolution_ceiling) {
                    if !visible_areas.contains(&area) {
                        views.push(self.no_data_view(tier, now, Some(area)));
                    }
                }
            }
        }

        Ok(TierExport { views, withheld })
    }

    /// Coarsen a region code to the tier's ceiling.
    pub fn area_for(&self, region: &str, ceiling: ResolutionCeiling) -> String {
        match ceiling {
            ResolutionCeiling::Region => region.to_string(),
            ResolutionCeiling::ParentArea => self
                .parents
                .get(&normalize_region_key(region))
                .cloned()
                .unwrap_or_else(|| UNRESOLVED_REGION.to_string()),
        }
    }

    fn scope_areas(&self, ceiling: ResolutionCeiling) -> BTreeSet<String> {
        self.valid_codes
            .iter()
            .map(|code| self.area_for(code, ceiling))
            .collect()
    }

    fn render_fields(
        &self,
        tier: &TierConfig,
        cluster: &Cluster,
        uncertainty: &Uncertainty,
        area: &str,
        withheld: &mut Vec<WithheldField>,
    ) -> BTreeMap<String, Value> {
        let mut fields = BTreeMap::new();
        for field in ContentField::ALL.into_iter().filter(|f| tier.allows(*f)) {
            let value = match field {
                ContentField::ClusterId => json!(cluster.cluster_id),
                ContentField::SizeBand => json!(size_band(cluster.size)),
                ContentField::RepresentativeText => {
                    if !self.validator.permits(&cluster.representative_text) {
                        withheld.push(WithheldField {
                            cluster_id: cluster.cluster_id.clone(),
                            field,
                        });
                        continue;
                    }
                    json!(cluster.representative_text)
                }
                ContentField::DateRange => {
                    let (from, to) = date_range(cluster);
                    json!({ "from": from.to_string(), "to": to.to_string() })
                }
                ContentField::Region => json!(area),
                ContentField::SourceDiversity => json!(cluster.distinct_source_types),
                ContentField::AttentionLevel => json!(attention_level(cluster.decay_score)),
                ContentField::Uncertainty => json!({
                    "confidence": round_to(uncertainty.confidence, 2),
                    "interval": {
                        "low": round_to(uncertainty.interval.low, 1),
                        "high": round_to(uncertainty.interval.high, 1),
                    },
                    "quality": uncertainty.quality,
                    "coordinationRisk": uncertainty.coordination_risk,
                }),
            };
            fields.insert(field_key(field).to_string(), value);
        }
        fields
    }

    fn view(&self, tier: &TierConfig, now: DateTime<Utc>, body: TierViewBody) -> TierView {
        TierView {
            tier: tier.id.clone(),
            generated_at: now,
            delay_hours: tier.delay_hours,
            resolution_ceiling: tier.resolution_ceiling,
            body,
        }
    }

    fn no_data_view(&self, tier: &TierConfig, now: DateTime<Utc>, area: Option<String>) -> TierView {
        self.view(
            tier,
            now,
            TierViewBody::NoVisiblePattern {
                area,
                interpretation: NO_VISIBLE_PATTERN.to_string(),
            },
        )
    }
}

fn field_key(field: ContentField) -> &'static str {
    match field {
        ContentField::ClusterId => "clusterId",
        ContentField::SizeBand => "sizeBand",
        ContentField::RepresentativeText => "representativeText",
        ContentField::DateRange => "dateRange",
        ContentField::Region => "region",
        ContentField::SourceDiversity => "sourceDiversity",
        ContentField::AttentionLevel => "attentionLevel",
        ContentField::Uncertainty => "uncertainty",
    }
}

/// Coarse size band. The exact member count never leaves the pipeline.
pub fn size_band(size: usize) -> &'static str {
    match size {
        0..=4 => "2-4",
        5..=9 => "5-9",
        10..=24 => "10-24",
        _ => "25+",
    }
}

pub fn attention_level(decay_score: f64) -> &'static str {
    if decay_score >= 5.0 {
        "high"
    } else if decay_score >= 2.0 {
        "moderate"
    } else {
        "low"
    }
}

/// Day-granularity range; the only form in which cluster times leave a run.
fn date_range(cluster: &Cluster) -> (NaiveDate, NaiveDate) {
    (cluster.earliest_at.date_naive(), cluster.latest_at.date_naive())
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::governance::{CoordinationRisk, QualityLabel, ScoreInterval};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap()
    }

    fn uncertainty() -> Uncertainty {
        Uncertainty {
            confidence: 0.734,
            interval: ScoreInterval { low: 1.234, high: 5.678 },
            quality: QualityLabel::Moderate,
            coordination_risk: CoordinationRisk::Low,
            disclaimer: "Indicative only.".to_string(),
        }
    }

    fn cluster(id: &str, region: &str, latest_hours_ago: i64, text: &str) -> Cluster {
        Cluster {
            cluster_id: id.to_string(),
            size: 7,
            representative_text: text.to_string(),
            earliest_at: now() - Duration::hours(latest_hours_ago + 10),
            latest_at: now() - Duration::hours(latest_hours_ago),
            primary_region: region.to_string(),
            distinct_source_types: 3,
            decay_score: 3.4,
            uncertainty: Some(uncertainty()),
        }
    }

    fn exporter() -> TierExporter {
        TierExporter::new(&test_config()).expect("exporter")
    }

    fn pattern_fields(view: &TierView) -> &BTreeMap<String, Value> {
        match &view.body {
            TierViewBody::Pattern { fields, .. } => fields,
            other => panic!("expected pattern, got {:?}", other),
        }
    }

    #[test]
    fn test_unstamped_cluster_fails_closed() {
        let mut unstamped = cluster("cl-b", "941", 100, "x");
        unstamped.uncertainty = None;
        let clusters = vec![cluster("cl-a", "941", 100, "x"), unstamped];
        let err = exporter().export(&clusters, "public", now()).unwrap_err();
        assert_eq!(err, ExportError::Unstamped("cl-b".to_string()));
    }

    #[test]
    fn test_unknown_tier() {
        let err = exporter().export(&[], "press", now()).unwrap_err();
        assert_eq!(err, ExportError::UnknownTier("press".to_string()));
    }

    #[test]
    fn test_public_tier_allow_list() {
        let out = exporter()
            .export(&[cluster("cl-a", "941", 100, "Checkpoint near the bridge")], "public", now())
            .unwrap();
        assert_eq!(out.views.len(), 1);
        let fields = pattern_fields(&out.views[0]);
        let keys: Vec<&str> = fields.keys().map(|k| k.as_str()).collect();
        assert_eq!(
            keys,
            vec!["attentionLevel", "dateRange", "region", "sizeBand", "uncertainty"]
        );
        assert_eq!(fields["sizeBand"], "5-9");
        assert_eq!(fields["attentionLevel"], "moderate");
        assert_eq!(fields["uncertainty"]["confidence"], 0.73);
        assert_eq!(fields["uncertainty"]["interval"]["low"], 1.2);
        assert_eq!(fields["uncertainty"]["quality"], "moderate");

        let json = serde_json::to_string(&out.views[0]).unwrap();
        assert!(!json.contains("Checkpoint"), "public tier leaked text: {}", json);
        assert!(!json.contains("cl-a"));
        assert!(json.contains("Indicative only."));
    }

    #[test]
    fn test_tier_delay_filter() {
        let clusters = vec![cluster("cl-a", "941", 30, "x")];
        let public = exporter().export(&clusters, "public", now()).unwrap();
        let responder = exporter().export(&clusters, "responder", now()).unwrap();

        assert!(matches!(
            public.views[0].body,
            TierViewBody::NoVisiblePattern { area: None, .. }
        ));
        assert_eq!(pattern_fields(&responder.views[0])["clusterId"], "cl-a");
    }

    #[test]
    fn test_forbidden_word_withholds_field() {
        let mut config = test_config();
        config.content_policy.forbidden_words = vec!["raid".to_string()];
        let exporter = TierExporter::new(&config).unwrap();
        let out = exporter
            .export(&[cluster("cl-a", "941", 100, "Talk of a Raid downtown")], "responder", now())
            .unwrap();
        let fields = pattern_fields(&out.views[0]);
        assert!(!fields.contains_key("representativeText"));
        assert!(fields.contains_key("sizeBand"));
        assert_eq!(
            out.withheld,
            vec![WithheldField {
                cluster_id: "cl-a".to_string(),
                field: ContentField::RepresentativeText
            }]
        );
    }

    #[test]
    fn test_parent_area_ceiling() {
        let mut config = test_config();
        config.regions.parents.insert("941".to_string(), "Bay Area".to_string());
        config.tiers[0].resolution_ceiling = ResolutionCeiling::ParentArea;
        let exporter = TierExporter::new(&config).unwrap();

        let out = exporter
            .export(&[cluster("cl-a", "941", 100, "x"), cluster("cl-b", "946", 100, "x")], "public", now())
            .unwrap();
        assert_eq!(pattern_fields(&out.views[0])["region"], "Bay Area");
        assert_eq!(pattern_fields(&out.views[1])["region"], UNRESOLVED_REGION);
    }

    #[test]
    fn test_no_data_per_region_scope() {
        let mut config = test_config();
        config.no_data_scope = NoDataScope::Regions;
        let exporter = TierExporter::new(&config).unwrap();
        let out = exporter
            .export(&[cluster("cl-a", "941", 100, "x")], "public", now())
            .unwrap();

        let empty_areas: Vec<Option<String>> = out
            .views
            .iter()
            .filter_map(|v| match &v.body {
                TierViewBody::NoVisiblePattern { area, interpretation } => {
                    assert_eq!(interpretation, NO_VISIBLE_PATTERN);
                    Some(area.clone())
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            empty_areas,
            vec![Some("100".to_string()), Some("946".to_string())]
        );
    }

    #[test]
    fn test_empty_window_gets_single_no_data_record() {
        let out = exporter().export(&[], "public", now()).unwrap();
        assert_eq!(out.views.len(), 1);
        let json = serde_json::to_value(&out.views[0]).unwrap();
        assert_eq!(json["body"]["type"], "no_visible_pattern");
        assert_eq!(json["body"]["interpretation"], NO_VISIBLE_PATTERN);
        assert_eq!(json["delayHours"], 72.0);
    }

    #[test]
    fn test_bands() {
        assert_eq!(size_band(2), "2-4");
        assert_eq!(size_band(9), "5-9");
        assert_eq!(size_band(10), "10-24");
        assert_eq!(size_band(25), "25+");
        assert_eq!(attention_level(1.99), "low");
        assert_eq!(attention_level(2.0), "moderate");
        assert_eq!(attention_level(5.0), "high");
    }

    #[test]
    fn test_date_range_day_granularity() {
        let mut c = cluster("cl-a", "941", 0, "x");
        c.earliest_at = Utc.with_ymd_and_hms(2026, 10, 14, 9, 17, 3).unwrap();
        c.latest_at = Utc.with_ymd_and_hms(2026, 10, 15, 23, 41, 0).unwrap();
        let (from, to) = date_range(&c);
        assert_eq!(from.to_string(), "2026-10-14");
        assert_eq!(to.to_string(), "2026-10-15");
    }
}
