//! Daily threshold perturbation.
//!
//! Each threshold gets a bounded offset derived from
//! `SHA-256(seed ∥ date ∥ name)`. The same seed and date always give the same
//! thresholds; without the seed the offsets cannot be predicted or inverted.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::buffer::EffectiveThresholds;
use crate::config::{PerturbationConfig, Thresholds, MIN_CLUSTER_SIZE_FLOOR, MIN_SOURCES_FLOOR};

/// Signed unit offset in `[-1, 1]`, biased toward zero.
///
/// Magnitude is the product of two uniforms drawn from the digest; the sign
/// comes from a separate digest bit.
pub fn unit_offset(seed: &str, date: NaiveDate, name: &str) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update([0x1f]);
    hasher.update(date.format("%Y-%m-%d").to_string().as_bytes());
    hasher.update([0x1f]);
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();

    let u1 = uniform(&digest[0..4]);
    let u2 = uniform(&digest[4..8]);
    let magnitude = u1 * u2;
    if digest[8] & 1 == 0 {
        magnitude
    } else {
        -magnitude
    }
}

fn uniform(bytes: &[u8]) -> f64 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    f64::from(u32::from_le_bytes(buf)) / f64::from(u32::MAX)
}

/// Thresholds in force on `date`.
///
/// Delay only ever grows. Integer thresholds round to the nearest whole
/// value; every result is clamped to its floor.
pub fn effective_thresholds(
    base: &Thresholds,
    perturbation: &PerturbationConfig,
    date: NaiveDate,
) -> EffectiveThresholds {
    let seed = match (&perturbation.secret_seed, perturbation.enabled) {
        (Some(seed), true) if !seed.is_empty() => seed.as_str(),
        _ => return EffectiveThresholds::base(base),
    };
    let max = &perturbation.max_offsets;
    let floors = &perturbation.floors;

    let delay = base.min_delay_hours
        + unit_offset(seed, date, "min_delay_hours").abs() * max.min_delay_hours;

    let size = perturb_count(
        base.min_cluster_size,
        unit_offset(seed, date, "min_cluster_size"),
        max.min_cluster_size,
        floors.min_cluster_size.max(MIN_CLUSTER_SIZE_FLOOR),
    );

    let sources = perturb_count(
        base.min_sources,
        unit_offset(seed, date, "min_sources"),
        max.min_sources,
        floors.min_sources.max(MIN_SOURCES_FLOOR),
    );

    let volume = (base.min_volume_score
        + unit_offset(seed, date, "min_volume_score") * max.min_volume_score)
        .max(floors.min_volume_score);

    EffectiveThresholds {
        min_delay_hours: delay,
        min_cluster_size: size,
        min_sources: sources,
        min_volume_score: volume,
    }
}

fn perturb_count(base: usize, unit: f64, max_offset: usize, floor: usize) -> usize {
    let value = (base as f64 + unit * max_offset as f64).round();
    if value <= floor as f64 {
        floor
    } else {
        value as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn enabled(seed: &str) -> PerturbationConfig {
        PerturbationConfig {
            enabled: true,
            secret_seed: Some(seed.to_string()),
            ..PerturbationConfig::default()
        }
    }

    #[test]
    fn test_disabled_returns_base() {
        let base = Thresholds::default();
        let effective = effective_thresholds(&base, &PerturbationConfig::default(), date(17));
        assert_eq!(effective, EffectiveThresholds::base(&base));
    }

    #[test]
    fn test_deterministic_for_seed_and_date() {
        let base = Thresholds::default();
        let a = effective_thresholds(&base, &enabled("alpha"), date(17));
        let b = effective_thresholds(&base, &enabled("alpha"), date(17));
        assert_eq!(a, b);
    }

    #[test]
    fn test_varies_across_days() {
        let base = Thresholds::default();
        let delays: std::collections::BTreeSet<u64> = (1..=28)
            .map(|d| {
                effective_thresholds(&base, &enabled("alpha"), date(d))
                    .min_delay_hours
                    .to_bits()
            })
            .collect();
        assert!(delays.len() > 20, "expected day-to-day variation, got {} distinct", delays.len());
    }

    #[test]
    fn test_unit_offset_range() {
        for d in 1..=28 {
            let u = unit_offset("s", date(d), "min_volume_score");
            assert!((-1.0..=1.0).contains(&u), "offset out of range: {}", u);
        }
    }

    proptest! {
        #[test]
        fn prop_thresholds_stay_within_bounds(
            seed in "[a-z0-9]{1,16}",
            day in 1u32..=28,
            base_size in 2usize..10,
            base_sources in 1usize..5,
            base_volume in 0.0f64..5.0,
            base_delay in 0.0f64..96.0,
        ) {
            let base = Thresholds {
                min_delay_hours: base_delay,
                min_cluster_size: base_size,
                min_sources: base_sources,
                min_volume_score: base_volume,
                ..Thresholds::default()
            };
            let config = enabled(&seed);
            let max = &config.max_offsets;
            let e = effective_thresholds(&base, &config, date(day));

            prop_assert!(e.min_delay_hours >= base_delay);
            prop_assert!(e.min_delay_hours <= base_delay + max.min_delay_hours);

            prop_assert!(e.min_cluster_size >= MIN_CLUSTER_SIZE_FLOOR);
            prop_assert!(e.min_cluster_size >= config.floors.min_cluster_size);
            prop_assert!(e.min_cluster_size <= base_size + max.min_cluster_size);

            prop_assert!(e.min_sources >= MIN_SOURCES_FLOOR);
            prop_assert!(e.min_sources <= base_sources + max.min_sources);

            prop_assert!(e.min_volume_score >= config.floors.min_volume_score);
            prop_assert!(e.min_volume_score <= base_volume + max.min_volume_score + 1e-12);
        }
    }
}
