//! Text → dense vector encoding.
//!
//! The default encoder is a local feature-hashing model: no network, no model
//! files, and the same text always produces the same vector on every platform.

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

pub const DEFAULT_DIMENSION: usize = 384;

/// Weight of adjacent-token bigram features relative to single tokens.
const BIGRAM_WEIGHT: f32 = 0.5;

/// A pure text encoder.
pub trait SignalEncoder: Send + Sync {
    fn dimension(&self) -> usize;

    fn encode(&self, text: &str) -> Vec<f32>;

    /// Encode many texts in parallel. Item `i` equals `encode(texts[i])`.
    fn encode_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        texts.par_iter().map(|t| self.encode(t)).collect()
    }
}

/// Signed feature hashing over tokens and bigrams, L2-normalised.
#[derive(Debug, Clone)]
pub struct HashEncoder {
    dimension: usize,
}

impl Default for HashEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl HashEncoder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl SignalEncoder for HashEncoder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        hash_embed(text, self.dimension)
    }
}

/// Lower-cased NFKC alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized: String = text.nfkc().collect::<String>().to_lowercase();
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn hash_embed(text: &str, dimension: usize) -> Vec<f32> {
    let mut vec = vec![0.0_f32; dimension];
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return vec;
    }

    for token in &tokens {
        add_feature(&mut vec, token, 1.0);
    }
    for pair in tokens.windows(2) {
        let bigram = format!("{} {}", pair[0], pair[1]);
        add_feature(&mut vec, &bigram, BIGRAM_WEIGHT);
    }

    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vec {
            *value /= norm;
        }
    }

    vec
}

fn add_feature(vec: &mut [f32], feature: &str, weight: f32) {
    let digest = Sha256::digest(feature.as_bytes());
    let mut bucket = [0u8; 8];
    bucket.copy_from_slice(&digest[..8]);
    let hash = u64::from_le_bytes(bucket);
    let idx = (hash % vec.len() as u64) as usize;
    let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
    vec[idx] += sign * weight;
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_deterministic() {
        let enc = HashEncoder::default();
        let a = enc.encode("Vehicle checkpoint on the bridge this morning");
        let b = enc.encode("Vehicle checkpoint on the bridge this morning");
        assert_eq!(a, b);
        assert_eq!(a.len(), DEFAULT_DIMENSION);
    }

    #[test]
    fn test_encode_is_unit_length() {
        let v = HashEncoder::default().encode("Community meeting announced");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "expected unit norm, got {}", norm);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let v = HashEncoder::new(16).encode("  ... !! ");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_case_and_width_insensitive() {
        let enc = HashEncoder::default();
        assert_eq!(enc.encode("CHECKPOINT Bridge"), enc.encode("checkpoint bridge"));
        // Fullwidth letters fold under NFKC.
        assert_eq!(enc.encode("ｃｈｅｃｋｐｏｉｎｔ"), enc.encode("checkpoint"));
    }

    #[test]
    fn test_related_texts_are_closer() {
        let enc = HashEncoder::default();
        let a = enc.encode("checkpoint reported on the main bridge");
        let b = enc.encode("checkpoint reported near the main bridge");
        let c = enc.encode("library opens new reading room for kids");
        assert!(
            euclidean_distance(&a, &b) < euclidean_distance(&a, &c),
            "related texts should be closer"
        );
    }

    #[test]
    fn test_batch_matches_single() {
        let enc = HashEncoder::new(64);
        let texts = ["one two", "three four five", "", "one two"];
        let batch = enc.encode_batch(&texts);
        for (text, vector) in texts.iter().zip(batch.iter()) {
            assert_eq!(&enc.encode(text), vector);
        }
    }

    #[test]
    fn test_euclidean_distance() {
        assert_eq!(euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert_eq!(euclidean_distance(&[1.0, 1.0], &[1.0, 1.0]), 0.0);
    }
}
