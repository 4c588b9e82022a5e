//! Forbidden-word screening for free-text fields.

use regex::Regex;

use crate::config::ContentPolicyConfig;
use crate::error::ConfigurationError;

/// Decides whether a free-text value may leave the pipeline.
pub trait ContentValidator: Send + Sync {
    fn permits(&self, text: &str) -> bool;
}

/// Case-insensitive whole-word match against a configured word list.
#[derive(Debug, Clone)]
pub struct WordListValidator {
    pattern: Option<Regex>,
}

impl WordListValidator {
    pub fn new(config: &ContentPolicyConfig) -> Result<Self, ConfigurationError> {
        let words: Vec<String> = config
            .forbidden_words
            .iter()
            .map(|w| w.trim())
            .filter(|w| !w.is_empty())
            .map(regex::escape)
            .collect();

        if words.is_empty() {
            return Ok(Self { pattern: None });
        }

        let source = format!(r"(?i)\b(?:{})\b", words.join("|"));
        let pattern = Regex::new(&source)
            .map_err(|e| ConfigurationError::invalid("contentPolicy.forbiddenWords", e.to_string()))?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }
}

impl ContentValidator for WordListValidator {
    fn permits(&self, text: &str) -> bool {
        match &self.pattern {
            Some(re) => !re.is_match(text),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(words: &[&str]) -> WordListValidator {
        WordListValidator::new(&ContentPolicyConfig {
            forbidden_words: words.iter().map(|w| w.to_string()).collect(),
        })
        .expect("valid word list")
    }

    #[test]
    fn test_empty_list_permits_everything() {
        assert!(validator(&[]).permits("anything at all"));
        assert!(validator(&["  "]).permits("anything at all"));
    }

    #[test]
    fn test_whole_word_case_insensitive() {
        let v = validator(&["raid", "sweep"]);
        assert!(!v.permits("Reports of a RAID near the station"));
        assert!(!v.permits("sweep."));
        assert!(v.permits("Braided rope sale at the market"));
        assert!(v.permits("Sweeping changes to the bus schedule"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let v = validator(&["a.b"]);
        assert!(v.permits("axb"));
        assert!(!v.permits("saw a.b today"));
    }
}
