//! Offline moderation by category term lists.

use super::Moderator;
use crate::config::ModerationConfig;
use crate::error::{ConfigError, ServiceError};
use crate::types::ModerationVerdict;
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;

/// Flags text containing any configured term, reporting the matching categories.
///
/// Matching is case-insensitive and on whole words, so "skill" does not trip "kill".
#[derive(Debug, Clone)]
pub struct KeywordModerator {
    /// (category, pattern) sorted by category.
    categories: Vec<(String, Regex)>,
}

impl KeywordModerator {
    /// Build from a category -> terms map. Categories without terms are ignored.
    pub fn new(terms: &BTreeMap<String, Vec<String>>) -> Result<Self, ConfigError> {
        let mut categories = Vec::new();
        for (category, words) in terms {
            let alternatives: Vec<String> = words
                .iter()
                .map(|w| w.trim())
                .filter(|w| !w.is_empty())
                .map(regex::escape)
                .collect();
            if alternatives.is_empty() {
                continue;
            }
            let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
            let regex = Regex::new(&pattern).map_err(|e| ConfigError::Invalid {
                message: format!("blocked_terms.{}: {}", category, e),
            })?;
            categories.push((category.clone(), regex));
        }
        Ok(Self { categories })
    }

    pub fn from_config(config: &ModerationConfig) -> Result<Self, ConfigError> {
        if config.blocked_terms.is_empty() {
            tracing::warn!("Keyword moderation configured without any blocked terms");
        }
        Self::new(&config.blocked_terms)
    }

    /// Categories whose terms occur in `text`, in sorted order.
    pub fn matched_categories(&self, text: &str) -> Vec<&str> {
        self.categories
            .iter()
            .filter(|(_, regex)| regex.is_match(text))
            .map(|(category, _)| category.as_str())
            .collect()
    }
}

#[async_trait]
impl Moderator for KeywordModerator {
    async fn moderate(&self, text: &str) -> Result<ModerationVerdict, ServiceError> {
        let matched = self.matched_categories(text);
        if matched.is_empty() {
            Ok(ModerationVerdict::safe())
        } else {
            Ok(ModerationVerdict::unsafe_because(matched.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moderator() -> KeywordModerator {
        let mut terms = BTreeMap::new();
        terms.insert(
            "violence".to_string(),
            vec!["kill".to_string(), "attack".to_string()],
        );
        terms.insert("hate".to_string(), vec!["slur".to_string()]);
        terms.insert("empty".to_string(), vec!["  ".to_string()]);
        KeywordModerator::new(&terms).unwrap()
    }

    #[tokio::test]
    async fn test_safe_text() {
        let verdict = moderator()
            .moderate("Explain photosynthesis")
            .await
            .unwrap();
        assert!(verdict.is_safe);
        assert!(verdict.reason.is_empty());
    }

    #[tokio::test]
    async fn test_flagged_text_reports_sorted_categories() {
        let verdict = moderator()
            .moderate("A SLUR before the Attack")
            .await
            .unwrap();
        assert!(!verdict.is_safe);
        assert_eq!(verdict.reason, "hate, violence");
    }

    #[test]
    fn test_whole_word_matching() {
        let m = moderator();
        assert!(m.matched_categories("improve your skills").is_empty());
        assert_eq!(m.matched_categories("kill the process"), vec!["violence"]);
    }

    #[test]
    fn test_terms_are_escaped() {
        let mut terms = BTreeMap::new();
        terms.insert("symbols".to_string(), vec!["a.b".to_string()]);
        let m = KeywordModerator::new(&terms).unwrap();
        assert!(m.matched_categories("axb").is_empty());
        assert_eq!(m.matched_categories("say a.b now"), vec!["symbols"]);
    }

    #[test]
    fn test_empty_categories_are_ignored() {
        assert!(moderator().matched_categories("   ").is_empty());
    }
}
