//! Keyword subscription matching.

use std::collections::BTreeMap;

use regex::{Regex, RegexBuilder};
use tracing::{debug, info, warn};

use trendscout_shared::{Candidate, KeywordConfig, MatchField, MatchMode};

/// Keywords that matched one candidate, overall and per field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordMatch {
    /// Distinct matched keywords in configuration order.
    pub keywords: Vec<String>,
    pub fields: BTreeMap<&'static str, Vec<String>>,
}

impl KeywordMatch {
    pub fn matched(&self) -> bool {
        !self.keywords.is_empty()
    }
}

/// Narrows candidates to those matching at least one configured keyword.
#[derive(Debug)]
pub struct KeywordMatcher {
    config: KeywordConfig,
    /// One entry per keyword in regex mode; `None` for patterns that failed to compile.
    patterns: Vec<Option<Regex>>,
}

impl KeywordMatcher {
    /// Build a matcher. Invalid regex keywords are logged once here and never match.
    pub fn new(config: KeywordConfig) -> Self {
        let patterns = if config.match_mode == MatchMode::Regex {
            config
                .keywords
                .iter()
                .map(|kw| {
                    RegexBuilder::new(kw)
                        .case_insensitive(!config.case_sensitive)
                        .build()
                        .map_err(|e| warn!(pattern = %kw, error = %e, "invalid keyword regex"))
                        .ok()
                })
                .collect()
        } else {
            Vec::new()
        };
        Self { config, patterns }
    }

    pub fn is_active(&self) -> bool {
        !self.config.keywords.is_empty()
    }

    /// Report which keywords match which fields of `candidate`.
    pub fn match_candidate(&self, candidate: &Candidate) -> KeywordMatch {
        let mut result = KeywordMatch::default();

        for field in &self.config.match_fields {
            let (name, value) = field_value(candidate, *field);
            if value.is_empty() {
                continue;
            }
            for (index, keyword) in self.config.keywords.iter().enumerate() {
                if !self.matches(value, index, keyword) {
                    continue;
                }
                if !result.keywords.contains(keyword) {
                    result.keywords.push(keyword.clone());
                }
                let per_field = result.fields.entry(name).or_default();
                if !per_field.contains(keyword) {
                    per_field.push(keyword.clone());
                }
            }
        }
        result
    }

    /// Keep only matching candidates. With no keywords, everything passes.
    pub fn filter(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        if !self.is_active() {
            return candidates;
        }

        let total = candidates.len();
        let kept: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| {
                let m = self.match_candidate(c);
                if m.matched() {
                    debug!(identity = %c.identity, keywords = ?m.keywords, "keyword match");
                }
                m.matched()
            })
            .collect();

        info!(total, matched = kept.len(), "keyword filter applied");
        kept
    }

    fn matches(&self, text: &str, index: usize, keyword: &str) -> bool {
        if keyword.is_empty() {
            return false;
        }
        match self.config.match_mode {
            MatchMode::Exact => {
                if self.config.case_sensitive {
                    text.contains(keyword)
                } else {
                    text.to_lowercase().contains(&keyword.to_lowercase())
                }
            }
            MatchMode::Regex => self
                .patterns
                .get(index)
                .and_then(Option::as_ref)
                .is_some_and(|re| re.is_match(text)),
            MatchMode::Fuzzy => {
                let (text, keyword) = if self.config.case_sensitive {
                    (text.to_string(), keyword.to_string())
                } else {
                    (text.to_lowercase(), keyword.to_lowercase())
                };
                text.split_whitespace()
                    .any(|token| similarity(token, &keyword) >= self.config.fuzzy_threshold)
            }
        }
    }
}

fn field_value(candidate: &Candidate, field: MatchField) -> (&'static str, &str) {
    match field {
        MatchField::Name => ("name", candidate.identity.as_str()),
        MatchField::Description => ("description", candidate.description.as_str()),
        MatchField::Language => ("language", candidate.language.as_str()),
    }
}

/// Similarity ratio `2 * LCS(a, b) / (|a| + |b|)` over characters.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in &a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    2.0 * prev[b.len()] as f64 / total as f64
}
