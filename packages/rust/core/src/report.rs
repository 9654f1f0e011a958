//! Structured report post-parsing.
//!
//! Model output is untrusted: it may be wrapped in a code fence, carry
//! out-of-range scores, overlong lists or the wrong types. [`parse_report`]
//! always returns a well-formed [`ProjectReport`] and never fails.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

const SUMMARY_FALLBACK_CHARS: usize = 500;
const UNAVAILABLE: &str = "Analysis unavailable";
const UNASSESSED: &str = "Unable to assess";
const NO_SUMMARY: &str = "No summary available";
const DEFAULT_SCORE: f64 = 5.0;

const MAX_KEY_FEATURES: usize = 6;
const MAX_TECH_STACK: usize = 8;
const MAX_USE_CASES: usize = 5;
const MAX_LIMITATIONS: usize = 4;
const MAX_LEARNING_RESOURCES: usize = 4;
const MAX_INTEGRATION_EXAMPLES: usize = 3;
const MAX_FAQ: usize = 5;

/// One scored dimension, `score` in `0.0..=10.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDimension {
    pub score: f64,
    pub reason: String,
}

impl Default for ScoreDimension {
    fn default() -> Self {
        Self {
            score: DEFAULT_SCORE,
            reason: UNASSESSED.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportScores {
    pub architecture: ScoreDimension,
    pub code_quality: ScoreDimension,
    pub documentation: ScoreDimension,
    pub community: ScoreDimension,
    pub innovation: ScoreDimension,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationExample {
    pub title: String,
    pub description: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaqEntry {
    pub question: String,
    pub answer: String,
}

/// Detailed analysis of one project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectReport {
    pub executive_summary: String,
    pub scores: ReportScores,
    pub key_features: Vec<String>,
    pub tech_stack: Vec<String>,
    pub use_cases: Vec<String>,
    pub limitations: Vec<String>,
    pub learning_resources: Vec<String>,
    pub integration_examples: Vec<IntegrationExample>,
    pub faq: Vec<FaqEntry>,
    /// The model output was not valid JSON and this report was synthesized.
    #[serde(default)]
    pub fallback: bool,
}

/// Parse and normalise raw model output into a report.
pub fn parse_report(raw: &str) -> ProjectReport {
    let parsed = fenced_block(raw)
        .and_then(parse_object)
        .or_else(|| parse_object(raw.trim()));

    match parsed {
        Some(object) => normalize(&object),
        None => {
            debug!(chars = raw.len(), "report output is not JSON, using fallback");
            fallback_report(raw)
        }
    }
}

/// Contents of the first ```` ```json ```` or bare ```` ``` ```` fence.
fn fenced_block(raw: &str) -> Option<&str> {
    let start = raw.find("```")?;
    let rest = &raw[start + 3..];
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("JSON"))
        .unwrap_or(rest);
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn fallback_report(raw: &str) -> ProjectReport {
    let trimmed = raw.trim();
    let executive_summary = if trimmed.is_empty() {
        UNAVAILABLE.to_string()
    } else {
        trimmed.chars().take(SUMMARY_FALLBACK_CHARS).collect()
    };
    ProjectReport {
        executive_summary,
        fallback: true,
        ..ProjectReport::default()
    }
}

fn normalize(object: &Map<String, Value>) -> ProjectReport {
    let scores = object.get("scores").and_then(Value::as_object);
    let dimension = |key: &str| scores.and_then(|s| s.get(key)).map_or_else(ScoreDimension::default, score_dimension);

    ProjectReport {
        executive_summary: object
            .get("executive_summary")
            .map(render)
            .unwrap_or_else(|| NO_SUMMARY.to_string()),
        scores: ReportScores {
            architecture: dimension("architecture"),
            code_quality: dimension("code_quality"),
            documentation: dimension("documentation"),
            community: dimension("community"),
            innovation: dimension("innovation"),
        },
        key_features: string_list(object.get("key_features"), MAX_KEY_FEATURES),
        tech_stack: string_list(object.get("tech_stack"), MAX_TECH_STACK),
        use_cases: string_list(object.get("use_cases"), MAX_USE_CASES),
        limitations: string_list(object.get("limitations"), MAX_LIMITATIONS),
        learning_resources: string_list(object.get("learning_resources"), MAX_LEARNING_RESOURCES),
        integration_examples: object_list(object.get("integration_examples"), MAX_INTEGRATION_EXAMPLES, |item| {
            Some(IntegrationExample {
                title: item.get("title")?.as_str()?.to_string(),
                description: optional_text(item, "description"),
                code: optional_text(item, "code"),
            })
        }),
        faq: object_list(object.get("faq"), MAX_FAQ, |item| {
            Some(FaqEntry {
                question: item.get("question")?.as_str()?.to_string(),
                answer: item.get("answer")?.as_str()?.to_string(),
            })
        }),
        fallback: false,
    }
}

fn score_dimension(value: &Value) -> ScoreDimension {
    let Some(object) = value.as_object() else {
        return ScoreDimension::default();
    };
    let score = match object.get("score") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match score.filter(|s| s.is_finite()) {
        Some(score) => ScoreDimension {
            score: score.clamp(0.0, 10.0),
            reason: object
                .get("reason")
                .map(render)
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| UNASSESSED.to_string()),
        },
        None => ScoreDimension::default(),
    }
}

/// Strings stay as they are; anything else is rendered as JSON text.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn optional_text(object: &Map<String, Value>, key: &str) -> String {
    object.get(key).map(render).unwrap_or_default()
}

fn string_list(value: Option<&Value>, cap: usize) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .map(render)
        .filter(|s| !s.is_empty())
        .take(cap)
        .collect()
}

fn object_list<T>(
    value: Option<&Value>,
    cap: usize,
    convert: impl Fn(&Map<String, Value>) -> Option<T>,
) -> Vec<T> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(convert)
        .take(cap)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json() {
        let raw = r#"Here you go:
```json
{"executive_summary": "A runtime.", "scores": {"architecture": {"score": 8.5, "reason": "clean"}},
 "key_features": ["async", "fast"]}
```
Thanks!"#;
        let report = parse_report(raw);
        assert!(!report.fallback);
        assert_eq!(report.executive_summary, "A runtime.");
        assert_eq!(report.scores.architecture.score, 8.5);
        assert_eq!(report.scores.architecture.reason, "clean");
        assert_eq!(report.scores.community, ScoreDimension::default());
        assert_eq!(report.key_features, vec!["async", "fast"]);
    }

    #[test]
    fn parses_bare_fence_and_raw_json() {
        let fenced = parse_report("```\n{\"executive_summary\": \"x\"}\n```");
        assert_eq!(fenced.executive_summary, "x");

        let raw = parse_report("  {\"executive_summary\": \"y\"}  ");
        assert_eq!(raw.executive_summary, "y");
        assert!(!raw.fallback);
    }

    #[test]
    fn invalid_json_falls_back_to_prefix() {
        let text = "word ".repeat(200);
        let report = parse_report(&text);
        assert!(report.fallback);
        assert_eq!(report.executive_summary.chars().count(), 500);
        assert!(report.key_features.is_empty());
        assert_eq!(report.scores, ReportScores::default());
    }

    #[test]
    fn empty_output_is_unavailable() {
        let report = parse_report("   ");
        assert!(report.fallback);
        assert_eq!(report.executive_summary, "Analysis unavailable");
    }

    #[test]
    fn scores_are_clamped_and_defaulted() {
        let report = parse_report(
            r#"{"scores": {
                "architecture": {"score": 14, "reason": "r"},
                "code_quality": {"score": -3},
                "documentation": {"score": "7.5", "reason": "ok"},
                "community": {"score": "high"},
                "innovation": 9
            }}"#,
        );
        assert_eq!(report.scores.architecture.score, 10.0);
        assert_eq!(report.scores.code_quality.score, 0.0);
        assert_eq!(report.scores.code_quality.reason, "Unable to assess");
        assert_eq!(report.scores.documentation.score, 7.5);
        assert_eq!(report.scores.community, ScoreDimension::default());
        assert_eq!(report.scores.innovation, ScoreDimension::default());
    }

    #[test]
    fn lists_are_capped_and_stringified() {
        let report = parse_report(
            r#"{
                "key_features": ["a","b","c","d","e","f","g","h"],
                "tech_stack": ["Rust", 42, {"name": "tokio"}, null],
                "limitations": "not a list"
            }"#,
        );
        assert_eq!(report.key_features.len(), 6);
        assert_eq!(report.tech_stack, vec!["Rust", "42", r#"{"name":"tokio"}"#]);
        assert!(report.limitations.is_empty());
    }

    #[test]
    fn malformed_objects_dropped() {
        let report = parse_report(
            r#"{
                "faq": [
                    {"question": "Q1", "answer": "A1"},
                    {"question": "Q2"},
                    "just text",
                    {"question": "Q3", "answer": "A3"}
                ],
                "integration_examples": [
                    {"title": "Basic", "code": "fn main() {}"},
                    {"description": "no title"},
                    {"title": "T2"}, {"title": "T3"}, {"title": "T4"}
                ]
            }"#,
        );
        let questions: Vec<&str> = report.faq.iter().map(|f| f.question.as_str()).collect();
        assert_eq!(questions, vec!["Q1", "Q3"]);
        assert_eq!(report.integration_examples.len(), 3);
        assert_eq!(report.integration_examples[0].code, "fn main() {}");
        assert_eq!(report.integration_examples[0].description, "");
        assert_eq!(report.integration_examples[2].title, "T3");
    }

    #[test]
    fn missing_summary_gets_placeholder() {
        let report = parse_report(r#"{"key_features": ["fast"]}"#);
        assert!(!report.fallback);
        assert_eq!(report.executive_summary, "No summary available");
        assert_eq!(report.key_features, vec!["fast".to_string()]);
    }

    #[test]
    fn json_array_is_not_a_report() {
        let report = parse_report("[1, 2, 3]");
        assert!(report.fallback);
        assert_eq!(report.executive_summary, "[1, 2, 3]");
    }
}
