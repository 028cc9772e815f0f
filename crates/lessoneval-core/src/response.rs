//! Defensive parsing of provider responses.
//!
//! Providers are asked for a single JSON object but routinely wrap it in
//! markdown fences or surround it with prose. Parsing strips fences, takes
//! the outermost `{...}` span and maps it onto [`ParsedEvaluation`].
//! Anything that cannot be mapped is a [`ResponseParseError`]; callers keep
//! the raw text alongside the error.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)```").unwrap();
}

/// Keys that are never treated as breakdown lists.
const RESERVED_KEYS: &[&str] = &["recommendations", "priority_recommendations"];

/// Errors from mapping provider text to an evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResponseParseError {
    #[error("response is empty")]
    Empty,

    #[error("no JSON object found in response")]
    NoJsonObject,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("response has no numeric score")]
    MissingScore,

    #[error("score {0} is outside 0-100")]
    ScoreOutOfRange(f64),
}

/// A provider evaluation mapped onto the structured breakdown shape.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedEvaluation {
    pub score: f64,
    pub breakdown: BTreeMap<String, Vec<String>>,
    pub recommendations: Vec<String>,
    pub indicator_scores: BTreeMap<String, f64>,
    pub summary: Option<String>,
}

/// Locate the JSON object in a provider response.
///
/// Prefers the body of the first fenced block, then falls back to the span
/// between the first `{` and the last `}`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let body = CODE_FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text);

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&body[start..=end])
}

/// Parse a provider response into a JSON object map.
pub fn parse_json_object(text: &str) -> Result<Map<String, Value>, ResponseParseError> {
    if text.trim().is_empty() {
        return Err(ResponseParseError::Empty);
    }
    let span = extract_json_object(text).ok_or(ResponseParseError::NoJsonObject)?;
    match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ResponseParseError::NoJsonObject),
        Err(e) => Err(ResponseParseError::InvalidJson(e.to_string())),
    }
}

/// Parse a dimension evaluation response.
///
/// The score is read from `score` (or `overall_score`) and must be a finite
/// number in `[0, 100]`. Every other top-level list of strings becomes a
/// breakdown entry.
pub fn parse_dimension_response(text: &str) -> Result<ParsedEvaluation, ResponseParseError> {
    let map = parse_json_object(text)?;

    let score = map
        .get("score")
        .or_else(|| map.get("overall_score"))
        .and_then(number_value)
        .ok_or(ResponseParseError::MissingScore)?;
    if !score.is_finite() || !(0.0..=100.0).contains(&score) {
        return Err(ResponseParseError::ScoreOutOfRange(score));
    }

    let mut breakdown = BTreeMap::new();
    for (key, value) in &map {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        if let Some(items) = string_list(value) {
            breakdown.insert(key.clone(), items);
        }
    }

    let recommendations = map
        .get("recommendations")
        .and_then(string_list)
        .unwrap_or_default();

    let indicator_scores = map
        .get("indicator_scores")
        .and_then(Value::as_object)
        .map(|scores| {
            scores
                .iter()
                .filter_map(|(name, v)| number_value(v).map(|n| (name.clone(), n)))
                .collect()
        })
        .unwrap_or_default();

    let summary = map
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);

    Ok(ParsedEvaluation {
        score,
        breakdown,
        recommendations,
        indicator_scores,
        summary,
    })
}

/// Read a number, also accepting numeric strings such as `"78"` or `"78/100"`.
pub fn number_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let head = s.split('/').next().unwrap_or(s).trim();
            head.parse::<f64>().ok()
        }
        _ => None,
    }
}

/// Read a list of strings. Object items contribute their `recommendation`
/// or `text` field; other items are skipped. Returns `None` for non-arrays.
pub fn string_list(value: &Value) -> Option<Vec<String>> {
    let items = value.as_array()?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let text = match item {
            Value::String(s) => Some(s.as_str()),
            Value::Object(obj) => obj
                .get("recommendation")
                .or_else(|| obj.get("text"))
                .and_then(Value::as_str),
            _ => None,
        };
        if let Some(t) = text.map(str::trim).filter(|t| !t.is_empty()) {
            out.push(t.to_string());
        }
    }
    Some(out)
}
