//! Structured-output extraction from raw generative text
//!
//! Generative services often wrap JSON in markdown fences or surround it with
//! prose. Candidates are tried in order: a ```json fence, a bare ``` fence,
//! the whole trimmed text, then the outermost `{...}` and `[...]` spans.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::LazyLock;

static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```json[ \t]*\r?\n(.*?)\r?\n?```").expect("JSON_FENCE regex should compile")
});

static BARE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*\r?\n(.*?)\r?\n?```").expect("BARE_FENCE regex should compile")
});

/// Candidate JSON substrings of `raw`, most specific first
pub fn json_candidates(raw: &str) -> Vec<&str> {
    let mut candidates = Vec::new();

    candidates.extend(
        JSON_FENCE
            .captures_iter(raw)
            .filter_map(|c| c.get(1).map(|m| m.as_str())),
    );
    candidates.extend(
        BARE_FENCE
            .captures_iter(raw)
            .filter_map(|c| c.get(1).map(|m| m.as_str())),
    );

    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        candidates.push(trimmed);
    }
    if let Some(span) = outermost_span(raw, '{', '}') {
        candidates.push(span);
    }
    if let Some(span) = outermost_span(raw, '[', ']') {
        candidates.push(span);
    }

    candidates
}

/// First candidate that is a JSON object and deserializes into `T`.
///
/// Arrays and scalars are skipped, so a bracketed fragment in prose never
/// stands in for a struct.
pub fn parse_first_object<T: DeserializeOwned>(raw: &str) -> Option<T> {
    json_candidates(raw).into_iter().find_map(|candidate| {
        match serde_json::from_str::<Value>(candidate) {
            Ok(value @ Value::Object(_)) => serde_json::from_value::<T>(value).ok(),
            _ => None,
        }
    })
}

/// First candidate that parses as a JSON object or array
pub fn parse_structured(raw: &str) -> Option<Value> {
    json_candidates(raw).into_iter().find_map(|candidate| {
        match serde_json::from_str::<Value>(candidate) {
            Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
            _ => None,
        }
    })
}

fn outermost_span(raw: &str, open: char, close: char) -> Option<&str> {
    let start = raw.find(open)?;
    let end = raw.rfind(close)?;
    (end > start).then(|| &raw[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_fence() {
        let raw = "Here is the plan:\n```json\n{\"scenes\": [1, 2]}\n```\nDone.";
        let value = parse_structured(raw).unwrap();
        assert_eq!(value["scenes"][1], 2);
    }

    #[test]
    fn test_bare_fence() {
        let raw = "```\n[{\"scene\": 1}]\n```";
        assert!(parse_structured(raw).unwrap().is_array());
    }

    #[test]
    fn test_embedded_object() {
        let raw = "Verdict follows {\"passed\": true} end";
        let value = parse_structured(raw).unwrap();
        assert_eq!(value["passed"], true);
    }

    #[test]
    fn test_object_parse_skips_arrays() {
        #[derive(serde::Deserialize)]
        struct Flag {
            #[serde(default)]
            on: bool,
        }

        assert!(parse_first_object::<Flag>("flagged: [true]").is_none());
        let flag = parse_first_object::<Flag>("[1] then {\"on\": true}").unwrap();
        assert!(flag.on);
    }

    #[test]
    fn test_scalars_are_not_structured() {
        assert!(parse_structured("42").is_none());
        assert!(parse_structured("\"just a string\"").is_none());
        assert!(parse_structured("plain prose without braces").is_none());
        assert!(parse_structured("").is_none());
    }
}
