//! Best-effort extraction of a JSON mapping from a model reply.
//!
//! Replies routinely arrive wrapped in prose, fenced code blocks, or with
//! commentary trailing the object. Extraction takes the substring from the
//! first `{` to the last `}` (after stripping a fence) and attempts a
//! structured decode; anything unparseable is reported as `None` and the
//! caller treats it as a per-case failure, never a fatal one.

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

/// Parses a raw model reply into a key/value mapping.
///
/// Pure function: the same input always yields the same output.
pub fn parse_mapping(text: &str) -> Option<Map<String, Value>> {
    let candidate = extract_json_object(text)?;
    match serde_json::from_str::<Value>(&candidate) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => {
            debug!("reply decoded to a non-object JSON value");
            None
        }
        Err(err) => {
            debug!(error = %err, "reply substring failed to decode");
            None
        }
    }
}

/// Locates the JSON object substring inside a possibly-decorated reply.
pub fn extract_json_object(text: &str) -> Option<String> {
    let trimmed = text.trim();

    let body = if trimmed.contains("```") {
        let fence = Regex::new(r"```(?:json)?\s*\n?([\s\S]*?)\n?```").unwrap();
        match fence.captures(trimmed) {
            Some(caps) => caps.get(1).map_or(trimmed, |m| m.as_str()).trim(),
            None => trimmed,
        }
    } else {
        trimmed
    };

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (start < end).then(|| body[start..=end].to_string())
}

/// Normalizes a mapping value to a list of labels.
///
/// The model sometimes returns a single string and sometimes a list of
/// them for one case; both shapes are accepted.
pub fn normalize_values(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        other => vec![other.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_bare_object() {
        let map = parse_mapping(r#"{"1": "bicycle_theft_outdoor"}"#).unwrap();
        assert_eq!(map["1"], "bicycle_theft_outdoor");
    }

    #[test]
    fn parses_an_object_wrapped_in_prose() {
        let text = r#"Here is the coding you asked for: {"42": "pickpocketing"} hope it helps."#;
        let map = parse_mapping(text).unwrap();
        assert_eq!(map["42"], "pickpocketing");
    }

    #[test]
    fn parses_a_fenced_code_block() {
        let text = "```json\n{\"7\": \"shoplifting\"}\n```";
        let map = parse_mapping(text).unwrap();
        assert_eq!(map["7"], "shoplifting");
    }

    #[test]
    fn parses_a_fence_without_language_tag() {
        let text = "```\n{\"7\": \"shoplifting\"}\n```";
        assert!(parse_mapping(text).is_some());
    }

    #[test]
    fn tolerates_text_after_the_object() {
        let text = "{\"9\": \"burglary\"}\n\nLet me know if you need anything else.";
        assert_eq!(parse_mapping(text).unwrap()["9"], "burglary");
    }

    #[test]
    fn returns_none_without_any_object() {
        assert!(parse_mapping("no structured content here").is_none());
        assert!(parse_mapping("").is_none());
    }

    #[test]
    fn returns_none_for_broken_json() {
        assert!(parse_mapping("{\"1\": \"unterminated").is_none());
    }

    #[test]
    fn returns_none_for_non_object_json() {
        assert!(parse_mapping("[1, 2, 3]").is_none());
    }

    #[test]
    fn reparsing_is_idempotent() {
        let text = r#"prefix {"1": ["a", "b"]} suffix"#;
        assert_eq!(parse_mapping(text), parse_mapping(text));
    }

    #[test]
    fn normalizes_string_and_list_values() {
        assert_eq!(normalize_values(&Value::String("x".into())), vec!["x"]);
        assert_eq!(
            normalize_values(&serde_json::json!(["a", "b"])),
            vec!["a", "b"]
        );
        assert_eq!(normalize_values(&serde_json::json!(3)), vec!["3"]);
    }
}
