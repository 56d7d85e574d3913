//! Extract a JSON object from free-form agent text
//!
//! Kept apart from the orchestrator: nothing in the turn contract depends on
//! these heuristics.

use regex::Regex;
use serde_json::Value;

use crate::error::ParseError;

fn pattern(re: &str) -> Result<Regex, ParseError> {
    Regex::new(re).map_err(|e| ParseError {
        reason: format!("invalid pattern: {e}"),
    })
}

/// Tries, in order: the whole text, a fenced ```json block, then the first
/// balanced `{...}` object. `<thinking>` blocks are removed first.
pub fn parse_structured_reply(text: &str) -> Result<Value, ParseError> {
    let thinking = pattern(r"(?s)<thinking>.*?</thinking>")?;
    let fenced = pattern(r"(?s)```(?:json)?\s*(\{.*?\})\s*```")?;

    let cleaned = thinking.replace_all(text, "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Err(ParseError {
            reason: "reply is empty".to_string(),
        });
    }

    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Ok(value);
    }

    for captures in fenced.captures_iter(cleaned) {
        if let Some(value) = captures
            .get(1)
            .and_then(|m| serde_json::from_str::<Value>(m.as_str()).ok())
        {
            return Ok(value);
        }
    }

    let mut search = cleaned;
    while let Some((start, candidate)) = first_balanced_object(search) {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return Ok(value);
        }
        search = &search[start + 1..];
    }

    Err(ParseError {
        reason: "no parseable JSON object".to_string(),
    })
}

/// First `{...}` with balanced braces and its byte offset; braces inside
/// strings are skipped
fn first_balanced_object(text: &str) -> Option<(usize, &str)> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, &text[start..start + i + 1]));
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_json() {
        let value = parse_structured_reply(r#"{"severity": "high"}"#).unwrap();
        assert_eq!(value, json!({"severity": "high"}));
    }

    #[test]
    fn test_strips_thinking() {
        let text = "<thinking>the user wants {json}</thinking>\n{\"ok\": true}";
        assert_eq!(parse_structured_reply(text).unwrap(), json!({"ok": true}));
    }

    #[test]
    fn test_fenced_block() {
        let text = "Here is the analysis:\n```json\n{\"alarms\": 2, \"ticket\": \"OPS-9\"}\n```\nDone.";
        assert_eq!(
            parse_structured_reply(text).unwrap(),
            json!({"alarms": 2, "ticket": "OPS-9"})
        );
    }

    #[test]
    fn test_first_balanced_object_with_nested_and_strings() {
        let text = r#"Result: {"summary": "use {braces} carefully", "items": {"a": 1}} trailing"#;
        assert_eq!(
            parse_structured_reply(text).unwrap(),
            json!({"summary": "use {braces} carefully", "items": {"a": 1}})
        );
    }

    #[test]
    fn test_skips_unparseable_candidate() {
        let text = "{not json} then {\"x\": 1}";
        assert_eq!(parse_structured_reply(text).unwrap(), json!({"x": 1}));
    }

    #[test]
    fn test_no_json() {
        assert!(parse_structured_reply("all systems nominal").is_err());
        assert!(parse_structured_reply("<thinking>only thoughts</thinking>").is_err());
        assert!(parse_structured_reply("{ unclosed").is_err());
    }
}
