//! Tolerant parsing of the planner's JSON reply
//!
//! Models wrap JSON in prose or code fences often enough that the first
//! balanced `{...}` object is located by hand before deserialising.

use serde::Deserialize;

/// `{sql?, response, follow_up?}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlannerReply {
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub follow_up: Option<String>,
}

impl PlannerReply {
    /// SQL if present and not blank
    pub fn sql(&self) -> Option<&str> {
        self.sql
            .as_deref()
            .map(str::trim)
            .map(|s| s.trim_end_matches(';').trim())
            .filter(|s| !s.is_empty())
    }
}

/// First balanced JSON object in `text`, string-aware
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse the reply, `None` when no usable object is found
pub fn parse_reply(text: &str) -> Option<PlannerReply> {
    let object = extract_json_object(text)?;
    let reply: PlannerReply = serde_json::from_str(object).ok()?;
    (reply.sql().is_some() || !reply.response.trim().is_empty()).then_some(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_from_fenced_prose() {
        let text = "Sure!\n```json\n{\"sql\": \"SELECT '}' FROM t\", \"response\": \"ok\"}\n```";
        let reply = parse_reply(text).unwrap();
        assert_eq!(reply.sql(), Some("SELECT '}' FROM t"));
        assert_eq!(reply.response, "ok");
    }

    #[test]
    fn test_text_only_reply() {
        let reply = parse_reply(r#"{"response": "Hello", "follow_up": "Ask about trips"}"#).unwrap();
        assert_eq!(reply.sql(), None);
        assert_eq!(reply.follow_up.as_deref(), Some("Ask about trips"));
    }

    #[test]
    fn test_nested_and_escaped() {
        let text = r#"x {"response": "a \"quoted\" {brace}", "sql": "SELECT 1;"} y"#;
        let reply = parse_reply(text).unwrap();
        assert_eq!(reply.sql(), Some("SELECT 1"));
    }

    #[test]
    fn test_garbage_is_none() {
        assert!(parse_reply("no json here").is_none());
        assert!(parse_reply("{\"sql\": ").is_none());
        assert!(parse_reply("{}").is_none());
    }
}
