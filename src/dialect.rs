//! Wire dialect identification and auto-detection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The wire shape of a request/response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Openai,
    Claude,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Openai => "openai",
            Dialect::Claude => "claude",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Some(Dialect::Openai),
            "claude" | "anthropic" => Some(Dialect::Claude),
            _ => None,
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn has_billing_like_tool_use(tools: &Value) -> bool {
    tools
        .as_array()
        .map(|arr| arr.iter().any(|t| t.get("input_schema").is_some()))
        .unwrap_or(false)
}

fn has_openai_tool_shape(tools: &Value) -> bool {
    tools
        .as_array()
        .map(|arr| {
            arr.iter().any(|t| {
                t.get("type").and_then(|v| v.as_str()) == Some("function")
                    || t.get("function").is_some()
            })
        })
        .unwrap_or(false)
}

fn message_has_openai_tool_markers(messages: &Value) -> bool {
    let Some(arr) = messages.as_array() else {
        return false;
    };
    arr.iter().any(|m| {
        m.get("role").and_then(|v| v.as_str()) == Some("tool")
            || m.get("tool_call_id").is_some()
            || m.get("tool_calls").map(|v| v.is_array()).unwrap_or(false)
    })
}

fn content_block_type_matches(messages: &Value, types: &[&str]) -> bool {
    let Some(arr) = messages.as_array() else {
        return false;
    };
    arr.iter().any(|m| {
        let Some(content) = m.get("content").and_then(|c| c.as_array()) else {
            return false;
        };
        content.iter().any(|block| {
            block
                .get("type")
                .and_then(|v| v.as_str())
                .map(|t| types.contains(&t))
                .unwrap_or(false)
        })
    })
}

/// Infer the source dialect of a request whose path is dialect-agnostic.
///
/// Mirrors the heuristic chain: headers first, then increasingly specific
/// body shape checks, falling back to claude when nothing matches.
pub fn detect_dialect(headers: &reqwest::header::HeaderMap, body: &Value) -> Dialect {
    if headers.contains_key("anthropic-version") {
        return Dialect::Claude;
    }
    if body.get("anthropic_version").is_some() || body.get("anthropicVersion").is_some() {
        return Dialect::Claude;
    }
    if body.get("max_completion_tokens").is_some()
        || body.get("response_format").is_some()
        || body.get("n").is_some()
    {
        return Dialect::Openai;
    }
    if let Some(tools) = body.get("tools") {
        if has_billing_like_tool_use(tools) {
            return Dialect::Claude;
        }
        if has_openai_tool_shape(tools) {
            return Dialect::Openai;
        }
    }
    if let Some(choice) = body.get("tool_choice") {
        if let Some(s) = choice.as_str() {
            if s == "required" || s == "none" {
                return Dialect::Openai;
            }
        }
        if let Some(t) = choice.get("type").and_then(|v| v.as_str()) {
            if t == "function" {
                return Dialect::Openai;
            }
            if t == "any" || t == "tool" {
                return Dialect::Claude;
            }
        }
    }
    if let Some(messages) = body.get("messages") {
        if message_has_openai_tool_markers(messages) {
            return Dialect::Openai;
        }
        if content_block_type_matches(
            messages,
            &["tool_use", "tool_result", "thinking", "redacted_thinking"],
        ) {
            return Dialect::Claude;
        }
        if content_block_type_matches(messages, &["image_url", "input_text", "input_image"]) {
            return Dialect::Openai;
        }
    }
    if body.get("system").is_some() {
        return Dialect::Claude;
    }
    Dialect::Claude
}

/// Whether the request asks for a streamed response, per dialect's strictness rule.
pub fn is_streaming_request(body: &Value) -> bool {
    matches!(body.get("stream"), Some(Value::Bool(true)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn headers() -> reqwest::header::HeaderMap {
        reqwest::header::HeaderMap::new()
    }

    #[test]
    fn detects_claude_via_header() {
        let mut h = headers();
        h.insert("anthropic-version", "2023-06-01".parse().unwrap());
        let body = json!({});
        assert_eq!(detect_dialect(&h, &body), Dialect::Claude);
    }

    #[test]
    fn detects_openai_via_response_format() {
        let body = json!({"response_format": {"type": "json_object"}});
        assert_eq!(detect_dialect(&headers(), &body), Dialect::Openai);
    }

    #[test]
    fn detects_openai_via_tool_calls_message() {
        let body = json!({"messages": [{"role": "tool", "tool_call_id": "x", "content": "y"}]});
        assert_eq!(detect_dialect(&headers(), &body), Dialect::Openai);
    }

    #[test]
    fn detects_claude_via_tool_use_block() {
        let body = json!({"messages": [{"role": "assistant", "content": [{"type": "tool_use"}]}]});
        assert_eq!(detect_dialect(&headers(), &body), Dialect::Claude);
    }

    #[test]
    fn detects_claude_via_system_field() {
        let body = json!({"system": "be nice"});
        assert_eq!(detect_dialect(&headers(), &body), Dialect::Claude);
    }

    #[test]
    fn falls_back_to_claude() {
        let body = json!({});
        assert_eq!(detect_dialect(&headers(), &body), Dialect::Claude);
    }

    #[test]
    fn streaming_requires_literal_true() {
        assert!(is_streaming_request(&json!({"stream": true})));
        assert!(!is_streaming_request(&json!({"stream": "true"})));
        assert!(!is_streaming_request(&json!({})));
    }
}
