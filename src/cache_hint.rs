//! Cache-hint mapping (§4.7): bidirectional mapping between the two
//! dialects' prompt-cache markers, plus header propagation.

use reqwest::header::HeaderMap;
use serde_json::{json, Value};

const CACHE_KEY_HEADERS: &[&str] = &[
    "x-prompt-cache-key",
    "prompt-cache-key",
    "x-openai-prompt-cache-key",
    "openai-prompt-cache-key",
];

/// FNV-1a, 32-bit. Deterministic, dependency-free, matches the source's
/// choice of a non-cryptographic stable hash for cache-key derivation.
fn fnv1a32(data: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for byte in data {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

fn has_ephemeral_marker(body: &Value) -> bool {
    fn is_ephemeral(v: &Value) -> bool {
        v.get("type").and_then(|t| t.as_str()) == Some("ephemeral")
    }
    if body.get("cache_control").map(is_ephemeral).unwrap_or(false) {
        return true;
    }
    let scan_blocks = |value: &Value| -> bool {
        value
            .as_array()
            .map(|arr| {
                arr.iter().any(|entry| {
                    entry
                        .get("cache_control")
                        .map(is_ephemeral)
                        .unwrap_or(false)
                        || entry
                            .get("content")
                            .and_then(|c| c.as_array())
                            .map(|blocks| {
                                blocks.iter().any(|b| {
                                    b.get("cache_control").map(is_ephemeral).unwrap_or(false)
                                })
                            })
                            .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    };
    scan_blocks(body.get("system").unwrap_or(&Value::Null))
        || scan_blocks(body.get("messages").unwrap_or(&Value::Null))
        || scan_blocks(body.get("tools").unwrap_or(&Value::Null))
}

fn has_1h_ttl(body: &Value) -> bool {
    fn ttl_is_1h(v: &Value) -> bool {
        v.get("ttl").and_then(|t| t.as_str()) == Some("1h")
    }
    if body.get("cache_control").map(ttl_is_1h).unwrap_or(false) {
        return true;
    }
    for key in ["system", "messages", "tools"] {
        if let Some(arr) = body.get(key).and_then(|v| v.as_array()) {
            if arr.iter().any(|e| e.get("cache_control").map(ttl_is_1h).unwrap_or(false)) {
                return true;
            }
        }
    }
    false
}

fn header_cache_key(headers: &HeaderMap, body: &Value) -> Option<String> {
    for name in CACHE_KEY_HEADERS {
        if let Some(v) = headers.get(*name).and_then(|v| v.to_str().ok()) {
            return Some(v.to_string());
        }
    }
    body.get("prompt_cache_key")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// `"llm-router:" + fnv1a32(stable_serialize(...))`, serialization input
/// capped at 20 KiB.
fn deterministic_cache_key(model: &str, body: &Value) -> String {
    let stable = json!({
        "model": model,
        "cache_control": body.get("cache_control"),
        "system": body.get("system"),
        "tools": body.get("tools"),
        "messages": body.get("messages"),
    });
    let mut serialized = stable.to_string();
    serialized.truncate(20 * 1024);
    format!("llm-router:{:08x}", fnv1a32(serialized.as_bytes()))
}

/// Apply the claude-source → openai-target cache hint mapping in place.
pub fn map_claude_to_openai(
    source_body: &Value,
    source_headers: &HeaderMap,
    target_model: &str,
    target_body: &mut Value,
) {
    if !has_ephemeral_marker(source_body) {
        return;
    }
    let Some(obj) = target_body.as_object_mut() else {
        return;
    };
    if !obj.contains_key("prompt_cache_key") {
        let key = header_cache_key(source_headers, source_body)
            .unwrap_or_else(|| deterministic_cache_key(target_model, source_body));
        obj.insert("prompt_cache_key".to_string(), Value::String(key));
    }
    if !obj.contains_key("prompt_cache_retention") {
        let retention = if has_1h_ttl(source_body) { "24h" } else { "in_memory" };
        obj.insert(
            "prompt_cache_retention".to_string(),
            Value::String(retention.to_string()),
        );
    }
}

fn normalize_openai_cache_control(source_body: &Value) -> Option<Value> {
    let cc = source_body.get("cache_control")?;
    let ttl = cc.get("ttl").and_then(|v| v.as_str());
    if let Some(ttl) = ttl {
        if ttl != "5m" && ttl != "1h" {
            return None;
        }
    }
    Some(json!({ "type": "ephemeral" }))
}

/// Apply the openai-source → claude-target cache hint mapping in place.
pub fn map_openai_to_claude(source_body: &Value, target_body: &mut Value) {
    let Some(obj) = target_body.as_object_mut() else {
        return;
    };
    if obj.contains_key("cache_control") {
        return;
    }
    if let Some(cc) = normalize_openai_cache_control(source_body) {
        obj.insert("cache_control".to_string(), cc);
        return;
    }
    let retention = source_body.get("prompt_cache_retention").and_then(|v| v.as_str());
    match retention {
        Some("24h") => {
            obj.insert(
                "cache_control".to_string(),
                json!({ "type": "ephemeral", "ttl": "1h" }),
            );
        }
        Some("in_memory") => {
            obj.insert("cache_control".to_string(), json!({ "type": "ephemeral" }));
        }
        _ => {
            if source_body.get("prompt_cache_key").is_some() {
                obj.insert("cache_control".to_string(), json!({ "type": "ephemeral" }));
            }
        }
    }
}

/// Copy cache-related headers verbatim into the outgoing provider header map
/// if not already set, plus claude-specific beta/version forwarding.
pub fn propagate_headers(
    source_headers: &HeaderMap,
    target_headers: &mut HeaderMap,
    target_is_claude: bool,
) {
    for name in ["x-prompt-cache-key", "x-prompt-cache-retention"] {
        if target_headers.contains_key(name) {
            continue;
        }
        if let Some(v) = source_headers.get(name) {
            target_headers.insert(
                reqwest::header::HeaderName::from_static(name),
                v.clone(),
            );
        }
    }
    if !target_is_claude {
        return;
    }
    if let Some(incoming_beta) = source_headers.get("anthropic-beta").and_then(|v| v.to_str().ok()) {
        let mut tokens: Vec<String> = target_headers
            .get("anthropic-beta")
            .and_then(|v| v.to_str().ok())
            .map(|existing| existing.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        for token in incoming_beta.split(',').map(|s| s.trim().to_string()) {
            if !tokens.iter().any(|t| t == &token) {
                tokens.push(token);
            }
        }
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&tokens.join(", ")) {
            target_headers.insert("anthropic-beta", value);
        }
    }
    if let Some(version) = source_headers.get("anthropic-version") {
        target_headers.insert("anthropic-version", version.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_to_openai_sets_deterministic_key_without_header() {
        let source = json!({
            "cache_control": {"type": "ephemeral"},
            "messages": [{"role": "user", "content": "hi"}],
        });
        let mut target = json!({});
        map_claude_to_openai(&source, &HeaderMap::new(), "gpt-x", &mut target);
        assert!(target.get("prompt_cache_key").is_some());
        assert_eq!(
            target.get("prompt_cache_retention").unwrap().as_str(),
            Some("in_memory")
        );
    }

    #[test]
    fn claude_to_openai_maps_1h_ttl_to_24h_retention() {
        let source = json!({ "cache_control": {"type": "ephemeral", "ttl": "1h"} });
        let mut target = json!({});
        map_claude_to_openai(&source, &HeaderMap::new(), "gpt-x", &mut target);
        assert_eq!(
            target.get("prompt_cache_retention").unwrap().as_str(),
            Some("24h")
        );
    }

    #[test]
    fn openai_to_claude_maps_24h_retention_to_1h_ttl() {
        let source = json!({ "prompt_cache_retention": "24h" });
        let mut target = json!({});
        map_openai_to_claude(&source, &mut target);
        assert_eq!(target["cache_control"]["ttl"], "1h");
    }

    #[test]
    fn openai_to_claude_does_not_overwrite_existing_cache_control() {
        let source = json!({ "prompt_cache_retention": "24h" });
        let mut target = json!({ "cache_control": {"type": "ephemeral", "ttl": "5m"} });
        map_openai_to_claude(&source, &mut target);
        assert_eq!(target["cache_control"]["ttl"], "5m");
    }

    #[test]
    fn fnv1a32_is_deterministic() {
        assert_eq!(fnv1a32(b"abc"), fnv1a32(b"abc"));
        assert_ne!(fnv1a32(b"abc"), fnv1a32(b"abd"));
    }
}
