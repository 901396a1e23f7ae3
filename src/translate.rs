//! Dialect translator (§4.5 step 1, §4.8, §4.9).
//!
//! The core treats this as an opaque `TranslateRequest`/`TranslateResponse`
//! capability (§9 "Polymorphism"); the functions below are its one
//! implementation, grounded on the block-level mapping already present in
//! the teacher's `forward/handlers/anthropic.rs` (`convert_openai_to_anthropic_request`,
//! `convert_anthropic_to_openai`, `convert_openai_response_to_anthropic`,
//! `convert_anthropic_response_to_openai`, `convert_openai_chunk_to_anthropic`,
//! `convert_anthropic_event_to_openai_chunks`), narrowed to the wire fields
//! this core actually contracts to translate (text + tool_use; no thinking,
//! redacted_thinking, or image blocks — those remain a Non-goal of the
//! block-level mapping this core delegates to an opaque interface).

use serde_json::{json, Value};

use crate::dialect::Dialect;
use crate::error::GatewayError;

/// Translate a request body from `source` to `target`. A no-op clone when
/// the dialects match (the adapter still overwrites `model` separately).
pub fn translate_request(
    source: Dialect,
    target: Dialect,
    body: &Value,
) -> Result<Value, GatewayError> {
    match (source, target) {
        (a, b) if a == b => Ok(body.clone()),
        (Dialect::Claude, Dialect::Openai) => Ok(claude_request_to_openai(body)),
        (Dialect::Openai, Dialect::Claude) => Ok(openai_request_to_claude(body)),
    }
}

fn map_role(role: &str) -> &str {
    match role {
        "assistant" => "assistant",
        _ => "user",
    }
}

fn claude_content_to_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| {
                if b.get("type").and_then(|t| t.as_str()) == Some("text") {
                    b.get("text").and_then(|t| t.as_str()).map(|s| s.to_string())
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn openai_content_to_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| {
                let kind = p.get("type").and_then(|t| t.as_str());
                if matches!(kind, Some("text") | Some("input_text")) {
                    p.get("text").and_then(|t| t.as_str()).map(|s| s.to_string())
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

/// claude messages/system → openai messages (§4.5/§4.9 request direction).
fn claude_request_to_openai(body: &Value) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = body.get("system") {
        let text = match system {
            Value::String(s) => s.clone(),
            other => claude_content_to_text(other),
        };
        if !text.is_empty() {
            messages.push(json!({ "role": "system", "content": text }));
        }
    }
    if let Some(arr) = body.get("messages").and_then(|v| v.as_array()) {
        for m in arr {
            let role = m.get("role").and_then(|v| v.as_str()).unwrap_or("user");
            messages.push(json!({
                "role": map_role(role),
                "content": claude_content_to_text(m.get("content").unwrap_or(&Value::Null)),
            }));
        }
    }

    let mut out = json!({
        "messages": messages,
        "stream": body.get("stream").cloned().unwrap_or(Value::Bool(false)),
    });
    copy_if_present(body, &mut out, "temperature");
    copy_if_present(body, &mut out, "top_p");
    copy_if_present(body, &mut out, "max_tokens");
    if let Some(tools) = body.get("tools") {
        out["tools"] = map_claude_tools_to_openai(tools);
    }
    out
}

/// openai messages → claude messages/system (§4.5/§4.9 request direction).
fn openai_request_to_claude(body: &Value) -> Value {
    let mut system = String::new();
    let mut messages = Vec::new();
    if let Some(arr) = body.get("messages").and_then(|v| v.as_array()) {
        for m in arr {
            let role = m.get("role").and_then(|v| v.as_str()).unwrap_or("user");
            let text = openai_content_to_text(m.get("content").unwrap_or(&Value::Null));
            if role == "system" {
                if !system.is_empty() {
                    system.push('\n');
                }
                system.push_str(&text);
                continue;
            }
            messages.push(json!({
                "role": map_role(role),
                "content": [{ "type": "text", "text": text }],
            }));
        }
    }

    let mut out = json!({ "messages": messages });
    if !system.is_empty() {
        out["system"] = Value::String(system);
    }
    out["max_tokens"] = body
        .get("max_tokens")
        .cloned()
        .unwrap_or_else(|| Value::Number(1024.into()));
    copy_if_present(body, &mut out, "temperature");
    copy_if_present(body, &mut out, "top_p");
    out["stream"] = body.get("stream").cloned().unwrap_or(Value::Bool(false));
    if let Some(tools) = body.get("tools") {
        out["tools"] = map_openai_tools_to_claude(tools);
    }
    out
}

fn copy_if_present(src: &Value, dst: &mut Value, field: &str) {
    if let Some(v) = src.get(field) {
        dst[field] = v.clone();
    }
}

fn map_claude_tools_to_openai(tools: &Value) -> Value {
    let Some(arr) = tools.as_array() else {
        return Value::Array(vec![]);
    };
    Value::Array(
        arr.iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.get("name").cloned().unwrap_or(Value::Null),
                        "description": t.get("description").cloned().unwrap_or(Value::Null),
                        "parameters": t.get("input_schema").cloned().unwrap_or_else(|| json!({})),
                    }
                })
            })
            .collect(),
    )
}

fn map_openai_tools_to_claude(tools: &Value) -> Value {
    let Some(arr) = tools.as_array() else {
        return Value::Array(vec![]);
    };
    Value::Array(
        arr.iter()
            .filter_map(|t| {
                let func = t.get("function")?;
                Some(json!({
                    "name": func.get("name").cloned().unwrap_or(Value::Null),
                    "description": func.get("description").cloned().unwrap_or(Value::Null),
                    "input_schema": func.get("parameters").cloned().unwrap_or_else(|| json!({})),
                }))
            })
            .collect(),
    )
}

fn map_openai_finish_reason(reason: Option<&str>) -> &'static str {
    match reason {
        Some("tool_calls") => "tool_use",
        Some("length") => "max_tokens",
        _ => "end_turn",
    }
}

fn map_claude_stop_reason(reason: Option<&str>) -> &'static str {
    match reason {
        Some("tool_use") => "tool_calls",
        Some("max_tokens") => "length",
        _ => "stop",
    }
}

fn tool_call_to_claude_block(tool_call: &Value) -> Option<Value> {
    let func = tool_call.get("function")?;
    let name = func.get("name").and_then(|v| v.as_str())?;
    let args_raw = func.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}");
    let input: Value = serde_json::from_str(args_raw).unwrap_or_else(|_| json!({}));
    Some(json!({
        "type": "tool_use",
        "id": tool_call.get("id").cloned().unwrap_or(Value::Null),
        "name": name,
        "input": input,
    }))
}

/// openai JSON → claude JSON (§4.9 bullet 1).
pub fn openai_response_to_claude(body: &Value, model: &str) -> Value {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .cloned()
        .unwrap_or(json!({}));
    let message = choice.get("message").cloned().unwrap_or(json!({}));

    let mut content = Vec::new();
    let text = openai_content_to_text(message.get("content").unwrap_or(&Value::Null));
    if !text.is_empty() || message.get("tool_calls").is_none() {
        content.push(json!({ "type": "text", "text": text }));
    }
    if let Some(tool_calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
        for tc in tool_calls {
            if let Some(block) = tool_call_to_claude_block(tc) {
                content.push(block);
            }
        }
    }
    if content.is_empty() {
        content.push(json!({ "type": "text", "text": "" }));
    }

    let finish_reason = choice.get("finish_reason").and_then(|v| v.as_str());
    let usage = body.get("usage").cloned().unwrap_or(json!({}));

    json!({
        "id": body.get("id").cloned().unwrap_or(Value::Null),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": map_openai_finish_reason(finish_reason),
        "stop_sequence": Value::Null,
        "usage": {
            "input_tokens": usage.get("prompt_tokens").cloned().unwrap_or(json!(0)),
            "output_tokens": usage.get("completion_tokens").cloned().unwrap_or(json!(0)),
        },
    })
}

/// claude JSON → openai JSON (§4.9 bullet 2, same contract, inverse mapping).
pub fn claude_response_to_openai(body: &Value, model: &str) -> Value {
    let blocks = body.get("content").and_then(|c| c.as_array()).cloned().unwrap_or_default();
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for (idx, block) in blocks.iter().enumerate() {
        match block.get("type").and_then(|v| v.as_str()) {
            Some("text") => {
                text.push_str(block.get("text").and_then(|v| v.as_str()).unwrap_or(""));
            }
            Some("tool_use") => {
                tool_calls.push(json!({
                    "id": block.get("id").cloned().unwrap_or(Value::Null),
                    "index": idx,
                    "type": "function",
                    "function": {
                        "name": block.get("name").cloned().unwrap_or(Value::Null),
                        "arguments": block.get("input").map(|v| v.to_string()).unwrap_or_else(|| "{}".to_string()),
                    }
                }));
            }
            _ => {}
        }
    }

    let stop_reason = body.get("stop_reason").and_then(|v| v.as_str());
    let usage = body.get("usage").cloned().unwrap_or(json!({}));

    let mut message = json!({ "role": "assistant", "content": if text.is_empty() && !tool_calls.is_empty() { Value::Null } else { Value::String(text) } });
    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
    }

    json!({
        "id": body.get("id").cloned().unwrap_or(Value::Null),
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": map_claude_stop_reason(stop_reason),
        }],
        "usage": {
            "prompt_tokens": usage.get("input_tokens").cloned().unwrap_or(json!(0)),
            "completion_tokens": usage.get("output_tokens").cloned().unwrap_or(json!(0)),
        },
    })
}

// ---------------------------------------------------------------------
// Streaming per-event/per-chunk translation (§4.8). The byte-level SSE
// framing lives in `sse.rs`; these functions translate one already-parsed
// frame and carry state across the stream's lifetime.
// ---------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct OpenaiToClaudeState {
    pub started: bool,
    pub block_open: bool,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub stopped: bool,
}

/// Feed one parsed openai `data:` JSON chunk; returns zero or more
/// `(event, data)` claude SSE frames.
pub fn openai_chunk_to_claude_events(
    chunk: &Value,
    model: &str,
    state: &mut OpenaiToClaudeState,
) -> Vec<(&'static str, Value)> {
    let mut events = Vec::new();
    if !state.started {
        state.started = true;
        events.push((
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": chunk.get("id").cloned().unwrap_or(Value::Null),
                    "type": "message",
                    "role": "assistant",
                    "model": model,
                    "content": [],
                    "usage": { "input_tokens": 0, "output_tokens": 0 },
                }
            }),
        ));
    }

    let choice = chunk
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());
    let delta = choice.and_then(|c| c.get("delta"));
    let text = delta
        .and_then(|d| d.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("");

    if !text.is_empty() {
        if !state.block_open {
            state.block_open = true;
            events.push((
                "content_block_start",
                json!({ "type": "content_block_start", "index": 0, "content_block": { "type": "text", "text": "" } }),
            ));
        }
        events.push((
            "content_block_delta",
            json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": text } }),
        ));
    }

    if let Some(usage) = chunk.get("usage") {
        state.input_tokens = usage.get("prompt_tokens").and_then(|v| v.as_i64()).unwrap_or(0);
        state.output_tokens = usage.get("completion_tokens").and_then(|v| v.as_i64()).unwrap_or(0);
    }

    if let Some(finish_reason) = choice.and_then(|c| c.get("finish_reason")).and_then(|v| v.as_str()) {
        if state.block_open {
            events.push(("content_block_stop", json!({ "type": "content_block_stop", "index": 0 })));
        }
        events.push((
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": { "stop_reason": map_openai_finish_reason(Some(finish_reason)), "stop_sequence": Value::Null },
                "usage": { "input_tokens": state.input_tokens, "output_tokens": state.output_tokens },
            }),
        ));
    }

    events
}

#[derive(Debug, Default)]
pub struct ClaudeToOpenaiState {
    pub sent_role: bool,
    pub id: String,
    pub model: String,
    pub done: bool,
}

/// Feed one parsed claude `(event, data)` frame; returns zero or more
/// openai SSE `data:` chunks, or the sentinel `"[DONE]"`.
pub fn claude_event_to_openai_chunks(
    event_type: &str,
    payload: &Value,
    state: &mut ClaudeToOpenaiState,
) -> Vec<Value> {
    let mut chunks = Vec::new();
    match event_type {
        "message_start" => {
            state.id = payload["message"]["id"].as_str().unwrap_or("").to_string();
            state.model = payload["message"]["model"].as_str().unwrap_or("").to_string();
            chunks.push(build_openai_chunk(
                state,
                json!({ "role": "assistant", "content": "" }),
                None,
            ));
            state.sent_role = true;
        }
        "content_block_delta" => {
            if let Some(text) = payload["delta"]["text"].as_str() {
                chunks.push(build_openai_chunk(
                    state,
                    json!({ "content": text }),
                    None,
                ));
            }
        }
        "message_delta" => {
            let stop_reason = payload["delta"]["stop_reason"].as_str();
            chunks.push(build_openai_chunk(
                state,
                json!({}),
                Some(map_claude_stop_reason(stop_reason)),
            ));
        }
        "message_stop" => {
            state.done = true;
            chunks.push(Value::String("[DONE]".to_string()));
        }
        _ => {}
    }
    chunks
}

fn build_openai_chunk(state: &ClaudeToOpenaiState, delta: Value, finish_reason: Option<&str>) -> Value {
    json!({
        "id": state.id,
        "object": "chat.completion.chunk",
        "model": state.model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_response_maps_text_content() {
        let body = json!({
            "choices": [{ "message": { "content": "ok" }, "finish_reason": "stop" }],
        });
        let claude = openai_response_to_claude(&body, "claude-x");
        assert_eq!(claude["content"][0]["text"], "ok");
        assert_eq!(claude["stop_reason"], "end_turn");
    }

    #[test]
    fn openai_response_maps_tool_calls_to_tool_use() {
        let body = json!({
            "choices": [{
                "message": { "content": Value::Null, "tool_calls": [{
                    "id": "call_1", "function": { "name": "get_weather", "arguments": "{\"city\":\"nyc\"}" }
                }] },
                "finish_reason": "tool_calls",
            }],
        });
        let claude = openai_response_to_claude(&body, "claude-x");
        assert_eq!(claude["stop_reason"], "tool_use");
        let tool_block = claude["content"].as_array().unwrap().last().unwrap();
        assert_eq!(tool_block["type"], "tool_use");
        assert_eq!(tool_block["input"]["city"], "nyc");
    }

    #[test]
    fn empty_content_becomes_single_empty_text_block() {
        let body = json!({ "choices": [{ "message": {}, "finish_reason": "stop" }] });
        let claude = openai_response_to_claude(&body, "m");
        assert_eq!(claude["content"], json!([{ "type": "text", "text": "" }]));
    }

    #[test]
    fn claude_response_maps_back_to_openai() {
        let body = json!({
            "content": [{ "type": "text", "text": "hi" }],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 3, "output_tokens": 5 },
        });
        let openai = claude_response_to_openai(&body, "m");
        assert_eq!(openai["choices"][0]["message"]["content"], "hi");
        assert_eq!(openai["usage"]["prompt_tokens"], 3);
    }

    #[test]
    fn streaming_openai_to_claude_emits_expected_event_order() {
        let mut state = OpenaiToClaudeState::default();
        let mut seen = Vec::new();
        for chunk in [
            json!({"id": "1", "choices": [{"delta": {"role": "assistant"}}]}),
            json!({"choices": [{"delta": {"content": "hel"}}]}),
            json!({"choices": [{"delta": {"content": "lo"}}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}),
        ] {
            for (event, _) in openai_chunk_to_claude_events(&chunk, "m", &mut state) {
                seen.push(event);
            }
        }
        assert_eq!(
            seen,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
            ]
        );
    }

    #[test]
    fn claude_message_stop_emits_done_sentinel() {
        let mut state = ClaudeToOpenaiState::default();
        let chunks = claude_event_to_openai_chunks("message_stop", &json!({}), &mut state);
        assert_eq!(chunks, vec![Value::String("[DONE]".to_string())]);
    }
}
