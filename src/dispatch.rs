//! Dispatcher (§4.4): drives the candidate list, applies retry policy,
//! classifies failures, updates circuit state, and builds the final
//! response. Grounded on `forward/mod.rs::handle_request_with_fallback`.

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use rand::Rng;
use serde_json::{json, Value};

use crate::adapter::{self, AdapterResponse};
use crate::cache_hint;
use crate::circuit;
use crate::classify::{self, AttemptOutcome, Classification};
use crate::dialect::Dialect;
use crate::env_tunables::Tunables;
use crate::model::Candidate;
use crate::sse::{SseBuffer, StreamTranslator};
use crate::translate;

fn retry_delay_ms(attempt: u32, tunables: &Tunables) -> u64 {
    let base = tunables.origin_retry_base_delay_ms;
    let capped = tunables
        .origin_retry_max_delay_ms
        .min(base.saturating_mul(1u64 << (attempt.saturating_sub(1))));
    let jitter: f64 = rand::thread_rng().gen_range(0.5..=1.0);
    (capped as f64 * jitter) as u64
}

fn retry_after_ms(headers: &HeaderMap) -> Option<i64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
        .map(|secs| (secs * 1000.0) as i64)
}

fn strip_hop_by_hop(headers: &mut axum::http::HeaderMap) {
    for name in [
        "connection",
        "keep-alive",
        "transfer-encoding",
        "upgrade",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailer",
        "content-encoding",
        "content-length",
    ] {
        headers.remove(name);
    }
}

/// Build the client-facing response for one failed (non-2xx) attempt,
/// translating the error envelope to the source dialect when needed
/// (§4.5 step 8).
fn build_failure_response(
    source: Dialect,
    candidate: &Candidate,
    status: u16,
    raw_body: &str,
    parsed: &Value,
) -> Response {
    let status_code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    if candidate.target_format == source {
        let body: Value = serde_json::from_str(raw_body).unwrap_or_else(|_| parsed.clone());
        return (status_code, Json(body)).into_response();
    }
    let message = parsed
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|v| v.as_str())
        .unwrap_or(raw_body)
        .to_string();
    let envelope = match source {
        Dialect::Claude => json!({ "type": "error", "error": { "type": "api_error", "message": message } }),
        Dialect::Openai => json!({ "error": { "message": message, "type": "api_error" } }),
    };
    (status_code, Json(envelope)).into_response()
}

fn synthesized_unavailable(source: Dialect, attempted: &[String]) -> Response {
    let message = format!("All providers failed. {}", attempted.join(", "));
    let envelope = match source {
        Dialect::Claude => json!({ "type": "error", "error": { "type": "api_error", "message": message } }),
        Dialect::Openai => json!({ "error": { "message": message, "type": "api_error" } }),
    };
    (StatusCode::SERVICE_UNAVAILABLE, Json(envelope)).into_response()
}

async fn build_success_response(
    source: Dialect,
    candidate: &Candidate,
    is_streaming: bool,
    adapter_resp: AdapterResponse,
) -> Response {
    let translation_needed = candidate.target_format != source;

    if is_streaming {
        let mut headers = adapter_resp.headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("text/event-stream"),
        );
        headers.insert(
            axum::http::header::CACHE_CONTROL,
            axum::http::HeaderValue::from_static("no-cache"),
        );
        headers.insert(
            axum::http::header::CONNECTION,
            axum::http::HeaderValue::from_static("keep-alive"),
        );

        let model = candidate.request_model_id.clone();
        let source_format = candidate.target_format;
        let upstream = adapter_resp.response;
        let mut byte_stream = upstream.bytes_stream();
        let mut sse_buf = SseBuffer::new();
        let mut translator = StreamTranslator::new(source, source_format, &model);

        let out_stream = async_stream::stream! {
            use futures_util::StreamExt;
            while let Some(chunk) = byte_stream.next().await {
                let Ok(chunk) = chunk else { break };
                let text = String::from_utf8_lossy(&chunk).into_owned();
                for event in sse_buf.push_and_drain(&text) {
                    let out = translator.translate(&event);
                    if !out.is_empty() {
                        yield Ok::<_, std::io::Error>(axum::body::Bytes::from(out));
                    }
                }
            }
            let tail = translator.flush();
            if !tail.is_empty() {
                yield Ok::<_, std::io::Error>(axum::body::Bytes::from(tail));
            }
        };

        let mut response = Response::new(Body::from_stream(out_stream));
        *response.headers_mut() = headers;
        return response;
    }

    let status = StatusCode::from_u16(adapter_resp.status).unwrap_or(StatusCode::OK);
    if !translation_needed {
        let mut headers = adapter_resp.headers.clone();
        strip_hop_by_hop(&mut headers);
        let bytes = adapter_resp.response.bytes().await.unwrap_or_default();
        let mut response = (status, bytes).into_response();
        *response.headers_mut() = headers;
        return response;
    }

    let text = adapter_resp.response.text().await.unwrap_or_default();
    let Ok(parsed) = serde_json::from_str::<Value>(&text) else {
        let envelope = json!({ "error": { "message": "Provider returned invalid JSON.", "type": "api_error" } });
        return (StatusCode::BAD_GATEWAY, Json(envelope)).into_response();
    };
    let translated = match source {
        Dialect::Claude => translate::openai_response_to_claude(&parsed, &candidate.request_model_id),
        Dialect::Openai => translate::claude_response_to_openai(&parsed, &candidate.request_model_id),
    };
    (status, Json(translated)).into_response()
}

/// Attempt one candidate up to `origin_retry_attempts` times. Returns
/// `Ok(response)` on success (caller should short-circuit the whole
/// dispatch), or `Err((classification, response))` describing the final
/// failure for this candidate along with the response to use if no later
/// candidate succeeds.
async fn attempt_candidate(
    source: Dialect,
    candidate: &Candidate,
    translated_body: &Value,
    source_headers: &HeaderMap,
    is_streaming: bool,
    tunables: &Tunables,
) -> Result<Response, (Classification, Response)> {
    let key = candidate.circuit_key();
    let max_attempts = tunables.origin_retry_attempts;

    let mut last: Option<(Classification, Response)> = None;

    for attempt in 1..=max_attempts {
        let headers = adapter::build_headers(candidate, source_headers, translated_body);
        match adapter::send(candidate, headers, translated_body, tunables.upstream_timeout_ms).await {
            Err(_) => {
                let classification = classify::classify(&AttemptOutcome::Network, tunables);
                if classification.retry_origin && attempt < max_attempts {
                    tokio::time::sleep(std::time::Duration::from_millis(retry_delay_ms(
                        attempt, tunables,
                    )))
                    .await;
                    continue;
                }
                if classify::counts_toward_circuit(classification.category) {
                    circuit::mark_failure(
                        &key,
                        tunables.fallback_circuit_failures,
                        tunables.fallback_circuit_cooldown_ms,
                        None,
                    );
                }
                if classification.origin_cooldown_ms > 0 {
                    circuit::set_cooldown(&key, classification.origin_cooldown_ms, None);
                }
                let response = synthesized_unavailable(source, &[candidate.request_model_id.clone()]);
                last = Some((classification, response));
                break;
            }
            Ok(adapter_resp) => {
                if (200..300).contains(&adapter_resp.status) {
                    circuit::mark_success(&key);
                    return Ok(build_success_response(source, candidate, is_streaming, adapter_resp).await);
                }

                let retry_after = retry_after_ms(&adapter_resp.headers);
                let status = adapter_resp.status;
                let headers_snapshot = adapter_resp.headers.clone();
                let raw_body = adapter_resp.response.text().await.unwrap_or_default();
                let parsed: Value = serde_json::from_str(&raw_body).unwrap_or(json!({}));
                let classification = classify::classify(
                    &AttemptOutcome::Http {
                        status,
                        body: &parsed,
                        raw_body: &raw_body,
                        retry_after_ms: retry_after,
                    },
                    tunables,
                );
                let response = build_failure_response(source, candidate, status, &raw_body, &parsed);
                let _ = headers_snapshot;

                if classification.retry_origin && attempt < max_attempts {
                    last = Some((classification, response));
                    tokio::time::sleep(std::time::Duration::from_millis(retry_delay_ms(
                        attempt, tunables,
                    )))
                    .await;
                    continue;
                }

                if classify::counts_toward_circuit(classification.category) {
                    circuit::mark_failure(
                        &key,
                        tunables.fallback_circuit_failures,
                        tunables.fallback_circuit_cooldown_ms,
                        Some(status),
                    );
                }
                if classification.origin_cooldown_ms > 0 {
                    circuit::set_cooldown(&key, classification.origin_cooldown_ms, Some(status));
                }
                last = Some((classification, response));
                break;
            }
        }
    }

    let (classification, response) = last.expect("at least one attempt always runs");
    Err((classification, response))
}

/// Run the full fallback chain for one request.
pub async fn dispatch(
    source: Dialect,
    body: &Value,
    is_streaming: bool,
    candidates: Vec<Candidate>,
    source_headers: &HeaderMap,
    tunables: &Tunables,
) -> Response {
    let ordered = circuit::reorder(candidates, |c| c.circuit_key());
    let mut last_failure: Option<Response> = None;
    let mut attempted = Vec::new();

    for candidate in &ordered {
        attempted.push(candidate.request_model_id.clone());

        let translated = match translate::translate_request(source, candidate.target_format, body) {
            Ok(mut b) => {
                if let Some(obj) = b.as_object_mut() {
                    obj.insert("model".to_string(), Value::String(candidate.backend.clone()));
                    obj.insert("stream".to_string(), Value::Bool(is_streaming));
                }
                apply_cache_hint(source, candidate.target_format, body, source_headers, &mut b);
                b
            }
            Err(e) => {
                return e.into_response();
            }
        };

        match attempt_candidate(
            source,
            candidate,
            &translated,
            source_headers,
            is_streaming,
            tunables,
        )
        .await
        {
            Ok(response) => return response,
            Err((classification, response)) => {
                if !classification.allow_fallback {
                    return response;
                }
                last_failure = Some(response);
            }
        }
    }

    last_failure.unwrap_or_else(|| synthesized_unavailable(source, &attempted))
}

fn apply_cache_hint(
    source: Dialect,
    target: Dialect,
    source_body: &Value,
    source_headers: &HeaderMap,
    target_body: &mut Value,
) {
    match (source, target) {
        (Dialect::Claude, Dialect::Openai) => {
            cache_hint::map_claude_to_openai(
                source_body,
                source_headers,
                target_body.get("model").and_then(|v| v.as_str()).unwrap_or(""),
                target_body,
            );
        }
        (Dialect::Openai, Dialect::Claude) => {
            cache_hint::map_openai_to_claude(source_body, target_body);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_is_bounded_by_max() {
        let t = Tunables::defaults();
        for attempt in 1..=5 {
            let d = retry_delay_ms(attempt, &t);
            assert!(d <= t.origin_retry_max_delay_ms);
        }
    }

    #[test]
    fn retry_after_header_converts_seconds_to_ms() {
        let mut h = HeaderMap::new();
        h.insert("retry-after", "2".parse().unwrap());
        assert_eq!(retry_after_ms(&h), Some(2000));
    }
}
