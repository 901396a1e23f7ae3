//! Provider call adapter (§4.5): URL/header construction, cache-hint and
//! auth application, and the outbound HTTP call itself. Grounded on the
//! teacher's `forward/client.rs` (`default_client`/`streaming_client`) and
//! `forward/handlers/*` (`build_headers`/`build_url`).

use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde_json::Value;

use crate::cache_hint::propagate_headers;
use crate::dialect::Dialect;
use crate::model::{AuthMode, Candidate};

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .build()
        .expect("reqwest client must build with default TLS backend")
});

fn provider_path(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Openai => "/chat/completions",
        Dialect::Claude => "/messages",
    }
}

/// True if the base URL's last path segment is an API version marker
/// (`v1`, `v2`, `v1beta`, ...).
fn has_version_suffix(base: &str) -> bool {
    let Some(last) = base.rsplit('/').next() else {
        return false;
    };
    let mut chars = last.chars();
    if chars.next() != Some('v') {
        return false;
    }
    chars.take_while(|c| c.is_ascii_digit()).count() > 0
}

/// `base_url` (trimmed of a trailing slash) plus the dialect-appropriate
/// path (§4.5 step 5): if the base already ends in the target path this is
/// a no-op, if it ends in a version segment (`/v1`, `/v1beta`, ...) the path
/// is appended directly, otherwise `/v1` is inserted first.
pub fn build_url(candidate: &Candidate) -> String {
    let base = candidate.provider.base_url_for(candidate.target_format);
    let base = base.trim_end_matches('/');
    let path = provider_path(candidate.target_format);
    if base.ends_with(path) {
        return base.to_string();
    }
    if has_version_suffix(base) {
        format!("{base}{path}")
    } else {
        format!("{base}/v1{path}")
    }
}

fn apply_auth(headers: &mut HeaderMap, candidate: &Candidate) {
    let Some(key) = candidate.provider.resolve_api_key() else {
        return;
    };
    let mode = candidate.provider.auth_for(candidate.target_format);
    match mode {
        AuthMode::Bearer => {
            if let Ok(v) = HeaderValue::from_str(&format!("Bearer {key}")) {
                headers.insert("authorization", v);
            }
        }
        AuthMode::XApiKey => {
            if let Ok(v) = HeaderValue::from_str(&key) {
                headers.insert("x-api-key", v);
            }
        }
        AuthMode::Header { name, prefix } => {
            let value = match &prefix {
                Some(p) => format!("{p}{key}"),
                None => key,
            };
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                headers.insert(name, value);
            }
        }
        AuthMode::None => {}
    }
}

/// Build the full outbound header map for one candidate's call.
pub fn build_headers(
    candidate: &Candidate,
    source_headers: &HeaderMap,
    target_body: &Value,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    apply_auth(&mut headers, candidate);

    if candidate.target_format == Dialect::Claude {
        let version = candidate
            .provider
            .anthropic_version
            .clone()
            .unwrap_or_else(|| "2023-06-01".to_string());
        if let Ok(v) = HeaderValue::from_str(&version) {
            headers.insert("anthropic-version", v);
        }
        if let Some(beta) = &candidate.provider.anthropic_beta {
            if let Ok(v) = HeaderValue::from_str(beta) {
                headers.insert("anthropic-beta", v);
            }
        }
    }

    for (name, value) in &candidate.provider.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }

    propagate_headers(
        source_headers,
        &mut headers,
        candidate.target_format == Dialect::Claude,
    );

    let _ = target_body;
    headers
}

/// Apply the provider's reasoning-effort knob if the candidate's model
/// formats this as a plain passthrough field (both dialects accept
/// `reasoning_effort`/`thinking`, so this only fills in a provider default
/// when the incoming request did not specify one).
pub fn apply_reasoning_default(target_body: &mut Value, default_effort: Option<&str>) {
    let Some(effort) = default_effort else {
        return;
    };
    let Some(obj) = target_body.as_object_mut() else {
        return;
    };
    if !obj.contains_key("reasoning_effort") && !obj.contains_key("thinking") {
        obj.insert(
            "reasoning_effort".to_string(),
            Value::String(effort.to_string()),
        );
    }
}

pub struct AdapterResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub response: reqwest::Response,
}

/// Issue the outbound call. Streaming vs. non-streaming is the caller's
/// concern (it decides how to consume `response`'s body); this only builds
/// the request and applies the shared timeout.
pub async fn send(
    candidate: &Candidate,
    headers: HeaderMap,
    body: &Value,
    timeout_ms: u64,
) -> Result<AdapterResponse, reqwest::Error> {
    let url = build_url(candidate);
    let response = HTTP_CLIENT
        .post(url)
        .headers(headers)
        .timeout(Duration::from_millis(timeout_ms))
        .json(body)
        .send()
        .await?;
    Ok(AdapterResponse {
        status: response.status().as_u16(),
        headers: response.headers().clone(),
        response,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Provider;

    fn candidate_for(provider: Provider, target_format: Dialect) -> Candidate {
        Candidate {
            provider_id: provider.id.clone(),
            model_id: "m".to_string(),
            backend: "m".to_string(),
            target_format,
            request_model_id: format!("{}/m", provider.id),
            provider,
        }
    }

    #[test]
    fn build_url_appends_dialect_path() {
        let provider = Provider {
            id: "or".to_string(),
            base_url: "https://api.example.com/v1".to_string(),
            ..Default::default()
        };
        let c = candidate_for(provider, Dialect::Openai);
        assert_eq!(build_url(&c), "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn build_url_uses_per_format_base() {
        let mut provider = Provider {
            id: "or".to_string(),
            base_url: "https://api.example.com/v1".to_string(),
            ..Default::default()
        };
        provider
            .base_url_by_format
            .insert(Dialect::Claude, "https://api.example.com/anthropic".to_string());
        let c = candidate_for(provider, Dialect::Claude);
        assert_eq!(build_url(&c), "https://api.example.com/anthropic/v1/messages");
    }

    #[test]
    fn build_url_inserts_v1_when_base_has_no_version_suffix() {
        let provider = Provider {
            id: "or".to_string(),
            base_url: "https://api.example.com".to_string(),
            ..Default::default()
        };
        let c = candidate_for(provider, Dialect::Openai);
        assert_eq!(build_url(&c), "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn build_url_is_idempotent_when_base_already_has_full_path() {
        let provider = Provider {
            id: "or".to_string(),
            base_url: "https://api.example.com/v1/chat/completions".to_string(),
            ..Default::default()
        };
        let c = candidate_for(provider, Dialect::Openai);
        assert_eq!(build_url(&c), "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn bearer_auth_sets_authorization_header() {
        let provider = Provider {
            id: "or".to_string(),
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        let c = candidate_for(provider, Dialect::Openai);
        let headers = build_headers(&c, &HeaderMap::new(), &Value::Null);
        assert_eq!(headers.get("authorization").unwrap(), "Bearer sk-test");
    }

    #[test]
    fn xapikey_auth_sets_x_api_key_header() {
        let provider = Provider {
            id: "an".to_string(),
            api_key: Some("sk-ant".to_string()),
            ..Default::default()
        };
        let c = candidate_for(provider, Dialect::Claude);
        let headers = build_headers(&c, &HeaderMap::new(), &Value::Null);
        assert_eq!(headers.get("x-api-key").unwrap(), "sk-ant");
        assert!(headers.contains_key("anthropic-version"));
    }

    #[test]
    fn reasoning_default_does_not_override_explicit_value() {
        let mut body = serde_json::json!({ "reasoning_effort": "high" });
        apply_reasoning_default(&mut body, Some("low"));
        assert_eq!(body["reasoning_effort"], "high");
    }
}
