//! Front gate (§4.1): CORS, client IP allowlist, body size limit, and
//! master-key auth, implemented as an ordered stack of small `axum`
//! middleware functions, the way the teacher's `forward/middleware.rs`
//! layers `middleware::from_fn` rather than one monolithic handler.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;

use crate::error::GatewayError;
use crate::state::AppState;

/// Normalize a client IP: strip a bracketed IPv6 port suffix, the
/// `::ffff:` IPv4-mapped prefix, an IPv6 zone id, and lowercase.
fn normalize_ip(raw: &str) -> String {
    let mut s = raw.trim();
    if let Some(stripped) = s.strip_prefix('[') {
        if let Some(end) = stripped.find(']') {
            s = &stripped[..end];
        }
    } else if let Some(colon) = s.rfind(':') {
        if s[..colon].matches(':').count() == 0 && s.matches('.').count() == 3 {
            s = &s[..colon];
        }
    }
    let s = s.split('%').next().unwrap_or(s);
    let s = s.strip_prefix("::ffff:").unwrap_or(s);
    s.to_ascii_lowercase()
}

fn client_ip(headers: &HeaderMap, peer: Option<&str>) -> Option<String> {
    let from_header = |name: &str| -> Option<String> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
            .filter(|s| !s.is_empty())
    };
    from_header("cf-connecting-ip")
        .or_else(|| from_header("x-real-ip"))
        .or_else(|| from_header("x-forwarded-for"))
        .or_else(|| peer.map(|s| s.to_string()))
        .map(|s| normalize_ip(&s))
}

pub async fn ip_allowlist(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let cfg = state.config.load();
    let allowlist = &cfg.gate.ip_allowlist;
    if allowlist.is_empty() || allowlist.iter().any(|e| e == "*") {
        return next.run(req).await;
    }
    let ip = client_ip(req.headers(), Some(&peer.ip().to_string()));
    let allowed = ip
        .as_deref()
        .map(|ip| allowlist.iter().any(|e| normalize_ip(e) == ip))
        .unwrap_or(false);
    if allowed {
        next.run(req).await
    } else {
        GatewayError::Forbidden("client IP not allowlisted".to_string()).into_response()
    }
}

fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(v) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(bearer) = v.strip_prefix("Bearer ") {
            return Some(bearer.to_string());
        }
        return Some(v.to_string());
    }
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Timing-independent equality, but `ConstantTimeEq` requires equal-length
/// slices; unequal lengths are themselves not length-hidden (matching §8's
/// "timing-independent for equal lengths" scope).
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

pub async fn auth(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return next.run(req).await;
    }
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }
    let cfg = state.config.load();
    if cfg.gate.ignore_auth && cfg.master_key.is_none() {
        return next.run(req).await;
    }
    let Some(expected) = &cfg.master_key else {
        return GatewayError::Configuration("masterKey is not set".to_string()).into_response();
    };
    match extract_token(req.headers()) {
        Some(token) if constant_time_eq(&token, expected) => next.run(req).await,
        _ => GatewayError::Unauthorized.into_response(),
    }
}

pub async fn body_limit(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let max = state.tunables.max_request_body_bytes;
    if let Some(len) = req
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        if len > max {
            return GatewayError::BodyTooLarge.into_response();
        }
    }
    let (parts, body) = req.into_parts();
    match axum::body::to_bytes(body, max as usize).await {
        Ok(bytes) => {
            let req = Request::from_parts(parts, Body::from(bytes));
            next.run(req).await
        }
        Err(_) => GatewayError::BodyTooLarge.into_response(),
    }
}

/// CORS decision for one request: which header values (if any) to attach.
pub struct CorsDecision {
    pub allow_origin: Option<HeaderValue>,
    pub vary_origin: bool,
}

pub fn decide_cors(origin: Option<&str>, allowed: &[String], allow_all: bool) -> CorsDecision {
    if allow_all {
        return CorsDecision {
            allow_origin: Some(HeaderValue::from_static("*")),
            vary_origin: false,
        };
    }
    let Some(origin) = origin else {
        return CorsDecision { allow_origin: None, vary_origin: false };
    };
    if allowed.iter().any(|o| o == origin) {
        CorsDecision {
            allow_origin: HeaderValue::from_str(origin).ok(),
            vary_origin: true,
        }
    } else {
        CorsDecision { allow_origin: None, vary_origin: false }
    }
}

pub async fn cors(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let cfg = state.config.load();
    let origin = req
        .headers()
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let is_preflight = req.method() == Method::OPTIONS;

    let decision = decide_cors(origin.as_deref(), &cfg.gate.cors_allowed_origins, cfg.gate.cors_allow_all);

    let mut response = if is_preflight {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    if let Some(v) = decision.allow_origin {
        headers.insert("access-control-allow-origin", v);
    }
    if decision.vary_origin {
        headers.insert("vary", HeaderValue::from_static("Origin"));
    }
    if is_preflight {
        headers.insert(
            "access-control-allow-methods",
            HeaderValue::from_static("GET, POST, OPTIONS"),
        );
        headers.insert(
            "access-control-allow-headers",
            HeaderValue::from_static("Content-Type, Authorization, x-api-key, anthropic-version"),
        );
        headers.insert("access-control-max-age", HeaderValue::from_static("600"));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_ipv4_mapped_ipv6() {
        assert_eq!(normalize_ip("::ffff:192.168.1.1"), "192.168.1.1");
    }

    #[test]
    fn normalizes_bracketed_ipv6_with_port() {
        assert_eq!(normalize_ip("[2001:db8::1]:443"), "2001:db8::1");
    }

    #[test]
    fn strips_ipv6_zone() {
        assert_eq!(normalize_ip("fe80::1%eth0"), "fe80::1");
    }

    #[test]
    fn constant_time_eq_rejects_different_length() {
        assert!(!constant_time_eq("abc", "ab"));
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
    }

    #[test]
    fn cors_allow_all_sets_wildcard_without_vary() {
        let d = decide_cors(Some("https://a"), &[], true);
        assert_eq!(d.allow_origin.unwrap(), "*");
        assert!(!d.vary_origin);
    }

    #[test]
    fn cors_matches_specific_origin_with_vary() {
        let allowed = vec!["https://a".to_string()];
        let d = decide_cors(Some("https://a"), &allowed, false);
        assert_eq!(d.allow_origin.unwrap(), "https://a");
        assert!(d.vary_origin);
    }

    #[test]
    fn cors_no_match_omits_header() {
        let allowed = vec!["https://a".to_string()];
        let d = decide_cors(Some("https://b"), &allowed, false);
        assert!(d.allow_origin.is_none());
    }
}
