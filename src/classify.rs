//! Failure classification (§4.6): turns an upstream-derived failure into
//! `{category, retryable, retryOrigin, allowFallback, originCooldownMs}`.

use serde_json::Value;

use crate::env_tunables::Tunables;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    ConfigurationError,
    NotSupportedError,
    NetworkError,
    RateLimited,
    BillingExhausted,
    AuthFailed,
    PolicyBlocked,
    Forbidden,
    NotFound,
    TemporaryError,
    InvalidRequest,
    ClientError,
    UnknownError,
}

#[derive(Debug, Clone, Copy)]
pub struct Classification {
    pub category: FailureCategory,
    pub retryable: bool,
    pub retry_origin: bool,
    pub allow_fallback: bool,
    pub origin_cooldown_ms: i64,
}

const BILLING_HINTS: &[&str] = &[
    "insufficient_quota",
    "insufficient quota",
    "insufficient balance",
    "insufficient credits",
    "not enough credits",
    "out of credits",
    "payment required",
    "billing hard limit",
    "quota exceeded",
];

const AUTH_HINTS: &[&str] = &[
    "invalid api key",
    "incorrect api key",
    "api key not valid",
    "authentication",
    "unauthorized",
    "permission denied",
    "forbidden",
];

const POLICY_HINTS: &[&str] = &[
    "moderation",
    "policy_violation",
    "content policy",
    "safety",
    "unsafe",
    "flagged",
];

/// Case-insensitive substring scan over the hint-bearing fields, capped at
/// the first 4 KiB of the raw body per §4.6/§7.
fn scan_hints(body: &Value, raw_body: &str, hints: &[&str]) -> bool {
    let capped = &raw_body[..raw_body.len().min(4096)];
    let mut haystack = capped.to_ascii_lowercase();
    for field in ["error", "code", "type", "message"] {
        if let Some(v) = body.get(field) {
            haystack.push(' ');
            haystack.push_str(&v.to_string().to_ascii_lowercase());
        }
    }
    if let Some(err) = body.get("error") {
        for field in ["code", "type", "message"] {
            if let Some(v) = err.get(field) {
                haystack.push(' ');
                haystack.push_str(&v.to_string().to_ascii_lowercase());
            }
        }
    }
    hints.iter().any(|h| haystack.contains(h))
}

/// Outcome of one attempt against an upstream, before classification.
pub enum AttemptOutcome<'a> {
    Network,
    Translation,
    Http {
        status: u16,
        body: &'a Value,
        raw_body: &'a str,
        retry_after_ms: Option<i64>,
    },
}

/// Only these three categories increment the circuit breaker's consecutive
/// failure counter (§4.4 "Circuit breaker"); the others set a cooldown
/// directly without counting toward the threshold.
pub fn counts_toward_circuit(category: FailureCategory) -> bool {
    matches!(
        category,
        FailureCategory::TemporaryError | FailureCategory::NetworkError | FailureCategory::RateLimited
    )
}

pub fn classify(outcome: &AttemptOutcome<'_>, tunables: &Tunables) -> Classification {
    match outcome {
        AttemptOutcome::Translation => Classification {
            category: FailureCategory::InvalidRequest,
            retryable: false,
            retry_origin: false,
            allow_fallback: false,
            origin_cooldown_ms: 0,
        },
        AttemptOutcome::Network => Classification {
            category: FailureCategory::NetworkError,
            retryable: true,
            retry_origin: true,
            allow_fallback: true,
            origin_cooldown_ms: 0,
        },
        AttemptOutcome::Http {
            status,
            body,
            raw_body,
            retry_after_ms,
        } => classify_http(*status, body, raw_body, *retry_after_ms, tunables),
    }
}

fn classify_http(
    status: u16,
    body: &Value,
    raw_body: &str,
    retry_after_ms: Option<i64>,
    t: &Tunables,
) -> Classification {
    let with = |category, retryable, retry_origin, allow_fallback, cooldown| Classification {
        category,
        retryable,
        retry_origin,
        allow_fallback,
        origin_cooldown_ms: cooldown,
    };

    match status {
        429 => with(
            FailureCategory::RateLimited,
            true,
            false,
            true,
            retry_after_ms.unwrap_or(t.origin_rate_limit_cooldown_ms),
        ),
        402 => with(
            FailureCategory::BillingExhausted,
            true,
            false,
            true,
            t.origin_billing_cooldown_ms,
        ),
        401 => with(
            FailureCategory::AuthFailed,
            true,
            false,
            true,
            t.origin_auth_cooldown_ms,
        ),
        403 => {
            if scan_hints(body, raw_body, BILLING_HINTS) {
                with(
                    FailureCategory::BillingExhausted,
                    true,
                    false,
                    true,
                    t.origin_billing_cooldown_ms,
                )
            } else if scan_hints(body, raw_body, POLICY_HINTS) {
                with(
                    FailureCategory::PolicyBlocked,
                    true,
                    false,
                    t.allow_policy_fallback,
                    t.origin_policy_cooldown_ms,
                )
            } else if scan_hints(body, raw_body, AUTH_HINTS) {
                with(
                    FailureCategory::AuthFailed,
                    true,
                    false,
                    true,
                    t.origin_auth_cooldown_ms,
                )
            } else {
                with(
                    FailureCategory::Forbidden,
                    true,
                    false,
                    true,
                    t.origin_auth_cooldown_ms,
                )
            }
        }
        404 | 410 => with(
            FailureCategory::NotFound,
            true,
            false,
            true,
            t.origin_fallback_cooldown_ms,
        ),
        408 | 409 => with(
            FailureCategory::TemporaryError,
            true,
            true,
            true,
            retry_after_ms.unwrap_or(0),
        ),
        s if s >= 500 => with(
            FailureCategory::TemporaryError,
            true,
            true,
            true,
            retry_after_ms.unwrap_or(0),
        ),
        400 | 413 | 422 => with(FailureCategory::InvalidRequest, false, false, false, 0),
        s if (400..500).contains(&s) => with(FailureCategory::ClientError, false, false, false, 0),
        _ => with(FailureCategory::UnknownError, false, false, true, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tunables() -> Tunables {
        Tunables::defaults()
    }

    #[test]
    fn rate_limited_uses_retry_after() {
        let body = json!({});
        let c = classify(
            &AttemptOutcome::Http {
                status: 429,
                body: &body,
                raw_body: "",
                retry_after_ms: Some(5000),
            },
            &tunables(),
        );
        assert_eq!(c.category, FailureCategory::RateLimited);
        assert!(c.retryable);
        assert_eq!(c.origin_cooldown_ms, 5000);
    }

    #[test]
    fn billing_exhausted_blocks_origin_retry() {
        let body = json!({"error": {"code": "insufficient_quota"}});
        let c = classify(
            &AttemptOutcome::Http {
                status: 402,
                body: &body,
                raw_body: "{}",
                retry_after_ms: None,
            },
            &tunables(),
        );
        assert_eq!(c.category, FailureCategory::BillingExhausted);
        assert!(!c.retry_origin);
        assert!(c.allow_fallback);
    }

    #[test]
    fn invalid_request_stops_the_chain() {
        let body = json!({"error": {"message": "bad max_tokens"}});
        let c = classify(
            &AttemptOutcome::Http {
                status: 400,
                body: &body,
                raw_body: "{}",
                retry_after_ms: None,
            },
            &tunables(),
        );
        assert_eq!(c.category, FailureCategory::InvalidRequest);
        assert!(!c.allow_fallback);
    }

    #[test]
    fn forbidden_with_billing_hint_in_body_text() {
        let body = json!({});
        let c = classify(
            &AttemptOutcome::Http {
                status: 403,
                body: &body,
                raw_body: "{\"message\":\"quota exceeded for this key\"}",
                retry_after_ms: None,
            },
            &tunables(),
        );
        assert_eq!(c.category, FailureCategory::BillingExhausted);
    }

    #[test]
    fn only_three_categories_count_toward_circuit() {
        assert!(counts_toward_circuit(FailureCategory::TemporaryError));
        assert!(counts_toward_circuit(FailureCategory::NetworkError));
        assert!(counts_toward_circuit(FailureCategory::RateLimited));
        assert!(!counts_toward_circuit(FailureCategory::BillingExhausted));
        assert!(!counts_toward_circuit(FailureCategory::AuthFailed));
        assert!(!counts_toward_circuit(FailureCategory::NotFound));
    }

    #[test]
    fn server_error_is_retryable_origin() {
        let body = json!({});
        let c = classify(
            &AttemptOutcome::Http {
                status: 503,
                body: &body,
                raw_body: "",
                retry_after_ms: None,
            },
            &tunables(),
        );
        assert_eq!(c.category, FailureCategory::TemporaryError);
        assert!(c.retry_origin);
    }
}
