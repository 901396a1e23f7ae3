//! Env-driven tunables (§5). Each has a default and a clamped valid range.

fn env_u64(name: &str, default: u64, min: u64, max: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(|v| v.clamp(min, max))
        .unwrap_or(default)
}

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32, min: u32, max: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .map(|v| v.clamp(min, max))
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

#[derive(Debug, Clone, Copy)]
pub struct Tunables {
    pub max_request_body_bytes: u64,
    pub upstream_timeout_ms: u64,
    pub origin_retry_attempts: u32,
    pub origin_retry_base_delay_ms: u64,
    pub origin_retry_max_delay_ms: u64,
    pub origin_fallback_cooldown_ms: i64,
    pub origin_rate_limit_cooldown_ms: i64,
    pub origin_billing_cooldown_ms: i64,
    pub origin_auth_cooldown_ms: i64,
    pub origin_policy_cooldown_ms: i64,
    pub allow_policy_fallback: bool,
    pub fallback_circuit_failures: u32,
    pub fallback_circuit_cooldown_ms: i64,
}

impl Tunables {
    pub fn defaults() -> Self {
        Tunables {
            max_request_body_bytes: 1024 * 1024,
            upstream_timeout_ms: 60_000,
            origin_retry_attempts: 3,
            origin_retry_base_delay_ms: 250,
            origin_retry_max_delay_ms: 3000,
            origin_fallback_cooldown_ms: 45_000,
            origin_rate_limit_cooldown_ms: 30_000,
            origin_billing_cooldown_ms: 900_000,
            origin_auth_cooldown_ms: 600_000,
            origin_policy_cooldown_ms: 120_000,
            allow_policy_fallback: false,
            fallback_circuit_failures: 2,
            fallback_circuit_cooldown_ms: 30_000,
        }
    }

    /// Read from the environment, falling back to [`Tunables::defaults`] per
    /// field and clamping into the documented valid range.
    pub fn from_env() -> Self {
        let d = Self::defaults();
        Tunables {
            max_request_body_bytes: env_u64(
                "LLM_ROUTER_MAX_REQUEST_BODY_BYTES",
                d.max_request_body_bytes,
                4 * 1024,
                20 * 1024 * 1024,
            ),
            upstream_timeout_ms: env_u64(
                "LLM_ROUTER_UPSTREAM_TIMEOUT_MS",
                d.upstream_timeout_ms,
                1_000,
                300_000,
            ),
            origin_retry_attempts: env_u32(
                "LLM_ROUTER_ORIGIN_RETRY_ATTEMPTS",
                d.origin_retry_attempts,
                1,
                10,
            ),
            origin_retry_base_delay_ms: env_u64(
                "LLM_ROUTER_ORIGIN_RETRY_BASE_DELAY_MS",
                d.origin_retry_base_delay_ms,
                0,
                u64::MAX,
            ),
            origin_retry_max_delay_ms: env_u64(
                "LLM_ROUTER_ORIGIN_RETRY_MAX_DELAY_MS",
                d.origin_retry_max_delay_ms,
                0,
                u64::MAX,
            ),
            origin_fallback_cooldown_ms: env_i64(
                "LLM_ROUTER_ORIGIN_FALLBACK_COOLDOWN_MS",
                d.origin_fallback_cooldown_ms,
            ),
            origin_rate_limit_cooldown_ms: env_i64(
                "LLM_ROUTER_ORIGIN_RATE_LIMIT_COOLDOWN_MS",
                d.origin_rate_limit_cooldown_ms,
            ),
            origin_billing_cooldown_ms: env_i64(
                "LLM_ROUTER_ORIGIN_BILLING_COOLDOWN_MS",
                d.origin_billing_cooldown_ms,
            ),
            origin_auth_cooldown_ms: env_i64(
                "LLM_ROUTER_ORIGIN_AUTH_COOLDOWN_MS",
                d.origin_auth_cooldown_ms,
            ),
            origin_policy_cooldown_ms: env_i64(
                "LLM_ROUTER_ORIGIN_POLICY_COOLDOWN_MS",
                d.origin_policy_cooldown_ms,
            ),
            allow_policy_fallback: env_bool(
                "LLM_ROUTER_ALLOW_POLICY_FALLBACK",
                d.allow_policy_fallback,
            ),
            fallback_circuit_failures: env_u32(
                "LLM_ROUTER_FALLBACK_CIRCUIT_FAILURES",
                d.fallback_circuit_failures,
                1,
                100,
            ),
            fallback_circuit_cooldown_ms: env_i64(
                "LLM_ROUTER_FALLBACK_CIRCUIT_COOLDOWN_MS",
                d.fallback_circuit_cooldown_ms,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let t = Tunables::defaults();
        assert_eq!(t.max_request_body_bytes, 1024 * 1024);
        assert_eq!(t.origin_retry_attempts, 3);
        assert_eq!(t.origin_billing_cooldown_ms, 900_000);
    }

    #[test]
    fn env_u64_clamps_into_range() {
        assert_eq!(env_u64("LLM_ROUTER_TEST_NONEXISTENT_XYZ", 10, 5, 20), 10);
    }
}
