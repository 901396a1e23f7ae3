//! Per-candidate in-memory circuit breaker state (§3 "Circuit state", §4.4).
//!
//! Process-local, never persisted; keyed by `candidateKey =
//! "providerId/modelId@targetFormat"`. Grounded on the teacher's
//! `once_cell::sync::Lazy<Arc<Mutex<...>>>` shared-state idiom
//! (`forward/limits.rs::LIMIT_STATE`).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;

#[derive(Debug, Clone, Copy, Default)]
pub struct CircuitEntry {
    pub consecutive_retryable_failures: u32,
    pub open_until_epoch_ms: i64,
    pub last_failure_at_epoch_ms: i64,
    pub last_failure_status: Option<u16>,
}

impl CircuitEntry {
    pub fn is_open(&self, now_ms: i64) -> bool {
        self.open_until_epoch_ms > now_ms
    }
}

static CIRCUIT_STATE: Lazy<Mutex<HashMap<String, CircuitEntry>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Snapshot the entry for a candidate key, if any.
pub fn get(key: &str) -> Option<CircuitEntry> {
    CIRCUIT_STATE.lock().unwrap().get(key).copied()
}

/// Clear the entry on success.
pub fn mark_success(key: &str) {
    CIRCUIT_STATE.lock().unwrap().remove(key);
}

/// Record a retryable failure; open the circuit once `failure_threshold` is
/// reached. If the prior window already expired, the counter restarts at 1.
pub fn mark_failure(key: &str, failure_threshold: u32, cooldown_ms: i64, status: Option<u16>) {
    let now = now_ms();
    let mut state = CIRCUIT_STATE.lock().unwrap();
    let entry = state.entry(key.to_string()).or_default();
    if entry.open_until_epoch_ms > 0 && entry.open_until_epoch_ms <= now {
        entry.consecutive_retryable_failures = 0;
    }
    entry.consecutive_retryable_failures += 1;
    entry.last_failure_at_epoch_ms = now;
    entry.last_failure_status = status;
    if entry.consecutive_retryable_failures >= failure_threshold {
        entry.open_until_epoch_ms = now + cooldown_ms;
    }
}

/// Apply a category-specific cooldown additively:
/// `openUntil = max(prev, now + cooldown)`.
pub fn set_cooldown(key: &str, cooldown_ms: i64, status: Option<u16>) {
    if cooldown_ms <= 0 {
        return;
    }
    let now = now_ms();
    let mut state = CIRCUIT_STATE.lock().unwrap();
    let entry = state.entry(key.to_string()).or_default();
    entry.last_failure_at_epoch_ms = now;
    entry.last_failure_status = status;
    entry.open_until_epoch_ms = entry.open_until_epoch_ms.max(now + cooldown_ms);
}

/// Reorder candidate keys: closed circuits first (original order preserved),
/// then open circuits ordered by ascending `openUntil`. Never removes a
/// candidate — the circuit only defers (§4.4 step 2, §9 open question).
pub fn reorder<T>(candidates: Vec<T>, key_of: impl Fn(&T) -> String) -> Vec<T> {
    let now = now_ms();
    let mut closed = Vec::new();
    let mut open = Vec::new();
    for c in candidates {
        let key = key_of(&c);
        match get(&key) {
            Some(entry) if entry.is_open(now) => open.push((entry.open_until_epoch_ms, c)),
            _ => closed.push(c),
        }
    }
    open.sort_by_key(|(until, _)| *until);
    closed.extend(open.into_iter().map(|(_, c)| c));
    closed
}

#[cfg(test)]
pub fn reset_for_tests() {
    CIRCUIT_STATE.lock().unwrap().clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_clears_entry() {
        reset_for_tests();
        let key = "p/m@openai:success";
        mark_failure(key, 2, 1000, Some(500));
        mark_success(key);
        assert!(get(key).is_none());
    }

    #[test]
    fn opens_after_threshold() {
        reset_for_tests();
        let key = "p/m@openai:threshold";
        mark_failure(key, 2, 30_000, Some(500));
        assert!(!get(key).unwrap().is_open(now_ms()));
        mark_failure(key, 2, 30_000, Some(500));
        assert!(get(key).unwrap().is_open(now_ms()));
    }

    #[test]
    fn cooldown_is_additive_not_overwriting() {
        reset_for_tests();
        let key = "p/m@claude:cooldown";
        set_cooldown(key, 10_000, Some(402));
        let first = get(key).unwrap().open_until_epoch_ms;
        set_cooldown(key, 1, Some(402));
        let second = get(key).unwrap().open_until_epoch_ms;
        assert_eq!(first, second, "shorter cooldown must not shrink openUntil");
    }

    #[test]
    fn reorder_places_open_after_closed_by_expiry() {
        reset_for_tests();
        mark_failure("a@openai", 1, 50_000, Some(500));
        mark_failure("b@openai", 1, 10_000, Some(500));
        let order = reorder(vec!["a@openai", "b@openai", "c@openai"], |s| s.to_string());
        assert_eq!(order, vec!["c@openai", "b@openai", "a@openai"]);
    }
}
