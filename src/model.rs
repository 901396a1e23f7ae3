//! Runtime config data model: providers, models, aliases, and the derived
//! candidate/circuit-key types the resolver and dispatcher operate on.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;

/// One of the four auth shapes a provider (or a provider's per-dialect
/// override) may use when calling upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AuthMode {
    Bearer,
    XApiKey,
    Header { name: String, prefix: Option<String> },
    None,
}

impl AuthMode {
    pub fn default_for(dialect: Dialect) -> Self {
        match dialect {
            Dialect::Openai => AuthMode::Bearer,
            Dialect::Claude => AuthMode::XApiKey,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RateLimitBucket {
    pub models: Vec<String>,
    pub requests: u64,
    pub window_unit: String,
    pub window_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub aliases: Vec<String>,
    pub formats: Option<Vec<Dialect>>,
    pub fallback_models: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Provider {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub base_url: String,
    pub base_url_by_format: HashMap<Dialect, String>,
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    pub auth: Option<AuthMode>,
    pub auth_by_format: HashMap<Dialect, AuthMode>,
    pub formats: Vec<Dialect>,
    pub format: Option<Dialect>,
    pub headers: HashMap<String, String>,
    pub anthropic_version: Option<String>,
    pub anthropic_beta: Option<String>,
    pub models: Vec<ModelEntry>,
    pub rate_limits: Vec<RateLimitBucket>,
}

impl Provider {
    pub fn find_model(&self, model_id: &str) -> Option<&ModelEntry> {
        self.models
            .iter()
            .find(|m| m.enabled && (m.id == model_id || m.aliases.iter().any(|a| a == model_id)))
    }

    /// Resolve the API key to use at dispatch time: the plain value if set,
    /// otherwise the named environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = &self.api_key {
            if !k.is_empty() {
                return Some(k.clone());
            }
        }
        self.api_key_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }

    pub fn auth_for(&self, dialect: Dialect) -> AuthMode {
        self.auth_by_format
            .get(&dialect)
            .cloned()
            .or_else(|| self.auth.clone())
            .unwrap_or_else(|| AuthMode::default_for(dialect))
    }

    pub fn base_url_for(&self, dialect: Dialect) -> &str {
        self.base_url_by_format
            .get(&dialect)
            .map(|s| s.as_str())
            .unwrap_or(&self.base_url)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AliasStrategy {
    Auto,
    Ordered,
    RoundRobin,
    WeightedRr,
    QuotaAwareWeightedRr,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModelAlias {
    pub strategy: Option<AliasStrategy>,
    pub targets: Vec<String>,
    pub fallback_targets: Vec<String>,
    pub metadata: Option<serde_json::Value>,
}

pub const CURRENT_CONFIG_VERSION: i64 = 2;

/// Front-gate network policy (§4.1): CORS allowlist, client IP allowlist,
/// and the worker-mode/local-mode auth toggle.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GateConfig {
    pub cors_allowed_origins: Vec<String>,
    pub cors_allow_all: bool,
    pub ip_allowlist: Vec<String>,
    pub ignore_auth: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    pub version: i64,
    pub master_key: Option<String>,
    pub default_model: Option<String>,
    pub providers: Vec<Provider>,
    pub model_aliases: HashMap<String, ModelAlias>,
    pub rate_limits: Vec<RateLimitBucket>,
    pub gate: GateConfig,
    pub metadata: Option<serde_json::Value>,
}

impl RuntimeConfig {
    pub fn find_provider(&self, id: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.enabled && p.id == id)
    }
}

/// A `(provider, model, targetFormat)` tuple the dispatcher may call for one
/// request. Derived per-request; never persisted.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub provider_id: String,
    pub model_id: String,
    pub backend: String,
    pub target_format: Dialect,
    pub request_model_id: String,
    pub provider: Provider,
}

impl Candidate {
    /// `"providerId/modelId@targetFormat"` — the circuit-breaker lookup key.
    pub fn circuit_key(&self) -> String {
        format!("{}@{}", self.request_model_id, self.target_format.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_default_follows_dialect() {
        assert_eq!(AuthMode::default_for(Dialect::Openai), AuthMode::Bearer);
        assert_eq!(AuthMode::default_for(Dialect::Claude), AuthMode::XApiKey);
    }

    #[test]
    fn resolve_api_key_prefers_plain_value() {
        let p = Provider {
            api_key: Some("sk-plain".to_string()),
            api_key_env: Some("SOME_NONEXISTENT_VAR_XYZ".to_string()),
            ..Default::default()
        };
        assert_eq!(p.resolve_api_key().as_deref(), Some("sk-plain"));
    }

    #[test]
    fn find_model_matches_alias() {
        let p = Provider {
            models: vec![ModelEntry {
                id: "gpt-x".to_string(),
                enabled: true,
                aliases: vec!["gx".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(p.find_model("gx").is_some());
        assert!(p.find_model("missing").is_none());
    }
}
