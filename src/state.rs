//! Shared process state (§3.1 "Ambient types"): the atomically-swappable
//! config snapshot plus the tunables and HTTP client handed to every
//! request. Grounded on the `sprklai-mesoclaw` pack repo's `arc-swap`
//! config-snapshot pattern; the teacher itself keeps a single
//! long-lived `Mutex<AppConfig>` (`forward/context.rs`), which this
//! generalizes to lock-free reads on the request hot path.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::ConfigError;
use crate::env_tunables::Tunables;
use crate::model::RuntimeConfig;

/// Handle to the current runtime config. Cloning is cheap (an `Arc` bump);
/// `load()` takes a fresh, consistent snapshot for the lifetime of one
/// request.
#[derive(Clone)]
pub struct RuntimeConfigHandle {
    inner: Arc<ArcSwap<RuntimeConfig>>,
}

impl RuntimeConfigHandle {
    pub fn new(initial: RuntimeConfig) -> Self {
        RuntimeConfigHandle {
            inner: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    pub fn load(&self) -> Arc<RuntimeConfig> {
        self.inner.load_full()
    }

    pub fn store(&self, cfg: RuntimeConfig) {
        self.inner.store(Arc::new(cfg));
    }

    /// Re-read the config from its configured source and swap it in.
    /// Returns the error without mutating state if the reload fails,
    /// matching §9's "bad reload must not take down a healthy process".
    pub fn reload(&self) -> Result<(), ConfigError> {
        let fresh = crate::config::load()?;
        self.store(fresh);
        Ok(())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: RuntimeConfigHandle,
    pub tunables: Tunables,
}

impl AppState {
    pub fn new(config: RuntimeConfig) -> Self {
        AppState {
            config: RuntimeConfigHandle::new(config),
            tunables: Tunables::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_then_load_round_trips() {
        let handle = RuntimeConfigHandle::new(RuntimeConfig::default());
        let mut cfg = RuntimeConfig::default();
        cfg.default_model = Some("or/gpt-x".to_string());
        handle.store(cfg);
        assert_eq!(handle.load().default_model.as_deref(), Some("or/gpt-x"));
    }
}
