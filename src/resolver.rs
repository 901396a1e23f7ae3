//! Model resolution (§4.3): turns a `requestedModel` string plus the source
//! dialect into a primary candidate and an ordered fallback chain.

use std::collections::HashSet;

use crate::dialect::Dialect;
use crate::error::GatewayError;
use crate::model::{Candidate, ModelEntry, Provider, RuntimeConfig};

pub struct Resolution {
    pub primary: Candidate,
    pub fallbacks: Vec<Candidate>,
    pub resolved_model: String,
}

pub(crate) fn provider_model_formats(provider: &Provider, model: &ModelEntry) -> Vec<Dialect> {
    match &model.formats {
        Some(formats) => provider
            .formats
            .iter()
            .copied()
            .filter(|f| formats.contains(f))
            .collect(),
        None => provider.formats.clone(),
    }
}

fn pick_target_format(provider: &Provider, model: &ModelEntry, source: Dialect) -> Option<Dialect> {
    let supported = provider_model_formats(provider, model);
    if supported.is_empty() {
        return None;
    }
    if supported.contains(&source) {
        return Some(source);
    }
    if supported.len() == 1 {
        return Some(supported[0]);
    }
    if let Some(preferred) = provider.format {
        if supported.contains(&preferred) {
            return Some(preferred);
        }
    }
    if supported.contains(&Dialect::Openai) {
        return Some(Dialect::Openai);
    }
    Some(supported[0])
}

fn build_candidate(
    cfg: &RuntimeConfig,
    provider_id: &str,
    model_id: &str,
    source: Dialect,
) -> Option<Candidate> {
    let provider = cfg.find_provider(provider_id)?;
    let model = provider.find_model(model_id)?;
    let target_format = pick_target_format(provider, model, source)?;
    Some(Candidate {
        provider_id: provider.id.clone(),
        model_id: model.id.clone(),
        backend: model.id.clone(),
        target_format,
        request_model_id: format!("{}/{}", provider.id, model.id),
        provider: provider.clone(),
    })
}

fn split_reference(reference: &str) -> Result<(&str, &str), GatewayError> {
    reference.split_once('/').ok_or_else(|| {
        GatewayError::InvalidRequest("Model must use the 'provider/model' convention.".to_string())
    })
}

/// Resolve `requested_model` (already normalized: empty/"smart" handling is
/// the caller's job) into a primary candidate plus ordered, deduplicated
/// fallback candidates.
pub fn resolve(
    cfg: &RuntimeConfig,
    requested_model: &str,
    source: Dialect,
) -> Result<Resolution, GatewayError> {
    let (provider_id, model_id) = split_reference(requested_model)?;

    let provider = cfg
        .find_provider(provider_id)
        .ok_or_else(|| GatewayError::NotFound(format!("{requested_model} not found")))?;
    let model = provider
        .find_model(model_id)
        .ok_or_else(|| GatewayError::NotFound(format!("{requested_model} not found")))?;

    if model.formats.is_some() && provider_model_formats(provider, model).is_empty() {
        return Err(GatewayError::InvalidRequest(format!(
            "model '{model_id}' does not support any of provider '{provider_id}' formats"
        )));
    }

    let primary = build_candidate(cfg, provider_id, model_id, source)
        .ok_or_else(|| GatewayError::NotFound(format!("{requested_model} not found")))?;

    let mut seen = HashSet::new();
    seen.insert(primary.request_model_id.clone());

    let mut fallbacks = Vec::new();
    for reference in &model.fallback_models {
        let Ok((fb_provider, fb_model)) = split_reference(reference) else {
            continue;
        };
        let Some(candidate) = build_candidate(cfg, fb_provider, fb_model, source) else {
            continue;
        };
        if seen.insert(candidate.request_model_id.clone()) {
            fallbacks.push(candidate);
        }
    }

    Ok(Resolution {
        resolved_model: primary.request_model_id.clone(),
        primary,
        fallbacks,
    })
}

/// Normalize the requested model: empty/"smart" maps to `defaultModel` if
/// set, else passes "smart" through unchanged (§4.3 input rule).
pub fn normalize_requested_model<'a>(raw: &'a str, cfg: &'a RuntimeConfig) -> &'a str {
    if raw.is_empty() || raw.eq_ignore_ascii_case("smart") {
        cfg.default_model.as_deref().unwrap_or("smart")
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelEntry;

    fn cfg_with_fallback() -> RuntimeConfig {
        let primary_model = ModelEntry {
            id: "gpt-x".to_string(),
            enabled: true,
            fallback_models: vec![
                "or2/gpt-y".to_string(),
                "missing/nope".to_string(),
                "or/gpt-x".to_string(), // duplicate of primary, must be skipped
            ],
            ..Default::default()
        };
        let provider1 = Provider {
            id: "or".to_string(),
            enabled: true,
            formats: vec![Dialect::Openai],
            models: vec![primary_model],
            ..Default::default()
        };
        let provider2 = Provider {
            id: "or2".to_string(),
            enabled: true,
            formats: vec![Dialect::Openai],
            models: vec![ModelEntry {
                id: "gpt-y".to_string(),
                enabled: true,
                ..Default::default()
            }],
            ..Default::default()
        };
        RuntimeConfig {
            providers: vec![provider1, provider2],
            ..Default::default()
        }
    }

    #[test]
    fn resolves_primary_and_fallback_chain() {
        let cfg = cfg_with_fallback();
        let res = resolve(&cfg, "or/gpt-x", Dialect::Openai).unwrap();
        assert_eq!(res.resolved_model, "or/gpt-x");
        assert_eq!(res.fallbacks.len(), 1);
        assert_eq!(res.fallbacks[0].request_model_id, "or2/gpt-y");
    }

    #[test]
    fn rejects_bad_model_string_shape() {
        let cfg = cfg_with_fallback();
        let err = resolve(&cfg, "not-a-slash-form", Dialect::Openai).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[test]
    fn target_format_falls_back_when_source_unsupported() {
        let cfg = cfg_with_fallback();
        let res = resolve(&cfg, "or/gpt-x", Dialect::Claude).unwrap();
        assert_eq!(res.primary.target_format, Dialect::Openai);
    }

    #[test]
    fn unknown_provider_is_not_found() {
        let cfg = cfg_with_fallback();
        assert!(resolve(&cfg, "ghost/model", Dialect::Openai).is_err());
    }
}
