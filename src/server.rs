//! Front-gate routing (§4.1): path dispatch to the dialect handlers, plus
//! the gate middleware stack. Grounded on the teacher's `server.rs`
//! `Router` assembly, with the teacher's desktop-UI-backend routes
//! replaced by the gateway's dialect/model routes.

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::{middleware, Router};
use serde_json::{json, Value};

use crate::dialect::{self, Dialect};
use crate::dispatch;
use crate::error::GatewayError;
use crate::gate;
use crate::resolver;
use crate::state::AppState;

async fn health(State(state): State<AppState>) -> Json<Value> {
    let cfg = state.config.load();
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "providers": cfg.providers.len(),
    }))
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "llm-router",
        "paths": [
            "/health",
            "/v1/models", "/models",
            "/openai/v1/models", "/openai/models",
            "/anthropic/v1/models", "/anthropic/models",
            "/anthropic/v1/messages", "/anthropic/messages", "/anthropic", "/messages", "/v1/messages",
            "/openai/v1/chat/completions", "/openai/chat/completions", "/openai", "/chat/completions", "/v1/chat/completions",
            "/", "/v1", "/route", "/router",
        ],
    }))
}

fn model_entries(state: &AppState, filter: Option<Dialect>) -> Value {
    let cfg = state.config.load();
    let mut out = Vec::new();
    for provider in &cfg.providers {
        if !provider.enabled {
            continue;
        }
        for model in &provider.models {
            if !model.enabled {
                continue;
            }
            let formats = resolver::provider_model_formats(provider, model);
            if let Some(want) = filter {
                if !formats.contains(&want) {
                    continue;
                }
            }
            out.push(json!({
                "id": format!("{}/{}", provider.id, model.id),
                "object": "model",
                "owned_by": provider.id,
            }));
        }
    }
    json!({ "object": "list", "data": out })
}

async fn list_models_all(State(state): State<AppState>) -> Json<Value> {
    Json(model_entries(&state, None))
}

async fn list_models_openai(State(state): State<AppState>) -> Json<Value> {
    Json(model_entries(&state, Some(Dialect::Openai)))
}

async fn list_models_claude(State(state): State<AppState>) -> Json<Value> {
    Json(model_entries(&state, Some(Dialect::Claude)))
}

async fn handle_request(source: Dialect, state: AppState, headers: HeaderMap, body: Value) -> Response {
    let cfg = state.config.load();
    let raw_model = body.get("model").and_then(|v| v.as_str()).unwrap_or("");
    let normalized = resolver::normalize_requested_model(raw_model, &cfg);

    let resolution = match resolver::resolve(&cfg, normalized, source) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    let mut candidates = vec![resolution.primary];
    candidates.extend(resolution.fallbacks);
    let is_streaming = dialect::is_streaming_request(&body);

    dispatch::dispatch(source, &body, is_streaming, candidates, &headers, &state.tunables).await
}

async fn openai_route(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::extract::Json<Value>,
) -> Response {
    handle_request(Dialect::Openai, state, headers, body.0).await
}

async fn claude_route(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::extract::Json<Value>,
) -> Response {
    handle_request(Dialect::Claude, state, headers, body.0).await
}

async fn auto_route(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::extract::Json<Value>,
) -> Response {
    let source = dialect::detect_dialect(&headers, &body.0);
    handle_request(source, state, headers, body.0).await
}

async fn not_found() -> Response {
    GatewayError::NotFound("route".to_string())
        .into_response()
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", get(root).post(auto_route))
        .route("/v1/models", get(list_models_all))
        .route("/models", get(list_models_all))
        .route("/openai/v1/models", get(list_models_openai))
        .route("/openai/models", get(list_models_openai))
        .route("/anthropic/v1/models", get(list_models_claude))
        .route("/anthropic/models", get(list_models_claude))
        .route("/anthropic/v1/messages", post(claude_route))
        .route("/anthropic/messages", post(claude_route))
        .route("/anthropic", post(claude_route))
        .route("/messages", post(claude_route))
        .route("/v1/messages", post(claude_route))
        .route("/openai/v1/chat/completions", post(openai_route))
        .route("/openai/chat/completions", post(openai_route))
        .route("/openai", post(openai_route))
        .route("/chat/completions", post(openai_route))
        .route("/v1/chat/completions", post(openai_route))
        .route("/v1", post(auto_route))
        .route("/route", post(auto_route))
        .route("/router", post(auto_route))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), gate::auth))
        .layer(middleware::from_fn_with_state(state.clone(), gate::body_limit))
        .layer(middleware::from_fn_with_state(state.clone(), gate::ip_allowlist))
        .layer(middleware::from_fn_with_state(state.clone(), gate::cors))
        .with_state(state)
}

pub async fn serve(state: AppState) {
    let addr: SocketAddr = std::env::var("LLM_ROUTER_LISTEN_ADDR")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| "127.0.0.1:8787".parse().unwrap());
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    tracing::info!(target: "gateway", "listening on {addr}");
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .unwrap();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!(target: "gateway", "shutdown signal received");
}

pub fn spawn(state: AppState) {
    tokio::spawn(async move { serve(state).await });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelEntry, Provider, RuntimeConfig};

    fn test_state() -> AppState {
        let mut cfg = RuntimeConfig::default();
        cfg.providers.push(Provider {
            id: "or".to_string(),
            enabled: true,
            base_url: "https://example.com".to_string(),
            formats: vec![Dialect::Openai],
            models: vec![ModelEntry {
                id: "gpt-x".to_string(),
                enabled: true,
                ..Default::default()
            }],
            ..Default::default()
        });
        cfg.gate.ignore_auth = true;
        AppState::new(cfg)
    }

    #[tokio::test]
    async fn health_ok() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let a = app(test_state()).into_make_service_with_connect_info::<SocketAddr>();
        let h = tokio::spawn(async move { axum::serve(listener, a).await.unwrap() });
        let url = format!("http://{addr}");
        let r = reqwest::get(format!("{url}/health")).await.unwrap();
        let s = r.json::<serde_json::Value>().await.unwrap();
        assert_eq!(s["status"], "ok");
        h.abort();
    }

    #[tokio::test]
    async fn models_list_filters_by_dialect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let a = app(test_state()).into_make_service_with_connect_info::<SocketAddr>();
        let h = tokio::spawn(async move { axum::serve(listener, a).await.unwrap() });
        let url = format!("http://{addr}");
        let r = reqwest::get(format!("{url}/anthropic/v1/models")).await.unwrap();
        let body = r.json::<serde_json::Value>().await.unwrap();
        assert_eq!(body["data"].as_array().unwrap().len(), 0);
        h.abort();
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let a = app(test_state()).into_make_service_with_connect_info::<SocketAddr>();
        let h = tokio::spawn(async move { axum::serve(listener, a).await.unwrap() });
        let url = format!("http://{addr}");
        let r = reqwest::get(format!("{url}/nope")).await.unwrap();
        assert_eq!(r.status(), 404);
        h.abort();
    }
}
