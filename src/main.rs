use llm_router::{config, server, state::AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    std::panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());
        tracing::error!(target: "gateway", "panic: {message} at {location}");
    }));

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::error!(target: "gateway", "failed to load config: {err}");
            std::process::exit(1);
        }
    };

    tracing::info!(target: "gateway", "loaded {} provider(s)", cfg.providers.len());

    let state = AppState::new(cfg);
    server::serve(state).await;
}
