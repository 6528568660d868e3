// HTTP API Server module

use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Body,
    extract::State,
    http::{header, Method, Request},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::RelayConfig;
use crate::error::ProxyError;
use crate::proxy::translator::RequestTranslator;
use crate::proxy::upstream::UpstreamInvoker;

mod handlers;
pub mod streaming;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub translator: Arc<RequestTranslator>,
    pub invoker: UpstreamInvoker,
    /// Parent of every relay's cancellation token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: RelayConfig, shutdown: CancellationToken) -> Result<Self> {
        let translator = RequestTranslator::new(&config);
        let invoker = UpstreamInvoker::new(&config)?;
        Ok(Self {
            config: Arc::new(config),
            translator: Arc::new(translator),
            invoker,
            shutdown,
        })
    }
}

/// API Key authentication middleware
async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // If no API keys configured, allow all requests
    if state.config.api_keys.is_empty() {
        return next.run(request).await;
    }

    let is_valid = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(|key| state.config.api_keys.iter().any(|k| k == key.trim()))
        .unwrap_or(false);

    if is_valid {
        next.run(request).await
    } else {
        tracing::warn!("Rejected request with missing or invalid API key");
        ProxyError::Unauthorized.into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    // Routes that require API key authentication
    let protected_routes = Router::new()
        .route("/v1/models", get(handlers::openai_models))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Routes that don't require authentication
    let public_routes = Router::new().route("/", get(handlers::root));

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn start_server(config: RelayConfig) -> Result<()> {
    let addr = config.listen_addr.clone();
    let shutdown = CancellationToken::new();
    let state = AppState::new(config, shutdown.clone())?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            tracing::info!("Shutdown requested, closing open streams");
            shutdown.cancel();
        })
        .await?;

    tracing::info!("API server stopped");
    Ok(())
}
