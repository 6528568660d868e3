// API request handlers

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};
use tracing::Instrument;

use super::streaming::{self, StreamRelay};
use super::AppState;
use crate::error::ProxyError;
use crate::proxy::schema::ModelsResponse;
use crate::proxy::translator::translate_response;
use crate::proxy::upstream::UpstreamBody;

// Root endpoint
pub async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": "Chat Relay",
        "provider": state.config.provider.name,
        "endpoints": [
            "POST /v1/chat/completions",
            "GET /v1/models"
        ]
    }))
}

pub async fn openai_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(state.translator.router().models_response())
}

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("chat_completion", %request_id);
    async move {
        match forward_chat(state, headers, body).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(status = e.status().as_u16(), "request failed: {}", e);
                e.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

async fn forward_chat(
    state: AppState,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let request = state.translator.decode(&body)?;
    tracing::info!(
        model = %request.model,
        stream = request.stream,
        messages = request.messages.len(),
        "chat completion request"
    );

    let translated = state.translator.translate(request)?;
    let result = state.invoker.send(&translated.request, &headers).await?;

    match result.body {
        UpstreamBody::Streaming(upstream) => {
            let (tx, rx) = streaming::client_channel();
            let relay = StreamRelay::new(state.config.heartbeat_interval);
            let cancel = state.shutdown.child_token();
            tokio::spawn(
                async move {
                    relay.run(upstream, tx, cancel).await;
                }
                .instrument(tracing::Span::current()),
            );
            Ok(streaming::sse_response(result.status, rx))
        }
        UpstreamBody::Buffered(bytes) => {
            let response = translate_response(&bytes, &translated.alias)?;
            tracing::info!(
                choices = response.choices.len(),
                total_tokens = response.usage.total_tokens,
                "chat completion done"
            );
            Ok((result.status, Json(response)).into_response())
        }
    }
}
