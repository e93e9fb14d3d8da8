//! HTTP server implementation for the API

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use futures::stream;
use std::convert::Infallible;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use super::{handlers, models::{ChatBody, FavoriteBody, SummarizeBody, TagBody}};
use crate::service::{DigestService, ServiceError};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DigestService>,
}

/// Configure and start the HTTP server
pub async fn start_http_server(service: Arc<DigestService>, port: u16) -> Result<()> {
    info!("Starting HTTP server on port {}", port);

    let app_state = AppState { service };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    let app = Router::new()
        .route("/api/health", get(health_handler))
        // Summarize + record access
        .route("/api/summarize", post(summarize_handler))
        .route("/api/videos", get(history_handler))
        .route("/api/videos/:id", get(video_handler).delete(delete_handler))
        .route("/api/videos/:id/frames", post(frames_handler))
        .route("/api/videos/:id/favorite", post(favorite_handler))
        .route("/api/videos/:id/chat", post(chat_handler))
        // Tags
        .route("/api/tags", get(list_tags_handler).post(create_tag_handler))
        .route("/api/tags/:tag_id", delete(delete_tag_handler))
        .route(
            "/api/videos/:id/tags/:tag_id",
            post(assign_tag_handler).delete(unassign_tag_handler),
        )
        .with_state(app_state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("API server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, app).await?;

    Ok(())
}

fn error_response(err: ServiceError) -> Response {
    let status = match &err {
        ServiceError::InvalidVideoId(_) => StatusCode::BAD_REQUEST,
        ServiceError::VideoNotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::LlmUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::CaptionsUnavailable(_)
        | ServiceError::SummarizerFailed(_)
        | ServiceError::ChatFailed(_)
        | ServiceError::StreamResolveFailed(_) => StatusCode::BAD_GATEWAY,
        ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({"error": err.to_string()}))).into_response()
}

fn json_result(result: Result<serde_json::Value, ServiceError>) -> Response {
    match result {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(handlers::health_check().await)
}

async fn summarize_handler(
    State(state): State<AppState>,
    Json(body): Json<SummarizeBody>,
) -> Response {
    json_result(handlers::summarize(&state.service, body).await)
}

async fn history_handler(State(state): State<AppState>) -> Response {
    json_result(handlers::history(&state.service).await)
}

async fn video_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    json_result(handlers::get_video(&state.service, &id).await)
}

async fn delete_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    json_result(handlers::delete_video(&state.service, &id).await)
}

async fn frames_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    json_result(handlers::extract_frames(&state.service, &id).await)
}

async fn favorite_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<FavoriteBody>,
) -> Response {
    json_result(handlers::set_favorite(&state.service, &id, body.favorite).await)
}

/// Streaming chat over SSE. Incremental chunks arrive as `message` events;
/// a final `done` event marks end of stream.
async fn chat_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ChatBody>,
) -> Response {
    match state.service.chat(&id, body.message, body.with_frames).await {
        Ok(rx) => {
            let chunks = stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| {
                    let event = match item {
                        Ok(chunk) => Event::default().data(chunk),
                        Err(e) => Event::default().event("error").data(e.to_string()),
                    };
                    (Ok::<Event, Infallible>(event), rx)
                })
            });
            let done = stream::once(async { Ok(Event::default().event("done").data("")) });
            Sse::new(chunks.chain(done))
                .keep_alive(KeepAlive::default())
                .into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn list_tags_handler(State(state): State<AppState>) -> Response {
    json_result(handlers::list_tags(&state.service).await)
}

async fn create_tag_handler(
    State(state): State<AppState>,
    Json(body): Json<TagBody>,
) -> Response {
    json_result(handlers::create_tag(&state.service, &body.name).await)
}

async fn delete_tag_handler(State(state): State<AppState>, Path(tag_id): Path<u64>) -> Response {
    json_result(handlers::delete_tag(&state.service, tag_id).await)
}

async fn assign_tag_handler(
    State(state): State<AppState>,
    Path((id, tag_id)): Path<(String, u64)>,
) -> Response {
    json_result(handlers::assign_tag(&state.service, &id, tag_id).await)
}

async fn unassign_tag_handler(
    State(state): State<AppState>,
    Path((id, tag_id)): Path<(String, u64)>,
) -> Response {
    json_result(handlers::unassign_tag(&state.service, &id, tag_id).await)
}
