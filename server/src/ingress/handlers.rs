//! Ingress HTTP Handler

use axum::{
    body::Bytes,
    extract::{FromRequest, Request, State},
    http::Method,
    Json,
};
use chrono::Utc;
use serde_json::Value;
use tracing::{info, instrument, warn};

use super::auth;
use super::error::IngressError;
use super::types::{normalize_message, BufferApiResponse};
use crate::api::AppState;

/// Accept one chat message and enqueue it.
///
/// Mounted as the router fallback, so every path and method lands here. The
/// body is only read once the method and API key have been checked.
#[instrument(skip_all, fields(method = %request.method()))]
pub async fn ingest_message(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<BufferApiResponse>, IngressError> {
    if *request.method() != Method::POST {
        return Err(IngressError::MethodNotAllowed);
    }

    if !auth::is_authorized(request.headers(), &state.config.api_key) {
        warn!("Rejected ingress request with invalid API key");
        return Err(IngressError::Unauthorized);
    }

    let body = Bytes::from_request(request, &state)
        .await
        .map_err(IngressError::Body)?;

    let value: Value = serde_json::from_slice(&body).map_err(IngressError::InvalidJson)?;
    let message = normalize_message(&value, Utc::now())?;

    state.queue.send(&message).await?;

    info!(
        chat_id = %message.chat_id,
        message_id = %message.message_id,
        "Message enqueued"
    );

    Ok(Json(BufferApiResponse::queued(message.chat_id)))
}
