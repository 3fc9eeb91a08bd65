use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::services::tracking::{EmailWebhookPayload, TrackingService};
use crate::AppState;

const SIGNATURE_HEADER: &str = "x-provider-signature";
const TIMESTAMP_HEADER: &str = "x-provider-timestamp";

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/email", post(handle_email_webhook))
}

fn get_header(headers: &HeaderMap, name: &str) -> AppResult<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .ok_or_else(|| AppError::BadRequest(format!("Missing header: {}", name)))
}

/// Email provider engagement callback (delivery, open, click, bounce).
///
/// The raw body is verified against the shared webhook secret before
/// deserialization; the event is then forwarded to the tracking service.
async fn handle_email_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, String), AppError> {
    let signature = get_header(&headers, SIGNATURE_HEADER)?;
    let timestamp = get_header(&headers, TIMESTAMP_HEADER)?;

    TrackingService::verify_signature(
        &state.config.email.webhook_secret,
        &timestamp,
        &body,
        &signature,
        state.clock.now(),
    )?;

    let payload: EmailWebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid payload: {}", e)))?;

    tracing::info!(
        "Received email provider webhook: notification_id={}",
        payload.notification_id
    );

    let svc = TrackingService::new(state.db.clone(), state.clock.clone());
    svc.apply_event(payload).await?;

    Ok((StatusCode::OK, "OK".to_string()))
}
