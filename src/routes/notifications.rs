use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::db::models::{NewNotification, Notification};
use crate::error::AppResult;
use crate::lifecycle::EmailTrackingMetrics;
use crate::services::notifications::NotificationService;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create))
        .route("/:id/read", post(mark_read))
        .route("/:id/archive", post(mark_archived))
        .route("/:id/metrics", get(metrics))
}

/// Queue a new notification. The dispatch worker picks it up on its next
/// poll; the response carries the pending record.
async fn create(
    State(state): State<Arc<AppState>>,
    Json(mut input): Json<NewNotification>,
) -> AppResult<(StatusCode, Json<Notification>)> {
    if input.max_retries.is_none() {
        input.max_retries = Some(state.config.dispatch.default_max_retries as i32);
    }
    let svc = NotificationService::new(state.db.clone(), state.clock.clone());
    let record = svc.create(input).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Mark a notification as read. Forces the delivery status to `read`
/// regardless of the prior status (product behavior).
async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Notification>> {
    let svc = NotificationService::new(state.db.clone(), state.clock.clone());
    let record = svc.mark_read(&id).await?;
    Ok(Json(record))
}

/// Set the archived flag. Repeat calls refresh `archived_at`.
async fn mark_archived(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Notification>> {
    let svc = NotificationService::new(state.db.clone(), state.clock.clone());
    let record = svc.mark_archived(&id).await?;
    Ok(Json(record))
}

/// Derived email engagement summary for a single record.
async fn metrics(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<EmailTrackingMetrics>> {
    let svc = NotificationService::new(state.db.clone(), state.clock.clone());
    let metrics = svc.metrics(&id).await?;
    Ok(Json(metrics))
}
