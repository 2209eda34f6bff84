//! API route handlers for the gateway.

use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use capsule_core::types::Capsule;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::error::ApiError;
use super::form::{CapsuleForm, local_offset};
use super::server::AppState;

/// Capsule as returned by the API.
#[derive(Debug, Clone, Serialize)]
pub struct CapsuleView {
    pub id: i64,
    pub recipient_email: String,
    pub subject: String,
    pub body: String,
    pub send_datetime: String,
    pub attachment_filename: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: String,
}

impl From<&Capsule> for CapsuleView {
    fn from(c: &Capsule) -> Self {
        Self {
            id: c.id,
            recipient_email: c.recipient.clone(),
            subject: c.subject.clone(),
            body: c.body.clone(),
            send_datetime: c.due_at.to_rfc3339(),
            attachment_filename: c.attachment.as_ref().map(|a| a.filename.clone()),
            status: c.state.as_str().to_string(),
            error_message: c.last_error.clone(),
            created_at: c.created_at.to_rfc3339(),
        }
    }
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let counts = state.service.counts().ok();
    Json(serde_json::json!({
        "status": if counts.is_some() { "ok" } else { "degraded" },
        "service": "capsule-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "capsules": counts,
    }))
}

/// Schedule a capsule from a multipart form.
pub async fn create_capsule(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<CapsuleView>), ApiError> {
    let form = CapsuleForm::from_multipart(multipart).await?;
    intake(&state, form, Utc::now())
}

/// Validate and store a submitted form. Split from the handler so the rules
/// can be exercised without building multipart bodies.
pub fn intake(
    state: &AppState,
    form: CapsuleForm,
    now: DateTime<Utc>,
) -> Result<(StatusCode, Json<CapsuleView>), ApiError> {
    let offset = local_offset(state.gateway_config.local_utc_offset_minutes);
    let draft = form.into_draft(now, offset)?;
    let capsule = state.service.create(draft)?;
    Ok((StatusCode::CREATED, Json(CapsuleView::from(&capsule))))
}

/// List all capsules in creation order.
pub async fn list_capsules(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CapsuleView>>, ApiError> {
    let capsules = state.service.list()?;
    Ok(Json(capsules.iter().map(CapsuleView::from).collect()))
}

pub async fn get_capsule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<CapsuleView>, ApiError> {
    let capsule = state.service.get(id)?;
    Ok(Json(CapsuleView::from(&capsule)))
}

/// Remove a capsule and its stored attachment.
pub async fn delete_capsule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.service.delete(id)?;
    Ok(Json(serde_json::json!({"message": format!("Capsule {id} deleted")})))
}

/// Download the attachment under its original filename.
pub async fn download_attachment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let (filename, bytes) = state.service.attachment(id).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        filename.replace(['"', '\\', '\r', '\n'], "_")
    );
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}
