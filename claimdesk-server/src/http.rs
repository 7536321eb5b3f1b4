//! claimdesk HTTP API
//!
//! Axum-based HTTP server for submissions, the messaging webhook and the
//! admin surface.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to an
//! inner function returning `(StatusCode, serde_json::Value)`. The inner
//! functions are directly testable without axum dispatch machinery.
//!
//! Endpoints:
//! - GET   /health                              — store and DB status
//! - GET   /version                             — server version info
//! - POST  /api/upload                          — store one raw image body
//! - POST  /api/diagnosis                       — submit photos for assessment
//! - POST  /api/webhook/line                    — signed messaging webhook
//! - GET   /api/admin/dashboard                 — counts and recent sessions
//! - GET   /api/admin/diagnosis/:id             — session with edit history
//! - PATCH /api/admin/diagnosis/:id             — audited edit
//! - POST  /api/admin/diagnosis/:id/render      — re-render the report
//! - POST  /api/admin/diagnosis/:id/deactivate  — stop redemption
//! - GET   /api/admin/customers                 — customers with session counts
//! - GET   /api/admin/customers/:id             — customer with their sessions
//! - PATCH /api/admin/customers/:id             — follow-up status and notes
//! - GET   /api/admin/customers/sessions        — sessions by phone/email
//!
//! Admin routes require `Authorization: Bearer <token>` when an admin token
//! is configured.

use std::sync::Arc;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, Query, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use claimdesk_core::config::StorageConfig;
use claimdesk_core::messaging::SIGNATURE_HEADER;
use claimdesk_core::models::CustomerFollowUp;
use claimdesk_core::report::images::sniff;
use claimdesk_core::{ClaimdeskConfig, ObjectStore};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::subsystems::{
    AdminError, AdminService, EditRequest, Lifecycle, SubmissionError, SubmissionRequest,
};

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub lifecycle: Arc<Lifecycle>,
    pub admin: AdminService,
    pub config: ClaimdeskConfig,
    /// Present when sessions live in Postgres
    pub pool: Option<PgPool>,
    pub admin_token: Option<String>,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    let admin = Router::new()
        .route("/api/admin/dashboard", get(dashboard_handler))
        .route(
            "/api/admin/diagnosis/:id",
            get(detail_handler).patch(edit_handler),
        )
        .route("/api/admin/diagnosis/:id/render", post(render_handler))
        .route(
            "/api/admin/diagnosis/:id/deactivate",
            post(deactivate_handler),
        )
        .route("/api/admin/customers", get(customers_handler))
        .route(
            "/api/admin/customers/sessions",
            get(contact_sessions_handler),
        )
        .route(
            "/api/admin/customers/:id",
            get(customer_handler).patch(customer_update_handler),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/api/upload", post(upload_handler))
        .route("/api/diagnosis", post(diagnosis_handler))
        .route("/api/webhook/line", post(webhook_handler))
        .merge(admin)
        .layer(DefaultBodyLimit::max(state.config.storage.max_upload_bytes))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("claimdesk HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ContactQuery {
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }
}

fn error_body(status: StatusCode, msg: impl Into<String>) -> (StatusCode, serde_json::Value) {
    let body = serde_json::to_value(ErrorResponse::new(msg)).unwrap_or_default();
    (status, body)
}

/// Serialize `value` and add `"success": true`.
fn success_body<T: Serialize>(value: &T) -> (StatusCode, serde_json::Value) {
    match serde_json::to_value(value) {
        Ok(mut body) => {
            if let Some(obj) = body.as_object_mut() {
                obj.insert("success".to_string(), serde_json::json!(true));
            }
            (StatusCode::OK, body)
        }
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub fn submission_status(e: &SubmissionError) -> StatusCode {
    match e {
        SubmissionError::Validation(_) => StatusCode::BAD_REQUEST,
        SubmissionError::AssessmentUnavailable(_) => StatusCode::BAD_GATEWAY,
        SubmissionError::Allocation(_) | SubmissionError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn admin_status(e: &AdminError) -> StatusCode {
    match e {
        AdminError::NotFound(_) | AdminError::CustomerNotFound(_) => StatusCode::NOT_FOUND,
        AdminError::Invalid(_) => StatusCode::BAD_REQUEST,
        AdminError::Store(_) | AdminError::Report(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn admin_error(e: AdminError) -> (StatusCode, serde_json::Value) {
    let status = admin_status(&e);
    if status.is_server_error() {
        tracing::error!(error = %e, "Admin request failed");
    }
    error_body(status, e.to_string())
}

/// Unwrap a JSON body, turning axum's plain-text rejection into an
/// `ErrorResponse`.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, (StatusCode, serde_json::Value)> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => Err(error_body(StatusCode::BAD_REQUEST, rejection.body_text())),
    }
}

/// Constant-time comparison of a presented bearer token.
pub fn token_matches(expected: &str, presented: &str) -> bool {
    bool::from(expected.as_bytes().ct_eq(presented.as_bytes()))
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check: store backend and, with Postgres, the server version.
pub async fn health_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    let store = state.lifecycle.store().name();
    let objects = state.lifecycle.objects().name().to_string();

    let postgresql = match &state.pool {
        Some(pool) => match claimdesk_core::db::health_check(pool).await {
            Ok(v) => Some(v),
            Err(e) => {
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    serde_json::json!({
                        "status": "unhealthy",
                        "error": e.to_string(),
                    }),
                );
            }
        },
        None => None,
    };

    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "store": store,
            "objectStore": objects,
            "postgresql": postgresql,
        }),
    )
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "service": "claimdesk",
    })
}

/// Inner upload: sniff the image format and store it under a fresh name.
pub async fn upload_inner(
    objects: &dyn ObjectStore,
    storage: &StorageConfig,
    body: Bytes,
) -> (StatusCode, serde_json::Value) {
    if body.is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "No file provided");
    }
    if body.len() > storage.max_upload_bytes {
        return error_body(StatusCode::PAYLOAD_TOO_LARGE, "File too large");
    }
    let Some(kind) = sniff(&body) else {
        return error_body(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Unsupported image type (jpeg, png, webp or gif expected)",
        );
    };

    let file_name = format!("{}.{}", Uuid::new_v4(), kind.extension);
    let name = format!("{}/{}", storage.image_bucket, file_name);
    match objects.put(&name, body, kind.mime).await {
        Ok(reference) => {
            tracing::info!(file = %file_name, "Image uploaded");
            (
                StatusCode::OK,
                serde_json::json!({
                    "success": true,
                    "url": reference.as_str(),
                    "file_name": file_name,
                }),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "Image upload failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Upload failed")
        }
    }
}

/// Inner submission: assessment, code allocation and report rendering.
pub async fn diagnosis_inner(
    lifecycle: &Lifecycle,
    request: SubmissionRequest,
    now: DateTime<Utc>,
) -> (StatusCode, serde_json::Value) {
    match lifecycle.submit(request, now).await {
        Ok(receipt) => success_body(&receipt),
        Err(e) => {
            let status = submission_status(&e);
            if status.is_server_error() && status != StatusCode::BAD_GATEWAY {
                tracing::error!(error = %e, "Submission failed");
            }
            error_body(status, e.to_string())
        }
    }
}

/// Inner webhook: 400 without a signature, 403 on mismatch, 200 otherwise.
pub async fn webhook_inner(
    lifecycle: &Lifecycle,
    body: &[u8],
    signature: Option<&str>,
    now: DateTime<Utc>,
) -> (StatusCode, serde_json::Value) {
    match lifecycle.handle_webhook(body, signature, now).await {
        Ok(summary) => success_body(&summary),
        Err(e) => error_body(e.status(), e.to_string()),
    }
}

pub async fn dashboard_inner(
    admin: &AdminService,
    now: DateTime<Utc>,
) -> (StatusCode, serde_json::Value) {
    match admin.dashboard(now).await {
        Ok(dashboard) => success_body(&dashboard),
        Err(e) => admin_error(e),
    }
}

pub async fn detail_inner(admin: &AdminService, id: Uuid) -> (StatusCode, serde_json::Value) {
    match admin.detail(id).await {
        Ok(detail) => success_body(&detail),
        Err(e) => admin_error(e),
    }
}

pub async fn edit_inner(
    admin: &AdminService,
    id: Uuid,
    request: EditRequest,
    now: DateTime<Utc>,
) -> (StatusCode, serde_json::Value) {
    match admin.edit(id, request, now).await {
        Ok(outcome) => success_body(&outcome),
        Err(e) => admin_error(e),
    }
}

pub async fn render_inner(admin: &AdminService, id: Uuid) -> (StatusCode, serde_json::Value) {
    match admin.rerender(id).await {
        Ok(report_ref) => (
            StatusCode::OK,
            serde_json::json!({ "success": true, "reportRef": report_ref }),
        ),
        Err(e) => admin_error(e),
    }
}

pub async fn deactivate_inner(
    admin: &AdminService,
    id: Uuid,
    now: DateTime<Utc>,
) -> (StatusCode, serde_json::Value) {
    match admin.deactivate(id, now).await {
        Ok(changed) => (
            StatusCode::OK,
            serde_json::json!({ "success": true, "changed": changed }),
        ),
        Err(e) => admin_error(e),
    }
}

pub async fn contact_sessions_inner(
    admin: &AdminService,
    query: ContactQuery,
) -> (StatusCode, serde_json::Value) {
    match admin
        .sessions_for_contact(query.phone.as_deref(), query.email.as_deref())
        .await
    {
        Ok(sessions) => (
            StatusCode::OK,
            serde_json::json!({
                "success": true,
                "count": sessions.len(),
                "sessions": sessions,
            }),
        ),
        Err(e) => admin_error(e),
    }
}

pub async fn customers_inner(admin: &AdminService) -> (StatusCode, serde_json::Value) {
    match admin.customers().await {
        Ok(customers) => (
            StatusCode::OK,
            serde_json::json!({
                "success": true,
                "count": customers.len(),
                "customers": customers,
            }),
        ),
        Err(e) => admin_error(e),
    }
}

pub async fn customer_inner(admin: &AdminService, id: Uuid) -> (StatusCode, serde_json::Value) {
    match admin.customer(id).await {
        Ok(detail) => success_body(&detail),
        Err(e) => admin_error(e),
    }
}

pub async fn customer_update_inner(
    admin: &AdminService,
    id: Uuid,
    update: CustomerFollowUp,
    now: DateTime<Utc>,
) -> (StatusCode, serde_json::Value) {
    match admin.update_customer(id, update, now).await {
        Ok(customer) => (
            StatusCode::OK,
            serde_json::json!({ "success": true, "customer": customer }),
        ),
        Err(e) => admin_error(e),
    }
}

// ============================================================================
// Middleware
// ============================================================================

async fn require_admin(
    State(state): State<Arc<HttpState>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = state.admin_token.as_deref() {
        let presented = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);

        if !presented.is_some_and(|p| token_matches(expected, p)) {
            let (status, body) = error_body(StatusCode::UNAUTHORIZED, "admin token required");
            return (status, Json(body)).into_response();
        }
    }
    next.run(request).await
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn upload_handler(
    State(state): State<Arc<HttpState>>,
    body: Bytes,
) -> impl IntoResponse {
    let (status, body) = upload_inner(
        state.lifecycle.objects().as_ref(),
        &state.config.storage,
        body,
    )
    .await;
    (status, Json(body))
}

pub async fn diagnosis_handler(
    State(state): State<Arc<HttpState>>,
    payload: Result<Json<SubmissionRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match json_body(payload) {
        Ok(request) => diagnosis_inner(&state.lifecycle, request, Utc::now()).await,
        Err(rejected) => rejected,
    };
    (status, Json(body))
}

pub async fn webhook_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let (status, body) = webhook_inner(&state.lifecycle, &body, signature, Utc::now()).await;
    (status, Json(body))
}

pub async fn dashboard_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = dashboard_inner(&state.admin, Utc::now()).await;
    (status, Json(body))
}

pub async fn detail_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = detail_inner(&state.admin, id).await;
    (status, Json(body))
}

pub async fn edit_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
    payload: Result<Json<EditRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match json_body(payload) {
        Ok(request) => edit_inner(&state.admin, id, request, Utc::now()).await,
        Err(rejected) => rejected,
    };
    (status, Json(body))
}

pub async fn render_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = render_inner(&state.admin, id).await;
    (status, Json(body))
}

pub async fn deactivate_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = deactivate_inner(&state.admin, id, Utc::now()).await;
    (status, Json(body))
}

pub async fn contact_sessions_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<ContactQuery>,
) -> impl IntoResponse {
    let (status, body) = contact_sessions_inner(&state.admin, query).await;
    (status, Json(body))
}

pub async fn customers_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = customers_inner(&state.admin).await;
    (status, Json(body))
}

pub async fn customer_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = customer_inner(&state.admin, id).await;
    (status, Json(body))
}

pub async fn customer_update_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
    payload: Result<Json<CustomerFollowUp>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match json_body(payload) {
        Ok(update) => customer_update_inner(&state.admin, id, update, Utc::now()).await,
        Err(rejected) => rejected,
    };
    (status, Json(body))
}

// ============================================================================
// Unit Tests: pure helpers; dispatch is covered in tests/http_integration.rs
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::AllocationError;
    use claimdesk_core::StoreError;

    // ========================================================================
    // TEST 1: version_inner is pure and returns correct fields
    // ========================================================================
    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["service"], "claimdesk");
    }

    // ========================================================================
    // TEST 2: error bodies carry the standard shape
    // ========================================================================
    #[test]
    fn test_error_body_shape() {
        let (status, body) = error_body(StatusCode::BAD_REQUEST, "bad input");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad input");
        assert_eq!(body["status"], "error");
    }

    // ========================================================================
    // TEST 3: submission errors map onto HTTP statuses
    // ========================================================================
    #[test]
    fn test_submission_status_mapping() {
        assert_eq!(
            submission_status(&SubmissionError::Validation("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            submission_status(&SubmissionError::AssessmentUnavailable("down".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            submission_status(&SubmissionError::Allocation(AllocationError::Exhausted {
                attempts: 100
            })),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    // ========================================================================
    // TEST 4: admin errors map onto HTTP statuses
    // ========================================================================
    #[test]
    fn test_admin_status_mapping() {
        let id = Uuid::new_v4();
        assert_eq!(admin_status(&AdminError::NotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(
            admin_status(&AdminError::from(StoreError::NotFound(id))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            admin_status(&AdminError::from(StoreError::CustomerNotFound(id))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            admin_status(&AdminError::Invalid("reason".into())),
            StatusCode::BAD_REQUEST
        );
    }

    // ========================================================================
    // TEST 5: bearer token comparison
    // ========================================================================
    #[test]
    fn test_token_matches() {
        assert!(token_matches("s3cret", "s3cret"));
        assert!(!token_matches("s3cret", "s3cre"));
        assert!(!token_matches("s3cret", "S3CRET"));
        assert!(!token_matches("s3cret", ""));
    }

    // ========================================================================
    // TEST 6: success bodies gain the success flag
    // ========================================================================
    #[test]
    fn test_success_body_adds_flag() {
        let (status, body) = success_body(&serde_json::json!({ "count": 2 }));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 2);
    }
}
