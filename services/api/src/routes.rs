use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use escola::workflows::contacts::{contact_router, ContactService};
use escola::workflows::enrollment::{
    enrollment_router, EnrollmentPolicy, EnrollmentService, SchoolStore,
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Enrollment and contact APIs plus the operational endpoints.
pub(crate) fn with_school_routes<S>(store: Arc<S>, policy: EnrollmentPolicy) -> Router
where
    S: SchoolStore + 'static,
{
    let enrollment = Arc::new(EnrollmentService::new(store.clone(), policy));
    let contacts = Arc::new(ContactService::new(store));

    enrollment_router(enrollment)
        .merge(contact_router(contacts))
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
