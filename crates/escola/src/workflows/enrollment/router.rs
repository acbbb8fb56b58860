use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::Local;
use serde_json::json;
use tracing::error;

use super::domain::{EnrollmentSubmission, MatriculaId, TurmaId};
use super::rejection::{MalformedInput, Rejection, RejectionView};
use super::repository::SchoolStore;
use super::service::{EnrollmentError, EnrollmentService};

/// Router builder exposing enrollment intake and read-back endpoints.
pub fn enrollment_router<S>(service: Arc<EnrollmentService<S>>) -> Router
where
    S: SchoolStore + 'static,
{
    Router::new()
        .route("/api/v1/matriculas", post(enroll_handler::<S>))
        .route(
            "/api/v1/matriculas/:matricula_id",
            get(confirmation_handler::<S>),
        )
        .route(
            "/api/v1/turmas/:turma_id/ocupacao",
            get(occupancy_handler::<S>),
        )
        .with_state(service)
}

pub(crate) async fn enroll_handler<S>(
    State(service): State<Arc<EnrollmentService<S>>>,
    payload: Result<axum::Json<EnrollmentSubmission>, JsonRejection>,
) -> Response
where
    S: SchoolStore + 'static,
{
    let submission = match payload {
        Ok(axum::Json(submission)) => submission,
        Err(rejection) => {
            return error_body(StatusCode::BAD_REQUEST, malformed_body(&rejection).view())
        }
    };
    if let Err(malformed) = submission.check_shape() {
        return error_body(StatusCode::BAD_REQUEST, malformed.view());
    }

    let ano_lectivo = match service.active_ano_lectivo().await {
        Ok(Some(ano)) => ano,
        Ok(None) => {
            let payload = json!({
                "error": {
                    "kind": "no_active_ano_lectivo",
                    "message": "no academic year is open for enrollment",
                }
            });
            return (StatusCode::SERVICE_UNAVAILABLE, axum::Json(payload)).into_response();
        }
        Err(err) => return error_response(err),
    };

    let today = Local::now().date_naive();
    match service.enroll(submission, &ano_lectivo, today).await {
        Ok(confirmation) => (StatusCode::CREATED, axum::Json(confirmation)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn confirmation_handler<S>(
    State(service): State<Arc<EnrollmentService<S>>>,
    Path(matricula_id): Path<i64>,
) -> Response
where
    S: SchoolStore + 'static,
{
    match service.confirmation(MatriculaId(matricula_id)).await {
        Ok(confirmation) => (StatusCode::OK, axum::Json(confirmation)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn occupancy_handler<S>(
    State(service): State<Arc<EnrollmentService<S>>>,
    Path(turma_id): Path<i64>,
) -> Response
where
    S: SchoolStore + 'static,
{
    match service.occupancy(TurmaId(turma_id)).await {
        Ok(occupancy) => (StatusCode::OK, axum::Json(occupancy)).into_response(),
        Err(err) => error_response(err),
    }
}

/// Body the JSON extractor could not decode. Data errors carry the dotted
/// path of the failing field, e.g. `aluno.dataNascimento: input is out of range`.
pub(crate) fn malformed_body(rejection: &JsonRejection) -> MalformedInput {
    let text = rejection.body_text();
    let detail = match rejection {
        JsonRejection::JsonDataError(_) | JsonRejection::JsonSyntaxError(_) => {
            text.split_once(": ").map(|(_, detail)| detail)
        }
        _ => None,
    };

    match (rejection, detail) {
        (JsonRejection::JsonDataError(_), Some(detail)) => match detail.split_once(": ") {
            Some((path, message)) if !path.contains(char::is_whitespace) => {
                MalformedInput::new(path.to_string(), message)
            }
            _ => MalformedInput::new("body".to_string(), detail),
        },
        (_, Some(detail)) => MalformedInput::new("body".to_string(), detail),
        (_, None) => MalformedInput::new("body".to_string(), text.as_str()),
    }
}

pub(crate) fn rejection_status(rejection: &Rejection) -> StatusCode {
    match rejection {
        Rejection::DuplicateGuardianContact { .. }
        | Rejection::GuardianLimitExceeded { .. }
        | Rejection::AgeOutOfRange(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Rejection::ReferentialNotFound { .. }
        | Rejection::TurmaNotInClasse { .. }
        | Rejection::ClasseOutsideAnoLectivo { .. } => StatusCode::NOT_FOUND,
        Rejection::UniquenessConflict { .. } | Rejection::CapacityExceeded { .. } => {
            StatusCode::CONFLICT
        }
    }
}

fn error_response(err: EnrollmentError) -> Response {
    match err {
        EnrollmentError::Rejected { rejection, .. } => {
            error_body(rejection_status(&rejection), rejection.view())
        }
        EnrollmentError::MatriculaNotFound(_) | EnrollmentError::TurmaNotFound(_) => {
            let payload = json!({
                "error": { "kind": "not_found", "message": err.to_string() }
            });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        EnrollmentError::Integrity(fault) => {
            error!(%fault, "reference data integrity fault");
            internal_error()
        }
        EnrollmentError::Repository(err) => {
            error!(%err, "enrollment store failure");
            internal_error()
        }
    }
}

fn error_body(status: StatusCode, view: RejectionView) -> Response {
    (status, axum::Json(json!({ "error": view }))).into_response()
}

fn internal_error() -> Response {
    let payload = json!({
        "error": { "kind": "internal", "message": "internal server error" }
    });
    (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
}
