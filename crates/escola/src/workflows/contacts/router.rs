use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::put,
    Router,
};
use serde_json::json;
use tracing::error;

use super::service::{ContactService, ContactUpdateError};
use crate::workflows::enrollment::domain::{Contacto, ContactOwner};
use crate::workflows::enrollment::repository::{ContactDirectory, ContactRegistry};
use crate::workflows::enrollment::router::malformed_body;

/// Router builder exposing contact updates for every contact owner.
pub fn contact_router<S>(service: Arc<ContactService<S>>) -> Router
where
    S: ContactDirectory + ContactRegistry + 'static,
{
    Router::new()
        .route("/api/v1/alunos/:id/contacto", put(aluno_handler::<S>))
        .route(
            "/api/v1/responsaveis/:id/contacto",
            put(responsavel_handler::<S>),
        )
        .route(
            "/api/v1/professores/:id/contacto",
            put(professor_handler::<S>),
        )
        .with_state(service)
}

async fn aluno_handler<S>(
    State(service): State<Arc<ContactService<S>>>,
    Path(id): Path<i64>,
    payload: Result<axum::Json<Contacto>, JsonRejection>,
) -> Response
where
    S: ContactDirectory + ContactRegistry + 'static,
{
    update_contact(&service, ContactOwner::Aluno, id, payload).await
}

async fn responsavel_handler<S>(
    State(service): State<Arc<ContactService<S>>>,
    Path(id): Path<i64>,
    payload: Result<axum::Json<Contacto>, JsonRejection>,
) -> Response
where
    S: ContactDirectory + ContactRegistry + 'static,
{
    update_contact(&service, ContactOwner::Responsavel, id, payload).await
}

async fn professor_handler<S>(
    State(service): State<Arc<ContactService<S>>>,
    Path(id): Path<i64>,
    payload: Result<axum::Json<Contacto>, JsonRejection>,
) -> Response
where
    S: ContactDirectory + ContactRegistry + 'static,
{
    update_contact(&service, ContactOwner::Professor, id, payload).await
}

pub(crate) async fn update_contact<S>(
    service: &ContactService<S>,
    owner: ContactOwner,
    id: i64,
    payload: Result<axum::Json<Contacto>, JsonRejection>,
) -> Response
where
    S: ContactDirectory + ContactRegistry + 'static,
{
    let checked = payload
        .map_err(|rejection| malformed_body(&rejection))
        .and_then(|axum::Json(contacto)| contacto.check_shape("").map(|()| contacto));
    let contacto = match checked {
        Ok(contacto) => contacto,
        Err(malformed) => {
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(json!({ "error": malformed.view() })),
            )
                .into_response()
        }
    };

    match service.update(owner, id, contacto).await {
        Ok(contacto) => (StatusCode::OK, axum::Json(contacto)).into_response(),
        Err(ContactUpdateError::NotFound { .. }) => {
            let payload = json!({
                "error": { "kind": "not_found", "message": format!("{} {id} not found", owner.label()) }
            });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        Err(err @ ContactUpdateError::Conflict { field, .. }) => {
            let payload = json!({
                "error": {
                    "kind": "uniqueness_conflict",
                    "field": field.label(),
                    "message": err.to_string(),
                }
            });
            (StatusCode::CONFLICT, axum::Json(payload)).into_response()
        }
        Err(ContactUpdateError::Repository(err)) => {
            error!(%err, owner = owner.label(), id, "contact store failure");
            let payload = json!({
                "error": { "kind": "internal", "message": "internal server error" }
            });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}
