use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::catalog::{EnrollmentSequence, LevelCatalog, StudentDirectory};
use super::domain::{ClassId, LevelId, PaymentStatus, RegistrationId, RenewalTerms, StudentId};
use super::repository::ProgressStore;
use super::service::{ProgressionError, ProgressionService};

/// Router builder exposing the progression operations over HTTP. The client
/// stays a thin caller: every invariant lives behind the service.
pub fn progression_router<S, C, D, G>(service: Arc<ProgressionService<S, C, D, G>>) -> Router
where
    S: ProgressStore + 'static,
    C: LevelCatalog + 'static,
    D: StudentDirectory + 'static,
    G: EnrollmentSequence + 'static,
{
    Router::new()
        .route(
            "/api/v1/progression/levels/:level_id/awaiting",
            get(awaiting_handler::<S, C, D, G>),
        )
        .route(
            "/api/v1/progression/renewals",
            post(open_renewal_handler::<S, C, D, G>),
        )
        .route(
            "/api/v1/progression/renewals/:registration_id/confirmation",
            post(confirm_renewal_handler::<S, C, D, G>),
        )
        .route(
            "/api/v1/progression/promotions",
            post(promote_handler::<S, C, D, G>),
        )
        .route(
            "/api/v1/progression/failures",
            post(fail_handler::<S, C, D, G>),
        )
        .route(
            "/api/v1/progression/repeats",
            post(repeat_handler::<S, C, D, G>),
        )
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub struct OpenRenewalRequest {
    pub student_id: StudentId,
    pub level_id: LevelId,
    pub period: String,
    pub enrollment_fee: u32,
    pub monthly_fee: u32,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRenewalRequest {
    pub destination_class_id: ClassId,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Deserialize)]
pub struct PromoteRequest {
    pub student_id: StudentId,
    pub level_id: LevelId,
    #[serde(default)]
    pub destination_class_id: Option<ClassId>,
}

/// Shared payload for the commands addressed by (student, level) alone.
#[derive(Debug, Deserialize)]
pub struct LevelActionRequest {
    pub student_id: StudentId,
    pub level_id: LevelId,
}

pub(crate) async fn awaiting_handler<S, C, D, G>(
    State(service): State<Arc<ProgressionService<S, C, D, G>>>,
    Path(level_id): Path<String>,
) -> Response
where
    S: ProgressStore + 'static,
    C: LevelCatalog + 'static,
    D: StudentDirectory + 'static,
    G: EnrollmentSequence + 'static,
{
    match service.awaiting_roster(&LevelId(level_id)) {
        Ok(roster) => (StatusCode::OK, Json(roster)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn open_renewal_handler<S, C, D, G>(
    State(service): State<Arc<ProgressionService<S, C, D, G>>>,
    Json(request): Json<OpenRenewalRequest>,
) -> Response
where
    S: ProgressStore + 'static,
    C: LevelCatalog + 'static,
    D: StudentDirectory + 'static,
    G: EnrollmentSequence + 'static,
{
    let OpenRenewalRequest {
        student_id,
        level_id,
        period,
        enrollment_fee,
        monthly_fee,
    } = request;
    let terms = RenewalTerms {
        period,
        enrollment_fee,
        monthly_fee,
    };

    match service.open_renewal(&student_id, &level_id, terms) {
        Ok(outcome) => {
            let status = if outcome.already_exists() {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            (status, Json(outcome.view())).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn confirm_renewal_handler<S, C, D, G>(
    State(service): State<Arc<ProgressionService<S, C, D, G>>>,
    Path(registration_id): Path<String>,
    Json(request): Json<ConfirmRenewalRequest>,
) -> Response
where
    S: ProgressStore + 'static,
    C: LevelCatalog + 'static,
    D: StudentDirectory + 'static,
    G: EnrollmentSequence + 'static,
{
    let registration_id = RegistrationId(registration_id);
    match service.confirm_renewal(
        &registration_id,
        &request.destination_class_id,
        request.payment_status,
    ) {
        Ok(record) => {
            let payload = json!({
                "message": format!(
                    "renewal confirmed: student {} enrolled at level {} in class {}",
                    record.student_id.0,
                    record.level_id.0,
                    record.class_id.map(|id| id.0).unwrap_or_default()
                ),
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn promote_handler<S, C, D, G>(
    State(service): State<Arc<ProgressionService<S, C, D, G>>>,
    Json(request): Json<PromoteRequest>,
) -> Response
where
    S: ProgressStore + 'static,
    C: LevelCatalog + 'static,
    D: StudentDirectory + 'static,
    G: EnrollmentSequence + 'static,
{
    match service.promote(
        &request.student_id,
        &request.level_id,
        request.destination_class_id.as_ref(),
    ) {
        Ok(record) => {
            let payload = json!({
                "message": format!(
                    "student {} promoted to level {}",
                    record.student_id.0, record.level_id.0
                ),
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn fail_handler<S, C, D, G>(
    State(service): State<Arc<ProgressionService<S, C, D, G>>>,
    Json(request): Json<LevelActionRequest>,
) -> Response
where
    S: ProgressStore + 'static,
    C: LevelCatalog + 'static,
    D: StudentDirectory + 'static,
    G: EnrollmentSequence + 'static,
{
    match service.fail_level(&request.student_id, &request.level_id) {
        Ok(()) => (StatusCode::OK, Json(json!({}))).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn repeat_handler<S, C, D, G>(
    State(service): State<Arc<ProgressionService<S, C, D, G>>>,
    Json(request): Json<LevelActionRequest>,
) -> Response
where
    S: ProgressStore + 'static,
    C: LevelCatalog + 'static,
    D: StudentDirectory + 'static,
    G: EnrollmentSequence + 'static,
{
    match service.repeat_level(&request.student_id, &request.level_id) {
        Ok(record) => {
            let payload = json!({ "attempt": record.attempt });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

impl ProgressionError {
    /// HTTP status for each error class. `Conflict`-family answers tell the
    /// operator to refresh the roster and retry.
    pub(crate) fn status_code(&self) -> StatusCode {
        match self {
            ProgressionError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ProgressionError::NotFound { .. } => StatusCode::NOT_FOUND,
            ProgressionError::Precondition { .. }
            | ProgressionError::CapacityExceeded { .. }
            | ProgressionError::Conflict => StatusCode::CONFLICT,
            ProgressionError::Store(_)
            | ProgressionError::Catalog(_)
            | ProgressionError::Directory(_)
            | ProgressionError::Sequence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn error_response(error: ProgressionError) -> Response {
    let payload = json!({ "error": error.to_string() });
    (error.status_code(), Json(payload)).into_response()
}
