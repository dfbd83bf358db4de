use crate::{app_error::AppError, app_state::AppState};

pub mod alerts;
pub mod medications;
pub mod middleware;
pub mod notifications;

/// Every route with its OpenAPI description, behind the caller-identity layer.
pub fn routes_with_openapi() -> utoipa_axum::router::OpenApiRouter<AppState> {
    alerts::routes_with_openapi()
        .merge(medications::routes_with_openapi())
        .merge(notifications::routes_with_openapi())
}

/// The caller must be the patient or one of their active caregivers.
async fn ensure_care_circle(
    state: &AppState,
    patient_id: i32,
    caller_id: i32,
) -> Result<(), AppError> {
    if caller_id == patient_id
        || state
            .graph
            .is_active_relationship(patient_id, caller_id)
            .await?
    {
        return Ok(());
    }

    Err(AppError::ForbiddenResource(format!(
        "User #{caller_id} is not part of patient #{patient_id}'s care circle"
    )))
}
