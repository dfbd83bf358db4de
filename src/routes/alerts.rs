use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    care::NewAlert,
    models::{AlertEntity, AlertType},
    routes::{ensure_care_circle, middleware},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/alerts",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(create_fall_alert))
            .routes(utoipa_axum::routes!(cancel_alert))
            .routes(utoipa_axum::routes!(send_alert))
            .routes(utoipa_axum::routes!(acknowledge_alert))
            .routes(utoipa_axum::routes!(get_patient_alerts))
            .routes(utoipa_axum::routes!(get_caregiving_alerts))
            .route_layer(axum::middleware::from_fn(middleware::caller_identity)),
    )
}

#[derive(Deserialize, ToSchema)]
struct CreateFallAlertReq {
    #[serde(default)]
    pub alert_type: Option<AlertType>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub details: Option<String>,
}

/// Report a detected fall (or a manual help request) for the calling patient.
///
/// The alert starts PENDING while the phone counts down.
#[utoipa::path(
    post,
    path = "/fall",
    tags = ["Alerts"],
    request_body = CreateFallAlertReq,
    responses(
        (status = 200, description = "Alert created", body = StdResponse<AlertEntity, String>),
        (status = 404, description = "Unknown patient")
    )
)]
async fn create_fall_alert(
    State(state): State<AppState>,
    Extension(patient_id): Extension<i32>,
    Json(body): Json<CreateFallAlertReq>,
) -> Result<impl IntoResponse, AppError> {
    let alert = state
        .alerts
        .create(NewAlert {
            patient_id,
            alert_type: body.alert_type.unwrap_or(AlertType::Fall),
            latitude: body.latitude,
            longitude: body.longitude,
            details: body.details,
        })
        .await?;

    Ok(StdResponse {
        data: Some(alert),
        message: Some("Alert created, waiting for confirmation"),
    })
}

/// The patient dismissed the countdown.
#[utoipa::path(
    post,
    path = "/{id}/cancel",
    tags = ["Alerts"],
    params(
        ("id" = i32, Path, description = "Alert ID to cancel")
    ),
    responses(
        (status = 200, description = "Alert cancelled", body = StdResponse<AlertEntity, String>),
        (status = 409, description = "Alert is no longer pending")
    )
)]
async fn cancel_alert(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(caller_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    ensure_alert_owner(&state, id, caller_id).await?;
    let alert = state.alerts.cancel(id).await?;

    Ok(StdResponse {
        data: Some(alert),
        message: Some("Alert cancelled"),
    })
}

/// The countdown ran out: escalate to the patient's primary contacts.
#[utoipa::path(
    post,
    path = "/{id}/send",
    tags = ["Alerts"],
    params(
        ("id" = i32, Path, description = "Alert ID to send")
    ),
    responses(
        (status = 200, description = "Alert sent", body = StdResponse<AlertEntity, String>),
        (status = 409, description = "Alert is no longer pending")
    )
)]
async fn send_alert(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(caller_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    ensure_alert_owner(&state, id, caller_id).await?;
    let alert = state.alerts.confirm_and_send(id).await?;

    Ok(StdResponse {
        data: Some(alert),
        message: Some("Alert sent to primary contacts"),
    })
}

/// A caregiver takes responsibility for a sent alert.
#[utoipa::path(
    post,
    path = "/{id}/acknowledge",
    tags = ["Alerts"],
    params(
        ("id" = i32, Path, description = "Alert ID to acknowledge")
    ),
    responses(
        (status = 200, description = "Alert acknowledged", body = StdResponse<AlertEntity, String>),
        (status = 403, description = "Caller does not look after this patient"),
        (status = 409, description = "Alert is not awaiting acknowledgement")
    )
)]
async fn acknowledge_alert(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(caregiver_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let alert = state.alerts.get(id).await?;
    if !state
        .graph
        .is_active_relationship(alert.patient_id, caregiver_id)
        .await?
    {
        return Err(AppError::ForbiddenResource(format!(
            "User #{caregiver_id} is not a caregiver of patient #{}",
            alert.patient_id
        )));
    }

    let alert = state.alerts.acknowledge(id, caregiver_id).await?;

    Ok(StdResponse {
        data: Some(alert),
        message: Some("Alert acknowledged"),
    })
}

/// Alert history of a patient, newest first.
#[utoipa::path(
    get,
    path = "/patient/{patient_id}",
    tags = ["Alerts"],
    params(
        ("patient_id" = i32, Path, description = "Patient whose alerts to list")
    ),
    responses(
        (status = 200, description = "List patient alerts", body = StdResponse<Vec<AlertEntity>, String>),
        (status = 403, description = "Caller is outside the patient's care circle")
    )
)]
async fn get_patient_alerts(
    Path(patient_id): Path<i32>,
    State(state): State<AppState>,
    Extension(caller_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    ensure_care_circle(&state, patient_id, caller_id).await?;
    let alerts = state.alerts.list_for_patient(patient_id).await?;

    Ok(StdResponse {
        data: Some(alerts),
        message: Some("Get patient alerts successfully"),
    })
}

/// Alerts of every patient the caller actively looks after, newest first.
#[utoipa::path(
    get,
    path = "/caregiving",
    tags = ["Alerts"],
    responses(
        (status = 200, description = "List alerts of the caller's patients", body = StdResponse<Vec<AlertEntity>, String>)
    )
)]
async fn get_caregiving_alerts(
    State(state): State<AppState>,
    Extension(caregiver_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let mut alerts = Vec::new();
    for patient_id in state.graph.patients_of(caregiver_id).await? {
        alerts.extend(state.alerts.list_for_patient(patient_id).await?);
    }
    alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

    Ok(StdResponse {
        data: Some(alerts),
        message: Some("Get caregiving alerts successfully"),
    })
}

async fn ensure_alert_owner(state: &AppState, alert_id: i32, caller_id: i32) -> Result<(), AppError> {
    let alert = state.alerts.get(alert_id).await?;
    if alert.patient_id != caller_id {
        return Err(AppError::ForbiddenResource(
            "Only the patient can confirm or cancel their alert".into(),
        ));
    }
    Ok(())
}
