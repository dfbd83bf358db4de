use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::IntoParams;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    care::{NewSchedule, ScheduleUpdate, ScheduleView},
    models::DoseView,
    routes::{ensure_care_circle, middleware},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/medications",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_my_logs))
            .routes(utoipa_axum::routes!(take_dose))
            .routes(utoipa_axum::routes!(create_schedule))
            .routes(utoipa_axum::routes!(update_schedule, deactivate_schedule))
            .route_layer(axum::middleware::from_fn(middleware::caller_identity)),
    )
}

#[derive(Deserialize, IntoParams)]
struct LogsQuery {
    /// Day to list, `YYYY-MM-DD`. Defaults to today.
    pub date: Option<NaiveDate>,
}

/// Dose log of the calling patient for one day, oldest first.
#[utoipa::path(
    get,
    path = "/logs/me",
    tags = ["Medications"],
    params(LogsQuery),
    responses(
        (status = 200, description = "List my dose records", body = StdResponse<Vec<DoseView>, String>)
    )
)]
async fn get_my_logs(
    State(state): State<AppState>,
    Extension(patient_id): Extension<i32>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let records = match query.date {
        Some(date) => state.doses.list_for_day(patient_id, date).await?,
        None => state.doses.list_for_today(patient_id).await?,
    };

    Ok(StdResponse {
        data: Some(records),
        message: Some("Get my dose records successfully"),
    })
}

/// Confirm the calling patient took the dose of a slot just now.
#[utoipa::path(
    post,
    path = "/logs/{slot_id}/take",
    tags = ["Medications"],
    params(
        ("slot_id" = i32, Path, description = "Schedule slot the dose belongs to")
    ),
    responses(
        (status = 200, description = "Dose recorded", body = StdResponse<DoseView, String>),
        (status = 404, description = "Unknown slot or not one of the caller's")
    )
)]
async fn take_dose(
    Path(slot_id): Path<i32>,
    State(state): State<AppState>,
    Extension(patient_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let record = state.doses.log_taken(patient_id, slot_id).await?;

    Ok(StdResponse {
        data: Some(record),
        message: Some("Dose recorded"),
    })
}

/// Create a medication schedule for a patient in the caller's care circle.
#[utoipa::path(
    post,
    path = "/schedules",
    tags = ["Medications"],
    request_body = NewSchedule,
    responses(
        (status = 200, description = "Schedule created", body = StdResponse<ScheduleView, String>),
        (status = 400, description = "Timed schedule without times"),
        (status = 403, description = "Caller is outside the patient's care circle")
    )
)]
async fn create_schedule(
    State(state): State<AppState>,
    Extension(caller_id): Extension<i32>,
    Json(body): Json<NewSchedule>,
) -> Result<impl IntoResponse, AppError> {
    if body.medication_name.trim().is_empty() {
        return Err(AppError::BadRequest("Medication name is required".into()));
    }
    if !body.is_prn && body.times.is_empty() {
        return Err(AppError::BadRequest(
            "A scheduled medication needs at least one time".into(),
        ));
    }
    ensure_care_circle(&state, body.patient_id, caller_id).await?;

    let view = state.schedules.create(body).await?;

    Ok(StdResponse {
        data: Some(view),
        message: Some("Schedule created"),
    })
}

/// Edit a schedule. Fails with 409 once doses were recorded and a protected field changes.
#[utoipa::path(
    put,
    path = "/schedules/{id}",
    tags = ["Medications"],
    params(
        ("id" = i32, Path, description = "Schedule ID to update")
    ),
    request_body = ScheduleUpdate,
    responses(
        (status = 200, description = "Schedule updated", body = StdResponse<ScheduleView, String>),
        (status = 409, description = "Change would rewrite recorded dose history")
    )
)]
async fn update_schedule(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(caller_id): Extension<i32>,
    Json(body): Json<ScheduleUpdate>,
) -> Result<impl IntoResponse, AppError> {
    if body.medication_name.trim().is_empty() {
        return Err(AppError::BadRequest("Medication name is required".into()));
    }
    let existing = state.schedules.get(id).await?;
    ensure_care_circle(&state, existing.schedule.patient_id, caller_id).await?;

    let view = state.schedules.update(id, body).await?;

    Ok(StdResponse {
        data: Some(view),
        message: Some("Schedule updated"),
    })
}

/// Stop a schedule. Recorded doses are kept.
#[utoipa::path(
    delete,
    path = "/schedules/{id}",
    tags = ["Medications"],
    params(
        ("id" = i32, Path, description = "Schedule ID to deactivate")
    ),
    responses(
        (status = 200, description = "Schedule deactivated", body = StdResponse<ScheduleView, String>)
    )
)]
async fn deactivate_schedule(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(caller_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let existing = state.schedules.get(id).await?;
    ensure_care_circle(&state, existing.schedule.patient_id, caller_id).await?;

    let view = state.schedules.deactivate(id).await?;

    Ok(StdResponse {
        data: Some(view),
        message: Some("Schedule deactivated"),
    })
}
