use axum::{Extension, Json, extract::State, response::IntoResponse};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    models::{DeviceKind, DeviceTokenEntity},
    routes::middleware,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/notifications",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(register_token))
            .route_layer(axum::middleware::from_fn(middleware::caller_identity)),
    )
}

#[derive(Deserialize, ToSchema)]
struct RegisterTokenReq {
    pub token: String,
    pub device_kind: DeviceKind,
}

/// Register the push token of the caller's device. A token already known under another account
/// moves to the caller.
#[utoipa::path(
    post,
    path = "/tokens",
    tags = ["Notifications"],
    request_body = RegisterTokenReq,
    responses(
        (status = 200, description = "Token registered", body = StdResponse<DeviceTokenEntity, String>),
        (status = 400, description = "Empty token")
    )
)]
async fn register_token(
    State(state): State<AppState>,
    Extension(user_id): Extension<i32>,
    Json(body): Json<RegisterTokenReq>,
) -> Result<impl IntoResponse, AppError> {
    let token = body.token.trim();
    if token.is_empty() {
        return Err(AppError::BadRequest("Device token is required".into()));
    }

    let row = state
        .devices
        .register(user_id, token, body.device_kind)
        .await?;

    Ok(StdResponse {
        data: Some(row),
        message: Some("Device token registered"),
    })
}
