use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::CoreError;

/// Uniform response envelope for every endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct StdResponse<T, M> {
    pub data: Option<T>,
    pub message: Option<M>,
}

impl<T: Serialize, M: Serialize> IntoResponse for StdResponse<T, M> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Missing or invalid X-User-Id header")]
    Unauthorized,

    #[error("{0}")]
    ForbiddenResource(String),

    #[error("{0} is unreachable")]
    ServiceUnreachable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::ForbiddenResource(_) => StatusCode::FORBIDDEN,
            AppError::ServiceUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(what) => AppError::NotFound(what),
            err @ (CoreError::InvalidTransition { .. } | CoreError::ImmutableHistory(_)) => {
                AppError::Conflict(err.to_string())
            }
            CoreError::TransientDependencyFailure(reason) => AppError::ServiceUnreachable(reason),
            CoreError::Other(err) => AppError::Other(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Other(err) => {
                tracing::error!("Internal error: {:#}", err);
                "Internal server error".to_string()
            }
            AppError::ServiceUnreachable(reason) => {
                tracing::warn!("Dependency unavailable: {}", reason);
                "Service temporarily unavailable, please retry".to_string()
            }
            other => other.to_string(),
        };

        (
            status,
            StdResponse::<(), String> {
                data: None,
                message: Some(message),
            },
        )
            .into_response()
    }
}
