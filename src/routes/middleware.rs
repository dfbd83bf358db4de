use axum::{extract::Request, middleware::Next, response::Response};

use crate::app_error::AppError;

/// Header set by the gateway once the caller's JWT has been verified.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Puts the authenticated user id into the request as `Extension<i32>`.
pub async fn caller_identity(mut req: Request, next: Next) -> Result<Response, AppError> {
    let user_id = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<i32>().ok())
        .ok_or(AppError::Unauthorized)?;

    req.extensions_mut().insert(user_id);
    Ok(next.run(req).await)
}
