use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use super::{PushOutcome, PushSender};

#[derive(Serialize)]
struct FcmRequest<'a> {
    message: FcmMessage<'a>,
}

#[derive(Serialize)]
struct FcmMessage<'a> {
    token: &'a str,
    notification: FcmNotification<'a>,
}

#[derive(Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
}

/// Firebase Cloud Messaging HTTP v1 sender.
pub struct FcmSender {
    client: Client,
    endpoint: String,
    access_token: Option<String>,
}

impl FcmSender {
    pub fn new(endpoint: String, access_token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to build the FCM HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            access_token,
        })
    }
}

#[async_trait]
impl PushSender for FcmSender {
    async fn send(&self, token: &str, title: &str, body: &str) -> PushOutcome {
        let payload = FcmRequest {
            message: FcmMessage {
                token,
                notification: FcmNotification { title, body },
            },
        };

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(access_token) = &self.access_token {
            request = request.bearer_auth(access_token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return PushOutcome::TransientFailure(format!("FCM unreachable: {err}")),
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        classify_response(status, &body)
    }
}

/// Maps an FCM reply to a push outcome. Only replies that say the token itself is bad count as
/// invalid; everything else may succeed on a later attempt.
pub fn classify_response(status: StatusCode, body: &str) -> PushOutcome {
    if status.is_success() {
        return PushOutcome::Delivered;
    }

    let token_rejected = status == StatusCode::NOT_FOUND
        || (status == StatusCode::BAD_REQUEST
            && (body.contains("UNREGISTERED") || body.contains("INVALID_ARGUMENT")));

    if token_rejected {
        PushOutcome::InvalidToken
    } else {
        PushOutcome::TransientFailure(format!("FCM answered {status}"))
    }
}
