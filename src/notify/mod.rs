//! Best-effort push notification fan-out.
//!
//! State transitions only enqueue a [`Notification`]; the dispatcher task resolves recipients
//! and devices and pushes to every device concurrently. Delivery is at-most-once: transient
//! failures are logged and dropped, tokens the provider rejects as invalid are deleted.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinSet,
};
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::{
    care::CareRelationshipGraph, config::PushConfig, error::bounded, shutdown::Shutdown,
    store::TokenRegistry,
};

pub mod devices;
pub mod fcm;

pub use devices::DeviceRegistry;
pub use fcm::FcmSender;

/// Result of one push attempt as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// The device is gone for good (unregistered or malformed token).
    InvalidToken,
    TransientFailure(String),
}

/// Push transport capability.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, token: &str, title: &str, body: &str) -> PushOutcome;
}

/// Sender used when no push provider is configured.
#[derive(Debug, Default)]
pub struct LogOnlySender;

#[async_trait]
impl PushSender for LogOnlySender {
    async fn send(&self, token: &str, title: &str, body: &str) -> PushOutcome {
        info!("[push disabled] to {}: {} - {}", token, title, body);
        PushOutcome::Delivered
    }
}

pub fn sender_from_config(config: &PushConfig) -> Result<Arc<dyn PushSender>> {
    match &config.fcm_endpoint {
        Some(endpoint) => Ok(Arc::new(FcmSender::new(
            endpoint.clone(),
            config.fcm_access_token.clone(),
        )?)),
        None => {
            warn!("FCM_ENDPOINT is not set, push notifications will only be logged");
            Ok(Arc::new(LogOnlySender))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Active primary contacts of the patient, optionally leaving one caregiver out.
    PrimaryContactsOf { patient_id: i32, except: Option<i32> },
    Users(Vec<i32>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub audience: Audience,
    pub title: String,
    pub body: String,
}

/// Producer side of the notification queue.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    tx: UnboundedSender<Notification>,
}

impl NotificationQueue {
    pub fn channel() -> (Self, UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Never blocks. Returns `false` if the dispatcher is gone.
    pub fn enqueue(&self, notification: Notification) -> bool {
        match self.tx.send(notification) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    "Notification dropped, dispatcher is not running: {}",
                    err.0.title
                );
                false
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    pub recipients: usize,
    pub recipients_without_tokens: usize,
    pub failed_lookups: usize,
    pub delivered: usize,
    pub invalid_tokens_removed: usize,
    /// Rejected by the push service but still stored because the delete failed.
    pub invalid_tokens_kept: usize,
    pub transient_failures: usize,
}

enum Dispatch {
    Delivered,
    InvalidToken,
    InvalidTokenKept,
    Transient,
}

pub struct NotificationFanout {
    graph: CareRelationshipGraph,
    tokens: Arc<dyn TokenRegistry>,
    sender: Arc<dyn PushSender>,
    push_timeout: Duration,
    storage_timeout: Duration,
}

impl NotificationFanout {
    pub fn new(
        graph: CareRelationshipGraph,
        tokens: Arc<dyn TokenRegistry>,
        sender: Arc<dyn PushSender>,
        push_timeout: Duration,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            graph,
            tokens,
            sender,
            push_timeout,
            storage_timeout,
        }
    }

    /// Resolves the audience, then pushes to every device of every recipient.
    pub async fn deliver(&self, notification: &Notification) -> FanoutReport {
        let recipients = match &notification.audience {
            Audience::Users(ids) => ids.clone(),
            Audience::PrimaryContactsOf { patient_id, except } => {
                match self.graph.primary_contacts_of(*patient_id).await {
                    Ok(contacts) => contacts
                        .into_iter()
                        .filter(|id| Some(*id) != *except)
                        .collect(),
                    Err(err) => {
                        warn!(
                            "Could not resolve primary contacts of patient #{}: {}",
                            patient_id, err
                        );
                        return FanoutReport {
                            failed_lookups: 1,
                            ..FanoutReport::default()
                        };
                    }
                }
            }
        };

        if recipients.is_empty() {
            warn!(
                "No recipient for \"{}\" ({:?}), nobody was notified",
                notification.title, notification.audience
            );
        }

        self.notify(&recipients, &notification.title, &notification.body)
            .await
    }

    /// Pushes to all devices of `recipients`. Never fails as a whole.
    pub async fn notify(&self, recipients: &[i32], title: &str, body: &str) -> FanoutReport {
        let mut report = FanoutReport {
            recipients: recipients.len(),
            ..FanoutReport::default()
        };

        let lookups = recipients.iter().map(|&user_id| async move {
            let tokens = bounded(
                self.storage_timeout,
                "load device tokens",
                self.tokens.tokens_for_user(user_id),
            )
            .await;
            (user_id, tokens)
        });

        let mut dispatches = Vec::new();
        for (user_id, tokens) in join_all(lookups).await {
            match tokens {
                Ok(tokens) if tokens.is_empty() => {
                    report.recipients_without_tokens += 1;
                    warn!(
                        "User #{} has no registered device, cannot push \"{}\"",
                        user_id, title
                    );
                }
                Ok(tokens) => {
                    dispatches.extend(
                        tokens
                            .into_iter()
                            .map(|row| self.dispatch(user_id, row.token, title, body)),
                    );
                }
                Err(err) => {
                    report.failed_lookups += 1;
                    warn!("Could not load devices of user #{}: {}", user_id, err);
                }
            }
        }

        for outcome in join_all(dispatches).await {
            match outcome {
                Dispatch::Delivered => report.delivered += 1,
                Dispatch::InvalidToken => report.invalid_tokens_removed += 1,
                Dispatch::InvalidTokenKept => report.invalid_tokens_kept += 1,
                Dispatch::Transient => report.transient_failures += 1,
            }
        }

        info!(
            "Fan-out \"{}\": {} recipient(s), {} delivered, {} invalid token(s) removed, {} kept, {} transient failure(s), {} without devices",
            title,
            report.recipients,
            report.delivered,
            report.invalid_tokens_removed,
            report.invalid_tokens_kept,
            report.transient_failures,
            report.recipients_without_tokens
        );
        report
    }

    async fn dispatch(&self, user_id: i32, token: String, title: &str, body: &str) -> Dispatch {
        let outcome = tokio::time::timeout(self.push_timeout, self.sender.send(&token, title, body))
            .await
            .unwrap_or_else(|_| {
                PushOutcome::TransientFailure(format!(
                    "timed out after {}ms",
                    self.push_timeout.as_millis()
                ))
            });

        match outcome {
            PushOutcome::Delivered => Dispatch::Delivered,
            PushOutcome::InvalidToken => {
                match bounded(
                    self.storage_timeout,
                    "delete device token",
                    self.tokens.delete_token(&token),
                )
                .await
                {
                    Ok(_) => {
                        warn!("Invalid device token of user #{} deleted", user_id);
                        Dispatch::InvalidToken
                    }
                    Err(err) => {
                        warn!(
                            "Could not delete invalid device token of user #{}: {}",
                            user_id, err
                        );
                        Dispatch::InvalidTokenKept
                    }
                }
            }
            PushOutcome::TransientFailure(reason) => {
                warn!("Push to a device of user #{} failed: {}", user_id, reason);
                Dispatch::Transient
            }
        }
    }
}

/// Consumes the queue until shutdown, running each notification as its own task. Jobs still
/// running at shutdown are abandoned.
pub async fn run_dispatcher(
    fanout: Arc<NotificationFanout>,
    mut jobs: UnboundedReceiver<Notification>,
    mut shutdown: Shutdown,
) {
    let mut in_flight = JoinSet::new();
    info!("Notification dispatcher started");

    loop {
        tokio::select! {
            job = jobs.recv() => match job {
                Some(notification) => {
                    let fanout = fanout.clone();
                    let job_id = Uuid::new_v4();
                    in_flight.spawn(
                        async move { fanout.deliver(&notification).await }
                            .instrument(info_span!("fanout", %job_id)),
                    );
                }
                None => break,
            },
            Some(finished) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(err) = finished {
                    warn!("Notification job failed: {}", err);
                }
            }
            _ = shutdown.wait() => break,
        }
    }

    if !in_flight.is_empty() {
        warn!(
            "Abandoning {} in-flight notification job(s)",
            in_flight.len()
        );
    }
    in_flight.abort_all();
    info!("Notification dispatcher stopped");
}
