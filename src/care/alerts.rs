//! Fall alert escalation: `PENDING -> CANCELLED | SENT`, `SENT -> ACKNOWLEDGED`.
//!
//! PENDING models the countdown shown on the patient's phone. The server does not time it:
//! whoever calls [`AlertLifecycle::confirm_and_send`] decides when the countdown is over, so a
//! misbehaving client can escalate immediately.

use std::{sync::Arc, time::Duration};

use tracing::{info, warn};

use crate::{
    clock::Clock,
    error::{CoreError, CoreResult, bounded},
    models::{AlertEntity, AlertStatus, AlertType, CreateAlertEntity},
    notify::{Audience, Notification, NotificationQueue},
    store::{AlertStore, UserDirectory},
};

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub patient_id: i32,
    pub alert_type: AlertType,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub details: Option<String>,
}

pub struct AlertLifecycle {
    alerts: Arc<dyn AlertStore>,
    directory: Arc<dyn UserDirectory>,
    queue: NotificationQueue,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl AlertLifecycle {
    pub fn new(
        alerts: Arc<dyn AlertStore>,
        directory: Arc<dyn UserDirectory>,
        queue: NotificationQueue,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            alerts,
            directory,
            queue,
            clock,
            timeout,
        }
    }

    /// Records a detected fall. Always starts PENDING.
    pub async fn create(&self, new: NewAlert) -> CoreResult<AlertEntity> {
        self.display_name(new.patient_id, "Patient").await?;

        let alert = bounded(
            self.timeout,
            "create alert",
            self.alerts.insert_alert(CreateAlertEntity {
                patient_id: new.patient_id,
                alert_type: new.alert_type,
                created_at: self.clock.now(),
                latitude: new.latitude,
                longitude: new.longitude,
                status: AlertStatus::Pending,
                details: new.details,
            }),
        )
        .await?;

        info!(
            "Alert #{} ({}) created for patient #{}, waiting for confirmation",
            alert.id, alert.alert_type, alert.patient_id
        );
        Ok(alert)
    }

    /// The patient dismissed the countdown.
    pub async fn cancel(&self, alert_id: i32) -> CoreResult<AlertEntity> {
        let alert = self
            .transition(alert_id, AlertStatus::Pending, AlertStatus::Cancelled)
            .await?;
        info!("Alert #{} has been cancelled by the patient", alert_id);
        Ok(alert)
    }

    /// The countdown ran out: mark SENT, then queue the emergency push to primary contacts.
    ///
    /// The push is queued only after the SENT state is stored, and its outcome never rolls
    /// the state back.
    pub async fn confirm_and_send(&self, alert_id: i32) -> CoreResult<AlertEntity> {
        let alert = self
            .transition(alert_id, AlertStatus::Pending, AlertStatus::Sent)
            .await?;
        info!("Alert #{} has been sent", alert_id);

        let patient_name = self.name_for_message(alert.patient_id).await;
        let (title, body) = match alert.alert_type {
            AlertType::Fall => (
                "EMERGENCY: Fall detected",
                format!("{patient_name} has fallen! Tap to see their location and respond."),
            ),
            AlertType::Manual => (
                "EMERGENCY: Help requested",
                format!("{patient_name} asked for help! Tap to see their location and respond."),
            ),
        };

        self.queue.enqueue(Notification {
            audience: Audience::PrimaryContactsOf {
                patient_id: alert.patient_id,
                except: None,
            },
            title: title.to_owned(),
            body,
        });

        Ok(alert)
    }

    /// A caregiver commits to responding. Other primary contacts are told who is on it.
    pub async fn acknowledge(&self, alert_id: i32, caregiver_id: i32) -> CoreResult<AlertEntity> {
        let caregiver_name = self.display_name(caregiver_id, "Caregiver").await?;

        let alert = self
            .transition_with(
                alert_id,
                AlertStatus::Sent,
                AlertStatus::Acknowledged,
                Some(caregiver_id),
            )
            .await?;
        info!(
            "Alert #{} has been acknowledged by caregiver #{}",
            alert_id, caregiver_id
        );

        let patient_name = self.name_for_message(alert.patient_id).await;
        self.queue.enqueue(Notification {
            audience: Audience::PrimaryContactsOf {
                patient_id: alert.patient_id,
                except: Some(caregiver_id),
            },
            title: "Alert update".to_owned(),
            body: format!("{caregiver_name} is responding to {patient_name}'s emergency."),
        });

        Ok(alert)
    }

    pub async fn get(&self, alert_id: i32) -> CoreResult<AlertEntity> {
        bounded(self.timeout, "load alert", self.alerts.find_alert(alert_id))
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Alert #{alert_id}")))
    }

    /// Newest first.
    pub async fn list_for_patient(&self, patient_id: i32) -> CoreResult<Vec<AlertEntity>> {
        bounded(
            self.timeout,
            "load patient alerts",
            self.alerts.alerts_for_patient(patient_id),
        )
        .await
    }

    async fn transition(
        &self,
        alert_id: i32,
        expected: AlertStatus,
        next: AlertStatus,
    ) -> CoreResult<AlertEntity> {
        self.transition_with(alert_id, expected, next, None).await
    }

    async fn transition_with(
        &self,
        alert_id: i32,
        expected: AlertStatus,
        next: AlertStatus,
        acknowledged_by: Option<i32>,
    ) -> CoreResult<AlertEntity> {
        debug_assert!(expected.can_transition_to(next));

        let updated = bounded(
            self.timeout,
            "update alert status",
            self.alerts
                .compare_and_set_status(alert_id, expected, next, acknowledged_by),
        )
        .await?;

        if let Some(alert) = updated {
            return Ok(alert);
        }

        let current = bounded(self.timeout, "load alert", self.alerts.find_alert(alert_id)).await?;
        match current {
            None => Err(CoreError::NotFound(format!("Alert #{alert_id}"))),
            Some(alert) => {
                warn!(
                    "Alert #{} is {}, refusing move to {}",
                    alert_id, alert.status, next
                );
                Err(CoreError::InvalidTransition {
                    alert_id,
                    current: alert.status,
                    attempted: next,
                })
            }
        }
    }

    async fn display_name(&self, user_id: i32, what: &str) -> CoreResult<String> {
        bounded(self.timeout, "load user", self.directory.find_user(user_id))
            .await?
            .map(|user| user.display_name())
            .ok_or_else(|| CoreError::NotFound(format!("{what} #{user_id}")))
    }

    // The transition already happened; a failed name lookup only degrades the message text.
    async fn name_for_message(&self, patient_id: i32) -> String {
        match self.display_name(patient_id, "Patient").await {
            Ok(name) => name,
            Err(err) => {
                warn!("Could not resolve name of patient #{}: {}", patient_id, err);
                "Your patient".to_owned()
            }
        }
    }
}
