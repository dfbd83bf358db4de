mod common;

use std::sync::Arc;

use chrono::TimeDelta;
use common::{Fixture, at};
use memento_careservice::{
    care::{AlertLifecycle, NewAlert},
    error::CoreError,
    models::{AlertStatus, AlertType},
    notify::Audience,
};

fn fall(patient_id: i32) -> NewAlert {
    NewAlert {
        patient_id,
        alert_type: AlertType::Fall,
        latitude: Some(52.52),
        longitude: Some(13.40),
        details: None,
    }
}

#[tokio::test]
async fn new_alerts_start_pending() {
    let mut fx = Fixture::new(at(9, 0));
    let patient = fx.patient("Ada", "Lovelace").await;

    let alert = fx.services.state.alerts.create(fall(patient.id)).await.unwrap();

    assert_eq!(alert.status, AlertStatus::Pending);
    assert_eq!(alert.created_at, at(9, 0));
    assert_eq!(alert.version, 0);
    assert!(fx.drain_notifications().is_empty());
}

#[tokio::test]
async fn unknown_patient_cannot_raise_alerts() {
    let fx = Fixture::new(at(9, 0));

    let err = fx.services.state.alerts.create(fall(404)).await.unwrap_err();

    assert!(matches!(err, CoreError::NotFound(_)));
}

#[tokio::test]
async fn cancelled_alert_can_never_be_sent() {
    let mut fx = Fixture::new(at(9, 0));
    let patient = fx.patient("Ada", "Lovelace").await;
    let alerts = fx.services.state.alerts.clone();
    let alert = alerts.create(fall(patient.id)).await.unwrap();

    let cancelled = alerts.cancel(alert.id).await.unwrap();
    assert_eq!(cancelled.status, AlertStatus::Cancelled);

    let err = alerts.confirm_and_send(alert.id).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::InvalidTransition {
            current: AlertStatus::Cancelled,
            attempted: AlertStatus::Sent,
            ..
        }
    ));
    assert!(fx.drain_notifications().is_empty());
}

#[tokio::test]
async fn sending_queues_the_emergency_push_for_primary_contacts() {
    let mut fx = Fixture::new(at(9, 0));
    let patient = fx.patient("Ada", "Lovelace").await;
    let alerts = fx.services.state.alerts.clone();
    let alert = alerts.create(fall(patient.id)).await.unwrap();

    let sent = alerts.confirm_and_send(alert.id).await.unwrap();

    assert_eq!(sent.status, AlertStatus::Sent);
    assert_eq!(sent.version, 1);
    let queued = fx.drain_notifications();
    assert_eq!(queued.len(), 1);
    assert_eq!(
        queued[0].audience,
        Audience::PrimaryContactsOf {
            patient_id: patient.id,
            except: None
        }
    );
    assert_eq!(queued[0].title, "EMERGENCY: Fall detected");
    assert!(queued[0].body.contains("Ada Lovelace"));
}

#[tokio::test]
async fn manual_alerts_ask_for_help() {
    let mut fx = Fixture::new(at(9, 0));
    let patient = fx.patient("Ada", "Lovelace").await;
    let alerts = fx.services.state.alerts.clone();
    let alert = alerts
        .create(NewAlert {
            alert_type: AlertType::Manual,
            ..fall(patient.id)
        })
        .await
        .unwrap();

    alerts.confirm_and_send(alert.id).await.unwrap();

    assert_eq!(fx.drain_notifications()[0].title, "EMERGENCY: Help requested");
}

#[tokio::test]
async fn acknowledging_tells_the_other_contacts_who_responds() {
    let mut fx = Fixture::new(at(9, 0));
    let patient = fx.patient("Ada", "Lovelace").await;
    let son = fx.relative("Byron", "King").await;
    fx.link(&patient, &son, true).await;
    let alerts = fx.services.state.alerts.clone();
    let alert = alerts.create(fall(patient.id)).await.unwrap();
    alerts.confirm_and_send(alert.id).await.unwrap();
    fx.drain_notifications();

    let acked = alerts.acknowledge(alert.id, son.id).await.unwrap();

    assert_eq!(acked.status, AlertStatus::Acknowledged);
    assert_eq!(acked.acknowledged_by, Some(son.id));
    let queued = fx.drain_notifications();
    assert_eq!(queued.len(), 1);
    assert_eq!(
        queued[0].audience,
        Audience::PrimaryContactsOf {
            patient_id: patient.id,
            except: Some(son.id)
        }
    );
    assert!(queued[0].body.contains("Byron King"));
    assert!(queued[0].body.contains("Ada Lovelace"));
}

#[tokio::test]
async fn pending_alerts_cannot_be_acknowledged() {
    let fx = Fixture::new(at(9, 0));
    let patient = fx.patient("Ada", "Lovelace").await;
    let son = fx.relative("Byron", "King").await;
    let alerts = fx.services.state.alerts.clone();
    let alert = alerts.create(fall(patient.id)).await.unwrap();

    let err = alerts.acknowledge(alert.id, son.id).await.unwrap_err();

    assert!(matches!(
        err,
        CoreError::InvalidTransition {
            current: AlertStatus::Pending,
            attempted: AlertStatus::Acknowledged,
            ..
        }
    ));
}

#[tokio::test]
async fn second_acknowledgement_is_rejected() {
    let fx = Fixture::new(at(9, 0));
    let patient = fx.patient("Ada", "Lovelace").await;
    let son = fx.relative("Byron", "King").await;
    let doctor = fx.doctor("Gregory", "House").await;
    let alerts = fx.services.state.alerts.clone();
    let alert = alerts.create(fall(patient.id)).await.unwrap();
    alerts.confirm_and_send(alert.id).await.unwrap();

    alerts.acknowledge(alert.id, son.id).await.unwrap();
    let err = alerts.acknowledge(alert.id, doctor.id).await.unwrap_err();

    assert!(matches!(err, CoreError::InvalidTransition { .. }));
    let stored = alerts.get(alert.id).await.unwrap();
    assert_eq!(stored.acknowledged_by, Some(son.id));
}

#[tokio::test]
async fn missing_alerts_are_not_found() {
    let fx = Fixture::new(at(9, 0));
    let alerts = fx.services.state.alerts.clone();

    assert!(matches!(
        alerts.cancel(999).await.unwrap_err(),
        CoreError::NotFound(_)
    ));
    assert!(matches!(
        alerts.confirm_and_send(999).await.unwrap_err(),
        CoreError::NotFound(_)
    ));
}

#[tokio::test]
async fn patient_history_is_newest_first() {
    let fx = Fixture::new(at(9, 0));
    let patient = fx.patient("Ada", "Lovelace").await;
    let alerts = fx.services.state.alerts.clone();

    let first = alerts.create(fall(patient.id)).await.unwrap();
    fx.clock.advance(TimeDelta::minutes(5));
    let second = alerts.create(fall(patient.id)).await.unwrap();

    let history = alerts.list_for_patient(patient.id).await.unwrap();
    let ids: Vec<i32> = history.iter().map(|alert| alert.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
}

async fn race_once(alerts: Arc<AlertLifecycle>, patient_id: i32) {
    let alert = alerts.create(fall(patient_id)).await.unwrap();

    let cancel = tokio::spawn({
        let alerts = alerts.clone();
        async move { alerts.cancel(alert.id).await }
    });
    let send = tokio::spawn({
        let alerts = alerts.clone();
        async move { alerts.confirm_and_send(alert.id).await }
    });
    let (cancel, send) = (cancel.await.unwrap(), send.await.unwrap());

    let stored = alerts.get(alert.id).await.unwrap();
    match (cancel, send) {
        (Ok(_), Err(CoreError::InvalidTransition { .. })) => {
            assert_eq!(stored.status, AlertStatus::Cancelled)
        }
        (Err(CoreError::InvalidTransition { .. }), Ok(_)) => {
            assert_eq!(stored.status, AlertStatus::Sent)
        }
        other => panic!("exactly one transition must win, got {other:?}"),
    }
    assert_eq!(stored.version, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_and_send_race_has_exactly_one_winner() {
    let mut fx = Fixture::new(at(9, 0));
    let patient = fx.patient("Ada", "Lovelace").await;
    let alerts = fx.services.state.alerts.clone();

    for _ in 0..50 {
        race_once(alerts.clone(), patient.id).await;
    }

    let sent = alerts
        .list_for_patient(patient.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|alert| alert.status == AlertStatus::Sent)
        .count();
    assert_eq!(fx.drain_notifications().len(), sent);
}

#[tokio::test]
async fn sent_alert_cannot_be_cancelled() {
    let mut fx = Fixture::new(at(9, 0));
    let patient = fx.patient("Ada", "Lovelace").await;
    let alerts = fx.services.state.alerts.clone();
    let alert = alerts.create(fall(patient.id)).await.unwrap();
    alerts.confirm_and_send(alert.id).await.unwrap();
    fx.drain_notifications();

    let err = alerts.cancel(alert.id).await.unwrap_err();

    assert!(matches!(
        err,
        CoreError::InvalidTransition {
            current: AlertStatus::Sent,
            attempted: AlertStatus::Cancelled,
            ..
        }
    ));
    assert_eq!(alerts.get(alert.id).await.unwrap().status, AlertStatus::Sent);
    assert!(fx.drain_notifications().is_empty());
}

#[tokio::test]
async fn acknowledged_alert_never_goes_back() {
    let mut fx = Fixture::new(at(9, 0));
    let patient = fx.patient("Ada", "Lovelace").await;
    let son = fx.relative("Byron", "King").await;
    fx.link(&patient, &son, true).await;
    let alerts = fx.services.state.alerts.clone();
    let alert = alerts.create(fall(patient.id)).await.unwrap();
    alerts.confirm_and_send(alert.id).await.unwrap();
    alerts.acknowledge(alert.id, son.id).await.unwrap();
    fx.drain_notifications();

    let cancel = alerts.cancel(alert.id).await.unwrap_err();
    assert!(matches!(
        cancel,
        CoreError::InvalidTransition {
            current: AlertStatus::Acknowledged,
            attempted: AlertStatus::Cancelled,
            ..
        }
    ));

    let resend = alerts.confirm_and_send(alert.id).await.unwrap_err();
    assert!(matches!(
        resend,
        CoreError::InvalidTransition {
            current: AlertStatus::Acknowledged,
            attempted: AlertStatus::Sent,
            ..
        }
    ));

    let stored = alerts.get(alert.id).await.unwrap();
    assert_eq!(stored.status, AlertStatus::Acknowledged);
    assert_eq!(stored.acknowledged_by, Some(son.id));
    assert_eq!(stored.version, 2);
    assert!(fx.drain_notifications().is_empty());
}
