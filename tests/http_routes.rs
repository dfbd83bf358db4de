mod common;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use common::{Fixture, at, time};
use http_body_util::BodyExt;
use memento_careservice::routes;
use serde_json::{Value, json};
use tower::ServiceExt;

fn app(fx: &Fixture) -> Router {
    let (router, _) = routes::routes_with_openapi().split_for_parts();
    router.with_state(fx.services.state.clone())
}

fn request(method: &str, uri: &str, caller: Option<i32>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(caller) = caller {
        builder = builder.header("X-User-Id", caller.to_string());
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn call(fx: &Fixture, req: Request<Body>) -> (StatusCode, Value) {
    let response = app(fx).oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn requests_without_caller_identity_are_unauthorized() {
    let fx = Fixture::new(at(9, 0));

    let (status, body) = call(&fx, request("POST", "/alerts/fall", None, Some(json!({})))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn patient_raises_and_sends_a_fall_alert() {
    let fx = Fixture::new(at(9, 0));
    let patient = fx.patient("Ada", "Lovelace").await;

    let (status, body) = call(
        &fx,
        request(
            "POST",
            "/alerts/fall",
            Some(patient.id),
            Some(json!({ "latitude": 52.5, "longitude": 13.4 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "PENDING");
    assert_eq!(body["data"]["alert_type"], "FALL");
    let alert_id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = call(
        &fx,
        request("POST", &format!("/alerts/{alert_id}/send"), Some(patient.id), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "SENT");

    let (status, body) = call(
        &fx,
        request("POST", &format!("/alerts/{alert_id}/cancel"), Some(patient.id), None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].as_str().unwrap().contains("SENT"));
}

#[tokio::test]
async fn only_the_patient_controls_the_countdown() {
    let fx = Fixture::new(at(9, 0));
    let patient = fx.patient("Ada", "Lovelace").await;
    let son = fx.relative("Byron", "King").await;
    fx.link(&patient, &son, true).await;
    let (_, body) = call(
        &fx,
        request("POST", "/alerts/fall", Some(patient.id), Some(json!({}))),
    )
    .await;
    let alert_id = body["data"]["id"].as_i64().unwrap();

    let (status, _) = call(
        &fx,
        request("POST", &format!("/alerts/{alert_id}/cancel"), Some(son.id), None),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn acknowledgement_requires_an_active_caregiver() {
    let fx = Fixture::new(at(9, 0));
    let patient = fx.patient("Ada", "Lovelace").await;
    let son = fx.relative("Byron", "King").await;
    let stranger = fx.relative("Eve", "Mallory").await;
    fx.link(&patient, &son, true).await;
    let (_, body) = call(
        &fx,
        request("POST", "/alerts/fall", Some(patient.id), Some(json!({}))),
    )
    .await;
    let alert_id = body["data"]["id"].as_i64().unwrap();
    call(
        &fx,
        request("POST", &format!("/alerts/{alert_id}/send"), Some(patient.id), None),
    )
    .await;

    let (status, _) = call(
        &fx,
        request("POST", &format!("/alerts/{alert_id}/acknowledge"), Some(stranger.id), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &fx,
        request("POST", &format!("/alerts/{alert_id}/acknowledge"), Some(son.id), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ACKNOWLEDGED");
    assert_eq!(body["data"]["acknowledged_by"], son.id);
}

#[tokio::test]
async fn alert_history_is_limited_to_the_care_circle() {
    let fx = Fixture::new(at(9, 0));
    let patient = fx.patient("Ada", "Lovelace").await;
    let doctor = fx.doctor("Gregory", "House").await;
    let stranger = fx.relative("Eve", "Mallory").await;
    fx.link(&patient, &doctor, false).await;
    call(
        &fx,
        request("POST", "/alerts/fall", Some(patient.id), Some(json!({}))),
    )
    .await;
    let uri = format!("/alerts/patient/{}", patient.id);

    let (status, _) = call(&fx, request("GET", &uri, Some(stranger.id), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&fx, request("GET", &uri, Some(doctor.id), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn caregiver_sees_alerts_of_every_active_patient() {
    let fx = Fixture::new(at(9, 0));
    let ada = fx.patient("Ada", "Lovelace").await;
    let grace = fx.patient("Grace", "Hopper").await;
    let hedy = fx.patient("Hedy", "Lamarr").await;
    let doctor = fx.doctor("Gregory", "House").await;
    fx.link(&ada, &doctor, false).await;
    fx.link(&grace, &doctor, true).await;
    for patient in [&ada, &grace, &hedy] {
        call(
            &fx,
            request("POST", "/alerts/fall", Some(patient.id), Some(json!({}))),
        )
        .await;
        fx.clock.advance(chrono::TimeDelta::minutes(1));
    }

    let (status, body) = call(
        &fx,
        request("GET", "/alerts/caregiving", Some(doctor.id), None),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let patients: Vec<i64> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|alert| alert["patient_id"].as_i64().unwrap())
        .collect();
    assert_eq!(patients, vec![grace.id as i64, ada.id as i64]);
}

#[tokio::test]
async fn unknown_alert_is_not_found() {
    let fx = Fixture::new(at(9, 0));
    let patient = fx.patient("Ada", "Lovelace").await;

    let (status, _) = call(
        &fx,
        request("POST", "/alerts/4242/send", Some(patient.id), None),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn patient_logs_a_dose_and_reads_the_day() {
    let fx = Fixture::new(at(8, 20));
    let patient = fx.patient("Ada", "Lovelace").await;
    let view = fx.timed_schedule(patient.id, "Metformin", &[time(8, 0)]).await;

    let (status, body) = call(
        &fx,
        request(
            "POST",
            &format!("/medications/logs/{}/take", view.slots[0].id),
            Some(patient.id),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "TAKEN");

    let (status, body) = call(
        &fx,
        request("GET", "/medications/logs/me?date=2025-03-10", Some(patient.id), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["medication_name"], "Metformin");

    let (_, body) = call(
        &fx,
        request("GET", "/medications/logs/me?date=2025-03-11", Some(patient.id), None),
    )
    .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn someone_elses_slot_is_not_found() {
    let fx = Fixture::new(at(8, 0));
    let ada = fx.patient("Ada", "Lovelace").await;
    let grace = fx.patient("Grace", "Hopper").await;
    let view = fx.timed_schedule(ada.id, "Metformin", &[time(8, 0)]).await;

    let (status, _) = call(
        &fx,
        request(
            "POST",
            &format!("/medications/logs/{}/take", view.slots[0].id),
            Some(grace.id),
            None,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn doctor_manages_a_schedule_until_doses_exist() {
    let fx = Fixture::new(at(8, 0));
    let patient = fx.patient("Ada", "Lovelace").await;
    let doctor = fx.doctor("Gregory", "House").await;
    fx.link(&patient, &doctor, false).await;

    let (status, body) = call(
        &fx,
        request(
            "POST",
            "/medications/schedules",
            Some(doctor.id),
            Some(json!({
                "patient_id": patient.id,
                "doctor_id": doctor.id,
                "medication_name": "Metformin",
                "dosage": "500mg",
                "times": ["08:00:00", "20:00:00"]
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let schedule_id = body["data"]["schedule"]["id"].as_i64().unwrap();
    let slot_id = body["data"]["slots"][0]["id"].as_i64().unwrap();
    assert_eq!(body["data"]["slots"].as_array().unwrap().len(), 2);

    call(
        &fx,
        request(
            "POST",
            &format!("/medications/logs/{slot_id}/take"),
            Some(patient.id),
            None,
        ),
    )
    .await;

    let (status, _) = call(
        &fx,
        request(
            "PUT",
            &format!("/medications/schedules/{schedule_id}"),
            Some(doctor.id),
            Some(json!({
                "medication_name": "Insulin",
                "dosage": "500mg",
                "is_prn": false,
                "is_active": true
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(
        &fx,
        request(
            "DELETE",
            &format!("/medications/schedules/{schedule_id}"),
            Some(doctor.id),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["schedule"]["is_active"], false);
}

#[tokio::test]
async fn timed_schedule_without_times_is_a_bad_request() {
    let fx = Fixture::new(at(8, 0));
    let patient = fx.patient("Ada", "Lovelace").await;

    let (status, _) = call(
        &fx,
        request(
            "POST",
            "/medications/schedules",
            Some(patient.id),
            Some(json!({ "patient_id": patient.id, "medication_name": "Metformin" })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn device_token_registration() {
    let fx = Fixture::new(at(8, 0));
    let son = fx.relative("Byron", "King").await;

    let (status, body) = call(
        &fx,
        request(
            "POST",
            "/notifications/tokens",
            Some(son.id),
            Some(json!({ "token": "son-phone", "device_kind": "IOS" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user_id"], son.id);

    let (status, _) = call(
        &fx,
        request(
            "POST",
            "/notifications/tokens",
            Some(son.id),
            Some(json!({ "token": "  ", "device_kind": "IOS" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(fx.store.all_tokens().await.len(), 1);
}
