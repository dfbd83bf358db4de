#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use memento_careservice::{
    app_state::{self, Services},
    care::{NewSchedule, ScheduleView},
    clock::ManualClock,
    config::Config,
    models::{RelationshipKind, UserEntity, UserRole},
    notify::{Notification, NotificationQueue, PushOutcome, PushSender},
    store::MemoryStore,
};
use tokio::sync::mpsc::UnboundedReceiver;

pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
}

pub fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// `h:m` on the fixture day.
pub fn at(h: u32, m: u32) -> NaiveDateTime {
    day().and_time(time(h, m))
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentPush {
    pub token: String,
    pub title: String,
    pub body: String,
}

#[derive(Clone)]
pub enum Script {
    Reply(PushOutcome),
    Hang,
    Panic,
}

/// Push sender that records every attempt. Tokens reply `Delivered` unless scripted.
#[derive(Default)]
pub struct RecordingSender {
    scripts: Mutex<HashMap<String, Script>>,
    sent: Mutex<Vec<SentPush>>,
}

impl RecordingSender {
    pub fn script(&self, token: &str, script: Script) {
        self.scripts.lock().unwrap().insert(token.to_owned(), script);
    }

    pub fn sent(&self) -> Vec<SentPush> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.sent().into_iter().map(|push| push.token).collect();
        tokens.sort();
        tokens
    }
}

#[async_trait]
impl PushSender for RecordingSender {
    async fn send(&self, token: &str, title: &str, body: &str) -> PushOutcome {
        self.sent.lock().unwrap().push(SentPush {
            token: token.to_owned(),
            title: title.to_owned(),
            body: body.to_owned(),
        });

        let script = self.scripts.lock().unwrap().get(token).cloned();
        let reply = match script {
            Some(Script::Reply(outcome)) => Some(outcome),
            Some(Script::Hang) => None,
            Some(Script::Panic) => panic!("push client crashed for {token}"),
            None => Some(PushOutcome::Delivered),
        };

        match reply {
            Some(outcome) => outcome,
            None => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                PushOutcome::Delivered
            }
        }
    }
}

/// A fully wired service over a [`MemoryStore`] with a manual clock.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub sender: Arc<RecordingSender>,
    pub config: Config,
    pub services: Services,
    pub jobs: UnboundedReceiver<Notification>,
}

impl Fixture {
    pub fn new(now: NaiveDateTime) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(now));
        let sender = Arc::new(RecordingSender::default());

        let mut config = Config::default();
        config.push.timeout = Duration::from_millis(200);
        config.database.timeout = Duration::from_secs(1);

        let (queue, jobs) = NotificationQueue::channel();
        let services = app_state::wire(
            store.clone(),
            sender.clone(),
            clock.clone(),
            queue,
            &config,
        );

        Self {
            store,
            clock,
            sender,
            config,
            services,
            jobs,
        }
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(notification) = self.jobs.try_recv() {
            out.push(notification);
        }
        out
    }

    pub async fn patient(&self, first: &str, last: &str) -> UserEntity {
        self.store.add_user(first, last, UserRole::Patient).await
    }

    pub async fn relative(&self, first: &str, last: &str) -> UserEntity {
        self.store.add_user(first, last, UserRole::Relative).await
    }

    pub async fn doctor(&self, first: &str, last: &str) -> UserEntity {
        self.store.add_user(first, last, UserRole::Doctor).await
    }

    /// Active relationship; `primary` marks the caregiver as a primary contact.
    pub async fn link(&self, patient: &UserEntity, caregiver: &UserEntity, primary: bool) {
        let kind = match caregiver.role {
            UserRole::Doctor => RelationshipKind::Doctor,
            _ => RelationshipKind::Relative,
        };
        self.store
            .add_relationship(patient.id, caregiver.id, kind, primary, true)
            .await
            .unwrap();
    }

    pub async fn timed_schedule(&self, patient_id: i32, name: &str, times: &[NaiveTime]) -> ScheduleView {
        self.services
            .state
            .schedules
            .create(NewSchedule {
                patient_id,
                doctor_id: None,
                medication_name: name.to_owned(),
                dosage: Some("10mg".to_owned()),
                notes: None,
                start_date: None,
                end_date: None,
                is_prn: false,
                times: times.to_vec(),
            })
            .await
            .unwrap()
    }

    pub async fn prn_schedule(&self, patient_id: i32, name: &str) -> ScheduleView {
        self.services
            .state
            .schedules
            .create(NewSchedule {
                patient_id,
                doctor_id: None,
                medication_name: name.to_owned(),
                dosage: None,
                notes: Some("as needed".to_owned()),
                start_date: None,
                end_date: None,
                is_prn: true,
                times: Vec::new(),
            })
            .await
            .unwrap()
    }
}
