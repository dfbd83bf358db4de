//! Storage seam of the care core.
//!
//! Each collaborator the core consumes is a separate trait so components only see what they
//! need. [`PgStore`] backs production; [`MemoryStore`] backs tests and database-less runs.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::models::{
    AlertEntity, AlertStatus, CreateAlertEntity, CreateDoseRecordEntity, CreateScheduleEntity,
    DeviceKind, DeviceTokenEntity, DoseRecordEntity, DoseView, RelationshipEntity,
    ScheduleChangeset, ScheduleEntity, SlotEntity, UserEntity,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Identity lookup for patients and caregivers.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: i32) -> Result<Option<UserEntity>>;
}

/// Read-only access to the patient/caregiver relationship table, indexed both ways.
#[async_trait]
pub trait RelationshipStore: Send + Sync {
    async fn active_for_patient(&self, patient_id: i32) -> Result<Vec<RelationshipEntity>>;

    async fn active_for_caregiver(&self, caregiver_id: i32) -> Result<Vec<RelationshipEntity>>;

    async fn find_pair(
        &self,
        patient_id: i32,
        caregiver_id: i32,
    ) -> Result<Option<RelationshipEntity>>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert_alert(&self, alert: CreateAlertEntity) -> Result<AlertEntity>;

    async fn find_alert(&self, id: i32) -> Result<Option<AlertEntity>>;

    /// Moves the alert to `next` only if its current status is `expected`.
    ///
    /// Returns `None` when the alert is missing or no longer in `expected`; the read and the
    /// write are one atomic step.
    async fn compare_and_set_status(
        &self,
        id: i32,
        expected: AlertStatus,
        next: AlertStatus,
        acknowledged_by: Option<i32>,
    ) -> Result<Option<AlertEntity>>;

    /// Newest first.
    async fn alerts_for_patient(&self, patient_id: i32) -> Result<Vec<AlertEntity>>;
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn insert_schedule(
        &self,
        schedule: CreateScheduleEntity,
        times: Vec<Option<NaiveTime>>,
    ) -> Result<(ScheduleEntity, Vec<SlotEntity>)>;

    async fn find_schedule(&self, id: i32) -> Result<Option<ScheduleEntity>>;

    async fn slots_of(&self, schedule_id: i32) -> Result<Vec<SlotEntity>>;

    async fn find_slot(&self, slot_id: i32) -> Result<Option<(SlotEntity, ScheduleEntity)>>;

    /// Applies `changes`; when `replace_slots` is given the slot set is dropped and recreated.
    async fn update_schedule(
        &self,
        id: i32,
        changes: ScheduleChangeset,
        replace_slots: Option<Vec<Option<NaiveTime>>>,
    ) -> Result<Option<(ScheduleEntity, Vec<SlotEntity>)>>;

    /// Timed slots of active schedules that have started and not ended on `today`.
    async fn timed_slots_in_effect(
        &self,
        today: NaiveDate,
    ) -> Result<Vec<(SlotEntity, ScheduleEntity)>>;

    /// Deactivates active schedules whose end date is before `today`.
    async fn deactivate_expired(&self, today: NaiveDate) -> Result<usize>;
}

#[async_trait]
pub trait DoseStore: Send + Sync {
    async fn insert_dose(&self, dose: CreateDoseRecordEntity) -> Result<DoseRecordEntity>;

    async fn doses_between(
        &self,
        patient_id: i32,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<DoseView>>;

    async fn schedule_has_doses(&self, schedule_id: i32) -> Result<bool>;

    /// Inserts a SKIPPED record for the slot unless any record exists in
    /// `[window_start, now]`. The check and the insert happen atomically; returns `None` when
    /// nothing was inserted.
    async fn record_skip_if_absent(
        &self,
        slot_id: i32,
        patient_id: i32,
        window_start: NaiveDateTime,
        now: NaiveDateTime,
    ) -> Result<Option<DoseRecordEntity>>;
}

#[async_trait]
pub trait TokenRegistry: Send + Sync {
    async fn tokens_for_user(&self, user_id: i32) -> Result<Vec<DeviceTokenEntity>>;

    /// Idempotent; returns the number of rows removed.
    async fn delete_token(&self, token: &str) -> Result<usize>;

    /// Inserts the token or moves an existing one to `user_id`, refreshing its timestamp.
    async fn upsert_token(
        &self,
        user_id: i32,
        token: &str,
        device_kind: DeviceKind,
        now: NaiveDateTime,
    ) -> Result<DeviceTokenEntity>;
}

/// Everything the service wires together from one backing store.
pub trait CareStore:
    UserDirectory + RelationshipStore + AlertStore + ScheduleStore + DoseStore + TokenRegistry
{
}

impl<T> CareStore for T where
    T: UserDirectory + RelationshipStore + AlertStore + ScheduleStore + DoseStore + TokenRegistry
{
}
