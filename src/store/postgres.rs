use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use diesel::{
    BoolExpressionMethods, ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper,
    dsl::exists, upsert::excluded,
};
use diesel_async::{AsyncConnection, RunQueryDsl};

use crate::{
    db::DbPool,
    models::{
        AlertEntity, AlertStatus, CreateAlertEntity, CreateDeviceTokenEntity,
        CreateDoseRecordEntity, CreateScheduleEntity, CreateSlotEntity, DeviceKind,
        DeviceTokenEntity, DoseRecordEntity, DoseStatus, DoseView, RelationshipEntity,
        ScheduleChangeset, ScheduleEntity, SlotEntity, UserEntity,
    },
    schema::{
        alerts, care_relationships, device_tokens, dose_records, medication_schedules,
        schedule_slots, users,
    },
    store::{
        AlertStore, DoseStore, RelationshipStore, ScheduleStore, TokenRegistry, UserDirectory,
    },
};

/// Postgres-backed store over a bb8 pool of async diesel connections.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn find_user(&self, id: i32) -> Result<Option<UserEntity>> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        users::table
            .find(id)
            .select(UserEntity::as_select())
            .get_result(conn)
            .await
            .optional()
            .context("Failed to get user")
    }
}

#[async_trait]
impl RelationshipStore for PgStore {
    async fn active_for_patient(&self, patient_id: i32) -> Result<Vec<RelationshipEntity>> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        care_relationships::table
            .filter(care_relationships::patient_id.eq(patient_id))
            .filter(care_relationships::is_active.eq(true))
            .select(RelationshipEntity::as_select())
            .load(conn)
            .await
            .context("Failed to get patient relationships")
    }

    async fn active_for_caregiver(&self, caregiver_id: i32) -> Result<Vec<RelationshipEntity>> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        care_relationships::table
            .filter(care_relationships::caregiver_id.eq(caregiver_id))
            .filter(care_relationships::is_active.eq(true))
            .select(RelationshipEntity::as_select())
            .load(conn)
            .await
            .context("Failed to get caregiver relationships")
    }

    async fn find_pair(
        &self,
        patient_id: i32,
        caregiver_id: i32,
    ) -> Result<Option<RelationshipEntity>> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        care_relationships::table
            .filter(care_relationships::patient_id.eq(patient_id))
            .filter(care_relationships::caregiver_id.eq(caregiver_id))
            .select(RelationshipEntity::as_select())
            .get_result(conn)
            .await
            .optional()
            .context("Failed to get relationship")
    }
}

#[async_trait]
impl AlertStore for PgStore {
    async fn insert_alert(&self, alert: CreateAlertEntity) -> Result<AlertEntity> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        diesel::insert_into(alerts::table)
            .values(alert)
            .returning(AlertEntity::as_returning())
            .get_result(conn)
            .await
            .context("Failed to create alert")
    }

    async fn find_alert(&self, id: i32) -> Result<Option<AlertEntity>> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        alerts::table
            .find(id)
            .select(AlertEntity::as_select())
            .get_result(conn)
            .await
            .optional()
            .context("Failed to get alert")
    }

    async fn compare_and_set_status(
        &self,
        id: i32,
        expected: AlertStatus,
        next: AlertStatus,
        acknowledged_by: Option<i32>,
    ) -> Result<Option<AlertEntity>> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        // Only the SENT -> ACKNOWLEDGED step carries an acknowledger; every earlier state has
        // none, so writing `acknowledged_by` unconditionally never erases one.
        diesel::update(
            alerts::table
                .find(id)
                .filter(alerts::status.eq(expected)),
        )
        .set((
            alerts::status.eq(next),
            alerts::acknowledged_by.eq(acknowledged_by),
            alerts::version.eq(alerts::version + 1),
        ))
        .returning(AlertEntity::as_returning())
        .get_result(conn)
        .await
        .optional()
        .context("Failed to update alert status")
    }

    async fn alerts_for_patient(&self, patient_id: i32) -> Result<Vec<AlertEntity>> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        alerts::table
            .filter(alerts::patient_id.eq(patient_id))
            .order_by((alerts::created_at.desc(), alerts::id.desc()))
            .select(AlertEntity::as_select())
            .load(conn)
            .await
            .context("Failed to get patient alerts")
    }
}

#[async_trait]
impl ScheduleStore for PgStore {
    async fn insert_schedule(
        &self,
        schedule: CreateScheduleEntity,
        times: Vec<Option<NaiveTime>>,
    ) -> Result<(ScheduleEntity, Vec<SlotEntity>)> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        conn.transaction(move |conn| {
            Box::pin(async move {
                let schedule = diesel::insert_into(medication_schedules::table)
                    .values(schedule)
                    .returning(ScheduleEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to create schedule")?;

                let rows: Vec<CreateSlotEntity> = times
                    .into_iter()
                    .map(|time_of_day| CreateSlotEntity {
                        schedule_id: schedule.id,
                        time_of_day,
                    })
                    .collect();

                let slots = if rows.is_empty() {
                    Vec::new()
                } else {
                    diesel::insert_into(schedule_slots::table)
                        .values(&rows)
                        .returning(SlotEntity::as_returning())
                        .get_results(conn)
                        .await
                        .context("Failed to create schedule slots")?
                };

                Ok::<(ScheduleEntity, Vec<SlotEntity>), anyhow::Error>((schedule, slots))
            })
        })
        .await
        .context("Transaction failed")
    }

    async fn find_schedule(&self, id: i32) -> Result<Option<ScheduleEntity>> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        medication_schedules::table
            .find(id)
            .select(ScheduleEntity::as_select())
            .get_result(conn)
            .await
            .optional()
            .context("Failed to get schedule")
    }

    async fn slots_of(&self, schedule_id: i32) -> Result<Vec<SlotEntity>> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        schedule_slots::table
            .filter(schedule_slots::schedule_id.eq(schedule_id))
            .order_by(schedule_slots::id.asc())
            .select(SlotEntity::as_select())
            .load(conn)
            .await
            .context("Failed to get schedule slots")
    }

    async fn find_slot(&self, slot_id: i32) -> Result<Option<(SlotEntity, ScheduleEntity)>> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        schedule_slots::table
            .inner_join(medication_schedules::table)
            .filter(schedule_slots::id.eq(slot_id))
            .select((SlotEntity::as_select(), ScheduleEntity::as_select()))
            .get_result(conn)
            .await
            .optional()
            .context("Failed to get schedule slot")
    }

    async fn update_schedule(
        &self,
        id: i32,
        changes: ScheduleChangeset,
        replace_slots: Option<Vec<Option<NaiveTime>>>,
    ) -> Result<Option<(ScheduleEntity, Vec<SlotEntity>)>> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        conn.transaction(move |conn| {
            Box::pin(async move {
                let updated: Option<ScheduleEntity> =
                    diesel::update(medication_schedules::table.find(id))
                        .set(changes)
                        .returning(ScheduleEntity::as_returning())
                        .get_result(conn)
                        .await
                        .optional()
                        .context("Failed to update schedule")?;

                let Some(schedule) = updated else {
                    return Ok(None);
                };

                if let Some(times) = replace_slots {
                    diesel::delete(
                        schedule_slots::table.filter(schedule_slots::schedule_id.eq(id)),
                    )
                    .execute(conn)
                    .await
                    .context("Failed to delete schedule slots")?;

                    let rows: Vec<CreateSlotEntity> = times
                        .into_iter()
                        .map(|time_of_day| CreateSlotEntity {
                            schedule_id: id,
                            time_of_day,
                        })
                        .collect();

                    if !rows.is_empty() {
                        diesel::insert_into(schedule_slots::table)
                            .values(&rows)
                            .execute(conn)
                            .await
                            .context("Failed to create schedule slots")?;
                    }
                }

                let slots: Vec<SlotEntity> = schedule_slots::table
                    .filter(schedule_slots::schedule_id.eq(id))
                    .order_by(schedule_slots::id.asc())
                    .select(SlotEntity::as_select())
                    .load(conn)
                    .await
                    .context("Failed to get schedule slots")?;

                Ok::<Option<(ScheduleEntity, Vec<SlotEntity>)>, anyhow::Error>(Some((
                    schedule, slots,
                )))
            })
        })
        .await
        .context("Transaction failed")
    }

    async fn timed_slots_in_effect(
        &self,
        today: NaiveDate,
    ) -> Result<Vec<(SlotEntity, ScheduleEntity)>> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        schedule_slots::table
            .inner_join(medication_schedules::table)
            .filter(schedule_slots::time_of_day.is_not_null())
            .filter(medication_schedules::is_active.eq(true))
            .filter(
                medication_schedules::start_date
                    .is_null()
                    .or(medication_schedules::start_date.le(today)),
            )
            .filter(
                medication_schedules::end_date
                    .is_null()
                    .or(medication_schedules::end_date.ge(today)),
            )
            .order_by(schedule_slots::id.asc())
            .select((SlotEntity::as_select(), ScheduleEntity::as_select()))
            .load(conn)
            .await
            .context("Failed to get timed schedule slots")
    }

    async fn deactivate_expired(&self, today: NaiveDate) -> Result<usize> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        diesel::update(
            medication_schedules::table
                .filter(medication_schedules::is_active.eq(true))
                .filter(medication_schedules::end_date.lt(today)),
        )
        .set(medication_schedules::is_active.eq(false))
        .execute(conn)
        .await
        .context("Failed to deactivate expired schedules")
    }
}

#[async_trait]
impl DoseStore for PgStore {
    async fn insert_dose(&self, dose: CreateDoseRecordEntity) -> Result<DoseRecordEntity> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        diesel::insert_into(dose_records::table)
            .values(dose)
            .returning(DoseRecordEntity::as_returning())
            .get_result(conn)
            .await
            .context("Failed to create dose record")
    }

    async fn doses_between(
        &self,
        patient_id: i32,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<DoseView>> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        let rows: Vec<(DoseRecordEntity, String)> = dose_records::table
            .inner_join(schedule_slots::table.inner_join(medication_schedules::table))
            .filter(dose_records::patient_id.eq(patient_id))
            .filter(dose_records::taken_at.between(start, end))
            .order_by((dose_records::taken_at.asc(), dose_records::id.asc()))
            .select((
                DoseRecordEntity::as_select(),
                medication_schedules::medication_name,
            ))
            .load(conn)
            .await
            .context("Failed to get dose records")?;

        Ok(rows
            .into_iter()
            .map(|(record, medication_name)| DoseView::new(record, medication_name))
            .collect())
    }

    async fn schedule_has_doses(&self, schedule_id: i32) -> Result<bool> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        diesel::select(exists(
            dose_records::table
                .inner_join(schedule_slots::table)
                .filter(schedule_slots::schedule_id.eq(schedule_id)),
        ))
        .get_result(conn)
        .await
        .context("Failed to check schedule dose records")
    }

    async fn record_skip_if_absent(
        &self,
        slot_id: i32,
        patient_id: i32,
        window_start: NaiveDateTime,
        now: NaiveDateTime,
    ) -> Result<Option<DoseRecordEntity>> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        conn.transaction(move |conn| {
            Box::pin(async move {
                let already_logged: bool = diesel::select(exists(
                    dose_records::table
                        .filter(dose_records::slot_id.eq(slot_id))
                        .filter(dose_records::taken_at.between(window_start, now)),
                ))
                .get_result(conn)
                .await
                .context("Failed to check dose records")?;

                if already_logged {
                    return Ok(None);
                }

                // The partial unique index on (slot_id, taken_at::date) for SKIPPED rows turns
                // a concurrent duplicate into a no-op instead of a second record.
                let inserted = diesel::insert_into(dose_records::table)
                    .values(CreateDoseRecordEntity {
                        slot_id,
                        patient_id,
                        taken_at: now,
                        status: DoseStatus::Skipped,
                    })
                    .on_conflict_do_nothing()
                    .returning(DoseRecordEntity::as_returning())
                    .get_result(conn)
                    .await
                    .optional()
                    .context("Failed to create skipped dose record")?;

                Ok::<Option<DoseRecordEntity>, anyhow::Error>(inserted)
            })
        })
        .await
        .context("Transaction failed")
    }
}

#[async_trait]
impl TokenRegistry for PgStore {
    async fn tokens_for_user(&self, user_id: i32) -> Result<Vec<DeviceTokenEntity>> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        device_tokens::table
            .filter(device_tokens::user_id.eq(user_id))
            .select(DeviceTokenEntity::as_select())
            .load(conn)
            .await
            .context("Failed to get device tokens")
    }

    async fn delete_token(&self, token: &str) -> Result<usize> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        diesel::delete(device_tokens::table.filter(device_tokens::token.eq(token)))
            .execute(conn)
            .await
            .context("Failed to delete device token")
    }

    async fn upsert_token(
        &self,
        user_id: i32,
        token: &str,
        device_kind: DeviceKind,
        now: NaiveDateTime,
    ) -> Result<DeviceTokenEntity> {
        let conn = &mut self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        diesel::insert_into(device_tokens::table)
            .values(CreateDeviceTokenEntity {
                user_id,
                token: token.to_owned(),
                device_kind,
                updated_at: now,
            })
            .on_conflict(device_tokens::token)
            .do_update()
            .set((
                device_tokens::user_id.eq(excluded(device_tokens::user_id)),
                device_tokens::updated_at.eq(excluded(device_tokens::updated_at)),
            ))
            .returning(DeviceTokenEntity::as_returning())
            .get_result(conn)
            .await
            .context("Failed to register device token")
    }
}
