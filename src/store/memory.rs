use std::collections::HashMap;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tokio::sync::Mutex as TokioMutex;

use crate::{
    models::{
        AlertEntity, AlertStatus, CreateAlertEntity, CreateDoseRecordEntity,
        CreateScheduleEntity, DeviceKind, DeviceTokenEntity, DoseRecordEntity, DoseStatus,
        DoseView, RelationshipEntity, RelationshipKind, ScheduleChangeset, ScheduleEntity,
        SlotEntity, UserEntity, UserRole,
    },
    store::{
        AlertStore, DoseStore, RelationshipStore, ScheduleStore, TokenRegistry, UserDirectory,
    },
};

#[derive(Debug, Default)]
struct Tables {
    next_id: i32,
    users: HashMap<i32, UserEntity>,
    relationships: Vec<RelationshipEntity>,
    alerts: HashMap<i32, AlertEntity>,
    schedules: HashMap<i32, ScheduleEntity>,
    slots: Vec<SlotEntity>,
    doses: Vec<DoseRecordEntity>,
    tokens: Vec<DeviceTokenEntity>,
}

impl Tables {
    fn allocate_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn slots_of(&self, schedule_id: i32) -> Vec<SlotEntity> {
        self.slots
            .iter()
            .filter(|slot| slot.schedule_id == schedule_id)
            .cloned()
            .collect()
    }

    fn push_slots(&mut self, schedule_id: i32, times: Vec<Option<NaiveTime>>) {
        for time_of_day in times {
            let id = self.allocate_id();
            self.slots.push(SlotEntity {
                id,
                schedule_id,
                time_of_day,
            });
        }
    }
}

/// Process-local store. Every operation holds one lock, so each call is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: TokioMutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity and relationship rows are owned by peripheral services; this seeds them.
    pub async fn add_user(&self, first_name: &str, last_name: &str, role: UserRole) -> UserEntity {
        let mut tables = self.tables.lock().await;
        let id = tables.allocate_id();
        let user = UserEntity {
            id,
            email: format!(
                "{}.{}@memento.test",
                first_name.to_lowercase(),
                last_name.to_lowercase()
            ),
            first_name: first_name.to_owned(),
            last_name: last_name.to_owned(),
            role,
            created_at: NaiveDateTime::default(),
        };
        tables.users.insert(id, user.clone());
        user
    }

    pub async fn add_relationship(
        &self,
        patient_id: i32,
        caregiver_id: i32,
        kind: RelationshipKind,
        is_primary_contact: bool,
        is_active: bool,
    ) -> Result<RelationshipEntity> {
        let mut tables = self.tables.lock().await;
        if tables
            .relationships
            .iter()
            .any(|rel| rel.patient_id == patient_id && rel.caregiver_id == caregiver_id)
        {
            bail!("Relationship {patient_id} -> {caregiver_id} already exists");
        }
        let id = tables.allocate_id();
        let relationship = RelationshipEntity {
            id,
            patient_id,
            caregiver_id,
            kind,
            is_primary_contact,
            is_active,
        };
        tables.relationships.push(relationship.clone());
        Ok(relationship)
    }

    pub async fn all_doses(&self) -> Vec<DoseRecordEntity> {
        self.tables.lock().await.doses.clone()
    }

    pub async fn all_tokens(&self) -> Vec<DeviceTokenEntity> {
        self.tables.lock().await.tokens.clone()
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_user(&self, id: i32) -> Result<Option<UserEntity>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }
}

#[async_trait]
impl RelationshipStore for MemoryStore {
    async fn active_for_patient(&self, patient_id: i32) -> Result<Vec<RelationshipEntity>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .relationships
            .iter()
            .filter(|rel| rel.patient_id == patient_id && rel.is_active)
            .cloned()
            .collect())
    }

    async fn active_for_caregiver(&self, caregiver_id: i32) -> Result<Vec<RelationshipEntity>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .relationships
            .iter()
            .filter(|rel| rel.caregiver_id == caregiver_id && rel.is_active)
            .cloned()
            .collect())
    }

    async fn find_pair(
        &self,
        patient_id: i32,
        caregiver_id: i32,
    ) -> Result<Option<RelationshipEntity>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .relationships
            .iter()
            .find(|rel| rel.patient_id == patient_id && rel.caregiver_id == caregiver_id)
            .cloned())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn insert_alert(&self, alert: CreateAlertEntity) -> Result<AlertEntity> {
        let mut tables = self.tables.lock().await;
        let id = tables.allocate_id();
        let alert = AlertEntity {
            id,
            patient_id: alert.patient_id,
            alert_type: alert.alert_type,
            created_at: alert.created_at,
            latitude: alert.latitude,
            longitude: alert.longitude,
            status: alert.status,
            details: alert.details,
            acknowledged_by: None,
            version: 0,
        };
        tables.alerts.insert(id, alert.clone());
        Ok(alert)
    }

    async fn find_alert(&self, id: i32) -> Result<Option<AlertEntity>> {
        Ok(self.tables.lock().await.alerts.get(&id).cloned())
    }

    async fn compare_and_set_status(
        &self,
        id: i32,
        expected: AlertStatus,
        next: AlertStatus,
        acknowledged_by: Option<i32>,
    ) -> Result<Option<AlertEntity>> {
        let mut tables = self.tables.lock().await;
        match tables.alerts.get_mut(&id) {
            Some(alert) if alert.status == expected => {
                alert.status = next;
                alert.acknowledged_by = acknowledged_by;
                alert.version += 1;
                Ok(Some(alert.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn alerts_for_patient(&self, patient_id: i32) -> Result<Vec<AlertEntity>> {
        let tables = self.tables.lock().await;
        let mut alerts: Vec<AlertEntity> = tables
            .alerts
            .values()
            .filter(|alert| alert.patient_id == patient_id)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(alerts)
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn insert_schedule(
        &self,
        schedule: CreateScheduleEntity,
        times: Vec<Option<NaiveTime>>,
    ) -> Result<(ScheduleEntity, Vec<SlotEntity>)> {
        let mut tables = self.tables.lock().await;
        let id = tables.allocate_id();
        let schedule = ScheduleEntity {
            id,
            patient_id: schedule.patient_id,
            doctor_id: schedule.doctor_id,
            medication_name: schedule.medication_name,
            dosage: schedule.dosage,
            notes: schedule.notes,
            start_date: schedule.start_date,
            end_date: schedule.end_date,
            is_prn: schedule.is_prn,
            is_active: schedule.is_active,
        };
        tables.schedules.insert(id, schedule.clone());
        tables.push_slots(id, times);
        Ok((schedule, tables.slots_of(id)))
    }

    async fn find_schedule(&self, id: i32) -> Result<Option<ScheduleEntity>> {
        Ok(self.tables.lock().await.schedules.get(&id).cloned())
    }

    async fn slots_of(&self, schedule_id: i32) -> Result<Vec<SlotEntity>> {
        Ok(self.tables.lock().await.slots_of(schedule_id))
    }

    async fn find_slot(&self, slot_id: i32) -> Result<Option<(SlotEntity, ScheduleEntity)>> {
        let tables = self.tables.lock().await;
        let Some(slot) = tables.slots.iter().find(|slot| slot.id == slot_id) else {
            return Ok(None);
        };
        Ok(tables
            .schedules
            .get(&slot.schedule_id)
            .map(|schedule| (slot.clone(), schedule.clone())))
    }

    async fn update_schedule(
        &self,
        id: i32,
        changes: ScheduleChangeset,
        replace_slots: Option<Vec<Option<NaiveTime>>>,
    ) -> Result<Option<(ScheduleEntity, Vec<SlotEntity>)>> {
        let mut tables = self.tables.lock().await;
        let Some(schedule) = tables.schedules.get_mut(&id) else {
            return Ok(None);
        };
        schedule.medication_name = changes.medication_name;
        schedule.dosage = changes.dosage;
        schedule.notes = changes.notes;
        schedule.start_date = changes.start_date;
        schedule.end_date = changes.end_date;
        schedule.is_prn = changes.is_prn;
        schedule.is_active = changes.is_active;
        let schedule = schedule.clone();

        if let Some(times) = replace_slots {
            tables.slots.retain(|slot| slot.schedule_id != id);
            tables.push_slots(id, times);
        }
        Ok(Some((schedule, tables.slots_of(id))))
    }

    async fn timed_slots_in_effect(
        &self,
        today: NaiveDate,
    ) -> Result<Vec<(SlotEntity, ScheduleEntity)>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .slots
            .iter()
            .filter(|slot| slot.time_of_day.is_some())
            .filter_map(|slot| {
                let schedule = tables.schedules.get(&slot.schedule_id)?;
                let started = schedule.start_date.is_none_or(|start| start <= today);
                let ended = schedule.end_date.is_some_and(|end| end < today);
                (schedule.is_active && started && !ended)
                    .then(|| (slot.clone(), schedule.clone()))
            })
            .collect())
    }

    async fn deactivate_expired(&self, today: NaiveDate) -> Result<usize> {
        let mut tables = self.tables.lock().await;
        let mut count = 0;
        for schedule in tables.schedules.values_mut() {
            if schedule.is_active && schedule.end_date.is_some_and(|end| end < today) {
                schedule.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl DoseStore for MemoryStore {
    async fn insert_dose(&self, dose: CreateDoseRecordEntity) -> Result<DoseRecordEntity> {
        let mut tables = self.tables.lock().await;
        if !tables.slots.iter().any(|slot| slot.id == dose.slot_id) {
            bail!("Slot #{} does not exist", dose.slot_id);
        }
        let id = tables.allocate_id();
        let record = DoseRecordEntity {
            id,
            slot_id: dose.slot_id,
            patient_id: dose.patient_id,
            taken_at: dose.taken_at,
            status: dose.status,
        };
        tables.doses.push(record.clone());
        Ok(record)
    }

    async fn doses_between(
        &self,
        patient_id: i32,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<DoseView>> {
        let tables = self.tables.lock().await;
        let mut views: Vec<DoseView> = tables
            .doses
            .iter()
            .filter(|dose| dose.patient_id == patient_id)
            .filter(|dose| dose.taken_at >= start && dose.taken_at <= end)
            .filter_map(|dose| {
                let slot = tables.slots.iter().find(|slot| slot.id == dose.slot_id)?;
                let schedule = tables.schedules.get(&slot.schedule_id)?;
                Some(DoseView::new(dose.clone(), schedule.medication_name.clone()))
            })
            .collect();
        views.sort_by(|a, b| a.taken_at.cmp(&b.taken_at).then(a.id.cmp(&b.id)));
        Ok(views)
    }

    async fn schedule_has_doses(&self, schedule_id: i32) -> Result<bool> {
        let tables = self.tables.lock().await;
        Ok(tables.doses.iter().any(|dose| {
            tables
                .slots
                .iter()
                .any(|slot| slot.id == dose.slot_id && slot.schedule_id == schedule_id)
        }))
    }

    async fn record_skip_if_absent(
        &self,
        slot_id: i32,
        patient_id: i32,
        window_start: NaiveDateTime,
        now: NaiveDateTime,
    ) -> Result<Option<DoseRecordEntity>> {
        let mut tables = self.tables.lock().await;
        let already_logged = tables.doses.iter().any(|dose| {
            dose.slot_id == slot_id && dose.taken_at >= window_start && dose.taken_at <= now
        });
        let skipped_today = tables.doses.iter().any(|dose| {
            dose.slot_id == slot_id
                && dose.status == DoseStatus::Skipped
                && dose.taken_at.date() == now.date()
        });
        if already_logged || skipped_today {
            return Ok(None);
        }

        let id = tables.allocate_id();
        let record = DoseRecordEntity {
            id,
            slot_id,
            patient_id,
            taken_at: now,
            status: DoseStatus::Skipped,
        };
        tables.doses.push(record.clone());
        Ok(Some(record))
    }
}

#[async_trait]
impl TokenRegistry for MemoryStore {
    async fn tokens_for_user(&self, user_id: i32) -> Result<Vec<DeviceTokenEntity>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .tokens
            .iter()
            .filter(|token| token.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_token(&self, token: &str) -> Result<usize> {
        let mut tables = self.tables.lock().await;
        let before = tables.tokens.len();
        tables.tokens.retain(|row| row.token != token);
        Ok(before - tables.tokens.len())
    }

    async fn upsert_token(
        &self,
        user_id: i32,
        token: &str,
        device_kind: DeviceKind,
        now: NaiveDateTime,
    ) -> Result<DeviceTokenEntity> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.tokens.iter_mut().find(|row| row.token == token) {
            existing.user_id = user_id;
            existing.updated_at = now;
            return Ok(existing.clone());
        }
        let id = tables.allocate_id();
        let row = DeviceTokenEntity {
            id,
            user_id,
            token: token.to_owned(),
            device_kind,
            updated_at: now,
        };
        tables.tokens.push(row.clone());
        Ok(row)
    }
}
