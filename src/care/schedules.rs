use std::{sync::Arc, time::Duration};

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::{
    error::{CoreError, CoreResult, bounded},
    models::{CreateScheduleEntity, ScheduleChangeset, ScheduleEntity, SlotEntity},
    store::{DoseStore, ScheduleStore, UserDirectory},
};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewSchedule {
    pub patient_id: i32,
    pub doctor_id: Option<i32>,
    pub medication_name: String,
    pub dosage: Option<String>,
    pub notes: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_prn: bool,
    #[serde(default)]
    pub times: Vec<NaiveTime>,
}

/// Desired state of a schedule. `times: None` leaves the slots alone.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ScheduleUpdate {
    pub medication_name: String,
    pub dosage: Option<String>,
    pub notes: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_prn: bool,
    pub is_active: bool,
    pub times: Option<Vec<NaiveTime>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ScheduleView {
    pub schedule: ScheduleEntity,
    pub slots: Vec<SlotEntity>,
}

pub struct ScheduleService {
    schedules: Arc<dyn ScheduleStore>,
    doses: Arc<dyn DoseStore>,
    directory: Arc<dyn UserDirectory>,
    timeout: Duration,
}

impl ScheduleService {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        doses: Arc<dyn DoseStore>,
        directory: Arc<dyn UserDirectory>,
        timeout: Duration,
    ) -> Self {
        Self {
            schedules,
            doses,
            directory,
            timeout,
        }
    }

    pub async fn create(&self, new: NewSchedule) -> CoreResult<ScheduleView> {
        self.require_user(new.patient_id, "Patient").await?;
        if let Some(doctor_id) = new.doctor_id {
            self.require_user(doctor_id, "Doctor").await?;
        }

        let times = slot_times(new.is_prn, new.times);
        let (schedule, slots) = bounded(
            self.timeout,
            "create schedule",
            self.schedules.insert_schedule(
                CreateScheduleEntity {
                    patient_id: new.patient_id,
                    doctor_id: new.doctor_id,
                    medication_name: new.medication_name,
                    dosage: new.dosage,
                    notes: new.notes,
                    start_date: new.start_date,
                    end_date: new.end_date,
                    is_prn: new.is_prn,
                    is_active: true,
                },
                times,
            ),
        )
        .await?;

        info!(
            "Schedule #{} ({}) created for patient #{} with {} slot(s)",
            schedule.id,
            schedule.medication_name,
            schedule.patient_id,
            slots.len()
        );
        Ok(ScheduleView { schedule, slots })
    }

    pub async fn get(&self, schedule_id: i32) -> CoreResult<ScheduleView> {
        let schedule = self.require_schedule(schedule_id).await?;
        let slots = bounded(
            self.timeout,
            "load schedule slots",
            self.schedules.slots_of(schedule_id),
        )
        .await?;
        Ok(ScheduleView { schedule, slots })
    }

    /// Once any dose has been recorded against the schedule, its name, dosage, PRN flag and
    /// slot set are frozen; only notes, end date and the active flag still apply.
    pub async fn update(&self, schedule_id: i32, update: ScheduleUpdate) -> CoreResult<ScheduleView> {
        let existing = self.require_schedule(schedule_id).await?;
        let has_doses = bounded(
            self.timeout,
            "check schedule dose records",
            self.doses.schedule_has_doses(schedule_id),
        )
        .await?;

        let (changes, replace_slots) = if has_doses {
            if update.medication_name != existing.medication_name
                || update.dosage != existing.dosage
                || update.is_prn != existing.is_prn
            {
                return Err(CoreError::ImmutableHistory(
                    "Medication name, dosage and type cannot change once doses have been \
                     recorded. Deactivate this schedule and create a new one."
                        .into(),
                ));
            }

            if let Some(times) = update.times {
                let current = bounded(
                    self.timeout,
                    "load schedule slots",
                    self.schedules.slots_of(schedule_id),
                )
                .await?;
                if !same_times(&current, &slot_times(existing.is_prn, times)) {
                    return Err(CoreError::ImmutableHistory(
                        "Dose times cannot change once doses have been recorded.".into(),
                    ));
                }
            }

            let changes = ScheduleChangeset {
                medication_name: existing.medication_name,
                dosage: existing.dosage,
                notes: update.notes,
                start_date: existing.start_date,
                end_date: update.end_date,
                is_prn: existing.is_prn,
                is_active: update.is_active,
            };
            (changes, None)
        } else {
            let replace_slots = match update.times {
                Some(times) => Some(slot_times(update.is_prn, times)),
                None if update.is_prn != existing.is_prn => {
                    Some(slot_times(update.is_prn, Vec::new()))
                }
                None => None,
            };
            let changes = ScheduleChangeset {
                medication_name: update.medication_name,
                dosage: update.dosage,
                notes: update.notes,
                start_date: update.start_date,
                end_date: update.end_date,
                is_prn: update.is_prn,
                is_active: update.is_active,
            };
            (changes, replace_slots)
        };

        let (schedule, slots) = bounded(
            self.timeout,
            "update schedule",
            self.schedules
                .update_schedule(schedule_id, changes, replace_slots),
        )
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("Schedule #{schedule_id}")))?;

        info!("Schedule #{} has been updated", schedule_id);
        Ok(ScheduleView { schedule, slots })
    }

    /// Ends a schedule early. Allowed regardless of recorded doses.
    pub async fn deactivate(&self, schedule_id: i32) -> CoreResult<ScheduleView> {
        let existing = self.require_schedule(schedule_id).await?;
        let changes = ScheduleChangeset {
            medication_name: existing.medication_name,
            dosage: existing.dosage,
            notes: existing.notes,
            start_date: existing.start_date,
            end_date: existing.end_date,
            is_prn: existing.is_prn,
            is_active: false,
        };

        let (schedule, slots) = bounded(
            self.timeout,
            "deactivate schedule",
            self.schedules.update_schedule(schedule_id, changes, None),
        )
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("Schedule #{schedule_id}")))?;

        info!("Schedule #{} has been deactivated", schedule_id);
        Ok(ScheduleView { schedule, slots })
    }

    async fn require_user(&self, user_id: i32, what: &str) -> CoreResult<()> {
        bounded(self.timeout, "load user", self.directory.find_user(user_id))
            .await?
            .map(|_| ())
            .ok_or_else(|| CoreError::NotFound(format!("{what} #{user_id}")))
    }

    async fn require_schedule(&self, schedule_id: i32) -> CoreResult<ScheduleEntity> {
        bounded(
            self.timeout,
            "load schedule",
            self.schedules.find_schedule(schedule_id),
        )
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("Schedule #{schedule_id}")))
    }
}

/// PRN schedules own exactly one slot without a time; timed schedules one slot per time.
fn slot_times(is_prn: bool, mut times: Vec<NaiveTime>) -> Vec<Option<NaiveTime>> {
    if is_prn {
        return vec![None];
    }
    times.sort();
    times.dedup();
    times.into_iter().map(Some).collect()
}

fn same_times(current: &[SlotEntity], wanted: &[Option<NaiveTime>]) -> bool {
    let mut current: Vec<Option<NaiveTime>> = current.iter().map(|slot| slot.time_of_day).collect();
    current.sort();
    current == wanted
}
