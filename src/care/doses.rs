use std::{sync::Arc, time::Duration};

use chrono::{NaiveDate, NaiveTime, TimeDelta};
use tracing::info;

use crate::{
    care::classifier::classify_within,
    clock::Clock,
    error::{CoreError, CoreResult, bounded},
    models::{CreateDoseRecordEntity, DoseView},
    store::{DoseStore, ScheduleStore, UserDirectory},
};

/// Patient-initiated dose confirmations and the daily dose log.
pub struct DoseTracker {
    schedules: Arc<dyn ScheduleStore>,
    doses: Arc<dyn DoseStore>,
    directory: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
    tolerance: TimeDelta,
    timeout: Duration,
}

impl DoseTracker {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        doses: Arc<dyn DoseStore>,
        directory: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
        tolerance: TimeDelta,
        timeout: Duration,
    ) -> Self {
        Self {
            schedules,
            doses,
            directory,
            clock,
            tolerance,
            timeout,
        }
    }

    /// Records that the patient took the dose for `slot_id` now, classified against the slot.
    pub async fn log_taken(&self, patient_id: i32, slot_id: i32) -> CoreResult<DoseView> {
        bounded(self.timeout, "load user", self.directory.find_user(patient_id))
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Patient #{patient_id}")))?;

        let (slot, schedule) = bounded(
            self.timeout,
            "load schedule slot",
            self.schedules.find_slot(slot_id),
        )
        .await?
        .filter(|(_, schedule)| schedule.patient_id == patient_id)
        .ok_or_else(|| CoreError::NotFound(format!("Schedule slot #{slot_id}")))?;

        let now = self.clock.now();
        let status = classify_within(slot.time_of_day, now, self.tolerance);

        let record = bounded(
            self.timeout,
            "create dose record",
            self.doses.insert_dose(CreateDoseRecordEntity {
                slot_id: slot.id,
                patient_id,
                taken_at: now,
                status,
            }),
        )
        .await?;

        info!(
            "Dose of {} logged for patient #{} as {}",
            schedule.medication_name, patient_id, status
        );
        Ok(DoseView::new(record, schedule.medication_name))
    }

    /// Every record of the patient's on `date`, oldest first.
    pub async fn list_for_day(&self, patient_id: i32, date: NaiveDate) -> CoreResult<Vec<DoseView>> {
        let start = date.and_time(NaiveTime::MIN);
        let end = start + TimeDelta::days(1) - TimeDelta::nanoseconds(1);

        bounded(
            self.timeout,
            "load dose records",
            self.doses.doses_between(patient_id, start, end),
        )
        .await
    }

    /// The patient's log for the current day.
    pub async fn list_for_today(&self, patient_id: i32) -> CoreResult<Vec<DoseView>> {
        let today = self.clock.now().date();
        self.list_for_day(patient_id, today).await
    }
}
