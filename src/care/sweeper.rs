//! Periodic detection of missed doses.
//!
//! Every run looks at today's occurrence of each timed slot in effect. A slot more than the
//! grace period overdue with no dose record since midnight gets a SKIPPED record stamped with
//! the run time. The existence check is repeated inside the store at insert time, so
//! overlapping runs insert at most one record per slot and day.

use std::{sync::Arc, time::Duration};

use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::{
    clock::Clock,
    error::{CoreResult, bounded},
    models::{ScheduleEntity, SlotEntity},
    shutdown::Shutdown,
    store::{DoseStore, ScheduleStore},
};

/// Aggregate outcome of one sweep run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Timed slots in effect today.
    pub examined: usize,
    /// Slots still inside their grace period.
    pub not_due: usize,
    /// Overdue slots that already had a record today.
    pub already_logged: usize,
    /// SKIPPED records written by this run.
    pub skipped: usize,
    pub errored: usize,
    /// Expired schedules switched off at the start of the run.
    pub deactivated_schedules: usize,
    pub interrupted: bool,
}

pub struct MissedDoseSweeper {
    schedules: Arc<dyn ScheduleStore>,
    doses: Arc<dyn DoseStore>,
    clock: Arc<dyn Clock>,
    grace: TimeDelta,
    timeout: Duration,
}

enum SlotOutcome {
    NotDue,
    AlreadyLogged,
    Skipped,
}

impl MissedDoseSweeper {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        doses: Arc<dyn DoseStore>,
        clock: Arc<dyn Clock>,
        grace: TimeDelta,
        timeout: Duration,
    ) -> Self {
        Self {
            schedules,
            doses,
            clock,
            grace,
            timeout,
        }
    }

    /// Ticks every `interval` until `shutdown` fires. The first run starts immediately.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: Shutdown) {
        let mut stop = shutdown.clone();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Missed dose sweeper started, running every {:?}", interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep(&shutdown).await;
                }
                _ = stop.wait() => break,
            }
        }
        info!("Missed dose sweeper stopped");
    }

    /// One full pass. Stops between slots once `shutdown` fires; a slot is never left
    /// half-processed.
    pub async fn sweep(&self, shutdown: &Shutdown) -> SweepReport {
        let now = self.clock.now();
        let today = now.date();
        let start_of_today = today.and_time(NaiveTime::MIN);
        let mut report = SweepReport::default();

        match bounded(
            self.timeout,
            "deactivate expired schedules",
            self.schedules.deactivate_expired(today),
        )
        .await
        {
            Ok(count) => report.deactivated_schedules = count,
            Err(err) => warn!("Failed to deactivate expired schedules: {}", err),
        }

        let slots = match bounded(
            self.timeout,
            "load timed schedule slots",
            self.schedules.timed_slots_in_effect(today),
        )
        .await
        {
            Ok(slots) => slots,
            Err(err) => {
                warn!("Sweep aborted, could not load schedule slots: {}", err);
                report.errored += 1;
                return report;
            }
        };

        for (slot, schedule) in slots {
            if shutdown.is_triggered() {
                report.interrupted = true;
                break;
            }
            report.examined += 1;

            match self.sweep_slot(&slot, &schedule, now, start_of_today).await {
                Ok(SlotOutcome::NotDue) => report.not_due += 1,
                Ok(SlotOutcome::AlreadyLogged) => report.already_logged += 1,
                Ok(SlotOutcome::Skipped) => report.skipped += 1,
                Err(err) => {
                    report.errored += 1;
                    warn!(
                        "Sweep failed for slot #{} of schedule #{}: {}",
                        slot.id, schedule.id, err
                    );
                }
            }
        }

        info!(
            "Sweep finished: {} examined, {} skipped, {} already logged, {} not due, {} errored, {} schedules expired",
            report.examined,
            report.skipped,
            report.already_logged,
            report.not_due,
            report.errored,
            report.deactivated_schedules
        );
        report
    }

    async fn sweep_slot(
        &self,
        slot: &SlotEntity,
        schedule: &ScheduleEntity,
        now: NaiveDateTime,
        start_of_today: NaiveDateTime,
    ) -> CoreResult<SlotOutcome> {
        let Some(time_of_day) = slot.time_of_day else {
            return Ok(SlotOutcome::NotDue);
        };

        let scheduled_today = start_of_today.date().and_time(time_of_day);
        if now - scheduled_today <= self.grace {
            return Ok(SlotOutcome::NotDue);
        }

        let inserted = bounded(
            self.timeout,
            "record skipped dose",
            self.doses
                .record_skip_if_absent(slot.id, schedule.patient_id, start_of_today, now),
        )
        .await?;

        Ok(match inserted {
            Some(_) => {
                info!(
                    "Dose automatically skipped: patient #{}, medication {}, slot #{}",
                    schedule.patient_id, schedule.medication_name, slot.id
                );
                SlotOutcome::Skipped
            }
            None => SlotOutcome::AlreadyLogged,
        })
    }
}
