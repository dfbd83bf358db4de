//! Dose status classification.
//!
//! The comparison uses the time of day only. A dose scheduled for 23:50 and taken at 00:10 the
//! next day therefore measures 23h40m apart and classifies as late, not as 20 minutes off.

use chrono::{NaiveDateTime, NaiveTime, TimeDelta};

use crate::models::DoseStatus;

pub const ON_TIME_TOLERANCE: TimeDelta = TimeDelta::minutes(30);

/// Classifies a dose taken at `taken_at` against the default 30 minute window.
pub fn classify(scheduled: Option<NaiveTime>, taken_at: NaiveDateTime) -> DoseStatus {
    classify_within(scheduled, taken_at, ON_TIME_TOLERANCE)
}

/// PRN doses (`scheduled == None`) are always TAKEN. Never returns SKIPPED.
pub fn classify_within(
    scheduled: Option<NaiveTime>,
    taken_at: NaiveDateTime,
    tolerance: TimeDelta,
) -> DoseStatus {
    let Some(scheduled) = scheduled else {
        return DoseStatus::Taken;
    };

    // whole minutes, truncated
    let diff_minutes = (taken_at.time() - scheduled).num_minutes().abs();
    if diff_minutes <= tolerance.num_minutes() {
        DoseStatus::Taken
    } else {
        DoseStatus::LateDose
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn nine() -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(9, 0, 0)
    }

    #[test]
    fn prn_is_always_taken() {
        for (h, m) in [(0, 0), (3, 17), (9, 0), (23, 59)] {
            assert_eq!(classify(None, at(h, m)), DoseStatus::Taken);
        }
    }

    #[test]
    fn window_is_symmetric_around_the_slot() {
        assert_eq!(classify(nine(), at(9, 25)), DoseStatus::Taken);
        assert_eq!(classify(nine(), at(8, 25)), DoseStatus::LateDose);
        assert_eq!(classify(nine(), at(8, 35)), DoseStatus::Taken);
        assert_eq!(classify(nine(), at(9, 45)), DoseStatus::LateDose);
        assert_eq!(classify(nine(), at(7, 0)), DoseStatus::LateDose);
    }

    #[test]
    fn boundary_minute_is_on_time() {
        assert_eq!(classify(nine(), at(9, 30)), DoseStatus::Taken);
        assert_eq!(classify(nine(), at(8, 30)), DoseStatus::Taken);
        assert_eq!(classify(nine(), at(9, 31)), DoseStatus::LateDose);
    }

    #[test]
    fn seconds_are_truncated() {
        let taken = NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(9, 30, 59)
            .unwrap();
        assert_eq!(classify(nine(), taken), DoseStatus::Taken);
    }

    #[test]
    fn date_is_ignored() {
        let next_week = NaiveDate::from_ymd_opt(2025, 3, 21)
            .unwrap()
            .and_hms_opt(9, 10, 0)
            .unwrap();
        assert_eq!(classify(nine(), next_week), DoseStatus::Taken);
    }

    #[test]
    fn midnight_wrap_counts_as_late() {
        let late_night = NaiveTime::from_hms_opt(23, 50, 0);
        assert_eq!(classify(late_night, at(0, 10)), DoseStatus::LateDose);
    }

    #[test]
    fn custom_tolerance() {
        assert_eq!(
            classify_within(nine(), at(9, 45), TimeDelta::minutes(60)),
            DoseStatus::Taken
        );
    }
}
