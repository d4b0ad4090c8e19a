//! Month arithmetic for rotating message partitions.

use crate::error::{Error, Result};
use chrono::{Datelike, Days, NaiveDate, Utc};

/// Step used when walking across a month boundary.
const STEP: Days = Days::new(14);

/// Today's date in UTC.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Walk `|delta|` month boundaries away from `today`.
///
/// Each boundary is crossed in 14-day steps until the month number changes,
/// so the result is some day inside the target month. Which day depends on
/// where `today` falls, but the month never does; month-end dates cannot
/// skip or repeat a month.
pub fn month_offset(today: NaiveDate, delta: i32) -> Result<NaiveDate> {
    let mut current = today;
    let mut last = today;

    for _ in 0..delta.unsigned_abs() {
        while current.month() == last.month() {
            let stepped = if delta < 0 {
                current.checked_sub_days(STEP)
            } else {
                current.checked_add_days(STEP)
            };
            current = stepped.ok_or_else(|| {
                Error::Internal(format!("date out of range stepping from {}", current))
            })?;
        }
        last = current;
    }

    Ok(current)
}

/// `"{prefix}_{year}_{month}"` for the month `delta` months from `today`.
///
/// The month is not zero-padded: `message_2024_3`.
pub fn partition_name_for(prefix: &str, today: NaiveDate, delta: i32) -> Result<String> {
    let date = month_offset(today, delta)?;
    Ok(format!("{}_{}_{}", prefix, date.year(), date.month()))
}

/// Partition name relative to the current UTC date.
pub fn partition_name(prefix: &str, delta: i32) -> Result<String> {
    partition_name_for(prefix, today(), delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_zero_offset_is_today() {
        assert_eq!(month_offset(date(2024, 3, 9), 0).unwrap(), date(2024, 3, 9));
    }

    #[test]
    fn test_forward_across_month_end() {
        let next = month_offset(date(2024, 1, 31), 1).unwrap();
        assert_eq!((next.year(), next.month()), (2024, 2));

        let two = month_offset(date(2024, 1, 31), 2).unwrap();
        assert_eq!((two.year(), two.month()), (2024, 3));
    }

    #[test]
    fn test_backward_across_year() {
        let prev = month_offset(date(2024, 1, 1), -1).unwrap();
        assert_eq!((prev.year(), prev.month()), (2023, 12));

        let prev = month_offset(date(2024, 3, 31), -1).unwrap();
        assert_eq!((prev.year(), prev.month()), (2024, 2));
    }

    #[test]
    fn test_forward_across_year() {
        let next = month_offset(date(2023, 12, 15), 1).unwrap();
        assert_eq!((next.year(), next.month()), (2024, 1));
    }

    #[test]
    fn test_every_day_of_year_steps_one_month() {
        let mut day = date(2023, 1, 1);
        while day.year() == 2023 {
            let expected_next = if day.month() == 12 { 1 } else { day.month() + 1 };
            let expected_prev = if day.month() == 1 { 12 } else { day.month() - 1 };
            assert_eq!(month_offset(day, 1).unwrap().month(), expected_next, "{}", day);
            assert_eq!(month_offset(day, -1).unwrap().month(), expected_prev, "{}", day);
            day = day.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_partition_name_format() {
        let today = date(2024, 3, 20);
        assert_eq!(partition_name_for("message", today, 0).unwrap(), "message_2024_3");
        assert_eq!(partition_name_for("message", today, -1).unwrap(), "message_2024_2");
        assert_eq!(partition_name_for("message", today, 1).unwrap(), "message_2024_4");
        assert_eq!(
            partition_name_for("message", date(2024, 12, 2), 1).unwrap(),
            "message_2025_1"
        );
    }

    #[test]
    fn test_partition_name_uses_current_month() {
        let now = today();
        let expected = format!("message_{}_{}", now.year(), now.month());
        assert_eq!(partition_name("message", 0).unwrap(), expected);
    }
}
