use crate::domain::models::parse_date;
use chrono::{DateTime, Days, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

const DAYS_PER_WEEK: u64 = 7;

/// Half-open UTC interval `[start, end)` covering whole local calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    /// Covers `start` through `end` inclusive, both interpreted in `timezone`.
    pub fn from_date_strings(start: &str, end: &str, timezone: Tz) -> Result<Self, String> {
        let start_date = parse_date(start, "start")?;
        let end_date = parse_date(end, "end")?;
        Self::from_dates(start_date, end_date, timezone)
    }

    pub fn from_dates(start: NaiveDate, end: NaiveDate, timezone: Tz) -> Result<Self, String> {
        if end < start {
            return Err(format!("start {start} must not be after end {end}"));
        }
        let day_after_end = end
            .checked_add_days(Days::new(1))
            .ok_or_else(|| format!("end {end} is out of range"))?;
        Ok(Self {
            start: local_midnight(start, timezone)?,
            end: local_midnight(day_after_end, timezone)?,
        })
    }

    /// Seven local days starting at `week_start`.
    pub fn week(week_start: &str, timezone: Tz) -> Result<Self, String> {
        let start = parse_date(week_start, "week_start")?;
        let last_day = start
            .checked_add_days(Days::new(DAYS_PER_WEEK - 1))
            .ok_or_else(|| format!("week_start {start} is out of range"))?;
        Self::from_dates(start, last_day, timezone)
    }
}

fn local_midnight(date: NaiveDate, timezone: Tz) -> Result<DateTime<Utc>, String> {
    let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| format!("invalid date {date}"))?;
    match timezone.from_local_datetime(&midnight) {
        LocalResult::Single(value) | LocalResult::Ambiguous(value, _) => Ok(value.with_timezone(&Utc)),
        LocalResult::None => Err(format!("{date} has no local midnight in {}", timezone.name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    #[test]
    fn range_covers_whole_local_days() {
        let window = DateWindow::from_date_strings("2026-03-02", "2026-03-03", chrono_tz::UTC)
            .expect("valid window");
        assert_eq!(window.start, utc("2026-03-02T00:00:00Z"));
        assert_eq!(window.end, utc("2026-03-04T00:00:00Z"));
    }

    #[test]
    fn range_uses_melbourne_offset() {
        // Melbourne is UTC+11 during daylight saving in March.
        let window = DateWindow::from_date_strings(
            "2026-03-02",
            "2026-03-02",
            chrono_tz::Australia::Melbourne,
        )
        .expect("valid window");
        assert_eq!(window.start, utc("2026-03-01T13:00:00Z"));
        assert_eq!(window.end, utc("2026-03-02T13:00:00Z"));
    }

    #[test]
    fn reversed_range_is_rejected() {
        assert!(DateWindow::from_date_strings("2026-03-03", "2026-03-02", chrono_tz::UTC).is_err());
        assert!(DateWindow::from_date_strings("03/02/2026", "2026-03-02", chrono_tz::UTC).is_err());
    }

    #[test]
    fn week_spans_seven_days() {
        let window = DateWindow::week("2026-03-02", chrono_tz::UTC).expect("valid week");
        assert_eq!(window.start, utc("2026-03-02T00:00:00Z"));
        assert_eq!(window.end, utc("2026-03-09T00:00:00Z"));
    }
}
