//! Timestamp helpers.
//!
//! Timestamps are stored as RFC 3339 strings. Older rows and form inputs may
//! carry naive ISO values, which are read as local time.

use chrono::{DateTime, Local, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};

const MONTHS_PT: [&str; 12] = [
    "janeiro",
    "fevereiro",
    "março",
    "abril",
    "maio",
    "junho",
    "julho",
    "agosto",
    "setembro",
    "outubro",
    "novembro",
    "dezembro",
];

#[must_use]
pub fn now_rfc3339() -> String {
    Local::now().to_rfc3339()
}

/// Resolves a naive local datetime, picking the earlier instant on DST overlaps.
#[must_use]
pub fn local_from_naive(naive: NaiveDateTime) -> Option<DateTime<Local>> {
    Local.from_local_datetime(&naive).earliest()
}

#[must_use]
pub fn parse_timestamp(value: &str) -> Option<DateTime<Local>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Local));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return local_from_naive(naive);
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| local_from_naive(date.and_time(NaiveTime::MIN)))
}

/// `dd/mm/YYYY`
#[must_use]
pub fn format_date_br(dt: &DateTime<Local>) -> String {
    dt.format("%d/%m/%Y").to_string()
}

/// `dd/mm/YYYY HH:MM`
#[must_use]
pub fn format_datetime_br(dt: &DateTime<Local>) -> String {
    dt.format("%d/%m/%Y %H:%M").to_string()
}

/// `5 de março de 2025`
#[must_use]
pub fn format_date_long_pt(date: NaiveDate) -> String {
    use chrono::Datelike;
    let month = MONTHS_PT[date.month0() as usize];
    format!("{} de {} de {}", date.day(), month, date.year())
}

/// Adds calendar months, clamping to the last day of shorter months.
#[must_use]
pub fn add_months_clamped(dt: DateTime<Local>, months: u32) -> DateTime<Local> {
    dt.checked_add_months(Months::new(months)).unwrap_or(dt)
}

/// Whole calendar days from today until `dt` (negative when past).
#[must_use]
pub fn days_until(dt: &DateTime<Local>) -> i64 {
    (dt.date_naive() - Local::now().date_naive()).num_days()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_rfc3339_and_naive_values() {
        let aware = parse_timestamp("2025-03-10T12:00:00+00:00").unwrap();
        assert_eq!(aware.with_timezone(&chrono::Utc).hour(), 12);

        let naive = parse_timestamp("2025-03-10T08:30").unwrap();
        assert_eq!((naive.hour(), naive.minute()), (8, 30));

        let date_only = parse_timestamp("2025-03-10").unwrap();
        assert_eq!((date_only.day(), date_only.hour()), (10, 0));

        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("tomorrow").is_none());
    }

    #[test]
    fn month_addition_clamps_day() {
        let jan_31 = parse_timestamp("2025-01-31T10:00:00").unwrap();
        let feb = add_months_clamped(jan_31, 1);
        assert_eq!((feb.month(), feb.day()), (2, 28));

        let three = add_months_clamped(jan_31, 3);
        assert_eq!((three.month(), three.day()), (4, 30));
    }

    #[test]
    fn formats_portuguese_dates() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();
        assert_eq!(format_date_long_pt(date), "5 de março de 2025");

        let dt = parse_timestamp("2025-12-01T09:07:00").unwrap();
        assert_eq!(format_date_br(&dt), "01/12/2025");
        assert_eq!(format_datetime_br(&dt), "01/12/2025 09:07");
    }
}
