//! Wall-clock helpers shared by the phase model, parser and fallback scheduler.
//!
//! Configuration and generator output carry times as `HH:MM` strings, the
//! same convention the daily template used. Everything downstream works on
//! `DateTime<Utc>` anchored to the planning date in the planning timezone.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Parse `HH:MM` (or `H:MM`) into a wall-clock time.
pub fn parse_clock(value: &str) -> Option<NaiveTime> {
    let (hour, minute) = value.trim().split_once(':')?;
    if hour.is_empty() || hour.len() > 2 || minute.len() != 2 {
        return None;
    }
    if !hour.bytes().chain(minute.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Minutes since local midnight.
pub fn minutes_of_day(time: NaiveTime) -> i64 {
    use chrono::Timelike;
    i64::from(time.hour()) * 60 + i64::from(time.minute())
}

/// The UTC instant for a local wall-clock time on `date`.
///
/// Returns `None` when the local time falls in a DST gap. Ambiguous times
/// (DST fold) resolve to the earlier instant.
pub fn local_instant(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Format an instant as local `HH:MM`.
pub fn format_clock(tz: Tz, instant: DateTime<Utc>) -> String {
    instant.with_timezone(&tz).format("%H:%M").to_string()
}

/// Local midnight at the start of `date`, falling back to UTC midnight
/// should the zone skip midnight itself.
pub fn start_of_day(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    local_instant(tz, date, NaiveTime::MIN).unwrap_or_else(|| date.and_time(NaiveTime::MIN).and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_one_and_two_digit_hours() {
        assert_eq!(parse_clock("9:00"), NaiveTime::from_hms_opt(9, 0, 0));
        assert_eq!(parse_clock("09:05"), NaiveTime::from_hms_opt(9, 5, 0));
        assert_eq!(parse_clock(" 21:45 "), NaiveTime::from_hms_opt(21, 45, 0));
    }

    #[test]
    fn rejects_malformed_clocks() {
        assert!(parse_clock("25:00").is_none());
        assert!(parse_clock("9:5").is_none());
        assert!(parse_clock("0900").is_none());
        assert!(parse_clock("ab:cd").is_none());
        assert!(parse_clock("").is_none());
        assert!(parse_clock("+9:00").is_none());
        assert!(parse_clock("9:+5").is_none());
    }

    #[test]
    fn local_instant_applies_offset() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let utc = local_instant(chrono_tz::Europe::Amsterdam, date, nine).unwrap();
        // CET is UTC+1 in January
        assert_eq!(utc.format("%H:%M").to_string(), "08:00");
        assert_eq!(format_clock(chrono_tz::Europe::Amsterdam, utc), "09:00");
    }

    #[test]
    fn dst_gap_has_no_instant() {
        // Clocks jump from 02:00 to 03:00 on the last Sunday of March
        let date = NaiveDate::from_ymd_opt(2025, 3, 30).unwrap();
        let half_two = NaiveTime::from_hms_opt(2, 30, 0).unwrap();
        assert!(local_instant(chrono_tz::Europe::Amsterdam, date, half_two).is_none());
    }
}
