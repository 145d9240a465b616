//! Working-day predicate and Gregorian↔Hijri arithmetic.
//!
//! The merchant's week closes on Friday only; official holidays come from
//! an input calendar. Seasonal shaping needs to know whether a Gregorian
//! date falls in Ramadan or Sha'ban, which the tabular (civil) Islamic
//! calendar answers with pure integer arithmetic — exact enough for
//! month-level signals and fully deterministic.

use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};

use super::types::Holiday;

/// Official-holiday lookup.
#[derive(Debug, Clone, Default)]
pub struct HolidayCalendar {
    dates: BTreeSet<NaiveDate>,
}

impl HolidayCalendar {
    pub fn new(rows: Vec<Holiday>) -> Self {
        Self {
            dates: rows.into_iter().map(|h| h.date).collect(),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// False iff the weekday is Friday or the date is an official holiday.
pub fn is_working_day(date: NaiveDate, holidays: &HolidayCalendar) -> bool {
    date.weekday() != Weekday::Fri && !holidays.contains(date)
}

/// Signed day difference `b − a` (negative when `b < a`).
pub fn days_between(a: NaiveDate, b: NaiveDate) -> i64 {
    b.signed_duration_since(a).num_days()
}

/// All dates in `[start, end]`, ascending. Empty when `end < start`.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut out = Vec::new();
    let mut cur = start;
    while cur <= end {
        out.push(cur);
        cur += Duration::days(1);
    }
    out
}

/// Local timestamp on `date` at the given hour and minute (clamped to
/// valid wall-clock values, so construction cannot fail).
pub fn datetime_at(date: NaiveDate, hour: u32, minute: u32) -> NaiveDateTime {
    let time = NaiveTime::from_hms_opt(hour.min(23), minute.min(59), 0).unwrap_or(NaiveTime::MIN);
    NaiveDateTime::new(date, time)
}

/// A date in the tabular Islamic calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HijriDate {
    pub year: i32,
    /// 1-based; 8 is Sha'ban, 9 is Ramadan.
    pub month: u32,
    pub day: u32,
}

/// Julian day number of a Gregorian date (integer, noon-based).
fn julian_day_number(date: NaiveDate) -> i64 {
    let (y, m, d) = (date.year() as i64, date.month() as i64, date.day() as i64);
    let a = (14 - m) / 12;
    let y = y + 4800 - a;
    let m = m + 12 * a - 3;
    d + (153 * m + 2) / 5 + 365 * y + y / 4 - y / 100 + y / 400 - 32045
}

/// Convert a Gregorian date to the tabular (civil) Islamic calendar.
///
/// Tabular months alternate 30/29 days with eleven leap years per
/// 30-year cycle; the result can differ from the observational Umm
/// al-Qura calendar by a day at month boundaries, which is immaterial
/// for month-level seasonality.
pub fn to_hijri(date: NaiveDate) -> HijriDate {
    let jdn = julian_day_number(date);
    let mut l = jdn - 1_948_440 + 10_632;
    let n = (l - 1) / 10_631;
    l = l - 10_631 * n + 354;
    let j = ((10_985 - l) / 5_316) * ((50 * l) / 17_719) + (l / 5_670) * ((43 * l) / 15_238);
    l = l - ((30 - j) / 15) * ((17_719 * j) / 50) - (j / 16) * ((15_238 * j) / 43) + 29;
    let month = (24 * l) / 709;
    let day = l - (709 * month) / 24;
    let year = 30 * n + j - 30;
    HijriDate {
        year: year as i32,
        month: month as u32,
        day: day as u32,
    }
}

/// True when the date falls in Ramadan (Hijri month 9).
pub fn is_ramadan(date: NaiveDate) -> bool {
    to_hijri(date).month == 9
}

/// True when the date falls in Sha'ban (Hijri month 8).
pub fn is_shaaban(date: NaiveDate) -> bool {
    to_hijri(date).month == 8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn fridays_are_closed() {
        let holidays = HolidayCalendar::default();
        assert!(!is_working_day(date(2024, 6, 14), &holidays)); // Friday
        assert!(is_working_day(date(2024, 6, 15), &holidays)); // Saturday
        assert!(is_working_day(date(2024, 6, 16), &holidays)); // Sunday
    }

    #[test]
    fn holidays_are_closed() {
        let holidays = HolidayCalendar::new(vec![Holiday {
            date: date(2024, 6, 16),
            name: "Eid al-Adha".into(),
        }]);
        assert!(!is_working_day(date(2024, 6, 16), &holidays));
        assert!(is_working_day(date(2024, 6, 17), &holidays));
    }

    #[test]
    fn hijri_anchor_dates() {
        // 12 March 2024 = 2 Ramadan 1445 in the tabular calendar.
        let h = to_hijri(date(2024, 3, 12));
        assert_eq!((h.year, h.month, h.day), (1445, 9, 2));

        // 15 February 2024 = 5 Sha'ban 1445.
        let h = to_hijri(date(2024, 2, 15));
        assert_eq!((h.year, h.month, h.day), (1445, 8, 5));
    }

    #[test]
    fn ramadan_and_shaaban_windows() {
        assert!(is_ramadan(date(2024, 3, 20)));
        assert!(!is_ramadan(date(2024, 6, 20)));
        assert!(is_shaaban(date(2024, 2, 20)));
        assert!(!is_shaaban(date(2024, 3, 20)));
    }

    #[test]
    fn range_and_day_counts() {
        let range = date_range(date(2024, 1, 30), date(2024, 2, 2));
        assert_eq!(range.len(), 4);
        assert_eq!(range[0], date(2024, 1, 30));
        assert_eq!(range[3], date(2024, 2, 2));
        assert_eq!(days_between(date(2024, 1, 1), date(2024, 3, 31)), 90);
        assert!(date_range(date(2024, 2, 2), date(2024, 2, 1)).is_empty());
    }

    #[test]
    fn timestamp_construction() {
        let ts = datetime_at(date(2024, 3, 12), 14, 30);
        assert_eq!(ts.to_string(), "2024-03-12 14:30:00");
        // Out-of-range components clamp instead of panicking.
        let ts = datetime_at(date(2024, 3, 12), 99, 99);
        assert_eq!(ts.to_string(), "2024-03-12 23:59:00");
    }
}
