use chrono::{Datelike, Duration, Months, NaiveDate};

/// First day of the month containing `d`.
pub fn month_start(d: NaiveDate) -> NaiveDate {
    d - Duration::days(d.day0() as i64)
}

/// Last day of the month containing `d`.
pub fn month_end(d: NaiveDate) -> NaiveDate {
    let start = month_start(d);
    match start.checked_add_months(Months::new(1)) {
        Some(next) => next - Duration::days(1),
        None => NaiveDate::MAX,
    }
}

/// Shift a month start by `delta` months (negative goes back).
pub fn shift_months(d: NaiveDate, delta: i32) -> Option<NaiveDate> {
    let start = month_start(d);
    if delta >= 0 {
        start.checked_add_months(Months::new(delta as u32))
    } else {
        start.checked_sub_months(Months::new(delta.unsigned_abs()))
    }
}

/// Normalized month key used for grouping (`YYYY-MM-01`).
pub fn month_key(d: NaiveDate) -> String {
    month_start(d).format("%Y-%m-01").to_string()
}

/// Human label for a month, e.g. `Jun 2025`.
pub fn month_label(d: NaiveDate) -> String {
    d.format("%b %Y").to_string()
}

pub fn same_month(a: NaiveDate, b: NaiveDate) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

/// Sunday on or before `d`. Weekly chart buckets start on Sunday.
pub fn week_start(d: NaiveDate) -> NaiveDate {
    d - Duration::days(d.weekday().num_days_from_sunday() as i64)
}

/// Parse a stored day value. Accepts `YYYY-MM-DD` and ISO timestamps
/// (only the date part is kept).
pub fn parse_day(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let day = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Parse a month reference (`YYYY-MM`, `YYYY-MM-DD`) to the first of that month.
pub fn parse_month(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Some(d) = parse_day(s) {
        return Some(month_start(d));
    }
    NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d").ok()
}

pub fn format_day(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_month_bounds() {
        assert_eq!(month_start(ymd(2025, 3, 17)), ymd(2025, 3, 1));
        assert_eq!(month_end(ymd(2025, 2, 10)), ymd(2025, 2, 28));
        assert_eq!(month_end(ymd(2024, 2, 10)), ymd(2024, 2, 29)); // Leap year
        assert_eq!(month_end(ymd(2025, 12, 1)), ymd(2025, 12, 31));
    }

    #[test]
    fn test_shift_months() {
        assert_eq!(shift_months(ymd(2025, 1, 20), -1), Some(ymd(2024, 12, 1)));
        assert_eq!(shift_months(ymd(2025, 6, 30), 0), Some(ymd(2025, 6, 1)));
        assert_eq!(shift_months(ymd(2025, 11, 5), 3), Some(ymd(2026, 2, 1)));
    }

    #[test]
    fn test_month_key_and_label() {
        assert_eq!(month_key(ymd(2025, 6, 14)), "2025-06-01");
        assert_eq!(month_label(ymd(2025, 6, 1)), "Jun 2025");
    }

    #[test]
    fn test_week_start_is_sunday() {
        // 2025-06-11 is a Wednesday
        assert_eq!(week_start(ymd(2025, 6, 11)), ymd(2025, 6, 8));
        assert_eq!(week_start(ymd(2025, 6, 8)), ymd(2025, 6, 8));
    }

    #[test]
    fn test_parse_day() {
        assert_eq!(parse_day("2025-01-15"), Some(ymd(2025, 1, 15)));
        assert_eq!(parse_day("2025-01-15T10:30:00.000Z"), Some(ymd(2025, 1, 15)));
        assert_eq!(parse_day("15/01/2025"), None);
        assert_eq!(parse_day(""), None);
        assert_eq!(parse_day("2025-02-30"), None);
    }

    #[test]
    fn test_parse_month() {
        assert_eq!(parse_month("2025-06"), Some(ymd(2025, 6, 1)));
        assert_eq!(parse_month("2025-06-01"), Some(ymd(2025, 6, 1)));
        assert_eq!(parse_month("2025-06-19"), Some(ymd(2025, 6, 1)));
        assert_eq!(parse_month("2025-13"), None);
        assert_eq!(parse_month("June"), None);
    }

    #[test]
    fn test_same_month() {
        assert!(same_month(ymd(2025, 3, 1), ymd(2025, 3, 31)));
        assert!(!same_month(ymd(2025, 3, 1), ymd(2024, 3, 1)));
    }
}
