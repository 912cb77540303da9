//! Compact date and fiscal-year helpers
//!
//! Documents carry dates as `YYYYMMDD`. The fiscal year runs April to
//! March: January to March belong to the previous calendar year's
//! fiscal year.

use chrono::{Datelike, Local, NaiveDate};

/// First month of the fiscal year
pub const FISCAL_YEAR_START_MONTH: u32 = 4;

/// Parse a `YYYYMMDD` date; anything else yields `None`
pub fn parse_compact_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y%m%d").ok()
}

/// Format a date as `YYYYMMDD`
pub fn format_compact_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Format a date as `YYYY/MM/DD`
pub fn format_slash_date(date: NaiveDate) -> String {
    date.format("%Y/%m/%d").to_string()
}

/// Fiscal year a date falls in
pub fn fiscal_year_of(date: NaiveDate) -> i32 {
    if date.month() >= FISCAL_YEAR_START_MONTH {
        date.year()
    } else {
        date.year() - 1
    }
}

/// Fiscal year of a compact date string, `today` when unparseable
pub fn fiscal_year_of_compact(s: &str, today: NaiveDate) -> i32 {
    fiscal_year_of(parse_compact_date(s).unwrap_or(today))
}

/// Local calendar date
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_march_belongs_to_previous_fiscal_year() {
        assert_eq!(fiscal_year_of(date(2025, 3, 31)), 2024);
    }

    #[test]
    fn test_april_starts_new_fiscal_year() {
        assert_eq!(fiscal_year_of(date(2025, 4, 1)), 2025);
    }

    #[test]
    fn test_january_compact_date() {
        assert_eq!(fiscal_year_of_compact("20250115", date(2030, 6, 1)), 2024);
    }

    #[test]
    fn test_unparseable_date_uses_today() {
        assert_eq!(fiscal_year_of_compact("2025-01-15", date(2030, 6, 1)), 2030);
        assert_eq!(fiscal_year_of_compact("", date(2030, 2, 1)), 2029);
    }

    #[test]
    fn test_parse_rejects_invalid_calendar_dates() {
        assert!(parse_compact_date("20250230").is_none());
        assert!(parse_compact_date("2025011").is_none());
        assert_eq!(parse_compact_date(" 20250115 "), Some(date(2025, 1, 15)));
    }

    #[test]
    fn test_formatting() {
        let d = date(2024, 7, 5);
        assert_eq!(format_compact_date(d), "20240705");
        assert_eq!(format_slash_date(d), "2024/07/05");
    }
}
