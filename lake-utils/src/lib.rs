//! Shared utility functions for the lake crates.

/// Date utility functions
pub mod dates {
    use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta};

    /// Compact date format used for snapshots and overrides: "YYYYMMDD"
    pub const COMPACT_FORMAT: &str = "%Y%m%d";

    /// Seconds in one model day.
    pub const SECONDS_PER_DAY: f64 = 86_400.0;

    /// Format a NaiveDate as "YYYYMMDD"
    pub fn format_date_compact(date: &NaiveDate) -> String {
        date.format(COMPACT_FORMAT).to_string()
    }

    /// Parse a date string in "YYYY-MM-DD" format
    pub fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
        Ok(NaiveDate::parse_from_str(s, "%Y-%m-%d")?)
    }

    /// Parse a date string in "YYYYMMDD" format
    pub fn parse_date_compact(s: &str) -> anyhow::Result<NaiveDate> {
        Ok(NaiveDate::parse_from_str(s.trim(), COMPACT_FORMAT)?)
    }

    /// Parse an observation timestamp.
    ///
    /// Accepts RFC 3339 (`2024-01-15T10:00:00+00:00`), naive ISO
    /// (`2024-01-15T10:00:00` or `2024-01-15 10:00:00`) and plain dates.
    /// Offsets are normalised to UTC.
    pub fn parse_timestamp(s: &str) -> anyhow::Result<NaiveDateTime> {
        let s = s.trim();
        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
            return Ok(dt.naive_utc());
        }
        if let Ok(dt) = chrono::DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z") {
            return Ok(dt.naive_utc());
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
                return Ok(dt);
            }
        }
        Ok(parse_date(s)?.and_time(chrono::NaiveTime::MIN))
    }

    /// Midnight at the start of `date`.
    pub fn midnight(date: NaiveDate) -> NaiveDateTime {
        date.and_time(chrono::NaiveTime::MIN)
    }

    /// Convert a timestamp to model time: floating days since `reference`.
    pub fn to_model_time(time: &NaiveDateTime, reference: &NaiveDateTime) -> f64 {
        (*time - *reference).num_seconds() as f64 / SECONDS_PER_DAY
    }

    /// Convert model time (days since `reference`) back to a timestamp,
    /// rounded to the nearest second.
    pub fn from_model_time(days: f64, reference: &NaiveDateTime) -> NaiveDateTime {
        let seconds = (days * SECONDS_PER_DAY).round() as i64;
        *reference + TimeDelta::seconds(seconds)
    }

    /// Nearest whole hour; table files keep model time to a few decimals only.
    pub fn round_to_hour(time: &NaiveDateTime) -> NaiveDateTime {
        let seconds = time.and_utc().timestamp();
        let rounded = (seconds as f64 / 3600.0).round() as i64 * 3600;
        *time + TimeDelta::seconds(rounded - seconds)
    }

    /// Day of year (1-366) for a timestamp.
    pub fn day_of_year(time: &NaiveDateTime) -> u32 {
        time.ordinal()
    }

    /// Duration expressed in fractional days.
    pub fn as_days(delta: &TimeDelta) -> f64 {
        delta.num_seconds() as f64 / SECONDS_PER_DAY
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use chrono::NaiveDate;

        #[test]
        fn test_format_and_parse_compact() {
            let date = NaiveDate::from_ymd_opt(2023, 6, 15).unwrap();
            let formatted = format_date_compact(&date);
            assert_eq!(formatted, "20230615");
            let parsed = parse_date_compact(&formatted).unwrap();
            assert_eq!(parsed, date);
        }

        #[test]
        fn test_parse_compact_rejects_iso() {
            assert!(parse_date_compact("2023-06-15").is_err());
        }

        #[test]
        fn test_parse_timestamp_variants() {
            let expected = NaiveDate::from_ymd_opt(2024, 1, 15)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap();
            assert_eq!(parse_timestamp("2024-01-15T10:00:00+00:00").unwrap(), expected);
            assert_eq!(parse_timestamp("2024-01-15T11:00:00+01:00").unwrap(), expected);
            assert_eq!(parse_timestamp("2024-01-15 10:00:00").unwrap(), expected);
            assert_eq!(
                parse_timestamp("2024-01-15").unwrap(),
                midnight(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
            );
        }

        #[test]
        fn test_model_time() {
            let reference = midnight(NaiveDate::from_ymd_opt(1981, 1, 1).unwrap());
            let t = midnight(NaiveDate::from_ymd_opt(1981, 1, 2).unwrap()) + TimeDelta::hours(6);
            assert_eq!(to_model_time(&t, &reference), 1.25);
            assert_eq!(from_model_time(1.25, &reference), t);
        }

        #[test]
        fn test_round_to_hour() {
            let reference = midnight(NaiveDate::from_ymd_opt(1981, 1, 1).unwrap());
            let t = from_model_time(15340.0417, &reference);
            assert_eq!(round_to_hour(&t), midnight(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()) + TimeDelta::hours(1));
        }

        #[test]
        fn test_day_of_year() {
            let t = midnight(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
            assert_eq!(day_of_year(&t), 366);
            let t = midnight(NaiveDate::from_ymd_opt(2023, 2, 1).unwrap());
            assert_eq!(day_of_year(&t), 32);
        }
    }
}
