use chrono::{DateTime, Datelike, Timelike, Utc};

/// Width of the time bucket a rollup row is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Hour,
    Day,
    Month,
}

impl Period {
    /// Start of the bucket containing `at`, which is the row's `calculation_period`.
    pub fn truncate(self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = at.date_naive();
        let start = match self {
            Period::Hour => date.and_hms_opt(at.hour(), 0, 0),
            Period::Day => date.and_hms_opt(0, 0, 0),
            Period::Month => date.with_day(1).and_then(|d| d.and_hms_opt(0, 0, 0)),
        };
        start.map(|s| s.and_utc()).unwrap_or(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn truncates_to_bucket_start() {
        let at = Utc.with_ymd_and_hms(2024, 10, 17, 14, 37, 12).unwrap();
        assert_eq!(
            Period::Hour.truncate(at),
            Utc.with_ymd_and_hms(2024, 10, 17, 14, 0, 0).unwrap()
        );
        assert_eq!(
            Period::Day.truncate(at),
            Utc.with_ymd_and_hms(2024, 10, 17, 0, 0, 0).unwrap()
        );
        assert_eq!(
            Period::Month.truncate(at),
            Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn bucket_start_is_a_fixed_point() {
        let start = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        for period in [Period::Hour, Period::Day, Period::Month] {
            assert_eq!(period.truncate(start), start);
        }
    }
}
