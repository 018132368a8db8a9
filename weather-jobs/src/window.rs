use chrono::{DateTime, Duration, Months, Utc};
use weather_common::period::Period;

/// A half-open `[start, end)` slice of the analytical log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// The `length` right before `now`.
    pub fn trailing(now: DateTime<Utc>, length: Duration) -> Self {
        Self {
            start: now - length,
            end: now,
        }
    }

    /// Consecutive windows of one `period` each, covering `[start, end)`. The
    /// last window is cut short at `end`.
    pub fn steps(start: DateTime<Utc>, end: DateTime<Utc>, period: Period) -> Vec<Self> {
        let mut windows = Vec::new();
        let mut cursor = start;
        while cursor < end {
            let next = match period {
                Period::Hour => cursor + Duration::hours(1),
                Period::Day => cursor + Duration::days(1),
                Period::Month => cursor.checked_add_months(Months::new(1)).unwrap_or(end),
            }
            .min(end);
            windows.push(Self {
                start: cursor,
                end: next,
            });
            cursor = next;
        }
        windows
    }

    // ClickHouse bounds, bound through fromUnixTimestamp64Milli
    pub fn start_millis(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_millis(&self) -> i64 {
        self.end.timestamp_millis()
    }
}

/// What part of the analytical log a run aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// The minute before the run, credited to the period the run falls in.
    LastMinute,
    /// `[start, end)` in steps of the period, each credited to its own period.
    Backfill {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl Coverage {
    /// Windows to aggregate, each with the `calculation_period` it is
    /// credited to.
    pub fn windows(&self, now: DateTime<Utc>, period: Period) -> Vec<(TimeWindow, DateTime<Utc>)> {
        match *self {
            Coverage::LastMinute => vec![(
                TimeWindow::trailing(now, Duration::minutes(1)),
                period.truncate(now),
            )],
            Coverage::Backfill { start, end } => TimeWindow::steps(start, end, period)
                .into_iter()
                .map(|window| (window, period.truncate(window.start)))
                .collect(),
        }
    }

    pub fn is_backfill(&self) -> bool {
        matches!(self, Coverage::Backfill { .. })
    }
}

/// Parses a backfill bound such as `2024-09-01T00:00:00Z`.
pub fn parse_bound(name: &str, value: Option<&str>) -> Result<DateTime<Utc>, String> {
    let value = value.ok_or_else(|| format!("{name} is required"))?;
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("{name} is not an RFC 3339 timestamp: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn trailing_window_ends_now() {
        let now = Utc.with_ymd_and_hms(2024, 10, 17, 14, 37, 0).unwrap();
        let window = TimeWindow::trailing(now, Duration::minutes(1));
        assert_eq!(
            window.start,
            Utc.with_ymd_and_hms(2024, 10, 17, 14, 36, 0).unwrap()
        );
        assert_eq!(window.end_millis() - window.start_millis(), 60_000);
    }

    #[test]
    fn steps_cover_the_range_without_gaps() {
        let start = Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 10, 1, 3, 30, 0).unwrap();
        let windows = TimeWindow::steps(start, end, Period::Hour);

        assert_eq!(windows.len(), 4);
        assert_eq!(windows[0].start, start);
        assert_eq!(windows[3].end, end);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn empty_range_has_no_steps() {
        let at = Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap();
        assert!(TimeWindow::steps(at, at, Period::Day).is_empty());
    }

    #[test]
    fn last_minute_is_credited_to_the_current_period() {
        let now = Utc.with_ymd_and_hms(2024, 10, 17, 14, 0, 20).unwrap();
        let windows = Coverage::LastMinute.windows(now, Period::Hour);

        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].0.end, now);
        assert_eq!(
            windows[0].1,
            Utc.with_ymd_and_hms(2024, 10, 17, 14, 0, 0).unwrap()
        );
    }

    #[test]
    fn backfill_steps_are_credited_to_their_own_period() {
        let coverage = Coverage::Backfill {
            start: Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 9, 4, 0, 0, 0).unwrap(),
        };
        let now = Utc.with_ymd_and_hms(2024, 10, 17, 14, 0, 0).unwrap();

        let periods: Vec<_> = coverage
            .windows(now, Period::Day)
            .into_iter()
            .map(|(_, period)| period)
            .collect();

        assert_eq!(
            periods,
            vec![
                Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 9, 2, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 9, 3, 0, 0, 0).unwrap(),
            ]
        );
    }

    #[test]
    fn bounds_must_be_present_and_valid() {
        assert!(parse_bound("START_DATE", None).is_err());
        assert!(parse_bound("START_DATE", Some("yesterday")).is_err());
        assert_eq!(
            parse_bound("START_DATE", Some("2024-09-01T02:00:00+02:00")).unwrap(),
            Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap()
        );
    }
}
