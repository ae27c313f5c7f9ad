/*!
The "today" window used to filter the threat listing
*/

use chrono::{DateTime, Duration, NaiveTime, Utc};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// A UTC day, `[start, end]` inclusive at second precision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// The UTC day containing `now`
    pub fn day_of(now: DateTime<Utc>) -> Self {
        let start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let end = start + Duration::days(1) - Duration::seconds(1);
        Self { start, end }
    }

    pub fn today() -> Self {
        Self::day_of(Utc::now())
    }

    /// Value of the `filter` query parameter for this window
    pub fn filter_expression(&self) -> String {
        format!(
            "receivedTime gte {} lte {}",
            self.start.format(TIMESTAMP_FORMAT),
            self.end.format(TIMESTAMP_FORMAT)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_covers_the_whole_utc_day() {
        let now = Utc.with_ymd_and_hms(2024, 5, 17, 13, 45, 12).unwrap();
        let window = TimeWindow::day_of(now);

        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 5, 17, 0, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 5, 17, 23, 59, 59).unwrap());
    }

    #[test]
    fn filter_uses_second_precision_zulu_timestamps() {
        let now = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(
            TimeWindow::day_of(now).filter_expression(),
            "receivedTime gte 2024-12-31T00:00:00Z lte 2024-12-31T23:59:59Z"
        );
    }

    #[test]
    fn midnight_starts_a_new_window() {
        let before = Utc.with_ymd_and_hms(2024, 2, 28, 23, 59, 59).unwrap();
        let after = before + Duration::seconds(1);

        assert_ne!(TimeWindow::day_of(before), TimeWindow::day_of(after));
        assert_eq!(TimeWindow::day_of(after).start, after);
    }
}
