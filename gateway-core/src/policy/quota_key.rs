//! Quota bucket key derivation (§3: "a function of action and window
//! producing a bucket identifier").

use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

use crate::registry::QuotaWindow;

/// Builds the bucket key for one `(agent, action, window)` tuple at `now`.
///
/// - 1h  -> `agent:action:YYYY-MM-DD:HH`
/// - 24h -> `agent:action:YYYY-MM-DD`
/// - 7d  -> `agent:action:week:YYYY-MM-DD` (the Monday starting the ISO week)
pub fn quota_key(agent_id: Uuid, action: &str, window: QuotaWindow, now: DateTime<Utc>) -> String {
    match window {
        QuotaWindow::OneHour => format!(
            "{agent_id}:{action}:{}:{:02}",
            now.format("%Y-%m-%d"),
            now.format("%H")
        ),
        QuotaWindow::TwentyFourHours => format!("{agent_id}:{action}:{}", now.format("%Y-%m-%d")),
        QuotaWindow::SevenDays => {
            let week_start = now.date_naive() - chrono::Duration::days(now.weekday().num_days_from_monday() as i64);
            format!("{agent_id}:{action}:week:{}", week_start.format("%Y-%m-%d"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn one_hour_key_includes_hour() {
        let now = Utc.with_ymd_and_hms(2026, 7, 29, 14, 30, 0).unwrap();
        let agent = Uuid::nil();
        let key = quota_key(agent, "search:query", QuotaWindow::OneHour, now);
        assert!(key.ends_with(":14"));
        assert!(key.contains("2026-07-29"));
    }

    #[test]
    fn twenty_four_hour_key_is_date_only() {
        let now = Utc.with_ymd_and_hms(2026, 7, 29, 23, 59, 0).unwrap();
        let key = quota_key(Uuid::nil(), "search:query", QuotaWindow::TwentyFourHours, now);
        assert_eq!(key, format!("{}:search:query:2026-07-29", Uuid::nil()));
    }

    #[test]
    fn seven_day_key_is_stable_within_the_same_week() {
        let agent = Uuid::nil();
        let monday = Utc.with_ymd_and_hms(2026, 7, 27, 9, 0, 0).unwrap();
        let wednesday = Utc.with_ymd_and_hms(2026, 7, 29, 9, 0, 0).unwrap();
        let k1 = quota_key(agent, "search:query", QuotaWindow::SevenDays, monday);
        let k2 = quota_key(agent, "search:query", QuotaWindow::SevenDays, wednesday);
        assert_eq!(k1, k2);
    }
}
