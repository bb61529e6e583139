//! C1 — Clock & Calendar.
//!
//! Canonical "now", the trading-day list for a run, and trading-session
//! boundaries that schedule points are clamped into.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A `[open, close)` trading session on every trading day, expressed as
/// wall times (`"HH:MM:SS"` in configuration, parsed once here).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Session {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl Session {
    pub fn parse(open: &str, close: &str) -> anyhow::Result<Self> {
        Ok(Session {
            open: NaiveTime::parse_from_str(open, "%H:%M:%S")?,
            close: NaiveTime::parse_from_str(close, "%H:%M:%S")?,
        })
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        t >= self.open && t <= self.close
    }
}

/// Ordered list of trading days plus the intraday session boundaries that
/// apply uniformly across them. The day list comes from the data provider's
/// `trading_calendar` contract (§6.1); QTrader never computes it itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calendar {
    days: Vec<NaiveDate>,
    sessions: Vec<Session>,
}

impl Calendar {
    pub fn new(days: Vec<NaiveDate>, sessions: Vec<Session>) -> Self {
        let mut days = days;
        days.sort();
        days.dedup();
        Calendar { days, sessions }
    }

    pub fn days(&self) -> &[NaiveDate] {
        &self.days
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        self.days.binary_search(&date).is_ok()
    }

    /// The trading day strictly after `date`, if any.
    pub fn next_day(&self, date: NaiveDate) -> Option<NaiveDate> {
        let idx = self.days.partition_point(|&d| d <= date);
        self.days.get(idx).copied()
    }

    /// Every trading day in `[date, ..)` up to (not including) `until`.
    pub fn missed_days(&self, after: NaiveDate, until: NaiveDate) -> Vec<NaiveDate> {
        self.days
            .iter()
            .filter(|&&d| d > after && d < until)
            .copied()
            .collect()
    }

    /// Whether `t` falls within any declared trading session for the day.
    pub fn within_session(&self, t: NaiveTime) -> bool {
        self.sessions.is_empty() || self.sessions.iter().any(|s| s.contains(t))
    }

    pub fn datetime_at(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        Utc.from_utc_datetime(&date.and_time(time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn missed_days_excludes_weekend_when_not_in_calendar() {
        let cal = Calendar::new(
            vec![date("2026-01-02"), date("2026-01-05"), date("2026-01-06")],
            vec![],
        );
        let missed = cal.missed_days(date("2026-01-02"), date("2026-01-06"));
        assert_eq!(missed, vec![date("2026-01-05")]);
    }

    #[test]
    fn session_contains_boundaries() {
        let session = Session::parse("09:15:00", "15:30:00").unwrap();
        assert!(session.contains(NaiveTime::parse_from_str("09:15:00", "%H:%M:%S").unwrap()));
        assert!(session.contains(NaiveTime::parse_from_str("15:30:00", "%H:%M:%S").unwrap()));
        assert!(!session.contains(NaiveTime::parse_from_str("09:14:59", "%H:%M:%S").unwrap()));
    }
}
