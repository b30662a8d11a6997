use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

/// Expected market impact of a scheduled release.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Impact {
    Low,
    Medium,
    High,
}

/// A scheduled economic release, read from an external calendar.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct NewsEvent {
    pub time: DateTime<Utc>,
    pub currency: String,
    pub title: String,
    pub impact: Impact,
}

/// Read-only, time-sorted view over news events.
#[derive(Debug, Clone, Default)]
pub struct NewsCalendar {
    events: Arc<[NewsEvent]>,
}

impl NewsCalendar {
    /// Builds a calendar; events are sorted by time, keeping input order for ties.
    pub fn new(mut events: Vec<NewsEvent>) -> Self {
        events.sort_by_key(|e| e.time);
        Self { events: events.into() }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NewsEvent> {
        self.events.iter()
    }

    /// Events with `from <= time < to`.
    pub fn between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> &[NewsEvent] {
        let start = self.events.partition_point(|e| e.time < from);
        let end = self.events.partition_point(|e| e.time < to);
        &self.events[start..end.max(start)]
    }

    /// Returns `true` if an event of at least `min_impact` is within `window` of `time`.
    pub fn is_blackout(&self, time: DateTime<Utc>, window: Duration, min_impact: Impact) -> bool {
        self.between(time - window, time + window + Duration::nanoseconds(1))
            .iter()
            .any(|e| e.impact >= min_impact)
    }
}

/// News-aware entry filter a strategy can consult before submitting orders.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewsFilter {
    pub min_impact: Impact,
    pub window_minutes: i64,
}

impl NewsFilter {
    /// Returns `true` if trading should pause at `time`.
    pub fn blocks(&self, calendar: &NewsCalendar, time: DateTime<Utc>) -> bool {
        calendar.is_blackout(time, Duration::minutes(self.window_minutes), self.min_impact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(minute: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::minutes(minute)
    }

    fn event(minute: i64, impact: Impact) -> NewsEvent {
        NewsEvent {
            time: at(minute),
            currency: "USD".into(),
            title: format!("release {minute}"),
            impact,
        }
    }

    fn calendar() -> NewsCalendar {
        NewsCalendar::new(vec![
            event(30, Impact::High),
            event(0, Impact::Low),
            event(15, Impact::Medium),
        ])
    }

    #[test]
    fn sorted_on_construction() {
        let cal = calendar();
        let minutes: Vec<_> = cal.iter().map(|e| e.title.clone()).collect();
        assert_eq!(minutes, vec!["release 0", "release 15", "release 30"]);
    }

    #[test]
    fn between_is_half_open() {
        let cal = calendar();
        assert_eq!(cal.between(at(0), at(15)).len(), 1);
        assert_eq!(cal.between(at(0), at(16)).len(), 2);
        assert!(cal.between(at(31), at(60)).is_empty());
        assert!(cal.between(at(60), at(0)).is_empty());
    }

    #[test]
    fn blackout_respects_impact() {
        let cal = calendar();
        let filter = NewsFilter {
            min_impact: Impact::High,
            window_minutes: 5,
        };
        assert!(filter.blocks(&cal, at(25)));
        assert!(filter.blocks(&cal, at(35)));
        assert!(!filter.blocks(&cal, at(36)));
        assert!(!filter.blocks(&cal, at(15)));
    }
}
