//! Business-hours severity
//!
//! Incidents opened during business hours (Monday–Friday, inside the
//! configured window, bounds inclusive) get the business-hours
//! urgency/impact pair; everything else gets the after-hours pair.
//! Evaluated once per run at startup.

use chrono::{Datelike, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum SeverityError {
    #[error("invalid business-hours time {value:?} (expected HH:MM:SS): {source}")]
    InvalidTime {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Urgency/impact pair sent with an incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Severity {
    pub urgency: String,
    pub impact: String,
}

impl Severity {
    pub fn new(urgency: impl Into<String>, impact: impl Into<String>) -> Self {
        Self {
            urgency: urgency.into(),
            impact: impact.into(),
        }
    }
}

/// The configured business-hours window and the two severity pairs.
#[derive(Debug, Clone)]
pub struct BusinessHours {
    start: NaiveTime,
    end: NaiveTime,
    business: Severity,
    after_hours: Severity,
}

impl BusinessHours {
    pub fn new(start: NaiveTime, end: NaiveTime, business: Severity, after_hours: Severity) -> Self {
        Self {
            start,
            end,
            business,
            after_hours,
        }
    }

    /// Build from `HH:MM:SS` strings as they appear in configuration.
    pub fn parse(
        start: &str,
        end: &str,
        business: Severity,
        after_hours: Severity,
    ) -> Result<Self, SeverityError> {
        Ok(Self::new(parse_time(start)?, parse_time(end)?, business, after_hours))
    }

    pub fn is_business_hours(&self, at: NaiveDateTime) -> bool {
        let weekday = at.weekday().num_days_from_monday();
        let time = at.time();
        weekday < 5 && self.start <= time && time <= self.end
    }

    pub fn severity_at(&self, at: NaiveDateTime) -> Severity {
        if self.is_business_hours(at) {
            self.business.clone()
        } else {
            self.after_hours.clone()
        }
    }
}

fn parse_time(value: &str) -> Result<NaiveTime, SeverityError> {
    NaiveTime::parse_from_str(value.trim(), TIME_FORMAT).map_err(|source| {
        SeverityError::InvalidTime {
            value: value.to_string(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn hours() -> BusinessHours {
        BusinessHours::parse(
            "08:00:00",
            "17:00:00",
            Severity::new("2", "2"),
            Severity::new("3", "4"),
        )
        .unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn test_weekday_inside_window_is_business() {
        // 2026-10-14 is a Wednesday
        let severity = hours().severity_at(at(2026, 10, 14, 10, 30, 0));
        assert_eq!(severity, Severity::new("2", "2"));
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let bh = hours();
        assert!(bh.is_business_hours(at(2026, 10, 14, 8, 0, 0)));
        assert!(bh.is_business_hours(at(2026, 10, 14, 17, 0, 0)));
        assert!(!bh.is_business_hours(at(2026, 10, 14, 17, 0, 1)));
        assert!(!bh.is_business_hours(at(2026, 10, 14, 7, 59, 59)));
    }

    #[test]
    fn test_weekend_is_after_hours() {
        // 2026-10-17 is a Saturday, 2026-10-18 a Sunday
        let bh = hours();
        assert!(!bh.is_business_hours(at(2026, 10, 17, 10, 0, 0)));
        assert_eq!(
            bh.severity_at(at(2026, 10, 18, 12, 0, 0)),
            Severity::new("3", "4")
        );
    }

    #[test]
    fn test_after_hours_uses_after_hours_impact() {
        let severity = hours().severity_at(at(2026, 10, 14, 22, 0, 0));
        assert_eq!(severity.impact, "4");
        assert_eq!(severity.urgency, "3");
    }

    #[test]
    fn test_invalid_time_is_rejected() {
        let err = BusinessHours::parse(
            "8am",
            "17:00:00",
            Severity::new("1", "1"),
            Severity::new("1", "1"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("8am"));
    }
}
