//! The recognized sampling intervals.
//!
//! Minute/hour/day/week intervals advance by a fixed duration; monthly
//! intervals advance by calendar months so that gap detection lines up with
//! month boundaries instead of drifting by 30-day steps.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, Months, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Interval {
    OneMinute,
    TwoMinutes,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    NinetyMinutes,
    OneDay,
    FiveDays,
    OneWeek,
    OneMonth,
    ThreeMonths,
}

impl Interval {
    pub const ALL: [Interval; 12] = [
        Interval::OneMinute,
        Interval::TwoMinutes,
        Interval::FiveMinutes,
        Interval::FifteenMinutes,
        Interval::ThirtyMinutes,
        Interval::OneHour,
        Interval::NinetyMinutes,
        Interval::OneDay,
        Interval::FiveDays,
        Interval::OneWeek,
        Interval::OneMonth,
        Interval::ThreeMonths,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::TwoMinutes => "2m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::OneHour => "1h",
            Interval::NinetyMinutes => "90m",
            Interval::OneDay => "1d",
            Interval::FiveDays => "5d",
            Interval::OneWeek => "1wk",
            Interval::OneMonth => "1mo",
            Interval::ThreeMonths => "3mo",
        }
    }

    /// Fixed step length, or `None` for calendar-month intervals.
    pub fn fixed_step(self) -> Option<Duration> {
        match self {
            Interval::OneMinute => Some(Duration::minutes(1)),
            Interval::TwoMinutes => Some(Duration::minutes(2)),
            Interval::FiveMinutes => Some(Duration::minutes(5)),
            Interval::FifteenMinutes => Some(Duration::minutes(15)),
            Interval::ThirtyMinutes => Some(Duration::minutes(30)),
            Interval::OneHour => Some(Duration::hours(1)),
            Interval::NinetyMinutes => Some(Duration::minutes(90)),
            Interval::OneDay => Some(Duration::days(1)),
            Interval::FiveDays => Some(Duration::days(5)),
            Interval::OneWeek => Some(Duration::weeks(1)),
            Interval::OneMonth | Interval::ThreeMonths => None,
        }
    }

    /// The timestamp `steps` intervals after `anchor`, or `None` on overflow.
    ///
    /// Monthly steps are always counted from `anchor`, so a month-end anchor
    /// stays on month ends (Jan 31, Feb 29, Mar 31) instead of drifting to
    /// the shortest month's day.
    pub fn step_from(self, anchor: NaiveDateTime, steps: u32) -> Option<NaiveDateTime> {
        match self {
            Interval::OneMonth => anchor.checked_add_months(Months::new(steps)),
            Interval::ThreeMonths => {
                anchor.checked_add_months(Months::new(steps.checked_mul(3)?))
            }
            fixed => {
                let step = fixed.fixed_step()?.checked_mul(i32::try_from(steps).ok()?)?;
                anchor.checked_add_signed(step)
            }
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1m" => Ok(Interval::OneMinute),
            "2m" => Ok(Interval::TwoMinutes),
            "5m" => Ok(Interval::FiveMinutes),
            "15m" => Ok(Interval::FifteenMinutes),
            "30m" => Ok(Interval::ThirtyMinutes),
            "1h" | "60m" => Ok(Interval::OneHour),
            "90m" => Ok(Interval::NinetyMinutes),
            "1d" => Ok(Interval::OneDay),
            "5d" => Ok(Interval::FiveDays),
            "1wk" => Ok(Interval::OneWeek),
            "1mo" => Ok(Interval::OneMonth),
            "3mo" => Ok(Interval::ThreeMonths),
            other => Err(ValidationError::UnknownInterval(other.to_string())),
        }
    }
}

impl TryFrom<String> for Interval {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(value: Interval) -> Self {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn parse_round_trips_canonical_names() {
        for interval in Interval::ALL {
            assert_eq!(interval.as_str().parse::<Interval>().unwrap(), interval);
        }
    }

    #[test]
    fn sixty_minutes_is_an_alias_for_one_hour() {
        assert_eq!("60m".parse::<Interval>().unwrap(), Interval::OneHour);
        assert_eq!(Interval::OneHour.to_string(), "1h");
    }

    #[test]
    fn unknown_interval_is_rejected() {
        let err = "invalid".parse::<Interval>().unwrap_err();
        assert_eq!(err, ValidationError::UnknownInterval("invalid".into()));
        assert!("1D".parse::<Interval>().is_err());
        assert!("".parse::<Interval>().is_err());
    }

    #[test]
    fn fixed_intervals_step_by_duration() {
        let start = at(2024, 1, 1);
        assert_eq!(
            Interval::FifteenMinutes.step_from(start, 1).unwrap(),
            start + Duration::minutes(15)
        );
        assert_eq!(Interval::OneDay.step_from(start, 1).unwrap(), at(2024, 1, 2));
        assert_eq!(Interval::OneWeek.step_from(start, 1).unwrap(), at(2024, 1, 8));
    }

    #[test]
    fn monthly_intervals_follow_the_calendar() {
        assert_eq!(Interval::OneMonth.step_from(at(2024, 1, 31), 1).unwrap(), at(2024, 2, 29));
        assert_eq!(Interval::ThreeMonths.step_from(at(2024, 1, 1), 1).unwrap(), at(2024, 4, 1));
        assert!(Interval::OneMonth.fixed_step().is_none());
    }

    #[test]
    fn monthly_steps_count_from_the_anchor() {
        let anchor = at(2024, 1, 31);
        assert_eq!(Interval::OneMonth.step_from(anchor, 2).unwrap(), at(2024, 3, 31));
        assert_eq!(Interval::ThreeMonths.step_from(anchor, 1).unwrap(), at(2024, 4, 30));
        assert_eq!(Interval::OneDay.step_from(anchor, 0).unwrap(), anchor);
        assert_eq!(Interval::OneWeek.step_from(anchor, 2).unwrap(), at(2024, 2, 14));
    }

    #[test]
    fn serde_uses_the_short_names() {
        let json = serde_json::to_string(&Interval::OneWeek).unwrap();
        assert_eq!(json, "\"1wk\"");
        let back: Interval = serde_json::from_str("\"5m\"").unwrap();
        assert_eq!(back, Interval::FiveMinutes);
        assert!(serde_json::from_str::<Interval>("\"7m\"").is_err());
    }
}
