//! Cadence periods as half-open UTC intervals.
//!
//! - day: UTC midnight to the next midnight
//! - week: ISO week, Monday 00:00Z to the following Monday
//! - month: first of the month to the first of the next month
//! - quarter: first day of Jan/Apr/Jul/Oct to the first day of the next quarter

use crate::error::CoreError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Day,
    Week,
    Month,
    Quarter,
}

impl Cadence {
    pub fn as_str(self) -> &'static str {
        match self {
            Cadence::Day => "day",
            Cadence::Week => "week",
            Cadence::Month => "month",
            Cadence::Quarter => "quarter",
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cadence {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "day" => Ok(Cadence::Day),
            "week" => Ok(Cadence::Week),
            "month" => Ok(Cadence::Month),
            "quarter" => Ok(Cadence::Quarter),
            _ => Err(CoreError::InvalidCadence(format!(
                "unsupported cadence '{raw}', expected day|week|month|quarter"
            ))),
        }
    }
}

/// `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Period {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

pub fn boundaries(cadence: Cadence, at: DateTime<Utc>) -> Period {
    let date = at.date_naive();

    match cadence {
        Cadence::Day => {
            let start = midnight(date);
            Period {
                start,
                end: start + Duration::days(1),
            }
        }
        Cadence::Week => {
            let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
            let start = midnight(monday);
            Period {
                start,
                end: start + Duration::days(7),
            }
        }
        Cadence::Month => {
            let start = first_of_month(date.year(), date.month0());
            Period {
                start,
                end: first_of_month(date.year(), date.month0() + 1),
            }
        }
        Cadence::Quarter => {
            let quarter_month0 = date.month0() / 3 * 3;
            Period {
                start: first_of_month(date.year(), quarter_month0),
                end: first_of_month(date.year(), quarter_month0 + 3),
            }
        }
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

// month0 may run past December; the overflow rolls into the next year.
fn first_of_month(year: i32, month0: u32) -> DateTime<Utc> {
    let year = year + (month0 / 12) as i32;
    let month = month0 % 12 + 1;
    let date = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN);
    midnight(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn day_is_utc_midnight_to_midnight() {
        let period = boundaries(Cadence::Day, utc(2025, 3, 9, 17, 45));
        assert_eq!(period.start, utc(2025, 3, 9, 0, 0));
        assert_eq!(period.end, utc(2025, 3, 10, 0, 0));
    }

    #[test]
    fn week_starts_on_monday() {
        // 2025-01-12 is a Sunday and belongs to the week of Monday 2025-01-06.
        let period = boundaries(Cadence::Week, utc(2025, 1, 12, 23, 0));
        assert_eq!(period.start, utc(2025, 1, 6, 0, 0));
        assert_eq!(period.end, utc(2025, 1, 13, 0, 0));

        let monday = boundaries(Cadence::Week, utc(2025, 1, 13, 0, 0));
        assert_eq!(monday.start, utc(2025, 1, 13, 0, 0));
    }

    #[test]
    fn week_crossing_year_end() {
        let period = boundaries(Cadence::Week, utc(2025, 1, 1, 8, 0));
        assert_eq!(period.start, utc(2024, 12, 30, 0, 0));
        assert_eq!(period.end, utc(2025, 1, 6, 0, 0));
    }

    #[test]
    fn month_width_follows_calendar() {
        let leap = boundaries(Cadence::Month, utc(2024, 2, 29, 12, 0));
        assert_eq!(leap.start, utc(2024, 2, 1, 0, 0));
        assert_eq!(leap.end, utc(2024, 3, 1, 0, 0));
        assert_eq!((leap.end - leap.start).num_days(), 29);

        let december = boundaries(Cadence::Month, utc(2024, 12, 31, 23, 59));
        assert_eq!(december.end, utc(2025, 1, 1, 0, 0));
        assert_eq!((december.end - december.start).num_days(), 31);
    }

    #[test]
    fn quarter_starts_on_quarter_month() {
        let q2 = boundaries(Cadence::Quarter, utc(2025, 5, 20, 0, 0));
        assert_eq!(q2.start, utc(2025, 4, 1, 0, 0));
        assert_eq!(q2.end, utc(2025, 7, 1, 0, 0));

        let q4 = boundaries(Cadence::Quarter, utc(2025, 11, 2, 0, 0));
        assert_eq!(q4.start, utc(2025, 10, 1, 0, 0));
        assert_eq!(q4.end, utc(2026, 1, 1, 0, 0));
    }

    #[test]
    fn every_period_contains_its_reference_instant() {
        let cadences = [Cadence::Day, Cadence::Week, Cadence::Month, Cadence::Quarter];
        let mut at = utc(2023, 12, 25, 0, 0);

        while at < utc(2025, 3, 1, 0, 0) {
            for cadence in cadences {
                let period = boundaries(cadence, at);
                assert!(period.contains(at), "{cadence} at {at}");
                assert!(!period.contains(period.end));

                let days = (period.end - period.start).num_days();
                let expected = match cadence {
                    Cadence::Day => 1..=1,
                    Cadence::Week => 7..=7,
                    Cadence::Month => 28..=31,
                    Cadence::Quarter => 90..=92,
                };
                assert!(expected.contains(&days), "{cadence} width {days}");
            }
            at += Duration::hours(37);
        }
    }

    #[test]
    fn parses_known_cadences_only() {
        assert_eq!("week".parse::<Cadence>().unwrap(), Cadence::Week);
        assert_eq!("quarter".parse::<Cadence>().unwrap(), Cadence::Quarter);
        for raw in ["fortnight", "Week", " day ", ""] {
            assert!(
                matches!(raw.parse::<Cadence>(), Err(CoreError::InvalidCadence(_))),
                "{raw:?} should be rejected"
            );
        }
    }
}
