//! Period calendar for the canonical temporal resolutions.
//!
//! All persisted observations are keyed by the *end date* of their
//! containing period. Day, week and month are regular; the dekad is the
//! irregular one: three periods per month ending on day 10, day 20 and
//! the last calendar day of the month.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by calendar arithmetic.
#[derive(Error, Debug)]
pub enum CalendarError {
    /// Unrecognized temporal resolution name.
    #[error("unknown temporal resolution: {0}")]
    UnknownResolution(String),

    /// Dekad ordinals are 1, 2 or 3.
    #[error("invalid dekad ordinal: {0}")]
    InvalidDekadOrdinal(u32),
}

/// Result type for calendar operations.
pub type Result<T> = std::result::Result<T, CalendarError>;

/// The canonical temporal resolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalResolution {
    Day,
    Week,
    Dekad,
    Month,
}

impl TemporalResolution {
    /// Short lowercase name, used in store directory names.
    pub fn as_str(&self) -> &'static str {
        match self {
            TemporalResolution::Day => "day",
            TemporalResolution::Week => "week",
            TemporalResolution::Dekad => "dekad",
            TemporalResolution::Month => "month",
        }
    }
}

impl fmt::Display for TemporalResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemporalResolution {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "day" | "daily" | "1" => Ok(TemporalResolution::Day),
            "week" | "weekly" | "7" => Ok(TemporalResolution::Week),
            "dekad" | "dekadal" | "decadal" | "decade" => Ok(TemporalResolution::Dekad),
            "month" | "monthly" => Ok(TemporalResolution::Month),
            other => Err(CalendarError::UnknownResolution(other.to_string())),
        }
    }
}

/// Last calendar day of a month, leap years included.
pub fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    // The first of the following month always exists for a valid month.
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(31)
}

/// Day of month a dekad ordinal ends on: 1 -> 10, 2 -> 20, 3 -> last day.
///
/// Remote filename conventions often encode the dekad as an ordinal
/// instead of a day of month; this is the decoding used by the filename
/// date template.
pub fn dekad_day(year: i32, month: u32, ordinal: u32) -> Result<u32> {
    match ordinal {
        1 => Ok(10),
        2 => Ok(20),
        3 => Ok(last_day_of_month(year, month)),
        other => Err(CalendarError::InvalidDekadOrdinal(other)),
    }
}

/// Snaps an arbitrary date forward to the end of its containing period.
pub fn containing_period_end(resolution: TemporalResolution, date: NaiveDate) -> NaiveDate {
    match resolution {
        TemporalResolution::Day => date,
        TemporalResolution::Week => {
            // Weeks end on Sunday.
            let offset = 6 - date.weekday().num_days_from_monday() as i64;
            date + Duration::days(offset)
        }
        TemporalResolution::Dekad => {
            let day = if date.day() <= 10 {
                10
            } else if date.day() <= 20 {
                20
            } else {
                last_day_of_month(date.year(), date.month())
            };
            date.with_day(day).unwrap_or(date)
        }
        TemporalResolution::Month => {
            let day = last_day_of_month(date.year(), date.month());
            date.with_day(day).unwrap_or(date)
        }
    }
}

/// Start and end date of the period containing `date`.
///
/// The start is one day after the previous period's end; for day
/// resolution start and end coincide.
pub fn period_bounds(
    resolution: TemporalResolution,
    date: NaiveDate,
) -> (NaiveDate, NaiveDate) {
    let end = containing_period_end(resolution, date);
    let start = match resolution {
        TemporalResolution::Day => end,
        TemporalResolution::Week => end - Duration::days(6),
        TemporalResolution::Dekad => {
            if end.day() > 20 {
                // Third dekad runs from the 21st to the last day.
                end.with_day(21).unwrap_or(end)
            } else {
                end - Duration::days(9)
            }
        }
        TemporalResolution::Month => end.with_day(1).unwrap_or(end),
    };
    (start, end)
}

/// All period end dates whose period overlaps `[begin, end]`, ascending.
///
/// A partial first or last month contributes only the sub-periods that
/// actually overlap the range: a range lying entirely before the 11th of
/// one month yields exactly one dekad (day 10). Returns an empty
/// sequence when `begin > end`.
pub fn periods_between(
    resolution: TemporalResolution,
    begin: NaiveDate,
    end: NaiveDate,
) -> Vec<NaiveDate> {
    if begin > end {
        return Vec::new();
    }

    let mut steps = Vec::new();
    let mut current = containing_period_end(resolution, begin);
    let stop = containing_period_end(resolution, end);

    while current <= stop {
        steps.push(current);
        current = containing_period_end(resolution, current + Duration::days(1));
    }

    steps
}

/// True when `date` is a canonical step of the given resolution.
pub fn is_period_end(resolution: TemporalResolution, date: NaiveDate) -> bool {
    containing_period_end(resolution, date) == date
}
