//! Filename date templates.
//!
//! Remote providers encode observation dates in file names at fixed
//! byte positions (`rfe2004_02-dk1.tif` and friends). A template maps
//! named date fields to `[start, end)` offsets in the file name; a
//! dekad ordinal field (1/2/3) decodes to day 10/20/last-of-month.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;

use crate::{Result, WalkerError};

/// Byte offsets of the date fields within a file name.
///
/// `year` and `month` are required; all other fields default. Offsets
/// are `[start, end)` byte positions.
#[derive(Debug, Clone, Deserialize)]
pub struct FileDateTemplate {
    pub year: (usize, usize),
    pub month: (usize, usize),
    #[serde(default)]
    pub day: Option<(usize, usize)>,
    /// Dekad ordinal (1, 2 or 3); overrides `day` when present.
    #[serde(default)]
    pub dekad: Option<(usize, usize)>,
    #[serde(default)]
    pub hour: Option<(usize, usize)>,
    #[serde(default)]
    pub minute: Option<(usize, usize)>,
    #[serde(default)]
    pub second: Option<(usize, usize)>,
}

fn template_err(name: &str, reason: impl ToString) -> WalkerError {
    WalkerError::Template {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn field(name: &str, span: (usize, usize), what: &str) -> Result<u32> {
    let (start, end) = span;
    let slice = name
        .get(start..end)
        .ok_or_else(|| template_err(name, format!("{what} offsets {start}..{end} out of range")))?;
    slice
        .parse::<u32>()
        .map_err(|_| template_err(name, format!("{what} field {slice:?} is not a number")))
}

impl FileDateTemplate {
    /// Decode the date (and time, when encoded) from a file name.
    pub fn parse(&self, name: &str) -> Result<NaiveDateTime> {
        let year = field(name, self.year, "year")? as i32;
        let month = field(name, self.month, "month")?;

        let day = match (self.dekad, self.day) {
            (Some(span), _) => {
                let ordinal = field(name, span, "dekad")?;
                calendar::dekad_day(year, month, ordinal)
                    .map_err(|e| template_err(name, e))?
            }
            (None, Some(span)) => field(name, span, "day")?,
            (None, None) => 1,
        };

        let hour = self.hour.map(|s| field(name, s, "hour")).transpose()?.unwrap_or(0);
        let minute = self
            .minute
            .map(|s| field(name, s, "minute"))
            .transpose()?
            .unwrap_or(0);
        let second = self
            .second
            .map(|s| field(name, s, "second"))
            .transpose()?
            .unwrap_or(0);

        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour, minute, second))
            .ok_or_else(|| {
                template_err(
                    name,
                    format!("decoded components {year}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02} form no date"),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(year: i32, month: u32, day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_year_month_day() {
        // TAMSAT-style name: rfe2004_02_10.tif
        let template = FileDateTemplate {
            year: (3, 7),
            month: (8, 10),
            day: Some((11, 13)),
            dekad: None,
            hour: None,
            minute: None,
            second: None,
        };
        assert_eq!(template.parse("rfe2004_02_10.tif").unwrap(), d(2004, 2, 10));
    }

    #[test]
    fn test_dekad_ordinal() {
        // rfe2004_02-dk3.tif: third dekad of a leap February.
        let template = FileDateTemplate {
            year: (3, 7),
            month: (8, 10),
            day: None,
            dekad: Some((13, 14)),
            hour: None,
            minute: None,
            second: None,
        };
        assert_eq!(template.parse("rfe2004_02-dk3.tif").unwrap(), d(2004, 2, 29));
        assert_eq!(template.parse("rfe2004_02-dk1.tif").unwrap(), d(2004, 2, 10));
    }

    #[test]
    fn test_day_defaults_to_first() {
        let template = FileDateTemplate {
            year: (0, 4),
            month: (4, 6),
            day: None,
            dekad: None,
            hour: None,
            minute: None,
            second: None,
        };
        assert_eq!(template.parse("200402_lst.png").unwrap(), d(2004, 2, 1));
    }

    #[test]
    fn test_time_fields() {
        let template = FileDateTemplate {
            year: (0, 4),
            month: (4, 6),
            day: Some((6, 8)),
            dekad: None,
            hour: Some((9, 11)),
            minute: Some((11, 13)),
            second: None,
        };
        let parsed = template.parse("20040210_0630.nc").unwrap();
        assert_eq!(
            parsed,
            NaiveDate::from_ymd_opt(2004, 2, 10)
                .unwrap()
                .and_hms_opt(6, 30, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_rejects_non_matching_names() {
        let template = FileDateTemplate {
            year: (3, 7),
            month: (8, 10),
            day: None,
            dekad: None,
            hour: None,
            minute: None,
            second: None,
        };
        assert!(template.parse("readme.txt").is_err());
        assert!(template.parse("rfexxxx_02.tif").is_err());
    }

    #[test]
    fn test_invalid_dekad_ordinal() {
        let template = FileDateTemplate {
            year: (0, 4),
            month: (4, 6),
            day: None,
            dekad: Some((6, 7)),
            hour: None,
            minute: None,
            second: None,
        };
        assert!(template.parse("2004024.tif").is_err());
    }
}
