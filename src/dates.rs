use crate::error::Error;
use chrono::{Days, NaiveDate};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
const DEFAULT_WINDOW_DAYS: u64 = 30;

/// Inclusive reporting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Resolves the reporting window for a run.
///
/// Explicit dates are used only when both are present and non-empty; anything
/// else falls back to the trailing 30 days ending on `today`. The order of
/// explicit dates is not checked here.
pub fn resolve(
    start: Option<&str>,
    end: Option<&str>,
    today: NaiveDate,
) -> Result<DateRange, Error> {
    match (non_empty(start), non_empty(end)) {
        (Some(start), Some(end)) => Ok(DateRange {
            start: parse_date(start)?,
            end: parse_date(end)?,
        }),
        _ => Ok(DateRange {
            start: today - Days::new(DEFAULT_WINDOW_DAYS),
            end: today,
        }),
    }
}

pub fn parse_date(date: &str) -> Result<NaiveDate, Error> {
    NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|_| Error::InvalidDateFormat {
        date: date.to_string(),
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
