use chrono::{Datelike, NaiveDate};
use thiserror::Error;
use tracing::warn;

pub const PROLEPTIC_GREGORIAN: &str = "http://www.wikidata.org/entity/Q1985727";
pub const PROLEPTIC_JULIAN: &str = "http://www.wikidata.org/entity/Q1985786";

/// Wikidata precision code for a date known to the day.
pub const DAY_PRECISION: &str = "11";

const JULIAN_OFFSET_DAYS: i64 = 13;

// 1970-01-01 counted from 0001-01-01 as day one
const UNIX_EPOCH_FROM_CE: i64 = 719_163;

#[derive(Debug, Error, PartialEq)]
pub enum DateError {
    #[error("calendar model {0} is neither proleptic Gregorian nor proleptic Julian")]
    UnsupportedCalendar(String),
}

/// The three fields of a Wikidata `time` datavalue that matter for dating.
#[derive(Debug, Clone, Copy)]
pub struct TimeClaim<'a> {
    pub time: &'a str,
    pub precision: &'a str,
    pub calendar_model: &'a str,
}

/// Days since 1970-01-01 for a day-precision claim, `None` when the claim is
/// coarser than a day or its text cannot be read as a date.
pub fn epoch_day(claim: &TimeClaim<'_>) -> Result<Option<i64>, DateError> {
    if claim.precision != DAY_PRECISION {
        return Ok(None);
    }

    let offset = match claim.calendar_model {
        PROLEPTIC_GREGORIAN => 0,
        PROLEPTIC_JULIAN => JULIAN_OFFSET_DAYS,
        other => return Err(DateError::UnsupportedCalendar(other.to_string())),
    };

    let Some(date) = parse_signed_date(claim.time) else {
        warn!(time = claim.time, "Bad date, ignoring claim");
        return Ok(None);
    };

    Ok(Some(i64::from(date.num_days_from_ce()) - UNIX_EPOCH_FROM_CE + offset))
}

/// `+1815-06-18T00:00:00Z` style text. A leading `-` marks a BCE year, and
/// there is no year zero, so 1 BCE maps to proleptic year 0.
fn parse_signed_date(time: &str) -> Option<NaiveDate> {
    let (bce, rest) = match time.as_bytes().first()? {
        b'+' => (false, &time[1..]),
        b'-' => (true, &time[1..]),
        _ => return None,
    };

    let ymd = rest.split('T').next()?;
    let mut parts = ymd.splitn(3, '-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;

    if year == 0 {
        return None;
    }
    let proleptic = if bce { 1 - year } else { year };
    NaiveDate::from_ymd_opt(proleptic, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim<'a>(time: &'a str, precision: &'a str, calendar_model: &'a str) -> TimeClaim<'a> {
        TimeClaim {
            time,
            precision,
            calendar_model,
        }
    }

    #[test]
    fn gregorian_day() {
        let day = epoch_day(&claim("+1815-06-18T00:00:00Z", "11", PROLEPTIC_GREGORIAN)).unwrap();
        assert_eq!(day, Some(-56445));
    }

    #[test]
    fn epoch_is_zero() {
        let day = epoch_day(&claim("+1970-01-01T00:00:00Z", "11", PROLEPTIC_GREGORIAN)).unwrap();
        assert_eq!(day, Some(0));
    }

    #[test]
    fn julian_is_shifted_by_thirteen_days() {
        let g = epoch_day(&claim("+1815-06-18T00:00:00Z", "11", PROLEPTIC_GREGORIAN))
            .unwrap()
            .unwrap();
        let j = epoch_day(&claim("+1815-06-18T00:00:00Z", "11", PROLEPTIC_JULIAN))
            .unwrap()
            .unwrap();
        assert_eq!(j - g, 13);
    }

    #[test]
    fn coarse_precision_is_not_applicable() {
        for precision in ["9", "10", "7"] {
            let day = epoch_day(&claim("+1815-00-00T00:00:00Z", precision, PROLEPTIC_GREGORIAN));
            assert_eq!(day, Ok(None));
        }
    }

    #[test]
    fn coarse_precision_ignores_calendar() {
        let day = epoch_day(&claim("+1815-00-00T00:00:00Z", "9", "http://example.org/Q1"));
        assert_eq!(day, Ok(None));
    }

    #[test]
    fn unknown_calendar_is_fatal() {
        let err = epoch_day(&claim("+1815-06-18T00:00:00Z", "11", "http://www.wikidata.org/entity/Q12138"));
        assert!(matches!(err, Err(DateError::UnsupportedCalendar(m)) if m.ends_with("Q12138")));
    }

    #[test]
    fn bce_dates() {
        // 44 BCE is proleptic year -43
        let day = epoch_day(&claim("-0044-03-15T00:00:00Z", "11", PROLEPTIC_JULIAN)).unwrap();
        let expected = NaiveDate::from_ymd_opt(-43, 3, 15)
            .unwrap()
            .signed_duration_since(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap())
            .num_days()
            + 13;
        assert_eq!(day, Some(expected));
    }

    #[test]
    fn malformed_text_is_not_applicable() {
        for time in ["1815-06-18", "+18150618", "+1815-13-01T00:00:00Z", "+0000-01-01T00:00:00Z", ""] {
            assert_eq!(epoch_day(&claim(time, "11", PROLEPTIC_GREGORIAN)), Ok(None), "{time}");
        }
    }

    #[test]
    fn long_years_parse() {
        let day = epoch_day(&claim("+00000001815-06-18T00:00:00Z", "11", PROLEPTIC_GREGORIAN)).unwrap();
        assert_eq!(day, Some(-56445));
    }
}
