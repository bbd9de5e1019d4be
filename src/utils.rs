//! Display helpers and start-cursor conversions

use crate::error::{Error, Result};
use crate::record::cursor_from_created;
use chrono::{DateTime, NaiveDate, Utc};
use std::time::Duration;

/// Render a duration as `H:MM:SS`, optionally followed by `,mmm`
///
/// Hours are not wrapped, so long archives read e.g. `27:03:09`.
///
/// # Examples
///
/// ```
/// use shift_archiver::utils::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_millis(3_723_045), false), "1:02:03");
/// assert_eq!(format_duration(Duration::from_millis(3_723_045), true), "1:02:03,045");
/// ```
pub fn format_duration(duration: Duration, show_ms: bool) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs / 60) % 60;
    let seconds = total_secs % 60;

    if show_ms {
        format!(
            "{}:{:02}:{:02},{:03}",
            hours,
            minutes,
            seconds,
            duration.subsec_millis()
        )
    } else {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    }
}

/// Round `value` to `precision` decimal places
pub fn round_to(value: f64, precision: i32) -> f64 {
    let factor = 10f64.powi(precision);
    (value * factor).round() / factor
}

/// Cursor (milliseconds) for an instant
pub fn cursor_from_datetime(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Parse a start cursor from user input
///
/// Accepts an RFC 3339 timestamp (`2021-06-01T12:00:00Z`), a calendar date
/// (`2021-06-01`, midnight UTC) or a raw epoch-seconds value.
///
/// # Errors
/// Returns a configuration error if the input matches none of these forms
pub fn parse_start_cursor(input: &str) -> Result<i64> {
    let input = input.trim();

    if let Ok(at) = DateTime::parse_from_rfc3339(input) {
        return Ok(cursor_from_datetime(at.with_timezone(&Utc)));
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        let midnight = date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        if let Some(at) = midnight {
            return Ok(cursor_from_datetime(at));
        }
    }
    if let Ok(secs) = input.parse::<i64>() {
        return Ok(cursor_from_created(secs));
    }

    Err(Error::config(
        "start",
        format!("'{input}' is not a date, an RFC 3339 timestamp or epoch seconds"),
    ))
}
