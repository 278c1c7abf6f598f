//! Parsing and formatting of duration literals and schedule summaries.
//!
//! The duration grammar is shared by the editor (outgoing `every` schedules)
//! and the display layer, so both sides agree on what `"1.5h"` means.

use chrono::{Local, TimeZone};

use cronview_protocol::CronSchedule;

use crate::error::{Error, Result};

const MS_PER_SECOND: u64 = 1_000;
const MS_PER_MINUTE: u64 = 60_000;
const MS_PER_HOUR: u64 = 3_600_000;
const MS_PER_DAY: u64 = 86_400_000;

/// Parse a human-friendly duration string into milliseconds.
///
/// Grammar: `<number><unit>` where number is `\d+(\.\d+)?` and unit is one of
/// `ms`, `s`, `m`, `h`, `d` (case-insensitive, surrounding whitespace
/// ignored). The result is `floor(number × unit_factor)`.
pub fn parse_duration_ms(input: &str) -> Result<u64> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::validation("empty duration string"));
    }

    let split = input
        .find(|c: char| c.is_ascii_alphabetic())
        .ok_or_else(|| {
            Error::validation(format!("duration missing unit suffix (ms/s/m/h/d): {input}"))
        })?;
    let (num_str, suffix) = input.split_at(split);

    if !is_decimal_literal(num_str) {
        return Err(Error::validation(format!(
            "invalid number in duration: {num_str}"
        )));
    }
    let value: f64 = num_str
        .parse()
        .map_err(|_| Error::validation(format!("invalid number in duration: {num_str}")))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(Error::validation("duration must be > 0"));
    }

    let factor = match suffix.to_ascii_lowercase().as_str() {
        "ms" => 1,
        "s" => MS_PER_SECOND,
        "m" => MS_PER_MINUTE,
        "h" => MS_PER_HOUR,
        "d" => MS_PER_DAY,
        other => {
            return Err(Error::validation(format!(
                "unknown duration suffix: {other} (expected ms/s/m/h/d)"
            )));
        },
    };

    Ok((value * factor as f64).floor() as u64)
}

/// `\d+(\.\d+)?`: digits, optionally one dot with digits on both sides.
fn is_decimal_literal(s: &str) -> bool {
    match s.split_once('.') {
        None => !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()),
        Some((int, frac)) => {
            !int.is_empty()
                && !frac.is_empty()
                && int.bytes().all(|b| b.is_ascii_digit())
                && frac.bytes().all(|b| b.is_ascii_digit())
        },
    }
}

/// Format a millisecond count as a short human string (`500ms`, `2s`, `2m`,
/// `2h`, `2d`). Each tier rounds to the nearest integer, half away from zero.
#[must_use]
pub fn format_duration_ms(ms: u64) -> String {
    if ms < MS_PER_SECOND {
        format!("{ms}ms")
    } else if ms < MS_PER_MINUTE {
        format!("{}s", div_round(ms, MS_PER_SECOND))
    } else if ms < MS_PER_HOUR {
        format!("{}m", div_round(ms, MS_PER_MINUTE))
    } else if ms < 48 * MS_PER_HOUR {
        format!("{}h", div_round(ms, MS_PER_HOUR))
    } else {
        format!("{}d", div_round(ms, MS_PER_DAY))
    }
}

fn div_round(n: u64, d: u64) -> u64 {
    (n + d / 2) / d
}

/// One-line display summary of a schedule. Anchors are not rendered; cron
/// expressions are shown verbatim with an optional timezone suffix.
#[must_use]
pub fn schedule_summary(schedule: &CronSchedule) -> String {
    match schedule {
        CronSchedule::At { at_ms } => i64::try_from(*at_ms)
            .ok()
            .and_then(|ms| Local.timestamp_millis_opt(ms).single())
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| format!("at {at_ms}")),
        CronSchedule::Every { every_ms, .. } => {
            format!("every {}", format_duration_ms(*every_ms))
        },
        CronSchedule::Cron { expr, tz } => match tz {
            Some(tz) => format!("cron {expr} ({tz})"),
            None => format!("cron {expr}"),
        },
    }
}
