// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Five-field cron expressions.
//!
//! `minute hour day-of-month month day-of-week` with `*`, `n`, `a-b`,
//! `a,b,c`, `*/k` and `a-b/k` tokens. Day-of-week runs 0-6 with 0 = Sunday.
//! Matching happens in the schedule's timezone; every instant crossing the
//! API boundary is UTC.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;
use thiserror::Error;

/// Search horizon for the next fire time. Four weeks of minutes covers every
/// satisfiable 5-field expression; anything beyond is unsatisfiable
/// (e.g. `0 0 31 2 *`).
const SEARCH_LIMIT_MINUTES: u32 = 4 * 7 * 24 * 60;

/// Errors from cron parsing and evaluation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CronError {
    #[error("expected 5 fields, got {0}")]
    FieldCount(usize),
    #[error("invalid {field} field {value:?}")]
    InvalidField { field: &'static str, value: String },
    #[error("{field} value {value} out of range {min}-{max}")]
    OutOfRange { field: &'static str, value: u32, min: u32, max: u32 },
    #[error("invalid step in {field} field {value:?}")]
    InvalidStep { field: &'static str, value: String },
    #[error("no fire time within four weeks of the start instant")]
    NoUpcomingFire,
}

/// A parsed cron expression: the allowed value set per field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    days: BTreeSet<u32>,
    months: BTreeSet<u32>,
    /// 0 = Sunday … 6 = Saturday.
    weekdays: BTreeSet<u32>,
}

impl CronSchedule {
    /// Parse a 5-field expression.
    pub fn parse(expr: &str) -> Result<CronSchedule, CronError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }
        Ok(CronSchedule {
            minutes: parse_field("minute", fields[0], 0, 59)?,
            hours: parse_field("hour", fields[1], 0, 23)?,
            days: parse_field("day-of-month", fields[2], 1, 31)?,
            months: parse_field("month", fields[3], 1, 12)?,
            weekdays: parse_field("day-of-week", fields[4], 0, 6)?,
        })
    }

    /// Whether `expr` is a well-formed 5-field expression.
    pub fn is_valid(expr: &str) -> bool {
        CronSchedule::parse(expr).is_ok()
    }

    /// Whether the instant (interpreted in `tz`) satisfies all five fields.
    pub fn matches(&self, at: DateTime<Utc>, tz: &Tz) -> bool {
        let local = at.with_timezone(tz);
        self.minutes.contains(&local.minute())
            && self.hours.contains(&local.hour())
            && self.days.contains(&local.day())
            && self.months.contains(&local.month())
            && self.weekdays.contains(&local.weekday().num_days_from_sunday())
    }

    /// Next instant strictly after `after` satisfying the expression.
    ///
    /// Advances minute by minute from the start of the following minute and
    /// gives up past the four-week horizon.
    pub fn next_fire(&self, after: DateTime<Utc>, tz: &Tz) -> Result<DateTime<Utc>, CronError> {
        let mut candidate = floor_to_minute(after) + Duration::minutes(1);
        for _ in 0..SEARCH_LIMIT_MINUTES {
            if self.matches(candidate, tz) {
                return Ok(candidate);
            }
            candidate += Duration::minutes(1);
        }
        Err(CronError::NoUpcomingFire)
    }
}

/// Truncate to the start of the minute.
fn floor_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    let secs = t.timestamp() - t.timestamp().rem_euclid(60);
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or(t)
}

/// Parse one field into its allowed value set.
fn parse_field(
    field: &'static str,
    value: &str,
    min: u32,
    max: u32,
) -> Result<BTreeSet<u32>, CronError> {
    let mut values = BTreeSet::new();
    for part in value.split(',') {
        let (range_part, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s
                    .parse()
                    .map_err(|_| CronError::InvalidStep { field, value: part.to_string() })?;
                if step == 0 {
                    return Err(CronError::InvalidStep { field, value: part.to_string() });
                }
                (r, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range_part == "*" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            (parse_value(field, a, min, max)?, parse_value(field, b, min, max)?)
        } else {
            let v = parse_value(field, range_part, min, max)?;
            (v, v)
        };

        if start > end {
            return Err(CronError::InvalidField { field, value: part.to_string() });
        }
        values.extend((start..=end).step_by(step as usize));
    }
    if values.is_empty() {
        return Err(CronError::InvalidField { field, value: value.to_string() });
    }
    Ok(values)
}

fn parse_value(field: &'static str, s: &str, min: u32, max: u32) -> Result<u32, CronError> {
    let v: u32 = s
        .parse()
        .map_err(|_| CronError::InvalidField { field, value: s.to_string() })?;
    if v < min || v > max {
        return Err(CronError::OutOfRange { field, value: v, min, max });
    }
    Ok(v)
}

#[cfg(test)]
#[path = "cron_tests.rs"]
mod tests;
