// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduled job specifications and execution records.

use crate::cron::CronSchedule;
use crate::spec::{JobSpec, SpecError};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// How many execution records are retained per scheduled job.
pub const EXECUTION_HISTORY_LIMIT: usize = 100;

/// Status of a scheduled job's execution slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    /// Waiting for the next fire time.
    Pending,
    /// An execution is in flight; further fires are skipped.
    Running,
    /// Last execution succeeded.
    Success,
    /// Last execution failed (retries exhausted).
    Failed,
    /// Execution budget exhausted (`max_executions`).
    Disabled,
    /// Schedule is past its end date.
    Expired,
}

crate::simple_display! {
    ScheduleStatus {
        Pending => "pending",
        Running => "running",
        Success => "success",
        Failed => "failed",
        Disabled => "disabled",
        Expired => "expired",
    }
}

impl ScheduleStatus {
    /// Terminal for the schedule as a whole, not just one execution.
    pub fn is_retired(&self) -> bool {
        matches!(self, ScheduleStatus::Disabled | ScheduleStatus::Expired)
    }
}

/// A job specification with a cron schedule attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJobSpec {
    #[serde(flatten)]
    pub job: JobSpec,
    /// Standard 5-field cron expression.
    pub cron_expression: String,
    /// IANA timezone name the expression is evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_executions: Option<u32>,
    #[serde(default = "default_execution_timeout_s")]
    pub execution_timeout_s: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_s")]
    pub retry_delay_s: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_execution_timeout_s() -> u64 {
    3600
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_s() -> u64 {
    300
}

impl ScheduledJobSpec {
    pub fn new(job: JobSpec, cron_expression: impl Into<String>) -> Self {
        Self {
            job,
            cron_expression: cron_expression.into(),
            timezone: default_timezone(),
            max_executions: None,
            execution_timeout_s: default_execution_timeout_s(),
            start_date: None,
            end_date: None,
            max_retries: default_max_retries(),
            retry_delay_s: default_retry_delay_s(),
        }
    }

    crate::setters! {
        into {
            timezone: String,
        }
        set {
            execution_timeout_s: u64,
            max_retries: u32,
            retry_delay_s: u64,
        }
        option {
            max_executions: u32,
            start_date: DateTime<Utc>,
            end_date: DateTime<Utc>,
        }
    }

    /// Validate the embedded spec plus the scheduling fields.
    pub fn validate(&self) -> Result<(), SpecError> {
        self.job.validate()?;
        CronSchedule::parse(&self.cron_expression).map_err(|e| {
            SpecError::InvalidCron(self.job.job_id.clone(), e.to_string())
        })?;
        self.tz()?;
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err(SpecError::InvertedDates(self.job.job_id.clone()));
            }
        }
        Ok(())
    }

    /// Resolve the IANA timezone name.
    pub fn tz(&self) -> Result<Tz, SpecError> {
        self.timezone.parse::<Tz>().map_err(|_| {
            SpecError::UnknownTimezone(self.job.job_id.clone(), self.timezone.clone())
        })
    }
}

/// Record of one scheduled execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub job_id: String,
    /// The fire time this execution answers.
    pub scheduled_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: ScheduleStatus,
    pub attempt_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

impl ExecutionRecord {
    pub fn pending(
        execution_id: impl Into<String>,
        job_id: impl Into<String>,
        scheduled_time: DateTime<Utc>,
        attempt_number: u32,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            job_id: job_id.into(),
            scheduled_time,
            actual_start_time: None,
            end_time: None,
            status: ScheduleStatus::Pending,
            attempt_number,
            error_message: None,
            duration_ms: 0,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, ScheduleStatus::Success | ScheduleStatus::Failed)
    }
}

#[cfg(test)]
#[path = "schedule_tests.rs"]
mod tests;
