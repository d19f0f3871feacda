//! Job schedules and due-time evaluation

use crate::{JobError, Result};
use chrono::{DateTime, Duration, Months, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How often a job fires on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Never auto-fires; only runs when triggered by a caller
    Manual,
    Daily,
    Weekly,
    /// One calendar month, clamped to the last day of shorter months
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Manual => "manual",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }

    /// Next due time after a run at `last_run`. `None` for manual jobs.
    pub fn next_due(&self, last_run: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Frequency::Manual => None,
            Frequency::Daily => last_run.checked_add_signed(Duration::days(1)),
            Frequency::Weekly => last_run.checked_add_signed(Duration::days(7)),
            Frequency::Monthly => last_run.checked_add_months(Months::new(1)),
        }
    }
}

impl FromStr for Frequency {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(Frequency::Manual),
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            _ => Err(JobError::InvalidFrequency(s.to_string())),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted schedule row for one job name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSchedule {
    pub name: String,
    pub frequency: Frequency,
    pub enabled: bool,
    /// Unix seconds at which the last run finished
    pub last_run_time: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl JobSchedule {
    pub fn new(name: impl Into<String>, frequency: Frequency, now: i64) -> Self {
        Self {
            name: name.into(),
            frequency,
            enabled: true,
            last_run_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Due when enabled, not manual, and either never run or past its period.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled || self.frequency == Frequency::Manual {
            return false;
        }

        let Some(last_run) = self.last_run_time else {
            return true;
        };

        match Utc.timestamp_opt(last_run, 0).single() {
            Some(last_run) => self
                .frequency
                .next_due(last_run)
                .is_some_and(|due| now >= due),
            // Unrepresentable timestamp: treat as never run
            None => true,
        }
    }
}
