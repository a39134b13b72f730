//! Stage normalization
//!
//! Converts a user-chosen stage descriptor (week/month/trimester plus a
//! numeric value) into the canonical pregnancy week and its derived due
//! date. Pure functions; `today` is injected so results are
//! deterministic for a given date.

use std::str::FromStr;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::FULL_TERM_WEEKS;

/// Average weeks per month used for the month -> week conversion.
///
/// The single canonical constant; applied at every call site.
pub const WEEKS_PER_MONTH: f64 = 4.3;

/// Representative midpoint week for each trimester.
///
/// A fixed lookup table (not a formula) so every call site maps a
/// trimester to the same week.
pub const TRIMESTER_MIDPOINT_WEEKS: [u8; 3] = [8, 20, 33];

/// How the user expressed their pregnancy stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageType {
    Week,
    Month,
    Trimester,
}

impl FromStr for StageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "week" => Ok(StageType::Week),
            "month" => Ok(StageType::Month),
            "trimester" => Ok(StageType::Trimester),
            other => Err(Error::Validation(format!("unknown stage type: {other:?}"))),
        }
    }
}

impl std::fmt::Display for StageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StageType::Week => "week",
            StageType::Month => "month",
            StageType::Trimester => "trimester",
        };
        f.write_str(name)
    }
}

/// Transient user input, consumed by `normalize` and discarded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDescriptor {
    #[serde(alias = "stageType")]
    pub stage_type: StageType,
    #[serde(alias = "stageValue")]
    pub stage_value: String,
}

impl StageDescriptor {
    pub fn new(stage_type: StageType, stage_value: impl Into<String>) -> Self {
        Self {
            stage_type,
            stage_value: stage_value.into(),
        }
    }
}

/// Output of stage normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOutcome {
    /// Canonical week, always within 1-40
    pub current_week: u8,
    /// `today + (40 - current_week)` weeks
    pub due_date: NaiveDate,
}

impl StageOutcome {
    /// Outcome for an already-known week (clamped to range)
    pub fn for_week(week: u8, today: NaiveDate) -> Self {
        let current_week = week.clamp(1, FULL_TERM_WEEKS);
        Self {
            current_week,
            due_date: due_date_for(current_week, today),
        }
    }
}

/// Due date under the fixed 40-week model
pub fn due_date_for(current_week: u8, today: NaiveDate) -> NaiveDate {
    today + Duration::weeks(i64::from(FULL_TERM_WEEKS - current_week.clamp(1, FULL_TERM_WEEKS)))
}

/// Normalize a stage descriptor into the canonical week and due date.
///
/// Out-of-range numeric values clamp; values that do not parse as a
/// number reject with `Error::Validation`.
pub fn normalize(stage: &StageDescriptor, today: NaiveDate) -> Result<StageOutcome> {
    let value = parse_stage_value(&stage.stage_value)?;

    let current_week = match stage.stage_type {
        StageType::Week => (value.round() as i64).clamp(1, i64::from(FULL_TERM_WEEKS)) as u8,
        StageType::Month => {
            let month = value.round().clamp(1.0, 10.0);
            let week = (month * WEEKS_PER_MONTH).round() as i64;
            week.clamp(1, i64::from(FULL_TERM_WEEKS)) as u8
        }
        StageType::Trimester => {
            let trimester = (value.round() as i64).clamp(1, 3) as usize;
            TRIMESTER_MIDPOINT_WEEKS[trimester - 1]
        }
    };

    Ok(StageOutcome {
        current_week,
        due_date: due_date_for(current_week, today),
    })
}

fn parse_stage_value(raw: &str) -> Result<f64> {
    let trimmed = raw.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| Error::Validation(format!("stage value is not a number: {raw:?}")))?;
    if !value.is_finite() {
        return Err(Error::Validation(format!(
            "stage value is not a finite number: {raw:?}"
        )));
    }
    Ok(value)
}
