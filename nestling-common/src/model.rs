//! Pregnancy data model and wire-boundary types
//!
//! The canonical model lives here; wire structs accept both the
//! snake_case and camelCase shapes the backend has been observed to
//! emit and are converted to the canonical shape immediately at the
//! collaborator boundary. Neither shape leaks past this module.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stage::StageOutcome;
use crate::time;

/// Full term of the fixed pregnancy model, in weeks
pub const FULL_TERM_WEEKS: u8 = 40;

/// The single pregnancy record for a session.
///
/// `current_week` is the canonical progression unit (1-40); month and
/// trimester representations are derived from it, never stored.
/// `due_date` is always `today + (40 - current_week)` weeks as of the
/// moment `current_week` was last set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PregnancyRecord {
    /// Record identifier
    pub id: Uuid,
    /// Canonical pregnancy week, 1-40 inclusive
    pub current_week: u8,
    /// Derived due date, consistent with current_week
    pub due_date: NaiveDate,
    /// When the record was created (server or local clock)
    pub created_at: DateTime<Utc>,
    /// When current_week was last changed
    pub updated_at: DateTime<Utc>,
}

impl PregnancyRecord {
    /// Build a fresh record from a normalized stage outcome.
    ///
    /// Used on the local fallback path when the backend is unreachable.
    pub fn from_outcome(outcome: &StageOutcome, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            current_week: outcome.current_week,
            due_date: outcome.due_date,
            created_at: now,
            updated_at: now,
        }
    }

    /// Default record shown when neither cache nor server has data
    pub fn default_record() -> Self {
        let now = time::now();
        let outcome = StageOutcome::for_week(1, now.date_naive());
        Self::from_outcome(&outcome, now)
    }
}

/// Where a cached record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Adopted from an authoritative backend response
    Server,
    /// Computed locally from user input, pending server confirmation
    UserSpecified,
}

/// Client-side overlay around a pregnancy record.
///
/// A `UserSpecified` entry whose `local_timestamp` is strictly newer
/// than a server record's `updated_at` must win reconciliation until
/// the server catches up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPregnancyRecord {
    pub record: PregnancyRecord,
    pub provenance: Provenance,
    /// Local clock time when this entry was written
    pub local_timestamp: DateTime<Utc>,
}

impl CachedPregnancyRecord {
    /// Whether this entry outranks a server record with the given
    /// `updated_at` under the user-intent precedence rule.
    pub fn outranks(&self, server_updated_at: DateTime<Utc>) -> bool {
        self.provenance == Provenance::UserSpecified && self.local_timestamp > server_updated_at
    }
}

/// Per-week narrative content from the external content generator.
///
/// Cached per `(week, language)`; the language is part of the cache key
/// so a language switch can never serve stale-language content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevelopmentSnapshot {
    pub week: u8,
    pub language: String,
    /// e.g. "your baby is the size of a mango"
    pub size_comparison: String,
    /// Narrative description of this week's development
    pub narrative: String,
    /// Short actionable tips for the week
    pub tips: Vec<String>,
}

/// Canonical result of the combined stage-update endpoint
#[derive(Debug, Clone)]
pub struct StageUpdate {
    pub pregnancy: PregnancyRecord,
    pub development: Option<DevelopmentSnapshot>,
}

// ========================================
// Wire types (collaborator boundary only)
// ========================================

/// Pregnancy record as the backend sends it; tolerates both casings
#[derive(Debug, Clone, Deserialize)]
pub struct PregnancyWire {
    pub id: Option<Uuid>,
    #[serde(alias = "currentWeek")]
    pub current_week: u8,
    #[serde(alias = "dueDate")]
    pub due_date: Option<NaiveDate>,
    #[serde(alias = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(alias = "updatedAt")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<PregnancyWire> for PregnancyRecord {
    fn from(wire: PregnancyWire) -> Self {
        let now = time::now();
        let week = wire.current_week.clamp(1, FULL_TERM_WEEKS);
        // A due date inconsistent with current_week is recomputed rather
        // than trusted; the 40-week invariant holds on every path.
        let due_date = wire
            .due_date
            .unwrap_or_else(|| StageOutcome::for_week(week, now.date_naive()).due_date);
        Self {
            id: wire.id.unwrap_or_else(Uuid::new_v4),
            current_week: week,
            due_date,
            created_at: wire.created_at.unwrap_or(now),
            updated_at: wire.updated_at.unwrap_or(now),
        }
    }
}

/// Development snapshot as the backend sends it
#[derive(Debug, Clone, Deserialize)]
pub struct DevelopmentWire {
    pub week: u8,
    #[serde(alias = "lang", default = "default_language")]
    pub language: String,
    #[serde(alias = "sizeComparison", default)]
    pub size_comparison: String,
    #[serde(alias = "description", default)]
    pub narrative: String,
    #[serde(default)]
    pub tips: Vec<String>,
}

fn default_language() -> String {
    "en".to_string()
}

impl From<DevelopmentWire> for DevelopmentSnapshot {
    fn from(wire: DevelopmentWire) -> Self {
        Self {
            week: wire.week.clamp(1, FULL_TERM_WEEKS),
            language: wire.language,
            size_comparison: wire.size_comparison,
            narrative: wire.narrative,
            tips: wire.tips,
        }
    }
}

/// Combined response of POST /stage-update-with-development
#[derive(Debug, Clone, Deserialize)]
pub struct StageUpdateWire {
    #[serde(alias = "pregnancyData", alias = "pregnancy_data")]
    pub pregnancy: PregnancyWire,
    #[serde(alias = "babyDevelopment", alias = "baby_development", default)]
    pub development: Option<DevelopmentWire>,
}

impl From<StageUpdateWire> for StageUpdate {
    fn from(wire: StageUpdateWire) -> Self {
        Self {
            pregnancy: wire.pregnancy.into(),
            development: wire.development.map(Into::into),
        }
    }
}
