//! Sync event types
//!
//! Events are fanned out in-process by the sync bus and serialized into
//! the cross-tab broadcast marker, so every open view converges on the
//! same pregnancy record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{PregnancyRecord, Provenance};

/// Events published on the sync bus
///
/// Handlers may observe the same logical update twice (once via the
/// in-process publish, once via the cross-tab marker echo) and must be
/// idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// The pregnancy record changed (stage update, server adoption, or
    /// background poll). Carries the record every view should
    /// precedence-check against its own state.
    PregnancyUpdated {
        record: PregnancyRecord,
        provenance: Provenance,
        /// Local clock time of the cache write that produced this event
        local_timestamp: DateTime<Utc>,
    },

    /// Development content for a week/language pair was refreshed
    DevelopmentUpdated {
        week: u8,
        language: String,
        timestamp: DateTime<Utc>,
    },

    /// Generic refresh signal: carries no authoritative data; every
    /// view re-derives its displayed state from cache/server.
    ForceSync { timestamp: DateTime<Utc> },
}

impl SyncEvent {
    /// Stable event name, used as the subscription key and as the
    /// `event` field of the broadcast marker
    pub fn kind(&self) -> EventKind {
        match self {
            SyncEvent::PregnancyUpdated { .. } => EventKind::PregnancyUpdated,
            SyncEvent::DevelopmentUpdated { .. } => EventKind::DevelopmentUpdated,
            SyncEvent::ForceSync { .. } => EventKind::ForceSync,
        }
    }
}

/// Subscription key for the sync bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    PregnancyUpdated,
    DevelopmentUpdated,
    ForceSync,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PregnancyUpdated => "PregnancyUpdated",
            EventKind::DevelopmentUpdated => "DevelopmentUpdated",
            EventKind::ForceSync => "ForceSync",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
