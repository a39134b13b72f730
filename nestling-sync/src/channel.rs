//! Cross-tab broadcast channel
//!
//! One well-known marker file under the shared data directory plays the
//! role of the browser storage key other tabs observe. Each publish
//! rewrites the marker; a watcher task in every process polls it and
//! re-dispatches newer events locally. Delivery across tabs is
//! asynchronous and unordered; consumers resolve conflicts by record
//! timestamps, never by arrival order.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use nestling_common::events::SyncEvent;
use nestling_common::time;

/// Well-known marker file name (the `LAST_PREGNANCY_UPDATE` key)
pub const MARKER_FILE_NAME: &str = "last_pregnancy_update.json";

/// Marker written on every publish
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMarker {
    /// Event name (matches `SyncEvent::kind()`)
    pub event: String,
    /// Serialized event payload
    pub data: Value,
    /// Epoch milliseconds at publish time; monotonic enough to dedupe
    pub timestamp: i64,
}

impl UpdateMarker {
    /// Decode the payload back into a sync event
    pub fn to_event(&self) -> Option<SyncEvent> {
        match serde_json::from_value(self.data.clone()) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(event = %self.event, error = %e, "Undecodable broadcast marker payload");
                None
            }
        }
    }
}

/// File-backed broadcast channel shared by all tabs of one user
pub struct BroadcastChannel {
    path: PathBuf,
}

impl BroadcastChannel {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(MARKER_FILE_NAME),
        }
    }

    /// Write the marker for an event. Best-effort: failures are logged
    /// and swallowed so a publish never fails on storage problems.
    pub fn write_marker(&self, event: &SyncEvent) {
        let data = match serde_json::to_value(event) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "Could not encode sync event for broadcast marker");
                return;
            }
        };
        let marker = UpdateMarker {
            event: event.kind().as_str().to_string(),
            data,
            timestamp: time::now_millis(),
        };
        if let Err(e) = self.write_atomic(&marker) {
            warn!(path = %self.path.display(), error = %e, "Broadcast marker write failed");
        }
    }

    /// Read the current marker, tolerating a missing or corrupt file
    pub fn read_marker(&self) -> Option<UpdateMarker> {
        if !self.path.exists() {
            return None;
        }
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Broadcast marker read failed");
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(marker) => Some(marker),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Corrupt broadcast marker ignored");
                None
            }
        }
    }

    /// Timestamp of the most recent broadcast, used by views to skip
    /// updates they have already processed
    pub fn last_update_timestamp(&self) -> Option<i64> {
        self.read_marker().map(|marker| marker.timestamp)
    }

    fn write_atomic(&self, marker: &UpdateMarker) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string(marker)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
