//! Update coordinator
//!
//! Orchestrates a stage update: authoritative server path under a
//! bounded timeout, local normalization fallback when the backend is
//! unreachable, precedence-checked cache writes, and a fire-and-forget
//! background replay of the authoritative path after a fallback.
//!
//! A stage update never surfaces a transport error; the caller always
//! gets back a valid record (the continuity-of-experience goal). Only
//! validation of the user's input can fail.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use nestling_common::error::Result;
use nestling_common::events::SyncEvent;
use nestling_common::model::{
    CachedPregnancyRecord, DevelopmentSnapshot, PregnancyRecord, StageUpdate,
};
use nestling_common::stage::{self, StageDescriptor, StageType};
use nestling_common::time;

use crate::bus::SyncBus;
use crate::cache::PersistedCache;
use crate::reconciler::{reconcile, Reconciliation};
use crate::remote::ApiClient;
use crate::retry;

/// Coordinates stage updates between server, cache, and sync bus
pub struct UpdateCoordinator {
    cache: Arc<PersistedCache>,
    bus: Arc<SyncBus>,
    api: Arc<ApiClient>,
    scope: String,
    request_timeout_ms: u64,
    retry_max_wait_ms: u64,
}

impl UpdateCoordinator {
    pub fn new(
        cache: Arc<PersistedCache>,
        bus: Arc<SyncBus>,
        api: Arc<ApiClient>,
        scope: String,
        request_timeout_ms: u64,
        retry_max_wait_ms: u64,
    ) -> Self {
        Self {
            cache,
            bus,
            api,
            scope,
            request_timeout_ms,
            retry_max_wait_ms,
        }
    }

    /// Apply a user-chosen stage.
    ///
    /// Returns the record actually used for display. The only error
    /// that can surface is `Validation` on malformed input; transport
    /// failures degrade to local computation.
    pub async fn update_stage(
        &self,
        stage_type: StageType,
        stage_value: &str,
    ) -> Result<PregnancyRecord> {
        let descriptor = StageDescriptor::new(stage_type, stage_value);
        // Validate before touching the network so bad input is rejected
        // identically online and offline.
        let outcome = stage::normalize(&descriptor, time::today())?;

        let authoritative = tokio::time::timeout(
            Duration::from_millis(self.request_timeout_ms),
            self.api.update_stage(&descriptor),
        )
        .await;

        match authoritative {
            Ok(Ok(update)) => Ok(self.adopt_server_update(update)),
            Ok(Err(e)) => {
                warn!(error = %e, "Stage update failed on server, applying locally");
                Ok(self.apply_local_fallback(descriptor, outcome))
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.request_timeout_ms,
                    "Stage update timed out, applying locally"
                );
                Ok(self.apply_local_fallback(descriptor, outcome))
            }
        }
    }

    /// Write a confirmed server update into the cache, unless a
    /// strictly newer user-specified record must be preserved. Publishes
    /// the winning record either way.
    fn adopt_server_update(&self, update: StageUpdate) -> PregnancyRecord {
        let cached = self.cache.pregnancy_record(&self.scope);
        let winner = match reconcile(cached.as_ref(), &update.pregnancy) {
            Reconciliation::Adopt => {
                let entry = self.cache.save_server_record(&self.scope, &update.pregnancy);
                if let Some(development) = &update.development {
                    // Written in the same synchronous step as the record
                    // so the two stay consistent.
                    self.cache.save_development(development);
                    self.bus.publish(&development_event(development));
                }
                entry
            }
            Reconciliation::KeepCached => {
                debug!("Server stage update superseded by newer user-specified record");
                cached.unwrap_or_else(|| {
                    self.cache.save_server_record(&self.scope, &update.pregnancy)
                })
            }
        };

        self.publish_record(&winner);
        winner.record
    }

    /// Offline path: trust the local normalization, stamp it
    /// user-specified, and replay the server call in the background.
    fn apply_local_fallback(
        &self,
        descriptor: StageDescriptor,
        outcome: stage::StageOutcome,
    ) -> PregnancyRecord {
        let record = PregnancyRecord::from_outcome(&outcome, time::now());
        let entry = self.cache.save_user_record(&self.scope, &record);
        info!(
            week = record.current_week,
            "Applied stage update locally, pending server confirmation"
        );
        self.publish_record(&entry);
        self.spawn_background_replay(descriptor);
        record
    }

    /// Fire-and-forget retry of the authoritative path. A late success
    /// is still subject to the precedence check, so it cannot clobber a
    /// newer user update.
    fn spawn_background_replay(&self, descriptor: StageDescriptor) {
        let api = Arc::clone(&self.api);
        let cache = Arc::clone(&self.cache);
        let bus = Arc::clone(&self.bus);
        let scope = self.scope.clone();
        let max_wait_ms = self.retry_max_wait_ms;

        tokio::spawn(async move {
            let result = retry::with_backoff("stage update replay", max_wait_ms, || {
                api.update_stage(&descriptor)
            })
            .await;

            match result {
                Ok(update) => {
                    let cached = cache.pregnancy_record(&scope);
                    if reconcile(cached.as_ref(), &update.pregnancy) == Reconciliation::Adopt {
                        let entry = cache.save_server_record(&scope, &update.pregnancy);
                        if let Some(development) = &update.development {
                            cache.save_development(development);
                            bus.publish(&development_event(development));
                        }
                        bus.publish(&SyncEvent::PregnancyUpdated {
                            record: entry.record.clone(),
                            provenance: entry.provenance,
                            local_timestamp: entry.local_timestamp,
                        });
                        info!(
                            week = entry.record.current_week,
                            "Server confirmed stage update after replay"
                        );
                    } else {
                        debug!("Replayed stage update superseded before confirmation");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Background stage update replay gave up");
                }
            }
        });
    }

    fn publish_record(&self, entry: &CachedPregnancyRecord) {
        self.bus.publish(&SyncEvent::PregnancyUpdated {
            record: entry.record.clone(),
            provenance: entry.provenance,
            local_timestamp: entry.local_timestamp,
        });
    }
}

/// Event announcing a freshly cached development snapshot
pub(crate) fn development_event(snapshot: &DevelopmentSnapshot) -> SyncEvent {
    SyncEvent::DevelopmentUpdated {
        week: snapshot.week,
        language: snapshot.language.clone(),
        timestamp: time::now(),
    }
}
