//! Sync context
//!
//! The single injectable object pages talk to. Constructed once at
//! application start; owns the cache, the sync bus, the broadcast
//! channel watcher, the backend client, and the update coordinator.
//! No page touches the cache or the broadcast marker directly.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use nestling_common::config::SyncConfig;
use nestling_common::error::Result;
use nestling_common::events::{EventKind, SyncEvent};
use nestling_common::model::{DevelopmentSnapshot, PregnancyRecord};
use nestling_common::stage::StageType;

use crate::bus::{SubscriptionId, SyncBus};
use crate::cache::PersistedCache;
use crate::channel::BroadcastChannel;
use crate::coordinator::UpdateCoordinator;
use crate::reconciler::{reconcile, Reconciliation, ViewReconciler};
use crate::remote::ApiClient;

/// Application-wide sync context
pub struct SyncContext {
    config: SyncConfig,
    cache: Arc<PersistedCache>,
    bus: Arc<SyncBus>,
    api: Arc<ApiClient>,
    coordinator: UpdateCoordinator,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncContext {
    /// Build the context from resolved configuration. Background tasks
    /// are not running until `start` is called.
    pub fn new(config: SyncConfig) -> Result<Arc<Self>> {
        let cache = Arc::new(PersistedCache::open(config.data_dir.join("cache.json")));
        let bus = Arc::new(SyncBus::new(BroadcastChannel::new(&config.data_dir)));
        let api = Arc::new(ApiClient::new(
            config.base_url.clone(),
            config.request_timeout_ms,
        )?);

        let coordinator = UpdateCoordinator::new(
            Arc::clone(&cache),
            Arc::clone(&bus),
            Arc::clone(&api),
            config.session_scope.clone(),
            config.request_timeout_ms,
            config.retry_max_wait_ms,
        );

        Ok(Arc::new(Self {
            config,
            cache,
            bus,
            api,
            coordinator,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Spawn the cross-tab marker watcher and the periodic fallback
    /// poll. Idempotent enough for tests to skip it entirely.
    pub fn start(self: &Arc<Self>) {
        let watcher = self.spawn_marker_watcher();
        let poller = self.spawn_fallback_poll();
        let mut tasks = self.tasks.lock().expect("task list poisoned");
        tasks.push(watcher);
        tasks.push(poller);
        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            channel_poll_ms = self.config.channel_poll_ms,
            "Sync context started"
        );
    }

    /// Abort background tasks (application shutdown)
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().expect("task list poisoned");
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    /// Apply a user-chosen stage; see `UpdateCoordinator::update_stage`
    pub async fn update_stage(
        &self,
        stage_type: StageType,
        stage_value: &str,
    ) -> Result<PregnancyRecord> {
        self.coordinator.update_stage(stage_type, stage_value).await
    }

    /// Week to display right now: cached record if present, else 1
    pub fn displayed_week(&self) -> u8 {
        self.cache
            .pregnancy_record(&self.config.session_scope)
            .map(|cached| cached.record.current_week)
            .unwrap_or(1)
    }

    /// Development content for a week: cache first, then the backend
    /// (caching the response and announcing the refresh). Language
    /// comes from configuration.
    pub async fn development(&self, week: u8) -> Result<DevelopmentSnapshot> {
        let language = &self.config.language;
        if let Some(snapshot) = self.cache.development(week, language) {
            return Ok(snapshot);
        }
        let snapshot = self.api.fetch_development(week, language).await?;
        self.cache.save_development(&snapshot);
        self.bus.publish(&crate::coordinator::development_event(&snapshot));
        Ok(snapshot)
    }

    /// Subscribe a handler on the sync bus
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(kind, handler)
    }

    /// Remove a previously registered handler
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.bus.unsubscribe(id);
    }

    /// Broadcast the generic refresh signal to all views and tabs
    pub fn force_sync_all(&self) {
        self.bus.force_sync_all();
    }

    /// Timestamp of the most recent cross-tab broadcast
    pub fn last_update_timestamp(&self) -> Option<i64> {
        self.bus.last_update_timestamp()
    }

    /// Mount the reconciliation lifecycle for one page
    pub fn mount_view(&self) -> ViewReconciler {
        ViewReconciler::mount(
            Arc::clone(&self.cache),
            Arc::clone(&self.bus),
            Arc::clone(&self.api),
            self.config.session_scope.clone(),
        )
    }

    /// Watch the shared broadcast marker and re-dispatch events written
    /// by other tabs. Echoes of our own publishes are delivered too;
    /// handlers are idempotent by contract.
    fn spawn_marker_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let bus = Arc::clone(&self.bus);
        let interval_ms = self.config.channel_poll_ms;
        // Start from the current marker so stale history is not replayed
        let mut last_seen = bus.last_update_timestamp().unwrap_or(0);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(timestamp) = bus.last_update_timestamp() else {
                    continue;
                };
                if timestamp <= last_seen {
                    continue;
                }
                last_seen = timestamp;
                if let Some(event) = bus.read_marker_event() {
                    debug!(event = %event.kind(), "Observed cross-tab broadcast");
                    bus.dispatch_local(&event);
                }
            }
        })
    }

    /// Best-effort safety net: periodically re-fetch the pregnancy
    /// record in case both the bus and direct responses were missed.
    fn spawn_fallback_poll(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        let bus = Arc::clone(&self.bus);
        let api = Arc::clone(&self.api);
        let scope = self.config.session_scope.clone();
        let interval = Duration::from_secs(self.config.poll_interval_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so startup does
            // not race the views' own initial fetches.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match api.fetch_pregnancy().await {
                    Ok(server) => {
                        let cached = cache.pregnancy_record(&scope);
                        // Skip the publish when nothing moved; record
                        // ids differ per fetch so compare substance.
                        let already_current = cached
                            .as_ref()
                            .map(|c| {
                                c.record.current_week == server.current_week
                                    && c.record.updated_at == server.updated_at
                            })
                            .unwrap_or(false);
                        if already_current {
                            continue;
                        }
                        if reconcile(cached.as_ref(), &server) == Reconciliation::Adopt {
                            let entry = cache.save_server_record(&scope, &server);
                            bus.publish(&SyncEvent::PregnancyUpdated {
                                record: entry.record.clone(),
                                provenance: entry.provenance,
                                local_timestamp: entry.local_timestamp,
                            });
                            debug!(week = entry.record.current_week, "Fallback poll adopted server record");
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "Fallback poll fetch failed");
                    }
                }
            }
        })
    }
}

impl Drop for SyncContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
