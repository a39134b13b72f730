//! View reconciliation
//!
//! The precedence logic deciding which of two candidate records a view
//! displays, plus the per-page `ViewReconciler` that applies it on
//! mount and on every sync event. The same pure `reconcile` function is
//! used by the update coordinator, the background poller, and views, so
//! every consumer resolves conflicts identically.

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

use nestling_common::events::{EventKind, SyncEvent};
use nestling_common::model::{CachedPregnancyRecord, PregnancyRecord, Provenance};

use crate::bus::{SubscriptionId, SyncBus};
use crate::cache::PersistedCache;
use crate::remote::ApiClient;

/// Outcome of the precedence check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Incoming server record wins; display and persist it
    Adopt,
    /// Cached user-specified record is strictly newer; keep it
    KeepCached,
}

/// Precedence law: a cached user-specified record with a local
/// timestamp strictly newer than the server record's `updated_at` wins;
/// everything else adopts the server record.
pub fn reconcile(
    cached: Option<&CachedPregnancyRecord>,
    server: &PregnancyRecord,
) -> Reconciliation {
    match cached {
        Some(cached) if cached.outranks(server.updated_at) => Reconciliation::KeepCached,
        _ => Reconciliation::Adopt,
    }
}

/// Per-view lifecycle state.
///
/// `Uninitialized` is the notional pre-mount state; `mount` performs
/// the initial cache read itself, so a mounted view starts at
/// `CacheHit` or `CacheMiss`. `Reconciled` re-enters `AwaitingServer`
/// on any sync event; there is no terminal state before unmount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Uninitialized,
    CacheHit,
    CacheMiss,
    AwaitingServer,
    Reconciled,
}

struct ViewInner {
    state: ViewState,
    displayed: Option<CachedPregnancyRecord>,
}

/// Reconciliation logic embedded in each page showing pregnancy data
pub struct ViewReconciler {
    bus: Arc<SyncBus>,
    inner: Arc<Mutex<ViewInner>>,
    subscriptions: Vec<SubscriptionId>,
    refresh_notify: Arc<Notify>,
    refresh_task: JoinHandle<()>,
}

impl ViewReconciler {
    /// Mount a view: optimistic cache read, async server refresh, and
    /// sync bus subscriptions for the lifetime of the view.
    pub fn mount(
        cache: Arc<PersistedCache>,
        bus: Arc<SyncBus>,
        api: Arc<ApiClient>,
        scope: String,
    ) -> Self {
        let cached = cache.pregnancy_record(&scope);
        let inner = Arc::new(Mutex::new(ViewInner {
            state: if cached.is_some() {
                ViewState::CacheHit
            } else {
                ViewState::CacheMiss
            },
            displayed: cached,
        }));

        let refresh_notify = Arc::new(Notify::new());
        let refresh_task = {
            let cache = Arc::clone(&cache);
            let inner = Arc::clone(&inner);
            let notify = Arc::clone(&refresh_notify);
            tokio::spawn(async move {
                loop {
                    notify.notified().await;
                    refresh_once(&cache, &api, &scope, &inner).await;
                }
            })
        };

        let mut subscriptions = Vec::new();

        // Stage updates carry the winning record; precedence-check it
        // against what this view currently shows.
        {
            let inner = Arc::clone(&inner);
            subscriptions.push(bus.subscribe(EventKind::PregnancyUpdated, move |event| {
                if let SyncEvent::PregnancyUpdated {
                    record,
                    provenance,
                    local_timestamp,
                } = event
                {
                    apply_candidate(
                        &inner,
                        CachedPregnancyRecord {
                            record: record.clone(),
                            provenance: *provenance,
                            local_timestamp: *local_timestamp,
                        },
                    );
                }
            }));
        }

        // Force-sync carries no data: re-fetch unconditionally.
        {
            let notify = Arc::clone(&refresh_notify);
            subscriptions.push(bus.subscribe(EventKind::ForceSync, move |_| {
                notify.notify_one();
            }));
        }

        // Kick off the initial server refresh.
        refresh_notify.notify_one();

        Self {
            bus,
            inner,
            subscriptions,
            refresh_notify,
            refresh_task,
        }
    }

    /// Week currently displayed by this view (default 1 before any data)
    pub fn displayed_week(&self) -> u8 {
        self.inner
            .lock()
            .expect("view lock poisoned")
            .displayed
            .as_ref()
            .map(|cached| cached.record.current_week)
            .unwrap_or(1)
    }

    /// Record currently displayed, if any
    pub fn displayed(&self) -> Option<CachedPregnancyRecord> {
        self.inner.lock().expect("view lock poisoned").displayed.clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ViewState {
        self.inner.lock().expect("view lock poisoned").state
    }

    /// Trigger a server refresh, as on a force-sync signal
    pub fn refresh(&self) {
        self.refresh_notify.notify_one();
    }

    /// Unmount: remove all bus subscriptions and stop the refresh task
    pub fn unmount(self) {
        for id in &self.subscriptions {
            self.bus.unsubscribe(*id);
        }
        self.refresh_task.abort();
    }
}

/// Apply an event-delivered candidate to the displayed record.
///
/// Idempotent: replaying the identical payload leaves the same state.
/// Cross-tab deliveries may arrive out of order, so the decision uses
/// the candidate's timestamps, never arrival order.
fn apply_candidate(inner: &Arc<Mutex<ViewInner>>, candidate: CachedPregnancyRecord) {
    let mut inner = inner.lock().expect("view lock poisoned");

    let adopt = match &inner.displayed {
        None => true,
        Some(current) => {
            if current.provenance == Provenance::UserSpecified
                && candidate.provenance == Provenance::Server
            {
                // Precedence law: the user record yields only to
                // strictly newer server data.
                !current.outranks(candidate.record.updated_at)
            } else {
                authority_timestamp(&candidate) >= authority_timestamp(current)
            }
        }
    };

    if adopt {
        debug!(
            week = candidate.record.current_week,
            provenance = ?candidate.provenance,
            "View adopting sync event payload"
        );
        inner.displayed = Some(candidate);
    }
    inner.state = ViewState::Reconciled;
}

/// The timestamp a candidate's authority rests on: the server's
/// `updated_at` for server records, the local write time for
/// user-specified ones.
fn authority_timestamp(entry: &CachedPregnancyRecord) -> chrono::DateTime<chrono::Utc> {
    match entry.provenance {
        Provenance::Server => entry.record.updated_at,
        Provenance::UserSpecified => entry.local_timestamp,
    }
}

/// One pass of the mount/refresh protocol: fetch from the server,
/// precedence-check against the cache, persist adopted server data,
/// fall back to cache (or the default record) on read failure.
async fn refresh_once(
    cache: &Arc<PersistedCache>,
    api: &Arc<ApiClient>,
    scope: &str,
    inner: &Arc<Mutex<ViewInner>>,
) {
    {
        let mut inner = inner.lock().expect("view lock poisoned");
        inner.state = ViewState::AwaitingServer;
    }

    let displayed = match api.fetch_pregnancy().await {
        Ok(server) => {
            let cached = cache.pregnancy_record(scope);
            match reconcile(cached.as_ref(), &server) {
                Reconciliation::Adopt => Some(cache.save_server_record(scope, &server)),
                Reconciliation::KeepCached => cached,
            }
        }
        Err(e) => {
            debug!(error = %e, "Pregnancy fetch failed, falling back to cache");
            cache.pregnancy_record(scope)
        }
    };

    let mut inner = inner.lock().expect("view lock poisoned");
    if let Some(displayed) = displayed {
        inner.displayed = Some(displayed);
    }
    inner.state = ViewState::Reconciled;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use nestling_common::time;

    fn server_record(week: u8, updated_at: chrono::DateTime<chrono::Utc>) -> PregnancyRecord {
        let mut record = PregnancyRecord::default_record();
        record.current_week = week;
        record.updated_at = updated_at;
        record
    }

    fn cached(
        week: u8,
        provenance: Provenance,
        local_timestamp: chrono::DateTime<chrono::Utc>,
    ) -> CachedPregnancyRecord {
        let mut record = PregnancyRecord::default_record();
        record.current_week = week;
        CachedPregnancyRecord {
            record,
            provenance,
            local_timestamp,
        }
    }

    #[test]
    fn test_no_cache_adopts_server() {
        let server = server_record(12, time::now());
        assert_eq!(reconcile(None, &server), Reconciliation::Adopt);
    }

    #[test]
    fn test_newer_user_record_wins() {
        let now = time::now();
        let user = cached(20, Provenance::UserSpecified, now);
        let server = server_record(12, now - Duration::minutes(5));
        assert_eq!(reconcile(Some(&user), &server), Reconciliation::KeepCached);
    }

    #[test]
    fn test_newer_server_record_wins() {
        let now = time::now();
        let user = cached(20, Provenance::UserSpecified, now - Duration::minutes(5));
        let server = server_record(21, now);
        assert_eq!(reconcile(Some(&user), &server), Reconciliation::Adopt);
    }

    #[test]
    fn test_server_provenance_cache_always_adopts() {
        let now = time::now();
        let entry = cached(20, Provenance::Server, now);
        let server = server_record(12, now - Duration::days(1));
        assert_eq!(reconcile(Some(&entry), &server), Reconciliation::Adopt);
    }

    #[test]
    fn test_apply_candidate_is_idempotent() {
        let inner = Arc::new(Mutex::new(ViewInner {
            state: ViewState::Uninitialized,
            displayed: None,
        }));

        let candidate = cached(22, Provenance::UserSpecified, time::now());
        apply_candidate(&inner, candidate.clone());
        let after_first = inner.lock().unwrap().displayed.clone();

        apply_candidate(&inner, candidate);
        let after_second = inner.lock().unwrap().displayed.clone();

        assert_eq!(after_first, after_second);
        assert_eq!(inner.lock().unwrap().state, ViewState::Reconciled);
    }

    #[test]
    fn test_apply_candidate_keeps_newer_user_record() {
        let now = time::now();
        let inner = Arc::new(Mutex::new(ViewInner {
            state: ViewState::Reconciled,
            displayed: Some(cached(20, Provenance::UserSpecified, now)),
        }));

        // Stale server record delivered out of order
        let stale = server_record(5, now - Duration::hours(1));
        apply_candidate(
            &inner,
            CachedPregnancyRecord {
                record: stale,
                provenance: Provenance::Server,
                local_timestamp: now - Duration::hours(1),
            },
        );

        assert_eq!(
            inner.lock().unwrap().displayed.as_ref().unwrap().record.current_week,
            20
        );
    }
}
