//! Integration tests for the stage update and reconciliation protocol
//!
//! A small axum router stands in for the backend collaborators so the
//! full server-first / local-fallback / precedence flow runs against
//! real HTTP. Offline scenarios point the client at a port nothing is
//! listening on.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use nestling_common::config::SyncConfig;
use nestling_common::events::{EventKind, SyncEvent};
use nestling_common::model::Provenance;
use nestling_common::stage::{self, StageDescriptor, StageType};
use nestling_common::time;
use nestling_sync::bus::SyncBus;
use nestling_sync::cache::PersistedCache;
use nestling_sync::channel::BroadcastChannel;
use nestling_sync::coordinator::UpdateCoordinator;
use nestling_sync::remote::ApiClient;
use nestling_sync::{SyncContext, ViewReconciler, ViewState};

const SCOPE: &str = "local";
const OFFLINE_URL: &str = "http://127.0.0.1:9";

/// Mutable state behind the mock backend
#[derive(Default)]
struct Backend {
    week: Option<u8>,
    /// Forced updated_at for responses; defaults to "now"
    updated_at: Option<DateTime<Utc>>,
    fail_updates: bool,
    update_count: usize,
}

type Shared = Arc<Mutex<Backend>>;

async fn stage_update(State(state): State<Shared>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let mut backend = state.lock().unwrap();
    backend.update_count += 1;
    if backend.fail_updates {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "unavailable"})));
    }
    let descriptor: StageDescriptor = serde_json::from_value(body).unwrap();
    let outcome = stage::normalize(&descriptor, time::today()).unwrap();
    backend.week = Some(outcome.current_week);
    let updated_at = backend.updated_at.unwrap_or_else(time::now);

    // Deliberately camelCase: exercises boundary normalization
    (
        StatusCode::OK,
        Json(json!({
            "pregnancyData": {
                "currentWeek": outcome.current_week,
                "dueDate": outcome.due_date,
                "updatedAt": updated_at,
            },
            "babyDevelopment": {
                "week": outcome.current_week,
                "lang": "en",
                "sizeComparison": "a mango",
                "narrative": "growing steadily",
                "tips": ["stay hydrated"],
            },
        })),
    )
}

async fn get_pregnancy(State(state): State<Shared>) -> (StatusCode, Json<Value>) {
    let backend = state.lock().unwrap();
    match backend.week {
        Some(week) => {
            let updated_at = backend.updated_at.unwrap_or_else(time::now);
            (
                StatusCode::OK,
                Json(json!({"current_week": week, "updated_at": updated_at})),
            )
        }
        None => (StatusCode::NOT_FOUND, Json(json!({"error": "no record"}))),
    }
}

#[derive(serde::Deserialize)]
struct LangQuery {
    lang: Option<String>,
}

async fn get_development(Path(week): Path<u8>, Query(query): Query<LangQuery>) -> Json<Value> {
    Json(json!({
        "week": week,
        "lang": query.lang.unwrap_or_else(|| "en".to_string()),
        "sizeComparison": "a papaya",
        "narrative": "an eventful week",
        "tips": [],
    }))
}

async fn spawn_backend(state: Shared) -> String {
    let app = Router::new()
        .route("/stage-update-with-development", post(stage_update))
        .route("/pregnancy", get(get_pregnancy))
        .route("/baby-development/:week", get(get_development))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

struct Harness {
    cache: Arc<PersistedCache>,
    bus: Arc<SyncBus>,
    api: Arc<ApiClient>,
    coordinator: UpdateCoordinator,
    _dir: tempfile::TempDir,
}

fn harness(base_url: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(PersistedCache::open(dir.path().join("cache.json")));
    let bus = Arc::new(SyncBus::new(BroadcastChannel::new(dir.path())));
    let api = Arc::new(ApiClient::new(base_url, 2_000).unwrap());
    let coordinator = UpdateCoordinator::new(
        Arc::clone(&cache),
        Arc::clone(&bus),
        Arc::clone(&api),
        SCOPE.to_string(),
        2_000,
        1_500,
    );
    Harness {
        cache,
        bus,
        api,
        coordinator,
        _dir: dir,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool, timeout_ms: u64) -> bool {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    condition()
}

#[tokio::test]
async fn test_offline_update_applies_locally() {
    let h = harness(OFFLINE_URL);

    let record = h
        .coordinator
        .update_stage(StageType::Week, "20")
        .await
        .expect("offline update must not error");

    assert_eq!(record.current_week, 20);
    assert_eq!(record.due_date, time::today() + chrono::Duration::weeks(20));

    // Immediately retrievable from the cache, flagged user-specified
    let cached = h.cache.pregnancy_record(SCOPE).expect("cached right away");
    assert_eq!(cached.record.current_week, 20);
    assert_eq!(cached.provenance, Provenance::UserSpecified);
}

#[tokio::test]
async fn test_offline_update_publishes_before_returning() {
    let h = harness(OFFLINE_URL);
    let seen = Arc::new(AtomicUsize::new(0));

    let count = Arc::clone(&seen);
    h.bus.subscribe(EventKind::PregnancyUpdated, move |event| {
        if let SyncEvent::PregnancyUpdated { record, .. } = event {
            assert_eq!(record.current_week, 8);
        }
        count.fetch_add(1, Ordering::SeqCst);
    });

    h.coordinator
        .update_stage(StageType::Trimester, "1")
        .await
        .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_server_update_adopted_and_development_cached() {
    let state = Shared::default();
    let base_url = spawn_backend(Arc::clone(&state)).await;
    let h = harness(&base_url);

    let record = h
        .coordinator
        .update_stage(StageType::Trimester, "2")
        .await
        .unwrap();

    assert_eq!(record.current_week, 20);
    let cached = h.cache.pregnancy_record(SCOPE).unwrap();
    assert_eq!(cached.provenance, Provenance::Server);

    // Development snapshot from the combined endpoint landed too
    let development = h.cache.development(20, "en").expect("snapshot cached");
    assert_eq!(development.size_comparison, "a mango");
}

#[tokio::test]
async fn test_development_write_publishes_event() {
    let state = Shared::default();
    let base_url = spawn_backend(Arc::clone(&state)).await;
    let h = harness(&base_url);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    h.bus.subscribe(EventKind::DevelopmentUpdated, move |event| {
        if let SyncEvent::DevelopmentUpdated { week, language, .. } = event {
            sink.lock().unwrap().push((*week, language.clone()));
        }
    });

    h.coordinator
        .update_stage(StageType::Week, "20")
        .await
        .unwrap();

    // Synchronous fan-out: the snapshot event arrived with the update
    assert_eq!(*seen.lock().unwrap(), vec![(20, "en".to_string())]);
}

#[tokio::test]
async fn test_context_development_fetch_publishes_once() {
    let state = Shared::default();
    let base_url = spawn_backend(Arc::clone(&state)).await;
    let dir = tempfile::tempdir().unwrap();
    let ctx = SyncContext::new(SyncConfig {
        base_url,
        language: "en".to_string(),
        session_scope: SCOPE.to_string(),
        request_timeout_ms: 2_000,
        poll_interval_secs: 3_600,
        channel_poll_ms: 500,
        retry_max_wait_ms: 500,
        data_dir: dir.path().to_path_buf(),
    })
    .unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&seen);
    ctx.subscribe(EventKind::DevelopmentUpdated, move |event| {
        if let SyncEvent::DevelopmentUpdated { week, language, .. } = event {
            assert_eq!(*week, 9);
            assert_eq!(language, "en");
        }
        count.fetch_add(1, Ordering::SeqCst);
    });

    let snapshot = ctx.development(9).await.unwrap();
    assert_eq!(snapshot.week, 9);
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    // Second call is served from the cache: no second announcement
    ctx.development(9).await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_validation_error_surfaces_in_both_paths() {
    let state = Shared::default();
    let base_url = spawn_backend(Arc::clone(&state)).await;

    for url in [base_url.as_str(), OFFLINE_URL] {
        let h = harness(url);
        let err = h
            .coordinator
            .update_stage(StageType::Week, "soon")
            .await
            .unwrap_err();
        assert!(matches!(err, nestling_common::Error::Validation(_)));
        assert!(h.cache.pregnancy_record(SCOPE).is_none());
    }
}

#[tokio::test]
async fn test_stale_server_response_preserves_user_intent() {
    let state = Shared::default();
    state.lock().unwrap().updated_at = Some(time::now() - chrono::Duration::hours(1));
    let base_url = spawn_backend(Arc::clone(&state)).await;
    let h = harness(&base_url);

    // User-specified record written just now outranks the hour-old
    // server timestamp.
    let mut user = nestling_common::model::PregnancyRecord::default_record();
    user.current_week = 30;
    h.cache.save_user_record(SCOPE, &user);

    let record = h
        .coordinator
        .update_stage(StageType::Week, "12")
        .await
        .unwrap();

    assert_eq!(record.current_week, 30, "user intent must be preserved");
    let cached = h.cache.pregnancy_record(SCOPE).unwrap();
    assert_eq!(cached.provenance, Provenance::UserSpecified);
    assert_eq!(cached.record.current_week, 30);
}

#[tokio::test]
async fn test_background_replay_confirms_after_recovery() {
    let state = Shared::default();
    state.lock().unwrap().fail_updates = true;
    let base_url = spawn_backend(Arc::clone(&state)).await;
    let h = harness(&base_url);

    let record = h
        .coordinator
        .update_stage(StageType::Week, "22")
        .await
        .unwrap();
    assert_eq!(record.current_week, 22);
    assert_eq!(
        h.cache.pregnancy_record(SCOPE).unwrap().provenance,
        Provenance::UserSpecified
    );

    // Backend comes back; the fire-and-forget replay should land and
    // flip provenance to Server.
    state.lock().unwrap().fail_updates = false;

    let cache = Arc::clone(&h.cache);
    let confirmed = wait_until(
        move || {
            cache
                .pregnancy_record(SCOPE)
                .map(|cached| cached.provenance == Provenance::Server)
                .unwrap_or(false)
        },
        5_000,
    )
    .await;
    assert!(confirmed, "replay never confirmed with the server");
    assert_eq!(h.cache.pregnancy_record(SCOPE).unwrap().record.current_week, 22);
    assert!(state.lock().unwrap().update_count >= 2);
}

#[tokio::test]
async fn test_view_mount_reconciles_with_server() {
    let state = Shared::default();
    state.lock().unwrap().week = Some(18);
    let base_url = spawn_backend(Arc::clone(&state)).await;
    let h = harness(&base_url);

    let view = ViewReconciler::mount(
        Arc::clone(&h.cache),
        Arc::clone(&h.bus),
        Arc::clone(&h.api),
        SCOPE.to_string(),
    );

    let view_ref = &view;
    assert!(
        wait_until(move || view_ref.displayed_week() == 18, 3_000).await,
        "view never adopted the server record"
    );
    assert_eq!(view.state(), ViewState::Reconciled);
    assert_eq!(
        h.cache.pregnancy_record(SCOPE).unwrap().provenance,
        Provenance::Server
    );
    view.unmount();
}

#[tokio::test]
async fn test_view_falls_back_to_cache_offline() {
    let h = harness(OFFLINE_URL);
    let mut user = nestling_common::model::PregnancyRecord::default_record();
    user.current_week = 25;
    h.cache.save_user_record(SCOPE, &user);

    let view = ViewReconciler::mount(
        Arc::clone(&h.cache),
        Arc::clone(&h.bus),
        Arc::clone(&h.api),
        SCOPE.to_string(),
    );

    // Optimistic display before any server traffic
    assert_eq!(view.displayed_week(), 25);

    let view_ref = &view;
    assert!(wait_until(move || view_ref.state() == ViewState::Reconciled, 3_000).await);
    assert_eq!(view.displayed_week(), 25);
    view.unmount();
}

#[tokio::test]
async fn test_force_sync_refetches_unconditionally() {
    let state = Shared::default();
    state.lock().unwrap().week = Some(10);
    let base_url = spawn_backend(Arc::clone(&state)).await;
    let h = harness(&base_url);

    let view = ViewReconciler::mount(
        Arc::clone(&h.cache),
        Arc::clone(&h.bus),
        Arc::clone(&h.api),
        SCOPE.to_string(),
    );
    let view_ref = &view;
    assert!(wait_until(move || view_ref.displayed_week() == 10, 3_000).await);

    // Record advances server-side; views only hear about it through
    // the refresh signal.
    state.lock().unwrap().week = Some(11);
    h.bus.force_sync_all();

    let view_ref = &view;
    assert!(
        wait_until(move || view_ref.displayed_week() == 11, 3_000).await,
        "force sync did not trigger a refetch"
    );
    view.unmount();
}

#[tokio::test]
async fn test_unmount_removes_subscriptions() {
    let h = harness(OFFLINE_URL);
    let view = ViewReconciler::mount(
        Arc::clone(&h.cache),
        Arc::clone(&h.bus),
        Arc::clone(&h.api),
        SCOPE.to_string(),
    );
    assert!(h.bus.subscriber_count() >= 2);
    view.unmount();
    assert_eq!(h.bus.subscriber_count(), 0);
}

#[tokio::test]
async fn test_development_fetch_respects_language() {
    let state = Shared::default();
    let base_url = spawn_backend(Arc::clone(&state)).await;
    let api = ApiClient::new(base_url.as_str(), 2_000).unwrap();

    let snapshot = api.fetch_development(14, "ko").await.unwrap();
    assert_eq!(snapshot.week, 14);
    assert_eq!(snapshot.language, "ko");
}

#[tokio::test]
async fn test_pregnancy_404_maps_to_default_record() {
    let state = Shared::default();
    let base_url = spawn_backend(Arc::clone(&state)).await;
    let api = ApiClient::new(base_url.as_str(), 2_000).unwrap();

    let record = api.fetch_pregnancy().await.unwrap();
    assert_eq!(record.current_week, 1);
}
