//! # Nestling Sync
//!
//! Client core keeping every open view of the pregnancy tracker
//! consistent with a single source of truth (server + persisted local
//! cache) despite an unreliable backend.
//!
//! Pages interact only with [`context::SyncContext`]; the cache and the
//! cross-tab broadcast channel are implementation details behind it.

pub mod bus;
pub mod cache;
pub mod channel;
pub mod context;
pub mod coordinator;
pub mod reconciler;
pub mod remote;
pub mod retry;

pub use bus::{SubscriptionId, SyncBus};
pub use cache::PersistedCache;
pub use context::SyncContext;
pub use reconciler::{reconcile, Reconciliation, ViewReconciler, ViewState};
