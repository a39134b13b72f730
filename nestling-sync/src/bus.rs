//! Cross-view sync bus
//!
//! In-process publish/subscribe with synchronous fan-out: `publish`
//! invokes every matching handler, in subscription order, before it
//! returns. After local fan-out the event is mirrored into the
//! cross-tab broadcast channel so other processes observe it too.
//!
//! Handlers must be idempotent: the same logical update can arrive
//! twice, once from the local publish and once from the marker echo.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use nestling_common::events::{EventKind, SyncEvent};
use nestling_common::time;

use crate::channel::BroadcastChannel;

/// Handle returned by `subscribe`, used to remove the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

struct Registration {
    id: u64,
    kind: EventKind,
    handler: Handler,
}

/// Publish/subscribe hub plus cross-tab mirror
pub struct SyncBus {
    subscribers: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
    channel: BroadcastChannel,
}

impl SyncBus {
    pub fn new(channel: BroadcastChannel) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            channel,
        }
    }

    /// Register a handler for one event kind. Multiple handlers per
    /// kind are permitted and run in subscription order.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.lock().expect("bus lock poisoned");
        subscribers.push(Registration {
            id,
            kind,
            handler: Arc::new(handler),
        });
        SubscriptionId(id)
    }

    /// Remove a handler; no further deliveries after this returns
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscribers = self.subscribers.lock().expect("bus lock poisoned");
        subscribers.retain(|registration| registration.id != id.0);
    }

    /// Deliver to same-process subscribers synchronously, then mirror
    /// the event into the cross-tab channel
    pub fn publish(&self, event: &SyncEvent) {
        self.dispatch_local(event);
        self.channel.write_marker(event);
    }

    /// Fan out to local subscribers only. Used by the marker watcher so
    /// an echoed event is not re-broadcast.
    pub fn dispatch_local(&self, event: &SyncEvent) {
        let kind = event.kind();
        // Snapshot the handler list so a handler may subscribe or
        // unsubscribe without deadlocking the bus.
        let handlers: Vec<Handler> = {
            let subscribers = self.subscribers.lock().expect("bus lock poisoned");
            subscribers
                .iter()
                .filter(|registration| registration.kind == kind)
                .map(|registration| Arc::clone(&registration.handler))
                .collect()
        };
        debug!(event = %kind, handlers = handlers.len(), "Dispatching sync event");
        for handler in handlers {
            handler(event);
        }
    }

    /// Broadcast the generic refresh signal to every view, local and
    /// cross-tab. Carries no authoritative data.
    pub fn force_sync_all(&self) {
        self.publish(&SyncEvent::ForceSync {
            timestamp: time::now(),
        });
    }

    /// Timestamp of the most recent cross-tab broadcast
    pub fn last_update_timestamp(&self) -> Option<i64> {
        self.channel.last_update_timestamp()
    }

    /// Decode the current broadcast marker back into its event, if the
    /// marker exists and is readable
    pub fn read_marker_event(&self) -> Option<SyncEvent> {
        self.channel.read_marker().and_then(|marker| marker.to_event())
    }

    /// Current number of registered handlers (diagnostics and tests)
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("bus lock poisoned").len()
    }
}
