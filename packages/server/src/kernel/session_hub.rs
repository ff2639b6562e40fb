//! In-process registry of live run sessions.
//!
//! Maps a session id to the progress bus observers attach to and the token
//! that cancels the run. Sessions outlive their runs so late observers can
//! still replay the full event log.
//!
//! # Usage
//!
//! Run endpoint:
//!   let (bus, cancel) = (prepared.bus().clone(), prepared.cancellation_token());
//!   hub.register(prepared.session_id(), bus, cancel).await;
//!
//! Stream endpoint:
//!   let subscription = hub.subscribe("3f6c...").await;

use std::collections::HashMap;
use std::sync::Arc;

use tagcheck_core::{ProgressBus, Subscription};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct SessionEntry {
    bus: ProgressBus,
    cancel: CancellationToken,
}

/// Session id to progress bus and cancellation token.
///
/// Thread-safe, cloneable.
#[derive(Clone, Default)]
pub struct SessionHub {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new session. Finished sessions nobody is watching are
    /// evicted first.
    pub async fn register(&self, session_id: &str, bus: ProgressBus, cancel: CancellationToken) {
        let evicted = self.evict_finished().await;
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted finished sessions");
        }

        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), SessionEntry { bus, cancel });
    }

    /// Attach an observer. Replay starts from the first event.
    pub async fn subscribe(&self, session_id: &str) -> Option<Subscription> {
        self.bus(session_id).await.map(|bus| bus.subscribe())
    }

    pub async fn bus(&self, session_id: &str) -> Option<ProgressBus> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|entry| entry.bus.clone())
    }

    /// Request cancellation. Returns false for unknown sessions.
    pub async fn cancel(&self, session_id: &str) -> bool {
        match self.sessions.read().await.get(session_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop sessions that have reached a terminal event and have no
    /// attached observers. Returns how many were removed.
    pub async fn evict_finished(&self) -> usize {
        let mut finished = Vec::new();
        for (id, bus) in self.buses().await {
            if bus.observer_count() == 0 && bus.is_closed().await {
                finished.push(id);
            }
        }
        if finished.is_empty() {
            return 0;
        }

        let mut sessions = self.sessions.write().await;
        let mut evicted = 0;
        for id in &finished {
            // An observer may have attached since the scan
            let unwatched = sessions
                .get(id)
                .is_some_and(|entry| entry.bus.observer_count() == 0);
            if unwatched {
                sessions.remove(id);
                evicted += 1;
            }
        }
        evicted
    }

    /// Sessions whose run has not yet reached a terminal event.
    pub async fn active_count(&self) -> usize {
        let mut active = 0;
        for (_, bus) in self.buses().await {
            if !bus.is_closed().await {
                active += 1;
            }
        }
        active
    }

    /// Snapshot of every tracked bus, taken without holding the lock
    /// across bus reads.
    async fn buses(&self) -> Vec<(String, ProgressBus)> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.bus.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
