//! Replayable progress event stream for a run session.
//!
//! Each session owns one [`ProgressBus`]: an append-only event log plus a
//! `watch` channel carrying the latest sequence number. Observers read the
//! log through their own [`Subscription`] cursor, so a late observer gets the
//! full history first and a slow one never holds up the publisher.
//!
//! # Usage
//!
//! ```ignore
//! let bus = ProgressBus::new("session-1");
//! bus.publish(ProgressUpdate::crawling(EventStatus::Running, "Crawling")).await?;
//!
//! let mut sub = bus.subscribe();
//! while let Some(event) = sub.next().await {
//!     println!("{} {}", event.sequence, event.message);
//! }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{watch, RwLock};

use crate::error::BusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Crawling,
    Validator,
    Complete,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Crawling => "crawling",
            EventType::Validator => "validator",
            EventType::Complete => "complete",
            EventType::Error => "error",
        }
    }

    /// `complete` and `error` end a session's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::Complete | EventType::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Running,
    Success,
    Failed,
}

/// One stage transition, as delivered to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Starts at 1 and increases by one per event within a session
    pub sequence: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub stage: String,
    pub status: EventStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        self.event_type.is_terminal()
    }
}

/// An event waiting for its sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub event_type: EventType,
    pub stage: String,
    pub status: EventStatus,
    pub message: String,
    pub details: Option<Value>,
}

impl ProgressUpdate {
    pub fn new(
        event_type: EventType,
        stage: impl Into<String>,
        status: EventStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            stage: stage.into(),
            status,
            message: message.into(),
            details: None,
        }
    }

    pub fn crawling(status: EventStatus, message: impl Into<String>) -> Self {
        Self::new(EventType::Crawling, "crawling", status, message)
    }

    pub fn validator(
        stage: impl Into<String>,
        status: EventStatus,
        message: impl Into<String>,
    ) -> Self {
        Self::new(EventType::Validator, stage, status, message)
    }

    pub fn complete(message: impl Into<String>) -> Self {
        Self::new(EventType::Complete, "complete", EventStatus::Success, message)
    }

    pub fn error(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EventType::Error, stage, EventStatus::Failed, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Default)]
struct EventLog {
    events: Vec<ProgressEvent>,
    closed: bool,
}

struct BusInner {
    session_id: String,
    log: RwLock<EventLog>,
    head: watch::Sender<u64>,
    observers: AtomicUsize,
}

/// Ordered, replayable event stream for one session.
///
/// Cloning shares the same log.
#[derive(Clone)]
pub struct ProgressBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for ProgressBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressBus")
            .field("session_id", &self.inner.session_id)
            .field("observers", &self.observer_count())
            .finish()
    }
}

impl ProgressBus {
    pub fn new(session_id: impl Into<String>) -> Self {
        let (head, _) = watch::channel(0);
        Self {
            inner: Arc::new(BusInner {
                session_id: session_id.into(),
                log: RwLock::new(EventLog::default()),
                head,
                observers: AtomicUsize::new(0),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Append an event and wake observers.
    ///
    /// Fails once a terminal event has been published.
    pub async fn publish(&self, update: ProgressUpdate) -> Result<ProgressEvent, BusError> {
        let event = {
            let mut log = self.inner.log.write().await;
            if log.closed {
                return Err(BusError::Closed {
                    session_id: self.inner.session_id.clone(),
                });
            }

            let event = ProgressEvent {
                sequence: log.events.len() as u64 + 1,
                event_type: update.event_type,
                stage: update.stage,
                status: update.status,
                message: update.message,
                details: update.details,
                timestamp: Utc::now(),
            };
            log.closed = event.is_terminal();
            log.events.push(event.clone());
            event
        };

        self.inner.head.send_replace(event.sequence);

        tracing::debug!(
            session_id = %self.inner.session_id,
            sequence = event.sequence,
            event_type = event.event_type.as_str(),
            stage = %event.stage,
            "Progress event published"
        );

        Ok(event)
    }

    /// Cursor over the full history followed by live events.
    pub fn subscribe(&self) -> Subscription {
        self.inner.observers.fetch_add(1, Ordering::SeqCst);
        Subscription {
            bus: self.clone(),
            head: self.inner.head.subscribe(),
            cursor: 0,
            finished: false,
        }
    }

    /// Every event published so far.
    pub async fn snapshot(&self) -> Vec<ProgressEvent> {
        self.inner.log.read().await.events.clone()
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.log.read().await.closed
    }

    pub async fn len(&self) -> usize {
        self.inner.log.read().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Live subscriptions that have not been dropped.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.load(Ordering::SeqCst)
    }
}

/// One observer's position in a session's event log.
pub struct Subscription {
    bus: ProgressBus,
    head: watch::Receiver<u64>,
    cursor: usize,
    finished: bool,
}

impl Subscription {
    /// Next event in sequence order, waiting for it if necessary.
    ///
    /// Returns `None` once the terminal event has been yielded.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }

        loop {
            {
                let log = self.bus.inner.log.read().await;
                if let Some(event) = log.events.get(self.cursor) {
                    self.cursor += 1;
                    self.finished = event.is_terminal();
                    return Some(event.clone());
                }
                if log.closed {
                    self.finished = true;
                    return None;
                }
            }

            if self.head.changed().await.is_err() {
                self.finished = true;
                return None;
            }
        }
    }

    pub fn session_id(&self) -> &str {
        self.bus.session_id()
    }

    /// Adapt into a `Stream` ending after the terminal event.
    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            let event = sub.next().await?;
            Some((event, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.inner.observers.fetch_sub(1, Ordering::SeqCst);
    }
}
