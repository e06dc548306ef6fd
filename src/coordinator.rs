//! Stream coordinator.
//!
//! Drives the backfill-then-live lifecycle:
//!
//! ```text
//! IDLE -> BACKFILLING -> LIVE -> (LIVE | ERROR) -> TERMINATED
//! ```
//!
//! Backfill pages through [`PageSource::fetch_page`] until no continuation
//! token is returned, merging each page into the engine. Live delivery then
//! consumes a [`Subscription`] from [`EventSource::subscribe`], pushing each
//! event through the engine exactly once. A transport failure parks the
//! coordinator in `ERROR`; accumulated data stays queryable and
//! [`StreamCoordinator::restart`] resumes where it stopped. Cancellation via
//! [`CoordinatorHandle::shutdown`] ends in `TERMINATED` from any state.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::engine::SharedEngine;
use crate::error::{CoreError, TransportError};

// ---

/// One page of historical records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    /// Continuation token; `None` means the history is exhausted.
    pub next_token: Option<String>,
}

/// Historical backfill collaborator.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, continuation_token: Option<String>) -> Result<Page, TransportError>;
}

/// Item delivered on a live subscription: a raw record or a terminal transport failure.
pub type LiveEvent = Result<Value, TransportError>;

/// Live delivery collaborator.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn subscribe(&self) -> Result<Subscription, TransportError>;
}

/// Receiving half of a live subscription. Dropping or cancelling it stops delivery;
/// the transport sees its sender closed.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::Receiver<LiveEvent>,
}

impl Subscription {
    /// Create a subscription and the sender a transport uses to feed it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<LiveEvent>, Subscription) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Subscription { events: rx })
    }

    pub async fn next(&mut self) -> Option<LiveEvent> {
        self.events.recv().await
    }

    /// Stop delivery. Idempotent.
    pub fn cancel(&mut self) {
        self.events.close();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinatorState {
    Idle,
    Backfilling,
    Live,
    Error,
    Terminated,
}

/// Observable coordinator status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorStatus {
    pub state: CoordinatorState,
    /// Transport failure that moved the coordinator to `ERROR`.
    pub last_error: Option<String>,
    pub pages_fetched: u32,
    pub backfill_complete: bool,
}

impl Default for CoordinatorStatus {
    fn default() -> Self {
        Self {
            state: CoordinatorState::Idle,
            last_error: None,
            pages_fetched: 0,
            backfill_complete: false,
        }
    }
}

/// Cloneable remote control for a running coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    cancel: CancellationToken,
    status: Arc<Mutex<CoordinatorStatus>>,
}

impl CoordinatorHandle {
    pub fn status(&self) -> CoordinatorStatus {
        self.status.lock().clone()
    }

    pub fn state(&self) -> CoordinatorState {
        self.status.lock().state
    }

    /// Request termination. Idempotent and valid from any state. A running
    /// backfill stops requesting pages; a live subscription is released.
    pub fn shutdown(&self) {
        // ---
        self.cancel.cancel();
        let mut status = self.status.lock();
        // Active states are finalized by the run loop once it observes the cancellation.
        if matches!(status.state, CoordinatorState::Idle | CoordinatorState::Error) {
            info!("Coordinator terminated");
            status.state = CoordinatorState::Terminated;
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once [`shutdown`](Self::shutdown) has been requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

enum Halt {
    Cancelled,
    Failed(TransportError),
}

pub struct StreamCoordinator<P, E> {
    engine: SharedEngine,
    pages: P,
    events: E,
    max_pages: Option<u32>,
    cursor: Option<String>,
    handle: CoordinatorHandle,
}

impl<P, E> StreamCoordinator<P, E>
where
    P: PageSource,
    E: EventSource,
{
    // ---
    pub fn new(engine: SharedEngine, pages: P, events: E) -> Self {
        Self {
            engine,
            pages,
            events,
            max_pages: None,
            cursor: None,
            handle: CoordinatorHandle {
                cancel: CancellationToken::new(),
                status: Arc::new(Mutex::new(CoordinatorStatus::default())),
            },
        }
    }

    /// Stop backfill after this many pages even if more are offered.
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    pub fn engine(&self) -> SharedEngine {
        self.engine.clone()
    }

    pub fn status(&self) -> CoordinatorStatus {
        self.handle.status()
    }

    pub fn state(&self) -> CoordinatorState {
        self.handle.state()
    }

    pub fn shutdown(&self) {
        self.handle.shutdown();
    }

    /// Start from `IDLE`: backfill to exhaustion, then ingest live events until
    /// a transport failure (`ERROR`) or shutdown (`TERMINATED`).
    pub async fn run(&mut self) -> Result<CoordinatorState, CoreError> {
        // ---
        match self.state() {
            CoordinatorState::Idle => self.drive().await,
            CoordinatorState::Terminated => Ok(CoordinatorState::Terminated),
            other => Err(CoreError::InvalidState(format!(
                "run requires IDLE, coordinator is {other:?}"
            ))),
        }
    }

    /// Leave `ERROR` and resume: unfinished backfill continues from its last
    /// continuation token, otherwise live delivery is resubscribed.
    pub async fn restart(&mut self) -> Result<CoordinatorState, CoreError> {
        // ---
        match self.state() {
            CoordinatorState::Error => {
                info!("Restarting coordinator");
                self.handle.status.lock().last_error = None;
                self.drive().await
            }
            CoordinatorState::Terminated => Ok(CoordinatorState::Terminated),
            other => Err(CoreError::InvalidState(format!(
                "restart requires ERROR, coordinator is {other:?}"
            ))),
        }
    }

    async fn drive(&mut self) -> Result<CoordinatorState, CoreError> {
        // ---
        let result = match self.backfill().await {
            Ok(()) => self.live().await,
            Err(halt) => Err(halt),
        };

        match result {
            Ok(()) | Err(Halt::Cancelled) => self.finish_terminated(),
            Err(Halt::Failed(e)) => self.finish_error(e),
        }

        Ok(self.state())
    }

    #[instrument(name = "backfill", skip(self))]
    async fn backfill(&mut self) -> Result<(), Halt> {
        // ---
        if self.handle.status.lock().backfill_complete {
            return Ok(());
        }
        if !self.transition(CoordinatorState::Backfilling) {
            return Err(Halt::Cancelled);
        }

        loop {
            let fetched = self.handle.status.lock().pages_fetched;
            if self.max_pages.is_some_and(|max| fetched >= max) {
                info!(
                    "Hit page limit of {}, stopping backfill with more pages available",
                    fetched
                );
                break;
            }

            debug!("Fetching page {} (token: {:?})", fetched + 1, self.cursor);

            let cancel = self.handle.cancel.clone();
            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Halt::Cancelled),
                page = self.pages.fetch_page(self.cursor.clone()) => page.map_err(Halt::Failed)?,
            };

            let next_token = page.next_token;
            let summary = self.engine.write().ingest_raw_page(page.items, Utc::now());
            debug!(
                "Page {}: {} received, {} accepted, {} duplicate, {} malformed",
                fetched + 1,
                summary.received,
                summary.accepted,
                summary.duplicates,
                summary.malformed
            );

            self.handle.status.lock().pages_fetched += 1;
            self.cursor = next_token;
            if self.cursor.is_none() {
                break;
            }
        }

        let accepted = self.engine.read().stats().accepted;
        let mut status = self.handle.status.lock();
        status.backfill_complete = true;
        info!(
            "Backfill complete after {} pages, {} readings accepted",
            status.pages_fetched, accepted
        );
        Ok(())
    }

    #[instrument(name = "live", skip(self))]
    async fn live(&mut self) -> Result<(), Halt> {
        // ---
        let cancel = self.handle.cancel.clone();

        let mut subscription = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Halt::Cancelled),
            sub = self.events.subscribe() => sub.map_err(Halt::Failed)?,
        };

        if !self.transition(CoordinatorState::Live) {
            subscription.cancel();
            return Err(Halt::Cancelled);
        }
        info!("Live subscription established");

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    subscription.cancel();
                    return Err(Halt::Cancelled);
                }
                event = subscription.next() => event,
            };

            match event {
                Some(Ok(raw)) => {
                    // Malformed events are counted and logged by the engine.
                    let _ = self.engine.write().ingest_raw(raw, Utc::now());
                }
                Some(Err(e)) => {
                    subscription.cancel();
                    return Err(Halt::Failed(e));
                }
                None => return Err(Halt::Failed(TransportError::Closed)),
            }
        }
    }

    /// Move to `to` unless already terminated.
    fn transition(&self, to: CoordinatorState) -> bool {
        let mut status = self.handle.status.lock();
        if status.state == CoordinatorState::Terminated || self.handle.cancel.is_cancelled() {
            return false;
        }
        debug!("Coordinator {:?} -> {:?}", status.state, to);
        status.state = to;
        true
    }

    fn finish_error(&self, err: TransportError) {
        // ---
        let mut status = self.handle.status.lock();
        if status.state == CoordinatorState::Terminated {
            return;
        }
        if self.handle.cancel.is_cancelled() {
            status.state = CoordinatorState::Terminated;
            return;
        }
        error!("Transport failure in {:?}: {}", status.state, err);
        status.state = CoordinatorState::Error;
        status.last_error = Some(err.to_string());
    }

    fn finish_terminated(&self) {
        let mut status = self.handle.status.lock();
        if status.state != CoordinatorState::Terminated {
            info!("Coordinator terminated");
            status.state = CoordinatorState::Terminated;
        }
    }
}
