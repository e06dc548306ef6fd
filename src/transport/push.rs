//! Live readings pushed over HTTP.
//!
//! The backend (or a bridge in front of it) POSTs new readings to the service;
//! the `/events` route hands them to [`PushSource::push`]. The channel exists
//! before anyone subscribes: readings pushed while the coordinator is still
//! backfilling, or waiting to restart after a failure, are buffered and handed
//! over with the next subscription. Subscribing while a subscription is already
//! out replaces it.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::coordinator::{EventSource, LiveEvent, Subscription};
use crate::error::TransportError;

// ---

pub const DEFAULT_PUSH_CAPACITY: usize = 256;

#[derive(Debug)]
struct Channel {
    tx: mpsc::Sender<LiveEvent>,
    /// Receiver not yet claimed by a subscriber.
    parked: Option<Subscription>,
}

impl Channel {
    fn open(capacity: usize) -> Self {
        let (tx, subscription) = Subscription::channel(capacity);
        Self {
            tx,
            parked: Some(subscription),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PushSource {
    channel: Arc<Mutex<Channel>>,
    capacity: usize,
}

impl Default for PushSource {
    fn default() -> Self {
        Self::new(DEFAULT_PUSH_CAPACITY)
    }
}

impl PushSource {
    // ---
    pub fn new(capacity: usize) -> Self {
        Self {
            channel: Arc::new(Mutex::new(Channel::open(capacity))),
            capacity,
        }
    }

    /// Deliver one raw record. Waits while the buffer is full.
    pub async fn push(&self, raw: Value) -> Result<(), TransportError> {
        self.send(Ok(raw)).await
    }

    /// Report a terminal failure to the subscriber.
    pub async fn fail(&self, err: TransportError) -> Result<(), TransportError> {
        self.send(Err(err)).await
    }

    /// Number of events waiting for a subscriber to claim them.
    pub fn buffered(&self) -> usize {
        let channel = self.channel.lock();
        match channel.parked {
            Some(_) => self.capacity.max(1) - channel.tx.capacity(),
            None => 0,
        }
    }

    async fn send(&self, event: LiveEvent) -> Result<(), TransportError> {
        // ---
        let tx = {
            let mut channel = self.channel.lock();
            // The previous subscriber went away; buffer for the next one.
            if channel.tx.is_closed() {
                *channel = Channel::open(self.capacity);
            }
            channel.tx.clone()
        };
        tx.send(event).await.map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl EventSource for PushSource {
    async fn subscribe(&self) -> Result<Subscription, TransportError> {
        let mut channel = self.channel.lock();
        if channel.parked.is_none() {
            *channel = Channel::open(self.capacity);
        }
        channel.parked.take().ok_or(TransportError::Closed)
    }
}
