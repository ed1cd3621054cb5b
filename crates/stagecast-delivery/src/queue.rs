//! Bounded FIFO buffer between event producers and the dispatcher.
//!
//! Any number of producer threads may enqueue concurrently; a single
//! dispatcher dequeues. Enqueue never waits: a full queue rejects the event
//! and the caller gets `false` back immediately.

use std::time::Duration;

use stagecast_core::{DeliverySettings, StageEvent};
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Mutex,
};

/// Bounded multi-producer, single-consumer event queue.
///
/// Capacity is fixed at construction. Changing the configured queue size
/// afterwards does not resize an existing queue.
///
/// The bound covers events not yet dispatched. A running dispatcher hands
/// events to the worker pool as fast as it dequeues them, and the pool
/// holds tasks waiting for a worker without limit, so while the service
/// runs a slow collector grows the pool backlog rather than this queue.
#[derive(Debug)]
pub struct DeliveryQueue {
    sender: mpsc::Sender<StageEvent>,
    receiver: Mutex<mpsc::Receiver<StageEvent>>,
    capacity: usize,
}

impl DeliveryQueue {
    /// Creates a queue holding at most `capacity` events (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self { sender, receiver: Mutex::new(receiver), capacity }
    }

    /// Creates a queue sized from the settings snapshot taken now.
    pub fn from_settings(settings: &DeliverySettings) -> Self {
        Self::new(settings.max_queue_size)
    }

    /// Appends an event at the tail.
    ///
    /// Returns `false` without blocking when the queue is full.
    pub fn enqueue(&self, event: StageEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Closed(_)) => false,
        }
    }

    /// Takes the oldest event, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` when the timeout elapses with the queue still empty.
    pub async fn dequeue(&self, timeout: Duration) -> Option<StageEvent> {
        tokio::time::timeout(timeout, async {
            let mut receiver = self.receiver.lock().await;
            receiver.recv().await
        })
        .await
        .ok()
        .flatten()
    }

    /// Number of events currently buffered.
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Whether no events are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of buffered events.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
