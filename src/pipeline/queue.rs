//! Bounded batch queue between loader workers and the consumer.
//!
//! Backed by a bounded crossbeam channel: `put` blocks while the queue is
//! full, `get` blocks while it is empty. Each worker generation gets a fresh
//! queue, so a disconnected queue means every producer is gone.

use crate::error::SeqfeedError;
use crate::pipeline::types::Batch;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, bounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// What a worker can push.
#[derive(Debug)]
pub enum QueueItem {
    Batch(Batch),
    /// Sentinel: the sending worker found the store exhausted and exits.
    Exhausted,
    /// The sending worker hit a fatal error and exits.
    Failed(SeqfeedError),
}

/// Create a queue holding at most `capacity` items.
pub fn batch_queue(capacity: usize, poll_interval: Duration) -> (BatchProducer, BatchConsumer) {
    let (tx, rx) = bounded(capacity);
    (
        BatchProducer { tx, poll_interval },
        BatchConsumer { rx, capacity },
    )
}

#[derive(Debug, Clone)]
pub struct BatchProducer {
    tx: Sender<QueueItem>,
    poll_interval: Duration,
}

impl BatchProducer {
    /// Push an item, blocking while the queue is full.
    ///
    /// Returns `false` without sending if `cancel` is raised while waiting or
    /// the consumer is gone.
    pub fn put(&self, item: QueueItem, cancel: &AtomicBool) -> bool {
        let mut item = item;
        loop {
            if cancel.load(Ordering::Acquire) {
                return false;
            }
            match self.tx.send_timeout(item, self.poll_interval) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(back)) => item = back,
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}

#[derive(Debug)]
pub struct BatchConsumer {
    rx: Receiver<QueueItem>,
    capacity: usize,
}

impl BatchConsumer {
    /// Pop the next item, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue is empty and every producer is dropped.
    pub fn get(&self) -> Option<QueueItem> {
        self.rx.recv().ok()
    }

    /// Discard everything currently queued. Returns the number of items dropped.
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
