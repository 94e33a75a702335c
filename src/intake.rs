//! Bounded intake queue between the wire-protocol receive path and the driver loop.
//!
//! The receive path holds an [`IntakeProducer`] and only ever calls the non-blocking
//! [`IntakeProducer::offer`]. The driver loop owns the [`IntakeQueue`] and drains it
//! with [`IntakeQueue::poll`].
//!
//! When the queue is full the *incoming* item is rejected and counted; everything
//! already queued is kept, so accepted samples stay chronologically contiguous.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::record::RawPacket;

/// Default number of packets buffered between receive path and driver loop.
pub const DEFAULT_INTAKE_CAPACITY: usize = 100;

/// Result of a single `offer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// Item queued.
    Accepted,
    /// Queue at capacity, item dropped.
    Dropped,
    /// Consumer gone (shutdown in progress), item dropped.
    Closed,
}

/// Producer half of the intake queue. Cheap to clone.
#[derive(Debug)]
pub struct IntakeProducer<T = RawPacket> {
    sender: mpsc::Sender<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for IntakeProducer<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl<T> IntakeProducer<T> {
    /// Queue `item` without blocking.
    pub fn offer(&self, item: T) -> OfferOutcome {
        match self.sender.try_send(item) {
            Ok(()) => OfferOutcome::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                OfferOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => OfferOutcome::Closed,
        }
    }

    /// Number of items rejected because the queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer half of the intake queue.
#[derive(Debug)]
pub struct IntakeQueue<T = RawPacket> {
    receiver: mpsc::Receiver<T>,
    producer: IntakeProducer<T>,
    capacity: usize,
}

impl<T> IntakeQueue<T> {
    /// Create a queue holding at most `capacity` items (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            receiver,
            producer: IntakeProducer {
                sender,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            capacity,
        }
    }

    /// Handle for the receive path.
    pub fn producer(&self) -> IntakeProducer<T> {
        self.producer.clone()
    }

    /// Queue `item` without blocking; same as [`IntakeProducer::offer`].
    pub fn offer(&self, item: T) -> OfferOutcome {
        self.producer.offer(item)
    }

    /// Oldest queued item, or `None` when nothing is waiting.
    pub fn poll(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Items currently waiting.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// `true` when nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Fixed capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items rejected because the queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.producer.dropped_count()
    }
}
