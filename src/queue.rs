//! Bounded handoff queue between the collector and the writer thread.
//!
//! The collector runs on the sampling cadence and must never block on disk
//! I/O, so records are handed to the writer through a bounded channel with a
//! non-blocking offer. When the writer cannot keep up the queue fills and
//! further records are shed; the loss is surfaced through the health flags
//! rather than propagated as an error.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::channel::DataRecord;

/// Producer half of the write queue, held by the collector.
#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: Sender<DataRecord>,
}

/// Consumer half of the write queue, held by the writer thread.
#[derive(Debug)]
pub struct QueueConsumer {
    rx: Receiver<DataRecord>,
}

/// Creates a bounded write queue with the given capacity.
pub fn write_queue(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = bounded(capacity);
    (QueueProducer { tx }, QueueConsumer { rx })
}

impl QueueProducer {
    /// Offers a record without blocking. Returns `false` if the queue is
    /// full or the writer has shut down; the record is dropped in that case.
    pub fn offer(&self, record: DataRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => false,
        }
    }

    /// Number of records currently queued.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// Returns `true` if no records are queued.
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl QueueConsumer {
    /// Blocks until the next record is available. Returns `None` once every
    /// producer has been dropped and the queue is drained, which is the
    /// writer's shutdown signal.
    pub fn recv(&self) -> Option<DataRecord> {
        self.rx.recv().ok()
    }
}
