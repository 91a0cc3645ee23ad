//! Writer thread: drains the write queue into the channel databases.
//!
//! The writer is the single mutator of the archive files. It creates
//! databases lazily on the first record for a channel, enforces the
//! monotonic-timestamp invariant, and absorbs per-record I/O failures so
//! one broken file never stalls the queue.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::channel::DataRecord;
use crate::health::Health;
use crate::queue::QueueConsumer;
use crate::store::ArchiveStore;

/// Drains write records into the archive store.
#[derive(Debug)]
pub struct Writer {
    store: Arc<ArchiveStore>,
    health: Arc<Health>,
}

impl Writer {
    /// Creates a writer over `store`.
    pub fn new(store: Arc<ArchiveStore>, health: Arc<Health>) -> Self {
        Self { store, health }
    }

    /// Runs the drain loop until every producer is gone and the queue is
    /// empty.
    pub fn run(&self, queue: QueueConsumer) {
        while let Some(record) = queue.recv() {
            self.process(&record);
        }
        debug!("write queue closed, writer exiting");
    }

    /// Persists one record.
    ///
    /// A record older than the channel's last update is dropped and
    /// counted; one at exactly the last update rewrites the newest slot,
    /// which is how hour-aligned counter records are refreshed within the
    /// hour.
    pub fn process(&self, record: &DataRecord) {
        let db = match self.store.get_or_create(&record.address, record.unit) {
            Ok(db) => db,
            Err(e) => {
                self.health.mark_unable_to_insert();
                warn!(channel = %record.address, error = %e, "cannot open channel database");
                return;
            }
        };

        let mut db = db.lock();
        match db.last_update() {
            Some(last) if record.timestamp < last => {
                self.health.count_out_of_order();
                debug!(
                    channel = %record.address,
                    timestamp = record.timestamp,
                    last,
                    "dropping out-of-order record"
                );
            }
            Some(last) if record.timestamp == last => {
                db.overwrite(record.timestamp, record.value);
            }
            _ => db.append(record.timestamp, record.value),
        }
    }
}
