//! Service facade tying collector, queue, writer and query engine together.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{info, warn};

use crate::channel::DataRecord;
use crate::collector::{ChannelSource, Collector};
use crate::config::Config;
use crate::health::Health;
use crate::queue::{QueueProducer, write_queue};
use crate::read::QueryEngine;
use crate::store::ArchiveStore;
use crate::writer::Writer;

/// Running persistence service: an archive store with a background writer
/// thread draining the write queue.
///
/// Ingest happens either through a [`Collector`] built by
/// [`TimedataService::collector`] or by submitting records directly.
/// Queries go through [`TimedataService::query`]. Shutting down closes the
/// queue, joins the writer and flushes every open database.
#[derive(Debug)]
pub struct TimedataService {
    store: Arc<ArchiveStore>,
    health: Arc<Health>,
    query: QueryEngine,
    producer: Option<QueueProducer>,
    writer_thread: Option<JoinHandle<()>>,
}

impl TimedataService {
    /// Opens the store and starts the writer thread.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::StoreError`] if the store directory cannot
    /// be prepared.
    pub fn start(config: &Config) -> crate::error::Result<Self> {
        let store = Arc::new(ArchiveStore::open(config)?);
        let health = Arc::new(Health::new());
        let (producer, consumer) = write_queue(config.queue_capacity);

        let writer = Writer::new(Arc::clone(&store), Arc::clone(&health));
        let writer_thread = std::thread::spawn(move || writer.run(consumer));
        info!(
            data_dir = %store.root().display(),
            step = config.step_seconds,
            "persistence service started"
        );

        Ok(Self {
            query: QueryEngine::new(Arc::clone(&store)),
            store,
            health,
            producer: Some(producer),
            writer_thread: Some(writer_thread),
        })
    }

    /// Builds a collector over `source` feeding this service's queue.
    ///
    /// The collector holds its own handle on the queue; drop it before
    /// calling [`TimedataService::shutdown`] so the writer can observe the
    /// queue closing.
    pub fn collector<S: ChannelSource>(&self, source: S, config: &Config) -> Collector<S> {
        let producer = match &self.producer {
            Some(producer) => producer.clone(),
            // Unreachable through the public API: the producer is only
            // taken on shutdown, which consumes the service.
            None => write_queue(1).0,
        };
        Collector::new(source, producer, Arc::clone(&self.health), config)
    }

    /// Submits one record directly, bypassing the collector. Returns
    /// `false` and flags the loss if the queue is full.
    pub fn submit(&self, record: DataRecord) -> bool {
        let Some(producer) = &self.producer else {
            return false;
        };
        let accepted = producer.offer(record);
        if !accepted {
            self.health.mark_queue_full();
        }
        accepted
    }

    /// Returns the query engine.
    pub fn query(&self) -> &QueryEngine {
        &self.query
    }

    /// Returns the shared health state.
    pub fn health(&self) -> &Health {
        &self.health
    }

    /// Returns the archive store.
    pub fn store(&self) -> &Arc<ArchiveStore> {
        &self.store
    }

    /// Closes the queue, waits for the writer to drain it, and flushes all
    /// open databases.
    ///
    /// # Errors
    ///
    /// Returns the first flush failure; the writer is joined regardless.
    pub fn shutdown(mut self) -> crate::error::Result<()> {
        self.close();
        self.store.flush_all()
    }

    fn close(&mut self) {
        drop(self.producer.take());
        if let Some(handle) = self.writer_thread.take()
            && handle.join().is_err()
        {
            warn!("writer thread panicked");
        }
    }
}

impl Drop for TimedataService {
    fn drop(&mut self) {
        self.close();
    }
}
