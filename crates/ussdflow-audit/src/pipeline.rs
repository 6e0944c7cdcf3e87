//! Batch writer and crash-recovery scanner.
//!
//! Two long-lived background tasks share the process lifetime: the batch
//! writer flushes the enqueue channel into the store on a timer or a
//! high-water mark, spilling failed batches to disk; the recovery scanner
//! replays spill files with conflict-ignoring inserts. Only the writer
//! drains or resizes the channel; producers clone the current sender from
//! a shared slot.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use ussdflow_core::config::AuditConfig;

use crate::record::AuditRecord;
use crate::spill::SpillDir;
use crate::store::AuditStore;

type SenderSlot = Arc<RwLock<mpsc::Sender<AuditRecord>>>;

/// Cheap cloneable enqueue handle for request callers.
#[derive(Clone)]
pub struct AuditLogger {
    tx: SenderSlot,
    shutdown: watch::Receiver<bool>,
}

impl AuditLogger {
    /// Queue a record for bulk insertion.
    ///
    /// Blocks (asynchronously) while the channel is full so load never
    /// causes silent loss; a signaled shutdown drops the entry instead,
    /// the one documented loss mode. Errors never reach the caller.
    pub async fn enqueue(&self, record: AuditRecord) {
        if *self.shutdown.borrow() {
            warn!("audit entry dropped: pipeline shut down");
            return;
        }

        let sender = match self.tx.read() {
            Ok(slot) => slot.clone(),
            Err(_) => {
                warn!("audit entry dropped: sender slot poisoned");
                return;
            }
        };

        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = shutdown.changed() => {
                warn!("audit entry dropped: shutdown during enqueue");
            }
            res = sender.send(record) => {
                if res.is_err() {
                    // The writer swapped the channel while we held the old
                    // sender; the batch it drained did not include us.
                    warn!("audit entry dropped: channel replaced mid-send");
                }
            }
        }
    }
}

/// Owns the two background tasks and the shutdown signal.
pub struct AuditPipeline {
    logger: AuditLogger,
    shutdown: watch::Sender<bool>,
    writer: JoinHandle<()>,
    scanner: JoinHandle<()>,
}

impl AuditPipeline {
    /// Start the batch writer and recovery scanner. Called exactly once
    /// per process; both tasks run until [`AuditPipeline::shutdown`].
    pub fn start(store: Arc<dyn AuditStore>, config: &AuditConfig) -> Self {
        let capacity = config.channel_capacity.max(2);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(capacity);
        let slot: SenderSlot = Arc::new(RwLock::new(tx));
        let spill = SpillDir::new(&config.spill_dir);

        let writer = BatchWriter {
            store: Arc::clone(&store),
            spill: spill.clone(),
            slot: Arc::clone(&slot),
            rx,
            capacity,
            batch: Vec::with_capacity(capacity),
        };
        let writer = tokio::spawn(writer.run(
            Duration::from_secs(config.flush_interval_secs.max(1)),
            shutdown_rx.clone(),
        ));

        let scanner = RecoveryScanner {
            store,
            spill,
            chunk_size: config.chunk_size.max(1),
        };
        let scanner = tokio::spawn(scanner.run(
            Duration::from_secs(config.scan_interval_secs.max(1)),
            shutdown_rx.clone(),
        ));

        Self {
            logger: AuditLogger {
                tx: slot,
                shutdown: shutdown_rx,
            },
            shutdown: shutdown_tx,
            writer,
            scanner,
        }
    }

    pub fn logger(&self) -> AuditLogger {
        self.logger.clone()
    }

    /// Signal shutdown and wait for both tasks to stop. In-flight entries
    /// are flushed best-effort; entries still being enqueued may be lost.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.writer.await;
        let _ = self.scanner.await;
    }
}

struct BatchWriter {
    store: Arc<dyn AuditStore>,
    spill: SpillDir,
    slot: SenderSlot,
    rx: mpsc::Receiver<AuditRecord>,
    capacity: usize,
    batch: Vec<AuditRecord>,
}

impl BatchWriter {
    async fn run(mut self, flush_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(flush_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    while let Ok(record) = self.rx.try_recv() {
                        self.batch.push(record);
                    }
                    if !self.batch.is_empty() {
                        self.flush().await;
                    }
                    info!("audit batch writer stopped");
                    return;
                }
                _ = interval.tick() => {
                    if !self.batch.is_empty() {
                        self.flush().await;
                    }
                }
                maybe = self.rx.recv() => {
                    match maybe {
                        Some(record) => {
                            self.batch.push(record);
                            if self.batch.len() >= self.high_water() {
                                self.flush().await;
                                interval.reset();
                            }
                        }
                        None => {
                            info!("audit channel closed, batch writer stopping");
                            return;
                        }
                    }
                }
            }
        }
    }

    fn high_water(&self) -> usize {
        self.capacity.saturating_sub(1).max(1)
    }

    async fn flush(&mut self) {
        let rows = self.batch.len();
        match self.store.insert_batch(&self.batch).await {
            Ok(()) => {
                info!(rows, "audit batch inserted");
                self.batch.clear();
                self.maybe_grow();
            }
            Err(e) => {
                error!(error = %e, rows, "audit batch insert failed, spilling to disk");
                match self.spill.write(&self.batch) {
                    Ok(path) => {
                        warn!(file = %path.display(), rows, "audit batch spilled")
                    }
                    Err(e) => {
                        error!(error = %e, rows, "spill write failed, audit batch dropped")
                    }
                }
                // Recovery is delegated entirely to the scanner; the batch
                // is cleared regardless of the spill outcome.
                self.batch.clear();
            }
        }
    }

    /// After a successful flush: if producers filled the channel while we
    /// were busy, drain it into the batch and reallocate at 1.5x. The
    /// capacity grows monotonically, never shrinks.
    fn maybe_grow(&mut self) {
        if self.rx.len() < self.capacity {
            return;
        }

        while let Ok(record) = self.rx.try_recv() {
            self.batch.push(record);
        }

        let capacity = self.capacity + self.capacity / 2;
        let (tx, rx) = mpsc::channel(capacity);
        match self.slot.write() {
            Ok(mut slot) => *slot = tx,
            Err(_) => {
                warn!("sender slot poisoned, keeping current channel");
                return;
            }
        }
        self.rx = rx;
        self.capacity = capacity;
        info!(capacity, "audit channel drained and expanded");
    }
}

/// Per-file replay outcome. Files that cannot be committed are left in
/// place for the next pass.
enum FileOutcome {
    Committed(usize),
    RetryLater,
}

struct RecoveryScanner {
    store: Arc<dyn AuditStore>,
    spill: SpillDir,
    chunk_size: usize,
}

impl RecoveryScanner {
    async fn run(self, scan_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let start = tokio::time::Instant::now() + scan_interval;
        let mut interval = tokio::time::interval_at(start, scan_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("audit recovery scanner stopped");
                    return;
                }
                _ = interval.tick() => self.scan().await,
            }
        }
    }

    async fn scan(&self) {
        let files = match self.spill.list() {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "failed to list spill directory");
                return;
            }
        };

        for path in files {
            match self.recover_file(&path).await {
                FileOutcome::Committed(rows) => {
                    info!(file = %path.display(), rows, "spill file replayed")
                }
                FileOutcome::RetryLater => {}
            }
        }
    }

    async fn recover_file(&self, path: &Path) -> FileOutcome {
        let records = match self.spill.read(path) {
            Ok(records) => records,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "failed to read spill file");
                return FileOutcome::RetryLater;
            }
        };

        if let Err(e) = self
            .store
            .insert_ignore_conflicts(&records, self.chunk_size)
            .await
        {
            warn!(file = %path.display(), error = %e, "failed to replay spill file");
            return FileOutcome::RetryLater;
        }

        // A crash before this delete re-inserts the file on the next pass;
        // the conflict-ignoring insert makes that harmless.
        if let Err(e) = self.spill.remove(path) {
            warn!(file = %path.display(), error = %e, "failed to remove replayed spill file");
            return FileOutcome::RetryLater;
        }

        FileOutcome::Committed(records.len())
    }
}
