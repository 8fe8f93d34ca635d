//! Persistence workers.
//!
//! One OS thread and one unbounded queue per structural group. Workers batch
//! rows and write each batch in a single store call once it exceeds
//! `flush_interval × sampling_rate` rows. After the stop signal a worker
//! drains its queue to empty, writes the remainder and exits.
//!
//! A failed write is fatal to that worker only: it logs the error, marks
//! its queue closed and counts every row still queued or arriving later as
//! lost. The producer sees the closed queue and stops enqueuing for that
//! group.

use crate::config::defaults;
use crate::storage::SensorStore;
use crate::types::{MeasurementRow, StructuralGroup};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Worker batching and polling parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriterSettings {
    /// Target time covered by one batch
    pub flush_interval: Duration,
    /// Queue poll timeout; bounds how long a worker takes to notice the stop signal
    pub dequeue_timeout: Duration,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs_f64(defaults::FLUSH_INTERVAL_SECS),
            dequeue_timeout: Duration::from_millis(defaults::DEQUEUE_TIMEOUT_MS),
        }
    }
}

/// Batch size a worker must exceed before writing.
///
/// Without a known sampling rate the threshold is zero and every row is
/// written as it arrives.
pub fn batch_threshold(sampling_rate: Option<u32>, flush_interval: Duration) -> f64 {
    sampling_rate.map_or(0.0, |rate| f64::from(rate) * flush_interval.as_secs_f64())
}

/// Outcome of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterReport {
    pub group: StructuralGroup,
    pub rows_written: usize,
    pub rows_lost: usize,
    pub batches: usize,
    pub error: Option<String>,
}

impl WriterReport {
    const fn new(group: StructuralGroup) -> Self {
        Self {
            group,
            rows_written: 0,
            rows_lost: 0,
            batches: 0,
            error: None,
        }
    }
}

struct Writer {
    group: StructuralGroup,
    sender: Option<Sender<MeasurementRow>>,
    failed: Arc<AtomicBool>,
    thread: JoinHandle<WriterReport>,
}

/// The set of running workers for one recording session.
pub struct WriterPool {
    recording: Arc<AtomicBool>,
    writers: Vec<Writer>,
    closed: HashSet<StructuralGroup>,
    rows_refused: usize,
}

impl WriterPool {
    /// Spawn one worker per group.
    pub fn start(
        groups: &[StructuralGroup],
        store: &Arc<dyn SensorStore>,
        settings: WriterSettings,
        sampling_rate: Option<u32>,
    ) -> std::io::Result<Self> {
        let threshold = batch_threshold(sampling_rate, settings.flush_interval);
        let mut pool = Self {
            recording: Arc::new(AtomicBool::new(true)),
            writers: Vec::with_capacity(groups.len()),
            closed: HashSet::new(),
            rows_refused: 0,
        };

        for group in groups {
            let group = *group;
            let (sender, receiver) = unbounded();
            let failed = Arc::new(AtomicBool::new(false));
            let worker = WorkerContext {
                group,
                recording: Arc::clone(&pool.recording),
                failed: Arc::clone(&failed),
                store: Arc::clone(store),
                threshold,
                timeout: settings.dequeue_timeout,
            };

            let spawned = std::thread::Builder::new()
                .name(format!("writer-{group}"))
                .spawn(move || run_writer(&worker, &receiver));

            match spawned {
                Ok(thread) => pool.writers.push(Writer {
                    group,
                    sender: Some(sender),
                    failed,
                    thread,
                }),
                Err(e) => {
                    tracing::error!(group = %group, error = %e, "Failed to spawn writer thread");
                    pool.join();
                    return Err(e);
                }
            }
        }

        tracing::info!(
            writers = pool.writers.len(),
            batch_threshold = threshold,
            backend = store.backend_name(),
            "Started writer threads"
        );
        Ok(pool)
    }

    pub fn groups(&self) -> impl Iterator<Item = StructuralGroup> + '_ {
        self.writers.iter().map(|w| w.group)
    }

    /// Queue a row for `group`. Never blocks.
    ///
    /// Returns `false` when the group has no live worker.
    pub fn enqueue(&mut self, group: StructuralGroup, row: MeasurementRow) -> bool {
        if self.closed.contains(&group) {
            self.rows_refused += 1;
            return false;
        }
        let Some(writer) = self.writers.iter().find(|w| w.group == group) else {
            return false;
        };
        let sent = match &writer.sender {
            Some(sender) if !writer.failed.load(Ordering::Acquire) => sender.send(row).is_ok(),
            _ => false,
        };
        if sent {
            return true;
        }
        tracing::error!(group = %group, "Writer for group has stopped; no longer enqueuing its rows");
        self.closed.insert(group);
        self.rows_refused += 1;
        false
    }

    /// Rows the producer could not hand to a stopped worker.
    pub const fn rows_refused(&self) -> usize {
        self.rows_refused
    }

    /// Tell workers to drain and exit.
    pub fn signal_stop(&self) {
        self.recording.store(false, Ordering::Release);
    }

    /// Stop every worker and wait for it to finish draining.
    pub fn join(&mut self) -> Vec<WriterReport> {
        for writer in &mut self.writers {
            writer.sender.take();
        }
        self.signal_stop();

        tracing::info!("Waiting for writer threads to join");
        let reports: Vec<WriterReport> = self
            .writers
            .drain(..)
            .map(|writer| {
                writer.thread.join().unwrap_or_else(|_| {
                    tracing::error!(group = %writer.group, "Writer thread panicked");
                    WriterReport {
                        error: Some("writer thread panicked".to_string()),
                        ..WriterReport::new(writer.group)
                    }
                })
            })
            .collect();
        tracing::info!("Writer threads joined");
        reports
    }

    /// [`join`](Self::join) without blocking the async runtime.
    pub async fn shutdown(mut self) -> Vec<WriterReport> {
        match tokio::task::spawn_blocking(move || self.join()).await {
            Ok(reports) => reports,
            Err(e) => {
                tracing::error!(error = %e, "Writer join task failed");
                Vec::new()
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !self.writers.is_empty()
    }
}

impl Drop for WriterPool {
    fn drop(&mut self) {
        if self.is_running() {
            self.join();
        }
    }
}

struct WorkerContext {
    group: StructuralGroup,
    recording: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    store: Arc<dyn SensorStore>,
    threshold: f64,
    timeout: Duration,
}

fn run_writer(ctx: &WorkerContext, receiver: &Receiver<MeasurementRow>) -> WriterReport {
    let mut report = WriterReport::new(ctx.group);
    let mut batch: Vec<MeasurementRow> = Vec::new();

    while ctx.recording.load(Ordering::Acquire) || !receiver.is_empty() {
        match receiver.recv_timeout(ctx.timeout) {
            Ok(row) => batch.push(row),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }

        #[allow(clippy::cast_precision_loss)]
        let pending = batch.len() as f64;
        if pending > ctx.threshold && !flush(ctx, &mut batch, &mut report, receiver) {
            return report;
        }
    }

    if !batch.is_empty() {
        flush(ctx, &mut batch, &mut report, receiver);
    }
    tracing::debug!(
        group = %ctx.group,
        rows = report.rows_written,
        batches = report.batches,
        "Writer finished"
    );
    report
}

/// Write `batch`. On failure, close the queue, count the loss and return `false`.
///
/// A failed worker keeps receiving until every sender is gone so rows
/// already in flight are counted rather than silently dropped.
fn flush(
    ctx: &WorkerContext,
    batch: &mut Vec<MeasurementRow>,
    report: &mut WriterReport,
    receiver: &Receiver<MeasurementRow>,
) -> bool {
    match ctx.store.write_measurements(ctx.group, batch) {
        Ok(()) => {
            report.rows_written += batch.len();
            report.batches += 1;
            batch.clear();
            true
        }
        Err(e) => {
            ctx.failed.store(true, Ordering::Release);
            tracing::error!(
                group = %ctx.group,
                error = %e,
                rows = batch.len(),
                "Writer failed; stopping"
            );
            report.rows_lost += batch.len() + receiver.iter().count();
            report.error = Some(e.to_string());
            batch.clear();
            false
        }
    }
}
