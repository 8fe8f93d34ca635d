//! Recording session: frames in, one row per group out.
//!
//! A [`RecordingSession`] owns the writer pool and the live status marker for
//! the duration of one recording. [`pump_frames`] drives a [`FrameSource`]
//! until end of stream or cancellation, mapping every frame against the
//! current sensor snapshot.

use super::source::{FrameEvent, FrameSource};
use super::writer::{WriterPool, WriterReport, WriterSettings};
use crate::mapping::{MappingSnapshot, SensorMapper};
use crate::storage::{SensorStore, StatusPublisher};
use crate::types::{LiveStatus, MeasurementRow, PeakFrame, SetupOption};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Why the frame loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    Cancelled,
    SourceError(String),
}

/// Totals for one recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    pub setup: SetupOption,
    pub stop: StopReason,
    pub frames: u64,
    pub rows_enqueued: u64,
    /// Rows dropped because their group's writer had already failed
    pub rows_refused: usize,
    pub writers: Vec<WriterReport>,
    /// Bytes left on the streaming socket at teardown
    pub drained_bytes: usize,
}

impl RecordingSummary {
    pub fn rows_written(&self) -> usize {
        self.writers.iter().map(|w| w.rows_written).sum()
    }

    pub fn rows_lost(&self) -> usize {
        self.writers.iter().map(|w| w.rows_lost).sum::<usize>() + self.rows_refused
    }
}

/// Writers plus the live marker for one recording.
pub struct RecordingSession {
    setup: SetupOption,
    sampling_rate: Option<u32>,
    pool: Option<WriterPool>,
    publisher: StatusPublisher,
    frames: u64,
    rows_enqueued: u64,
}

impl RecordingSession {
    /// Start one writer per group of `setup`, then publish the live marker.
    pub fn start(
        setup: SetupOption,
        store: &Arc<dyn SensorStore>,
        publisher: StatusPublisher,
        settings: WriterSettings,
        sampling_rate: Option<u32>,
    ) -> std::io::Result<Self> {
        let pool = WriterPool::start(setup.groups(), store, settings, sampling_rate)?;
        publish(&publisher, &LiveStatus::new(true, setup, sampling_rate));
        tracing::info!(setup = %setup, sampling_rate = ?sampling_rate, "Recording started");

        Ok(Self {
            setup,
            sampling_rate,
            pool: Some(pool),
            publisher,
            frames: 0,
            rows_enqueued: 0,
        })
    }

    /// Map `frame` for every group with a writer and enqueue one row each.
    pub fn record_frame(&mut self, frame: &PeakFrame, snapshot: &MappingSnapshot) {
        let Some(pool) = self.pool.as_mut() else {
            return;
        };
        self.frames += 1;

        for group in self.setup.groups() {
            let values = snapshot.map(&frame.peaks, *group);
            if pool.enqueue(*group, MeasurementRow::new(frame.timestamp, values)) {
                self.rows_enqueued += 1;
            }
        }
    }

    pub const fn frames(&self) -> u64 {
        self.frames
    }

    /// Stop enqueuing, join every writer, then publish the not-live marker.
    pub async fn finish(mut self, stop: StopReason) -> RecordingSummary {
        let (writers, rows_refused) = match self.pool.take() {
            Some(pool) => {
                let refused = pool.rows_refused();
                (pool.shutdown().await, refused)
            }
            None => (Vec::new(), 0),
        };
        publish(
            &self.publisher,
            &LiveStatus::new(false, self.setup, self.sampling_rate),
        );

        let summary = RecordingSummary {
            setup: self.setup,
            stop,
            frames: self.frames,
            rows_enqueued: self.rows_enqueued,
            rows_refused,
            writers,
            drained_bytes: 0,
        };
        tracing::info!(
            frames = summary.frames,
            rows_enqueued = summary.rows_enqueued,
            rows_written = summary.rows_written(),
            rows_lost = summary.rows_lost(),
            "Recording stopped"
        );
        summary
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        let Some(mut pool) = self.pool.take() else {
            return;
        };
        pool.signal_stop();
        tracing::warn!("Recording session dropped without finish; joining writers in background");

        let publisher = self.publisher.clone();
        let status = LiveStatus::new(false, self.setup, self.sampling_rate);
        let spawned = std::thread::Builder::new()
            .name("recording-cleanup".to_string())
            .spawn(move || {
                pool.join();
                publish(&publisher, &status);
            });
        if let Err(e) = spawned {
            tracing::error!(error = %e, "Failed to spawn recording cleanup thread");
        }
    }
}

fn publish(publisher: &StatusPublisher, status: &LiveStatus) {
    if let Err(e) = publisher.publish(status) {
        tracing::error!(error = %e, live = status.live, "Failed to publish recording status");
    }
}

/// Feed frames from `source` into `session` until end of stream or cancellation.
pub async fn pump_frames<S>(
    source: &mut S,
    mapper: &SensorMapper,
    session: &mut RecordingSession,
    cancel: &CancellationToken,
) -> StopReason
where
    S: FrameSource + ?Sized,
{
    tracing::info!(source = source.source_name(), "Recording frames");

    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::info!("Stop signal received");
                return StopReason::Cancelled;
            }
            result = source.next_frame() => result,
        };

        match event {
            Ok(FrameEvent::Frame(frame)) => {
                let snapshot = mapper.snapshot();
                session.record_frame(&frame, &snapshot);
            }
            Ok(FrameEvent::Eof) => {
                tracing::info!(frames = session.frames(), "End of stream");
                return StopReason::EndOfStream;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Frame source error");
                return StopReason::SourceError(e.to_string());
            }
        }
    }
}
