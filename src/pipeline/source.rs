//! Frame source abstraction for peak ingestion.
//!
//! Provides a unified trait for reading peak frames from different sources:
//! the live streaming channel of the interrogator and in-memory replay.

use crate::acquisition::ConnectionError;
use crate::types::PeakFrame;
use async_trait::async_trait;
use std::time::Duration;

/// Events produced by a frame source.
#[derive(Debug)]
pub enum FrameEvent {
    /// A decoded peak frame.
    Frame(PeakFrame),
    /// Source reached end of data (replay exhausted, or the instrument closed the stream).
    Eof,
}

/// Trait abstracting where peak frames come from.
///
/// The recording loop calls [`next_frame`](Self::next_frame) in a `select!`
/// with cancellation, so implementations must tolerate being dropped mid-read.
#[async_trait]
pub trait FrameSource: Send {
    /// Read the next frame.
    ///
    /// Returns `FrameEvent::Eof` when no more data is available and `Err` on
    /// transport or decode failures.
    async fn next_frame(&mut self) -> Result<FrameEvent, ConnectionError>;

    /// Human-readable name for logging.
    fn source_name(&self) -> &str;
}

// ============================================================================
// Replay Source
// ============================================================================

/// Replays pre-loaded frames with an optional inter-frame delay.
pub struct ReplaySource {
    frames: std::vec::IntoIter<PeakFrame>,
    delay: Duration,
    yielded_first: bool,
}

impl ReplaySource {
    pub fn new(frames: Vec<PeakFrame>) -> Self {
        Self {
            frames: frames.into_iter(),
            delay: Duration::ZERO,
            yielded_first: false,
        }
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl FrameSource for ReplaySource {
    async fn next_frame(&mut self) -> Result<FrameEvent, ConnectionError> {
        if self.yielded_first && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.frames.next() {
            Some(frame) => {
                self.yielded_first = true;
                Ok(FrameEvent::Frame(frame))
            }
            None => Ok(FrameEvent::Eof),
        }
    }

    fn source_name(&self) -> &str {
        "replay"
    }
}
