//! Peak streaming session.
//!
//! Streaming is switched on and off over the command channel; frames arrive
//! on the dedicated streaming connection. A [`PeakStream`] must be released
//! with [`PeakStream::close`], which disables streaming, drains the bytes
//! still in flight and closes the streaming socket. Dropping an unclosed
//! stream spawns the same teardown on the current runtime.

use super::connection::{Connection, ConnectionError};
use super::ClientError;
use crate::pipeline::{FrameEvent, FrameSource};
use crate::protocol::{decode_peaks, Command, Request};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub struct PeakStream {
    name: String,
    command: Arc<Connection>,
    peaks: Arc<Connection>,
    drain_idle: Duration,
    frames: u64,
    closed: bool,
}

impl PeakStream {
    /// Connect the streaming channel and enable streaming.
    ///
    /// Fails with [`ClientError::StreamingRejected`] when the instrument
    /// refuses the enable command; the streaming socket is closed again.
    pub(crate) async fn open(
        name: String,
        command: Arc<Connection>,
        peaks: Arc<Connection>,
        drain_idle: Duration,
    ) -> Result<Self, ClientError> {
        peaks.connect().await?;

        let enabled = command
            .execute(&Request::new(Command::EnablePeakDataStreaming))
            .await;
        match enabled {
            Ok(response) if response.succeeded => {
                tracing::info!(client = %name, "Started streaming");
                Ok(Self {
                    name,
                    command,
                    peaks,
                    drain_idle,
                    frames: 0,
                    closed: false,
                })
            }
            Ok(response) => {
                peaks.disconnect().await;
                Err(ClientError::StreamingRejected {
                    message: response.message_text(),
                })
            }
            Err(e) => {
                peaks.disconnect().await;
                Err(e.into())
            }
        }
    }

    pub const fn frames(&self) -> u64 {
        self.frames
    }

    /// Disable streaming, drain and close. Returns the number of drained bytes.
    ///
    /// If this future is dropped before teardown completes, the stream's
    /// `Drop` runs the teardown again in the background.
    pub async fn close(mut self) -> Result<usize, ConnectionError> {
        let result = teardown(
            &self.name,
            &self.command,
            &self.peaks,
            self.drain_idle,
        )
        .await;
        self.closed = true;
        result
    }
}

async fn teardown(
    name: &str,
    command: &Connection,
    peaks: &Connection,
    drain_idle: Duration,
) -> Result<usize, ConnectionError> {
    let disabled = command
        .execute(&Request::new(Command::DisablePeakDataStreaming))
        .await;
    match &disabled {
        Ok(response) if !response.succeeded => {
            tracing::warn!(client = %name, message = %response.message_text(), "Instrument rejected disable streaming");
        }
        Err(e) => {
            tracing::warn!(client = %name, error = %e, "Failed to disable streaming");
        }
        Ok(_) => {}
    }

    let drained = match peaks.drain(drain_idle).await {
        Ok(bytes) => bytes,
        Err(ConnectionError::NotConnected { .. }) => 0,
        Err(e) => {
            tracing::warn!(client = %name, error = %e, "Failed to drain streaming connection");
            0
        }
    };
    peaks.disconnect().await;

    tracing::info!(
        client = %name,
        unprocessed_bytes = drained,
        "Stopped streaming"
    );
    disabled.map(|_| drained)
}

#[async_trait]
impl FrameSource for PeakStream {
    async fn next_frame(&mut self) -> Result<FrameEvent, ConnectionError> {
        let response = match self.peaks.read().await {
            Ok(response) => response,
            Err(ConnectionError::Closed { .. }) => return Ok(FrameEvent::Eof),
            Err(e) => return Err(e),
        };
        if !response.succeeded {
            tracing::warn!(client = %self.name, message = %response.message_text(), "Instrument flagged a streaming frame");
        }
        let frame = decode_peaks(&response.content)?;
        self.frames += 1;
        Ok(FrameEvent::Frame(frame))
    }

    fn source_name(&self) -> &str {
        &self.name
    }
}

impl Drop for PeakStream {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let name = self.name.clone();
        let command = Arc::clone(&self.command);
        let peaks = Arc::clone(&self.peaks);
        let drain_idle = self.drain_idle;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(client = %name, "Peak stream dropped while open; tearing down in background");
                handle.spawn(async move {
                    let _ = teardown(&name, &command, &peaks, drain_idle).await;
                });
            }
            Err(_) => {
                tracing::error!(client = %name, "Peak stream dropped outside a runtime; streaming left enabled");
            }
        }
    }
}
