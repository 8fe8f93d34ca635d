//! x55 instrument client.
//!
//! Owns the command connection for its whole lifetime and a streaming
//! connection that is only open while a [`PeakStream`] is alive. Status
//! queries, mutating commands, calibration uploads and recordings all go
//! through here.

use super::connection::{Connection, ConnectionError};
use super::stream::PeakStream;
use super::ClientError;
use crate::config::AppConfig;
use crate::mapping::{CalibrationError, SensorMapper, UploadSummary};
use crate::pipeline::{pump_frames, RecordingSession, RecordingSummary, StopReason, WriterSettings};
use crate::protocol::content::{
    decode_bool, decode_ipv4, decode_text, decode_u32, decode_u32_list, decode_utc_datetime,
};
use crate::protocol::{Command, DecodeError, Request, Response};
use crate::storage::{SensorStore, StatusPublisher};
use crate::types::{InstrumentStatus, SetupOption};
use chrono::Utc;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

static CLIENT_COUNT: AtomicUsize = AtomicUsize::new(0);

// ============================================================================
// Settings
// ============================================================================

/// Addresses and timing used by one client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub host: String,
    pub command_port: u16,
    pub streaming_port: u16,
    pub connect_timeout: Duration,
    pub drain_idle: Duration,
    pub divider_options: Vec<u32>,
    pub writer: WriterSettings,
}

impl ClientSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            host: config.instrument.host.clone(),
            command_port: config.instrument.command_port,
            streaming_port: config.instrument.streaming_port,
            connect_timeout: config.instrument.connect_timeout(),
            drain_idle: config.instrument.drain_idle(),
            divider_options: config.instrument.divider_options.clone(),
            writer: config.recording.writer_settings(),
        }
    }

    /// Settings pointing at `host` with the standard ports.
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct InstrumentClient {
    name: String,
    command: Arc<Connection>,
    peaks: Arc<Connection>,
    status: InstrumentStatus,
    mapper: SensorMapper,
    publisher: StatusPublisher,
    settings: ClientSettings,
}

impl InstrumentClient {
    /// Build a client. Nothing is opened until [`connect`](Self::connect).
    pub fn new(
        settings: ClientSettings,
        store: Arc<dyn SensorStore>,
        publisher: StatusPublisher,
        setup: SetupOption,
    ) -> Self {
        let number = CLIENT_COUNT.fetch_add(1, Ordering::Relaxed) + 1;
        let name = format!("x55 Client {number}");

        let command = Connection::new(
            format!("{name} command"),
            settings.host.clone(),
            settings.command_port,
        )
        .with_connect_timeout(settings.connect_timeout);
        let peaks = Connection::new(
            format!("{name} peaks"),
            settings.host.clone(),
            settings.streaming_port,
        )
        .with_connect_timeout(settings.connect_timeout);

        Self {
            name,
            command: Arc::new(command),
            peaks: Arc::new(peaks),
            status: InstrumentStatus::default(),
            mapper: SensorMapper::new(store, setup),
            publisher,
            settings,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn status(&self) -> &InstrumentStatus {
        &self.status
    }

    pub const fn mapper(&self) -> &SensorMapper {
        &self.mapper
    }

    pub const fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.command.is_connected()
    }

    /// Open the command connection.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.command.connect().await?;
        tracing::info!(client = %self.name, addr = %self.command.addr(), "Connected to instrument");
        Ok(())
    }

    /// Close both connections.
    pub async fn disconnect(&self) {
        self.peaks.disconnect().await;
        self.command.disconnect().await;
        tracing::info!(client = %self.name, "Disconnected from instrument");
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    /// Query every status value in a fixed order.
    ///
    /// A rejected or undecodable answer leaves its field unset; a transport
    /// failure aborts the refresh and keeps the previous snapshot.
    pub async fn update_status(&mut self) -> Result<&InstrumentStatus, ClientError> {
        self.ensure_connected()?;

        let status = InstrumentStatus {
            firmware_version: self.query(Command::GetFirmwareVersion, decode_text).await?,
            instrument_name: self.query(Command::GetInstrumentName, decode_text).await?,
            is_ready: self.query(Command::IsReady, decode_bool).await?,
            dut_channel_count: self.query(Command::GetDutChannelCount, decode_u32).await?,
            available_laser_scan_speeds: self
                .query(Command::GetAvailableLaserScanSpeeds, decode_u32_list)
                .await?
                .unwrap_or_default(),
            peak_data_streaming_status: self
                .query(Command::GetPeakDataStreamingStatus, decode_bool)
                .await?,
            laser_scan_speed: self.query(Command::GetLaserScanSpeed, decode_u32).await?,
            peak_data_streaming_divider: self
                .query(Command::GetPeakDataStreamingDivider, decode_u32)
                .await?,
            peak_data_streaming_available_buffer: self
                .query(Command::GetPeakDataStreamingAvailableBuffer, decode_u32)
                .await?,
            instrument_time: self
                .query(Command::GetInstrumentUtcDateTime, decode_utc_datetime)
                .await?,
            ntp_enabled: self.query(Command::GetNtpEnabled, decode_bool).await?,
            ntp_server: self.query(Command::GetNtpServer, decode_ipv4).await?,
        };

        tracing::info!(
            client = %self.name,
            firmware = ?status.firmware_version,
            ready = ?status.is_ready,
            channels = ?status.dut_channel_count,
            scan_speed = ?status.laser_scan_speed,
            divider = ?status.peak_data_streaming_divider,
            sampling_rate = ?status.effective_sampling_rate(),
            "Updated instrument status"
        );
        self.status = status;
        Ok(&self.status)
    }

    /// Set the laser scan speed and return the speed read back.
    pub async fn update_laser_scan_speed(&mut self, speed: u32) -> Result<Option<u32>, ClientError> {
        self.ensure_connected()?;
        if !self.status.available_laser_scan_speeds.is_empty()
            && !self.status.available_laser_scan_speeds.contains(&speed)
        {
            tracing::warn!(
                client = %self.name,
                speed,
                available = ?self.status.available_laser_scan_speeds,
                "Requested scan speed is not advertised by the instrument"
            );
        }

        self.execute_checked(&Request::set_laser_scan_speed(speed)).await?;
        self.status.laser_scan_speed = self.query(Command::GetLaserScanSpeed, decode_u32).await?;
        tracing::info!(client = %self.name, requested = speed, confirmed = ?self.status.laser_scan_speed, "Laser scan speed updated");
        Ok(self.status.laser_scan_speed)
    }

    /// Set the streaming divider and return the divider read back.
    pub async fn update_peak_data_streaming_divider(
        &mut self,
        divider: u32,
    ) -> Result<Option<u32>, ClientError> {
        if !self.settings.divider_options.contains(&divider) {
            return Err(ClientError::UnsupportedDivider {
                divider,
                options: self.settings.divider_options.clone(),
            });
        }
        self.ensure_connected()?;

        self.execute_checked(&Request::set_peak_data_streaming_divider(divider))
            .await?;
        self.status.peak_data_streaming_divider = self
            .query(Command::GetPeakDataStreamingDivider, decode_u32)
            .await?;
        tracing::info!(client = %self.name, requested = divider, confirmed = ?self.status.peak_data_streaming_divider, "Streaming divider updated");
        Ok(self.status.peak_data_streaming_divider)
    }

    /// Point the instrument at a new NTP server.
    ///
    /// Disables NTP, sets the instrument clock to local UTC, sets the server
    /// and re-enables NTP. The first rejected step ends the sequence.
    /// Returns the server and enabled flag read back afterwards.
    pub async fn update_ntp_server(
        &mut self,
        server: Ipv4Addr,
    ) -> Result<(Option<Ipv4Addr>, Option<bool>), ClientError> {
        self.ensure_connected()?;

        let steps = [
            Request::set_ntp_enabled(false),
            Request::set_instrument_utc_date_time(Utc::now()),
            Request::set_ntp_server(server),
            Request::set_ntp_enabled(true),
        ];
        for step in &steps {
            self.execute_checked(step).await?;
        }

        self.status.ntp_server = self.query(Command::GetNtpServer, decode_ipv4).await?;
        self.status.ntp_enabled = self.query(Command::GetNtpEnabled, decode_bool).await?;
        tracing::info!(
            client = %self.name,
            requested = %server,
            server = ?self.status.ntp_server,
            enabled = ?self.status.ntp_enabled,
            "NTP server updated"
        );
        Ok((self.status.ntp_server, self.status.ntp_enabled))
    }

    // ------------------------------------------------------------------------
    // Sensor configuration
    // ------------------------------------------------------------------------

    /// Switch to `setup` and load its metadata tables.
    pub fn update_setup(&self, setup: SetupOption) -> Result<SetupOption, ClientError> {
        Ok(self.mapper.load(setup)?)
    }

    /// Apply a calibration document to the current setup.
    pub fn upload_configuration(&self, xml: &str) -> Result<UploadSummary, ClientError> {
        Ok(self.mapper.upload(xml)?)
    }

    pub fn upload_configuration_file(&self, path: &Path) -> Result<UploadSummary, ClientError> {
        let xml = std::fs::read_to_string(path).map_err(CalibrationError::Io)?;
        self.upload_configuration(&xml)
    }

    // ------------------------------------------------------------------------
    // Streaming and recording
    // ------------------------------------------------------------------------

    /// Open the streaming channel and enable peak streaming.
    ///
    /// Release the stream with [`PeakStream::close`].
    pub async fn start_streaming(&self) -> Result<PeakStream, ClientError> {
        self.ensure_connected()?;
        PeakStream::open(
            self.name.clone(),
            Arc::clone(&self.command),
            Arc::clone(&self.peaks),
            self.settings.drain_idle,
        )
        .await
    }

    /// Record the current setup until the stream ends or `cancel` fires.
    ///
    /// Writers are started and the live marker published before streaming
    /// is enabled. Streaming is always torn down and every writer joined
    /// before this returns.
    pub async fn record(&self, cancel: &CancellationToken) -> Result<RecordingSummary, ClientError> {
        self.ensure_connected()?;
        let setup = self.mapper.setup();
        if self.mapper.snapshot().sensor_count() == 0 {
            tracing::warn!(client = %self.name, setup = %setup, "No sensor metadata loaded; rows will be empty");
        }

        let mut session = RecordingSession::start(
            setup,
            self.mapper.store(),
            self.publisher.clone(),
            self.settings.writer,
            self.status.effective_sampling_rate(),
        )
        .map_err(ClientError::Writers)?;

        let mut stream = match self.start_streaming().await {
            Ok(stream) => stream,
            Err(e) => {
                session.finish(StopReason::SourceError(e.to_string())).await;
                return Err(e);
            }
        };

        let stop = pump_frames(&mut stream, &self.mapper, &mut session, cancel).await;
        let drained = stream.close().await;
        let mut summary = session.finish(stop).await;

        match drained {
            Ok(bytes) => summary.drained_bytes = bytes,
            Err(e) => {
                tracing::warn!(client = %self.name, error = %e, "Streaming teardown incomplete");
            }
        }
        Ok(summary)
    }

    // ------------------------------------------------------------------------
    // Exchanges
    // ------------------------------------------------------------------------

    fn ensure_connected(&self) -> Result<(), ClientError> {
        if self.command.is_connected() {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    /// Execute `request` and fail if the instrument rejects it.
    async fn execute_checked(&self, request: &Request) -> Result<Response, ClientError> {
        let response = self.command.execute(request).await?;
        if response.succeeded {
            Ok(response)
        } else {
            let message = response.message_text();
            tracing::warn!(client = %self.name, command = %request, message = %message, "Command rejected");
            Err(ClientError::CommandRejected {
                command: request.command.clone(),
                message,
            })
        }
    }

    /// Run a read-only query. Rejections and undecodable content yield `None`.
    async fn query<T>(
        &self,
        command: Command,
        decode: fn(&[u8]) -> Result<T, DecodeError>,
    ) -> Result<Option<T>, ConnectionError> {
        let response = self.command.execute(&Request::new(command)).await?;
        if !response.succeeded {
            tracing::warn!(
                client = %self.name,
                command = command.name(),
                message = %response.message_text(),
                "Query rejected"
            );
            return Ok(None);
        }
        match decode(&response.content) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(client = %self.name, command = command.name(), error = %e, "Undecodable query response");
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for InstrumentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentClient")
            .field("name", &self.name)
            .field("command", &self.command)
            .field("setup", &self.mapper.setup())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;

    fn client(settings: ClientSettings) -> InstrumentClient {
        let dir = std::env::temp_dir().join("fbg-client-unit");
        InstrumentClient::new(
            settings,
            Arc::new(InMemoryStore::new()),
            StatusPublisher::new(dir.join("status.json")),
            SetupOption::default(),
        )
    }

    #[test]
    fn clients_are_numbered() {
        let a = client(ClientSettings::default());
        let b = client(ClientSettings::default());
        assert!(a.name().starts_with("x55 Client "));
        assert_ne!(a.name(), b.name());
    }

    #[tokio::test]
    async fn operations_need_a_connection() {
        let mut c = client(ClientSettings::for_host("127.0.0.1"));
        assert!(!c.is_connected());
        assert!(matches!(c.update_status().await, Err(ClientError::NotConnected)));
        assert!(matches!(c.start_streaming().await, Err(ClientError::NotConnected)));
        assert!(matches!(
            c.record(&CancellationToken::new()).await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn divider_outside_options_is_refused_locally() {
        let mut c = client(ClientSettings::default());
        match c.update_peak_data_streaming_divider(7).await {
            Err(ClientError::UnsupportedDivider { divider, options }) => {
                assert_eq!(divider, 7);
                assert_eq!(options, vec![1, 10, 100]);
            }
            other => panic!("expected UnsupportedDivider, got {other:?}"),
        }
    }
}
