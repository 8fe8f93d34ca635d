//! Request encoding: command enumeration and the 4-byte request header.

use super::DecodeError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::Ipv4Addr;

/// Size of the request header in bytes.
pub const REQUEST_HEADER_LENGTH: usize = 4;

/// Commands issued by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    GetFirmwareVersion,
    GetInstrumentName,
    IsReady,
    GetDutChannelCount,
    GetAvailableLaserScanSpeeds,
    GetPeakDataStreamingStatus,
    GetLaserScanSpeed,
    SetLaserScanSpeed,
    GetPeakDataStreamingDivider,
    SetPeakDataStreamingDivider,
    GetPeakDataStreamingAvailableBuffer,
    GetInstrumentUtcDateTime,
    SetInstrumentUtcDateTime,
    GetNtpEnabled,
    SetNtpEnabled,
    GetNtpServer,
    SetNtpServer,
    EnablePeakDataStreaming,
    DisablePeakDataStreaming,
}

impl Command {
    pub const ALL: [Self; 19] = [
        Self::GetFirmwareVersion,
        Self::GetInstrumentName,
        Self::IsReady,
        Self::GetDutChannelCount,
        Self::GetAvailableLaserScanSpeeds,
        Self::GetPeakDataStreamingStatus,
        Self::GetLaserScanSpeed,
        Self::SetLaserScanSpeed,
        Self::GetPeakDataStreamingDivider,
        Self::SetPeakDataStreamingDivider,
        Self::GetPeakDataStreamingAvailableBuffer,
        Self::GetInstrumentUtcDateTime,
        Self::SetInstrumentUtcDateTime,
        Self::GetNtpEnabled,
        Self::SetNtpEnabled,
        Self::GetNtpServer,
        Self::SetNtpServer,
        Self::EnablePeakDataStreaming,
        Self::DisablePeakDataStreaming,
    ];

    /// Wire name, including the leading `#`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::GetFirmwareVersion => "#GetFirmwareVersion",
            Self::GetInstrumentName => "#GetInstrumentName",
            Self::IsReady => "#IsReady",
            Self::GetDutChannelCount => "#GetDutChannelCount",
            Self::GetAvailableLaserScanSpeeds => "#GetAvailableLaserScanSpeeds",
            Self::GetPeakDataStreamingStatus => "#GetPeakDataStreamingStatus",
            Self::GetLaserScanSpeed => "#GetLaserScanSpeed",
            Self::SetLaserScanSpeed => "#SetLaserScanSpeed",
            Self::GetPeakDataStreamingDivider => "#GetPeakDataStreamingDivider",
            Self::SetPeakDataStreamingDivider => "#SetPeakDataStreamingDivider",
            Self::GetPeakDataStreamingAvailableBuffer => "#GetPeakDataStreamingAvailableBuffer",
            Self::GetInstrumentUtcDateTime => "#GetInstrumentUtcDateTime",
            Self::SetInstrumentUtcDateTime => "#SetInstrumentUtcDateTime",
            Self::GetNtpEnabled => "#GetNtpEnabled",
            Self::SetNtpEnabled => "#SetNtpEnabled",
            Self::GetNtpServer => "#GetNtpServer",
            Self::SetNtpServer => "#SetNtpServer",
            Self::EnablePeakDataStreaming => "#EnablePeakDataStreaming",
            Self::DisablePeakDataStreaming => "#DisablePeakDataStreaming",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One command exchange as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub options: u8,
    pub command: String,
    pub argument: String,
}

impl Request {
    pub fn new(command: Command) -> Self {
        Self::with_argument(command, String::new())
    }

    pub fn with_argument(command: Command, argument: impl Into<String>) -> Self {
        Self {
            options: 0,
            command: command.name().to_string(),
            argument: argument.into(),
        }
    }

    pub fn set_laser_scan_speed(speed: u32) -> Self {
        Self::with_argument(Command::SetLaserScanSpeed, speed.to_string())
    }

    pub fn set_peak_data_streaming_divider(divider: u32) -> Self {
        Self::with_argument(Command::SetPeakDataStreamingDivider, divider.to_string())
    }

    /// Clock argument as `YYYY MM DD hh mm ss`.
    pub fn set_instrument_utc_date_time(time: DateTime<Utc>) -> Self {
        Self::with_argument(
            Command::SetInstrumentUtcDateTime,
            time.format("%Y %m %d %H %M %S").to_string(),
        )
    }

    pub fn set_ntp_enabled(enabled: bool) -> Self {
        Self::with_argument(Command::SetNtpEnabled, if enabled { "1" } else { "0" })
    }

    pub fn set_ntp_server(server: Ipv4Addr) -> Self {
        Self::with_argument(Command::SetNtpServer, server.to_string())
    }

    /// Parsed command, if it is one the client knows.
    pub fn known_command(&self) -> Option<Command> {
        Command::from_name(&self.command)
    }

    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        let command_length = u8::try_from(self.command.len()).map_err(|_| DecodeError::Invalid {
            what: "request command",
            message: format!("{} bytes exceeds the 8-bit length field", self.command.len()),
        })?;
        let argument_length =
            u16::try_from(self.argument.len()).map_err(|_| DecodeError::Invalid {
                what: "request argument",
                message: format!("{} bytes exceeds the 16-bit length field", self.argument.len()),
            })?;

        let mut bytes =
            Vec::with_capacity(REQUEST_HEADER_LENGTH + self.command.len() + self.argument.len());
        bytes.push(self.options);
        bytes.push(command_length);
        bytes.extend_from_slice(&argument_length.to_le_bytes());
        bytes.extend_from_slice(self.command.as_bytes());
        bytes.extend_from_slice(self.argument.as_bytes());
        Ok(bytes)
    }

    /// Decode one request from the front of `bytes`.
    ///
    /// Returns the request and the number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), DecodeError> {
        let header = bytes.get(..REQUEST_HEADER_LENGTH).ok_or(DecodeError::Truncated {
            what: "request header",
            expected: REQUEST_HEADER_LENGTH,
            actual: bytes.len(),
        })?;
        let options = header[0];
        let command_length = usize::from(header[1]);
        let argument_length = usize::from(u16::from_le_bytes([header[2], header[3]]));

        let total = REQUEST_HEADER_LENGTH + command_length + argument_length;
        let body = bytes.get(REQUEST_HEADER_LENGTH..total).ok_or(DecodeError::Truncated {
            what: "request body",
            expected: command_length + argument_length,
            actual: bytes.len() - REQUEST_HEADER_LENGTH,
        })?;

        let (command, argument) = body.split_at(command_length);
        let command = std::str::from_utf8(command)
            .map_err(|_| DecodeError::InvalidText { what: "request command" })?;
        let argument = std::str::from_utf8(argument)
            .map_err(|_| DecodeError::InvalidText { what: "request argument" })?;

        Ok((
            Self {
                options,
                command: command.to_string(),
                argument: argument.to_string(),
            },
            total,
        ))
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.argument.is_empty() {
            f.write_str(&self.command)
        } else {
            write!(f, "{} {}", self.command, self.argument)
        }
    }
}
