//! Typed decoders for response content.
//!
//! All numeric fields are little-endian. Text content is ASCII, possibly
//! NUL padded.

use super::DecodeError;
use crate::types::PeakFrame;
use chrono::{DateTime, TimeZone, Utc};
use std::net::Ipv4Addr;

/// Fixed part of a peak frame header, before the per-channel counts.
pub const PEAK_HEADER_FIXED_LENGTH: usize = 24;

/// Peak frame layout version written by [`encode_peaks`].
pub const PEAK_FRAME_VERSION: u16 = 1;

// ============================================================================
// Cursor
// ============================================================================

struct ByteCursor<'a> {
    bytes: &'a [u8],
    position: usize,
    what: &'static str,
}

impl<'a> ByteCursor<'a> {
    const fn new(bytes: &'a [u8], what: &'static str) -> Self {
        Self {
            bytes,
            position: 0,
            what,
        }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.position + N;
        let slice = self.bytes.get(self.position..end).ok_or(DecodeError::Truncated {
            what: self.what,
            expected: end,
            actual: self.bytes.len(),
        })?;
        self.position = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        self.take::<2>().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        self.take::<8>().map(u64::from_le_bytes)
    }

    fn f64(&mut self) -> Result<f64, DecodeError> {
        self.take::<8>().map(f64::from_le_bytes)
    }

    fn seek(&mut self, position: usize) -> Result<(), DecodeError> {
        if position > self.bytes.len() {
            return Err(DecodeError::Truncated {
                what: self.what,
                expected: position,
                actual: self.bytes.len(),
            });
        }
        self.position = position;
        Ok(())
    }

    const fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }
}

// ============================================================================
// Scalars and text
// ============================================================================

pub fn decode_text(content: &[u8]) -> Result<String, DecodeError> {
    let text = std::str::from_utf8(content).map_err(|_| DecodeError::InvalidText {
        what: "text content",
    })?;
    Ok(text.trim_end_matches('\0').trim().to_string())
}

pub fn decode_u32(content: &[u8]) -> Result<u32, DecodeError> {
    ByteCursor::new(content, "u32 content").u32()
}

pub fn decode_bool(content: &[u8]) -> Result<bool, DecodeError> {
    decode_u32(content).map(|v| v != 0)
}

/// Packed array of u32 values (e.g. available laser scan speeds).
pub fn decode_u32_list(content: &[u8]) -> Result<Vec<u32>, DecodeError> {
    if content.len() % 4 != 0 {
        return Err(DecodeError::Invalid {
            what: "u32 list",
            message: format!("{} bytes is not a multiple of 4", content.len()),
        });
    }
    Ok(content
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn encode_u32_list(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Instrument clock: six u32 values (year, month, day, hour, minute, second) in UTC.
pub fn decode_utc_datetime(content: &[u8]) -> Result<DateTime<Utc>, DecodeError> {
    let mut cursor = ByteCursor::new(content, "instrument clock");
    let year = cursor.u32()?;
    let month = cursor.u32()?;
    let day = cursor.u32()?;
    let hour = cursor.u32()?;
    let minute = cursor.u32()?;
    let second = cursor.u32()?;

    let year = i32::try_from(year).map_err(|_| DecodeError::Invalid {
        what: "instrument clock",
        message: format!("year {year} out of range"),
    })?;
    Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .ok_or_else(|| DecodeError::Invalid {
            what: "instrument clock",
            message: format!("{year}-{month}-{day} {hour}:{minute}:{second} is not a valid date"),
        })
}

pub fn encode_utc_datetime(time: DateTime<Utc>) -> Vec<u8> {
    use chrono::{Datelike, Timelike};
    let year = u32::try_from(time.year()).unwrap_or(0);
    [
        year,
        time.month(),
        time.day(),
        time.hour(),
        time.minute(),
        time.second(),
    ]
    .iter()
    .flat_map(|v| v.to_le_bytes())
    .collect()
}

/// NTP server address, transmitted as dotted-quad text.
pub fn decode_ipv4(content: &[u8]) -> Result<Ipv4Addr, DecodeError> {
    let text = decode_text(content)?;
    text.parse().map_err(|_| DecodeError::Invalid {
        what: "ipv4 address",
        message: format!("'{text}' is not a dotted-quad address"),
    })
}

// ============================================================================
// Peak frames
// ============================================================================

/// Decode one streaming frame into a timestamp and per-channel wavelengths.
pub fn decode_peaks(content: &[u8]) -> Result<PeakFrame, DecodeError> {
    let mut cursor = ByteCursor::new(content, "peak frame");
    let header_length = usize::from(cursor.u16()?);
    let _version = cursor.u16()?;
    let _reserved = cursor.u32()?;
    let serial_number = cursor.u64()?;
    let seconds = cursor.u32()?;
    let nanoseconds = cursor.u32()?;

    if header_length < PEAK_HEADER_FIXED_LENGTH || (header_length - PEAK_HEADER_FIXED_LENGTH) % 2 != 0
    {
        return Err(DecodeError::Invalid {
            what: "peak frame",
            message: format!("header length {header_length} is inconsistent"),
        });
    }

    let channel_count = (header_length - PEAK_HEADER_FIXED_LENGTH) / 2;
    let mut counts = Vec::with_capacity(channel_count);
    for _ in 0..channel_count {
        counts.push(usize::from(cursor.u16()?));
    }
    cursor.seek(header_length)?;

    let total_peaks: usize = counts.iter().sum();
    if cursor.remaining() != total_peaks * 8 {
        return Err(DecodeError::Invalid {
            what: "peak frame",
            message: format!(
                "{} peak bytes for {total_peaks} peaks",
                cursor.remaining()
            ),
        });
    }

    let mut peaks = Vec::with_capacity(channel_count);
    for count in counts {
        let mut channel = Vec::with_capacity(count);
        for _ in 0..count {
            channel.push(cursor.f64()?);
        }
        peaks.push(channel);
    }

    let timestamp = Utc
        .timestamp_opt(i64::from(seconds), nanoseconds)
        .single()
        .ok_or_else(|| DecodeError::Invalid {
            what: "peak frame",
            message: format!("timestamp {seconds}.{nanoseconds:09} out of range"),
        })?;

    Ok(PeakFrame {
        timestamp,
        serial_number,
        peaks,
    })
}

/// Inverse of [`decode_peaks`]; used by replay tooling and the mock instrument.
pub fn encode_peaks(frame: &PeakFrame) -> Result<Vec<u8>, DecodeError> {
    let header_length = PEAK_HEADER_FIXED_LENGTH + frame.peaks.len() * 2;
    let header_length_field = u16::try_from(header_length).map_err(|_| DecodeError::Invalid {
        what: "peak frame",
        message: format!("{} channels do not fit the header", frame.peaks.len()),
    })?;
    let seconds = u32::try_from(frame.timestamp.timestamp()).map_err(|_| DecodeError::Invalid {
        what: "peak frame",
        message: format!("timestamp {} out of range", frame.timestamp),
    })?;

    let mut bytes = Vec::with_capacity(header_length + frame.peak_count() * 8);
    bytes.extend_from_slice(&header_length_field.to_le_bytes());
    bytes.extend_from_slice(&PEAK_FRAME_VERSION.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&frame.serial_number.to_le_bytes());
    bytes.extend_from_slice(&seconds.to_le_bytes());
    bytes.extend_from_slice(&frame.timestamp.timestamp_subsec_nanos().to_le_bytes());
    for channel in &frame.peaks {
        let count = u16::try_from(channel.len()).map_err(|_| DecodeError::Invalid {
            what: "peak frame",
            message: format!("{} peaks on one channel", channel.len()),
        })?;
        bytes.extend_from_slice(&count.to_le_bytes());
    }
    for wavelength in frame.peaks.iter().flatten() {
        bytes.extend_from_slice(&wavelength.to_le_bytes());
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> PeakFrame {
        PeakFrame {
            timestamp: Utc.timestamp_opt(1_700_000_000, 250_000_000).unwrap(),
            serial_number: 42,
            peaks: vec![vec![1530.0, 1531.2], vec![1540.5], vec![]],
        }
    }

    #[test]
    fn peaks_decode_channel_by_channel() {
        let bytes = encode_peaks(&frame()).unwrap();
        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), 30);

        let decoded = decode_peaks(&bytes).unwrap();
        assert_eq!(decoded, frame());
        assert_eq!(decoded.channel_count(), 3);
        assert_eq!(decoded.peak_count(), 3);
    }

    #[test]
    fn truncated_peaks_are_rejected() {
        let bytes = encode_peaks(&frame()).unwrap();
        assert!(decode_peaks(&bytes[..10]).is_err());
        assert!(matches!(
            decode_peaks(&bytes[..bytes.len() - 4]),
            Err(DecodeError::Invalid { what: "peak frame", .. })
        ));
    }

    #[test]
    fn odd_header_length_is_rejected() {
        let mut bytes = encode_peaks(&frame()).unwrap();
        bytes[0] = 25;
        assert!(decode_peaks(&bytes).is_err());
    }

    #[test]
    fn scalars_and_lists() {
        assert_eq!(decode_u32(&7u32.to_le_bytes()).unwrap(), 7);
        assert!(decode_bool(&1u32.to_le_bytes()).unwrap());
        assert!(!decode_bool(&0u32.to_le_bytes()).unwrap());
        assert!(decode_u32(&[1, 2]).is_err());

        let speeds = encode_u32_list(&[1000, 5000, 10000]);
        assert_eq!(decode_u32_list(&speeds).unwrap(), vec![1000, 5000, 10000]);
        assert!(decode_u32_list(&speeds[..5]).is_err());
    }

    #[test]
    fn clock_is_six_fields() {
        let time = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 58).unwrap();
        assert_eq!(decode_utc_datetime(&encode_utc_datetime(time)).unwrap(), time);

        let mut invalid = encode_utc_datetime(time);
        invalid[4..8].copy_from_slice(&13u32.to_le_bytes());
        assert!(decode_utc_datetime(&invalid).is_err());
    }

    #[test]
    fn text_and_address() {
        assert_eq!(decode_text(b"x55 rev 2\0\0").unwrap(), "x55 rev 2");
        assert_eq!(decode_ipv4(b"10.0.0.1").unwrap(), Ipv4Addr::new(10, 0, 0, 1));
        assert!(decode_ipv4(b"not an ip").is_err());
    }
}
