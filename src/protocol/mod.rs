//! x55 Interrogator Wire Protocol
//!
//! Binary request/response framing used on both TCP channels of the
//! interrogator (command port 51971, peak streaming port 51972).
//!
//! Request (client -> instrument):
//!
//! ```text
//! ┌─────────┬─────────┬──────────────┬──────────────┬──────────────┐
//! │ Options │ Cmd len │ Arg len (LE) │ Command      │ Argument     │
//! │ 1 byte  │ 1 byte  │ 2 bytes      │ ASCII        │ ASCII        │
//! └─────────┴─────────┴──────────────┴──────────────┴──────────────┘
//! ```
//!
//! Response (instrument -> client):
//!
//! ```text
//! ┌────────┬──────────┬──────────────┬──────────────┬─────────┬─────────┐
//! │ Status │ Reserved │ Msg len (LE) │ Content (LE) │ Message │ Content │
//! │ 1 byte │ 1 byte   │ 2 bytes      │ 4 bytes      │ M bytes │ C bytes │
//! └────────┴──────────┴──────────────┴──────────────┴─────────┴─────────┘
//! ```
//!
//! A status byte of zero means the command succeeded. Content layout is
//! command specific and decoded by the helpers in [`content`].

pub mod content;
pub mod frame;
pub mod request;

pub use content::decode_peaks;
pub use frame::{decode_response, Response, ResponseHeader, HEADER_LENGTH};
pub use request::{Command, Request, REQUEST_HEADER_LENGTH};

use thiserror::Error;

/// Default interrogator address on the lab network.
pub const DEFAULT_HOST: &str = "10.0.0.55";

/// TCP port for request/response commands.
pub const COMMAND_PORT: u16 = 51971;

/// TCP port for continuous peak data streaming.
pub const PEAK_STREAMING_PORT: u16 = 51972;

/// Errors raised while encoding or decoding protocol bytes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated {what}: expected {expected} bytes, got {actual}")]
    Truncated {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{what} is not valid text")]
    InvalidText { what: &'static str },

    #[error("invalid {what}: {message}")]
    Invalid { what: &'static str, message: String },
}
