//! Response framing: the fixed 8-byte header and the message/content body.

use super::DecodeError;

/// Size of the response header in bytes.
pub const HEADER_LENGTH: usize = 8;

/// Decoded response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Inverted from the raw status byte: zero on the wire means success
    pub succeeded: bool,
    pub response_type: u8,
    pub message_length: u16,
    pub content_length: u32,
}

impl ResponseHeader {
    pub const fn decode(bytes: &[u8; HEADER_LENGTH]) -> Self {
        Self {
            succeeded: bytes[0] == 0,
            response_type: bytes[1],
            message_length: u16::from_le_bytes([bytes[2], bytes[3]]),
            content_length: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LENGTH] {
        let mut bytes = [0u8; HEADER_LENGTH];
        bytes[0] = u8::from(!self.succeeded);
        bytes[1] = self.response_type;
        bytes[2..4].copy_from_slice(&self.message_length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.content_length.to_le_bytes());
        bytes
    }

    /// Number of bytes following the header (`M + C`).
    pub const fn body_length(&self) -> usize {
        self.message_length as usize + self.content_length as usize
    }
}

/// One framed response: success flag, textual message and binary content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub succeeded: bool,
    pub message: Vec<u8>,
    pub content: Vec<u8>,
}

impl Response {
    pub fn ok(message: &str, content: Vec<u8>) -> Self {
        Self {
            succeeded: true,
            message: message.as_bytes().to_vec(),
            content,
        }
    }

    pub fn rejected(message: &str) -> Self {
        Self {
            succeeded: false,
            message: message.as_bytes().to_vec(),
            content: Vec::new(),
        }
    }

    /// Split a header's body into message and content segments.
    pub fn from_parts(header: ResponseHeader, mut body: Vec<u8>) -> Result<Self, DecodeError> {
        if body.len() != header.body_length() {
            return Err(DecodeError::Truncated {
                what: "response body",
                expected: header.body_length(),
                actual: body.len(),
            });
        }
        let content = body.split_off(header.message_length as usize);
        Ok(Self {
            succeeded: header.succeeded,
            message: body,
            content,
        })
    }

    /// Header describing this response on the wire.
    pub fn header(&self) -> Result<ResponseHeader, DecodeError> {
        let message_length = u16::try_from(self.message.len()).map_err(|_| DecodeError::Invalid {
            what: "response message",
            message: format!("{} bytes exceeds the 16-bit length field", self.message.len()),
        })?;
        let content_length = u32::try_from(self.content.len()).map_err(|_| DecodeError::Invalid {
            what: "response content",
            message: format!("{} bytes exceeds the 32-bit length field", self.content.len()),
        })?;
        Ok(ResponseHeader {
            succeeded: self.succeeded,
            response_type: 0,
            message_length,
            content_length,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        let header = self.header()?;
        let mut bytes = Vec::with_capacity(HEADER_LENGTH + header.body_length());
        bytes.extend_from_slice(&header.encode());
        bytes.extend_from_slice(&self.message);
        bytes.extend_from_slice(&self.content);
        Ok(bytes)
    }

    /// Message segment as text, without trailing NULs.
    pub fn message_text(&self) -> String {
        String::from_utf8_lossy(&self.message)
            .trim_end_matches('\0')
            .trim()
            .to_string()
    }
}

/// Decode one response from the front of `bytes`.
///
/// Returns the response and the number of bytes consumed.
pub fn decode_response(bytes: &[u8]) -> Result<(Response, usize), DecodeError> {
    let header_bytes: &[u8; HEADER_LENGTH] = bytes
        .get(..HEADER_LENGTH)
        .and_then(|h| h.try_into().ok())
        .ok_or(DecodeError::Truncated {
            what: "response header",
            expected: HEADER_LENGTH,
            actual: bytes.len(),
        })?;
    let header = ResponseHeader::decode(header_bytes);

    let total = HEADER_LENGTH + header.body_length();
    let body = bytes.get(HEADER_LENGTH..total).ok_or(DecodeError::Truncated {
        what: "response body",
        expected: header.body_length(),
        actual: bytes.len() - HEADER_LENGTH,
    })?;

    Ok((Response::from_parts(header, body.to_vec())?, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = ResponseHeader {
            succeeded: false,
            response_type: 3,
            message_length: 0x1234,
            content_length: 0x0A0B_0C0D,
        };
        let bytes = header.encode();
        assert_eq!(bytes, [1, 3, 0x34, 0x12, 0x0D, 0x0C, 0x0B, 0x0A]);
        assert_eq!(ResponseHeader::decode(&bytes), header);
    }

    #[test]
    fn zero_status_byte_means_success() {
        let header = ResponseHeader::decode(&[0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(header.succeeded);

        let header = ResponseHeader::decode(&[5, 0, 0, 0, 0, 0, 0, 0]);
        assert!(!header.succeeded);
    }

    #[test]
    fn decode_splits_message_and_content() {
        let response = Response::ok("OK", vec![1, 2, 3]);
        let mut bytes = response.encode().unwrap();
        bytes.extend_from_slice(&[0xFF; 4]); // start of the next frame

        let (decoded, consumed) = decode_response(&bytes).unwrap();
        assert_eq!(consumed, HEADER_LENGTH + 5);
        assert_eq!(decoded, response);
        assert_eq!(decoded.message_text(), "OK");
    }

    #[test]
    fn decode_reports_truncation() {
        let bytes = Response::ok("hello", vec![9; 16]).encode().unwrap();

        let err = decode_response(&bytes[..5]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { what: "response header", .. }));

        let err = decode_response(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                what: "response body",
                expected: 21,
                actual: 20
            }
        );
    }

    #[test]
    fn message_text_strips_padding() {
        let response = Response {
            succeeded: false,
            message: b"Invalid argument\0\0".to_vec(),
            content: Vec::new(),
        };
        assert_eq!(response.message_text(), "Invalid argument");
    }
}
