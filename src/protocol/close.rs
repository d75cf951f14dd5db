//! Close frame payloads (RFC 6455 §5.5.1, §7.4).

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::MAX_CONTROL_PAYLOAD;
use crate::error::{Result, WsError};

/// Close status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000
    Normal,
    /// 1001
    GoingAway,
    /// 1002
    ProtocolError,
    /// 1003
    Unsupported,
    /// 1005, never sent on the wire
    NoStatus,
    /// 1006, never sent on the wire
    Abnormal,
    /// 1007
    InvalidPayload,
    /// 1008
    PolicyViolation,
    /// 1009
    TooBig,
    /// 1010
    MandatoryExtension,
    /// 1011
    InternalError,
    /// 1012
    ServiceRestart,
    /// 1013
    TryAgainLater,
    /// 1014
    BadGateway,
    /// 1015, never sent on the wire
    TlsHandshake,
    /// Application-defined (3000-4999) or otherwise unregistered code.
    Other(u16),
}

impl CloseCode {
    /// Codes that must not appear in a Close frame.
    pub fn is_reserved(self) -> bool {
        match self {
            CloseCode::NoStatus | CloseCode::Abnormal | CloseCode::TlsHandshake => true,
            CloseCode::Other(code) => !(3000..=4999).contains(&code),
            _ => false,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::NoStatus,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::TooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            1012 => CloseCode::ServiceRestart,
            1013 => CloseCode::TryAgainLater,
            1014 => CloseCode::BadGateway,
            1015 => CloseCode::TlsHandshake,
            other => CloseCode::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::TooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::ServiceRestart => 1012,
            CloseCode::TryAgainLater => 1013,
            CloseCode::BadGateway => 1014,
            CloseCode::TlsHandshake => 1015,
            CloseCode::Other(code) => code,
        }
    }
}

/// Build a Close payload: big-endian status code followed by a UTF-8 reason.
///
/// The reason is truncated on a character boundary so the payload fits in a
/// control frame.
pub fn encode_close_payload(code: CloseCode, reason: &str) -> Bytes {
    let max_reason = MAX_CONTROL_PAYLOAD - 2;
    let mut end = reason.len().min(max_reason);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }

    let mut buf = BytesMut::with_capacity(2 + end);
    buf.put_u16(code.into());
    buf.put_slice(&reason.as_bytes()[..end]);
    buf.freeze()
}

/// A parsed Close payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// `None` when the payload was empty.
    pub code: Option<CloseCode>,
    pub reason: String,
}

impl CloseFrame {
    /// Parse a Close payload.
    ///
    /// An empty payload is valid and carries no code. A single byte, a
    /// reserved code or a non-UTF-8 reason is a protocol error.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        match payload {
            [] => Ok(Self {
                code: None,
                reason: String::new(),
            }),
            [_] => Err(WsError::Protocol(
                "Close payload of 1 byte is missing half the status code".to_string(),
            )),
            [hi, lo, reason @ ..] => {
                let code = CloseCode::from(u16::from_be_bytes([*hi, *lo]));
                if code.is_reserved() {
                    return Err(WsError::Protocol(format!(
                        "Close code {} is not allowed on the wire",
                        u16::from(code)
                    )));
                }
                Ok(Self {
                    code: Some(code),
                    reason: std::str::from_utf8(reason)?.to_string(),
                })
            }
        }
    }
}
