//! WebSocket frame header encoding and decoding (RFC 6455 §5.2).
//!
//! ```text
//!  0                   1                   2                   3
//! ┌─┬─┬─┬─┬───────┬─┬─────────────┬───────────────────────────────┐
//! │F│R│R│R│ opcode│M│ Payload len │    Extended payload length    │
//! │I│S│S│S│  (4)  │A│     (7)     │            (16/64)            │
//! │N│V│V│V│       │S│             │                               │
//! │ │1│2│3│       │K│             │                               │
//! └─┴─┴─┴─┴───────┴─┴─────────────┴───────────────────────────────┘
//!   then a 4-byte masking key if MASK is set, then the payload
//! ```
//!
//! All multi-byte integers are Big Endian.

use std::ops::Deref;

use crate::error::{Result, WsError};

/// FIN bit in byte 0.
pub const FIN_BIT: u8 = 0b1000_0000;
/// RSV1 bit in byte 0 (permessage-deflate).
pub const RSV1_BIT: u8 = 0b0100_0000;
/// RSV2 bit in byte 0.
pub const RSV2_BIT: u8 = 0b0010_0000;
/// RSV3 bit in byte 0.
pub const RSV3_BIT: u8 = 0b0001_0000;
/// All reserved bits in byte 0.
pub const RSV_MASK: u8 = RSV1_BIT | RSV2_BIT | RSV3_BIT;
/// Opcode nibble in byte 0.
pub const OPCODE_MASK: u8 = 0b0000_1111;
/// MASK bit in byte 1.
pub const MASK_BIT: u8 = 0b1000_0000;
/// 7-bit length field in byte 1.
pub const LEN7_MASK: u8 = 0b0111_1111;

/// Marker for the 16-bit extended length.
pub const LEN16_MARKER: u8 = 126;
/// Marker for the 64-bit extended length.
pub const LEN64_MARKER: u8 = 127;

/// Largest possible header: 2 fixed bytes, 8 length bytes, 4 mask bytes.
pub const MAX_HEADER_SIZE: usize = 14;

/// Control frame payloads are limited to 125 bytes.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Default fragment size for outgoing data frames (`u16::MAX / 2`).
pub const DEFAULT_MAX_FRAGMENT_SIZE: usize = 32_767;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    /// Close, Ping and Pong.
    #[inline]
    pub fn is_control(self) -> bool {
        (self as u8) & 0x8 != 0
    }

    /// Text and Binary. Continuation is neither data nor control.
    #[inline]
    pub fn is_data(self) -> bool {
        matches!(self, OpCode::Text | OpCode::Binary)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WsError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(WsError::Protocol(format!(
                "Reserved opcode 0x{other:X}"
            ))),
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    /// Reserved bits exactly as they sit in byte 0 (`RSV_MASK` positions).
    pub rsv: u8,
    pub opcode: OpCode,
    pub payload_len: u64,
    /// Present iff the MASK bit is set.
    pub mask_key: Option<[u8; 4]>,
}

impl FrameHeader {
    /// Create an unmasked header with no reserved bits.
    pub fn new(fin: bool, opcode: OpCode, payload_len: u64) -> Self {
        Self {
            fin,
            rsv: 0,
            opcode,
            payload_len,
            mask_key: None,
        }
    }

    /// Byte 0: FIN, RSV and opcode.
    #[inline]
    pub fn first_byte(&self) -> u8 {
        let fin = if self.fin { FIN_BIT } else { 0 };
        fin | (self.rsv & RSV_MASK) | self.opcode as u8
    }

    /// Number of bytes [`encode`](Self::encode) produces.
    pub fn encoded_len(&self) -> usize {
        let ext = match self.payload_len {
            0..=125 => 0,
            126..=0xFFFF => 2,
            _ => 8,
        };
        let mask = if self.mask_key.is_some() { 4 } else { 0 };
        2 + ext + mask
    }

    /// Encode to a stack buffer.
    ///
    /// # Example
    ///
    /// ```
    /// use wsarena::protocol::{FrameHeader, OpCode};
    ///
    /// let header = FrameHeader::new(true, OpCode::Binary, 130);
    /// assert_eq!(&header.encode()[..], &[0x82, 0x7E, 0x00, 0x82]);
    /// ```
    pub fn encode(&self) -> EncodedHeader {
        let mut bytes = [0u8; MAX_HEADER_SIZE];
        let len = self.encode_into(&mut bytes);
        EncodedHeader { bytes, len }
    }

    /// Encode into `buf`, returning the number of bytes written.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than [`encoded_len`](Self::encoded_len).
    pub fn encode_into(&self, buf: &mut [u8]) -> usize {
        let mask = if self.mask_key.is_some() { MASK_BIT } else { 0 };
        buf[0] = self.first_byte();

        let mut pos = match self.payload_len {
            len @ 0..=125 => {
                buf[1] = mask | len as u8;
                2
            }
            len @ 126..=0xFFFF => {
                buf[1] = mask | LEN16_MARKER;
                buf[2..4].copy_from_slice(&(len as u16).to_be_bytes());
                4
            }
            len => {
                buf[1] = mask | LEN64_MARKER;
                buf[2..10].copy_from_slice(&len.to_be_bytes());
                10
            }
        };

        if let Some(key) = self.mask_key {
            buf[pos..pos + 4].copy_from_slice(&key);
            pos += 4;
        }
        pos
    }

    /// Decode a header from the front of `buf`.
    ///
    /// Returns `Ok(None)` if more bytes are needed, otherwise the header and
    /// the number of bytes it occupied.
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let masked = buf[1] & MASK_BIT != 0;
        let ext = match buf[1] & LEN7_MASK {
            LEN16_MARKER => 2,
            LEN64_MARKER => 8,
            _ => 0,
        };
        let total = 2 + ext + if masked { 4 } else { 0 };
        if buf.len() < total {
            return Ok(None);
        }

        let (fin, rsv, opcode) = split_first_byte(buf[0])?;
        let payload_len = match ext {
            2 => u16::from_be_bytes([buf[2], buf[3]]) as u64,
            8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                validate_len64(u64::from_be_bytes(raw))?
            }
            _ => (buf[1] & LEN7_MASK) as u64,
        };
        let mask_key = if masked {
            let at = 2 + ext;
            Some([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
        } else {
            None
        };

        Ok(Some((
            Self {
                fin,
                rsv,
                opcode,
                payload_len,
                mask_key,
            },
            total,
        )))
    }

    /// Check control-frame rules: FIN set and payload at most 125 bytes.
    pub fn validate(&self) -> Result<()> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(WsError::Protocol(format!(
                    "Fragmented control frame {:?}",
                    self.opcode
                )));
            }
            if self.payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(WsError::Protocol(format!(
                    "Control frame payload {} exceeds {}",
                    self.payload_len, MAX_CONTROL_PAYLOAD
                )));
            }
        }
        Ok(())
    }
}

/// Split byte 0 into FIN, reserved bits and opcode.
pub(crate) fn split_first_byte(byte: u8) -> Result<(bool, u8, OpCode)> {
    let opcode = OpCode::try_from(byte & OPCODE_MASK)?;
    Ok((byte & FIN_BIT != 0, byte & RSV_MASK, opcode))
}

/// The most significant bit of a 64-bit length must be zero.
pub(crate) fn validate_len64(len: u64) -> Result<u64> {
    if len & (1 << 63) != 0 {
        return Err(WsError::MalformedFrame(format!(
            "64-bit payload length 0x{len:016X} has the top bit set"
        )));
    }
    Ok(len)
}

/// An encoded header held on the stack.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EncodedHeader {
    bytes: [u8; MAX_HEADER_SIZE],
    len: usize,
}

impl EncodedHeader {
    /// Copy an already encoded header. `None` if it is longer than 14 bytes.
    pub fn from_slice(src: &[u8]) -> Option<Self> {
        if src.len() > MAX_HEADER_SIZE {
            return None;
        }
        let mut bytes = [0u8; MAX_HEADER_SIZE];
        bytes[..src.len()].copy_from_slice(src);
        Some(Self {
            bytes,
            len: src.len(),
        })
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl Deref for EncodedHeader {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_bytes()
    }
}

impl AsRef<[u8]> for EncodedHeader {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl std::fmt::Debug for EncodedHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EncodedHeader").field(&self.as_bytes()).finish()
    }
}
