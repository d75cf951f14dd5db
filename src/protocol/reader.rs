//! Incoming frame parser.
//!
//! A [`FrameReader`] is one frame read off the wire with its payload already
//! unmasked into an arena buffer. Fragments of one message are merged with
//! [`assemble`](FrameReader::assemble) and the result is run through the
//! extension pipeline with [`decode_with_extensions`](FrameReader::decode_with_extensions).
//!
//! ```text
//! read ──► Read ──assemble──► Assembled ──decode──► Decoded ──► Released
//!           └──────────────────decode──────────────────┘
//! ```
//!
//! The payload buffer goes back to the arena on [`release_data`](FrameReader::release_data)
//! or when the reader is dropped, whichever comes first.

use std::fmt;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};

use super::mask::apply_mask;
use super::wire_format::{
    split_first_byte, validate_len64, FrameHeader, OpCode, FIN_BIT, LEN16_MARKER, LEN64_MARKER,
    LEN7_MASK, MASK_BIT, RSV_MASK,
};
use crate::context::FrameContext;
use crate::error::{Result, WsError};
use crate::memory::{Buffer, BufferArena, PooledBuffer};

/// Where a [`FrameReader`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// Parsed and unmasked.
    Read,
    /// Merged from fragments.
    Assembled,
    /// Extensions applied; Text payloads are decoded to a string.
    Decoded,
    /// Payload buffer returned to the arena.
    Released,
}

/// The first two header bytes, decoded.
struct Prefix {
    fin: bool,
    rsv: u8,
    opcode: OpCode,
    masked: bool,
    len7: u8,
}

impl Prefix {
    fn parse(bytes: [u8; 2]) -> Result<Self> {
        let (fin, rsv, opcode) = split_first_byte(bytes[0])?;
        Ok(Self {
            fin,
            rsv,
            opcode,
            masked: bytes[1] & MASK_BIT != 0,
            len7: bytes[1] & LEN7_MASK,
        })
    }

    /// Number of extended length bytes that follow.
    fn ext_len(&self) -> usize {
        match self.len7 {
            LEN16_MARKER => 2,
            LEN64_MARKER => 8,
            _ => 0,
        }
    }

    fn payload_len(&self, ext: &[u8]) -> Result<u64> {
        match *ext {
            [] => Ok(self.len7 as u64),
            [hi, lo] => Ok(u16::from_be_bytes([hi, lo]) as u64),
            [a, b, c, d, e, f, g, h] => validate_len64(u64::from_be_bytes([a, b, c, d, e, f, g, h])),
            _ => Err(WsError::MalformedFrame(format!(
                "extended length of {} bytes",
                ext.len()
            ))),
        }
    }

    fn into_header(self, payload_len: u64, mask_key: Option<[u8; 4]>) -> FrameHeader {
        FrameHeader {
            fin: self.fin,
            rsv: self.rsv,
            opcode: self.opcode,
            payload_len,
            mask_key,
        }
    }
}

/// Check header rules and the caller's size limit, returning the length as `usize`.
fn checked_len(header: &FrameHeader, max_payload: u64) -> Result<usize> {
    header.validate()?;
    if header.payload_len > max_payload {
        return Err(WsError::Protocol(format!(
            "Frame payload {} exceeds limit {}",
            header.payload_len, max_payload
        )));
    }
    usize::try_from(header.payload_len).map_err(|_| WsError::AllocationFailure {
        requested: usize::MAX,
    })
}

/// Text and Continuation payloads come from the pool; others are allocated fresh.
fn alloc_payload(arena: &Arc<BufferArena>, opcode: OpCode, len: usize) -> Result<PooledBuffer> {
    match opcode {
        OpCode::Text | OpCode::Continuation => arena.lease(len, true),
        _ => Ok(PooledBuffer::adopt(Arc::clone(arena), Buffer::alloc(len)?)),
    }
}

/// One frame read from the wire.
pub struct FrameReader {
    header: u8,
    fin: bool,
    opcode: OpCode,
    has_mask: bool,
    length: u64,
    data: Option<PooledBuffer>,
    text: Option<String>,
    arena: Arc<BufferArena>,
    state: ReadState,
}

impl FrameReader {
    /// Read one frame from a blocking stream.
    ///
    /// A stream that ends mid-frame yields [`WsError::ConnectionClosed`].
    pub fn read<R: io::Read + ?Sized>(stream: &mut R, arena: &Arc<BufferArena>) -> Result<Self> {
        Self::read_limited(stream, arena, u64::MAX)
    }

    /// Like [`read`](Self::read), rejecting payloads longer than `max_payload`
    /// before allocating.
    pub fn read_limited<R: io::Read + ?Sized>(
        stream: &mut R,
        arena: &Arc<BufferArena>,
        max_payload: u64,
    ) -> Result<Self> {
        let mut head = [0u8; 2];
        stream.read_exact(&mut head)?;
        let prefix = Prefix::parse(head)?;

        let mut ext = [0u8; 8];
        let ext = &mut ext[..prefix.ext_len()];
        stream.read_exact(ext)?;
        let payload_len = prefix.payload_len(ext)?;

        let mask_key = if prefix.masked {
            let mut key = [0u8; 4];
            stream.read_exact(&mut key)?;
            Some(key)
        } else {
            None
        };

        let header = prefix.into_header(payload_len, mask_key);
        let len = checked_len(&header, max_payload)?;
        let mut data = alloc_payload(arena, header.opcode, len)?;
        stream.read_exact(data.as_mut_slice())?;

        Ok(Self::from_parts(header, data, arena))
    }

    /// Read one frame from an async stream.
    pub async fn read_async<R: AsyncRead + Unpin + ?Sized>(
        stream: &mut R,
        arena: &Arc<BufferArena>,
        max_payload: u64,
    ) -> Result<Self> {
        let mut head = [0u8; 2];
        stream.read_exact(&mut head).await?;
        let prefix = Prefix::parse(head)?;

        let mut ext = [0u8; 8];
        let ext = &mut ext[..prefix.ext_len()];
        stream.read_exact(ext).await?;
        let payload_len = prefix.payload_len(ext)?;

        let mask_key = if prefix.masked {
            let mut key = [0u8; 4];
            stream.read_exact(&mut key).await?;
            Some(key)
        } else {
            None
        };

        let header = prefix.into_header(payload_len, mask_key);
        let len = checked_len(&header, max_payload)?;
        let mut data = alloc_payload(arena, header.opcode, len)?;
        stream.read_exact(data.as_mut_slice()).await?;

        Ok(Self::from_parts(header, data, arena))
    }

    fn from_parts(header: FrameHeader, mut data: PooledBuffer, arena: &Arc<BufferArena>) -> Self {
        if let Some(key) = header.mask_key {
            apply_mask(data.as_mut_slice(), key);
        }
        tracing::trace!(
            opcode = ?header.opcode,
            fin = header.fin,
            len = header.payload_len,
            masked = header.mask_key.is_some(),
            "frame read"
        );
        Self {
            header: header.first_byte(),
            fin: header.fin,
            opcode: header.opcode,
            has_mask: header.mask_key.is_some(),
            length: header.payload_len,
            data: Some(data),
            text: None,
            arena: Arc::clone(arena),
            state: ReadState::Read,
        }
    }

    /// Merge this final fragment with the fragments that preceded it.
    ///
    /// Header and opcode come from the first fragment, since reserved bits
    /// are only defined there. Each fragment's buffer is released as soon as
    /// it has been copied.
    pub fn assemble(self, mut fragments: Vec<FrameReader>) -> Result<FrameReader> {
        fragments.push(self);

        let total = fragments.iter().try_fold(0usize, |sum, f| {
            sum.checked_add(f.data().map_or(0, <[u8]>::len))
                .ok_or(WsError::AllocationFailure {
                    requested: usize::MAX,
                })
        })?;

        let first = &fragments[0];
        let (header, opcode, has_mask) = (first.header, first.opcode, first.has_mask);
        let arena = Arc::clone(&first.arena);
        let mut merged = arena.lease(total, true)?;

        let mut offset = 0;
        for fragment in &mut fragments {
            if let Some(data) = fragment.data.take() {
                merged[offset..offset + data.len()].copy_from_slice(&data);
                offset += data.len();
            }
            fragment.state = ReadState::Released;
        }

        tracing::debug!(
            ?opcode,
            fragments = fragments.len(),
            len = total,
            "fragments assembled"
        );

        Ok(FrameReader {
            header: header | FIN_BIT,
            fin: true,
            opcode,
            has_mask,
            length: total as u64,
            data: Some(merged),
            text: None,
            arena,
            state: ReadState::Assembled,
        })
    }

    /// Run the connection's extension pipeline over the payload.
    ///
    /// Text payloads are then decoded to a `String` and their buffer is
    /// released; afterwards only [`text`](Self::text) is available.
    ///
    /// Extensions may not expand the payload past the context's
    /// `max_message_size`.
    pub fn decode_with_extensions(&mut self, ctx: &mut FrameContext) -> Result<()> {
        let max_len = ctx.config().max_message_size;
        if let Some(mut data) = self.data.take() {
            for ext in ctx.extensions_mut() {
                if let Some(decoded) = ext.decode(self.header, &data, &self.arena, max_len)? {
                    // The replaced buffer is released here.
                    data = decoded;
                }
            }
            self.length = data.len() as u64;

            if self.opcode == OpCode::Text {
                self.text = Some(std::str::from_utf8(&data)?.to_owned());
                drop(data);
                self.state = ReadState::Decoded;
                return Ok(());
            }
            self.data = Some(data);
        }
        self.state = ReadState::Decoded;
        Ok(())
    }

    /// Return the payload buffer to the arena. Safe to call more than once.
    pub fn release_data(&mut self) {
        if let Some(data) = self.data.take() {
            data.release();
        }
        self.state = ReadState::Released;
    }

    /// Byte 0 as read: FIN, RSV bits and opcode.
    #[inline]
    pub fn header(&self) -> u8 {
        self.header
    }

    #[inline]
    pub fn rsv(&self) -> u8 {
        self.header & RSV_MASK
    }

    #[inline]
    pub fn is_final(&self) -> bool {
        self.fin
    }

    #[inline]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    #[inline]
    pub fn has_mask(&self) -> bool {
        self.has_mask
    }

    /// Payload length: declared on the wire, or after assembly/decoding.
    #[inline]
    pub fn len(&self) -> u64 {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline]
    pub fn state(&self) -> ReadState {
        self.state
    }

    /// Payload bytes, unless released or decoded to text.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Take ownership of the payload buffer.
    pub fn take_data(&mut self) -> Option<PooledBuffer> {
        self.data.take()
    }

    /// Decoded text of a Text message.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn take_text(&mut self) -> Option<String> {
        self.text.take()
    }
}

impl fmt::Debug for FrameReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameReader")
            .field("opcode", &self.opcode)
            .field("fin", &self.fin)
            .field("rsv", &self.rsv())
            .field("length", &self.length)
            .field("state", &self.state)
            .finish()
    }
}
