//! Outgoing frame builder.
//!
//! A [`FrameWriter`] owns (or borrows) one message payload and turns it into
//! wire fragments:
//!
//! 1. the extension pipeline sets reserved bits and may replace the payload
//! 2. Text/Binary payloads above `max_fragment_size` are split; the first
//!    fragment keeps the opcode and RSV bits, the rest are Continuation
//! 3. each fragment gets its header and, if requested, a fresh mask key
//!
//! Fragments go to a [`FrameSink`] strictly in order.
//!
//! # Example
//!
//! ```
//! use wsarena::{BufferArena, FrameContext, FrameWriter};
//! use wsarena::memory::{ArenaConfig, BufferView};
//! use wsarena::protocol::OpCode;
//!
//! let mut ctx = FrameContext::new(BufferArena::shared(ArenaConfig::default()));
//! let payload = [7u8; 100];
//!
//! let mut wire = Vec::new();
//! let writer = FrameWriter::new(&mut ctx, OpCode::Binary, BufferView::whole(&payload), true, false, false).unwrap();
//! writer.write_to(&mut wire, 64, false).unwrap();
//!
//! // Two fragments: 2 + 64 and 2 + 36 bytes.
//! assert_eq!(wire.len(), 104);
//! assert_eq!(&wire[..2], &[0x02, 64]);
//! assert_eq!(&wire[66..68], &[0x80, 36]);
//! ```

use std::sync::Arc;

use super::mask::apply_mask;
use super::wire_format::{FrameHeader, OpCode, FIN_BIT, MAX_CONTROL_PAYLOAD, RSV_MASK};
use crate::context::FrameContext;
use crate::error::{Result, WsError};
use crate::extension::FrameInfo;
use crate::memory::{BufferArena, BufferView, PooledBuffer};
use crate::transport::FrameSink;

/// Payload of a frame being written.
enum Payload<'a> {
    /// Caller-owned bytes. Masking goes through a scratch buffer.
    Borrowed(BufferView<'a>),
    /// Arena buffer owned by the writer. Masked in place.
    Pooled(PooledBuffer),
}

fn payload_bytes<'p>(payload: &'p Payload<'_>) -> &'p [u8] {
    match payload {
        Payload::Borrowed(view) => view.as_slice(),
        Payload::Pooled(buf) => buf.as_slice(),
    }
}

/// One outgoing message, possibly written as several fragments.
pub struct FrameWriter<'a> {
    ctx: &'a mut FrameContext,
    opcode: OpCode,
    /// Byte 0 of the first fragment: FIN, RSV bits, opcode.
    header: u8,
    payload: Payload<'a>,
    use_extensions: bool,
}

impl<'a> FrameWriter<'a> {
    /// Create a writer over `payload`.
    ///
    /// With `copy_data` the bytes are copied into an arena buffer owned by
    /// the writer, so the caller's buffer can be reused immediately and
    /// masking happens in place.
    pub fn new(
        ctx: &'a mut FrameContext,
        opcode: OpCode,
        payload: BufferView<'a>,
        fin: bool,
        use_extensions: bool,
        copy_data: bool,
    ) -> Result<Self> {
        let payload = if copy_data {
            let mut owned = ctx.arena().lease(payload.count(), true)?;
            owned.copy_from_slice(payload.as_slice());
            Payload::Pooled(owned)
        } else {
            Payload::Borrowed(payload)
        };
        Ok(Self::build(ctx, opcode, payload, fin, use_extensions))
    }

    /// Create a writer that takes ownership of an arena buffer.
    pub fn from_pooled(
        ctx: &'a mut FrameContext,
        opcode: OpCode,
        payload: PooledBuffer,
        fin: bool,
        use_extensions: bool,
    ) -> Self {
        Self::build(ctx, opcode, Payload::Pooled(payload), fin, use_extensions)
    }

    fn build(
        ctx: &'a mut FrameContext,
        opcode: OpCode,
        payload: Payload<'a>,
        fin: bool,
        use_extensions: bool,
    ) -> Self {
        let fin_bit = if fin { FIN_BIT } else { 0 };
        Self {
            ctx,
            opcode,
            header: fin_bit | opcode as u8,
            payload,
            use_extensions,
        }
    }

    /// Byte 0 of the first fragment.
    #[inline]
    pub fn header(&self) -> u8 {
        self.header
    }

    #[inline]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    #[inline]
    pub fn is_final(&self) -> bool {
        self.header & FIN_BIT != 0
    }

    /// Current payload bytes.
    pub fn payload(&self) -> &[u8] {
        payload_bytes(&self.payload)
    }

    /// Run the extensions, fragment, mask and hand every fragment to `sink`.
    ///
    /// Returns the total number of bytes emitted. Buffers owned by the
    /// writer go back to the arena when it returns, on error paths too.
    pub fn write_to<S: FrameSink + ?Sized>(
        mut self,
        sink: &mut S,
        max_fragment_size: usize,
        mask: bool,
    ) -> Result<usize> {
        let arena = Arc::clone(self.ctx.arena());

        if self.use_extensions {
            self.apply_extensions(&arena)?;
        }

        let len = self.payload().len();
        if self.opcode.is_control() && len > MAX_CONTROL_PAYLOAD {
            return Err(WsError::Protocol(format!(
                "Control frame payload {len} exceeds {MAX_CONTROL_PAYLOAD}"
            )));
        }

        let max_fragment_size = max_fragment_size.max(1);
        let fragmenting = self.opcode.is_data() && len > max_fragment_size;
        let chunk_cap = if fragmenting { max_fragment_size } else { len };

        let mut scratch = match (&self.payload, mask) {
            (Payload::Borrowed(_), true) => Some(arena.lease(chunk_cap, true)?),
            _ => None,
        };

        let fin = self.is_final();
        let rsv = self.header & RSV_MASK;
        let mut offset = 0;
        let mut fragments = 0;
        let mut written = 0;
        loop {
            let end = (offset + chunk_cap).min(len);
            let (opcode, rsv) = if offset == 0 {
                (self.opcode, rsv)
            } else {
                (OpCode::Continuation, 0)
            };
            let mask_key = if mask {
                Some(self.ctx.next_mask_key())
            } else {
                None
            };
            let header = FrameHeader {
                fin: fin && end == len,
                rsv,
                opcode,
                payload_len: (end - offset) as u64,
                mask_key,
            }
            .encode();

            match (&mut self.payload, mask_key) {
                (Payload::Pooled(buf), key) => {
                    let chunk = &mut buf.as_mut_slice()[offset..end];
                    if let Some(key) = key {
                        apply_mask(chunk, key);
                    }
                    sink.emit(header.as_bytes(), chunk)?;
                }
                (Payload::Borrowed(view), key) => {
                    let chunk = &view.as_slice()[offset..end];
                    match (key, scratch.as_mut()) {
                        (Some(key), Some(scratch)) => {
                            scratch.set_len(chunk.len());
                            scratch.copy_from_slice(chunk);
                            apply_mask(scratch.as_mut_slice(), key);
                            sink.emit(header.as_bytes(), scratch.as_slice())?;
                        }
                        _ => sink.emit(header.as_bytes(), chunk)?,
                    }
                }
            }

            written += header.len() + (end - offset);
            fragments += 1;
            offset = end;
            if offset >= len {
                break;
            }
        }

        tracing::trace!(
            conn = self.ctx.label(),
            opcode = ?self.opcode,
            len,
            fragments,
            masked = mask,
            "frame written"
        );
        Ok(written)
    }

    fn apply_extensions(&mut self, arena: &Arc<BufferArena>) -> Result<()> {
        for ext in self.ctx.extensions_mut() {
            let mut info = FrameInfo {
                opcode: self.opcode,
                header: self.header,
                payload_len: payload_bytes(&self.payload).len(),
            };
            self.header = ext.encode_header_bits(&info, self.header);
            info.header = self.header;

            if let Some(encoded) = ext.encode(&info, payload_bytes(&self.payload), arena)? {
                // Replacing a pooled payload releases it.
                self.payload = Payload::Pooled(encoded);
            }
        }
        Ok(())
    }
}
