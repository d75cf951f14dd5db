//! Frame extensions.
//!
//! An extension sees every outgoing frame before fragmentation and every
//! incoming message after reassembly. The pipeline is an ordered list of
//! trait objects held by [`FrameContext`](crate::FrameContext):
//!
//! - outgoing: `encode_header_bits` then `encode`, in registration order
//! - incoming: `decode`, in registration order
//!
//! A stage that transforms the payload returns a new arena buffer; the
//! previous buffer is released by the caller.

mod deflate;

use std::sync::Arc;

pub use deflate::{DeflateConfig, PerMessageDeflate, DEFAULT_MIN_LENGTH_TO_COMPRESS};

use crate::error::Result;
use crate::memory::{BufferArena, PooledBuffer};
use crate::protocol::OpCode;

/// What an extension gets to know about an outgoing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub opcode: OpCode,
    /// Byte 0 of the header as built so far (FIN, RSV bits, opcode).
    pub header: u8,
    pub payload_len: usize,
}

/// A negotiated WebSocket extension.
pub trait Extension: Send {
    /// Registered extension token, e.g. `permessage-deflate`.
    fn name(&self) -> &str;

    /// Return `header` with this extension's reserved bits applied.
    fn encode_header_bits(&self, frame: &FrameInfo, header: u8) -> u8;

    /// Transform an outgoing payload.
    ///
    /// `frame.header` already carries the bits from `encode_header_bits`.
    /// Returns `None` to leave the payload untouched.
    fn encode(
        &mut self,
        frame: &FrameInfo,
        payload: &[u8],
        arena: &Arc<BufferArena>,
    ) -> Result<Option<PooledBuffer>>;

    /// Transform an incoming payload given byte 0 of its first frame.
    ///
    /// An output longer than `max_len` is a protocol error, raised before
    /// more than about `max_len` bytes are allocated.
    /// Returns `None` to leave the payload untouched.
    fn decode(
        &mut self,
        header: u8,
        payload: &[u8],
        arena: &Arc<BufferArena>,
        max_len: usize,
    ) -> Result<Option<PooledBuffer>>;
}
