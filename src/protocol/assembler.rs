//! Message reassembly.
//!
//! Turns a sequence of [`FrameReader`]s into complete messages:
//! - `Idle`: no fragmented message in progress
//! - `Fragmented`: a Text/Binary frame without FIN was seen; Continuation
//!   frames are collected until one carries FIN
//!
//! Control frames may arrive between fragments and are delivered at once.

use std::io;

use bytes::Bytes;
use tokio::io::AsyncRead;

use super::close::CloseFrame;
use super::reader::FrameReader;
use super::wire_format::OpCode;
use crate::context::FrameContext;
use crate::error::{Result, WsError};
use crate::memory::{Buffer, PooledBuffer};

/// A complete message.
#[derive(Debug)]
pub enum Message {
    Text(String),
    Binary(PooledBuffer),
    Ping(Bytes),
    Pong(Bytes),
    Close(CloseFrame),
}

impl Message {
    pub fn opcode(&self) -> OpCode {
        match self {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
            Message::Ping(_) => OpCode::Ping,
            Message::Pong(_) => OpCode::Pong,
            Message::Close(_) => OpCode::Close,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Fragmented { opcode: OpCode, len: u64 },
}

/// Collects fragments and yields whole messages.
#[derive(Debug)]
pub struct MessageAssembler {
    fragments: Vec<FrameReader>,
    state: State,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self {
            fragments: Vec::new(),
            state: State::Idle,
        }
    }

    /// Feed one frame.
    ///
    /// Returns `Ok(None)` while a fragmented message is still incomplete.
    /// Ordering violations and oversized messages are protocol errors and
    /// reset the assembler.
    pub fn push(&mut self, frame: FrameReader, ctx: &mut FrameContext) -> Result<Option<Message>> {
        let result = self.push_inner(frame, ctx);
        if let Err(e) = &result {
            tracing::warn!(conn = ctx.label(), error = %e, "dropping partial message");
            self.clear();
        }
        result
    }

    fn push_inner(&mut self, frame: FrameReader, ctx: &mut FrameContext) -> Result<Option<Message>> {
        if frame.opcode().is_control() {
            return control_message(frame).map(Some);
        }
        let max = ctx.config().max_message_size as u64;

        match (frame.opcode(), self.state) {
            (OpCode::Continuation, State::Idle) => Err(WsError::Protocol(
                "Continuation frame without a preceding data frame".to_string(),
            )),

            (OpCode::Continuation, State::Fragmented { opcode, len }) => {
                let len = len.saturating_add(frame.len());
                check_size(len, max)?;
                if frame.is_final() {
                    let fragments = std::mem::take(&mut self.fragments);
                    self.state = State::Idle;
                    let assembled = frame.assemble(fragments)?;
                    data_message(assembled, ctx).map(Some)
                } else {
                    self.state = State::Fragmented { opcode, len };
                    self.fragments.push(frame);
                    Ok(None)
                }
            }

            (_, State::Fragmented { opcode, .. }) => {
                Err(WsError::Protocol(format!(
                    "{:?} frame while a fragmented {:?} message is in progress",
                    frame.opcode(),
                    opcode
                )))
            }

            (_, State::Idle) => {
                check_size(frame.len(), max)?;
                if frame.is_final() {
                    data_message(frame, ctx).map(Some)
                } else {
                    self.state = State::Fragmented {
                        opcode: frame.opcode(),
                        len: frame.len(),
                    };
                    self.fragments.push(frame);
                    Ok(None)
                }
            }
        }
    }

    /// Read frames from a blocking stream until a message is complete.
    pub fn read_message<R: io::Read + ?Sized>(
        &mut self,
        stream: &mut R,
        ctx: &mut FrameContext,
    ) -> Result<Message> {
        let max = ctx.config().max_message_size as u64;
        loop {
            let frame = FrameReader::read_limited(stream, ctx.arena(), max)?;
            if let Some(message) = self.push(frame, ctx)? {
                return Ok(message);
            }
        }
    }

    /// Read frames from an async stream until a message is complete.
    pub async fn read_message_async<R: AsyncRead + Unpin + ?Sized>(
        &mut self,
        stream: &mut R,
        ctx: &mut FrameContext,
    ) -> Result<Message> {
        let max = ctx.config().max_message_size as u64;
        loop {
            let frame = FrameReader::read_async(stream, ctx.arena(), max).await?;
            if let Some(message) = self.push(frame, ctx)? {
                return Ok(message);
            }
        }
    }

    /// Number of buffered fragments.
    pub fn pending(&self) -> usize {
        self.fragments.len()
    }

    /// Whether a fragmented message is in progress.
    pub fn is_fragmented(&self) -> bool {
        matches!(self.state, State::Fragmented { .. })
    }

    /// Drop buffered fragments, returning their buffers to the arena.
    pub fn clear(&mut self) {
        self.fragments.clear();
        self.state = State::Idle;
    }
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new()
    }
}

fn check_size(len: u64, max: u64) -> Result<()> {
    if len > max {
        return Err(WsError::Protocol(format!(
            "Message of {len} bytes exceeds limit {max}"
        )));
    }
    Ok(())
}

fn control_message(mut frame: FrameReader) -> Result<Message> {
    let payload = frame.data().unwrap_or_default();
    let message = match frame.opcode() {
        OpCode::Ping => Message::Ping(Bytes::copy_from_slice(payload)),
        OpCode::Pong => Message::Pong(Bytes::copy_from_slice(payload)),
        _ => Message::Close(CloseFrame::parse(payload)?),
    };
    frame.release_data();
    Ok(message)
}

fn data_message(mut frame: FrameReader, ctx: &mut FrameContext) -> Result<Message> {
    frame.decode_with_extensions(ctx)?;
    check_size(frame.len(), ctx.config().max_message_size as u64)?;

    if let Some(text) = frame.take_text() {
        return Ok(Message::Text(text));
    }
    let data = match frame.take_data() {
        Some(data) => data,
        None => PooledBuffer::adopt(std::sync::Arc::clone(ctx.arena()), Buffer::empty()),
    };
    Ok(Message::Binary(data))
}
