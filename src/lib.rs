//! # wsarena
//!
//! Pooled buffers and an RFC 6455 WebSocket frame codec.
//!
//! Buffers for payloads, scratch space and reassembled messages come from a
//! shared [`BufferArena`] that keeps freed blocks in power-of-two size classes
//! and hands them back on the next request of a similar size.
//!
//! ## Architecture
//!
//! - **Memory**: [`BufferArena`], [`Buffer`], [`BufferView`], [`PooledBuffer`]
//! - **Protocol**: [`FrameWriter`] encodes, masks and fragments;
//!   [`FrameReader`] decodes, unmasks, assembles and decodes extensions
//! - **Extensions**: a per-connection pipeline, e.g. permessage-deflate
//! - **Transport**: [`FrameSink`] for blocking output, [`ChunkQueue`] and
//!   [`write_chunks`](transport::write_chunks) for async output
//!
//! ## Example
//!
//! ```
//! use std::io::Cursor;
//! use wsarena::memory::ArenaConfig;
//! use wsarena::{BufferArena, FrameContext, FrameReader};
//!
//! let arena = BufferArena::shared(ArenaConfig::default());
//! let mut ctx = FrameContext::new(arena.clone());
//!
//! let mut wire = Vec::new();
//! ctx.send_binary(&mut wire, b"payload").unwrap();
//!
//! let frame = FrameReader::read(&mut Cursor::new(wire), &arena).unwrap();
//! assert_eq!(frame.data(), Some(&b"payload"[..]));
//! ```

pub mod context;
pub mod error;
pub mod extension;
pub mod memory;
pub mod protocol;
pub mod transport;

pub use context::{CodecConfig, FrameContext, MaskKeySource};
pub use error::{Result, WsError};
pub use extension::{Extension, PerMessageDeflate};
pub use memory::{ArenaConfig, Buffer, BufferArena, BufferView, PooledBuffer};
pub use protocol::{FrameReader, FrameWriter, Message, MessageAssembler, OpCode};
pub use transport::{ChunkQueue, FrameSink};
