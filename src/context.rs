//! Per-connection codec state.
//!
//! A [`FrameContext`] bundles what frame writers and readers need from the
//! connection that owns them: the shared [`BufferArena`], the negotiated
//! extension pipeline, codec limits and the source of mask keys.
//!
//! # Example
//!
//! ```
//! use wsarena::{BufferArena, FrameContext};
//! use wsarena::memory::ArenaConfig;
//!
//! let arena = BufferArena::shared(ArenaConfig::default());
//! let mut ctx = FrameContext::new(arena);
//!
//! let mut wire = Vec::new();
//! ctx.send_text(&mut wire, "hello").unwrap();
//! assert_eq!(wire[0], 0x81);
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WsError};
use crate::extension::Extension;
use crate::memory::{BufferArena, BufferView};
use crate::protocol::{encode_close_payload, CloseCode, FrameWriter, OpCode, DEFAULT_MAX_FRAGMENT_SIZE};
use crate::transport::FrameSink;

/// Default cap on a reassembled message (64 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Codec limits for one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Outgoing Text/Binary payloads above this are fragmented.
    pub max_fragment_size: usize,
    /// Incoming frames and reassembled messages above this are rejected.
    pub max_message_size: usize,
    /// Mask outgoing frames (required for clients).
    pub mask_outgoing: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_fragment_size: DEFAULT_MAX_FRAGMENT_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            mask_outgoing: true,
        }
    }
}

impl CodecConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_fragment_size == 0 {
            return Err(WsError::InvalidConfig(
                "max_fragment_size must be at least 1".to_string(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(WsError::InvalidConfig(
                "max_message_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where mask keys come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaskKeySource {
    /// A fresh random key per frame.
    #[default]
    Random,
    /// The same key for every frame. Only for tests and reproducible captures.
    Fixed([u8; 4]),
}

/// Codec state shared by all frames of one connection.
pub struct FrameContext {
    arena: Arc<BufferArena>,
    extensions: Vec<Box<dyn Extension>>,
    config: CodecConfig,
    mask_keys: MaskKeySource,
    label: Option<String>,
}

impl FrameContext {
    /// Create a context with default limits, random mask keys and no extensions.
    pub fn new(arena: Arc<BufferArena>) -> Self {
        Self {
            arena,
            extensions: Vec::new(),
            config: CodecConfig::default(),
            mask_keys: MaskKeySource::Random,
            label: None,
        }
    }

    /// Append an extension to the pipeline.
    pub fn with_extension(mut self, extension: impl Extension + 'static) -> Self {
        self.extensions.push(Box::new(extension));
        self
    }

    /// Replace the codec limits.
    pub fn with_config(mut self, config: CodecConfig) -> Self {
        self.config = config;
        self
    }

    /// Choose where mask keys come from.
    pub fn with_mask_keys(mut self, source: MaskKeySource) -> Self {
        self.mask_keys = source;
        self
    }

    /// Name attached to this connection's log events.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The arena all buffers of this connection come from.
    #[inline]
    pub fn arena(&self) -> &Arc<BufferArena> {
        &self.arena
    }

    /// Current codec limits.
    #[inline]
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Log label, `-` when none was set.
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("-")
    }

    /// The extension pipeline in registration order.
    pub fn extensions(&self) -> &[Box<dyn Extension>] {
        &self.extensions
    }

    pub(crate) fn extensions_mut(&mut self) -> &mut [Box<dyn Extension>] {
        &mut self.extensions
    }

    /// Key for the next masked frame.
    pub fn next_mask_key(&mut self) -> [u8; 4] {
        match self.mask_keys {
            MaskKeySource::Random => rand::random(),
            MaskKeySource::Fixed(key) => key,
        }
    }

    /// Send a whole message with the configured fragment size and masking.
    ///
    /// Returns the number of bytes handed to `sink`.
    pub fn send<S: FrameSink + ?Sized>(
        &mut self,
        sink: &mut S,
        opcode: OpCode,
        payload: &[u8],
    ) -> Result<usize> {
        let max_fragment_size = self.config.max_fragment_size;
        let mask = self.config.mask_outgoing;
        let use_extensions = opcode.is_data();
        FrameWriter::new(self, opcode, BufferView::whole(payload), true, use_extensions, false)?
            .write_to(sink, max_fragment_size, mask)
    }

    /// Send a Text message.
    pub fn send_text<S: FrameSink + ?Sized>(&mut self, sink: &mut S, text: &str) -> Result<usize> {
        self.send(sink, OpCode::Text, text.as_bytes())
    }

    /// Send a Binary message.
    pub fn send_binary<S: FrameSink + ?Sized>(&mut self, sink: &mut S, data: &[u8]) -> Result<usize> {
        self.send(sink, OpCode::Binary, data)
    }

    /// Send a Ping with up to 125 bytes of data.
    pub fn send_ping<S: FrameSink + ?Sized>(&mut self, sink: &mut S, data: &[u8]) -> Result<usize> {
        self.send(sink, OpCode::Ping, data)
    }

    /// Send a Pong echoing a Ping's data.
    pub fn send_pong<S: FrameSink + ?Sized>(&mut self, sink: &mut S, data: &[u8]) -> Result<usize> {
        self.send(sink, OpCode::Pong, data)
    }

    /// Send a Close frame with a status code and reason.
    pub fn send_close<S: FrameSink + ?Sized>(
        &mut self,
        sink: &mut S,
        code: CloseCode,
        reason: &str,
    ) -> Result<usize> {
        let payload = encode_close_payload(code, reason);
        self.send(sink, OpCode::Close, &payload)
    }
}

impl fmt::Debug for FrameContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.extensions.iter().map(|e| e.name()).collect();
        f.debug_struct("FrameContext")
            .field("label", &self.label())
            .field("extensions", &names)
            .field("config", &self.config)
            .field("mask_keys", &self.mask_keys)
            .finish_non_exhaustive()
    }
}
