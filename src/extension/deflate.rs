//! permessage-deflate (RFC 7692).
//!
//! Messages are compressed with raw DEFLATE and a sync flush. The flush
//! always ends in an empty stored block `00 00 FF FF`, which is stripped
//! before sending and appended again before inflating.

use std::sync::Arc;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use serde::{Deserialize, Serialize};

use super::{Extension, FrameInfo};
use crate::error::{Result, WsError};
use crate::memory::{BufferArena, PooledBuffer};
use crate::protocol::{OpCode, RSV1_BIT};

/// Payloads shorter than this are sent uncompressed.
pub const DEFAULT_MIN_LENGTH_TO_COMPRESS: usize = 256;

const TRAILER: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// Tunables for [`PerMessageDeflate`].
///
/// Written from the client's point of view: the local side compresses with
/// the client context and inflates with the server context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeflateConfig {
    /// zlib compression level, 0-9.
    pub level: u32,
    /// Reset the compressor after every message.
    pub client_no_context_takeover: bool,
    /// Reset the decompressor after every message.
    pub server_no_context_takeover: bool,
    pub min_length_to_compress: usize,
}

impl Default for DeflateConfig {
    fn default() -> Self {
        Self {
            level: 6,
            client_no_context_takeover: false,
            server_no_context_takeover: false,
            min_length_to_compress: DEFAULT_MIN_LENGTH_TO_COMPRESS,
        }
    }
}

/// The permessage-deflate extension.
pub struct PerMessageDeflate {
    config: DeflateConfig,
    compress: Compress,
    decompress: Decompress,
}

impl PerMessageDeflate {
    pub fn new(config: DeflateConfig) -> Self {
        let level = Compression::new(config.level.min(9));
        Self {
            compress: Compress::new(level, false),
            decompress: Decompress::new(false),
            config,
        }
    }

    pub fn config(&self) -> &DeflateConfig {
        &self.config
    }

    fn compress_payload(&mut self, input: &[u8], arena: &Arc<BufferArena>) -> Result<PooledBuffer> {
        let mut out = arena.lease(input.len() / 2 + 64, true)?;
        let mut consumed = 0;
        let mut written = 0;
        loop {
            let cap = out.capacity();
            out.set_len(cap);
            let in_before = self.compress.total_in();
            let out_before = self.compress.total_out();
            self.compress.compress(
                &input[consumed..],
                &mut out[written..],
                FlushCompress::Sync,
            )?;
            consumed += (self.compress.total_in() - in_before) as usize;
            written += (self.compress.total_out() - out_before) as usize;

            // The flush is complete once all input is in and output space was left over.
            if consumed == input.len() && written < cap {
                break;
            }
            out.reserve(cap * 2)?;
        }
        out.set_len(written);

        if !out.ends_with(&TRAILER) {
            return Err(WsError::Compression(
                "sync flush did not end with an empty stored block".to_string(),
            ));
        }
        out.set_len(written - TRAILER.len());

        if self.config.client_no_context_takeover {
            self.compress.reset();
        }
        Ok(out)
    }

    fn decompress_payload(
        &mut self,
        input: &[u8],
        arena: &Arc<BufferArena>,
        max_len: usize,
    ) -> Result<PooledBuffer> {
        let limit = max_len.saturating_add(1);
        let initial = input.len().saturating_mul(2).max(64).min(limit);
        let mut out = arena.lease(initial, true)?;
        let mut written = 0;
        for chunk in [input, &TRAILER[..]] {
            written = self.inflate_into(chunk, &mut out, written, max_len)?;
        }
        out.set_len(written);

        if self.config.server_no_context_takeover {
            self.decompress.reset(false);
        }
        Ok(out)
    }

    fn inflate_into(
        &mut self,
        input: &[u8],
        out: &mut PooledBuffer,
        mut written: usize,
        max_len: usize,
    ) -> Result<usize> {
        let mut consumed = 0;
        loop {
            let cap = out.capacity();
            // Output space stops one byte past the limit.
            let end = cap.min(max_len.saturating_add(1));
            out.set_len(cap);
            let in_before = self.decompress.total_in();
            let out_before = self.decompress.total_out();
            let status = self.decompress.decompress(
                &input[consumed..],
                &mut out[written..end],
                FlushDecompress::Sync,
            )?;
            let read = (self.decompress.total_in() - in_before) as usize;
            let produced = (self.decompress.total_out() - out_before) as usize;
            consumed += read;
            written += produced;

            if written > max_len {
                return Err(WsError::Protocol(format!(
                    "Inflated message exceeds limit {max_len}"
                )));
            }
            if status == Status::StreamEnd || (consumed == input.len() && written < end) {
                return Ok(written);
            }
            if written == end {
                out.reserve(cap.saturating_mul(2).min(max_len.saturating_add(1)))?;
            } else if read == 0 && produced == 0 {
                return Err(WsError::Compression(
                    "inflate made no progress".to_string(),
                ));
            }
        }
    }
}

impl Default for PerMessageDeflate {
    fn default() -> Self {
        Self::new(DeflateConfig::default())
    }
}

impl Extension for PerMessageDeflate {
    fn name(&self) -> &str {
        "permessage-deflate"
    }

    fn encode_header_bits(&self, frame: &FrameInfo, header: u8) -> u8 {
        let data = matches!(frame.opcode, OpCode::Text | OpCode::Binary);
        if data && frame.payload_len >= self.config.min_length_to_compress {
            header | RSV1_BIT
        } else {
            header
        }
    }

    fn encode(
        &mut self,
        frame: &FrameInfo,
        payload: &[u8],
        arena: &Arc<BufferArena>,
    ) -> Result<Option<PooledBuffer>> {
        if frame.header & RSV1_BIT == 0 {
            return Ok(None);
        }
        let compressed = self.compress_payload(payload, arena)?;
        tracing::trace!(
            original = payload.len(),
            compressed = compressed.len(),
            "deflated payload"
        );
        Ok(Some(compressed))
    }

    fn decode(
        &mut self,
        header: u8,
        payload: &[u8],
        arena: &Arc<BufferArena>,
        max_len: usize,
    ) -> Result<Option<PooledBuffer>> {
        if header & RSV1_BIT == 0 {
            return Ok(None);
        }
        self.decompress_payload(payload, arena, max_len).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ArenaConfig;

    fn arena() -> Arc<BufferArena> {
        BufferArena::shared(ArenaConfig::default())
    }

    fn info(opcode: OpCode, len: usize) -> FrameInfo {
        FrameInfo {
            opcode,
            header: 0x80 | opcode as u8,
            payload_len: len,
        }
    }

    fn compressible(len: usize) -> Vec<u8> {
        b"the quick brown fox jumps over the lazy dog "
            .iter()
            .copied()
            .cycle()
            .take(len)
            .collect()
    }

    #[test]
    fn test_header_bits_only_for_large_data_frames() {
        let ext = PerMessageDeflate::default();
        assert_eq!(ext.encode_header_bits(&info(OpCode::Text, 255), 0x81), 0x81);
        assert_eq!(ext.encode_header_bits(&info(OpCode::Text, 256), 0x81), 0xC1);
        assert_eq!(ext.encode_header_bits(&info(OpCode::Binary, 1000), 0x82), 0xC2);
        assert_eq!(ext.encode_header_bits(&info(OpCode::Ping, 1000), 0x89), 0x89);
    }

    #[test]
    fn test_encode_skips_without_rsv1() {
        let arena = arena();
        let mut ext = PerMessageDeflate::default();
        let out = ext.encode(&info(OpCode::Text, 3), b"abc", &arena).unwrap();
        assert!(out.is_none());
        assert!(ext.decode(0x81, b"abc", &arena, usize::MAX).unwrap().is_none());
    }

    #[test]
    fn test_roundtrip() {
        let arena = arena();
        let mut sender = PerMessageDeflate::default();
        let mut receiver = PerMessageDeflate::default();
        let payload = compressible(4096);

        let mut frame = info(OpCode::Binary, payload.len());
        frame.header = sender.encode_header_bits(&frame, frame.header);
        let compressed = sender.encode(&frame, &payload, &arena).unwrap().unwrap();
        assert!(compressed.len() < payload.len());
        assert!(!compressed.ends_with(&TRAILER));

        let restored = receiver
            .decode(frame.header, &compressed, &arena, usize::MAX)
            .unwrap()
            .unwrap();
        assert_eq!(restored.as_slice(), &payload[..]);
    }

    #[test]
    fn test_context_takeover_across_messages() {
        let arena = arena();
        let mut sender = PerMessageDeflate::default();
        let mut receiver = PerMessageDeflate::default();

        for i in 0..5 {
            let payload = compressible(1000 + i * 37);
            let frame = FrameInfo {
                header: 0xC2,
                ..info(OpCode::Binary, payload.len())
            };
            let compressed = sender.encode(&frame, &payload, &arena).unwrap().unwrap();
            let restored = receiver.decode(0xC2, &compressed, &arena, usize::MAX).unwrap().unwrap();
            assert_eq!(restored.as_slice(), &payload[..], "message {i}");
        }
    }

    #[test]
    fn test_no_context_takeover_messages_are_independent() {
        let arena = arena();
        let config = DeflateConfig {
            client_no_context_takeover: true,
            ..DeflateConfig::default()
        };
        let mut sender = PerMessageDeflate::new(config);
        let payload = compressible(2000);
        let frame = FrameInfo {
            header: 0xC2,
            ..info(OpCode::Binary, payload.len())
        };

        let first = sender.encode(&frame, &payload, &arena).unwrap().unwrap();
        let second = sender.encode(&frame, &payload, &arena).unwrap().unwrap();
        assert_eq!(first.as_slice(), second.as_slice());

        // A fresh decoder handles the second message on its own.
        let mut receiver = PerMessageDeflate::default();
        let restored = receiver.decode(0xC2, &second, &arena, usize::MAX).unwrap().unwrap();
        assert_eq!(restored.as_slice(), &payload[..]);
    }

    #[test]
    fn test_incompressible_payload_grows_output() {
        let arena = arena();
        let mut sender = PerMessageDeflate::default();
        let mut receiver = PerMessageDeflate::default();
        // Pseudo-random bytes barely compress; exercises output growth.
        let mut state = 0x1234_5678u32;
        let payload: Vec<u8> = (0..10_000)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();

        let frame = FrameInfo {
            header: 0xC2,
            ..info(OpCode::Binary, payload.len())
        };
        let compressed = sender.encode(&frame, &payload, &arena).unwrap().unwrap();
        let restored = receiver.decode(0xC2, &compressed, &arena, usize::MAX).unwrap().unwrap();
        assert_eq!(restored.as_slice(), &payload[..]);
    }

    #[test]
    fn test_decode_garbage_is_error() {
        let arena = arena();
        let mut receiver = PerMessageDeflate::default();
        let err = receiver
            .decode(0xC2, &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF], &arena, usize::MAX)
            .unwrap_err();
        assert!(matches!(err, WsError::Compression(_)));
    }

    #[test]
    fn test_inflate_stops_at_limit() {
        let arena = arena();
        let mut sender = PerMessageDeflate::default();
        let mut receiver = PerMessageDeflate::default();
        let payload = vec![0u8; 16 * 1024 * 1024];
        let frame = FrameInfo {
            header: 0xC2,
            ..info(OpCode::Binary, payload.len())
        };
        let compressed = sender.encode(&frame, &payload, &arena).unwrap().unwrap();
        assert!(compressed.len() < 64 * 1024);
        drop(payload);

        let limit = 64 * 1024;
        let inflate_arena = BufferArena::shared(ArenaConfig::default());
        let err = receiver
            .decode(0xC2, &compressed, &inflate_arena, limit)
            .unwrap_err();
        assert!(matches!(err, WsError::Protocol(_)));
        // Every output buffer went back to the pool; none was much larger than the limit.
        assert!(inflate_arena.pooled_bytes() <= 4 * limit);
        assert!(inflate_arena.stats().classes.iter().all(|c| c.size <= 2 * limit + 2));
    }

    #[test]
    fn test_inflate_exactly_at_limit() {
        let arena = arena();
        let mut sender = PerMessageDeflate::default();
        let mut receiver = PerMessageDeflate::default();
        let payload = compressible(5000);
        let frame = FrameInfo {
            header: 0xC2,
            ..info(OpCode::Binary, payload.len())
        };
        let compressed = sender.encode(&frame, &payload, &arena).unwrap().unwrap();
        let restored = receiver.decode(0xC2, &compressed, &arena, 5000).unwrap().unwrap();
        assert_eq!(restored.as_slice(), &payload[..]);
    }

    #[test]
    fn test_config_from_json() {
        let config: DeflateConfig =
            serde_json::from_str(r#"{ "level": 9, "server_no_context_takeover": true }"#).unwrap();
        assert_eq!(config.level, 9);
        assert!(config.server_no_context_takeover);
        assert_eq!(config.min_length_to_compress, 256);
    }
}
