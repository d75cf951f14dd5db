//! Async output of encoded frames.
//!
//! Frame encoding is synchronous. A [`ChunkQueue`] collects the fragments a
//! [`FrameWriter`](crate::FrameWriter) emits, and [`write_chunks`] pushes them
//! to an async writer with scatter/gather I/O:
//!
//! ```text
//! FrameContext::send ─► ChunkQueue ─► write_chunks ─► AsyncWrite
//! ```

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::sink::FrameSink;
use crate::error::{Result, WsError};
use crate::protocol::EncodedHeader;

/// One encoded fragment: header and (already masked) payload.
#[derive(Debug, Clone)]
pub struct WireChunk {
    pub header: EncodedHeader,
    pub payload: Bytes,
}

impl WireChunk {
    /// Header plus payload length.
    #[inline]
    pub fn size(&self) -> usize {
        self.header.len() + self.payload.len()
    }
}

/// A [`FrameSink`] that keeps every emitted fragment.
#[derive(Debug, Default)]
pub struct ChunkQueue {
    chunks: Vec<WireChunk>,
}

impl ChunkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Bytes queued across all chunks.
    pub fn total_size(&self) -> usize {
        self.chunks.iter().map(WireChunk::size).sum()
    }

    pub fn chunks(&self) -> &[WireChunk] {
        &self.chunks
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    /// Write every queued chunk and empty the queue.
    ///
    /// On error the queue is left untouched.
    pub async fn flush_to<W>(&mut self, writer: &mut W) -> Result<usize>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let written = write_chunks(writer, &self.chunks).await?;
        self.chunks.clear();
        Ok(written)
    }
}

impl FrameSink for ChunkQueue {
    fn emit(&mut self, header: &[u8], payload: &[u8]) -> Result<()> {
        let header = EncodedHeader::from_slice(header).ok_or_else(|| {
            WsError::MalformedFrame(format!("Header of {} bytes", header.len()))
        })?;
        self.chunks.push(WireChunk {
            header,
            payload: Bytes::copy_from_slice(payload),
        });
        Ok(())
    }
}

/// Write chunks with `write_vectored`, resuming after partial writes, then flush.
///
/// Returns the number of bytes written.
pub async fn write_chunks<W>(writer: &mut W, chunks: &[WireChunk]) -> Result<usize>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let total: usize = chunks.iter().map(WireChunk::size).sum();
    if total == 0 {
        return Ok(0);
    }

    let mut written = 0;
    while written < total {
        let slices = remaining_slices(chunks, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(WsError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        written += n;
    }

    writer.flush().await?;
    tracing::trace!(chunks = chunks.len(), bytes = total, "chunks written");
    Ok(total)
}

/// Slices for the data not yet written after `skip` bytes.
fn remaining_slices(chunks: &[WireChunk], skip: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(chunks.len() * 2);
    let mut offset = 0;

    for chunk in chunks {
        for part in [chunk.header.as_bytes(), &chunk.payload[..]] {
            let end = offset + part.len();
            if !part.is_empty() && skip < end {
                slices.push(IoSlice::new(&part[skip.saturating_sub(offset)..]));
            }
            offset = end;
        }
    }

    slices
}
