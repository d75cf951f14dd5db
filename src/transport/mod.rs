//! Where encoded frames go.
//!
//! - [`FrameSink`]: synchronous per-fragment destination, implemented for
//!   every `io::Write`
//! - [`ChunkQueue`] and [`write_chunks`]: buffering plus vectored async output

mod io;
mod sink;

pub use io::{write_chunks, ChunkQueue, WireChunk};
pub use sink::{FnSink, FrameSink};
