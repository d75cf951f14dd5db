//! Destination for encoded frames.

use std::io;

use crate::error::Result;

/// Receives one wire fragment at a time: its header, then its payload.
///
/// [`FrameWriter::write_to`](crate::FrameWriter::write_to) calls `emit` once
/// per fragment, in order. Both slices are only valid for the duration of
/// the call.
pub trait FrameSink {
    fn emit(&mut self, header: &[u8], payload: &[u8]) -> Result<()>;
}

/// Any blocking writer is a sink: header and payload are written back to back.
impl<W: io::Write + ?Sized> FrameSink for W {
    fn emit(&mut self, header: &[u8], payload: &[u8]) -> Result<()> {
        self.write_all(header)?;
        self.write_all(payload)?;
        Ok(())
    }
}

/// Adapts a closure into a [`FrameSink`].
///
/// ```
/// use wsarena::transport::{FnSink, FrameSink};
///
/// let mut sizes = Vec::new();
/// let mut sink = FnSink(|header: &[u8], payload: &[u8]| {
///     sizes.push((header.len(), payload.len()));
///     Ok(())
/// });
/// sink.emit(&[0x82, 0x01], &[0xFF]).unwrap();
/// assert_eq!(sizes, vec![(2, 1)]);
/// ```
pub struct FnSink<F>(pub F);

impl<F> FrameSink for FnSink<F>
where
    F: FnMut(&[u8], &[u8]) -> Result<()>,
{
    fn emit(&mut self, header: &[u8], payload: &[u8]) -> Result<()> {
        (self.0)(header, payload)
    }
}
