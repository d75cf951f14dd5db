//! Owned byte buffers and non-owning views over them.
//!
//! A [`Buffer`] is a fixed-length heap block with exactly one owner at a time:
//! either a caller, or a slot inside a [`BufferArena`](super::BufferArena) free-list.
//! Moving a `Buffer` moves that ownership, so handing it back to the arena is a
//! `release(buffer)` call that consumes it.
//!
//! A [`BufferView`] is an `(data, offset, count)` triple that slices a buffer
//! without copying. Two views are equal when they point at the same backing
//! memory with the same offset and count.

use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::error::{Result, WsError};

/// Number of bytes dumped by the `Debug` impl of [`BufferView`].
const DEBUG_DUMP_LIMIT: usize = 128;

/// A contiguous, fixed-length byte block.
pub struct Buffer {
    data: Box<[u8]>,
}

impl Buffer {
    /// The shared zero-length buffer.
    ///
    /// It owns no heap memory, so it is never pooled and releasing it is a no-op.
    #[inline]
    pub fn empty() -> Self {
        Self {
            data: Box::default(),
        }
    }

    /// Allocate a zeroed buffer of exactly `size` bytes.
    ///
    /// Allocation failure is reported instead of aborting, so a peer declaring
    /// an absurd frame length cannot take the process down.
    pub fn alloc(size: usize) -> Result<Self> {
        if size == 0 {
            return Ok(Self::empty());
        }
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| WsError::AllocationFailure { requested: size })?;
        data.resize(size, 0);
        Ok(Self {
            data: data.into_boxed_slice(),
        })
    }

    /// Length of the buffer in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if this is a zero-length buffer.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Address of the first byte; used as the buffer's identity.
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    /// Whole buffer as a slice.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Whole buffer as a mutable slice.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// View `count` bytes starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the range does not fit in the buffer.
    #[inline]
    pub fn view(&self, offset: usize, count: usize) -> BufferView<'_> {
        BufferView::new(&self.data, offset, count)
    }

    /// Give up the buffer as a `Vec<u8>` (no copy).
    #[inline]
    pub fn into_vec(self) -> Vec<u8> {
        self.data.into_vec()
    }

    /// Check whether two buffers share the same backing memory.
    #[inline]
    pub fn same_memory(&self, other: &Buffer) -> bool {
        !self.is_empty() && self.as_ptr() == other.as_ptr()
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self {
            data: data.into_boxed_slice(),
        }
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.data.len())
            .field("ptr", &self.data.as_ptr())
            .finish()
    }
}

/// A non-owning `(data, offset, count)` window over a byte slice.
#[derive(Clone, Copy)]
pub struct BufferView<'a> {
    data: &'a [u8],
    offset: usize,
    count: usize,
}

impl<'a> BufferView<'a> {
    /// The empty view.
    pub const EMPTY: BufferView<'static> = BufferView {
        data: &[],
        offset: 0,
        count: 0,
    };

    /// Create a view of `count` bytes at `offset` within `data`.
    ///
    /// # Panics
    ///
    /// Panics if `offset + count` exceeds `data.len()`.
    #[inline]
    pub fn new(data: &'a [u8], offset: usize, count: usize) -> Self {
        assert!(
            offset
                .checked_add(count)
                .is_some_and(|end| end <= data.len()),
            "view {offset}+{count} out of bounds for {} bytes",
            data.len()
        );
        Self {
            data,
            offset,
            count,
        }
    }

    /// View covering all of `data`.
    #[inline]
    pub fn whole(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            count: data.len(),
        }
    }

    /// Backing slice the view points into.
    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Start of the view within the backing slice.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of bytes in the view.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Check if the view covers no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The viewed bytes.
    #[inline]
    pub fn as_slice(&self) -> &'a [u8] {
        &self.data[self.offset..self.offset + self.count]
    }

    /// Re-slice relative to this view without copying.
    ///
    /// # Panics
    ///
    /// Panics if the range does not fit inside this view.
    #[inline]
    pub fn slice(&self, offset: usize, count: usize) -> BufferView<'a> {
        assert!(
            offset
                .checked_add(count)
                .is_some_and(|end| end <= self.count),
            "slice {offset}+{count} out of bounds for view of {} bytes",
            self.count
        );
        BufferView {
            data: self.data,
            offset: self.offset + offset,
            count,
        }
    }
}

impl PartialEq for BufferView<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.data, other.data)
            && self.offset == other.offset
            && self.count == other.count
    }
}

impl Eq for BufferView<'_> {}

impl<'a> From<&'a [u8]> for BufferView<'a> {
    fn from(data: &'a [u8]) -> Self {
        Self::whole(data)
    }
}

impl<'a> From<&'a Buffer> for BufferView<'a> {
    fn from(buffer: &'a Buffer) -> Self {
        Self::whole(buffer.as_slice())
    }
}

impl Deref for BufferView<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl fmt::Debug for BufferView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[BufferView Offset: {} Count: {} Data: [",
            self.offset, self.count
        )?;
        if self.count > DEBUG_DUMP_LIMIT {
            f.write_str("...")?;
        } else {
            for (i, byte) in self.as_slice().iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{byte:02X}")?;
            }
        }
        f.write_str("]]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_is_zeroed() {
        let buf = Buffer::alloc(64).unwrap();
        assert_eq!(buf.len(), 64);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_alloc_zero_is_empty() {
        let buf = Buffer::alloc(0).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_alloc_failure_is_reported() {
        let err = Buffer::alloc(usize::MAX).unwrap_err();
        assert!(matches!(err, WsError::AllocationFailure { requested } if requested == usize::MAX));
    }

    #[test]
    fn test_from_vec_keeps_allocation() {
        let data = vec![1u8, 2, 3];
        let ptr = data.as_ptr();
        let buf = Buffer::from(data);
        assert_eq!(buf.as_ptr(), ptr);
        assert_eq!(buf.into_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn test_same_memory() {
        let a = Buffer::alloc(8).unwrap();
        let b = Buffer::alloc(8).unwrap();
        assert!(a.same_memory(&a));
        assert!(!a.same_memory(&b));
        assert!(!Buffer::empty().same_memory(&Buffer::empty()));
    }

    #[test]
    fn test_view_slice_without_copy() {
        let buf = Buffer::from((0u8..10).collect::<Vec<_>>());
        let view = buf.view(2, 6);
        assert_eq!(view.as_slice(), &[2, 3, 4, 5, 6, 7]);

        let inner = view.slice(1, 3);
        assert_eq!(inner.offset(), 3);
        assert_eq!(inner.count(), 3);
        assert_eq!(inner.as_slice(), &[3, 4, 5]);
        assert_eq!(inner.as_slice().as_ptr(), unsafe { buf.as_ptr().add(3) });
    }

    #[test]
    fn test_view_equality_is_by_identity() {
        let a = Buffer::from(vec![1u8, 2, 3, 4]);
        let b = Buffer::from(vec![1u8, 2, 3, 4]);

        assert_eq!(a.view(0, 2), a.view(0, 2));
        assert_ne!(a.view(0, 2), a.view(1, 2));
        assert_ne!(a.view(0, 2), a.view(0, 3));
        // Same contents, different memory.
        assert_ne!(a.view(0, 2), b.view(0, 2));
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_view_out_of_bounds_panics() {
        let buf = Buffer::from(vec![0u8; 4]);
        let _ = buf.view(2, 3);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_slice_out_of_bounds_panics() {
        let buf = Buffer::from(vec![0u8; 8]);
        let _ = buf.view(2, 4).slice(3, 2);
    }

    #[test]
    fn test_view_debug_dump() {
        let data = [0x01u8, 0xAB, 0xFF];
        let view = BufferView::whole(&data);
        assert_eq!(
            format!("{view:?}"),
            "[BufferView Offset: 0 Count: 3 Data: [01, AB, FF]]"
        );

        let big = vec![0u8; 200];
        assert!(format!("{:?}", BufferView::whole(&big)).contains("..."));
    }

    #[test]
    fn test_empty_view() {
        assert!(BufferView::EMPTY.is_empty());
        assert!(BufferView::EMPTY.as_slice().is_empty());
    }
}
