//! RAII lease over an arena buffer.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::Bytes;

use super::arena::{BufferArena, ReleaseOutcome};
use super::buffer::{Buffer, BufferView};
use crate::error::Result;

/// A buffer checked out of a [`BufferArena`], returned to it on drop.
///
/// The guard tracks a logical length that may be shorter than the underlying
/// buffer, since growable requests are rounded up to their size class.
/// Slicing and deref only expose the first `len` bytes.
pub struct PooledBuffer {
    buffer: Buffer,
    len: usize,
    arena: Arc<BufferArena>,
}

impl PooledBuffer {
    pub(crate) fn new(arena: Arc<BufferArena>, buffer: Buffer, len: usize) -> Self {
        debug_assert!(len <= buffer.len());
        Self {
            buffer,
            len,
            arena,
        }
    }

    /// Take ownership of a buffer that did not come from `arena`.
    ///
    /// On drop it is offered to the arena like any other release, so buffers
    /// outside the poolable range are simply freed.
    pub fn adopt(arena: Arc<BufferArena>, buffer: Buffer) -> Self {
        let len = buffer.len();
        Self::new(arena, buffer, len)
    }

    /// Logical length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the logical length is zero.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Length of the underlying buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Shrink or grow the logical length within the capacity.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds [`capacity`](Self::capacity).
    pub fn set_len(&mut self, len: usize) {
        assert!(
            len <= self.capacity(),
            "length {len} exceeds capacity {}",
            self.capacity()
        );
        self.len = len;
    }

    /// The first `len` bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    /// The first `len` bytes, mutably.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buffer[..self.len]
    }

    /// Make room for at least `capacity` bytes, keeping the current contents.
    ///
    /// The old buffer goes back to the arena. The logical length is unchanged.
    pub fn reserve(&mut self, capacity: usize) -> Result<()> {
        if capacity <= self.capacity() {
            return Ok(());
        }
        let old = std::mem::take(&mut self.buffer);
        match self.arena.resize(old, capacity, true, false) {
            Ok(buffer) => {
                self.buffer = buffer;
                Ok(())
            }
            Err(e) => {
                self.len = 0;
                Err(e)
            }
        }
    }

    /// View over the logical contents.
    #[inline]
    pub fn view(&self) -> BufferView<'_> {
        BufferView::whole(self.as_slice())
    }

    /// The whole underlying buffer, including bytes past `len`.
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// The arena this lease returns to.
    pub fn arena(&self) -> &Arc<BufferArena> {
        &self.arena
    }

    /// Detach the buffer from the arena. It will not be released.
    pub fn into_inner(mut self) -> Buffer {
        self.len = 0;
        std::mem::take(&mut self.buffer)
    }

    /// Copy the logical contents into an immutable `Bytes` and release the buffer.
    pub fn freeze(self) -> Bytes {
        Bytes::copy_from_slice(self.as_slice())
    }

    /// Return the buffer to the arena now instead of at drop.
    pub fn release(mut self) -> ReleaseOutcome {
        self.release_inner()
    }

    // The empty buffer left behind owns no memory, so a later drop is a no-op.
    fn release_inner(&mut self) -> ReleaseOutcome {
        self.len = 0;
        self.arena.release(std::mem::take(&mut self.buffer))
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_slice()
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}
