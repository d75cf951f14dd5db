//! Size-classed free-list allocator for byte buffers.
//!
//! # Design
//!
//! Released buffers are kept in size classes sorted ascending by size. Within a
//! class entries are appended on release, so the head is always the stalest
//! entry and the tail the most recently released one:
//!
//! - `get` pops from the tail (LIFO), handing out the warmest buffer and
//!   letting untouched entries age.
//! - `maintain` evicts one contiguous run from the head, because every entry
//!   before the youngest expired one is older still.
//!
//! The free-list sits behind a reader/writer lock. `get`, `release`, `clear`
//! and `maintain` all take the write lock: the occupancy check and the removal
//! of the last entry have to happen under the same exclusive guard, otherwise
//! two callers can race for one entry. Only statistics take the read lock.
//!
//! The arena is an ordinary value: construct one, wrap it in an `Arc` and hand
//! it to every connection that should share the pool.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use super::buffer::Buffer;
use super::config::ArenaConfig;
use super::pooled::PooledBuffer;
use crate::error::{Result, WsError};

/// What happened to a buffer handed to [`BufferArena::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Stored in the free-list for reuse.
    Pooled,
    /// The shared empty buffer; nothing to do.
    Empty,
    /// Pooling is disabled; the buffer was dropped.
    Disabled,
    /// Smaller than `min_buffer_size` or larger than `max_buffer_size`; dropped.
    OutOfRange,
    /// Pooling it would exceed `max_pool_aggregate_size`; dropped.
    PoolFull,
    /// The same buffer is already pooled; the duplicate was ignored.
    DoubleRelease,
}

/// A pooled buffer and the moment it was released.
struct BufferDesc {
    buffer: Buffer,
    released: Instant,
}

/// All pooled buffers of one length, oldest first.
struct SizeClass {
    size: usize,
    entries: Vec<BufferDesc>,
}

/// Free-list state guarded by the arena lock.
#[derive(Default)]
struct FreeList {
    /// Sorted ascending by `size`.
    classes: Vec<SizeClass>,
    /// Sum of the lengths of all pooled buffers.
    pooled_bytes: usize,
    last_maintenance: Option<Instant>,
}

impl FreeList {
    /// Pop the most recently released buffer from the smallest matching class.
    fn take(&mut self, size: usize, can_be_larger: bool) -> Option<Buffer> {
        let class = self.classes.iter_mut().find(|class| {
            !class.entries.is_empty()
                && (class.size == size || (can_be_larger && class.size > size))
        })?;
        let desc = class.entries.pop()?;
        self.pooled_bytes -= class.size;
        Some(desc.buffer)
    }

    /// Insert into the class for `buffer.len()`, creating it in sorted position.
    ///
    /// Returns the buffer back if `check_duplicates` finds it already pooled.
    fn insert(
        &mut self,
        buffer: Buffer,
        now: Instant,
        check_duplicates: bool,
    ) -> std::result::Result<(), Buffer> {
        let size = buffer.len();
        match self.classes.binary_search_by_key(&size, |class| class.size) {
            Ok(index) => {
                let class = &mut self.classes[index];
                if check_duplicates
                    && class
                        .entries
                        .iter()
                        .any(|desc| desc.buffer.same_memory(&buffer))
                {
                    return Err(buffer);
                }
                class.entries.push(BufferDesc {
                    buffer,
                    released: now,
                });
            }
            Err(index) => {
                self.classes.insert(
                    index,
                    SizeClass {
                        size,
                        entries: vec![BufferDesc {
                            buffer,
                            released: now,
                        }],
                    },
                );
            }
        }
        self.pooled_bytes += size;
        Ok(())
    }
}

/// Pooled allocator for byte buffers shared across connections.
pub struct BufferArena {
    config: RwLock<ArenaConfig>,
    free: RwLock<FreeList>,
    enabled: AtomicBool,
    reused: AtomicU64,
    allocated: AtomicU64,
    released: AtomicU64,
    dropped: AtomicU64,
}

impl BufferArena {
    /// Create an arena with the given configuration.
    pub fn new(config: ArenaConfig) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            config: RwLock::new(config),
            free: RwLock::new(FreeList::default()),
            reused: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
            released: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Create an arena ready to be shared between connections.
    pub fn shared(config: ArenaConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> ArenaConfig {
        self.config.read().clone()
    }

    /// Replace the configuration. Pooled entries are kept unless pooling gets disabled.
    pub fn set_config(&self, config: ArenaConfig) {
        let enabled = config.enabled;
        *self.config.write() = config;
        self.set_enabled(enabled);
    }

    /// Whether pooling is on.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Turn pooling on or off. Turning it off drops every pooled entry.
    pub fn set_enabled(&self, enabled: bool) {
        self.config.write().enabled = enabled;
        let was = self.enabled.swap(enabled, Ordering::AcqRel);
        if was != enabled {
            tracing::debug!(enabled, "buffer arena pooling toggled");
        }
        if !enabled {
            self.clear();
        }
    }

    /// Get a buffer of at least `size` bytes.
    ///
    /// With `can_be_larger`, `size` is rounded up to `min_buffer_size` or to the
    /// next power of two, and a pooled buffer of any larger class may be
    /// returned. Without it, only an exact-size class matches, and requests
    /// below `min_buffer_size` are never served from the pool.
    ///
    /// A zero-size request returns the shared empty buffer.
    pub fn get(&self, size: usize, can_be_larger: bool) -> Result<Buffer> {
        if size == 0 {
            return Ok(Buffer::empty());
        }
        if !self.is_enabled() {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            return Buffer::alloc(size);
        }

        let min = self.config.read().min_buffer_size;
        let size = if can_be_larger {
            rounded_size(size, min)?
        } else if size < min {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            return Buffer::alloc(size);
        } else {
            size
        };

        let pooled = self.free.write().take(size, can_be_larger);
        match pooled {
            Some(buffer) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                Ok(buffer)
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Buffer::alloc(size)
            }
        }
    }

    /// Get a buffer wrapped in a guard that releases it when dropped.
    ///
    /// The guard's length is `size`; its capacity may be larger.
    pub fn lease(self: &Arc<Self>, size: usize, can_be_larger: bool) -> Result<PooledBuffer> {
        let buffer = self.get(size, can_be_larger)?;
        Ok(PooledBuffer::new(Arc::clone(self), buffer, size))
    }

    /// Hand a buffer back to the pool.
    ///
    /// Never fails: buffers that cannot be pooled are dropped and the reason is
    /// reported through [`ReleaseOutcome`].
    pub fn release(&self, buffer: Buffer) -> ReleaseOutcome {
        if buffer.is_empty() {
            return ReleaseOutcome::Empty;
        }
        if !self.is_enabled() {
            return ReleaseOutcome::Disabled;
        }

        let (min, max, cap, check) = {
            let config = self.config.read();
            (
                config.min_buffer_size,
                config.max_buffer_size,
                config.max_pool_aggregate_size,
                config.double_release_check,
            )
        };

        let len = buffer.len();
        if len < min || len > max {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(len, min, max, "release outside poolable range, dropped");
            return ReleaseOutcome::OutOfRange;
        }

        let mut free = self.free.write();
        if free.pooled_bytes.saturating_add(len) > cap {
            drop(free);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(len, cap, "pool at capacity, release dropped");
            return ReleaseOutcome::PoolFull;
        }

        let inserted = free.insert(buffer, Instant::now(), check);
        drop(free);
        match inserted {
            Ok(()) => {
                self.released.fetch_add(1, Ordering::Relaxed);
                ReleaseOutcome::Pooled
            }
            Err(duplicate) => {
                tracing::error!(
                    len,
                    ptr = ?duplicate.as_ptr(),
                    "buffer already added to the pool"
                );
                // The pooled entry owns this allocation; dropping the alias would free it twice.
                std::mem::forget(duplicate);
                ReleaseOutcome::DoubleRelease
            }
        }
    }

    /// Replace `buffer` with one of `new_size` bytes from the pool.
    ///
    /// Unless `clear` is set, the old contents are copied over (truncated to the
    /// new length). The old buffer is released.
    pub fn resize(
        &self,
        buffer: Buffer,
        new_size: usize,
        can_be_larger: bool,
        clear: bool,
    ) -> Result<Buffer> {
        if !self.is_enabled() {
            let mut data = buffer.into_vec();
            if new_size > data.len() {
                data.try_reserve_exact(new_size - data.len())
                    .map_err(|_| WsError::AllocationFailure {
                        requested: new_size,
                    })?;
            }
            data.resize(new_size, 0);
            if clear {
                data.fill(0);
            }
            return Ok(Buffer::from(data));
        }

        let mut resized = self.get(new_size, can_be_larger)?;
        if clear {
            let end = new_size.min(resized.len());
            resized[..end].fill(0);
        } else {
            let keep = buffer.len().min(resized.len());
            resized[..keep].copy_from_slice(&buffer[..keep]);
        }
        self.release(buffer);
        Ok(resized)
    }

    /// Drop every pooled entry. Buffers already handed out are unaffected.
    pub fn clear(&self) {
        let mut free = self.free.write();
        let dropped = free.pooled_bytes;
        free.classes.clear();
        free.pooled_bytes = 0;
        drop(free);
        tracing::debug!(dropped_bytes = dropped, "buffer arena cleared");
    }

    /// Evict entries older than `remove_older_than`.
    ///
    /// Does nothing when pooling is disabled or the previous pass ran less
    /// than `run_maintenance_every` ago. Returns the number of evicted buffers.
    pub fn maintain(&self) -> usize {
        self.maintain_at(Instant::now())
    }

    pub(crate) fn maintain_at(&self, now: Instant) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        let (max_age, interval, remove_empty) = {
            let config = self.config.read();
            (
                config.remove_older_than,
                config.run_maintenance_every,
                config.remove_empty_classes,
            )
        };

        let mut free = self.free.write();
        if let Some(last) = free.last_maintenance {
            if now.saturating_duration_since(last) < interval {
                return 0;
            }
        }
        free.last_maintenance = Some(now);

        let mut evicted = 0;
        let mut evicted_bytes = 0;
        for class in &mut free.classes {
            let youngest_expired = class
                .entries
                .iter()
                .rposition(|desc| now.saturating_duration_since(desc.released) > max_age);
            if let Some(index) = youngest_expired {
                let count = index + 1;
                class.entries.drain(..count);
                evicted += count;
                evicted_bytes += count * class.size;
            }
        }
        free.pooled_bytes -= evicted_bytes;
        if remove_empty {
            free.classes.retain(|class| !class.entries.is_empty());
        }
        let pooled_bytes = free.pooled_bytes;
        drop(free);

        if evicted > 0 {
            tracing::debug!(evicted, evicted_bytes, pooled_bytes, "buffer arena maintenance");
        }
        evicted
    }

    /// Total bytes currently held in the free-list.
    pub fn pooled_bytes(&self) -> usize {
        self.free.read().pooled_bytes
    }

    /// Snapshot of the arena counters and free-list shape.
    pub fn stats(&self) -> ArenaStats {
        let free = self.free.read();
        ArenaStats {
            reused: self.reused.load(Ordering::Relaxed),
            allocated: self.allocated.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            pooled_bytes: free.pooled_bytes,
            classes: free
                .classes
                .iter()
                .map(|class| SizeClassStats {
                    size: class.size,
                    count: class.entries.len(),
                })
                .collect(),
        }
    }
}

impl Default for BufferArena {
    fn default() -> Self {
        Self::new(ArenaConfig::default())
    }
}

impl fmt::Debug for BufferArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferArena")
            .field("enabled", &self.is_enabled())
            .field("pooled_bytes", &self.pooled_bytes())
            .finish_non_exhaustive()
    }
}

/// Round a growable request up to its size class.
fn rounded_size(size: usize, min: usize) -> Result<usize> {
    if size < min {
        Ok(min)
    } else {
        size.checked_next_power_of_two()
            .ok_or(WsError::AllocationFailure { requested: size })
    }
}

/// Entry count of one size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClassStats {
    /// Buffer length of the class.
    pub size: usize,
    /// Buffers currently pooled in it.
    pub count: usize,
}

/// Arena statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// `get` calls served from the free-list.
    pub reused: u64,
    /// `get` calls that allocated a fresh buffer.
    pub allocated: u64,
    /// Buffers accepted into the free-list.
    pub released: u64,
    /// Releases dropped for being out of range or over capacity.
    pub dropped: u64,
    /// Bytes currently pooled.
    pub pooled_bytes: usize,
    /// Size classes, ascending.
    pub classes: Vec<SizeClassStats>,
}

impl ArenaStats {
    /// Fraction of `get` calls served from the pool (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.reused + self.allocated;
        if total == 0 {
            0.0
        } else {
            self.reused as f64 / total as f64
        }
    }
}

impl fmt::Display for ArenaStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pooled array reused count: {}", self.reused)?;
        writeln!(f, "Fresh allocation count: {}", self.allocated)?;
        writeln!(f, "Release count: {}", self.released)?;
        writeln!(f, "Dropped release count: {}", self.dropped)?;
        writeln!(f, "Pooled bytes: {}", self.pooled_bytes)?;
        writeln!(f, "Size classes: {}", self.classes.len())?;
        for class in &self.classes {
            writeln!(f, "- Size: {} Count: {}", class.size, class.count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::ManuallyDrop;
    use std::time::Duration;

    fn arena() -> BufferArena {
        BufferArena::new(ArenaConfig {
            double_release_check: true,
            ..ArenaConfig::default()
        })
    }

    #[test]
    fn test_zero_size_returns_empty() {
        let arena = arena();
        let buf = arena.get(0, true).unwrap();
        assert!(buf.is_empty());
        assert_eq!(arena.release(buf), ReleaseOutcome::Empty);
        assert_eq!(arena.stats().allocated, 0);
    }

    #[test]
    fn test_small_request_rounds_to_min() {
        let arena = arena();
        assert_eq!(arena.get(10, true).unwrap().len(), 32);
    }

    #[test]
    fn test_request_rounds_to_next_power_of_two() {
        let arena = arena();
        assert_eq!(arena.get(40, true).unwrap().len(), 64);
        assert_eq!(arena.get(64, true).unwrap().len(), 64);
        assert_eq!(arena.get(65, true).unwrap().len(), 128);
    }

    #[test]
    fn test_exact_request_is_not_rounded() {
        let arena = arena();
        assert_eq!(arena.get(40, false).unwrap().len(), 40);
        assert_eq!(arena.get(10, false).unwrap().len(), 10);
    }

    #[test]
    fn test_rounding_overflow_is_allocation_failure() {
        let arena = arena();
        let err = arena.get(usize::MAX - 1, true).unwrap_err();
        assert!(matches!(err, WsError::AllocationFailure { .. }));
    }

    #[test]
    fn test_release_then_get_reuses_same_buffer() {
        let arena = arena();
        let buf = arena.get(64, true).unwrap();
        let ptr = buf.as_ptr();

        assert_eq!(arena.release(buf), ReleaseOutcome::Pooled);
        assert_eq!(arena.pooled_bytes(), 64);

        let again = arena.get(64, true).unwrap();
        assert_eq!(again.as_ptr(), ptr);
        assert_eq!(arena.pooled_bytes(), 0);

        let stats = arena.stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.released, 1);
    }

    #[test]
    fn test_get_prefers_most_recently_released() {
        let arena = arena();
        let first = arena.get(64, false).unwrap();
        let second = arena.get(64, false).unwrap();
        let second_ptr = second.as_ptr();

        arena.release(first);
        arena.release(second);

        assert_eq!(arena.get(64, false).unwrap().as_ptr(), second_ptr);
    }

    #[test]
    fn test_larger_class_only_when_allowed() {
        let arena = arena();
        arena.release(Buffer::alloc(256).unwrap());

        // Exact request for 128 does not take the 256 buffer.
        let exact = arena.get(128, false).unwrap();
        assert_eq!(exact.len(), 128);
        assert_eq!(arena.pooled_bytes(), 256);

        // Growable request does.
        let larger = arena.get(100, true).unwrap();
        assert_eq!(larger.len(), 256);
        assert_eq!(arena.pooled_bytes(), 0);
    }

    #[test]
    fn test_smallest_matching_class_wins() {
        let arena = arena();
        arena.release(Buffer::alloc(1024).unwrap());
        arena.release(Buffer::alloc(128).unwrap());
        arena.release(Buffer::alloc(512).unwrap());

        let classes: Vec<usize> = arena.stats().classes.iter().map(|c| c.size).collect();
        assert_eq!(classes, vec![128, 512, 1024]);

        assert_eq!(arena.get(200, true).unwrap().len(), 512);
    }

    #[test]
    fn test_undersized_request_bypasses_pool() {
        let arena = arena();
        arena.release(Buffer::alloc(32).unwrap());

        let buf = arena.get(16, false).unwrap();
        assert_eq!(buf.len(), 16);
        assert_eq!(arena.pooled_bytes(), 32);
    }

    #[test]
    fn test_release_out_of_range_is_dropped() {
        let arena = BufferArena::new(ArenaConfig {
            max_buffer_size: 1024,
            ..ArenaConfig::default()
        });
        assert_eq!(
            arena.release(Buffer::alloc(16).unwrap()),
            ReleaseOutcome::OutOfRange
        );
        assert_eq!(
            arena.release(Buffer::alloc(2048).unwrap()),
            ReleaseOutcome::OutOfRange
        );
        assert_eq!(arena.pooled_bytes(), 0);
        assert_eq!(arena.stats().dropped, 2);
    }

    #[test]
    fn test_aggregate_size_is_capped() {
        let arena = BufferArena::new(ArenaConfig {
            max_pool_aggregate_size: 256,
            ..ArenaConfig::default()
        });

        for _ in 0..4 {
            assert_eq!(
                arena.release(Buffer::alloc(64).unwrap()),
                ReleaseOutcome::Pooled
            );
        }
        assert_eq!(
            arena.release(Buffer::alloc(64).unwrap()),
            ReleaseOutcome::PoolFull
        );
        assert_eq!(arena.pooled_bytes(), 256);

        // A smaller buffer still does not fit once the cap is reached.
        assert_eq!(
            arena.release(Buffer::alloc(32).unwrap()),
            ReleaseOutcome::PoolFull
        );
    }

    #[test]
    fn test_double_release_is_ignored() {
        let arena = arena();
        let buf = Buffer::alloc(64).unwrap();
        let ptr = buf.as_ptr() as *mut u8;
        assert_eq!(arena.release(buf), ReleaseOutcome::Pooled);

        // Rebuild the pooled allocation the way a use-after-release bug would.
        // The arena forgets it, so it is never dropped here.
        let alias = ManuallyDrop::new(unsafe { Buffer::from(Vec::from_raw_parts(ptr, 64, 64)) });
        assert_eq!(
            arena.release(ManuallyDrop::into_inner(alias)),
            ReleaseOutcome::DoubleRelease
        );
        assert_eq!(arena.stats().classes[0].count, 1);
        assert_eq!(arena.pooled_bytes(), 64);
    }

    #[test]
    fn test_disabled_arena_allocates_and_drops() {
        let arena = arena();
        arena.release(Buffer::alloc(64).unwrap());
        assert_eq!(arena.pooled_bytes(), 64);

        arena.set_enabled(false);
        assert!(!arena.is_enabled());
        assert_eq!(arena.pooled_bytes(), 0);

        let allocated = arena.stats().allocated;
        let buf = arena.get(40, true).unwrap();
        assert_eq!(buf.len(), 40);
        assert_eq!(arena.stats().allocated, allocated + 1);
        assert_eq!(arena.release(buf), ReleaseOutcome::Disabled);
        assert_eq!(arena.pooled_bytes(), 0);
    }

    #[test]
    fn test_set_config_disabling_clears() {
        let arena = arena();
        arena.release(Buffer::alloc(64).unwrap());

        arena.set_config(ArenaConfig {
            enabled: false,
            ..ArenaConfig::default()
        });
        assert_eq!(arena.pooled_bytes(), 0);
        assert!(!arena.config().enabled);
    }

    #[test]
    fn test_clear_keeps_checked_out_buffers() {
        let arena = arena();
        let held = arena.get(64, true).unwrap();
        arena.release(Buffer::alloc(128).unwrap());

        arena.clear();
        assert_eq!(arena.pooled_bytes(), 0);
        assert!(arena.stats().classes.is_empty());
        assert_eq!(held.len(), 64);
        assert_eq!(arena.release(held), ReleaseOutcome::Pooled);
    }

    #[test]
    fn test_resize_copies_and_releases_old() {
        let arena = arena();
        let mut buf = arena.get(32, true).unwrap();
        buf[..4].copy_from_slice(&[1, 2, 3, 4]);
        let old_ptr = buf.as_ptr();

        let grown = arena.resize(buf, 100, true, false).unwrap();
        assert_eq!(grown.len(), 128);
        assert_eq!(&grown[..4], &[1, 2, 3, 4]);

        // The old buffer went back to the pool.
        assert_eq!(arena.get(32, false).unwrap().as_ptr(), old_ptr);
    }

    #[test]
    fn test_resize_clear() {
        let arena = arena();
        let mut dirty = arena.get(64, true).unwrap();
        dirty.fill(0xAA);
        arena.release(dirty);

        let buf = Buffer::alloc(32).unwrap();
        let cleared = arena.resize(buf, 64, false, true).unwrap();
        assert_eq!(cleared.len(), 64);
        assert!(cleared.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_resize_when_disabled() {
        let arena = BufferArena::new(ArenaConfig {
            enabled: false,
            ..ArenaConfig::default()
        });
        let buf = Buffer::from(vec![9u8; 10]);
        let resized = arena.resize(buf, 4, true, false).unwrap();
        assert_eq!(resized.as_slice(), &[9, 9, 9, 9]);
    }

    #[test]
    fn test_maintain_evicts_expired_head_run() {
        let arena = arena();
        arena.release(Buffer::alloc(64).unwrap());
        arena.release(Buffer::alloc(64).unwrap());
        arena.release(Buffer::alloc(128).unwrap());

        let later = Instant::now() + Duration::from_secs(31);
        assert_eq!(arena.maintain_at(later), 3);
        assert_eq!(arena.pooled_bytes(), 0);
        // Empty classes stay by default.
        assert_eq!(arena.stats().classes.len(), 2);
    }

    #[test]
    fn test_maintain_keeps_fresh_entries() {
        let arena = arena();
        arena.release(Buffer::alloc(64).unwrap());

        assert_eq!(arena.maintain_at(Instant::now()), 0);
        assert_eq!(arena.pooled_bytes(), 64);
    }

    #[test]
    fn test_maintain_only_evicts_older_prefix() {
        let arena = arena();
        let start = Instant::now();
        {
            let mut free = arena.free.write();
            for offset in [0u64, 1, 29] {
                let stamp = start + Duration::from_secs(offset);
                free.insert(Buffer::alloc(64).unwrap(), stamp, false).unwrap();
            }
        }

        // At +45s the first two are past 30s, the third is 16s old.
        let evicted = arena.maintain_at(start + Duration::from_secs(45));
        assert_eq!(evicted, 2);
        assert_eq!(arena.stats().classes[0].count, 1);
        assert_eq!(arena.pooled_bytes(), 64);
    }

    #[test]
    fn test_maintain_is_time_gated() {
        let arena = arena();
        let now = Instant::now();
        assert_eq!(arena.maintain_at(now), 0);

        arena.release(Buffer::alloc(64).unwrap());
        // Within the 10s interval: no pass even though the entry would be old enough.
        arena.set_config(ArenaConfig {
            remove_older_than: Duration::ZERO,
            ..arena.config()
        });
        assert_eq!(arena.maintain_at(now + Duration::from_secs(5)), 0);
        assert_eq!(arena.maintain_at(now + Duration::from_secs(11)), 1);
    }

    #[test]
    fn test_maintain_removes_empty_classes_when_configured() {
        let arena = BufferArena::new(ArenaConfig {
            remove_empty_classes: true,
            ..ArenaConfig::default()
        });
        arena.release(Buffer::alloc(64).unwrap());
        arena.maintain_at(Instant::now() + Duration::from_secs(60));
        assert!(arena.stats().classes.is_empty());
    }

    #[test]
    fn test_lease_releases_on_drop() {
        let arena = Arc::new(arena());
        let ptr = {
            let lease = arena.lease(50, true).unwrap();
            assert_eq!(lease.len(), 50);
            assert_eq!(lease.capacity(), 64);
            lease.buffer().as_ptr()
        };
        assert_eq!(arena.pooled_bytes(), 64);
        assert_eq!(arena.get(64, false).unwrap().as_ptr(), ptr);
    }

    #[test]
    fn test_stats_display() {
        let arena = arena();
        arena.release(Buffer::alloc(64).unwrap());
        let text = arena.stats().to_string();
        assert!(text.contains("Pooled bytes: 64"));
        assert!(text.contains("- Size: 64 Count: 1"));
    }

    #[test]
    fn test_hit_rate() {
        let stats = ArenaStats {
            reused: 3,
            allocated: 1,
            ..ArenaStats::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < 0.001);
        assert_eq!(ArenaStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_concurrent_get_release_never_duplicates() {
        let arena = Arc::new(arena());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let arena = Arc::clone(&arena);
                std::thread::spawn(move || {
                    for i in 0..500u32 {
                        let mut buf = arena.get(100, true).unwrap();
                        let tag = (t as u8).wrapping_mul(31).wrapping_add(i as u8);
                        buf.fill(tag);
                        assert!(buf.iter().all(|&b| b == tag));
                        arena.release(buf);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let stats = arena.stats();
        assert!(stats.pooled_bytes <= 8 * 128);
        assert_eq!(stats.pooled_bytes % 128, 0);
    }
}
