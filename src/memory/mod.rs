//! Pooled byte buffers.
//!
//! - [`Buffer`] / [`BufferView`]: owned block and zero-copy window over it
//! - [`BufferArena`]: size-classed free-list shared between connections
//! - [`PooledBuffer`]: lease that returns its buffer to the arena on drop

mod arena;
mod buffer;
mod config;
mod pooled;

pub use arena::{ArenaStats, BufferArena, ReleaseOutcome, SizeClassStats};
pub use buffer::{Buffer, BufferView};
pub use config::{
    ArenaConfig, DEFAULT_MAX_BUFFER_SIZE, DEFAULT_MAX_POOL_AGGREGATE_SIZE, DEFAULT_MIN_BUFFER_SIZE,
    DEFAULT_REMOVE_OLDER_THAN, DEFAULT_RUN_MAINTENANCE_EVERY,
};
pub use pooled::PooledBuffer;
