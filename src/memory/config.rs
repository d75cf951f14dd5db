//! Tunables for [`BufferArena`](super::BufferArena).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WsError};

/// Default lower bound for pooled buffer sizes.
pub const DEFAULT_MIN_BUFFER_SIZE: usize = 32;

/// Default upper bound for pooled buffer sizes (unbounded).
pub const DEFAULT_MAX_BUFFER_SIZE: usize = usize::MAX;

/// Default cap on the total bytes held in the free-list (30 MiB).
pub const DEFAULT_MAX_POOL_AGGREGATE_SIZE: usize = 30 * 1024 * 1024;

/// Default age after which a pooled buffer is evicted.
pub const DEFAULT_REMOVE_OLDER_THAN: Duration = Duration::from_secs(30);

/// Default minimum interval between two maintenance passes.
pub const DEFAULT_RUN_MAINTENANCE_EVERY: Duration = Duration::from_secs(10);

/// Configuration for a buffer arena.
///
/// Serialized field names are the snake_case names below, with the two
/// durations expressed in milliseconds:
///
/// ```
/// use wsarena::memory::ArenaConfig;
///
/// let config = ArenaConfig::from_json(r#"{ "min_buffer_size": 64, "remove_older_than_ms": 5000 }"#).unwrap();
/// assert_eq!(config.min_buffer_size, 64);
/// assert_eq!(config.remove_older_than.as_secs(), 5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Pooling on/off. When off, `get` allocates and `release` drops.
    pub enabled: bool,
    /// Rounded-up requests never go below this size; smaller releases are not pooled.
    pub min_buffer_size: usize,
    /// Releases larger than this are not pooled.
    pub max_buffer_size: usize,
    /// Releases that would push the pooled total past this are dropped.
    pub max_pool_aggregate_size: usize,
    /// Pooled entries older than this are evicted by maintenance.
    #[serde(rename = "remove_older_than_ms", with = "duration_ms")]
    pub remove_older_than: Duration,
    /// Maintenance is a no-op if the previous pass ran less than this long ago.
    #[serde(rename = "run_maintenance_every_ms", with = "duration_ms")]
    pub run_maintenance_every: Duration,
    /// Drop size classes left empty after maintenance.
    pub remove_empty_classes: bool,
    /// Scan a size class for the same buffer before pooling it.
    pub double_release_check: bool,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_buffer_size: DEFAULT_MIN_BUFFER_SIZE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_pool_aggregate_size: DEFAULT_MAX_POOL_AGGREGATE_SIZE,
            remove_older_than: DEFAULT_REMOVE_OLDER_THAN,
            run_maintenance_every: DEFAULT_RUN_MAINTENANCE_EVERY,
            remove_empty_classes: false,
            double_release_check: cfg!(debug_assertions),
        }
    }
}

impl ArenaConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the size bounds are usable.
    pub fn validate(&self) -> Result<()> {
        if self.min_buffer_size == 0 {
            return Err(WsError::InvalidConfig(
                "min_buffer_size must be at least 1".to_string(),
            ));
        }
        if self.min_buffer_size > self.max_buffer_size {
            return Err(WsError::InvalidConfig(format!(
                "min_buffer_size {} exceeds max_buffer_size {}",
                self.min_buffer_size, self.max_buffer_size
            )));
        }
        Ok(())
    }
}

/// Serde adapter storing a `Duration` as whole milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
