//! Configuration errors reported by `CacheBuilder::build`.

use thiserror::Error;

/// A cache configuration that cannot be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The cache needs at least one shard.
    #[error("shard count must be at least 1")]
    ZeroShards,

    /// The requested shard count exceeds the supported maximum.
    #[error("shard count {0} exceeds the maximum of {max}", max = crate::builder::MAX_SHARDS)]
    TooManyShards(usize),

    /// Phantom values are never readable, so they cannot expire.
    #[error("a phantom cache cannot have a default time-to-live")]
    PhantomExpiration,
}
