use crate::cache::Cache;
use crate::error::CacheError;
use crate::listener::RemovalListener;
use crate::slot::Strength;
use core::hash::{BuildHasher, Hash};
use std::collections::hash_map::RandomState;
use std::time::Duration;

/// Shard count used when the builder is not told otherwise.
pub const DEFAULT_SHARDS: usize = 16;

/// Largest accepted shard count.
pub const MAX_SHARDS: usize = 1 << 16;

/// Builder for configuring a [`Cache`].
///
/// # Example
///
/// ```
/// use reclaim_cache::{Cache, Ref, RemovalCause, Strength};
/// use std::time::Duration;
///
/// let cache = Cache::<String, u64>::builder(Strength::Soft)
///     .ttl(Duration::from_secs(30))
///     .shards(8)
///     .listener(|key: &String, _value: Option<Ref<u64>>, cause: RemovalCause| {
///         println!("{key} left the cache: {cause:?}");
///     })
///     .build()
///     .unwrap();
/// assert!(cache.is_empty());
/// ```
pub struct CacheBuilder<K, V, S = RandomState> {
    strength: Strength,
    ttl: Option<Duration>,
    listener: Option<Box<dyn RemovalListener<K, V>>>,
    shard_count: usize,
    hasher: S,
}

impl<K, V> CacheBuilder<K, V, RandomState> {
    /// Create a builder for a cache holding its values with `strength`.
    pub fn new(strength: Strength) -> Self {
        Self {
            strength,
            ttl: None,
            listener: None,
            shard_count: DEFAULT_SHARDS,
            hasher: RandomState::new(),
        }
    }
}

impl<K, V, S> CacheBuilder<K, V, S> {
    /// Default time-to-live for entries stored without one of their own.
    ///
    /// Default: entries never expire.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Observer called once for every entry that leaves the cache.
    pub fn listener<L>(mut self, listener: L) -> Self
    where
        L: RemovalListener<K, V> + 'static,
    {
        self.listener = Some(Box::new(listener));
        self
    }

    /// Set the number of shards.
    ///
    /// More shards reduce contention between keys. Rounded up to the next
    /// power of 2.
    ///
    /// Default: 16
    pub fn shards(mut self, count: usize) -> Self {
        self.shard_count = count;
        self
    }

    /// Hash keys with `hasher` instead of the default `RandomState`.
    pub fn hasher<S2>(self, hasher: S2) -> CacheBuilder<K, V, S2> {
        CacheBuilder {
            strength: self.strength,
            ttl: self.ttl,
            listener: self.listener,
            shard_count: self.shard_count,
            hasher,
        }
    }

    /// Build the cache with the configured settings.
    pub fn build(self) -> Result<Cache<K, V, S>, CacheError>
    where
        K: Eq + Hash + Clone,
        S: BuildHasher,
    {
        if self.shard_count == 0 {
            return Err(CacheError::ZeroShards);
        }
        if self.shard_count > MAX_SHARDS {
            return Err(CacheError::TooManyShards(self.shard_count));
        }
        if self.strength == Strength::Phantom && self.ttl.is_some() {
            return Err(CacheError::PhantomExpiration);
        }
        Ok(Cache::from_parts(
            self.strength,
            self.ttl,
            self.listener,
            self.shard_count.next_power_of_two(),
            self.hasher,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::RemovalCause;
    use crate::slot::Ref;

    #[test]
    fn test_builder_default() {
        let cache = CacheBuilder::<u32, u32>::new(Strength::Strong).build().unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.strength(), Strength::Strong);
        assert_eq!(cache.shard_count(), DEFAULT_SHARDS);
    }

    #[test]
    fn test_builder_rounds_shards_up() {
        let cache = CacheBuilder::<u32, u32>::new(Strength::Weak)
            .shards(5)
            .build()
            .unwrap();
        assert_eq!(cache.shard_count(), 8);

        let cache = CacheBuilder::<u32, u32>::new(Strength::Weak)
            .shards(1)
            .build()
            .unwrap();
        assert_eq!(cache.shard_count(), 1);
    }

    #[test]
    fn test_builder_rejects_zero_shards() {
        let err = CacheBuilder::<u32, u32>::new(Strength::Strong)
            .shards(0)
            .build()
            .err();
        assert_eq!(err, Some(CacheError::ZeroShards));
    }

    #[test]
    fn test_builder_rejects_too_many_shards() {
        let err = CacheBuilder::<u32, u32>::new(Strength::Strong)
            .shards(MAX_SHARDS + 1)
            .build()
            .err();
        assert_eq!(err, Some(CacheError::TooManyShards(MAX_SHARDS + 1)));
    }

    #[test]
    fn test_builder_rejects_phantom_ttl() {
        let err = CacheBuilder::<u32, u32>::new(Strength::Phantom)
            .ttl(Duration::from_secs(1))
            .build()
            .err();
        assert_eq!(err, Some(CacheError::PhantomExpiration));
    }

    #[test]
    fn test_builder_full_config() {
        let cache = CacheBuilder::<String, u32>::new(Strength::Soft)
            .ttl(Duration::from_secs(60))
            .shards(4)
            .listener(|_: &String, _: Option<Ref<u32>>, _: RemovalCause| {})
            .hasher(RandomState::new())
            .build()
            .unwrap();

        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
        assert_eq!(cache.ttl(), Some(Duration::from_secs(60)));
    }
}
