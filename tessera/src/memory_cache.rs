//! Bounded in-memory store of fetched tiles.

use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::TesseraError;
use crate::tile_schema::TileIndex;

/// Default number of tiles the cache shrinks to after eviction.
pub const DEFAULT_MIN_TILES: usize = 200;
/// Default number of tiles after which eviction starts.
pub const DEFAULT_MAX_TILES: usize = 300;

/// Value stored in a [`MemoryCache`].
#[derive(Debug)]
pub enum CachedTile<T> {
    /// Tile was loaded and decoded.
    Data(Arc<T>),
    /// Tile source reported that it has no data for this tile. Such tiles are never requested
    /// again and never rendered.
    Absent,
}

impl<T> CachedTile<T> {
    /// Returns the tile data, if there is any.
    pub fn data(&self) -> Option<&Arc<T>> {
        match self {
            CachedTile::Data(data) => Some(data),
            CachedTile::Absent => None,
        }
    }

    /// Returns true for the confirmed absent marker.
    pub fn is_absent(&self) -> bool {
        matches!(self, CachedTile::Absent)
    }
}

impl<T> Clone for CachedTile<T> {
    fn clone(&self) -> Self {
        match self {
            CachedTile::Data(data) => CachedTile::Data(data.clone()),
            CachedTile::Absent => CachedTile::Absent,
        }
    }
}

struct CacheState<T> {
    entries: LruCache<TileIndex, CachedTile<T>, ahash::RandomState>,
    min_tiles: usize,
    max_tiles: usize,
}

impl<T> CacheState<T> {
    fn evict_if_needed(&mut self) {
        if self.entries.len() <= self.max_tiles {
            return;
        }

        let mut evicted = 0;
        while self.entries.len() > self.min_tiles && self.entries.pop_lru().is_some() {
            evicted += 1;
        }

        log::trace!(
            "Evicted {evicted} tiles from memory cache, {} left",
            self.entries.len()
        );
    }
}

/// Thread safe store of tiles keyed by [`TileIndex`].
///
/// The cache keeps at most `max_tiles` entries. When an insertion makes it larger than that, the
/// least recently touched entries are removed until `min_tiles` entries remain. Both
/// [`find`](Self::find) and [`add`](Self::add) count as a touch.
///
/// Every operation locks the cache for its own duration only, so lookups from the render thread
/// can interleave freely with insertions from the fetch tasks.
pub struct MemoryCache<T> {
    state: Mutex<CacheState<T>>,
}

impl<T> std::fmt::Debug for MemoryCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryCache")
            .field("len", &state.entries.len())
            .field("min_tiles", &state.min_tiles)
            .field("max_tiles", &state.max_tiles)
            .finish()
    }
}

impl<T> Default for MemoryCache<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded_with_hasher(ahash::RandomState::default()),
                min_tiles: DEFAULT_MIN_TILES,
                max_tiles: DEFAULT_MAX_TILES,
            }),
        }
    }
}

impl<T> MemoryCache<T> {
    /// Creates a new cache with the given capacity limits.
    pub fn new(min_tiles: usize, max_tiles: usize) -> Result<Self, TesseraError> {
        let cache = Self::default();
        cache.set_capacity(min_tiles, max_tiles)?;
        Ok(cache)
    }

    /// Returns the cached value for the tile, or `None` if the tile is not in the cache.
    pub fn find(&self, index: &TileIndex) -> Option<CachedTile<T>> {
        self.state.lock().entries.get(index).cloned()
    }

    /// Returns true if the tile is in the cache. Does not update the recency of the entry.
    pub fn contains(&self, index: &TileIndex) -> bool {
        self.state.lock().entries.contains(index)
    }

    /// Inserts or replaces the cached value of the tile.
    pub fn add(&self, index: TileIndex, tile: CachedTile<T>) {
        let mut state = self.state.lock();
        state.entries.put(index, tile);
        state.evict_if_needed();
    }

    /// Stores decoded tile data.
    pub fn add_data(&self, index: TileIndex, data: T) {
        self.add(index, CachedTile::Data(Arc::new(data)));
    }

    /// Marks the tile as confirmed absent in the source.
    pub fn add_absent(&self, index: TileIndex) {
        self.add(index, CachedTile::Absent);
    }

    /// Removes the tile from the cache.
    pub fn remove(&self, index: &TileIndex) -> Option<CachedTile<T>> {
        self.state.lock().entries.pop(index)
    }

    /// Removes all tiles from the cache.
    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// Number of entries in the cache, including confirmed absent markers.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if the cache has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tiles the cache shrinks to when it overflows.
    pub fn min_tiles(&self) -> usize {
        self.state.lock().min_tiles
    }

    /// Maximum number of tiles in the cache.
    pub fn max_tiles(&self) -> usize {
        self.state.lock().max_tiles
    }

    /// Changes capacity limits of the cache. If the cache holds more than `max_tiles` entries,
    /// eviction runs immediately.
    pub fn set_capacity(&self, min_tiles: usize, max_tiles: usize) -> Result<(), TesseraError> {
        if min_tiles > max_tiles {
            return Err(TesseraError::InvalidConfig(format!(
                "min_tiles ({min_tiles}) cannot be larger than max_tiles ({max_tiles})"
            )));
        }

        let mut state = self.state.lock();
        state.min_tiles = min_tiles;
        state.max_tiles = max_tiles;
        state.evict_if_needed();

        Ok(())
    }
}
