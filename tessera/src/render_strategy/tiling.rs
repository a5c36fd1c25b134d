use std::collections::HashSet;

use tessera_types::cartesian::Rect;

use super::{sort_for_drawing, LodFallbackStrategy, RenderFetchStrategy, TileFeature};
use crate::memory_cache::MemoryCache;
use crate::tile_schema::{TileIndex, TileSchema};

/// Relative tolerance used to decide whether a tile covers a slot of the target level.
const COVER_TOLERANCE: f64 = 1e-6;

/// Wraps another strategy and fills the holes it leaves with the tiles drawn in the previous
/// frame.
///
/// A slot of the target level is a hole if its tile is not in the cache and no tile returned by
/// the inner strategy covers it completely. Slots confirmed absent by the source are not holes.
/// Every returned set of tiles is remembered as the previous frame for the next call.
pub struct TilingRenderFetchStrategy<T, S = LodFallbackStrategy> {
    inner: S,
    previous: Vec<TileFeature<T>>,
}

impl<T, S: std::fmt::Debug> std::fmt::Debug for TilingRenderFetchStrategy<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TilingRenderFetchStrategy")
            .field("inner", &self.inner)
            .field("previous", &self.previous.len())
            .finish()
    }
}

impl<T, S: Default> Default for TilingRenderFetchStrategy<T, S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

impl<T, S> TilingRenderFetchStrategy<T, S> {
    /// Creates a new strategy wrapping `inner`.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            previous: vec![],
        }
    }

    /// The wrapped strategy.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Forgets the previous frame.
    pub fn reset(&mut self) {
        self.previous.clear();
    }
}

impl<T, S> RenderFetchStrategy<T> for TilingRenderFetchStrategy<T, S>
where
    T: Send + Sync,
    S: RenderFetchStrategy<T>,
{
    fn get(
        &mut self,
        extent: &Rect,
        resolution: f64,
        schema: &TileSchema,
        cache: &MemoryCache<T>,
    ) -> Vec<TileFeature<T>> {
        let mut tiles = self.inner.get(extent, resolution, schema, cache);

        if let (Some(lod), false) = (schema.nearest_lod(resolution), extent.is_empty()) {
            let mut used: HashSet<TileIndex> = tiles.iter().map(|tile| tile.index).collect();
            let mut substitutes = vec![];

            for slot in schema.tile_infos(extent, lod.z_index()) {
                if cache.contains(&slot.index) {
                    continue;
                }

                let shrunk = slot
                    .bbox
                    .shrink(slot.bbox.width().min(slot.bbox.height()) * COVER_TOLERANCE);
                if tiles.iter().any(|tile| tile.bbox.contains_rect(&shrunk)) {
                    continue;
                }

                for prev in &self.previous {
                    if prev.bbox.intersects(&slot.bbox) && used.insert(prev.index) {
                        substitutes.push(prev.clone());
                    }
                }
            }

            if !substitutes.is_empty() {
                log::trace!("{} tiles taken from the previous frame", substitutes.len());
                tiles.append(&mut substitutes);
                sort_for_drawing(&mut tiles);
            }
        }

        self.previous = tiles.clone();
        tiles
    }
}
