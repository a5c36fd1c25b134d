//! Selection of cached tiles to be drawn for the current viewport.
//!
//! Render strategies never load anything: they only look into the [`MemoryCache`] and return what
//! can be drawn right now. When the tiles of the needed level are not loaded yet, they substitute
//! them with coarser tiles or with the tiles drawn in the previous frame.

use std::sync::Arc;

use tessera_types::cartesian::Rect;

use crate::memory_cache::MemoryCache;
use crate::tile_schema::{TileIndex, TileSchema};

mod lod_fallback;
mod minimal;
mod tiling;

pub use lod_fallback::LodFallbackStrategy;
pub use minimal::MinimalRenderFetchStrategy;
pub use tiling::TilingRenderFetchStrategy;

/// Tile ready to be drawn.
pub struct TileFeature<T> {
    /// Index of the tile.
    pub index: TileIndex,
    /// Area covered by the tile.
    pub bbox: Rect,
    /// Decoded tile data.
    pub data: Arc<T>,
}

impl<T> Clone for TileFeature<T> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            bbox: self.bbox,
            data: self.data.clone(),
        }
    }
}

impl<T> std::fmt::Debug for TileFeature<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileFeature")
            .field("index", &self.index)
            .field("bbox", &self.bbox)
            .finish_non_exhaustive()
    }
}

/// Decides which cached tiles to draw.
///
/// Strategies may keep state between calls (e.g. the previous frame), so a strategy instance must
/// be used for a single view only.
pub trait RenderFetchStrategy<T>: Send {
    /// Returns the tiles to draw for the `extent` at the given `resolution`, in the drawing order
    /// (coarse tiles first, so that detailed tiles are drawn above them).
    fn get(
        &mut self,
        extent: &Rect,
        resolution: f64,
        schema: &TileSchema,
        cache: &MemoryCache<T>,
    ) -> Vec<TileFeature<T>>;
}

/// Sorts the tiles in drawing order: coarse levels first, then by index.
fn sort_for_drawing<T>(tiles: &mut [TileFeature<T>]) {
    tiles.sort_by(|a, b| a.index.z.cmp(&b.index.z).then(a.index.cmp(&b.index)));
}
