use tessera_types::cartesian::Rect;

use super::{sort_for_drawing, RenderFetchStrategy, TileFeature};
use crate::memory_cache::MemoryCache;
use crate::tile_schema::TileSchema;

/// Draws only the loaded tiles of the nearest level, without any substitution.
#[derive(Debug, Default, Clone, Copy)]
pub struct MinimalRenderFetchStrategy;

impl<T> RenderFetchStrategy<T> for MinimalRenderFetchStrategy {
    fn get(
        &mut self,
        extent: &Rect,
        resolution: f64,
        schema: &TileSchema,
        cache: &MemoryCache<T>,
    ) -> Vec<TileFeature<T>> {
        if extent.is_empty() {
            return vec![];
        }
        let Some(lod) = schema.nearest_lod(resolution) else {
            return vec![];
        };

        let mut tiles: Vec<_> = schema
            .tile_infos(extent, lod.z_index())
            .into_iter()
            .filter_map(|tile| {
                let data = cache.find(&tile.index)?.data()?.clone();
                Some(TileFeature {
                    index: tile.index,
                    bbox: tile.bbox,
                    data,
                })
            })
            .collect();
        sort_for_drawing(&mut tiles);

        tiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_strategy::test_fixtures::checkerboard_cache;
    use crate::tile_schema::TileIndex;

    #[test]
    fn exact_level_only() {
        let schema = TileSchema::web(18);
        let cache = checkerboard_cache(3);
        let resolution = schema.lod_resolution(3).unwrap();

        let tiles = MinimalRenderFetchStrategy.get(&schema.bounds(), resolution, &schema, &cache);
        assert_eq!(tiles.len(), 32);
        assert!(tiles.iter().all(|t| t.index.z == 3 && *t.data == 3));
    }

    #[test]
    fn absent_tiles_are_skipped() {
        let schema = TileSchema::web(18);
        let cache = MemoryCache::default();
        cache.add_data(TileIndex::new(0, 0, 1), 1);
        cache.add_absent(TileIndex::new(1, 0, 1));

        let resolution = schema.lod_resolution(1).unwrap();
        let tiles = MinimalRenderFetchStrategy.get(&schema.bounds(), resolution, &schema, &cache);
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].index, TileIndex::new(0, 0, 1));
    }
}
