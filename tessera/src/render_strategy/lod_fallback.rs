use std::collections::HashMap;

use tessera_types::cartesian::Rect;
use web_time::{Duration, Instant};

use super::{sort_for_drawing, RenderFetchStrategy, TileFeature};
use crate::lod::Lod;
use crate::memory_cache::{CachedTile, MemoryCache};
use crate::tile_schema::{TileIndex, TileSchema};

/// Draws the tiles of the nearest level, substituting missing ones with cached tiles of coarser
/// levels.
///
/// For every missing tile the strategy climbs up the levels over the part of the tile inside the
/// view, until a cached tile is found. Tiles confirmed absent by the source are not substituted.
///
/// The climb is limited by `max_levels_up` (unlimited by default). The limit is lifted while the
/// map zooms in and for `search_up_hold` after the last zoom-in, because right after a zoom-in the
/// only loaded tiles are usually several levels above the new one.
#[derive(Debug, Clone, Default)]
pub struct LodFallbackStrategy {
    max_levels_up: Option<u32>,
    search_up_hold: Duration,
    prev_resolution: Option<f64>,
    last_zoom_in: Option<Instant>,
}

impl LodFallbackStrategy {
    /// Creates a new strategy with unlimited climbing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits the number of levels the strategy climbs to find a substitute tile.
    pub fn with_max_levels_up(self, max_levels_up: Option<u32>) -> Self {
        Self {
            max_levels_up,
            ..self
        }
    }

    /// Sets how long the climbing limit is ignored after the last zoom-in.
    pub fn with_search_up_hold(self, search_up_hold: Duration) -> Self {
        Self {
            search_up_hold,
            ..self
        }
    }

    /// Climbing limit, if set.
    pub fn max_levels_up(&self) -> Option<u32> {
        self.max_levels_up
    }

    /// Returns the climbing limit for this call, updating the zoom tracking state.
    fn effective_max_levels_up(&mut self, resolution: f64) -> Option<u32> {
        let now = Instant::now();
        let zooming_in = matches!(self.prev_resolution, Some(prev) if resolution < prev);
        if zooming_in {
            self.last_zoom_in = Some(now);
        }
        self.prev_resolution = Some(resolution);

        let search_up = zooming_in
            || self
                .last_zoom_in
                .is_some_and(|last| now.duration_since(last) < self.search_up_hold);

        if search_up {
            None
        } else {
            self.max_levels_up
        }
    }
}

impl<T> RenderFetchStrategy<T> for LodFallbackStrategy {
    fn get(
        &mut self,
        extent: &Rect,
        resolution: f64,
        schema: &TileSchema,
        cache: &MemoryCache<T>,
    ) -> Vec<TileFeature<T>> {
        let max_levels_up = self.effective_max_levels_up(resolution);

        if extent.is_empty() {
            return vec![];
        }
        let Some(lod) = schema.nearest_lod(resolution) else {
            return vec![];
        };

        let lods: Vec<Lod> = schema.lods_coarse_to_fine().collect();
        let Some(target) = lods.iter().position(|l| *l == lod) else {
            return vec![];
        };

        let mut search = FallbackSearch {
            schema,
            cache,
            lods: &lods,
            max_levels_up,
            found: HashMap::new(),
        };
        search.collect(target, extent, 0);

        let mut tiles: Vec<_> = search.found.into_values().collect();
        sort_for_drawing(&mut tiles);

        log::trace!(
            "{} tiles to draw at level {} (climb limit {max_levels_up:?})",
            tiles.len(),
            lod.z_index()
        );
        tiles
    }
}

struct FallbackSearch<'a, T> {
    schema: &'a TileSchema,
    cache: &'a MemoryCache<T>,
    lods: &'a [Lod],
    max_levels_up: Option<u32>,
    found: HashMap<TileIndex, TileFeature<T>>,
}

impl<T> FallbackSearch<'_, T> {
    fn collect(&mut self, level: usize, area: &Rect, climbed: u32) {
        for tile in self.schema.tile_infos(area, self.lods[level].z_index()) {
            if self.found.contains_key(&tile.index) {
                continue;
            }

            match self.cache.find(&tile.index) {
                Some(CachedTile::Data(data)) => {
                    self.found.insert(
                        tile.index,
                        TileFeature {
                            index: tile.index,
                            bbox: tile.bbox,
                            data,
                        },
                    );
                }
                Some(CachedTile::Absent) => {}
                None => {
                    if level == 0 || self.max_levels_up.is_some_and(|max| climbed >= max) {
                        continue;
                    }

                    if let Some(missing_area) = tile.bbox.intersection(area) {
                        self.collect(level - 1, &missing_area, climbed + 1);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tessera_types::cartesian::CartesianPoint2d;

    use super::*;
    use crate::render_strategy::test_fixtures::checkerboard_cache;

    fn world(schema: &TileSchema) -> Rect {
        schema.bounds()
    }

    fn resolution(schema: &TileSchema, z: u32) -> f64 {
        schema.lod_resolution(z).unwrap()
    }

    #[test]
    fn checkerboard_fallback() {
        let schema = TileSchema::web(18);
        let cache = checkerboard_cache(3);
        let mut strategy = LodFallbackStrategy::new();

        let tiles = strategy.get(&world(&schema), resolution(&schema, 3), &schema, &cache);
        assert_eq!(tiles.len(), 43);

        let count_at = |z: u32| tiles.iter().filter(|t| t.index.z == z).count();
        assert_eq!(count_at(3), 32);
        assert_eq!(count_at(2), 8);
        assert_eq!(count_at(1), 2);
        assert_eq!(count_at(0), 1);
    }

    #[test]
    fn tiles_are_sorted_coarse_first() {
        let schema = TileSchema::web(18);
        let cache = checkerboard_cache(3);
        let mut strategy = LodFallbackStrategy::new();

        let tiles = strategy.get(&world(&schema), resolution(&schema, 3), &schema, &cache);
        assert!(tiles.windows(2).all(|w| {
            w[0].index.z < w[1].index.z || (w[0].index.z == w[1].index.z && w[0].index < w[1].index)
        }));
        assert_eq!(tiles[0].index, TileIndex::new(0, 0, 0));
    }

    #[test]
    fn all_tiles_loaded() {
        let schema = TileSchema::web(18);
        let cache = MemoryCache::default();
        for x in 0..4 {
            for y in 0..4 {
                cache.add_data(TileIndex::new(x, y, 2), ());
            }
        }
        cache.add_data(TileIndex::new(0, 0, 1), ());

        let tiles = LodFallbackStrategy::new().get(
            &world(&schema),
            resolution(&schema, 2),
            &schema,
            &cache,
        );
        assert_eq!(tiles.len(), 16);
        assert!(tiles.iter().all(|t| t.index.z == 2));
    }

    #[test]
    fn absent_tiles_are_not_substituted() {
        let schema = TileSchema::web(18);
        let cache = MemoryCache::default();
        cache.add_data(TileIndex::new(0, 0, 0), ());
        for x in 0..2 {
            for y in 0..2 {
                cache.add_absent(TileIndex::new(x, y, 1));
            }
        }

        let tiles = LodFallbackStrategy::new().get(
            &world(&schema),
            resolution(&schema, 1),
            &schema,
            &cache,
        );
        assert!(tiles.is_empty());

        cache.remove(&TileIndex::new(1, 1, 1));
        let tiles = LodFallbackStrategy::new().get(
            &world(&schema),
            resolution(&schema, 1),
            &schema,
            &cache,
        );
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].index, TileIndex::new(0, 0, 0));
    }

    #[test]
    fn climb_limit() {
        let schema = TileSchema::web(18);
        let cache = MemoryCache::default();
        cache.add_data(TileIndex::new(0, 0, 0), ());

        let mut limited = LodFallbackStrategy::new().with_max_levels_up(Some(1));
        let tiles = limited.get(&world(&schema), resolution(&schema, 2), &schema, &cache);
        assert!(tiles.is_empty());

        let mut limited = LodFallbackStrategy::new().with_max_levels_up(Some(2));
        let tiles = limited.get(&world(&schema), resolution(&schema, 2), &schema, &cache);
        assert_eq!(tiles.len(), 1);

        let mut unlimited = LodFallbackStrategy::new();
        let tiles = unlimited.get(&world(&schema), resolution(&schema, 2), &schema, &cache);
        assert_eq!(tiles.len(), 1);
    }

    #[test]
    fn zoom_in_lifts_climb_limit() {
        let schema = TileSchema::web(18);
        let cache = MemoryCache::default();
        cache.add_data(TileIndex::new(0, 0, 0), ());
        let extent = world(&schema);

        let mut strategy = LodFallbackStrategy::new().with_max_levels_up(Some(1));
        let tiles = strategy.get(&extent, resolution(&schema, 0), &schema, &cache);
        assert_eq!(tiles.len(), 1);

        // Zooming in: searching up without limit.
        let tiles = strategy.get(&extent, resolution(&schema, 3), &schema, &cache);
        assert_eq!(tiles.len(), 1);

        // Same resolution, no hold: limit is back.
        let tiles = strategy.get(&extent, resolution(&schema, 3), &schema, &cache);
        assert!(tiles.is_empty());
    }

    #[test]
    fn search_up_hold() {
        let schema = TileSchema::web(18);
        let cache = MemoryCache::default();
        cache.add_data(TileIndex::new(0, 0, 0), ());
        let extent = world(&schema);

        let mut strategy = LodFallbackStrategy::new()
            .with_max_levels_up(Some(0))
            .with_search_up_hold(Duration::from_secs(3600));
        let _ = strategy.get(&extent, resolution(&schema, 1), &schema, &cache);
        let tiles = strategy.get(&extent, resolution(&schema, 3), &schema, &cache);
        assert_eq!(tiles.len(), 1);

        let tiles = strategy.get(&extent, resolution(&schema, 3), &schema, &cache);
        assert_eq!(tiles.len(), 1);
    }

    #[test]
    fn partial_extent_substitutes_only_visible_part() {
        let schema = TileSchema::web(18);
        let cache = MemoryCache::default();
        // Level 1: only the top-left quarter is loaded.
        cache.add_data(TileIndex::new(0, 0, 1), ());
        cache.add_data(TileIndex::new(1, 0, 1), ());

        // Top-left quarter of the world at level 2 resolution.
        let bounds = schema.bounds();
        let center = bounds.center();
        let extent = Rect::new(bounds.x_min(), center.y(), center.x(), bounds.y_max());

        let tiles =
            LodFallbackStrategy::new().get(&extent, resolution(&schema, 2), &schema, &cache);
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].index, TileIndex::new(0, 0, 1));
    }

    #[test]
    fn degenerate_extent() {
        let schema = TileSchema::web(18);
        let cache = checkerboard_cache(3);
        let extent = Rect::new(0.0, 0.0, 0.0, 1000.0);
        let tiles =
            LodFallbackStrategy::new().get(&extent, resolution(&schema, 3), &schema, &cache);
        assert!(tiles.is_empty());

        let tiles = LodFallbackStrategy::new().get(&world(&schema), f64::NAN, &schema, &cache);
        assert!(tiles.is_empty());
    }
}
