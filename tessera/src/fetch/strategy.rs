use tessera_types::cartesian::{CartesianPoint2d, Rect};

use crate::tile_schema::{TileInfo, TileSchema};

/// Decides which tiles should be loaded for the current viewport.
pub trait FetchStrategy: Send + Sync {
    /// Returns the tiles to be fetched for the `extent` displayed at the level `z`, in the order
    /// they should be requested.
    fn tiles_wanted(&self, schema: &TileSchema, extent: &Rect, z: u32) -> Vec<TileInfo>;
}

/// Requests the tiles of the target level and of several coarser levels, so that there is always
/// something to show while the detailed tiles are loading.
///
/// Tiles of the target level go first, then the levels above it one by one. Inside a level the
/// tiles closest to the center of the extent go first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFetchStrategy {
    levels_up: u32,
    margin_tiles: u32,
}

impl Default for DataFetchStrategy {
    fn default() -> Self {
        Self {
            levels_up: 3,
            margin_tiles: 0,
        }
    }
}

impl DataFetchStrategy {
    /// Creates a new strategy.
    ///
    /// * `levels_up` - number of levels coarser than the target one to request.
    /// * `margin_tiles` - the extent is expanded by this number of tiles in every direction on each
    ///   level, so that tiles just outside the view are loaded ahead of time.
    pub fn new(levels_up: u32, margin_tiles: u32) -> Self {
        Self {
            levels_up,
            margin_tiles,
        }
    }

    /// Number of coarser levels requested.
    pub fn levels_up(&self) -> u32 {
        self.levels_up
    }

    /// Margin around the extent in tiles.
    pub fn margin_tiles(&self) -> u32 {
        self.margin_tiles
    }
}

impl FetchStrategy for DataFetchStrategy {
    fn tiles_wanted(&self, schema: &TileSchema, extent: &Rect, z: u32) -> Vec<TileInfo> {
        if extent.is_empty() {
            return vec![];
        }

        let lods: Vec<_> = schema.lods_coarse_to_fine().collect();
        let Some(target) = lods.iter().position(|lod| lod.z_index() == z) else {
            return vec![];
        };

        let first = target.saturating_sub(self.levels_up as usize);
        let mut tiles = vec![];
        for lod in lods[first..=target].iter().rev() {
            let margin =
                self.margin_tiles as f64 * lod.resolution() * max_tile_side(schema) as f64;
            let level_extent = extent.expand(margin);
            tiles.append(&mut center_out(
                schema.tile_infos(&level_extent, lod.z_index()),
                extent,
            ));
        }

        tiles
    }
}

/// Requests only the tiles of the target level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MinimalFetchStrategy;

impl FetchStrategy for MinimalFetchStrategy {
    fn tiles_wanted(&self, schema: &TileSchema, extent: &Rect, z: u32) -> Vec<TileInfo> {
        if extent.is_empty() {
            return vec![];
        }

        center_out(schema.tile_infos(extent, z), extent)
    }
}

fn max_tile_side(schema: &TileSchema) -> u32 {
    schema.tile_width().max(schema.tile_height())
}

fn center_out(mut tiles: Vec<TileInfo>, extent: &Rect) -> Vec<TileInfo> {
    let center = extent.center();
    tiles.sort_by(|a, b| {
        let da = a.bbox.center().distance_sq(&center);
        let db = b.bbox.center().distance_sq(&center);
        da.total_cmp(&db)
    });

    tiles
}
