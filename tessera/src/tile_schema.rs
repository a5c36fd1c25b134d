//! [`TileSchema`] is used by tile layers to calculate [tile indices](TileIndex) needed for a given
//! extent and resolution.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use tessera_types::cartesian::{CartesianPoint2d, Point2d, Rect};

use crate::error::TesseraError;
use crate::lod::Lod;

/// Fraction of a tile size under which a rectangle edge is considered to lie exactly on the tile
/// border. Protects against tiles that only touch the requested area because of rounding errors.
const TILE_EDGE_TOLERANCE: f64 = 1e-6;

/// Direction of the Y index of tiles.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum VerticalDirection {
    /// Tiles with `Y == 0` are at the top of the map.
    TopToBottom,
    /// Tiles with `Y == 0` are at the bottom of the map.
    BottomToTop,
}

/// Tile index.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash, Serialize, Deserialize)]
pub struct TileIndex {
    /// X index (column).
    pub x: i32,
    /// Y index (row).
    pub y: i32,
    /// Z index (level).
    pub z: u32,
}

impl TileIndex {
    /// Create a new index instance.
    pub fn new(x: i32, y: i32, z: u32) -> Self {
        Self { x, y, z }
    }
}

impl Display for TileIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Index of a tile together with its footprint in map coordinates.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TileInfo {
    /// Index of the tile.
    pub index: TileIndex,
    /// Area covered by the tile.
    pub bbox: Rect,
}

/// Tile schema specifies how tile indices are calculated based on the map extent and resolution.
///
/// A schema always has at least one level of detail, and resolutions of its levels strictly
/// decrease as the z-index grows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawTileSchema")]
pub struct TileSchema {
    origin: Point2d,
    bounds: Rect,
    lods: BTreeSet<Lod>,
    tile_width: u32,
    tile_height: u32,
    y_direction: VerticalDirection,
}

#[derive(Deserialize)]
struct RawTileSchema {
    origin: Point2d,
    bounds: Rect,
    lods: Vec<Lod>,
    tile_width: u32,
    tile_height: u32,
    y_direction: VerticalDirection,
}

impl TryFrom<RawTileSchema> for TileSchema {
    type Error = TesseraError;

    fn try_from(raw: RawTileSchema) -> Result<Self, Self::Error> {
        TileSchema::new(
            raw.origin,
            raw.bounds,
            raw.lods,
            raw.tile_width,
            raw.tile_height,
            raw.y_direction,
        )
    }
}

impl TileSchema {
    /// Creates a new schema, validating its parameters.
    ///
    /// * `origin` - position where all tiles have `X == 0, Y == 0` indices.
    /// * `bounds` - rectangle that contains all tiles of the schema.
    /// * `lods` - levels of detail. Resolutions must strictly decrease as z-index grows.
    pub fn new(
        origin: Point2d,
        bounds: Rect,
        lods: impl IntoIterator<Item = Lod>,
        tile_width: u32,
        tile_height: u32,
        y_direction: VerticalDirection,
    ) -> Result<Self, TesseraError> {
        let lods: Vec<Lod> = lods.into_iter().collect();
        if lods.is_empty() {
            return Err(TesseraError::InvalidConfig(
                "tile schema must have at least one level of detail".into(),
            ));
        }

        if tile_width == 0 || tile_height == 0 {
            return Err(TesseraError::InvalidConfig(format!(
                "tile size must be positive, got {tile_width}x{tile_height}"
            )));
        }

        if bounds.is_empty() {
            return Err(TesseraError::InvalidConfig(format!(
                "tile schema bounds must have positive area: {bounds:?}"
            )));
        }

        let count = lods.len();
        let lods: BTreeSet<Lod> = lods.into_iter().collect();
        if lods.len() != count {
            return Err(TesseraError::InvalidConfig(
                "several levels of detail have the same resolution".into(),
            ));
        }

        // Ordered from the finest resolution, so z-indices must go down.
        let mut prev_z: Option<u32> = None;
        for lod in &lods {
            if prev_z.is_some_and(|prev| lod.z_index() >= prev) {
                return Err(TesseraError::InvalidConfig(format!(
                    "resolution must strictly decrease with z-index (level {})",
                    lod.z_index()
                )));
            }
            prev_z = Some(lod.z_index());
        }

        Ok(Self {
            origin,
            bounds,
            lods,
            tile_width,
            tile_height,
            y_direction,
        })
    }

    /// Standard Web Mercator based tile scheme (used, for example, by OSM and Google maps).
    pub fn web(lods_count: u32) -> Self {
        const TOP_RESOLUTION: f64 = 156543.03392800014;

        let mut lods = BTreeSet::new();
        let mut resolution = TOP_RESOLUTION;
        for z in 0..lods_count.max(1) {
            if let Some(lod) = Lod::new(resolution, z) {
                lods.insert(lod);
            }
            resolution /= 2.0;
        }

        TileSchema {
            origin: Point2d::new(-20037508.342787, 20037508.342787),
            bounds: Rect::new(
                -20037508.342787,
                -20037508.342787,
                20037508.342787,
                20037508.342787,
            ),
            lods,
            tile_width: 256,
            tile_height: 256,
            y_direction: VerticalDirection::TopToBottom,
        }
    }

    /// Rectangle that contains all tiles of the schema.
    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// Width of a single tile in pixels.
    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    /// Height of a single tile in pixels.
    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    /// Direction of the Y-axis.
    pub fn y_direction(&self) -> VerticalDirection {
        self.y_direction
    }

    /// Level of detail with the given z-index, if exists.
    pub fn lod(&self, z: u32) -> Option<Lod> {
        self.lods.iter().find(|lod| lod.z_index() == z).copied()
    }

    /// Resolution of the given z-level, if exists.
    pub fn lod_resolution(&self, z: u32) -> Option<f64> {
        self.lod(z).map(|lod| lod.resolution())
    }

    /// Iterates over levels of detail starting from the coarsest one (largest resolution).
    pub fn lods_coarse_to_fine(&self) -> impl Iterator<Item = Lod> + '_ {
        self.lods.iter().rev().copied()
    }

    /// Selects the level of detail with resolution closest to the given one.
    ///
    /// Resolutions outside the schema range resolve to the coarsest or the finest level. If the
    /// given resolution is exactly between two levels, the coarser level is selected.
    pub fn nearest_lod(&self, resolution: f64) -> Option<Lod> {
        if !resolution.is_finite() {
            return None;
        }

        let mut nearest: Option<(Lod, f64)> = None;
        for lod in self.lods_coarse_to_fine() {
            let distance = (lod.resolution() - resolution).abs();
            match nearest {
                Some((_, nearest_distance)) if distance >= nearest_distance => {}
                _ => nearest = Some((lod, distance)),
            }
        }

        nearest.map(|(lod, _)| lod)
    }

    /// Returns all tiles of the level `z` that share an area with the `extent`.
    ///
    /// The extent is clipped by the schema bounds first, so tiles outside of the bounds are never
    /// returned. Tiles are returned row by row. Returns an empty vector if the extent does not
    /// intersect the bounds or the schema does not have level `z`.
    pub fn tile_infos(&self, extent: &Rect, z: u32) -> Vec<TileInfo> {
        let Some(resolution) = self.lod_resolution(z) else {
            return vec![];
        };
        let Some(area) = extent.intersection(&self.bounds) else {
            return vec![];
        };

        let tile_w = resolution * self.tile_width as f64;
        let tile_h = resolution * self.tile_height as f64;

        let (x_min, x_max) = index_range(
            area.x_min() - self.origin.x(),
            area.x_max() - self.origin.x(),
            tile_w,
        );
        let (y_min, y_max) = match self.y_direction {
            VerticalDirection::TopToBottom => index_range(
                self.origin.y() - area.y_max(),
                self.origin.y() - area.y_min(),
                tile_h,
            ),
            VerticalDirection::BottomToTop => index_range(
                area.y_min() - self.origin.y(),
                area.y_max() - self.origin.y(),
                tile_h,
            ),
        };

        let mut infos = vec![];
        for y in y_min..=y_max {
            for x in x_min..=x_max {
                let index = TileIndex::new(x, y, z);
                infos.push(TileInfo {
                    index,
                    bbox: self.bbox_at_resolution(index, resolution),
                });
            }
        }

        infos
    }

    /// Footprint of the tile, or `None` if the schema does not have level `index.z`.
    pub fn tile_bbox(&self, index: TileIndex) -> Option<Rect> {
        let resolution = self.lod_resolution(index.z)?;
        Some(self.bbox_at_resolution(index, resolution))
    }

    /// Information about the tile with the given index.
    pub fn tile_info(&self, index: TileIndex) -> Option<TileInfo> {
        Some(TileInfo {
            index,
            bbox: self.tile_bbox(index)?,
        })
    }

    fn bbox_at_resolution(&self, index: TileIndex, resolution: f64) -> Rect {
        let tile_w = self.tile_width as f64 * resolution;
        let tile_h = self.tile_height as f64 * resolution;

        let x_min = self.origin.x() + index.x as f64 * tile_w;
        let y_min = match self.y_direction {
            VerticalDirection::TopToBottom => self.origin.y() - (index.y + 1) as f64 * tile_h,
            VerticalDirection::BottomToTop => self.origin.y() + index.y as f64 * tile_h,
        };

        Rect::new(x_min, y_min, x_min + tile_w, y_min + tile_h)
    }
}

/// Range of tile indices along one axis covering the `[from, to]` interval, given in map units
/// relative to the schema origin.
fn index_range(from: f64, to: f64, tile_size: f64) -> (i32, i32) {
    let first = (from / tile_size + TILE_EDGE_TOLERANCE).floor() as i32;
    let last = (to / tile_size - TILE_EDGE_TOLERANCE).ceil() as i32 - 1;
    (first, last)
}
