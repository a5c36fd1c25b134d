//! Fetching of tiles from a [`TileSource`] into a [`MemoryCache`](crate::MemoryCache).
//!
//! [`FetchStrategy`] decides which tiles a viewport needs, and [`TileFetchDispatcher`] loads
//! them with bounded concurrency, retrying failed requests.

use std::sync::Arc;

use tessera_types::cartesian::Rect;

use crate::error::TesseraError;
use crate::tile_schema::TileInfo;

mod decoder;
mod dispatcher;
mod source;
mod strategy;

pub use decoder::{ImageTileDecoder, RawTileDecoder, TileDecoder};
pub use dispatcher::{FetcherConfig, TileFetchDispatcher};
pub use source::{RestTileSource, TileSource};
pub use strategy::{DataFetchStrategy, FetchStrategy, MinimalFetchStrategy};

/// Kind of the viewport change that triggered data refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeType {
    /// The viewport reached its final position (end of animation or gesture).
    #[default]
    Discrete,
    /// The viewport is in the middle of a gesture or animation.
    Continuous,
}

/// Current demand of the map: the area and resolution it is going to display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchInfo {
    /// Visible area in map coordinates.
    pub extent: Rect,
    /// Map units per pixel.
    pub resolution: f64,
    /// Kind of the change.
    pub change_type: ChangeType,
}

impl FetchInfo {
    /// Creates a new instance with [`ChangeType::Discrete`] change.
    pub fn new(extent: Rect, resolution: f64) -> Self {
        Self {
            extent,
            resolution,
            change_type: ChangeType::Discrete,
        }
    }

    /// Sets the change type.
    pub fn with_change_type(self, change_type: ChangeType) -> Self {
        Self {
            change_type,
            ..self
        }
    }
}

/// Result of a single fetch attempt.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Tile was loaded and stored in the memory cache.
    Loaded,
    /// Tile source has no data for the tile. The tile is marked as absent in the memory cache.
    Absent,
    /// Loading failed. The tile will be retried until the retry limit is reached.
    Failed(Arc<TesseraError>),
    /// Fetching was stopped before the attempt completed, or the tile is not needed anymore.
    Cancelled,
}

/// Notification about a completed fetch attempt.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    /// The tile the attempt was made for.
    pub tile: TileInfo,
    /// Result of the attempt.
    pub outcome: FetchOutcome,
}

impl FetchEvent {
    /// Returns true if the attempt made new data available for rendering.
    pub fn changes_data(&self) -> bool {
        matches!(self.outcome, FetchOutcome::Loaded | FetchOutcome::Absent)
    }
}
