//! Tessera is the tile loading engine of a map renderer. It decides which tiles a view needs, loads
//! them in the background with bounded concurrency, keeps them in a bounded memory cache and gives
//! the renderer the best set of tiles that can be drawn right now.
//!
//! # Quick start
//!
//! ```no_run
//! use tessera::fetch::FetchInfo;
//! use tessera::layer::TileLayerBuilder;
//! use tessera::TileSchema;
//!
//! # tokio_test::block_on(async {
//! let layer = TileLayerBuilder::new_osm()
//!     .with_file_cache("target/tile_cache")
//!     .build()?;
//!
//! let schema = TileSchema::web(18);
//! let resolution = schema.lod_resolution(3).unwrap();
//! let fetch_info = FetchInfo::new(schema.bounds(), resolution);
//!
//! // Every frame: request missing data and draw what is already loaded.
//! layer.refresh_data(&fetch_info)?;
//! let tiles = layer.get_features(&fetch_info.extent, fetch_info.resolution);
//! # Ok::<(), tessera::error::TesseraError>(())
//! # });
//! ```
//!
//! # Main components
//!
//! * [`TileSchema`] maps the continuous map resolution to discrete levels of detail and calculates
//!   the tiles covering an area.
//! * [`MemoryCache`] stores loaded tiles and tiles that the source confirmed to be absent.
//! * [`fetch`] contains the [`TileFetchDispatcher`](fetch::TileFetchDispatcher) that loads the
//!   tiles chosen by a [`FetchStrategy`](fetch::FetchStrategy) from a
//!   [`TileSource`](fetch::TileSource).
//! * [`render_strategy`] selects the cached tiles to draw, falling back to coarser levels when
//!   detailed tiles are not loaded yet.
//! * [`TileLayer`](layer::TileLayer) ties all of the above together.

pub(crate) mod async_runtime;
pub mod decoded_image;
pub mod error;
pub mod events;
pub mod fetch;
pub mod layer;
mod lod;
pub mod memory_cache;
mod messenger;
pub mod render_strategy;
pub mod tile_schema;

#[cfg(test)]
pub(crate) mod test_utils;

pub use events::Subscription;
pub use lod::Lod;
pub use memory_cache::{CachedTile, MemoryCache};
pub use messenger::{DummyMessenger, Messenger};
pub use tile_schema::{TileIndex, TileInfo, TileSchema};

// Reexport tessera_types
pub use tessera_types;
