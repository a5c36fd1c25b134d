//! [Tile layers](TileLayer) and the data collaborators they use.

pub mod data_provider;
mod tile_layer;

pub use tile_layer::{TileLayer, TileLayerBuilder, TileLayerOptions};
