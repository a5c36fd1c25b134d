//! This example loads OpenStreetMap tiles for a view, caching them on disk, and prints what would
//! be drawn every frame until all tiles are loaded.

use std::time::Duration;

use tessera::fetch::FetchInfo;
use tessera::layer::TileLayerBuilder;
use tessera::tessera_types::cartesian::Rect;
use tessera::TileSchema;

const MAX_FRAMES: usize = 100;

#[tokio::main]
async fn main() {
    env_logger::init();

    let layer = TileLayerBuilder::new_osm()
        .with_file_cache("target/tile_cache")
        .build()
        .expect("failed to create layer");

    let _subscription = layer.subscribe(|event| {
        log::info!("Tile {}: {:?}", event.tile.index, event.outcome);
    });

    let schema = TileSchema::web(18);
    let resolution = schema.lod_resolution(4).expect("invalid tile schema");
    let extent = Rect::new(-2_000_000.0, 5_000_000.0, 4_000_000.0, 9_000_000.0);
    let fetch_info = FetchInfo::new(extent, resolution);

    for frame in 0..MAX_FRAMES {
        layer
            .refresh_data(&fetch_info)
            .expect("failed to request tiles");

        let tiles = layer.get_features(&fetch_info.extent, fetch_info.resolution);
        let pixels: usize = tiles.iter().map(|tile| tile.data.bytes().len() / 4).sum();
        println!(
            "Frame {frame}: {} tiles to draw ({pixels} pixels), {} tiles needed",
            tiles.len(),
            layer.number_tiles_needed()
        );

        if layer.is_idle() && frame > 0 {
            break;
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
