use bytes::Bytes;

use crate::decoded_image::DecodedImage;
use crate::error::TesseraError;
use crate::tile_schema::TileIndex;

/// Converts encoded tile data into the payload stored in the memory cache.
pub trait TileDecoder: Send + Sync {
    /// Decoded tile type.
    type Output: Send + Sync + 'static;

    /// Decodes the data of the tile.
    fn decode(&self, index: TileIndex, bytes: Bytes) -> Result<Self::Output, TesseraError>;
}

/// Keeps the encoded bytes as they are.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawTileDecoder;

impl TileDecoder for RawTileDecoder {
    type Output = Bytes;

    fn decode(&self, _index: TileIndex, bytes: Bytes) -> Result<Self::Output, TesseraError> {
        Ok(bytes)
    }
}

/// Decodes raster tiles (PNG, JPEG) into RGBA images.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageTileDecoder;

impl TileDecoder for ImageTileDecoder {
    type Output = DecodedImage;

    fn decode(&self, index: TileIndex, bytes: Bytes) -> Result<Self::Output, TesseraError> {
        log::trace!("Decoding image of tile {index}");
        DecodedImage::decode(&bytes)
    }
}
