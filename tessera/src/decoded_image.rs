//! This module contains utilities for decoding raster tiles.

use crate::error::TesseraError;

/// An image that has been loaded into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    bytes: Vec<u8>,
    dimensions: (u32, u32),
}

impl DecodedImage {
    /// Decode an image from a byte slice.
    ///
    /// Attempts to guess the format of the image from the data. Non-RGBA images
    /// will be converted to RGBA.
    pub fn decode(bytes: &[u8]) -> Result<Self, TesseraError> {
        use image::GenericImageView;
        let decoded = image::load_from_memory(bytes)?;
        let dimensions = decoded.dimensions();
        let bytes = decoded.to_rgba8();

        Ok(Self {
            bytes: bytes.into_vec(),
            dimensions,
        })
    }

    /// Creates an image from raw RGBA pixels.
    pub fn from_raw(bytes: Vec<u8>, width: u32, height: u32) -> Result<Self, TesseraError> {
        if bytes.len() != width as usize * height as usize * 4 {
            return Err(TesseraError::Decoding(format!(
                "expected {} bytes for a {width}x{height} RGBA image, got {}",
                width as usize * height as usize * 4,
                bytes.len()
            )));
        }

        Ok(Self {
            bytes,
            dimensions: (width, height),
        })
    }

    /// Raw bytes of the image, in RGBA order.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Width of the image in pixels.
    pub fn width(&self) -> u32 {
        self.dimensions.0
    }

    /// Height of the image in pixels.
    pub fn height(&self) -> u32 {
        self.dimensions.1
    }
}
