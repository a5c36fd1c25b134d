use serde::{Deserialize, Serialize};

use crate::error::TesseraError;
use crate::memory_cache::{DEFAULT_MAX_TILES, DEFAULT_MIN_TILES};

/// Configuration of a [`TileLayer`](super::TileLayer).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileLayerOptions {
    /// Disabled layers do not load any data.
    pub enabled: bool,
    /// Data is loaded only when the map resolution is not smaller than this value.
    pub min_visible_resolution: Option<f64>,
    /// Data is loaded only when the map resolution is not larger than this value.
    pub max_visible_resolution: Option<f64>,
    /// Number of tiles the memory cache shrinks to on eviction.
    pub min_tiles: usize,
    /// Number of tiles above which the memory cache starts eviction.
    pub max_tiles: usize,
    /// If set together with `max_extra_tiles`, the memory cache is resized on every update to
    /// keep `min_extra_tiles` more tiles than the current view needs.
    pub min_extra_tiles: Option<usize>,
    /// If set together with `min_extra_tiles`, the memory cache is resized on every update to
    /// keep at most `max_extra_tiles` more tiles than the current view needs.
    pub max_extra_tiles: Option<usize>,
    /// Whether data should be loaded during animations and gestures, or only after they end.
    pub fetch_on_continuous: bool,
}

impl Default for TileLayerOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            min_visible_resolution: None,
            max_visible_resolution: None,
            min_tiles: DEFAULT_MIN_TILES,
            max_tiles: DEFAULT_MAX_TILES,
            min_extra_tiles: None,
            max_extra_tiles: None,
            fetch_on_continuous: true,
        }
    }
}

impl TileLayerOptions {
    /// Checks that the options are consistent.
    pub fn validate(&self) -> Result<(), TesseraError> {
        for resolution in [self.min_visible_resolution, self.max_visible_resolution]
            .into_iter()
            .flatten()
        {
            if !resolution.is_finite() || resolution < 0.0 {
                return Err(TesseraError::InvalidConfig(format!(
                    "visible resolution must be a non-negative number, got {resolution}"
                )));
            }
        }

        if let (Some(min), Some(max)) = (self.min_visible_resolution, self.max_visible_resolution)
        {
            if min > max {
                return Err(TesseraError::InvalidConfig(format!(
                    "min_visible_resolution ({min}) is larger than max_visible_resolution ({max})"
                )));
            }
        }

        if self.min_tiles > self.max_tiles {
            return Err(TesseraError::InvalidConfig(format!(
                "min_tiles ({}) is larger than max_tiles ({})",
                self.min_tiles, self.max_tiles
            )));
        }

        if let (Some(min), Some(max)) = (self.min_extra_tiles, self.max_extra_tiles) {
            if min > max {
                return Err(TesseraError::InvalidConfig(format!(
                    "min_extra_tiles ({min}) is larger than max_extra_tiles ({max})"
                )));
            }
        }

        Ok(())
    }

    /// Returns true if the layer should load data for the given resolution.
    pub fn is_visible_at(&self, resolution: f64) -> bool {
        self.min_visible_resolution
            .map_or(true, |min| resolution >= min)
            && self
                .max_visible_resolution
                .map_or(true, |max| resolution <= max)
    }

    /// Cache limits for the given number of needed tiles, if auto-tuning is configured.
    pub(crate) fn tuned_cache_limits(&self, tiles_needed: usize) -> Option<(usize, usize)> {
        match (self.min_extra_tiles, self.max_extra_tiles) {
            (Some(min_extra), Some(max_extra)) => {
                Some((tiles_needed + min_extra, tiles_needed + max_extra))
            }
            _ => None,
        }
    }
}
