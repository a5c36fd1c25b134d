//! Helpers shared by the unit tests of the crate.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageFormat, Rgb, RgbImage};
use parking_lot::Mutex;

use tessera_types::cartesian::{Point2d, Rect};

use crate::error::TesseraError;
use crate::fetch::TileSource;
use crate::lod::Lod;
use crate::tile_schema::{TileIndex, TileInfo, TileSchema, VerticalDirection};

/// Schema covering `0..1024` on both axes with three levels: 4, 2 and 1 units per pixel. Level `z`
/// consists of `2^z x 2^z` tiles.
pub(crate) fn test_schema() -> TileSchema {
    TileSchema::new(
        Point2d::origin(),
        Rect::new(0.0, 0.0, 1024.0, 1024.0),
        [
            Lod::new(4.0, 0).expect("valid resolution"),
            Lod::new(2.0, 1).expect("valid resolution"),
            Lod::new(1.0, 2).expect("valid resolution"),
        ],
        256,
        256,
        VerticalDirection::BottomToTop,
    )
    .expect("valid schema")
}

/// Encodes a single-color PNG image.
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([10, 20, 30]));
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .expect("failed to encode png");
    buffer.into_inner()
}

/// What [`TestTileSource`] answers to a request.
#[derive(Debug, Clone)]
pub(crate) enum TestResponse {
    Data(Bytes),
    Absent,
    Error,
    /// Never completes.
    Hang,
}

impl TestResponse {
    pub(crate) fn data() -> Self {
        Self::Data(Bytes::from_static(b"tile"))
    }
}

/// In-memory tile source with scripted responses that records every request.
#[derive(Debug)]
pub(crate) struct TestTileSource {
    default_response: TestResponse,
    responses: Mutex<HashMap<TileIndex, TestResponse>>,
    failures_left: Mutex<HashMap<TileIndex, usize>>,
    delay: Duration,
    calls: Mutex<HashMap<TileIndex, usize>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl TestTileSource {
    pub(crate) fn new(default_response: TestResponse) -> Self {
        Self {
            default_response,
            responses: Mutex::new(HashMap::new()),
            failures_left: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            calls: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Every request takes at least `delay` to complete.
    pub(crate) fn with_delay(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }

    pub(crate) fn set_response(&self, index: TileIndex, response: TestResponse) {
        self.responses.lock().insert(index, response);
    }

    /// The first `count` requests for the tile fail, the following ones get the usual response.
    pub(crate) fn fail_first(&self, index: TileIndex, count: usize) {
        self.failures_left.lock().insert(index, count);
    }

    pub(crate) fn calls(&self, index: TileIndex) -> usize {
        self.calls.lock().get(&index).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    /// Largest number of requests that were running at the same time.
    pub(crate) fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TileSource for TestTileSource {
    async fn get_tile(&self, tile: &TileInfo) -> Result<Option<Bytes>, TesseraError> {
        *self.calls.lock().entry(tile.index).or_default() += 1;
        let should_fail = match self.failures_left.lock().get_mut(&tile.index) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        };
        let response = if should_fail {
            TestResponse::Error
        } else {
            self.responses
                .lock()
                .get(&tile.index)
                .cloned()
                .unwrap_or_else(|| self.default_response.clone())
        };

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = ActiveGuard(&self.active);
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match response {
            TestResponse::Data(bytes) => Ok(Some(bytes)),
            TestResponse::Absent => Ok(None),
            TestResponse::Error => Err(TesseraError::IO),
            TestResponse::Hang => std::future::pending().await,
        }
    }
}
