//! Tile layer: the object a renderer works with.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tessera_types::cartesian::Rect;

use crate::error::TesseraError;
use crate::events::Subscription;
use crate::fetch::{
    ChangeType, DataFetchStrategy, FetchEvent, FetchInfo, FetcherConfig, TileDecoder,
    TileFetchDispatcher, TileSource,
};
use crate::memory_cache::MemoryCache;
use crate::messenger::Messenger;
use crate::render_strategy::{LodFallbackStrategy, RenderFetchStrategy, TileFeature};
use crate::tile_schema::TileSchema;

mod builder;
mod options;

pub use builder::TileLayerBuilder;
pub use options::TileLayerOptions;

type SharedMessenger = Arc<RwLock<Option<Box<dyn Messenger>>>>;

/// Tile layer loads tiles for the current view in the background and gives the renderer the
/// tiles that can be drawn right now.
///
/// The renderer calls two methods every frame:
/// * [`refresh_data`](Self::refresh_data) - tells the layer what area is displayed, so that it can
///   start loading missing tiles. Returns immediately.
/// * [`get_features`](Self::get_features) - returns the loaded tiles to draw, substituting missing
///   ones with coarser or previously drawn tiles. Never waits for loading.
///
/// When new tiles are loaded the layer notifies its [`Messenger`] and the subscribers of fetch
/// events.
pub struct TileLayer<T: Send + Sync + 'static> {
    dispatcher: TileFetchDispatcher<T>,
    render_strategy: Mutex<Box<dyn RenderFetchStrategy<T>>>,
    options: TileLayerOptions,
    messenger: SharedMessenger,
    _redraw_subscription: Subscription,
}

impl<T: Send + Sync + 'static> std::fmt::Debug for TileLayer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileLayer")
            .field("dispatcher", &self.dispatcher)
            .field("options", &self.options)
            .finish()
    }
}

impl<T: Send + Sync + 'static> TileLayer<T> {
    /// Creates a new layer with default strategies and options.
    ///
    /// Use [`TileLayerBuilder`] for more configuration options.
    pub fn new(
        tile_schema: TileSchema,
        source: Arc<dyn TileSource>,
        decoder: Arc<dyn TileDecoder<Output = T>>,
    ) -> Result<Self, TesseraError> {
        let options = TileLayerOptions::default();
        let dispatcher = TileFetchDispatcher::new(
            tile_schema,
            source,
            decoder,
            Arc::new(MemoryCache::new(options.min_tiles, options.max_tiles)?),
            Box::new(DataFetchStrategy::default()),
            FetcherConfig::default(),
        )?;

        Ok(Self::new_raw(
            dispatcher,
            Box::new(LodFallbackStrategy::default()),
            options,
            None,
        ))
    }

    fn new_raw(
        dispatcher: TileFetchDispatcher<T>,
        render_strategy: Box<dyn RenderFetchStrategy<T>>,
        options: TileLayerOptions,
        messenger: Option<Box<dyn Messenger>>,
    ) -> Self {
        let messenger: SharedMessenger = Arc::new(RwLock::new(messenger));
        let messenger_clone = messenger.clone();
        let redraw_subscription = dispatcher.subscribe(move |event| {
            if event.changes_data() {
                if let Some(messenger) = &*messenger_clone.read() {
                    messenger.request_redraw();
                }
            }
        });

        Self {
            dispatcher,
            render_strategy: Mutex::new(render_strategy),
            options,
            messenger,
            _redraw_subscription: redraw_subscription,
        }
    }

    /// Tile schema of the layer.
    pub fn tile_schema(&self) -> &TileSchema {
        self.dispatcher.schema()
    }

    /// Memory cache of the layer.
    pub fn cache(&self) -> &Arc<MemoryCache<T>> {
        self.dispatcher.cache()
    }

    /// Options of the layer.
    pub fn options(&self) -> &TileLayerOptions {
        &self.options
    }

    /// Enables or disables loading of the data. Disabling the layer aborts running requests.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.options.enabled = enabled;
        if !enabled {
            self.abort_fetch();
        }
    }

    /// Returns the tiles to draw for the given view.
    ///
    /// Only the memory cache is consulted: this method never starts loading and never waits for
    /// it.
    pub fn get_features(&self, extent: &Rect, resolution: f64) -> Vec<TileFeature<T>> {
        self.tune_cache();

        let schema = self.dispatcher.schema();
        let cache = self.dispatcher.cache();
        self.render_strategy
            .lock()
            .get(extent, resolution, schema, cache)
    }

    /// Updates the view the layer loads data for and starts loading missing tiles.
    ///
    /// Does nothing if the layer is disabled, the resolution is outside the visible range, the
    /// extent has no area, or the view is changing continuously and
    /// [`TileLayerOptions::fetch_on_continuous`] is off.
    ///
    /// Returns [`TesseraError::NoRuntime`] if the layer was not given a runtime and the method is
    /// called outside of a tokio runtime.
    pub fn refresh_data(&self, fetch_info: &FetchInfo) -> Result<(), TesseraError> {
        if !self.options.enabled
            || !self.options.is_visible_at(fetch_info.resolution)
            || fetch_info.extent.is_empty()
        {
            return Ok(());
        }

        if !self.options.fetch_on_continuous && fetch_info.change_type == ChangeType::Continuous {
            return Ok(());
        }

        self.dispatcher.set_viewport(fetch_info);
        self.dispatcher.start_fetching()?;
        self.tune_cache();

        Ok(())
    }

    /// Number of tiles needed for the last refreshed view.
    pub fn number_tiles_needed(&self) -> usize {
        self.dispatcher.number_tiles_needed()
    }

    /// Returns true if the layer is not loading anything.
    pub fn is_idle(&self) -> bool {
        self.dispatcher.is_idle()
    }

    /// Aborts all running requests.
    pub fn abort_fetch(&self) {
        self.dispatcher.stop_fetching();
    }

    /// Removes all tiles from the memory cache.
    pub fn clear_cache(&self) {
        self.dispatcher.cache().clear();
    }

    /// Registers a handler of fetch events. Events with [`FetchEvent::changes_data`] mean that
    /// the next call to [`get_features`](Self::get_features) may return different tiles.
    #[must_use = "the handler is unregistered when the subscription is dropped"]
    pub fn subscribe(&self, handler: impl Fn(&FetchEvent) + Send + Sync + 'static) -> Subscription {
        self.dispatcher.subscribe(handler)
    }

    /// Sets the messenger that is notified when new data is available for drawing.
    pub fn set_messenger(&self, messenger: Box<dyn Messenger>) {
        *self.messenger.write() = Some(messenger);
    }

    fn tune_cache(&self) {
        let needed = self.dispatcher.number_tiles_needed();
        let Some((min_tiles, max_tiles)) = self.options.tuned_cache_limits(needed) else {
            return;
        };

        let cache = self.dispatcher.cache();
        if cache.min_tiles() == min_tiles && cache.max_tiles() == max_tiles {
            return;
        }

        if let Err(err) = cache.set_capacity(min_tiles, max_tiles) {
            log::warn!("Failed to resize tile cache: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use bytes::Bytes;

    use super::*;
    use crate::fetch::{FetchOutcome, RawTileDecoder};
    use crate::test_utils::{test_schema, TestResponse, TestTileSource};

    fn layer(source: Arc<TestTileSource>, options: TileLayerOptions) -> TileLayer<Bytes> {
        TileLayerBuilder::new_with_source(source, RawTileDecoder)
            .with_tile_schema(test_schema())
            .with_options(options)
            .build()
            .unwrap()
    }

    fn full_view(resolution: f64) -> FetchInfo {
        FetchInfo::new(Rect::new(0.0, 0.0, 1024.0, 1024.0), resolution)
    }

    async fn wait_idle(layer: &TileLayer<Bytes>) {
        for _ in 0..10_000 {
            if layer.is_idle() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        panic!("layer did not finish fetching");
    }

    #[derive(Clone, Default)]
    struct CountingMessenger(Arc<AtomicUsize>);

    impl Messenger for CountingMessenger {
        fn request_redraw(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn render_does_not_wait_for_loading() {
        let source =
            Arc::new(TestTileSource::new(TestResponse::data()).with_delay(Duration::from_secs(30)));
        let layer = layer(source.clone(), TileLayerOptions::default());

        let view = full_view(1.0);
        layer.refresh_data(&view).unwrap();
        assert!(!layer.is_idle());

        let tiles = layer.get_features(&view.extent, view.resolution);
        assert!(tiles.is_empty());
        assert!(!layer.is_idle());

        wait_idle(&layer).await;
        let tiles = layer.get_features(&view.extent, view.resolution);
        assert_eq!(tiles.len(), 16);
        assert!(tiles.iter().all(|t| t.index.z == 2));
    }

    #[tokio::test(start_paused = true)]
    async fn coarse_tiles_are_drawn_while_detail_loads() {
        let source = Arc::new(TestTileSource::new(TestResponse::data()));
        let layer = layer(source.clone(), TileLayerOptions::default());

        let coarse = full_view(4.0);
        layer.refresh_data(&coarse).unwrap();
        wait_idle(&layer).await;

        // Detailed tiles are never loaded.
        let detailed = full_view(1.0);
        let tiles = layer.get_features(&detailed.extent, detailed.resolution);
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].index.z, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_guards() {
        let source = Arc::new(TestTileSource::new(TestResponse::data()));

        let mut disabled = layer(source.clone(), TileLayerOptions::default());
        disabled.set_enabled(false);
        disabled.refresh_data(&full_view(1.0)).unwrap();
        assert_eq!(disabled.number_tiles_needed(), 0);

        let limited = layer(
            source.clone(),
            TileLayerOptions {
                min_visible_resolution: Some(2.0),
                max_visible_resolution: Some(4.0),
                ..Default::default()
            },
        );
        limited.refresh_data(&full_view(1.0)).unwrap();
        limited.refresh_data(&full_view(8.0)).unwrap();
        assert_eq!(limited.number_tiles_needed(), 0);

        limited
            .refresh_data(&FetchInfo::new(Rect::new(0.0, 0.0, 0.0, 1024.0), 2.0))
            .unwrap();
        assert_eq!(limited.number_tiles_needed(), 0);

        let discrete_only = layer(
            source.clone(),
            TileLayerOptions {
                fetch_on_continuous: false,
                ..Default::default()
            },
        );
        discrete_only
            .refresh_data(&full_view(2.0).with_change_type(ChangeType::Continuous))
            .unwrap();
        assert_eq!(discrete_only.number_tiles_needed(), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.total_calls(), 0);

        discrete_only.refresh_data(&full_view(2.0)).unwrap();
        assert_eq!(discrete_only.number_tiles_needed(), 5);
        limited.refresh_data(&full_view(2.0)).unwrap();
        assert_eq!(limited.number_tiles_needed(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_is_tuned_to_view() {
        let source = Arc::new(TestTileSource::new(TestResponse::data()));
        let layer = layer(
            source.clone(),
            TileLayerOptions {
                min_extra_tiles: Some(10),
                max_extra_tiles: Some(20),
                ..Default::default()
            },
        );

        layer.refresh_data(&full_view(1.0)).unwrap();
        let needed = layer.number_tiles_needed();
        assert_eq!(needed, 16 + 4 + 1);
        assert_eq!(layer.cache().min_tiles(), needed + 10);
        assert_eq!(layer.cache().max_tiles(), needed + 20);

        layer.refresh_data(&full_view(4.0)).unwrap();
        let _ = layer.get_features(&full_view(4.0).extent, 4.0);
        assert_eq!(layer.cache().min_tiles(), 11);
        assert_eq!(layer.cache().max_tiles(), 21);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_is_not_tuned_without_extras() {
        let source = Arc::new(TestTileSource::new(TestResponse::data()));
        let layer = layer(source, TileLayerOptions::default());

        layer.refresh_data(&full_view(1.0)).unwrap();
        assert_eq!(layer.cache().min_tiles(), 200);
        assert_eq!(layer.cache().max_tiles(), 300);
    }

    #[tokio::test(start_paused = true)]
    async fn messenger_is_notified() {
        let source = Arc::new(TestTileSource::new(TestResponse::data()));
        source.set_response(crate::tile_schema::TileIndex::new(0, 0, 0), TestResponse::Absent);
        let layer = layer(source, TileLayerOptions::default());
        let messenger = CountingMessenger::default();
        layer.set_messenger(Box::new(messenger.clone()));

        layer.refresh_data(&full_view(2.0)).unwrap();
        wait_idle(&layer).await;

        // 4 loaded tiles and 1 absent.
        assert_eq!(messenger.0.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_and_clear() {
        let source =
            Arc::new(TestTileSource::new(TestResponse::data()).with_delay(Duration::from_secs(1)));
        let layer = layer(source.clone(), TileLayerOptions::default());
        let events = Arc::new(parking_lot::Mutex::new(vec![]));
        let events_clone = events.clone();
        let _subscription = layer.subscribe(move |event: &FetchEvent| {
            events_clone.lock().push(event.outcome.clone())
        });

        layer.refresh_data(&full_view(1.0)).unwrap();
        layer.abort_fetch();
        wait_idle(&layer).await;
        assert_eq!(events.lock().len(), 2);
        assert!(events
            .lock()
            .iter()
            .all(|outcome| matches!(outcome, FetchOutcome::Cancelled)));

        layer.refresh_data(&full_view(4.0)).unwrap();
        wait_idle(&layer).await;
        assert_eq!(layer.cache().len(), 1);
        assert_matches!(events.lock().last(), Some(FetchOutcome::Loaded));

        layer.clear_cache();
        assert!(layer.cache().is_empty());
        assert!(layer
            .get_features(&full_view(4.0).extent, 4.0)
            .is_empty());
    }

    #[test]
    fn refresh_outside_runtime_fails() {
        let source = Arc::new(TestTileSource::new(TestResponse::data()));
        let layer = layer(source, TileLayerOptions::default());
        assert_matches!(
            layer.refresh_data(&full_view(1.0)),
            Err(TesseraError::NoRuntime)
        );
    }

    #[test]
    fn refresh_with_runtime_handle_from_plain_thread() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let source = Arc::new(TestTileSource::new(TestResponse::data()));
        let layer = TileLayerBuilder::new_with_source(source.clone(), RawTileDecoder)
            .with_tile_schema(test_schema())
            .with_runtime(runtime.handle().clone())
            .build()
            .unwrap();

        layer.refresh_data(&full_view(4.0)).unwrap();
        for _ in 0..500 {
            if layer.cache().len() == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(layer.cache().len(), 1);
        assert_eq!(source.total_calls(), 1);
    }
}
