use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::runtime::Handle;

use super::{TileLayer, TileLayerOptions};
use crate::decoded_image::DecodedImage;
use crate::error::TesseraError;
use crate::fetch::{
    DataFetchStrategy, FetchStrategy, FetcherConfig, ImageTileDecoder, RestTileSource,
    TileDecoder, TileFetchDispatcher, TileSource,
};
use crate::layer::data_provider::{FileCacheController, PersistentCacheController, UrlSource};
use crate::memory_cache::MemoryCache;
use crate::messenger::Messenger;
use crate::render_strategy::{LodFallbackStrategy, RenderFetchStrategy};
use crate::tile_schema::{TileIndex, TileInfo, TileSchema};

/// Constructor for a [`TileLayer`].
///
/// ```no_run
/// use tessera::layer::TileLayerBuilder;
///
/// let layer = TileLayerBuilder::new_osm()
///     .with_file_cache("target/tile_cache")
///     .build()?;
/// # Ok::<(), tessera::error::TesseraError>(())
/// ```
pub struct TileLayerBuilder<T: Send + Sync + 'static> {
    source_type: SourceType,
    decoder: Arc<dyn TileDecoder<Output = T>>,
    tile_schema: Option<TileSchema>,
    fetch_strategy: Option<Box<dyn FetchStrategy>>,
    render_strategy: Option<Box<dyn RenderFetchStrategy<T>>>,
    fetcher_config: FetcherConfig,
    options: TileLayerOptions,
    cache: CacheType,
    offline_mode: bool,
    messenger: Option<Box<dyn Messenger>>,
    runtime: Option<Handle>,
}

enum SourceType {
    Rest(Box<dyn UrlSource<TileIndex>>),
    Custom(Arc<dyn TileSource>),
}

enum CacheType {
    None,
    File(PathBuf),
    Custom(Arc<dyn PersistentCacheController<TileIndex, Bytes>>),
}

impl TileLayerBuilder<DecodedImage> {
    #[allow(rustdoc::bare_urls)]
    /// Initializes a builder for a raster tile layer with the Open Streets Map source.
    ///
    /// It uses the standard "https://tile.openstreetmap.org/z/x/y.png" URL pattern to retrieve the
    /// tiles.
    pub fn new_osm() -> Self {
        Self::new_rest(
            |index: &TileIndex| {
                format!(
                    "https://tile.openstreetmap.org/{}/{}/{}.png",
                    index.z, index.x, index.y
                )
            },
            ImageTileDecoder,
        )
    }
}

impl<T: Send + Sync + 'static> TileLayerBuilder<T> {
    /// Initializes a builder for a layer that requests tiles from the given url source with
    /// [`RestTileSource`].
    pub fn new_rest(
        url_source: impl UrlSource<TileIndex> + 'static,
        decoder: impl TileDecoder<Output = T> + 'static,
    ) -> Self {
        Self::new_raw(SourceType::Rest(Box::new(url_source)), Arc::new(decoder))
    }

    /// Initializes a builder for a layer with the given tile source.
    pub fn new_with_source(
        source: Arc<dyn TileSource>,
        decoder: impl TileDecoder<Output = T> + 'static,
    ) -> Self {
        Self::new_raw(SourceType::Custom(source), Arc::new(decoder))
    }

    fn new_raw(source_type: SourceType, decoder: Arc<dyn TileDecoder<Output = T>>) -> Self {
        Self {
            source_type,
            decoder,
            tile_schema: None,
            fetch_strategy: None,
            render_strategy: None,
            fetcher_config: FetcherConfig::default(),
            options: TileLayerOptions::default(),
            cache: CacheType::None,
            offline_mode: false,
            messenger: None,
            runtime: None,
        }
    }

    /// Adds a file cache for the tiles in the given folder.
    ///
    /// If the `path` folder doesn't exist it will be created. In case the creation of the folder
    /// fails, building the tile layer will return an error.
    ///
    /// Replaces the value set by the [`TileLayerBuilder::with_cache_controller()`] method.
    pub fn with_file_cache(mut self, path: impl AsRef<Path>) -> Self {
        self.cache = CacheType::File(path.as_ref().into());
        self
    }

    /// Adds the given persistent cache for the tiles.
    ///
    /// Replaces the value set by the [`TileLayerBuilder::with_file_cache()`] method.
    pub fn with_cache_controller(
        mut self,
        cache: impl PersistentCacheController<TileIndex, Bytes> + 'static,
    ) -> Self {
        self.cache = CacheType::Custom(Arc::new(cache));
        self
    }

    /// Sets the layer to only use cached tiles without requesting them from the source.
    ///
    /// If the layer is set to offline mode but there is no cache configured, building it will
    /// return a configuration error.
    pub fn with_offline_mode(mut self) -> Self {
        self.offline_mode = true;
        self
    }

    /// Sets the layer's tile schema.
    ///
    /// Defaults to `TileSchema::web(18)`.
    pub fn with_tile_schema(mut self, tile_schema: TileSchema) -> Self {
        self.tile_schema = Some(tile_schema);
        self
    }

    /// Sets the strategy that selects the tiles to load. Defaults to [`DataFetchStrategy`].
    pub fn with_fetch_strategy(mut self, strategy: impl FetchStrategy + 'static) -> Self {
        self.fetch_strategy = Some(Box::new(strategy));
        self
    }

    /// Sets the strategy that selects the tiles to draw. Defaults to [`LodFallbackStrategy`].
    pub fn with_render_strategy(mut self, strategy: impl RenderFetchStrategy<T> + 'static) -> Self {
        self.render_strategy = Some(Box::new(strategy));
        self
    }

    /// Sets the concurrency, retry and timeout parameters of loading.
    pub fn with_fetcher_config(mut self, config: FetcherConfig) -> Self {
        self.fetcher_config = config;
        self
    }

    /// Sets the layer options.
    pub fn with_options(mut self, options: TileLayerOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the layer's messenger.
    ///
    /// The layer uses the messenger to notify application when a new tile is loaded and ready to
    /// be drawn. This is required since the tiles are loaded asynchronously.
    pub fn with_messenger(mut self, messenger: impl Messenger + 'static) -> Self {
        self.messenger = Some(Box::new(messenger));
        self
    }

    /// Sets the runtime the tiles are loaded on.
    ///
    /// Without it, [`TileLayer::refresh_data`] must be called from inside a tokio runtime.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Consumes the builder and constructs the tile layer.
    ///
    /// Will return an error if the layer is configured incorrectly or if the cache controller
    /// fails to initialize.
    pub fn build(self) -> Result<TileLayer<T>, TesseraError> {
        let Self {
            source_type,
            decoder,
            tile_schema,
            fetch_strategy,
            render_strategy,
            fetcher_config,
            options,
            cache,
            offline_mode,
            messenger,
            runtime,
        } = self;

        options.validate()?;
        fetcher_config.validate()?;

        let tile_schema = tile_schema.unwrap_or_else(|| TileSchema::web(18));

        let cache_controller: Option<Arc<dyn PersistentCacheController<TileIndex, Bytes>>> =
            match cache {
                CacheType::None => None,
                CacheType::File(path) => Some(Arc::new(FileCacheController::new(&path)?)),
                CacheType::Custom(controller) => Some(controller),
            };

        if cache_controller.is_none() && offline_mode {
            return Err(TesseraError::InvalidConfig(
                "offline mode cannot be used without cache".into(),
            ));
        }

        let source: Arc<dyn TileSource> = if offline_mode {
            Arc::new(OfflineTileSource)
        } else {
            match source_type {
                SourceType::Rest(url_source) => Arc::new(RestTileSource::new(url_source)?),
                SourceType::Custom(source) => source,
            }
        };

        let dispatcher = TileFetchDispatcher::new(
            tile_schema,
            source,
            decoder,
            Arc::new(MemoryCache::new(options.min_tiles, options.max_tiles)?),
            fetch_strategy.unwrap_or_else(|| Box::new(DataFetchStrategy::default())),
            fetcher_config,
        )?;
        dispatcher.set_persistent_cache(cache_controller);
        dispatcher.set_runtime(runtime);

        Ok(TileLayer::new_raw(
            dispatcher,
            render_strategy.unwrap_or_else(|| Box::new(LodFallbackStrategy::default())),
            options,
            messenger,
        ))
    }
}

/// Source used in offline mode: every tile missing from the persistent cache is not found.
struct OfflineTileSource;

#[async_trait]
impl TileSource for OfflineTileSource {
    async fn get_tile(&self, _tile: &TileInfo) -> Result<Option<Bytes>, TesseraError> {
        Err(TesseraError::NotFound)
    }
}
