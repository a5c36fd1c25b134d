use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, trace, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use super::{FetchEvent, FetchInfo, FetchOutcome, FetchStrategy, TileDecoder, TileSource};
use crate::async_runtime;
use crate::error::TesseraError;
use crate::events::{EventEmitter, Subscription};
use crate::layer::data_provider::PersistentCacheController;
use crate::memory_cache::MemoryCache;
use crate::tile_schema::{TileIndex, TileInfo, TileSchema};

type PersistentCache = Arc<dyn PersistentCacheController<TileIndex, Bytes>>;
type IndexSet = HashSet<TileIndex, ahash::RandomState>;

/// Parameters of the [`TileFetchDispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Maximum number of tile requests running at the same time.
    pub max_concurrent_fetches: usize,
    /// Number of times a failed tile is requested again before it is skipped. The counters are
    /// reset when the set of wanted tiles changes.
    pub max_retries: u32,
    /// Time limit of a single request. A request that takes longer is counted as failed.
    pub fetch_timeout: Duration,
    /// Time a failed tile waits before it is requested again. With zero delay the tile is
    /// requested as soon as a slot is free.
    pub retry_delay: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 2,
            max_retries: 2,
            fetch_timeout: Duration::from_secs(10),
            retry_delay: Duration::ZERO,
        }
    }
}

impl FetcherConfig {
    /// Checks that the configuration can be used.
    pub fn validate(&self) -> Result<(), TesseraError> {
        if self.max_concurrent_fetches == 0 {
            return Err(TesseraError::InvalidConfig(
                "max_concurrent_fetches must be greater than 0".into(),
            ));
        }

        if self.fetch_timeout.is_zero() {
            return Err(TesseraError::InvalidConfig(
                "fetch_timeout must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

/// Loads the tiles required by the current viewport into the [`MemoryCache`].
///
/// The dispatcher keeps a list of wanted tiles (see [`set_viewport`](Self::set_viewport)) and,
/// while fetching is enabled, keeps up to [`FetcherConfig::max_concurrent_fetches`] requests
/// running. Every finished request frees a slot that is immediately given to the next wanted tile,
/// so failed tiles are retried automatically until they exceed [`FetcherConfig::max_retries`]. A
/// failed tile can be held back for [`FetcherConfig::retry_delay`] before its next request.
///
/// Tiles that are already in the memory cache (including tiles marked as absent) are never
/// requested again, and a tile is never requested twice at the same time. This includes aborted
/// requests: a tile is not requested again until the task of its aborted request has finished.
///
/// For every request exactly one [`FetchEvent`] is emitted to the subscribers. Handlers are called
/// without holding any internal locks.
///
/// Requests run as tokio tasks. They are spawned on the runtime set with
/// [`set_runtime`](Self::set_runtime), or on the runtime of the calling thread.
pub struct TileFetchDispatcher<T: Send + Sync + 'static> {
    shared: Arc<Shared<T>>,
}

struct Shared<T: Send + Sync + 'static> {
    schema: TileSchema,
    source: Arc<dyn TileSource>,
    decoder: Arc<dyn TileDecoder<Output = T>>,
    cache: Arc<MemoryCache<T>>,
    persistent_cache: RwLock<Option<PersistentCache>>,
    strategy: Box<dyn FetchStrategy>,
    config: FetcherConfig,
    state: Mutex<DispatchState>,
    events: EventEmitter<FetchEvent>,
}

#[derive(Default)]
struct DispatchState {
    fetching: bool,
    wanted: Vec<TileInfo>,
    wanted_indices: IndexSet,
    in_flight: HashMap<TileIndex, InFlight, ahash::RandomState>,
    /// Aborted requests whose tasks have not finished yet, with their attempt ids.
    cancelling: HashMap<TileIndex, u64, ahash::RandomState>,
    /// Failed tiles waiting for their retry delay, with the ids of the failed attempts.
    delayed: HashMap<TileIndex, u64, ahash::RandomState>,
    failures: HashMap<TileIndex, u32, ahash::RandomState>,
    next_attempt: u64,
    runtime: Option<Handle>,
}

struct InFlight {
    attempt: u64,
    tile: TileInfo,
    abort_handle: AbortHandle,
    aborted: Arc<AtomicBool>,
}

/// Moved into every request task. When the task of an aborted request is finished (or dropped
/// without being polled), frees its tile for new requests.
struct AbortGuard<T: Send + Sync + 'static> {
    shared: Arc<Shared<T>>,
    index: TileIndex,
    attempt: u64,
    aborted: Arc<AtomicBool>,
}

impl<T: Send + Sync + 'static> Drop for AbortGuard<T> {
    fn drop(&mut self) {
        if !self.aborted.load(Ordering::Acquire) {
            return;
        }

        let mut state = self.shared.state.lock();
        if state.cancelling.get(&self.index) != Some(&self.attempt) {
            return;
        }

        state.cancelling.remove(&self.index);
        trace!("Aborted request for tile {} finished", self.index);

        if let Err(err) = self.shared.fill_slots(&mut state) {
            warn!("Failed to start tile requests: {err}");
        }
    }
}

impl<T: Send + Sync + 'static> std::fmt::Debug for TileFetchDispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("TileFetchDispatcher")
            .field("config", &self.shared.config)
            .field("fetching", &state.fetching)
            .field("wanted", &state.wanted.len())
            .field("in_flight", &state.in_flight.len())
            .finish()
    }
}

impl<T: Send + Sync + 'static> TileFetchDispatcher<T> {
    /// Creates a new dispatcher. Fetching is disabled until
    /// [`start_fetching`](Self::start_fetching) is called.
    pub fn new(
        schema: TileSchema,
        source: Arc<dyn TileSource>,
        decoder: Arc<dyn TileDecoder<Output = T>>,
        cache: Arc<MemoryCache<T>>,
        strategy: Box<dyn FetchStrategy>,
        config: FetcherConfig,
    ) -> Result<Self, TesseraError> {
        config.validate()?;

        Ok(Self {
            shared: Arc::new(Shared {
                schema,
                source,
                decoder,
                cache,
                persistent_cache: RwLock::new(None),
                strategy,
                config,
                state: Mutex::new(DispatchState::default()),
                events: EventEmitter::default(),
            }),
        })
    }

    /// Sets the persistent cache that is consulted before the tile source and stores every
    /// successfully decoded tile.
    pub fn set_persistent_cache(&self, cache: Option<PersistentCache>) {
        *self.shared.persistent_cache.write() = cache;
    }

    /// Sets the runtime the requests are spawned on. If not set, the runtime of the thread that
    /// calls [`start_fetching`](Self::start_fetching) is used.
    pub fn set_runtime(&self, runtime: Option<Handle>) {
        self.shared.state.lock().runtime = runtime;
    }

    /// Tile schema the tiles are requested for.
    pub fn schema(&self) -> &TileSchema {
        &self.shared.schema
    }

    /// Memory cache the loaded tiles are stored in.
    pub fn cache(&self) -> &Arc<MemoryCache<T>> {
        &self.shared.cache
    }

    /// Configuration of the dispatcher.
    pub fn config(&self) -> FetcherConfig {
        self.shared.config
    }

    /// Recalculates the set of wanted tiles for the new viewport.
    ///
    /// If the set changes, failed tiles become eligible for retry again without waiting for the
    /// retry delay. Requests for tiles that
    /// are no longer wanted are not aborted, but their results are discarded. No new requests are
    /// started by this method.
    pub fn set_viewport(&self, fetch_info: &FetchInfo) {
        let schema = &self.shared.schema;
        let wanted = match schema.nearest_lod(fetch_info.resolution) {
            Some(lod) if !fetch_info.extent.is_empty() => {
                self.shared
                    .strategy
                    .tiles_wanted(schema, &fetch_info.extent, lod.z_index())
            }
            _ => vec![],
        };
        let wanted_indices: IndexSet = wanted.iter().map(|tile| tile.index).collect();

        let mut state = self.shared.state.lock();
        if state.wanted_indices != wanted_indices {
            trace!("Wanted tiles changed, {} tiles needed", wanted_indices.len());
            state.failures.clear();
            state.delayed.clear();
        }

        state.wanted = wanted;
        state.wanted_indices = wanted_indices;
    }

    /// Enables fetching and starts requests for the wanted tiles.
    ///
    /// Returns [`TesseraError::NoRuntime`] if no runtime is set and the method is called outside
    /// of a tokio runtime.
    pub fn start_fetching(&self) -> Result<(), TesseraError> {
        let mut state = self.shared.state.lock();
        state.fetching = true;
        self.shared.fill_slots(&mut state)
    }

    /// Disables fetching and aborts all running requests.
    ///
    /// A [`FetchOutcome::Cancelled`] event is emitted for every aborted request. Retry counters are
    /// reset. Aborted tiles are not requested again until their tasks finish, since a task that is
    /// being polled at the moment of abort runs until its next await point.
    pub fn stop_fetching(&self) {
        let aborted: Vec<InFlight> = {
            let mut state = self.shared.state.lock();
            state.fetching = false;
            state.failures.clear();
            state.delayed.clear();

            let aborted: Vec<InFlight> = state.in_flight.drain().map(|(_, v)| v).collect();
            for in_flight in &aborted {
                in_flight.aborted.store(true, Ordering::Release);
                state
                    .cancelling
                    .insert(in_flight.tile.index, in_flight.attempt);
            }

            aborted
        };

        if !aborted.is_empty() {
            debug!("Aborted {} tile requests", aborted.len());
        }

        for in_flight in &aborted {
            in_flight.abort_handle.abort();
        }

        for in_flight in aborted {
            self.shared.events.emit(&FetchEvent {
                tile: in_flight.tile,
                outcome: FetchOutcome::Cancelled,
            });
        }
    }

    /// Returns true if fetching is enabled.
    pub fn is_fetching(&self) -> bool {
        self.shared.state.lock().fetching
    }

    /// Number of tiles wanted for the current viewport.
    pub fn number_tiles_needed(&self) -> usize {
        self.shared.state.lock().wanted.len()
    }

    /// Tiles wanted for the current viewport, in the request order.
    pub fn wanted_tiles(&self) -> Vec<TileInfo> {
        self.shared.state.lock().wanted.clone()
    }

    /// Number of requests currently running, not counting aborted ones.
    pub fn in_flight_count(&self) -> usize {
        self.shared.state.lock().in_flight.len()
    }

    /// Returns true if no requests are running and no failed tile is waiting for a retry. Aborted
    /// requests whose tasks have not finished yet count as running.
    pub fn is_idle(&self) -> bool {
        let state = self.shared.state.lock();
        state.in_flight.is_empty() && state.cancelling.is_empty() && state.delayed.is_empty()
    }

    /// Number of failed attempts to load the tile since the last reset of the counters.
    pub fn failure_count(&self, index: TileIndex) -> u32 {
        self.shared
            .state
            .lock()
            .failures
            .get(&index)
            .copied()
            .unwrap_or(0)
    }

    /// Registers a handler of fetch events.
    #[must_use = "the handler is unregistered when the subscription is dropped"]
    pub fn subscribe(&self, handler: impl Fn(&FetchEvent) + Send + Sync + 'static) -> Subscription {
        self.shared.events.subscribe(handler)
    }
}

impl<T: Send + Sync + 'static> Drop for TileFetchDispatcher<T> {
    fn drop(&mut self) {
        self.stop_fetching();
    }
}

impl<T: Send + Sync + 'static> Shared<T> {
    /// Starts requests for wanted tiles while there are free slots. Must be called with the state
    /// lock held.
    fn fill_slots(self: &Arc<Self>, state: &mut DispatchState) -> Result<(), TesseraError> {
        if !state.fetching {
            return Ok(());
        }

        let free = self
            .config
            .max_concurrent_fetches
            .saturating_sub(state.in_flight.len());
        if free == 0 {
            return Ok(());
        }

        let to_fetch: Vec<TileInfo> = state
            .wanted
            .iter()
            .filter(|tile| {
                !state.in_flight.contains_key(&tile.index)
                    && !state.cancelling.contains_key(&tile.index)
                    && !state.delayed.contains_key(&tile.index)
                    && state.failures.get(&tile.index).copied().unwrap_or(0)
                        <= self.config.max_retries
                    && !self.cache.contains(&tile.index)
            })
            .take(free)
            .copied()
            .collect();

        for tile in to_fetch {
            let attempt = state.next_attempt;
            state.next_attempt += 1;

            let aborted = Arc::new(AtomicBool::new(false));
            let guard = AbortGuard {
                shared: self.clone(),
                index: tile.index,
                attempt,
                aborted: aborted.clone(),
            };
            let shared = self.clone();
            let handle = async_runtime::spawn(state.runtime.as_ref(), async move {
                let _guard = guard;
                let result = shared.load_tile(&tile).await;
                shared.complete(attempt, tile, result);
            })?;

            trace!("Requested tile {}", tile.index);
            state.in_flight.insert(
                tile.index,
                InFlight {
                    attempt,
                    tile,
                    abort_handle: handle.abort_handle(),
                    aborted,
                },
            );
        }

        Ok(())
    }

    async fn load_tile(&self, tile: &TileInfo) -> Result<Option<T>, TesseraError> {
        let persistent_cache = self.persistent_cache.read().clone();
        if let Some(persistent_cache) = &persistent_cache {
            if let Some(bytes) = persistent_cache.get(&tile.index) {
                match self.decoder.decode(tile.index, bytes) {
                    Ok(decoded) => {
                        trace!("Tile {} loaded from persistent cache", tile.index);
                        return Ok(Some(decoded));
                    }
                    Err(err) => {
                        warn!(
                            "Failed to decode tile {} from persistent cache, removing it: {err}",
                            tile.index
                        );
                        if let Err(err) = persistent_cache.remove(&tile.index) {
                            warn!("Failed to remove persistent cache entry: {err:?}");
                        }
                    }
                }
            }
        }

        let timeout = self.config.fetch_timeout;
        let bytes = match tokio::time::timeout(timeout, self.source.get_tile(tile)).await {
            Ok(result) => result?,
            Err(_) => return Err(TesseraError::Timeout(timeout)),
        };

        let Some(bytes) = bytes else {
            return Ok(None);
        };

        let decoded = self.decoder.decode(tile.index, bytes.clone())?;
        if let Some(persistent_cache) = &persistent_cache {
            if let Err(err) = persistent_cache.insert(&tile.index, &bytes) {
                warn!("Failed to write persistent cache entry: {err:?}");
            }
        }

        Ok(Some(decoded))
    }

    fn complete(
        self: &Arc<Self>,
        attempt: u64,
        tile: TileInfo,
        result: Result<Option<T>, TesseraError>,
    ) {
        let outcome = {
            let mut state = self.state.lock();
            match state.in_flight.get(&tile.index) {
                Some(in_flight) if in_flight.attempt == attempt => {}
                _ => {
                    trace!("Request for tile {} was cancelled", tile.index);
                    return;
                }
            }

            state.in_flight.remove(&tile.index);

            let outcome = if !state.wanted_indices.contains(&tile.index) {
                debug!(
                    "Tile {} is not needed anymore, discarding the result",
                    tile.index
                );
                FetchOutcome::Cancelled
            } else {
                match result {
                    Ok(Some(data)) => {
                        state.failures.remove(&tile.index);
                        self.cache.add_data(tile.index, data);
                        FetchOutcome::Loaded
                    }
                    Ok(None) => {
                        state.failures.remove(&tile.index);
                        self.cache.add_absent(tile.index);
                        FetchOutcome::Absent
                    }
                    Err(err) => {
                        let failures = state.failures.entry(tile.index).or_default();
                        *failures += 1;
                        let failures = *failures;
                        if failures > self.config.max_retries {
                            debug!(
                                "Failed to load tile {} ({failures} attempts), giving up: {err}",
                                tile.index
                            );
                        } else {
                            debug!(
                                "Failed to load tile {} ({failures} attempts), will retry: {err}",
                                tile.index
                            );
                            if !self.config.retry_delay.is_zero() {
                                self.delay_retry(&mut state, tile.index, attempt);
                            }
                        }

                        FetchOutcome::Failed(Arc::new(err))
                    }
                }
            };

            if let Err(err) = self.fill_slots(&mut state) {
                warn!("Failed to start tile requests: {err}");
            }

            outcome
        };

        self.events.emit(&FetchEvent { tile, outcome });
    }

    /// Holds the tile back from new requests until the retry delay passes. Must be called with the
    /// state lock held.
    fn delay_retry(self: &Arc<Self>, state: &mut DispatchState, index: TileIndex, attempt: u64) {
        let shared = self.clone();
        let delay = self.config.retry_delay;
        let spawned = async_runtime::spawn(state.runtime.as_ref(), async move {
            tokio::time::sleep(delay).await;

            let mut state = shared.state.lock();
            if state.delayed.get(&index) != Some(&attempt) {
                return;
            }

            state.delayed.remove(&index);
            trace!("Retry delay of tile {index} passed");
            if let Err(err) = shared.fill_slots(&mut state) {
                warn!("Failed to start tile requests: {err}");
            }
        });

        match spawned {
            Ok(_) => {
                state.delayed.insert(index, attempt);
            }
            Err(err) => warn!("Failed to schedule retry of tile {index}: {err}"),
        }
    }
}
