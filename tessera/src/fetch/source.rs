use async_trait::async_trait;
use bytes::Bytes;
use log::info;
use reqwest::StatusCode;

use crate::error::TesseraError;
use crate::layer::data_provider::UrlSource;
use crate::tile_schema::{TileIndex, TileInfo};

/// Source of encoded tile data.
///
/// Implementations must be safe to call concurrently: the dispatcher may request several different
/// tiles at the same time.
#[async_trait]
pub trait TileSource: Send + Sync {
    /// Loads the encoded data of the tile.
    ///
    /// Returns `Ok(None)` if the source confirms that there is no data for this tile. Such tiles
    /// are never requested again while they stay in the memory cache.
    async fn get_tile(&self, tile: &TileInfo) -> Result<Option<Bytes>, TesseraError>;
}

/// Tile source that loads tiles one by one with REST HTTP GET requests.
///
/// This source is able to load tiles from any protocol that use separate GET requests for each
/// tile:
/// * OSM tile protocol
/// * OSG Tile Map Service (TMS)
/// * ArcGis TileService
/// * etc.
///
/// Responses with `404 Not Found` and `204 No Content` statuses are treated as confirmed absence of
/// the tile. Other non-success statuses are reported as [`TesseraError::Http`].
///
/// # Example
///
/// ```no_run
/// use tessera::fetch::{RestTileSource, TileSource};
/// use tessera::tile_schema::{TileIndex, TileSchema};
///
/// let source = RestTileSource::new(|index| {
///     format!(
///         "https://tile.openstreetmap.org/{}/{}/{}.png",
///         index.z, index.x, index.y
///     )
/// })
/// .expect("failed to create http client");
///
/// let schema = TileSchema::web(18);
/// let tile = schema.tile_info(TileIndex::new(3, 5, 3)).expect("level exists");
///
/// # tokio_test::block_on(async {
/// let bytes = source.get_tile(&tile).await.expect("failed to load tile");
/// # });
/// ```
pub struct RestTileSource {
    url_source: Box<dyn UrlSource<TileIndex>>,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for RestTileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestTileSource").finish_non_exhaustive()
    }
}

impl RestTileSource {
    /// Creates a new instance of the source with the default HTTP client.
    pub fn new(url_source: impl UrlSource<TileIndex> + 'static) -> Result<Self, TesseraError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("tessera/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self::with_client(url_source, http_client))
    }

    /// Creates a new instance that sends requests with the given client.
    pub fn with_client(
        url_source: impl UrlSource<TileIndex> + 'static,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            url_source: Box::new(url_source),
            http_client,
        }
    }

    /// Url the tile is requested from.
    pub fn tile_url(&self, index: &TileIndex) -> String {
        (self.url_source)(index)
    }
}

#[async_trait]
impl TileSource for RestTileSource {
    async fn get_tile(&self, tile: &TileInfo) -> Result<Option<Bytes>, TesseraError> {
        let url = self.tile_url(&tile.index);

        info!("Loading {url}");
        let response = self.http_client.get(&url).send().await?;
        match classify_status(response.status()) {
            StatusClass::Data => Ok(Some(response.bytes().await?)),
            StatusClass::Absent => {
                log::debug!("No data for tile {} at {url}", tile.index);
                Ok(None)
            }
            StatusClass::Failure => {
                info!("Failed to load {url}: {}", response.status());
                Err(TesseraError::Http(response.status().as_u16()))
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StatusClass {
    Data,
    Absent,
    Failure,
}

fn classify_status(status: StatusCode) -> StatusClass {
    match status {
        StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => StatusClass::Absent,
        s if s.is_success() => StatusClass::Data,
        _ => StatusClass::Failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(StatusCode::OK), StatusClass::Data);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), StatusClass::Absent);
        assert_eq!(classify_status(StatusCode::NO_CONTENT), StatusClass::Absent);
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            StatusClass::Failure
        );
        assert_eq!(classify_status(StatusCode::FORBIDDEN), StatusClass::Failure);
    }

    #[test]
    fn url_from_template() {
        let source = RestTileSource::with_client(
            |index: &TileIndex| {
                format!("https://example.com/{}/{}/{}.png", index.z, index.x, index.y)
            },
            reqwest::Client::new(),
        );

        assert_eq!(
            source.tile_url(&TileIndex::new(5, 3, 4)),
            "https://example.com/4/5/3.png"
        );
    }
}
