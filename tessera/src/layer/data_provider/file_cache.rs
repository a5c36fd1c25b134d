use std::path::{Path, PathBuf};

use bytes::Bytes;
use log::debug;

use crate::error::TesseraError;
use crate::layer::data_provider::PersistentCacheController;
use crate::tile_schema::TileIndex;

const DEFAULT_EXTENSION: &str = "tile";

/// Stores the cached tiles as a set of files in the specified folder, one file per tile:
/// `<folder>/<z>/<x>/<y>.<extension>`.
///
/// Currently, there is no eviction mechanism.
#[derive(Debug, Clone)]
pub struct FileCacheController {
    folder_path: PathBuf,
    extension: String,
}

impl PersistentCacheController<TileIndex, Bytes> for FileCacheController {
    fn get(&self, key: &TileIndex) -> Option<Bytes> {
        let file_path = self.get_file_path(key);
        match std::fs::read(&file_path) {
            Ok(bytes) => {
                log::trace!("Tile {key} read from the cache file {file_path:?}");
                Some(bytes.into())
            }
            Err(_) => None,
        }
    }

    fn insert(&self, key: &TileIndex, data: &Bytes) -> Result<(), TesseraError> {
        let file_path = self.get_file_path(key);
        match file_path.parent() {
            Some(folder) => match ensure_folder_exists(folder) {
                Ok(()) => {
                    std::fs::write(&file_path, data)?;
                    debug!("Tile {key} saved to cache file {file_path:?}");
                    Ok(())
                }
                Err(err) => {
                    debug!("Failed to add tile {key} to the cache {file_path:?} - failed to create folder: {err:?}");
                    Err(err.into())
                }
            },
            None => {
                debug!("Failed to add tile {key} to the cache {file_path:?} - no parent folder");
                Err(TesseraError::IO)
            }
        }
    }

    fn remove(&self, key: &TileIndex) -> Result<(), TesseraError> {
        let file_path = self.get_file_path(key);
        match std::fs::remove_file(&file_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl FileCacheController {
    /// Creates a new instance. The cache will be located in the given directory. If the directory
    /// doesn't exist, it will be created.
    ///
    /// Different tile sources must use different folders, since files are named by tile index
    /// only.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, TesseraError> {
        ensure_folder_exists(path.as_ref())?;
        Ok(Self {
            folder_path: path.as_ref().into(),
            extension: DEFAULT_EXTENSION.to_string(),
        })
    }

    /// Sets the extension of the cache files (`tile` by default).
    pub fn with_extension(self, extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            ..self
        }
    }

    /// Folder of the cache.
    pub fn folder_path(&self) -> &Path {
        &self.folder_path
    }

    fn get_file_path(&self, index: &TileIndex) -> PathBuf {
        self.folder_path
            .join(index.z.to_string())
            .join(index.x.to_string())
            .join(format!("{}.{}", index.y, self.extension))
    }
}

fn ensure_folder_exists(folder_path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(folder_path)
}
