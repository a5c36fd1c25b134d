//! Collaborators that provide raw tile data: url templates and persistent caches.

use crate::error::TesseraError;

mod file_cache;

pub use file_cache::FileCacheController;

/// Function that builds the url of a resource from its key.
pub trait UrlSource<Key: ?Sized>: (Fn(&Key) -> String) + Send + Sync {}
impl<Key: ?Sized, T: Fn(&Key) -> String> UrlSource<Key> for T where T: Send + Sync {}

/// Secondary store of raw data, usually slower but larger than the memory cache (e.g. on disk).
///
/// The fetch dispatcher consults it before requesting a tile from the source and writes every
/// successfully decoded tile into it.
pub trait PersistentCacheController<Key: ?Sized, Data>: Send + Sync {
    /// Returns the stored data, if any.
    fn get(&self, key: &Key) -> Option<Data>;
    /// Stores the data.
    fn insert(&self, key: &Key, data: &Data) -> Result<(), TesseraError>;
    /// Removes the data. Removing a missing entry is not an error.
    fn remove(&self, key: &Key) -> Result<(), TesseraError>;
}
