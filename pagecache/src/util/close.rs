//! Provides the [Close] trait for write handles that must be finalized explicitly.

use std::io;

/// A trait for handles whose pending work is committed when they are closed.
///
/// Cache write handles buffer or stage their data and only make it visible once
/// [Close::close] is called. Closing consumes the handle, so a closed handle cannot be written to
/// again. Dropping a handle without closing it discards whatever was written.
///
/// # Examples
///
/// ```rust
/// use std::io::Write;
/// use pagecache::cache::{ArtifactMetadata, CacheBackend, CacheKey};
/// use pagecache::cache::object_store::ObjectStoreCache;
/// use pagecache::store::in_memory::InMemoryObjectStore;
/// use pagecache::util::close::Close;
///
/// # fn main() -> std::io::Result<()> {
/// let cache = ObjectStoreCache::new(InMemoryObjectStore::new());
/// let key = CacheKey::new("doc1", "report", "pdf");
/// let mut writer = cache.open_write(&key, &ArtifactMetadata::new("report.pdf", 5))?;
/// writer.write_all(b"%PDF-")?;
/// assert!(!cache.exists(&key)?);
/// writer.close()?;
/// assert!(cache.exists(&key)?);
/// # Ok(())
/// # }
/// ```
pub trait Close {
    fn close(self) -> io::Result<()>;
}
