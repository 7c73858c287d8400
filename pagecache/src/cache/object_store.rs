//! Provides a cache backend that keeps artifacts in a remote object store bucket.

use super::{ArtifactMetadata, CacheBackend, CacheError, CacheKey, CacheResult};
use crate::store::{CannedAcl, ObjectAttributes, ObjectStore, ObjectStoreError};
use crate::util::clock::{Clock, SystemClock};
use crate::util::close::Close;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::io;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, warn};

/// How [ObjectStoreCache::exists] answers when the store fails for a reason other than the
/// object being absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailurePolicy {
    /// Return [CacheError::Probe] and let the caller decide.
    #[default]
    Report,
    /// Log the failure and report the artifact as present.
    AssumePresent,
}

/// How written bytes reach the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadMode {
    /// Buffer the artifact in memory and store it with a single put when the writer is closed.
    /// Nothing is sent to the store before that.
    #[default]
    Buffered,
    /// Start the upload when the writer is opened and stream bytes as they are written. The
    /// declared [ArtifactMetadata::size] must match the number of bytes written exactly.
    Streaming,
}

/// A cache backend mapping each [CacheKey::guid] onto one object of an [ObjectStore] bucket.
///
/// Resource bundles, local paths and purging are not supported: the corresponding methods report
/// nothing, and expiry is left to the bucket's lifecycle rules.
///
/// # Examples
///
/// ```rust
/// # use std::io;
/// use std::io::{Read, Write};
/// use pagecache::cache::{ArtifactMetadata, CacheBackend, CacheKey};
/// use pagecache::cache::object_store::ObjectStoreCache;
/// use pagecache::store::in_memory::InMemoryObjectStore;
/// use pagecache::util::close::Close;
///
/// # fn main() -> io::Result<()> {
/// let cache = ObjectStoreCache::new(InMemoryObjectStore::new());
/// let key = CacheKey::new("doc1", "page_1", "html");
/// let mut writer = cache.open_write(&key, &ArtifactMetadata::new("page_1.html", 13))?;
/// writer.write_all(b"<p>Hello!</p>")?;
/// writer.close()?;
///
/// let mut buf = String::new();
/// cache.open_read(&key)?.read_to_string(&mut buf)?;
/// assert_eq!(buf, "<p>Hello!</p>");
/// assert_eq!(cache.resolve_path(&key), None);
/// # Ok(())
/// # }
/// ```
pub struct ObjectStoreCache<S: ObjectStore, C: Clock = SystemClock> {
    store: Arc<S>,
    clock: C,
    probe_failure_policy: ProbeFailurePolicy,
    upload_mode: UploadMode,
}

impl<S: ObjectStore> ObjectStoreCache<S, SystemClock> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: ObjectStore, C: Clock> ObjectStoreCache<S, C> {
    pub(crate) fn with_clock(store: S, clock: C) -> Self {
        Self {
            store: Arc::new(store),
            clock,
            probe_failure_policy: ProbeFailurePolicy::default(),
            upload_mode: UploadMode::default(),
        }
    }

    pub fn with_probe_failure_policy(mut self, policy: ProbeFailurePolicy) -> Self {
        self.probe_failure_policy = policy;
        self
    }

    pub fn with_upload_mode(mut self, mode: UploadMode) -> Self {
        self.upload_mode = mode;
        self
    }

    /// Returns the underlying object store.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn attributes(
        metadata: &ArtifactMetadata,
        content_length: u64,
        written_at: DateTime<Utc>,
    ) -> ObjectAttributes {
        ObjectAttributes {
            content_type: metadata.content_type(),
            content_length,
            content_disposition: metadata.content_disposition(),
            last_modified: metadata.last_modified.unwrap_or(written_at),
            written_at,
            acl: CannedAcl::Private,
        }
    }
}

impl<S: ObjectStore, C: Clock + Clone> CacheBackend for ObjectStoreCache<S, C> {
    type Reader = S::Reader;
    type Writer = ObjectStoreWriter<S, C>;

    fn exists(&self, key: &CacheKey) -> CacheResult<bool> {
        match self.store.head_object(&key.guid) {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound) => Ok(false),
            Err(err) => match self.probe_failure_policy {
                ProbeFailurePolicy::Report => {
                    warn!(guid = %key.guid, error = %err, "existence probe failed");
                    Err(CacheError::Probe {
                        guid: key.guid.clone(),
                        source: err,
                    })
                }
                ProbeFailurePolicy::AssumePresent => {
                    warn!(
                        guid = %key.guid,
                        error = %err,
                        "existence probe failed, assuming the artifact is present"
                    );
                    Ok(true)
                }
            },
        }
    }

    fn open_read(&self, key: &CacheKey) -> CacheResult<Self::Reader> {
        let (meta, reader) = self
            .store
            .get_object(&key.guid)
            .map_err(|err| CacheError::from_store(&key.guid, err))?;
        debug!(guid = %key.guid, size = ?meta.content_length, "reading cached artifact");
        Ok(reader)
    }

    fn open_write(
        &self,
        key: &CacheKey,
        metadata: &ArtifactMetadata,
    ) -> CacheResult<Self::Writer> {
        let sink = match self.upload_mode {
            UploadMode::Buffered => Sink::Buffered {
                store: self.store.clone(),
                buffer: BytesMut::new(),
            },
            UploadMode::Streaming => {
                let upload = self
                    .store
                    .start_upload(
                        &key.guid,
                        &Self::attributes(metadata, metadata.size, self.clock.now()),
                    )
                    .map_err(|source| CacheError::Transport {
                        guid: key.guid.clone(),
                        source,
                    })?;
                Sink::Streaming { upload, written: 0 }
            }
        };
        Ok(ObjectStoreWriter {
            sink: Some(sink),
            guid: key.guid.clone(),
            metadata: metadata.clone(),
            clock: self.clock.clone(),
        })
    }

    /// Reports the time the writer committed the artifact. Objects written without that record
    /// fall back to the store's own last-modified time.
    fn last_modified(&self, key: &CacheKey) -> Option<DateTime<Utc>> {
        match self.store.head_object(&key.guid) {
            Ok(meta) => meta.written_at.or(meta.last_modified),
            Err(ObjectStoreError::NotFound) => None,
            Err(err) => {
                warn!(guid = %key.guid, error = %err, "last-modified probe failed");
                None
            }
        }
    }

    fn purge(&self, older_than: DateTime<Utc>) -> CacheResult<()> {
        debug!(%older_than, "purge delegated to the object store's lifecycle rules");
        Ok(())
    }
}

enum Sink<S: ObjectStore> {
    Buffered { store: Arc<S>, buffer: BytesMut },
    Streaming { upload: S::Upload, written: u64 },
}

/// A writer for an artifact in an [ObjectStoreCache].
///
/// In [UploadMode::Buffered] the artifact is held in memory and stored by [Close::close] with a
/// single put. Dropping the writer without closing it discards the artifact.
pub struct ObjectStoreWriter<S: ObjectStore, C: Clock> {
    sink: Option<Sink<S>>,
    guid: String,
    metadata: ArtifactMetadata,
    clock: C,
}

fn size_mismatch(guid: &str, declared: u64, written: u64) -> CacheError {
    CacheError::SizeMismatch {
        guid: guid.to_string(),
        declared,
        written,
    }
}

impl<S: ObjectStore, C: Clock> Write for ObjectStoreWriter<S, C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let declared = self.metadata.size;
        match &mut self.sink {
            Some(Sink::Buffered { buffer, .. }) => {
                buffer.extend_from_slice(buf);
                Ok(buf.len())
            }
            Some(Sink::Streaming { upload, written }) => {
                let total = *written + buf.len() as u64;
                if total > declared {
                    return Err(size_mismatch(&self.guid, declared, total).into_io_error());
                }
                let n = upload.write(buf)?;
                *written += n as u64;
                Ok(n)
            }
            None => Err(io::Error::other("write handle already closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.sink {
            Some(Sink::Streaming { upload, .. }) => upload.flush(),
            _ => Ok(()),
        }
    }
}

impl<S: ObjectStore, C: Clock> Close for ObjectStoreWriter<S, C> {
    fn close(mut self) -> io::Result<()> {
        let Some(sink) = self.sink.take() else {
            return Ok(());
        };
        match sink {
            Sink::Buffered { store, buffer } => {
                let content_length = buffer.len() as u64;
                if content_length != self.metadata.size {
                    warn!(
                        guid = %self.guid,
                        declared = self.metadata.size,
                        written = content_length,
                        "artifact size differs from declared size, storing written bytes"
                    );
                }
                let attributes = ObjectStoreCache::<S, C>::attributes(
                    &self.metadata,
                    content_length,
                    self.clock.now(),
                );
                store
                    .put_object(&self.guid, buffer.freeze(), &attributes)
                    .map_err(|source| CacheError::Transport {
                        guid: self.guid.clone(),
                        source,
                    })?;
                debug!(guid = %self.guid, size = content_length, "stored artifact");
            }
            Sink::Streaming { upload, written } => {
                if written != self.metadata.size {
                    // Dropping the upload abandons it before the store commits anything.
                    return Err(
                        size_mismatch(&self.guid, self.metadata.size, written).into_io_error()
                    );
                }
                upload.close().map_err(|err| {
                    CacheError::Transport {
                        guid: self.guid.clone(),
                        source: ObjectStoreError::from(err),
                    }
                    .into_io_error()
                })?;
                debug!(guid = %self.guid, size = written, "streamed artifact");
            }
        }
        Ok(())
    }
}

impl<S: ObjectStore, C: Clock> Drop for ObjectStoreWriter<S, C> {
    fn drop(&mut self) {
        if self.sink.is_some() {
            warn!(
                guid = %self.guid,
                "write handle dropped without being closed, artifact discarded"
            );
        }
    }
}
