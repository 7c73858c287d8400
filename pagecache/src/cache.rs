//! The cache contract used by a rendering engine to persist rendered artifacts.
//!
//! This module defines the [CacheBackend] trait and the types passed through it. Implementations
//! live in the submodules: [filesystem] keeps artifacts in a local directory, [object_store] keeps
//! them in a remote bucket.

use crate::util::close::Close;
use chrono::{DateTime, Utc};
use std::fmt::{Display, Formatter};
use std::io::{Read, Write};
use std::path::PathBuf;

pub mod dispatcher;
pub mod filesystem;
pub mod object_store;

pub use crate::error::{CacheError, CacheResult};

/// A storage backend for cached artifacts.
///
/// Reading and writing is done through [CacheBackend::Reader] and [CacheBackend::Writer] so that
/// artifacts do not need to be held in memory by the caller. A written artifact becomes visible
/// only once the writer was finalized with [Close::close]; a writer that is dropped instead leaves
/// the cache unchanged.
///
/// The capabilities with default implementations are optional. A backend that does not support
/// them reports "nothing there" rather than an error, so callers never need to know which kind of
/// backend they are talking to.
pub trait CacheBackend {
    /// The type of reader returned by this backend.
    type Reader: Read;

    /// The type of writer returned by this backend.
    type Writer: Write + Close;

    /// Returns whether an artifact is cached for `key`.
    ///
    /// An absent artifact is `Ok(false)`. Failures to find out are reported as errors distinct
    /// from [CacheError::NotFound].
    fn exists(&self, key: &CacheKey) -> CacheResult<bool>;

    /// Returns a reader positioned at the start of the artifact cached for `key`.
    ///
    /// Fails with [CacheError::NotFound] if there is none.
    fn open_read(&self, key: &CacheKey) -> CacheResult<Self::Reader>;

    /// Returns a writer for the artifact to be cached under `key`, replacing any previous one
    /// once the writer is closed.
    fn open_write(&self, key: &CacheKey, metadata: &ArtifactMetadata)
    -> CacheResult<Self::Writer>;

    /// Returns when the artifact cached for `key` was last modified.
    ///
    /// Absent artifacts and failed lookups both yield `None`.
    fn last_modified(&self, key: &CacheKey) -> Option<DateTime<Utc>>;

    /// Returns the folder holding auxiliary resources (e.g. images referenced by an HTML page)
    /// of the artifact cached for `key`.
    fn resource_bundle(&self, _key: &CacheKey) -> CacheResult<Option<PathBuf>> {
        Ok(None)
    }

    /// Lists the auxiliary resources of the artifact cached for `key`.
    fn resources(&self, _key: &CacheKey) -> CacheResult<Vec<ResourceDescriptor>> {
        Ok(Vec::new())
    }

    /// Returns the local filesystem path of the artifact for `key`, if the backend keeps
    /// artifacts in local files.
    fn resolve_path(&self, _key: &CacheKey) -> Option<PathBuf> {
        None
    }

    /// Removes all artifacts last modified before `older_than`.
    ///
    /// Backends whose store expires entries on its own may do nothing here.
    fn purge(&self, _older_than: DateTime<Utc>) -> CacheResult<()> {
        Ok(())
    }
}

/// Identifies a cached artifact.
///
/// The `guid` is unique per artifact within one store. Base name and file type allow backends
/// to derive richer names, e.g. hierarchical paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub guid: String,
    pub base_name: String,
    pub file_type: String,
}

impl CacheKey {
    pub fn new(
        guid: impl Into<String>,
        base_name: impl Into<String>,
        file_type: impl Into<String>,
    ) -> Self {
        Self {
            guid: guid.into(),
            base_name: base_name.into(),
            file_type: file_type.into(),
        }
    }

    /// The file name the artifact would have on disk, `<base_name>.<file_type>`.
    ///
    /// Different keys can share a file name, e.g. `("report", "pdf")` and `("report.pdf", "")`.
    /// Backends that address artifacts by file name reject the ambiguous forms.
    pub fn file_name(&self) -> String {
        if self.file_type.is_empty() {
            self.base_name.clone()
        } else {
            format!("{}.{}", self.base_name, self.file_type)
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.guid, self.file_name())
    }
}

/// Describes an artifact that is about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMetadata {
    /// Display name of the artifact; its extension determines the content type.
    pub name: String,
    /// Declared size in bytes.
    pub size: u64,
    /// Modification time to record. `None` records the time the write is completed.
    pub last_modified: Option<DateTime<Utc>>,
}

impl ArtifactMetadata {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            last_modified: None,
        }
    }

    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(last_modified);
        self
    }

    /// MIME type derived from the extension of [ArtifactMetadata::name].
    pub fn content_type(&self) -> String {
        mime_guess::from_path(&self.name)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }

    /// `Content-Disposition` value presenting the artifact inline under its display name.
    pub fn content_disposition(&self) -> String {
        let filename: String = self
            .name
            .chars()
            .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
            .collect();
        format!("inline; filename=\"{filename}\"")
    }
}

/// An auxiliary file belonging to a cached artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub name: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}
