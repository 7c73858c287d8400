//! Bucket-scoped object store clients.
//!
//! An [ObjectStore] is what the [object store cache](crate::cache::object_store) talks to. It
//! addresses objects by name within a single bucket that is fixed when the client is constructed.

use crate::util::close::Close;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::{Read, Write};

pub mod http;
pub mod in_memory;

pub use crate::error::ObjectStoreError;

pub type Result<T> = std::result::Result<T, ObjectStoreError>;

/// A client for a remote bucket-addressed byte store.
///
/// Implementations are expected to be shareable between threads; every method takes `&self` and
/// performs one independent round trip to the store.
pub trait ObjectStore {
    /// The type of reader returned for object contents.
    type Reader: Read;

    /// The type of streaming upload returned by [ObjectStore::start_upload].
    type Upload: Write + Close;

    /// Fetches the metadata of an object without its contents.
    ///
    /// Returns [ObjectStoreError::NotFound] if there is no object with the given name.
    fn head_object(&self, name: &str) -> Result<ObjectMeta>;

    /// Fetches an object. The contents are streamed from the store as the reader is consumed.
    fn get_object(&self, name: &str) -> Result<(ObjectMeta, Self::Reader)>;

    /// Stores `body` under `name`, replacing any previous object. Blocks until the store
    /// acknowledged the write.
    fn put_object(&self, name: &str, body: Bytes, attributes: &ObjectAttributes) -> Result<()>;

    /// Starts an upload of exactly `attributes.content_length` bytes that are supplied through the
    /// returned writer. The object becomes visible once the writer is closed successfully.
    fn start_upload(&self, name: &str, attributes: &ObjectAttributes) -> Result<Self::Upload>;
}

/// Metadata the store reports for an object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMeta {
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    /// The time the store recorded for the last write of the object. Never earlier than the
    /// actual write, but possibly rounded up to the store's resolution.
    pub last_modified: Option<DateTime<Utc>>,
    /// The [ObjectAttributes::written_at] recorded with the object, if it was written with one.
    pub written_at: Option<DateTime<Utc>>,
}

/// Metadata recorded together with an object when it is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectAttributes {
    pub content_type: String,
    pub content_length: u64,
    pub content_disposition: String,
    /// Modification time claimed by the writer. Stores keep their own last-modified time; this
    /// value is recorded as user metadata.
    pub last_modified: DateTime<Utc>,
    /// Time at which the writer committed the object, recorded with full precision.
    pub written_at: DateTime<Utc>,
    pub acl: CannedAcl,
}

/// Predefined access control settings for new objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CannedAcl {
    #[default]
    Private,
    PublicRead,
}

impl CannedAcl {
    pub fn as_str(&self) -> &'static str {
        match self {
            CannedAcl::Private => "private",
            CannedAcl::PublicRead => "public-read",
        }
    }
}
