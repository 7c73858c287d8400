//! Error types of the cache backends and object store clients.

use crate::util::http::error::HttpClientError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// An error returned by a [CacheBackend](crate::cache::CacheBackend).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    /// No artifact is cached for the key.
    #[error("no cached artifact for {guid}")]
    NotFound { guid: String },

    /// The store could not be reached or refused the operation.
    #[error("transport error while accessing {guid}: {source}")]
    Transport {
        guid: String,
        #[source]
        source: ObjectStoreError,
    },

    /// An existence probe failed for a reason other than the artifact being absent.
    #[error("could not determine whether {guid} is cached: {source}")]
    Probe {
        guid: String,
        #[source]
        source: ObjectStoreError,
    },

    /// The key cannot be mapped onto the backend's naming scheme.
    #[error("invalid cache key: {reason}")]
    InvalidKey { reason: String },

    /// A streaming write received a different number of bytes than declared.
    #[error("declared size of {declared} bytes for {guid}, but {written} bytes were written")]
    SizeMismatch {
        guid: String,
        declared: u64,
        written: u64,
    },

    /// A local I/O operation failed.
    #[error("I/O error on path {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type CacheResult<T> = Result<T, CacheError>;

impl CacheError {
    pub(crate) fn from_store(guid: &str, err: ObjectStoreError) -> Self {
        match err {
            ObjectStoreError::NotFound => CacheError::NotFound {
                guid: guid.to_string(),
            },
            source => CacheError::Transport {
                guid: guid.to_string(),
                source,
            },
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` if the error signals an absent artifact rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound { .. })
    }

    /// Converts the error into an [io::Error] with a matching [io::ErrorKind]. The original error
    /// can be recovered with [io::Error::into_inner] and a downcast.
    pub fn into_io_error(self) -> io::Error {
        let kind = match &self {
            CacheError::NotFound { .. } => io::ErrorKind::NotFound,
            CacheError::InvalidKey { .. } | CacheError::SizeMismatch { .. } => {
                io::ErrorKind::InvalidInput
            }
            CacheError::Io { source, .. } => source.kind(),
            CacheError::Transport { .. } | CacheError::Probe { .. } => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }
}

impl From<CacheError> for io::Error {
    fn from(value: CacheError) -> Self {
        value.into_io_error()
    }
}

/// An error returned by an [ObjectStore](crate::store::ObjectStore).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ObjectStoreError {
    /// The object does not exist.
    #[error("object not found")]
    NotFound,

    /// The store answered with an unexpected status.
    #[error("object store responded with status {status}{}", error_code_suffix(.code))]
    Status { status: u16, code: Option<String> },

    /// The request could not be sent or the response could not be read.
    #[error(transparent)]
    Http(#[from] HttpClientError),

    /// The client configuration is unusable.
    #[error("invalid object store configuration: {0}")]
    InvalidConfig(String),
}

impl From<io::Error> for ObjectStoreError {
    /// Unwraps an [ObjectStoreError] that was carried through an [io::Error], e.g. by
    /// [Close::close](crate::util::close::Close::close), and wraps any other I/O error.
    fn from(value: io::Error) -> Self {
        if value
            .get_ref()
            .is_some_and(|inner| inner.is::<ObjectStoreError>())
        {
            match value.into_inner().map(|inner| inner.downcast::<ObjectStoreError>()) {
                Some(Ok(err)) => return *err,
                _ => unreachable!("inner error type was checked"),
            }
        }
        ObjectStoreError::Http(HttpClientError::IoError(value))
    }
}

fn error_code_suffix(code: &Option<String>) -> String {
    code.as_deref()
        .map(|code| format!(" ({code})"))
        .unwrap_or_default()
}
