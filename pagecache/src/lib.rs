//! `pagecache` stores artifacts rendered from documents (pages as HTML or images, converted
//! PDFs, ...) so that a rendering engine does not have to produce them twice.
//!
//! The crate is built around two concepts:
//!
//! - **Cache backend**: A [cache::CacheBackend] maps a [cache::CacheKey] onto a stored artifact
//!   and hands out readers and writers for it. Backends exist for the local filesystem
//!   ([cache::filesystem]) and for object stores ([cache::object_store]).
//! - **Object store**: An [store::ObjectStore] is a flat bucket of named objects, either an
//!   S3-compatible service reached over HTTP ([store::http]) or process memory
//!   ([store::in_memory]).
//!
//! [cache::dispatcher::CacheDispatcher] selects a backend from a [config::CacheConfig].

pub mod cache;
pub mod config;
pub mod error;
pub mod store;

pub mod util {
    //! Collects traits, functions, etc. that are not directly related to caching artifacts.

    pub mod clock;
    pub mod close;
    pub(crate) mod encoding;
    pub mod http;
}
#[cfg(any(test, feature = "test"))]
pub mod test_util {
    //! Utilities for testing code that talks to an object store.
    //!
    //! These are not intended to be used in production code.

    pub mod fake_s3;
}
