use crate::cache::filesystem::FilesystemCache;
use crate::cache::object_store::ObjectStoreCache;
use crate::cache::{ArtifactMetadata, CacheBackend, CacheKey, CacheResult, ResourceDescriptor};
use crate::config::CacheConfig;
use crate::error::ObjectStoreError;
use crate::store::http::HttpObjectStore;
use crate::store::in_memory::InMemoryObjectStore;
use crate::util::close::Close;
use chrono::{DateTime, Utc};
use std::io;
use std::io::{Read, Write};
use std::path::PathBuf;

/// A cache backend chosen at runtime.
pub enum CacheDispatcher {
    InMemory(ObjectStoreCache<InMemoryObjectStore>),
    Filesystem(FilesystemCache),
    ObjectStore(ObjectStoreCache<HttpObjectStore>),
}

impl CacheDispatcher {
    pub fn from_config(config: &CacheConfig) -> Result<Self, ObjectStoreError> {
        Ok(match config {
            CacheConfig::InMemory => {
                Self::InMemory(ObjectStoreCache::new(InMemoryObjectStore::new()))
            }
            CacheConfig::Filesystem { path } => Self::Filesystem(FilesystemCache::new(path)),
            CacheConfig::ObjectStore(config) => Self::ObjectStore(
                ObjectStoreCache::new(HttpObjectStore::from_config(config)?)
                    .with_probe_failure_policy(config.probe_failure_policy)
                    .with_upload_mode(config.upload_mode),
            ),
        })
    }
}

impl CacheBackend for CacheDispatcher {
    type Reader = Box<dyn Read + Send>;
    type Writer = CacheWriter;

    fn exists(&self, key: &CacheKey) -> CacheResult<bool> {
        match self {
            Self::InMemory(cache) => cache.exists(key),
            Self::Filesystem(cache) => cache.exists(key),
            Self::ObjectStore(cache) => cache.exists(key),
        }
    }

    fn open_read(&self, key: &CacheKey) -> CacheResult<Self::Reader> {
        Ok(match self {
            Self::InMemory(cache) => Box::new(cache.open_read(key)?),
            Self::Filesystem(cache) => Box::new(cache.open_read(key)?),
            Self::ObjectStore(cache) => Box::new(cache.open_read(key)?),
        })
    }

    fn open_write(
        &self,
        key: &CacheKey,
        metadata: &ArtifactMetadata,
    ) -> CacheResult<Self::Writer> {
        match self {
            Self::InMemory(cache) => cache.open_write(key, metadata).map(CacheWriter::InMemory),
            Self::Filesystem(cache) => cache
                .open_write(key, metadata)
                .map(CacheWriter::Filesystem),
            Self::ObjectStore(cache) => cache
                .open_write(key, metadata)
                .map(CacheWriter::ObjectStore),
        }
    }

    fn last_modified(&self, key: &CacheKey) -> Option<DateTime<Utc>> {
        match self {
            Self::InMemory(cache) => cache.last_modified(key),
            Self::Filesystem(cache) => cache.last_modified(key),
            Self::ObjectStore(cache) => cache.last_modified(key),
        }
    }

    fn resource_bundle(&self, key: &CacheKey) -> CacheResult<Option<PathBuf>> {
        match self {
            Self::InMemory(cache) => cache.resource_bundle(key),
            Self::Filesystem(cache) => cache.resource_bundle(key),
            Self::ObjectStore(cache) => cache.resource_bundle(key),
        }
    }

    fn resources(&self, key: &CacheKey) -> CacheResult<Vec<ResourceDescriptor>> {
        match self {
            Self::InMemory(cache) => cache.resources(key),
            Self::Filesystem(cache) => cache.resources(key),
            Self::ObjectStore(cache) => cache.resources(key),
        }
    }

    fn resolve_path(&self, key: &CacheKey) -> Option<PathBuf> {
        match self {
            Self::InMemory(cache) => cache.resolve_path(key),
            Self::Filesystem(cache) => cache.resolve_path(key),
            Self::ObjectStore(cache) => cache.resolve_path(key),
        }
    }

    fn purge(&self, older_than: DateTime<Utc>) -> CacheResult<()> {
        match self {
            Self::InMemory(cache) => cache.purge(older_than),
            Self::Filesystem(cache) => cache.purge(older_than),
            Self::ObjectStore(cache) => cache.purge(older_than),
        }
    }
}

pub enum CacheWriter {
    InMemory(<ObjectStoreCache<InMemoryObjectStore> as CacheBackend>::Writer),
    Filesystem(<FilesystemCache as CacheBackend>::Writer),
    ObjectStore(<ObjectStoreCache<HttpObjectStore> as CacheBackend>::Writer),
}

impl Write for CacheWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::InMemory(writer) => writer.write(buf),
            Self::Filesystem(writer) => writer.write(buf),
            Self::ObjectStore(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::InMemory(writer) => writer.flush(),
            Self::Filesystem(writer) => writer.flush(),
            Self::ObjectStore(writer) => writer.flush(),
        }
    }
}

impl Close for CacheWriter {
    fn close(self) -> io::Result<()> {
        match self {
            Self::InMemory(writer) => writer.close(),
            Self::Filesystem(writer) => writer.close(),
            Self::ObjectStore(writer) => writer.close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObjectStoreConfig;
    use crate::test_cache_backend;
    use crate::test_util::fake_s3::FakeS3Server;
    use tempfile::tempdir;

    test_cache_backend!(
        in_memory_dispatch_tests,
        (
            CacheDispatcher::from_config(&CacheConfig::InMemory).unwrap(),
            ()
        )
    );

    test_cache_backend!(filesystem_dispatch_tests, {
        let tempdir = tempdir().unwrap();
        let config = CacheConfig::Filesystem {
            path: tempdir.path().to_path_buf(),
        };
        (CacheDispatcher::from_config(&config).unwrap(), tempdir)
    });

    test_cache_backend!(object_store_dispatch_tests, {
        let server = FakeS3Server::start().unwrap();
        let config = CacheConfig::ObjectStore(ObjectStoreConfig::new(server.endpoint(), "bucket"));
        (CacheDispatcher::from_config(&config).unwrap(), server)
    });

    #[test]
    fn test_object_store_config_selects_http_store() {
        let server = FakeS3Server::start().unwrap();
        let config = CacheConfig::ObjectStore(ObjectStoreConfig::new(server.endpoint(), "bucket"));
        let cache = CacheDispatcher::from_config(&config).unwrap();
        let key = CacheKey::new("doc1", "report", "pdf");

        let mut writer = cache
            .open_write(&key, &ArtifactMetadata::new("report.pdf", 5))
            .unwrap();
        writer.write_all(b"%PDF-").unwrap();
        writer.close().unwrap();

        let object = server.object("/bucket/doc1").unwrap();
        assert_eq!(object.body, b"%PDF-");
        assert_eq!(object.header("content-type"), Some("application/pdf"));
        assert_eq!(cache.resolve_path(&key), None);
    }
}
