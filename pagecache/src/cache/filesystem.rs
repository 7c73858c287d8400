//! Implementation of the [CacheBackend] trait for artifacts kept in the local filesystem.
//!
//! Artifacts are stored as `<root>/<guid>/<base_name>.<file_type>`. Auxiliary resources of an
//! artifact go into `<root>/<guid>/.resources/<base_name>/`.

mod staged_file;

use super::{ArtifactMetadata, CacheBackend, CacheError, CacheKey, CacheResult, ResourceDescriptor};
use crate::cache::filesystem::staged_file::{StagedFile, is_tmp_file_name, remove_if_abandoned};
use crate::util::close::Close;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use std::{fs, io};
use tracing::{debug, info, warn};

const RESOURCES_DIR: &str = ".resources";

/// Cache backend using a directory of the local filesystem.
///
/// Multiple instances, also in different processes, may share the same root directory. Writes
/// are staged in temporary files and atomically moved into place when closed.
///
/// # Examples
///
/// ```rust
/// # use std::io;
/// use std::io::{Read, Write};
/// use pagecache::cache::{ArtifactMetadata, CacheBackend, CacheKey};
/// use pagecache::cache::filesystem::FilesystemCache;
/// use pagecache::util::close::Close;
///
/// # fn main() -> io::Result<()> {
/// # let tempdir = tempfile::tempdir()?;
/// let cache = FilesystemCache::new(tempdir.path());
/// let key = CacheKey::new("doc1", "page_1", "html");
/// let mut writer = cache.open_write(&key, &ArtifactMetadata::new("page_1.html", 13))?;
/// writer.write_all(b"<p>Hello!</p>")?;
/// writer.close()?;
///
/// let mut buf = String::new();
/// cache.open_read(&key)?.read_to_string(&mut buf)?;
/// assert_eq!(buf, "<p>Hello!</p>");
/// assert_eq!(
///     cache.resolve_path(&key),
///     Some(tempdir.path().join("doc1").join("page_1.html"))
/// );
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FilesystemCache {
    root: PathBuf,
}

impl FilesystemCache {
    /// Creates a cache in the given root directory. The directory itself is not created; writes
    /// fail until it exists.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FilesystemCache { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns a writer for the auxiliary resource `metadata.name` of the artifact for `key`.
    pub fn write_resource(
        &self,
        key: &CacheKey,
        metadata: &ArtifactMetadata,
    ) -> CacheResult<FilesystemWriter> {
        validate_component("resource name", &metadata.name)?;
        let path = self.resources_dir(key)?.join(&metadata.name);
        self.stage(path, metadata)
    }

    /// Opens the auxiliary resource `name` of the artifact for `key`.
    pub fn open_resource(&self, key: &CacheKey, name: &str) -> CacheResult<File> {
        validate_component("resource name", name)?;
        let path = self.resources_dir(key)?.join(name);
        File::open(&path).map_err(|err| not_found_or_io(&key.guid, path, err))
    }

    fn artifact_path(&self, key: &CacheKey) -> CacheResult<PathBuf> {
        validate_component("guid", &key.guid)?;
        validate_component("base name", &key.base_name)?;
        // A file type without dots splits every file name unambiguously at its last dot.
        if key.file_type.is_empty() || key.file_type.contains(['.', '/', '\\', '\0']) {
            return Err(invalid_key(format!(
                "file type {:?} must be a non-empty extension without dots or path separators",
                key.file_type
            )));
        }
        let file_name = key.file_name();
        if is_tmp_file_name(&file_name) {
            return Err(invalid_key(format!(
                "{file_name:?} collides with the naming of temporary files"
            )));
        }
        Ok(self.root.join(&key.guid).join(file_name))
    }

    fn resources_dir(&self, key: &CacheKey) -> CacheResult<PathBuf> {
        validate_component("guid", &key.guid)?;
        validate_component("base name", &key.base_name)?;
        Ok(self
            .root
            .join(&key.guid)
            .join(RESOURCES_DIR)
            .join(&key.base_name))
    }

    fn stage(&self, path: PathBuf, metadata: &ArtifactMetadata) -> CacheResult<FilesystemWriter> {
        if !self.root.is_dir() {
            return Err(CacheError::io(
                &self.root,
                io::Error::new(ErrorKind::NotFound, "cache root directory does not exist"),
            ));
        }
        let parent = path.parent().unwrap_or(self.root.as_path()).to_path_buf();
        let mut attempts_left = 2;
        let staged = loop {
            fs::create_dir_all(&parent).map_err(|err| CacheError::io(&parent, err))?;
            match StagedFile::new(&path, &mut rand::rng()) {
                Ok(staged) => break staged,
                // A concurrent purge may remove the directory while it is still empty.
                Err(err) if err.kind() == ErrorKind::NotFound && attempts_left > 1 => {
                    attempts_left -= 1;
                }
                Err(err) => return Err(CacheError::io(&path, err)),
            }
        };
        Ok(FilesystemWriter {
            staged,
            declared_size: metadata.size,
            written: 0,
            last_modified: metadata.last_modified,
        })
    }

    fn purge_dir(dir: &Path, older_than: SystemTime) -> CacheResult<usize> {
        let mut removed = 0;
        let entries = match dir.read_dir() {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(CacheError::io(dir, err)),
        };
        for entry in entries {
            let entry = entry.map_err(|err| CacheError::io(dir, err))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|err| CacheError::io(&path, err))?;
            if file_type.is_dir() {
                removed += Self::purge_dir(&path, older_than)?;
                remove_dir_if_empty(&path)?;
            } else if file_type.is_file() {
                if entry.file_name().to_str().is_some_and(is_tmp_file_name) {
                    if remove_if_abandoned(&path).map_err(|err| CacheError::io(&path, err))? {
                        debug!(path = %path.display(), "removed leftover temporary file");
                    }
                    continue;
                }
                let modified = entry
                    .metadata()
                    .and_then(|metadata| metadata.modified())
                    .map_err(|err| CacheError::io(&path, err))?;
                if modified < older_than {
                    match fs::remove_file(&path) {
                        Ok(()) => removed += 1,
                        Err(err) if err.kind() == ErrorKind::NotFound => {}
                        Err(err) => return Err(CacheError::io(&path, err)),
                    }
                }
            }
        }
        Ok(removed)
    }
}

impl CacheBackend for FilesystemCache {
    type Reader = File;
    type Writer = FilesystemWriter;

    fn exists(&self, key: &CacheKey) -> CacheResult<bool> {
        let path = self.artifact_path(key)?;
        match fs::metadata(&path) {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(CacheError::io(path, err)),
        }
    }

    fn open_read(&self, key: &CacheKey) -> CacheResult<Self::Reader> {
        let path = self.artifact_path(key)?;
        File::open(&path).map_err(|err| not_found_or_io(&key.guid, path, err))
    }

    fn open_write(
        &self,
        key: &CacheKey,
        metadata: &ArtifactMetadata,
    ) -> CacheResult<Self::Writer> {
        let path = self.artifact_path(key)?;
        self.stage(path, metadata)
    }

    fn last_modified(&self, key: &CacheKey) -> Option<DateTime<Utc>> {
        let path = self.artifact_path(key).ok()?;
        match fs::metadata(&path).and_then(|metadata| metadata.modified()) {
            Ok(modified) => Some(modified.into()),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read modification time");
                None
            }
        }
    }

    fn resource_bundle(&self, key: &CacheKey) -> CacheResult<Option<PathBuf>> {
        let dir = self.resources_dir(key)?;
        Ok(dir.is_dir().then_some(dir))
    }

    fn resources(&self, key: &CacheKey) -> CacheResult<Vec<ResourceDescriptor>> {
        let dir = self.resources_dir(key)?;
        let entries = match dir.read_dir() {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(CacheError::io(dir, err)),
        };
        let mut resources = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| CacheError::io(&dir, err))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let metadata = entry
                .metadata()
                .map_err(|err| CacheError::io(entry.path(), err))?;
            if !metadata.is_file() || is_tmp_file_name(&name) {
                continue;
            }
            resources.push(ResourceDescriptor {
                name,
                size: metadata.len(),
                last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        resources.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(resources)
    }

    fn resolve_path(&self, key: &CacheKey) -> Option<PathBuf> {
        self.artifact_path(key).ok()
    }

    fn purge(&self, older_than: DateTime<Utc>) -> CacheResult<()> {
        if !self.root.is_dir() {
            return Ok(());
        }
        let removed = Self::purge_dir(&self.root, older_than.into())?;
        info!(removed, %older_than, root = %self.root.display(), "purged cache");
        Ok(())
    }
}

/// A writer for an artifact or resource in a [FilesystemCache].
pub struct FilesystemWriter {
    staged: StagedFile,
    declared_size: u64,
    written: u64,
    last_modified: Option<DateTime<Utc>>,
}

impl Write for FilesystemWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.staged.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.staged.flush()
    }
}

impl Close for FilesystemWriter {
    fn close(self) -> io::Result<()> {
        let path = self.staged.target_path().to_path_buf();
        if self.written != self.declared_size {
            warn!(
                path = %path.display(),
                declared = self.declared_size,
                written = self.written,
                "artifact size differs from declared size, storing written bytes"
            );
        }
        // The kernel stamps files from a coarse clock that can lag the system time. A claimed time
        // only counts when it is later than the write itself.
        let written_at = SystemTime::now();
        let modified = self
            .last_modified
            .map(SystemTime::from)
            .map_or(written_at, |claimed| claimed.max(written_at));
        self.staged.file().set_modified(modified)?;
        self.staged.close()?;
        debug!(path = %path.display(), size = self.written, "stored artifact");
        Ok(())
    }
}

fn validate_component(kind: &str, value: &str) -> CacheResult<()> {
    if value.is_empty() {
        return Err(invalid_key(format!("{kind} must not be empty")));
    }
    if value.starts_with('.') {
        return Err(invalid_key(format!(
            "{kind} {value:?} must not start with a dot"
        )));
    }
    if value.contains(['/', '\\', '\0']) {
        return Err(invalid_key(format!(
            "{kind} {value:?} contains a path separator"
        )));
    }
    Ok(())
}

fn invalid_key(reason: String) -> CacheError {
    CacheError::InvalidKey { reason }
}

fn not_found_or_io(guid: &str, path: PathBuf, err: io::Error) -> CacheError {
    if err.kind() == ErrorKind::NotFound {
        CacheError::NotFound {
            guid: guid.to_string(),
        }
    } else {
        CacheError::io(path, err)
    }
}

fn remove_dir_if_empty(dir: &Path) -> CacheResult<()> {
    match fs::remove_dir(dir) {
        Ok(()) => Ok(()),
        Err(err)
            if matches!(
                err.kind(),
                ErrorKind::DirectoryNotEmpty | ErrorKind::NotFound
            ) =>
        {
            Ok(())
        }
        Err(err) => Err(CacheError::io(dir, err)),
    }
}
