use crate::util::close::Close;
use crate::util::encoding::ICASE_NOPAD_ALPHANUMERIC_ENCODING;
use data_encoding::Encoding;
use fs2::FileExt;
use rand::{CryptoRng, RngCore};
use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::{fs, io};
use tracing::warn;

const TMP_FILE_SUFFIX_ENCODING: Encoding = ICASE_NOPAD_ALPHANUMERIC_ENCODING;
const TMP_FILE_SUFFIX_BYTES: usize = 4;
const TMP_FILE_SUFFIX_ENCODED_LEN: usize = 7;
const CREATE_ATTEMPTS: usize = 5;

/// A file that is staged to be atomically moved to a target path.
///
/// The file is created with a temporary name next to the target path and only moved there by
/// [Close::close]. Dropping an unclosed instance deletes the temporary file, so readers of the
/// target path either see the previous file or the complete new one.
pub struct StagedFile {
    file: File,
    tmp_path: PathBuf,
    target_path: PathBuf,
    finalized: bool,
}

impl StagedFile {
    pub fn new<R: CryptoRng + RngCore>(
        target_path: impl Into<PathBuf>,
        rng: &mut R,
    ) -> io::Result<Self> {
        let target_path = target_path.into();
        for _ in 0..CREATE_ATTEMPTS {
            let mut bytes = [0; TMP_FILE_SUFFIX_BYTES];
            rng.fill_bytes(&mut bytes);
            match Self::new_with_suffix(&target_path, &TMP_FILE_SUFFIX_ENCODING.encode(&bytes)) {
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                result => return result,
            }
        }
        Err(io::Error::other("failed to create a unique temporary file"))
    }

    fn new_with_suffix(target_path: &Path, suffix: &str) -> io::Result<Self> {
        let filename = target_path
            .file_name()
            .and_then(OsStr::to_str)
            .ok_or(io::Error::new(ErrorKind::InvalidInput, "invalid filename"))?;
        let tmp_path = target_path.with_file_name(format!("{filename}.tmp.{suffix}"));
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp_path)?;
        file.lock_exclusive()?;
        if !tmp_path.exists() {
            // Removed by a concurrent purge before the lock was taken.
            return Err(io::Error::new(
                ErrorKind::AlreadyExists,
                "temporary file was removed before it could be locked",
            ));
        }
        Ok(Self {
            file,
            tmp_path,
            target_path: target_path.to_path_buf(),
            finalized: false,
        })
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }
}

impl Write for StagedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Close for StagedFile {
    fn close(mut self) -> io::Result<()> {
        self.file.sync_data()?;
        fs::rename(&self.tmp_path, &self.target_path)?;
        self.finalized = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.finalized {
            if let Err(err) = fs::remove_file(&self.tmp_path) {
                if err.kind() != ErrorKind::NotFound {
                    warn!(
                        path = %self.tmp_path.display(),
                        error = %err,
                        "failed to remove abandoned temporary file"
                    );
                }
            }
        }
    }
}

/// Returns `true` if `file_name` has the shape of a [StagedFile]'s temporary file name.
pub fn is_tmp_file_name(file_name: &str) -> bool {
    let mut parts = file_name.rsplitn(3, '.');
    let suffix = parts.next();
    let ext = parts.next();
    ext == Some("tmp")
        && parts.next().is_some()
        && suffix.is_some_and(|s| s.len() == TMP_FILE_SUFFIX_ENCODED_LEN)
}

/// Removes the temporary file at `path` unless a [StagedFile] is still writing to it.
///
/// Temporary files are normally removed when their [StagedFile] is closed or dropped, but a
/// process that is killed hard leaves them behind. Returns whether the file was removed.
pub fn remove_if_abandoned(path: &Path) -> io::Result<bool> {
    let is_unlocked = OpenOptions::new()
        .read(true)
        .open(path)
        .and_then(|file_handle| file_handle.try_lock_exclusive())
        .is_ok();
    if is_unlocked {
        match fs::remove_file(path) {
            Ok(()) => return Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    }
    Ok(false)
}
