//! Crash-safe file replacement
//!
//! Content is written to a uniquely named temporary file next to the
//! target and renamed over it on [`AtomicFile::commit`]. Readers only ever
//! see the previous file or the complete new one.
//!
//! The temporary file is created owner-only, and the requested mode is
//! applied before the first byte is written, so secrets never sit on disk
//! with wider permissions. Dropping an uncommitted `AtomicFile` removes the
//! temporary file and leaves the target untouched.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;

/// Writable handle for an atomic replacement of `target`
#[derive(Debug)]
pub struct AtomicFile {
    temp: NamedTempFile,
    target: PathBuf,
}

impl AtomicFile {
    /// Start replacing `path`, optionally with the given permission bits
    pub fn create(path: impl AsRef<Path>, mode: Option<u32>) -> io::Result<Self> {
        let target = path.as_ref().to_path_buf();
        let file_name = target.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no file name", target.display()),
            )
        })?;
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        // Same directory as the target, so the rename never crosses filesystems
        let prefix = format!(".{}.", file_name.to_string_lossy());
        let temp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = mode {
                temp.as_file()
                    .set_permissions(fs::Permissions::from_mode(mode))?;
            }
        }
        #[cfg(not(unix))]
        let _ = mode;

        Ok(Self { temp, target })
    }

    /// Path of the temporary file being written
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Path that will be replaced on commit
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Flush, fsync and rename over the target
    pub fn commit(mut self) -> io::Result<()> {
        self.temp.as_file_mut().flush()?;
        self.temp.as_file().sync_all()?;
        self.temp.persist(&self.target).map_err(|e| e.error)?;
        Ok(())
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.temp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.flush()
    }
}

/// Atomically replace `path` with `contents`
pub fn write_atomic(path: impl AsRef<Path>, contents: &[u8], mode: Option<u32>) -> io::Result<()> {
    let mut file = AtomicFile::create(path, mode)?;
    file.write_all(contents)?;
    file.commit()
}

/// Atomically replace `path` with pretty-printed, key-sorted JSON
pub fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T, mode: Option<u32>) -> io::Result<()> {
    // Round-trip through Value so map keys come out sorted
    let value = serde_json::to_value(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut contents = serde_json::to_vec_pretty(&value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    contents.push(b'\n');
    write_atomic(path, &contents, mode)
}
