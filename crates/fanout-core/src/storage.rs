//! Output file handle with positional writes.
//!
//! Wraps the destination file of one resource. Safe to clone and use from
//! multiple fetch threads; writes are pwrite-style and do not move a shared
//! cursor, so concurrent writes to disjoint offsets are safe.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

/// Open handle for a single destination path.
///
/// The file closes when the last clone drops; the owning resource drops its
/// clone when the final active segment completes, so callers that want
/// durability call `sync` first.
#[derive(Debug, Clone)]
pub struct OutputFile {
    file: Arc<File>,
    path: PathBuf,
}

impl OutputFile {
    /// Open `path` read+write, creating it if absent (mode 0600 on Unix).
    pub fn open(path: &Path) -> io::Result<Self> {
        let mut options = File::options();
        options.read(true).write(true).create(true);
        #[cfg(unix)]
        options.mode(0o600);
        let file = options.open(path)?;
        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Write all of `data` at `offset`. Returns the number of bytes written
    /// (always `data.len()` on success; short writes surface as errors).
    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<usize> {
        self.file.write_all_at(data, offset)?;
        Ok(data.len())
    }

    /// Non-Unix fallback: seek + write on a cloned descriptor. The clone
    /// keeps the shared handle's cursor untouched.
    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<usize> {
        use std::io::{Seek, SeekFrom, Write};
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(data.len())
    }

    /// Flush file data and metadata to disk.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
