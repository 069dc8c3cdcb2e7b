//! Append-only NDJSON log with mmap-based reads.
//!
//! - [`NdjsonWriter`] opens the file in append mode and writes each record
//!   as one `write_all` of the JSON line plus its newline, then flushes and
//!   syncs. Concurrent writers are serialized by the caller.
//!
//! - [`NdjsonReader`] memory-maps the file. The mapping is a snapshot taken
//!   at [`NdjsonReader::open`]; records appended later are not visible.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

pub struct NdjsonWriter {
    file: File,
    path: PathBuf,
}

impl NdjsonWriter {
    /// Open or create the log file for appending.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { file, path })
    }

    /// Append one value as a single JSON line.
    pub fn append<T: serde::Serialize>(&mut self, value: &T) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(value).map_err(std::io::Error::other)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.flush()?;
        self.file.sync_data()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Memory-mapped snapshot of the log.
pub struct NdjsonReader {
    mmap: Option<Mmap>,
}

impl NdjsonReader {
    /// Map the file's current contents. A missing file reads as empty.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = match File::open(path.as_ref()) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self { mmap: None }),
            Err(e) => return Err(e),
        };
        if file.metadata()?.len() == 0 {
            return Ok(Self { mmap: None });
        }
        // SAFETY: the mapping is only read. The log is append-only, so bytes
        // already written are never modified in place; appends extend the
        // file past this mapping and stay invisible to it.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap: Some(mmap) })
    }

    /// Non-empty lines in file order, without their newline.
    ///
    /// Lines are raw bytes so that a record corrupted into invalid UTF-8 is
    /// still visible to the caller instead of hiding the rest of the file.
    pub fn lines(&self) -> impl Iterator<Item = &[u8]> {
        self.mmap
            .as_deref()
            .unwrap_or_default()
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
    }

    /// Number of records in the snapshot.
    pub fn line_count(&self) -> usize {
        self.lines().count()
    }
}
