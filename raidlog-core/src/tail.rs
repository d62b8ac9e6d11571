//! Incremental reader for growing log files
//!
//! Tracks one byte offset per file and returns only lines appended since the
//! previous read.
//!
//! # Behavior
//!
//! - **Shared access**: files are opened read-only; the game keeps its write
//!   handle open the whole time (std opens with full share flags on Windows).
//! - **Rotation/truncation**: when a file is shorter than its stored offset,
//!   the offset resets to 0 and the whole current content is returned.
//! - **Incomplete last line**: reading stops before a line that has no
//!   terminator yet. The offset stays at the end of the last complete line, so
//!   the partial line (and any split multi-byte sequence) is re-read whole on
//!   the next pass.
//! - **Errors**: a failed open/read returns `Err` and leaves the offset
//!   untouched, so the next notification retries the same range.

use crate::error::Result;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Per-file byte cursors.
#[derive(Debug, Default)]
pub struct LogTail {
    offsets: HashMap<PathBuf, u64>,
}

impl LogTail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current offset for a file (0 if never seen).
    pub fn offset(&self, path: &Path) -> u64 {
        self.offsets.get(path).copied().unwrap_or(0)
    }

    /// Whether a cursor exists for this file.
    pub fn is_tracked(&self, path: &Path) -> bool {
        self.offsets.contains_key(path)
    }

    /// Set a file's cursor explicitly.
    pub fn seed(&mut self, path: &Path, offset: u64) {
        self.offsets.insert(path.to_path_buf(), offset);
    }

    /// Seed a file's cursor at its current end so existing content is skipped.
    ///
    /// Returns the seeded offset.
    pub fn seed_to_end(&mut self, path: &Path) -> Result<u64> {
        let len = std::fs::metadata(path)?.len();
        self.seed(path, len);
        Ok(len)
    }

    /// Forget every file.
    pub fn clear(&mut self) {
        self.offsets.clear();
    }

    /// Read complete lines appended since the last call.
    ///
    /// Line terminators (`\n` or `\r\n`) are stripped. Invalid UTF-8 is
    /// replaced rather than rejected.
    pub fn read_new_lines(&mut self, path: &Path) -> Result<Vec<String>> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let stored = self.offset(path);

        let start_offset = if file_size < stored {
            tracing::info!(
                path = %path.display(),
                offset = stored,
                file_size,
                "Log file shrank, reading from the beginning"
            );
            0
        } else {
            stored
        };

        if start_offset >= file_size {
            self.seed(path, start_offset);
            return Ok(Vec::new());
        }

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(start_offset))?;

        let mut lines = Vec::new();
        let mut current_offset = start_offset;
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let bytes_read = reader.read_until(b'\n', &mut buf)?;
            if bytes_read == 0 {
                break;
            }
            if buf.last() != Some(&b'\n') {
                // Writer is mid-line; pick it up next time
                break;
            }

            current_offset += bytes_read as u64;

            let mut end = buf.len() - 1;
            if end > 0 && buf[end - 1] == b'\r' {
                end -= 1;
            }
            lines.push(String::from_utf8_lossy(&buf[..end]).into_owned());
        }

        self.seed(path, current_offset);

        tracing::trace!(
            path = %path.display(),
            from = start_offset,
            to = current_offset,
            lines = lines.len(),
            "Read appended log lines"
        );

        Ok(lines)
    }
}
