//! Append-only record log.
//!
//! The log is the single source of truth: a newline-terminated sequence of
//! serialized turns addressed purely by `(offset, length)` byte ranges. Bytes
//! are never rewritten, only extended.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use turnstore_core::AppResult;

/// Log file name inside the storage directory.
pub const LOG_FILE_NAME: &str = "turns.jsonl";

/// Record terminator.
pub const TERMINATOR: u8 = b'\n';

/// Append-only, byte-addressed log file.
#[derive(Debug)]
pub struct RecordLog {
    path: PathBuf,
    writer: Option<File>,
    reader: Option<File>,
    position: u64,
}

impl RecordLog {
    /// Open or create the log in `directory`. Existing content is never truncated.
    ///
    /// A log whose last byte is not a terminator was torn by a crash mid-write;
    /// it is sealed by appending a terminator so later records start on a fresh line.
    pub fn open(directory: &Path) -> AppResult<Self> {
        let path = directory.join(LOG_FILE_NAME);

        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        let reader = File::open(&path)?;
        let position = writer.metadata()?.len();

        let mut log = Self {
            path,
            writer: Some(writer),
            reader: Some(reader),
            position,
        };

        if position > 0 && log.read(position - 1, 1)?[0] != TERMINATOR {
            tracing::warn!(
                "Record log {:?} ends with a torn record at byte {}, sealing it",
                log.path,
                position
            );
            log.write_raw(&[TERMINATOR])?;
        }

        tracing::debug!("Opened record log {:?} at position {}", log.path, log.position);
        Ok(log)
    }

    /// Append `line` plus terminator and return the `(offset, length)` written.
    ///
    /// `offset` is the end of file before the write, `length` counts the terminator.
    /// The data is synced before returning.
    pub fn append(&mut self, line: &str) -> AppResult<(u64, u32)> {
        let mut record = Vec::with_capacity(line.len() + 1);
        record.extend_from_slice(line.as_bytes());
        record.push(TERMINATOR);

        let length = u32::try_from(record.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("record of {} bytes exceeds the u32 length range", record.len()),
            )
        })?;

        let offset = self.write_raw(&record)?;
        Ok((offset, length))
    }

    fn write_raw(&mut self, bytes: &[u8]) -> AppResult<u64> {
        let writer = self.writer.as_mut().ok_or_else(closed_handle)?;
        let offset = self.position;

        writer.write_all(bytes)?;
        writer.sync_data()?;
        self.position += bytes.len() as u64;

        Ok(offset)
    }

    /// Read `[offset, offset + length)` independently of the append cursor.
    pub fn read(&self, offset: u64, length: u32) -> AppResult<Vec<u8>> {
        let end = offset.checked_add(length as u64).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "read range overflows u64")
        })?;

        if end > self.position {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "read of [{}, {}) past end of record log ({} bytes)",
                    offset, end, self.position
                ),
            )
            .into());
        }

        let mut reader = self.reader.as_ref().ok_or_else(closed_handle)?;
        let mut buf = vec![0u8; length as usize];
        reader.seek(SeekFrom::Start(offset))?;
        reader.read_exact(&mut buf)?;

        Ok(buf)
    }

    /// Current end-of-file offset.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the file handles. Safe to call more than once.
    pub fn close(&mut self) -> AppResult<()> {
        if let Some(writer) = self.writer.take() {
            writer.sync_all()?;
        }
        self.reader = None;
        Ok(())
    }
}

fn closed_handle() -> io::Error {
    io::Error::other("record log is closed")
}
