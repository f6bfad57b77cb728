//! Per-VM file-descriptor table.
//!
//! Descriptors 0/1/2 are the console and never live here; guest files start
//! at 3. The table sits behind a mutex because diagnostic observers and
//! session teardown may touch it from another thread while the executor
//! owns the VM.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

/// Capacity of one table.
pub const MAX_FDS: usize = 1024;

/// First guest-visible descriptor (0/1/2 are the console).
const FIRST_FD: u32 = 3;

/// Open modes accepted by the OPEN syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    Append,
    ReadWrite,
}

impl OpenMode {
    /// Decode the guest's R1 value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Read,
            1 => Self::Write,
            2 => Self::Append,
            3 => Self::ReadWrite,
            _ => return None,
        })
    }
}

#[derive(Debug, Default)]
struct TableState {
    files: HashMap<u32, File>,
    next_fd: u32,
}

/// The descriptor table.
#[derive(Debug)]
pub struct FdTable {
    state: Mutex<TableState>,
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FdTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TableState {
                files: HashMap::new(),
                next_fd: FIRST_FD,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TableState> {
        // A poisoned table means a observer panicked mid-access; the state
        // itself is just a map and remains usable.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Open `path` and assign a descriptor. `None` when the table is full
    /// or the host open fails.
    pub fn open(&self, path: &Path, mode: OpenMode) -> Option<u32> {
        let file = match mode {
            OpenMode::Read => OpenOptions::new().read(true).open(path),
            OpenMode::Write => OpenOptions::new().write(true).create(true).truncate(true).open(path),
            OpenMode::Append => OpenOptions::new().append(true).create(true).open(path),
            OpenMode::ReadWrite => OpenOptions::new().read(true).write(true).create(true).open(path),
        }
        .ok()?;

        let mut state = self.lock();
        if state.files.len() >= MAX_FDS {
            return None;
        }
        // Skip descriptors still in use after wraparound.
        let mut fd = state.next_fd.max(FIRST_FD);
        while state.files.contains_key(&fd) {
            fd = fd.checked_add(1)?;
        }
        state.next_fd = fd + 1;
        state.files.insert(fd, file);
        Some(fd)
    }

    /// Close a descriptor. `false` for unknown descriptors.
    pub fn close(&self, fd: u32) -> bool {
        self.lock().files.remove(&fd).is_some()
    }

    /// Read up to `len` bytes.
    pub fn read(&self, fd: u32, len: usize) -> io::Result<Vec<u8>> {
        let mut state = self.lock();
        let file = state.files.get_mut(&fd).ok_or(io::ErrorKind::NotFound)?;
        let mut buf = vec![0u8; len];
        let n = file.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Write bytes, returning the count written.
    pub fn write(&self, fd: u32, bytes: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        let file = state.files.get_mut(&fd).ok_or(io::ErrorKind::NotFound)?;
        file.write(bytes)
    }

    /// Seek; whence 0 = set, 1 = current, 2 = end.
    pub fn seek(&self, fd: u32, offset: i64, whence: u32) -> io::Result<u64> {
        let mut state = self.lock();
        let file = state.files.get_mut(&fd).ok_or(io::ErrorKind::NotFound)?;
        let from = match whence {
            0 => SeekFrom::Start(offset.max(0) as u64),
            1 => SeekFrom::Current(offset),
            2 => SeekFrom::End(offset),
            _ => return Err(io::ErrorKind::InvalidInput.into()),
        };
        file.seek(from)
    }

    /// Current position.
    pub fn tell(&self, fd: u32) -> io::Result<u64> {
        let mut state = self.lock();
        let file = state.files.get_mut(&fd).ok_or(io::ErrorKind::NotFound)?;
        file.stream_position()
    }

    /// File size via metadata.
    pub fn size(&self, fd: u32) -> io::Result<u64> {
        let state = self.lock();
        let file = state.files.get(&fd).ok_or(io::ErrorKind::NotFound)?;
        Ok(file.metadata()?.len())
    }

    /// Number of open descriptors (diagnostics).
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.lock().files.len()
    }

    /// Close everything (reset).
    pub fn clear(&self) {
        let mut state = self.lock();
        state.files.clear();
        state.next_fd = FIRST_FD;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn open_read_write_round_trip() {
        let dir = std::env::temp_dir().join(format!("arm2-fds-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("t.bin");

        let table = FdTable::new();
        let fd = table.open(&path, OpenMode::Write).unwrap();
        assert!(fd >= 3);
        assert_eq!(table.write(fd, b"hello").unwrap(), 5);
        assert!(table.close(fd));

        let fd = table.open(&path, OpenMode::Read).unwrap();
        assert_eq!(table.size(fd).unwrap(), 5);
        assert_eq!(table.read(fd, 16).unwrap(), b"hello");
        assert_eq!(table.tell(fd).unwrap(), 5);
        table.seek(fd, 1, 0).unwrap();
        assert_eq!(table.read(fd, 2).unwrap(), b"el");
        assert!(table.close(fd));
        assert!(!table.close(fd));
    }
}
