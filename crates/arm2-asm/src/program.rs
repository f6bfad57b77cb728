//! The assembled program image handed to the loader.

use std::collections::BTreeMap;

/// Default code origin when no `.org` is given.
pub const DEFAULT_ORIGIN: u32 = 0x0000_8000;

/// A contiguous run of bytes at an absolute address.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub addr: u32,
    pub bytes: Vec<u8>,
}

/// A fully assembled, resolved program.
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// Image content, in address order, non-overlapping.
    pub chunks: Vec<Chunk>,
    /// Resolved entry point (`_start`, else `main`, else the first
    /// instruction).
    pub entry: u32,
    /// Final symbol table, sorted by name.
    pub symbols: BTreeMap<String, u32>,
    /// Non-fatal diagnostics (pool occupancy, NV-conditioned code).
    pub warnings: Vec<String>,
}

impl Program {
    /// Lowest address occupied by the image.
    #[must_use]
    pub fn origin(&self) -> u32 {
        self.chunks.iter().map(|c| c.addr).min().unwrap_or(DEFAULT_ORIGIN)
    }

    /// One past the highest address occupied by the image.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.chunks
            .iter()
            .map(|c| c.addr + c.bytes.len() as u32)
            .max()
            .unwrap_or(DEFAULT_ORIGIN)
    }

    /// Append bytes, merging into the previous chunk when contiguous.
    pub(crate) fn push_bytes(&mut self, addr: u32, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if let Some(last) = self.chunks.last_mut() {
            if last.addr + last.bytes.len() as u32 == addr {
                last.bytes.extend_from_slice(bytes);
                return;
            }
        }
        self.chunks.push(Chunk {
            addr,
            bytes: bytes.to_vec(),
        });
    }

    /// Read back an assembled word (tests and the loader's pool checks).
    #[must_use]
    pub fn word_at(&self, addr: u32) -> Option<u32> {
        for chunk in &self.chunks {
            if addr >= chunk.addr && addr + 4 <= chunk.addr + chunk.bytes.len() as u32 {
                let i = (addr - chunk.addr) as usize;
                return Some(u32::from_le_bytes(chunk.bytes[i..i + 4].try_into().ok()?));
            }
        }
        None
    }
}
