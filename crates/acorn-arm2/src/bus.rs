//! Memory bus trait the CPU core executes against.
//!
//! The core never touches memory directly; the embedding machine supplies an
//! `Arm2Bus` that enforces its own segmentation, permissions, and alignment
//! rules. Every access is fallible: a returned `MemFault` aborts the current
//! instruction and surfaces through the executor.
//!
//! Instruction fetches go through `fetch_word` rather than `read_word` so
//! the bus can demand execute permission for fetches and read permission for
//! data.

use std::fmt;

/// What kind of access faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Instruction fetch.
    Fetch,
    /// Data read.
    Read,
    /// Data write.
    Write,
}

impl Access {
    /// Lower-case name for messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

/// Why an access faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// No segment contains the address.
    Unmapped,
    /// The containing segment lacks the required permission.
    Permission,
    /// The address is not aligned for the access width.
    Misaligned,
    /// The access runs past the end of the segment or wraps the 32-bit
    /// address space.
    Wraparound,
}

impl FaultKind {
    /// Short name for messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unmapped => "unmapped address",
            Self::Permission => "permission denied",
            Self::Misaligned => "misaligned access",
            Self::Wraparound => "address range overflow",
        }
    }
}

/// A failed memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemFault {
    /// Why the access was rejected.
    pub kind: FaultKind,
    /// The faulting address.
    pub addr: u32,
    /// What the CPU was doing.
    pub access: Access,
}

impl MemFault {
    /// Build a fault record.
    #[must_use]
    pub const fn new(kind: FaultKind, addr: u32, access: Access) -> Self {
        Self { kind, addr, access }
    }
}

impl fmt::Display for MemFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {} at {:#010X}",
            self.kind.name(),
            self.access.name(),
            self.addr
        )
    }
}

impl std::error::Error for MemFault {}

/// Memory interface for the ARM2 core. Little-endian throughout.
pub trait Arm2Bus {
    /// Fetch an instruction word. Requires execute permission and 4-byte
    /// alignment.
    fn fetch_word(&mut self, addr: u32) -> Result<u32, MemFault>;

    /// Read a data word. 4-byte aligned.
    fn read_word(&mut self, addr: u32) -> Result<u32, MemFault>;

    /// Write a data word. 4-byte aligned.
    fn write_word(&mut self, addr: u32, value: u32) -> Result<(), MemFault>;

    /// Read a halfword. 2-byte aligned.
    fn read_half(&mut self, addr: u32) -> Result<u16, MemFault>;

    /// Write a halfword. 2-byte aligned.
    fn write_half(&mut self, addr: u32, value: u16) -> Result<(), MemFault>;

    /// Read a byte.
    fn read_byte(&mut self, addr: u32) -> Result<u8, MemFault>;

    /// Write a byte.
    fn write_byte(&mut self, addr: u32, value: u8) -> Result<(), MemFault>;
}
