//! Segmented guest memory.
//!
//! Named segments carry base, size, and R/W/X permissions; backing pages are
//! allocated on first touch so a sparse layout (code at 0x8000, stack at
//! 0x40000) costs only what it uses. Every access is validated with two
//! explicit bounds tests per segment — `addr >= start` first, then the
//! distance check — so a low address can never pass against a high-based
//! segment through wrapped subtraction, and the end of a multi-byte access
//! is checked without 32-bit overflow.

use std::collections::HashMap;
use std::fmt;

use acorn_arm2::{Access, Arm2Bus, FaultKind, MemFault};

/// Backing-page granule.
const PAGE_SIZE: u32 = 4096;

/// Segment permission set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Perms(u8);

impl Perms {
    pub const R: Self = Self(1);
    pub const W: Self = Self(2);
    pub const X: Self = Self(4);
    pub const RW: Self = Self(1 | 2);
    pub const RX: Self = Self(1 | 4);

    /// Does this set contain every bit of `req`?
    #[must_use]
    pub const fn allows(self, req: Self) -> bool {
        self.0 & req.0 == req.0
    }

    /// Union of two sets.
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl fmt::Display for Perms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = |bit: Self, ch| if self.allows(bit) { ch } else { '-' };
        write!(f, "{}{}{}", b(Self::R, 'r'), b(Self::W, 'w'), b(Self::X, 'x'))
    }
}

/// A named address range with permissions.
#[derive(Debug, Clone)]
pub struct Segment {
    pub name: String,
    pub start: u32,
    pub size: u32,
    pub perms: Perms,
}

impl Segment {
    /// The two-test containment predicate. Never subtract first: a low
    /// address against a high `start` must fail on the first test.
    #[must_use]
    pub const fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr - self.start < self.size
    }
}

/// Attempt to map a segment overlapping an existing one.
#[derive(Debug)]
pub struct OverlapError {
    pub name: String,
    pub existing: String,
}

impl fmt::Display for OverlapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment {} overlaps {}", self.name, self.existing)
    }
}

impl std::error::Error for OverlapError {}

/// One recorded access, for the diagnostic hook stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemAccess {
    pub access: Access,
    pub addr: u32,
    pub value: u32,
    pub size: u8,
}

/// Canonical layout bases and sizes.
pub const CODE_BASE: u32 = 0x0000_8000;
pub const DATA_BASE: u32 = 0x0002_0000;
pub const HEAP_BASE: u32 = 0x0003_0000;
pub const STACK_BASE: u32 = 0x0004_0000;
pub const SEGMENT_SIZE: u32 = 0x0001_0000;

/// Sparse, segmented, little-endian memory.
#[derive(Debug, Default)]
pub struct Memory {
    segments: Vec<Segment>,
    /// Page index (`addr / PAGE_SIZE`) to backing bytes.
    pages: HashMap<u32, Box<[u8]>>,
    /// Diagnostic event buffer, drained by the VM after each step.
    events: Vec<MemAccess>,
    /// Event recording is off unless a memory hook is installed.
    record: bool,
}

impl Memory {
    /// Empty memory with no segments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The canonical layout: CODE (R+X) at `code_base`, DATA, HEAP, and
    /// STACK (R+W) at their fixed bases, 64 KiB each.
    #[must_use]
    pub fn with_default_layout(code_base: u32) -> Self {
        let mut memory = Self::new();
        // The canonical bases never overlap; `.org` placements that do are
        // caught by map_segment at load time.
        memory
            .map_segment("CODE", code_base, SEGMENT_SIZE, Perms::RX)
            .expect("canonical CODE placement");
        memory
            .map_segment("DATA", DATA_BASE, SEGMENT_SIZE, Perms::RW)
            .expect("canonical DATA placement");
        memory
            .map_segment("HEAP", HEAP_BASE, SEGMENT_SIZE, Perms::RW)
            .expect("canonical HEAP placement");
        memory
            .map_segment("STACK", STACK_BASE, SEGMENT_SIZE, Perms::RW)
            .expect("canonical STACK placement");
        memory
    }

    /// Add a segment. Overlap with an existing segment is refused.
    pub fn map_segment(
        &mut self,
        name: &str,
        start: u32,
        size: u32,
        perms: Perms,
    ) -> Result<(), OverlapError> {
        for seg in &self.segments {
            // Disjoint iff one range ends at or before the other starts;
            // end addresses are computed checked so a segment reaching the
            // top of the space cannot wrap into a false pass.
            let separate = match (start.checked_add(size), seg.start.checked_add(seg.size)) {
                (Some(new_end), Some(old_end)) => new_end <= seg.start || old_end <= start,
                (None, Some(old_end)) => old_end <= start,
                (Some(new_end), None) => new_end <= seg.start,
                (None, None) => false,
            };
            if !separate {
                return Err(OverlapError {
                    name: name.to_string(),
                    existing: seg.name.clone(),
                });
            }
        }
        self.segments.push(Segment {
            name: name.to_string(),
            start,
            size,
            perms,
        });
        Ok(())
    }

    /// Change a named segment's permissions (loader use).
    pub fn set_perms(&mut self, name: &str, perms: Perms) {
        for seg in &mut self.segments {
            if seg.name == name {
                seg.perms = perms;
            }
        }
    }

    /// The mapped segments, for inspection.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Enable or disable access-event recording.
    pub fn set_recording(&mut self, on: bool) {
        self.record = on;
        if !on {
            self.events.clear();
        }
    }

    /// Drain the recorded accesses since the last call.
    pub fn take_events(&mut self) -> Vec<MemAccess> {
        std::mem::take(&mut self.events)
    }

    /// Validate an access of `size` bytes at `addr` needing `req`
    /// permission. `access` only labels the fault.
    pub fn validate_access(
        &self,
        addr: u32,
        size: u32,
        req: Perms,
        access: Access,
    ) -> Result<(), MemFault> {
        debug_assert!(size >= 1);
        let Some(seg) = self.segments.iter().find(|s| s.contains(addr)) else {
            return Err(MemFault::new(FaultKind::Unmapped, addr, access));
        };
        // End-of-access: the last byte must exist, computed without
        // wrapping the 32-bit space.
        let Some(last) = addr.checked_add(size - 1) else {
            return Err(MemFault::new(FaultKind::Wraparound, addr, access));
        };
        if !seg.contains(last) {
            return Err(MemFault::new(FaultKind::Wraparound, addr, access));
        }
        if !seg.perms.allows(req) {
            return Err(MemFault::new(FaultKind::Permission, addr, access));
        }
        Ok(())
    }

    fn check_aligned(addr: u32, alignment: u32, access: Access) -> Result<(), MemFault> {
        if addr % alignment != 0 {
            return Err(MemFault::new(FaultKind::Misaligned, addr, access));
        }
        Ok(())
    }

    // Raw page-level byte access; validation has already happened.

    fn raw_byte(&self, addr: u32) -> u8 {
        self.pages
            .get(&(addr / PAGE_SIZE))
            .map_or(0, |page| page[(addr % PAGE_SIZE) as usize])
    }

    fn raw_set_byte(&mut self, addr: u32, value: u8) {
        let page = self
            .pages
            .entry(addr / PAGE_SIZE)
            .or_insert_with(|| vec![0u8; PAGE_SIZE as usize].into_boxed_slice());
        page[(addr % PAGE_SIZE) as usize] = value;
    }

    fn record_event(&mut self, access: Access, addr: u32, value: u32, size: u8) {
        if self.record {
            self.events.push(MemAccess {
                access,
                addr,
                value,
                size,
            });
        }
    }

    fn read_le(&mut self, addr: u32, size: u32, access: Access) -> Result<u32, MemFault> {
        let req = if access == Access::Fetch { Perms::X } else { Perms::R };
        self.validate_access(addr, size, req, access)?;
        let mut value: u32 = 0;
        for i in 0..size {
            value |= u32::from(self.raw_byte(addr + i)) << (8 * i);
        }
        self.record_event(access, addr, value, size as u8);
        Ok(value)
    }

    fn write_le(&mut self, addr: u32, value: u32, size: u32) -> Result<(), MemFault> {
        self.validate_access(addr, size, Perms::W, Access::Write)?;
        for i in 0..size {
            self.raw_set_byte(addr + i, (value >> (8 * i)) as u8);
        }
        self.record_event(Access::Write, addr, value, size as u8);
        Ok(())
    }

    /// Write a block (loader path; W-checked like any other write).
    pub fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<(), MemFault> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.validate_access(addr, bytes.len() as u32, Perms::W, Access::Write)?;
        for (i, b) in bytes.iter().enumerate() {
            self.raw_set_byte(addr + i as u32, *b);
        }
        Ok(())
    }

    /// Halfword read sign-extended to 32 bits (LDRSH semantics, also
    /// exposed for embedders).
    pub fn read_half_signed(&mut self, addr: u32) -> Result<u32, MemFault> {
        Ok(self.read_half(addr)? as i16 as u32)
    }

    /// Side-effect-free read for observers and debuggers; `None` when the
    /// address is unmapped.
    #[must_use]
    pub fn peek_byte(&self, addr: u32) -> Option<u8> {
        self.segments
            .iter()
            .any(|s| s.contains(addr))
            .then(|| self.raw_byte(addr))
    }

    /// Side-effect-free word read.
    #[must_use]
    pub fn peek_word(&self, addr: u32) -> Option<u32> {
        let mut value = 0u32;
        for i in 0..4 {
            value |= u32::from(self.peek_byte(addr.wrapping_add(i))?) << (8 * i);
        }
        Some(value)
    }

    /// Zero every page (reset); the segment map is kept.
    pub fn clear(&mut self) {
        self.pages.clear();
        self.events.clear();
    }
}

impl Arm2Bus for Memory {
    fn fetch_word(&mut self, addr: u32) -> Result<u32, MemFault> {
        Self::check_aligned(addr, 4, Access::Fetch)?;
        self.read_le(addr, 4, Access::Fetch)
    }

    fn read_word(&mut self, addr: u32) -> Result<u32, MemFault> {
        Self::check_aligned(addr, 4, Access::Read)?;
        self.read_le(addr, 4, Access::Read)
    }

    fn write_word(&mut self, addr: u32, value: u32) -> Result<(), MemFault> {
        Self::check_aligned(addr, 4, Access::Write)?;
        self.write_le(addr, value, 4)
    }

    fn read_half(&mut self, addr: u32) -> Result<u16, MemFault> {
        Self::check_aligned(addr, 2, Access::Read)?;
        Ok(self.read_le(addr, 2, Access::Read)? as u16)
    }

    fn write_half(&mut self, addr: u32, value: u16) -> Result<(), MemFault> {
        Self::check_aligned(addr, 2, Access::Write)?;
        self.write_le(addr, u32::from(value), 2)
    }

    fn read_byte(&mut self, addr: u32) -> Result<u8, MemFault> {
        Ok(self.read_le(addr, 1, Access::Read)? as u8)
    }

    fn write_byte(&mut self, addr: u32, value: u8) -> Result<(), MemFault> {
        self.write_le(addr, u32::from(value), 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_test_predicate_rejects_low_addresses() {
        let seg = Segment {
            name: "HIGH".into(),
            start: 0xFFFF_0000,
            size: 0x2_0000,
            perms: Perms::RW,
        };
        // A naive `addr - start < size` with wrapping arithmetic would
        // accept 0x100 here.
        assert!(!seg.contains(0x0000_0100));
        assert!(seg.contains(0xFFFF_0100));
    }

    #[test]
    fn access_end_cannot_wrap() {
        let mut memory = Memory::new();
        memory.map_segment("HIGH", 0xFFFF_F000, 0x1000, Perms::RW).unwrap();
        // Word starting on the last byte would wrap past 2^32.
        let err = memory.validate_access(0xFFFF_FFFD, 4, Perms::R, Access::Read).unwrap_err();
        assert_eq!(err.kind, FaultKind::Wraparound);
    }
}
