//! Segmented-memory behaviour through the bus interface.

use acorn_arm2::{Access, Arm2Bus, FaultKind};
use emu_arm2::{CODE_BASE, DATA_BASE, Memory, Perms};

#[test]
fn default_layout_enforces_permissions() {
    let mut memory = Memory::with_default_layout(CODE_BASE);
    // DATA is read/write but not executable.
    memory.write_word(DATA_BASE, 0xDEAD_BEEF).unwrap();
    assert_eq!(memory.read_word(DATA_BASE).unwrap(), 0xDEAD_BEEF);
    let err = memory.fetch_word(DATA_BASE).unwrap_err();
    assert_eq!(err.kind, FaultKind::Permission);

    // CODE is readable and executable but not writable.
    let err = memory.write_word(CODE_BASE, 1).unwrap_err();
    assert_eq!(err.kind, FaultKind::Permission);
    assert_eq!(err.access, Access::Write);
}

#[test]
fn unmapped_addresses_fault() {
    let mut memory = Memory::with_default_layout(CODE_BASE);
    let err = memory.read_word(0x0000_0000).unwrap_err();
    assert_eq!(err.kind, FaultKind::Unmapped);
    let err = memory.read_byte(0xF000_0000).unwrap_err();
    assert_eq!(err.kind, FaultKind::Unmapped);
}

#[test]
fn alignment_is_enforced_per_width() {
    let mut memory = Memory::with_default_layout(CODE_BASE);
    assert_eq!(memory.read_word(DATA_BASE + 2).unwrap_err().kind, FaultKind::Misaligned);
    assert_eq!(memory.read_half(DATA_BASE + 1).unwrap_err().kind, FaultKind::Misaligned);
    // Bytes have no alignment requirement.
    assert!(memory.read_byte(DATA_BASE + 1).is_ok());
    // Halves at even addresses are fine.
    memory.write_half(DATA_BASE + 2, 0x1234).unwrap();
    assert_eq!(memory.read_half(DATA_BASE + 2).unwrap(), 0x1234);
}

#[test]
fn word_access_cannot_leave_the_segment() {
    let mut memory = Memory::new();
    memory.map_segment("TINY", 0x1000, 0x10, Perms::RW).unwrap();
    // Word starting 2 bytes before the end exits the segment.
    memory.write_word(0x100C, 1).unwrap();
    let err = memory.validate_access(0x100E, 4, Perms::R, Access::Read).unwrap_err();
    assert_eq!(err.kind, FaultKind::Wraparound);
}

#[test]
fn little_endian_byte_order() {
    let mut memory = Memory::with_default_layout(CODE_BASE);
    memory.write_word(DATA_BASE, 0x1122_3344).unwrap();
    assert_eq!(memory.read_byte(DATA_BASE).unwrap(), 0x44);
    assert_eq!(memory.read_byte(DATA_BASE + 3).unwrap(), 0x11);
    assert_eq!(memory.read_half(DATA_BASE).unwrap(), 0x3344);
}

#[test]
fn overlapping_segments_are_refused() {
    let mut memory = Memory::with_default_layout(CODE_BASE);
    assert!(memory.map_segment("CLASH", DATA_BASE + 0x100, 0x100, Perms::RW).is_err());
    assert!(memory.map_segment("OK", 0x7000_0000, 0x1000, Perms::RW).is_ok());
}

#[test]
fn peek_never_faults() {
    let memory = Memory::with_default_layout(CODE_BASE);
    assert_eq!(memory.peek_byte(0xDEAD_0000), None);
    assert_eq!(memory.peek_byte(DATA_BASE), Some(0));
}
