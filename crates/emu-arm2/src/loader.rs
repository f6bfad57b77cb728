//! Program loader: assembled image into guest memory.
//!
//! The CODE segment is made temporarily writable while the image is
//! written through the ordinary permission-checked path, then reverted to
//! R+X. A program whose `.org` moved the code base gets its CODE segment
//! mapped there; the other segments keep their canonical homes.

use arm2_asm::Program;

use crate::memory::{DATA_BASE, HEAP_BASE, Memory, Perms, SEGMENT_SIZE, STACK_BASE};
use crate::vm::VmError;

pub(crate) fn load(memory: &mut Memory, program: &Program) -> Result<(), VmError> {
    // Rebuild the segment map from scratch so a reload never inherits a
    // previous program's relocated CODE placement.
    let code_base = program.origin() & !0xFFF;
    let mut fresh = Memory::new();
    for (name, start, perms) in [
        ("CODE", code_base, Perms::RX),
        ("DATA", DATA_BASE, Perms::RW),
        ("HEAP", HEAP_BASE, Perms::RW),
        ("STACK", STACK_BASE, Perms::RW),
    ] {
        fresh
            .map_segment(name, start, SEGMENT_SIZE, perms)
            .map_err(|e| VmError::Load(e.to_string()))?;
    }
    *memory = fresh;

    memory.set_perms("CODE", Perms::RW.with(Perms::X));
    let result = write_image(memory, program);
    memory.set_perms("CODE", Perms::RX);
    result
}

fn write_image(memory: &mut Memory, program: &Program) -> Result<(), VmError> {
    for chunk in &program.chunks {
        memory
            .write_bytes(chunk.addr, &chunk.bytes)
            .map_err(|fault| {
                VmError::Load(format!(
                    "image chunk at {:#010X} ({} bytes): {fault}",
                    chunk.addr,
                    chunk.bytes.len()
                ))
            })?;
    }
    Ok(())
}
