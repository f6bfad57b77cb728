//! Instruction encoding: parsed statements to 32-bit ARM words, plus
//! literal-pool placement and the final image assembly.
//!
//! Layout shared by every format: condition in bits 31-28, S bit 20, Rn
//! 19-16, Rd 15-12. The interesting work is in the immediate-rotation
//! search, the MOV/MVN (and CMP/CMN, ADD/SUB) rewrites when only the
//! complement or negation of a constant is encodable, and `LDR Rd, =value`
//! slot selection.

use acorn_arm2::{HalfKind, Opcode, PC, ShiftKind};

use crate::error::AsmError;
use crate::parser::{
    DataKind, InstrStmt, MemOffset, MemOperand, Module, OpKind, Operand, Payload, ShiftBy,
    ShiftSpec, bound_value,
};
use crate::pool::{Pool, reachable};
use crate::program::Program;

/// Find the 12-bit immediate field (4-bit rotation, 8-bit value) encoding
/// `value`, if one exists.
#[must_use]
pub(crate) fn dp_immediate(value: u32) -> Option<u32> {
    for r in 0..16u32 {
        let rotated = value.rotate_left(r * 2);
        if rotated <= 0xFF {
            return Some((r << 8) | rotated);
        }
    }
    None
}

/// Encode the whole module into a loadable image.
pub fn encode(module: &mut Module) -> Result<Program, AsmError> {
    let mut program = Program {
        entry: module.entry,
        warnings: std::mem::take(&mut module.warnings),
        ..Program::default()
    };
    let Module { items, pools, symbols, .. } = module;

    for item in items.iter() {
        match &item.payload {
            Payload::Instr(instr) => {
                let word = encode_instr(instr, item.addr, pools.as_mut_slice(), &mut program.warnings)?;
                program.push_bytes(item.addr, &word.to_le_bytes());
            }
            Payload::Data(kind) => {
                let bytes = data_bytes(kind);
                program.push_bytes(item.addr, &bytes);
            }
            Payload::Align { alignment } => {
                let pad = item.addr.next_multiple_of(*alignment) - item.addr;
                program.push_bytes(item.addr, &vec![0u8; pad as usize]);
            }
            Payload::Pool(_) | Payload::Org(_) | Payload::Label(_) => {}
        }
    }

    // Image finalisation: pools get their literal words now that every slot
    // is known.
    for (i, pool) in pools.iter().enumerate() {
        if pool.entries.is_empty() {
            continue;
        }
        let mut bytes = Vec::with_capacity(pool.entries.len() * 4);
        for value in &pool.entries {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        program.push_bytes(pool.addr, &bytes);
        if pool.occupancy() > pool.reserved * 4 {
            program.warnings.push(format!(
                "literal pool {i} occupies {} bytes of a {}-byte reservation",
                pool.occupancy(),
                pool.reserved * 4
            ));
        }
    }

    for sym in symbols.iter() {
        program.symbols.insert(sym.name.clone(), sym.value);
    }
    program.chunks.sort_by_key(|c| c.addr);
    Ok(program)
}

fn data_bytes(kind: &DataKind) -> Vec<u8> {
    match kind {
        DataKind::Word(exprs) => exprs
            .iter()
            .flat_map(|e| (bound_value(e) as u32).to_le_bytes())
            .collect(),
        DataKind::Half(exprs) => exprs
            .iter()
            .flat_map(|e| (bound_value(e) as u16).to_le_bytes())
            .collect(),
        DataKind::Byte(exprs) => exprs.iter().map(|e| bound_value(e) as u8).collect(),
        DataKind::Bytes(b) => b.clone(),
        DataKind::Space(n) => vec![0; *n as usize],
    }
}

fn encode_instr(
    instr: &InstrStmt,
    addr: u32,
    pools: &mut [Pool],
    warnings: &mut Vec<String>,
) -> Result<u32, AsmError> {
    let cond = instr.cond.bits() << 28;
    match instr.kind {
        OpKind::Dp(op) => encode_dp(instr, op, cond),
        OpKind::Mul { accumulate } => encode_mul(instr, accumulate, cond),
        OpKind::MulLong { signed, accumulate } => encode_mul_long(instr, signed, accumulate, cond),
        OpKind::Mem { load, byte } => encode_mem(instr, load, byte, addr, cond, pools, warnings),
        OpKind::MemHalf { load, kind } => encode_mem_half(instr, load, kind, addr, cond),
        OpKind::Block { load, pre_index, up } => encode_block(instr, load, pre_index, up, cond),
        OpKind::Branch { link } => encode_branch(instr, link, addr, cond),
        OpKind::Adr => encode_adr(instr, addr, cond),
        OpKind::Swi => {
            let value = operand_value(instr, 0);
            if !(0..=0x00FF_FFFF).contains(&value) {
                return Err(AsmError::ImmediateRange {
                    pos: instr.pos.clone(),
                    value,
                    what: "SWI number",
                });
            }
            Ok(cond | 0x0F00_0000 | value as u32)
        }
        OpKind::Mrs => {
            let rd = reg_operand(instr, 0);
            Ok(cond | 0x010F_0000 | rd << 12)
        }
        OpKind::Msr => encode_msr(instr, cond),
        OpKind::Nop => Ok(cond | 0x01A0_0000),
    }
}

fn reg_operand(instr: &InstrStmt, idx: usize) -> u32 {
    match instr.operands.get(idx) {
        Some(Operand::Reg(r)) => *r,
        _ => 0,
    }
}

fn operand_value(instr: &InstrStmt, idx: usize) -> i64 {
    match instr.operands.get(idx) {
        Some(Operand::Imm(e) | Operand::Expr(e) | Operand::LoadLiteral(e)) => bound_value(e),
        _ => 0,
    }
}

fn encode_dp(instr: &InstrStmt, op: Opcode, cond: u32) -> Result<u32, AsmError> {
    let s = u32::from(instr.set_flags) << 20;
    let (rd, rn, op2_idx) = if op.is_test() {
        (0, reg_operand(instr, 0), 1)
    } else if op.uses_rn() {
        (reg_operand(instr, 0), reg_operand(instr, 1), 2)
    } else {
        (reg_operand(instr, 0), 0, 1)
    };

    let (op, i_bit, op2_field) = match instr.operands.get(op2_idx) {
        Some(Operand::Imm(e)) => {
            let value = bound_value(e) as u32;
            match dp_immediate(value) {
                Some(field) => (op, 1u32 << 25, field),
                None => {
                    // Try the instruction's complement/negation twin.
                    let (twin, twin_value) = match op {
                        Opcode::Mov => (Opcode::Mvn, !value),
                        Opcode::Mvn => (Opcode::Mov, !value),
                        Opcode::And => (Opcode::Bic, !value),
                        Opcode::Bic => (Opcode::And, !value),
                        Opcode::Cmp => (Opcode::Cmn, value.wrapping_neg()),
                        Opcode::Cmn => (Opcode::Cmp, value.wrapping_neg()),
                        Opcode::Add => (Opcode::Sub, value.wrapping_neg()),
                        Opcode::Sub => (Opcode::Add, value.wrapping_neg()),
                        _ => {
                            return Err(AsmError::ImmediateRange {
                                pos: instr.pos.clone(),
                                value: i64::from(value),
                                what: "immediate",
                            });
                        }
                    };
                    match dp_immediate(twin_value) {
                        Some(field) => (twin, 1 << 25, field),
                        None => {
                            return Err(AsmError::ImmediateRange {
                                pos: instr.pos.clone(),
                                value: i64::from(value),
                                what: "immediate",
                            });
                        }
                    }
                }
            }
        }
        Some(Operand::Op2Reg { rm, shift }) => (op, 0, encode_shifted_rm(instr, *rm, shift.as_ref())?),
        _ => {
            return Err(AsmError::syntax(instr.pos.clone(), "malformed operand 2"));
        }
    };

    Ok(cond | i_bit | op.bits() << 21 | s | rn << 16 | rd << 12 | op2_field)
}

/// Bits 11-0 for a register Operand2.
fn encode_shifted_rm(
    instr: &InstrStmt,
    rm: u32,
    shift: Option<&ShiftSpec>,
) -> Result<u32, AsmError> {
    let Some(spec) = shift else {
        return Ok(rm);
    };
    let kind_bits = spec.kind.bits() << 5;
    match &spec.by {
        ShiftBy::Rrx => Ok(rm | ShiftKind::Ror.bits() << 5),
        ShiftBy::Reg(rs) => Ok(rm | kind_bits | 1 << 4 | rs << 8),
        ShiftBy::Imm(e) => {
            let amount = bound_value(e);
            let field = match (spec.kind, amount) {
                (ShiftKind::Lsl, 0..=31) | (ShiftKind::Ror, 1..=31) => amount as u32,
                // LSR/ASR #32 encode as amount 0.
                (ShiftKind::Lsr | ShiftKind::Asr, 32) => 0,
                (ShiftKind::Lsr | ShiftKind::Asr, 1..=31) => amount as u32,
                // ROR #0 is the RRX encoding.
                (ShiftKind::Ror, 0) => 0,
                (ShiftKind::Lsr | ShiftKind::Asr, 0) => {
                    // A literal zero shift degenerates to LSL #0.
                    return Ok(rm);
                }
                _ => {
                    return Err(AsmError::ImmediateRange {
                        pos: instr.pos.clone(),
                        value: amount,
                        what: "shift amount",
                    });
                }
            };
            Ok(rm | kind_bits | field << 7)
        }
    }
}

fn encode_mul(instr: &InstrStmt, accumulate: bool, cond: u32) -> Result<u32, AsmError> {
    let rd = reg_operand(instr, 0);
    let rm = reg_operand(instr, 1);
    let rs = reg_operand(instr, 2);
    let rn = if accumulate { reg_operand(instr, 3) } else { 0 };
    // ARM2 restriction, caught here so it never reaches execution.
    if rd == rm {
        return Err(AsmError::MultiplyConstraint {
            pos: instr.pos.clone(),
        });
    }
    let a = u32::from(accumulate) << 21;
    let s = u32::from(instr.set_flags) << 20;
    Ok(cond | a | s | rd << 16 | rn << 12 | rs << 8 | 0x90 | rm)
}

fn encode_mul_long(
    instr: &InstrStmt,
    signed: bool,
    accumulate: bool,
    cond: u32,
) -> Result<u32, AsmError> {
    let rd_lo = reg_operand(instr, 0);
    let rd_hi = reg_operand(instr, 1);
    let rm = reg_operand(instr, 2);
    let rs = reg_operand(instr, 3);
    if rd_lo == rd_hi || rd_lo == rm || rd_hi == rm {
        return Err(AsmError::MultiplyConstraint {
            pos: instr.pos.clone(),
        });
    }
    let word = cond
        | 1 << 23
        | u32::from(signed) << 22
        | u32::from(accumulate) << 21
        | u32::from(instr.set_flags) << 20
        | rd_hi << 16
        | rd_lo << 12
        | rs << 8
        | 0x90
        | rm;
    Ok(word)
}

fn encode_branch(instr: &InstrStmt, link: bool, addr: u32, cond: u32) -> Result<u32, AsmError> {
    let target = operand_value(instr, 0) as u32;
    let offset = i64::from(target) - i64::from(addr.wrapping_add(8));
    if offset % 4 != 0 || !(-0x0200_0000..=0x01FF_FFFC).contains(&offset) {
        return Err(AsmError::BranchRange {
            pos: instr.pos.clone(),
            offset,
        });
    }
    let field = ((offset >> 2) as u32) & 0x00FF_FFFF;
    Ok(cond | 0x0A00_0000 | u32::from(link) << 24 | field)
}

/// `ADR Rd, label`: PC-relative ADD or SUB with an encodable immediate.
fn encode_adr(instr: &InstrStmt, addr: u32, cond: u32) -> Result<u32, AsmError> {
    let rd = reg_operand(instr, 0);
    let target = operand_value(instr, 1) as u32;
    let diff = i64::from(target) - i64::from(addr.wrapping_add(8));
    let (op, magnitude) = if diff >= 0 {
        (Opcode::Add, diff as u32)
    } else {
        (Opcode::Sub, diff.unsigned_abs() as u32)
    };
    let field = dp_immediate(magnitude).ok_or(AsmError::ImmediateRange {
        pos: instr.pos.clone(),
        value: diff,
        what: "ADR offset",
    })?;
    Ok(cond | 1 << 25 | op.bits() << 21 | PC << 16 | rd << 12 | field)
}

fn encode_mem(
    instr: &InstrStmt,
    load: bool,
    byte: bool,
    addr: u32,
    cond: u32,
    pools: &mut [Pool],
    warnings: &mut Vec<String>,
) -> Result<u32, AsmError> {
    let rd = reg_operand(instr, 0);
    let base = cond | 0x0400_0000 | u32::from(load) << 20 | u32::from(byte) << 22 | rd << 12;

    match instr.operands.get(1) {
        Some(Operand::Mem(mem)) => encode_mem_address(instr, base, mem),
        // `LDR Rd, label`: PC-relative with the pipeline offset folded in.
        Some(Operand::Expr(e)) => {
            let target = bound_value(e) as u32;
            let diff = i64::from(target) - i64::from(addr.wrapping_add(8));
            pc_relative_word(instr, base, diff)
        }
        Some(Operand::LoadLiteral(e)) => {
            if !load || byte {
                return Err(AsmError::syntax(
                    instr.pos.clone(),
                    "`=value` is only valid with LDR",
                ));
            }
            let value = bound_value(e) as u32;
            encode_load_literal(instr, rd, value, addr, cond, pools, warnings)
        }
        _ => Err(AsmError::syntax(instr.pos.clone(), "expected address")),
    }
}

fn encode_mem_address(instr: &InstrStmt, base: u32, mem: &MemOperand) -> Result<u32, AsmError> {
    let p = u32::from(mem.pre_index) << 24;
    // W is only meaningful pre-indexed; post-indexed writeback is implicit.
    let w = u32::from(mem.pre_index && mem.writeback) << 21;
    let rn = mem.rn << 16;
    match &mem.offset {
        MemOffset::Imm(e) => {
            let value = bound_value(e);
            let (u, magnitude) = offset_sign(value);
            if magnitude > 4095 {
                return Err(AsmError::ImmediateRange {
                    pos: instr.pos.clone(),
                    value,
                    what: "load/store offset",
                });
            }
            Ok(base | p | u << 23 | w | rn | magnitude as u32)
        }
        MemOffset::Reg { rm, up, shift } => {
            let mut field = *rm;
            if let Some((kind, amount_expr)) = shift {
                let amount = bound_value(amount_expr);
                let encoded = match (kind, amount) {
                    (ShiftKind::Lsl, 0..=31) | (ShiftKind::Ror, 0..=31) => amount as u32,
                    (ShiftKind::Lsr | ShiftKind::Asr, 32) => 0,
                    (ShiftKind::Lsr | ShiftKind::Asr, 0..=31) => amount as u32,
                    _ => {
                        return Err(AsmError::ImmediateRange {
                            pos: instr.pos.clone(),
                            value: amount,
                            what: "shift amount",
                        });
                    }
                };
                field |= kind.bits() << 5 | encoded << 7;
            }
            Ok(base | 0x0200_0000 | p | u32::from(*up) << 23 | w | rn | field)
        }
    }
}

fn pc_relative_word(instr: &InstrStmt, base: u32, diff: i64) -> Result<u32, AsmError> {
    let (u, magnitude) = offset_sign(diff);
    if magnitude > 4095 {
        return Err(AsmError::ImmediateRange {
            pos: instr.pos.clone(),
            value: diff,
            what: "PC-relative offset",
        });
    }
    Ok(base | 1 << 24 | u << 23 | PC << 16 | magnitude as u32)
}

fn offset_sign(value: i64) -> (u32, u64) {
    if value >= 0 {
        (1, value as u64)
    } else {
        (0, value.unsigned_abs())
    }
}

fn encode_load_literal(
    instr: &InstrStmt,
    rd: u32,
    value: u32,
    addr: u32,
    cond: u32,
    pools: &mut [Pool],
    warnings: &mut Vec<String>,
) -> Result<u32, AsmError> {
    // Encodable constants never touch a pool.
    if let Some(field) = dp_immediate(value) {
        return Ok(cond | 0x03A0_0000 | rd << 12 | field); // MOV
    }
    if let Some(field) = dp_immediate(!value) {
        return Ok(cond | 0x03E0_0000 | rd << 12 | field); // MVN
    }

    let chosen = choose_pool(pools, value, addr);
    let Some((pool_idx, overflow)) = chosen else {
        return Err(AsmError::NoReachablePool {
            pos: instr.pos.clone(),
            value,
        });
    };
    if overflow {
        warnings.push(format!(
            "{}: literal {value:#010X} forced into an already-full pool",
            instr.pos
        ));
    }
    let slot = pools[pool_idx].place(value);
    let diff = i64::from(slot) - i64::from(addr.wrapping_add(8));
    let base = cond | 0x0400_0000 | 1 << 20 | rd << 12;
    pc_relative_word(instr, base, diff)
}

/// Pick the pool for a literal: the nearest pool whose slot for `value` is
/// within reach. Forward pools (`pool.addr >= pc`, the boundary case
/// included) win distance ties. Pools whose reservation is exhausted are
/// only used as a last resort.
fn choose_pool(pools: &mut [Pool], value: u32, pc: u32) -> Option<(usize, bool)> {
    let mut best: Option<(usize, u64, bool)> = None;
    let mut best_overflow: Option<(usize, u64, bool)> = None;
    for (i, pool) in pools.iter().enumerate() {
        let slot = pool.slot_addr(value);
        if !reachable(slot, pc) {
            continue;
        }
        let distance = u64::from(slot.abs_diff(pc.wrapping_add(8)));
        let forward = crate::pool::is_forward(pool.addr, pc);
        let candidate = (i, distance, forward);
        let entry = if pool.has_room(value) {
            &mut best
        } else {
            &mut best_overflow
        };
        let better = match entry {
            None => true,
            Some((_, d, fwd)) => distance < *d || (distance == *d && forward && !*fwd),
        };
        if better {
            *entry = Some(candidate);
        }
    }
    best.map(|(i, _, _)| (i, false))
        .or_else(|| best_overflow.map(|(i, _, _)| (i, true)))
}

fn encode_mem_half(
    instr: &InstrStmt,
    load: bool,
    kind: HalfKind,
    addr: u32,
    cond: u32,
) -> Result<u32, AsmError> {
    let rd = reg_operand(instr, 0);
    let (s, h) = match kind {
        HalfKind::UnsignedHalf => (0u32, 1u32),
        HalfKind::SignedByte => (1, 0),
        HalfKind::SignedHalf => (1, 1),
    };
    let base = cond | u32::from(load) << 20 | rd << 12 | 1 << 7 | s << 6 | h << 5 | 1 << 4;

    let (rn, p, w, u, imm_offset, reg_offset) = match instr.operands.get(1) {
        Some(Operand::Mem(mem)) => match &mem.offset {
            MemOffset::Imm(e) => {
                let value = bound_value(e);
                let (u, magnitude) = offset_sign(value);
                (mem.rn, mem.pre_index, mem.pre_index && mem.writeback, u, Some(magnitude), None)
            }
            MemOffset::Reg { rm, up, shift } => {
                if shift.is_some() {
                    return Err(AsmError::syntax(
                        instr.pos.clone(),
                        "halfword transfers take unscaled register offsets",
                    ));
                }
                (mem.rn, mem.pre_index, mem.pre_index && mem.writeback, u32::from(*up), None, Some(*rm))
            }
        },
        Some(Operand::Expr(e)) => {
            let target = bound_value(e) as u32;
            let diff = i64::from(target) - i64::from(addr.wrapping_add(8));
            let (u, magnitude) = offset_sign(diff);
            (PC, true, false, u, Some(magnitude), None)
        }
        _ => return Err(AsmError::syntax(instr.pos.clone(), "expected address")),
    };

    let offset_bits = match (imm_offset, reg_offset) {
        (Some(magnitude), None) => {
            if magnitude > 255 {
                return Err(AsmError::ImmediateRange {
                    pos: instr.pos.clone(),
                    value: magnitude as i64,
                    what: "halfword offset",
                });
            }
            let magnitude = magnitude as u32;
            1 << 22 | (magnitude & 0xF0) << 4 | (magnitude & 0xF)
        }
        (None, Some(rm)) => rm,
        _ => unreachable!(),
    };

    Ok(base
        | u32::from(p) << 24
        | u << 23
        | u32::from(w) << 21
        | rn << 16
        | offset_bits)
}

fn encode_block(
    instr: &InstrStmt,
    load: bool,
    pre_index: bool,
    up: bool,
    cond: u32,
) -> Result<u32, AsmError> {
    let rn = reg_operand(instr, 0);
    let Some(Operand::RegList(mask)) = instr.operands.get(1) else {
        return Err(AsmError::syntax(instr.pos.clone(), "expected register list"));
    };
    if *mask == 0 {
        return Err(AsmError::syntax(instr.pos.clone(), "empty register list"));
    }
    let writeback = matches!(instr.operands.get(2), Some(Operand::Writeback));
    Ok(cond
        | 0x0800_0000
        | u32::from(pre_index) << 24
        | u32::from(up) << 23
        | u32::from(writeback) << 21
        | u32::from(load) << 20
        | rn << 16
        | u32::from(*mask))
}

fn encode_msr(instr: &InstrStmt, cond: u32) -> Result<u32, AsmError> {
    let Some(Operand::Psr { flags_only }) = instr.operands.first() else {
        return Err(AsmError::syntax(instr.pos.clone(), "expected CPSR"));
    };
    let mask = if *flags_only { 0x8u32 } else { 0x9 };
    match instr.operands.get(1) {
        Some(Operand::Reg(rm)) => Ok(cond | 0x0120_F000 | mask << 16 | rm),
        Some(Operand::Imm(e)) => {
            let value = bound_value(e) as u32;
            let field = dp_immediate(value).ok_or_else(|| AsmError::ImmediateRange {
                pos: instr.pos.clone(),
                value: i64::from(value),
                what: "immediate",
            })?;
            Ok(cond | 0x0320_F000 | mask << 16 | field)
        }
        _ => Err(AsmError::syntax(instr.pos.clone(), "expected register or `#imm`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_search_finds_rotations() {
        assert_eq!(dp_immediate(0xFF), Some(0x0FF));
        assert_eq!(dp_immediate(0xFF00_0000), Some(0x4FF));
        assert_eq!(dp_immediate(0x0000_8000), Some(0x902));
        assert_eq!(dp_immediate(0x102), None);
        assert_eq!(dp_immediate(0x0001_0001), None);
    }

    #[test]
    fn rotation_prefers_smallest_field() {
        // 0x3F0 can rotate several ways; any valid field must decode back.
        let field = dp_immediate(0x3F0).unwrap();
        let imm = field & 0xFF;
        let rot = (field >> 8) * 2;
        assert_eq!(imm.rotate_right(rot), 0x3F0);
    }
}
