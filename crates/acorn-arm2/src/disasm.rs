//! Disassembler: decoded instructions back to canonical assembly syntax.
//!
//! Used by the execution-trace hook and by error reports. Output uses the
//! same syntax the assembler accepts, so a trace can be reassembled.

use std::fmt;

use crate::decode::{
    Decoded, HalfKind, HalfOffset, Instruction, MsrSource, Operand2, ShiftAmount, TransferOffset,
};
use crate::registers::reg_name;
use crate::shifter::ShiftKind;

impl fmt::Display for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cond = self.cond.suffix();
        match self.instr {
            Instruction::DataProcessing { op, set_flags, rn, rd, op2 } => {
                let s = if set_flags && !op.is_test() { "S" } else { "" };
                write!(f, "{}{cond}{s} ", op.mnemonic())?;
                if op.is_test() {
                    write!(f, "{}, ", reg_name(rn))?;
                } else {
                    write!(f, "{}, ", reg_name(rd))?;
                    if op.uses_rn() {
                        write!(f, "{}, ", reg_name(rn))?;
                    }
                }
                write_operand2(f, op2)
            }
            Instruction::Multiply { accumulate, set_flags, rd, rn, rs, rm } => {
                let s = if set_flags { "S" } else { "" };
                if accumulate {
                    write!(
                        f,
                        "MLA{cond}{s} {}, {}, {}, {}",
                        reg_name(rd),
                        reg_name(rm),
                        reg_name(rs),
                        reg_name(rn)
                    )
                } else {
                    write!(f, "MUL{cond}{s} {}, {}, {}", reg_name(rd), reg_name(rm), reg_name(rs))
                }
            }
            Instruction::MultiplyLong { signed, accumulate, set_flags, rd_hi, rd_lo, rs, rm } => {
                let mn = match (signed, accumulate) {
                    (false, false) => "UMULL",
                    (false, true) => "UMLAL",
                    (true, false) => "SMULL",
                    (true, true) => "SMLAL",
                };
                let s = if set_flags { "S" } else { "" };
                write!(
                    f,
                    "{mn}{cond}{s} {}, {}, {}, {}",
                    reg_name(rd_lo),
                    reg_name(rd_hi),
                    reg_name(rm),
                    reg_name(rs)
                )
            }
            Instruction::SingleTransfer { load, byte, pre_index, up, writeback, rn, rd, offset } => {
                let mn = if load { "LDR" } else { "STR" };
                let b = if byte { "B" } else { "" };
                write!(f, "{mn}{cond}{b} {}, ", reg_name(rd))?;
                write_address(f, pre_index, up, writeback, rn, &AddrOffset::Single(offset))
            }
            Instruction::HalfTransfer { load, kind, pre_index, up, writeback, rn, rd, offset } => {
                let mn = match (load, kind) {
                    (true, HalfKind::UnsignedHalf) => "LDRH",
                    (true, HalfKind::SignedByte) => "LDRSB",
                    (true, HalfKind::SignedHalf) => "LDRSH",
                    (false, _) => "STRH",
                };
                // Condition sits before the width suffix: LDREQH.
                let (base, width) = mn.split_at(3);
                write!(f, "{base}{cond}{width} {}, ", reg_name(rd))?;
                write_address(f, pre_index, up, writeback, rn, &AddrOffset::Half(offset))
            }
            Instruction::BlockTransfer { load, pre_index, up, writeback, rn, regs } => {
                let mn = if load { "LDM" } else { "STM" };
                let mode = match (up, pre_index) {
                    (true, false) => "IA",
                    (true, true) => "IB",
                    (false, false) => "DA",
                    (false, true) => "DB",
                };
                let wb = if writeback { "!" } else { "" };
                write!(f, "{mn}{cond}{mode} {}{wb}, {{", reg_name(rn))?;
                let mut first = true;
                for idx in 0..16 {
                    if regs & (1 << idx) != 0 {
                        if !first {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", reg_name(idx))?;
                        first = false;
                    }
                }
                write!(f, "}}")
            }
            Instruction::Branch { link, offset } => {
                let mn = if link { "BL" } else { "B" };
                // Relative form: the caller knows the instruction address.
                if offset >= 0 {
                    write!(f, "{mn}{cond} .+{}", offset + 8)
                } else {
                    write!(f, "{mn}{cond} .{}", offset + 8)
                }
            }
            Instruction::Mrs { rd } => write!(f, "MRS{cond} {}, CPSR", reg_name(rd)),
            Instruction::Msr { src } => match src {
                MsrSource::Reg(rm) => write!(f, "MSR{cond} CPSR, {}", reg_name(rm)),
                MsrSource::Imm(v) => write!(f, "MSR{cond} CPSR_f, #{v:#X}"),
            },
            Instruction::Swi { comment } => write!(f, "SWI{cond} {comment:#X}"),
        }
    }
}

enum AddrOffset {
    Single(TransferOffset),
    Half(HalfOffset),
}

fn write_operand2(f: &mut fmt::Formatter<'_>, op2: Operand2) -> fmt::Result {
    match op2 {
        Operand2::Immediate { imm, rotate } => {
            write!(f, "#{}", imm.rotate_right(rotate))
        }
        Operand2::Register { rm, shift, amount } => {
            write!(f, "{}", reg_name(rm))?;
            match (shift, amount) {
                (ShiftKind::Lsl, ShiftAmount::Imm(0)) => Ok(()),
                (ShiftKind::Ror, ShiftAmount::Imm(0)) => write!(f, ", RRX"),
                (_, ShiftAmount::Imm(n)) => {
                    // LSR/ASR #0 encode a shift by 32.
                    let shown = if n == 0 && matches!(shift, ShiftKind::Lsr | ShiftKind::Asr) {
                        32
                    } else {
                        n
                    };
                    write!(f, ", {} #{shown}", shift.name())
                }
                (_, ShiftAmount::Reg(rs)) => write!(f, ", {} {}", shift.name(), reg_name(rs)),
            }
        }
    }
}

fn write_address(
    f: &mut fmt::Formatter<'_>,
    pre_index: bool,
    up: bool,
    writeback: bool,
    rn: u32,
    offset: &AddrOffset,
) -> fmt::Result {
    let sign = if up { "" } else { "-" };
    let zero = match offset {
        AddrOffset::Single(TransferOffset::Imm(0)) | AddrOffset::Half(HalfOffset::Imm(0)) => true,
        _ => false,
    };
    if pre_index {
        write!(f, "[{}", reg_name(rn))?;
        if !zero {
            write!(f, ", ")?;
            write_offset(f, sign, offset)?;
        }
        write!(f, "]")?;
        if writeback {
            write!(f, "!")?;
        }
        Ok(())
    } else {
        write!(f, "[{}], ", reg_name(rn))?;
        write_offset(f, sign, offset)
    }
}

fn write_offset(f: &mut fmt::Formatter<'_>, sign: &str, offset: &AddrOffset) -> fmt::Result {
    match offset {
        AddrOffset::Single(TransferOffset::Imm(n)) => write!(f, "#{sign}{n}"),
        AddrOffset::Single(TransferOffset::Register { rm, shift, amount }) => {
            write!(f, "{sign}{}", reg_name(*rm))?;
            if !(matches!(shift, ShiftKind::Lsl) && *amount == 0) {
                write!(f, ", {} #{amount}", shift.name())?;
            }
            Ok(())
        }
        AddrOffset::Half(HalfOffset::Imm(n)) => write!(f, "#{sign}{n}"),
        AddrOffset::Half(HalfOffset::Reg(rm)) => write!(f, "{sign}{}", reg_name(*rm)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dis(word: u32) -> String {
        Decoded::decode(word).unwrap().to_string()
    }

    #[test]
    fn data_processing_forms() {
        assert_eq!(dis(0xE3A0_0005), "MOV R0, #5");
        assert_eq!(dis(0xE092_3001), "ADDS R3, R2, R1");
        assert_eq!(dis(0xE153_0002), "CMP R3, R2");
        assert_eq!(dis(0x1355_0001), "CMPNE R5, #1");
    }

    #[test]
    fn transfers() {
        assert_eq!(dis(0xE591_2004), "LDR R2, [R1, #4]");
        assert_eq!(dis(0xE521_2004), "STR R2, [R1, #-4]!");
        assert_eq!(dis(0xE491_2004), "LDR R2, [R1], #4");
        assert_eq!(dis(0xE92D_4003), "STMDB SP!, {R0, R1, LR}");
    }

    #[test]
    fn swi_and_branch() {
        assert_eq!(dis(0xEF00_0000), "SWI 0x0");
        assert_eq!(dis(0xEB00_0001), "BL .+12");
    }
}
