//! Instruction execution.
//!
//! One method per format family, all operating on `Arm2` state through the
//! operand accessors (so every R15 read picks up the +8 pipeline offset) and
//! touching memory only through the bus. Writeback ordering follows the
//! hardware: base writeback happens before the destination register is
//! written, so a load into the base register wins.

use crate::alu;
use crate::bus::{Arm2Bus, MemFault};
use crate::cpu::Arm2;
use crate::decode::{
    HalfKind, HalfOffset, Instruction, MsrSource, Opcode, Operand2, ShiftAmount, TransferOffset,
};
use crate::registers::{LR, PC};
use crate::shifter;

/// How an executed instruction hands control back to the step loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecOutcome {
    /// Retired normally.
    Done,
    /// SWI with this comment field: the embedder dispatches it.
    Swi(u32),
}

/// Why execution of one instruction aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecFault {
    /// A data access faulted.
    Mem(MemFault),
    /// Runtime constraint violation (MUL/MLA with Rd == Rm).
    Undefined,
}

impl From<MemFault> for ExecFault {
    fn from(fault: MemFault) -> Self {
        Self::Mem(fault)
    }
}

impl Arm2 {
    pub(crate) fn execute<B: Arm2Bus>(
        &mut self,
        instr: Instruction,
        bus: &mut B,
    ) -> Result<ExecOutcome, ExecFault> {
        match instr {
            Instruction::DataProcessing { op, set_flags, rn, rd, op2 } => {
                self.exec_data_processing(op, set_flags, rn, rd, op2);
                Ok(ExecOutcome::Done)
            }
            Instruction::Multiply { accumulate, set_flags, rd, rn, rs, rm } => {
                self.exec_multiply(accumulate, set_flags, rd, rn, rs, rm)
            }
            Instruction::MultiplyLong { signed, accumulate, set_flags, rd_hi, rd_lo, rs, rm } => {
                self.exec_multiply_long(signed, accumulate, set_flags, rd_hi, rd_lo, rs, rm);
                Ok(ExecOutcome::Done)
            }
            Instruction::SingleTransfer { load, byte, pre_index, up, writeback, rn, rd, offset } => {
                self.exec_single_transfer(bus, load, byte, pre_index, up, writeback, rn, rd, offset)?;
                Ok(ExecOutcome::Done)
            }
            Instruction::HalfTransfer { load, kind, pre_index, up, writeback, rn, rd, offset } => {
                self.exec_half_transfer(bus, load, kind, pre_index, up, writeback, rn, rd, offset)?;
                Ok(ExecOutcome::Done)
            }
            Instruction::BlockTransfer { load, pre_index, up, writeback, rn, regs } => {
                self.exec_block_transfer(bus, load, pre_index, up, writeback, rn, regs)?;
                Ok(ExecOutcome::Done)
            }
            Instruction::Branch { link, offset } => {
                if link {
                    self.set_reg(LR, self.regs.pc().wrapping_add(4));
                }
                let target = self.reg(PC).wrapping_add_signed(offset);
                self.set_reg(PC, target);
                Ok(ExecOutcome::Done)
            }
            Instruction::Mrs { rd } => {
                self.set_reg(rd, self.cpsr.pack());
                Ok(ExecOutcome::Done)
            }
            Instruction::Msr { src } => {
                let value = match src {
                    MsrSource::Reg(rm) => self.reg(rm),
                    MsrSource::Imm(v) => v,
                };
                self.cpsr.unpack(value);
                Ok(ExecOutcome::Done)
            }
            Instruction::Swi { comment } => Ok(ExecOutcome::Swi(comment)),
        }
    }

    /// Resolve an Operand2 to `(value, shifter_carry_out)`.
    fn operand2(&self, op2: Operand2) -> (u32, bool) {
        match op2 {
            Operand2::Immediate { imm, rotate } => shifter::rotate_imm(imm, rotate, self.cpsr.c),
            Operand2::Register { rm, shift, amount } => {
                let value = self.reg(rm);
                match amount {
                    ShiftAmount::Imm(n) => shifter::shift_imm(value, shift, n, self.cpsr.c),
                    ShiftAmount::Reg(rs) => {
                        shifter::shift_reg(value, shift, self.reg(rs) & 0xFF, self.cpsr.c)
                    }
                }
            }
        }
    }

    fn exec_data_processing(&mut self, op: Opcode, set_flags: bool, rn: u32, rd: u32, op2: Operand2) {
        let (op2_val, shifter_carry) = self.operand2(op2);
        let op1 = if op.uses_rn() { self.reg(rn) } else { 0 };
        let carry_in = self.cpsr.c;

        // (result, carry, overflow); logical ops report the shifter carry
        // and leave V untouched (signalled here by echoing the old V).
        let old_v = self.cpsr.v;
        let (result, carry, overflow) = match op {
            Opcode::And | Opcode::Tst => (op1 & op2_val, shifter_carry, old_v),
            Opcode::Eor | Opcode::Teq => (op1 ^ op2_val, shifter_carry, old_v),
            Opcode::Orr => (op1 | op2_val, shifter_carry, old_v),
            Opcode::Bic => (op1 & !op2_val, shifter_carry, old_v),
            Opcode::Mov => (op2_val, shifter_carry, old_v),
            Opcode::Mvn => (!op2_val, shifter_carry, old_v),
            Opcode::Sub | Opcode::Cmp => alu::sub(op1, op2_val),
            Opcode::Rsb => alu::sub(op2_val, op1),
            Opcode::Add | Opcode::Cmn => alu::add(op1, op2_val),
            Opcode::Adc => alu::adc(op1, op2_val, carry_in),
            Opcode::Sbc => alu::sbc(op1, op2_val, carry_in),
            Opcode::Rsc => alu::sbc(op2_val, op1, carry_in),
        };

        if !op.is_test() {
            self.set_reg(rd, result);
        }

        // Test ops have S set in their encoding, so set_flags covers both.
        if set_flags {
            self.cpsr.set_nz(result);
            self.cpsr.c = carry;
            self.cpsr.v = overflow;
            // Flag evaluation costs an extra cycle on this core; PSR
            // transfers are exempt (they are not data processing).
            self.charge(1);
        }
    }

    fn exec_multiply(
        &mut self,
        accumulate: bool,
        set_flags: bool,
        rd: u32,
        rn: u32,
        rs: u32,
        rm: u32,
    ) -> Result<ExecOutcome, ExecFault> {
        // ARM2 constraint: the destination must differ from Rm. The
        // assembler rejects this; encountering it in a raw image is an
        // undefined instruction.
        if rd == rm {
            return Err(ExecFault::Undefined);
        }
        let mut result = self.reg(rm).wrapping_mul(self.reg(rs));
        if accumulate {
            result = result.wrapping_add(self.reg(rn));
        }
        self.set_reg(rd, result);
        if set_flags {
            // N and Z from the result; C unchanged (architecturally
            // unpredictable, this core preserves it); V unchanged.
            self.cpsr.set_nz(result);
            self.charge(1);
        }
        Ok(ExecOutcome::Done)
    }

    fn exec_multiply_long(
        &mut self,
        signed: bool,
        accumulate: bool,
        set_flags: bool,
        rd_hi: u32,
        rd_lo: u32,
        rs: u32,
        rm: u32,
    ) {
        let a = self.reg(rm);
        let b = self.reg(rs);
        let mut product = if signed {
            (i64::from(a as i32)).wrapping_mul(i64::from(b as i32)) as u64
        } else {
            u64::from(a).wrapping_mul(u64::from(b))
        };
        if accumulate {
            let acc = (u64::from(self.reg(rd_hi)) << 32) | u64::from(self.reg(rd_lo));
            product = product.wrapping_add(acc);
        }
        self.set_reg(rd_lo, product as u32);
        self.set_reg(rd_hi, (product >> 32) as u32);
        if set_flags {
            self.cpsr.n = product & (1 << 63) != 0;
            self.cpsr.z = product == 0;
            self.charge(1);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn exec_single_transfer<B: Arm2Bus>(
        &mut self,
        bus: &mut B,
        load: bool,
        byte: bool,
        pre_index: bool,
        up: bool,
        writeback: bool,
        rn: u32,
        rd: u32,
        offset: TransferOffset,
    ) -> Result<(), MemFault> {
        let offset_val = match offset {
            TransferOffset::Imm(n) => n,
            TransferOffset::Register { rm, shift, amount } => {
                // Scaled register offsets use an immediate shift; the carry
                // out is discarded.
                shifter::shift_imm(self.reg(rm), shift, amount, self.cpsr.c).0
            }
        };
        let base = self.reg(rn);
        let indexed = if up {
            base.wrapping_add(offset_val)
        } else {
            base.wrapping_sub(offset_val)
        };
        let addr = if pre_index { indexed } else { base };

        if load {
            let value = if byte {
                u32::from(bus.read_byte(addr)?)
            } else {
                bus.read_word(addr)?
            };
            // Post-index always writes back; pre-index only with `!`.
            if !pre_index || writeback {
                self.set_reg(rn, indexed);
            }
            self.set_reg(rd, value);
        } else {
            let value = self.reg(rd);
            if byte {
                bus.write_byte(addr, value as u8)?;
            } else {
                bus.write_word(addr, value)?;
            }
            if !pre_index || writeback {
                self.set_reg(rn, indexed);
            }
        }
        self.charge(1);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn exec_half_transfer<B: Arm2Bus>(
        &mut self,
        bus: &mut B,
        load: bool,
        kind: HalfKind,
        pre_index: bool,
        up: bool,
        writeback: bool,
        rn: u32,
        rd: u32,
        offset: HalfOffset,
    ) -> Result<(), MemFault> {
        let offset_val = match offset {
            HalfOffset::Imm(n) => n,
            HalfOffset::Reg(rm) => self.reg(rm),
        };
        let base = self.reg(rn);
        let indexed = if up {
            base.wrapping_add(offset_val)
        } else {
            base.wrapping_sub(offset_val)
        };
        let addr = if pre_index { indexed } else { base };

        if load {
            let value = match kind {
                HalfKind::UnsignedHalf => u32::from(bus.read_half(addr)?),
                HalfKind::SignedByte => bus.read_byte(addr)? as i8 as u32,
                HalfKind::SignedHalf => bus.read_half(addr)? as i16 as u32,
            };
            if !pre_index || writeback {
                self.set_reg(rn, indexed);
            }
            self.set_reg(rd, value);
        } else {
            bus.write_half(addr, self.reg(rd) as u16)?;
            if !pre_index || writeback {
                self.set_reg(rn, indexed);
            }
        }
        self.charge(1);
        Ok(())
    }

    fn exec_block_transfer<B: Arm2Bus>(
        &mut self,
        bus: &mut B,
        load: bool,
        pre_index: bool,
        up: bool,
        writeback: bool,
        rn: u32,
        regs: u16,
    ) -> Result<(), MemFault> {
        let count = u32::from(regs.count_ones());
        let base = self.reg(rn);

        // Lowest register goes to the lowest address regardless of the
        // addressing mode; compute the bottom of the block, then walk up.
        let (start, final_base) = if up {
            let start = if pre_index { base.wrapping_add(4) } else { base };
            (start, base.wrapping_add(4 * count))
        } else {
            let bottom = base.wrapping_sub(4 * count);
            let start = if pre_index { bottom } else { bottom.wrapping_add(4) };
            (start, bottom)
        };

        let mut addr = start;
        if load {
            let mut loaded = [0u32; 16];
            for idx in 0..16 {
                if regs & (1 << idx) != 0 {
                    loaded[idx as usize] = bus.read_word(addr)?;
                    addr = addr.wrapping_add(4);
                }
            }
            // Writeback first: a loaded base register wins over writeback.
            if writeback && regs & (1 << rn) == 0 {
                self.set_reg(rn, final_base);
            }
            for idx in 0..16 {
                if regs & (1 << idx) != 0 {
                    self.set_reg(idx, loaded[idx as usize]);
                }
            }
        } else {
            for idx in 0..16 {
                if regs & (1 << idx) != 0 {
                    bus.write_word(addr, self.reg(idx))?;
                    addr = addr.wrapping_add(4);
                }
            }
            if writeback {
                self.set_reg(rn, final_base);
            }
        }
        self.charge(u64::from(count.max(1)));
        Ok(())
    }
}
