//! The ARM2 CPU: state plus the fetch-decode-execute step.
//!
//! The PC+8 pipeline quirk lives entirely in the operand-read path:
//! `Arm2::reg(15)` returns the current instruction's address plus 8. There is
//! no separate "architectural PC" — `regs.r[15]` holds the address of the
//! instruction being executed, and a write to R15 raises a pending-branch
//! flag that suppresses the default increment at the end of the step.

use std::fmt;

use crate::bus::{Arm2Bus, MemFault};
use crate::decode::{Decoded, UndefinedInstruction};
use crate::execute::{ExecFault, ExecOutcome};
use crate::flags::Cpsr;
use crate::registers::{PC, Registers};

/// What a successfully executed step asks of the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Instruction retired (or its condition failed); carry on.
    Continue,
    /// A SWI retired: dispatch this syscall number, then carry on. The PC
    /// already points at the next instruction.
    Swi(u32),
}

/// A fault that terminates execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuError {
    /// A memory access faulted. `pc` is the instruction that caused it.
    Memory { pc: u32, fault: MemFault },
    /// The fetched word matches no instruction format, or violates a
    /// runtime constraint (MUL with Rd == Rm).
    Undefined { pc: u32, word: u32 },
}

impl fmt::Display for CpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory { pc, fault } => write!(f, "{fault} (pc {pc:#010X})"),
            Self::Undefined { pc, word } => {
                write!(f, "undefined instruction {word:#010X} at {pc:#010X}")
            }
        }
    }
}

impl std::error::Error for CpuError {}

/// ARM2 processor state.
#[derive(Debug, Default)]
pub struct Arm2 {
    /// The architectural registers. `r[15]` holds the address of the
    /// instruction currently executing (no pipeline offset).
    pub regs: Registers,
    /// Condition flags.
    pub cpsr: Cpsr,
    /// Address of the instruction currently executing; backs the PC+8 read.
    pub(crate) instr_addr: u32,
    /// Set by any write to R15 during execution; suppresses PC += 4.
    pub(crate) branched: bool,
    /// Monotonic executed-cycle counter.
    cycles: u64,
}

impl Arm2 {
    /// Create a CPU with all state zeroed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset registers, flags, and the cycle counter.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Operand read of a register. R15 yields the pipeline-visible PC+8.
    #[must_use]
    pub fn reg(&self, idx: u32) -> u32 {
        if idx & 0xF == PC {
            self.instr_addr.wrapping_add(8)
        } else {
            self.regs.get(idx)
        }
    }

    /// Operand write of a register. Writing R15 is a branch.
    pub fn set_reg(&mut self, idx: u32, value: u32) {
        if idx & 0xF == PC {
            // Instruction addresses are word-aligned.
            self.regs.set(PC, value & !3);
            self.branched = true;
        } else {
            self.regs.set(idx, value);
        }
    }

    /// The address the next fetch will use.
    #[must_use]
    pub fn pc(&self) -> u32 {
        self.regs.pc()
    }

    /// Set the fetch address directly (loader / embedder use).
    pub fn set_pc(&mut self, addr: u32) {
        self.regs.set(PC, addr & !3);
    }

    /// Executed-cycle count.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Charge extra cycles (flag-setting surcharge, transfers).
    pub(crate) fn charge(&mut self, n: u64) {
        self.cycles += n;
    }

    /// Fetch, decode, and execute one instruction.
    ///
    /// On success the PC has advanced (or branched) and the cycle counter
    /// has incremented at least once. A `Step::Swi` is returned *after* the
    /// PC has moved past the SWI, so the dispatcher sees the return state.
    pub fn step<B: Arm2Bus>(&mut self, bus: &mut B) -> Result<Step, CpuError> {
        let pc = self.regs.pc();
        self.instr_addr = pc;

        let word = bus.fetch_word(pc).map_err(|fault| CpuError::Memory { pc, fault })?;
        let Decoded { cond, instr } =
            Decoded::decode(word).map_err(|UndefinedInstruction { word }| CpuError::Undefined { pc, word })?;

        self.cycles += 1;

        if !cond.passes(&self.cpsr) {
            self.regs.set(PC, pc.wrapping_add(4));
            return Ok(Step::Continue);
        }

        self.branched = false;
        match self.execute(instr, bus) {
            Ok(ExecOutcome::Done) => {
                if !self.branched {
                    self.regs.set(PC, pc.wrapping_add(4));
                }
                Ok(Step::Continue)
            }
            Ok(ExecOutcome::Swi(n)) => {
                self.regs.set(PC, pc.wrapping_add(4));
                Ok(Step::Swi(n))
            }
            Err(ExecFault::Mem(fault)) => Err(CpuError::Memory { pc, fault }),
            Err(ExecFault::Undefined) => Err(CpuError::Undefined { pc, word }),
        }
    }
}
