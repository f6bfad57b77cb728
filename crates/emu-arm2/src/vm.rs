//! The virtual machine: CPU + memory + syscall state, one instance per
//! guest program.
//!
//! Everything mutable lives on this struct — descriptor table, heap map,
//! RNG, sandbox root, diagnostic buffers — so a process can host any number
//! of VMs without shared state. The run loop adds the embedder-facing
//! controls on top of the CPU's `step`: breakpoints, a cooperative halt
//! flag checked once per instruction, and the cycle budget.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use acorn_arm2::{Arm2, CpuError, Decoded, Step};
use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::config::VmConfig;
use crate::console::Console;
use crate::files::FdTable;
use crate::heap::Heap;
use crate::loader;
use crate::memory::{HEAP_BASE, Memory, SEGMENT_SIZE, STACK_BASE};
use crate::sandbox::{Sandbox, SecurityError};
use crate::trace::{ExecHooks, InstrRecord};

/// Why a run stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmExit {
    /// Guest called EXIT with this code.
    Exited(u32),
    /// The cycle budget was exhausted.
    CycleLimit,
    /// The cooperative halt flag was raised by the embedder.
    Halted,
    /// A breakpoint (or BREAK syscall) was hit; the VM can be resumed.
    Breakpoint,
}

/// A run that terminated abnormally.
#[derive(Debug)]
pub enum VmError {
    /// CPU-level fault: memory error or undefined instruction.
    Cpu(CpuError),
    /// Sandbox violation; never surfaced to the guest.
    Security(SecurityError),
    /// Guest assertion failed.
    Assertion { pc: u32, message: String },
    /// SWI number with no handler.
    UnknownSyscall { pc: u32, number: u32 },
    /// The program image could not be loaded.
    Load(String),
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu(e) => write!(f, "{e}"),
            Self::Security(e) => write!(f, "{e}"),
            Self::Assertion { pc, message } => {
                write!(f, "assertion failed at {pc:#010X}: {message}")
            }
            Self::UnknownSyscall { pc, number } => {
                write!(f, "unknown syscall {number:#X} at {pc:#010X}")
            }
            Self::Load(msg) => write!(f, "load error: {msg}"),
        }
    }
}

impl std::error::Error for VmError {}

impl From<CpuError> for VmError {
    fn from(e: CpuError) -> Self {
        Self::Cpu(e)
    }
}

impl From<SecurityError> for VmError {
    fn from(e: SecurityError) -> Self {
        Self::Security(e)
    }
}

/// A user-mode ARM2 virtual machine.
#[derive(Debug)]
pub struct Vm {
    pub cpu: Arm2,
    pub memory: Memory,
    pub(crate) heap: Heap,
    pub(crate) files: FdTable,
    pub(crate) console: Console,
    pub(crate) rng: SmallRng,
    pub(crate) sandbox: Option<Sandbox>,
    max_cycles: u64,
    halt_flag: Arc<AtomicBool>,
    breakpoints: HashSet<u32>,
    hooks: ExecHooks,
    /// Entry point of the loaded program, for reset.
    entry: u32,
    rng_seed: u64,
}

impl Vm {
    /// Build a VM from configuration, with the given console.
    ///
    /// A configured `filesystem_root` that does not exist is a construction
    /// error: there is no unsandboxed fallback.
    pub fn new(config: &VmConfig, console: Console) -> Result<Self, VmError> {
        let sandbox = match &config.filesystem_root {
            Some(root) => Some(Sandbox::new(root).map_err(|e| {
                VmError::Load(format!("filesystem root {}: {e}", root.display()))
            })?),
            None => None,
        };
        Ok(Self {
            cpu: Arm2::new(),
            memory: Memory::with_default_layout(crate::memory::CODE_BASE),
            heap: Heap::new(HEAP_BASE, SEGMENT_SIZE),
            files: FdTable::new(),
            console,
            rng: SmallRng::seed_from_u64(config.rng_seed),
            sandbox,
            max_cycles: config.max_cycles,
            halt_flag: Arc::new(AtomicBool::new(false)),
            breakpoints: HashSet::new(),
            hooks: ExecHooks::none(),
            entry: crate::memory::CODE_BASE,
            rng_seed: config.rng_seed,
        })
    }

    /// Load an assembled program: map segments around its origin, write the
    /// image, and point PC at the entry with SP at the stack top.
    pub fn load_program(&mut self, program: &arm2_asm::Program) -> Result<(), VmError> {
        loader::load(&mut self.memory, program)?;
        // The loader rebuilds the memory value; re-apply the hook-driven
        // recording flag.
        self.memory.set_recording(self.hooks.on_memory_access.is_some());
        self.entry = program.entry;
        self.cpu.set_pc(program.entry);
        self.cpu.regs.set(acorn_arm2::SP, STACK_BASE + SEGMENT_SIZE);
        Ok(())
    }

    /// Install diagnostic hooks (replacing any previous set).
    pub fn set_hooks(&mut self, hooks: ExecHooks) {
        self.memory.set_recording(hooks.on_memory_access.is_some());
        self.hooks = hooks;
    }

    /// Handle for requesting a cooperative halt from another thread; the
    /// executor honours it within one instruction.
    #[must_use]
    pub fn halt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.halt_flag)
    }

    /// Install a breakpoint before the fetch at `addr`.
    pub fn add_breakpoint(&mut self, addr: u32) {
        self.breakpoints.insert(addr & !3);
    }

    /// Remove a breakpoint.
    pub fn remove_breakpoint(&mut self, addr: u32) {
        self.breakpoints.remove(&(addr & !3));
    }

    /// Reset CPU, memory contents, heap, descriptors, and RNG; the loaded
    /// segment map and entry point survive so the program can be re-run
    /// after `load_program` writes it again.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.memory.clear();
        self.heap.clear();
        self.files.clear();
        self.rng = SmallRng::seed_from_u64(self.rng_seed);
        self.halt_flag.store(false, Ordering::Relaxed);
        self.cpu.set_pc(self.entry);
        self.cpu.regs.set(acorn_arm2::SP, STACK_BASE + SEGMENT_SIZE);
    }

    /// Run until exit, fault, budget exhaustion, halt request, or
    /// breakpoint.
    pub fn run(&mut self) -> Result<VmExit, VmError> {
        let mut first = true;
        loop {
            // Breakpoints fire before the fetch, but not on the resume
            // step, or a hit address could never be stepped past.
            if !first && self.breakpoints.contains(&self.cpu.pc()) {
                return Ok(VmExit::Breakpoint);
            }
            first = false;
            if let Some(exit) = self.step()? {
                return Ok(exit);
            }
        }
    }

    /// Execute one instruction (ignoring breakpoints). `Ok(None)` means the
    /// program is still running.
    pub fn step(&mut self) -> Result<Option<VmExit>, VmError> {
        if self.halt_flag.load(Ordering::Relaxed) {
            return Ok(Some(VmExit::Halted));
        }
        if self.cpu.cycles() >= self.max_cycles {
            return Ok(Some(VmExit::CycleLimit));
        }

        let pc = self.cpu.pc();
        if let Some(hook) = &mut self.hooks.on_coverage {
            hook(pc);
        }

        let snapshots = self.hooks.wants_snapshots();
        let (regs_before, cpsr_before) = if snapshots {
            (self.cpu.regs.r, self.cpu.cpsr.pack())
        } else {
            ([0; 16], 0)
        };

        let step = self.cpu.step(&mut self.memory)?;

        let exit = match step {
            Step::Continue => None,
            Step::Swi(number) => self.dispatch_swi(pc, number)?,
        };

        self.fire_hooks(pc, snapshots, regs_before, cpsr_before);
        Ok(exit)
    }

    fn fire_hooks(&mut self, pc: u32, snapshots: bool, regs_before: [u32; 16], cpsr_before: u32) {
        if self.hooks.on_memory_access.is_some() {
            let events = self.memory.take_events();
            if let Some(hook) = &mut self.hooks.on_memory_access {
                for event in &events {
                    hook(event);
                }
            }
        }
        if !snapshots {
            return;
        }
        let regs_after = self.cpu.regs.r;
        let cpsr_after = self.cpu.cpsr.pack();

        if let Some(hook) = &mut self.hooks.on_register_changed {
            for idx in 0..16u32 {
                let (old, new) = (regs_before[idx as usize], regs_after[idx as usize]);
                if old != new {
                    hook(idx, old, new);
                }
            }
        }
        if let Some(hook) = &mut self.hooks.on_flag_change {
            if cpsr_before != cpsr_after {
                hook(cpsr_before, cpsr_after);
            }
        }
        if let Some(hook) = &mut self.hooks.on_instruction {
            let encoded = self.memory.peek_word(pc).unwrap_or(0);
            let disasm = Decoded::decode(encoded)
                .map_or_else(|_| "<undefined>".to_string(), |d| d.to_string());
            hook(&InstrRecord {
                addr: pc,
                encoded,
                disasm,
                regs_before,
                regs_after,
                cpsr_before,
                cpsr_after,
            });
        }
    }
}
