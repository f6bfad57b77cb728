//! Diagnostic observer hooks.
//!
//! The executor invokes these at well-defined points, synchronously on its
//! own thread. Each hook is an `Option`: when absent, the corresponding
//! bookkeeping (disassembly, event recording, snapshot diffing) is skipped
//! entirely, so a VM with no hooks pays nothing.

use crate::memory::MemAccess;

/// Everything the instruction hook sees for one retired instruction.
#[derive(Debug, Clone)]
pub struct InstrRecord {
    /// Address the instruction was fetched from.
    pub addr: u32,
    /// The encoded word.
    pub encoded: u32,
    /// Canonical disassembly.
    pub disasm: String,
    /// Register file before execution.
    pub regs_before: [u32; 16],
    /// Register file after execution.
    pub regs_after: [u32; 16],
    /// Packed CPSR before.
    pub cpsr_before: u32,
    /// Packed CPSR after.
    pub cpsr_after: u32,
}

/// Observer callbacks; install with [`crate::Vm::set_hooks`].
#[derive(Default)]
pub struct ExecHooks {
    /// After each retired instruction.
    pub on_instruction: Option<Box<dyn FnMut(&InstrRecord) + Send>>,
    /// After each data access or fetch, in program order.
    pub on_memory_access: Option<Box<dyn FnMut(&MemAccess) + Send>>,
    /// `(index, old, new)` for each register an instruction changed.
    pub on_register_changed: Option<Box<dyn FnMut(u32, u32, u32) + Send>>,
    /// `(old_cpsr, new_cpsr)` when the packed flags changed.
    pub on_flag_change: Option<Box<dyn FnMut(u32, u32) + Send>>,
    /// Address of each instruction about to execute (coverage).
    pub on_coverage: Option<Box<dyn FnMut(u32) + Send>>,
}

impl ExecHooks {
    /// No hooks installed.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// True when any hook that needs pre/post state is present.
    #[must_use]
    pub(crate) fn wants_snapshots(&self) -> bool {
        self.on_instruction.is_some()
            || self.on_register_changed.is_some()
            || self.on_flag_change.is_some()
    }
}

impl std::fmt::Debug for ExecHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecHooks")
            .field("on_instruction", &self.on_instruction.is_some())
            .field("on_memory_access", &self.on_memory_access.is_some())
            .field("on_register_changed", &self.on_register_changed.is_some())
            .field("on_flag_change", &self.on_flag_change.is_some())
            .field("on_coverage", &self.on_coverage.is_some())
            .finish()
    }
}
