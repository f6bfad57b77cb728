//! State-query surface for debuggers and diagnostics.
//!
//! Queries never affect emulation state; they read registers and flags by
//! hierarchical path. Rendering is up to the caller.

use std::fmt;

use crate::cpu::Arm2;
use crate::registers::reg_name;

/// A dynamically-typed value returned from a state query.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean (flags).
    Bool(bool),
    /// 32-bit word (registers, packed CPSR).
    U32(u32),
    /// 64-bit counter (cycles).
    U64(u64),
    /// Free-form text.
    String(String),
    /// Ordered collection (the full register file).
    Array(Vec<Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v:#010X}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::Array(arr) => {
                write!(f, "[")?;
                for (i, v) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// A component whose state can be inspected by path.
pub trait Observable {
    /// Query a property. Returns `None` for unrecognised paths.
    fn query(&self, path: &str) -> Option<Value>;

    /// Every path `query()` recognises.
    fn query_paths(&self) -> &'static [&'static str];
}

const ARM2_PATHS: &[&str] = &[
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "r13", "r14",
    "r15", "sp", "lr", "pc", "regs", "cpsr", "cpsr.n", "cpsr.z", "cpsr.c", "cpsr.v", "cycles",
];

impl Observable for Arm2 {
    fn query(&self, path: &str) -> Option<Value> {
        if let Some(idx) = path.strip_prefix('r').and_then(|n| n.parse::<u32>().ok()) {
            if idx < 16 {
                return Some(Value::U32(self.regs.get(idx)));
            }
            return None;
        }
        match path {
            "sp" => Some(Value::U32(self.regs.sp())),
            "lr" => Some(Value::U32(self.regs.lr())),
            "pc" => Some(Value::U32(self.regs.pc())),
            "regs" => Some(Value::Array(
                (0..16).map(|i| Value::U32(self.regs.get(i))).collect(),
            )),
            "cpsr" => Some(Value::U32(self.cpsr.pack())),
            "cpsr.n" => Some(Value::Bool(self.cpsr.n)),
            "cpsr.z" => Some(Value::Bool(self.cpsr.z)),
            "cpsr.c" => Some(Value::Bool(self.cpsr.c)),
            "cpsr.v" => Some(Value::Bool(self.cpsr.v)),
            "cycles" => Some(Value::U64(self.cycles())),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        ARM2_PATHS
    }
}

/// One line of a register dump, e.g. `R3 = 0x00000078`.
#[must_use]
pub fn describe_register(idx: u32, value: u32) -> String {
    format!("{:<3} = {value:#010X}", reg_name(idx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_registers_and_flags() {
        let mut cpu = Arm2::new();
        cpu.regs.set(3, 0x1234);
        cpu.cpsr.z = true;
        assert_eq!(cpu.query("r3"), Some(Value::U32(0x1234)));
        assert_eq!(cpu.query("cpsr.z"), Some(Value::Bool(true)));
        assert_eq!(cpu.query("r16"), None);
        assert_eq!(cpu.query("bogus"), None);
    }

    #[test]
    fn all_advertised_paths_resolve() {
        let cpu = Arm2::new();
        for path in cpu.query_paths() {
            assert!(cpu.query(path).is_some(), "path {path} did not resolve");
        }
    }
}
