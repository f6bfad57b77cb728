//! SWI dispatcher.
//!
//! R0-R3 carry arguments, R0 the result; everything else — R4-R11, SP, LR,
//! and the flags — is untouched, which the guest ABI depends on. Handlers
//! report recoverable failures (bad descriptor, I/O error, unparsable
//! input) as the `0xFFFFFFFF` sentinel in R0; sandbox violations and guest
//! memory faults are never converted to sentinels, they halt the VM.

use std::time::{SystemTime, UNIX_EPOCH};

use acorn_arm2::{Arm2Bus, CpuError, MemFault, describe_register};
use rand::Rng;

use crate::files::OpenMode;
use crate::sandbox::SecurityError;
use crate::vm::{Vm, VmError, VmExit};

/// Guest-observable failure sentinel.
pub const SENTINEL: u32 = 0xFFFF_FFFF;

/// Longest NUL-terminated string a syscall will walk, and the per-call cap
/// on READ/WRITE sizes: 1 MiB.
pub const MAX_STRING: u32 = 1 << 20;

/// Syscall numbers.
pub mod nums {
    pub const EXIT: u32 = 0x00;
    pub const WRITE_CHAR: u32 = 0x01;
    pub const WRITE_STRING: u32 = 0x02;
    pub const WRITE_INT: u32 = 0x03;
    pub const READ_CHAR: u32 = 0x04;
    pub const READ_STRING: u32 = 0x05;
    pub const READ_INT: u32 = 0x06;
    pub const WRITE_NEWLINE: u32 = 0x07;

    pub const OPEN: u32 = 0x10;
    pub const CLOSE: u32 = 0x11;
    pub const READ: u32 = 0x12;
    pub const WRITE: u32 = 0x13;
    pub const SEEK: u32 = 0x14;
    pub const TELL: u32 = 0x15;
    pub const FILE_SIZE: u32 = 0x16;
    pub const REMOVE: u32 = 0x17;
    pub const RENAME: u32 = 0x18;

    pub const ALLOCATE: u32 = 0x20;
    pub const FREE: u32 = 0x21;
    pub const REALLOCATE: u32 = 0x22;

    pub const GET_TIME: u32 = 0x30;
    pub const GET_RANDOM: u32 = 0x31;
    pub const SEED_RANDOM: u32 = 0x32;

    pub const ASSERT: u32 = 0x40;
    pub const ASSERT_EQ: u32 = 0x41;

    pub const DEBUG_REGS: u32 = 0xF0;
    pub const DEBUG_MEM: u32 = 0xF1;
    pub const BREAK: u32 = 0xF2;
}

impl Vm {
    pub(crate) fn dispatch_swi(
        &mut self,
        pc: u32,
        number: u32,
    ) -> Result<Option<VmExit>, VmError> {
        let (r0, r1, r2) = (
            self.cpu.regs.get(0),
            self.cpu.regs.get(1),
            self.cpu.regs.get(2),
        );

        match number {
            nums::EXIT => {
                let _ = self.console.flush();
                return Ok(Some(VmExit::Exited(r0)));
            }

            nums::WRITE_CHAR => {
                let _ = self.console.write(&[r0 as u8]);
                let _ = self.console.flush();
            }
            nums::WRITE_STRING => {
                let text = self.guest_string(pc, r0)?;
                let _ = self.console.write(text.as_bytes());
                let _ = self.console.flush();
            }
            nums::WRITE_INT => {
                let _ = self.console.write_int(r0, r1);
                let _ = self.console.flush();
            }
            nums::WRITE_NEWLINE => {
                let _ = self.console.write(b"\n");
                let _ = self.console.flush();
            }
            nums::READ_CHAR => {
                let value = match self.console.read_char() {
                    Ok(Some(byte)) => u32::from(byte),
                    _ => SENTINEL,
                };
                self.cpu.regs.set(0, value);
            }
            nums::READ_STRING => self.sys_read_string(pc, r0, r1)?,
            nums::READ_INT => {
                let value = match self.console.read_line() {
                    Ok(Some(line)) => line
                        .trim()
                        .parse::<i64>()
                        .map_or(SENTINEL, |v| v as u32),
                    _ => SENTINEL,
                };
                self.cpu.regs.set(0, value);
            }

            nums::OPEN => self.sys_open(pc, r0, r1)?,
            nums::CLOSE => {
                let ok = self.files.close(r0);
                self.cpu.regs.set(0, if ok { 0 } else { SENTINEL });
            }
            nums::READ => self.sys_read(pc, r0, r1, r2)?,
            nums::WRITE => self.sys_write(pc, r0, r1, r2)?,
            nums::SEEK => {
                let result = self
                    .files
                    .seek(r0, i64::from(r1 as i32), r2)
                    .map_or(SENTINEL, |p| p as u32);
                self.cpu.regs.set(0, result);
            }
            nums::TELL => {
                let result = self.files.tell(r0).map_or(SENTINEL, |p| p as u32);
                self.cpu.regs.set(0, result);
            }
            nums::FILE_SIZE => {
                let result = self.files.size(r0).map_or(SENTINEL, |s| s as u32);
                self.cpu.regs.set(0, result);
            }
            nums::REMOVE => {
                let path = self.guest_string(pc, r0)?;
                let host = self.resolve_sandboxed(&path)?;
                let result = std::fs::remove_file(host).map_or(SENTINEL, |()| 0);
                self.cpu.regs.set(0, result);
            }
            nums::RENAME => {
                let old = self.guest_string(pc, r0)?;
                let new = self.guest_string(pc, r1)?;
                let old_host = self.resolve_sandboxed(&old)?;
                let new_host = self.resolve_sandboxed(&new)?;
                let result = std::fs::rename(old_host, new_host).map_or(SENTINEL, |()| 0);
                self.cpu.regs.set(0, result);
            }

            nums::ALLOCATE => {
                let addr = self.heap.allocate(r0).unwrap_or(0);
                self.cpu.regs.set(0, addr);
            }
            nums::FREE => {
                let ok = self.heap.free(r0);
                self.cpu.regs.set(0, if ok { 0 } else { SENTINEL });
            }
            nums::REALLOCATE => self.sys_reallocate(pc, r0, r1)?,

            nums::GET_TIME => {
                let millis = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |d| d.as_millis() as u32);
                self.cpu.regs.set(0, millis);
            }
            nums::GET_RANDOM => {
                let value: u32 = self.rng.random();
                self.cpu.regs.set(0, value);
            }
            nums::SEED_RANDOM => {
                self.rng = rand::SeedableRng::seed_from_u64(u64::from(r0));
            }

            nums::ASSERT => {
                if r0 == 0 {
                    let message = if r1 == 0 {
                        "assertion failed".to_string()
                    } else {
                        self.guest_string(pc, r1)?
                    };
                    return Err(VmError::Assertion { pc, message });
                }
            }
            nums::ASSERT_EQ => {
                if r0 != r1 {
                    return Err(VmError::Assertion {
                        pc,
                        message: format!("expected {r1:#010X}, got {r0:#010X}"),
                    });
                }
            }

            nums::DEBUG_REGS => {
                let mut dump = String::new();
                for idx in 0..16 {
                    dump.push_str(&describe_register(idx, self.cpu.regs.get(idx)));
                    dump.push('\n');
                }
                dump.push_str(&format!("CPSR = {}\n", self.cpu.cpsr));
                let _ = self.console.write(dump.as_bytes());
                let _ = self.console.flush();
            }
            nums::DEBUG_MEM => self.sys_debug_mem(r0, r1),
            nums::BREAK => return Ok(Some(VmExit::Breakpoint)),

            _ => return Err(VmError::UnknownSyscall { pc, number }),
        }
        Ok(None)
    }

    /// Read a NUL-terminated guest string, permission-checked byte by byte
    /// and bounded by [`MAX_STRING`].
    fn guest_string(&mut self, pc: u32, addr: u32) -> Result<String, VmError> {
        let mut bytes = Vec::new();
        for i in 0..MAX_STRING {
            let b = self
                .memory
                .read_byte(addr.wrapping_add(i))
                .map_err(|fault| mem_error(pc, fault))?;
            if b == 0 {
                break;
            }
            bytes.push(b);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn resolve_sandboxed(&self, guest_path: &str) -> Result<std::path::PathBuf, VmError> {
        match &self.sandbox {
            Some(sandbox) => Ok(sandbox.resolve(guest_path)?),
            None => Err(VmError::Security(SecurityError {
                path: guest_path.to_string(),
                reason: "no filesystem root configured".to_string(),
            })),
        }
    }

    fn sys_open(&mut self, pc: u32, path_addr: u32, raw_mode: u32) -> Result<(), VmError> {
        let path = self.guest_string(pc, path_addr)?;
        let host = self.resolve_sandboxed(&path)?;
        let Some(mode) = OpenMode::from_raw(raw_mode) else {
            self.cpu.regs.set(0, SENTINEL);
            return Ok(());
        };
        let fd = self.files.open(&host, mode).unwrap_or(SENTINEL);
        self.cpu.regs.set(0, fd);
        Ok(())
    }

    fn sys_read(&mut self, pc: u32, fd: u32, buf: u32, len: u32) -> Result<(), VmError> {
        let len = len.min(MAX_STRING);
        let data = if fd == 0 {
            // Console input bypasses the table.
            let mut data = Vec::with_capacity(len as usize);
            while (data.len() as u32) < len {
                match self.console.read_char() {
                    Ok(Some(b)) => {
                        data.push(b);
                        if b == b'\n' {
                            break;
                        }
                    }
                    _ => break,
                }
            }
            data
        } else {
            match self.files.read(fd, len as usize) {
                Ok(data) => data,
                Err(_) => {
                    self.cpu.regs.set(0, SENTINEL);
                    return Ok(());
                }
            }
        };
        for (i, b) in data.iter().enumerate() {
            self.memory
                .write_byte(buf.wrapping_add(i as u32), *b)
                .map_err(|fault| mem_error(pc, fault))?;
        }
        self.cpu.regs.set(0, data.len() as u32);
        Ok(())
    }

    fn sys_write(&mut self, pc: u32, fd: u32, buf: u32, len: u32) -> Result<(), VmError> {
        let len = len.min(MAX_STRING);
        let mut data = Vec::with_capacity(len as usize);
        for i in 0..len {
            let b = self
                .memory
                .read_byte(buf.wrapping_add(i))
                .map_err(|fault| mem_error(pc, fault))?;
            data.push(b);
        }
        let written = if fd == 1 || fd == 2 {
            let result = self.console.write(&data).and_then(|()| self.console.flush());
            result.map_or(SENTINEL, |()| data.len() as u32)
        } else {
            self.files
                .write(fd, &data)
                .map_or(SENTINEL, |n| n as u32)
        };
        self.cpu.regs.set(0, written);
        Ok(())
    }

    fn sys_read_string(&mut self, pc: u32, buf: u32, max_len: u32) -> Result<(), VmError> {
        if max_len == 0 {
            self.cpu.regs.set(0, SENTINEL);
            return Ok(());
        }
        let Ok(Some(line)) = self.console.read_line() else {
            self.cpu.regs.set(0, SENTINEL);
            return Ok(());
        };
        let bytes = line.as_bytes();
        let count = bytes.len().min(max_len as usize - 1);
        for (i, b) in bytes[..count].iter().enumerate() {
            self.memory
                .write_byte(buf.wrapping_add(i as u32), *b)
                .map_err(|fault| mem_error(pc, fault))?;
        }
        self.memory
            .write_byte(buf.wrapping_add(count as u32), 0)
            .map_err(|fault| mem_error(pc, fault))?;
        self.cpu.regs.set(0, count as u32);
        Ok(())
    }

    fn sys_reallocate(&mut self, pc: u32, old_addr: u32, new_size: u32) -> Result<(), VmError> {
        // NULL old block: plain allocation.
        if old_addr == 0 {
            let addr = self.heap.allocate(new_size).unwrap_or(0);
            self.cpu.regs.set(0, addr);
            return Ok(());
        }
        // Zero new size: free, return NULL.
        if new_size == 0 {
            self.heap.free(old_addr);
            self.cpu.regs.set(0, 0);
            return Ok(());
        }
        let Some(old_size) = self.heap.size_of(old_addr) else {
            self.cpu.regs.set(0, 0);
            return Ok(());
        };
        let Some(new_addr) = self.heap.allocate(new_size) else {
            // Old block stays live; the caller keeps its data.
            self.cpu.regs.set(0, 0);
            return Ok(());
        };
        // Copy through the permission-checked byte interface.
        let count = old_size.min(new_size);
        for i in 0..count {
            let b = match self.memory.read_byte(old_addr + i) {
                Ok(b) => b,
                Err(fault) => {
                    self.heap.free(new_addr);
                    return Err(mem_error(pc, fault));
                }
            };
            if let Err(fault) = self.memory.write_byte(new_addr + i, b) {
                self.heap.free(new_addr);
                return Err(mem_error(pc, fault));
            }
        }
        self.heap.free(old_addr);
        self.cpu.regs.set(0, new_addr);
        Ok(())
    }

    fn sys_debug_mem(&mut self, addr: u32, len: u32) {
        let len = len.min(4096);
        let mut dump = String::new();
        for row in 0..len.div_ceil(16) {
            let base = addr.wrapping_add(row * 16);
            dump.push_str(&format!("{base:#010X}:"));
            for i in 0..16u32 {
                if row * 16 + i >= len {
                    break;
                }
                match self.memory.peek_byte(base.wrapping_add(i)) {
                    Some(b) => dump.push_str(&format!(" {b:02X}")),
                    None => dump.push_str(" ??"),
                }
            }
            dump.push('\n');
        }
        let _ = self.console.write(dump.as_bytes());
        let _ = self.console.flush();
    }
}

fn mem_error(pc: u32, fault: MemFault) -> VmError {
    VmError::Cpu(CpuError::Memory { pc, fault })
}
