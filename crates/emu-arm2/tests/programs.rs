//! End-to-end programs: assemble with `arm2-asm`, load, run, observe.

use emu_arm2::{Console, ExecHooks, Vm, VmConfig, VmError, VmExit};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

fn vm_with(source: &str, input: &str) -> (Vm, emu_arm2::OutputHandle) {
    let program = arm2_asm::assemble_str(source, "test.s").expect("assembles");
    let (console, output) = Console::scripted(input);
    let mut vm = Vm::new(&VmConfig::default(), console).expect("vm");
    vm.load_program(&program).expect("loads");
    (vm, output)
}

fn run_to_exit(source: &str, input: &str) -> (Vm, emu_arm2::OutputHandle, u32) {
    let (mut vm, output) = vm_with(source, input);
    match vm.run().expect("run") {
        VmExit::Exited(code) => (vm, output, code),
        other => panic!("expected exit, got {other:?}"),
    }
}

#[test]
fn subtraction_sets_borrow_flags() {
    // 5 - 10: negative result, borrow (C clear), no overflow.
    let src = "_start:\n\
               MOV R0, #5\n\
               MOV R1, #10\n\
               SUBS R2, R0, R1\n\
               SWI #0x00\n";
    let (vm, _, code) = run_to_exit(src, "");
    assert_eq!(code, 5);
    assert_eq!(vm.cpu.regs.get(2), 0xFFFF_FFFB);
    assert!(vm.cpu.cpsr.n);
    assert!(!vm.cpu.cpsr.z);
    assert!(!vm.cpu.cpsr.c);
    assert!(!vm.cpu.cpsr.v);
}

#[test]
fn recursive_factorial_restores_the_stack() {
    let src = "_start:\n\
               MOV R0, #5\n\
               BL fact\n\
               SWI #0x00\n\
               fact:\n\
               CMP R0, #1\n\
               MOVLE R0, #1\n\
               MOVLE PC, LR\n\
               STMFD SP!, {R1, LR}\n\
               MOV R1, R0\n\
               SUB R0, R0, #1\n\
               BL fact\n\
               MUL R0, R1, R0\n\
               LDMFD SP!, {R1, PC}\n";
    let (vm, _, code) = run_to_exit(src, "");
    assert_eq!(code, 120);
    assert_eq!(vm.cpu.regs.sp(), emu_arm2::STACK_BASE + emu_arm2::SEGMENT_SIZE);
}

#[test]
fn fibonacci_prints_the_first_ten() {
    let src = "_start:\n\
               MOV R4, #0\n\
               MOV R5, #1\n\
               MOV R6, #10\n\
               loop:\n\
               MOV R0, R4\n\
               MOV R1, #10\n\
               SWI #0x03\n\
               SWI #0x07\n\
               ADD R2, R4, R5\n\
               MOV R4, R5\n\
               MOV R5, R2\n\
               SUBS R6, R6, #1\n\
               BNE loop\n\
               MOV R0, #0\n\
               SWI #0x00\n";
    let (_, output, code) = run_to_exit(src, "");
    assert_eq!(code, 0);
    assert_eq!(output.text(), "0\n1\n1\n2\n3\n5\n8\n13\n21\n34\n");
}

#[test]
fn literal_pool_program_at_origin_zero_runs() {
    let src = ".org 0x0000\n\
               _start:\n\
               LDR R0, =0x000F0001\n\
               LDR R1, =0x000F0011\n\
               ADD R0, R0, R1\n\
               SWI #0x00\n";
    let (_, _, code) = run_to_exit(src, "");
    assert_eq!(code, 0x000F_0001 + 0x000F_0011);
}

#[test]
fn wraparound_segment_rejects_low_address() {
    // A segment based near the top of the address space must not capture a
    // low pointer through wrapped subtraction.
    let src = "_start:\n\
               MOV R1, #0x100\n\
               LDR R0, [R1]\n\
               SWI #0x00\n";
    let program = arm2_asm::assemble_str(src, "test.s").unwrap();
    let (console, _) = Console::scripted("");
    let mut vm = Vm::new(&VmConfig::default(), console).unwrap();
    vm.load_program(&program).unwrap();
    vm.memory
        .map_segment("HIGH", 0xFFFF_0000, 0x2_0000, emu_arm2::Perms::RW)
        .unwrap();

    match vm.run() {
        Err(VmError::Cpu(acorn_arm2::CpuError::Memory { pc, fault })) => {
            assert_eq!(pc, emu_arm2::CODE_BASE + 4);
            assert_eq!(fault.kind, acorn_arm2::FaultKind::Unmapped);
            assert_eq!(fault.addr, 0x100);
        }
        other => panic!("expected unmapped fault, got {other:?}"),
    }
}

#[test]
fn sandboxed_open_escape_halts() {
    let root = std::env::temp_dir().join(format!("arm2-s5-{}", std::process::id()));
    std::fs::create_dir_all(&root).unwrap();

    let src = "_start:\n\
               ADR R0, path\n\
               MOV R1, #0\n\
               SWI #0x10\n\
               SWI #0x00\n\
               path: .asciz \"../../etc/passwd\"\n";
    let program = arm2_asm::assemble_str(src, "test.s").unwrap();
    let (console, _) = Console::scripted("");
    let config = VmConfig {
        filesystem_root: Some(root),
        ..VmConfig::default()
    };
    let mut vm = Vm::new(&config, console).unwrap();
    vm.load_program(&program).unwrap();

    match vm.run() {
        Err(VmError::Security(e)) => assert!(e.reason.contains("..")),
        other => panic!("expected security halt, got {other:?}"),
    }
}

#[test]
fn file_io_round_trips_inside_the_sandbox() {
    let root = std::env::temp_dir().join(format!("arm2-fileio-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&root);
    std::fs::create_dir_all(&root).unwrap();

    // Write "Hi" to a file, reopen, read it back, exit with the bytes.
    let src = "_start:\n\
               ADR R0, path\n\
               MOV R1, #1\n\
               SWI #0x10\n\
               MOV R4, R0\n\
               ADR R1, msg\n\
               MOV R2, #2\n\
               MOV R0, R4\n\
               SWI #0x13\n\
               MOV R0, R4\n\
               SWI #0x11\n\
               ADR R0, path\n\
               MOV R1, #0\n\
               SWI #0x10\n\
               MOV R4, R0\n\
               SWI #0x16\n\
               MOV R5, R0\n\
               MOV R0, R4\n\
               MOV R1, #0x20000\n\
               MOV R2, #8\n\
               SWI #0x12\n\
               MOV R6, R0\n\
               MOV R1, #0x20000\n\
               LDRB R7, [R1]\n\
               SWI #0x00\n\
               path: .asciz \"out.txt\"\n\
               msg: .ascii \"Hi\"\n";
    let program = arm2_asm::assemble_str(src, "test.s").unwrap();
    let (console, _) = Console::scripted("");
    let config = VmConfig {
        filesystem_root: Some(root.clone()),
        ..VmConfig::default()
    };
    let mut vm = Vm::new(&config, console).unwrap();
    vm.load_program(&program).unwrap();
    assert!(matches!(vm.run(), Ok(VmExit::Exited(_))));

    assert_eq!(vm.cpu.regs.get(5), 2); // FILE_SIZE
    assert_eq!(vm.cpu.regs.get(6), 2); // READ count
    assert_eq!(vm.cpu.regs.get(7), u32::from(b'H'));
    assert_eq!(std::fs::read(root.join("out.txt")).unwrap(), b"Hi");
}

#[test]
fn syscalls_preserve_the_callee_saved_bank() {
    let src = "_start:\n\
               MOV R4, #0x44\n\
               MOV R5, #0x55\n\
               MOV R6, #0x66\n\
               MOV R7, #0x77\n\
               MOV R8, #0x88\n\
               MOV R9, #0x99\n\
               MOV R10, #0xAA\n\
               MOV R11, #0xBB\n\
               MOV LR, #0x40\n\
               CMP R4, R4\n\
               MOV R0, #64\n\
               SWI #0x20\n\
               MOV R0, #7\n\
               MOV R1, #10\n\
               SWI #0x03\n\
               SWI #0x31\n\
               MOV R0, #0\n\
               SWI #0x00\n";
    let (vm, _, _) = run_to_exit(src, "");
    for (idx, want) in [(4u32, 0x44u32), (5, 0x55), (6, 0x66), (7, 0x77), (8, 0x88), (9, 0x99), (10, 0xAA), (11, 0xBB)] {
        assert_eq!(vm.cpu.regs.get(idx), want, "R{idx} across SWIs");
    }
    assert_eq!(vm.cpu.regs.lr(), 0x40);
    assert_eq!(vm.cpu.regs.sp(), emu_arm2::STACK_BASE + emu_arm2::SEGMENT_SIZE);
    // CMP R4, R4 left Z and C; the syscalls must not have touched them.
    assert!(vm.cpu.cpsr.z);
    assert!(vm.cpu.cpsr.c);
}

#[test]
fn scripted_input_feeds_read_syscalls() {
    let src = "_start:\n\
               SWI #0x06\n\
               MOV R4, R0\n\
               MOV R6, #0x20000\n\
               MOV R0, R6\n\
               MOV R1, #16\n\
               SWI #0x05\n\
               MOV R5, R0\n\
               LDRB R7, [R6]\n\
               SWI #0x00\n";
    let (vm, _, _) = run_to_exit(src, "42\nhi\n");
    assert_eq!(vm.cpu.regs.get(4), 42);
    assert_eq!(vm.cpu.regs.get(5), 2);
    assert_eq!(vm.cpu.regs.get(7), u32::from(b'h'));
}

#[test]
fn reallocate_preserves_block_contents() {
    let src = "_start:\n\
               MOV R0, #16\n\
               SWI #0x20\n\
               MOV R4, R0\n\
               MOV R1, #0xAB\n\
               STRB R1, [R4]\n\
               STRB R1, [R4, #15]\n\
               MOV R0, R4\n\
               MOV R1, #64\n\
               SWI #0x22\n\
               MOV R5, R0\n\
               LDRB R6, [R5]\n\
               LDRB R7, [R5, #15]\n\
               SWI #0x00\n";
    let (vm, _, _) = run_to_exit(src, "");
    assert_ne!(vm.cpu.regs.get(5), 0);
    assert_ne!(vm.cpu.regs.get(4), vm.cpu.regs.get(5));
    assert_eq!(vm.cpu.regs.get(6), 0xAB);
    assert_eq!(vm.cpu.regs.get(7), 0xAB);
}

#[test]
fn heap_exhaustion_returns_null() {
    let src = "_start:\n\
               MOV R0, #0x20000\n\
               SWI #0x20\n\
               SWI #0x00\n";
    // 128 KiB request against a 64 KiB heap.
    let (_, _, code) = run_to_exit(src, "");
    assert_eq!(code, 0);
}

#[test]
fn failed_assertion_halts_with_message() {
    let src = "_start:\n\
               MOV R0, #0\n\
               ADR R1, msg\n\
               SWI #0x40\n\
               SWI #0x00\n\
               msg: .asciz \"boom\"\n";
    let (mut vm, _) = vm_with(src, "");
    match vm.run() {
        Err(VmError::Assertion { message, .. }) => assert_eq!(message, "boom"),
        other => panic!("expected assertion, got {other:?}"),
    }
}

#[test]
fn unknown_syscall_halts() {
    let (mut vm, _) = vm_with("_start: SWI #0xEE\nSWI #0x00\n", "");
    assert!(matches!(vm.run(), Err(VmError::UnknownSyscall { number: 0xEE, .. })));
}

#[test]
fn cycle_limit_halts_deterministically() {
    let program = arm2_asm::assemble_str("loop: B loop\n", "test.s").unwrap();
    let (console, _) = Console::scripted("");
    let config = VmConfig {
        max_cycles: 1000,
        ..VmConfig::default()
    };
    let mut vm = Vm::new(&config, console).unwrap();
    vm.load_program(&program).unwrap();
    assert!(matches!(vm.run(), Ok(VmExit::CycleLimit)));
    assert!(vm.cpu.cycles() >= 1000);
}

#[test]
fn halt_flag_stops_within_one_instruction() {
    let (mut vm, _) = vm_with("loop: B loop\n", "");
    let handle = vm.halt_handle();
    handle.store(true, Ordering::Relaxed);
    assert!(matches!(vm.run(), Ok(VmExit::Halted)));
}

#[test]
fn breakpoints_pause_and_resume() {
    let src = "_start:\n\
               MOV R0, #1\n\
               MOV R1, #2\n\
               MOV R2, #3\n\
               SWI #0x00\n";
    let (mut vm, _) = vm_with(src, "");
    vm.add_breakpoint(emu_arm2::CODE_BASE + 8);

    assert!(matches!(vm.run(), Ok(VmExit::Breakpoint)));
    assert_eq!(vm.cpu.pc(), emu_arm2::CODE_BASE + 8);
    assert_eq!(vm.cpu.regs.get(1), 2);
    assert_eq!(vm.cpu.regs.get(2), 0);

    // Resume past the breakpoint to completion.
    assert!(matches!(vm.run(), Ok(VmExit::Exited(1))));
    assert_eq!(vm.cpu.regs.get(2), 3);
}

#[test]
fn identical_runs_are_identical() {
    let src = "_start:\n\
               SWI #0x06\n\
               MOV R4, R0\n\
               SWI #0x31\n\
               EOR R0, R0, R4\n\
               MOV R1, #16\n\
               SWI #0x03\n\
               SWI #0x00\n";
    let run = || {
        let (mut vm, output) = vm_with(src, "7\n");
        let exit = vm.run().expect("run");
        (exit, output.text(), vm.cpu.cycles(), vm.cpu.regs.r)
    };
    let first = run();
    let second = run();
    assert_eq!(first, second);
}

#[test]
fn hooks_observe_execution() {
    let src = "_start:\n\
               MOV R0, #1\n\
               MOV R1, #0x20000\n\
               STR R0, [R1]\n\
               SWI #0x00\n";
    let (mut vm, _) = vm_with(src, "");

    let coverage = Arc::new(Mutex::new(Vec::new()));
    let disasms = Arc::new(Mutex::new(Vec::new()));
    let writes = Arc::new(Mutex::new(Vec::new()));
    let reg_changes = Arc::new(Mutex::new(Vec::new()));

    let mut hooks = ExecHooks::none();
    let c = Arc::clone(&coverage);
    hooks.on_coverage = Some(Box::new(move |addr| c.lock().unwrap().push(addr)));
    let d = Arc::clone(&disasms);
    hooks.on_instruction = Some(Box::new(move |rec| d.lock().unwrap().push(rec.disasm.clone())));
    let w = Arc::clone(&writes);
    hooks.on_memory_access = Some(Box::new(move |access| {
        if access.access == acorn_arm2::Access::Write {
            w.lock().unwrap().push((access.addr, access.value));
        }
    }));
    let r = Arc::clone(&reg_changes);
    hooks.on_register_changed = Some(Box::new(move |idx, _, new| r.lock().unwrap().push((idx, new))));
    vm.set_hooks(hooks);

    vm.run().unwrap();

    assert_eq!(coverage.lock().unwrap()[0], emu_arm2::CODE_BASE);
    assert!(disasms.lock().unwrap().iter().any(|d| d == "MOV R0, #1"));
    assert!(writes.lock().unwrap().contains(&(0x2_0000, 1)));
    assert!(reg_changes.lock().unwrap().contains(&(0, 1)));
}
