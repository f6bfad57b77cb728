//! ARM2 emulator binary: assemble a source file and run it.
//!
//! Usage: `emu-arm2 <source.s> [--fs-root DIR] [--max-cycles N] [--trace]`

use std::path::PathBuf;
use std::process;

use emu_arm2::{Console, ExecHooks, Vm, VmConfig, VmExit};

struct CliArgs {
    source: PathBuf,
    fs_root: Option<PathBuf>,
    max_cycles: Option<u64>,
    trace: bool,
}

fn usage() -> ! {
    eprintln!("usage: emu-arm2 <source.s> [--fs-root DIR] [--max-cycles N] [--trace]");
    process::exit(2);
}

fn parse_args() -> CliArgs {
    let mut source = None;
    let mut fs_root = None;
    let mut max_cycles = None;
    let mut trace = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fs-root" => match args.next() {
                Some(dir) => fs_root = Some(PathBuf::from(dir)),
                None => usage(),
            },
            "--max-cycles" => match args.next().and_then(|v| v.parse().ok()) {
                Some(n) => max_cycles = Some(n),
                None => usage(),
            },
            "--trace" => trace = true,
            "--help" | "-h" => usage(),
            other if source.is_none() && !other.starts_with('-') => {
                source = Some(PathBuf::from(other));
            }
            _ => usage(),
        }
    }
    let Some(source) = source else { usage() };
    CliArgs {
        source,
        fs_root,
        max_cycles,
        trace,
    }
}

fn main() {
    let args = parse_args();

    let program = match arm2_asm::assemble_file(&args.source) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };
    for warning in &program.warnings {
        eprintln!("warning: {warning}");
    }

    let mut config = VmConfig {
        filesystem_root: args.fs_root,
        ..VmConfig::default()
    };
    if let Some(n) = args.max_cycles {
        config.max_cycles = n;
    }

    let mut vm = match Vm::new(&config, Console::stdio()) {
        Ok(vm) => vm,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };
    if let Err(e) = vm.load_program(&program) {
        eprintln!("{e}");
        process::exit(1);
    }

    if args.trace {
        let mut hooks = ExecHooks::none();
        hooks.on_instruction = Some(Box::new(|record| {
            eprintln!("{:#010X}  {:08X}  {}", record.addr, record.encoded, record.disasm);
        }));
        vm.set_hooks(hooks);
    }

    match vm.run() {
        Ok(VmExit::Exited(code)) => process::exit(code as i32 & 0xFF),
        Ok(VmExit::CycleLimit) => {
            eprintln!("halted: cycle limit exceeded");
            process::exit(1);
        }
        Ok(VmExit::Halted) => {
            eprintln!("halted: stop requested");
            process::exit(1);
        }
        Ok(VmExit::Breakpoint) => {
            eprintln!("halted: breakpoint");
            process::exit(1);
        }
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    }
}
