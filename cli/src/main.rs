mod config;

use std::io::{stdin, stdout, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;

use assembler::assemble_at;
use common::asm::{register_name, Width, NUM_WIDE_REGS, REG_EP, REG_SP};
use emulator::module::{ModuleHost, EVENT_MACHINE_START, EVENT_MACHINE_STOP};
use emulator::{Machine, PipeSurface, RunExit, Surface, TerminalSurface};

use clap::Parser;
use log::{error, info};

use crate::config::Config;

const EXIT_CONFIG: u8 = 1;
const EXIT_LOAD: u8 = 2;
const EXIT_FAULT: u8 = 3;

/// Sysdarft machine shell
#[derive(Parser)]
#[command(about)]
struct Args {
    /// Configuration file (JSON)
    #[arg(long)]
    config: Option<String>,

    /// Run without the terminal UI
    #[arg(long)]
    headless: bool,

    /// Read commands from a file instead of stdin
    script: Option<String>,
}

fn main() -> ExitCode {
    env_logger::init();

    let args = Args::parse();
    let config = match args.config.as_deref().map_or_else(|| Ok(Config::default()), Config::load) {
        Ok(config) => config,
        Err(e) => {
            error!("configuration: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let headless = args.headless || config.headless;

    let surface: Arc<dyn Surface> = if headless {
        Arc::new(PipeSurface::default())
    } else {
        match TerminalSurface::new() {
            Ok(surface) => Arc::new(surface),
            Err(e) => {
                error!("terminal: {e}");
                return ExitCode::from(EXIT_CONFIG);
            }
        }
    };

    let machine = Machine::new(config.memory_bytes, surface);
    let mut modules = ModuleHost::new();
    for path in &config.modules {
        if let Err(e) = modules.load(path) {
            error!("{e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    }

    let input: Box<dyn BufRead> = match args.script.as_deref() {
        None => Box::new(stdin().lock()),
        Some(path) => match std::fs::File::open(path) {
            Ok(file) => Box::new(std::io::BufReader::new(file)),
            Err(e) => {
                error!("{path}: {e}");
                return ExitCode::from(EXIT_CONFIG);
            }
        },
    };
    let interactive = args.script.is_none();

    let code = repl(&machine, &mut modules, &config, headless, input, interactive);
    machine.stop_ui();
    ExitCode::from(code)
}

fn repl(
    machine: &Machine,
    modules: &mut ModuleHost,
    config: &Config,
    headless: bool,
    input: Box<dyn BufRead>,
    interactive: bool,
) -> u8 {
    let mut lines = input.lines();

    loop {
        if interactive {
            print!("> ");
            let _ = stdout().flush();
        }
        let Some(Ok(line)) = lines.next() else {
            return 0;
        };
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        let rest: Vec<&str> = words.collect();

        match command {
            "load" => {
                if let Err(code) = cmd_load(machine, config, &rest) {
                    return code;
                }
            }
            "asm" => {
                if let Err(code) = cmd_asm(machine, config, &rest) {
                    return code;
                }
            }
            "module" => match rest.as_slice() {
                [path] => {
                    if let Err(e) = modules.load(path) {
                        error!("{e}");
                    }
                }
                _ => println!("usage: module <path>"),
            },
            "run" => {
                if !headless {
                    machine.start_ui();
                }
                modules.broadcast(EVENT_MACHINE_START, 0);
                machine.reset();
                let exit = machine.cpu().run();
                modules.broadcast(EVENT_MACHINE_STOP, 0);
                machine.stop_ui();
                match exit {
                    RunExit::Halted | RunExit::Stopped => info!("machine halted"),
                    RunExit::Fault(info) => {
                        let opcode = info
                            .opcode
                            .map_or_else(|| "??".to_string(), |b| format!("{b:#04x}"));
                        error!(
                            "fault: vector {:#x} at IP {:#x}, opcode {opcode}: {}",
                            info.vector, info.ip, info.trace
                        );
                        return EXIT_FAULT;
                    }
                }
            }
            "regs" => print_regs(machine),
            "quit" | "exit" => return 0,
            other => println!("unknown command: {other}"),
        }
    }
}

fn parse_addr(text: &str) -> Option<u64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

fn load_args<'a>(config: &Config, rest: &[&'a str]) -> Option<(&'a str, u64)> {
    match *rest {
        [path] => Some((path, config.load_offset)),
        [path, addr] => Some((path, parse_addr(addr)?)),
        _ => None,
    }
}

fn cmd_load(machine: &Machine, config: &Config, rest: &[&str]) -> Result<(), u8> {
    let Some((path, addr)) = load_args(config, rest) else {
        println!("usage: load <path> [addr]");
        return Ok(());
    };
    let bytes = std::fs::read(path).map_err(|e| {
        error!("{path}: {e}");
        EXIT_LOAD
    })?;
    machine.load_image(&bytes, addr).map_err(|e| {
        error!("{path}: {e}");
        EXIT_LOAD
    })?;
    info!("loaded {} byte(s) at {addr:#x}", bytes.len());
    Ok(())
}

fn cmd_asm(machine: &Machine, config: &Config, rest: &[&str]) -> Result<(), u8> {
    let Some((path, addr)) = load_args(config, rest) else {
        println!("usage: asm <path> [addr]");
        return Ok(());
    };
    let text = std::fs::read_to_string(path).map_err(|e| {
        error!("{path}: {e}");
        EXIT_LOAD
    })?;
    let prog = assemble_at(&text, addr).map_err(|e| {
        error!("{path}: {e}");
        EXIT_LOAD
    })?;
    machine.load_image(&prog.text, addr).map_err(|e| {
        error!("{path}: {e}");
        EXIT_LOAD
    })?;
    info!("assembled {} byte(s) at {addr:#x}", prog.text.len());
    Ok(())
}

fn print_regs(machine: &Machine) {
    let regs = machine.regs();
    for index in 0..NUM_WIDE_REGS {
        let val = regs.get(Width::W64, index).unwrap_or(0);
        print!("{:>6} {val:#018x}", register_name(Width::W64, index));
        if index % 2 == 1 {
            println!();
        }
    }
    for index in REG_SP..=REG_EP {
        let val = regs.get(Width::W64, index).unwrap_or(0);
        println!("{:>6} {val:#018x}", register_name(Width::W64, index));
    }
    println!("{:>6} {:#018x}", "IP", regs.ip());
    println!("{:>6} {:#018x}", "FLAGS", regs.flags().bits());
}
