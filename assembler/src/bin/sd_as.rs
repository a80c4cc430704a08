use std::fs::File;
use std::io::Write;
use std::process::ExitCode;

use assembler::assemble_at;
use common::constants::BIOS_START;

use clap::Parser;
use log::error;

/// Sysdarft assembler
#[derive(Parser)]
#[command(about)]
struct Args {
    /// Input assembly file
    input: String,

    /// File name to output to
    #[arg(long, short)]
    output: Option<String>,

    /// Address the binary will be loaded at
    #[arg(long, default_value_t = BIOS_START)]
    base: u64,
}

fn main() -> ExitCode {
    env_logger::init();

    let opt = Args::parse();
    let input = match std::fs::read_to_string(&opt.input) {
        Ok(text) => text,
        Err(e) => {
            error!("{}: {e}", opt.input);
            return ExitCode::from(2);
        }
    };

    let prog = match assemble_at(&input, opt.base) {
        Ok(prog) => prog,
        Err(e) => {
            error!("{}: {e}", opt.input);
            return ExitCode::from(2);
        }
    };

    let outname = opt.output.as_deref().unwrap_or("a.out");
    let result = File::create(outname).and_then(|mut out| out.write_all(&prog.text));
    if let Err(e) = result {
        error!("{outname}: {e}");
        return ExitCode::from(2);
    }

    ExitCode::SUCCESS
}
