use disassembler::disassemble;

use clap::Parser;

/// Sysdarft disassembler
#[derive(Parser)]
struct Args {
    /// Binary to disassemble
    bin: String,

    /// Address the binary is loaded at
    #[arg(long, default_value_t = 0)]
    base: u64,
}

fn main() {
    env_logger::init();

    let opt = Args::parse();
    let buf = std::fs::read(&opt.bin).unwrap_or_else(|e| {
        eprintln!("{}: {e}", opt.bin);
        std::process::exit(2);
    });

    for dis in disassemble(&buf, opt.base) {
        let bytes: Vec<String> = dis.bytes.iter().map(|b| format!("{b:02X}")).collect();
        let literal = dis.literal.as_deref().unwrap_or("(data)");
        println!("{:#08X}: {:<32} {literal}", dis.addr, bytes.join(" "));
    }
}
