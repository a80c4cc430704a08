use common::asm::{Flag, Width};
use common::constants::INT_ILLEGAL_INSTRUCTION;

use crate::harness::{run_asm, run_asm_fault};

#[test]
fn computed_memory_write() {
    // (255 + 0 + 4) * 2 = 518.
    let machine = run_asm(
        "mov .64bit <*2&64($(255), %FER14, $(4))>, <$(114514)>",
        |m| {
            m.regs().set(Width::W64, 14, 0).unwrap();
        },
    );
    assert_eq!(machine.bus().read_u64(518).unwrap(), 114514);
}

#[test]
fn memory_write_touches_exactly_width_bytes() {
    // A 16-bit store into a field of sentinel bytes.
    let machine = run_asm(
        "mov .16bit <*2&16($(0x100), $(0), $(0))>, <$(0xBEEF)>",
        |m| {
            m.bus().write(0x1FE, &[0x55; 6]).unwrap();
        },
    );
    assert_eq!(machine.bus().read(0x1FE, 6).unwrap(), vec![0x55, 0x55, 0xEF, 0xBE, 0x55, 0x55]);
}

#[test]
fn memory_read_zero_extends() {
    let machine = run_asm(
        r#"
        mov .8bit <%R0>, <*1&8($(0x200), $(0), $(0))>
        mov .64bit <%FER1>, <*1&64($(0x200), $(0), $(0))>
        "#,
        |m| {
            m.bus().write(0x200, &[0xFE, 0xCA, 0, 0, 0, 0, 0, 0]).unwrap();
        },
    );
    assert_eq!(machine.regs().get(Width::W8, 0).unwrap(), 0xFE);
    assert_eq!(machine.regs().get(Width::W64, 1).unwrap(), 0xCAFE);
}

#[test]
fn register_bases_feed_the_effective_address() {
    let machine = run_asm(
        "mov .64bit <*2&64($(255), %FER14, $(6))>, <$(0xFFF)>",
        |m| {
            m.regs().set(Width::W64, 14, 10).unwrap();
        },
    );
    // (255 + 10 + 6) * 2 = 542.
    assert_eq!(machine.bus().read_u64(542).unwrap(), 0xFFF);
}

#[test]
fn swap_through_memory() {
    let machine = run_asm(
        r#"
        mov .64bit <*2&64($(255), %FER14, $(4))>, <$(114514)>
        mov .64bit <*2&64($(255), %FER14, $(6))>, <$(0xFFF)>
        mov .64bit <%FER0>, <*2&64($(255), %FER14, $(6))>
        mov .64bit <%FER1>, <*2&64($(255), %FER14, $(4))>
        xchg .64bit <%FER0>, <%FER1>
        "#,
        |_| {},
    );
    assert_eq!(machine.regs().get(Width::W64, 0).unwrap(), 114514);
    assert_eq!(machine.regs().get(Width::W64, 1).unwrap(), 0xFFF);
}

#[test]
fn out_of_range_access_faults() {
    // The default address space ends at 2 MiB; this lands far beyond it.
    let (_, info) = run_asm_fault(
        "mov .64bit <%FER0>, <*16&64($(0xFFFFFF), $(0), $(0))>",
        |_| {},
    );
    assert_eq!(info.vector, INT_ILLEGAL_INSTRUCTION);
}

#[test]
fn constant_write_faults_without_mutating_state() {
    let (machine, info) = run_asm_fault("mov .64bit <$(1)>, <%FER0>", |m| {
        m.regs().set(Width::W64, 0, 0xABCD).unwrap();
        m.regs().set_flag(Flag::Carry);
    });
    assert_eq!(info.vector, INT_ILLEGAL_INSTRUCTION);
    assert_eq!(machine.regs().get(Width::W64, 0).unwrap(), 0xABCD);
    assert!(machine.regs().flag(Flag::Carry), "flags must survive the faulting write");
}

#[test]
fn constant_alu_destination_faults_before_flags() {
    let (machine, _) = run_asm_fault("add .8bit <$(1)>, <$(2)>", |m| {
        m.regs().set_flag(Flag::Zero);
    });
    assert!(machine.regs().flag(Flag::Zero), "flags must not change");
}
