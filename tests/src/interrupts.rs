use common::asm::{Flag, Width, REG_SP};
use common::constants::{
    INT_DIVISION_ERROR, INT_ILLEGAL_INSTRUCTION, IVT_ENTRY_BYTES, IVT_START,
};
use emulator::RunExit;

use crate::harness::{machine, run_asm, run_asm_fault};

const STACK_TOP: u64 = 0x8000;
const HANDLER: u64 = 0xC1A00;

fn install(m: &emulator::Machine, vector: u64, handler: u64) {
    let slot = IVT_START + vector * IVT_ENTRY_BYTES;
    m.bus().write_u64(slot, handler).unwrap();
}

#[test]
fn software_interrupt_runs_the_handler_and_returns() {
    let machine = run_asm(
        &format!(
            r#"
            int <$(5)>
            mov .8bit <%R1>, <$(1)>   ; after return
            hlt

            .org {HANDLER:#x}
            mov .8bit <%R2>, <$(7)>
            iret
            "#
        ),
        |m| {
            m.regs().set(Width::W64, REG_SP, STACK_TOP).unwrap();
            install(m, 5, HANDLER);
        },
    );
    assert_eq!(machine.regs().get(Width::W8, 2).unwrap(), 7);
    assert_eq!(machine.regs().get(Width::W8, 1).unwrap(), 1);
    assert_eq!(machine.regs().get(Width::W64, REG_SP).unwrap(), STACK_TOP);
}

#[test]
fn handler_entry_saves_and_iret_restores_the_bank() {
    // The handler trashes registers and flags; IRET must bring them back.
    let machine = run_asm(
        &format!(
            r#"
            mov .64bit <%FER5>, <$(0x5555)>
            add .8bit <%R0>, <$(0xFF)>   ; sets the sign flag
            int <$(9)>
            hlt

            .org {HANDLER:#x}
            mov .64bit <%FER5>, <$(0)>
            xor .64bit <%FER6>, <%FER6>  ; clears sign, sets zero
            iret
            "#
        ),
        |m| {
            m.regs().set(Width::W64, REG_SP, STACK_TOP).unwrap();
            install(m, 9, HANDLER);
        },
    );
    assert_eq!(machine.regs().get(Width::W64, 5).unwrap(), 0x5555);
    assert!(machine.regs().flag(Flag::Sign), "flags restored by IRET");
    assert!(!machine.regs().flag(Flag::Zero));
}

#[test]
fn interrupt_entry_clears_interrupt_enable() {
    let m = machine();
    let bin = assembler::assemble_at("int <$(5)>\nhlt\n", 0xC1800).unwrap();
    m.load_image(&bin.text, 0xC1800).unwrap();
    install(&m, 5, HANDLER);
    m.regs().set(Width::W64, REG_SP, STACK_TOP).unwrap();
    m.regs().set_flag(Flag::Interrupt);
    m.regs().set_ip(0xC1800);

    let mut cpu = m.cpu();
    cpu.step().unwrap();
    assert_eq!(m.regs().ip(), HANDLER);
    assert!(!m.regs().flag(Flag::Interrupt));
}

#[test]
fn vector_out_of_range_maps_to_illegal_instruction() {
    let (_, info) = run_asm_fault("int <$(600)>", |_| {});
    assert_eq!(info.vector, INT_ILLEGAL_INSTRUCTION);

    // With a handler installed on the illegal-instruction vector, the
    // out-of-range interrupt lands there instead of halting.
    let machine = run_asm(
        &format!(
            r#"
            int <$(600)>
            hlt

            .org {HANDLER:#x}
            mov .8bit <%R2>, <$(7)>
            iret
            "#
        ),
        |m| {
            m.regs().set(Width::W64, REG_SP, STACK_TOP).unwrap();
            install(m, INT_ILLEGAL_INSTRUCTION, HANDLER);
        },
    );
    assert_eq!(machine.regs().get(Width::W8, 2).unwrap(), 7);
}

#[test]
fn division_by_zero_raises_its_vector() {
    let (_, info) = run_asm_fault("div .8bit <$(0)>", |_| {});
    assert_eq!(info.vector, INT_DIVISION_ERROR);

    let machine = run_asm(
        &format!(
            r#"
            div .8bit <$(0)>
            hlt

            .org {HANDLER:#x}
            mov .8bit <%R3>, <$(0xEE)>
            iret
            "#
        ),
        |m| {
            m.regs().set(Width::W64, REG_SP, STACK_TOP).unwrap();
            install(m, INT_DIVISION_ERROR, HANDLER);
        },
    );
    assert_eq!(machine.regs().get(Width::W8, 3).unwrap(), 0xEE);
}

#[test]
fn undecodable_byte_reports_the_faulting_ip() {
    let m = machine();
    // 0xEE is not an opcode.
    m.load_image(&[0xEE, 0x00], 0xC1800).unwrap();
    match m.run_at(0xC1800) {
        RunExit::Fault(info) => {
            assert_eq!(info.vector, INT_ILLEGAL_INSTRUCTION);
            assert_eq!(info.ip, 0xC1800);
            assert_eq!(info.opcode, Some(0xEE));
        }
        other => panic!("expected a fault, got {other:?}"),
    }
}

#[test]
fn vector_table_writes_are_visible_to_dispatch() {
    // Point vector 4's slot somewhere else entirely, store a handler
    // pointer there, and dispatch through it.
    let machine = run_asm(
        &format!(
            r#"
            mov .64bit <*1&64($(0x7000), $(0), $(0))>, <$({HANDLER:#x})>
            int <$(4)>
            hlt

            .org {HANDLER:#x}
            mov .8bit <%R4>, <$(0x44)>
            iret
            "#
        ),
        |m| {
            m.regs().set(Width::W64, REG_SP, STACK_TOP).unwrap();
            m.ivt().set_entry(4, 0x7000).unwrap();
        },
    );
    assert_eq!(machine.regs().get(Width::W8, 4).unwrap(), 0x44);
}

#[test]
fn explicit_int_into_default_handler_halts() {
    let m = machine();
    let bin = assembler::assemble_at("int <$(77)>\n", 0xC1800).unwrap();
    m.load_image(&bin.text, 0xC1800).unwrap();
    match m.run_at(0xC1800) {
        RunExit::Halted => {}
        other => panic!("expected a clean halt, got {other:?}"),
    }
}
