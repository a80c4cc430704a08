//! End-to-end seed scenarios over literal byte streams.

use common::asm::Width;
use common::constants::BIOS_START;

use crate::harness::machine;

#[test]
fn nop_advances_ip_by_two() {
    let m = machine();
    m.load_image(&[0x00, 0x00], BIOS_START).unwrap();
    m.regs().set_ip(BIOS_START);

    let before_flags = m.regs().flags();
    let mut cpu = m.cpu();
    cpu.step().unwrap();

    assert_eq!(m.regs().ip(), BIOS_START + 2);
    assert_eq!(m.regs().flags(), before_flags);
    for i in 0..8 {
        assert_eq!(m.regs().get(Width::W8, i).unwrap(), 0);
    }
    for i in 0..16 {
        assert_eq!(m.regs().get(Width::W64, i).unwrap(), 0);
    }
}

#[test]
fn stop_signal_interrupts_a_spin() {
    // An infinite loop: jmp to itself.
    let m = machine();
    let bin = assembler::assemble_at(&format!("jmp <$({BIOS_START:#x})>\n"), BIOS_START).unwrap();
    m.load_image(&bin.text, BIOS_START).unwrap();
    m.regs().set_ip(BIOS_START);

    let mut cpu = m.cpu();
    m.request_stop();
    assert!(matches!(cpu.run(), emulator::RunExit::Stopped));
}

#[test]
fn out_of_range_ip_faults_and_halts() {
    let m = machine();
    // IP beyond the end of memory: the fetch faults, the fault vector's
    // default handler halts the machine.
    match m.run_at(0x20_0000) {
        emulator::RunExit::Fault(info) => assert_eq!(info.ip, 0x20_0000),
        other => panic!("expected a fault, got {other:?}"),
    }
}
