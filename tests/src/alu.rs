use common::asm::Width;

use crate::flags::flags;
use crate::harness::run_asm;

#[test]
fn add_carries_across_instructions() {
    // 0 + 2 + 0xFF at 8 bits: wraps to 0x01 with carry out.
    let machine = run_asm(
        r#"
        add .8bit <%R0>, <$(0x02)>
        add .8bit <%R0>, <%R2>
        "#,
        |m| {
            m.regs().set(Width::W8, 0, 0).unwrap();
            m.regs().set(Width::W8, 2, 0xFF).unwrap();
        },
    );
    assert_eq!(machine.regs().get(Width::W8, 0).unwrap(), 0x01);
    flags().c().check(&machine);
}

#[test]
fn neg_restores_magnitude() {
    let machine = run_asm(
        r#"
        mov .64bit <%FER0>, <$(-65536)>
        neg .64bit <%FER0>
        "#,
        |_| {},
    );
    assert_eq!(machine.regs().get(Width::W64, 0).unwrap(), 65536);
    flags().c().check(&machine);
}

#[test]
fn imul_signed_sixteen_bit() {
    // -32 * -2 = 64 into the implicit EXR0 destination.
    let machine = run_asm(
        r#"
        mov .16bit <%EXR0>, <$(-32)>
        imul .16bit <$(-2)>
        "#,
        |_| {},
    );
    assert_eq!(machine.regs().get(Width::W16, 0).unwrap(), 64);
    assert_eq!(machine.regs().get(Width::W16, 1).unwrap(), 0);
}

#[test]
fn mul_leaves_high_half_in_bank_one() {
    let machine = run_asm(
        r#"
        mov .32bit <%HER0>, <$(65536)>
        mov .32bit <%HER2>, <$(0x10000)>
        mul .32bit <%HER2>
        "#,
        |_| {},
    );
    // 2^16 * 2^16 = 2^32: low word zero, high word one.
    assert_eq!(machine.regs().get(Width::W32, 0).unwrap(), 0);
    assert_eq!(machine.regs().get(Width::W32, 1).unwrap(), 1);
}

#[test]
fn div_quotient_and_remainder() {
    let machine = run_asm(
        r#"
        mov .32bit <%HER0>, <$(100)>
        mov .32bit <%HER1>, <$(0)>
        div .32bit <$(7)>
        "#,
        |_| {},
    );
    assert_eq!(machine.regs().get(Width::W32, 0).unwrap(), 14);
    assert_eq!(machine.regs().get(Width::W32, 1).unwrap(), 2);
}

#[test]
fn idiv_signed() {
    let machine = run_asm(
        r#"
        mov .64bit <%FER0>, <$(-65536)>
        mov .64bit <%FER1>, <$(-1)>
        idiv .64bit <$(-2)>
        "#,
        |_| {},
    );
    assert_eq!(machine.regs().get(Width::W64, 0).unwrap(), 32768);
    assert_eq!(machine.regs().get(Width::W64, 1).unwrap(), 0);
}

#[test]
fn sub_and_cmp_flags() {
    let machine = run_asm("sub .16bit <%EXR0>, <$(1)>", |_| {});
    assert_eq!(machine.regs().get(Width::W16, 0).unwrap(), 0xFFFF);
    flags().c().s().check(&machine);

    // CMP discards the result.
    let machine = run_asm("cmp .16bit <%EXR0>, <%EXR1>", |m| {
        m.regs().set(Width::W16, 0, 5).unwrap();
        m.regs().set(Width::W16, 1, 5).unwrap();
    });
    assert_eq!(machine.regs().get(Width::W16, 0).unwrap(), 5);
    flags().z().check(&machine);
}

#[test]
fn adc_uses_incoming_carry() {
    let machine = run_asm(
        r#"
        add .8bit <%R0>, <%R2>
        adc .8bit <%R1>, <%R3>
        "#,
        |m| {
            m.regs().set(Width::W8, 0, 0xFF).unwrap();
            m.regs().set(Width::W8, 2, 0x01).unwrap();
            m.regs().set(Width::W8, 1, 0x30).unwrap();
            m.regs().set(Width::W8, 3, 0xA0).unwrap();
        },
    );
    // 0x30 + 0xA0 + carry = 0xD1.
    assert_eq!(machine.regs().get(Width::W8, 1).unwrap(), 0xD1);
}

#[test]
fn bitwise_ops() {
    let machine = run_asm(
        r#"
        and .64bit <%FER0>, <%FER1>
        or  .32bit <%HER1>, <%HER0>
        xor .64bit <%FER2>, <%FER2>
        not .64bit <%FER3>
        "#,
        |m| {
            m.regs().set(Width::W64, 0, 0xF0F0).unwrap();
            m.regs().set(Width::W64, 1, 0x0FF0).unwrap();
            m.regs().set(Width::W32, 0, 0x1).unwrap();
            m.regs().set(Width::W32, 1, 0x2).unwrap();
            m.regs().set(Width::W64, 2, 0xDEAD).unwrap();
            m.regs().set(Width::W64, 3, 0).unwrap();
        },
    );
    assert_eq!(machine.regs().get(Width::W64, 0).unwrap(), 0x00F0);
    assert_eq!(machine.regs().get(Width::W32, 1).unwrap(), 0x3);
    assert_eq!(machine.regs().get(Width::W64, 2).unwrap(), 0);
    assert_eq!(machine.regs().get(Width::W64, 3).unwrap(), u64::MAX);
}

#[test]
fn shifts_and_rotates() {
    // The shift/rotate ladder from the decoder regression program.
    let machine = run_asm(
        r#"
        mov .8bit <%R0>, <$(0x34)>
        shl .8bit <%R0>, <$(4)>
        shr .8bit <%R0>, <$(6)>
        "#,
        |_| {},
    );
    assert_eq!(machine.regs().get(Width::W8, 0).unwrap(), 0x01);

    let machine = run_asm(
        r#"
        mov .8bit <%R0>, <$(0xF4)>
        rol .8bit <%R0>, <$(2)>
        ror .8bit <%R0>, <$(1)>
        "#,
        |_| {},
    );
    // 0xF4 rol 2 = 0xD3; ror 1 = 0xE9.
    assert_eq!(machine.regs().get(Width::W8, 0).unwrap(), 0xE9);

    let machine = run_asm(
        r#"
        mov .8bit <%R0>, <$(0x8F)>
        rcl .8bit <%R0>, <$(1)>
        rcr .8bit <%R0>, <$(1)>
        "#,
        |_| {},
    );
    // RCR undoes RCL when the carry travels with the value.
    assert_eq!(machine.regs().get(Width::W8, 0).unwrap(), 0x8F);
}

#[test]
fn float_add_and_div() {
    let machine = run_asm(
        r#"
        fadd <%XMM2>, <$(3.141592653589793)>
        fdiv <$(2.0)>
        "#,
        |m| {
            m.regs().set_xmm(2, 1.0);
            m.regs().set_xmm(0, 10.0);
        },
    );
    assert_eq!(machine.regs().xmm(2), 1.0 + std::f64::consts::PI);
    assert_eq!(machine.regs().xmm(0), 5.0);
}
