use common::asm::Flag;
use emulator::Machine;

// Because each test runs on a fresh machine, unaffected flags will be false.
#[derive(Debug, Clone, Copy, Default)]
pub struct Flags {
    pub c: bool,
    pub v: bool, // overflow
    pub z: bool,
    pub s: bool, // sign
}

impl Flags {
    pub fn c(mut self) -> Self {
        self.c = true;
        self
    }

    pub fn v(mut self) -> Self {
        self.v = true;
        self
    }

    pub fn z(mut self) -> Self {
        self.z = true;
        self
    }

    pub fn s(mut self) -> Self {
        self.s = true;
        self
    }

    pub fn check(self, machine: &Machine) {
        let regs = machine.regs();
        assert_eq!(regs.flag(Flag::Carry), self.c, "carry flag");
        assert_eq!(regs.flag(Flag::Overflow), self.v, "overflow flag");
        assert_eq!(regs.flag(Flag::Zero), self.z, "zero flag");
        assert_eq!(regs.flag(Flag::Sign), self.s, "sign flag");
    }
}

pub fn flags() -> Flags {
    Flags::default()
}
