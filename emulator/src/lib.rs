pub mod alu;
pub mod bus;
pub mod console;
pub mod cpu;
pub mod interrupt;
pub mod machine;
pub mod module;
pub mod ordered;
pub mod registers;

pub use bus::{Bus, MmioDevice};
pub use console::{Console, Frame, PipeSurface, Surface, TerminalSurface};
pub use cpu::{Cpu, FaultInfo, RunExit};
pub use interrupt::InterruptTable;
pub use machine::Machine;
pub use registers::{Flags, RegisterFile};

// Lock ranks, outermost first. Acquiring against this order is a bug, and
// debug builds assert it.
pub(crate) const RANK_IVT: u8 = 0;
pub(crate) const RANK_REGISTERS: u8 = 1;
pub(crate) const RANK_BUS: u8 = 2;
pub(crate) const RANK_DISPLAY: u8 = 3;
