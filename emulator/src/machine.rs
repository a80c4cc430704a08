//! Assembles the subsystems into one machine instance and wires the
//! memory-mapped devices onto the bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::constants::{BIOS_START, MEM_DEFAULT_BYTES};
use common::error::MemoryFault;

use crate::bus::Bus;
use crate::console::{Console, Keyboard, PipeSurface, Screen, Surface};
use crate::cpu::{Cpu, RunExit};
use crate::interrupt::InterruptTable;
use crate::registers::RegisterFile;

pub struct Machine {
    bus: Arc<Bus>,
    regs: Arc<RegisterFile>,
    ivt: Arc<InterruptTable>,
    console: Arc<Console>,
    stop: Arc<AtomicBool>,
}

impl Machine {
    pub fn new(mem_bytes: u64, surface: Arc<dyn Surface>) -> Machine {
        let console = Arc::new(Console::new(surface));
        let mut bus = Bus::new(mem_bytes);
        bus.add_device(Arc::new(Screen::new(console.clone())));
        bus.add_device(Arc::new(Keyboard::new(console.clone())));

        Machine {
            bus: Arc::new(bus),
            regs: Arc::new(RegisterFile::new()),
            ivt: Arc::new(InterruptTable::new()),
            console,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A machine with a captured surface, for tests and headless runs.
    pub fn headless() -> (Machine, Arc<PipeSurface>) {
        let surface = Arc::new(PipeSurface::default());
        (Machine::new(MEM_DEFAULT_BYTES, surface.clone()), surface)
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    pub fn regs(&self) -> &Arc<RegisterFile> {
        &self.regs
    }

    pub fn ivt(&self) -> &Arc<InterruptTable> {
        &self.ivt
    }

    pub fn console(&self) -> &Arc<Console> {
        &self.console
    }

    pub fn load_image(&self, data: &[u8], start: u64) -> Result<(), MemoryFault> {
        self.bus.write(start, data)
    }

    pub fn cpu(&self) -> Cpu {
        Cpu::new(
            self.bus.clone(),
            self.regs.clone(),
            self.ivt.clone(),
            self.stop.clone(),
        )
    }

    /// Point IP at the BIOS region.
    pub fn reset(&self) {
        self.regs.set_ip(BIOS_START);
    }

    pub fn run_at(&self, ip: u64) -> RunExit {
        self.regs.set_ip(ip);
        self.cpu().run()
    }

    pub fn start_ui(&self) {
        Console::initialize(&self.console);
    }

    pub fn stop_ui(&self) {
        self.console.cleanup();
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}
