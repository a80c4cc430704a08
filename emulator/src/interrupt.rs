//! The interrupt vector table. One per machine instance, seeded at
//! construction; each slot holds the *address* in the vector region from
//! which dispatch loads the real handler pointer.

use common::constants::{IVT_ENTRIES, IVT_ENTRY_BYTES, IVT_START};
use common::error::InterruptTableError;

use crate::ordered::OrderedMutex;
use crate::RANK_IVT;

pub struct InterruptTable {
    slots: OrderedMutex<Box<[u64]>>,
}

impl Default for InterruptTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptTable {
    pub fn new() -> InterruptTable {
        let slots: Vec<u64> =
            (0..IVT_ENTRIES).map(|i| IVT_START + i * IVT_ENTRY_BYTES).collect();
        InterruptTable { slots: OrderedMutex::new(RANK_IVT, slots.into_boxed_slice()) }
    }

    pub fn entry(&self, n: u64) -> Result<u64, InterruptTableError> {
        let slots = self.slots.lock();
        slots.get(n as usize).copied().ok_or(InterruptTableError(n))
    }

    pub fn set_entry(&self, n: u64, slot_addr: u64) -> Result<(), InterruptTableError> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(n as usize).ok_or(InterruptTableError(n))?;
        *slot = slot_addr;
        Ok(())
    }
}
