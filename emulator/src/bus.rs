//! The address space: flat RAM plus memory-mapped device windows.

use std::ops::Range;
use std::sync::Arc;

use common::error::MemoryFault;

use crate::ordered::OrderedMutex;
use crate::RANK_BUS;

/// A device mapped into the address space. Accesses must fall entirely
/// inside the window; the bus rejects partial overlaps.
pub trait MmioDevice: Send + Sync {
    fn range(&self) -> Range<u64>;
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryFault>;
    fn write(&self, addr: u64, data: &[u8]) -> Result<(), MemoryFault>;
}

pub struct Bus {
    ram: OrderedMutex<Vec<u8>>,
    size: u64,
    devices: Vec<Arc<dyn MmioDevice>>,
}

impl Bus {
    pub fn new(mem_bytes: u64) -> Bus {
        Bus {
            ram: OrderedMutex::new(RANK_BUS, vec![0; mem_bytes as usize]),
            size: mem_bytes,
            devices: Vec::new(),
        }
    }

    /// Register a device window. Must happen before the bus is shared.
    pub fn add_device(&mut self, dev: Arc<dyn MmioDevice>) {
        let range = dev.range();
        assert!(range.start < range.end, "empty MMIO window");
        for existing in &self.devices {
            let other = existing.range();
            assert!(
                range.end <= other.start || other.end <= range.start,
                "overlapping MMIO windows {range:x?} and {other:x?}"
            );
        }
        self.devices.push(dev);
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn fault(addr: u64, len: u64) -> MemoryFault {
        MemoryFault { addr, len }
    }

    /// The device whose window fully contains `[addr, addr + len)`, if any.
    /// An access that merely touches a window is a fault.
    fn device_for(&self, addr: u64, len: u64) -> Result<Option<&Arc<dyn MmioDevice>>, MemoryFault> {
        let end = addr.checked_add(len).ok_or_else(|| Self::fault(addr, len))?;
        for dev in &self.devices {
            let win = dev.range();
            if addr < win.end && end > win.start {
                if addr >= win.start && end <= win.end {
                    return Ok(Some(dev));
                }
                return Err(Self::fault(addr, len));
            }
        }
        Ok(None)
    }

    pub fn read(&self, addr: u64, len: u64) -> Result<Vec<u8>, MemoryFault> {
        if let Some(dev) = self.device_for(addr, len)? {
            let mut buf = vec![0; len as usize];
            dev.read(addr, &mut buf)?;
            return Ok(buf);
        }

        let end = addr.checked_add(len).ok_or_else(|| Self::fault(addr, len))?;
        if end > self.size {
            return Err(Self::fault(addr, len));
        }
        Ok(self.ram.lock()[addr as usize..end as usize].to_vec())
    }

    pub fn write(&self, addr: u64, data: &[u8]) -> Result<(), MemoryFault> {
        let len = data.len() as u64;
        if let Some(dev) = self.device_for(addr, len)? {
            return dev.write(addr, data);
        }

        let end = addr.checked_add(len).ok_or_else(|| Self::fault(addr, len))?;
        if end > self.size {
            return Err(Self::fault(addr, len));
        }
        self.ram.lock()[addr as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    pub fn read_u8(&self, addr: u64) -> Result<u8, MemoryFault> {
        Ok(self.read(addr, 1)?[0])
    }

    pub fn read_u64(&self, addr: u64) -> Result<u64, MemoryFault> {
        let bytes = self.read(addr, 8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn write_u64(&self, addr: u64, val: u64) -> Result<(), MemoryFault> {
        self.write(addr, &val.to_le_bytes())
    }
}
