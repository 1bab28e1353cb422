//! Machine assembly
//!
//! Wires the core together the way the Gossamer-era hardware lays it
//! out: RAM at the bottom of the physical space, the I/O controller's
//! register block at 0xF300_0000, and the ROM image at 0xFFC0_0000 so
//! the reset vector lands inside it.

use om_core::error::MemoryError;
use om_core::{Config, InterruptLine};
use om_cpu::{Cpu, Mmu};
use om_devices::interrupts::InterruptCell;
use om_memory::{AccessWidth, MmioEndpoint, MmioRouter, SystemRam};
use parking_lot::Mutex;
use std::sync::Arc;

pub const IO_BASE: u32 = 0xF300_0000;
pub const IO_SIZE: u32 = 0x8_0000;
pub const ROM_BASE: u32 = 0xFFC0_0000;
pub const ROM_SIZE: u32 = 0x40_0000;

/// Read-only region serving the firmware image.
struct RomEndpoint {
    bytes: Vec<u8>,
}

impl RomEndpoint {
    fn new(mut image: Vec<u8>) -> Self {
        image.truncate(ROM_SIZE as usize);
        // unprogrammed ROM reads as all-ones
        image.resize(ROM_SIZE as usize, 0xFF);
        Self { bytes: image }
    }
}

impl MmioEndpoint for RomEndpoint {
    fn name(&self) -> &str {
        "rom"
    }

    fn read(&mut self, offset: u32, width: AccessWidth) -> std::result::Result<u64, MemoryError> {
        let mut value = 0u64;
        for i in 0..width.bytes() {
            let byte = self
                .bytes
                .get((offset + i) as usize)
                .copied()
                .ok_or(MemoryError::UnknownPhysical(ROM_BASE + offset))?;
            value = value << 8 | byte as u64;
        }
        Ok(value)
    }

    fn write(
        &mut self,
        offset: u32,
        _width: AccessWidth,
        value: u64,
    ) -> std::result::Result<(), MemoryError> {
        tracing::warn!(
            "write to ROM at offset 0x{:06x} ignored (value 0x{:x})",
            offset,
            value
        );
        Ok(())
    }
}

/// The assembled machine: CPU plus the device endpoints the core
/// contract requires.
pub struct Machine {
    pub cpu: Cpu,
    pub interrupts: Arc<Mutex<InterruptCell>>,
}

impl Machine {
    pub fn new(config: &Config) -> om_core::Result<Self> {
        let ram = SystemRam::new(config.machine.ram_size_mb * 1024 * 1024);
        let mut router = MmioRouter::new();
        let int_line = Arc::new(InterruptLine::new());

        let interrupts = Arc::new(Mutex::new(InterruptCell::new(int_line.clone())));
        router.register_region(IO_BASE, IO_SIZE, interrupts.clone())?;

        let image = match &config.machine.rom_image {
            Some(path) => std::fs::read(path)?,
            None => Vec::new(),
        };
        router.register_region(ROM_BASE, ROM_SIZE, Arc::new(Mutex::new(RomEndpoint::new(image))))?;

        let mut cpu = Cpu::new(Mmu::new(ram, router), int_line);
        cpu.set_timebase_ratio(config.cpu.timebase_ratio);
        cpu.set_trace_exec(config.debug.trace_instructions);
        tracing::info!(
            "machine assembled: {} MiB RAM, I/O at 0x{:08x}, ROM at 0x{:08x}",
            config.machine.ram_size_mb,
            IO_BASE,
            ROM_BASE
        );
        Ok(Self { cpu, interrupts })
    }

    /// Run the dispatch loop until a stop is requested.
    pub fn run(&mut self) {
        self.cpu.run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_vector_reads_rom() {
        let mut image = vec![0u8; 0x30_0104];
        // a branch-to-self at the reset vector offset within ROM
        image[0x30_0100..0x30_0104].copy_from_slice(&0x4800_0000u32.to_be_bytes());

        let mut config = Config::default();
        config.machine.ram_size_mb = 1;
        let mut machine = Machine::new(&config).unwrap();
        // swap in the image after construction via the router
        let mut router = MmioRouter::new();
        router
            .register_region(ROM_BASE, ROM_SIZE, Arc::new(Mutex::new(RomEndpoint::new(image))))
            .unwrap();
        machine.cpu.mmu.router = router;

        machine.cpu.step();
        assert_eq!(machine.cpu.state.pc, om_cpu::state::RESET_VECTOR);
        assert_eq!(machine.cpu.instruction_count(), 1);
    }

    #[test]
    fn test_interrupt_cell_reachable_by_address() {
        let mut config = Config::default();
        config.machine.ram_size_mb = 1;
        let machine = Machine::new(&config).unwrap();
        assert!(machine.cpu.mmu.router.contains(IO_BASE + 0x10));
        assert!(machine.cpu.mmu.router.contains(ROM_BASE));
        assert!(!machine.cpu.mmu.router.contains(0x1000));
    }
}
