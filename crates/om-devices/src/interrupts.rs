//! Interrupt aggregation cell
//!
//! Models the interrupt portion of the Mac I/O controller ASIC. Devices
//! register numeric sources and receive opaque cookies; line changes are
//! aggregated into two banks of level/event/mask registers, and the single
//! CPU output is asserted iff `(levels | events) & mask` is non-zero in
//! either bank. Events latch rising edges and stay set until software
//! clears them through the write-one-to-clear register interface.

use om_core::error::{DeviceError, MemoryError};
use om_core::irq::InterruptLine;
use om_memory::{AccessWidth, MmioEndpoint};
use std::sync::Arc;

/// Numeric interrupt source id, 0..32 within its bank.
pub type IntSrc = u32;

/// Opaque handle returned by source registration.
///
/// Internally a one-hot mask: low word = bank 1, high word = bank 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqCookie(u64);

/// Contract between device models and the interrupt controller.
pub trait InterruptCtrl {
    /// Register an edge-latched device interrupt source.
    fn register_device_interrupt(&mut self, src: IntSrc) -> Result<IrqCookie, DeviceError>;

    /// Register a DMA completion interrupt source.
    fn register_dma_interrupt(&mut self, src: IntSrc) -> Result<IrqCookie, DeviceError>;

    /// Drive the source line to the given level.
    fn set_line(&mut self, cookie: IrqCookie, asserted: bool);

    /// Release a registration obtained from either register call.
    fn release(&mut self, cookie: IrqCookie);
}

/// Register offsets within the cell's MMIO region (32-bit big-endian).
mod regs {
    pub const EVENTS2: u32 = 0x10;
    pub const MASK2: u32 = 0x14;
    pub const LEVELS2: u32 = 0x18;
    pub const EVENTS1: u32 = 0x20;
    pub const MASK1: u32 = 0x24;
    pub const LEVELS1: u32 = 0x2C;
}

/// Event-register write mode: high bit set means OR the remaining bits
/// into the events register instead of clearing them.
const INT_SET_MODE: u32 = 0x8000_0000;

/// One bank of interrupt state.
#[derive(Debug, Default)]
struct IntBank {
    levels: u32,
    events: u32,
    mask: u32,
    registered: u32,
}

impl IntBank {
    fn set_line(&mut self, bit: u32, asserted: bool) {
        if asserted {
            if self.levels & bit == 0 {
                // rising edge latches the event exactly once
                self.events |= bit;
            }
            self.levels |= bit;
        } else {
            self.levels &= !bit;
        }
    }

    fn write_events(&mut self, value: u32) {
        if value & INT_SET_MODE != 0 {
            self.events |= value & !INT_SET_MODE;
        } else {
            self.events &= !value;
        }
    }

    fn pending(&self) -> bool {
        (self.levels | self.events) & self.mask != 0
    }
}

/// The interrupt aggregation cell of the I/O controller.
pub struct InterruptCell {
    bank1: IntBank,
    bank2: IntBank,
    cpu_line: Arc<InterruptLine>,
}

impl InterruptCell {
    pub fn new(cpu_line: Arc<InterruptLine>) -> Self {
        Self {
            bank1: IntBank::default(),
            bank2: IntBank::default(),
            cpu_line,
        }
    }

    fn update_cpu_line(&self) {
        self.cpu_line
            .set(self.bank1.pending() || self.bank2.pending());
    }

    fn register(bank: &mut IntBank, src: IntSrc) -> Result<u32, DeviceError> {
        if src >= 32 {
            return Err(DeviceError::SourceOutOfRange(src));
        }
        let bit = 1u32 << src;
        if bank.registered & bit != 0 {
            return Err(DeviceError::SourceInUse(src));
        }
        bank.registered |= bit;
        Ok(bit)
    }

    fn read_reg(&self, offset: u32) -> u32 {
        match offset {
            regs::EVENTS2 => self.bank2.events,
            regs::MASK2 => self.bank2.mask,
            regs::LEVELS2 => self.bank2.levels,
            regs::EVENTS1 => self.bank1.events,
            regs::MASK1 => self.bank1.mask,
            regs::LEVELS1 => self.bank1.levels,
            _ => {
                tracing::warn!("interrupt cell: read of unknown register 0x{:02x}", offset);
                0
            }
        }
    }

    fn write_reg(&mut self, offset: u32, value: u32) {
        match offset {
            regs::EVENTS2 => self.bank2.write_events(value),
            regs::MASK2 => self.bank2.mask = value,
            regs::EVENTS1 => self.bank1.write_events(value),
            regs::MASK1 => self.bank1.mask = value,
            regs::LEVELS1 | regs::LEVELS2 => {
                // level registers are read-only
            }
            _ => {
                tracing::warn!(
                    "interrupt cell: write of unknown register 0x{:02x} = 0x{:08x}",
                    offset,
                    value
                );
            }
        }
        self.update_cpu_line();
    }
}

impl InterruptCtrl for InterruptCell {
    fn register_device_interrupt(&mut self, src: IntSrc) -> Result<IrqCookie, DeviceError> {
        Self::register(&mut self.bank1, src).map(|bit| IrqCookie(bit as u64))
    }

    fn register_dma_interrupt(&mut self, src: IntSrc) -> Result<IrqCookie, DeviceError> {
        Self::register(&mut self.bank2, src).map(|bit| IrqCookie((bit as u64) << 32))
    }

    fn set_line(&mut self, cookie: IrqCookie, asserted: bool) {
        let bit1 = cookie.0 as u32;
        let bit2 = (cookie.0 >> 32) as u32;
        if bit1 != 0 {
            self.bank1.set_line(bit1, asserted);
        }
        if bit2 != 0 {
            self.bank2.set_line(bit2, asserted);
        }
        self.update_cpu_line();
    }

    fn release(&mut self, cookie: IrqCookie) {
        let bit1 = cookie.0 as u32;
        let bit2 = (cookie.0 >> 32) as u32;
        self.bank1.registered &= !bit1;
        self.bank1.levels &= !bit1;
        self.bank1.events &= !bit1;
        self.bank2.registered &= !bit2;
        self.bank2.levels &= !bit2;
        self.bank2.events &= !bit2;
        self.update_cpu_line();
    }
}

impl MmioEndpoint for InterruptCell {
    fn name(&self) -> &str {
        "interrupt-cell"
    }

    fn read(&mut self, offset: u32, width: AccessWidth) -> Result<u64, MemoryError> {
        let reg = self.read_reg(offset & !3);
        let value = match width {
            AccessWidth::Word => reg as u64,
            AccessWidth::Byte => ((reg >> (8 * (3 - (offset & 3)))) & 0xFF) as u64,
            AccessWidth::Half => ((reg >> (8 * (2 - (offset & 2)))) & 0xFFFF) as u64,
            AccessWidth::Double => {
                return Err(MemoryError::UnsupportedWidth { addr: offset, width: 8 })
            }
        };
        Ok(value)
    }

    fn write(&mut self, offset: u32, width: AccessWidth, value: u64) -> Result<(), MemoryError> {
        let reg_off = offset & !3;
        let value = match width {
            AccessWidth::Word => value as u32,
            AccessWidth::Byte => {
                let shift = 8 * (3 - (offset & 3));
                let old = self.read_reg(reg_off);
                (old & !(0xFF << shift)) | (((value as u32) & 0xFF) << shift)
            }
            AccessWidth::Half => {
                let shift = 8 * (2 - (offset & 2));
                let old = self.read_reg(reg_off);
                (old & !(0xFFFF << shift)) | (((value as u32) & 0xFFFF) << shift)
            }
            AccessWidth::Double => {
                return Err(MemoryError::UnsupportedWidth { addr: offset, width: 8 })
            }
        };
        self.write_reg(reg_off, value);
        Ok(())
    }
}
