//! Error types for the oxidized-mac emulator
//!
//! These enums cover host-side failures only. Guest-visible faults travel
//! through the architectural exception vectors in `om-cpu` and never appear
//! here; a host-side fault that reaches the guest does so as a machine check.

use thiserror::Error;

/// Main error type for the emulator
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Unsupported feature: {0}")]
    Unsupported(String),
}

/// Physical-memory and MMIO routing errors
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Physical address out of range: 0x{0:08x}")]
    UnknownPhysical(u32),

    #[error("MMIO region 0x{start:08x}..0x{end:08x} overlaps an existing registration")]
    RegionOverlap { start: u32, end: u32 },

    #[error("No MMIO region registered at 0x{0:08x}")]
    NoSuchRegion(u32),

    #[error("Unsupported access width {width} at 0x{addr:08x}")]
    UnsupportedWidth { addr: u32, width: u32 },

    #[error("Write to read-only region at 0x{0:08x}")]
    ReadOnly(u32),

    #[error("Endpoint '{name}' failed: {message}")]
    Endpoint { name: String, message: String },
}

/// Device model errors
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Interrupt source {0} already registered")]
    SourceInUse(u32),

    #[error("Interrupt source {0} out of range")]
    SourceOutOfRange(u32),
}

/// Result type alias for emulator operations
pub type Result<T> = std::result::Result<T, EmulatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MemoryError::UnknownPhysical(0x12345678);
        assert_eq!(
            format!("{}", err),
            "Physical address out of range: 0x12345678"
        );

        let err = MemoryError::UnsupportedWidth {
            addr: 0xF300_0000,
            width: 8,
        };
        assert_eq!(
            format!("{}", err),
            "Unsupported access width 8 at 0xf3000000"
        );
    }

    #[test]
    fn test_error_conversion() {
        let mem_err = MemoryError::RegionOverlap {
            start: 0x1000,
            end: 0x2000,
        };
        let emu_err: EmulatorError = mem_err.into();
        assert!(matches!(emu_err, EmulatorError::Memory(_)));
    }
}
