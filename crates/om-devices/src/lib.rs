//! Device models for the oxidized-mac emulator
//!
//! Only the interrupt aggregation path lives here for now: the CPU core's
//! external-interrupt input terminates in the I/O controller's interrupt
//! cell, so the cell is part of the core contract even though the rest of
//! the I/O controller (DMA engines, device cells) is not.

pub mod interrupts;

pub use interrupts::{IntSrc, InterruptCell, InterruptCtrl, IrqCookie};
