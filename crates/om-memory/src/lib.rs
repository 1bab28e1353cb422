//! Guest physical address space for the oxidized-mac emulator
//!
//! This crate provides the RAM backing store and the MMIO routing
//! substrate that dispatches guest physical accesses to registered
//! device regions. Address translation lives in `om-cpu`; everything
//! here deals in physical addresses only.

pub mod mmio;
pub mod ram;

pub use mmio::{AccessWidth, MmioEndpoint, MmioRouter, SharedEndpoint};
pub use ram::SystemRam;
