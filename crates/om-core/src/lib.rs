//! Core types for the oxidized-mac emulator
//!
//! This crate provides the foundational types, error handling,
//! configuration, and logging infrastructure shared by the CPU,
//! memory, and device crates.

pub mod config;
pub mod error;
pub mod irq;
pub mod logging;

pub use config::Config;
pub use error::{EmulatorError, Result};
pub use irq::InterruptLine;
