//! Configuration system for the oxidized-mac emulator

use crate::error::{EmulatorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub machine: MachineConfig,
    pub cpu: CpuConfig,
    pub debug: DebugConfig,
    pub paths: PathConfig,
}

/// Machine assembly settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Guest RAM size in mebibytes
    pub ram_size_mb: u32,
    /// Optional raw ROM image mapped at the top of the physical space
    pub rom_image: Option<PathBuf>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            ram_size_mb: 64,
            rom_image: None,
        }
    }
}

/// CPU emulation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    /// Timebase/decrementer ticks per retired instruction
    pub timebase_ratio: u32,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self { timebase_ratio: 1 }
    }
}

/// Debugging settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DebugConfig {
    /// Log every retired instruction at trace level
    pub trace_instructions: bool,
}

/// Host filesystem paths used by device models
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PathConfig {
    /// Directory for device-owned persistent state (NVRAM, disk images)
    pub data_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a TOML file; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                toml::from_str(&text).map_err(|e| EmulatorError::Config(e.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}
