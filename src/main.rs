//! oxidized-mac - PowerPC classic Macintosh emulator
//!
//! Main entry point for the emulator application.

mod machine;

use machine::Machine;
use std::path::Path;

fn main() -> om_core::Result<()> {
    om_core::logging::init();

    tracing::info!("Starting oxidized-mac");

    let config = om_core::Config::load(Path::new("oxidized-mac.toml"))?;
    if config.machine.rom_image.is_none() {
        tracing::warn!("no ROM image configured; the guest will fault at the reset vector");
    }

    let mut machine = Machine::new(&config)?;
    machine.run();
    Ok(())
}
