//! CPU external-interrupt input line
//!
//! The interrupt controller aggregates device lines into a single level
//! routed to the CPU. The dispatch loop samples it between instructions,
//! so the line is a plain atomic level rather than a queue.

use std::sync::atomic::{AtomicBool, Ordering};

/// Level-sensitive external-interrupt input to the CPU.
#[derive(Debug, Default)]
pub struct InterruptLine {
    asserted: AtomicBool,
}

impl InterruptLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive the line to the given level.
    pub fn set(&self, asserted: bool) {
        self.asserted.store(asserted, Ordering::Release);
    }

    pub fn assert(&self) {
        self.set(true);
    }

    pub fn clear(&self) {
        self.set(false);
    }

    /// Sample the current level.
    pub fn is_asserted(&self) -> bool {
        self.asserted.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_levels() {
        let line = InterruptLine::new();
        assert!(!line.is_asserted());

        line.assert();
        assert!(line.is_asserted());

        // asserting an already-high line is a no-op
        line.assert();
        assert!(line.is_asserted());

        line.clear();
        assert!(!line.is_asserted());
    }
}
