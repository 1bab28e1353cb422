//! Integration tests for MMIO routing: exactly-once dispatch, offset and
//! width propagation, and optional width-8 support.

use om_core::error::MemoryError;
use om_memory::{AccessWidth, MmioEndpoint, MmioRouter, SharedEndpoint};
use parking_lot::Mutex;
use std::sync::Arc;

/// Endpoint that records every transaction it sees.
#[derive(Default)]
struct RecordingEndpoint {
    reads: Vec<(u32, u32)>,
    writes: Vec<(u32, u32, u64)>,
    wide_ok: bool,
}

impl MmioEndpoint for RecordingEndpoint {
    fn name(&self) -> &str {
        "recorder"
    }

    fn read(&mut self, offset: u32, width: AccessWidth) -> Result<u64, MemoryError> {
        if width == AccessWidth::Double && !self.wide_ok {
            return Err(MemoryError::UnsupportedWidth {
                addr: offset,
                width: 8,
            });
        }
        self.reads.push((offset, width.bytes()));
        Ok(0x55)
    }

    fn write(&mut self, offset: u32, width: AccessWidth, value: u64) -> Result<(), MemoryError> {
        if width == AccessWidth::Double && !self.wide_ok {
            return Err(MemoryError::UnsupportedWidth {
                addr: offset,
                width: 8,
            });
        }
        self.writes.push((offset, width.bytes(), value));
        Ok(())
    }
}

fn recorder(wide_ok: bool) -> (Arc<Mutex<RecordingEndpoint>>, SharedEndpoint) {
    let ep = Arc::new(Mutex::new(RecordingEndpoint {
        wide_ok,
        ..Default::default()
    }));
    let shared: SharedEndpoint = ep.clone();
    (ep, shared)
}

#[test]
fn test_store_dispatches_exactly_once() {
    let mut router = MmioRouter::new();
    let (ep, shared) = recorder(false);
    router.register_region(0xF300_0000, 0x8_0000, shared).unwrap();

    router
        .write(0xF300_0020, AccessWidth::Word, 0xDEADBEEF)
        .unwrap();

    let ep = ep.lock();
    assert_eq!(ep.writes, vec![(0x20, 4, 0xDEADBEEF)]);
    assert!(ep.reads.is_empty());
}

#[test]
fn test_offset_is_region_relative() {
    let mut router = MmioRouter::new();
    let (ep, shared) = recorder(false);
    router.register_region(0x8080_1000, 0x1000, shared).unwrap();

    router.read(0x8080_1FFC, AccessWidth::Half).unwrap();
    assert_eq!(ep.lock().reads, vec![(0xFFC, 2)]);
}

#[test]
fn test_width8_optional() {
    let mut router = MmioRouter::new();
    let (_narrow, shared) = recorder(false);
    router.register_region(0x1000, 0x100, shared).unwrap();
    let (_wide, shared) = recorder(true);
    router.register_region(0x2000, 0x100, shared).unwrap();

    assert!(matches!(
        router.read(0x1000, AccessWidth::Double),
        Err(MemoryError::UnsupportedWidth { width: 8, .. })
    ));
    assert_eq!(router.read(0x2000, AccessWidth::Double).unwrap(), 0x55);
}

#[test]
fn test_dispatch_picks_correct_region() {
    let mut router = MmioRouter::new();
    let (a, shared) = recorder(false);
    router.register_region(0x1000, 0x100, shared).unwrap();
    let (b, shared) = recorder(false);
    router.register_region(0x1100, 0x100, shared).unwrap();

    router.write(0x10FF, AccessWidth::Byte, 1).unwrap();
    router.write(0x1100, AccessWidth::Byte, 2).unwrap();

    assert_eq!(a.lock().writes, vec![(0xFF, 1, 1)]);
    assert_eq!(b.lock().writes, vec![(0x00, 1, 2)]);
}
