//! MMIO region routing
//!
//! Devices register physical address ranges at machine construction.
//! The router keeps an ordered, non-overlapping region list and
//! dispatches each guest access to exactly one endpoint with a
//! region-relative offset. Registration of an overlapping region fails;
//! regions are never re-registered during execution.

use om_core::error::MemoryError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Access width of a single MMIO transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessWidth {
    Byte,
    Half,
    Word,
    Double,
}

impl AccessWidth {
    #[inline]
    pub fn bytes(self) -> u32 {
        match self {
            AccessWidth::Byte => 1,
            AccessWidth::Half => 2,
            AccessWidth::Word => 4,
            AccessWidth::Double => 8,
        }
    }

    pub fn from_bytes(n: u32) -> Option<Self> {
        match n {
            1 => Some(AccessWidth::Byte),
            2 => Some(AccessWidth::Half),
            4 => Some(AccessWidth::Word),
            8 => Some(AccessWidth::Double),
            _ => None,
        }
    }
}

/// A device-side endpoint for one MMIO region.
///
/// Offsets are region-relative. Widths 1/2/4 must be supported; an
/// endpoint that does not implement width 8 returns
/// [`MemoryError::UnsupportedWidth`], which the CPU surfaces to the guest
/// as an alignment-class data fault.
pub trait MmioEndpoint: Send {
    fn name(&self) -> &str {
        "mmio"
    }

    fn read(&mut self, offset: u32, width: AccessWidth) -> Result<u64, MemoryError>;

    fn write(&mut self, offset: u32, width: AccessWidth, value: u64) -> Result<(), MemoryError>;
}

/// Shared handle to an endpoint; the machine graph keeps its own handle
/// for wiring (e.g. interrupt registration) while the router dispatches.
pub type SharedEndpoint = Arc<Mutex<dyn MmioEndpoint>>;

struct MmioRegion {
    start: u32,
    len: u32,
    endpoint: SharedEndpoint,
}

impl MmioRegion {
    #[inline]
    fn contains(&self, phys: u32) -> bool {
        phys.wrapping_sub(self.start) < self.len
    }
}

/// Ordered registry mapping guest-physical ranges to device endpoints.
#[derive(Default)]
pub struct MmioRouter {
    /// Sorted by start address; ranges never overlap.
    regions: Vec<MmioRegion>,
}

impl MmioRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `[start, start + len)` for `endpoint`.
    pub fn register_region(
        &mut self,
        start: u32,
        len: u32,
        endpoint: SharedEndpoint,
    ) -> Result<(), MemoryError> {
        if len == 0 || start.checked_add(len - 1).is_none() {
            return Err(MemoryError::RegionOverlap {
                start,
                end: start.wrapping_add(len),
            });
        }
        let idx = self.regions.partition_point(|r| r.start < start);
        let overlaps_prev = idx > 0 && self.regions[idx - 1].contains(start);
        let overlaps_next = self
            .regions
            .get(idx)
            .is_some_and(|r| r.start - start < len);
        if overlaps_prev || overlaps_next {
            return Err(MemoryError::RegionOverlap {
                start,
                end: start + len,
            });
        }
        tracing::debug!(
            "MMIO region 0x{:08x}..0x{:08x} -> {}",
            start,
            start + len,
            endpoint.lock().name()
        );
        self.regions.insert(
            idx,
            MmioRegion {
                start,
                len,
                endpoint,
            },
        );
        Ok(())
    }

    /// Release the region starting at `start`. Returns false when no such
    /// region exists.
    pub fn unregister_region(&mut self, start: u32) -> bool {
        match self.regions.binary_search_by_key(&start, |r| r.start) {
            Ok(idx) => {
                self.regions.remove(idx);
                true
            }
            Err(_) => false,
        }
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Whether any registered region contains `phys`.
    #[inline]
    pub fn contains(&self, phys: u32) -> bool {
        self.find(phys).is_some()
    }

    #[inline]
    fn find(&self, phys: u32) -> Option<&MmioRegion> {
        let idx = self.regions.partition_point(|r| r.start <= phys);
        let region = self.regions.get(idx.checked_sub(1)?)?;
        region.contains(phys).then_some(region)
    }

    /// Dispatch a read to the region containing `phys`.
    pub fn read(&self, phys: u32, width: AccessWidth) -> Result<u64, MemoryError> {
        let region = self
            .find(phys)
            .ok_or(MemoryError::NoSuchRegion(phys))?;
        region.endpoint.lock().read(phys - region.start, width)
    }

    /// Dispatch a write to the region containing `phys`.
    pub fn write(&self, phys: u32, width: AccessWidth, value: u64) -> Result<(), MemoryError> {
        let region = self
            .find(phys)
            .ok_or(MemoryError::NoSuchRegion(phys))?;
        region
            .endpoint
            .lock()
            .write(phys - region.start, width, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScratchReg {
        value: u64,
    }

    impl MmioEndpoint for ScratchReg {
        fn name(&self) -> &str {
            "scratch"
        }

        fn read(&mut self, _offset: u32, _width: AccessWidth) -> Result<u64, MemoryError> {
            Ok(self.value)
        }

        fn write(&mut self, _offset: u32, _width: AccessWidth, value: u64) -> Result<(), MemoryError> {
            self.value = value;
            Ok(())
        }
    }

    fn scratch() -> SharedEndpoint {
        Arc::new(Mutex::new(ScratchReg { value: 0 }))
    }

    #[test]
    fn test_overlap_rejected() {
        let mut router = MmioRouter::new();
        router.register_region(0x1000, 0x100, scratch()).unwrap();

        assert!(matches!(
            router.register_region(0x10FF, 0x10, scratch()),
            Err(MemoryError::RegionOverlap { .. })
        ));
        assert!(matches!(
            router.register_region(0x0F01, 0x100, scratch()),
            Err(MemoryError::RegionOverlap { .. })
        ));
        // adjacent regions are fine
        router.register_region(0x1100, 0x100, scratch()).unwrap();
        router.register_region(0x0F00, 0x100, scratch()).unwrap();
        assert_eq!(router.region_count(), 3);
    }

    #[test]
    fn test_lookup_boundaries() {
        let mut router = MmioRouter::new();
        router.register_region(0x1000, 0x100, scratch()).unwrap();

        assert!(!router.contains(0x0FFF));
        assert!(router.contains(0x1000));
        assert!(router.contains(0x10FF));
        assert!(!router.contains(0x1100));
    }

    #[test]
    fn test_unregister() {
        let mut router = MmioRouter::new();
        router.register_region(0x1000, 0x100, scratch()).unwrap();
        assert!(router.unregister_region(0x1000));
        assert!(!router.unregister_region(0x1000));
        assert!(!router.contains(0x1000));
        // the range is free for registration again
        router.register_region(0x1000, 0x200, scratch()).unwrap();
    }

    #[test]
    fn test_read_write_round_trip() {
        let mut router = MmioRouter::new();
        router.register_region(0x2000, 0x1000, scratch()).unwrap();

        router.write(0x2010, AccessWidth::Word, 0xCAFE).unwrap();
        assert_eq!(router.read(0x2010, AccessWidth::Word).unwrap(), 0xCAFE);

        assert!(matches!(
            router.read(0x3000, AccessWidth::Word),
            Err(MemoryError::NoSuchRegion(0x3000))
        ));
    }
}
