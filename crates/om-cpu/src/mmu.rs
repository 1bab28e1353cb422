//! Memory management unit
//!
//! Translates guest effective addresses and bridges guest loads, stores
//! and instruction fetches to RAM or MMIO. Translation follows the 60x
//! model: with MSR[IR]/MSR[DR] clear the address is physical; otherwise
//! the BAT arrays are probed first and the segmented, hashed page table
//! is walked on a BAT miss. Results are memoised in small direct-mapped
//! caches split by access intent.
//!
//! Physical routing consults the MMIO region table before RAM, so device
//! regions may shadow any physical range the machine assigns them.

use crate::exceptions::{dsisr, srr1, Exception};
use crate::state::{msr, sr, CpuState};
use bitflags::bitflags;
use om_core::error::MemoryError;
use om_memory::{AccessWidth, MmioRouter, SystemRam};

bitflags! {
    /// Effective protection and attributes of a translated page.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageProt: u8 {
        const READ = 0b0000_0001;
        const WRITE = 0b0000_0010;
        const EXEC = 0b0000_0100;
        /// WIMG I bit: caching inhibited
        const CACHE_INHIBIT = 0b0000_1000;
        /// WIMG G bit: guarded
        const GUARDED = 0b0001_0000;

        const RWX = Self::READ.bits() | Self::WRITE.bits() | Self::EXEC.bits();
    }
}

/// Intent of a translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Fetch = 0,
    Load = 1,
    Store = 2,
}

/// One translation-cache entry. `tag` holds the virtual page number,
/// or `INVALID_TAG` when empty.
#[derive(Debug, Clone, Copy)]
struct TlbEntry {
    tag: u32,
    phys_page: u32,
    prot: PageProt,
}

const INVALID_TAG: u32 = u32::MAX;
const TLB_ENTRIES: usize = 1024;

/// PTE word-0 fields
const PTE_VALID: u32 = 0x8000_0000;
/// PTE word-1 fields
const PTE_R: u32 = 0x0000_0100;
const PTE_C: u32 = 0x0000_0080;
const PTE_WIMG_I: u32 = 0x0000_0020;
const PTE_WIMG_G: u32 = 0x0000_0008;
const PTE_RPN_MASK: u32 = 0xFFFF_F000;

/// The MMU: translation state plus the physical access bridge.
pub struct Mmu {
    pub ram: SystemRam,
    pub router: MmioRouter,
    /// Translation caches indexed by `Access`
    tlbs: [Box<[TlbEntry]>; 3],
    /// Slow-path walks taken (BAT probe or page-table walk)
    walks: u64,
}

impl Mmu {
    pub fn new(ram: SystemRam, router: MmioRouter) -> Self {
        let empty = vec![
            TlbEntry {
                tag: INVALID_TAG,
                phys_page: 0,
                prot: PageProt::empty(),
            };
            TLB_ENTRIES
        ]
        .into_boxed_slice();
        Self {
            ram,
            router,
            tlbs: [empty.clone(), empty.clone(), empty],
            walks: 0,
        }
    }

    /// Number of slow-path translations performed so far.
    pub fn table_walks(&self) -> u64 {
        self.walks
    }

    /// Drop every cached translation. Called on `tlbie`/`tlbia`, segment
    /// register writes, SDR1 writes and BAT writes.
    pub fn invalidate_all(&mut self) {
        for tlb in &mut self.tlbs {
            for entry in tlb.iter_mut() {
                entry.tag = INVALID_TAG;
            }
        }
    }

    /// Drop cached translations for the page containing `ea`.
    pub fn invalidate_page(&mut self, ea: u32) {
        let vpage = ea >> 12;
        let idx = (vpage as usize) & (TLB_ENTRIES - 1);
        for tlb in &mut self.tlbs {
            if tlb[idx].tag == vpage {
                tlb[idx].tag = INVALID_TAG;
            }
        }
    }

    // ------------------------------------------------------------------
    // Translation

    /// Translate `ea` for the given intent, performing the protection
    /// check. Returns the physical address and the page attributes.
    fn translate(
        &mut self,
        st: &CpuState,
        ea: u32,
        access: Access,
    ) -> Result<(u32, PageProt), Exception> {
        let translating = match access {
            Access::Fetch => st.msr & msr::IR != 0,
            _ => st.msr & msr::DR != 0,
        };
        if !translating {
            return Ok((ea, PageProt::RWX));
        }

        let vpage = ea >> 12;
        let idx = (vpage as usize) & (TLB_ENTRIES - 1);
        let entry = self.tlbs[access as usize][idx];
        if entry.tag == vpage {
            return Ok(((entry.phys_page << 12) | (ea & 0xFFF), entry.prot));
        }

        self.walks += 1;

        // BATs are probed first; a hit bypasses the page table entirely
        let (phys, prot) = match Self::bat_lookup(st, ea, access) {
            Some(hit) => hit,
            None => self.page_table_lookup(st, ea, access)?,
        };

        Self::check_protection(ea, access, prot)?;

        self.tlbs[access as usize][idx] = TlbEntry {
            tag: vpage,
            phys_page: phys >> 12,
            prot,
        };
        Ok((phys, prot))
    }

    /// Probe the BAT array for the access intent. A match returns the
    /// physical address and protection even when the protection forbids
    /// the access; the page table is not consulted on a match.
    fn bat_lookup(st: &CpuState, ea: u32, access: Access) -> Option<(u32, PageProt)> {
        let (upper, lower) = if access == Access::Fetch {
            (&st.ibat_u, &st.ibat_l)
        } else {
            (&st.dbat_u, &st.dbat_l)
        };

        let valid_bit = if st.is_user() { 1 } else { 2 };
        for (bu, bl) in upper.iter().zip(lower.iter()) {
            if bu & valid_bit == 0 {
                continue;
            }
            // block length mask selects which address bits the block spans
            let bl_mask = ((bu >> 2) & 0x7FF) << 17;
            if ea & 0xFFFE_0000 & !bl_mask != bu & 0xFFFE_0000 {
                continue;
            }
            let phys = (bl & 0xFFFE_0000) | (ea & (bl_mask | 0x1_FFFF));
            let mut prot = match bl & 3 {
                0 => PageProt::empty(),
                2 => PageProt::RWX,
                _ => PageProt::READ | PageProt::EXEC,
            };
            if bl & PTE_WIMG_I != 0 {
                prot |= PageProt::CACHE_INHIBIT;
            }
            if bl & PTE_WIMG_G != 0 {
                prot |= PageProt::GUARDED;
            }
            return Some((phys, prot));
        }
        None
    }

    /// Segment lookup plus hashed page-table walk.
    fn page_table_lookup(
        &mut self,
        st: &CpuState,
        ea: u32,
        access: Access,
    ) -> Result<(u32, PageProt), Exception> {
        let seg = st.sr[(ea >> 28) as usize];

        if seg & sr::T != 0 {
            // direct-store segments carry no page mapping
            tracing::warn!("direct-store segment access at 0x{:08x}", ea);
            return Err(Self::page_fault(ea, access));
        }
        if access == Access::Fetch && seg & sr::N != 0 {
            return Err(Exception::Isi {
                srr1: srr1::ISI_NO_EXECUTE,
            });
        }

        let key = if st.is_user() {
            seg & sr::KP != 0
        } else {
            seg & sr::KS != 0
        };
        let vsid = seg & sr::VSID_MASK;
        let page_index = (ea >> 12) & 0xFFFF;
        let api = (ea >> 22) & 0x3F;
        let primary_hash = (vsid & 0x7_FFFF) ^ page_index;

        for h in 0..2u32 {
            let hash = if h == 0 {
                primary_hash
            } else {
                !primary_hash & 0x7_FFFF
            };
            let pteg = Self::pteg_addr(st.sdr1, hash);
            let want_w0 = PTE_VALID | (vsid << 7) | (h << 6) | api;

            for slot in 0..8 {
                let pte_addr = pteg + slot * 8;
                let w0 = self
                    .ram
                    .read_u32(pte_addr)
                    .map_err(|e| Self::machine_check("page table read", pte_addr, &e))?;
                if w0 != want_w0 {
                    continue;
                }
                let mut w1 = self
                    .ram
                    .read_u32(pte_addr + 4)
                    .map_err(|e| Self::machine_check("page table read", pte_addr, &e))?;

                let mut prot = Self::pp_prot(key, w1 & 3);
                if w1 & PTE_WIMG_I != 0 {
                    prot |= PageProt::CACHE_INHIBIT;
                }
                if w1 & PTE_WIMG_G != 0 {
                    prot |= PageProt::GUARDED;
                }

                // referenced/changed bookkeeping: C only when the store
                // is actually permitted
                let mut new_w1 = w1 | PTE_R;
                if access == Access::Store && prot.contains(PageProt::WRITE) {
                    new_w1 |= PTE_C;
                }
                if new_w1 != w1 {
                    w1 = new_w1;
                    self.ram
                        .write_u32(pte_addr + 4, w1)
                        .map_err(|e| Self::machine_check("page table update", pte_addr, &e))?;
                }

                let phys = (w1 & PTE_RPN_MASK) | (ea & 0xFFF);
                return Ok((phys, prot));
            }
        }

        Err(Self::page_fault(ea, access))
    }

    /// Physical address of the PTEG selected by a 19-bit hash.
    fn pteg_addr(sdr1: u32, hash: u32) -> u32 {
        let htaborg = sdr1 & 0xFFFF_0000;
        let htabmask = sdr1 & 0x1FF;
        let hash_hi = (hash >> 10) & 0x1FF;
        let hash_lo = hash & 0x3FF;
        (htaborg & 0xFE00_0000)
            | (htaborg & 0x01FF_0000)
            | ((hash_hi & htabmask) << 16)
            | (hash_lo << 6)
    }

    /// Page protection from the key in effect and the PTE PP bits.
    fn pp_prot(key: bool, pp: u32) -> PageProt {
        if key {
            match pp {
                0 => PageProt::empty(),
                2 => PageProt::RWX,
                _ => PageProt::READ | PageProt::EXEC,
            }
        } else {
            match pp {
                3 => PageProt::READ | PageProt::EXEC,
                _ => PageProt::RWX,
            }
        }
    }

    fn page_fault(ea: u32, access: Access) -> Exception {
        match access {
            Access::Fetch => Exception::Isi {
                srr1: srr1::ISI_PAGE_FAULT,
            },
            Access::Load => Exception::Dsi {
                addr: ea,
                dsisr: dsisr::PAGE_FAULT,
            },
            Access::Store => Exception::Dsi {
                addr: ea,
                dsisr: dsisr::PAGE_FAULT | dsisr::STORE,
            },
        }
    }

    fn check_protection(ea: u32, access: Access, prot: PageProt) -> Result<(), Exception> {
        let ok = match access {
            Access::Fetch => prot.contains(PageProt::EXEC),
            Access::Load => prot.contains(PageProt::READ),
            Access::Store => prot.contains(PageProt::WRITE),
        };
        if ok {
            return Ok(());
        }
        Err(match access {
            Access::Fetch => Exception::Isi {
                srr1: srr1::ISI_PROTECTION,
            },
            Access::Load => Exception::Dsi {
                addr: ea,
                dsisr: dsisr::PROTECTION,
            },
            Access::Store => Exception::Dsi {
                addr: ea,
                dsisr: dsisr::PROTECTION | dsisr::STORE,
            },
        })
    }

    // ------------------------------------------------------------------
    // Physical bridge

    fn machine_check(what: &str, addr: u32, err: &MemoryError) -> Exception {
        tracing::error!("{} failed at 0x{:08x}: {}", what, addr, err);
        Exception::MachineCheck
    }

    /// Map an endpoint failure to the guest-visible event: an unsupported
    /// access width surfaces like an alignment-class data fault, anything
    /// else is a machine check.
    fn mmio_fault(ea: u32, phys: u32, err: MemoryError) -> Exception {
        match err {
            MemoryError::UnsupportedWidth { .. } => Exception::Alignment { addr: ea },
            err => Self::machine_check("MMIO access", phys, &err),
        }
    }

    fn phys_read(&mut self, ea: u32, phys: u32, width: AccessWidth) -> Result<u64, Exception> {
        if self.router.contains(phys) {
            return self
                .router
                .read(phys, width)
                .map_err(|e| Self::mmio_fault(ea, phys, e));
        }
        let value = match width {
            AccessWidth::Byte => self.ram.read_u8(phys).map(u64::from),
            AccessWidth::Half => self.ram.read_u16(phys).map(u64::from),
            AccessWidth::Word => self.ram.read_u32(phys).map(u64::from),
            AccessWidth::Double => self.ram.read_u64(phys),
        };
        value.map_err(|e| Self::machine_check("physical read", phys, &e))
    }

    fn phys_write(
        &mut self,
        ea: u32,
        phys: u32,
        width: AccessWidth,
        value: u64,
    ) -> Result<(), Exception> {
        if self.router.contains(phys) {
            return self
                .router
                .write(phys, width, value)
                .map_err(|e| Self::mmio_fault(ea, phys, e));
        }
        let result = match width {
            AccessWidth::Byte => self.ram.write_u8(phys, value as u8),
            AccessWidth::Half => self.ram.write_u16(phys, value as u16),
            AccessWidth::Word => self.ram.write_u32(phys, value as u32),
            AccessWidth::Double => self.ram.write_u64(phys, value),
        };
        result.map_err(|e| Self::machine_check("physical write", phys, &e))
    }

    // ------------------------------------------------------------------
    // Guest data path

    /// Guest load of `width` at effective address `ea`.
    pub fn read_data(
        &mut self,
        st: &CpuState,
        ea: u32,
        width: AccessWidth,
    ) -> Result<u64, Exception> {
        let size = width.bytes();
        if (ea & 0xFFF) + size > 0x1000 {
            return self.read_split(st, ea, size);
        }
        let (phys, prot) = self.translate(st, ea, Access::Load)?;
        if ea & (size - 1) != 0
            && (prot.contains(PageProt::CACHE_INHIBIT) || self.router.contains(phys))
        {
            return Err(Exception::Alignment { addr: ea });
        }
        self.phys_read(ea, phys, width)
    }

    /// Guest store of `width` at effective address `ea`.
    pub fn write_data(
        &mut self,
        st: &CpuState,
        ea: u32,
        width: AccessWidth,
        value: u64,
    ) -> Result<(), Exception> {
        let size = width.bytes();
        if (ea & 0xFFF) + size > 0x1000 {
            return self.write_split(st, ea, size, value);
        }
        let (phys, prot) = self.translate(st, ea, Access::Store)?;
        if ea & (size - 1) != 0
            && (prot.contains(PageProt::CACHE_INHIBIT) || self.router.contains(phys))
        {
            return Err(Exception::Alignment { addr: ea });
        }
        self.phys_write(ea, phys, width, value)
    }

    /// Page-straddling access: both pages translate before either half
    /// performs, so a fault in the second half leaves no visible effect.
    fn read_split(&mut self, st: &CpuState, ea: u32, size: u32) -> Result<u64, Exception> {
        let first = 0x1000 - (ea & 0xFFF);
        let (p0, prot0) = self.translate(st, ea, Access::Load)?;
        let (p1, prot1) = self.translate(st, ea.wrapping_add(first), Access::Load)?;
        self.check_split_cacheable(ea, p0, prot0, p1, prot1)?;

        let mut value = 0u64;
        for i in 0..size {
            let phys = if i < first { p0 + i } else { p1 + (i - first) };
            let byte = self
                .ram
                .read_u8(phys)
                .map_err(|e| Self::machine_check("physical read", phys, &e))?;
            value = (value << 8) | u64::from(byte);
        }
        Ok(value)
    }

    fn write_split(
        &mut self,
        st: &CpuState,
        ea: u32,
        size: u32,
        value: u64,
    ) -> Result<(), Exception> {
        let first = 0x1000 - (ea & 0xFFF);
        let (p0, prot0) = self.translate(st, ea, Access::Store)?;
        let (p1, prot1) = self.translate(st, ea.wrapping_add(first), Access::Store)?;
        self.check_split_cacheable(ea, p0, prot0, p1, prot1)?;

        for i in 0..size {
            let phys = if i < first { p0 + i } else { p1 + (i - first) };
            let byte = (value >> (8 * (size - 1 - i))) as u8;
            self.ram
                .write_u8(phys, byte)
                .map_err(|e| Self::machine_check("physical write", phys, &e))?;
        }
        Ok(())
    }

    /// Unaligned access touching a caching-inhibited or device region is
    /// an alignment exception rather than a partial device transaction.
    fn check_split_cacheable(
        &self,
        ea: u32,
        p0: u32,
        prot0: PageProt,
        p1: u32,
        prot1: PageProt,
    ) -> Result<(), Exception> {
        let inhibited = prot0.contains(PageProt::CACHE_INHIBIT)
            || prot1.contains(PageProt::CACHE_INHIBIT)
            || self.router.contains(p0)
            || self.router.contains(p1);
        if inhibited {
            Err(Exception::Alignment { addr: ea })
        } else {
            Ok(())
        }
    }

    /// Instruction fetch at `pc`.
    pub fn fetch(&mut self, st: &CpuState, pc: u32) -> Result<u32, Exception> {
        let (phys, _) = self.translate(st, pc & !3, Access::Fetch)?;
        if self.router.contains(phys) {
            return self
                .router
                .read(phys, AccessWidth::Word)
                .map(|v| v as u32)
                .map_err(|e| Self::mmio_fault(pc, phys, e));
        }
        self.ram
            .read_u32(phys)
            .map_err(|e| Self::machine_check("instruction fetch", phys, &e))
    }

    /// Zero the 32-byte cache line containing `ea` (`dcbz`). Device and
    /// caching-inhibited targets raise an alignment exception.
    pub fn zero_cache_line(&mut self, st: &CpuState, ea: u32) -> Result<(), Exception> {
        let line = ea & !0x1F;
        let (phys, prot) = self.translate(st, line, Access::Store)?;
        if prot.contains(PageProt::CACHE_INHIBIT) || self.router.contains(phys) {
            return Err(Exception::Alignment { addr: ea });
        }
        self.ram
            .fill(phys, 32, 0)
            .map_err(|e| Self::machine_check("cache line zero", phys, &e))
    }

    // Typed wrappers used by the instruction handlers.

    #[inline]
    pub fn read_u8(&mut self, st: &CpuState, ea: u32) -> Result<u8, Exception> {
        self.read_data(st, ea, AccessWidth::Byte).map(|v| v as u8)
    }

    #[inline]
    pub fn read_u16(&mut self, st: &CpuState, ea: u32) -> Result<u16, Exception> {
        self.read_data(st, ea, AccessWidth::Half).map(|v| v as u16)
    }

    #[inline]
    pub fn read_u32(&mut self, st: &CpuState, ea: u32) -> Result<u32, Exception> {
        self.read_data(st, ea, AccessWidth::Word).map(|v| v as u32)
    }

    #[inline]
    pub fn read_u64(&mut self, st: &CpuState, ea: u32) -> Result<u64, Exception> {
        self.read_data(st, ea, AccessWidth::Double)
    }

    #[inline]
    pub fn write_u8(&mut self, st: &CpuState, ea: u32, value: u8) -> Result<(), Exception> {
        self.write_data(st, ea, AccessWidth::Byte, value as u64)
    }

    #[inline]
    pub fn write_u16(&mut self, st: &CpuState, ea: u32, value: u16) -> Result<(), Exception> {
        self.write_data(st, ea, AccessWidth::Half, value as u64)
    }

    #[inline]
    pub fn write_u32(&mut self, st: &CpuState, ea: u32, value: u32) -> Result<(), Exception> {
        self.write_data(st, ea, AccessWidth::Word, value as u64)
    }

    #[inline]
    pub fn write_u64(&mut self, st: &CpuState, ea: u32, value: u64) -> Result<(), Exception> {
        self.write_data(st, ea, AccessWidth::Double, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CpuState;

    fn mmu_with_ram(size: u32) -> Mmu {
        Mmu::new(SystemRam::new(size), MmioRouter::new())
    }

    /// State with data translation on and DBAT0 mapping
    /// [0x0000_0000, 0x0002_0000) identity, read/write.
    fn state_with_dbat0() -> CpuState {
        let mut st = CpuState::new();
        st.msr |= msr::DR;
        st.dbat_u[0] = 0x0000_0002; // BEPI 0, BL 0 (128K), Vs
        st.dbat_l[0] = 0x0000_0002; // BRPN 0, PP RW
        st
    }

    #[test]
    fn test_real_mode_passthrough() {
        let mut mmu = mmu_with_ram(0x10000);
        let st = CpuState::new();
        mmu.ram.write_u32(0x1234, 0xCAFEBABE).unwrap();
        assert_eq!(mmu.read_u32(&st, 0x1234).unwrap(), 0xCAFEBABE);
        assert_eq!(mmu.table_walks(), 0);
    }

    #[test]
    fn test_bat_hit_and_translation_cache() {
        let mut mmu = mmu_with_ram(0x20000);
        let st = state_with_dbat0();
        mmu.ram.write_u32(0x1000, 0x12345678).unwrap();

        assert_eq!(mmu.read_u32(&st, 0x1000).unwrap(), 0x12345678);
        let walks = mmu.table_walks();
        assert_eq!(walks, 1);

        // the second identical load is served from the cache
        assert_eq!(mmu.read_u32(&st, 0x1000).unwrap(), 0x12345678);
        assert_eq!(mmu.table_walks(), walks);

        // invalidation forces a new walk
        mmu.invalidate_all();
        assert_eq!(mmu.read_u32(&st, 0x1000).unwrap(), 0x12345678);
        assert_eq!(mmu.table_walks(), walks + 1);
    }

    #[test]
    fn test_bat_block_bounds() {
        let mut mmu = mmu_with_ram(0x40000);
        let mut st = state_with_dbat0();
        // no page table: SDR1 points at an empty PTEG area
        st.sdr1 = 0x0003_0000;

        // inside the 128K block
        assert!(mmu.read_u32(&st, 0x1FFFC).is_ok());
        // one past the block: falls through to the (empty) page table
        assert!(matches!(
            mmu.read_u32(&st, 0x20000),
            Err(Exception::Dsi { addr: 0x20000, dsisr }) if dsisr == dsisr::PAGE_FAULT
        ));
    }

    #[test]
    fn test_bat_user_valid_bit() {
        let mut mmu = mmu_with_ram(0x20000);
        let mut st = state_with_dbat0();
        st.sdr1 = 0; // empty page table in zeroed RAM
        st.msr |= msr::PR;
        // Vs-only BAT is invisible in user mode
        assert!(matches!(
            mmu.read_u32(&st, 0x1000),
            Err(Exception::Dsi { .. })
        ));

        st.dbat_u[0] |= 1; // Vp
        mmu.invalidate_all();
        assert!(mmu.read_u32(&st, 0x1000).is_ok());
    }

    #[test]
    fn test_bat_write_protection() {
        let mut mmu = mmu_with_ram(0x20000);
        let mut st = state_with_dbat0();
        st.dbat_l[0] = 0x0000_0001; // PP read-only

        assert!(mmu.read_u32(&st, 0x100).is_ok());
        assert!(matches!(
            mmu.write_u32(&st, 0x100, 0),
            Err(Exception::Dsi { addr: 0x100, dsisr })
                if dsisr == dsisr::PROTECTION | dsisr::STORE
        ));
    }

    /// Install a single PTE mapping `ea_page` -> `phys_page` with the
    /// given PP bits, using a page table at `htaborg` with mask 0.
    fn install_pte(mmu: &mut Mmu, st: &mut CpuState, htaborg: u32, ea: u32, phys: u32, pp: u32) {
        st.sdr1 = htaborg;
        let seg = st.sr[(ea >> 28) as usize];
        let vsid = seg & sr::VSID_MASK;
        let page_index = (ea >> 12) & 0xFFFF;
        let api = (ea >> 22) & 0x3F;
        let hash = (vsid & 0x7_FFFF) ^ page_index;
        let pteg = Mmu::pteg_addr(st.sdr1, hash);
        let w0 = PTE_VALID | (vsid << 7) | api;
        let w1 = (phys & PTE_RPN_MASK) | pp;
        mmu.ram.write_u32(pteg, w0).unwrap();
        mmu.ram.write_u32(pteg + 4, w1).unwrap();
    }

    #[test]
    fn test_page_table_walk() {
        let mut mmu = mmu_with_ram(0x40000);
        let mut st = CpuState::new();
        st.msr |= msr::DR;
        install_pte(&mut mmu, &mut st, 0x0003_0000, 0x0000_5000, 0x0000_9000, 2);

        mmu.ram.write_u32(0x9010, 0xFEEDFACE).unwrap();
        assert_eq!(mmu.read_u32(&st, 0x5010).unwrap(), 0xFEEDFACE);

        // referenced bit was set in the PTE by the walk
        let seg = st.sr[0];
        let hash = (seg & sr::VSID_MASK & 0x7_FFFF) ^ 0x5;
        let pteg = Mmu::pteg_addr(st.sdr1, hash);
        assert_ne!(mmu.ram.read_u32(pteg + 4).unwrap() & PTE_R, 0);

        // stores set the changed bit
        mmu.write_u32(&st, 0x5010, 0).unwrap();
        assert_ne!(mmu.ram.read_u32(pteg + 4).unwrap() & PTE_C, 0);
    }

    #[test]
    fn test_bat_priority_over_pte() {
        let mut mmu = mmu_with_ram(0x40000);
        let mut st = state_with_dbat0();
        // PTE maps the same page elsewhere; BAT must win
        install_pte(&mut mmu, &mut st, 0x0003_0000, 0x0000_1000, 0x0000_9000, 2);
        mmu.ram.write_u32(0x1000, 0x0BA7_0BA7).unwrap();
        mmu.ram.write_u32(0x9000, 0x0707_0707).unwrap();

        assert_eq!(mmu.read_u32(&st, 0x1000).unwrap(), 0x0BA7_0BA7);

        // clearing the BAT valid bits reveals the PTE mapping
        st.dbat_u[0] = 0;
        mmu.invalidate_all();
        assert_eq!(mmu.read_u32(&st, 0x1000).unwrap(), 0x0707_0707);
    }

    #[test]
    fn test_no_execute_segment() {
        let mut mmu = mmu_with_ram(0x40000);
        let mut st = CpuState::new();
        st.msr |= msr::IR;
        st.sr[0] = sr::N;
        install_pte(&mut mmu, &mut st, 0x0003_0000, 0x0000_5000, 0x0000_9000, 2);

        assert!(matches!(
            mmu.fetch(&st, 0x5000),
            Err(Exception::Isi { srr1: bits }) if bits == srr1::ISI_NO_EXECUTE
        ));
    }

    #[test]
    fn test_split_access_round_trip() {
        let mut mmu = mmu_with_ram(0x4000);
        let st = CpuState::new();

        // word straddling a page boundary
        mmu.write_u32(&st, 0x0FFE, 0xA1B2C3D4).unwrap();
        assert_eq!(mmu.read_u32(&st, 0x0FFE).unwrap(), 0xA1B2C3D4);
        assert_eq!(mmu.ram.read_u16(0x0FFE).unwrap(), 0xA1B2);
        assert_eq!(mmu.ram.read_u16(0x1000).unwrap(), 0xC3D4);
    }

    #[test]
    fn test_split_second_page_fault_has_no_side_effects() {
        let mut mmu = mmu_with_ram(0x40000);
        let mut st = CpuState::new();
        st.msr |= msr::DR;
        // only the first page is mapped
        install_pte(&mut mmu, &mut st, 0x0003_0000, 0x0000_5000, 0x0000_9000, 2);
        mmu.ram.write_u32(0x9FFC, 0).unwrap();

        let result = mmu.write_u32(&st, 0x5FFE, 0xFFFF_FFFF);
        assert!(matches!(result, Err(Exception::Dsi { addr: 0x6000, .. })));
        // the bytes in the mapped first page are untouched
        assert_eq!(mmu.ram.read_u32(0x9FFC).unwrap(), 0);
    }

    #[test]
    fn test_unaligned_mmio_raises_alignment() {
        use om_memory::MmioEndpoint;
        use std::sync::Arc;

        struct Dummy;
        impl MmioEndpoint for Dummy {
            fn read(&mut self, _o: u32, _w: AccessWidth) -> Result<u64, MemoryError> {
                Ok(0)
            }
            fn write(&mut self, _o: u32, _w: AccessWidth, _v: u64) -> Result<(), MemoryError> {
                Ok(())
            }
        }

        let mut mmu = mmu_with_ram(0x1000);
        mmu.router
            .register_region(0xF300_0000, 0x1000, Arc::new(parking_lot::Mutex::new(Dummy)))
            .unwrap();
        let st = CpuState::new();

        assert!(mmu.read_u32(&st, 0xF300_0000).is_ok());
        assert!(matches!(
            mmu.read_u32(&st, 0xF300_0002),
            Err(Exception::Alignment { addr: 0xF300_0002 })
        ));
    }

    #[test]
    fn test_unknown_physical_is_machine_check() {
        let mut mmu = mmu_with_ram(0x1000);
        let st = CpuState::new();
        assert!(matches!(
            mmu.read_u32(&st, 0x8000_0000),
            Err(Exception::MachineCheck)
        ));
    }
}
