//! System instructions: SPR and MSR moves, segment register moves, TLB
//! management, CR moves and cache operations.
//!
//! Everything here that touches translation state writes through to the
//! MMU so its caches never go stale.

use crate::decoder::Decoder;
use crate::exceptions::{self, Exception, ProgramCause};
use crate::mmu::Mmu;
use crate::state::{xer, CpuState};

/// Special purpose register numbers.
pub mod spr {
    pub const XER: u32 = 1;
    pub const LR: u32 = 8;
    pub const CTR: u32 = 9;
    pub const DSISR: u32 = 18;
    pub const DAR: u32 = 19;
    pub const DEC: u32 = 22;
    pub const SDR1: u32 = 25;
    pub const SRR0: u32 = 26;
    pub const SRR1: u32 = 27;
    pub const SPRG0: u32 = 272;
    pub const SPRG3: u32 = 275;
    pub const EAR: u32 = 282;
    pub const TBL_WRITE: u32 = 284;
    pub const TBU_WRITE: u32 = 285;
    pub const PVR: u32 = 287;
    pub const IBAT0U: u32 = 528;
    pub const IBAT3L: u32 = 535;
    pub const DBAT0U: u32 = 536;
    pub const DBAT3L: u32 = 543;
}

/// Timebase register numbers for mftb.
pub mod tbr {
    pub const TBL: u32 = 268;
    pub const TBU: u32 = 269;
}

#[inline]
fn privileged(st: &CpuState) -> Result<(), Exception> {
    if st.is_user() {
        Err(Exception::Program(ProgramCause::PrivilegedInstruction))
    } else {
        Ok(())
    }
}

/// mfspr
pub fn mfspr(st: &mut CpuState, instr: u32) -> Result<(), Exception> {
    let rt = ((instr >> 21) & 0x1F) as usize;
    let num = Decoder::spr_num(instr);

    let value = match num {
        spr::XER => st.xer,
        spr::LR => st.lr,
        spr::CTR => st.ctr,
        _ => {
            privileged(st)?;
            match num {
                spr::DSISR => st.dsisr,
                spr::DAR => st.dar,
                spr::DEC => st.dec,
                spr::SDR1 => st.sdr1,
                spr::SRR0 => st.srr0,
                spr::SRR1 => st.srr1,
                spr::SPRG0..=spr::SPRG3 => st.sprg[(num - spr::SPRG0) as usize],
                spr::EAR => st.ear,
                tbr::TBL => st.tb as u32,
                tbr::TBU => (st.tb >> 32) as u32,
                spr::PVR => st.pvr,
                spr::IBAT0U..=spr::IBAT3L => {
                    let i = ((num - spr::IBAT0U) / 2) as usize;
                    if num & 1 == 0 {
                        st.ibat_u[i]
                    } else {
                        st.ibat_l[i]
                    }
                }
                spr::DBAT0U..=spr::DBAT3L => {
                    let i = ((num - spr::DBAT0U) / 2) as usize;
                    if num & 1 == 0 {
                        st.dbat_u[i]
                    } else {
                        st.dbat_l[i]
                    }
                }
                _ => {
                    tracing::warn!("mfspr: unimplemented SPR {}", num);
                    0
                }
            }
        }
    };
    st.set_gpr(rt, value);
    Ok(())
}

/// mtspr. BAT and SDR1 writes invalidate the translation caches.
pub fn mtspr(mmu: &mut Mmu, st: &mut CpuState, instr: u32) -> Result<(), Exception> {
    let rs = ((instr >> 21) & 0x1F) as usize;
    let num = Decoder::spr_num(instr);
    let value = st.gpr(rs);

    match num {
        spr::XER => st.xer = value,
        spr::LR => st.lr = value,
        spr::CTR => st.ctr = value,
        _ => {
            privileged(st)?;
            match num {
                spr::DSISR => st.dsisr = value,
                spr::DAR => st.dar = value,
                spr::DEC => st.dec = value,
                spr::SDR1 => {
                    st.sdr1 = value;
                    mmu.invalidate_all();
                }
                spr::SRR0 => st.srr0 = value,
                spr::SRR1 => st.srr1 = value,
                spr::SPRG0..=spr::SPRG3 => st.sprg[(num - spr::SPRG0) as usize] = value,
                spr::EAR => st.ear = value,
                spr::TBL_WRITE => st.tb = (st.tb & 0xFFFF_FFFF_0000_0000) | value as u64,
                spr::TBU_WRITE => {
                    st.tb = (st.tb & 0xFFFF_FFFF) | ((value as u64) << 32)
                }
                spr::PVR => {
                    // read-only
                }
                spr::IBAT0U..=spr::IBAT3L => {
                    let i = ((num - spr::IBAT0U) / 2) as usize;
                    if num & 1 == 0 {
                        st.ibat_u[i] = value;
                    } else {
                        st.ibat_l[i] = value;
                    }
                    mmu.invalidate_all();
                }
                spr::DBAT0U..=spr::DBAT3L => {
                    let i = ((num - spr::DBAT0U) / 2) as usize;
                    if num & 1 == 0 {
                        st.dbat_u[i] = value;
                    } else {
                        st.dbat_l[i] = value;
                    }
                    mmu.invalidate_all();
                }
                _ => {
                    tracing::warn!("mtspr: unimplemented SPR {} = 0x{:08x}", num, value);
                }
            }
        }
    }
    Ok(())
}

/// mftb: user-mode timebase read.
pub fn mftb(st: &mut CpuState, instr: u32) -> Result<(), Exception> {
    let rt = ((instr >> 21) & 0x1F) as usize;
    let num = Decoder::spr_num(instr);
    let value = match num {
        tbr::TBL => st.tb as u32,
        tbr::TBU => (st.tb >> 32) as u32,
        _ => {
            tracing::warn!("mftb: unknown TBR {}", num);
            return Err(Exception::Program(ProgramCause::IllegalInstruction));
        }
    };
    st.set_gpr(rt, value);
    Ok(())
}

/// mfmsr
pub fn mfmsr(st: &mut CpuState, instr: u32) -> Result<(), Exception> {
    privileged(st)?;
    let rt = ((instr >> 21) & 0x1F) as usize;
    st.set_gpr(rt, st.msr);
    Ok(())
}

/// mtmsr
pub fn mtmsr(st: &mut CpuState, instr: u32) -> Result<(), Exception> {
    privileged(st)?;
    let rs = ((instr >> 21) & 0x1F) as usize;
    st.msr = st.gpr(rs);
    Ok(())
}

/// mfsr
pub fn mfsr(st: &mut CpuState, instr: u32) -> Result<(), Exception> {
    privileged(st)?;
    let rt = ((instr >> 21) & 0x1F) as usize;
    let sr = ((instr >> 16) & 0xF) as usize;
    st.set_gpr(rt, st.sr[sr]);
    Ok(())
}

/// mtsr
pub fn mtsr(mmu: &mut Mmu, st: &mut CpuState, instr: u32) -> Result<(), Exception> {
    privileged(st)?;
    let rs = ((instr >> 21) & 0x1F) as usize;
    let sr = ((instr >> 16) & 0xF) as usize;
    st.sr[sr] = st.gpr(rs);
    mmu.invalidate_all();
    Ok(())
}

/// mfsrin: segment register selected by the top nibble of rB.
pub fn mfsrin(st: &mut CpuState, instr: u32) -> Result<(), Exception> {
    privileged(st)?;
    let rt = ((instr >> 21) & 0x1F) as usize;
    let rb = ((instr >> 11) & 0x1F) as usize;
    let sr = (st.gpr(rb) >> 28) as usize;
    st.set_gpr(rt, st.sr[sr]);
    Ok(())
}

/// mtsrin
pub fn mtsrin(mmu: &mut Mmu, st: &mut CpuState, instr: u32) -> Result<(), Exception> {
    privileged(st)?;
    let rs = ((instr >> 21) & 0x1F) as usize;
    let rb = ((instr >> 11) & 0x1F) as usize;
    let sr = (st.gpr(rb) >> 28) as usize;
    st.sr[sr] = st.gpr(rs);
    mmu.invalidate_all();
    Ok(())
}

/// tlbie: invalidate the translations of one page.
pub fn tlbie(mmu: &mut Mmu, st: &mut CpuState, instr: u32) -> Result<(), Exception> {
    privileged(st)?;
    let rb = ((instr >> 11) & 0x1F) as usize;
    mmu.invalidate_page(st.gpr(rb));
    Ok(())
}

/// tlbia: invalidate everything.
pub fn tlbia(mmu: &mut Mmu, st: &mut CpuState) -> Result<(), Exception> {
    privileged(st)?;
    mmu.invalidate_all();
    Ok(())
}

/// rfi
pub fn rfi(st: &mut CpuState) -> Result<(), Exception> {
    privileged(st)?;
    exceptions::return_from_interrupt(st);
    Ok(())
}

/// mfcr
pub fn mfcr(st: &mut CpuState, instr: u32) {
    let rt = ((instr >> 21) & 0x1F) as usize;
    st.set_gpr(rt, st.cr);
}

/// mtcrf: move to CR under the CRM field mask.
pub fn mtcrf(st: &mut CpuState, instr: u32) {
    let rs = ((instr >> 21) & 0x1F) as usize;
    let crm = (instr >> 12) & 0xFF;
    let value = st.gpr(rs);
    for i in 0..8 {
        if crm & (0x80 >> i) != 0 {
            st.set_cr_field(i, (value >> (28 - i * 4)) & 0xF);
        }
    }
}

/// mcrxr: copy XER[SO,OV,CA] into a CR field and clear them.
pub fn mcrxr(st: &mut CpuState, instr: u32) {
    let crf = ((instr >> 23) & 7) as usize;
    st.set_cr_field(crf, st.xer >> 28);
    st.xer &= !(xer::SO | xer::OV | xer::CA);
}

/// dcbz: zero the cache line through the MMU's store path.
pub fn dcbz(mmu: &mut Mmu, st: &mut CpuState, instr: u32) -> Result<(), Exception> {
    let ra = ((instr >> 16) & 0x1F) as usize;
    let rb = ((instr >> 11) & 0x1F) as usize;
    let base = if ra == 0 { 0 } else { st.gpr(ra) };
    let ea = base.wrapping_add(st.gpr(rb));
    mmu.zero_cache_line(st, ea)
}
