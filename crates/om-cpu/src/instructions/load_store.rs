//! Integer and floating-point load/store instructions
//!
//! Effective addresses follow the `(rA|0) + displacement` / `(rA|0) + rB`
//! rules; update forms write the effective address back to rA and are
//! illegal with rA=0. Byte order is handled entirely by the MMU.

use crate::decoder::Decoder;
use crate::exceptions::{Exception, ProgramCause};
use crate::instructions::float;
use crate::mmu::Mmu;
use crate::state::{xer, CpuState};

/// D-form effective address: `(rA|0) + d`
#[inline]
fn ea_d(st: &CpuState, ra: usize, d: i16) -> u32 {
    let base = if ra == 0 { 0 } else { st.gpr(ra) };
    base.wrapping_add(d as i32 as u32)
}

/// X-form effective address: `(rA|0) + rB`
#[inline]
fn ea_x(st: &CpuState, ra: usize, rb: usize) -> u32 {
    let base = if ra == 0 { 0 } else { st.gpr(ra) };
    base.wrapping_add(st.gpr(rb))
}

/// Update-form effective address; rA=0 is an illegal encoding.
#[inline]
fn ea_update_d(st: &CpuState, ra: usize, d: i16) -> Result<u32, Exception> {
    if ra == 0 {
        return Err(Exception::Program(ProgramCause::IllegalInstruction));
    }
    Ok(st.gpr(ra).wrapping_add(d as i32 as u32))
}

#[inline]
fn ea_update_x(st: &CpuState, ra: usize, rb: usize) -> Result<u32, Exception> {
    if ra == 0 {
        return Err(Exception::Program(ProgramCause::IllegalInstruction));
    }
    Ok(st.gpr(ra).wrapping_add(st.gpr(rb)))
}

/// D-form loads and stores (primary opcodes 32..55).
pub fn execute_d_form(
    mmu: &mut Mmu,
    st: &mut CpuState,
    instr: u32,
    op: u8,
) -> Result<(), Exception> {
    let (rt, ra, d) = Decoder::d_form(instr);

    match op {
        // lwz
        32 => {
            let value = mmu.read_u32(st, ea_d(st, ra, d))?;
            st.set_gpr(rt, value);
        }
        // lwzu
        33 => {
            let ea = ea_update_d(st, ra, d)?;
            let value = mmu.read_u32(st, ea)?;
            st.set_gpr(rt, value);
            st.set_gpr(ra, ea);
        }
        // lbz
        34 => {
            let value = mmu.read_u8(st, ea_d(st, ra, d))?;
            st.set_gpr(rt, value as u32);
        }
        // lbzu
        35 => {
            let ea = ea_update_d(st, ra, d)?;
            let value = mmu.read_u8(st, ea)?;
            st.set_gpr(rt, value as u32);
            st.set_gpr(ra, ea);
        }
        // stw
        36 => {
            mmu.write_u32(st, ea_d(st, ra, d), st.gpr(rt))?;
        }
        // stwu
        37 => {
            let ea = ea_update_d(st, ra, d)?;
            mmu.write_u32(st, ea, st.gpr(rt))?;
            st.set_gpr(ra, ea);
        }
        // stb
        38 => {
            mmu.write_u8(st, ea_d(st, ra, d), st.gpr(rt) as u8)?;
        }
        // stbu
        39 => {
            let ea = ea_update_d(st, ra, d)?;
            mmu.write_u8(st, ea, st.gpr(rt) as u8)?;
            st.set_gpr(ra, ea);
        }
        // lhz
        40 => {
            let value = mmu.read_u16(st, ea_d(st, ra, d))?;
            st.set_gpr(rt, value as u32);
        }
        // lhzu
        41 => {
            let ea = ea_update_d(st, ra, d)?;
            let value = mmu.read_u16(st, ea)?;
            st.set_gpr(rt, value as u32);
            st.set_gpr(ra, ea);
        }
        // lha
        42 => {
            let value = mmu.read_u16(st, ea_d(st, ra, d))?;
            st.set_gpr(rt, value as i16 as i32 as u32);
        }
        // lhau
        43 => {
            let ea = ea_update_d(st, ra, d)?;
            let value = mmu.read_u16(st, ea)?;
            st.set_gpr(rt, value as i16 as i32 as u32);
            st.set_gpr(ra, ea);
        }
        // sth
        44 => {
            mmu.write_u16(st, ea_d(st, ra, d), st.gpr(rt) as u16)?;
        }
        // sthu
        45 => {
            let ea = ea_update_d(st, ra, d)?;
            mmu.write_u16(st, ea, st.gpr(rt) as u16)?;
            st.set_gpr(ra, ea);
        }
        // lmw
        46 => {
            let mut ea = ea_d(st, ra, d);
            for reg in rt..32 {
                let value = mmu.read_u32(st, ea)?;
                st.set_gpr(reg, value);
                ea = ea.wrapping_add(4);
            }
        }
        // stmw
        47 => {
            let mut ea = ea_d(st, ra, d);
            for reg in rt..32 {
                mmu.write_u32(st, ea, st.gpr(reg))?;
                ea = ea.wrapping_add(4);
            }
        }
        // lfs
        48 => {
            float::check_available(st)?;
            let bits = mmu.read_u32(st, ea_d(st, ra, d))?;
            st.fpr[rt].set_double(f32::from_bits(bits) as f64);
        }
        // lfsu
        49 => {
            float::check_available(st)?;
            let ea = ea_update_d(st, ra, d)?;
            let bits = mmu.read_u32(st, ea)?;
            st.fpr[rt].set_double(f32::from_bits(bits) as f64);
            st.set_gpr(ra, ea);
        }
        // lfd
        50 => {
            float::check_available(st)?;
            let bits = mmu.read_u64(st, ea_d(st, ra, d))?;
            st.fpr[rt].set_bits(bits);
        }
        // lfdu
        51 => {
            float::check_available(st)?;
            let ea = ea_update_d(st, ra, d)?;
            let bits = mmu.read_u64(st, ea)?;
            st.fpr[rt].set_bits(bits);
            st.set_gpr(ra, ea);
        }
        // stfs
        52 => {
            float::check_available(st)?;
            let bits = (st.fpr[rt].as_double() as f32).to_bits();
            mmu.write_u32(st, ea_d(st, ra, d), bits)?;
        }
        // stfsu
        53 => {
            float::check_available(st)?;
            let ea = ea_update_d(st, ra, d)?;
            let bits = (st.fpr[rt].as_double() as f32).to_bits();
            mmu.write_u32(st, ea, bits)?;
            st.set_gpr(ra, ea);
        }
        // stfd
        54 => {
            float::check_available(st)?;
            mmu.write_u64(st, ea_d(st, ra, d), st.fpr[rt].bits())?;
        }
        // stfdu
        55 => {
            float::check_available(st)?;
            let ea = ea_update_d(st, ra, d)?;
            mmu.write_u64(st, ea, st.fpr[rt].bits())?;
            st.set_gpr(ra, ea);
        }
        _ => {
            return Err(Exception::Program(ProgramCause::IllegalInstruction));
        }
    }
    Ok(())
}

/// X-form loads, stores, string ops and the reservation pair.
pub fn execute_x_form(
    mmu: &mut Mmu,
    st: &mut CpuState,
    instr: u32,
    xo: u16,
) -> Result<(), Exception> {
    let (rt, ra, rb, _) = Decoder::x_form(instr);

    match xo {
        // lwzx
        23 => {
            let value = mmu.read_u32(st, ea_x(st, ra, rb))?;
            st.set_gpr(rt, value);
        }
        // lwzux
        55 => {
            let ea = ea_update_x(st, ra, rb)?;
            let value = mmu.read_u32(st, ea)?;
            st.set_gpr(rt, value);
            st.set_gpr(ra, ea);
        }
        // lbzx
        87 => {
            let value = mmu.read_u8(st, ea_x(st, ra, rb))?;
            st.set_gpr(rt, value as u32);
        }
        // lbzux
        119 => {
            let ea = ea_update_x(st, ra, rb)?;
            let value = mmu.read_u8(st, ea)?;
            st.set_gpr(rt, value as u32);
            st.set_gpr(ra, ea);
        }
        // lhzx
        279 => {
            let value = mmu.read_u16(st, ea_x(st, ra, rb))?;
            st.set_gpr(rt, value as u32);
        }
        // lhzux
        311 => {
            let ea = ea_update_x(st, ra, rb)?;
            let value = mmu.read_u16(st, ea)?;
            st.set_gpr(rt, value as u32);
            st.set_gpr(ra, ea);
        }
        // lhax
        343 => {
            let value = mmu.read_u16(st, ea_x(st, ra, rb))?;
            st.set_gpr(rt, value as i16 as i32 as u32);
        }
        // lhaux
        375 => {
            let ea = ea_update_x(st, ra, rb)?;
            let value = mmu.read_u16(st, ea)?;
            st.set_gpr(rt, value as i16 as i32 as u32);
            st.set_gpr(ra, ea);
        }
        // stwx
        151 => {
            mmu.write_u32(st, ea_x(st, ra, rb), st.gpr(rt))?;
        }
        // stwux
        183 => {
            let ea = ea_update_x(st, ra, rb)?;
            mmu.write_u32(st, ea, st.gpr(rt))?;
            st.set_gpr(ra, ea);
        }
        // stbx
        215 => {
            mmu.write_u8(st, ea_x(st, ra, rb), st.gpr(rt) as u8)?;
        }
        // stbux
        247 => {
            let ea = ea_update_x(st, ra, rb)?;
            mmu.write_u8(st, ea, st.gpr(rt) as u8)?;
            st.set_gpr(ra, ea);
        }
        // sthx
        407 => {
            mmu.write_u16(st, ea_x(st, ra, rb), st.gpr(rt) as u16)?;
        }
        // sthux
        439 => {
            let ea = ea_update_x(st, ra, rb)?;
            mmu.write_u16(st, ea, st.gpr(rt) as u16)?;
            st.set_gpr(ra, ea);
        }
        // lhbrx
        790 => {
            let value = mmu.read_u16(st, ea_x(st, ra, rb))?;
            st.set_gpr(rt, value.swap_bytes() as u32);
        }
        // lwbrx
        534 => {
            let value = mmu.read_u32(st, ea_x(st, ra, rb))?;
            st.set_gpr(rt, value.swap_bytes());
        }
        // sthbrx
        918 => {
            mmu.write_u16(st, ea_x(st, ra, rb), (st.gpr(rt) as u16).swap_bytes())?;
        }
        // stwbrx
        662 => {
            mmu.write_u32(st, ea_x(st, ra, rb), st.gpr(rt).swap_bytes())?;
        }
        // lwarx
        20 => {
            let ea = ea_x(st, ra, rb);
            let value = mmu.read_u32(st, ea)?;
            st.reservation = Some(ea & !3);
            st.set_gpr(rt, value);
        }
        // stwcx.
        150 => {
            let ea = ea_x(st, ra, rb);
            let success = st.reservation == Some(ea & !3);
            if success {
                mmu.write_u32(st, ea, st.gpr(rt))?;
            }
            st.reservation = None;
            let mut c = if success { 0b0010 } else { 0 };
            if st.xer_so() {
                c |= 1;
            }
            st.set_cr_field(0, c);
        }
        // lswi
        597 => {
            let ea = if ra == 0 { 0 } else { st.gpr(ra) };
            let count = if rb == 0 { 32 } else { rb as u32 };
            load_string(mmu, st, rt, ea, count)?;
        }
        // lswx
        533 => {
            let ea = ea_x(st, ra, rb);
            let count = st.xer & xer::COUNT_MASK;
            load_string(mmu, st, rt, ea, count)?;
        }
        // stswi
        725 => {
            let ea = if ra == 0 { 0 } else { st.gpr(ra) };
            let count = if rb == 0 { 32 } else { rb as u32 };
            store_string(mmu, st, rt, ea, count)?;
        }
        // stswx
        661 => {
            let ea = ea_x(st, ra, rb);
            let count = st.xer & xer::COUNT_MASK;
            store_string(mmu, st, rt, ea, count)?;
        }
        // lfsx
        535 => {
            float::check_available(st)?;
            let bits = mmu.read_u32(st, ea_x(st, ra, rb))?;
            st.fpr[rt].set_double(f32::from_bits(bits) as f64);
        }
        // lfsux
        567 => {
            float::check_available(st)?;
            let ea = ea_update_x(st, ra, rb)?;
            let bits = mmu.read_u32(st, ea)?;
            st.fpr[rt].set_double(f32::from_bits(bits) as f64);
            st.set_gpr(ra, ea);
        }
        // lfdx
        599 => {
            float::check_available(st)?;
            let bits = mmu.read_u64(st, ea_x(st, ra, rb))?;
            st.fpr[rt].set_bits(bits);
        }
        // lfdux
        631 => {
            float::check_available(st)?;
            let ea = ea_update_x(st, ra, rb)?;
            let bits = mmu.read_u64(st, ea)?;
            st.fpr[rt].set_bits(bits);
            st.set_gpr(ra, ea);
        }
        // stfsx
        663 => {
            float::check_available(st)?;
            let bits = (st.fpr[rt].as_double() as f32).to_bits();
            mmu.write_u32(st, ea_x(st, ra, rb), bits)?;
        }
        // stfsux
        695 => {
            float::check_available(st)?;
            let ea = ea_update_x(st, ra, rb)?;
            let bits = (st.fpr[rt].as_double() as f32).to_bits();
            mmu.write_u32(st, ea, bits)?;
            st.set_gpr(ra, ea);
        }
        // stfdx
        727 => {
            float::check_available(st)?;
            mmu.write_u64(st, ea_x(st, ra, rb), st.fpr[rt].bits())?;
        }
        // stfdux
        759 => {
            float::check_available(st)?;
            let ea = ea_update_x(st, ra, rb)?;
            mmu.write_u64(st, ea, st.fpr[rt].bits())?;
            st.set_gpr(ra, ea);
        }
        // stfiwx: low word of the raw integer view, no conversion
        983 => {
            float::check_available(st)?;
            mmu.write_u32(st, ea_x(st, ra, rb), st.fpr[rt].bits() as u32)?;
        }
        _ => {
            tracing::warn!("unimplemented X-form memory op {} (0x{:08x})", xo, instr);
            return Err(Exception::Program(ProgramCause::IllegalInstruction));
        }
    }
    Ok(())
}

/// Load `count` bytes into successive registers starting at `rt`,
/// four bytes per register left-justified, wrapping past r31.
fn load_string(
    mmu: &mut Mmu,
    st: &mut CpuState,
    rt: usize,
    mut ea: u32,
    count: u32,
) -> Result<(), Exception> {
    let mut reg = rt;
    let mut value = 0u32;
    let mut shift = 24u32;
    for _ in 0..count {
        let byte = mmu.read_u8(st, ea)?;
        value |= (byte as u32) << shift;
        ea = ea.wrapping_add(1);
        if shift == 0 {
            st.set_gpr(reg, value);
            reg = (reg + 1) & 31;
            value = 0;
            shift = 24;
        } else {
            shift -= 8;
        }
    }
    if shift != 24 {
        st.set_gpr(reg, value);
    }
    Ok(())
}

/// Store `count` bytes from successive registers starting at `rt`.
fn store_string(
    mmu: &mut Mmu,
    st: &mut CpuState,
    rt: usize,
    mut ea: u32,
    count: u32,
) -> Result<(), Exception> {
    let mut reg = rt;
    let mut shift = 24u32;
    for _ in 0..count {
        mmu.write_u8(st, ea, (st.gpr(reg) >> shift) as u8)?;
        ea = ea.wrapping_add(1);
        if shift == 0 {
            reg = (reg + 1) & 31;
            shift = 24;
        } else {
            shift -= 8;
        }
    }
    Ok(())
}
