//! Floating-point instructions
//!
//! Arithmetic operates on IEEE-754 doubles; single-precision variants
//! compute in double precision and round the result to single. Every
//! arithmetic instruction clears the fields it computes fresh, applies
//! the invalid-operation cause table, derives FPCC from the result, and
//! recomputes the exception summaries. FX is sticky and cleared only by
//! explicit software writes.

use crate::exceptions::{Exception, ProgramCause};
use crate::state::{msr, CpuState};

/// FPSCR bit masks.
pub mod fpscr {
    /// FP exception summary (sticky)
    pub const FX: u32 = 0x8000_0000;
    /// FP enabled exception summary (derived)
    pub const FEX: u32 = 0x4000_0000;
    /// Invalid-operation summary (derived)
    pub const VX: u32 = 0x2000_0000;
    pub const OX: u32 = 0x1000_0000;
    pub const UX: u32 = 0x0800_0000;
    pub const ZX: u32 = 0x0400_0000;
    pub const XX: u32 = 0x0200_0000;
    pub const VXSNAN: u32 = 0x0100_0000;
    pub const VXISI: u32 = 0x0080_0000;
    pub const VXIDI: u32 = 0x0040_0000;
    pub const VXZDZ: u32 = 0x0020_0000;
    pub const VXIMZ: u32 = 0x0010_0000;
    pub const VXVC: u32 = 0x0008_0000;
    pub const FR: u32 = 0x0004_0000;
    pub const FI: u32 = 0x0002_0000;
    /// Result flags: C plus the FPCC nibble
    pub const FPRF_MASK: u32 = 0x0001_F000;
    pub const FPRF_C: u32 = 0x0001_0000;
    pub const FPCC_FL: u32 = 0x0000_8000;
    pub const FPCC_FG: u32 = 0x0000_4000;
    pub const FPCC_FE: u32 = 0x0000_2000;
    pub const FPCC_FU: u32 = 0x0000_1000;
    pub const VXSOFT: u32 = 0x0000_0400;
    pub const VXSQRT: u32 = 0x0000_0200;
    pub const VXCVI: u32 = 0x0000_0100;
    pub const VE: u32 = 0x0000_0080;
    pub const OE: u32 = 0x0000_0040;
    pub const UE: u32 = 0x0000_0020;
    pub const ZE: u32 = 0x0000_0010;
    pub const XE: u32 = 0x0000_0008;
    pub const NI: u32 = 0x0000_0004;
    pub const RN_MASK: u32 = 0x0000_0003;

    /// All individual invalid-operation cause bits
    pub const VX_CAUSES: u32 =
        VXSNAN | VXISI | VXIDI | VXZDZ | VXIMZ | VXVC | VXSOFT | VXSQRT | VXCVI;
    /// Sticky exception bits software clears explicitly (mcrfs)
    pub const STICKY: u32 = FX | OX | UX | ZX | XX | VX_CAUSES;
}

/// Default quiet NaN produced by invalid operations.
const DEFAULT_QNAN: u64 = 0x7FF8_0000_0000_0000;
/// Quiet bit of the double fraction.
const QUIET_BIT: u64 = 0x0008_0000_0000_0000;
/// High-word tag marking an integer payload in an FPR.
const INT_TAG: u64 = 0xFFF8_0000_0000_0000;

#[inline]
fn is_snan(v: f64) -> bool {
    v.is_nan() && v.to_bits() & QUIET_BIT == 0
}

#[inline]
fn quiet(v: f64) -> f64 {
    f64::from_bits(v.to_bits() | QUIET_BIT)
}

/// FP instructions with MSR[FP] clear take the FP-unavailable exception.
#[inline]
pub fn check_available(st: &CpuState) -> Result<(), Exception> {
    if st.fp_available() {
        Ok(())
    } else {
        Err(Exception::FpUnavailable)
    }
}

/// Recompute the VX summary from the individual cause bits.
fn update_vx(st: &mut CpuState) {
    if st.fpscr & fpscr::VX_CAUSES != 0 {
        st.fpscr |= fpscr::VX;
    } else {
        st.fpscr &= !fpscr::VX;
    }
}

/// Recompute FEX as the OR of enabled exception summaries.
pub fn update_fex(st: &mut CpuState) {
    let f = st.fpscr;
    let fex = (f & fpscr::VX != 0 && f & fpscr::VE != 0)
        || (f & fpscr::OX != 0 && f & fpscr::OE != 0)
        || (f & fpscr::UX != 0 && f & fpscr::UE != 0)
        || (f & fpscr::ZX != 0 && f & fpscr::ZE != 0)
        || (f & fpscr::XX != 0 && f & fpscr::XE != 0);
    if fex {
        st.fpscr |= fpscr::FEX;
    } else {
        st.fpscr &= !fpscr::FEX;
    }
}

/// Record an exception: FX plus the given cause bits, then recompute the
/// summaries.
fn set_exception(st: &mut CpuState, causes: u32) {
    st.fpscr |= fpscr::FX | causes;
    update_vx(st);
    update_fex(st);
}

/// Clear the fields this instruction computes fresh: result flags,
/// FR/FI, and the cause bits it may set.
fn prepare(st: &mut CpuState, causes: u32) {
    st.fpscr &= !(fpscr::FPRF_MASK | fpscr::FR | fpscr::FI | causes);
}

/// An enabled FP exception is delivered as a program exception; the
/// target register is not updated in that case.
fn pending_fp_trap(st: &CpuState) -> bool {
    st.fpscr & fpscr::FEX != 0 && st.msr & (msr::FE0 | msr::FE1) != 0
}

/// Derive the FPRF field (C plus FPCC) from a result.
pub fn update_fprf(st: &mut CpuState, value: f64) {
    let bits = value.to_bits();
    let negative = bits >> 63 != 0;
    let fprf = if value.is_nan() {
        fpscr::FPRF_C | fpscr::FPCC_FU
    } else if value.is_infinite() {
        if negative {
            fpscr::FPCC_FL | fpscr::FPCC_FU
        } else {
            fpscr::FPCC_FG | fpscr::FPCC_FU
        }
    } else if value == 0.0 {
        if negative {
            fpscr::FPRF_C | fpscr::FPCC_FE
        } else {
            fpscr::FPCC_FE
        }
    } else {
        let denormal = bits & 0x7FF0_0000_0000_0000 == 0;
        let sign_flag = if negative {
            fpscr::FPCC_FL
        } else {
            fpscr::FPCC_FG
        };
        if denormal {
            fpscr::FPRF_C | sign_flag
        } else {
            sign_flag
        }
    };
    st.fpscr = (st.fpscr & !fpscr::FPRF_MASK) | fprf;
}

/// Copy FPSCR[FX|FEX|VX|OX] into CR1.
pub fn update_cr1(st: &mut CpuState) {
    let nibble = st.fpscr >> 28;
    st.set_cr_field(1, nibble);
}

// The `libc` crate does not expose <fenv.h> bindings, so declare the
// glibc/musl x86_64 rounding-mode constants and `fesetround` ourselves.
#[cfg(unix)]
mod fenv {
    pub const FE_TONEAREST: i32 = 0x0000;
    pub const FE_DOWNWARD: i32 = 0x0400;
    pub const FE_UPWARD: i32 = 0x0800;
    pub const FE_TOWARDZERO: i32 = 0x0c00;

    extern "C" {
        pub fn fesetround(round: i32) -> i32;
    }
}

/// Synchronise the host FPU rounding mode with FPSCR[RN].
#[cfg(unix)]
pub fn sync_host_rounding(st: &CpuState) {
    let mode = match st.fpscr & fpscr::RN_MASK {
        0 => fenv::FE_TONEAREST,
        1 => fenv::FE_TOWARDZERO,
        2 => fenv::FE_UPWARD,
        _ => fenv::FE_DOWNWARD,
    };
    unsafe {
        fenv::fesetround(mode);
    }
}

#[cfg(not(unix))]
pub fn sync_host_rounding(_st: &CpuState) {}

/// NaN-operand handling shared by the arithmetic ops: record VXSNAN for
/// signalling operands (bare FX otherwise) and propagate the first NaN
/// operand, quieted.
fn nan_result(st: &mut CpuState, operands: &[f64]) -> f64 {
    if operands.iter().any(|v| is_snan(*v)) {
        set_exception(st, fpscr::VXSNAN);
    } else {
        st.fpscr |= fpscr::FX;
    }
    for v in operands {
        if v.is_nan() {
            return quiet(*v);
        }
    }
    f64::from_bits(DEFAULT_QNAN)
}

/// Common tail: optional rounding to single, trap check, result write,
/// FPCC derivation, CR1 copy.
fn finish(
    st: &mut CpuState,
    d: usize,
    result: f64,
    single: bool,
    rc: bool,
) -> Result<(), Exception> {
    let result = if single { result as f32 as f64 } else { result };
    if pending_fp_trap(st) {
        return Err(Exception::Program(ProgramCause::FpEnabled));
    }
    st.fpr[d].set_double(result);
    update_fprf(st, result);
    if rc {
        update_cr1(st);
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Arithmetic

pub fn fadd(
    st: &mut CpuState,
    d: usize,
    a: usize,
    b: usize,
    single: bool,
    rc: bool,
) -> Result<(), Exception> {
    let va = st.fpr[a].as_double();
    let vb = st.fpr[b].as_double();
    prepare(st, fpscr::VXISI | fpscr::VXSNAN);

    let result = if va.is_nan() || vb.is_nan() {
        if va.is_nan() && vb.is_nan() {
            set_exception(st, fpscr::VXISI);
        }
        nan_result(st, &[va, vb])
    } else if va.is_infinite()
        && vb.is_infinite()
        && va.is_sign_positive() != vb.is_sign_positive()
    {
        set_exception(st, fpscr::VXISI);
        f64::from_bits(DEFAULT_QNAN)
    } else {
        va + vb
    };
    finish(st, d, result, single, rc)
}

pub fn fsub(
    st: &mut CpuState,
    d: usize,
    a: usize,
    b: usize,
    single: bool,
    rc: bool,
) -> Result<(), Exception> {
    let va = st.fpr[a].as_double();
    let vb = st.fpr[b].as_double();
    prepare(st, fpscr::VXISI | fpscr::VXSNAN);

    let result = if va.is_nan() || vb.is_nan() {
        if va.is_nan() && vb.is_nan() {
            set_exception(st, fpscr::VXISI);
        }
        nan_result(st, &[va, vb])
    } else if va.is_infinite()
        && vb.is_infinite()
        && va.is_sign_positive() == vb.is_sign_positive()
    {
        set_exception(st, fpscr::VXISI);
        f64::from_bits(DEFAULT_QNAN)
    } else {
        va - vb
    };
    finish(st, d, result, single, rc)
}

pub fn fmul(
    st: &mut CpuState,
    d: usize,
    a: usize,
    c: usize,
    single: bool,
    rc: bool,
) -> Result<(), Exception> {
    let va = st.fpr[a].as_double();
    let vc = st.fpr[c].as_double();
    prepare(st, fpscr::VXIMZ | fpscr::VXSNAN);

    let result = if va.is_nan() || vc.is_nan() {
        nan_result(st, &[va, vc])
    } else if (va == 0.0 && vc.is_infinite()) || (va.is_infinite() && vc == 0.0) {
        set_exception(st, fpscr::VXIMZ);
        f64::from_bits(DEFAULT_QNAN)
    } else {
        va * vc
    };
    finish(st, d, result, single, rc)
}

pub fn fdiv(
    st: &mut CpuState,
    d: usize,
    a: usize,
    b: usize,
    single: bool,
    rc: bool,
) -> Result<(), Exception> {
    let va = st.fpr[a].as_double();
    let vb = st.fpr[b].as_double();
    prepare(st, fpscr::VXIDI | fpscr::VXZDZ | fpscr::VXSNAN);

    let result = if va.is_nan() || vb.is_nan() {
        nan_result(st, &[va, vb])
    } else if va.is_infinite() && vb.is_infinite() {
        set_exception(st, fpscr::VXIDI);
        f64::from_bits(DEFAULT_QNAN)
    } else if va == 0.0 && vb == 0.0 {
        set_exception(st, fpscr::VXZDZ);
        f64::from_bits(DEFAULT_QNAN)
    } else {
        if vb == 0.0 {
            set_exception(st, fpscr::ZX);
        }
        va / vb
    };
    finish(st, d, result, single, rc)
}

pub fn fsqrt(
    st: &mut CpuState,
    d: usize,
    b: usize,
    single: bool,
    rc: bool,
) -> Result<(), Exception> {
    let vb = st.fpr[b].as_double();
    prepare(st, fpscr::VXSQRT | fpscr::VXSNAN);

    let result = if vb.is_nan() {
        set_exception(st, fpscr::VXSQRT);
        nan_result(st, &[vb])
    } else if vb < 0.0 {
        set_exception(st, fpscr::VXSQRT);
        f64::from_bits(DEFAULT_QNAN)
    } else {
        vb.sqrt()
    };
    finish(st, d, result, single, rc)
}

/// The fused multiply-add family: `(frA × frC) ± frB`, optionally
/// negated, with a single rounding at the end.
#[allow(clippy::too_many_arguments)]
pub fn fmadd(
    st: &mut CpuState,
    d: usize,
    a: usize,
    b: usize,
    c: usize,
    sub_b: bool,
    negate: bool,
    single: bool,
    rc: bool,
) -> Result<(), Exception> {
    let va = st.fpr[a].as_double();
    let vb = st.fpr[b].as_double();
    let vc = st.fpr[c].as_double();
    prepare(st, fpscr::VXIMZ | fpscr::VXISI | fpscr::VXSNAN);

    let eff_b = if sub_b { -vb } else { vb };
    let result = if va.is_nan() || vb.is_nan() || vc.is_nan() {
        nan_result(st, &[va, vb, vc])
    } else if (va == 0.0 && vc.is_infinite()) || (va.is_infinite() && vc == 0.0) {
        set_exception(st, fpscr::VXIMZ);
        f64::from_bits(DEFAULT_QNAN)
    } else if (va.is_infinite() || vc.is_infinite())
        && eff_b.is_infinite()
        && (va.is_sign_negative() ^ vc.is_sign_negative()) != eff_b.is_sign_negative()
    {
        set_exception(st, fpscr::VXISI);
        f64::from_bits(DEFAULT_QNAN)
    } else {
        let fused = va.mul_add(vc, eff_b);
        if negate {
            -fused
        } else {
            fused
        }
    };
    finish(st, d, result, single, rc)
}

/// Reciprocal estimate: computed at single precision, which comfortably
/// exceeds the architectural accuracy floor.
pub fn fres(st: &mut CpuState, d: usize, b: usize, rc: bool) -> Result<(), Exception> {
    let vb = st.fpr[b].as_double();
    prepare(st, fpscr::VXSNAN);

    let result = if vb.is_nan() {
        nan_result(st, &[vb])
    } else {
        if vb == 0.0 {
            set_exception(st, fpscr::ZX);
        }
        (1.0 / vb) as f32 as f64
    };
    finish(st, d, result, false, rc)
}

/// Reciprocal square-root estimate.
pub fn frsqrte(st: &mut CpuState, d: usize, b: usize, rc: bool) -> Result<(), Exception> {
    let vb = st.fpr[b].as_double();
    prepare(st, fpscr::VXSQRT | fpscr::VXSNAN);

    let result = if vb.is_nan() {
        set_exception(st, fpscr::VXSQRT);
        nan_result(st, &[vb])
    } else if vb < 0.0 {
        set_exception(st, fpscr::VXSQRT);
        f64::from_bits(DEFAULT_QNAN)
    } else {
        if vb == 0.0 {
            set_exception(st, fpscr::ZX);
        }
        1.0 / vb.sqrt()
    };
    finish(st, d, result, false, rc)
}

/// Branchless select: `frD = (frA >= -0.0) ? frC : frB`. Never raises,
/// even for NaN operands.
pub fn fsel(
    st: &mut CpuState,
    d: usize,
    a: usize,
    b: usize,
    c: usize,
    rc: bool,
) -> Result<(), Exception> {
    let va = st.fpr[a].as_double();
    let bits = if va >= -0.0 {
        st.fpr[c].bits()
    } else {
        st.fpr[b].bits()
    };
    st.fpr[d].set_bits(bits);
    if rc {
        update_cr1(st);
    }
    Ok(())
}

/// Round to single precision.
pub fn frsp(st: &mut CpuState, d: usize, b: usize, rc: bool) -> Result<(), Exception> {
    let vb = st.fpr[b].as_double();
    prepare(st, fpscr::VXSNAN);
    let result = if vb.is_nan() {
        nan_result(st, &[vb])
    } else {
        vb as f32 as f64
    };
    finish(st, d, result, false, rc)
}

// ---------------------------------------------------------------------
// Moves (no status side effects beyond CR1)

pub fn fmr(st: &mut CpuState, d: usize, b: usize, rc: bool) {
    let bits = st.fpr[b].bits();
    st.fpr[d].set_bits(bits);
    if rc {
        update_cr1(st);
    }
}

pub fn fneg(st: &mut CpuState, d: usize, b: usize, rc: bool) {
    let bits = st.fpr[b].bits() ^ 0x8000_0000_0000_0000;
    st.fpr[d].set_bits(bits);
    if rc {
        update_cr1(st);
    }
}

pub fn fabs(st: &mut CpuState, d: usize, b: usize, rc: bool) {
    let bits = st.fpr[b].bits() & !0x8000_0000_0000_0000;
    st.fpr[d].set_bits(bits);
    if rc {
        update_cr1(st);
    }
}

pub fn fnabs(st: &mut CpuState, d: usize, b: usize, rc: bool) {
    let bits = st.fpr[b].bits() | 0x8000_0000_0000_0000;
    st.fpr[d].set_bits(bits);
    if rc {
        update_cr1(st);
    }
}

// ---------------------------------------------------------------------
// Conversions

/// Convert to integer word. `force_zero` selects truncation (fctiwz);
/// otherwise FPSCR[RN] governs. The integer lands in the low word with
/// the high word tagged 0xFFF80000.
pub fn fctiw(
    st: &mut CpuState,
    d: usize,
    b: usize,
    force_zero: bool,
    rc: bool,
) -> Result<(), Exception> {
    let vb = st.fpr[b].as_double();
    prepare(st, fpscr::VXCVI | fpscr::VXSNAN);

    let bits = if vb.is_nan() {
        let snan = if is_snan(vb) { fpscr::VXSNAN } else { 0 };
        set_exception(st, fpscr::VXCVI | snan);
        if pending_fp_trap(st) {
            return Err(Exception::Program(ProgramCause::FpEnabled));
        }
        INT_TAG | 0x8000_0000
    } else {
        let mode = if force_zero {
            1
        } else {
            st.fpscr & fpscr::RN_MASK
        };
        let rounded = match mode {
            0 => round_nearest_even(vb),
            1 => vb.trunc(),
            2 => vb.ceil(),
            _ => vb.floor(),
        };
        if rounded > i32::MAX as f64 || rounded < i32::MIN as f64 {
            set_exception(st, fpscr::VXCVI);
            if pending_fp_trap(st) {
                return Err(Exception::Program(ProgramCause::FpEnabled));
            }
            let sentinel = if rounded >= 0.0 {
                0x7FFF_FFFFu32
            } else {
                0x8000_0000u32
            };
            INT_TAG | sentinel as u64
        } else {
            INT_TAG | (rounded as i32 as u32) as u64
        }
    };

    st.fpr[d].set_bits(bits);
    if rc {
        update_cr1(st);
    }
    Ok(())
}

/// Round-half-to-even without touching the host rounding mode.
fn round_nearest_even(v: f64) -> f64 {
    let floor = v.floor();
    let frac = v - floor;
    if frac > 0.5 {
        floor + 1.0
    } else if frac < 0.5 {
        floor
    } else if floor / 2.0 == (floor / 2.0).trunc() {
        floor
    } else {
        floor + 1.0
    }
}

// ---------------------------------------------------------------------
// Compares

/// fcmpu / fcmpo. Updates FPCC and the named CR field; the ordered form
/// records VXVC on any NaN, and either form records VXSNAN for a
/// signalling operand.
pub fn fcmp(st: &mut CpuState, instr: u32, ordered: bool) -> Result<(), Exception> {
    let crf = ((instr >> 23) & 7) as usize;
    let a = ((instr >> 16) & 0x1F) as usize;
    let b = ((instr >> 11) & 0x1F) as usize;
    let va = st.fpr[a].as_double();
    let vb = st.fpr[b].as_double();

    let c = if va.is_nan() || vb.is_nan() {
        0b0001
    } else if va < vb {
        0b1000
    } else if va > vb {
        0b0100
    } else {
        0b0010
    };

    st.fpscr = (st.fpscr & !0xF000) | (c << 12);
    st.set_cr_field(crf, c);

    if va.is_nan() || vb.is_nan() {
        let mut causes = 0;
        if is_snan(va) || is_snan(vb) {
            causes |= fpscr::VXSNAN;
        }
        if ordered {
            causes |= fpscr::VXVC;
        }
        if causes != 0 {
            set_exception(st, causes);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------
// FPSCR moves

/// mffs: the FPSCR image in the low word, high word tagged.
pub fn mffs(st: &mut CpuState, d: usize, rc: bool) {
    st.fpr[d].set_bits(INT_TAG | st.fpscr as u64);
    if rc {
        update_cr1(st);
    }
}

/// mtfsf: copy FPSCR fields from frB under an 8-nibble mask. FEX and VX
/// cannot be written directly; the summaries are recomputed instead.
pub fn mtfsf(st: &mut CpuState, fm: u8, b: usize, rc: bool) -> Result<(), Exception> {
    let mut mask = 0u32;
    for i in 0..8 {
        if fm & (0x80 >> i) != 0 {
            mask |= 0xF000_0000 >> (i * 4);
        }
    }
    mask &= !(fpscr::FEX | fpscr::VX);

    let bits = st.fpr[b].bits() as u32;
    st.fpscr = (st.fpscr & !mask) | (bits & mask);
    update_vx(st);
    update_fex(st);
    sync_host_rounding(st);
    if rc {
        update_cr1(st);
    }
    if pending_fp_trap(st) {
        return Err(Exception::Program(ProgramCause::FpEnabled));
    }
    Ok(())
}

/// mtfsfi: one immediate nibble into the named field.
pub fn mtfsfi(st: &mut CpuState, crf: u32, imm: u32, rc: bool) -> Result<(), Exception> {
    let shift = 28 - crf * 4;
    let mask = (0xFu32 << shift) & !(fpscr::FEX | fpscr::VX);
    st.fpscr = (st.fpscr & !mask) | (((imm & 0xF) << shift) & mask);
    update_vx(st);
    update_fex(st);
    sync_host_rounding(st);
    if rc {
        update_cr1(st);
    }
    if pending_fp_trap(st) {
        return Err(Exception::Program(ProgramCause::FpEnabled));
    }
    Ok(())
}

/// mtfsb0: clear one FPSCR bit. FEX and VX cannot be cleared explicitly.
pub fn mtfsb0(st: &mut CpuState, bt: u32, rc: bool) {
    if bt != 1 && bt != 2 {
        st.fpscr &= !(0x8000_0000 >> bt);
        update_vx(st);
        update_fex(st);
        sync_host_rounding(st);
    }
    if rc {
        update_cr1(st);
    }
}

/// mtfsb1: set one FPSCR bit. FEX and VX cannot be set explicitly.
pub fn mtfsb1(st: &mut CpuState, bt: u32, rc: bool) -> Result<(), Exception> {
    if bt != 1 && bt != 2 {
        st.fpscr |= 0x8000_0000 >> bt;
        update_vx(st);
        update_fex(st);
        sync_host_rounding(st);
    }
    if rc {
        update_cr1(st);
    }
    if pending_fp_trap(st) {
        return Err(Exception::Program(ProgramCause::FpEnabled));
    }
    Ok(())
}

/// mcrfs: copy an FPSCR field to CR and clear the copied sticky bits.
pub fn mcrfs(st: &mut CpuState, crf_d: u32, crf_s: u32) {
    let shift = 28 - crf_s * 4;
    let nibble = (st.fpscr >> shift) & 0xF;
    st.set_cr_field(crf_d as usize, nibble);
    st.fpscr &= !((0xF << shift) & fpscr::STICKY);
    update_vx(st);
    update_fex(st);
}
