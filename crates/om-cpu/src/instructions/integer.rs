//! Integer arithmetic, logical, compare and rotate instructions

use crate::decoder::Decoder;
use crate::exceptions::{Exception, ProgramCause};
use crate::state::CpuState;

/// Record LT/GT/EQ of the signed result against zero into CR0, carrying
/// XER[SO] into the low bit.
#[inline]
pub fn update_cr0(st: &mut CpuState, value: u32) {
    let v = value as i32;
    let mut c = match v.cmp(&0) {
        std::cmp::Ordering::Less => 0b1000,
        std::cmp::Ordering::Greater => 0b0100,
        std::cmp::Ordering::Equal => 0b0010,
    };
    if st.xer_so() {
        c |= 1;
    }
    st.set_cr_field(0, c);
}

#[inline]
fn compare_signed(st: &mut CpuState, crf: usize, a: i32, b: i32) {
    let mut c = match a.cmp(&b) {
        std::cmp::Ordering::Less => 0b1000,
        std::cmp::Ordering::Greater => 0b0100,
        std::cmp::Ordering::Equal => 0b0010,
    };
    if st.xer_so() {
        c |= 1;
    }
    st.set_cr_field(crf, c);
}

#[inline]
fn compare_unsigned(st: &mut CpuState, crf: usize, a: u32, b: u32) {
    let mut c = match a.cmp(&b) {
        std::cmp::Ordering::Less => 0b1000,
        std::cmp::Ordering::Greater => 0b0100,
        std::cmp::Ordering::Equal => 0b0010,
    };
    if st.xer_so() {
        c |= 1;
    }
    st.set_cr_field(crf, c);
}

/// Trap condition per the TO field (used by tw and twi).
pub fn trap_condition(to: u32, a: i32, b: i32) -> bool {
    (to & 0x10 != 0 && a < b)
        || (to & 0x08 != 0 && a > b)
        || (to & 0x04 != 0 && a == b)
        || (to & 0x02 != 0 && (a as u32) < (b as u32))
        || (to & 0x01 != 0 && (a as u32) > (b as u32))
}

/// Wrap-around rotate mask from MB to ME, both numbered from the most
/// significant bit.
#[inline]
pub fn mask32(mb: u32, me: u32) -> u32 {
    let x = u32::MAX >> mb;
    let y = (u32::MAX >> me) >> 1;
    if mb <= me {
        x ^ y
    } else {
        !(y ^ x)
    }
}

/// Three-operand add used by the whole carrying/extended family; the
/// subtract forms pass the complemented operand and a carry-in.
#[inline]
fn add3(a: u32, b: u32, carry_in: u32) -> (u32, bool, bool) {
    let wide = a as u64 + b as u64 + carry_in as u64;
    let result = wide as u32;
    let carry = wide >> 32 != 0;
    let overflow = ((a ^ result) & (b ^ result)) >> 31 != 0;
    (result, carry, overflow)
}

/// D-form arithmetic, logical, compare and trap ops (primary opcodes
/// 3..29). Loads and stores live in `load_store`.
pub fn execute_d_form(st: &mut CpuState, instr: u32, op: u8) -> Result<(), Exception> {
    let (rt, ra, d) = Decoder::d_form(instr);
    let simm = d as i32;
    let uimm = (d as u16) as u32;

    match op {
        // twi
        3 => {
            let to = (instr >> 21) & 0x1F;
            if trap_condition(to, st.gpr(ra) as i32, simm) {
                return Err(Exception::Program(ProgramCause::Trap));
            }
        }
        // mulli
        7 => {
            let value = (st.gpr(ra) as i32).wrapping_mul(simm) as u32;
            st.set_gpr(rt, value);
        }
        // subfic
        8 => {
            let (value, carry, _) = add3(!st.gpr(ra), simm as u32, 1);
            st.set_gpr(rt, value);
            st.set_xer_ca(carry);
        }
        // cmpli
        10 => {
            compare_unsigned(st, rt >> 2, st.gpr(ra), uimm);
        }
        // cmpi
        11 => {
            compare_signed(st, rt >> 2, st.gpr(ra) as i32, simm);
        }
        // addic
        12 => {
            let (value, carry, _) = add3(st.gpr(ra), simm as u32, 0);
            st.set_gpr(rt, value);
            st.set_xer_ca(carry);
        }
        // addic.
        13 => {
            let (value, carry, _) = add3(st.gpr(ra), simm as u32, 0);
            st.set_gpr(rt, value);
            st.set_xer_ca(carry);
            update_cr0(st, value);
        }
        // addi
        14 => {
            let base = if ra == 0 { 0 } else { st.gpr(ra) };
            st.set_gpr(rt, base.wrapping_add(simm as u32));
        }
        // addis
        15 => {
            let base = if ra == 0 { 0 } else { st.gpr(ra) };
            st.set_gpr(rt, base.wrapping_add((simm as u32) << 16));
        }
        // ori
        24 => st.set_gpr(ra, st.gpr(rt) | uimm),
        // oris
        25 => st.set_gpr(ra, st.gpr(rt) | (uimm << 16)),
        // xori
        26 => st.set_gpr(ra, st.gpr(rt) ^ uimm),
        // xoris
        27 => st.set_gpr(ra, st.gpr(rt) ^ (uimm << 16)),
        // andi.
        28 => {
            let value = st.gpr(rt) & uimm;
            st.set_gpr(ra, value);
            update_cr0(st, value);
        }
        // andis.
        29 => {
            let value = st.gpr(rt) & (uimm << 16);
            st.set_gpr(ra, value);
            update_cr0(st, value);
        }
        _ => {
            return Err(Exception::Program(ProgramCause::IllegalInstruction));
        }
    }
    Ok(())
}

/// XO-form integer arithmetic (primary opcode 31, OE-capable encodings).
pub fn execute_xo_form(st: &mut CpuState, instr: u32, xo: u16) -> Result<(), Exception> {
    let (rt, ra, rb, oe, rc) = Decoder::xo_form(instr);
    let a = st.gpr(ra);
    let b = st.gpr(rb);
    let ca = st.xer_ca() as u32;

    // (value, carry to record, overflow)
    let (value, carry, overflow) = match xo {
        // add
        266 => {
            let (v, _, ov) = add3(a, b, 0);
            (v, None, ov)
        }
        // subf
        40 => {
            let (v, _, ov) = add3(!a, b, 1);
            (v, None, ov)
        }
        // addc
        10 => {
            let (v, c, ov) = add3(a, b, 0);
            (v, Some(c), ov)
        }
        // subfc
        8 => {
            let (v, c, ov) = add3(!a, b, 1);
            (v, Some(c), ov)
        }
        // adde
        138 => {
            let (v, c, ov) = add3(a, b, ca);
            (v, Some(c), ov)
        }
        // subfe
        136 => {
            let (v, c, ov) = add3(!a, b, ca);
            (v, Some(c), ov)
        }
        // addze
        202 => {
            let (v, c, ov) = add3(a, 0, ca);
            (v, Some(c), ov)
        }
        // subfze
        200 => {
            let (v, c, ov) = add3(!a, 0, ca);
            (v, Some(c), ov)
        }
        // addme
        234 => {
            let (v, c, ov) = add3(a, u32::MAX, ca);
            (v, Some(c), ov)
        }
        // subfme
        232 => {
            let (v, c, ov) = add3(!a, u32::MAX, ca);
            (v, Some(c), ov)
        }
        // neg
        104 => {
            let (v, _, ov) = add3(!a, 0, 1);
            (v, None, ov)
        }
        // mullw
        235 => {
            let wide = (a as i32 as i64).wrapping_mul(b as i32 as i64);
            let ov = wide != (wide as i32) as i64;
            (wide as u32, None, ov)
        }
        // mulhw
        75 => {
            let wide = (a as i32 as i64).wrapping_mul(b as i32 as i64);
            ((wide >> 32) as u32, None, false)
        }
        // mulhwu
        11 => {
            let wide = (a as u64).wrapping_mul(b as u64);
            ((wide >> 32) as u32, None, false)
        }
        // divw
        491 => {
            let num = a as i32;
            let den = b as i32;
            if den == 0 || (num == i32::MIN && den == -1) {
                // quotient is undefined; overflow records the condition
                (0, None, true)
            } else {
                ((num / den) as u32, None, false)
            }
        }
        // divwu
        459 => {
            if b == 0 {
                (0, None, true)
            } else {
                (a / b, None, false)
            }
        }
        _ => {
            tracing::warn!("unimplemented XO-form op {} (0x{:08x})", xo, instr);
            return Err(Exception::Program(ProgramCause::IllegalInstruction));
        }
    };

    st.set_gpr(rt, value);
    if let Some(c) = carry {
        st.set_xer_ca(c);
    }
    if oe {
        st.set_xer_ov(overflow);
    }
    if rc {
        update_cr0(st, value);
    }
    Ok(())
}

/// M-form rotates (rlwimi, rlwinm, rlwnm).
pub fn execute_m_form(st: &mut CpuState, instr: u32, op: u8) -> Result<(), Exception> {
    let (rs, ra, sh, mb, me, rc) = Decoder::m_form(instr);
    let n = match op {
        // rlwnm takes the shift count from a register
        23 => st.gpr(sh as usize) & 0x1F,
        _ => sh,
    };
    let rotated = st.gpr(rs).rotate_left(n);
    let mask = mask32(mb, me);

    let value = match op {
        // rlwimi
        20 => (rotated & mask) | (st.gpr(ra) & !mask),
        // rlwinm, rlwnm
        21 | 23 => rotated & mask,
        _ => return Err(Exception::Program(ProgramCause::IllegalInstruction)),
    };
    st.set_gpr(ra, value);
    if rc {
        update_cr0(st, value);
    }
    Ok(())
}

/// X-form compares and trap (primary 31, xo 0/32/4).
pub fn execute_x_compare(st: &mut CpuState, instr: u32, xo: u16) -> Result<(), Exception> {
    let (rt, ra, rb, _) = Decoder::x_form(instr);
    match xo {
        // cmp
        0 => compare_signed(st, rt >> 2, st.gpr(ra) as i32, st.gpr(rb) as i32),
        // cmpl
        32 => compare_unsigned(st, rt >> 2, st.gpr(ra), st.gpr(rb)),
        // tw
        4 => {
            let to = (instr >> 21) & 0x1F;
            if trap_condition(to, st.gpr(ra) as i32, st.gpr(rb) as i32) {
                return Err(Exception::Program(ProgramCause::Trap));
            }
        }
        _ => return Err(Exception::Program(ProgramCause::IllegalInstruction)),
    }
    Ok(())
}

/// X-form logical, shift and extend ops. `rt` is the source (rS) and
/// `ra` the target for this group.
pub fn execute_x_logical(st: &mut CpuState, instr: u32, xo: u16) -> Result<(), Exception> {
    let (rs, ra, rb, rc) = Decoder::x_form(instr);
    let s = st.gpr(rs);
    let b = st.gpr(rb);

    let value = match xo {
        28 => s & b,           // and
        60 => s & !b,          // andc
        124 => !(s | b),       // nor
        284 => !(s ^ b),       // eqv
        316 => s ^ b,          // xor
        412 => s | !b,         // orc
        444 => s | b,          // or
        476 => !(s & b),       // nand
        26 => s.leading_zeros(), // cntlzw
        922 => (s as i16) as i32 as u32, // extsh
        954 => (s as i8) as i32 as u32,  // extsb
        // slw
        24 => {
            let n = b & 0x3F;
            if n > 31 {
                0
            } else {
                s << n
            }
        }
        // srw
        536 => {
            let n = b & 0x3F;
            if n > 31 {
                0
            } else {
                s >> n
            }
        }
        // sraw
        792 => {
            let n = b & 0x3F;
            let (value, carry) = if n > 31 {
                let sign = ((s as i32) >> 31) as u32;
                (sign, sign != 0)
            } else {
                let value = ((s as i32) >> n) as u32;
                let carry = (s as i32) < 0 && n != 0 && s & ((1 << n) - 1) != 0;
                (value, carry)
            };
            st.set_xer_ca(carry);
            value
        }
        // srawi
        824 => {
            let n = rb as u32;
            let value = ((s as i32) >> n) as u32;
            let carry = (s as i32) < 0 && n != 0 && s & ((1 << n) - 1) != 0;
            st.set_xer_ca(carry);
            value
        }
        _ => {
            tracing::warn!("unimplemented X-form logical op {} (0x{:08x})", xo, instr);
            return Err(Exception::Program(ProgramCause::IllegalInstruction));
        }
    };

    st.set_gpr(ra, value);
    if rc {
        update_cr0(st, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask32() {
        assert_eq!(mask32(0, 31), 0xFFFF_FFFF);
        assert_eq!(mask32(24, 31), 0x0000_00FF);
        assert_eq!(mask32(0, 7), 0xFF00_0000);
        assert_eq!(mask32(5, 5), 0x0400_0000);
        // wrap-around masks
        assert_eq!(mask32(30, 1), 0xC000_0003);
        assert_eq!(mask32(31, 0), 0x8000_0001);
    }

    #[test]
    fn test_add3_carry_and_overflow() {
        let (v, c, o) = add3(0xFFFF_FFFF, 1, 0);
        assert_eq!(v, 0);
        assert!(c);
        assert!(!o);

        let (v, c, o) = add3(0x7FFF_FFFF, 1, 0);
        assert_eq!(v, 0x8000_0000);
        assert!(!c);
        assert!(o);

        // subtract via complement: 5 - 3
        let (v, c, _) = add3(!3u32, 5, 1);
        assert_eq!(v, 2);
        assert!(c);

        // 3 - 5 borrows (carry clear)
        let (v, c, _) = add3(!5u32, 3, 1);
        assert_eq!(v as i32, -2);
        assert!(!c);
    }

    #[test]
    fn test_update_cr0() {
        let mut st = CpuState::new();
        update_cr0(&mut st, 0);
        assert_eq!(st.cr_field(0), 0b0010);
        update_cr0(&mut st, 0x8000_0000);
        assert_eq!(st.cr_field(0), 0b1000);
        st.xer |= crate::state::xer::SO;
        update_cr0(&mut st, 1);
        assert_eq!(st.cr_field(0), 0b0101);
    }

    #[test]
    fn test_trap_condition() {
        // to=4: equal
        assert!(trap_condition(0x04, 7, 7));
        assert!(!trap_condition(0x04, 7, 8));
        // to=16: signed less-than
        assert!(trap_condition(0x10, -1, 0));
        // to=1: unsigned greater-than catches -1 as 0xFFFFFFFF
        assert!(trap_condition(0x01, -1, 0));
        // to=31: unconditional
        assert!(trap_condition(0x1F, 5, 5));
    }

    #[test]
    fn test_divw_edge_cases() {
        let mut st = CpuState::new();
        st.set_gpr(4, 0x8000_0000);
        st.set_gpr(5, 0xFFFF_FFFF);
        // divwo r3, r4, r5 -> i32::MIN / -1 overflows
        let instr = 31u32 << 26 | 3 << 21 | 4 << 16 | 5 << 11 | 1 << 10 | 491 << 1;
        execute_xo_form(&mut st, instr, 491).unwrap();
        assert!(st.xer_so());

        st.set_gpr(4, 100);
        st.set_gpr(5, 7);
        execute_xo_form(&mut st, instr, 491).unwrap();
        assert_eq!(st.gpr(3), 14);
    }
}
