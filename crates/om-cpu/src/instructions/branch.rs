//! Branch and condition-register instructions

use crate::decoder::Decoder;
use crate::exceptions::{Exception, ProgramCause};
use crate::state::CpuState;

/// Evaluate the BO/BI condition, decrementing CTR when BO asks for it.
/// `decrement_ctr` is false for bcctr, whose CTR forms are invalid.
pub fn condition_met(st: &mut CpuState, bo: u32, bi: u32, decrement_ctr: bool) -> bool {
    let ctr_ok = if bo & 0x04 != 0 {
        true
    } else {
        if decrement_ctr {
            st.ctr = st.ctr.wrapping_sub(1);
        }
        (st.ctr != 0) != (bo & 0x02 != 0)
    };

    let cond_ok = if bo & 0x10 != 0 {
        true
    } else {
        st.cr_bit(bi) == (bo >> 3) & 1
    };

    ctr_ok && cond_ok
}

/// I-form unconditional branch.
pub fn execute_i_form(st: &mut CpuState, instr: u32) {
    let (li, aa, lk) = Decoder::i_form(instr);
    if lk {
        st.lr = st.pc.wrapping_add(4);
    }
    let target = if aa {
        li as u32
    } else {
        st.pc.wrapping_add(li as u32)
    };
    st.nia = target & !3;
}

/// B-form conditional branch.
pub fn execute_b_form(st: &mut CpuState, instr: u32) {
    let (bo, bi, bd, aa, lk) = Decoder::b_form(instr);
    if condition_met(st, bo, bi, true) {
        if lk {
            st.lr = st.pc.wrapping_add(4);
        }
        let target = if aa {
            bd as u32
        } else {
            st.pc.wrapping_add(bd as u32)
        };
        st.nia = target & !3;
    } else if lk {
        // LK updates even on a not-taken branch
        st.lr = st.pc.wrapping_add(4);
    }
}

/// XL-form branches to LR/CTR, CR logical ops and mcrf. rfi and isync
/// are dispatched separately.
pub fn execute_xl_form(st: &mut CpuState, instr: u32, xo: u16) -> Result<(), Exception> {
    match xo {
        // bclr
        16 => {
            let (bo, bi, _, _, lk) = Decoder::b_form(instr);
            let target = st.lr & !3;
            if condition_met(st, bo, bi, true) {
                if lk {
                    st.lr = st.pc.wrapping_add(4);
                }
                st.nia = target;
            } else if lk {
                st.lr = st.pc.wrapping_add(4);
            }
        }
        // bcctr
        528 => {
            let (bo, bi, _, _, lk) = Decoder::b_form(instr);
            if condition_met(st, bo, bi, false) {
                if lk {
                    st.lr = st.pc.wrapping_add(4);
                }
                st.nia = st.ctr & !3;
            } else if lk {
                st.lr = st.pc.wrapping_add(4);
            }
        }
        // mcrf
        0 => {
            let crf_d = ((instr >> 23) & 7) as usize;
            let crf_s = ((instr >> 18) & 7) as usize;
            let field = st.cr_field(crf_s);
            st.set_cr_field(crf_d, field);
        }
        // CR logical ops
        33 | 129 | 193 | 225 | 257 | 289 | 417 | 449 => {
            let bt = (instr >> 21) & 0x1F;
            let ba = (instr >> 16) & 0x1F;
            let bb = (instr >> 11) & 0x1F;
            let a = st.cr_bit(ba);
            let b = st.cr_bit(bb);
            let value = match xo {
                257 => a & b,        // crand
                449 => a | b,        // cror
                193 => a ^ b,        // crxor
                225 => !(a & b) & 1, // crnand
                33 => !(a | b) & 1,  // crnor
                289 => !(a ^ b) & 1, // creqv
                129 => a & !b & 1,   // crandc
                417 => a | (!b & 1), // crorc
                _ => unreachable!(),
            };
            st.set_cr_bit(bt, value);
        }
        _ => {
            tracing::warn!("unimplemented XL-form op {} (0x{:08x})", xo, instr);
            return Err(Exception::Program(ProgramCause::IllegalInstruction));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconditional_branch() {
        let mut st = CpuState::new();
        st.pc = 0x1000;
        st.nia = 0x1004;

        // b 0x100 with LK
        execute_i_form(&mut st, 0x4800_0101);
        assert_eq!(st.nia, 0x1100);
        assert_eq!(st.lr, 0x1004);

        // absolute branch
        execute_i_form(&mut st, 0x4800_0202);
        assert_eq!(st.nia, 0x200);
    }

    #[test]
    fn test_bdnz_decrements_ctr() {
        let mut st = CpuState::new();
        st.pc = 0x2000;
        st.nia = 0x2004;
        st.ctr = 2;

        // bdnz .-8 : BO=16 (decrement, branch if CTR != 0)
        let instr = 16u32 << 26 | 16 << 21 | (-8i32 as u32 & 0xFFFC);
        execute_b_form(&mut st, instr);
        assert_eq!(st.ctr, 1);
        assert_eq!(st.nia, 0x1FF8);

        // second decrement reaches zero: not taken
        st.nia = 0x2004;
        execute_b_form(&mut st, instr);
        assert_eq!(st.ctr, 0);
        assert_eq!(st.nia, 0x2004);
    }

    #[test]
    fn test_conditional_on_cr_bit() {
        let mut st = CpuState::new();
        st.pc = 0x3000;
        st.nia = 0x3004;
        st.set_cr_field(0, 0b0010); // EQ

        // beq +0x10 : BO=12 (branch if CR bit set), BI=2 (CR0 EQ)
        let instr = 16u32 << 26 | 12 << 21 | 2 << 16 | 0x10;
        execute_b_form(&mut st, instr);
        assert_eq!(st.nia, 0x3010);

        st.set_cr_field(0, 0b0100);
        st.nia = 0x3004;
        execute_b_form(&mut st, instr);
        assert_eq!(st.nia, 0x3004);
    }

    #[test]
    fn test_blr() {
        let mut st = CpuState::new();
        st.pc = 0x4000;
        st.nia = 0x4004;
        st.lr = 0x1234_5678;

        // blr : BO=20 (always)
        let instr = 19u32 << 26 | 20 << 21 | 16 << 1;
        execute_xl_form(&mut st, instr, 16).unwrap();
        assert_eq!(st.nia, 0x1234_5678);
    }

    #[test]
    fn test_bctrl_saves_return_address() {
        let mut st = CpuState::new();
        st.pc = 0x4000;
        st.nia = 0x4004;
        st.ctr = 0x8000;

        let instr = 19u32 << 26 | 20 << 21 | 528 << 1 | 1;
        execute_xl_form(&mut st, instr, 528).unwrap();
        assert_eq!(st.nia, 0x8000);
        assert_eq!(st.lr, 0x4004);
        // bcctr must not touch CTR
        assert_eq!(st.ctr, 0x8000);
    }

    #[test]
    fn test_cr_ops() {
        let mut st = CpuState::new();
        st.set_cr_bit(4, 1);
        st.set_cr_bit(5, 0);

        // cror 6, 4, 5
        let instr = 19u32 << 26 | 6 << 21 | 4 << 16 | 5 << 11 | 449 << 1;
        execute_xl_form(&mut st, instr, 449).unwrap();
        assert_eq!(st.cr_bit(6), 1);

        // crxor 6, 4, 4 clears
        let instr = 19u32 << 26 | 6 << 21 | 4 << 16 | 4 << 11 | 193 << 1;
        execute_xl_form(&mut st, instr, 193).unwrap();
        assert_eq!(st.cr_bit(6), 0);
    }

    #[test]
    fn test_mcrf() {
        let mut st = CpuState::new();
        st.set_cr_field(3, 0b1010);
        let instr = 19u32 << 26 | (0 << 23) | (3 << 18);
        execute_xl_form(&mut st, instr, 0).unwrap();
        assert_eq!(st.cr_field(0), 0b1010);
    }
}
