//! Instruction decoder
//!
//! A 32-bit instruction word carries the primary opcode in its top six
//! bits. The decoder classifies the word into an instruction form and
//! extracts the extended opcode where the form has one; field extraction
//! helpers pull the per-form register and immediate fields.

/// Decoded instruction
#[derive(Debug, Clone, Copy)]
pub struct DecodedInstruction {
    /// Raw instruction word
    pub opcode: u32,
    /// Primary opcode (bits 0-5)
    pub op: u8,
    /// Extended opcode (position depends on the form)
    pub xo: u16,
    /// Instruction form
    pub form: InstructionForm,
}

/// Instruction forms of the 32-bit PowerPC set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionForm {
    /// I-Form: unconditional branch
    I,
    /// B-Form: conditional branch
    B,
    /// SC-Form: system call
    SC,
    /// D-Form: immediate arithmetic, load/store with displacement
    D,
    /// X-Form: indexed load/store, logical, system
    X,
    /// XL-Form: CR logical ops, branch to LR/CTR, rfi
    XL,
    /// XO-Form: integer arithmetic with OE
    XO,
    /// M-Form: rotate and mask
    M,
    /// A-Form: floating-point arithmetic
    A,
    /// Reserved or unimplemented encoding
    Unknown,
}

/// XO-form extended opcodes (9-bit, OE excluded). Everything else under
/// primary opcode 31 is X-form.
const XO_FORM_OPS: [u16; 16] = [
    8,   // subfc
    10,  // addc
    11,  // mulhwu
    40,  // subf
    75,  // mulhw
    104, // neg
    136, // subfe
    138, // adde
    200, // subfze
    202, // addze
    232, // subfme
    234, // addme
    235, // mullw
    266, // add
    459, // divwu
    491, // divw
];

/// Instruction decoder
pub struct Decoder;

impl Decoder {
    /// Decode a 32-bit instruction word.
    pub fn decode(opcode: u32) -> DecodedInstruction {
        let op = ((opcode >> 26) & 0x3F) as u8;

        let (form, xo) = match op {
            18 => (InstructionForm::I, 0),
            16 => (InstructionForm::B, 0),
            17 => (InstructionForm::SC, 0),

            // D-form immediates, loads and stores
            3 | // twi
            7 | // mulli
            8..=15 | // subfic, cmpli, cmpi, addic, addic., addi, addis
            24..=29 | // ori, oris, xori, xoris, andi., andis.
            32..=47 | // integer loads/stores
            48..=55 // FP loads/stores
                => (InstructionForm::D, 0),

            19 => {
                let xo = ((opcode >> 1) & 0x3FF) as u16;
                (InstructionForm::XL, xo)
            }

            31 => {
                let xo = ((opcode >> 1) & 0x3FF) as u16;
                let xo9 = xo & 0x1FF;
                if XO_FORM_OPS.contains(&xo9) {
                    (InstructionForm::XO, xo9)
                } else {
                    (InstructionForm::X, xo)
                }
            }

            20..=23 => (InstructionForm::M, 0),

            // FP arithmetic. Opcode 63 also carries X-form encodings
            // (compares, FPSCR moves, conversions) whose 10-bit extended
            // opcode is below 18 in its low five bits; every A-form
            // arithmetic op has a 5-bit extended opcode of 18 or above.
            59 => {
                let xo5 = ((opcode >> 1) & 0x1F) as u16;
                (InstructionForm::A, xo5)
            }
            63 => {
                let xo10 = ((opcode >> 1) & 0x3FF) as u16;
                if (xo10 & 0x1F) >= 18 {
                    (InstructionForm::A, xo10 & 0x1F)
                } else {
                    (InstructionForm::X, xo10)
                }
            }

            _ => (InstructionForm::Unknown, 0),
        };

        DecodedInstruction {
            opcode,
            op,
            xo,
            form,
        }
    }

    /// Extract D-form fields: (rT/rS, rA, d)
    #[inline]
    pub fn d_form(opcode: u32) -> (usize, usize, i16) {
        let rt = ((opcode >> 21) & 0x1F) as usize;
        let ra = ((opcode >> 16) & 0x1F) as usize;
        let d = (opcode & 0xFFFF) as i16;
        (rt, ra, d)
    }

    /// Extract X-form fields: (rT/rS, rA, rB, Rc)
    #[inline]
    pub fn x_form(opcode: u32) -> (usize, usize, usize, bool) {
        let rt = ((opcode >> 21) & 0x1F) as usize;
        let ra = ((opcode >> 16) & 0x1F) as usize;
        let rb = ((opcode >> 11) & 0x1F) as usize;
        let rc = (opcode & 1) != 0;
        (rt, ra, rb, rc)
    }

    /// Extract XO-form fields: (rT, rA, rB, OE, Rc)
    #[inline]
    pub fn xo_form(opcode: u32) -> (usize, usize, usize, bool, bool) {
        let rt = ((opcode >> 21) & 0x1F) as usize;
        let ra = ((opcode >> 16) & 0x1F) as usize;
        let rb = ((opcode >> 11) & 0x1F) as usize;
        let oe = ((opcode >> 10) & 1) != 0;
        let rc = (opcode & 1) != 0;
        (rt, ra, rb, oe, rc)
    }

    /// Extract A-form fields: (frD, frA, frB, frC, Rc)
    #[inline]
    pub fn a_form(opcode: u32) -> (usize, usize, usize, usize, bool) {
        let rd = ((opcode >> 21) & 0x1F) as usize;
        let ra = ((opcode >> 16) & 0x1F) as usize;
        let rb = ((opcode >> 11) & 0x1F) as usize;
        let rc_reg = ((opcode >> 6) & 0x1F) as usize;
        let rc = (opcode & 1) != 0;
        (rd, ra, rb, rc_reg, rc)
    }

    /// Extract I-form fields: (li, AA, LK). `li` is sign extended and
    /// already shifted into a byte displacement.
    #[inline]
    pub fn i_form(opcode: u32) -> (i32, bool, bool) {
        let li = (opcode & 0x03FF_FFFC) as i32;
        let li = if li & 0x0200_0000 != 0 {
            li | !0x03FF_FFFF
        } else {
            li
        };
        let aa = (opcode >> 1) & 1 != 0;
        let lk = opcode & 1 != 0;
        (li, aa, lk)
    }

    /// Extract B-form fields: (BO, BI, bd, AA, LK)
    #[inline]
    pub fn b_form(opcode: u32) -> (u32, u32, i32, bool, bool) {
        let bo = (opcode >> 21) & 0x1F;
        let bi = (opcode >> 16) & 0x1F;
        let bd = (opcode & 0xFFFC) as i32;
        let bd = if bd & 0x8000 != 0 { bd | !0xFFFF } else { bd };
        let aa = (opcode >> 1) & 1 != 0;
        let lk = opcode & 1 != 0;
        (bo, bi, bd, aa, lk)
    }

    /// Extract M-form fields: (rS, rA, rB/sh, MB, ME, Rc)
    #[inline]
    pub fn m_form(opcode: u32) -> (usize, usize, u32, u32, u32, bool) {
        let rs = ((opcode >> 21) & 0x1F) as usize;
        let ra = ((opcode >> 16) & 0x1F) as usize;
        let sh = (opcode >> 11) & 0x1F;
        let mb = (opcode >> 6) & 0x1F;
        let me = (opcode >> 1) & 0x1F;
        let rc = (opcode & 1) != 0;
        (rs, ra, sh, mb, me, rc)
    }

    /// Extract the SPR/TBR number of mfspr/mtspr/mftb (halves swapped in
    /// the encoding).
    #[inline]
    pub fn spr_num(opcode: u32) -> u32 {
        ((opcode >> 16) & 0x1F) | (((opcode >> 11) & 0x1F) << 5)
    }

    /// Best-effort mnemonic for diagnostics.
    pub fn mnemonic(opcode: u32) -> &'static str {
        let op = ((opcode >> 26) & 0x3F) as u8;
        match op {
            3 => "twi",
            7 => "mulli",
            8 => "subfic",
            10 => "cmpli",
            11 => "cmpi",
            12 => "addic",
            13 => "addic.",
            14 => "addi",
            15 => "addis",
            16 => "bc",
            17 => "sc",
            18 => "b",
            19 => "xl-form",
            20 => "rlwimi",
            21 => "rlwinm",
            23 => "rlwnm",
            24 => "ori",
            25 => "oris",
            26 => "xori",
            27 => "xoris",
            28 => "andi.",
            29 => "andis.",
            31 => "x-form",
            32 => "lwz",
            33 => "lwzu",
            34 => "lbz",
            35 => "lbzu",
            36 => "stw",
            37 => "stwu",
            38 => "stb",
            39 => "stbu",
            40 => "lhz",
            41 => "lhzu",
            42 => "lha",
            43 => "lhau",
            44 => "sth",
            45 => "sthu",
            46 => "lmw",
            47 => "stmw",
            48 => "lfs",
            49 => "lfsu",
            50 => "lfd",
            51 => "lfdu",
            52 => "stfs",
            53 => "stfsu",
            54 => "stfd",
            55 => "stfdu",
            59 => "fp-single",
            63 => "fp-double",
            _ => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_addi() {
        // addi r3, r0, 100
        let decoded = Decoder::decode(0x3860_0064);
        assert_eq!(decoded.op, 14);
        assert_eq!(decoded.form, InstructionForm::D);
    }

    #[test]
    fn test_decode_xo_vs_x() {
        // add r3, r4, r5 -> XO form
        let add = 31u32 << 26 | 3 << 21 | 4 << 16 | 5 << 11 | 266 << 1;
        let decoded = Decoder::decode(add);
        assert_eq!(decoded.form, InstructionForm::XO);
        assert_eq!(decoded.xo, 266);

        // addo keeps the same 9-bit extended opcode
        let addo = add | 1 << 10;
        let decoded = Decoder::decode(addo);
        assert_eq!(decoded.form, InstructionForm::XO);
        assert_eq!(decoded.xo, 266);

        // or r3, r4, r5 -> X form
        let or = 31u32 << 26 | 4 << 21 | 3 << 16 | 5 << 11 | 444 << 1;
        let decoded = Decoder::decode(or);
        assert_eq!(decoded.form, InstructionForm::X);
        assert_eq!(decoded.xo, 444);
    }

    #[test]
    fn test_decode_fp_forms() {
        // fadd f1, f2, f3 (A-form, xo 21)
        let fadd = 63u32 << 26 | 1 << 21 | 2 << 16 | 3 << 11 | 21 << 1;
        let decoded = Decoder::decode(fadd);
        assert_eq!(decoded.form, InstructionForm::A);
        assert_eq!(decoded.xo, 21);

        // fmadd with a high frC must still decode as A-form
        let fmadd = 63u32 << 26 | 1 << 21 | 2 << 16 | 3 << 11 | 31 << 6 | 29 << 1;
        let decoded = Decoder::decode(fmadd);
        assert_eq!(decoded.form, InstructionForm::A);
        assert_eq!(decoded.xo, 29);

        // fcmpu cr0, f1, f2 (X-form, xo 0)
        let fcmpu = 63u32 << 26 | 1 << 16 | 2 << 11;
        let decoded = Decoder::decode(fcmpu);
        assert_eq!(decoded.form, InstructionForm::X);
        assert_eq!(decoded.xo, 0);

        // mffs f1 (X-form, xo 583)
        let mffs = 63u32 << 26 | 1 << 21 | 583 << 1;
        let decoded = Decoder::decode(mffs);
        assert_eq!(decoded.form, InstructionForm::X);
        assert_eq!(decoded.xo, 583);
    }

    #[test]
    fn test_i_form_sign_extension() {
        // b 0x100
        let (li, aa, lk) = Decoder::i_form(0x4800_0100);
        assert_eq!(li, 0x100);
        assert!(!aa);
        assert!(!lk);

        // b .-4
        let (li, _, _) = Decoder::i_form(0x4BFF_FFFC);
        assert_eq!(li, -4);
    }

    #[test]
    fn test_b_form_sign_extension() {
        let (bo, bi, bd, _, _) = Decoder::b_form(0x4082_FFF8);
        assert_eq!(bo, 4);
        assert_eq!(bi, 2);
        assert_eq!(bd, -8);
    }

    #[test]
    fn test_spr_num_swapped_halves() {
        // mtspr SRR0(26), r3: SPR field = 26 -> low five bits in bits
        // 16-20, high five in 11-15
        let instr = 31u32 << 26 | 3 << 21 | 26 << 16 | 467 << 1;
        assert_eq!(Decoder::spr_num(instr), 26);

        // SPR 272 (SPRG0) = 0b01000_10000
        let instr = 31u32 << 26 | 3 << 21 | 16 << 16 | 8 << 11 | 467 << 1;
        assert_eq!(Decoder::spr_num(instr), 272);
    }

    #[test]
    fn test_reserved_opcode() {
        assert_eq!(Decoder::decode(0x0000_0000).form, InstructionForm::Unknown);
        // 64-bit only primaries are not part of this core
        assert_eq!(Decoder::decode(58 << 26).form, InstructionForm::Unknown);
        assert_eq!(Decoder::decode(62 << 26).form, InstructionForm::Unknown);
    }
}
