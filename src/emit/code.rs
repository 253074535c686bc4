//! The instruction-code value under construction.
//!
//! An [`InsCode`] holds the opcode bytes of one instruction together with
//! the prefix state accumulated while operands are examined: REX bits,
//! the 16-bit operand-size override, the mandatory SSE prefix, or a VEX
//! prefix. The encoding-table rows are decoded into an `InsCode` first;
//! every later decision goes through named operations on it, and both the
//! size estimator and the byte writer derive their answers from the same
//! value, so the two cannot disagree.

use super::buffer::CodeBuffer;
use super::regs::Reg;

/// VEX prefix state. Extension bits are stored in plain (not inverted)
/// form; the one's-complement encoding is applied when bytes are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vex {
    pub r: bool,
    pub x: bool,
    pub b: bool,
    pub w: bool,
    /// Second-source register number (0 when unused; written inverted).
    pub vvvv: u8,
    /// 256-bit vector length.
    pub l256: bool,
    /// Mandatory-prefix code: 0=none, 1=66, 2=F3, 3=F2.
    pub pp: u8,
    /// Escape map: 1 = 0F (the only one in this opcode surface).
    pub map: u8,
}

/// Displacement encoding choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispEnc {
    None,
    D8(i8),
    /// 4-byte displacement; `reloc` means a placeholder is written and a
    /// relocation record is owed at the write offset.
    D32 { val: i32, reloc: bool },
}

impl DispEnc {
    pub fn len(self) -> u32 {
        match self {
            DispEnc::None => 0,
            DispEnc::D8(_) => 1,
            DispEnc::D32 { .. } => 4,
        }
    }
}

/// Immediate encoding choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmEnc {
    I8(i8),
    I16(i16),
    I32 { val: i32, reloc: bool },
    I64 { val: i64, reloc: bool },
}

impl ImmEnc {
    pub fn len(self) -> u32 {
        match self {
            ImmEnc::I8(_) => 1,
            ImmEnc::I16(_) => 2,
            ImmEnc::I32 { .. } => 4,
            ImmEnc::I64 { .. } => 8,
        }
    }

    pub fn is_reloc(self) -> bool {
        matches!(
            self,
            ImmEnc::I32 { reloc: true, .. } | ImmEnc::I64 { reloc: true, .. }
        )
    }
}

/// Opcode bytes plus accumulated prefix state for one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsCode {
    opcode: [u8; 3],
    oplen: u8,
    /// ModRM reg-field digit from the table row ("/digit" opcodes).
    digit: u8,
    /// Mandatory SSE prefix byte (0x66/0xF2/0xF3), 0 when absent.
    pp: u8,
    /// 16-bit operand-size override prefix.
    opsize: bool,
    /// REX byte; 0 means no REX prefix.
    rex: u8,
    vex: Option<Vex>,
}

impl InsCode {
    /// Decode a table row in the r/m (ModRM-carrying) layout.
    pub fn from_packed(packed: u32) -> InsCode {
        assert!(packed != super::insts::BAD_CODE, "BAD_CODE reached encoding");
        let last = (packed & 0xFF) as u8;
        let digit = (((packed >> 8) & 0xFF) as u8) >> 3;
        let first = ((packed >> 16) & 0xFF) as u8;
        let middle = ((packed >> 24) & 0xFF) as u8;

        let (pp, opcode, oplen) = match (first, middle) {
            (0, 0) => (0, [last, 0, 0], 1),
            (0x0F, 0) => (0, [0x0F, last, 0], 2),
            (p @ (0x66 | 0xF2 | 0xF3), 0x0F) => (p, [0x0F, last, 0], 2),
            _ => panic!("unsupported opcode packing {packed:#x}"),
        };

        InsCode {
            opcode,
            oplen,
            digit,
            pp,
            opsize: false,
            rex: 0,
            vex: None,
        }
    }

    /// Decode a register-in-opcode table row and fold in the register's
    /// low bits. (These rows are stored low-byte-first.)
    pub fn from_rr_packed(packed: u32, reg: Reg) -> InsCode {
        let b0 = (packed & 0xFF) as u8;
        let (opcode, oplen) = if b0 == 0x0F {
            let b1 = ((packed >> 8) & 0xFF) as u8;
            ([0x0F, b1 + reg.code(), 0], 2)
        } else {
            ([b0 + reg.code(), 0, 0], 1)
        };
        let mut code = InsCode {
            opcode,
            oplen,
            digit: 0,
            pp: 0,
            opsize: false,
            rex: 0,
            vex: None,
        };
        if reg.is_ext() {
            code.add_rex_b();
        }
        code
    }

    /// The table /digit, placed in the ModRM reg field for unary forms.
    pub fn digit(&self) -> u8 {
        self.digit
    }

    pub fn has_vex(&self) -> bool {
        self.vex.is_some()
    }

    /// Any prefix byte already present? Byte-register disambiguation only
    /// needs a bare REX synthesized when this is false.
    pub fn has_rex(&self) -> bool {
        self.rex != 0
    }

    /// Set the low opcode bit selecting full (non-byte) operand size.
    pub fn set_wbit(&mut self) {
        self.opcode[(self.oplen - 1) as usize] |= 1;
    }

    /// Select the sign-extended byte-immediate opcode variant
    /// (0x81 -> 0x83, 0x68 -> 0x6A, 0x69 -> 0x6B).
    pub fn set_imm8_bit(&mut self) {
        self.opcode[(self.oplen - 1) as usize] |= 2;
    }

    /// Request the 16-bit operand-size override prefix.
    pub fn set_opsize_prefix(&mut self) {
        assert!(self.vex.is_none(), "operand-size prefix on a VEX instruction");
        self.opsize = true;
    }

    /// 64-bit operand size. OR into the legacy REX byte, or set VEX.W.
    pub fn add_rex_w(&mut self) {
        match &mut self.vex {
            Some(v) => v.w = true,
            None => self.rex |= 0x48,
        }
    }

    /// ModRM reg field uses an extended register.
    pub fn add_rex_r(&mut self) {
        match &mut self.vex {
            Some(v) => v.r = true,
            None => self.rex |= 0x44,
        }
    }

    /// SIB index field uses an extended register.
    pub fn add_rex_x(&mut self) {
        match &mut self.vex {
            Some(v) => v.x = true,
            None => self.rex |= 0x42,
        }
    }

    /// ModRM rm / SIB base field uses an extended register.
    pub fn add_rex_b(&mut self) {
        match &mut self.vex {
            Some(v) => v.b = true,
            None => self.rex |= 0x41,
        }
    }

    /// Synthesize an otherwise-empty REX so a byte-sized SPL/BPL/SIL/DIL
    /// operand is not read as AH/CH/DH/BH.
    pub fn ensure_rex(&mut self) {
        assert!(self.vex.is_none(), "bare REX requested on a VEX instruction");
        if self.rex == 0 {
            self.rex = 0x40;
        }
    }

    /// Switch to the VEX encoding: the 0x0F escape and the mandatory
    /// prefix move inside the VEX prefix and are no longer separate bytes.
    pub fn vexify(&mut self, l256: bool) {
        assert!(self.rex == 0, "vexify after REX bits were added");
        assert!(self.oplen == 2 && self.opcode[0] == 0x0F, "not a VEX-encodable opcode");
        let pp = match self.pp {
            0 => 0,
            0x66 => 1,
            0xF3 => 2,
            0xF2 => 3,
            _ => unreachable!(),
        };
        self.vex = Some(Vex {
            r: false,
            x: false,
            b: false,
            w: false,
            vvvv: 0,
            l256,
            pp,
            map: 1,
        });
        self.pp = 0;
        self.opcode = [self.opcode[1], 0, 0];
        self.oplen = 1;
    }

    /// Place the second-source register in VEX.vvvv.
    pub fn set_vvvv(&mut self, reg: Reg) {
        let v = self.vex.as_mut().expect("vvvv on a non-VEX instruction");
        v.vvvv = reg.encoding();
    }

    fn vex_len(v: &Vex) -> u32 {
        // Two-byte form covers R/vvvv/L/pp with the 0F map and W=0.
        if !v.x && !v.b && !v.w && v.map == 1 { 2 } else { 3 }
    }

    /// Total bytes of prefixes plus opcode (ModRM and later not included).
    pub fn len(&self) -> u32 {
        match &self.vex {
            Some(v) => Self::vex_len(v) + self.oplen as u32,
            None => {
                (self.opsize as u32)
                    + ((self.pp != 0) as u32)
                    + ((self.rex != 0) as u32)
                    + self.oplen as u32
            }
        }
    }

    /// Write prefixes and opcode bytes.
    pub fn write(&self, buf: &mut CodeBuffer) {
        match &self.vex {
            Some(v) => {
                if Self::vex_len(v) == 2 {
                    buf.emit_u8(0xC5);
                    buf.emit_u8(
                        ((!v.r as u8) << 7) | ((!v.vvvv & 0xF) << 3) | ((v.l256 as u8) << 2) | v.pp,
                    );
                } else {
                    buf.emit_u8(0xC4);
                    buf.emit_u8(((!v.r as u8) << 7) | ((!v.x as u8) << 6) | ((!v.b as u8) << 5) | v.map);
                    buf.emit_u8(
                        ((v.w as u8) << 7) | ((!v.vvvv & 0xF) << 3) | ((v.l256 as u8) << 2) | v.pp,
                    );
                }
            }
            None => {
                if self.opsize {
                    buf.emit_u8(0x66);
                }
                if self.pp != 0 {
                    buf.emit_u8(self.pp);
                }
                if self.rex != 0 {
                    buf.emit_u8(self.rex);
                }
            }
        }
        for i in 0..self.oplen as usize {
            buf.emit_u8(self.opcode[i]);
        }
    }
}

/// Build a ModRM byte.
pub fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
    ((mode & 0x3) << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
}

/// Build a SIB byte. `scale` is the literal 1/2/4/8 factor.
pub fn sib(scale: u8, index: u8, base: u8) -> u8 {
    let ss = match scale {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        _ => panic!("invalid address-mode scale {scale}"),
    };
    (ss << 6) | ((index & 0x7) << 3) | (base & 0x7)
}

#[cfg(test)]
mod tests {
    use super::super::insts::Ins;
    use super::*;

    fn bytes_of(code: &InsCode) -> Vec<u8> {
        let mut buf = CodeBuffer::new();
        code.write(&mut buf);
        buf.into_code()
    }

    #[test]
    fn test_decode_one_byte_row() {
        let code = InsCode::from_packed(Ins::Add.info().rm);
        assert_eq!(bytes_of(&code), vec![0x02]);
        assert_eq!(code.len(), 1);
    }

    #[test]
    fn test_decode_digit_row() {
        let code = InsCode::from_packed(Ins::Neg.info().mr);
        assert_eq!(code.digit(), 3);
        assert_eq!(bytes_of(&code), vec![0xF6]);
    }

    #[test]
    fn test_rex_bits_accumulate() {
        let mut code = InsCode::from_packed(Ins::Mov.info().rm);
        code.set_wbit();
        code.add_rex_w();
        code.add_rex_r();
        assert_eq!(bytes_of(&code), vec![0x4C, 0x8B]);
        assert_eq!(code.len(), 2);
    }

    #[test]
    fn test_sse_prefix_row() {
        // addsd: F2 0F 58
        let code = InsCode::from_packed(Ins::Addsd.info().rm);
        assert_eq!(bytes_of(&code), vec![0xF2, 0x0F, 0x58]);
        assert_eq!(code.len(), 3);
    }

    #[test]
    fn test_vexify_strips_escape() {
        // vaddsd: C5 xx 58 — two-byte VEX replaces both F2 and 0F.
        let mut code = InsCode::from_packed(Ins::Addsd.info().rm);
        code.vexify(false);
        code.set_vvvv(Reg::Xmm1);
        assert_eq!(code.len(), 3); // C5 + payload + opcode
        let b = bytes_of(&code);
        assert_eq!(b[0], 0xC5);
        assert_eq!(b[1], (1 << 7) | ((!1u8 & 0xF) << 3) | 3); // R̄=1, vvvv=~1, pp=F2
        assert_eq!(b[2], 0x58);
    }

    #[test]
    fn test_vex_three_byte_when_b_set() {
        let mut code = InsCode::from_packed(Ins::Addsd.info().rm);
        code.vexify(false);
        code.add_rex_b();
        assert_eq!(code.len(), 4); // C4 + 2 payload + opcode
        let b = bytes_of(&code);
        assert_eq!(b[0], 0xC4);
        assert_eq!(b[1] & 0x1F, 1); // map = 0F
        assert_eq!(b[1] & 0x20, 0); // B̄ cleared (B set)
    }

    #[test]
    fn test_bare_rex_for_byte_regs() {
        let mut code = InsCode::from_packed(Ins::Mov.info().rm);
        assert!(!code.has_rex());
        code.ensure_rex();
        assert_eq!(bytes_of(&code), vec![0x40, 0x8A]);
    }

    #[test]
    fn test_rr_row_with_extension() {
        let code = InsCode::from_rr_packed(Ins::Push.info().rr, Reg::R12);
        assert_eq!(bytes_of(&code), vec![0x41, 0x54]);
        // bswap is stored low-byte-first: 0F C8+r
        let code = InsCode::from_rr_packed(Ins::Bswap.info().rr, Reg::Rcx);
        assert_eq!(bytes_of(&code), vec![0x0F, 0xC9]);
    }

    #[test]
    #[should_panic(expected = "bare REX")]
    fn test_bare_rex_on_vex_panics() {
        let mut code = InsCode::from_packed(Ins::Addsd.info().rm);
        code.vexify(false);
        code.ensure_rex();
    }
}
