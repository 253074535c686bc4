//! x86-64 register model.
//!
//! General-purpose registers (including the four legacy high-byte
//! registers), XMM registers, condition codes, and register sets used for
//! GC liveness tracking.

/// x86-64 registers.
///
/// `Rax..R15` are the sixteen general-purpose registers. `Ah..Bh` are the
/// legacy high-byte registers: byte-sized only, and encodable only when no
/// REX prefix is present. `Xmm0..Xmm15` are the SSE registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
    // Legacy high-byte registers. Same ModRM encodings as SPL/BPL/SIL/DIL;
    // the hardware disambiguates purely on REX presence.
    Ah = 16,
    Ch = 17,
    Dh = 18,
    Bh = 19,
    Xmm0 = 20,
    Xmm1 = 21,
    Xmm2 = 22,
    Xmm3 = 23,
    Xmm4 = 24,
    Xmm5 = 25,
    Xmm6 = 26,
    Xmm7 = 27,
    Xmm8 = 28,
    Xmm9 = 29,
    Xmm10 = 30,
    Xmm11 = 31,
    Xmm12 = 32,
    Xmm13 = 33,
    Xmm14 = 34,
    Xmm15 = 35,
}

impl Reg {
    /// General-purpose register?
    pub fn is_gp(self) -> bool {
        (self as u8) < 16
    }

    /// Legacy high-byte register (AH/CH/DH/BH)?
    pub fn is_high_byte(self) -> bool {
        (16..20).contains(&(self as u8))
    }

    /// XMM register?
    pub fn is_xmm(self) -> bool {
        (self as u8) >= 20
    }

    /// Hardware register number, 0-15 within the register class.
    pub fn encoding(self) -> u8 {
        match self as u8 {
            n if n < 16 => n,
            n if n < 20 => n - 16 + 4, // AH..BH encode as 4..7
            n => n - 20,
        }
    }

    /// Low three bits of the hardware number (the ModRM/SIB field value).
    pub fn code(self) -> u8 {
        self.encoding() & 0x7
    }

    /// Outside the original 8-register encoding space, i.e. needs a
    /// REX.R/X/B (or the VEX one's-complement equivalent) extension bit.
    pub fn is_ext(self) -> bool {
        self.encoding() >= 8 && !self.is_high_byte()
    }

    /// When used as a byte-sized operand, requires a REX prefix to be
    /// present (even an otherwise-empty one) so the encoding means
    /// SPL/BPL/SIL/DIL rather than AH/CH/DH/BH.
    pub fn byte_needs_bare_rex(self) -> bool {
        matches!(self, Reg::Rsp | Reg::Rbp | Reg::Rsi | Reg::Rdi)
    }

    /// As a memory base register, forces a SIB byte (RSP/R12 share the
    /// "SIB follows" rm encoding).
    pub fn base_needs_sib(self) -> bool {
        matches!(self, Reg::Rsp | Reg::R12)
    }

    /// As a memory base register, forces a displacement byte even when the
    /// displacement is zero (RBP/R13 share the "disp32, no base" rm
    /// encoding in mod=00).
    pub fn base_needs_disp(self) -> bool {
        matches!(self, Reg::Rbp | Reg::R13)
    }
}

/// Condition codes for Jcc and SETcc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    O = 0x0,
    No = 0x1,
    B = 0x2,
    Ae = 0x3,
    E = 0x4,
    Ne = 0x5,
    Be = 0x6,
    A = 0x7,
    S = 0x8,
    Ns = 0x9,
    P = 0xA,
    Np = 0xB,
    L = 0xC,
    Ge = 0xD,
    Le = 0xE,
    G = 0xF,
}

impl Cond {
    /// Invert the condition.
    pub fn invert(self) -> Self {
        // Condition codes pair up on the low bit.
        match self {
            Cond::O => Cond::No,
            Cond::No => Cond::O,
            Cond::B => Cond::Ae,
            Cond::Ae => Cond::B,
            Cond::E => Cond::Ne,
            Cond::Ne => Cond::E,
            Cond::Be => Cond::A,
            Cond::A => Cond::Be,
            Cond::S => Cond::Ns,
            Cond::Ns => Cond::S,
            Cond::P => Cond::Np,
            Cond::Np => Cond::P,
            Cond::L => Cond::Ge,
            Cond::Ge => Cond::L,
            Cond::Le => Cond::G,
            Cond::G => Cond::Le,
        }
    }
}

/// A set of general-purpose registers, used for GC liveness and
/// callee-saved tracking. Bit N corresponds to the GP register numbered N.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct RegSet(pub u16);

impl RegSet {
    pub const EMPTY: RegSet = RegSet(0);

    /// The System V callee-saved set: RBX, RBP, R12-R15.
    pub const CALLEE_SAVED: RegSet = RegSet(
        (1 << Reg::Rbx as u16)
            | (1 << Reg::Rbp as u16)
            | (1 << 12)
            | (1 << 13)
            | (1 << 14)
            | (1 << 15),
    );

    pub fn contains(self, reg: Reg) -> bool {
        debug_assert!(reg.is_gp());
        self.0 & (1 << reg.encoding()) != 0
    }

    pub fn insert(&mut self, reg: Reg) {
        debug_assert!(reg.is_gp());
        self.0 |= 1 << reg.encoding();
    }

    pub fn remove(&mut self, reg: Reg) {
        debug_assert!(reg.is_gp());
        self.0 &= !(1 << reg.encoding());
    }

    pub fn union(self, other: RegSet) -> RegSet {
        RegSet(self.0 | other.0)
    }

    pub fn intersect(self, other: RegSet) -> RegSet {
        RegSet(self.0 & other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate the member registers, lowest number first.
    pub fn iter(self) -> impl Iterator<Item = Reg> {
        const GP: [Reg; 16] = [
            Reg::Rax,
            Reg::Rcx,
            Reg::Rdx,
            Reg::Rbx,
            Reg::Rsp,
            Reg::Rbp,
            Reg::Rsi,
            Reg::Rdi,
            Reg::R8,
            Reg::R9,
            Reg::R10,
            Reg::R11,
            Reg::R12,
            Reg::R13,
            Reg::R14,
            Reg::R15,
        ];
        (0..16).filter(move |i| self.0 & (1 << i) != 0).map(|i| GP[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encodings() {
        assert_eq!(Reg::Rax.encoding(), 0);
        assert_eq!(Reg::R8.encoding(), 8);
        assert_eq!(Reg::R8.code(), 0);
        assert!(Reg::R8.is_ext());
        assert_eq!(Reg::Xmm9.encoding(), 9);
        assert!(Reg::Xmm9.is_ext());
        assert!(Reg::Xmm9.is_xmm());
    }

    #[test]
    fn test_high_byte_encodings() {
        // AH..BH share 4..7 with SPL..DIL; neither is "extended".
        assert_eq!(Reg::Ah.encoding(), 4);
        assert_eq!(Reg::Bh.encoding(), 7);
        assert!(!Reg::Ah.is_ext());
        assert!(Reg::Ah.is_high_byte());
        assert!(Reg::Rsp.byte_needs_bare_rex());
        assert!(!Reg::Rax.byte_needs_bare_rex());
    }

    #[test]
    fn test_special_base_registers() {
        assert!(Reg::Rsp.base_needs_sib());
        assert!(Reg::R12.base_needs_sib());
        assert!(Reg::Rbp.base_needs_disp());
        assert!(Reg::R13.base_needs_disp());
        assert!(!Reg::Rbx.base_needs_sib());
        assert!(!Reg::Rbx.base_needs_disp());
    }

    #[test]
    fn test_cond_invert() {
        assert_eq!(Cond::E.invert(), Cond::Ne);
        assert_eq!(Cond::L.invert(), Cond::Ge);
        assert_eq!(Cond::A.invert(), Cond::Be);
    }

    #[test]
    fn test_regset() {
        let mut s = RegSet::EMPTY;
        s.insert(Reg::Rax);
        s.insert(Reg::R12);
        assert!(s.contains(Reg::Rax));
        assert!(!s.contains(Reg::Rcx));
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![Reg::Rax, Reg::R12]);
        assert_eq!(s.intersect(RegSet::CALLEE_SAVED).iter().count(), 1);
        s.remove(Reg::Rax);
        assert!(!s.contains(Reg::Rax));
    }
}
