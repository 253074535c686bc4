//! Instruction-size estimation.
//!
//! Every descriptor shape has a composition function here that produces
//! the complete encoding decision set — prefixes, opcode, ModRM, SIB,
//! displacement width, immediate width — as an [`EncIns`]. The estimate is
//! the length of that value, and the byte emitter writes the same value,
//! so the size recorded in a descriptor and the bytes later produced for
//! it cannot diverge.

use super::code::{DispEnc, ImmEnc, InsCode, modrm, sib};
use super::descr::{Attr, ImmVal, MemRef, OperSize};
use super::insts::Ins;
use super::regs::Reg;
use super::reloc::RelocTarget;

/// A fully composed instruction encoding, sans final byte offsets.
#[derive(Debug, Clone)]
pub struct EncIns {
    pub code: InsCode,
    pub modrm: Option<u8>,
    pub sib: Option<u8>,
    pub disp: DispEnc,
    /// RIP-relative displacement relocation target, if any.
    pub disp_reloc: Option<RelocTarget>,
    pub imm: Option<ImmEnc>,
    pub imm_reloc: Option<RelocTarget>,
}

impl EncIns {
    fn bare(code: InsCode) -> EncIns {
        EncIns {
            code,
            modrm: None,
            sib: None,
            disp: DispEnc::None,
            disp_reloc: None,
            imm: None,
            imm_reloc: None,
        }
    }

    /// Exact encoded length in bytes.
    pub fn len(&self) -> u32 {
        self.code.len()
            + self.modrm.is_some() as u32
            + self.sib.is_some() as u32
            + self.disp.len()
            + self.imm.map_or(0, |i| i.len())
    }
}

/// The `1`-count shift/rotate rows encode the count in the opcode.
fn is_shift_1(ins: Ins) -> bool {
    matches!(
        ins,
        Ins::Rol1 | Ins::Ror1 | Ins::Rcl1 | Ins::Rcr1 | Ins::Shl1 | Ins::Shr1 | Ins::Sar1
    )
}

/// The imm8 shift/rotate rows always carry exactly one immediate byte.
fn is_shift_n(ins: Ins) -> bool {
    matches!(
        ins,
        Ins::RolN | Ins::RorN | Ins::RclN | Ins::RcrN | Ins::ShlN | Ins::ShrN | Ins::SarN
    )
}

/// Apply operand-size state to a freshly decoded code value: the w bit,
/// the 16-bit override prefix, and REX.W.
fn apply_size(code: &mut InsCode, ins: Ins, attr: Attr) {
    if attr.size != OperSize::Byte && ins.has_wbit() {
        code.set_wbit();
    }
    if attr.size == OperSize::Word && !ins.is_sse() {
        code.set_opsize_prefix();
    }
    if ins.takes_rex_w(attr.size) {
        code.add_rex_w();
    }
}

/// Byte-operand register fixups: synthesize a bare REX for SPL/BPL/SIL/DIL
/// and check that high-byte registers did not end up beside a prefix.
fn apply_byte_regs(code: &mut InsCode, attr: Attr, regs: &[Reg]) {
    if attr.size != OperSize::Byte {
        return;
    }
    for &r in regs {
        if r.is_gp() && r.byte_needs_bare_rex() {
            code.ensure_rex();
        }
    }
    for &r in regs {
        // Checked at the builder; this is the backstop.
        assert!(
            !(r.is_high_byte() && code.has_rex()),
            "high-byte register {r:?} in an instruction that requires a REX prefix"
        );
    }
}

/// Switch to VEX when requested and legal, folding the mandatory prefix
/// and escape byte into the VEX prefix.
fn maybe_vexify(code: &mut InsCode, ins: Ins, attr: Attr, use_avx: bool) {
    if use_avx && ins.is_sse() {
        code.vexify(attr.size == OperSize::Ymmword);
    }
}

/// Encode a memory operand into ModRM/SIB/displacement, adding REX.X/B
/// bits for extended base/index registers.
fn enc_mem_ref(
    code: &mut InsCode,
    reg_field: u8,
    mem: &MemRef,
) -> (u8, Option<u8>, DispEnc, Option<RelocTarget>) {
    match *mem {
        MemRef::Frame { base, disp, .. } => enc_base_disp(code, reg_field, base, None, 1, disp),
        MemRef::Addr(am) => {
            assert!(
                am.base.is_some() || am.index.is_some(),
                "address mode without base or index"
            );
            if let Some(x) = am.index {
                assert!(x != Reg::Rsp, "RSP cannot be an index register");
            }
            match (am.base, am.index) {
                (None, Some(x)) => {
                    // [index*scale + disp32]: SIB with the no-base marker,
                    // displacement always 4 bytes.
                    if x.is_ext() {
                        code.add_rex_x();
                    }
                    (
                        modrm(0b00, reg_field, 0b100),
                        Some(sib(am.scale, x.code(), 0b101)),
                        DispEnc::D32 {
                            val: am.disp,
                            reloc: false,
                        },
                        None,
                    )
                }
                (Some(b), idx) => enc_base_disp(code, reg_field, b, idx, am.scale, am.disp),
                (None, None) => unreachable!(),
            }
        }
        MemRef::Direct { target: Some(t), addr } => {
            // RIP-relative with a relocation.
            (
                modrm(0b00, reg_field, 0b101),
                None,
                DispEnc::D32 {
                    val: addr,
                    reloc: true,
                },
                Some(t),
            )
        }
        MemRef::Direct { target: None, addr } => {
            // Absolute [disp32]. A bare disp32 rm encoding would mean
            // RIP-relative on x64, so this form spends a SIB byte.
            (
                modrm(0b00, reg_field, 0b100),
                Some(sib(1, 0b100, 0b101)),
                DispEnc::D32 {
                    val: addr,
                    reloc: false,
                },
                None,
            )
        }
    }
}

fn enc_base_disp(
    code: &mut InsCode,
    reg_field: u8,
    base: Reg,
    index: Option<Reg>,
    scale: u8,
    disp: i32,
) -> (u8, Option<u8>, DispEnc, Option<RelocTarget>) {
    if base.is_ext() {
        code.add_rex_b();
    }
    if let Some(x) = index {
        if x.is_ext() {
            code.add_rex_x();
        }
    }

    let need_sib = index.is_some() || base.base_needs_sib();
    let (rm, sib_byte) = if need_sib {
        let idx_code = index.map_or(0b100, |x| x.code());
        (0b100, Some(sib(scale, idx_code, base.code())))
    } else {
        (base.code(), None)
    };

    // RBP/R13 have no disp-less encoding; they get a zero disp8.
    let (mode, disp_enc) = if disp == 0 && !base.base_needs_disp() {
        (0b00, DispEnc::None)
    } else if let Ok(d8) = i8::try_from(disp) {
        (0b01, DispEnc::D8(d8))
    } else {
        (0b10, DispEnc::D32 { val: disp, reloc: false })
    };

    (modrm(mode, reg_field, rm), sib_byte, disp_enc, None)
}

/// Pick the immediate width for a non-mov instruction.
fn imm_for(ins: Ins, attr: Attr, imm: ImmVal, code: &mut InsCode) -> (ImmEnc, Option<RelocTarget>) {
    if is_shift_n(ins) {
        return (ImmEnc::I8(imm.val as i8), None);
    }
    if attr.size == OperSize::Byte {
        assert!(imm.reloc.is_none(), "relocatable byte immediate");
        return (ImmEnc::I8(imm.val as i8), None);
    }
    if let Some(t) = imm.reloc {
        // Relocatable values are always emitted full-width.
        return (
            ImmEnc::I32 { val: imm.val as i32, reloc: true },
            Some(t),
        );
    }
    if imm.fits_i8() && ins.has_imm8_form() {
        // 0x83-style sign-extended byte form.
        code.set_imm8_bit();
        return (ImmEnc::I8(imm.val as i8), None);
    }
    match attr.size {
        OperSize::Word => (ImmEnc::I16(imm.val as i16), None),
        _ => {
            // Immediates cap at 4 bytes on x64 (sign-extended).
            assert!(imm.fits_i32(), "{}: immediate {} does not fit 32 bits", ins.name(), imm.val);
            (ImmEnc::I32 { val: imm.val as i32, reloc: false }, None)
        }
    }
}

/// No-operand instructions.
pub fn enc_none(ins: Ins, attr: Attr) -> EncIns {
    let mut code = InsCode::from_packed(ins.code_mr());
    apply_size(&mut code, ins, attr);
    EncIns::bare(code)
}

/// Single-register instructions: register-in-opcode short forms where the
/// table has them, /digit ModRM forms otherwise.
pub fn enc_reg(ins: Ins, attr: Attr, reg: Reg) -> EncIns {
    if ins.has_rr() {
        let mut code = InsCode::from_rr_packed(ins.code_rr(), reg);
        // push/pop default to 64-bit and never take REX.W; bswap does.
        if ins.takes_rex_w(attr.size) {
            code.add_rex_w();
        }
        return EncIns::bare(code);
    }

    let mut code = InsCode::from_packed(ins.code_mr());
    apply_size(&mut code, ins, attr);
    if reg.is_ext() {
        code.add_rex_b();
    }
    apply_byte_regs(&mut code, attr, &[reg]);
    let m = modrm(0b11, code.digit(), reg.code());
    EncIns {
        modrm: Some(m),
        ..EncIns::bare(code)
    }
}

/// Two-register instructions.
pub fn enc_reg_reg(ins: Ins, attr: Attr, r1: Reg, r2: Reg, use_avx: bool) -> EncIns {
    // Prefer the reg,r/m column with the first operand in the reg field;
    // movd picks its direction from which side is the XMM register (movq
    // moves between XMM registers only; GP transfers go through movd).
    if ins == Ins::Movq {
        assert!(r1.is_xmm() && r2.is_xmm(), "movq GP transfers use movd");
    }
    let (packed, reg_op, rm_op) = if ins == Ins::Movd && r1.is_gp() {
        (ins.code_mr(), r2, r1)
    } else if ins.has_rm() {
        (ins.code_rm(), r1, r2)
    } else {
        (ins.code_mr(), r2, r1)
    };

    let mut code = InsCode::from_packed(packed);
    maybe_vexify(&mut code, ins, attr, use_avx);
    apply_size(&mut code, ins, attr);
    if matches!(ins, Ins::Shld | Ins::Shrd) {
        // Two-register shld/shrd is the by-CL opcode (A4 -> A5).
        code.set_wbit();
    }
    if code.has_vex() && (ins.is_avx_dds() || ins.info().flags & super::insts::flags::AVX_DSS != 0)
    {
        // Two-operand form under AVX: the destination doubles as vvvv.
        code.set_vvvv(r1);
    }
    if reg_op.is_ext() {
        code.add_rex_r();
    }
    if rm_op.is_ext() {
        code.add_rex_b();
    }
    // For the extending moves only the r/m operand has the byte width.
    if matches!(ins, Ins::Movsx | Ins::Movzx) {
        apply_byte_regs(&mut code, attr, &[rm_op]);
    } else {
        apply_byte_regs(&mut code, attr, &[r1, r2]);
    }
    let m = modrm(0b11, reg_op.code(), rm_op.code());
    EncIns {
        modrm: Some(m),
        ..EncIns::bare(code)
    }
}

/// AVX three-operand register form (dst, src1, src2).
pub fn enc_reg_reg_reg(ins: Ins, attr: Attr, dst: Reg, src1: Reg, src2: Reg) -> EncIns {
    assert!(ins.is_avx_dds(), "{} has no three-operand AVX form", ins.name());
    let mut code = InsCode::from_packed(ins.code_rm());
    code.vexify(attr.size == OperSize::Ymmword);
    apply_size(&mut code, ins, attr);
    code.set_vvvv(src1);
    if dst.is_ext() {
        code.add_rex_r();
    }
    if src2.is_ext() {
        code.add_rex_b();
    }
    let m = modrm(0b11, dst.code(), src2.code());
    EncIns {
        modrm: Some(m),
        ..EncIns::bare(code)
    }
}

/// Register-and-immediate instructions, including the mov special cases.
pub fn enc_reg_imm(ins: Ins, attr: Attr, reg: Reg, imm: ImmVal) -> EncIns {
    if ins == Ins::Mov {
        return enc_mov_ri(attr, reg, imm);
    }

    if is_shift_1(ins) {
        // The count lives in the opcode row; no immediate byte.
        let mut e = enc_reg(ins, attr, reg);
        debug_assert_eq!(imm.val, 1);
        e.imm = None;
        return e;
    }

    // Accumulator short form: saves the ModRM byte when AL/AX/EAX/RAX is
    // the operand and the byte-immediate form would not be smaller.
    let use_acc =
        reg == Reg::Rax && ins.has_a4() && (attr.size == OperSize::Byte || !(imm.fits_i8() && ins.has_imm8_form()));
    let mut code;
    let m;
    if use_acc {
        code = InsCode::from_packed(ins.code_a4());
        apply_size(&mut code, ins, attr);
        m = None;
    } else {
        code = InsCode::from_packed(ins.code_mi());
        apply_size(&mut code, ins, attr);
        if reg.is_ext() {
            code.add_rex_b();
        }
        apply_byte_regs(&mut code, attr, &[reg]);
        m = Some(modrm(0b11, code.digit(), reg.code()));
    }
    let (imm_enc, imm_reloc) = imm_for(ins, attr, imm, &mut code);
    EncIns {
        modrm: m,
        imm: Some(imm_enc),
        imm_reloc,
        ..EncIns::bare(code)
    }
}

/// mov reg, imm: B0/B8 register-in-opcode forms; a 64-bit store uses the
/// sign-extended C7 form only when the value fits 32 bits.
fn enc_mov_ri(attr: Attr, reg: Reg, imm: ImmVal) -> EncIns {
    let byte = attr.size == OperSize::Byte;
    let wide = attr.size == OperSize::Qword;
    let fits32 = imm.fits_i32();

    if wide && fits32 {
        // REX.W C7 /0 imm32.
        let mut code = InsCode::from_packed(Ins::Mov.code_mi());
        code.set_wbit();
        code.add_rex_w();
        if reg.is_ext() {
            code.add_rex_b();
        }
        let m = modrm(0b11, 0, reg.code());
        return EncIns {
            modrm: Some(m),
            imm: Some(ImmEnc::I32 { val: imm.val as i32, reloc: false }),
            ..EncIns::bare(code)
        };
    }

    let base: u32 = if byte { 0xB0 } else { 0xB8 };
    let mut code = InsCode::from_rr_packed(base, reg);
    if attr.size == OperSize::Word {
        code.set_opsize_prefix();
    }
    if wide {
        code.add_rex_w();
    }
    apply_byte_regs(&mut code, attr, &[reg]);

    let (imm_enc, imm_reloc) = if byte {
        (ImmEnc::I8(imm.val as i8), None)
    } else if wide {
        // The one full-width immediate form on x64.
        (
            ImmEnc::I64 { val: imm.val, reloc: imm.reloc.is_some() },
            imm.reloc,
        )
    } else if attr.size == OperSize::Word {
        (ImmEnc::I16(imm.val as i16), None)
    } else {
        (
            ImmEnc::I32 { val: imm.val as i32, reloc: imm.reloc.is_some() },
            imm.reloc,
        )
    };

    EncIns {
        imm: Some(imm_enc),
        imm_reloc,
        ..EncIns::bare(code)
    }
}

/// imul reg, reg, imm (0x69 / 0x6B) and shld/shrd reg, reg, imm8.
pub fn enc_reg_reg_imm(ins: Ins, attr: Attr, dst: Reg, src: Reg, imm: ImmVal) -> EncIns {
    if matches!(ins, Ins::Shld | Ins::Shrd) {
        // r/m,reg roles: the destination is the r/m operand.
        let mut code = InsCode::from_packed(ins.code_mr());
        apply_size(&mut code, ins, attr);
        if src.is_ext() {
            code.add_rex_r();
        }
        if dst.is_ext() {
            code.add_rex_b();
        }
        let m = modrm(0b11, src.code(), dst.code());
        return EncIns {
            modrm: Some(m),
            imm: Some(ImmEnc::I8(imm.val as i8)),
            ..EncIns::bare(code)
        };
    }
    assert_eq!(ins, Ins::Imuli, "{} has no reg,reg,imm form", ins.name());
    let mut code = InsCode::from_packed(ins.code_rm());
    apply_size(&mut code, ins, attr);
    if dst.is_ext() {
        code.add_rex_r();
    }
    if src.is_ext() {
        code.add_rex_b();
    }
    let (imm_enc, imm_reloc) = imm_for(ins, attr, imm, &mut code);
    let m = modrm(0b11, dst.code(), src.code());
    EncIns {
        modrm: Some(m),
        imm: Some(imm_enc),
        imm_reloc,
        ..EncIns::bare(code)
    }
}

/// Immediate-only instructions (push imm, ret imm16).
pub fn enc_imm(ins: Ins, attr: Attr, imm: ImmVal) -> EncIns {
    let mut code = InsCode::from_packed(ins.code_mi());
    let (imm_enc, imm_reloc) = match ins {
        Ins::Ret => (ImmEnc::I16(imm.val as i16), None),
        _ => imm_for(ins, attr, imm, &mut code),
    };
    EncIns {
        imm: Some(imm_enc),
        imm_reloc,
        ..EncIns::bare(code)
    }
}

/// Which column a memory form reads its base encoding from.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum MemDir {
    /// reg <- mem (reg,r/m column).
    Load,
    /// mem <- reg (r/m,reg column).
    Store,
}

/// Register-and-memory instructions in either direction.
pub fn enc_reg_mem(
    ins: Ins,
    attr: Attr,
    reg: Reg,
    mem: &MemRef,
    dir: MemDir,
    use_avx: bool,
) -> EncIns {
    let packed = match dir {
        MemDir::Load => ins.code_rm(),
        MemDir::Store => ins.code_mr(),
    };
    let mut code = InsCode::from_packed(packed);
    maybe_vexify(&mut code, ins, attr, use_avx);
    apply_size(&mut code, ins, attr);
    if code.has_vex() && ins.is_avx_dds() {
        // Two-operand memory form under AVX: dst doubles as first source.
        code.set_vvvv(reg);
    }
    if reg.is_ext() {
        code.add_rex_r();
    }
    apply_byte_regs(&mut code, attr, &[reg]);
    let (m, s, disp, disp_reloc) = enc_mem_ref(&mut code, reg.code(), mem);
    EncIns {
        modrm: Some(m),
        sib: s,
        disp,
        disp_reloc,
        ..EncIns::bare(code)
    }
}

/// Memory-only unary instructions (/digit through memory).
pub fn enc_mem(ins: Ins, attr: Attr, mem: &MemRef) -> EncIns {
    let mut code = InsCode::from_packed(ins.code_mr());
    apply_size(&mut code, ins, attr);
    let digit = code.digit();
    let (m, s, disp, disp_reloc) = enc_mem_ref(&mut code, digit, mem);
    EncIns {
        modrm: Some(m),
        sib: s,
        disp,
        disp_reloc,
        ..EncIns::bare(code)
    }
}

/// Memory-and-immediate instructions.
pub fn enc_mem_imm(ins: Ins, attr: Attr, mem: &MemRef, imm: ImmVal) -> EncIns {
    let mut code = InsCode::from_packed(ins.code_mi());
    apply_size(&mut code, ins, attr);
    let digit = code.digit();
    let (m, s, disp, disp_reloc) = enc_mem_ref(&mut code, digit, mem);
    let (imm_enc, imm_reloc) = imm_for(ins, attr, imm, &mut code);
    EncIns {
        modrm: Some(m),
        sib: s,
        disp,
        disp_reloc,
        imm: Some(imm_enc),
        imm_reloc,
        ..EncIns::bare(code)
    }
}

/// Encoded size of a jump in its current form.
pub fn jmp_size(ins: Ins, short: bool) -> u32 {
    if short {
        2
    } else if ins == Ins::Jmp {
        5
    } else {
        6
    }
}

/// Encoded size of a direct rel32 call.
pub const CALL_REL32_SIZE: u32 = 5;

#[cfg(test)]
mod tests {
    use super::super::descr::AddrMode;
    use super::*;

    #[test]
    fn test_reg_reg_sizes() {
        // add rax, rcx: REX.W 03 /r = 3 bytes
        assert_eq!(enc_reg_reg(Ins::Add, Attr::QWORD, Reg::Rax, Reg::Rcx, false).len(), 3);
        // add eax, ecx: 03 /r = 2
        assert_eq!(enc_reg_reg(Ins::Add, Attr::DWORD, Reg::Rax, Reg::Rcx, false).len(), 2);
        // add ax, cx: 66 03 /r = 3
        assert_eq!(enc_reg_reg(Ins::Add, Attr::WORD, Reg::Rax, Reg::Rcx, false).len(), 3);
        // add r8d, ecx: REX.R
        assert_eq!(enc_reg_reg(Ins::Add, Attr::DWORD, Reg::R8, Reg::Rcx, false).len(), 3);
    }

    #[test]
    fn test_byte_reg_bare_rex() {
        // mov sil, al needs an empty REX: 40 8A F0 = 3 bytes
        let e = enc_reg_reg(Ins::Mov, Attr::BYTE, Reg::Rsi, Reg::Rax, false);
        assert_eq!(e.len(), 3);
        // mov bl, al does not: 8A D8
        let e = enc_reg_reg(Ins::Mov, Attr::BYTE, Reg::Rbx, Reg::Rax, false);
        assert_eq!(e.len(), 2);
        // high-byte registers work with no prefix: mov ah, bl
        let e = enc_reg_reg(Ins::Mov, Attr::BYTE, Reg::Ah, Reg::Rbx, false);
        assert_eq!(e.len(), 2);
    }

    #[test]
    #[should_panic(expected = "high-byte register")]
    fn test_high_byte_with_ext_reg_panics() {
        enc_reg_reg(Ins::Mov, Attr::BYTE, Reg::Ah, Reg::R9, false);
    }

    #[test]
    fn test_mandatory_disp_bases() {
        // mov rax, [rbp]: disp8 forced even at zero -> REX.W 8B 45 00
        let mem = MemRef::Addr(AddrMode::base(Reg::Rbp));
        assert_eq!(enc_reg_mem(Ins::Mov, Attr::QWORD, Reg::Rax, &mem, MemDir::Load, false).len(), 4);
        // mov rax, [rsp]: SIB forced -> REX.W 8B 04 24
        let mem = MemRef::Addr(AddrMode::base(Reg::Rsp));
        assert_eq!(enc_reg_mem(Ins::Mov, Attr::QWORD, Reg::Rax, &mem, MemDir::Load, false).len(), 4);
        // mov rax, [rbx]: plain -> REX.W 8B 03
        let mem = MemRef::Addr(AddrMode::base(Reg::Rbx));
        assert_eq!(enc_reg_mem(Ins::Mov, Attr::QWORD, Reg::Rax, &mem, MemDir::Load, false).len(), 3);
    }

    #[test]
    fn test_direct_forms() {
        // Relocated: RIP-relative, no SIB.
        let m = MemRef::Direct { target: Some(RelocTarget::Data(1)), addr: 0 };
        let e = enc_reg_mem(Ins::Mov, Attr::DWORD, Reg::Rax, &m, MemDir::Load, false);
        assert_eq!(e.len(), 6); // 8B 05 disp32
        assert!(e.sib.is_none());
        // Absolute: spends the SIB byte.
        let m = MemRef::Direct { target: None, addr: 0x1000 };
        let e = enc_reg_mem(Ins::Mov, Attr::DWORD, Reg::Rax, &m, MemDir::Load, false);
        assert_eq!(e.len(), 7); // 8B 04 25 disp32
        assert!(e.sib.is_some());
    }

    #[test]
    fn test_imm_shrinking() {
        // add rcx, 8 -> REX.W 83 C1 08 = 4
        assert_eq!(enc_reg_imm(Ins::Add, Attr::QWORD, Reg::Rcx, ImmVal::new(8)).len(), 4);
        // add rcx, 0x1000 -> REX.W 81 C1 imm32 = 7
        assert_eq!(enc_reg_imm(Ins::Add, Attr::QWORD, Reg::Rcx, ImmVal::new(0x1000)).len(), 7);
        // add rax, 0x1000 -> accumulator form REX.W 05 imm32 = 6
        assert_eq!(enc_reg_imm(Ins::Add, Attr::QWORD, Reg::Rax, ImmVal::new(0x1000)).len(), 6);
        // add rax, 8 -> imm8 form still wins: REX.W 83 C0 08 = 4
        assert_eq!(enc_reg_imm(Ins::Add, Attr::QWORD, Reg::Rax, ImmVal::new(8)).len(), 4);
        // relocated immediates never shrink
        let imm = ImmVal::reloc(RelocTarget::Data(7));
        assert_eq!(enc_reg_imm(Ins::Add, Attr::QWORD, Reg::Rcx, imm).len(), 7);
    }

    #[test]
    fn test_mov_imm_forms() {
        // mov rax, small -> REX.W C7 C0 imm32 = 7
        assert_eq!(enc_reg_imm(Ins::Mov, Attr::QWORD, Reg::Rax, ImmVal::new(1)).len(), 7);
        // mov rax, 0x1_00000000 -> B8+r imm64 = 10
        assert_eq!(
            enc_reg_imm(Ins::Mov, Attr::QWORD, Reg::Rax, ImmVal::new(0x1_0000_0000)).len(),
            10
        );
        // mov eax, imm32 -> B8 imm32 = 5
        assert_eq!(enc_reg_imm(Ins::Mov, Attr::DWORD, Reg::Rax, ImmVal::new(7)).len(), 5);
        // mov cl, imm8 -> B1 imm8 = 2
        assert_eq!(enc_reg_imm(Ins::Mov, Attr::BYTE, Reg::Rcx, ImmVal::new(7)).len(), 2);
    }

    #[test]
    fn test_vex_shrinks_sse_encoding() {
        // addsd xmm0, xmm1: F2 0F 58 /r = 4 bytes legacy
        assert_eq!(enc_reg_reg(Ins::Addsd, Attr::XMMWORD, Reg::Xmm0, Reg::Xmm1, false).len(), 4);
        // vaddsd: C5 xx 58 /r = 4 bytes as well (2-byte VEX)
        assert_eq!(enc_reg_reg(Ins::Addsd, Attr::XMMWORD, Reg::Xmm0, Reg::Xmm1, true).len(), 4);
        // with an extended rm operand the VEX grows to 3 bytes
        assert_eq!(enc_reg_reg(Ins::Addsd, Attr::XMMWORD, Reg::Xmm0, Reg::Xmm9, true).len(), 5);
    }

    #[test]
    fn test_jmp_sizes() {
        assert_eq!(jmp_size(Ins::Jmp, true), 2);
        assert_eq!(jmp_size(Ins::Jmp, false), 5);
        assert_eq!(jmp_size(Ins::Je, true), 2);
        assert_eq!(jmp_size(Ins::Je, false), 6);
    }
}
