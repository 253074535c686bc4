//! The instruction-append API.
//!
//! Instruction selection calls these methods to add instructions to the
//! current group. Each method validates operand legality for x86-64,
//! builds the descriptor of the right shape, computes its encoded size,
//! and appends it. Illegal combinations are hard precondition failures
//! caught here, before any bytes exist.

use log::trace;

use super::descr::{
    AddrMode, Attr, CallTarget, GcKind, ImmVal, InsDesc, InsShape, JmpInfo, JmpState, MemRef,
    OperSize, desc_flags,
};
use super::group::GroupId;
use super::insts::Ins;
use super::regs::{Reg, RegSet};
use super::reloc::RelocTarget;
use super::size;
use super::size::MemDir;
use super::Emitter;

impl Emitter {
    fn append(&mut self, ins: Ins, attr: Attr, shape: InsShape, code_size: u32, flags: u8) {
        trace!(
            "append {} size={} group={}",
            ins.name(),
            code_size,
            self.order.last().unwrap().0
        );
        assert!(code_size <= u8::MAX as u32);
        let desc = InsDesc {
            ins,
            attr,
            shape,
            code_size: code_size as u8,
            flags,
        };
        self.cur_group_mut().insns.push(desc);
    }

    /// Validate register operands against the instruction and size class.
    fn check_regs(&self, ins: Ins, attr: Attr, regs: &[Reg]) {
        for &r in regs {
            if r.is_xmm() {
                assert!(ins.is_sse(), "{}: XMM operand {:?}", ins.name(), r);
            }
            if r.is_high_byte() {
                assert!(
                    attr.size == OperSize::Byte,
                    "{}: high-byte register {:?} with non-byte size",
                    ins.name(),
                    r
                );
            }
        }
        // A high-byte register cannot appear in an instruction that needs
        // a REX prefix for any reason; the hardware cannot encode it.
        let needs_rex = ins.takes_rex_w(attr.size)
            || regs.iter().any(|r| r.is_ext())
            || (attr.size == OperSize::Byte
                && regs.iter().any(|r| r.is_gp() && r.byte_needs_bare_rex()));
        if needs_rex {
            for &r in regs {
                assert!(
                    !r.is_high_byte(),
                    "{}: high-byte register {:?} cannot be combined with a REX-requiring operand",
                    ins.name(),
                    r
                );
            }
        }
        if attr.size == OperSize::Word || attr.size == OperSize::Byte {
            assert!(!ins.is_sse(), "{}: sub-dword SSE operand size", ins.name());
        }
        // Extending moves carry the source width in the attribute; the
        // doubleword-to-quadword form is its own opcode.
        match ins {
            Ins::Movsx | Ins::Movzx => assert!(
                matches!(attr.size, OperSize::Byte | OperSize::Word),
                "{}: attribute is the source width (byte or word)",
                ins.name()
            ),
            Ins::Movsxd => assert_eq!(attr.size, OperSize::Qword, "movsxd widens to qword"),
            _ => {}
        }
    }

    fn check_mem(&self, mem: &MemRef) {
        if let MemRef::Addr(am) = mem {
            assert!(
                matches!(am.scale, 1 | 2 | 4 | 8),
                "invalid address-mode scale {}",
                am.scale
            );
            assert!(am.index != Some(Reg::Rsp), "RSP cannot be an index register");
            if let Some(b) = am.base {
                assert!(b.is_gp(), "address-mode base {b:?} is not a GP register");
            }
            if let Some(x) = am.index {
                assert!(x.is_gp(), "address-mode index {x:?} is not a GP register");
            }
        }
    }

    /// Map a generic shift/rotate opcode and constant count onto the
    /// `1`/`N` table rows.
    fn shift_imm_variant(ins: Ins, count: i64) -> Ins {
        let by_one = count == 1;
        match ins {
            Ins::Rol | Ins::Rol1 | Ins::RolN => if by_one { Ins::Rol1 } else { Ins::RolN },
            Ins::Ror | Ins::Ror1 | Ins::RorN => if by_one { Ins::Ror1 } else { Ins::RorN },
            Ins::Rcl | Ins::Rcl1 | Ins::RclN => if by_one { Ins::Rcl1 } else { Ins::RclN },
            Ins::Rcr | Ins::Rcr1 | Ins::RcrN => if by_one { Ins::Rcr1 } else { Ins::RcrN },
            Ins::Shl | Ins::Shl1 | Ins::ShlN => if by_one { Ins::Shl1 } else { Ins::ShlN },
            Ins::Shr | Ins::Shr1 | Ins::ShrN => if by_one { Ins::Shr1 } else { Ins::ShrN },
            Ins::Sar | Ins::Sar1 | Ins::SarN => if by_one { Ins::Sar1 } else { Ins::SarN },
            other => other,
        }
    }

    fn is_shift_family(ins: Ins) -> bool {
        matches!(
            ins,
            Ins::Rol
                | Ins::Ror
                | Ins::Rcl
                | Ins::Rcr
                | Ins::Shl
                | Ins::Shr
                | Ins::Sar
                | Ins::Rol1
                | Ins::Ror1
                | Ins::Rcl1
                | Ins::Rcr1
                | Ins::Shl1
                | Ins::Shr1
                | Ins::Sar1
                | Ins::RolN
                | Ins::RorN
                | Ins::RclN
                | Ins::RcrN
                | Ins::ShlN
                | Ins::ShrN
                | Ins::SarN
        )
    }

    /// Track the push depth for SP-relative frame addressing.
    fn track_stack(&mut self, ins: Ins, reg: Option<Reg>, imm: Option<i64>) {
        match ins {
            Ins::Push => self.stack_level += 8,
            Ins::Pop => self.stack_level = self.stack_level.saturating_sub(8),
            Ins::Sub if reg == Some(Reg::Rsp) => {
                self.stack_level += imm.unwrap_or(0) as u32;
            }
            Ins::Add if reg == Some(Reg::Rsp) => {
                self.stack_level = self.stack_level.saturating_sub(imm.unwrap_or(0) as u32);
            }
            _ => {}
        }
    }

    /// Resolve a frame slot to a concrete base register + displacement.
    fn frame_mem(&self, slot: i32) -> MemRef {
        if self.frame.fp_based {
            MemRef::Frame {
                base: Reg::Rbp,
                disp: slot,
                slot,
            }
        } else {
            MemRef::Frame {
                base: Reg::Rsp,
                disp: slot + self.stack_level as i32,
                slot,
            }
        }
    }

    /// Append a no-operand instruction (ret, nop, int3, cdq/cqo).
    pub fn ins_none(&mut self, ins: Ins, attr: Attr) {
        let sz = size::enc_none(ins, attr).len();
        self.append(ins, attr, InsShape::None, sz, 0);
    }

    /// Append a single-register instruction. Shift/rotate opcodes here are
    /// the by-CL forms.
    pub fn ins_r(&mut self, ins: Ins, attr: Attr, reg: Reg) {
        self.check_regs(ins, attr, &[reg]);
        if matches!(ins, Ins::Push | Ins::Pop) {
            assert!(
                attr.size == OperSize::Qword,
                "{}: only qword push/pop on x64",
                ins.name()
            );
        }
        let sz = size::enc_reg(ins, attr, reg).len();
        self.track_stack(ins, Some(reg), None);
        self.append(ins, attr, InsShape::Reg { reg }, sz, 0);
    }

    /// Append a two-register instruction.
    pub fn ins_r_r(&mut self, ins: Ins, attr: Attr, reg1: Reg, reg2: Reg) {
        self.check_regs(ins, attr, &[reg1, reg2]);
        if ins == Ins::Xchg {
            assert!(!attr.is_gc(), "xchg does not participate in GC tracking");
        }
        if matches!(ins, Ins::Movsx | Ins::Movzx) {
            assert!(!reg1.is_high_byte(), "{}: high-byte destination", ins.name());
        }
        let sz = size::enc_reg_reg(ins, attr, reg1, reg2, self.cfg.use_avx).len();
        self.append(ins, attr, InsShape::RegReg { reg1, reg2 }, sz, 0);
    }

    /// Append an AVX three-operand instruction (dst, src1, src2).
    pub fn ins_r_r_r(&mut self, ins: Ins, attr: Attr, dst: Reg, src1: Reg, src2: Reg) {
        assert!(self.cfg.use_avx, "{}: three-operand form requires AVX", ins.name());
        self.check_regs(ins, attr, &[dst, src1, src2]);
        let sz = size::enc_reg_reg_reg(ins, attr, dst, src1, src2).len();
        self.append(ins, attr, InsShape::RegRegReg { dst, src1, src2 }, sz, 0);
    }

    /// Append a register-and-immediate instruction.
    pub fn ins_r_i(&mut self, ins: Ins, attr: Attr, reg: Reg, imm: ImmVal) {
        let ins = if Self::is_shift_family(ins) {
            assert!(imm.reloc.is_none(), "relocatable shift count");
            assert!((0..=63).contains(&imm.val), "shift count {} out of range", imm.val);
            Self::shift_imm_variant(ins, imm.val)
        } else {
            ins
        };
        self.check_regs(ins, attr, &[reg]);
        let sz = size::enc_reg_imm(ins, attr, reg, imm).len();
        self.track_stack(ins, Some(reg), Some(imm.val));
        self.append(ins, attr, InsShape::RegImm { reg, imm }, sz, 0);
    }

    /// Append imul dst, src, imm or shld/shrd dst, src, count.
    pub fn ins_r_r_i(&mut self, ins: Ins, attr: Attr, dst: Reg, src: Reg, imm: ImmVal) {
        assert!(
            matches!(ins, Ins::Imuli | Ins::Shld | Ins::Shrd),
            "{} has no reg,reg,imm form",
            ins.name()
        );
        if matches!(ins, Ins::Shld | Ins::Shrd) {
            assert!((0..=63).contains(&imm.val), "shift count {} out of range", imm.val);
        }
        self.check_regs(ins, attr, &[dst, src]);
        let sz = size::enc_reg_reg_imm(ins, attr, dst, src, imm).len();
        self.append(ins, attr, InsShape::RegRegImm { dst, src, imm }, sz, 0);
    }

    /// Append an immediate-only instruction (push imm, ret imm16).
    pub fn ins_i(&mut self, ins: Ins, attr: Attr, imm: ImmVal) {
        let sz = size::enc_imm(ins, attr, imm).len();
        if ins == Ins::Push {
            self.stack_level += 8;
        }
        self.append(ins, attr, InsShape::Imm { imm }, sz, 0);
    }

    /// Load from a stack-frame slot: reg <- [frame + slot].
    pub fn ins_r_s(&mut self, ins: Ins, attr: Attr, reg: Reg, slot: i32) {
        self.check_regs(ins, attr, &[reg]);
        let mem = self.frame_mem(slot);
        let sz = size::enc_reg_mem(ins, attr, reg, &mem, MemDir::Load, self.cfg.use_avx).len();
        self.append(ins, attr, InsShape::RegMem { reg, mem }, sz, 0);
    }

    /// Store to a stack-frame slot: [frame + slot] <- reg.
    pub fn ins_s_r(&mut self, ins: Ins, attr: Attr, slot: i32, reg: Reg) {
        self.check_regs(ins, attr, &[reg]);
        let mem = self.frame_mem(slot);
        let sz = size::enc_reg_mem(ins, attr, reg, &mem, MemDir::Store, self.cfg.use_avx).len();
        self.append(ins, attr, InsShape::MemReg { mem, reg }, sz, 0);
    }

    /// Store an immediate to a stack-frame slot.
    pub fn ins_s_i(&mut self, ins: Ins, attr: Attr, slot: i32, imm: ImmVal) {
        let mem = self.frame_mem(slot);
        let sz = size::enc_mem_imm(ins, attr, &mem, imm).len();
        self.append(ins, attr, InsShape::MemImm { mem, imm }, sz, 0);
    }

    /// Unary operation on a stack-frame slot (inc/dec/neg/not [frame+slot]).
    pub fn ins_s(&mut self, ins: Ins, attr: Attr, slot: i32) {
        let mem = self.frame_mem(slot);
        let sz = size::enc_mem(ins, attr, &mem).len();
        self.append(ins, attr, InsShape::Mem { mem }, sz, 0);
    }

    /// Load through an address mode: reg <- [base + index*scale + disp].
    pub fn ins_r_a(&mut self, ins: Ins, attr: Attr, reg: Reg, am: AddrMode) {
        self.check_regs(ins, attr, &[reg]);
        let am = Self::normalize_addr_mode(am);
        let mem = MemRef::Addr(am);
        self.check_mem(&mem);
        let sz = size::enc_reg_mem(ins, attr, reg, &mem, MemDir::Load, self.cfg.use_avx).len();
        self.append(ins, attr, InsShape::RegMem { reg, mem }, sz, 0);
    }

    /// Store through an address mode.
    pub fn ins_a_r(&mut self, ins: Ins, attr: Attr, am: AddrMode, reg: Reg) {
        self.check_regs(ins, attr, &[reg]);
        let am = Self::normalize_addr_mode(am);
        let mem = MemRef::Addr(am);
        self.check_mem(&mem);
        let sz = size::enc_reg_mem(ins, attr, reg, &mem, MemDir::Store, self.cfg.use_avx).len();
        self.append(ins, attr, InsShape::MemReg { mem, reg }, sz, 0);
    }

    /// Store an immediate through an address mode.
    pub fn ins_a_i(&mut self, ins: Ins, attr: Attr, am: AddrMode, imm: ImmVal) {
        let am = Self::normalize_addr_mode(am);
        let mem = MemRef::Addr(am);
        self.check_mem(&mem);
        let sz = size::enc_mem_imm(ins, attr, &mem, imm).len();
        self.append(ins, attr, InsShape::MemImm { mem, imm }, sz, 0);
    }

    /// Unary operation through an address mode (also push [mem]).
    pub fn ins_a(&mut self, ins: Ins, attr: Attr, am: AddrMode) {
        let am = Self::normalize_addr_mode(am);
        let mem = MemRef::Addr(am);
        self.check_mem(&mem);
        let sz = size::enc_mem(ins, attr, &mem).len();
        if ins == Ins::Push {
            self.stack_level += 8;
        }
        self.append(ins, attr, InsShape::Mem { mem }, sz, 0);
    }

    /// Load from a static data item (RIP-relative, relocated).
    pub fn ins_r_c(&mut self, ins: Ins, attr: Attr, reg: Reg, target: RelocTarget, offs: i32) {
        self.check_regs(ins, attr, &[reg]);
        let mem = MemRef::Direct {
            target: Some(target),
            addr: offs,
        };
        let sz = size::enc_reg_mem(ins, attr, reg, &mem, MemDir::Load, self.cfg.use_avx).len();
        self.append(ins, attr, InsShape::RegMem { reg, mem }, sz, 0);
    }

    /// Store to a static data item.
    pub fn ins_c_r(&mut self, ins: Ins, attr: Attr, target: RelocTarget, offs: i32, reg: Reg) {
        self.check_regs(ins, attr, &[reg]);
        let mem = MemRef::Direct {
            target: Some(target),
            addr: offs,
        };
        let sz = size::enc_reg_mem(ins, attr, reg, &mem, MemDir::Store, self.cfg.use_avx).len();
        self.append(ins, attr, InsShape::MemReg { mem, reg }, sz, 0);
    }

    /// Store an immediate to a static data item.
    pub fn ins_c_i(&mut self, ins: Ins, attr: Attr, target: RelocTarget, offs: i32, imm: ImmVal) {
        let mem = MemRef::Direct {
            target: Some(target),
            addr: offs,
        };
        let sz = size::enc_mem_imm(ins, attr, &mem, imm).len();
        self.append(ins, attr, InsShape::MemImm { mem, imm }, sz, 0);
    }

    /// Load from an absolute 32-bit address (no relocation).
    pub fn ins_r_ai(&mut self, ins: Ins, attr: Attr, reg: Reg, addr: i32) {
        self.check_regs(ins, attr, &[reg]);
        let mem = MemRef::Direct { target: None, addr };
        let sz = size::enc_reg_mem(ins, attr, reg, &mem, MemDir::Load, self.cfg.use_avx).len();
        self.append(ins, attr, InsShape::RegMem { reg, mem }, sz, 0);
    }

    /// Append a jump or branch to an instruction group. Forward targets
    /// start unbound at the long encoding; the resolution pass shrinks
    /// them once every target is placed.
    pub fn ins_j(&mut self, ins: Ins, target: GroupId) {
        assert!(ins.is_jump(), "{} is not a jump", ins.name());
        assert!((target.0 as usize) < self.groups.len(), "jump to unknown group");
        let bound = self.placed.contains(&target);
        let info = JmpInfo {
            target,
            short_eligible: true,
            force_long: false,
            state: if bound { JmpState::BoundLong } else { JmpState::Unbound },
            short: false,
        };
        self.groups[target.0 as usize].label = true;
        let sz = size::jmp_size(ins, false);
        self.append(ins, Attr::QWORD, InsShape::Jmp(info), sz, 0);
    }

    /// Append a call. `gc_refs`/`byref_refs` is the caller-provided
    /// snapshot of reference-holding registers at the call site;
    /// `preserved` overrides the callee-saved set for special helpers.
    pub fn ins_call(
        &mut self,
        target: CallTarget,
        ret_attr: Attr,
        gc_refs: RegSet,
        byref_refs: RegSet,
        preserved: Option<RegSet>,
        no_return: bool,
    ) {
        let sz = match &target {
            CallTarget::Direct(_) => size::CALL_REL32_SIZE,
            CallTarget::Reg(r) => {
                assert!(r.is_gp(), "indirect call through {r:?}");
                size::enc_reg(Ins::Call, Attr::QWORD, *r).len()
            }
            CallTarget::Mem(mem) => {
                self.check_mem(mem);
                size::enc_mem(Ins::Call, Attr::QWORD, mem).len()
            }
        };
        let shape = InsShape::Call {
            target,
            gc_refs,
            byref_refs,
            preserved,
        };
        let flags = if no_return { desc_flags::NO_RETURN } else { 0 };
        self.append(Ins::Call, ret_attr, shape, sz, flags);
    }

    /// Append `size` bytes of NOP padding (1..=15), using the multi-byte
    /// NOP sequences.
    pub fn ins_nop(&mut self, size: u32) {
        assert!((1..=15).contains(&size), "nop size {size} out of range");
        self.append(Ins::Nop, Attr::BYTE, InsShape::None, size, 0);
    }

    /// Pad with NOPs so the next instruction starts on `alignment`.
    /// Alignment is relative to append-time offsets and is only exact when
    /// no earlier jump shrinks; callers use it for non-semantic padding.
    pub fn ins_align(&mut self, alignment: u32) {
        debug_assert!(alignment.is_power_of_two());
        let cur: u32 = self.cur_group().insns.iter().map(|d| d.code_size as u32).sum();
        let rem = cur % alignment;
        if rem != 0 {
            self.ins_nop(alignment - rem);
        }
    }

    /// Swap base and index when the base would force a mandatory
    /// displacement byte and the index (at scale 1) would not.
    fn normalize_addr_mode(am: AddrMode) -> AddrMode {
        if am.scale == 1 && am.disp == 0 {
            if let (Some(b), Some(x)) = (am.base, am.index) {
                if b.base_needs_disp() && !x.base_needs_disp() && !x.base_needs_sib() {
                    return AddrMode {
                        base: Some(x),
                        index: Some(b),
                        scale: 1,
                        disp: 0,
                    };
                }
            }
        }
        am
    }

    /// GC attribute of the value an instruction leaves in its destination
    /// register, given the descriptor attribute.
    pub(crate) fn dest_gc_kind(attr: Attr) -> GcKind {
        if attr.size == OperSize::Qword { attr.gc } else { GcKind::None }
    }
}
