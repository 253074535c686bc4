//! The byte emitter.
//!
//! Walks the finalized instruction groups in layout order and writes the
//! exact bytes of every instruction, recording relocations for fields
//! whose value the loader must patch and maintaining the GC liveness set
//! at every instruction boundary. Every instruction must produce exactly
//! the byte count its descriptor was sized at; a mismatch is a fatal
//! internal error.

use super::Emitter;
use super::buffer::CodeBuffer;
use super::descr::{CallTarget, GcKind, InsDesc, InsShape, MemRef, desc_flags};
use super::gc::{GcInfoTable, GcTracker};
use super::insts::{Ins, UpdateMode};
use super::regs::{Reg, RegSet};
use super::reloc::{Reloc, RelocKind, RelocTarget};
use super::size::{self, EncIns, MemDir};
use super::code::{DispEnc, ImmEnc};

/// Canonical multi-byte NOP sequences, 1 through 9 bytes.
const NOPS: [&[u8]; 9] = [
    &[0x90],
    &[0x66, 0x90],
    &[0x0F, 0x1F, 0x00],
    &[0x0F, 0x1F, 0x40, 0x00],
    &[0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x0F, 0x1F, 0x80, 0x00, 0x00, 0x00, 0x00],
    &[0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
];

/// Write a composed encoding, appending relocation records for any
/// placeholder displacement or immediate.
fn write_enc(buf: &mut CodeBuffer, relocs: &mut Vec<Reloc>, e: &EncIns) {
    e.code.write(buf);
    if let Some(m) = e.modrm {
        buf.emit_u8(m);
    }
    if let Some(s) = e.sib {
        buf.emit_u8(s);
    }
    let trailing = e.imm.map_or(0, |i| i.len()) as u8;
    match e.disp {
        DispEnc::None => {}
        DispEnc::D8(d) => buf.emit_u8(d as u8),
        DispEnc::D32 { val, reloc } => {
            if reloc {
                let t = e.disp_reloc.expect("relocated displacement without target");
                relocs.push(Reloc {
                    offset: buf.len() as u32,
                    kind: RelocKind::Rel32,
                    target: t,
                    trailing,
                });
                buf.emit_u32(0);
            } else {
                buf.emit_u32(val as u32);
            }
        }
    }
    if let Some(imm) = e.imm {
        match imm {
            ImmEnc::I8(v) => buf.emit_u8(v as u8),
            ImmEnc::I16(v) => buf.emit_u16(v as u16),
            ImmEnc::I32 { val, reloc } => {
                if reloc {
                    let t = e.imm_reloc.expect("relocated immediate without target");
                    relocs.push(Reloc {
                        offset: buf.len() as u32,
                        kind: RelocKind::Abs32,
                        target: t,
                        trailing: 0,
                    });
                    buf.emit_u32(0);
                } else {
                    buf.emit_u32(val as u32);
                }
            }
            ImmEnc::I64 { val, reloc } => {
                if reloc {
                    let t = e.imm_reloc.expect("relocated immediate without target");
                    relocs.push(Reloc {
                        offset: buf.len() as u32,
                        kind: RelocKind::Abs64,
                        target: t,
                        trailing: 0,
                    });
                    buf.emit_u64(0);
                } else {
                    buf.emit_u64(val as u64);
                }
            }
        }
    }
}

impl Emitter {
    /// Emit every group to bytes. Layout must be final.
    pub(crate) fn output_all(&mut self) -> (CodeBuffer, Vec<Reloc>, GcInfoTable) {
        let mut buf = CodeBuffer::with_capacity(self.cfg.code_capacity);
        let mut relocs = Vec::new();
        let mut gc = GcTracker::new();

        for gid in self.order.clone() {
            let gi = gid.0 as usize;
            assert_eq!(
                self.groups[gi].offset as usize,
                buf.len(),
                "group offset drifted from layout"
            );
            self.groups[gi].gc_refs_in = gc.current().gc_regs;
            let no_gc = self.groups[gi].no_gc;

            for ii in 0..self.groups[gi].insns.len() {
                let d = self.groups[gi].insns[ii].clone();
                let start = buf.len();
                self.output_ins(&d, start as u32, &mut buf, &mut relocs);
                let written = buf.len() - start;
                assert_eq!(
                    written,
                    d.code_size as usize,
                    "size estimate vs emitted bytes mismatch for {}",
                    d.ins.name()
                );
                self.update_gc(&d, no_gc, buf.len() as u32, &mut gc);
            }
        }

        (buf, relocs, gc.into_table())
    }

    fn output_ins(&self, d: &InsDesc, ins_off: u32, buf: &mut CodeBuffer, relocs: &mut Vec<Reloc>) {
        let avx = self.cfg.use_avx;
        match &d.shape {
            InsShape::None => {
                if d.ins == Ins::Nop {
                    self.output_nops(d.code_size as usize, buf);
                } else {
                    write_enc(buf, relocs, &size::enc_none(d.ins, d.attr));
                }
            }
            InsShape::Reg { reg } => {
                write_enc(buf, relocs, &size::enc_reg(d.ins, d.attr, *reg));
            }
            InsShape::RegReg { reg1, reg2 } => {
                write_enc(buf, relocs, &size::enc_reg_reg(d.ins, d.attr, *reg1, *reg2, avx));
            }
            InsShape::RegRegReg { dst, src1, src2 } => {
                write_enc(buf, relocs, &size::enc_reg_reg_reg(d.ins, d.attr, *dst, *src1, *src2));
            }
            InsShape::RegImm { reg, imm } => {
                write_enc(buf, relocs, &size::enc_reg_imm(d.ins, d.attr, *reg, *imm));
            }
            InsShape::RegRegImm { dst, src, imm } => {
                write_enc(buf, relocs, &size::enc_reg_reg_imm(d.ins, d.attr, *dst, *src, *imm));
            }
            InsShape::Imm { imm } => {
                write_enc(buf, relocs, &size::enc_imm(d.ins, d.attr, *imm));
            }
            InsShape::RegMem { reg, mem } => {
                write_enc(
                    buf,
                    relocs,
                    &size::enc_reg_mem(d.ins, d.attr, *reg, mem, MemDir::Load, avx),
                );
            }
            InsShape::MemReg { mem, reg } => {
                write_enc(
                    buf,
                    relocs,
                    &size::enc_reg_mem(d.ins, d.attr, *reg, mem, MemDir::Store, avx),
                );
            }
            InsShape::MemImm { mem, imm } => {
                write_enc(buf, relocs, &size::enc_mem_imm(d.ins, d.attr, mem, *imm));
            }
            InsShape::Mem { mem } => {
                write_enc(buf, relocs, &size::enc_mem(d.ins, d.attr, mem));
            }
            InsShape::Jmp(j) => {
                self.output_jump(d.ins, j, ins_off, d.code_size as u32, buf, relocs);
            }
            InsShape::Call { target, .. } => match target {
                CallTarget::Direct(t) => {
                    buf.emit_u8(0xE8);
                    relocs.push(Reloc {
                        offset: buf.len() as u32,
                        kind: RelocKind::Rel32,
                        target: *t,
                        trailing: 0,
                    });
                    buf.emit_u32(0);
                }
                CallTarget::Reg(r) => {
                    write_enc(buf, relocs, &size::enc_reg(Ins::Call, d.attr, *r));
                }
                CallTarget::Mem(mem) => {
                    write_enc(buf, relocs, &size::enc_mem(Ins::Call, d.attr, mem));
                }
            },
        }
    }

    fn output_nops(&self, mut n: usize, buf: &mut CodeBuffer) {
        while n > 9 {
            buf.emit_bytes(NOPS[8]);
            n -= 9;
        }
        if n > 0 {
            buf.emit_bytes(NOPS[n - 1]);
        }
    }

    fn output_jump(
        &self,
        ins: Ins,
        j: &super::descr::JmpInfo,
        ins_off: u32,
        code_size: u32,
        buf: &mut CodeBuffer,
        relocs: &mut Vec<Reloc>,
    ) {
        let short_op = (ins.code_mr() & 0xFF) as u8;
        let target_off = self.groups[j.target.0 as usize].offset;

        if j.force_long {
            // Cross-region jump: the loader resolves the distance.
            if ins == Ins::Jmp {
                buf.emit_u8(0xE9);
            } else {
                buf.emit_u8(0x0F);
                buf.emit_u8(0x80 + (short_op - 0x70));
            }
            relocs.push(Reloc {
                offset: buf.len() as u32,
                kind: RelocKind::Rel32,
                target: RelocTarget::Label(j.target),
                trailing: 0,
            });
            buf.emit_u32(0);
            return;
        }

        let rel = target_off as i64 - (ins_off + code_size) as i64;
        if j.short {
            let rel8 = i8::try_from(rel).expect("short jump distance out of range at emission");
            buf.emit_u8(short_op);
            buf.emit_u8(rel8 as u8);
        } else {
            if ins == Ins::Jmp {
                buf.emit_u8(0xE9);
            } else {
                buf.emit_u8(0x0F);
                buf.emit_u8(0x80 + (short_op - 0x70));
            }
            let rel32 = i32::try_from(rel).expect("jump distance exceeds rel32");
            buf.emit_u32(rel32 as u32);
        }
    }

    /// Update the liveness set for one emitted instruction. `end` is the
    /// offset of the first byte after it — the boundary the state change
    /// takes effect at.
    fn update_gc(&self, d: &InsDesc, no_gc_group: bool, end: u32, gc: &mut GcTracker) {
        match &d.shape {
            InsShape::Call {
                gc_refs,
                byref_refs,
                preserved,
                ..
            } => {
                let preserved = preserved.unwrap_or(self.frame.callee_saved);
                let record = !no_gc_group && d.flags & desc_flags::NO_RETURN == 0;
                gc.record_call(end, *gc_refs, *byref_refs, preserved, record);
                if d.attr.is_gc() {
                    gc.set_reg(end, Reg::Rax, d.attr.gc);
                }
            }
            _ if d.ins.kills_rax_rdx() => {
                let mut dead = RegSet::EMPTY;
                dead.insert(Reg::Rax);
                dead.insert(Reg::Rdx);
                gc.kill_regs(end, dead);
            }
            InsShape::Reg { reg } => {
                if d.ins.info().um != UpdateMode::Rd && reg.is_gp() {
                    gc.set_reg(end, *reg, Self::dest_gc_kind(d.attr));
                }
            }
            InsShape::RegReg { reg1, reg2 } => {
                if d.ins == Ins::Xchg {
                    // Both sides rewritten; GC values are not allowed here.
                    gc.set_reg(end, *reg1, GcKind::None);
                    gc.set_reg(end, *reg2, GcKind::None);
                } else if d.ins.info().um != UpdateMode::Rd && reg1.is_gp() {
                    gc.set_reg(end, *reg1, Self::dest_gc_kind(d.attr));
                }
            }
            InsShape::RegRegReg { .. } => {}
            InsShape::RegImm { reg, .. } | InsShape::RegRegImm { dst: reg, .. } => {
                if d.ins.info().um != UpdateMode::Rd && reg.is_gp() {
                    gc.set_reg(end, *reg, Self::dest_gc_kind(d.attr));
                }
            }
            InsShape::RegMem { reg, .. } => {
                if d.ins.info().um != UpdateMode::Rd && reg.is_gp() {
                    gc.set_reg(end, *reg, Self::dest_gc_kind(d.attr));
                }
            }
            InsShape::MemReg { mem, .. } | InsShape::MemImm { mem, .. } => {
                if let MemRef::Frame { slot, .. } = mem {
                    gc.set_slot(end, *slot, Self::dest_gc_kind(d.attr));
                }
            }
            InsShape::Mem { .. } | InsShape::Imm { .. } | InsShape::Jmp(_) | InsShape::None => {}
        }
    }
}
