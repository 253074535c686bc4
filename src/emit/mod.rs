//! x86-64 instruction emission.
//!
//! The emitter owns the per-method state of one compilation: the chain of
//! instruction groups, frame parameters, GC liveness, the relocation list
//! and the output buffer. Instruction selection appends instructions via
//! the `ins_*` builder methods; [`Emitter::finalize`] resolves jump
//! distances and produces the finished code blob.
//!
//! One emitter per in-flight method compilation; nothing here is shared
//! between concurrently compiled methods.

pub mod buffer;
mod builder;
pub mod code;
pub mod descr;
pub mod gc;
pub mod group;
pub mod insts;
mod jumps;
mod output;
pub mod regs;
pub mod reloc;
pub mod size;

use std::collections::HashSet;

pub use descr::{AddrMode, Attr, CallTarget, GcKind, ImmVal, InsShape, JmpState, MemRef, OperSize};
pub use gc::{CallSite, GcInfoTable, GcSnapshot};
pub use group::{GroupId, InsGroup};
pub use insts::Ins;
pub use regs::{Cond, Reg, RegSet};
pub use reloc::{Reloc, RelocKind, RelocTarget};

use crate::config::EmitConfig;
use crate::error::EmitError;

/// Per-method frame description, decided by the register allocator.
#[derive(Debug, Clone)]
pub struct FrameInfo {
    /// Frame slots are addressed off RBP; otherwise off RSP, where the
    /// current push depth is folded into each slot displacement.
    pub fp_based: bool,
    /// Registers preserved across ordinary calls.
    pub callee_saved: RegSet,
}

impl Default for FrameInfo {
    fn default() -> Self {
        Self {
            fp_based: true,
            callee_saved: RegSet::CALLEE_SAVED,
        }
    }
}

/// The per-method emission context.
pub struct Emitter {
    pub(crate) cfg: EmitConfig,
    pub(crate) frame: FrameInfo,
    /// All groups, indexed by `GroupId`.
    pub(crate) groups: Vec<InsGroup>,
    /// Layout order of placed groups.
    pub(crate) order: Vec<GroupId>,
    /// Groups that have been placed (bound to a layout position).
    pub(crate) placed: HashSet<GroupId>,
    /// Current push depth beyond the established frame, in bytes.
    pub(crate) stack_level: u32,
    /// Everything placed from here on belongs to the cold region.
    pub(crate) cold_started: bool,
}

impl Emitter {
    pub fn new(cfg: EmitConfig, frame: FrameInfo) -> Emitter {
        let mut e = Emitter {
            cfg,
            frame,
            groups: vec![InsGroup::new()],
            order: vec![GroupId(0)],
            placed: HashSet::new(),
            stack_level: 0,
            cold_started: false,
        };
        e.placed.insert(GroupId(0));
        e
    }

    /// The group instructions are currently appended to.
    pub fn cur_group(&self) -> &InsGroup {
        let gid = *self.order.last().unwrap();
        &self.groups[gid.0 as usize]
    }

    pub(crate) fn cur_group_mut(&mut self) -> &mut InsGroup {
        let gid = *self.order.last().unwrap();
        &mut self.groups[gid.0 as usize]
    }

    /// Allocate a group that can be jumped to before it is placed.
    pub fn reserve_label(&mut self) -> GroupId {
        let id = GroupId(self.groups.len() as u32);
        self.groups.push(InsGroup::new());
        id
    }

    /// Place a reserved group: it becomes the current group and occupies
    /// the next position in layout order.
    pub fn bind_label(&mut self, id: GroupId) {
        assert!(
            self.placed.insert(id),
            "group {} bound twice",
            id.0
        );
        let g = &mut self.groups[id.0 as usize];
        g.cold = self.cold_started;
        g.label = true;
        self.order.push(id);
    }

    /// Start a new group at the current position (fallthrough label or
    /// basic-block boundary) and return its id.
    pub fn new_group(&mut self) -> GroupId {
        let id = self.reserve_label();
        self.bind_label(id);
        id
    }

    /// Everything appended after this call is cold code. Jumps between the
    /// two regions stay long and carry relocations.
    pub fn begin_cold_region(&mut self) {
        assert!(!self.cold_started, "cold region started twice");
        self.cold_started = true;
        self.new_group();
    }

    /// Mark the current group as a no-GC fragment (prologue/epilogue);
    /// call sites inside it are not recorded in the GC table.
    pub fn mark_no_gc(&mut self) {
        self.cur_group_mut().no_gc = true;
    }

    /// Current push depth beyond the established frame.
    pub fn stack_level(&self) -> u32 {
        self.stack_level
    }

    /// Number of placed groups.
    pub fn group_count(&self) -> usize {
        self.order.len()
    }

    /// Resolve jumps, emit bytes, and hand back the finished blob.
    pub fn finalize(mut self) -> Result<CodeBlob, EmitError> {
        for (i, g) in self.groups.iter().enumerate() {
            assert!(
                self.placed.contains(&GroupId(i as u32)) || g.insns.is_empty(),
                "group {i} was never placed"
            );
        }
        let total = self.resolve_jumps()?;
        let hot_size = self
            .order
            .iter()
            .find(|gid| self.groups[gid.0 as usize].cold)
            .map(|gid| self.groups[gid.0 as usize].offset as u64);
        let (buf, relocs, gc_info) = self.output_all();
        assert_eq!(buf.len() as u64, total, "layout total and emitted bytes differ");
        Ok(CodeBlob {
            code: buf.into_code(),
            relocs,
            gc_info,
            hot_size: hot_size.unwrap_or(total) as u32,
        })
    }
}

/// A finalized method body.
pub struct CodeBlob {
    /// The machine code bytes (hot region first, then cold).
    pub code: Vec<u8>,
    /// Fields the loader must patch.
    pub relocs: Vec<Reloc>,
    /// GC liveness side table.
    pub gc_info: GcInfoTable,
    /// Size of the hot region; equals `code.len()` when nothing is cold.
    pub hot_size: u32,
}

impl CodeBlob {
    /// Copy the code into executable memory. Only legal for self-contained
    /// code: any outstanding relocation means the bytes are not runnable.
    #[cfg(feature = "exec")]
    pub fn into_executable(self) -> Result<crate::memory::ExecutableMemory, EmitError> {
        assert!(
            self.relocs.is_empty(),
            "cannot execute code with unresolved relocations"
        );
        let mut mem = crate::memory::ExecutableMemory::new(self.code.len())?;
        mem.write(0, &self.code)?;
        mem.make_executable()?;
        Ok(mem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitter() -> Emitter {
        Emitter::new(EmitConfig::default(), FrameInfo::default())
    }

    #[test]
    fn test_simple_sequence_bytes() {
        let mut e = emitter();
        e.ins_r_r(Ins::Mov, Attr::QWORD, Reg::Rax, Reg::Rcx);
        e.ins_r_i(Ins::Add, Attr::QWORD, Reg::Rax, ImmVal::new(8));
        e.ins_none(Ins::Ret, Attr::DWORD);
        let blob = e.finalize().unwrap();
        assert_eq!(blob.code, vec![0x48, 0x8B, 0xC1, 0x48, 0x83, 0xC0, 0x08, 0xC3]);
        assert!(blob.relocs.is_empty());
    }

    #[test]
    fn test_backward_jump_shrinks_to_short() {
        let mut e = emitter();
        let top = e.new_group();
        e.ins_r_r(Ins::Add, Attr::DWORD, Reg::Rax, Reg::Rcx);
        e.ins_j(Ins::Jmp, top);
        let blob = e.finalize().unwrap();
        // add eax,ecx = 03 C1; jmp -4 = EB FC
        assert_eq!(blob.code, vec![0x03, 0xC1, 0xEB, 0xFC]);
    }

    #[test]
    fn test_forward_jump_resolution() {
        let mut e = emitter();
        let out = e.reserve_label();
        e.ins_j(Ins::Je, out);
        e.ins_r_r(Ins::Xor, Attr::DWORD, Reg::Rax, Reg::Rax);
        e.bind_label(out);
        e.ins_none(Ins::Ret, Attr::DWORD);
        let blob = e.finalize().unwrap();
        // je +2 (short) over xor eax,eax; then ret
        assert_eq!(blob.code, vec![0x74, 0x02, 0x33, 0xC0, 0xC3]);
    }

    #[test]
    fn test_method_too_large() {
        let cfg = EmitConfig {
            max_method_size: 16,
            ..EmitConfig::default()
        };
        let mut e = Emitter::new(cfg, FrameInfo::default());
        for _ in 0..8 {
            e.ins_r_r(Ins::Mov, Attr::QWORD, Reg::Rax, Reg::Rcx);
        }
        match e.finalize() {
            Err(EmitError::MethodTooLarge { size, limit }) => {
                assert_eq!(size, 24);
                assert_eq!(limit, 16);
            }
            _ => panic!("expected MethodTooLarge"),
        }
    }

    #[test]
    fn test_call_records_gc_site() {
        let mut e = emitter();
        let mut live = RegSet::EMPTY;
        live.insert(Reg::Rbx);
        live.insert(Reg::Rax);
        e.ins_call(
            CallTarget::Direct(RelocTarget::Method(42)),
            Attr::GCREF,
            live,
            RegSet::EMPTY,
            None,
            false,
        );
        e.ins_none(Ins::Ret, Attr::DWORD);
        let blob = e.finalize().unwrap();
        assert_eq!(blob.relocs.len(), 1);
        assert_eq!(blob.relocs[0].offset, 1);
        let site = &blob.gc_info.call_sites[0];
        assert_eq!(site.offset, 5);
        // rbx survives the call; rax is rewritten by the GC-typed return
        assert!(site.gc_regs.contains(Reg::Rbx));
        assert!(!site.gc_regs.contains(Reg::Rax));
        assert!(blob.gc_info.live_at(5).gc_regs.contains(Reg::Rax));
    }
}
