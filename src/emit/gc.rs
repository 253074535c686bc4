//! GC liveness tracking during byte emission.
//!
//! The emitter maintains which registers and stack slots hold object
//! references or interior pointers, updated at every instruction boundary,
//! and records the information a collector needs to find roots: a
//! transition log keyed by code offset plus a snapshot at every call site.

use std::collections::BTreeMap;

use super::descr::GcKind;
use super::regs::{Reg, RegSet};

/// Full liveness state at one code offset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GcSnapshot {
    /// Registers holding object references.
    pub gc_regs: RegSet,
    /// Registers holding interior pointers.
    pub byref_regs: RegSet,
    /// Frame slots (by frame offset) holding references.
    pub slots: BTreeMap<i32, GcKind>,
}

/// A call-site record for the GC info table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    /// Offset of the byte after the call instruction (the return address
    /// the collector will see on the stack).
    pub offset: u32,
    pub gc_regs: RegSet,
    pub byref_regs: RegSet,
    pub slots: Vec<(i32, GcKind)>,
}

/// The emitted GC side table.
#[derive(Debug, Default)]
pub struct GcInfoTable {
    /// Liveness transitions in offset order. Each entry is the complete
    /// state from that offset until the next entry.
    pub transitions: Vec<(u32, GcSnapshot)>,
    pub call_sites: Vec<CallSite>,
}

impl GcInfoTable {
    /// Liveness at an arbitrary byte offset: the last transition at or
    /// before it.
    pub fn live_at(&self, offset: u32) -> GcSnapshot {
        self.transitions
            .iter()
            .take_while(|(o, _)| *o <= offset)
            .last()
            .map(|(_, s)| s.clone())
            .unwrap_or_default()
    }
}

/// Incremental liveness state maintained by the byte emitter.
#[derive(Debug, Default)]
pub struct GcTracker {
    state: GcSnapshot,
    table: GcInfoTable,
}

impl GcTracker {
    pub fn new() -> GcTracker {
        GcTracker::default()
    }

    pub fn current(&self) -> &GcSnapshot {
        &self.state
    }

    /// A register was written with a value of the given GC nature, at an
    /// instruction ending at `offset`.
    pub fn set_reg(&mut self, offset: u32, reg: Reg, kind: GcKind) {
        if !reg.is_gp() {
            return;
        }
        let before = (self.state.gc_regs, self.state.byref_regs);
        self.state.gc_regs.remove(reg);
        self.state.byref_regs.remove(reg);
        match kind {
            GcKind::Ref => self.state.gc_regs.insert(reg),
            GcKind::Byref => self.state.byref_regs.insert(reg),
            GcKind::None => {}
        }
        if before != (self.state.gc_regs, self.state.byref_regs) {
            self.record(offset);
        }
    }

    /// Remove a whole set of registers (killed across a call).
    pub fn kill_regs(&mut self, offset: u32, dead: RegSet) {
        let before = (self.state.gc_regs, self.state.byref_regs);
        self.state.gc_regs = RegSet(self.state.gc_regs.0 & !dead.0);
        self.state.byref_regs = RegSet(self.state.byref_regs.0 & !dead.0);
        if before != (self.state.gc_regs, self.state.byref_regs) {
            self.record(offset);
        }
    }

    /// A frame slot was stored with a value of the given GC nature.
    pub fn set_slot(&mut self, offset: u32, slot: i32, kind: GcKind) {
        let changed = match kind {
            GcKind::None => self.state.slots.remove(&slot).is_some(),
            k => self.state.slots.insert(slot, k) != Some(k),
        };
        if changed {
            self.record(offset);
        }
    }

    /// Record a call site keyed by its post-call offset. `gc_refs` and
    /// `byref_refs` are the caller-provided liveness snapshot for the call
    /// site; `preserved` is the register set the callee leaves intact, and
    /// everything outside it dies across the call.
    pub fn record_call(
        &mut self,
        offset_after: u32,
        gc_refs: RegSet,
        byref_refs: RegSet,
        preserved: RegSet,
        record_site: bool,
    ) {
        let gc = gc_refs.intersect(preserved);
        let byref = byref_refs.intersect(preserved);
        if record_site {
            self.table.call_sites.push(CallSite {
                offset: offset_after,
                gc_regs: gc,
                byref_regs: byref,
                slots: self.state.slots.iter().map(|(&o, &k)| (o, k)).collect(),
            });
        }
        // Caller-saved references are dead after the call.
        let before = (self.state.gc_regs, self.state.byref_regs);
        self.state.gc_regs = gc;
        self.state.byref_regs = byref;
        if before != (gc, byref) {
            self.record(offset_after);
        }
    }

    fn record(&mut self, offset: u32) {
        // Collapse multiple updates at one offset into the final state so
        // no reachable suspend point ever observes a half-updated set.
        if let Some(last) = self.table.transitions.last_mut() {
            if last.0 == offset {
                last.1 = self.state.clone();
                return;
            }
        }
        self.table.transitions.push((offset, self.state.clone()));
    }

    pub fn into_table(self) -> GcInfoTable {
        self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reg_tracking() {
        let mut t = GcTracker::new();
        t.set_reg(4, Reg::Rax, GcKind::Ref);
        t.set_reg(8, Reg::Rcx, GcKind::Byref);
        t.set_reg(12, Reg::Rax, GcKind::None);

        let table = t.into_table();
        assert!(table.live_at(4).gc_regs.contains(Reg::Rax));
        assert!(table.live_at(9).byref_regs.contains(Reg::Rcx));
        let at12 = table.live_at(12);
        assert!(!at12.gc_regs.contains(Reg::Rax));
        assert!(at12.byref_regs.contains(Reg::Rcx));
    }

    #[test]
    fn test_slot_tracking() {
        let mut t = GcTracker::new();
        t.set_slot(4, -8, GcKind::Ref);
        t.set_slot(8, -16, GcKind::Byref);
        t.set_slot(12, -8, GcKind::None);

        let table = t.into_table();
        assert_eq!(table.live_at(5).slots.get(&-8), Some(&GcKind::Ref));
        let at12 = table.live_at(20);
        assert!(!at12.slots.contains_key(&-8));
        assert_eq!(at12.slots.get(&-16), Some(&GcKind::Byref));
    }

    #[test]
    fn test_call_site_filtering() {
        let mut t = GcTracker::new();
        t.set_reg(3, Reg::Rbx, GcKind::Ref); // callee-saved
        t.set_reg(6, Reg::Rax, GcKind::Ref); // caller-saved
        let live = t.current().gc_regs;
        t.record_call(11, live, RegSet::EMPTY, RegSet::CALLEE_SAVED, true);

        let table = t.into_table();
        let site = &table.call_sites[0];
        assert_eq!(site.offset, 11);
        assert!(site.gc_regs.contains(Reg::Rbx));
        assert!(!site.gc_regs.contains(Reg::Rax));
        // rax is dead after the call
        assert!(!table.live_at(11).gc_regs.contains(Reg::Rax));
        assert!(table.live_at(11).gc_regs.contains(Reg::Rbx));
    }

    #[test]
    fn test_same_offset_updates_collapse() {
        let mut t = GcTracker::new();
        t.set_reg(4, Reg::Rax, GcKind::Ref);
        t.set_reg(4, Reg::Rcx, GcKind::Ref);
        let table = t.into_table();
        assert_eq!(table.transitions.len(), 1);
        let s = table.live_at(4);
        assert!(s.gc_regs.contains(Reg::Rax) && s.gc_regs.contains(Reg::Rcx));
    }
}
