//! Instruction groups.
//!
//! A group is a contiguous run of instruction descriptors — roughly one
//! basic block or prologue/epilogue fragment. Groups are the unit of jump
//! targeting and offset assignment: the resolution pass re-measures group
//! sizes until no jump changes form.

use super::descr::InsDesc;
use super::regs::RegSet;

/// Identifier of an instruction group within one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub u32);

/// A contiguous run of instruction descriptors.
#[derive(Debug)]
pub struct InsGroup {
    pub insns: Vec<InsDesc>,
    /// Offset of the group's first byte; assigned by layout.
    pub offset: u32,
    /// Total encoded size of the group's instructions.
    pub size: u32,
    /// Registers holding GC references on entry to the group.
    pub gc_refs_in: RegSet,
    /// Group lives in the cold region of a hot/cold split method.
    pub cold: bool,
    /// The group is a jump target.
    pub label: bool,
    /// Prologue/epilogue fragment: GC call sites are not recorded inside.
    pub no_gc: bool,
}

impl InsGroup {
    pub fn new() -> InsGroup {
        InsGroup {
            insns: Vec::new(),
            offset: 0,
            size: 0,
            gc_refs_in: RegSet::EMPTY,
            cold: false,
            label: false,
            no_gc: false,
        }
    }
}

impl Default for InsGroup {
    fn default() -> Self {
        Self::new()
    }
}
