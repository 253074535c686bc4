//! Relocation records.
//!
//! Displacements and immediates whose final value is unknown at
//! code-generation time are written as placeholders; each such site gets a
//! record here for the loader to patch.

use super::group::GroupId;

/// What kind of patch the loader must perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// 32-bit PC-relative, measured from the end of the patched field
    /// plus any trailing immediate bytes.
    Rel32,
    /// 32-bit absolute.
    Abs32,
    /// 64-bit absolute.
    Abs64,
}

/// What the patched field refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocTarget {
    /// Static data item, by token.
    Data(u32),
    /// Method entry point, by token.
    Method(u32),
    /// Runtime helper, by ordinal.
    Helper(u16),
    /// An instruction group of this method (hot/cold-crossing jumps).
    Label(GroupId),
}

/// One relocation site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reloc {
    /// Byte offset of the field to patch.
    pub offset: u32,
    pub kind: RelocKind,
    pub target: RelocTarget,
    /// Immediate bytes that follow the patched field within the same
    /// instruction; PC-relative fixups must account for them.
    pub trailing: u8,
}
