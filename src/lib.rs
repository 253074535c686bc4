//! Kiln - x86-64 machine-code emission backend for a JIT compiler.
//!
//! This library provides the two back-end phases that turn low-level IR
//! into executable bytes:
//! - Instruction emission: descriptor construction, exact size estimation,
//!   prefix/ModRM/SIB encoding, shrink-to-fit jump resolution, relocation
//!   records and GC-liveness bookkeeping for x86-64.
//! - Long decomposition: the per-block rewrite that splits 64-bit IR
//!   operations into explicit 32-bit pairs for narrow-register targets.

pub mod config;
pub mod decompose;
pub mod emit;
pub mod error;
pub mod ir;
#[cfg(feature = "exec")]
pub mod memory;

// Re-export commonly used types
pub use config::EmitConfig;
pub use emit::{Attr, CodeBlob, Emitter, FrameInfo, GroupId, Ins, Reg, RegSet};
pub use error::EmitError;
