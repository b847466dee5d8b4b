//! AArch64 architecture-specific components.
//!
//! - AAPCS64 placement for NEON, SVE and predicate values
//! - Instruction word helpers for branches, ADR and stack adjustments
//! - ADR/ADRP and literal-load constant reference scanning and patching
//! - SME streaming-mode instrumentation
//! - arm64 Go ABI0 call glue

pub mod calling_convention;
pub mod constant_refs;
pub mod glue;
pub mod insn;
pub mod streaming;

pub use calling_convention::Aapcs64Assigner;
pub use glue::Arm64Glue;
