//! x86-64 architecture-specific components.
//!
//! This module contains all x86-64 specific code:
//! - System V calling convention placement
//! - RIP-relative constant reference scanning and patching using iced-x86
//! - Body rendering and stack depth detection
//! - amd64 Go ABI0 call glue

pub mod body;
pub mod calling_convention;
pub mod constant_refs;
pub mod glue;

pub use calling_convention::SysVAssigner;
pub use glue::Amd64Glue;
