// This module is the hub of the architecture-independent translator. It holds the data
// model (catalog types, signatures, placements), the pipeline stages that do not depend
// on the instruction set (declaration scanning, signature resolution, the dual-phase
// driver, constant pool extraction, Go emission) and the infrastructure threaded through
// them: errors, the translation session and the compiler seam. Architecture-specific
// pieces live in `x64` and `arm64` and plug in through the CCAssigner and GlueWriter
// traits and the per-arch scanners and patchers.

//! Core translator infrastructure.
//!
//! # Key Components
//!
//! ## Type-Stub Catalog (`catalog`)
//! - Sealed registry of vector, tuple, predicate and scalar types per architecture
//! - Stub declarations for the metadata pass
//!
//! ## Signature Resolution (`c_decl`, `signature`)
//! - Lightweight scanning of C function definitions
//! - Resolution against the catalog, including SME mode attributes
//!
//! ## Dual-Phase Driver (`driver`, `compiler`, `object_file`)
//! - Stub-header and real-header compiler passes run concurrently
//! - Probe tables cross-validate layouts before object code is trusted
//!
//! ## ABI Placement (`abi`, `register_file`)
//! - Register banks and the CCAssigner seam
//!
//! ## Constant Pools (`constant_pool`)
//! - Extraction of read-only data into symbolic, relocatable bodies
//!
//! ## Emission (`emitter`, `translator`)
//! - Go ABI0 frames, TEXT fragments and declaration files
//! - The per-unit pipeline and its reports

pub mod abi;
pub mod analyzer;
pub mod arch;
pub mod c_decl;
pub mod catalog;
pub mod compiler;
pub mod constant_pool;
pub mod driver;
pub mod emitter;
pub mod error;
pub mod object_file;
pub mod register_file;
pub mod session;
pub mod signature;
pub mod test_utils;
pub mod translator;

pub use abi::{AbiPlacement, ArgPlacement, CCAssigner, PassingConvention};
pub use arch::{Arch, TargetOs};
pub use catalog::{ElementType, RegClass, VectorTypeSpec};
pub use compiler::{ClangCompiler, CompileJob, NativeCompiler, Pass};
pub use constant_pool::{ConstantPoolEntry, ResolvedImage};
pub use driver::DualPhaseDriver;
pub use emitter::{EmittedFunction, GoFrame};
pub use error::{ErrorKind, FunctionFailure, SourceLocation, TranslateError, TranslateResult};
pub use register_file::{AsmReg, RegBitSet};
pub use session::{SessionStats, TranslationSession};
pub use signature::FunctionSignature;
pub use translator::{Translator, UnitReport};
