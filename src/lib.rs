//! simdport - SIMD intrinsic C to Go assembly.
//!
//! simdport translates C functions written with architecture intrinsics (SSE, AVX,
//! AVX-512, NEON, SVE, SME) into Go Plan 9 assembly plus matching Go declarations. The
//! native C compiler produces the machine code; simdport proves the ABI facts the glue
//! relies on, relocates the constant pools the compiler emitted, instruments functions
//! that run in SME streaming mode and renders the call glue between Go ABI0 and the C
//! calling convention.
//!
//! # Primary Usage
//!
//! ```ignore
//! use simdport::config::TranslatorConfig;
//! use simdport::core::{Arch, ClangCompiler, TranslationSession, Translator};
//! use bumpalo::Bump;
//!
//! let config = TranslatorConfig::new(Arch::X86_64).with_machine_option("avx2");
//! let compiler = ClangCompiler::new(&config.compiler);
//! let arena = Bump::new();
//! let session = TranslationSession::new(&arena);
//! let translator = Translator::new(&compiler, &config);
//! let report = translator.translate_file(&session, "kernels.c".as_ref())?;
//! translator.write_outputs(&report)?;
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Catalog, resolver, driver, constant pools, emission and the pipeline
//! - [`x64`] - System V placement, RIP-relative constants and amd64 glue
//! - [`arm64`] - AAPCS64 placement, ADR/ADRP constants, streaming mode and arm64 glue
//! - [`config`] - Translator configuration
//! - [`filecheck`] - FileCheck-style fixture validation

pub mod arm64;
pub mod config;
pub mod core;
pub mod filecheck;
pub mod x64;

pub use config::{SharingPolicy, TranslatorConfig};
pub use core::{
    // Pipeline
    Translator, UnitReport, DualPhaseDriver,
    // Compiler seam
    ClangCompiler, NativeCompiler,
    // Data model
    Arch, TargetOs, FunctionSignature, VectorTypeSpec, AbiPlacement,
    // Errors
    ErrorKind, FunctionFailure, TranslateError, TranslateResult,
    // Session management
    TranslationSession, SessionStats,
};
