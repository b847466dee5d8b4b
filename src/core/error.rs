// This module defines the error taxonomy of the translator using the thiserror crate.
// TranslateError has one variant per failure kind a function can hit on its way
// through the pipeline: catalog lookups (UnknownType), signature resolution
// (UnresolvedParameter, InconsistentAttributes), dual-phase cross-validation
// (StubMismatch), ABI placement (UnsupportedPlacement), constant-pool relocation
// (UnresolvedConstantRef), streaming verification (UnreachableExit) and native compiler
// runs (CompilerInvocationFailed), plus I/O and object-parsing failures. Each variant
// carries enough context to print a useful diagnostic. ErrorKind is the flat tag used
// for reports, and FunctionFailure pairs an error with the source location of the
// function it aborted.

//! Error types for the translator.

use crate::core::arch::Arch;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for translation.
#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("unknown type `{name}` for {arch}")]
    UnknownType { arch: Arch, name: String },

    #[error("parameter {index} (`{param}`) of `{function}` has unresolved type `{ty}`")]
    UnresolvedParameter {
        function: String,
        index: usize,
        param: String,
        ty: String,
    },

    #[error("inconsistent attributes on `{function}`: {reason}")]
    InconsistentAttributes { function: String, reason: String },

    #[error("stub layout of `{function}` disagrees with the real headers: {detail}")]
    StubMismatch { function: String, detail: String },

    #[error("cannot place {what} of `{function}`: {reason}")]
    UnsupportedPlacement {
        function: String,
        what: String,
        reason: String,
    },

    #[error("unresolved constant reference in `{function}` at +{offset:#x}: {reason}")]
    UnresolvedConstantRef {
        function: String,
        offset: u64,
        reason: String,
    },

    #[error("`{function}` can return through +{offset:#x} while still in streaming mode")]
    UnreachableExit { function: String, offset: u64 },

    #[error("{pass} compiler invocation failed: {reason}")]
    CompilerInvocationFailed { pass: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed object file: {0}")]
    Object(#[from] object::read::Error),
}

impl TranslateError {
    /// Flat classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TranslateError::UnknownType { .. } => ErrorKind::UnknownType,
            TranslateError::UnresolvedParameter { .. } => ErrorKind::UnresolvedParameter,
            TranslateError::InconsistentAttributes { .. } => ErrorKind::InconsistentAttributes,
            TranslateError::StubMismatch { .. } => ErrorKind::StubMismatch,
            TranslateError::UnsupportedPlacement { .. } => ErrorKind::UnsupportedPlacement,
            TranslateError::UnresolvedConstantRef { .. } => ErrorKind::UnresolvedConstantRef,
            TranslateError::UnreachableExit { .. } => ErrorKind::UnreachableExit,
            TranslateError::CompilerInvocationFailed { .. }
            | TranslateError::Io(_)
            | TranslateError::Object(_) => ErrorKind::CompilerInvocationFailed,
        }
    }

    /// Whether this error stops every function of the architecture target.
    pub fn halts_target(&self) -> bool {
        matches!(self, TranslateError::StubMismatch { .. })
    }
}

/// Result type alias for translation operations.
pub type TranslateResult<T> = Result<T, TranslateError>;

/// Error kinds as they appear in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnknownType,
    UnresolvedParameter,
    InconsistentAttributes,
    StubMismatch,
    UnsupportedPlacement,
    UnresolvedConstantRef,
    UnreachableExit,
    CompilerInvocationFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::UnknownType => "UnknownType",
            ErrorKind::UnresolvedParameter => "UnresolvedParameter",
            ErrorKind::InconsistentAttributes => "InconsistentAttributes",
            ErrorKind::StubMismatch => "StubMismatch",
            ErrorKind::UnsupportedPlacement => "UnsupportedPlacement",
            ErrorKind::UnresolvedConstantRef => "UnresolvedConstantRef",
            ErrorKind::UnreachableExit => "UnreachableExit",
            ErrorKind::CompilerInvocationFailed => "CompilerInvocationFailed",
        };
        f.write_str(name)
    }
}

/// Position of a declaration in its source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(file: impl AsRef<Path>, line: u32, column: u32) -> Self {
        Self {
            file: file.as_ref().to_path_buf(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

/// A function whose translation was aborted.
#[derive(Debug)]
pub struct FunctionFailure {
    pub function: String,
    pub location: SourceLocation,
    pub error: TranslateError,
}

impl FunctionFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl fmt::Display for FunctionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: error[{}]: {}", self.location, self.kind(), self.error)
    }
}
