//! Test utilities for synthetic objects and compilers.
//!
//! Unit tests never run a real C compiler. Instead they assemble small ELF objects with
//! the `object` crate's writer and hand them to the pipeline through a fake
//! [`NativeCompiler`](crate::core::compiler::NativeCompiler).
