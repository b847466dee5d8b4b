// This module provides arena-based translation session management using the bumpalo
// crate. TranslationSession owns nothing but borrows a Bump arena for the duration of a
// translator run. It interns strings (function and unit names that outlive a single
// per-function pipeline) and accumulates SessionStats. Per-function pipelines run on
// rayon workers and return plain owned results; the translator folds those results into
// the session serially, so the session itself uses RefCell rather than locks.
// SessionStats counts translated units, emitted functions, body and constant bytes,
// streaming regions and failures by kind, and renders a summary through Display.

//! Arena-based translation session management.

use crate::core::error::ErrorKind;
use bumpalo::Bump;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Arena-based translation session.
pub struct TranslationSession<'arena> {
    /// Arena allocator for session-lifetime data.
    arena: &'arena Bump,

    /// Session statistics.
    stats: RefCell<SessionStats>,

    /// String interning for efficient storage.
    interned_strings: RefCell<HashMap<String, &'arena str>>,

    /// Source unit currently being translated.
    current_unit: RefCell<Option<&'arena str>>,
}

impl<'arena> TranslationSession<'arena> {
    /// Create a new translation session with the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
            interned_strings: RefCell::new(HashMap::new()),
            current_unit: RefCell::new(None),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }

        let interned = self.arena.alloc_str(s);
        strings.insert(s.to_string(), interned);
        interned
    }

    /// Start translating a new source unit.
    pub fn begin_unit(&self, path: &str) {
        let name = self.intern_str(path);
        *self.current_unit.borrow_mut() = Some(name);
        self.stats.borrow_mut().units_translated += 1;
    }

    pub fn current_unit(&self) -> Option<&'arena str> {
        *self.current_unit.borrow()
    }

    /// Record that a function was emitted.
    pub fn record_function_emitted(
        &self,
        name: &str,
        body_size: usize,
        constant_entries: usize,
        constant_bytes: usize,
    ) {
        let mut stats = self.stats.borrow_mut();
        stats.functions_emitted += 1;
        stats.total_body_size += body_size;
        stats.constant_entries += constant_entries;
        stats.constant_bytes += constant_bytes;

        if stats.largest_function_size < body_size {
            stats.largest_function_size = body_size;
            stats.largest_function_name = name.to_string();
        }
    }

    /// Record an instrumented streaming region.
    pub fn record_streaming_region(&self) {
        self.stats.borrow_mut().streaming_regions += 1;
    }

    /// Record a function whose translation failed.
    pub fn record_failure(&self, kind: ErrorKind) {
        let mut stats = self.stats.borrow_mut();
        stats.failures += 1;
        *stats.failure_counts.entry(kind.to_string()).or_insert(0) += 1;
    }

    /// Get translation statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Translation session statistics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Number of source units translated.
    pub units_translated: usize,

    /// Number of functions emitted.
    pub functions_emitted: usize,

    /// Total machine code carried into the output (bytes).
    pub total_body_size: usize,

    /// Constant pool entries relocated.
    pub constant_entries: usize,

    /// Constant pool bytes relocated.
    pub constant_bytes: usize,

    /// Streaming regions instrumented.
    pub streaming_regions: usize,

    /// Functions that failed.
    pub failures: usize,

    /// Failures by error kind.
    pub failure_counts: BTreeMap<String, usize>,

    /// Largest function emitted.
    pub largest_function_size: usize,

    /// Name of largest function.
    pub largest_function_name: String,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Translation Session Statistics:")?;
        writeln!(f, "  Units translated: {}", self.units_translated)?;
        writeln!(f, "  Functions emitted: {}", self.functions_emitted)?;
        writeln!(f, "  Total body size: {} bytes", self.total_body_size)?;
        writeln!(
            f,
            "  Constant pool: {} entries, {} bytes",
            self.constant_entries, self.constant_bytes
        )?;
        writeln!(f, "  Streaming regions: {}", self.streaming_regions)?;
        writeln!(f, "  Failures: {}", self.failures)?;

        if !self.largest_function_name.is_empty() {
            writeln!(
                f,
                "  Largest function: {} ({} bytes)",
                self.largest_function_name, self.largest_function_size
            )?;
        }

        for (kind, count) in &self.failure_counts {
            writeln!(f, "    {}: {}", kind, count)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_session_creation() {
        let arena = Bump::new();
        let session = TranslationSession::new(&arena);

        let stats = session.stats();
        assert_eq!(stats.functions_emitted, 0);
        assert_eq!(stats.failures, 0);
        assert!(session.current_unit().is_none());
    }

    #[test]
    fn test_string_interning() {
        let arena = Bump::new();
        let session = TranslationSession::new(&arena);

        let s1 = session.intern_str("add_const_ps256");
        let s2 = session.intern_str("add_const_ps256");
        let s3 = session.intern_str("mopa");

        assert_eq!(s1.as_ptr(), s2.as_ptr());
        assert_ne!(s1.as_ptr(), s3.as_ptr());
    }

    #[test]
    fn test_session_statistics() {
        let arena = Bump::new();
        let session = TranslationSession::new(&arena);

        session.begin_unit("kernels.c");
        session.record_function_emitted("small", 32, 0, 0);
        session.record_function_emitted("big", 256, 2, 64);
        session.record_streaming_region();
        session.record_failure(ErrorKind::UnreachableExit);
        session.record_failure(ErrorKind::UnreachableExit);

        let stats = session.stats();
        assert_eq!(session.current_unit(), Some("kernels.c"));
        assert_eq!(stats.units_translated, 1);
        assert_eq!(stats.functions_emitted, 2);
        assert_eq!(stats.total_body_size, 288);
        assert_eq!(stats.constant_entries, 2);
        assert_eq!(stats.largest_function_name, "big");
        assert_eq!(stats.failure_counts["UnreachableExit"], 2);
    }

    #[test]
    fn test_statistics_display() {
        let arena = Bump::new();
        let session = TranslationSession::new(&arena);
        session.record_function_emitted("f", 64, 1, 32);

        let output = format!("{}", session.stats());
        assert!(output.contains("Functions emitted: 1"));
        assert!(output.contains("Constant pool: 1 entries, 32 bytes"));
        assert!(output.contains("Largest function: f (64 bytes)"));
    }
}
