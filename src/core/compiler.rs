// This module defines the seam between the translator and the native C compiler. The
// NativeCompiler trait takes a fully prepared translation unit (stub pass or real pass)
// and returns the bytes of the ELF object it compiles to. ClangCompiler is the
// production implementation: it writes the unit into a tempfile work directory, spawns
// clang with the target triple and flags, and enforces a process-level timeout by
// polling the child. Compiler diagnostics are captured to a file in the work directory
// and forwarded to the log. A timeout, a spawn failure or a non-zero exit is reported as
// CompilerInvocationFailed and never retried. Tests substitute a fake implementation
// that returns synthetic objects.

//! Native compiler invocation.

use crate::core::arch::Arch;
use crate::core::error::{TranslateError, TranslateResult};
use std::fmt;
use std::fs::{self, File};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Which of the two driver passes a unit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    /// Catalog stubs, no vendor headers.
    Stub,
    /// Real headers; produces the object code.
    Real,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pass::Stub => f.write_str("stub"),
            Pass::Real => f.write_str("real"),
        }
    }
}

/// One compiler invocation.
#[derive(Debug, Clone)]
pub struct CompileJob {
    pub pass: Pass,
    pub arch: Arch,
    /// Complete C translation unit.
    pub unit: String,
    /// Flags from the configuration.
    pub flags: Vec<String>,
    /// Additional include directories, such as the source file's directory.
    pub include_dirs: Vec<PathBuf>,
    pub timeout: Duration,
}

/// A C compiler able to produce ELF objects for a target triple.
pub trait NativeCompiler: Sync {
    /// Human-readable compiler version for generated headers.
    fn version(&self) -> TranslateResult<String>;

    /// Compile a unit and return the object file bytes.
    fn compile(&self, job: &CompileJob) -> TranslateResult<Vec<u8>>;
}

/// Clang invoked as an external process.
#[derive(Debug, Clone)]
pub struct ClangCompiler {
    program: String,
}

const POLL_INTERVAL: Duration = Duration::from_millis(5);

impl ClangCompiler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn failure(pass: Pass, reason: String) -> TranslateError {
        TranslateError::CompilerInvocationFailed {
            pass: pass.to_string(),
            reason,
        }
    }
}

impl NativeCompiler for ClangCompiler {
    fn version(&self) -> TranslateResult<String> {
        let output = Command::new(&self.program)
            .arg("--version")
            .output()
            .map_err(|e| Self::failure(Pass::Real, format!("cannot run {}: {e}", self.program)))?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.lines().next().unwrap_or_default().trim().to_string())
    }

    fn compile(&self, job: &CompileJob) -> TranslateResult<Vec<u8>> {
        let workdir = tempfile::tempdir()?;
        let unit_path = workdir.path().join("unit.c");
        let object_path = workdir.path().join("unit.o");
        let stderr_path = workdir.path().join("stderr.txt");
        fs::write(&unit_path, &job.unit)?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("-target")
            .arg(job.arch.triple())
            .arg("-c")
            .arg(&unit_path)
            .arg("-o")
            .arg(&object_path)
            .args(&job.flags);
        for dir in &job.include_dirs {
            cmd.arg(format!("-I{}", dir.display()));
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(File::create(&stderr_path)?));

        log::debug!("{} pass: {:?}", job.pass, cmd);
        let mut child = cmd
            .spawn()
            .map_err(|e| Self::failure(job.pass, format!("cannot run {}: {e}", self.program)))?;

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= job.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Self::failure(
                    job.pass,
                    format!("timed out after {:?}", job.timeout),
                ));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let diagnostics = fs::read_to_string(&stderr_path).unwrap_or_default();
        for line in diagnostics.lines().filter(|l| !l.trim().is_empty()) {
            log::warn!("{} pass: {}", job.pass, line);
        }
        if !status.success() {
            let first = diagnostics
                .lines()
                .find(|l| l.contains("error"))
                .or_else(|| diagnostics.lines().next())
                .unwrap_or("no diagnostics");
            return Err(Self::failure(
                job.pass,
                format!("{} exited with {status}: {first}", self.program),
            ));
        }
        Ok(fs::read(&object_path)?)
    }
}
