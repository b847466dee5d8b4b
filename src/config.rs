// This module defines TranslatorConfig, the single configuration value threaded through
// a translator run. It is a plain struct with builder-style `with_*` methods, filled
// either by the command line or directly by library users and tests. Besides holding
// the options it derives the facts several stages need: the complete native compiler
// flag list, the native vector register width implied by the machine options, and the
// output file names for a source unit.

//! Translator configuration.

use crate::core::arch::{Arch, TargetOs};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Flags passed to the native compiler for every unit.
pub const FIXED_COMPILER_FLAGS: &[&str] = &[
    "-mno-red-zone",
    "-mllvm",
    "-inline-threshold=1000",
    "-fno-asynchronous-unwind-tables",
    "-fno-exceptions",
    "-fno-rtti",
    "-fno-builtin",
    "-fomit-frame-pointer",
    "-fno-jump-tables",
    "-ffunction-sections",
];

/// What to do with a constant referenced by more than one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SharingPolicy {
    /// Every referencing function gets its own copy.
    #[default]
    Duplicate,
    /// Sharing is an error.
    Exclusive,
}

impl FromStr for SharingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "duplicate" => Ok(SharingPolicy::Duplicate),
            "exclusive" => Ok(SharingPolicy::Exclusive),
            other => Err(format!(
                "unknown constant policy: {other} (available: duplicate, exclusive)"
            )),
        }
    }
}

/// Configuration of one translator run.
#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    pub arch: Arch,
    pub target_os: TargetOs,
    /// Native compiler program.
    pub compiler: String,
    /// Machine options, without the leading `-m`.
    pub machine_options: Vec<String>,
    /// Extra options passed through unmodified.
    pub extra_options: Vec<String>,
    /// Optimization level, without the leading `-O`.
    pub optimize: String,
    pub include_paths: Vec<PathBuf>,
    /// Per-invocation compiler timeout.
    pub timeout: Duration,
    pub sharing_policy: SharingPolicy,
    /// Go package of the generated files.
    pub package: String,
    pub output_dir: PathBuf,
}

impl TranslatorConfig {
    pub fn new(arch: Arch) -> Self {
        Self {
            arch,
            target_os: TargetOs::host(),
            compiler: "clang".to_string(),
            machine_options: Vec::new(),
            extra_options: Vec::new(),
            optimize: "3".to_string(),
            include_paths: Vec::new(),
            timeout: Duration::from_secs(60),
            sharing_policy: SharingPolicy::default(),
            package: "main".to_string(),
            output_dir: PathBuf::from("."),
        }
    }

    pub fn with_target_os(mut self, os: TargetOs) -> Self {
        self.target_os = os;
        self
    }

    pub fn with_compiler(mut self, compiler: impl Into<String>) -> Self {
        self.compiler = compiler.into();
        self
    }

    pub fn with_machine_option(mut self, option: impl Into<String>) -> Self {
        let option = option.into();
        let option = option.strip_prefix("-m").map(str::to_string).unwrap_or(option);
        self.machine_options.push(option);
        self
    }

    pub fn with_extra_option(mut self, option: impl Into<String>) -> Self {
        self.extra_options.push(option.into());
        self
    }

    pub fn with_optimize(mut self, level: impl Into<String>) -> Self {
        self.optimize = level.into();
        self
    }

    pub fn with_include_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.include_paths.push(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sharing_policy(mut self, policy: SharingPolicy) -> Self {
        self.sharing_policy = policy;
        self
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = package.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Complete compiler flag list, excluding target, inputs and outputs.
    pub fn compile_flags(&self) -> Vec<String> {
        let mut flags = vec![format!("-O{}", self.optimize)];
        flags.extend(FIXED_COMPILER_FLAGS.iter().map(|f| f.to_string()));
        flags.extend(self.arch.compiler_flags().iter().map(|f| f.to_string()));
        flags.extend(self.machine_options.iter().map(|m| format!("-m{m}")));
        flags.extend(self.extra_options.iter().cloned());
        flags.extend(
            self.include_paths
                .iter()
                .map(|p| format!("-I{}", p.display())),
        );
        flags
    }

    /// Bytes of the widest vector register the machine options enable.
    pub fn native_vector_width(&self) -> u32 {
        match self.arch {
            Arch::Arm64 => 16,
            Arch::X86_64 => {
                let mut width = 16;
                for option in &self.machine_options {
                    let option = option.as_str();
                    let w = if option.starts_with("avx512") || option == "arch=x86-64-v4" {
                        64
                    } else if option.starts_with("avx")
                        || option == "fma"
                        || option == "arch=x86-64-v3"
                        || option == "arch=haswell"
                    {
                        32
                    } else {
                        16
                    };
                    width = width.max(w);
                }
                width
            }
        }
    }

    /// Base name of the generated files for `source`.
    pub fn output_stem(&self, source: &Path) -> String {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unit".to_string());
        format!("{stem}_{}_{}", self.target_os.goos(), self.arch.goarch())
    }

    pub fn assembly_path(&self, source: &Path) -> PathBuf {
        self.output_dir.join(format!("{}.s", self.output_stem(source)))
    }

    pub fn declarations_path(&self, source: &Path) -> PathBuf {
        self.output_dir.join(format!("{}.go", self.output_stem(source)))
    }
}
