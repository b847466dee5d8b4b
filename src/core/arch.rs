// This module names the target architectures and operating systems the translator
// understands. Arch carries the native compiler triple, Go's GOARCH spelling, the
// architecture-specific compiler flags and the bank sizes of its register files.
// TargetOs only affects naming: object code is always requested as ELF because the
// call boundary is defined by the emitted glue, not by the host operating system.

//! Target architecture and operating system identifiers.

use std::fmt;
use std::str::FromStr;

/// Instruction set architecture a source unit is translated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Arch {
    X86_64,
    Arm64,
}

impl Arch {
    /// Target triple passed to the native compiler.
    pub fn triple(self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64-linux-gnu",
            Arch::Arm64 => "aarch64-linux-gnu",
        }
    }

    /// Go's name for the architecture.
    pub fn goarch(self) -> &'static str {
        match self {
            Arch::X86_64 => "amd64",
            Arch::Arm64 => "arm64",
        }
    }

    /// Flags the compiler needs on this architecture beyond the common set.
    pub fn compiler_flags(self) -> &'static [&'static str] {
        match self {
            Arch::X86_64 => &[],
            // x18 is the platform register on darwin and reserved by Go.
            Arch::Arm64 => &["-ffixed-x18"],
        }
    }

    /// Text alignment Go guarantees for the start of a function.
    pub fn text_alignment(self) -> u32 {
        match self {
            Arch::X86_64 => 32,
            Arch::Arm64 => 16,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.goarch())
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "amd64" | "x86_64" | "x86-64" => Ok(Arch::X86_64),
            "arm64" | "aarch64" => Ok(Arch::Arm64),
            "riscv64" | "loong64" | "loongarch64" => Err(format!(
                "unsupported architecture: {s} (only the x86 SSE/AVX and ARM NEON/SVE/SME vector extensions are translated)"
            )),
            other => Err(format!("unsupported architecture: {other} (available: amd64, arm64)")),
        }
    }
}

/// Operating system of the Go host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetOs {
    Linux,
    Darwin,
}

impl TargetOs {
    pub fn goos(self) -> &'static str {
        match self {
            TargetOs::Linux => "linux",
            TargetOs::Darwin => "darwin",
        }
    }

    /// The operating system of the machine running the translator.
    pub fn host() -> Self {
        if cfg!(target_os = "macos") {
            TargetOs::Darwin
        } else {
            TargetOs::Linux
        }
    }
}

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.goos())
    }
}

impl FromStr for TargetOs {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linux" => Ok(TargetOs::Linux),
            "darwin" | "macos" => Ok(TargetOs::Darwin),
            other => Err(format!("unsupported operating system: {other} (available: linux, darwin)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_parsing() {
        assert_eq!("amd64".parse::<Arch>().unwrap(), Arch::X86_64);
        assert_eq!("aarch64".parse::<Arch>().unwrap(), Arch::Arm64);
        assert!("riscv64".parse::<Arch>().is_err());
    }

    #[test]
    fn test_vector_isas_without_glue_are_named() {
        for name in ["riscv64", "loong64"] {
            let err = name.parse::<Arch>().unwrap_err();
            assert!(err.contains(name), "{err}");
            assert!(err.contains("NEON/SVE/SME"), "{err}");
        }
        let err = "mips64".parse::<Arch>().unwrap_err();
        assert!(err.contains("available: amd64, arm64"), "{err}");
    }

    #[test]
    fn test_arch_triples_are_elf() {
        assert!(Arch::X86_64.triple().ends_with("linux-gnu"));
        assert!(Arch::Arm64.triple().ends_with("linux-gnu"));
        assert_eq!(Arch::Arm64.compiler_flags(), &["-ffixed-x18"]);
    }

    #[test]
    fn test_target_os_parsing() {
        assert_eq!("darwin".parse::<TargetOs>().unwrap(), TargetOs::Darwin);
        assert_eq!(TargetOs::Linux.to_string(), "linux");
        assert!("windows".parse::<TargetOs>().is_err());
    }
}
