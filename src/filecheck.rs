//! FileCheck-style validation of translated C fixtures.
//!
//! A fixture is a C source file that carries its own test directives in line comments:
//!
//! ```text
//! // RUN: simdport -t amd64 -m avx2
//! // CHECK-LABEL: TEXT ·add_ps(SB)
//! // CHECK-NEXT: MOVQ SP, R12
//! // DECL: func add_ps(a [32]byte, b [32]byte) (result [32]byte)
//! // ERROR: error[UnresolvedParameter]
//! ```
//!
//! `CHECK` directives run against the generated assembly, `DECL` against the Go
//! declarations and `ERROR` against the reported failures, one per line. Matching
//! follows LLVM's FileCheck: plain substrings, scanned forward through the output.

use crate::config::{SharingPolicy, TranslatorConfig};
use crate::core::arch::{Arch, TargetOs};
use crate::core::compiler::NativeCompiler;
use crate::core::session::TranslationSession;
use crate::core::translator::Translator;
use bumpalo::Bump;
use std::path::Path;

/// Output a directive is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Assembly,
    Declarations,
    Errors,
}

/// A CHECK directive extracted from a fixture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckDirective {
    /// CHECK: pattern - Match pattern on a later line
    Check(Stream, String),
    /// CHECK-LABEL: pattern - Label for a section
    CheckLabel(Stream, String),
    /// CHECK-NEXT: pattern - Match on the next line
    CheckNext(Stream, String),
    /// CHECK-NOT: pattern - No match before the next positive match
    CheckNot(Stream, String),
    /// CHECK-EMPTY - Match empty line
    CheckEmpty(Stream),
    /// COM: comment - Comment, ignored
    Comment(String),
}

impl CheckDirective {
    fn stream(&self) -> Option<Stream> {
        match self {
            CheckDirective::Check(s, _)
            | CheckDirective::CheckLabel(s, _)
            | CheckDirective::CheckNext(s, _)
            | CheckDirective::CheckNot(s, _)
            | CheckDirective::CheckEmpty(s) => Some(*s),
            CheckDirective::Comment(_) => None,
        }
    }
}

/// A RUN directive specifying how to translate the fixture
#[derive(Debug, Clone)]
pub struct RunDirective {
    pub command: String,
    pub args: Vec<String>,
}

impl RunDirective {
    /// Translator configuration for the arguments of this directive.
    pub fn config(&self) -> Result<TranslatorConfig, String> {
        let mut args = self.args.iter();
        let mut arch = None;
        let mut options = Vec::new();
        while let Some(arg) = args.next() {
            let mut value = || {
                args.next()
                    .cloned()
                    .ok_or_else(|| format!("RUN: `{arg}` needs a value"))
            };
            match arg.as_str() {
                "-t" | "--target" => arch = Some(value()?.parse::<Arch>()?),
                "-m" | "-e" | "-O" | "--target-os" | "--package" | "--constant-policy" => {
                    options.push((arg.clone(), value()?));
                }
                "%s" => {}
                other => return Err(format!("RUN: unsupported argument `{other}`")),
            }
        }
        let arch = arch.ok_or("RUN: missing `-t <arch>`")?;
        let mut config = TranslatorConfig::new(arch).with_target_os(TargetOs::Linux);
        for (flag, value) in options {
            config = match flag.as_str() {
                "-m" => config.with_machine_option(value),
                "-e" => config.with_extra_option(value),
                "-O" => config.with_optimize(value),
                "--target-os" => config.with_target_os(value.parse::<TargetOs>()?),
                "--package" => config.with_package(value),
                _ => config.with_sharing_policy(value.parse::<SharingPolicy>()?),
            };
        }
        Ok(config)
    }
}

/// Test specification extracted from a fixture
#[derive(Debug)]
pub struct TestSpec {
    pub run_directives: Vec<RunDirective>,
    pub check_directives: Vec<CheckDirective>,
}

const STREAM_PREFIXES: &[(&str, Stream)] = &[
    ("CHECK", Stream::Assembly),
    ("DECL", Stream::Declarations),
    ("ERROR", Stream::Errors),
];

fn parse_directive(text: &str) -> Option<CheckDirective> {
    if let Some(comment) = text.strip_prefix("COM:") {
        return Some(CheckDirective::Comment(comment.trim().to_string()));
    }
    for &(prefix, stream) in STREAM_PREFIXES {
        let Some(rest) = text.strip_prefix(prefix) else {
            continue;
        };
        let pattern = |tail: &str| tail.trim().to_string();
        if let Some(p) = rest.strip_prefix("-LABEL:") {
            return Some(CheckDirective::CheckLabel(stream, pattern(p)));
        }
        if let Some(p) = rest.strip_prefix("-NEXT:") {
            return Some(CheckDirective::CheckNext(stream, pattern(p)));
        }
        if let Some(p) = rest.strip_prefix("-NOT:") {
            return Some(CheckDirective::CheckNot(stream, pattern(p)));
        }
        if rest.starts_with("-EMPTY") {
            return Some(CheckDirective::CheckEmpty(stream));
        }
        if let Some(p) = rest.strip_prefix(':') {
            return Some(CheckDirective::Check(stream, pattern(p)));
        }
    }
    None
}

impl TestSpec {
    /// Parse the directives of a fixture
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut run_directives = Vec::new();
        let mut check_directives = Vec::new();

        for line in content.lines() {
            let Some(text) = line.trim().strip_prefix("//") else {
                continue;
            };
            let text = text.trim_start();
            if let Some(run_cmd) = text.strip_prefix("RUN:") {
                let parts: Vec<&str> = run_cmd.split_whitespace().collect();
                if let Some((command, args)) = parts.split_first() {
                    run_directives.push(RunDirective {
                        command: command.to_string(),
                        args: args.iter().map(|s| s.to_string()).collect(),
                    });
                }
            } else if let Some(directive) = parse_directive(text) {
                check_directives.push(directive);
            }
        }

        if run_directives.is_empty() {
            return Err("no RUN directive".to_string());
        }
        Ok(TestSpec {
            run_directives,
            check_directives,
        })
    }
}

/// Translated output of one RUN directive.
#[derive(Debug, Default)]
pub struct RunOutput {
    pub assembly: String,
    pub declarations: String,
    pub errors: String,
}

impl RunOutput {
    fn stream(&self, stream: Stream) -> &str {
        match stream {
            Stream::Assembly => &self.assembly,
            Stream::Declarations => &self.declarations,
            Stream::Errors => &self.errors,
        }
    }
}

/// Test runner that translates fixtures and validates output
pub struct TestRunner<'a> {
    compiler: &'a dyn NativeCompiler,
    verbose: bool,
}

impl<'a> TestRunner<'a> {
    pub fn new(compiler: &'a dyn NativeCompiler, verbose: bool) -> Self {
        Self { compiler, verbose }
    }

    /// Translate the fixture at `path` for each RUN directive and validate output
    pub fn run_test(&self, path: &Path, content: &str) -> Result<(), String> {
        let spec = TestSpec::parse(content)?;
        for run_dir in &spec.run_directives {
            let output = self.execute(path, content, run_dir)?;
            validate_output(&output, &spec.check_directives, self.verbose)
                .map_err(|e| format!("{}: {e}", path.display()))?;
        }
        Ok(())
    }

    fn execute(&self, path: &Path, content: &str, run_dir: &RunDirective) -> Result<RunOutput, String> {
        if run_dir.command != "simdport" {
            return Err(format!("RUN: unknown command `{}`", run_dir.command));
        }
        let config = run_dir.config()?;
        let arena = Bump::new();
        let session = TranslationSession::new(&arena);
        let translator = Translator::new(self.compiler, &config);
        let report = translator.translate_source(&session, path, content);
        let errors: Vec<String> = report.failures.iter().map(|f| f.to_string()).collect();
        Ok(RunOutput {
            assembly: report.assembly,
            declarations: report.declarations,
            errors: errors.join("\n"),
        })
    }
}

/// Validate output against CHECK directives
pub fn validate_output(output: &RunOutput, directives: &[CheckDirective], verbose: bool) -> Result<(), String> {
    for stream in [Stream::Assembly, Stream::Declarations, Stream::Errors] {
        let mine: Vec<&CheckDirective> = directives
            .iter()
            .filter(|d| d.stream() == Some(stream))
            .collect();
        validate_stream(output.stream(stream), &mine, verbose)?;
    }
    Ok(())
}

/// Advance past the next line containing `pattern`, checking pending CHECK-NOTs on the way.
fn advance<'o>(
    lines: &[&'o str],
    pattern: &str,
    kind: &str,
    line_idx: &mut usize,
    pending_not: &mut Vec<&str>,
    verbose: bool,
) -> Result<(), String> {
    let Some(idx) = lines
        .iter()
        .skip(*line_idx)
        .position(|line| line.contains(pattern))
    else {
        return Err(format!("{kind}: pattern '{pattern}' not found in output"));
    };
    let end = *line_idx + idx;
    for not in pending_not.drain(..) {
        if let Some(hit) = lines[*line_idx..end].iter().find(|l| l.contains(not)) {
            return Err(format!("CHECK-NOT: '{not}' found in '{hit}'"));
        }
    }
    *line_idx = end + 1;
    if verbose {
        println!("{kind}: '{pattern}' found at line {end}");
    }
    Ok(())
}

fn validate_stream(output: &str, directives: &[&CheckDirective], verbose: bool) -> Result<(), String> {
    let output_lines: Vec<&str> = output.lines().collect();
    let mut line_idx = 0;
    let mut pending_not: Vec<&str> = Vec::new();

    for directive in directives {
        match directive {
            CheckDirective::Comment(_) => continue,

            CheckDirective::Check(_, pattern) => {
                advance(&output_lines, pattern, "CHECK", &mut line_idx, &mut pending_not, verbose)?;
            }

            CheckDirective::CheckLabel(_, pattern) => {
                advance(&output_lines, pattern, "CHECK-LABEL", &mut line_idx, &mut pending_not, verbose)?;
            }

            CheckDirective::CheckNot(_, pattern) => pending_not.push(pattern.as_str()),

            CheckDirective::CheckNext(_, pattern) => {
                let Some(line) = output_lines.get(line_idx) else {
                    return Err(format!("CHECK-NEXT: no more lines, expected '{pattern}'"));
                };
                if !line.contains(pattern.as_str()) {
                    return Err(format!("CHECK-NEXT: expected '{pattern}' but got '{line}'"));
                }
                if verbose {
                    println!("CHECK-NEXT: '{pattern}' matches at line {line_idx}");
                }
                line_idx += 1;
            }

            CheckDirective::CheckEmpty(_) => {
                let Some(line) = output_lines.get(line_idx) else {
                    continue; // End of output counts as empty
                };
                if !line.trim().is_empty() {
                    return Err(format!("CHECK-EMPTY: expected empty line but got '{line}'"));
                }
                line_idx += 1;
            }
        }
    }

    for not in pending_not {
        if let Some(hit) = output_lines[line_idx.min(output_lines.len())..]
            .iter()
            .find(|l| l.contains(not))
        {
            return Err(format!("CHECK-NOT: '{not}' found in '{hit}'"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(assembly: &str) -> RunOutput {
        RunOutput {
            assembly: assembly.to_string(),
            ..RunOutput::default()
        }
    }

    #[test]
    fn test_parse_directives() {
        let content = r#"// RUN: simdport -t arm64 -m sme %s
// CHECK-LABEL: TEXT ·mopa(SB)
// CHECK-NEXT: MOVD RSP, R19
// CHECK-NOT: VZEROUPPER
// DECL: func mopa(a unsafe.Pointer)
// COM: This is a comment
void mopa(const float *a) { }"#;

        let spec = TestSpec::parse(content).unwrap();
        assert_eq!(spec.run_directives.len(), 1);
        assert_eq!(spec.check_directives.len(), 5);
        assert_eq!(
            spec.check_directives[3],
            CheckDirective::Check(Stream::Declarations, "func mopa(a unsafe.Pointer)".to_string())
        );
        let config = spec.run_directives[0].config().unwrap();
        assert_eq!(config.arch, Arch::Arm64);
        assert_eq!(config.machine_options, vec!["sme".to_string()]);
    }

    #[test]
    fn test_missing_run_directive() {
        assert!(TestSpec::parse("// CHECK: x\nint f(void);").is_err());
        let run = RunDirective {
            command: "simdport".to_string(),
            args: vec!["-m".to_string(), "avx2".to_string()],
        };
        assert!(run.config().unwrap_err().contains("-t"));
    }

    #[test]
    fn test_check_matching() {
        let out = output("TEXT ·f(SB), NOSPLIT, $40-80\n\tMOVQ SP, R12\n\tRET\n");
        let directives = vec![
            CheckDirective::CheckLabel(Stream::Assembly, "TEXT ·f(SB)".to_string()),
            CheckDirective::CheckNext(Stream::Assembly, "MOVQ SP, R12".to_string()),
            CheckDirective::CheckNot(Stream::Assembly, "VZEROUPPER".to_string()),
            CheckDirective::Check(Stream::Assembly, "RET".to_string()),
        ];
        validate_output(&out, &directives, false).unwrap();
    }

    #[test]
    fn test_check_next_failure() {
        let out = output("Line 1\nLine 2\nLine 3\n");
        let directives = vec![
            CheckDirective::Check(Stream::Assembly, "Line 1".to_string()),
            CheckDirective::CheckNext(Stream::Assembly, "Line 3".to_string()),
        ];
        let result = validate_output(&out, &directives, false);
        assert!(result.unwrap_err().contains("CHECK-NEXT"));
    }

    #[test]
    fn test_check_not_failure() {
        let out = output("TEXT ·f(SB)\n\tVZEROUPPER\n\tRET\n");
        let directives = vec![
            CheckDirective::CheckNot(Stream::Assembly, "VZEROUPPER".to_string()),
            CheckDirective::Check(Stream::Assembly, "RET".to_string()),
        ];
        let result = validate_output(&out, &directives, false);
        assert!(result.unwrap_err().contains("CHECK-NOT"));
    }

    #[test]
    fn test_streams_are_independent() {
        let out = RunOutput {
            assembly: "TEXT ·f(SB)\n".to_string(),
            declarations: "func f()\n".to_string(),
            errors: "k.c:3:1: error[UnknownType]: unknown type `__m999` for amd64\n".to_string(),
        };
        let directives = vec![
            CheckDirective::Check(Stream::Errors, "error[UnknownType]".to_string()),
            CheckDirective::Check(Stream::Declarations, "func f()".to_string()),
            CheckDirective::Check(Stream::Assembly, "TEXT ·f(SB)".to_string()),
        ];
        validate_output(&out, &directives, false).unwrap();
    }
}
