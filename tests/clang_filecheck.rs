//! FileCheck-style tests for C fixtures translated with the installed clang
//!
//! Each fixture under `tests/fixtures` carries its own RUN line and CHECK, DECL and
//! ERROR directives. A fixture is skipped when clang, the target headers or the
//! requested extension are not available on the host.

use simdport::core::compiler::{CompileJob, NativeCompiler, Pass};
use simdport::core::{Arch, ClangCompiler};
use simdport::filecheck::TestRunner;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Whether clang can compile `unit` for `arch` with `flags`.
fn clang_supports(arch: Arch, flags: &[&str], unit: &str) -> bool {
    let cc = ClangCompiler::new("clang");
    if cc.version().is_err() {
        return false;
    }
    let job = CompileJob {
        pass: Pass::Stub,
        arch,
        unit: unit.to_string(),
        flags: flags.iter().map(|f| f.to_string()).collect(),
        include_dirs: Vec::new(),
        timeout: Duration::from_secs(30),
    };
    cc.compile(&job).is_ok()
}

/// Run a fixture through FileCheck validation
fn run_filecheck_test(name: &str) {
    let path = fixture(name);
    let contents = fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));

    let compiler = ClangCompiler::new("clang");
    let runner = TestRunner::new(&compiler, false);
    runner
        .run_test(&path, &contents)
        .unwrap_or_else(|e| panic!("Test {} failed: {}", name, e));
}

const AVX2_SAMPLE: &str = "#include <immintrin.h>\n__m256 f(__m256 a) { return _mm256_add_ps(a, a); }\n";
const NEON_SAMPLE: &str = "#include <arm_neon.h>\nfloat32x4_t f(float32x4_t a) { return vaddq_f32(a, a); }\n";
const SME_SAMPLE: &str = "#include <arm_sme.h>\nvoid f(void) __arm_streaming __arm_out(\"za\") { svzero_za(); }\n";

#[test]
fn test_amd64_add_const_filecheck() {
    if !clang_supports(Arch::X86_64, &["-mavx2"], AVX2_SAMPLE) {
        println!("Skipping amd64 fixture - clang cannot target x86_64 with AVX2");
        return;
    }
    let _ = env_logger::builder().is_test(true).try_init();
    run_filecheck_test("amd64_add_const.c");
}

#[test]
fn test_amd64_scalars_filecheck() {
    if !clang_supports(Arch::X86_64, &[], "int f(int a) { return a; }\n") {
        println!("Skipping amd64 fixture - clang cannot target x86_64");
        return;
    }
    run_filecheck_test("amd64_scalars.c");
}

#[test]
fn test_amd64_unresolved_parameter_filecheck() {
    if !clang_supports(Arch::X86_64, &["-mavx2"], AVX2_SAMPLE) {
        println!("Skipping amd64 fixture - clang cannot target x86_64 with AVX2");
        return;
    }
    run_filecheck_test("amd64_unresolved.c");
}

#[test]
fn test_arm64_neon_tuple_filecheck() {
    if !clang_supports(Arch::Arm64, &[], NEON_SAMPLE) {
        println!("Skipping arm64 fixture - clang cannot target aarch64 with NEON headers");
        return;
    }
    run_filecheck_test("arm64_neon_tuple.c");
}

#[test]
fn test_arm64_sme_mopa_filecheck() {
    if !clang_supports(Arch::Arm64, &["-march=armv9-a+sme"], SME_SAMPLE) {
        println!("Skipping SME fixture - clang lacks SME support for aarch64");
        return;
    }
    run_filecheck_test("arm64_sme_mopa.c");
}

#[test]
fn test_fixtures_parse() {
    for entry in fs::read_dir(fixture("")).expect("fixture directory") {
        let path = entry.expect("fixture entry").path();
        if path.extension().and_then(|e| e.to_str()) != Some("c") {
            continue;
        }
        let contents = fs::read_to_string(&path).expect("fixture readable");
        let spec = simdport::filecheck::TestSpec::parse(&contents)
            .unwrap_or_else(|e| panic!("{}: {}", path.display(), e));
        assert!(!spec.check_directives.is_empty(), "{}", path.display());
        for run in &spec.run_directives {
            run.config()
                .unwrap_or_else(|e| panic!("{}: {}", path.display(), e));
        }
    }
}
