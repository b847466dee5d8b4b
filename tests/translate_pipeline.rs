//! End-to-end pipeline tests over synthetic compiler output.
//!
//! Each test builds the objects the stub and real passes would produce, runs the
//! translator and checks the rendered assembly and declarations.

mod common;

use bumpalo::Bump;
use common::{init_logging, signatures, words, ElfBuilder, FakeCompiler};
use object::elf;
use simdport::config::{SharingPolicy, TranslatorConfig};
use simdport::core::{Arch, ErrorKind, TargetOs, TranslationSession, Translator, UnitReport};
use std::fs;
use std::path::Path;

fn translate(compiler: &FakeCompiler, config: &TranslatorConfig, source: &str) -> UnitReport {
    let arena = Bump::new();
    let session = TranslationSession::new(&arena);
    Translator::new(compiler, config).translate_source(&session, Path::new("kernels.c"), source)
}

fn amd64() -> TranslatorConfig {
    TranslatorConfig::new(Arch::X86_64)
        .with_target_os(TargetOs::Linux)
        .with_machine_option("avx2")
        .with_package("kernels")
}

fn arm64() -> TranslatorConfig {
    TranslatorConfig::new(Arch::Arm64)
        .with_target_os(TargetOs::Linux)
        .with_package("kernels")
}

fn floats(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

const ADD_CONST: &str = "\
#include <immintrin.h>

__m256 add_const_ps256(__m256 a) {
    return _mm256_add_ps(a, _mm256_setr_ps(10, 20, 30, 40, 50, 60, 70, 80));
}
";

fn add_const_compiler(padding: usize) -> FakeCompiler {
    let sigs = signatures(Arch::X86_64, ADD_CONST);
    let mut stub = ElfBuilder::new(Arch::X86_64);
    stub.probes_for(&sigs);
    let mut real = ElfBuilder::new(Arch::X86_64);
    real.probes_for(&sigs);
    // vaddps ymm0, ymm0, [rip+0]; ret
    let (text, _) = real.function("add_const_ps256", &[0xc5, 0xfc, 0x58, 0x05, 0, 0, 0, 0, 0xc3]);
    let mut data = vec![0u8; padding];
    data.extend(floats(&[10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0]));
    let rodata = real.rodata(".rodata.cst32", &data, 32);
    real.reloc_to_section(text, 4, rodata, padding as i64 - 4, elf::R_X86_64_PC32);
    FakeCompiler::new(stub.build(), real.build())
}

#[test]
fn test_add_const_ps256_layout() {
    init_logging();
    let report = translate(&add_const_compiler(0), &amd64(), ADD_CONST);
    assert!(report.succeeded(), "{:?}", report.failures);
    let text = &report.assembly;

    assert!(text.contains("TEXT \u{b7}add_const_ps256(SB), NOSPLIT, $40-64\n"), "{text}");
    assert!(text.contains("\tVMOVDQU a+0(FP), Y0\n"));
    // The constant lands at +32 from the body start, 24 bytes past the end of vaddps.
    assert!(text.contains("\tQUAD $0x000000180558fcc5 // vaddps"));
    assert!(text.contains("\tBYTE $0xe9; LONG $86 // jmp past constants\n"));
    assert!(text.contains(
        "\tQUAD $0x41a0000041200000 // add_const_ps256_const0\n\
         \tQUAD $0x4220000041f00000\n\
         \tQUAD $0x4270000042480000\n\
         \tQUAD $0x42a00000428c0000\n"
    ));
    assert!(text.contains("\tVMOVDQU Y0, result+32(FP)\n\tVZEROUPPER\n\tRET\n"));

    assert_eq!(report.emitted[0].constant_entries, 1);
    assert_eq!(report.emitted[0].constant_bytes, 32);
    assert!(report
        .declarations
        .contains("//go:noescape\nfunc add_const_ps256(a [32]byte) (result [32]byte)\n"));
}

#[test]
fn test_translation_is_idempotent() {
    let compiler = add_const_compiler(0);
    let config = amd64();
    let first = translate(&compiler, &config, ADD_CONST);
    let second = translate(&compiler, &config, ADD_CONST);
    assert_eq!(first.assembly, second.assembly);
    assert_eq!(first.declarations, second.declarations);
}

#[test]
fn test_output_independent_of_data_placement() {
    let config = amd64();
    let packed = translate(&add_const_compiler(0), &config, ADD_CONST);
    let shifted = translate(&add_const_compiler(64), &config, ADD_CONST);
    assert_eq!(packed.assembly, shifted.assembly);
}

const POLY: &str = "\
__m256 poly(__m256 x) {
    return x * c0 + c1 * x + c2 - c0;
}
";

#[test]
fn test_constant_pool_count() {
    let sigs = signatures(Arch::X86_64, POLY);
    let mut stub = ElfBuilder::new(Arch::X86_64);
    stub.probes_for(&sigs);
    let mut real = ElfBuilder::new(Arch::X86_64);
    real.probes_for(&sigs);
    let body = [
        0xc5, 0xfc, 0x10, 0x0d, 0, 0, 0, 0, // vmovups ymm1, [rip]
        0xc5, 0xfc, 0x59, 0xc1, // vmulps ymm0, ymm0, ymm1
        0xc5, 0xfc, 0x58, 0x05, 0, 0, 0, 0, // vaddps ymm0, ymm0, [rip]
        0xc5, 0xfc, 0x59, 0x05, 0, 0, 0, 0, // vmulps ymm0, ymm0, [rip]
        0xc5, 0xfc, 0x5c, 0x05, 0, 0, 0, 0, // vsubps ymm0, ymm0, [rip]
        0xc3,
    ];
    let (text, _) = real.function("poly", &body);
    let mut data = floats(&[1.0; 8]);
    data.extend(floats(&[2.0; 8]));
    data.extend(floats(&[3.0; 8]));
    let rodata = real.rodata(".rodata.cst32", &data, 32);
    for (at, target) in [(4, 0), (16, 32), (24, 64), (32, 0)] {
        real.reloc_to_section(text, at, rodata, target - 4, elf::R_X86_64_PC32);
    }
    let compiler = FakeCompiler::new(stub.build(), real.build());
    let report = translate(&compiler, &amd64(), POLY);
    assert!(report.succeeded(), "{:?}", report.failures);

    let poly = &report.emitted[0];
    assert_eq!(poly.constant_entries, 3);
    assert_eq!(poly.constant_bytes, 96);
    for label in ["poly_const0", "poly_const1", "poly_const2"] {
        assert_eq!(report.assembly.matches(label).count(), 1, "{label}");
    }
    assert!(!report.assembly.contains("poly_const3"));
}

const SHARED: &str = "\
__m256 first(__m256 x) { return x + k; }
__m256 second(__m256 x) { return x + k; }
";

fn shared_constant_compiler() -> FakeCompiler {
    let sigs = signatures(Arch::X86_64, SHARED);
    let mut stub = ElfBuilder::new(Arch::X86_64);
    stub.probes_for(&sigs);
    let mut real = ElfBuilder::new(Arch::X86_64);
    real.probes_for(&sigs);
    let rodata = real.rodata(".rodata.cst32", &floats(&[0.5; 8]), 32);
    for name in ["first", "second"] {
        let (text, _) = real.function(name, &[0xc5, 0xfc, 0x58, 0x05, 0, 0, 0, 0, 0xc3]);
        real.reloc_to_section(text, 4, rodata, -4, elf::R_X86_64_PC32);
    }
    FakeCompiler::new(stub.build(), real.build())
}

#[test]
fn test_shared_constant_policies() {
    let compiler = shared_constant_compiler();
    let report = translate(&compiler, &amd64(), SHARED);
    assert!(report.succeeded());
    assert!(report.assembly.contains("// first_const0\n"));
    assert!(report.assembly.contains("// second_const0\n"));

    let exclusive = amd64().with_sharing_policy(SharingPolicy::Exclusive);
    let report = translate(&compiler, &exclusive, SHARED);
    assert!(report.emitted.is_empty());
    assert_eq!(report.failures.len(), 2);
    assert!(report
        .failures
        .iter()
        .all(|f| f.kind() == ErrorKind::UnresolvedConstantRef));
}

const TUPLES: &str = "\
#include <arm_neon.h>

float32x4x2_t add_pairs(float32x4x2_t a, float32x4x2_t b) {
    float32x4x2_t r = { { vaddq_f32(a.val[0], b.val[0]), vaddq_f32(a.val[1], b.val[1]) } };
    return r;
}
";

#[test]
fn test_tuples_in_consecutive_registers() {
    let sigs = signatures(Arch::Arm64, TUPLES);
    let mut stub = ElfBuilder::new(Arch::Arm64);
    stub.probes_for(&sigs);
    let mut real = ElfBuilder::new(Arch::Arm64);
    real.probes_for(&sigs);
    // fadd v0.4s, v0.4s, v2.4s; fadd v1.4s, v1.4s, v3.4s; ret
    real.function("add_pairs", &words(&[0x4e22_d400, 0x4e23_d421, 0xd65f_03c0]));
    let compiler = FakeCompiler::new(stub.build(), real.build());
    let report = translate(&compiler, &arm64(), TUPLES);
    assert!(report.succeeded(), "{:?}", report.failures);

    let text = &report.assembly;
    assert!(text.contains("TEXT \u{b7}add_pairs(SB), NOSPLIT, $16-96\n"), "{text}");
    assert!(text.contains(
        "\tFMOVQ a+0(FP), F0\n\tFMOVQ a_16+16(FP), F1\n\tFMOVQ b+32(FP), F2\n\tFMOVQ b_16+48(FP), F3\n"
    ));
    assert!(text.contains("\tFMOVQ F0, result+64(FP)\n\tFMOVQ F1, result_16+80(FP)\n"));
    assert!(report
        .declarations
        .contains("func add_pairs(a [32]byte, b [32]byte) (result [32]byte)\n"));
}

const MOPA: &str = "\
#include <arm_sme.h>

void mopa_f32(const float *a, const float *b, float *c) __arm_streaming __arm_out(\"za\") {
    svbool_t pg = svptrue_b32();
    svmopa_za32_f32_m(0, pg, pg, svld1_f32(pg, a), svld1_f32(pg, b));
}
";

#[test]
fn test_sme_outer_product_instrumentation() {
    init_logging();
    let sigs = signatures(Arch::Arm64, MOPA);
    assert!(sigs[0].streaming && sigs[0].tile_output);
    let mut stub = ElfBuilder::new(Arch::Arm64);
    stub.probes_for(&sigs);
    let mut real = ElfBuilder::new(Arch::Arm64);
    real.probes_for(&sigs);
    real.function(
        "mopa_f32",
        &words(&[
            0x2598_e3e0, // ptrue p0.s
            0xa540_a000, // ld1w {z0.s}, p0/z, [x0]
            0xa540_a021, // ld1w {z1.s}, p0/z, [x1]
            0x8081_0000, // fmopa za0.s, p0/m, p0/m, z0.s, z1.s
            0xd65f_03c0, // ret
        ]),
    );
    let compiler = FakeCompiler::new(stub.build(), real.build());
    let arena = Bump::new();
    let session = TranslationSession::new(&arena);
    let config = arm64();
    let report = Translator::new(&compiler, &config).translate_source(&session, Path::new("kernels.c"), MOPA);
    assert!(report.succeeded(), "{:?}", report.failures);
    assert!(report.emitted[0].streaming);
    assert_eq!(session.stats().streaming_regions, 1);

    let text = &report.assembly;
    assert!(text.contains("TEXT \u{b7}mopa_f32(SB), $65568-24\n"), "{text}");
    let entry = text.find("WORD $0xd503477f // smstart (streaming entry)").unwrap();
    let ptrue = text.find("WORD $0x2598e3e0").unwrap();
    let exit = text.find("WORD $0xd503467f // smstop (streaming exit)").unwrap();
    let ret = text.find("WORD $0xd65f03c0 // ret").unwrap();
    assert!(entry < ptrue && ptrue < exit && exit < ret);
    assert_eq!(text.matches("// smstart (streaming entry)").count(), 1);
    assert_eq!(text.matches("(streaming exit)").count(), 1);
    assert!(text.contains("\tWORD $0xd53b4249 // mrs x9, svcr\n"));
    assert!(text.contains("za_restored:\n"));
}

const NESTED: &str = "\
#include <arm_sme.h>

void inner(float *p) __arm_streaming { }

void outer(float *p) __arm_streaming { inner(p); }
";

#[test]
fn test_nested_streaming_call_rejected() {
    let sigs = signatures(Arch::Arm64, NESTED);
    let mut stub = ElfBuilder::new(Arch::Arm64);
    stub.probes_for(&sigs);
    let mut real = ElfBuilder::new(Arch::Arm64);
    real.probes_for(&sigs);
    let (_, inner) = real.function("inner", &words(&[0xd65f_03c0]));
    let (outer, _) = real.function("outer", &words(&[0x9400_0000, 0xd65f_03c0]));
    real.reloc_to_symbol(outer, 0, inner, 0, elf::R_AARCH64_CALL26);
    let compiler = FakeCompiler::new(stub.build(), real.build());
    let report = translate(&compiler, &arm64(), NESTED);

    let names: Vec<_> = report.emitted.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["inner"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].function, "outer");
    assert_eq!(report.failures[0].kind(), ErrorKind::InconsistentAttributes);
}

const MIXED: &str = "\
#include <immintrin.h>

int sum(int a, int b) { return a + b; }

void scale(float *dst, __m128i_bad v) { }
";

#[test]
fn test_partial_failure_keeps_other_functions() {
    let sigs = signatures(Arch::X86_64, MIXED);
    assert_eq!(sigs.len(), 1);
    let mut stub = ElfBuilder::new(Arch::X86_64);
    stub.probes_for(&sigs);
    let mut real = ElfBuilder::new(Arch::X86_64);
    real.probes_for(&sigs);
    // lea eax, [rdi+rsi]; ret
    real.function("sum", &[0x8d, 0x04, 0x37, 0xc3]);
    let compiler = FakeCompiler::new(stub.build(), real.build());
    let report = translate(&compiler, &amd64(), MIXED);

    assert_eq!(report.emitted.len(), 1);
    assert!(report.assembly.contains("\tMOVLQSX a+0(FP), DI\n\tMOVLQSX b+4(FP), SI\n"));
    assert!(report.assembly.contains("\tMOVL AX, result+8(FP)\n"));
    let failure = report.failures[0].to_string();
    assert!(failure.starts_with("kernels.c:5:"), "{failure}");
    assert!(failure.contains(": error[UnresolvedParameter]: "));
}

#[test]
fn test_compile_failure_fails_whole_unit() {
    let compiler = FakeCompiler::failing_real(Arch::X86_64, ADD_CONST);
    let report = translate(&compiler, &amd64(), ADD_CONST);
    assert!(report.emitted.is_empty());
    assert_eq!(report.failures[0].kind(), ErrorKind::CompilerInvocationFailed);
    assert!(!report.halted);
}

#[test]
fn test_stub_mismatch_halts_target() {
    let dir = tempfile::tempdir().unwrap();
    let sigs = signatures(Arch::X86_64, ADD_CONST);
    let mut stub = ElfBuilder::new(Arch::X86_64);
    stub.probes_for(&sigs);
    let mut real = ElfBuilder::new(Arch::X86_64);
    // The real headers disagree on the size of __m256.
    real.probe("add_const_ps256", &[1, 1, 16, 16, 16, 16]);
    let compiler = FakeCompiler::new(stub.build(), real.build());

    let first = dir.path().join("first.c");
    let second = dir.path().join("second.c");
    fs::write(&first, ADD_CONST).unwrap();
    fs::write(&second, ADD_CONST).unwrap();
    let config = amd64().with_output_dir(dir.path());
    let arena = Bump::new();
    let session = TranslationSession::new(&arena);
    let reports = Translator::new(&compiler, &config)
        .translate_files(&session, &[first, second])
        .unwrap();

    assert_eq!(reports.len(), 1);
    assert!(reports[0].halted);
    assert_eq!(reports[0].failures[0].kind(), ErrorKind::StubMismatch);
    assert!(dir.path().join("first_linux_amd64.s").exists());
    assert!(!dir.path().join("second_linux_amd64.s").exists());
    assert_eq!(session.stats().failures, 1);
}
