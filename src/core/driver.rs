// This module implements the dual-phase driver. For one source unit and architecture it
// builds two translation units and compiles them concurrently with rayon::join:
//
// - The stub unit replaces every vendor header with the catalog's stub prologue and
//   declares each resolved function as a prototype. It never sees the function bodies.
// - The real unit is the source file itself, compiled against the real headers. It
//   produces the object code that is eventually emitted.
//
// Both units end with one probe table per function, an array of unsigned 64-bit words
// holding a compatibility bit, the parameter count, and the byte size and alignment of
// the return value and every parameter. In the real unit the compatibility bit is a
// __builtin_types_compatible_p check between the compiled function and the prototype
// rebuilt from the scanned declaration. Scalable types have no size, so their entries
// only prove the type name exists. The driver reads both tables back from the objects and
// compares them with each other and with the catalog. Any disagreement is a StubMismatch,
// which the caller treats as fatal for the whole architecture target.

//! Dual-phase (stub header / real header) compiler driver.

use crate::config::TranslatorConfig;
use crate::core::arch::Arch;
use crate::core::catalog::{self, VectorTypeSpec};
use crate::core::compiler::{CompileJob, NativeCompiler, Pass};
use crate::core::error::{TranslateError, TranslateResult};
use crate::core::object_file::ObjectModel;
use crate::core::signature::FunctionSignature;
use std::fmt::Write as _;
use std::path::Path;

/// Prefix of the probe table symbols.
pub const PROBE_PREFIX: &str = "__xlate_probe_";
const PROBE_SECTION: &str = ".rodata.xlate_probe";

/// Structural facts about one function, as recorded by a probe table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeFacts {
    pub compatible: bool,
    pub ret: (u64, u64),
    pub params: Vec<(u64, u64)>,
}

impl ProbeFacts {
    pub fn decode(words: &[u64]) -> Option<Self> {
        let (&compat, rest) = words.split_first()?;
        let (&count, rest) = rest.split_first()?;
        if rest.len() != 2 + 2 * count as usize {
            return None;
        }
        Some(Self {
            compatible: compat != 0,
            ret: (rest[0], rest[1]),
            params: rest[2..].chunks(2).map(|c| (c[0], c[1])).collect(),
        })
    }
}

fn layout_expr(c_type: &str, spec: &VectorTypeSpec) -> (String, String) {
    if spec.scalable {
        let probe = format!("(sizeof({c_type} *) & 0)");
        (probe.clone(), probe)
    } else {
        (format!("sizeof({c_type})"), format!("_Alignof({c_type})"))
    }
}

fn prototype(sig: &FunctionSignature, with_attributes: bool) -> String {
    let params = if sig.params.is_empty() {
        "void".to_string()
    } else {
        sig.params
            .iter()
            .map(|p| p.c_type.clone())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let mut proto = format!("{} (*)({params})", sig.ret_c_type);
    if with_attributes {
        for attr in &sig.type_attributes {
            proto.push(' ');
            proto.push_str(attr);
        }
    }
    proto
}

fn probe_table(out: &mut String, sig: &FunctionSignature, compat: &str) {
    let _ = write!(
        out,
        "__attribute__((used, section(\"{PROBE_SECTION}\"))) const unsigned long long {PROBE_PREFIX}{}[] = {{\n    {compat}, {}",
        sig.name,
        sig.params.len()
    );
    match sig.ret {
        Some(ret) => {
            let (size, align) = layout_expr(&sig.ret_c_type, ret);
            let _ = write!(out, ",\n    {size}, {align}");
        }
        None => out.push_str(",\n    0, 0"),
    }
    for param in &sig.params {
        let (size, align) = layout_expr(&param.c_type, param.ty);
        let _ = write!(out, ",\n    {size}, {align}");
    }
    out.push_str("\n};\n");
}

/// Translation unit for the metadata pass.
pub fn stub_unit(arch: Arch, signatures: &[FunctionSignature]) -> String {
    let mut out = catalog::stub_prologue(arch);
    out.push('\n');
    for sig in signatures {
        let params = if sig.params.is_empty() {
            "void".to_string()
        } else {
            sig.params
                .iter()
                .map(|p| format!("{} {}", p.c_type, p.name))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let _ = writeln!(out, "{} {}({params});", sig.ret_c_type, sig.name);
    }
    for sig in signatures {
        probe_table(&mut out, sig, "1");
    }
    out
}

/// Translation unit for the object-code pass.
pub fn real_unit(source_path: &Path, source_text: &str, signatures: &[FunctionSignature]) -> String {
    let mut out = String::with_capacity(source_text.len() + 256 * signatures.len());
    let _ = writeln!(out, "#line 1 \"{}\"", source_path.display());
    out.push_str(source_text);
    if !source_text.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("#line 1 \"<simdport-probes>\"\n");
    for sig in signatures {
        let compat = format!(
            "__builtin_types_compatible_p(__typeof__(&{}), {})",
            sig.name,
            prototype(sig, true)
        );
        probe_table(&mut out, sig, &compat);
    }
    out
}

fn read_probe(object: &ObjectModel, pass: Pass, function: &str) -> TranslateResult<ProbeFacts> {
    let name = format!("{PROBE_PREFIX}{function}");
    let data = object.symbol_data(&name).ok_or_else(|| TranslateError::StubMismatch {
        function: function.to_string(),
        detail: format!("probe table missing from the {pass} pass"),
    })?;
    let words: Vec<u64> = data
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect();
    ProbeFacts::decode(&words).ok_or_else(|| TranslateError::StubMismatch {
        function: function.to_string(),
        detail: format!("malformed probe table in the {pass} pass"),
    })
}

fn expected_layout(spec: &VectorTypeSpec) -> (u64, u64) {
    if spec.scalable {
        (0, 0)
    } else {
        (spec.size as u64, spec.align as u64)
    }
}

/// Compare stub facts, real facts and catalog layout for one function.
pub fn cross_validate(sig: &FunctionSignature, stub: &ProbeFacts, real: &ProbeFacts) -> TranslateResult<()> {
    let mismatch = |detail: String| TranslateError::StubMismatch {
        function: sig.name.clone(),
        detail,
    };
    if !real.compatible {
        return Err(mismatch(format!(
            "compiled type differs from the declared `{}`",
            prototype(sig, true)
        )));
    }
    if stub.params.len() != real.params.len() || real.params.len() != sig.params.len() {
        return Err(mismatch(format!(
            "parameter count {} (stub) vs {} (real)",
            stub.params.len(),
            real.params.len()
        )));
    }
    let expected_ret = sig.ret.map(expected_layout).unwrap_or((0, 0));
    if stub.ret != real.ret || real.ret != expected_ret {
        return Err(mismatch(format!(
            "return layout {:?} (stub) vs {:?} (real) vs {:?} (catalog)",
            stub.ret, real.ret, expected_ret
        )));
    }
    for (index, param) in sig.params.iter().enumerate() {
        let expected = expected_layout(param.ty);
        if stub.params[index] != real.params[index] || real.params[index] != expected {
            return Err(mismatch(format!(
                "parameter {index} (`{}`) layout {:?} (stub) vs {:?} (real) vs {:?} (catalog)",
                param.name, stub.params[index], real.params[index], expected
            )));
        }
    }
    Ok(())
}

/// Runs both compiler passes and validates their agreement.
pub struct DualPhaseDriver<'a> {
    compiler: &'a dyn NativeCompiler,
    config: &'a TranslatorConfig,
}

impl<'a> DualPhaseDriver<'a> {
    pub fn new(compiler: &'a dyn NativeCompiler, config: &'a TranslatorConfig) -> Self {
        Self { compiler, config }
    }

    fn job(&self, pass: Pass, unit: String, source_path: &Path) -> CompileJob {
        let mut include_dirs = Vec::new();
        if pass == Pass::Real {
            if let Some(dir) = source_path.parent().filter(|d| !d.as_os_str().is_empty()) {
                include_dirs.push(dir.to_path_buf());
            }
        }
        CompileJob {
            pass,
            arch: self.config.arch,
            unit,
            flags: self.config.compile_flags(),
            include_dirs,
            timeout: self.config.timeout,
        }
    }

    /// Compile `source_text` in both passes and return the validated real object.
    pub fn run(
        &self,
        source_path: &Path,
        source_text: &str,
        signatures: &[FunctionSignature],
    ) -> TranslateResult<ObjectModel> {
        let arch = self.config.arch;
        let stub_job = self.job(Pass::Stub, stub_unit(arch, signatures), source_path);
        let real_job = self.job(
            Pass::Real,
            real_unit(source_path, source_text, signatures),
            source_path,
        );

        log::debug!(
            "compiling {} for {arch} ({} functions)",
            source_path.display(),
            signatures.len()
        );
        let (stub, real) = rayon::join(
            || self.compiler.compile(&stub_job),
            || self.compiler.compile(&real_job),
        );
        let real = ObjectModel::parse(arch, &real?)?;
        let stub = ObjectModel::parse(arch, &stub?)?;

        for sig in signatures {
            let stub_facts = read_probe(&stub, Pass::Stub, &sig.name)?;
            let real_facts = read_probe(&real, Pass::Real, &sig.name)?;
            cross_validate(sig, &stub_facts, &real_facts)?;
        }
        Ok(real)
    }
}
