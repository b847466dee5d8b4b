// This module drives a source unit through the whole pipeline. Declarations are scanned
// and resolved against the catalog; a function that does not resolve fails alone. The
// resolved signatures go through the dual-phase driver together, and an error there
// (a stub mismatch or a failed compile) fails every function of the unit. A stub
// mismatch also halts the architecture target, so later units are not attempted.
//
// Per-function work runs on rayon workers in two rounds. The first round places the
// signature and scans the constant references of each body. The usage index over all of
// those references is built serially, since constant extents and sharing depend on
// every function of the object. The second round extracts constants, instruments
// streaming bodies, lays out the image and renders the TEXT fragment. Results are folded
// into the session serially and rendered sorted by name, so the output does not depend
// on scheduling.

//! Per-unit translation pipeline.

use crate::config::TranslatorConfig;
use crate::core::abi::{assigner_for, compute_placement, AbiPlacement};
use crate::core::arch::Arch;
use crate::core::c_decl::scan_declarations;
use crate::core::compiler::NativeCompiler;
use crate::core::constant_pool::{self, RawRef, UsageIndex};
use crate::core::driver::DualPhaseDriver;
use crate::core::emitter::{
    glue_for, render_assembly, render_declarations, render_function, EmittedFunction,
    FunctionUnit, GlueWriter, GoFrame, UnitHeader,
};
use crate::core::error::{FunctionFailure, TranslateError, TranslateResult};
use crate::core::object_file::{ObjectFunction, ObjectModel};
use crate::core::session::TranslationSession;
use crate::core::signature::{resolve, FunctionSignature};
use crate::arm64::streaming;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Everything produced for one source unit.
#[derive(Debug)]
pub struct UnitReport {
    pub source: PathBuf,
    /// Emitted functions, sorted by name.
    pub emitted: Vec<EmittedFunction>,
    /// Failed functions, sorted by location.
    pub failures: Vec<FunctionFailure>,
    /// Whether a failure in this unit stops the architecture target.
    pub halted: bool,
    /// Error that kept the unit from being translated at all, such as an unreadable file.
    pub unit_error: Option<TranslateError>,
    pub assembly: String,
    pub declarations: String,
}

impl UnitReport {
    fn unreadable(source: &Path, error: TranslateError) -> Self {
        Self {
            source: source.to_path_buf(),
            emitted: Vec::new(),
            failures: Vec::new(),
            halted: false,
            unit_error: Some(error),
            assembly: String::new(),
            declarations: String::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failures.is_empty() && self.unit_error.is_none()
    }
}

/// Translates source units for one architecture target.
pub struct Translator<'a> {
    compiler: &'a dyn NativeCompiler,
    config: &'a TranslatorConfig,
    glue: Box<dyn GlueWriter>,
    compiler_version: OnceLock<String>,
}

/// A function that made it through the first round.
struct Scanned<'s> {
    sig: &'s FunctionSignature,
    placement: AbiPlacement,
    function: ObjectFunction,
    refs: Vec<RawRef>,
}

/// Copy of a unit-wide error for one of the functions it fails.
fn replicate(error: &TranslateError) -> TranslateError {
    match error {
        TranslateError::StubMismatch { function, detail } => TranslateError::StubMismatch {
            function: function.clone(),
            detail: detail.clone(),
        },
        TranslateError::CompilerInvocationFailed { pass, reason } => {
            TranslateError::CompilerInvocationFailed {
                pass: pass.clone(),
                reason: reason.clone(),
            }
        }
        other => TranslateError::CompilerInvocationFailed {
            pass: "real".to_string(),
            reason: other.to_string(),
        },
    }
}

fn failure(sig: &FunctionSignature, error: TranslateError) -> FunctionFailure {
    FunctionFailure {
        function: sig.name.clone(),
        location: sig.location.clone(),
        error,
    }
}

impl<'a> Translator<'a> {
    pub fn new(compiler: &'a dyn NativeCompiler, config: &'a TranslatorConfig) -> Self {
        Self {
            compiler,
            config,
            glue: glue_for(config.arch),
            compiler_version: OnceLock::new(),
        }
    }

    pub fn arch(&self) -> Arch {
        self.config.arch
    }

    fn header(&self, source: &Path) -> UnitHeader {
        let version = self.compiler_version.get_or_init(|| match self.compiler.version() {
            Ok(version) => version,
            Err(err) => {
                log::warn!("cannot query compiler version: {err}");
                self.config.compiler.clone()
            }
        });
        UnitHeader {
            arch: self.config.arch,
            target_os: self.config.target_os,
            compiler_version: version.clone(),
            flags: self.config.compile_flags(),
            source: source.display().to_string(),
        }
    }

    /// Read and translate the file at `path`.
    pub fn translate_file(&self, session: &TranslationSession, path: &Path) -> TranslateResult<UnitReport> {
        let text = fs::read_to_string(path)?;
        Ok(self.translate_source(session, path, &text))
    }

    /// Translate `text`, the contents of the source file at `path`.
    pub fn translate_source(&self, session: &TranslationSession, path: &Path, text: &str) -> UnitReport {
        session.begin_unit(&path.display().to_string());
        let mut failures = Vec::new();
        let mut signatures = Vec::new();
        for decl in scan_declarations(path, text) {
            match resolve(self.config.arch, &decl) {
                Ok(sig) => signatures.push(sig),
                Err(error) => {
                    log::debug!("{}: skipping `{}`: {error}", decl.location, decl.name);
                    failures.push(FunctionFailure {
                        function: decl.name.clone(),
                        location: decl.location.clone(),
                        error,
                    });
                }
            }
        }

        let mut emitted = Vec::new();
        let mut halted = false;
        if !signatures.is_empty() {
            let driver = DualPhaseDriver::new(self.compiler, self.config);
            match driver.run(path, text, &signatures) {
                Ok(object) => {
                    for result in self.translate_functions(&object, &signatures) {
                        match result {
                            Ok(function) => emitted.push(function),
                            Err(f) => failures.push(f),
                        }
                    }
                }
                Err(error) => {
                    halted = error.halts_target();
                    log::warn!("{}: unit failed: {error}", path.display());
                    failures.extend(signatures.iter().map(|sig| failure(sig, replicate(&error))));
                }
            }
        }

        emitted.sort_by(|a, b| a.name.cmp(&b.name));
        failures.sort_by(|a, b| {
            a.location
                .cmp(&b.location)
                .then_with(|| a.function.cmp(&b.function))
        });
        for function in &emitted {
            session.record_function_emitted(
                &function.name,
                function.body_size,
                function.constant_entries,
                function.constant_bytes,
            );
            if function.streaming {
                session.record_streaming_region();
            }
        }
        for f in &failures {
            session.record_failure(f.kind());
        }
        log::info!(
            "{}: {} functions emitted, {} failed",
            path.display(),
            emitted.len(),
            failures.len()
        );

        let header = self.header(path);
        UnitReport {
            source: path.to_path_buf(),
            assembly: render_assembly(&header, &emitted),
            declarations: render_declarations(&header, &self.config.package, &emitted),
            emitted,
            failures,
            halted,
            unit_error: None,
        }
    }

    fn translate_functions(
        &self,
        object: &ObjectModel,
        signatures: &[FunctionSignature],
    ) -> Vec<Result<EmittedFunction, FunctionFailure>> {
        let scanned: Vec<Result<Scanned, FunctionFailure>> = signatures
            .par_iter()
            .map(|sig| self.scan(object, sig).map_err(|e| failure(sig, e)))
            .collect();

        let index = UsageIndex::build(
            object,
            scanned
                .iter()
                .flatten()
                .map(|s| (s.sig.name.as_str(), s.refs.as_slice())),
        );
        let streaming_functions: BTreeSet<String> = signatures
            .iter()
            .filter(|s| s.streaming)
            .map(|s| s.name.clone())
            .collect();

        scanned
            .into_par_iter()
            .map(|scanned| {
                let scanned = scanned?;
                self.emit(object, &scanned, &index, &streaming_functions)
                    .map_err(|e| failure(scanned.sig, e))
            })
            .collect()
    }

    fn scan<'s>(&self, object: &ObjectModel, sig: &'s FunctionSignature) -> TranslateResult<Scanned<'s>> {
        let mut assigner = assigner_for(self.config);
        let placement = compute_placement(sig, assigner.as_mut())?;
        let function = object
            .function(&sig.name)
            .ok_or_else(|| TranslateError::CompilerInvocationFailed {
                pass: "real".to_string(),
                reason: format!("no code for `{}` in the compiled object", sig.name),
            })?;
        let refs = constant_pool::scan_function(object, &function)?;
        Ok(Scanned {
            sig,
            placement,
            function,
            refs,
        })
    }

    fn emit(
        &self,
        object: &ObjectModel,
        scanned: &Scanned,
        index: &UsageIndex,
        streaming_functions: &BTreeSet<String>,
    ) -> TranslateResult<EmittedFunction> {
        let sig = scanned.sig;
        streaming::check_nested_calls(sig, &scanned.refs, streaming_functions)?;
        let mut body = constant_pool::extract(
            &scanned.function,
            object,
            &scanned.refs,
            index,
            self.config.sharing_policy,
        )?;
        let region = match self.config.arch {
            Arch::Arm64 => streaming::instrument(sig, &mut body)?,
            Arch::X86_64 => None,
        };
        let image = body.resolve(&sig.name)?;
        let frame = GoFrame::layout(sig);
        let unit = FunctionUnit {
            sig,
            placement: &scanned.placement,
            frame: &frame,
            image: &image,
            region: region.as_ref(),
            stack_depth: self.glue.body_stack_depth(&image.bytes[..image.body_len]),
        };
        render_function(self.glue.as_ref(), &unit)
    }

    /// Write the files of `report` into the output directory.
    pub fn write_outputs(&self, report: &UnitReport) -> TranslateResult<(PathBuf, PathBuf)> {
        fs::create_dir_all(&self.config.output_dir)?;
        let assembly_path = self.config.assembly_path(&report.source);
        let declarations_path = self.config.declarations_path(&report.source);
        fs::write(&assembly_path, &report.assembly)?;
        fs::write(&declarations_path, &report.declarations)?;
        log::debug!(
            "wrote {} and {}",
            assembly_path.display(),
            declarations_path.display()
        );
        Ok((assembly_path, declarations_path))
    }

    /// Translate and write every file of `paths`, stopping early if the target halts.
    ///
    /// A file that cannot be read gets a report carrying the error and no outputs.
    pub fn translate_files(
        &self,
        session: &TranslationSession,
        paths: &[PathBuf],
    ) -> TranslateResult<Vec<UnitReport>> {
        let mut reports = Vec::with_capacity(paths.len());
        for path in paths {
            let report = match self.translate_file(session, path) {
                Ok(report) => report,
                Err(error) => {
                    log::warn!("{}: cannot translate: {error}", path.display());
                    session.record_failure(error.kind());
                    reports.push(UnitReport::unreadable(path, error));
                    continue;
                }
            };
            self.write_outputs(&report)?;
            let halted = report.halted;
            reports.push(report);
            if halted {
                log::warn!("{}: stub mismatch, stopping {}", path.display(), self.config.arch);
                break;
            }
        }
        Ok(reports)
    }
}
