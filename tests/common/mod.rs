//! Shared helpers for the integration tests: synthetic ELF objects and a fake compiler.

#![allow(dead_code)]

use object::write::{Object, Relocation, SectionId, Symbol, SymbolId, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, RelocationFlags, SectionKind, SymbolFlags, SymbolKind,
    SymbolScope,
};
use simdport::core::c_decl::scan_declarations;
use simdport::core::compiler::{CompileJob, NativeCompiler, Pass};
use simdport::core::signature::resolve;
use simdport::core::{Arch, FunctionSignature, TranslateError, TranslateResult, VectorTypeSpec};
use std::path::Path;
use std::sync::Mutex;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Builder for the relocatable ELF objects a compiler pass would return.
pub struct ElfBuilder {
    obj: Object<'static>,
    probes: Option<SectionId>,
}

impl ElfBuilder {
    pub fn new(arch: Arch) -> Self {
        let architecture = match arch {
            Arch::X86_64 => Architecture::X86_64,
            Arch::Arm64 => Architecture::Aarch64,
        };
        Self {
            obj: Object::new(BinaryFormat::Elf, architecture, Endianness::Little),
            probes: None,
        }
    }

    /// Add an exported function in its own `.text.<name>` section.
    pub fn function(&mut self, name: &str, code: &[u8]) -> (SectionId, SymbolId) {
        let section = self.obj.add_section(
            Vec::new(),
            format!(".text.{name}").into_bytes(),
            SectionKind::Text,
        );
        self.obj.append_section_data(section, code, 16);
        let symbol = self.obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value: 0,
            size: code.len() as u64,
            kind: SymbolKind::Text,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Section(section),
            flags: SymbolFlags::None,
        });
        (section, symbol)
    }

    pub fn rodata(&mut self, name: &str, data: &[u8], align: u64) -> SectionId {
        let section = self
            .obj
            .add_section(Vec::new(), name.as_bytes().to_vec(), SectionKind::ReadOnlyData);
        self.obj.append_section_data(section, data, align);
        section
    }

    pub fn reloc_to_section(&mut self, section: SectionId, offset: u64, target: SectionId, addend: i64, r_type: u32) {
        let symbol = self.obj.section_symbol(target);
        self.reloc_to_symbol(section, offset, symbol, addend, r_type);
    }

    pub fn reloc_to_symbol(&mut self, section: SectionId, offset: u64, symbol: SymbolId, addend: i64, r_type: u32) {
        self.obj
            .add_relocation(
                section,
                Relocation {
                    offset,
                    symbol,
                    addend,
                    flags: RelocationFlags::Elf { r_type },
                },
            )
            .expect("relocation accepted");
    }

    /// Add the `__xlate_probe_<function>` table the driver reads.
    pub fn probe(&mut self, function: &str, values: &[u64]) {
        let section = *self.probes.get_or_insert_with(|| {
            self.obj.add_section(
                Vec::new(),
                b".rodata.xlate_probe".to_vec(),
                SectionKind::ReadOnlyData,
            )
        });
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let offset = self.obj.append_section_data(section, &bytes, 8);
        self.obj.add_symbol(Symbol {
            name: format!("__xlate_probe_{function}").into_bytes(),
            value: offset,
            size: bytes.len() as u64,
            kind: SymbolKind::Data,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Section(section),
            flags: SymbolFlags::None,
        });
    }

    /// Add probe tables agreeing with the catalog for every signature.
    pub fn probes_for(&mut self, signatures: &[FunctionSignature]) {
        for sig in signatures {
            self.probe(&sig.name, &probe_words(sig));
        }
    }

    pub fn build(self) -> Vec<u8> {
        self.obj.write().expect("object written")
    }
}

fn layout(ty: &VectorTypeSpec) -> [u64; 2] {
    if ty.scalable {
        [0, 0]
    } else {
        [ty.size as u64, ty.align as u64]
    }
}

/// Probe table words matching the catalog layout of `sig`.
pub fn probe_words(sig: &FunctionSignature) -> Vec<u64> {
    let mut words = vec![1, sig.params.len() as u64];
    words.extend(sig.ret.map(layout).unwrap_or([0, 0]));
    for p in &sig.params {
        words.extend(layout(p.ty));
    }
    words
}

/// Resolved signatures of every definition in `source`.
pub fn signatures(arch: Arch, source: &str) -> Vec<FunctionSignature> {
    scan_declarations(Path::new("kernels.c"), source)
        .iter()
        .filter_map(|d| resolve(arch, d).ok())
        .collect()
}

/// Little-endian bytes of 32-bit instruction words.
pub fn words(insns: &[u32]) -> Vec<u8> {
    insns.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// A compiler returning canned objects for each pass.
pub struct FakeCompiler {
    stub: Vec<u8>,
    real: Option<Vec<u8>>,
    pub jobs: Mutex<Vec<CompileJob>>,
}

impl FakeCompiler {
    pub fn new(stub: Vec<u8>, real: Vec<u8>) -> Self {
        Self {
            stub,
            real: Some(real),
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// Stub pass succeeds with probes agreeing with the catalog, the real pass fails.
    pub fn failing_real(arch: Arch, source: &str) -> Self {
        let mut stub = ElfBuilder::new(arch);
        stub.probes_for(&signatures(arch, source));
        Self {
            stub: stub.build(),
            real: None,
            jobs: Mutex::new(Vec::new()),
        }
    }
}

impl NativeCompiler for FakeCompiler {
    fn version(&self) -> TranslateResult<String> {
        Ok("clang version 18.1.8 (fake)".to_string())
    }

    fn compile(&self, job: &CompileJob) -> TranslateResult<Vec<u8>> {
        self.jobs.lock().unwrap().push(job.clone());
        match (job.pass, &self.real) {
            (Pass::Stub, _) => Ok(self.stub.clone()),
            (Pass::Real, Some(real)) => Ok(real.clone()),
            (Pass::Real, None) => Err(TranslateError::CompilerInvocationFailed {
                pass: Pass::Real.to_string(),
                reason: "kernels.c:2:12: error: use of undeclared identifier".to_string(),
            }),
        }
    }
}
