// This module reads the ELF object produced by the real compiler pass into an owned,
// thread-shareable model built with the object crate. Only the facts later stages need
// are kept: sections with their class, alignment and bytes; symbols with binding and
// placement; and per-section relocations whose targets are normalized to
// (section, offset) pairs, external names or absolute values. Exported function bodies
// are sliced out of their text sections so the relocator, instrumenter and emitter can
// work on plain byte vectors.

//! Owned model of a compiled ELF object.

use crate::core::arch::Arch;
use crate::core::error::{TranslateError, TranslateResult};
use object::{
    Architecture, Object, ObjectSection as _, ObjectSymbol as _, RelocationFlags,
    RelocationTarget, SectionKind, SymbolKind,
};
use std::collections::BTreeMap;

/// Coarse classification of a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionClass {
    Text,
    ReadOnly,
    Writable,
    Other,
}

#[derive(Debug, Clone)]
pub struct ObjectSection {
    pub index: usize,
    pub name: String,
    pub class: SectionClass,
    pub align: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ObjectSymbol {
    pub name: String,
    pub section: Option<usize>,
    pub address: u64,
    pub size: u64,
    pub global: bool,
    pub is_text: bool,
    /// Section or file symbol rather than a named entity.
    pub is_meta: bool,
}

/// Where a relocation points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelocTarget {
    /// A location inside a section of this object.
    Section {
        section: usize,
        /// Offset of the referenced symbol within the section.
        offset: u64,
        /// Referenced symbol, if it is not the section symbol itself.
        symbol: Option<usize>,
    },
    /// An undefined symbol resolved at link time.
    External(String),
    Absolute,
}

#[derive(Debug, Clone)]
pub struct ObjectReloc {
    /// Offset within the relocated section.
    pub offset: u64,
    pub r_type: u32,
    pub target: RelocTarget,
    pub addend: i64,
}

/// An exported function with its machine code.
#[derive(Debug, Clone)]
pub struct ObjectFunction {
    pub name: String,
    pub section: usize,
    /// Offset of the function within its section.
    pub address: u64,
    pub code: Vec<u8>,
}

/// Owned view of one ELF object.
#[derive(Debug, Clone)]
pub struct ObjectModel {
    pub arch: Arch,
    pub sections: BTreeMap<usize, ObjectSection>,
    pub symbols: Vec<ObjectSymbol>,
    /// Relocations keyed by the section they apply to, sorted by offset.
    pub relocations: BTreeMap<usize, Vec<ObjectReloc>>,
}

fn classify(kind: SectionKind) -> SectionClass {
    match kind {
        SectionKind::Text => SectionClass::Text,
        SectionKind::ReadOnlyData | SectionKind::ReadOnlyString | SectionKind::ReadOnlyDataWithRel => {
            SectionClass::ReadOnly
        }
        SectionKind::Data
        | SectionKind::UninitializedData
        | SectionKind::Tls
        | SectionKind::UninitializedTls
        | SectionKind::Common => SectionClass::Writable,
        _ => SectionClass::Other,
    }
}

impl ObjectModel {
    /// Parse an ELF object compiled for `arch`.
    pub fn parse(arch: Arch, bytes: &[u8]) -> TranslateResult<Self> {
        let file = object::File::parse(bytes)?;
        let expected = match arch {
            Arch::X86_64 => Architecture::X86_64,
            Arch::Arm64 => Architecture::Aarch64,
        };
        if file.architecture() != expected {
            return Err(TranslateError::CompilerInvocationFailed {
                pass: "real".to_string(),
                reason: format!(
                    "object architecture {:?} does not match {arch}",
                    file.architecture()
                ),
            });
        }

        let mut sections = BTreeMap::new();
        for section in file.sections() {
            let index = section.index().0;
            let class = classify(section.kind());
            let data = match section.kind() {
                SectionKind::UninitializedData | SectionKind::UninitializedTls => Vec::new(),
                _ => section.data()?.to_vec(),
            };
            sections.insert(
                index,
                ObjectSection {
                    index,
                    name: section.name().unwrap_or_default().to_string(),
                    class,
                    align: section.align().max(1),
                    data,
                },
            );
        }

        // Symbol table indices are preserved so relocations can refer to them.
        let mut symbols = Vec::new();
        let mut by_index = BTreeMap::new();
        for symbol in file.symbols() {
            by_index.insert(symbol.index().0, symbols.len());
            symbols.push(ObjectSymbol {
                name: symbol.name().unwrap_or_default().to_string(),
                section: symbol.section_index().map(|i| i.0),
                address: symbol.address(),
                size: symbol.size(),
                global: symbol.is_global() && !symbol.is_undefined(),
                is_text: symbol.kind() == SymbolKind::Text,
                is_meta: matches!(symbol.kind(), SymbolKind::Section | SymbolKind::File),
            });
        }

        let mut relocations: BTreeMap<usize, Vec<ObjectReloc>> = BTreeMap::new();
        for section in file.sections() {
            let mut relocs = Vec::new();
            for (offset, reloc) in section.relocations() {
                let r_type = match reloc.flags() {
                    RelocationFlags::Elf { r_type } => r_type,
                    _ => 0,
                };
                let target = match reloc.target() {
                    RelocationTarget::Symbol(idx) => {
                        let symbol = file.symbol_by_index(idx)?;
                        match symbol.section_index() {
                            Some(sec) if symbol.kind() == SymbolKind::Section => RelocTarget::Section {
                                section: sec.0,
                                offset: 0,
                                symbol: None,
                            },
                            Some(sec) => RelocTarget::Section {
                                section: sec.0,
                                offset: symbol.address(),
                                symbol: by_index.get(&idx.0).copied(),
                            },
                            None => RelocTarget::External(symbol.name().unwrap_or_default().to_string()),
                        }
                    }
                    RelocationTarget::Section(sec) => RelocTarget::Section {
                        section: sec.0,
                        offset: 0,
                        symbol: None,
                    },
                    _ => RelocTarget::Absolute,
                };
                relocs.push(ObjectReloc {
                    offset,
                    r_type,
                    target,
                    addend: reloc.addend(),
                });
            }
            if !relocs.is_empty() {
                relocs.sort_by_key(|r| r.offset);
                relocations.insert(section.index().0, relocs);
            }
        }

        Ok(Self {
            arch,
            sections,
            symbols,
            relocations,
        })
    }

    pub fn section(&self, index: usize) -> Option<&ObjectSection> {
        self.sections.get(&index)
    }

    pub fn symbol(&self, name: &str) -> Option<&ObjectSymbol> {
        self.symbols.iter().find(|s| s.name == name && s.section.is_some())
    }

    /// Bytes covered by a defined symbol.
    pub fn symbol_data(&self, name: &str) -> Option<&[u8]> {
        let symbol = self.symbol(name)?;
        let section = self.section(symbol.section?)?;
        let start = symbol.address as usize;
        section.data.get(start..start + symbol.size as usize)
    }

    /// Relocations applying to `section` within `[start, end)`.
    pub fn relocations_in(&self, section: usize, start: u64, end: u64) -> &[ObjectReloc] {
        let Some(relocs) = self.relocations.get(&section) else {
            return &[];
        };
        let lo = relocs.partition_point(|r| r.offset < start);
        let hi = relocs.partition_point(|r| r.offset < end);
        &relocs[lo..hi]
    }

    /// Whether any relocation applies to `section`.
    pub fn section_has_relocations(&self, section: usize) -> bool {
        self.relocations.contains_key(&section)
    }

    /// The exported function named `name`.
    pub fn function(&self, name: &str) -> Option<ObjectFunction> {
        let symbol = self
            .symbols
            .iter()
            .find(|s| s.name == name && s.is_text && s.global && s.size > 0)?;
        let section_index = symbol.section?;
        let section = self.section(section_index)?;
        let start = symbol.address as usize;
        let code = section.data.get(start..start + symbol.size as usize)?.to_vec();
        Some(ObjectFunction {
            name: name.to_string(),
            section: section_index,
            address: symbol.address,
            code,
        })
    }

    /// Local, named symbols defined in `section`, sorted by address.
    pub fn local_symbols_in(&self, section: usize) -> Vec<(usize, &ObjectSymbol)> {
        let mut out: Vec<_> = self
            .symbols
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                s.section == Some(section) && !s.global && !s.is_meta && !s.name.is_empty()
            })
            .collect();
        out.sort_by_key(|(_, s)| s.address);
        out
    }
}
