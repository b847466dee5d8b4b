// This module implements the constant-pool relocator. Compiled bodies reach their
// constants (broadcast tables, shuffle masks, lane constants) through PC-relative
// relocations into read-only sections that do not exist once the body is emitted on its
// own. Relocation happens in three steps:
//
// 1. Scan. The architecture scanner decodes each relocated instruction into a RawRef:
//    which field to patch and which section offset the instruction addresses.
// 2. Extract. Every referenced location is mapped to a ConstantPoolEntry (its bytes,
//    alignment and referencing instructions), and each reference becomes a SymbolicRef
//    of the form "entry + delta". The UsageIndex built over all translated functions of
//    a unit supplies entry boundaries and enforces the sharing policy.
// 3. Resolve. After all other body edits (streaming instrumentation may move
//    instructions), entries are laid out after the body and every SymbolicRef is encoded
//    into a concrete displacement in one pass.
//
// Everything that cannot be disambiguated to a single private read-only constant is an
// UnresolvedConstantRef.

//! Constant-pool extraction and relocation.

use crate::config::SharingPolicy;
use crate::core::abi::align_up;
use crate::core::arch::Arch;
use crate::core::error::{TranslateError, TranslateResult};
use crate::core::object_file::{ObjectFunction, ObjectModel, SectionClass};
use std::collections::{BTreeMap, BTreeSet};

/// The instruction field a reference is encoded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchField {
    /// x86-64 RIP-relative disp32, relative to the end of the instruction.
    Disp32 { disp_offset: u8, insn_len: u8 },
    /// AArch64 ADR (rewritten from ADRP when needed).
    Adr,
    /// AArch64 `:lo12:` immediate, relative to the ADR target of ref `base`.
    Lo12 { base: usize, shift: u8 },
    /// AArch64 LDR (literal) imm19.
    Literal19,
}

/// What a scanned relocation refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    /// A byte offset inside a section of the object.
    Data {
        section: usize,
        offset: i64,
        symbol: Option<usize>,
    },
    /// A call or tail call to another function.
    Call { name: String },
    /// A relocation kind the relocator cannot express.
    Invalid { reason: String },
}

/// One relocated instruction, as decoded by an architecture scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRef {
    /// Offset of the instruction within the function.
    pub insn_offset: u64,
    pub field: PatchField,
    pub target: RefTarget,
    /// Alignment the instruction requires of the referenced data.
    pub required_align: u32,
}

/// Read-only data extracted for one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantPoolEntry {
    pub label: String,
    pub section: usize,
    /// Offset of the entry in its original section.
    pub origin: u64,
    pub bytes: Vec<u8>,
    pub align: u32,
    /// Offsets of the instructions referencing the entry.
    pub ref_offsets: Vec<u64>,
}

/// A reference expressed against an entry instead of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolicRef {
    pub insn_offset: u64,
    pub field: PatchField,
    pub entry: usize,
    pub delta: i64,
}

/// A body whose constant references are symbolic.
#[derive(Debug, Clone)]
pub struct RelocatableBody {
    pub arch: Arch,
    pub code: Vec<u8>,
    pub refs: Vec<SymbolicRef>,
    pub entries: Vec<ConstantPoolEntry>,
}

/// Body and constants laid out as one contiguous image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub bytes: Vec<u8>,
    pub body_len: usize,
    /// (label, offset, length) of each placed constant.
    pub constants: Vec<(String, usize, usize)>,
}

/// Which functions of a unit reference which section offsets.
#[derive(Debug, Default)]
pub struct UsageIndex {
    boundaries: BTreeMap<usize, BTreeSet<u64>>,
    users: BTreeMap<(usize, u64), BTreeSet<String>>,
}

impl UsageIndex {
    /// Index the references of every function translated from one object.
    pub fn build<'a>(
        object: &ObjectModel,
        functions: impl IntoIterator<Item = (&'a str, &'a [RawRef])>,
    ) -> Self {
        let mut index = UsageIndex::default();
        for (name, refs) in functions {
            for raw in refs {
                if let RefTarget::Data { section, offset, symbol } = &raw.target {
                    let Ok(offset) = u64::try_from(*offset) else {
                        continue;
                    };
                    let start = match symbol.and_then(|s| object.symbols.get(s)) {
                        Some(sym) if sym.size > 0 => sym.address,
                        _ => offset,
                    };
                    index.boundaries.entry(*section).or_default().insert(start);
                    index
                        .users
                        .entry((*section, start))
                        .or_default()
                        .insert(name.to_string());
                }
            }
        }
        for (section, bounds) in index.boundaries.iter_mut() {
            for (_, sym) in object.local_symbols_in(*section) {
                bounds.insert(sym.address);
            }
            for sym in object.symbols.iter().filter(|s| s.global && s.section == Some(*section)) {
                bounds.insert(sym.address);
            }
        }
        index
    }

    fn next_boundary(&self, section: usize, after: u64) -> Option<u64> {
        self.boundaries
            .get(&section)?
            .range(after + 1..)
            .next()
            .copied()
    }

    /// Functions referencing the entry starting at `(section, start)`.
    pub fn users(&self, section: usize, start: u64) -> usize {
        self.users.get(&(section, start)).map_or(0, |u| u.len())
    }
}

/// Scan the relocations applying to `function`.
pub fn scan_function(object: &ObjectModel, function: &ObjectFunction) -> TranslateResult<Vec<RawRef>> {
    match object.arch {
        Arch::X86_64 => crate::x64::constant_refs::scan(object, function),
        Arch::Arm64 => crate::arm64::constant_refs::scan(object, function),
    }
}

/// Natural alignment of data originally placed at `offset` in a section.
fn natural_alignment(section_align: u64, offset: u64) -> u32 {
    let from_offset = if offset == 0 {
        section_align
    } else {
        1u64 << offset.trailing_zeros()
    };
    section_align.min(from_offset).min(u32::MAX as u64) as u32
}

/// Turn raw references into entries and symbolic references.
pub fn extract(
    function: &ObjectFunction,
    object: &ObjectModel,
    raw_refs: &[RawRef],
    index: &UsageIndex,
    policy: SharingPolicy,
) -> TranslateResult<RelocatableBody> {
    let arch = object.arch;
    let unresolved = |offset: u64, reason: String| TranslateError::UnresolvedConstantRef {
        function: function.name.clone(),
        offset,
        reason,
    };

    let mut entries: Vec<ConstantPoolEntry> = Vec::new();
    let mut by_origin: BTreeMap<(usize, u64), usize> = BTreeMap::new();
    let mut refs = Vec::with_capacity(raw_refs.len());

    for raw in raw_refs {
        let at = raw.insn_offset;
        let (section_idx, offset, symbol) = match &raw.target {
            RefTarget::Data { section, offset, symbol } => (*section, *offset, *symbol),
            RefTarget::Call { name } => {
                return Err(unresolved(at, format!("call to other symbol `{name}`")));
            }
            RefTarget::Invalid { reason } => return Err(unresolved(at, reason.clone())),
        };
        let section = object
            .section(section_idx)
            .ok_or_else(|| unresolved(at, format!("unknown section {section_idx}")))?;
        match section.class {
            SectionClass::ReadOnly => {}
            SectionClass::Writable => {
                return Err(unresolved(at, format!("writable target in `{}`", section.name)));
            }
            _ => {
                return Err(unresolved(at, format!("non-data target in `{}`", section.name)));
            }
        }
        let len = section.data.len() as u64;
        let target = u64::try_from(offset)
            .ok()
            .filter(|t| *t < len)
            .ok_or_else(|| unresolved(at, format!("target {offset:#x} outside `{}`", section.name)))?;

        // Extent: a sized symbol is its own entry; otherwise run to the next boundary.
        let (start, end) = match symbol.and_then(|s| object.symbols.get(s)) {
            Some(sym) if sym.global => {
                return Err(unresolved(at, format!("externally visible target `{}`", sym.name)));
            }
            Some(sym) if sym.size > 0 => {
                let end = sym.address + sym.size;
                if target < sym.address || target >= end {
                    return Err(unresolved(at, format!("target falls outside `{}`", sym.name)));
                }
                (sym.address, end)
            }
            _ => (target, index.next_boundary(section_idx, target).unwrap_or(len).min(len)),
        };

        if policy == SharingPolicy::Exclusive && index.users(section_idx, start) > 1 {
            return Err(unresolved(
                at,
                format!("constant at `{}`+{start:#x} is shared", section.name),
            ));
        }
        if !object.relocations_in(section_idx, start, end).is_empty() {
            return Err(unresolved(at, "constant data carries relocations".to_string()));
        }

        let entry = match by_origin.get(&(section_idx, start)) {
            Some(&e) => e,
            None => {
                let mut align = natural_alignment(section.align, start);
                let limit = arch.text_alignment();
                if raw.required_align > limit {
                    return Err(unresolved(
                        at,
                        format!(
                            "instruction needs {}-byte aligned data, {arch} functions guarantee {limit}",
                            raw.required_align
                        ),
                    ));
                }
                align = align.max(raw.required_align).min(limit);
                let label = format!("{}_const{}", function.name, entries.len());
                entries.push(ConstantPoolEntry {
                    label,
                    section: section_idx,
                    origin: start,
                    bytes: section.data[start as usize..end as usize].to_vec(),
                    align,
                    ref_offsets: Vec::new(),
                });
                by_origin.insert((section_idx, start), entries.len() - 1);
                entries.len() - 1
            }
        };
        if raw.required_align > entries[entry].align {
            return Err(unresolved(
                at,
                format!("instruction needs {}-byte aligned data", raw.required_align),
            ));
        }
        entries[entry].ref_offsets.push(at);
        refs.push(SymbolicRef {
            insn_offset: at,
            field: raw.field,
            entry,
            delta: (target - start) as i64,
        });
    }

    // Entries keep their original relative order so paired page offsets stay positive.
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by_key(|&e| (entries[e].section, entries[e].origin));
    let mut rank = vec![0; entries.len()];
    for (new, &old) in order.iter().enumerate() {
        rank[old] = new;
    }
    let mut sorted: Vec<ConstantPoolEntry> = order.iter().map(|&e| entries[e].clone()).collect();
    for (i, entry) in sorted.iter_mut().enumerate() {
        entry.label = format!("{}_const{i}", function.name);
    }
    for r in refs.iter_mut() {
        r.entry = rank[r.entry];
    }

    log::debug!(
        "{}: {} constant references, {} entries",
        function.name,
        refs.len(),
        sorted.len()
    );
    Ok(RelocatableBody {
        arch,
        code: function.code.clone(),
        refs,
        entries: sorted,
    })
}

impl RelocatableBody {
    /// Replace the code after an edit that moved instructions.
    pub fn remap(&mut self, code: Vec<u8>, new_offset: impl Fn(u64) -> u64) {
        self.code = code;
        for r in self.refs.iter_mut() {
            r.insn_offset = new_offset(r.insn_offset);
        }
        for entry in self.entries.iter_mut() {
            for off in entry.ref_offsets.iter_mut() {
                *off = new_offset(*off);
            }
        }
    }

    /// Whether entry `i` directly follows entry `i - 1` in the original section, separated
    /// by no more than its own alignment padding.
    fn continues_run(&self, i: usize) -> bool {
        let (prev, entry) = (&self.entries[i - 1], &self.entries[i]);
        let align = u64::from(entry.align.max(1));
        let prev_end = prev.origin + prev.bytes.len() as u64;
        prev.section == entry.section
            && prev_end <= entry.origin
            && entry.origin - prev_end < align
            && entry.origin % align == 0
            && prev.origin % u64::from(prev.align.max(1)) == 0
    }

    /// Entries that must keep their original distance from each other.
    fn contiguous_runs(&self) -> Vec<std::ops::Range<usize>> {
        let mut runs: Vec<std::ops::Range<usize>> = Vec::new();
        for i in 0..self.entries.len() {
            match runs.last_mut() {
                Some(run) if self.continues_run(i) => run.end = i + 1,
                _ => runs.push(i..i + 1),
            }
        }
        runs
    }

    /// Lay the constants out after the body and encode every reference.
    pub fn resolve(&self, function: &str) -> TranslateResult<ResolvedImage> {
        let body_len = self.code.len();
        let mut cursor = body_len as u32;
        let mut placed: Vec<i64> = Vec::with_capacity(self.entries.len());
        for run in self.contiguous_runs() {
            let first = &self.entries[run.start];
            let align = run.clone().map(|e| self.entries[e].align.max(1)).max().unwrap_or(1);
            // The run keeps its original phase so every member stays aligned.
            let phase = if first.origin % u64::from(first.align.max(1)) == 0 {
                (first.origin % u64::from(align)) as u32
            } else {
                0
            };
            let mut start = align_up(cursor, align) + phase;
            if start >= cursor + align {
                start -= align;
            }
            for e in run {
                let entry = &self.entries[e];
                placed.push(i64::from(start) + (entry.origin - first.origin) as i64);
            }
            let last = placed.len() - 1;
            cursor = placed[last] as u32 + self.entries[last].bytes.len() as u32;
        }

        let targets: Vec<i64> = self
            .refs
            .iter()
            .map(|r| placed[r.entry] + r.delta)
            .collect();
        // An ADR shared by several :lo12: users points at the lowest of their targets.
        let mut bases = targets.clone();
        for (i, r) in self.refs.iter().enumerate() {
            if let PatchField::Lo12 { base, .. } = r.field {
                bases[base] = bases[base].min(targets[i]);
            }
        }

        let pad = match self.arch {
            Arch::X86_64 => 0xcc,
            Arch::Arm64 => 0x00,
        };
        let mut bytes = self.code.clone();
        for (i, r) in self.refs.iter().enumerate() {
            let at = r.insn_offset as usize;
            let result = match r.field {
                PatchField::Disp32 { disp_offset, insn_len } => crate::x64::constant_refs::patch_disp32(
                    &mut bytes,
                    at,
                    disp_offset,
                    insn_len,
                    targets[i],
                ),
                PatchField::Adr => crate::arm64::constant_refs::patch_adr(&mut bytes, at, bases[i]),
                PatchField::Lo12 { base, shift } => crate::arm64::constant_refs::patch_lo12(
                    &mut bytes,
                    at,
                    shift,
                    targets[i] - bases[base],
                ),
                PatchField::Literal19 => {
                    crate::arm64::constant_refs::patch_literal19(&mut bytes, at, targets[i])
                }
            };
            result.map_err(|reason| TranslateError::UnresolvedConstantRef {
                function: function.to_string(),
                offset: r.insn_offset,
                reason,
            })?;
        }

        let mut constants = Vec::with_capacity(self.entries.len());
        for (i, (entry, &offset)) in self.entries.iter().zip(&placed).enumerate() {
            // Padding inside a run stands for the section's own alignment padding.
            let fill = if i > 0 && self.continues_run(i) { 0 } else { pad };
            bytes.resize(offset as usize, fill);
            bytes.extend_from_slice(&entry.bytes);
            constants.push((entry.label.clone(), offset as usize, entry.bytes.len()));
        }
        Ok(ResolvedImage {
            bytes,
            body_len,
            constants,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::test_utils::test::ElfBuilder;
    use object::elf::{R_X86_64_GOTPCREL, R_X86_64_PC32, R_X86_64_PLT32};

    // vmovaps ymm0, [rip+0]; vaddps ymm0, ymm0, [rip+0]; ret
    const BODY: [u8; 17] = [
        0xc5, 0xfc, 0x28, 0x05, 0, 0, 0, 0, 0xc5, 0xfc, 0x58, 0x05, 0, 0, 0, 0, 0xc3,
    ];

    fn two_constant_object(second_offset: i64) -> ObjectModel {
        let mut elf = ElfBuilder::new(Arch::X86_64);
        let text = elf.function("f", &BODY);
        let data: Vec<u8> = (0..64u8).collect();
        let rodata = elf.rodata(".rodata.cst32", &data, 32);
        elf.reloc_to_section(text, 4, rodata, -4, R_X86_64_PC32);
        elf.reloc_to_section(text, 12, rodata, second_offset - 4, R_X86_64_PC32);
        ObjectModel::parse(Arch::X86_64, &elf.build()).unwrap()
    }

    fn extract_f(object: &ObjectModel, policy: SharingPolicy) -> TranslateResult<RelocatableBody> {
        let f = object.function("f").unwrap();
        let raw = scan_function(object, &f)?;
        let index = UsageIndex::build(object, [("f", raw.as_slice())]);
        extract(&f, object, &raw, &index, policy)
    }

    #[test]
    fn test_distinct_constants_become_entries() {
        let object = two_constant_object(32);
        let body = extract_f(&object, SharingPolicy::Duplicate).unwrap();
        assert_eq!(body.entries.len(), 2);
        assert_eq!(body.entries[0].bytes, (0..32u8).collect::<Vec<_>>());
        assert_eq!(body.entries[1].bytes, (32..64u8).collect::<Vec<_>>());
        assert_eq!(body.entries[0].align, 32);
        assert_eq!(body.entries[0].ref_offsets, vec![0]);
        assert_eq!(body.entries[1].ref_offsets, vec![8]);
    }

    #[test]
    fn test_same_constant_shares_entry() {
        let object = two_constant_object(0);
        let body = extract_f(&object, SharingPolicy::Duplicate).unwrap();
        assert_eq!(body.entries.len(), 1);
        assert_eq!(body.entries[0].bytes.len(), 64);
        assert_eq!(body.refs[1].entry, 0);
    }

    #[test]
    fn test_resolve_layout_and_displacements() {
        let object = two_constant_object(32);
        let body = extract_f(&object, SharingPolicy::Duplicate).unwrap();
        let image = body.resolve("f").unwrap();
        assert_eq!(image.body_len, 17);
        // Body padded with int3 up to the 32-byte aligned first constant.
        assert_eq!(image.constants, vec![
            ("f_const0".to_string(), 32, 32),
            ("f_const1".to_string(), 64, 32),
        ]);
        assert!(image.bytes[17..32].iter().all(|b| *b == 0xcc));
        let disp0 = i32::from_le_bytes(image.bytes[4..8].try_into().unwrap());
        let disp1 = i32::from_le_bytes(image.bytes[12..16].try_into().unwrap());
        assert_eq!(disp0, 32 - 8);
        assert_eq!(disp1, 64 - 16);
        assert_eq!(&image.bytes[32..64], &(0..32u8).collect::<Vec<_>>()[..]);
    }

    // vmovups ymm0, [rip+0]; vaddps ymm0, ymm0, [rip+0]; ret
    const UNALIGNED_BODY: [u8; 17] = [
        0xc5, 0xfc, 0x10, 0x05, 0, 0, 0, 0, 0xc5, 0xfc, 0x58, 0x05, 0, 0, 0, 0, 0xc3,
    ];

    #[test]
    fn test_adjacent_constants_keep_their_distance() {
        let mut elf = ElfBuilder::new(Arch::X86_64);
        let text = elf.function("f", &UNALIGNED_BODY);
        let rodata = elf.rodata(".rodata.cst32", &(0..64u8).collect::<Vec<_>>(), 32);
        elf.reloc_to_section(text, 4, rodata, 16 - 4, R_X86_64_PC32);
        elf.reloc_to_section(text, 12, rodata, 32 - 4, R_X86_64_PC32);
        let object = ObjectModel::parse(Arch::X86_64, &elf.build()).unwrap();
        let body = extract_f(&object, SharingPolicy::Duplicate).unwrap();
        assert_eq!(body.entries[0].align, 16);
        assert_eq!(body.entries[1].align, 32);

        let image = body.resolve("f").unwrap();
        assert_eq!(image.constants, vec![
            ("f_const0".to_string(), 48, 16),
            ("f_const1".to_string(), 64, 32),
        ]);
        // A 32-byte load through the first entry still reads the start of the second.
        let disp0 = i32::from_le_bytes(image.bytes[4..8].try_into().unwrap());
        assert_eq!(8 + disp0 as usize, 48);
        assert_eq!(&image.bytes[48..80], &(16..48u8).collect::<Vec<_>>()[..]);
    }

    #[test]
    fn test_padding_between_sized_constants() {
        let mut elf = ElfBuilder::new(Arch::X86_64);
        let text = elf.function("f", &UNALIGNED_BODY);
        let rodata = elf.rodata(".rodata", &(0..64u8).collect::<Vec<_>>(), 32);
        let small = elf.data_symbol(rodata, "small", 16, 4, false);
        let wide = elf.data_symbol(rodata, "wide", 32, 32, false);
        elf.reloc_to_symbol(text, 4, small, -4, R_X86_64_PC32);
        elf.reloc_to_symbol(text, 12, wide, -4, R_X86_64_PC32);
        let object = ObjectModel::parse(Arch::X86_64, &elf.build()).unwrap();
        let body = extract_f(&object, SharingPolicy::Duplicate).unwrap();
        assert_eq!(body.entries[0].bytes, vec![16, 17, 18, 19]);
        assert_eq!(body.entries[1].origin, 32);

        let image = body.resolve("f").unwrap();
        let (_, small_at, _) = image.constants[0];
        let (_, wide_at, _) = image.constants[1];
        assert_eq!(wide_at - small_at, 16);
        assert_eq!(wide_at % 32, 0);
        // Section padding is zero, not the int3 used after the body.
        assert!(image.bytes[small_at + 4..wide_at].iter().all(|b| *b == 0));
        assert!(image.bytes[17..small_at].iter().all(|b| *b == 0xcc));
    }

    #[test]
    fn test_distant_constants_are_packed() {
        let mut elf = ElfBuilder::new(Arch::X86_64);
        let text = elf.function("f", &UNALIGNED_BODY);
        let rodata = elf.rodata(".rodata", &[1u8; 256], 16);
        let first = elf.data_symbol(rodata, "first", 0, 16, false);
        let last = elf.data_symbol(rodata, "last", 240, 16, false);
        elf.reloc_to_symbol(text, 4, first, -4, R_X86_64_PC32);
        elf.reloc_to_symbol(text, 12, last, -4, R_X86_64_PC32);
        let object = ObjectModel::parse(Arch::X86_64, &elf.build()).unwrap();
        let body = extract_f(&object, SharingPolicy::Duplicate).unwrap();
        let image = body.resolve("f").unwrap();
        assert_eq!(image.constants[0].1, 32);
        assert_eq!(image.constants[1].1, 48);
    }

    #[test]
    fn test_rejects_writable_and_got() {
        let mut elf = ElfBuilder::new(Arch::X86_64);
        let text = elf.function("f", &BODY);
        let data = elf.data(".data", &[0u8; 64], 32);
        elf.reloc_to_section(text, 4, data, -4, R_X86_64_PC32);
        let object = ObjectModel::parse(Arch::X86_64, &elf.build()).unwrap();
        let err = extract_f(&object, SharingPolicy::Duplicate).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnresolvedConstantRef);

        let mut elf = ElfBuilder::new(Arch::X86_64);
        let text = elf.function("f", &BODY);
        let table = elf.external("table");
        elf.reloc_to_symbol(text, 4, table, -4, R_X86_64_GOTPCREL);
        let object = ObjectModel::parse(Arch::X86_64, &elf.build()).unwrap();
        let err = extract_f(&object, SharingPolicy::Duplicate).unwrap_err();
        assert!(err.to_string().contains("GOT"), "{err}");
    }

    #[test]
    fn test_rejects_calls() {
        // call rel32; ret
        let code = [0xe8, 0, 0, 0, 0, 0xc3];
        let mut elf = ElfBuilder::new(Arch::X86_64);
        let text = elf.function("f", &code);
        let callee = elf.external("memcpy");
        elf.reloc_to_symbol(text, 1, callee, -4, R_X86_64_PLT32);
        let object = ObjectModel::parse(Arch::X86_64, &elf.build()).unwrap();
        let err = extract_f(&object, SharingPolicy::Duplicate).unwrap_err();
        assert!(err.to_string().contains("memcpy"), "{err}");
    }

    #[test]
    fn test_exclusive_policy_rejects_sharing() {
        let mut elf = ElfBuilder::new(Arch::X86_64);
        let f = elf.function("f", &BODY[8..]);
        let g = elf.function("g", &BODY[8..]);
        let rodata = elf.rodata(".rodata.cst32", &[7u8; 32], 32);
        elf.reloc_to_section(f, 4, rodata, -4, R_X86_64_PC32);
        elf.reloc_to_section(g, 4, rodata, -4, R_X86_64_PC32);
        let object = ObjectModel::parse(Arch::X86_64, &elf.build()).unwrap();

        let fun_f = object.function("f").unwrap();
        let fun_g = object.function("g").unwrap();
        let raw_f = scan_function(&object, &fun_f).unwrap();
        let raw_g = scan_function(&object, &fun_g).unwrap();
        let index = UsageIndex::build(&object, [("f", raw_f.as_slice()), ("g", raw_g.as_slice())]);
        assert_eq!(index.users(rodata_index(&object), 0), 2);

        let dup = extract(&fun_f, &object, &raw_f, &index, SharingPolicy::Duplicate).unwrap();
        assert_eq!(dup.entries.len(), 1);
        let err = extract(&fun_g, &object, &raw_g, &index, SharingPolicy::Exclusive).unwrap_err();
        assert!(err.to_string().contains("shared"));
    }

    fn rodata_index(object: &ObjectModel) -> usize {
        object
            .sections
            .values()
            .find(|s| s.name == ".rodata.cst32")
            .map(|s| s.index)
            .unwrap()
    }

    #[test]
    fn test_natural_alignment() {
        assert_eq!(natural_alignment(32, 0), 32);
        assert_eq!(natural_alignment(32, 16), 16);
        assert_eq!(natural_alignment(16, 64), 16);
        assert_eq!(natural_alignment(8, 4), 4);
    }
}
