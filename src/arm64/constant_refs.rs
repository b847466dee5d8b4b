// This module decodes the AArch64 side of constant references. Compilers address
// read-only data with an ADRP + `:lo12:` pair: the ADRP materializes the 4 KiB page of
// the constant and the following ADD or load adds the low twelve bits. Once the constants
// are placed right after the body the page arithmetic no longer holds, so the ADRP is
// rewritten into an ADR to the exact address and each `:lo12:` user receives the
// remaining distance from that address. Pairs are matched by register (the `:lo12:`
// base register is the ADRP destination) and by target section. ADR and LDR (literal)
// relocations are re-encoded in place. Calls and GOT-relative or absolute relocations
// are reported and later refused.

//! AArch64 constant reference scanning and patching.

use crate::arm64::insn;
use crate::core::constant_pool::{PatchField, RawRef, RefTarget};
use crate::core::error::TranslateResult;
use crate::core::object_file::{ObjectFunction, ObjectModel, ObjectReloc, RelocTarget};
use object::elf;

fn lo12_shift(r_type: u32) -> Option<u8> {
    match r_type {
        elf::R_AARCH64_ADD_ABS_LO12_NC | elf::R_AARCH64_LDST8_ABS_LO12_NC => Some(0),
        elf::R_AARCH64_LDST16_ABS_LO12_NC => Some(1),
        elf::R_AARCH64_LDST32_ABS_LO12_NC => Some(2),
        elf::R_AARCH64_LDST64_ABS_LO12_NC => Some(3),
        elf::R_AARCH64_LDST128_ABS_LO12_NC => Some(4),
        _ => None,
    }
}

fn data_target(object: &ObjectModel, reloc: &ObjectReloc) -> RefTarget {
    match &reloc.target {
        // Taking the address of a function is a call-like use of another symbol.
        RelocTarget::Section {
            symbol: Some(s), ..
        } if object.symbols.get(*s).is_some_and(|sym| sym.is_text) => RefTarget::Call {
            name: object.symbols[*s].name.clone(),
        },
        RelocTarget::Section { section, offset, symbol } => RefTarget::Data {
            section: *section,
            offset: *offset as i64 + reloc.addend,
            symbol: *symbol,
        },
        RelocTarget::External(name) => RefTarget::Invalid {
            reason: format!("reference to external symbol `{name}`"),
        },
        RelocTarget::Absolute => RefTarget::Invalid {
            reason: "reference to an absolute symbol".to_string(),
        },
    }
}

fn invalid(reason: impl Into<String>) -> RefTarget {
    RefTarget::Invalid {
        reason: reason.into(),
    }
}

/// Decode the constant references of `function`.
pub fn scan(object: &ObjectModel, function: &ObjectFunction) -> TranslateResult<Vec<RawRef>> {
    let start = function.address;
    let end = start + function.code.len() as u64;
    let words = insn::words(&function.code);
    let mut refs = Vec::new();

    for reloc in object.relocations_in(function.section, start, end) {
        let at = (reloc.offset - start) & !3;
        let word = words.get((at / 4) as usize).copied().unwrap_or(0);
        let (field, target) = if let Some(shift) = lo12_shift(reloc.r_type) {
            // Paired below once every ADRP is known.
            (PatchField::Lo12 { base: usize::MAX, shift }, data_target(object, reloc))
        } else {
            match reloc.r_type {
                elf::R_AARCH64_ADR_PREL_PG_HI21 | elf::R_AARCH64_ADR_PREL_PG_HI21_NC => {
                    if insn::is_adrp(word) {
                        (PatchField::Adr, data_target(object, reloc))
                    } else {
                        (PatchField::Adr, invalid("page relocation on a non-ADRP instruction"))
                    }
                }
                elf::R_AARCH64_ADR_PREL_LO21 if insn::is_adr(word) => {
                    (PatchField::Adr, data_target(object, reloc))
                }
                elf::R_AARCH64_LD_PREL_LO19 if insn::is_ldr_literal(word) => {
                    (PatchField::Literal19, data_target(object, reloc))
                }
                elf::R_AARCH64_CALL26 | elf::R_AARCH64_JUMP26 => {
                    let name = match &reloc.target {
                        RelocTarget::External(name) => name.clone(),
                        RelocTarget::Section { symbol: Some(s), .. } => object
                            .symbols
                            .get(*s)
                            .map_or_else(|| "local code".to_string(), |s| s.name.clone()),
                        _ => "local code".to_string(),
                    };
                    (PatchField::Adr, RefTarget::Call { name })
                }
                elf::R_AARCH64_ADR_GOT_PAGE
                | elf::R_AARCH64_LD64_GOT_LO12_NC
                | elf::R_AARCH64_LD64_GOTPAGE_LO15 => (PatchField::Adr, invalid("GOT-relative reference")),
                elf::R_AARCH64_ABS64 | elf::R_AARCH64_ABS32 | elf::R_AARCH64_ABS16 => {
                    (PatchField::Adr, invalid("absolute address reference"))
                }
                r_type => (PatchField::Adr, invalid(format!("unsupported relocation type {r_type}"))),
            }
        };
        let required_align = match field {
            PatchField::Lo12 { shift, .. } => 1 << shift,
            _ => 1,
        };
        refs.push(RawRef {
            insn_offset: at,
            field,
            target,
            required_align,
        });
    }

    pair_lo12(&words, &mut refs);
    Ok(refs)
}

fn target_section(target: &RefTarget) -> Option<usize> {
    match target {
        RefTarget::Data { section, .. } => Some(*section),
        _ => None,
    }
}

/// Link each `:lo12:` site to the ADRP that produced its base register.
fn pair_lo12(words: &[u32], refs: &mut [RawRef]) {
    let word_at = |off: u64| words.get((off / 4) as usize).copied().unwrap_or(0);
    let pages: Vec<(usize, u64, u32, Option<usize>)> = refs
        .iter()
        .enumerate()
        .filter(|(_, r)| r.field == PatchField::Adr && insn::is_adrp(word_at(r.insn_offset)))
        .map(|(i, r)| (i, r.insn_offset, insn::rd(word_at(r.insn_offset)), target_section(&r.target)))
        .collect();

    for r in refs.iter_mut() {
        let PatchField::Lo12 { shift, .. } = r.field else {
            continue;
        };
        let base_reg = insn::rn(word_at(r.insn_offset));
        let section = target_section(&r.target);
        let candidates = pages
            .iter()
            .filter(|(_, _, rd, sec)| *rd == base_reg && *sec == section);
        let preceding = candidates
            .clone()
            .filter(|(_, off, _, _)| *off < r.insn_offset)
            .max_by_key(|(_, off, _, _)| *off);
        let following = candidates.min_by_key(|(_, off, _, _)| *off);
        match preceding.or(following) {
            Some((base, _, _, _)) => r.field = PatchField::Lo12 { base: *base, shift },
            None => {
                r.target = invalid(format!("unpaired lo12 site using x{base_reg}"));
            }
        }
    }
}

fn read_word(code: &[u8], at: usize) -> Result<u32, String> {
    code.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| format!("instruction at {at:#x} outside the body"))
}

fn write_word(code: &mut [u8], at: usize, word: u32) {
    code[at..at + 4].copy_from_slice(&word.to_le_bytes());
}

/// Rewrite the ADRP or ADR at `at` into an ADR of `target`.
pub fn patch_adr(code: &mut [u8], at: usize, target: i64) -> Result<(), String> {
    let word = read_word(code, at)?;
    let new = insn::adr(insn::rd(word), target - at as i64)?;
    write_word(code, at, new);
    Ok(())
}

/// Encode the distance from the paired ADR target into a `:lo12:` immediate.
pub fn patch_lo12(code: &mut [u8], at: usize, shift: u8, distance: i64) -> Result<(), String> {
    let word = read_word(code, at)?;
    let new = insn::with_imm12(word, distance, shift)?;
    write_word(code, at, new);
    Ok(())
}

/// Re-encode an LDR (literal) of `target`.
pub fn patch_literal19(code: &mut [u8], at: usize, target: i64) -> Result<(), String> {
    let word = read_word(code, at)?;
    let new = insn::with_literal_offset(word, target - at as i64)?;
    write_word(code, at, new);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharingPolicy;
    use crate::core::arch::Arch;
    use crate::core::constant_pool::{extract, UsageIndex};
    use crate::core::test_utils::test::{words, ElfBuilder};

    // adrp x8, 0; ldr q0, [x8]; adrp x9, 0; add x9, x9, #0; ldr q1, [x9]; ret
    const BODY: [u32; 6] = [
        0x9000_0008,
        0x3dc0_0100,
        0x9000_0009,
        0x9100_0129,
        0x3dc0_0121,
        insn::RET,
    ];

    fn object_with(relocs: &[(u64, i64, u32)]) -> ObjectModel {
        let mut elf = ElfBuilder::new(Arch::Arm64);
        let text = elf.function("f", &words(&BODY));
        let data: Vec<u8> = (0..48u8).collect();
        let rodata = elf.rodata(".rodata.cst16", &data, 16);
        for &(offset, addend, r_type) in relocs {
            elf.reloc_to_section(text, offset, rodata, addend, r_type);
        }
        ObjectModel::parse(Arch::Arm64, &elf.build()).unwrap()
    }

    #[test]
    fn test_pairs_by_register() {
        let object = object_with(&[
            (0, 16, elf::R_AARCH64_ADR_PREL_PG_HI21),
            (4, 16, elf::R_AARCH64_LDST128_ABS_LO12_NC),
            (8, 32, elf::R_AARCH64_ADR_PREL_PG_HI21),
            (12, 32, elf::R_AARCH64_ADD_ABS_LO12_NC),
        ]);
        let f = object.function("f").unwrap();
        let refs = scan(&object, &f).unwrap();
        assert_eq!(refs.len(), 4);
        assert_eq!(refs[1].field, PatchField::Lo12 { base: 0, shift: 4 });
        assert_eq!(refs[1].required_align, 16);
        assert_eq!(refs[3].field, PatchField::Lo12 { base: 2, shift: 0 });
        assert!(matches!(refs[2].target, RefTarget::Data { offset: 32, .. }));
    }

    #[test]
    fn test_unpaired_lo12() {
        // The :lo12: user reads x8 but only x9 came from an ADRP.
        let object = object_with(&[
            (8, 0, elf::R_AARCH64_ADR_PREL_PG_HI21),
            (4, 0, elf::R_AARCH64_LDST128_ABS_LO12_NC),
        ]);
        let refs = scan(&object, &object.function("f").unwrap()).unwrap();
        let lo12 = refs.iter().find(|r| r.insn_offset == 4).unwrap();
        assert!(matches!(&lo12.target, RefTarget::Invalid { reason } if reason.contains("unpaired")));
    }

    #[test]
    fn test_rewrite_to_adr() {
        let object = object_with(&[
            (0, 16, elf::R_AARCH64_ADR_PREL_PG_HI21),
            (4, 16, elf::R_AARCH64_LDST128_ABS_LO12_NC),
            (8, 32, elf::R_AARCH64_ADR_PREL_PG_HI21),
            (12, 32, elf::R_AARCH64_ADD_ABS_LO12_NC),
        ]);
        let f = object.function("f").unwrap();
        let raw = scan(&object, &f).unwrap();
        let index = UsageIndex::build(&object, [("f", raw.as_slice())]);
        let body = extract(&f, &object, &raw, &index, SharingPolicy::Duplicate).unwrap();
        assert_eq!(body.entries.len(), 2);
        let image = body.resolve("f").unwrap();
        // Body is 24 bytes; constants at 32 and 48.
        assert_eq!(image.constants[0].1, 32);
        assert_eq!(image.constants[1].1, 48);
        let out = insn::words(&image.bytes[..24]);
        assert_eq!(out[0], insn::adr(8, 32).unwrap());
        assert_eq!(out[2], insn::adr(9, 48 - 8).unwrap());
        // Both :lo12: users address their ADR target exactly.
        assert_eq!((out[1] >> 10) & 0xfff, 0);
        assert_eq!((out[3] >> 10) & 0xfff, 0);
        assert_eq!(&image.bytes[32..48], &(16..32u8).collect::<Vec<_>>()[..]);
    }

    #[test]
    fn test_calls_and_got() {
        let object = object_with(&[
            (0, 0, elf::R_AARCH64_ADR_GOT_PAGE),
            (20, 0, elf::R_AARCH64_JUMP26),
        ]);
        let refs = scan(&object, &object.function("f").unwrap()).unwrap();
        assert!(matches!(&refs[0].target, RefTarget::Invalid { reason } if reason.contains("GOT")));
        assert!(matches!(refs[1].target, RefTarget::Call { .. }));
    }
}
