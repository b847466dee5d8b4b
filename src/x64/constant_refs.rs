// This module decodes the x86-64 side of constant references. Each relocation applying to
// a function body is matched against the instruction containing it with iced-x86. A
// R_X86_64_PC32 relocation must sit exactly on the displacement of a RIP-relative memory
// operand; the addressed location is then the symbol offset plus the addend plus the
// distance from the displacement field to the end of the instruction, which accounts for
// immediates that follow the displacement. Calls through PLT32 are reported as calls. GOT
// and absolute relocations have no position-independent rendering and are refused.

//! x86-64 constant reference scanning and patching.

use crate::core::constant_pool::{PatchField, RawRef, RefTarget};
use crate::core::error::TranslateResult;
use crate::core::object_file::{ObjectFunction, ObjectModel, ObjectReloc, RelocTarget};
use iced_x86::{Decoder, DecoderOptions, Instruction, Mnemonic};
use object::elf;

/// Mnemonics that fault on data not aligned to the operand size.
fn requires_natural_alignment(mnemonic: Mnemonic) -> bool {
    matches!(
        mnemonic,
        Mnemonic::Movaps
            | Mnemonic::Movapd
            | Mnemonic::Movdqa
            | Mnemonic::Movntdqa
            | Mnemonic::Vmovaps
            | Mnemonic::Vmovapd
            | Mnemonic::Vmovdqa
            | Mnemonic::Vmovdqa32
            | Mnemonic::Vmovdqa64
            | Mnemonic::Vmovntdqa
    )
}

fn describe(r_type: u32) -> &'static str {
    match r_type {
        elf::R_X86_64_GOTPCREL
        | elf::R_X86_64_GOTPCRELX
        | elf::R_X86_64_REX_GOTPCRELX
        | elf::R_X86_64_GOTPC32
        | elf::R_X86_64_GOT32 => "GOT-relative reference",
        elf::R_X86_64_64 | elf::R_X86_64_32 | elf::R_X86_64_32S => "absolute address reference",
        _ => "unsupported relocation",
    }
}

/// Decode the constant references of `function`.
pub fn scan(object: &ObjectModel, function: &ObjectFunction) -> TranslateResult<Vec<RawRef>> {
    let start = function.address;
    let end = start + function.code.len() as u64;
    let relocs = object.relocations_in(function.section, start, end);
    if relocs.is_empty() {
        return Ok(Vec::new());
    }

    let mut decoder = Decoder::with_ip(64, &function.code, 0, DecoderOptions::NONE);
    let mut instr = Instruction::default();
    let mut refs = Vec::with_capacity(relocs.len());
    let mut pending = relocs.iter().peekable();

    while decoder.can_decode() && pending.peek().is_some() {
        decoder.decode_out(&mut instr);
        let ip = instr.ip();
        let next = instr.next_ip();
        let offsets = decoder.get_constant_offsets(&instr);
        let disp_offset = offsets
            .has_displacement()
            .then(|| offsets.displacement_offset());

        while let Some(reloc) = pending.next_if(|r| r.offset - start < next) {
            let field = reloc.offset - start;
            let target = classify(object, reloc, field, &instr, disp_offset);
            let required_align = if requires_natural_alignment(instr.mnemonic()) {
                instr.memory_size().size() as u32
            } else {
                1
            };
            refs.push(RawRef {
                insn_offset: ip,
                field: PatchField::Disp32 {
                    disp_offset: (field - ip) as u8,
                    insn_len: instr.len() as u8,
                },
                target,
                required_align,
            });
        }
    }

    for reloc in pending {
        refs.push(RawRef {
            insn_offset: reloc.offset - start,
            field: PatchField::Disp32 {
                disp_offset: 0,
                insn_len: 0,
            },
            target: RefTarget::Invalid {
                reason: "relocation outside any decoded instruction".to_string(),
            },
            required_align: 1,
        });
    }
    Ok(refs)
}

fn classify(
    object: &ObjectModel,
    reloc: &ObjectReloc,
    field: u64,
    instr: &Instruction,
    disp_offset: Option<usize>,
) -> RefTarget {
    match (reloc.r_type, &reloc.target) {
        (elf::R_X86_64_PLT32 | elf::R_X86_64_PC32, RelocTarget::External(name)) if is_branch(instr) => {
            RefTarget::Call { name: name.clone() }
        }
        (elf::R_X86_64_PLT32 | elf::R_X86_64_PC32, RelocTarget::Section { symbol, .. })
            if is_branch(instr) =>
        {
            let name = symbol
                .and_then(|s| object.symbols.get(s))
                .map_or_else(|| "local code".to_string(), |s| s.name.clone());
            RefTarget::Call { name }
        }
        (elf::R_X86_64_PC32, RelocTarget::Section { section, offset, symbol }) => {
            let on_operand = instr.is_ip_rel_memory_operand()
                && disp_offset.is_some_and(|d| instr.ip() + d as u64 == field);
            if !on_operand {
                return RefTarget::Invalid {
                    reason: format!(
                        "relocation is not on the RIP-relative operand of {:?}",
                        instr.mnemonic()
                    ),
                };
            }
            RefTarget::Data {
                section: *section,
                offset: *offset as i64 + reloc.addend + (instr.next_ip() - field) as i64,
                symbol: *symbol,
            }
        }
        (elf::R_X86_64_PC32, RelocTarget::External(name)) => RefTarget::Invalid {
            reason: format!("reference to external symbol `{name}`"),
        },
        (r_type, _) => RefTarget::Invalid {
            reason: format!("{} (type {r_type})", describe(r_type)),
        },
    }
}

fn is_branch(instr: &Instruction) -> bool {
    instr.is_call_near() || instr.is_jmp_near() || instr.is_jcc_near()
}

/// Encode the displacement of a RIP-relative operand addressing `target`.
pub fn patch_disp32(
    code: &mut [u8],
    insn: usize,
    disp_offset: u8,
    insn_len: u8,
    target: i64,
) -> Result<(), String> {
    let field = insn + disp_offset as usize;
    let disp = target - (insn + insn_len as usize) as i64;
    let disp = i32::try_from(disp).map_err(|_| format!("displacement {disp} out of range"))?;
    let slot = code
        .get_mut(field..field + 4)
        .ok_or_else(|| format!("displacement field at {field:#x} outside the body"))?;
    slot.copy_from_slice(&disp.to_le_bytes());
    Ok(())
}
