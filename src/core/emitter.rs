// This module is the architecture-independent half of the assembly emitter. It lays out
// the Go ABI0 argument frame of a signature (GoFrame), composes one TEXT fragment per
// function from an architecture GlueWriter, and renders the two files of a unit: the
// Plan 9 assembly file with its generated-code header and build constraint, and the Go
// declaration file with one //go:noescape stub per function.
//
// A TEXT fragment is laid out as glue prologue, aligned call-into-body trampoline, body
// bytes, constants and glue epilogue. The GlueWriter decides the instruction sequences;
// this module decides the frame flags and keeps the output deterministic by sorting
// functions by name before rendering.

//! Go assembly and declaration rendering.

use crate::core::abi::{align_up, AbiPlacement};
use crate::core::arch::{Arch, TargetOs};
use crate::core::catalog::{ElementType, RegClass, VectorTypeSpec};
use crate::core::constant_pool::ResolvedImage;
use crate::core::error::{SourceLocation, TranslateResult};
use crate::core::signature::FunctionSignature;
use crate::arm64::streaming::StreamingRegion;
use std::collections::BTreeSet;
use std::fmt::Write as _;

/// Frames up to this size are marked NOSPLIT.
pub const NOSPLIT_FRAME_LIMIT: u32 = 256;

const GO_KEYWORDS: &[&str] = &[
    "break",
    "case",
    "chan",
    "const",
    "continue",
    "default",
    "defer",
    "else",
    "fallthrough",
    "for",
    "func",
    "go",
    "goto",
    "if",
    "import",
    "interface",
    "map",
    "package",
    "range",
    "return",
    "select",
    "struct",
    "switch",
    "type",
    "var",
];

/// `name` as a Go identifier.
pub fn go_ident(name: &str) -> String {
    if GO_KEYWORDS.contains(&name) {
        format!("{name}_")
    } else {
        name.to_string()
    }
}

/// One argument or result in the Go frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoSlot {
    pub name: String,
    /// Byte offset from the first argument.
    pub offset: u32,
    pub size: u32,
    pub go_type: String,
}

impl GoSlot {
    /// Operand addressing `delta` bytes into this slot.
    pub fn operand(&self, delta: u32) -> String {
        if delta == 0 {
            format!("{}+{}(FP)", self.name, self.offset)
        } else {
            format!("{}_{}+{}(FP)", self.name, delta, self.offset + delta)
        }
    }
}

/// Go ABI0 layout of a function's arguments and results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoFrame {
    /// One slot per signature parameter, in order.
    pub params: Vec<GoSlot>,
    /// Destination of a scalable result, passed as a trailing pointer argument.
    pub out: Option<GoSlot>,
    pub result: Option<GoSlot>,
    /// Total bytes of arguments and results.
    pub arg_size: u32,
}

fn go_layout(ty: &VectorTypeSpec) -> (u32, u32) {
    if ty.scalable || ty.class == RegClass::Predicate || ty.element == ElementType::Pointer {
        return (8, 8);
    }
    if !ty.is_scalar() {
        return (ty.size, 1);
    }
    (ty.size, ty.size.max(1))
}

impl GoFrame {
    pub fn layout(sig: &FunctionSignature) -> Self {
        let mut used = BTreeSet::new();
        let mut unique = |base: String| {
            let mut name = base;
            while !used.insert(name.clone()) {
                name.push('_');
            }
            name
        };

        let mut offset = 0;
        let mut params = Vec::with_capacity(sig.params.len());
        for param in &sig.params {
            let (size, align) = go_layout(param.ty);
            offset = align_up(offset, align);
            params.push(GoSlot {
                name: unique(go_ident(&param.name)),
                offset,
                size,
                go_type: param.ty.go_type(),
            });
            offset += size;
        }

        let scalable_ret = sig.ret.filter(|r| r.scalable || r.class == RegClass::Predicate);
        let out = scalable_ret.map(|_| {
            offset = align_up(offset, 8);
            let slot = GoSlot {
                name: unique("out".to_string()),
                offset,
                size: 8,
                go_type: "unsafe.Pointer".to_string(),
            };
            offset += 8;
            slot
        });

        offset = align_up(offset, 8);
        let result = sig.ret.filter(|_| scalable_ret.is_none()).map(|ty| {
            let (size, align) = go_layout(ty);
            offset = align_up(offset, align);
            let slot = GoSlot {
                name: unique("result".to_string()),
                offset,
                size,
                go_type: ty.go_type(),
            };
            offset += size;
            slot
        });

        GoFrame {
            params,
            out,
            result,
            arg_size: align_up(offset, 8),
        }
    }

    /// The Go declaration of `name` with this frame.
    pub fn declaration(&self, name: &str) -> String {
        let mut args: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{} {}", p.name, p.go_type))
            .collect();
        if let Some(out) = &self.out {
            args.push(format!("{} {}", out.name, out.go_type));
        }
        let mut decl = format!("func {}({})", go_ident(name), args.join(", "));
        if let Some(result) = &self.result {
            let _ = write!(decl, " ({} {})", result.name, result.go_type);
        }
        decl
    }
}

/// Everything the glue writer needs to render one function.
pub struct FunctionUnit<'a> {
    pub sig: &'a FunctionSignature,
    pub placement: &'a AbiPlacement,
    pub frame: &'a GoFrame,
    pub image: &'a ResolvedImage,
    pub region: Option<&'a StreamingRegion>,
    /// Bytes of stack the body uses below its entry stack pointer.
    pub stack_depth: u32,
}

/// Architecture-specific rendering of call glue and body bytes.
pub trait GlueWriter: Sync {
    fn arch(&self) -> Arch;

    /// Upper bound of the stack the body allocates below its entry stack pointer.
    fn body_stack_depth(&self, body: &[u8]) -> u32;

    /// Bytes of local frame the glue needs.
    fn frame_size(&self, unit: &FunctionUnit) -> u32;

    /// Save the Go stack, marshal arguments and switch to the C stack.
    fn gen_prologue(&self, unit: &FunctionUnit, frame_size: u32, out: &mut String) -> TranslateResult<()>;

    /// The trampoline, the body and its constants.
    fn gen_image(&self, unit: &FunctionUnit, out: &mut String) -> TranslateResult<()>;

    /// Restore the Go stack, store results and return.
    fn gen_epilogue(&self, unit: &FunctionUnit, frame_size: u32, out: &mut String) -> TranslateResult<()>;
}

/// Glue writer for `arch`.
pub fn glue_for(arch: Arch) -> Box<dyn GlueWriter> {
    match arch {
        Arch::X86_64 => Box::new(crate::x64::glue::Amd64Glue),
        Arch::Arm64 => Box::new(crate::arm64::glue::Arm64Glue),
    }
}

/// One rendered function.
#[derive(Debug, Clone)]
pub struct EmittedFunction {
    pub name: String,
    pub location: SourceLocation,
    /// The TEXT fragment.
    pub assembly: String,
    /// The Go declaration, without the directive line.
    pub declaration: String,
    pub body_size: usize,
    pub constant_entries: usize,
    pub constant_bytes: usize,
    pub streaming: bool,
}

/// Render the TEXT fragment of one function.
pub fn render_function(glue: &dyn GlueWriter, unit: &FunctionUnit) -> TranslateResult<EmittedFunction> {
    let frame_size = glue.frame_size(unit);
    let flags = if frame_size <= NOSPLIT_FRAME_LIMIT {
        "NOSPLIT, "
    } else {
        ""
    };

    let mut out = String::new();
    let _ = writeln!(out, "// {}: {}", unit.sig.location, c_prototype(unit.sig));
    let _ = writeln!(
        out,
        "TEXT \u{b7}{}(SB), {flags}${frame_size}-{}",
        go_ident(&unit.sig.name),
        unit.frame.arg_size
    );
    glue.gen_prologue(unit, frame_size, &mut out)?;
    glue.gen_image(unit, &mut out)?;
    glue.gen_epilogue(unit, frame_size, &mut out)?;

    log::debug!(
        "emitted `{}`: frame {frame_size}, args {}, body {} bytes, {} constants",
        unit.sig.name,
        unit.frame.arg_size,
        unit.image.body_len,
        unit.image.constants.len()
    );

    Ok(EmittedFunction {
        name: unit.sig.name.clone(),
        location: unit.sig.location.clone(),
        assembly: out,
        declaration: unit.frame.declaration(&unit.sig.name),
        body_size: unit.image.body_len,
        constant_entries: unit.image.constants.len(),
        constant_bytes: unit.image.constants.iter().map(|c| c.2).sum(),
        streaming: unit.region.is_some(),
    })
}

fn c_prototype(sig: &FunctionSignature) -> String {
    let params: Vec<String> = sig
        .params
        .iter()
        .map(|p| format!("{} {}", p.c_type, p.name))
        .collect();
    format!("{} {}({})", sig.ret_c_type, sig.name, params.join(", "))
}

/// Provenance recorded at the top of generated files.
#[derive(Debug, Clone)]
pub struct UnitHeader {
    pub arch: Arch,
    pub target_os: TargetOs,
    pub compiler_version: String,
    pub flags: Vec<String>,
    pub source: String,
}

impl UnitHeader {
    fn write_banner(&self, out: &mut String) {
        out.push_str("// Code generated by simdport. DO NOT EDIT.\n");
        let _ = writeln!(out, "// compiler: {}", self.compiler_version);
        let _ = writeln!(out, "// flags: {}", self.flags.join(" "));
        let _ = writeln!(out, "// source: {}", self.source);
        let _ = writeln!(out, "// target: {}/{}", self.target_os, self.arch.goarch());
        out.push('\n');
        let _ = writeln!(out, "//go:build !noasm && {}", self.arch.goarch());
        out.push('\n');
    }
}

fn sorted(functions: &[EmittedFunction]) -> Vec<&EmittedFunction> {
    let mut sorted: Vec<_> = functions.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    sorted
}

/// The assembly file of a unit.
pub fn render_assembly(header: &UnitHeader, functions: &[EmittedFunction]) -> String {
    let mut out = String::new();
    header.write_banner(&mut out);
    out.push_str("#include \"textflag.h\"\n");
    for function in sorted(functions) {
        out.push('\n');
        out.push_str(&function.assembly);
    }
    out
}

/// The Go declaration file of a unit.
pub fn render_declarations(header: &UnitHeader, package: &str, functions: &[EmittedFunction]) -> String {
    let mut out = String::new();
    header.write_banner(&mut out);
    let _ = writeln!(out, "package {package}");
    if functions.iter().any(|f| f.declaration.contains("unsafe.Pointer")) {
        out.push_str("\nimport \"unsafe\"\n");
    }
    for function in sorted(functions) {
        out.push('\n');
        out.push_str("//go:noescape\n");
        out.push_str(&function.declaration);
        out.push('\n');
    }
    out
}

/// Append `bytes` as Go data directives, one instruction or row per line.
pub(crate) fn write_data(out: &mut String, bytes: &[u8], comment: Option<&str>) {
    let mut parts = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        let (n, part) = match rest.len() {
            8.. => (8, format!("QUAD $0x{:016x}", u64::from_le_bytes(take(rest)))),
            4.. => (4, format!("LONG $0x{:08x}", u32::from_le_bytes(take(rest)))),
            2.. => (2, format!("WORD $0x{:04x}", u16::from_le_bytes(take(rest)))),
            _ => (1, format!("BYTE $0x{:02x}", rest[0])),
        };
        parts.push(part);
        rest = &rest[n..];
    }
    let _ = write!(out, "\t{}", parts.join("; "));
    match comment {
        Some(text) => {
            let _ = writeln!(out, " // {text}");
        }
        None => out.push('\n'),
    }
}

fn take<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&bytes[..N]);
    buf
}

/// Append the bytes after the body of `image` in rows of `row` bytes, labeling the rows
/// where a constant starts.
pub(crate) fn write_constants(
    out: &mut String,
    image: &ResolvedImage,
    row: usize,
    mut write_row: impl FnMut(&mut String, &[u8], Option<&str>),
) {
    let tail = image.bytes.get(image.body_len..).unwrap_or_default();
    for (i, chunk) in tail.chunks(row).enumerate() {
        let start = image.body_len + i * row;
        let rows = start..start + chunk.len();
        let labels: Vec<&str> = image
            .constants
            .iter()
            .filter(|(_, offset, _)| rows.contains(offset))
            .map(|(label, _, _)| label.as_str())
            .collect();
        let comment = (!labels.is_empty()).then(|| labels.join(", "));
        write_row(out, chunk, comment.as_deref());
    }
}

/// The bytes after the body of `image`, split into padding runs and labeled constants.
pub(crate) fn constant_segments(image: &ResolvedImage) -> Vec<(&[u8], Option<&str>)> {
    let mut segments = Vec::new();
    let mut cursor = image.body_len;
    for (label, offset, len) in &image.constants {
        if *offset > cursor {
            segments.push((&image.bytes[cursor..*offset], None));
        }
        segments.push((&image.bytes[*offset..offset + len], Some(label.as_str())));
        cursor = offset + len;
    }
    if cursor < image.bytes.len() {
        segments.push((&image.bytes[cursor..], None));
    }
    segments
}
