// This module implements the type-stub catalog: a sealed, per-architecture registry of
// every type a translatable signature may mention. Each VectorTypeSpec records the ABI
// facts the rest of the pipeline needs (element type, lane count, bit width, register
// class, tuple arity, scalable flag, byte size and alignment) plus the C spelling.
// Entries are built once into a OnceLock-backed map keyed by (Arch, name) and are only
// ever read afterwards, so rayon workers share them without locking.
//
// The catalog also renders the stub prologue used by the metadata compiler pass. The
// prologue replaces the vendor intrinsic headers with layout-equivalent placeholder
// structs, integer typedefs for mask types, include guards that keep the real headers
// out, and empty macros for the SME keyword attributes. Scalable SVE types have no
// compile-time size, so their placeholders use a fixed 256-byte (data) or 32-byte
// (predicate) body whose size is never compared against the real header.

//! Type-stub catalog: per-architecture placeholder type declarations.

use crate::core::arch::Arch;
use crate::core::error::{TranslateError, TranslateResult};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::OnceLock;

/// Placeholder size of a scalable data vector in the stub pass.
pub const SCALABLE_STUB_BYTES: u32 = 256;
/// Placeholder size of a scalable predicate in the stub pass.
pub const PREDICATE_STUB_BYTES: u32 = 32;

/// Name of the generic data pointer pseudo-entry.
pub const POINTER_TYPE: &str = "void *";

/// Register class a value of the type travels in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegClass {
    General,
    Vector,
    Predicate,
    Tile,
}

/// Lane element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F16,
    BF16,
    F32,
    F64,
    P8,
    P16,
    P64,
    Bool,
    Mask,
    Pointer,
}

impl ElementType {
    pub fn bits(self) -> u32 {
        match self {
            ElementType::I8 | ElementType::U8 | ElementType::P8 | ElementType::Bool => 8,
            ElementType::I16
            | ElementType::U16
            | ElementType::F16
            | ElementType::BF16
            | ElementType::P16 => 16,
            ElementType::I32 | ElementType::U32 | ElementType::F32 => 32,
            ElementType::I64
            | ElementType::U64
            | ElementType::F64
            | ElementType::P64
            | ElementType::Pointer => 64,
            // Masks are one bit per lane.
            ElementType::Mask => 1,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            ElementType::F16 | ElementType::BF16 | ElementType::F32 | ElementType::F64
        )
    }
}

/// Immutable description of one catalog type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorTypeSpec {
    pub arch: Arch,
    /// C spelling, normalized to single spaces.
    pub name: String,
    pub element: ElementType,
    /// Lanes per member vector; the minimum lane count for scalable types.
    pub lanes: u32,
    /// Bits per member vector; the 128-bit granule for scalable types.
    pub bits: u32,
    pub class: RegClass,
    /// Member vectors of a tuple; 1 for plain vectors and scalars.
    pub tuple: u8,
    pub scalable: bool,
    /// Plain C scalar (integers, floats, masks, pointers).
    pub scalar: bool,
    /// Byte size as laid out by the real header (stub size for scalable types).
    pub size: u32,
    pub align: u32,
}

impl VectorTypeSpec {
    pub fn is_scalar(&self) -> bool {
        self.scalar
    }

    pub fn is_tuple(&self) -> bool {
        self.tuple > 1
    }

    /// Bytes of one member register for vector types.
    pub fn member_bytes(&self) -> u32 {
        self.bits / 8
    }

    /// Whether the stub declaration is a placeholder struct rather than a real C type.
    fn needs_struct_stub(&self) -> bool {
        match self.element {
            ElementType::F16 | ElementType::BF16 if self.lanes == 1 && !self.scalable => {
                self.arch == Arch::Arm64
            }
            _ => !self.is_scalar() && self.element != ElementType::Mask,
        }
    }

    /// Go type used in the generated declaration file.
    pub fn go_type(&self) -> String {
        if self.scalable || self.class == RegClass::Predicate || self.element == ElementType::Pointer {
            return "unsafe.Pointer".to_string();
        }
        if !self.is_scalar() {
            return format!("[{}]byte", self.size);
        }
        let ty = match self.element {
            ElementType::I8 => "int8",
            ElementType::U8 | ElementType::P8 => "uint8",
            ElementType::I16 => "int16",
            ElementType::U16 | ElementType::P16 | ElementType::F16 | ElementType::BF16 => "uint16",
            ElementType::I32 => "int32",
            ElementType::U32 => "uint32",
            ElementType::I64 => "int64",
            ElementType::U64 | ElementType::P64 => "uint64",
            ElementType::F32 => "float32",
            ElementType::F64 => "float64",
            ElementType::Bool => "bool",
            ElementType::Mask => match self.size {
                1 => "uint8",
                2 => "uint16",
                4 => "uint32",
                _ => "uint64",
            },
            ElementType::Pointer => "unsafe.Pointer",
        };
        ty.to_string()
    }
}

type Registry = BTreeMap<(Arch, String), VectorTypeSpec>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map = Registry::new();
        for arch in [Arch::X86_64, Arch::Arm64] {
            let mut specs = scalar_entries(arch);
            match arch {
                Arch::X86_64 => specs.extend(x86_entries()),
                Arch::Arm64 => {
                    specs.extend(neon_entries());
                    specs.extend(sve_entries());
                }
            }
            for spec in specs {
                map.insert((arch, spec.name.clone()), spec);
            }
        }
        map
    })
}

/// Look up a type by its (normalized) C spelling.
pub fn lookup(arch: Arch, name: &str) -> TranslateResult<&'static VectorTypeSpec> {
    registry()
        .get(&(arch, name.to_string()))
        .ok_or_else(|| TranslateError::UnknownType {
            arch,
            name: name.to_string(),
        })
}

/// The generic data pointer entry every pointer-typed parameter resolves to.
pub fn pointer(arch: Arch) -> &'static VectorTypeSpec {
    match registry().get(&(arch, POINTER_TYPE.to_string())) {
        Some(spec) => spec,
        None => unreachable!("pointer entry is registered for every architecture"),
    }
}

/// All entries of an architecture in name order.
pub fn entries(arch: Arch) -> impl Iterator<Item = &'static VectorTypeSpec> {
    registry()
        .iter()
        .filter(move |((a, _), _)| *a == arch)
        .map(|(_, spec)| spec)
}

/// Render the stub prologue replacing the vendor intrinsic headers.
pub fn stub_prologue(arch: Arch) -> String {
    let mut out = String::new();
    let guards: &[&str] = match arch {
        Arch::X86_64 => &[
            "_IMMINTRIN_H_INCLUDED",
            "__IMMINTRIN_H",
            "__AVX512FP16INTRIN_H",
        ],
        Arch::Arm64 => &[
            "__ARM_NEON_H",
            "__ARM_FP16_H",
            "__ARM_BF16_H",
            "__ARM_SVE_H",
            "__ARM_SME_H",
        ],
    };
    for guard in guards {
        let _ = writeln!(out, "#define {guard} 1");
    }
    out.push_str("#include <stddef.h>\n#include <stdint.h>\n");

    if arch == Arch::Arm64 {
        for attr in [
            "__arm_streaming",
            "__arm_streaming_compatible",
            "__arm_locally_streaming",
            "__arm_new_za",
            "__arm_shared_za",
            "__arm_preserves_za",
        ] {
            let _ = writeln!(out, "#define {attr}");
        }
        for attr in ["__arm_in", "__arm_out", "__arm_inout", "__arm_new", "__arm_preserves"] {
            let _ = writeln!(out, "#define {attr}(...)");
        }
    }

    for spec in entries(arch) {
        if spec.element == ElementType::Mask {
            let base = match spec.size {
                1 => "unsigned char",
                2 => "unsigned short",
                4 => "unsigned int",
                _ => "unsigned long long",
            };
            let _ = writeln!(out, "typedef {base} {};", spec.name);
        } else if spec.needs_struct_stub() {
            let _ = writeln!(
                out,
                "typedef struct __attribute__((aligned({}))) {{ char _[{}]; }} {};",
                spec.align, spec.size, spec.name
            );
        }
    }
    out
}

fn scalar(arch: Arch, name: &str, element: ElementType, class: RegClass) -> VectorTypeSpec {
    let bytes = (element.bits() / 8).max(1);
    VectorTypeSpec {
        arch,
        name: name.to_string(),
        element,
        lanes: 1,
        bits: bytes * 8,
        class,
        tuple: 1,
        scalable: false,
        scalar: true,
        size: bytes,
        align: bytes,
    }
}

fn scalar_entries(arch: Arch) -> Vec<VectorTypeSpec> {
    use ElementType::*;
    use RegClass::General as G;
    let mut specs = vec![
        scalar(arch, "int8_t", I8, G),
        scalar(arch, "uint8_t", U8, G),
        scalar(arch, "int16_t", I16, G),
        scalar(arch, "uint16_t", U16, G),
        scalar(arch, "int32_t", I32, G),
        scalar(arch, "uint32_t", U32, G),
        scalar(arch, "int64_t", I64, G),
        scalar(arch, "uint64_t", U64, G),
        scalar(arch, "char", I8, G),
        scalar(arch, "signed char", I8, G),
        scalar(arch, "unsigned char", U8, G),
        scalar(arch, "short", I16, G),
        scalar(arch, "unsigned short", U16, G),
        scalar(arch, "int", I32, G),
        scalar(arch, "unsigned", U32, G),
        scalar(arch, "unsigned int", U32, G),
        scalar(arch, "long", I64, G),
        scalar(arch, "unsigned long", U64, G),
        scalar(arch, "long long", I64, G),
        scalar(arch, "unsigned long long", U64, G),
        scalar(arch, "size_t", U64, G),
        scalar(arch, "_Bool", Bool, G),
        scalar(arch, "float", F32, RegClass::Vector),
        scalar(arch, "double", F64, RegClass::Vector),
        scalar(arch, POINTER_TYPE, Pointer, G),
    ];
    if arch == Arch::Arm64 {
        specs.push(scalar(arch, "float32_t", F32, RegClass::Vector));
        specs.push(scalar(arch, "float64_t", F64, RegClass::Vector));
        specs.push(scalar(arch, "float16_t", F16, RegClass::Vector));
        specs.push(scalar(arch, "bfloat16_t", BF16, RegClass::Vector));
    }
    specs
}

fn vector(
    arch: Arch,
    name: String,
    element: ElementType,
    bits: u32,
    tuple: u8,
    align: u32,
) -> VectorTypeSpec {
    VectorTypeSpec {
        arch,
        name,
        element,
        lanes: bits / element.bits(),
        bits,
        class: RegClass::Vector,
        tuple,
        scalable: false,
        scalar: false,
        size: bits / 8 * tuple as u32,
        align,
    }
}

fn x86_entries() -> Vec<VectorTypeSpec> {
    use ElementType::*;
    let mut specs = vec![vector(Arch::X86_64, "__m64".to_string(), I64, 64, 1, 8)];
    for bits in [128u32, 256, 512] {
        let bytes = bits / 8;
        for (suffix, element) in [("", F32), ("d", F64), ("i", I64), ("h", F16), ("bh", BF16)] {
            let name = format!("__m{bits}{suffix}");
            specs.push(vector(Arch::X86_64, name, element, bits, 1, bytes));
        }
    }
    for bits in [8u32, 16, 32, 64] {
        specs.push(VectorTypeSpec {
            arch: Arch::X86_64,
            name: format!("__mmask{bits}"),
            element: Mask,
            lanes: bits,
            bits,
            class: RegClass::General,
            tuple: 1,
            scalable: false,
            scalar: true,
            size: bits / 8,
            align: bits / 8,
        });
    }
    specs
}

const NEON_ELEMENTS: &[(&str, ElementType)] = &[
    ("int8", ElementType::I8),
    ("int16", ElementType::I16),
    ("int32", ElementType::I32),
    ("int64", ElementType::I64),
    ("uint8", ElementType::U8),
    ("uint16", ElementType::U16),
    ("uint32", ElementType::U32),
    ("uint64", ElementType::U64),
    ("float16", ElementType::F16),
    ("float32", ElementType::F32),
    ("float64", ElementType::F64),
    ("bfloat16", ElementType::BF16),
    ("poly8", ElementType::P8),
    ("poly16", ElementType::P16),
    ("poly64", ElementType::P64),
];

fn neon_entries() -> Vec<VectorTypeSpec> {
    let mut specs = Vec::new();
    for &(prefix, element) in NEON_ELEMENTS {
        for bits in [64u32, 128] {
            let lanes = bits / element.bits();
            let align = bits / 8;
            specs.push(vector(
                Arch::Arm64,
                format!("{prefix}x{lanes}_t"),
                element,
                bits,
                1,
                align,
            ));
            for tuple in 2..=4u8 {
                specs.push(vector(
                    Arch::Arm64,
                    format!("{prefix}x{lanes}x{tuple}_t"),
                    element,
                    bits,
                    tuple,
                    align,
                ));
            }
        }
    }
    specs
}

const SVE_ELEMENTS: &[(&str, ElementType)] = &[
    ("int8", ElementType::I8),
    ("int16", ElementType::I16),
    ("int32", ElementType::I32),
    ("int64", ElementType::I64),
    ("uint8", ElementType::U8),
    ("uint16", ElementType::U16),
    ("uint32", ElementType::U32),
    ("uint64", ElementType::U64),
    ("float16", ElementType::F16),
    ("float32", ElementType::F32),
    ("float64", ElementType::F64),
    ("bfloat16", ElementType::BF16),
];

fn scalable(name: String, element: ElementType, class: RegClass, tuple: u8) -> VectorTypeSpec {
    let (stub, align) = match class {
        RegClass::Predicate => (PREDICATE_STUB_BYTES, 2),
        _ => (SCALABLE_STUB_BYTES, 16),
    };
    VectorTypeSpec {
        arch: Arch::Arm64,
        name,
        element,
        lanes: 128 / element.bits(),
        bits: 128,
        class,
        tuple,
        scalable: true,
        scalar: false,
        size: stub * tuple as u32,
        align,
    }
}

fn sve_entries() -> Vec<VectorTypeSpec> {
    let mut specs = Vec::new();
    for &(prefix, element) in SVE_ELEMENTS {
        specs.push(scalable(format!("sv{prefix}_t"), element, RegClass::Vector, 1));
        for tuple in 2..=4u8 {
            specs.push(scalable(
                format!("sv{prefix}x{tuple}_t"),
                element,
                RegClass::Vector,
                tuple,
            ));
        }
    }
    specs.push(scalable("svbool_t".into(), ElementType::Bool, RegClass::Predicate, 1));
    specs.push(scalable("svcount_t".into(), ElementType::Bool, RegClass::Predicate, 1));
    specs
}
