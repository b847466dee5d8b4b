// This module implements the signature resolver. It takes a scanned CDeclaration and
// resolves every parameter and return type against the type-stub catalog of the target
// architecture, producing an immutable FunctionSignature. It also interprets the
// declared attributes: it decides the streaming and tile-output flags, rejects
// attribute combinations the host cannot honor, and keeps the type-affecting
// attributes so the real compiler pass can prove the declaration matches.
//
// The resolver is a pure function of (arch, declaration).

//! Signature resolution against the type-stub catalog.

use crate::core::arch::Arch;
use crate::core::c_decl::{Attribute, CDeclaration, TypeName};
use crate::core::catalog::{self, VectorTypeSpec};
use crate::core::error::{SourceLocation, TranslateError, TranslateResult};

/// A resolved parameter.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: &'static VectorTypeSpec,
    /// C spelling as declared.
    pub c_type: String,
}

/// Resolved ABI-relevant facts about one function.
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub name: String,
    pub arch: Arch,
    pub params: Vec<Param>,
    pub ret: Option<&'static VectorTypeSpec>,
    /// C spelling of the return type.
    pub ret_c_type: String,
    pub streaming: bool,
    pub tile_output: bool,
    /// Attributes that are part of the function type, spelled as C.
    pub type_attributes: Vec<String>,
    pub location: SourceLocation,
}

impl FunctionSignature {
    /// Largest vector register footprint among parameters and return value.
    pub fn widest_vector_bytes(&self) -> u32 {
        self.params
            .iter()
            .map(|p| p.ty)
            .chain(self.ret)
            .filter(|t| !t.is_scalar() && !t.scalable)
            .map(|t| t.member_bytes())
            .max()
            .unwrap_or(0)
    }

    /// Whether any parameter or the return value is an SVE scalable value.
    pub fn uses_scalable(&self) -> bool {
        self.params.iter().map(|p| p.ty).chain(self.ret).any(|t| t.scalable)
    }
}

const STREAMING_MARKERS: &[&str] = &["__arm_streaming", "__arm_locally_streaming"];
const GNU_STREAMING_MARKERS: &[&str] = &["arm_streaming", "arm_locally_streaming"];

/// Keyword attributes that belong to the function type.
const TYPE_KEYWORDS: &[&str] = &[
    "__arm_streaming",
    "__arm_streaming_compatible",
    "__arm_in",
    "__arm_out",
    "__arm_inout",
    "__arm_preserves",
    "__arm_shared_za",
    "__arm_preserves_za",
];
const GNU_TYPE_ATTRIBUTES: &[&str] = &["arm_streaming", "arm_streaming_compatible"];

fn is_arm_attribute(attr: &Attribute) -> bool {
    if attr.gnu {
        attr.name.starts_with("arm_")
    } else {
        attr.name.starts_with("__arm_")
    }
}

/// Interpretation of a declaration's attributes.
struct Modes {
    streaming: bool,
    tile_output: bool,
}

fn classify_attributes(arch: Arch, decl: &CDeclaration) -> TranslateResult<Modes> {
    let inconsistent = |reason: String| TranslateError::InconsistentAttributes {
        function: decl.name.clone(),
        reason,
    };

    let mut modes = Modes {
        streaming: false,
        tile_output: false,
    };
    for attr in &decl.attributes {
        if !is_arm_attribute(attr) {
            continue;
        }
        if arch != Arch::Arm64 {
            return Err(inconsistent(format!("`{}` is only valid on arm64", attr.text)));
        }
        let touches_za = attr.args.iter().any(|a| a == "za" || a == "zt0");
        match attr.name.as_str() {
            n if STREAMING_MARKERS.contains(&n) => modes.streaming = true,
            n if attr.gnu && GNU_STREAMING_MARKERS.contains(&n) => modes.streaming = true,
            "__arm_new_za" | "__arm_shared_za" => modes.tile_output = true,
            "__arm_out" | "__arm_inout" | "__arm_new" if touches_za => {
                if attr.args.iter().any(|a| a == "zt0") && attr.name != "__arm_new" {
                    return Err(inconsistent(format!(
                        "`{}` requires ZT0 state from the caller",
                        attr.text
                    )));
                }
                modes.tile_output = true;
            }
            "__arm_in" | "__arm_preserves" if touches_za => {
                return Err(inconsistent(format!(
                    "`{}` requires accumulator state from the caller",
                    attr.text
                )));
            }
            "__arm_preserves_za" => {
                return Err(inconsistent(format!(
                    "`{}` requires accumulator state from the caller",
                    attr.text
                )));
            }
            _ => {}
        }
    }
    if modes.tile_output && !modes.streaming {
        return Err(inconsistent(
            "tile output requires a streaming function".to_string(),
        ));
    }
    Ok(modes)
}

fn resolve_type(arch: Arch, ty: &TypeName) -> TranslateResult<&'static VectorTypeSpec> {
    if ty.pointer > 0 {
        return Ok(catalog::pointer(arch));
    }
    catalog::lookup(arch, &ty.base)
}

/// Resolve a scanned declaration into a FunctionSignature.
pub fn resolve(arch: Arch, decl: &CDeclaration) -> TranslateResult<FunctionSignature> {
    let modes = classify_attributes(arch, decl)?;

    if decl.variadic {
        return Err(TranslateError::UnresolvedParameter {
            function: decl.name.clone(),
            index: decl.params.len(),
            param: "...".to_string(),
            ty: "variadic arguments".to_string(),
        });
    }

    let ret = if decl.return_type.is_void() {
        None
    } else {
        Some(resolve_type(arch, &decl.return_type)?)
    };

    let mut params = Vec::with_capacity(decl.params.len());
    for (index, param) in decl.params.iter().enumerate() {
        let name = param
            .name
            .clone()
            .unwrap_or_else(|| format!("arg{index}"));
        let ty = resolve_type(arch, &param.ty).map_err(|_| TranslateError::UnresolvedParameter {
            function: decl.name.clone(),
            index,
            param: name.clone(),
            ty: param.ty.spelling.clone(),
        })?;
        params.push(Param {
            name,
            ty,
            c_type: param.ty.spelling.clone(),
        });
    }

    let type_attributes = decl
        .attributes
        .iter()
        .filter(|a| {
            if a.gnu {
                GNU_TYPE_ATTRIBUTES.contains(&a.name.as_str())
            } else {
                TYPE_KEYWORDS.contains(&a.name.as_str())
            }
        })
        .map(|a| a.text.clone())
        .collect();

    log::debug!(
        "resolved `{}` for {arch}: {} params, streaming={}, tile_output={}",
        decl.name,
        params.len(),
        modes.streaming,
        modes.tile_output
    );

    Ok(FunctionSignature {
        name: decl.name.clone(),
        arch,
        params,
        ret,
        ret_c_type: decl.return_type.spelling.clone(),
        streaming: modes.streaming,
        tile_output: modes.tile_output,
        type_attributes,
        location: decl.location.clone(),
    })
}
