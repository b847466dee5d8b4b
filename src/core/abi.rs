// This module is the architecture-independent half of the ABI marshaling layer. It
// defines the CCAssigner trait implemented by each target calling convention and the
// CCAssignment record an assigner fills in for one value: register bank, size,
// alignment, number of consecutive registers, and the assigned register or stack offset.
// compute_placement drives an assigner over a FunctionSignature (return value first, so
// a hidden result pointer claims its register before any argument) and produces the
// AbiPlacement the emitter renders glue from. Assigner refusals become
// UnsupportedPlacement errors naming the offending parameter.

//! Calling-convention placement of signatures.

use crate::config::TranslatorConfig;
use crate::core::arch::Arch;
use crate::core::catalog::VectorTypeSpec;
use crate::core::error::{TranslateError, TranslateResult};
use crate::core::register_file::{AsmReg, RegBank, BANK_VEC};
use crate::core::signature::FunctionSignature;

/// Argument attributes for calling convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgAttribute {
    /// No special attributes.
    None,
    /// Passed by value in caller-allocated stack memory.
    ByVal,
    /// Returned through a hidden pointer supplied by the caller.
    StructRet,
    /// Lives only in scalable vector registers; there is no memory fallback.
    Scalable,
    /// Passed as a pointer to memory holding the value, in a GP register or stack slot.
    ByRef,
}

/// Argument assignment result from calling convention analysis.
#[derive(Debug, Clone, Copy)]
pub struct CCAssignment {
    /// Register bank this argument belongs to.
    pub bank: RegBank,
    /// Size of the argument in bytes.
    pub size: u32,
    /// Required alignment in bytes.
    pub align: u32,
    /// Number of consecutive registers needed.
    pub consecutive: u32,
    /// First assigned register (if any).
    pub reg: Option<AsmReg>,
    /// Stack offset from the outgoing argument area (if assigned to stack).
    pub stack_off: Option<u32>,
    /// Argument attributes.
    pub attribute: ArgAttribute,
}

impl CCAssignment {
    /// Create a new assignment for an argument.
    pub fn new(bank: RegBank, size: u32, align: u32) -> Self {
        Self {
            bank,
            size,
            align,
            consecutive: 1,
            reg: None,
            stack_off: None,
            attribute: ArgAttribute::None,
        }
    }

    pub fn with_consecutive(mut self, consecutive: u32) -> Self {
        self.consecutive = consecutive;
        self
    }
}

/// Trait for calling convention argument assignment.
///
/// Assigners refuse values they cannot place by returning the reason.
pub trait CCAssigner {
    /// Describe how a value of `ty` travels, before any register is chosen.
    fn classify(&self, ty: &VectorTypeSpec) -> Result<CCAssignment, String>;

    /// Assign an argument according to the calling convention.
    fn assign_arg(&mut self, arg: &mut CCAssignment) -> Result<(), String>;

    /// Assign a return value according to the calling convention.
    fn assign_ret(&mut self, arg: &mut CCAssignment) -> Result<(), String>;

    /// Reset state for a new function.
    fn reset(&mut self);

    /// Get the total stack space needed for arguments.
    fn get_stack_size(&self) -> u32;
}

/// Which value of the signature a placement describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Param(usize),
    Return,
}

/// How a value crosses the call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassingConvention {
    /// By value in one or more registers.
    Register,
    /// By value in the stack argument area.
    Memory,
    /// Through a caller-provided pointer.
    Indirect,
}

/// Placement of a single parameter or return value.
#[derive(Debug, Clone)]
pub struct ArgPlacement {
    pub slot: Slot,
    pub ty: &'static VectorTypeSpec,
    pub convention: PassingConvention,
    /// Registers in field order.
    pub regs: Vec<AsmReg>,
    pub stack_offset: Option<u32>,
}

/// Register and stack plan for one signature on one architecture.
#[derive(Debug, Clone)]
pub struct AbiPlacement {
    pub arch: Arch,
    pub params: Vec<ArgPlacement>,
    pub ret: Option<ArgPlacement>,
    /// Register carrying the hidden result pointer of an indirect return.
    pub hidden_return: Option<AsmReg>,
    /// Bytes of outgoing stack arguments.
    pub stack_size: u32,
}

impl AbiPlacement {
    pub fn uses_stack(&self) -> bool {
        self.stack_size > 0
    }
}

/// Calling convention for the configured target.
pub fn assigner_for(config: &TranslatorConfig) -> Box<dyn CCAssigner> {
    match config.arch {
        Arch::X86_64 => Box::new(crate::x64::calling_convention::SysVAssigner::new(
            config.native_vector_width(),
        )),
        Arch::Arm64 => Box::new(crate::arm64::calling_convention::Aapcs64Assigner::new()),
    }
}

fn to_placement(slot: Slot, ty: &'static VectorTypeSpec, cca: &CCAssignment) -> ArgPlacement {
    let (convention, regs) = match (cca.attribute, cca.reg) {
        (ArgAttribute::StructRet, _) => (PassingConvention::Indirect, Vec::new()),
        (ArgAttribute::ByRef, reg) => (PassingConvention::Indirect, reg.into_iter().collect()),
        (_, Some(first)) => (
            PassingConvention::Register,
            (0..cca.consecutive as u8).map(|i| first.offset(i)).collect(),
        ),
        (_, None) => (PassingConvention::Memory, Vec::new()),
    };
    ArgPlacement {
        slot,
        ty,
        convention,
        regs,
        stack_offset: cca.stack_off,
    }
}

/// Compute the placement of every parameter and the return value of `sig`.
pub fn compute_placement(
    sig: &FunctionSignature,
    assigner: &mut dyn CCAssigner,
) -> TranslateResult<AbiPlacement> {
    assigner.reset();
    let unsupported = |what: String, reason: String| TranslateError::UnsupportedPlacement {
        function: sig.name.clone(),
        what,
        reason,
    };

    if sig.streaming {
        if let Some(p) = sig.params.iter().find(|p| p.ty.scalable) {
            return Err(unsupported(
                format!("parameter `{}`", p.name),
                "scalable values do not survive the streaming mode switch".to_string(),
            ));
        }
        if sig.ret.is_some_and(|r| r.scalable) {
            return Err(unsupported(
                "return value".to_string(),
                "scalable values do not survive the streaming mode switch".to_string(),
            ));
        }
    }

    let mut hidden_return = None;
    let ret = match sig.ret {
        Some(ty) => {
            let what = || "return value".to_string();
            let mut cca = assigner.classify(ty).map_err(|r| unsupported(what(), r))?;
            assigner
                .assign_ret(&mut cca)
                .map_err(|r| unsupported(what(), r))?;
            if cca.attribute == ArgAttribute::StructRet {
                hidden_return = cca.reg;
            }
            Some(to_placement(Slot::Return, ty, &cca))
        }
        None => None,
    };

    let mut params = Vec::with_capacity(sig.params.len());
    for (index, param) in sig.params.iter().enumerate() {
        let what = || format!("parameter {index} (`{}`)", param.name);
        let mut cca = assigner.classify(param.ty).map_err(|r| unsupported(what(), r))?;
        assigner
            .assign_arg(&mut cca)
            .map_err(|r| unsupported(what(), r))?;
        params.push(to_placement(Slot::Param(index), param.ty, &cca));
    }

    // SMSTART and SMSTOP zero the V registers, so FP and NEON values cannot cross them.
    if sig.streaming {
        let in_vec = |p: &ArgPlacement| p.regs.iter().any(|r| r.bank == BANK_VEC);
        if let Some((index, _)) = params.iter().enumerate().find(|(_, p)| in_vec(p)) {
            return Err(unsupported(
                format!("parameter {index} (`{}`)", sig.params[index].name),
                "SIMD&FP registers are zeroed when streaming mode is entered".to_string(),
            ));
        }
        if ret.as_ref().is_some_and(in_vec) {
            return Err(unsupported(
                "return value".to_string(),
                "SIMD&FP registers are zeroed when streaming mode is left".to_string(),
            ));
        }
    }

    Ok(AbiPlacement {
        arch: sig.arch,
        params,
        ret,
        hidden_return,
        stack_size: assigner.get_stack_size(),
    })
}

/// Align a value up to the specified power-of-two alignment.
pub(crate) fn align_up(value: u32, align: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::c_decl::scan_declarations;
    use crate::core::error::ErrorKind;
    use crate::core::register_file::BANK_GP;
    use crate::core::signature::resolve;
    use std::path::Path;

    fn place(config: &TranslatorConfig, source: &str) -> TranslateResult<AbiPlacement> {
        let decls = scan_declarations(Path::new("t.c"), source);
        let sig = resolve(config.arch, &decls[0])?;
        let mut assigner = assigner_for(config);
        compute_placement(&sig, assigner.as_mut())
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(9, 8), 16);
        assert_eq!(align_up(32, 32), 32);
    }

    #[test]
    fn test_x86_avx2_vectors_in_registers() {
        let config = TranslatorConfig::new(Arch::X86_64).with_machine_option("avx2");
        let abi = place(&config, "__m256 f(__m256 a, float *p, __m256 b) { return a; }").unwrap();
        assert_eq!(abi.params[0].regs, vec![AsmReg::new(BANK_VEC, 0)]);
        assert_eq!(abi.params[1].regs, vec![AsmReg::new(BANK_GP, 7)]);
        assert_eq!(abi.params[2].regs, vec![AsmReg::new(BANK_VEC, 1)]);
        let ret = abi.ret.as_ref().unwrap();
        assert_eq!(ret.convention, PassingConvention::Register);
        assert_eq!(ret.regs, vec![AsmReg::new(BANK_VEC, 0)]);
        assert!(!abi.uses_stack());
    }

    #[test]
    fn test_x86_wide_vectors_without_avx() {
        let config = TranslatorConfig::new(Arch::X86_64);
        let abi = place(&config, "__m256 f(__m256 a, int n) { return a; }").unwrap();
        assert_eq!(abi.hidden_return, Some(AsmReg::new(BANK_GP, 7)));
        assert_eq!(abi.ret.unwrap().convention, PassingConvention::Indirect);
        assert_eq!(abi.params[0].convention, PassingConvention::Memory);
        assert_eq!(abi.params[0].stack_offset, Some(0));
        // RDI holds the result pointer, so `n` moves to RSI.
        assert_eq!(abi.params[1].regs, vec![AsmReg::new(BANK_GP, 6)]);
        assert_eq!(abi.stack_size, 32);
    }

    #[test]
    fn test_streaming_rejects_scalable() {
        let config = TranslatorConfig::new(Arch::Arm64);
        let err = place(&config, "void f(svfloat32_t a) __arm_streaming { }").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedPlacement);
        let err = place(&config, "svbool_t f(float *p) __arm_streaming { }").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedPlacement);
        assert!(place(&config, "svbool_t f(float *p) { }").is_ok());
    }

    #[test]
    fn test_streaming_rejects_simd_fp_registers() {
        let config = TranslatorConfig::new(Arch::Arm64);
        let err = place(&config, "float f(const float *p, int n) __arm_streaming { }").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedPlacement);
        assert!(err.to_string().contains("return value"), "{err}");
        let err = place(&config, "void f(float x, float *p) __arm_streaming { }").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedPlacement);
        assert!(err.to_string().contains("`x`"), "{err}");
        let err = place(&config, "void f(float32x4_t v, float *p) __arm_locally_streaming { }").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedPlacement);

        let abi = place(&config, "long f(const float *a, long n) __arm_streaming { }").unwrap();
        assert_eq!(abi.ret.unwrap().regs, vec![AsmReg::gp(0)]);
        assert!(place(&config, "float f(float x) { return x; }").is_ok());
    }

    #[test]
    fn test_scalable_overflow_passes_by_reference() {
        let config = TranslatorConfig::new(Arch::Arm64);
        let params: Vec<String> = (0..9).map(|i| format!("svfloat32_t a{i}")).collect();
        let source = format!("void f({}) {{ }}", params.join(", "));
        let abi = place(&config, &source).unwrap();
        for p in &abi.params[..8] {
            assert_eq!(p.convention, PassingConvention::Register);
        }
        assert_eq!(abi.params[8].convention, PassingConvention::Indirect);
        assert_eq!(abi.params[8].regs, vec![AsmReg::gp(0)]);
        assert!(!abi.uses_stack());
    }
}
