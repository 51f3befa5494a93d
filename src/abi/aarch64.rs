//! AAPCS64 (ARM64 Procedure Call Standard)

use super::{leaves, AbiPolicy, CallingConvention, Classification};
use crate::ctype::CType;
use crate::error::Result;

static CONVENTION: CallingConvention = CallingConvention {
    name: "aapcs64",
    int_arg_regs: &["x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7"],
    float_arg_regs: &["v0", "v1", "v2", "v3", "v4", "v5", "v6", "v7"],
    shared_arg_slots: false,
    memory_by_reference: true,
    // the indirect result address goes in x8
    hidden_return_consumes_int_reg: false,
};

#[derive(Debug, Clone, Copy)]
pub struct AArch64 {
    /// Apple platforms pass every variadic argument on the stack
    pub apple: bool,
}

impl AArch64 {
    pub const STANDARD: AArch64 = AArch64 { apple: false };
    pub const APPLE: AArch64 = AArch64 { apple: true };
    pub const HOST: AArch64 = AArch64 {
        apple: cfg!(target_vendor = "apple"),
    };

    /// Number of members of a homogeneous floating-point aggregate, if `ty` is one.
    pub fn hfa_members(ty: &CType) -> Result<Option<usize>> {
        if !ty.is_aggregate() && !ty.is_array() {
            return Ok(None);
        }
        let pieces = leaves(ty)?;
        let first = match pieces.first() {
            Some(l) if l.float => *l,
            _ => return Ok(None),
        };
        let uniform = pieces.iter().all(|l| l.float && l.size == first.size);
        let count = pieces.len();
        Ok((uniform && (1..=4).contains(&count) && ty.size()? == count * first.size).then_some(count))
    }
}

impl AbiPolicy for AArch64 {
    fn convention(&self) -> &'static CallingConvention {
        &CONVENTION
    }

    fn classify(&self, ty: &CType) -> Result<Classification> {
        if ty.is_scalar() {
            return Ok(if ty.is_float() {
                Classification::float(1)
            } else {
                Classification::int(1)
            });
        }
        if let Some(n) = Self::hfa_members(ty)? {
            return Ok(Classification::float(n));
        }
        let size = ty.size()?;
        if size == 0 || size > 16 {
            return Ok(Classification::MEMORY);
        }
        Ok(Classification::int(size.div_ceil(8)))
    }

    fn variadic_on_stack(&self) -> bool {
        self.apple
    }
}
