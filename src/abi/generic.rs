//! Fallback policy for architectures without a dedicated module.
//!
//! libffi knows the real convention; this policy only needs to be
//! conservative about return slots and aggregate copies.

use super::{AbiPolicy, CallingConvention, Classification, WORD_SIZE};
use crate::ctype::CType;
use crate::error::Result;

static CONVENTION: CallingConvention = CallingConvention {
    name: "generic",
    int_arg_regs: &["a0", "a1", "a2", "a3", "a4", "a5", "a6", "a7"],
    float_arg_regs: &["fa0", "fa1", "fa2", "fa3", "fa4", "fa5", "fa6", "fa7"],
    shared_arg_slots: false,
    memory_by_reference: true,
    hidden_return_consumes_int_reg: true,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct Generic;

impl AbiPolicy for Generic {
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
        let size = ty.size()?;
        if size == 0 || size > 2 * WORD_SIZE {
            return Ok(Classification::MEMORY);
        }
        Ok(Classification::int(size.div_ceil(WORD_SIZE)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ArgClass;
    use crate::parser::parse_declarations;
    use crate::registry::TypeRegistry;

    #[test]
    fn test_two_word_limit() {
        let reg = TypeRegistry::new();
        parse_declarations(
            "struct pair { void *a, *b; }; struct triple { void *a, *b, *c; };",
            &reg,
        )
        .unwrap();
        assert_eq!(
            Generic.classify(&reg.lookup_tag("pair").unwrap()).unwrap(),
            Classification::int(2)
        );
        assert_eq!(
            Generic.classify(&reg.lookup_tag("triple").unwrap()).unwrap().class,
            ArgClass::Memory
        );
    }
}
