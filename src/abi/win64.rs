//! Windows x64 calling convention

use super::{AbiPolicy, CallingConvention, Classification};
use crate::ctype::CType;
use crate::error::Result;

static CONVENTION: CallingConvention = CallingConvention {
    name: "win64",
    int_arg_regs: &["rcx", "rdx", "r8", "r9"],
    float_arg_regs: &["xmm0", "xmm1", "xmm2", "xmm3"],
    shared_arg_slots: true,
    memory_by_reference: true,
    hidden_return_consumes_int_reg: true,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct Win64;

impl AbiPolicy for Win64 {
    fn convention(&self) -> &'static CallingConvention {
        &CONVENTION
    }

    /// Values of exactly 1, 2, 4 or 8 bytes travel in one slot; everything
    /// else is passed by reference to a caller-owned copy.
    fn classify(&self, ty: &CType) -> Result<Classification> {
        if ty.is_scalar() {
            return Ok(if ty.is_float() {
                Classification::float(1)
            } else {
                Classification::int(1)
            });
        }
        Ok(match ty.size()? {
            1 | 2 | 4 | 8 => Classification::int(1),
            _ => Classification::MEMORY,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ArgClass;
    use crate::parser::parse_declarations;
    use crate::registry::TypeRegistry;

    #[test]
    fn test_shared_slots() {
        let reg = TypeRegistry::new();
        let decls = parse_declarations("void f(int32_t, double, int32_t, double, int32_t);", &reg).unwrap();
        let plan = Win64.plan(decls[0].ty.as_function().unwrap(), &[]).unwrap();
        let regs: Vec<_> = plan.args.iter().map(|a| a.registers.clone()).collect();
        assert_eq!(regs[0], vec!["rcx"]);
        assert_eq!(regs[1], vec!["xmm1"]);
        assert_eq!(regs[2], vec!["r8"]);
        assert_eq!(regs[3], vec!["xmm3"]);
        assert!(plan.args[4].on_stack);
    }

    #[test]
    fn test_aggregate_sizes() {
        let reg = TypeRegistry::new();
        parse_declarations(
            "struct two { int32_t a, b; }; struct three { char c[3]; };",
            &reg,
        )
        .unwrap();
        let two = reg.lookup_tag("two").unwrap();
        let three = reg.lookup_tag("three").unwrap();
        assert_eq!(Win64.classify(&two).unwrap(), Classification::int(1));
        assert_eq!(Win64.classify(&three).unwrap().class, ArgClass::Memory);
    }
}
