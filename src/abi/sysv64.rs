//! System V AMD64 ABI (Linux, macOS, BSD on x86-64)

use super::{leaves, AbiPolicy, CallingConvention, Classification};
use crate::ctype::CType;
use crate::error::Result;

static CONVENTION: CallingConvention = CallingConvention {
    name: "sysv64",
    int_arg_regs: &["rdi", "rsi", "rdx", "rcx", "r8", "r9"],
    float_arg_regs: &["xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7"],
    shared_arg_slots: false,
    memory_by_reference: false,
    hidden_return_consumes_int_reg: true,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct SysV64;

impl AbiPolicy for SysV64 {
    fn convention(&self) -> &'static CallingConvention {
        &CONVENTION
    }

    /// Aggregates up to 16 bytes are split into eightbytes; an eightbyte holding
    /// any integer data goes in a general register, otherwise in an SSE register.
    /// Larger or misaligned aggregates are passed in memory.
    fn classify(&self, ty: &CType) -> Result<Classification> {
        if ty.is_scalar() {
            return Ok(if ty.is_float() {
                Classification::float(1)
            } else {
                Classification::int(1)
            });
        }

        let size = ty.size()?;
        if size == 0 || size > 16 {
            return Ok(Classification::MEMORY);
        }
        if ty.layout().is_ok_and(|l| l.packed) {
            return Ok(Classification::MEMORY);
        }

        let pieces = leaves(ty)?;
        if pieces.iter().any(|l| l.offset % l.size.max(1) != 0) {
            return Ok(Classification::MEMORY);
        }

        let mut c = Classification::NONE;
        for eightbyte in 0..size.div_ceil(8) {
            let (lo, hi) = (eightbyte * 8, eightbyte * 8 + 8);
            let inside = pieces.iter().filter(|l| l.offset < hi && l.offset + l.size > lo);
            let mut any = false;
            let mut integer = false;
            for leaf in inside {
                any = true;
                integer |= !leaf.float;
            }
            if integer || !any {
                c.int_regs += 1;
            } else {
                c.float_regs += 1;
            }
        }
        Ok(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ArgClass;
    use crate::parser::parse_declarations;
    use crate::registry::TypeRegistry;

    fn tag(reg: &TypeRegistry, text: &str, name: &str) -> CType {
        parse_declarations(text, reg).unwrap();
        reg.lookup_tag(name).unwrap()
    }

    #[test]
    fn test_scalars() {
        let reg = TypeRegistry::new();
        let int = crate::parser::parse_type("int", &reg).unwrap();
        let dbl = crate::parser::parse_type("double", &reg).unwrap();
        assert_eq!(SysV64.classify(&int).unwrap(), Classification::int(1));
        assert_eq!(SysV64.classify(&dbl).unwrap(), Classification::float(1));
    }

    #[test]
    fn test_mixed_eightbytes() {
        let reg = TypeRegistry::new();
        let s = tag(&reg, "struct m { double d; int64_t i; };", "m");
        let c = SysV64.classify(&s).unwrap();
        assert_eq!((c.class, c.int_regs, c.float_regs), (ArgClass::Register, 1, 1));

        let f = tag(&reg, "struct f { float a, b, c; };", "f");
        assert_eq!(SysV64.classify(&f).unwrap(), Classification::float(2));

        let shared = tag(&reg, "struct s { float a; int32_t b; };", "s");
        assert_eq!(SysV64.classify(&shared).unwrap(), Classification::int(1));
    }

    #[test]
    fn test_large_and_packed_go_to_memory() {
        let reg = TypeRegistry::new();
        let big = tag(&reg, "struct big { int64_t a, b, c; };", "big");
        assert_eq!(SysV64.classify(&big).unwrap().class, ArgClass::Memory);
    }

    #[test]
    fn test_register_budget() {
        let reg = TypeRegistry::new();
        let decls = parse_declarations(
            "int many(int, int, int, int, int, int, int, double);",
            &reg,
        )
        .unwrap();
        let f = decls[0].ty.as_function().unwrap();
        let plan = SysV64.plan(f, &[]).unwrap();
        assert_eq!(plan.args[5].registers, vec!["r9"]);
        assert!(plan.args[6].on_stack);
        assert_eq!(plan.args[7].registers, vec!["xmm0"]);
        assert_eq!(plan.stack_args, 1);
    }

    #[test]
    fn test_hidden_return_pointer() {
        let reg = TypeRegistry::new();
        let decls = parse_declarations(
            "struct big { int64_t a, b, c; }; struct big make(int);",
            &reg,
        )
        .unwrap();
        let f = decls.iter().find(|d| d.name == "make").unwrap();
        let plan = SysV64.plan(f.ty.as_function().unwrap(), &[]).unwrap();
        assert_eq!(plan.ret, ArgClass::Memory);
        assert_eq!(plan.args[0].registers, vec!["rsi"]);
    }
}
