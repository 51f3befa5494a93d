//! ABI Policy
//!
//! Per-architecture rules for how arguments and return values travel between
//! caller and callee. libffi performs the actual register shuffling; the policy
//! decides what the dispatcher must prepare around it: which aggregates need a
//! private copy, how large the return slot is, and how registers are budgeted
//! (reported in call plans for diagnostics).
//!
//! # Supported Conventions
//!
//! | Convention | Targets | Integer regs | Float regs | Notes |
//! |------------|---------|--------------|------------|-------|
//! | System V AMD64 | x86-64 Linux, macOS, BSD | 6 | 8 | eightbyte classification |
//! | AAPCS64 | AArch64 | 8 | 8 | homogeneous float aggregates, Apple variadics on stack |
//! | Win64 | x86-64 Windows | 4 shared slots | | aggregates of 1, 2, 4, 8 bytes by value |
//! | Generic | everything else | 8 | 8 | aggregates up to two words in registers |

pub mod aarch64;
pub mod generic;
pub mod sysv64;
pub mod win64;

use crate::ctype::{CType, CTypeKind, FunctionType};
use crate::error::{FfiError, Result};

pub use aarch64::AArch64;
pub use generic::Generic;
pub use sysv64::SysV64;
pub use win64::Win64;

/// Machine word size of the host.
pub const WORD_SIZE: usize = std::mem::size_of::<usize>();

/// Where a value travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgClass {
    /// In one or more registers
    Register,
    /// In memory: on the stack, or through a hidden pointer
    Memory,
}

/// Result of classifying one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub class: ArgClass,
    /// General purpose registers needed when passed in registers
    pub int_regs: usize,
    /// Floating point / vector registers needed when passed in registers
    pub float_regs: usize,
}

impl Classification {
    pub const NONE: Classification = Classification {
        class: ArgClass::Register,
        int_regs: 0,
        float_regs: 0,
    };

    pub const MEMORY: Classification = Classification {
        class: ArgClass::Memory,
        int_regs: 0,
        float_regs: 0,
    };

    pub fn int(n: usize) -> Self {
        Classification {
            class: ArgClass::Register,
            int_regs: n,
            float_regs: 0,
        }
    }

    pub fn float(n: usize) -> Self {
        Classification {
            class: ArgClass::Register,
            int_regs: 0,
            float_regs: n,
        }
    }
}

/// Register tables of a calling convention.
#[derive(Debug)]
pub struct CallingConvention {
    pub name: &'static str,
    pub int_arg_regs: &'static [&'static str],
    pub float_arg_regs: &'static [&'static str],
    /// Integer and float arguments consume the same positional slots (Win64)
    pub shared_arg_slots: bool,
    /// Memory-class arguments are passed as a pointer to a caller-owned copy
    pub memory_by_reference: bool,
    /// The hidden struct-return pointer takes the first integer register
    pub hidden_return_consumes_int_reg: bool,
}

/// How one argument is placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgPlacement {
    pub class: ArgClass,
    pub registers: Vec<&'static str>,
    pub on_stack: bool,
}

/// Placement of every argument and the return value of one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallPlan {
    pub args: Vec<ArgPlacement>,
    pub ret: ArgClass,
    pub return_slot: usize,
    pub stack_args: usize,
}

/// Per-architecture calling convention rules.
pub trait AbiPolicy: Send + Sync {
    fn name(&self) -> &'static str {
        self.convention().name
    }

    fn convention(&self) -> &'static CallingConvention;

    /// Classify an argument passed by value.
    fn classify(&self, ty: &CType) -> Result<Classification>;

    /// Classify a return value.
    fn classify_return(&self, ty: &CType) -> Result<Classification> {
        if ty.is_void() {
            return Ok(Classification::NONE);
        }
        self.classify(ty)
    }

    /// Variadic arguments always go on the stack (Apple AArch64).
    fn variadic_on_stack(&self) -> bool {
        false
    }

    /// Bytes to reserve for the return value. Scalars narrower than a machine
    /// word get a full word, which the callee may write in its entirety.
    fn return_slot_size(&self, ty: &CType) -> Result<usize> {
        if ty.is_void() {
            return Ok(0);
        }
        let size = ty.size()?;
        Ok(size.max(WORD_SIZE).div_ceil(WORD_SIZE) * WORD_SIZE)
    }

    /// Assign registers to every argument of a call. `extra` are the types of
    /// variadic arguments beyond the fixed parameters.
    fn plan(&self, function: &FunctionType, extra: &[CType]) -> Result<CallPlan> {
        let conv = self.convention();
        let ret = self.classify_return(&function.result)?;
        let mut int_used = 0;
        let mut float_used = 0;
        let mut slot = 0;
        let mut stack_args = 0;

        if ret.class == ArgClass::Memory && conv.hidden_return_consumes_int_reg {
            int_used += 1;
            slot += 1;
        }

        let fixed = function.params.len();
        let mut args = Vec::with_capacity(fixed + extra.len());
        for (index, ty) in function.params.iter().chain(extra).enumerate() {
            let mut c = self.classify(ty)?;
            if c.class == ArgClass::Memory && conv.memory_by_reference {
                // the pointer to the copy travels like an integer
                c = Classification::int(1);
            }
            let forced_stack = index >= fixed && self.variadic_on_stack();

            let placement = if c.class == ArgClass::Memory || forced_stack {
                None
            } else if conv.shared_arg_slots {
                let regs = if c.float_regs > 0 { conv.float_arg_regs } else { conv.int_arg_regs };
                let taken = regs.get(slot).map(|r| vec![*r]);
                slot += 1;
                taken
            } else if int_used + c.int_regs <= conv.int_arg_regs.len()
                && float_used + c.float_regs <= conv.float_arg_regs.len()
            {
                let mut regs = Vec::with_capacity(c.int_regs + c.float_regs);
                regs.extend_from_slice(&conv.int_arg_regs[int_used..int_used + c.int_regs]);
                regs.extend_from_slice(&conv.float_arg_regs[float_used..float_used + c.float_regs]);
                int_used += c.int_regs;
                float_used += c.float_regs;
                Some(regs)
            } else {
                None
            };

            args.push(match placement {
                Some(registers) => ArgPlacement {
                    class: c.class,
                    registers,
                    on_stack: false,
                },
                None => {
                    stack_args += 1;
                    ArgPlacement {
                        class: c.class,
                        registers: Vec::new(),
                        on_stack: true,
                    }
                }
            });
        }

        Ok(CallPlan {
            args,
            ret: ret.class,
            return_slot: self.return_slot_size(&function.result)?,
            stack_args,
        })
    }
}

/// Scalar piece of a value, used by aggregate classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Leaf {
    pub offset: usize,
    pub size: usize,
    pub float: bool,
}

/// Flatten `ty` into its scalar leaves at their byte offsets.
pub(crate) fn leaves(ty: &CType) -> Result<Vec<Leaf>> {
    let mut out = Vec::new();
    collect_leaves(ty, 0, &mut out)?;
    Ok(out)
}

fn collect_leaves(ty: &CType, base: usize, out: &mut Vec<Leaf>) -> Result<()> {
    match ty.kind() {
        CTypeKind::Primitive(_) | CTypeKind::Enum(_) | CTypeKind::Pointer(_) => {
            out.push(Leaf {
                offset: base,
                size: ty.size()?,
                float: ty.is_float(),
            });
        }
        CTypeKind::Array { item, length } => {
            let step = item.size()?;
            for i in 0..length.unwrap_or(0) {
                collect_leaves(item, base + i * step, out)?;
            }
        }
        CTypeKind::Aggregate(_) => {
            for field in &ty.layout()?.members {
                if field.bitfield.is_some() {
                    out.push(Leaf {
                        offset: base + field.offset,
                        size: field.ty.size()?,
                        float: false,
                    });
                } else {
                    collect_leaves(&field.ty, base + field.offset, out)?;
                }
            }
        }
        CTypeKind::Void | CTypeKind::Function(_) => {
            return Err(FfiError::unrepresentable(
                ty.c_name(),
                "cannot be passed by value",
            ))
        }
    }
    Ok(())
}

/// Policy for the host the crate was built for.
pub fn host_abi() -> &'static dyn AbiPolicy {
    #[cfg(all(target_arch = "x86_64", not(windows)))]
    {
        &SysV64
    }
    #[cfg(all(target_arch = "x86_64", windows))]
    {
        &Win64
    }
    #[cfg(target_arch = "aarch64")]
    {
        &AArch64::HOST
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        &Generic
    }
}

/// Look up a policy by convention name, for tooling and tests.
pub fn abi_by_name(name: &str) -> Option<&'static dyn AbiPolicy> {
    let policy: &'static dyn AbiPolicy = match name {
        "sysv64" => &SysV64,
        "aapcs64" => &AArch64::STANDARD,
        "aapcs64-apple" => &AArch64::APPLE,
        "win64" => &Win64,
        "generic" => &Generic,
        _ => return None,
    };
    Some(policy)
}
