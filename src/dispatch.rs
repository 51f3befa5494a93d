//! Call Dispatcher
//!
//! Calls a native function through libffi given its declared type, its
//! address and argument values. Every argument is checked and converted
//! before any native code runs; only then is a `Cif` built and the call made.
//!
//! ```text
//! args ──► arity ──► coerce/promote ──► AbiPolicy::plan ──► libffi Cif ──► ffi_call
//!                                                                           │
//! ForeignValue ◄── narrow return slot ◄─────────────────────────────────────┘
//! ```
//!
//! A fault raised by the native code itself is not recoverable here.

use std::ffi::c_void;
use std::sync::Arc;

use libffi::middle::{Cif, CodePtr, Type};
use log::debug;

use crate::abi::{self, AbiPolicy, ArgClass, WORD_SIZE};
use crate::ctype::{AggregateLayout, CType, CTypeKind, FunctionType, Primitive, TypeTag};
use crate::error::{FfiError, Result};
use crate::loader::{DynamicLibrary, Symbol};
use crate::value::{ForeignValue, HostValue};

/// A function type bound to a resolved address.
#[derive(Debug, Clone)]
pub struct CallSignature {
    pub name: String,
    pub function: CType,
    pub address: usize,
    /// Keeps the code mapped while the signature lives
    library: Option<Arc<DynamicLibrary>>,
}

impl CallSignature {
    pub fn new(symbol: &Symbol) -> Result<Self> {
        if !symbol.ctype.is_function() {
            return Err(FfiError::unrepresentable(
                symbol.ctype.c_name(),
                format!("'{}' is not declared as a function", symbol.name),
            ));
        }
        Ok(Self {
            name: symbol.name.clone(),
            function: symbol.ctype.clone(),
            address: symbol.address,
            library: Some(Arc::clone(symbol.library())),
        })
    }

    /// Bind a function type to an arbitrary code address.
    ///
    /// # Safety
    ///
    /// `address` must be the entry point of a function with exactly this
    /// signature, and stay valid while the signature is used.
    pub unsafe fn from_raw(name: &str, function: &CType, address: usize) -> Result<Self> {
        if !function.is_function() {
            return Err(FfiError::unrepresentable(function.c_name(), "not a function type"));
        }
        Ok(Self {
            name: name.to_string(),
            function: function.clone(),
            address,
            library: None,
        })
    }

    pub fn function_type(&self) -> &FunctionType {
        match self.function.kind() {
            CTypeKind::Function(f) => f,
            // constructors only accept function types
            _ => unreachable!("call signature over non-function type"),
        }
    }

    pub fn library(&self) -> Option<&Arc<DynamicLibrary>> {
        self.library.as_ref()
    }
}

/// Performs calls under one ABI policy.
#[derive(Clone, Copy)]
pub struct Dispatcher {
    abi: &'static dyn AbiPolicy,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("abi", &self.abi.name()).finish()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Dispatcher for the host ABI.
    pub fn new() -> Self {
        Self {
            abi: abi::host_abi(),
        }
    }

    pub fn with_abi(abi: &'static dyn AbiPolicy) -> Self {
        Self { abi }
    }

    pub fn abi(&self) -> &'static dyn AbiPolicy {
        self.abi
    }

    /// Check and convert `args` for `signature` without calling anything.
    pub fn prepare(&self, signature: &CallSignature, args: &[ForeignValue]) -> Result<Vec<ForeignValue>> {
        let function = signature.function_type();
        let fixed = function.params.len();
        let arity_ok = if function.variadic {
            args.len() >= fixed
        } else {
            args.len() == fixed
        };
        if !arity_ok {
            return Err(FfiError::ArgumentCount {
                function: signature.name.clone(),
                expected: fixed,
                got: args.len(),
                variadic: function.variadic,
            });
        }

        let mut prepared = Vec::with_capacity(args.len());
        for (index, (param, arg)) in function.params.iter().zip(args).enumerate() {
            prepared.push(coerce(param, arg, index)?);
        }
        for (index, arg) in args.iter().enumerate().skip(fixed) {
            prepared.push(promote(arg, index)?);
        }
        if !function.result.is_void() {
            function.result.size()?;
            if function.result.is_array() {
                return Err(FfiError::unrepresentable(
                    function.result.c_name(),
                    "functions cannot return arrays",
                ));
            }
        }
        Ok(prepared)
    }

    /// Call `signature` with `args`.
    pub fn call(&self, signature: &CallSignature, args: &[ForeignValue]) -> Result<ForeignValue> {
        let mut prepared = self.prepare(signature, args)?;
        let function = signature.function_type();
        let fixed = function.params.len();

        let extra: Vec<CType> = prepared[fixed..].iter().map(|v| v.ctype().clone()).collect();
        let plan = self.abi.plan(function, &extra)?;
        debug!(
            "calling '{}' at {:#x} ({}): {:?}",
            signature.name,
            signature.address,
            self.abi.name(),
            plan
        );

        // memory-class aggregates travel as private copies the callee may clobber
        for value in prepared.iter_mut() {
            if value.ctype().is_aggregate() && self.abi.classify(value.ctype())?.class == ArgClass::Memory {
                *value = value.detached_copy()?;
            }
        }

        let arg_types = prepared
            .iter()
            .map(|v| ffi_type(v.ctype()))
            .collect::<Result<Vec<_>>>()?;
        let ret_type = ffi_type(&function.result)?;
        let cif = if function.variadic {
            Cif::new_variadic(arg_types, fixed, ret_type)
        } else {
            Cif::new(arg_types, ret_type)
        };

        let mut ret_slot = vec![0u64; plan.return_slot.div_ceil(8).max(1)];
        let mut arg_ptrs: Vec<*mut c_void> = prepared.iter().map(|v| v.as_ptr() as *mut c_void).collect();
        let code = CodePtr::from_ptr(signature.address as *const c_void);

        // Safety: every argument was checked against the declared signature and
        // lives in `prepared` until after the call; the return slot is at least
        // as large as libffi writes for this return type.
        unsafe {
            libffi::raw::ffi_call(
                cif.as_raw_ptr(),
                Some(*code.as_safe_fun()),
                ret_slot.as_mut_ptr() as *mut c_void,
                arg_ptrs.as_mut_ptr(),
            );
        }
        drop(prepared);

        unmarshal(&function.result, &ret_slot, plan.return_slot)
    }

    /// Call with host values, converted to the parameter types.
    /// Variadic extras must already be foreign values of their intended type.
    pub fn call_host(
        &self,
        signature: &CallSignature,
        args: &[HostValue],
        extra: &[ForeignValue],
    ) -> Result<ForeignValue> {
        let function = signature.function_type();
        if args.len() != function.params.len() {
            return Err(FfiError::ArgumentCount {
                function: signature.name.clone(),
                expected: function.params.len(),
                got: args.len() + extra.len(),
                variadic: function.variadic,
            });
        }
        let mut values = Vec::with_capacity(args.len() + extra.len());
        for (index, (param, arg)) in function.params.iter().zip(args).enumerate() {
            values.push(ForeignValue::from_host(param, arg).map_err(|e| argument_error(index, param, e))?);
        }
        values.extend(extra.iter().cloned());
        self.call(signature, &values)
    }
}

fn argument_error(index: usize, param: &CType, err: FfiError) -> FfiError {
    match err {
        FfiError::Unrepresentable { ctype, reason } => FfiError::ArgumentType {
            index,
            expected: param.c_name().to_string(),
            got: format!("{} ({})", ctype, reason),
        },
        other => other,
    }
}

fn type_error(index: usize, param: &CType, arg: &CType) -> FfiError {
    FfiError::ArgumentType {
        index,
        expected: param.c_name().to_string(),
        got: arg.c_name().to_string(),
    }
}

/// Integer value of an integer-like argument; plain `char` arrives as bytes.
fn integer_host(arg: &ForeignValue) -> Result<HostValue> {
    Ok(match arg.to_host()? {
        HostValue::Bytes(b) if b.len() == 1 => HostValue::Int(b[0] as std::ffi::c_char as i64),
        other => other,
    })
}

/// Convert `arg` to the parameter type, or fail with `ArgumentType`.
fn coerce(param: &CType, arg: &ForeignValue, index: usize) -> Result<ForeignValue> {
    let got = arg.ctype();
    if got == param {
        return Ok(arg.clone());
    }

    if param.is_integer() && got.is_integer() {
        let host = integer_host(arg)?;
        return ForeignValue::from_host(param, &host).map_err(|e| argument_error(index, param, e));
    }
    if param.is_float() && (got.is_float() || got.is_integer()) {
        let host = integer_host(arg)?;
        return ForeignValue::from_host(param, &host).map_err(|e| argument_error(index, param, e));
    }

    if let Some(pointee) = param.pointee() {
        if let Some(item) = got.item() {
            if pointers_compatible(pointee, item) {
                return arg.address_of(param);
            }
        } else if let Some(target) = got.pointee() {
            if pointers_compatible(pointee, target) {
                return arg.cast(param);
            }
        }
    }

    // structs and unions must be the identical type; anything else is a mismatch
    Err(type_error(index, param, got))
}

fn pointers_compatible(expected: &CType, got: &CType) -> bool {
    expected == got
        || expected.is_void()
        || got.is_void()
        || (expected.is_char_like() && got.is_char_like())
        || (expected.c_name() == got.c_name() && expected.tag() == got.tag())
}

/// C default argument promotions for variadic extras.
fn promote(arg: &ForeignValue, index: usize) -> Result<ForeignValue> {
    let ty = arg.ctype();
    if let Some(p) = ty.scalar_primitive() {
        if p == Primitive::Float {
            let double = CType::primitive(Primitive::Double);
            return ForeignValue::from_host(&double, &arg.to_host()?);
        }
        if p.promotes_to_int() {
            let int = CType::primitive(Primitive::Int);
            return ForeignValue::from_host(&int, &integer_host(arg)?)
                .map_err(|e| argument_error(index, &int, e));
        }
        return Ok(arg.clone());
    }
    if let Some(item) = ty.item() {
        return arg.address_of(&CType::pointer_to(item));
    }
    if ty.is_void() || ty.is_function() {
        return Err(FfiError::ArgumentType {
            index,
            expected: "a complete object type".to_string(),
            got: ty.c_name().to_string(),
        });
    }
    Ok(arg.clone())
}

/// libffi description of a value type.
pub(crate) fn ffi_type(ty: &CType) -> Result<Type> {
    match ty.kind() {
        CTypeKind::Void => Ok(Type::void()),
        CTypeKind::Primitive(p) => Ok(primitive_type(*p)),
        CTypeKind::Enum(e) => Ok(primitive_type(e.base)),
        CTypeKind::Pointer(_) => Ok(Type::pointer()),
        CTypeKind::Aggregate(_) => aggregate_type(ty),
        CTypeKind::Array { .. } | CTypeKind::Function(_) => Err(FfiError::unrepresentable(
            ty.c_name(),
            "cannot be passed or returned by value",
        )),
    }
}

fn primitive_type(p: Primitive) -> Type {
    if p.is_float() {
        return if p.size() == 4 { Type::f32() } else { Type::f64() };
    }
    match (p.size(), p.is_signed()) {
        (1, true) => Type::i8(),
        (1, false) => Type::u8(),
        (2, true) => Type::i16(),
        (2, false) => Type::u16(),
        (4, true) => Type::i32(),
        (4, false) => Type::u32(),
        (_, true) => Type::i64(),
        (_, false) => Type::u64(),
    }
}

fn aggregate_type(ty: &CType) -> Result<Type> {
    let layout = ty.layout()?;
    if layout.size == 0 {
        return Err(FfiError::unrepresentable(
            ty.c_name(),
            "empty aggregates cannot be passed or returned by value",
        ));
    }
    if ty.tag() == TypeTag::Union || layout.has_bitfields || layout.packed {
        return Ok(Type::structure(chunk_types(ty, layout)?));
    }
    let mut fields = Vec::with_capacity(layout.members.len());
    for member in &layout.members {
        push_member_type(&member.ty, &mut fields)?;
    }
    Ok(Type::structure(fields))
}

fn push_member_type(ty: &CType, out: &mut Vec<Type>) -> Result<()> {
    match ty.kind() {
        CTypeKind::Array { item, length } => {
            for _ in 0..length.unwrap_or(0) {
                push_member_type(item, out)?;
            }
            Ok(())
        }
        _ => {
            out.push(ffi_type(ty)?);
            Ok(())
        }
    }
}

/// Overlapping or irregular members are described as a run of equal chunks
/// with the aggregate's size and alignment: floats when every scalar is the
/// same float type, integers otherwise.
fn chunk_types(ty: &CType, layout: &AggregateLayout) -> Result<Vec<Type>> {
    let pieces = abi::leaves(ty)?;
    if let Some(first) = pieces.first().filter(|l| l.float) {
        if pieces.iter().all(|l| l.float && l.size == first.size) && layout.size % first.size == 0 {
            let float = if first.size == 4 { Type::f32() } else { Type::f64() };
            return Ok(vec![float; layout.size / first.size]);
        }
    }
    let (unit, chunk) = match layout.align {
        8.. => (8, Type::u64()),
        4 => (4, Type::u32()),
        2 => (2, Type::u16()),
        _ => (1, Type::u8()),
    };
    Ok(vec![chunk; layout.size / unit])
}

/// Copy the result out of the return slot.
fn unmarshal(result: &CType, slot: &[u64], slot_size: usize) -> Result<ForeignValue> {
    if result.is_void() {
        return Ok(ForeignValue::void(result));
    }
    let size = result.size()?;
    let bytes: Vec<u8> = slot.iter().flat_map(|w| w.to_ne_bytes()).collect();
    // integral returns are widened to a full word; on big-endian targets the
    // value sits in the high-address end of that word
    let offset = if cfg!(target_endian = "big") && result.is_integer() && size < WORD_SIZE {
        slot_size.min(WORD_SIZE) - size
    } else {
        0
    };
    ForeignValue::wrap(result, &bytes[offset..offset + size])
}
