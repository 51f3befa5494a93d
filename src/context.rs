//! FFI context
//!
//! [`Ffi`] owns a type registry, the declarations collected by [`Ffi::cdef`]
//! and a library loader. [`Ffi::dlopen`] returns a [`Lib`] through which
//! declared functions, global variables and integer constants are reached
//! by name.
//!
//! ```no_run
//! use cbridge::{Ffi, HostValue};
//!
//! let ffi = Ffi::new();
//! ffi.cdef("double sin(double);")?;
//! let libm = ffi.dlopen("m")?;
//! let r = libm.call_host("sin", &[HostValue::Float(1.23)])?;
//! assert_eq!(r.to_host()?, HostValue::Float(1.23f64.sin()));
//! # Ok::<(), cbridge::FfiError>(())
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::abi::AbiPolicy;
use crate::config::FfiConfig;
use crate::ctype::{CType, Primitive};
use crate::dispatch::{CallSignature, Dispatcher};
use crate::error::{FfiError, Result};
use crate::loader::{DynamicLibrary, LibraryLoader, Symbol};
use crate::parser::{parse_declarations_with, parse_type_with, Declaration, DeclarationKind, ParseOptions};
use crate::registry::TypeRegistry;
use crate::value::{ForeignValue, HostValue};

type Declarations = Arc<RwLock<HashMap<String, Declaration>>>;

/// Entry point: declarations, types, values and libraries.
pub struct Ffi {
    registry: Arc<TypeRegistry>,
    declarations: Declarations,
    loader: Mutex<LibraryLoader>,
    options: ParseOptions,
    dispatcher: Dispatcher,
}

impl Default for Ffi {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Ffi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ffi")
            .field("declarations", &self.declarations.read().len())
            .field("options", &self.options)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl Ffi {
    pub fn new() -> Self {
        Self::with_registry(Arc::new(TypeRegistry::new()))
    }

    /// Context sharing an existing registry.
    pub fn with_registry(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            declarations: Arc::new(RwLock::new(HashMap::new())),
            loader: Mutex::new(LibraryLoader::new()),
            options: ParseOptions::default(),
            dispatcher: Dispatcher::new(),
        }
    }

    pub fn with_config(config: &FfiConfig) -> Self {
        let mut ffi = Self::new();
        ffi.loader = Mutex::new(LibraryLoader::with_config(&config.loader));
        ffi.options.pack = config.layout.pack();
        ffi
    }

    /// Use a different calling convention policy for calls made through
    /// libraries opened afterwards.
    pub fn set_abi(&mut self, abi: &'static dyn AbiPolicy) {
        self.dispatcher = Dispatcher::with_abi(abi);
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Parse a header fragment and record its functions, variables and
    /// constants. Redeclaring a name with the same type is accepted.
    pub fn cdef(&self, text: &str) -> Result<()> {
        let parsed = parse_declarations_with(text, &self.registry, self.options)?;
        let mut declarations = self.declarations.write();
        for decl in parsed {
            if decl.kind == DeclarationKind::Typedef {
                continue;
            }
            if let Some(old) = declarations.get(&decl.name) {
                if old.ty != decl.ty || old.kind != decl.kind {
                    return Err(FfiError::redefinition(
                        &decl.name,
                        format!("already declared as '{}'", old.ty.declare(&old.name)),
                    ));
                }
                continue;
            }
            declarations.insert(decl.name.clone(), decl);
        }
        Ok(())
    }

    pub fn declaration(&self, name: &str) -> Option<Declaration> {
        self.declarations.read().get(name).cloned()
    }

    /// Descriptor for a type spelled in C.
    pub fn type_of(&self, text: &str) -> Result<CType> {
        parse_type_with(text, &self.registry, self.options)
    }

    pub fn sizeof(&self, text: &str) -> Result<usize> {
        self.type_of(text)?.size()
    }

    pub fn alignof(&self, text: &str) -> Result<usize> {
        self.type_of(text)?.align()
    }

    /// Byte offset of a (possibly nested, `a.b`) field.
    pub fn offsetof(&self, text: &str, path: &str) -> Result<usize> {
        self.type_of(text)?.offset_of(path)
    }

    /// Zero-initialized value, optionally set from `init`.
    pub fn new_value(&self, text: &str, init: Option<&HostValue>) -> Result<ForeignValue> {
        let ty = self.type_of(text)?;
        match init {
            Some(value) => ForeignValue::from_host(&ty, value),
            None => ForeignValue::new(&ty),
        }
    }

    /// Zero-initialized flexible array, or struct with a flexible array
    /// member, holding `count` elements.
    pub fn new_array(&self, text: &str, count: usize) -> Result<ForeignValue> {
        ForeignValue::new_array(&self.type_of(text)?, count)
    }

    /// Reinterpret `value` as another type.
    pub fn cast(&self, text: &str, value: &ForeignValue) -> Result<ForeignValue> {
        value.cast(&self.type_of(text)?)
    }

    /// Pointer to `value`, keeping it alive.
    pub fn address_of(&self, value: &ForeignValue) -> Result<ForeignValue> {
        value.address_of(&self.registry.pointer_to(value.ctype()))
    }

    /// Open a shared library by path or bare name (`"m"`, `"c"`).
    pub fn dlopen(&self, name: &str) -> Result<Lib> {
        let library = self.loader.lock().load(name)?;
        Ok(self.bind(library))
    }

    /// Symbols of the running process and everything it has loaded.
    pub fn dlopen_self(&self) -> Result<Lib> {
        Ok(self.bind(Arc::new(DynamicLibrary::open_self()?)))
    }

    /// Close `lib` and drop it from the loader cache. The OS handle is
    /// released once values and signatures obtained from it are gone.
    pub fn dlclose(&self, lib: &Lib) {
        lib.close();
        self.loader.lock().unload(lib.name());
    }

    fn bind(&self, library: Arc<DynamicLibrary>) -> Lib {
        debug!("binding library '{}'", library.name());
        Lib {
            library,
            registry: Arc::clone(&self.registry),
            declarations: Arc::clone(&self.declarations),
            dispatcher: self.dispatcher,
            functions: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }
}

/// An opened library seen through the declarations of its [`Ffi`].
pub struct Lib {
    library: Arc<DynamicLibrary>,
    registry: Arc<TypeRegistry>,
    declarations: Declarations,
    dispatcher: Dispatcher,
    functions: RwLock<HashMap<String, Arc<CallSignature>>>,
    closed: AtomicBool,
}

impl fmt::Debug for Lib {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lib")
            .field("library", &self.library)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Lib {
    pub fn name(&self) -> &str {
        self.library.name()
    }

    pub fn library(&self) -> &Arc<DynamicLibrary> {
        &self.library
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Further lookups through this `Lib` fail with `LibraryClosed`.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("closing library '{}'", self.name());
            self.functions.write().clear();
        }
    }

    fn declared(&self, name: &str) -> Result<Declaration> {
        if self.is_closed() {
            return Err(FfiError::LibraryClosed(self.name().to_string()));
        }
        self.declarations
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| FfiError::NotDeclared {
                library: self.name().to_string(),
                name: name.to_string(),
            })
    }

    /// A declared function, resolved on first use.
    pub fn function(&self, name: &str) -> Result<Function> {
        let decl = self.declared(name)?;
        if decl.kind != DeclarationKind::Function {
            return Err(FfiError::unrepresentable(
                decl.ty.c_name(),
                format!("'{}' is not a function", name),
            ));
        }
        if let Some(signature) = self.functions.read().get(name) {
            return Ok(self.make_function(signature));
        }
        let symbol = Symbol::resolve(&self.library, name, &decl.ty)?;
        let signature = Arc::new(CallSignature::new(&symbol)?);
        let signature = Arc::clone(
            self.functions
                .write()
                .entry(name.to_string())
                .or_insert(signature),
        );
        Ok(self.make_function(&signature))
    }

    fn make_function(&self, signature: &Arc<CallSignature>) -> Function {
        Function {
            signature: Arc::clone(signature),
            registry: Arc::clone(&self.registry),
            dispatcher: self.dispatcher,
        }
    }

    pub fn call(&self, name: &str, args: &[ForeignValue]) -> Result<ForeignValue> {
        self.function(name)?.call(args)
    }

    pub fn call_host(&self, name: &str, args: &[HostValue]) -> Result<ForeignValue> {
        self.function(name)?.call_host(args)
    }

    /// A global variable viewed in place, or the value of a constant.
    pub fn global(&self, name: &str) -> Result<ForeignValue> {
        let decl = self.declared(name)?;
        match decl.kind {
            DeclarationKind::Variable => {
                let address = self.library.address_of(name)?;
                ForeignValue::in_library(&decl.ty, address, &self.library)
            }
            DeclarationKind::Constant(value) => ForeignValue::from_host(&decl.ty, &HostValue::Int(value)),
            _ => Err(FfiError::unrepresentable(
                decl.ty.c_name(),
                format!("'{}' is not a variable", name),
            )),
        }
    }

    pub fn read_global(&self, name: &str) -> Result<HostValue> {
        self.global(name)?.to_host()
    }

    pub fn write_global(&self, name: &str, value: &HostValue) -> Result<()> {
        let decl = self.declared(name)?;
        match decl.kind {
            DeclarationKind::Variable => self.global(name)?.set(value),
            _ => Err(FfiError::ReadOnly(name.to_string())),
        }
    }

    /// Value of a `#define` or enumerator.
    pub fn constant(&self, name: &str) -> Result<i64> {
        match self.declared(name)?.kind {
            DeclarationKind::Constant(value) => Ok(value),
            _ => Err(FfiError::unrepresentable(name, "not an integer constant")),
        }
    }

    /// Sorted names reachable through this library.
    pub fn dir(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .declarations
            .read()
            .values()
            .filter(|d| d.kind != DeclarationKind::Typedef)
            .map(|d| d.name.clone())
            .collect();
        names.sort();
        names
    }
}

/// A callable function of a [`Lib`]. Keeps its library loaded.
#[derive(Clone)]
pub struct Function {
    signature: Arc<CallSignature>,
    registry: Arc<TypeRegistry>,
    dispatcher: Dispatcher,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<cdata '{}' {}>",
            self.signature.function.c_name(),
            self.signature.name
        )
    }
}

impl Function {
    pub fn name(&self) -> &str {
        &self.signature.name
    }

    pub fn signature(&self) -> &CallSignature {
        &self.signature
    }

    pub fn call(&self, args: &[ForeignValue]) -> Result<ForeignValue> {
        self.dispatcher.call(&self.signature, args)
    }

    /// Call with host values. Variadic extras take the type C would give the
    /// literal: `int` or `long long`, `unsigned` or `unsigned long long`,
    /// `double`, `void *`, or `char *` for bytes.
    pub fn call_host(&self, args: &[HostValue]) -> Result<ForeignValue> {
        let function = self.signature.function_type();
        let fixed = function.params.len();
        let arity_ok = if function.variadic {
            args.len() >= fixed
        } else {
            args.len() == fixed
        };
        if !arity_ok {
            return Err(FfiError::ArgumentCount {
                function: self.signature.name.clone(),
                expected: fixed,
                got: args.len(),
                variadic: function.variadic,
            });
        }
        let extra = args[fixed..]
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let ty = self.variadic_type(fixed + i, value)?;
                ForeignValue::from_host(&ty, value)
            })
            .collect::<Result<Vec<_>>>()?;
        self.dispatcher.call_host(&self.signature, &args[..fixed], &extra)
    }

    fn variadic_type(&self, index: usize, value: &HostValue) -> Result<CType> {
        let reg = &self.registry;
        Ok(match value {
            HostValue::Int(v) if i32::try_from(*v).is_ok() => reg.primitive(Primitive::Int),
            HostValue::Int(_) => reg.primitive(Primitive::LongLong),
            HostValue::UInt(v) if u32::try_from(*v).is_ok() => reg.primitive(Primitive::UInt),
            HostValue::UInt(_) => reg.primitive(Primitive::ULongLong),
            HostValue::Bool(_) => reg.primitive(Primitive::Int),
            HostValue::Float(_) => reg.primitive(Primitive::Double),
            HostValue::Pointer(_) => reg.pointer_to(&reg.void()),
            HostValue::Bytes(_) => reg.pointer_to(&reg.primitive(Primitive::Char)),
            HostValue::Void => {
                return Err(FfiError::ArgumentType {
                    index,
                    expected: "a value".to_string(),
                    got: value.kind_name().to_string(),
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_queries() {
        let ffi = Ffi::new();
        ffi.cdef("struct pt { char tag; int x; };").unwrap();
        assert_eq!(ffi.sizeof("struct pt").unwrap(), 8);
        assert_eq!(ffi.alignof("struct pt").unwrap(), 4);
        assert_eq!(ffi.offsetof("struct pt", "x").unwrap(), 4);
        assert_eq!(ffi.type_of("int *").unwrap(), ffi.type_of("int*").unwrap());
    }

    #[test]
    fn test_cdef_redeclaration() {
        let ffi = Ffi::new();
        ffi.cdef("int abs(int);").unwrap();
        ffi.cdef("int abs(int);").unwrap();
        assert!(matches!(
            ffi.cdef("long abs(long);"),
            Err(FfiError::Redefinition { .. })
        ));
    }

    #[test]
    fn test_constants_and_readonly() {
        let ffi = Ffi::new();
        ffi.cdef("#define BUFSIZE 512\nenum color { RED, GREEN = 5 };\nint abs(int);")
            .unwrap();
        let lib = ffi.dlopen_self().unwrap();
        assert_eq!(lib.constant("BUFSIZE").unwrap(), 512);
        assert_eq!(lib.constant("GREEN").unwrap(), 5);
        assert_eq!(lib.read_global("GREEN").unwrap(), HostValue::Int(5));
        assert!(matches!(
            lib.write_global("BUFSIZE", &HostValue::Int(1)),
            Err(FfiError::ReadOnly(_))
        ));
        assert!(matches!(
            lib.write_global("abs", &HostValue::Int(1)),
            Err(FfiError::ReadOnly(_))
        ));
        assert_eq!(lib.dir(), vec!["BUFSIZE", "GREEN", "RED", "abs"]);
    }

    #[test]
    fn test_not_declared_and_closed() {
        let ffi = Ffi::new();
        ffi.cdef("int abs(int);").unwrap();
        let lib = ffi.dlopen_self().unwrap();
        assert!(matches!(lib.function("labs"), Err(FfiError::NotDeclared { .. })));

        let abs = lib.function("abs").unwrap();
        ffi.dlclose(&lib);
        assert!(matches!(lib.function("abs"), Err(FfiError::LibraryClosed(_))));
        // handed-out functions keep the code mapped
        let r = abs.call_host(&[HostValue::Int(-7)]).unwrap();
        assert_eq!(r.to_host().unwrap(), HostValue::Int(7));
    }
}
