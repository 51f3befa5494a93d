//! cbridge - C declarations in, native calls out
//!
//! Loads native shared libraries at run time, parses C declaration syntax into
//! type descriptors and calls exported functions by name, converting between
//! Rust values and the platform calling convention.
//!
//! # Features
//!
//! - **Declaration parser**: primitives, pointers, arrays, structs and unions
//!   (bit-fields, anonymous members, flexible array members), enums, typedefs,
//!   function pointers, `#define` integer constants
//! - **Type registry**: structurally identical types share one descriptor;
//!   named structs may be declared before they are defined
//! - **Layout**: size, alignment and field offsets as the host C compiler
//!   computes them, with optional packing
//! - **Dispatch**: argument checking and conversion, then a libffi call under
//!   a per-architecture ABI policy
//!
//! # Example
//!
//! ```no_run
//! use cbridge::{Ffi, HostValue};
//!
//! let ffi = Ffi::new();
//! ffi.cdef("typedef struct { int quot; int rem; } div_t; div_t div(int, int);")?;
//! let libc = ffi.dlopen("c")?;
//! let r = libc.call_host("div", &[HostValue::Int(17), HostValue::Int(5)])?;
//! assert_eq!(r.field("quot")?.to_host()?, HostValue::Int(3));
//! # Ok::<(), cbridge::FfiError>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  C declarations │  "struct point { int x, y; }; int f(struct point *);"
//! └────────┬────────┘
//!          │ parser
//!          ▼
//! ┌─────────────────┐
//! │  TypeRegistry   │  interned CType descriptors, tags, typedefs, constants
//! └────────┬────────┘
//!          │
//!     ┌────┴─────────────┐
//!     ▼                  ▼
//! ┌──────────────┐  ┌────────────┐
//! │ ForeignValue │  │   loader   │  dlopen + cached symbol lookup
//! └──────┬───────┘  └─────┬──────┘
//!        └───────┬────────┘
//!                ▼
//! ┌─────────────────────┐
//! │  Dispatcher + ABI   │  libffi call
//! └─────────────────────┘
//! ```

#![warn(clippy::all)]

pub mod abi;
pub mod config;
pub mod context;
pub mod ctype;
pub mod dispatch;
pub mod error;
pub mod loader;
pub mod parser;
pub mod registry;
pub mod value;

// Re-export commonly used types
pub use abi::{abi_by_name, host_abi, AbiPolicy, ArgClass, CallPlan, Classification};
pub use config::{ConfigError, FfiConfig};
pub use context::{Ffi, Function, Lib};
pub use ctype::{AggregateKind, CType, CTypeKind, Field, Member, Primitive, TypeTag};
pub use dispatch::{CallSignature, Dispatcher};
pub use error::{FfiError, Result};
pub use loader::{DynamicLibrary, LibraryLoader, Symbol};
pub use parser::{parse_declarations, parse_type, Declaration, DeclarationKind, ParseOptions};
pub use registry::TypeRegistry;
pub use value::{ForeignValue, HostValue};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
