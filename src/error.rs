//! Error types for cbridge operations.

use thiserror::Error;

/// Errors raised by the parser, registry, loader, dispatcher and value layer.
///
/// Every variant is recoverable. A hardware fault raised by native code during
/// a call is not represented here: once control crosses into foreign code the
/// process is at the mercy of that code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FfiError {
    /// Malformed declaration text
    #[error("syntax error at line {line}, column {column}: {message} (near '{fragment}')")]
    Syntax {
        message: String,
        fragment: String,
        line: usize,
        column: usize,
    },

    /// Identifier used as a type without a typedef
    #[error("unknown type name '{0}'")]
    UnknownType(String),

    /// Size or alignment requested for a type that has none (yet)
    #[error("type '{0}' is incomplete")]
    IncompleteType(String),

    /// Duplicate definition of a struct, union, enum, typedef or constant
    #[error("redefinition of '{name}': {reason}")]
    Redefinition { name: String, reason: String },

    /// A member list that cannot be laid out (misplaced flexible array, bad bit-field)
    #[error("invalid layout for '{name}': {reason}")]
    InvalidLayout { name: String, reason: String },

    /// No candidate for the library could be located
    #[error("library '{name}' not found: {detail}")]
    LibraryNotFound { name: String, detail: String },

    /// A candidate was located but the OS loader rejected it
    #[error("failed to load library '{path}': {detail}")]
    Load { path: String, detail: String },

    /// The library has been closed through this handle
    #[error("library '{0}' has been closed")]
    LibraryClosed(String),

    /// Export table does not contain the symbol
    #[error("symbol '{symbol}' not found in '{library}': {detail}")]
    SymbolNotFound {
        library: String,
        symbol: String,
        detail: String,
    },

    /// Name was never declared through `cdef`
    #[error("lib '{library}' has no function, global variable or constant named '{name}'")]
    NotDeclared { library: String, name: String },

    /// Attempted write to a function or constant
    #[error("cannot write to function or constant '{0}'")]
    ReadOnly(String),

    /// Argument is not assignment-compatible with the parameter
    #[error("argument {index}: expected '{expected}', got '{got}'")]
    ArgumentType {
        index: usize,
        expected: String,
        got: String,
    },

    /// Wrong number of arguments
    #[error("'{function}' expects {expected}{} argument(s), got {got}", or_more(.variadic))]
    ArgumentCount {
        function: String,
        expected: usize,
        got: usize,
        variadic: bool,
    },

    /// Reinterpretation would read past the underlying region
    #[error("cannot cast '{from}' ({available} bytes) to '{to}' ({required} bytes)")]
    CastSize {
        from: String,
        to: String,
        available: usize,
        required: usize,
    },

    /// No lossless mapping between the foreign and host value
    #[error("cannot represent '{ctype}' value: {reason}")]
    Unrepresentable { ctype: String, reason: String },

    /// Struct or union has no such member
    #[error("'{ctype}' has no field '{field}'")]
    NoSuchField { ctype: String, field: String },

    /// Array index past the end
    #[error("index {index} out of bounds for '{ctype}' of length {length}")]
    IndexOutOfBounds {
        ctype: String,
        index: usize,
        length: usize,
    },
}

impl FfiError {
    pub(crate) fn unrepresentable(ctype: impl Into<String>, reason: impl Into<String>) -> Self {
        FfiError::Unrepresentable {
            ctype: ctype.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_layout(name: impl Into<String>, reason: impl Into<String>) -> Self {
        FfiError::InvalidLayout {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn redefinition(name: impl Into<String>, reason: impl Into<String>) -> Self {
        FfiError::Redefinition {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

fn or_more(variadic: &bool) -> &'static str {
    if *variadic {
        " or more"
    } else {
        ""
    }
}

/// Result type for cbridge operations.
pub type Result<T> = std::result::Result<T, FfiError>;
