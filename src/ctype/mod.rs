//! C Type Descriptor Model
//!
//! A [`CType`] is a cheap, clonable handle to an immutable type descriptor.
//! Descriptors are normally obtained from a [`TypeRegistry`](crate::TypeRegistry),
//! which guarantees that structurally identical pointer, array and function
//! types share one instance. Equality between handles is identity.
//!
//! Structs and unions are nominal. Their body is filled in at most once, so a
//! handle taken while the aggregate was only forward declared observes the
//! completed layout afterwards.

pub mod layout;
pub mod primitive;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::{FfiError, Result};

pub use layout::{AggregateLayout, BitField, Field, Member};
pub use primitive::{Primitive, PrimitiveClass};

/// Discriminant of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Void,
    Primitive,
    Pointer,
    Array,
    Struct,
    Union,
    Enum,
    Function,
}

/// Struct or union.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    Struct,
    Union,
}

impl AggregateKind {
    pub fn keyword(self) -> &'static str {
        match self {
            AggregateKind::Struct => "struct",
            AggregateKind::Union => "union",
        }
    }
}

/// A struct or union; the body is set once by the registry.
#[derive(Debug)]
pub struct Aggregate {
    kind: AggregateKind,
    name: String,
    body: OnceCell<AggregateLayout>,
}

impl Aggregate {
    pub fn kind(&self) -> AggregateKind {
        self.kind
    }

    /// Tag name, or a synthesized `$N` name for anonymous aggregates.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_anonymous(&self) -> bool {
        self.name.starts_with('$')
    }

    /// The layout, once defined.
    pub fn layout(&self) -> Option<&AggregateLayout> {
        self.body.get()
    }

    pub(crate) fn complete(&self, layout: AggregateLayout) -> std::result::Result<(), AggregateLayout> {
        self.body.set(layout)
    }
}

/// An enum with its enumerators and underlying integer type.
#[derive(Debug)]
pub struct EnumType {
    pub name: String,
    pub enumerators: Vec<(String, i64)>,
    pub base: Primitive,
}

/// A function signature.
#[derive(Debug)]
pub struct FunctionType {
    pub result: CType,
    pub params: Vec<CType>,
    pub variadic: bool,
}

#[derive(Debug)]
pub enum CTypeKind {
    Void,
    Primitive(Primitive),
    Pointer(CType),
    /// `length == None` is a flexible array (`T[]` or `T[0]`)
    Array {
        item: CType,
        length: Option<usize>,
    },
    Aggregate(Aggregate),
    Enum(EnumType),
    Function(FunctionType),
}

#[derive(Debug)]
struct TypeNode {
    kind: CTypeKind,
    c_name: String,
}

/// Handle to an immutable C type descriptor.
#[derive(Clone)]
pub struct CType(Arc<TypeNode>);

impl CType {
    fn from_kind(kind: CTypeKind) -> Self {
        let c_name = spell(&kind, "");
        CType(Arc::new(TypeNode { kind, c_name }))
    }

    pub fn void() -> Self {
        Self::from_kind(CTypeKind::Void)
    }

    pub fn primitive(p: Primitive) -> Self {
        Self::from_kind(CTypeKind::Primitive(p))
    }

    pub fn pointer_to(pointee: &CType) -> Self {
        Self::from_kind(CTypeKind::Pointer(pointee.clone()))
    }

    pub fn array_of(item: &CType, length: Option<usize>) -> Self {
        Self::from_kind(CTypeKind::Array {
            item: item.clone(),
            length,
        })
    }

    pub fn function(result: &CType, params: Vec<CType>, variadic: bool) -> Self {
        Self::from_kind(CTypeKind::Function(FunctionType {
            result: result.clone(),
            params,
            variadic,
        }))
    }

    pub(crate) fn new_aggregate(kind: AggregateKind, name: &str) -> Self {
        Self::from_kind(CTypeKind::Aggregate(Aggregate {
            kind,
            name: name.to_string(),
            body: OnceCell::new(),
        }))
    }

    pub(crate) fn new_enum(name: &str, enumerators: Vec<(String, i64)>, base: Primitive) -> Self {
        Self::from_kind(CTypeKind::Enum(EnumType {
            name: name.to_string(),
            enumerators,
            base,
        }))
    }

    pub fn kind(&self) -> &CTypeKind {
        &self.0.kind
    }

    /// Canonical C spelling, e.g. `int *`, `int(*)(double)`, `struct foo[4]`.
    pub fn c_name(&self) -> &str {
        &self.0.c_name
    }

    /// Spell this type around a declarator (`"x"` gives `int *x`).
    pub fn declare(&self, declarator: &str) -> String {
        spell(&self.0.kind, declarator)
    }

    /// Identity of this descriptor instance.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn tag(&self) -> TypeTag {
        match &self.0.kind {
            CTypeKind::Void => TypeTag::Void,
            CTypeKind::Primitive(_) => TypeTag::Primitive,
            CTypeKind::Pointer(_) => TypeTag::Pointer,
            CTypeKind::Array { .. } => TypeTag::Array,
            CTypeKind::Aggregate(a) => match a.kind {
                AggregateKind::Struct => TypeTag::Struct,
                AggregateKind::Union => TypeTag::Union,
            },
            CTypeKind::Enum(_) => TypeTag::Enum,
            CTypeKind::Function(_) => TypeTag::Function,
        }
    }

    /// Size in bytes; fails for incomplete types.
    pub fn size(&self) -> Result<usize> {
        match &self.0.kind {
            CTypeKind::Primitive(p) => Ok(p.size()),
            CTypeKind::Pointer(_) => Ok(std::mem::size_of::<usize>()),
            CTypeKind::Array {
                item,
                length: Some(n),
            } => item
                .size()?
                .checked_mul(*n)
                .ok_or_else(|| FfiError::invalid_layout(self.c_name(), "array size overflows")),
            CTypeKind::Aggregate(a) => a
                .layout()
                .map(|l| l.size)
                .ok_or_else(|| self.incomplete()),
            CTypeKind::Enum(e) => Ok(e.base.size()),
            CTypeKind::Void | CTypeKind::Function(_) | CTypeKind::Array { length: None, .. } => {
                Err(self.incomplete())
            }
        }
    }

    /// Alignment in bytes; fails for incomplete types other than flexible arrays,
    /// whose alignment is the element alignment.
    pub fn align(&self) -> Result<usize> {
        match &self.0.kind {
            CTypeKind::Primitive(p) => Ok(p.align()),
            CTypeKind::Pointer(_) => Ok(std::mem::align_of::<usize>()),
            CTypeKind::Array { item, .. } => item.align(),
            CTypeKind::Aggregate(a) => a
                .layout()
                .map(|l| l.align)
                .ok_or_else(|| self.incomplete()),
            CTypeKind::Enum(e) => Ok(e.base.align()),
            CTypeKind::Void | CTypeKind::Function(_) => Err(self.incomplete()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.size().is_ok()
    }

    fn incomplete(&self) -> FfiError {
        FfiError::IncompleteType(self.c_name().to_string())
    }

    pub fn is_void(&self) -> bool {
        matches!(self.0.kind, CTypeKind::Void)
    }

    pub fn as_primitive(&self) -> Option<Primitive> {
        match &self.0.kind {
            CTypeKind::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    /// Primitive used to store a scalar: the primitive itself, or an enum's base.
    pub fn scalar_primitive(&self) -> Option<Primitive> {
        match &self.0.kind {
            CTypeKind::Primitive(p) => Some(*p),
            CTypeKind::Enum(e) => Some(e.base),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        self.scalar_primitive().is_some_and(|p| p.is_integer())
    }

    pub fn is_float(&self) -> bool {
        self.as_primitive().is_some_and(|p| p.is_float())
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.0.kind, CTypeKind::Pointer(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.0.kind, CTypeKind::Array { .. })
    }

    pub fn is_flexible_array(&self) -> bool {
        matches!(self.0.kind, CTypeKind::Array { length: None, .. })
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self.0.kind, CTypeKind::Aggregate(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self.0.kind, CTypeKind::Function(_))
    }

    /// Scalars are passed as single values: primitives, enums and pointers.
    pub fn is_scalar(&self) -> bool {
        self.scalar_primitive().is_some() || self.is_pointer()
    }

    /// `char`, `signed char` or `unsigned char`.
    pub fn is_char_like(&self) -> bool {
        matches!(
            self.as_primitive(),
            Some(Primitive::Char | Primitive::SChar | Primitive::UChar)
        )
    }

    pub fn pointee(&self) -> Option<&CType> {
        match &self.0.kind {
            CTypeKind::Pointer(t) => Some(t),
            _ => None,
        }
    }

    pub fn item(&self) -> Option<&CType> {
        match &self.0.kind {
            CTypeKind::Array { item, .. } => Some(item),
            _ => None,
        }
    }

    /// Declared length of an array; `None` for flexible arrays and non-arrays.
    pub fn length(&self) -> Option<usize> {
        match &self.0.kind {
            CTypeKind::Array { length, .. } => *length,
            _ => None,
        }
    }

    pub fn as_aggregate(&self) -> Option<&Aggregate> {
        match &self.0.kind {
            CTypeKind::Aggregate(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumType> {
        match &self.0.kind {
            CTypeKind::Enum(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionType> {
        match &self.0.kind {
            CTypeKind::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Completed layout of a struct or union.
    pub fn layout(&self) -> Result<&AggregateLayout> {
        match &self.0.kind {
            CTypeKind::Aggregate(a) => a.layout().ok_or_else(|| self.incomplete()),
            _ => Err(FfiError::invalid_layout(
                self.c_name(),
                "not a struct or union",
            )),
        }
    }

    /// Look up a member, including members of anonymous nested aggregates.
    /// Dotted paths (`"a.b"`) walk nested structs.
    pub fn field(&self, path: &str) -> Result<Field> {
        let mut current = self.clone();
        let mut offset = 0;
        let mut found: Option<Field> = None;
        for part in path.split('.') {
            let layout = current.layout()?;
            let field = layout.find(part).ok_or_else(|| FfiError::NoSuchField {
                ctype: current.c_name().to_string(),
                field: part.to_string(),
            })?;
            offset += field.offset;
            current = field.ty.clone();
            found = Some(Field { offset, ..field });
        }
        found.ok_or_else(|| FfiError::NoSuchField {
            ctype: self.c_name().to_string(),
            field: path.to_string(),
        })
    }

    /// Byte offset of a (possibly dotted) member.
    pub fn offset_of(&self, path: &str) -> Result<usize> {
        Ok(self.field(path)?.offset)
    }
}

impl PartialEq for CType {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for CType {}

impl Hash for CType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<ctype '{}'>", self.c_name())
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.c_name())
    }
}

/// Build the C spelling of `kind` wrapped around `declarator`.
fn spell(kind: &CTypeKind, declarator: &str) -> String {
    match kind {
        CTypeKind::Void => join_base("void", declarator),
        CTypeKind::Primitive(p) => join_base(p.c_name(), declarator),
        CTypeKind::Aggregate(a) => join_base(&format!("{} {}", a.kind.keyword(), a.name), declarator),
        CTypeKind::Enum(e) => join_base(&format!("enum {}", e.name), declarator),
        CTypeKind::Pointer(pointee) => {
            let inner = format!("*{}", declarator);
            if pointee.is_array() || pointee.is_function() {
                pointee.declare(&format!("({})", inner))
            } else {
                pointee.declare(&inner)
            }
        }
        CTypeKind::Array { item, length } => match length {
            Some(n) => item.declare(&format!("{}[{}]", declarator, n)),
            None => item.declare(&format!("{}[]", declarator)),
        },
        CTypeKind::Function(f) => {
            let mut params: Vec<String> = f.params.iter().map(|p| p.c_name().to_string()).collect();
            if f.variadic {
                params.push("...".to_string());
            }
            if params.is_empty() {
                params.push("void".to_string());
            }
            f.result
                .declare(&format!("{}({})", declarator, params.join(", ")))
        }
    }
}

fn join_base(base: &str, declarator: &str) -> String {
    if declarator.is_empty() {
        base.to_string()
    } else if declarator.starts_with('*') || declarator.starts_with(|c: char| c.is_alphabetic() || c == '_') {
        format!("{} {}", base, declarator)
    } else {
        format!("{}{}", base, declarator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spelling() {
        let int = CType::primitive(Primitive::Int);
        let ptr = CType::pointer_to(&int);
        assert_eq!(ptr.c_name(), "int *");

        let arr = CType::array_of(&ptr, Some(3));
        assert_eq!(arr.c_name(), "int *[3]");

        let ptr_to_arr = CType::pointer_to(&CType::array_of(&int, Some(3)));
        assert_eq!(ptr_to_arr.c_name(), "int(*)[3]");

        let double = CType::primitive(Primitive::Double);
        let func = CType::function(&int, vec![double], false);
        assert_eq!(func.c_name(), "int(double)");
        assert_eq!(CType::pointer_to(&func).c_name(), "int(*)(double)");
        assert_eq!(int.declare("x"), "int x");
        assert_eq!(ptr.declare("p"), "int *p");
    }

    #[test]
    fn test_variadic_spelling() {
        let int = CType::primitive(Primitive::Int);
        let chr = CType::pointer_to(&CType::primitive(Primitive::Char));
        let printf = CType::function(&int, vec![chr], true);
        assert_eq!(printf.c_name(), "int(char *, ...)");
        let noargs = CType::function(&int, vec![], false);
        assert_eq!(noargs.c_name(), "int(void)");
    }

    #[test]
    fn test_incomplete_sizes() {
        assert!(matches!(CType::void().size(), Err(FfiError::IncompleteType(_))));
        let flex = CType::array_of(&CType::primitive(Primitive::Int), None);
        assert!(flex.size().is_err());
        assert_eq!(flex.align().unwrap(), Primitive::Int.align());

        let s = CType::new_aggregate(AggregateKind::Struct, "foo");
        assert_eq!(s.c_name(), "struct foo");
        assert!(matches!(s.size(), Err(FfiError::IncompleteType(n)) if n == "struct foo"));
    }

    #[test]
    fn test_identity_equality() {
        let a = CType::primitive(Primitive::Int);
        let b = CType::primitive(Primitive::Int);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
