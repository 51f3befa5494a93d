//! Type Registry
//!
//! Interns type descriptors and owns the named-type tables.
//!
//! Pointer, array and function types are structural: they are keyed by the
//! identity of their (already interned) components, so `int *` built twice
//! resolves to one instance. Structs, unions and enums are nominal and live in
//! the tag table; a struct may be forward declared and completed later.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::trace;
use parking_lot::RwLock;

use crate::ctype::layout;
use crate::ctype::{AggregateKind, CType, CTypeKind, Member, Primitive, TypeTag};
use crate::error::{FfiError, Result};

/// Structural key for deduplicated descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TypeKey {
    Void,
    Primitive(Primitive),
    Pointer(usize),
    Array(usize, Option<usize>),
    Function {
        result: usize,
        params: Vec<usize>,
        variadic: bool,
    },
}

#[derive(Default)]
struct Tables {
    interned: HashMap<TypeKey, CType>,
    /// struct, union and enum tags share one namespace
    tags: HashMap<String, CType>,
    typedefs: HashMap<String, CType>,
    constants: HashMap<String, i64>,
}

/// Registry of interned descriptors, tags, typedefs and integer constants.
///
/// Lookups take a shared lock; the exclusive lock is only taken to insert a
/// new entry. Entries are never replaced once inserted.
pub struct TypeRegistry {
    tables: RwLock<Tables>,
    anonymous: AtomicUsize,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            anonymous: AtomicUsize::new(0),
        }
    }

    /// Canonical instance of `ty`.
    ///
    /// Components are interned first; nominal types are returned unchanged.
    pub fn intern(&self, ty: &CType) -> CType {
        match ty.kind() {
            CTypeKind::Void => self.intern_key(TypeKey::Void, CType::void),
            CTypeKind::Primitive(p) => {
                let p = *p;
                self.intern_key(TypeKey::Primitive(p), || CType::primitive(p))
            }
            CTypeKind::Pointer(pointee) => {
                let pointee = self.intern(pointee);
                self.intern_key(TypeKey::Pointer(pointee.id()), || CType::pointer_to(&pointee))
            }
            CTypeKind::Array { item, length } => {
                let item = self.intern(item);
                let length = *length;
                self.intern_key(TypeKey::Array(item.id(), length), || {
                    CType::array_of(&item, length)
                })
            }
            CTypeKind::Function(f) => {
                let result = self.intern(&f.result);
                let params: Vec<CType> = f.params.iter().map(|p| self.intern(p)).collect();
                let key = TypeKey::Function {
                    result: result.id(),
                    params: params.iter().map(CType::id).collect(),
                    variadic: f.variadic,
                };
                let variadic = f.variadic;
                self.intern_key(key, move || CType::function(&result, params, variadic))
            }
            CTypeKind::Aggregate(_) | CTypeKind::Enum(_) => ty.clone(),
        }
    }

    fn intern_key(&self, key: TypeKey, build: impl FnOnce() -> CType) -> CType {
        if let Some(found) = self.tables.read().interned.get(&key) {
            return found.clone();
        }
        let mut tables = self.tables.write();
        tables
            .interned
            .entry(key)
            .or_insert_with(|| {
                let ty = build();
                trace!("interned {:?}", ty);
                ty
            })
            .clone()
    }

    pub fn void(&self) -> CType {
        self.intern_key(TypeKey::Void, CType::void)
    }

    pub fn primitive(&self, p: Primitive) -> CType {
        self.intern_key(TypeKey::Primitive(p), || CType::primitive(p))
    }

    pub fn pointer_to(&self, pointee: &CType) -> CType {
        self.intern(&CType::pointer_to(pointee))
    }

    pub fn array_of(&self, item: &CType, length: Option<usize>) -> CType {
        self.intern(&CType::array_of(item, length))
    }

    pub fn function(&self, result: &CType, params: Vec<CType>, variadic: bool) -> CType {
        self.intern(&CType::function(result, params, variadic))
    }

    /// Fresh synthesized tag name (`$1`, `$2`, ...).
    pub fn anonymous_name(&self) -> String {
        format!("${}", self.anonymous.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Incomplete placeholder for `struct name` / `union name`.
    ///
    /// Repeated declarations return the same placeholder, complete or not.
    pub fn declare_forward(&self, name: &str, kind: AggregateKind) -> Result<CType> {
        if let Some(existing) = self.tables.read().tags.get(name) {
            return check_tag_kind(name, existing, kind);
        }
        let mut tables = self.tables.write();
        if let Some(existing) = tables.tags.get(name) {
            return check_tag_kind(name, existing, kind);
        }
        let ty = CType::new_aggregate(kind, name);
        trace!("forward declared {}", ty.c_name());
        tables.tags.insert(name.to_string(), ty.clone());
        Ok(ty)
    }

    /// Complete `struct name` / `union name` with `members`.
    ///
    /// Handles taken from an earlier forward declaration observe the layout.
    pub fn define(
        &self,
        name: &str,
        kind: AggregateKind,
        members: &[Member],
        pack: Option<usize>,
    ) -> Result<CType> {
        let ty = self.declare_forward(name, kind)?;
        if ty.is_complete() {
            return Err(FfiError::redefinition(ty.c_name(), "already has a body"));
        }
        let computed = layout::compute(kind, name, members, pack)?;
        let aggregate = ty
            .as_aggregate()
            .ok_or_else(|| FfiError::redefinition(name, "tag is not a struct or union"))?;
        aggregate
            .complete(computed)
            .map_err(|_| FfiError::redefinition(ty.c_name(), "already has a body"))?;
        trace!(
            "defined {} (size {}, align {})",
            ty.c_name(),
            ty.size()?,
            ty.align()?
        );
        Ok(ty)
    }

    /// Define a struct or union under a synthesized name.
    pub fn define_anonymous(
        &self,
        kind: AggregateKind,
        members: &[Member],
        pack: Option<usize>,
    ) -> Result<CType> {
        let name = self.anonymous_name();
        self.define(&name, kind, members, pack)
    }

    /// Define an enum; `None` synthesizes a name. Enumerators are also
    /// registered as integer constants.
    ///
    /// The underlying type is `int` when every value fits, otherwise
    /// `unsigned int`, then a 64-bit type.
    pub fn define_enum(&self, name: Option<&str>, enumerators: Vec<(String, i64)>) -> Result<CType> {
        let name = match name {
            Some(n) => n.to_string(),
            None => self.anonymous_name(),
        };
        let min = enumerators.iter().map(|(_, v)| *v).min().unwrap_or(0);
        let max = enumerators.iter().map(|(_, v)| *v).max().unwrap_or(0);
        let base = if min >= i32::MIN as i64 && max <= i32::MAX as i64 {
            Primitive::Int
        } else if min >= 0 && max <= u32::MAX as i64 {
            Primitive::UInt
        } else if min < 0 {
            Primitive::LongLong
        } else {
            Primitive::ULongLong
        };

        let mut tables = self.tables.write();
        if tables.tags.contains_key(&name) {
            return Err(FfiError::redefinition(format!("enum {}", name), "tag already defined"));
        }
        for (enumerator, value) in &enumerators {
            if let Some(old) = tables.constants.get(enumerator) {
                if old != value {
                    return Err(FfiError::redefinition(
                        enumerator.as_str(),
                        format!("constant already defined as {}", old),
                    ));
                }
            }
        }
        for (enumerator, value) in &enumerators {
            tables.constants.insert(enumerator.clone(), *value);
        }
        let ty = CType::new_enum(&name, enumerators, base);
        trace!("defined {} over {}", ty.c_name(), base);
        tables.tags.insert(name, ty.clone());
        Ok(ty)
    }

    pub fn lookup_tag(&self, name: &str) -> Option<CType> {
        self.tables.read().tags.get(name).cloned()
    }

    /// Bind a typedef name. Rebinding to the same type is allowed.
    pub fn define_typedef(&self, name: &str, ty: &CType) -> Result<()> {
        let ty = self.intern(ty);
        let mut tables = self.tables.write();
        if let Some(existing) = tables.typedefs.get(name) {
            if *existing == ty {
                return Ok(());
            }
            return Err(FfiError::redefinition(
                name,
                format!("typedef already refers to '{}'", existing.c_name()),
            ));
        }
        trace!("typedef {}", ty.declare(name));
        tables.typedefs.insert(name.to_string(), ty);
        Ok(())
    }

    pub fn lookup_typedef(&self, name: &str) -> Option<CType> {
        self.tables.read().typedefs.get(name).cloned()
    }

    /// A single identifier used as a type: typedefs first, then builtin names.
    pub fn lookup_type_name(&self, name: &str) -> Option<CType> {
        self.lookup_typedef(name)
            .or_else(|| Primitive::from_builtin_name(name).map(|p| self.primitive(p)))
    }

    /// Bind an integer constant. Rebinding to the same value is allowed.
    pub fn define_constant(&self, name: &str, value: i64) -> Result<()> {
        let mut tables = self.tables.write();
        match tables.constants.get(name) {
            Some(old) if *old == value => Ok(()),
            Some(old) => Err(FfiError::redefinition(
                name,
                format!("constant already defined as {}", old),
            )),
            None => {
                trace!("constant {} = {}", name, value);
                tables.constants.insert(name.to_string(), value);
                Ok(())
            }
        }
    }

    pub fn constant(&self, name: &str) -> Option<i64> {
        self.tables.read().constants.get(name).copied()
    }

    /// Number of interned structural descriptors.
    pub fn interned_count(&self) -> usize {
        self.tables.read().interned.len()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn check_tag_kind(name: &str, existing: &CType, kind: AggregateKind) -> Result<CType> {
    let expected = match kind {
        AggregateKind::Struct => TypeTag::Struct,
        AggregateKind::Union => TypeTag::Union,
    };
    if existing.tag() == expected {
        Ok(existing.clone())
    } else {
        Err(FfiError::redefinition(
            format!("{} {}", kind.keyword(), name),
            format!("tag already names '{}'", existing.c_name()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_dedup() {
        let reg = TypeRegistry::new();
        let int = reg.primitive(Primitive::Int);
        let p1 = reg.pointer_to(&int);
        let p2 = reg.intern(&CType::pointer_to(&CType::primitive(Primitive::Int)));
        assert_eq!(p1, p2);

        let f1 = reg.function(&int, vec![p1.clone()], false);
        let f2 = reg.function(&int, vec![p2], false);
        assert_eq!(f1, f2);
        let f3 = reg.function(&int, vec![p1], true);
        assert_ne!(f1, f3);
    }

    #[test]
    fn test_forward_then_define() {
        let reg = TypeRegistry::new();
        let fwd = reg.declare_forward("point", AggregateKind::Struct).unwrap();
        assert!(matches!(fwd.size(), Err(FfiError::IncompleteType(_))));

        let int = reg.primitive(Primitive::Int);
        reg.define(
            "point",
            AggregateKind::Struct,
            &[Member::named("x", &int), Member::named("y", &int)],
            None,
        )
        .unwrap();
        assert_eq!(fwd.size().unwrap(), 2 * Primitive::Int.size());
        assert_eq!(fwd.offset_of("y").unwrap(), Primitive::Int.size());
    }

    #[test]
    fn test_redefinition() {
        let reg = TypeRegistry::new();
        let int = reg.primitive(Primitive::Int);
        let members = [Member::named("x", &int)];
        reg.define("s", AggregateKind::Struct, &members, None).unwrap();
        assert!(matches!(
            reg.define("s", AggregateKind::Struct, &members, None),
            Err(FfiError::Redefinition { .. })
        ));
        assert!(matches!(
            reg.declare_forward("s", AggregateKind::Union),
            Err(FfiError::Redefinition { .. })
        ));
    }

    #[test]
    fn test_incomplete_member() {
        let reg = TypeRegistry::new();
        let inner = reg.declare_forward("inner", AggregateKind::Struct).unwrap();
        let err = reg.define("outer", AggregateKind::Struct, &[Member::named("i", &inner)], None);
        assert!(matches!(err, Err(FfiError::IncompleteType(_))));
        // a failed definition leaves the placeholder incomplete
        let outer = reg.lookup_tag("outer").unwrap();
        assert!(!outer.is_complete());
    }

    #[test]
    fn test_enum_base_and_constants() {
        let reg = TypeRegistry::new();
        let e = reg
            .define_enum(Some("color"), vec![("RED".into(), 0), ("BLUE".into(), 5)])
            .unwrap();
        assert_eq!(e.as_enum().unwrap().base, Primitive::Int);
        assert_eq!(reg.constant("BLUE"), Some(5));

        let big = reg
            .define_enum(None, vec![("BIG".into(), 0x1_0000_0000)])
            .unwrap();
        assert_eq!(big.as_enum().unwrap().base, Primitive::ULongLong);
        assert!(big.c_name().starts_with("enum $"));
    }

    #[test]
    fn test_typedefs() {
        let reg = TypeRegistry::new();
        let uint = reg.primitive(Primitive::UInt);
        reg.define_typedef("u32", &uint).unwrap();
        reg.define_typedef("u32", &uint).unwrap();
        let long = reg.primitive(Primitive::Long);
        assert!(reg.define_typedef("u32", &long).is_err());
        assert_eq!(reg.lookup_type_name("u32"), Some(uint));
        assert_eq!(
            reg.lookup_type_name("size_t"),
            Some(reg.primitive(Primitive::Size))
        );
    }
}
