//! Type registry tests: interning, forward declarations, typedefs and tags

use cbridge::{parse_declarations, parse_type, AggregateKind, FfiError, Member, Primitive, TypeRegistry};
use std::sync::Arc;
use std::thread;

// ============================================================================
// Structural interning
// ============================================================================

#[test]
fn test_same_spelling_same_instance() {
    let reg = TypeRegistry::new();
    let a = parse_type("int*", &reg).unwrap();
    let b = parse_type("int *", &reg).unwrap();
    assert_eq!(a, b);
    assert_eq!(reg.intern(&a), a);
}

#[test]
fn test_equivalent_spellings_share_descriptor() {
    let reg = TypeRegistry::new();
    let a = parse_type("signed long int", &reg).unwrap();
    let b = parse_type("long", &reg).unwrap();
    assert_eq!(a, b);

    let f1 = parse_type("int (*)(double, char *)", &reg).unwrap();
    let f2 = parse_type("int(*)(double,char*)", &reg).unwrap();
    assert_eq!(f1, f2);

    let v1 = parse_type("int (*)(int, ...)", &reg).unwrap();
    let v2 = parse_type("int (*)(int)", &reg).unwrap();
    assert_ne!(v1, v2);
}

#[test]
fn test_qualifiers_ignored() {
    let reg = TypeRegistry::new();
    assert_eq!(
        parse_type("const char * const", &reg).unwrap(),
        parse_type("char *", &reg).unwrap()
    );
}

#[test]
fn test_separate_registries_do_not_share() {
    let a = TypeRegistry::new();
    let b = TypeRegistry::new();
    assert_ne!(
        parse_type("int *", &a).unwrap(),
        parse_type("int *", &b).unwrap()
    );
}

#[test]
fn test_concurrent_interning() {
    let reg = Arc::new(TypeRegistry::new());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let reg = Arc::clone(&reg);
            thread::spawn(move || parse_type("unsigned short **", &reg).unwrap())
        })
        .collect();
    let types: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(types.windows(2).all(|w| w[0] == w[1]));
}

// ============================================================================
// Nominal types
// ============================================================================

#[test]
fn test_forward_declaration_completed_in_place() {
    let reg = TypeRegistry::new();
    let fwd = reg.declare_forward("node", AggregateKind::Struct).unwrap();
    assert!(matches!(fwd.size(), Err(FfiError::IncompleteType(_))));
    assert!(matches!(fwd.layout(), Err(FfiError::IncompleteType(_))));

    let next = reg.pointer_to(&fwd);
    let defined = reg
        .define(
            "node",
            AggregateKind::Struct,
            &[
                Member::named("value", &reg.primitive(Primitive::Int)),
                Member::named("next", &next),
            ],
            None,
        )
        .unwrap();
    assert_eq!(defined, fwd);
    assert_eq!(fwd.layout().unwrap().members.len(), 2);
    assert_eq!(fwd.size().unwrap(), 2 * std::mem::size_of::<usize>());
}

#[test]
fn test_self_referential_struct_from_text() {
    let reg = TypeRegistry::new();
    parse_declarations("struct list { int v; struct list *next; };", &reg).unwrap();
    let list = reg.lookup_tag("list").unwrap();
    let next = list.field("next").unwrap();
    assert_eq!(next.ty.pointee(), Some(&list));
}

#[test]
fn test_redefinition_rejected() {
    let reg = TypeRegistry::new();
    parse_declarations("struct p { int x; };", &reg).unwrap();
    assert!(matches!(
        parse_declarations("struct p { long x; };", &reg),
        Err(FfiError::Redefinition { .. })
    ));
    assert!(matches!(
        parse_declarations("union p;", &reg),
        Err(FfiError::Redefinition { .. })
    ));
}

#[test]
fn test_struct_and_union_tags() {
    let reg = TypeRegistry::new();
    parse_declarations("union num { int i; float f; };", &reg).unwrap();
    let num = parse_type("union num", &reg).unwrap();
    assert_eq!(num.c_name(), "union num");
    assert_eq!(num.size().unwrap(), 4);
}

#[test]
fn test_enum_constants_registered() {
    let reg = TypeRegistry::new();
    parse_declarations("enum level { LOW, MID = 10, HIGH };", &reg).unwrap();
    assert_eq!(reg.constant("LOW"), Some(0));
    assert_eq!(reg.constant("HIGH"), Some(11));
    let level = parse_type("enum level", &reg).unwrap();
    assert_eq!(level.size().unwrap(), 4);
    assert!(level.is_integer());
}

#[test]
fn test_wide_enum_base() {
    let reg = TypeRegistry::new();
    parse_declarations("enum big { SMALL = -1, HUGE = 0x100000000 };", &reg).unwrap();
    assert_eq!(parse_type("enum big", &reg).unwrap().size().unwrap(), 8);
}

// ============================================================================
// Typedefs and names
// ============================================================================

#[test]
fn test_typedef_resolves_to_target() {
    let reg = TypeRegistry::new();
    parse_declarations("typedef unsigned int u32_t; typedef u32_t *u32p;", &reg).unwrap();
    assert_eq!(
        parse_type("u32p", &reg).unwrap(),
        parse_type("unsigned int *", &reg).unwrap()
    );
}

#[test]
fn test_typedef_anonymous_struct() {
    let reg = TypeRegistry::new();
    parse_declarations("typedef struct { int quot; int rem; } div_t;", &reg).unwrap();
    let div = reg.lookup_typedef("div_t").unwrap();
    assert!(div.is_aggregate());
    assert_eq!(div.offset_of("rem").unwrap(), 4);
}

#[test]
fn test_conflicting_typedef() {
    let reg = TypeRegistry::new();
    parse_declarations("typedef int handle;", &reg).unwrap();
    parse_declarations("typedef int handle;", &reg).unwrap();
    assert!(matches!(
        parse_declarations("typedef long handle;", &reg),
        Err(FfiError::Redefinition { .. })
    ));
}

#[test]
fn test_unknown_names() {
    let reg = TypeRegistry::new();
    assert!(matches!(parse_type("mystery_t", &reg), Err(FfiError::UnknownType(_))));
    assert!(matches!(parse_type("enum nowhere", &reg), Err(FfiError::UnknownType(_))));
}

#[test]
fn test_syntax_error_location() {
    let reg = TypeRegistry::new();
    match parse_declarations("int f(int;\n", &reg) {
        Err(FfiError::Syntax { line, .. }) => assert_eq!(line, 1),
        other => panic!("expected syntax error, got {:?}", other),
    }
}
