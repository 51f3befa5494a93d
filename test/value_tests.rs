//! Foreign value tests: conversions, views, casts and field access

use cbridge::{Ffi, FfiError, ForeignValue, HostValue};

fn ffi() -> Ffi {
    let ffi = Ffi::new();
    ffi.cdef(
        "struct point { int x; int y; };
         struct rect { struct point min; struct point max; char name[8]; };
         struct packet { unsigned char kind : 4; unsigned char flags : 4; signed short delta : 6; };
         struct blob { int len; unsigned char bytes[]; };",
    )
    .unwrap();
    ffi
}

// ============================================================================
// Host conversion
// ============================================================================

#[test]
fn test_wrap_then_unwrap_exact() {
    let ffi = ffi();
    let int = ffi.type_of("int").unwrap();
    let v = ForeignValue::wrap(&int, &i32::MIN.to_ne_bytes()).unwrap();
    assert_eq!(v.to_host().unwrap(), HostValue::Int(i32::MIN as i64));

    let u64_t = ffi.type_of("uint64_t").unwrap();
    let v = ForeignValue::wrap(&u64_t, &u64::MAX.to_ne_bytes()).unwrap();
    assert_eq!(v.to_host().unwrap(), HostValue::UInt(u64::MAX));
}

#[test]
fn test_wrap_rejects_wrong_length() {
    let ffi = ffi();
    let int = ffi.type_of("int").unwrap();
    assert!(matches!(
        ForeignValue::wrap(&int, &[1, 2]),
        Err(FfiError::CastSize { .. })
    ));
}

#[test]
fn test_range_checks() {
    let ffi = ffi();
    assert!(ffi.new_value("unsigned char", Some(&HostValue::Int(255))).is_ok());
    assert!(matches!(
        ffi.new_value("unsigned char", Some(&HostValue::Int(256))),
        Err(FfiError::Unrepresentable { .. })
    ));
    assert!(matches!(
        ffi.new_value("unsigned int", Some(&HostValue::Int(-1))),
        Err(FfiError::Unrepresentable { .. })
    ));
    let f = ffi.new_value("float", Some(&HostValue::Float(0.5))).unwrap();
    assert_eq!(f.to_host().unwrap(), HostValue::Float(0.5));
}

#[test]
fn test_aggregates_have_no_host_form() {
    let ffi = ffi();
    let p = ffi.new_value("struct point", None).unwrap();
    assert!(matches!(p.to_host(), Err(FfiError::Unrepresentable { .. })));
}

// ============================================================================
// Fields and elements
// ============================================================================

#[test]
fn test_nested_fields_share_memory() {
    let ffi = ffi();
    let r = ffi.new_value("struct rect", None).unwrap();
    r.set_field("max.y", &HostValue::Int(42)).unwrap();
    r.field("name").unwrap().set(&"box".into()).unwrap();

    let max = r.field("max").unwrap();
    assert_eq!(max.field("y").unwrap().to_host().unwrap(), HostValue::Int(42));
    assert_eq!(r.field("name").unwrap().string().unwrap(), b"box");
    assert_eq!(max.address(), r.address() + ffi.offsetof("struct rect", "max").unwrap());

    assert!(matches!(r.field("depth"), Err(FfiError::NoSuchField { .. })));
}

#[test]
fn test_bitfield_read_write() {
    let ffi = ffi();
    let p = ffi.new_value("struct packet", None).unwrap();
    p.set_field("kind", &HostValue::UInt(9)).unwrap();
    p.set_field("flags", &HostValue::UInt(15)).unwrap();
    p.set_field("delta", &HostValue::Int(-20)).unwrap();
    assert_eq!(p.field("kind").unwrap().to_host().unwrap(), HostValue::UInt(9));
    assert_eq!(p.field("flags").unwrap().to_host().unwrap(), HostValue::UInt(15));
    assert_eq!(p.field("delta").unwrap().to_host().unwrap(), HostValue::Int(-20));

    assert!(p.set_field("kind", &HostValue::UInt(16)).is_err());
    assert!(p.set_field("delta", &HostValue::Int(40)).is_err());
}

#[test]
fn test_array_indexing() {
    let ffi = ffi();
    let arr = ffi.new_value("int[4]", None).unwrap();
    for i in 0..4 {
        arr.set_index(i, &HostValue::Int(i as i64 * 10)).unwrap();
    }
    assert_eq!(arr.length(), Some(4));
    assert_eq!(arr.index(3).unwrap().to_host().unwrap(), HostValue::Int(30));
    assert!(matches!(arr.index(4), Err(FfiError::IndexOutOfBounds { .. })));
}

#[test]
fn test_flexible_array_allocation() {
    let ffi = ffi();
    let blob = ffi.new_array("struct blob", 16).unwrap();
    assert_eq!(blob.size(), 4 + 16);
    let bytes = blob.field("bytes").unwrap();
    assert_eq!(bytes.length(), Some(16));
    bytes.set_index(15, &HostValue::UInt(0xab)).unwrap();
    assert_eq!(blob.to_bytes()[19], 0xab);

    let ints = ffi.new_array("int[]", 3).unwrap();
    assert_eq!(ints.length(), Some(3));
}

// ============================================================================
// Casts and pointers
// ============================================================================

#[test]
fn test_cast_reinterprets_in_place() {
    let ffi = ffi();
    let v = ffi.new_value("uint32_t", Some(&HostValue::UInt(0x01020304))).unwrap();
    let bytes = ffi.cast("unsigned char[4]", &v).unwrap();
    assert_eq!(bytes.address(), v.address());
    assert_eq!(bytes.to_bytes(), 0x01020304u32.to_ne_bytes().to_vec());

    assert!(matches!(
        ffi.cast("uint64_t", &v),
        Err(FfiError::CastSize { .. })
    ));
}

#[test]
fn test_pointer_cast_always_allowed() {
    let ffi = ffi();
    let p = ffi.new_value("int *", None).unwrap();
    let q = ffi.cast("struct rect *", &p).unwrap();
    assert!(q.is_null());
}

#[test]
fn test_address_of_keeps_referent_alive() {
    let ffi = ffi();
    let ptr = {
        let point = ffi.new_value("struct point", None).unwrap();
        point.set_field("x", &HostValue::Int(7)).unwrap();
        ffi.address_of(&point).unwrap()
    };
    assert_eq!(ptr.ctype().c_name(), "struct point *");
    // Safety: the pointer holds its referent
    let point = unsafe { ptr.deref() }.unwrap();
    assert_eq!(point.field("x").unwrap().to_host().unwrap(), HostValue::Int(7));
}

#[test]
fn test_char_pointer_from_bytes() {
    let ffi = ffi();
    let s = ffi.new_value("const char *", Some(&"hello".into())).unwrap();
    assert!(!s.is_null());
    // Safety: from_host allocated a NUL-terminated copy
    assert_eq!(unsafe { s.read_c_string() }.unwrap(), b"hello");
    assert!(s.string().is_err());
}

#[test]
fn test_debug_format() {
    let ffi = ffi();
    let v = ffi.new_value("short", Some(&HostValue::Int(-3))).unwrap();
    assert_eq!(format!("{:?}", v), "<cdata 'short' -3>");
}
