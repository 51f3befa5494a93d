//! Primitive C types
//!
//! Sizes and alignments come from the host compiler's view of the C types
//! (`std::ffi::c_*` and `libc` aliases), so they always match the platform
//! the crate is built for.

use std::ffi::{c_char, c_double, c_float, c_int, c_long, c_longlong, c_short};
use std::fmt;
use std::mem::{align_of, size_of};

/// Broad category of a primitive, used for conversions and ABI classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveClass {
    /// Two's complement signed integer
    Signed,
    /// Unsigned integer
    Unsigned,
    /// Plain `char` (signedness is platform defined)
    Char,
    /// IEEE 754 binary32/binary64
    Float,
    /// `_Bool`
    Bool,
}

/// Primitive C types understood by the parser and the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Char,
    SChar,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    IntPtr,
    UIntPtr,
    Size,
    SSize,
    PtrDiff,
    WChar,
    Char16,
    Char32,
}

impl Primitive {
    /// Every primitive, in declaration order.
    pub const ALL: &'static [Primitive] = &[
        Primitive::Char,
        Primitive::SChar,
        Primitive::UChar,
        Primitive::Short,
        Primitive::UShort,
        Primitive::Int,
        Primitive::UInt,
        Primitive::Long,
        Primitive::ULong,
        Primitive::LongLong,
        Primitive::ULongLong,
        Primitive::Float,
        Primitive::Double,
        Primitive::Bool,
        Primitive::Int8,
        Primitive::UInt8,
        Primitive::Int16,
        Primitive::UInt16,
        Primitive::Int32,
        Primitive::UInt32,
        Primitive::Int64,
        Primitive::UInt64,
        Primitive::IntPtr,
        Primitive::UIntPtr,
        Primitive::Size,
        Primitive::SSize,
        Primitive::PtrDiff,
        Primitive::WChar,
        Primitive::Char16,
        Primitive::Char32,
    ];

    /// Canonical C spelling.
    pub fn c_name(self) -> &'static str {
        match self {
            Primitive::Char => "char",
            Primitive::SChar => "signed char",
            Primitive::UChar => "unsigned char",
            Primitive::Short => "short",
            Primitive::UShort => "unsigned short",
            Primitive::Int => "int",
            Primitive::UInt => "unsigned int",
            Primitive::Long => "long",
            Primitive::ULong => "unsigned long",
            Primitive::LongLong => "long long",
            Primitive::ULongLong => "unsigned long long",
            Primitive::Float => "float",
            Primitive::Double => "double",
            Primitive::Bool => "_Bool",
            Primitive::Int8 => "int8_t",
            Primitive::UInt8 => "uint8_t",
            Primitive::Int16 => "int16_t",
            Primitive::UInt16 => "uint16_t",
            Primitive::Int32 => "int32_t",
            Primitive::UInt32 => "uint32_t",
            Primitive::Int64 => "int64_t",
            Primitive::UInt64 => "uint64_t",
            Primitive::IntPtr => "intptr_t",
            Primitive::UIntPtr => "uintptr_t",
            Primitive::Size => "size_t",
            Primitive::SSize => "ssize_t",
            Primitive::PtrDiff => "ptrdiff_t",
            Primitive::WChar => "wchar_t",
            Primitive::Char16 => "char16_t",
            Primitive::Char32 => "char32_t",
        }
    }

    /// Look up a builtin typedef-style name (`size_t`, `uint32_t`, ...).
    ///
    /// Keyword combinations such as `unsigned long` are handled by the parser;
    /// this only covers single-identifier names.
    pub fn from_builtin_name(name: &str) -> Option<Self> {
        let p = match name {
            "int8_t" => Primitive::Int8,
            "uint8_t" => Primitive::UInt8,
            "int16_t" => Primitive::Int16,
            "uint16_t" => Primitive::UInt16,
            "int32_t" => Primitive::Int32,
            "uint32_t" => Primitive::UInt32,
            "int64_t" => Primitive::Int64,
            "uint64_t" => Primitive::UInt64,
            "intptr_t" => Primitive::IntPtr,
            "uintptr_t" => Primitive::UIntPtr,
            "size_t" => Primitive::Size,
            "ssize_t" => Primitive::SSize,
            "ptrdiff_t" => Primitive::PtrDiff,
            "wchar_t" => Primitive::WChar,
            "char16_t" => Primitive::Char16,
            "char32_t" => Primitive::Char32,
            "bool" => Primitive::Bool,
            _ => return None,
        };
        Some(p)
    }

    /// Size in bytes on the host platform.
    pub fn size(self) -> usize {
        match self {
            Primitive::Char | Primitive::SChar | Primitive::UChar => size_of::<c_char>(),
            Primitive::Short | Primitive::UShort => size_of::<c_short>(),
            Primitive::Int | Primitive::UInt => size_of::<c_int>(),
            Primitive::Long | Primitive::ULong => size_of::<c_long>(),
            Primitive::LongLong | Primitive::ULongLong => size_of::<c_longlong>(),
            Primitive::Float => size_of::<c_float>(),
            Primitive::Double => size_of::<c_double>(),
            Primitive::Bool => size_of::<bool>(),
            Primitive::Int8 | Primitive::UInt8 => 1,
            Primitive::Int16 | Primitive::UInt16 | Primitive::Char16 => 2,
            Primitive::Int32 | Primitive::UInt32 | Primitive::Char32 => 4,
            Primitive::Int64 | Primitive::UInt64 => 8,
            Primitive::IntPtr
            | Primitive::UIntPtr
            | Primitive::Size
            | Primitive::SSize
            | Primitive::PtrDiff => size_of::<usize>(),
            Primitive::WChar => size_of::<libc::wchar_t>(),
        }
    }

    /// Alignment in bytes on the host platform.
    pub fn align(self) -> usize {
        match self {
            Primitive::Char | Primitive::SChar | Primitive::UChar => align_of::<c_char>(),
            Primitive::Short | Primitive::UShort => align_of::<c_short>(),
            Primitive::Int | Primitive::UInt => align_of::<c_int>(),
            Primitive::Long | Primitive::ULong => align_of::<c_long>(),
            Primitive::LongLong | Primitive::ULongLong => align_of::<c_longlong>(),
            Primitive::Float => align_of::<c_float>(),
            Primitive::Double => align_of::<c_double>(),
            Primitive::Bool => align_of::<bool>(),
            Primitive::Int8 | Primitive::UInt8 => align_of::<u8>(),
            Primitive::Int16 | Primitive::UInt16 | Primitive::Char16 => align_of::<u16>(),
            Primitive::Int32 | Primitive::UInt32 | Primitive::Char32 => align_of::<u32>(),
            Primitive::Int64 | Primitive::UInt64 => align_of::<u64>(),
            Primitive::IntPtr
            | Primitive::UIntPtr
            | Primitive::Size
            | Primitive::SSize
            | Primitive::PtrDiff => align_of::<usize>(),
            Primitive::WChar => align_of::<libc::wchar_t>(),
        }
    }

    pub fn class(self) -> PrimitiveClass {
        match self {
            Primitive::Char => PrimitiveClass::Char,
            Primitive::Float | Primitive::Double => PrimitiveClass::Float,
            Primitive::Bool => PrimitiveClass::Bool,
            Primitive::SChar
            | Primitive::Short
            | Primitive::Int
            | Primitive::Long
            | Primitive::LongLong
            | Primitive::Int8
            | Primitive::Int16
            | Primitive::Int32
            | Primitive::Int64
            | Primitive::IntPtr
            | Primitive::SSize
            | Primitive::PtrDiff => PrimitiveClass::Signed,
            Primitive::WChar if (libc::wchar_t::MIN as i64) < 0 => PrimitiveClass::Signed,
            _ => PrimitiveClass::Unsigned,
        }
    }

    /// Whether the value range includes negative numbers.
    pub fn is_signed(self) -> bool {
        match self.class() {
            PrimitiveClass::Signed | PrimitiveClass::Float => true,
            PrimitiveClass::Char => (c_char::MIN as i64) < 0,
            PrimitiveClass::Unsigned | PrimitiveClass::Bool => false,
        }
    }

    /// Integer-like primitives: everything but `float` and `double`.
    pub fn is_integer(self) -> bool {
        self.class() != PrimitiveClass::Float
    }

    pub fn is_float(self) -> bool {
        self.class() == PrimitiveClass::Float
    }

    /// Inclusive value range for integer-like primitives.
    pub fn int_range(self) -> Option<(i128, i128)> {
        if self.is_float() {
            return None;
        }
        if self == Primitive::Bool {
            return Some((0, 1));
        }
        let bits = (self.size() * 8) as u32;
        if self.is_signed() {
            let max = (1i128 << (bits - 1)) - 1;
            Some((-max - 1, max))
        } else {
            Some((0, (1i128 << bits) - 1))
        }
    }

    /// Rank used by C integer promotions: types narrower than `int` promote to `int`.
    pub fn promotes_to_int(self) -> bool {
        self.is_integer() && self.size() < Primitive::Int.size()
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.c_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_match_host_compiler() {
        assert_eq!(Primitive::Int.size(), size_of::<c_int>());
        assert_eq!(Primitive::Long.size(), size_of::<c_long>());
        assert_eq!(Primitive::Double.align(), align_of::<c_double>());
        assert_eq!(Primitive::Size.size(), size_of::<usize>());
        assert_eq!(Primitive::Bool.size(), 1);
    }

    #[test]
    fn test_builtin_names() {
        assert_eq!(Primitive::from_builtin_name("uint32_t"), Some(Primitive::UInt32));
        assert_eq!(Primitive::from_builtin_name("size_t"), Some(Primitive::Size));
        assert_eq!(Primitive::from_builtin_name("foo_t"), None);
    }

    #[test]
    fn test_ranges() {
        assert_eq!(Primitive::Int8.int_range(), Some((-128, 127)));
        assert_eq!(Primitive::UInt16.int_range(), Some((0, 65535)));
        assert_eq!(Primitive::Bool.int_range(), Some((0, 1)));
        assert_eq!(Primitive::Double.int_range(), None);
        assert_eq!(
            Primitive::UInt64.int_range(),
            Some((0, u64::MAX as i128))
        );
    }

    #[test]
    fn test_classes() {
        assert_eq!(Primitive::Int.class(), PrimitiveClass::Signed);
        assert_eq!(Primitive::Size.class(), PrimitiveClass::Unsigned);
        assert_eq!(Primitive::Char.class(), PrimitiveClass::Char);
        assert!(Primitive::Short.promotes_to_int());
        assert!(!Primitive::Long.promotes_to_int());
    }
}
