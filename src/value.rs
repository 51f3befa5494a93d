//! Foreign Value Wrapper
//!
//! A [`ForeignValue`] is a typed view over a region of foreign-layout memory.
//! The region is either an owned, zero-initialized allocation, memory inside a
//! loaded library (a global variable), or raw native memory handed in through
//! an `unsafe` constructor.
//!
//! Views share their region: a field or element view writes through to the
//! value it came from. Memory is only ever copied in and out; no Rust
//! reference into foreign memory is handed out, since native code may change
//! it at any time.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::Arc;

use crate::ctype::{CType, CTypeKind, Field, Primitive, PrimitiveClass};
use crate::error::{FfiError, Result};
use crate::loader::DynamicLibrary;

/// Host-side representation of a scalar foreign value.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Void,
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    /// An address
    Pointer(usize),
    /// `char`, char arrays and C strings
    Bytes(Vec<u8>),
}

impl HostValue {
    /// Short name of the variant, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            HostValue::Void => "void",
            HostValue::Int(_) => "integer",
            HostValue::UInt(_) => "unsigned integer",
            HostValue::Float(_) => "float",
            HostValue::Bool(_) => "bool",
            HostValue::Pointer(_) => "pointer",
            HostValue::Bytes(_) => "bytes",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HostValue::Int(v) => Some(*v),
            HostValue::UInt(v) => i64::try_from(*v).ok(),
            HostValue::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Void => f.write_str("void"),
            HostValue::Int(v) => write!(f, "{}", v),
            HostValue::UInt(v) => write!(f, "{}", v),
            HostValue::Float(v) => write!(f, "{}", v),
            HostValue::Bool(v) => write!(f, "{}", v),
            HostValue::Pointer(v) => write!(f, "{:#x}", v),
            HostValue::Bytes(b) => write!(f, "{:?}", String::from_utf8_lossy(b)),
        }
    }
}

macro_rules! host_from {
    ($($t:ty => $variant:ident as $conv:ty),* $(,)?) => {
        $(impl From<$t> for HostValue {
            fn from(v: $t) -> Self {
                HostValue::$variant(v as $conv)
            }
        })*
    };
}

host_from!(
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    u8 => UInt as u64,
    u16 => UInt as u64,
    u32 => UInt as u64,
    u64 => UInt as u64,
    f32 => Float as f64,
    f64 => Float as f64,
);

impl From<bool> for HostValue {
    fn from(v: bool) -> Self {
        HostValue::Bool(v)
    }
}

impl From<&str> for HostValue {
    fn from(v: &str) -> Self {
        HostValue::Bytes(v.as_bytes().to_vec())
    }
}

impl From<&[u8]> for HostValue {
    fn from(v: &[u8]) -> Self {
        HostValue::Bytes(v.to_vec())
    }
}

impl From<Vec<u8>> for HostValue {
    fn from(v: Vec<u8>) -> Self {
        HostValue::Bytes(v)
    }
}

/// Who keeps a region's memory valid.
enum Owner {
    /// Allocated here; freed on drop
    Heap(Layout),
    /// Inside a loaded library
    Library(Arc<DynamicLibrary>),
    /// Native memory whose lifetime the caller vouched for
    Foreign,
}

struct Region {
    ptr: NonNull<u8>,
    len: usize,
    owner: Owner,
}

impl Region {
    fn allocate(len: usize, align: usize) -> Result<Self> {
        let layout = Layout::from_size_align(len.max(1), align.max(1))
            .map_err(|e| FfiError::unrepresentable(format!("{} bytes", len), e.to_string()))?;
        // Safety: the layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        Ok(Self {
            ptr,
            len,
            owner: Owner::Heap(layout),
        })
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if let Owner::Heap(layout) = self.owner {
            // Safety: allocated in `Region::allocate` with this layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) }
        }
    }
}

/// A typed view over foreign-layout memory.
#[derive(Clone)]
pub struct ForeignValue {
    ty: CType,
    region: Rc<Region>,
    offset: usize,
    len: usize,
    /// Memory this value points into, kept alive with it
    referent: Option<Rc<Region>>,
}

impl ForeignValue {
    fn from_region(ty: &CType, region: Region) -> Self {
        let len = region.len;
        Self {
            ty: ty.clone(),
            region: Rc::new(region),
            offset: 0,
            len,
            referent: None,
        }
    }

    fn view(&self, ty: &CType, offset: usize, len: usize) -> Self {
        Self {
            ty: ty.clone(),
            region: Rc::clone(&self.region),
            offset: self.offset + offset,
            len,
            referent: self.referent.clone(),
        }
    }

    /// Zero-initialized value of a complete type.
    pub fn new(ty: &CType) -> Result<Self> {
        let size = ty.size()?;
        Ok(Self::from_region(ty, Region::allocate(size, ty.align()?)?))
    }

    /// Zero-initialized value of a flexible array (`int[]`) with `count`
    /// elements, a fixed array, or a struct ending in a flexible array
    /// member with `count` trailing elements.
    pub fn new_array(ty: &CType, count: usize) -> Result<Self> {
        let size = variable_size(ty, count)?;
        Ok(Self::from_region(ty, Region::allocate(size, ty.align()?)?))
    }

    /// Owned copy of `bytes` interpreted as `ty`.
    pub fn wrap(ty: &CType, bytes: &[u8]) -> Result<Self> {
        check_region_len(ty, bytes.len())?;
        let region = Region::allocate(bytes.len(), ty.align()?)?;
        // Safety: the region was just allocated with `bytes.len()` bytes.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), region.ptr.as_ptr(), bytes.len()) };
        Ok(Self::from_region(ty, region))
    }

    /// Borrow native memory as a value of `ty`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for as long as
    /// the returned value (or any view of it) is alive.
    pub unsafe fn from_raw(ty: &CType, ptr: *mut u8, len: usize) -> Result<Self> {
        check_region_len(ty, len)?;
        let ptr = NonNull::new(ptr)
            .ok_or_else(|| FfiError::unrepresentable(ty.c_name(), "null pointer"))?;
        Ok(Self::from_region(
            ty,
            Region {
                ptr,
                len,
                owner: Owner::Foreign,
            },
        ))
    }

    /// A library global of type `ty` at `address`. The library stays loaded
    /// while the value lives.
    pub(crate) fn in_library(ty: &CType, address: usize, library: &Arc<DynamicLibrary>) -> Result<Self> {
        let len = ty.size()?;
        let ptr = NonNull::new(address as *mut u8)
            .ok_or_else(|| FfiError::unrepresentable(ty.c_name(), "null address"))?;
        Ok(Self::from_region(
            ty,
            Region {
                ptr,
                len,
                owner: Owner::Library(Arc::clone(library)),
            },
        ))
    }

    /// The result of a `void` function.
    pub(crate) fn void(ty: &CType) -> Self {
        Self::from_region(
            ty,
            Region {
                ptr: NonNull::dangling(),
                len: 0,
                owner: Owner::Foreign,
            },
        )
    }

    /// Host value converted to `ty`, range checked.
    ///
    /// `Bytes` for a pointer to a char type allocates a NUL-terminated copy
    /// that lives as long as the returned value.
    pub fn from_host(ty: &CType, value: &HostValue) -> Result<Self> {
        if let (Some(pointee), HostValue::Bytes(bytes)) = (ty.pointee(), value) {
            if pointee.is_char_like() || pointee.is_void() {
                let mut text = bytes.clone();
                text.push(0);
                let buffer = Region::allocate(text.len(), 1)?;
                // Safety: fresh allocation of `text.len()` bytes.
                unsafe { std::ptr::copy_nonoverlapping(text.as_ptr(), buffer.ptr.as_ptr(), text.len()) };
                let out = Self::new(ty)?;
                out.set(&HostValue::Pointer(buffer.ptr.as_ptr() as usize))?;
                return Ok(out.with_referent(Rc::new(buffer)));
            }
        }
        let out = if ty.is_flexible_array() {
            match value {
                HostValue::Bytes(b) => Self::new_array(ty, b.len() + 1)?,
                _ => return Err(mismatch(ty, value)),
            }
        } else {
            Self::new(ty)?
        };
        out.set(value)?;
        Ok(out)
    }

    fn with_referent(mut self, referent: Rc<Region>) -> Self {
        self.referent = Some(referent);
        self
    }

    pub fn ctype(&self) -> &CType {
        &self.ty
    }

    /// Size of the viewed region in bytes.
    pub fn size(&self) -> usize {
        self.len
    }

    /// Number of elements of an array value.
    pub fn length(&self) -> Option<usize> {
        let item = self.ty.item()?;
        match self.ty.length() {
            Some(n) => Some(n),
            None => item.size().ok().filter(|s| *s > 0).map(|s| self.len / s),
        }
    }

    /// Address of the first byte.
    pub fn address(&self) -> usize {
        self.as_ptr() as usize
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        // Safety: `offset` is within the region by construction.
        unsafe { self.region.ptr.as_ptr().add(self.offset) }
    }

    /// Copy of the raw bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.read_bytes(0, self.len)
    }

    fn read_bytes(&self, offset: usize, len: usize) -> Vec<u8> {
        debug_assert!(offset + len <= self.len);
        let mut out = vec![0u8; len];
        // Safety: within the region; the copy never aliases `out`.
        unsafe { std::ptr::copy_nonoverlapping(self.as_ptr().add(offset), out.as_mut_ptr(), len) };
        out
    }

    fn write_bytes(&self, offset: usize, bytes: &[u8]) {
        debug_assert!(offset + bytes.len() <= self.len);
        // Safety: within the region; the source is a separate host buffer.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.as_ptr().add(offset), bytes.len()) };
    }

    /// Overwrite the whole region with `bytes`, which must match its size.
    pub fn set_bytes(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.len {
            return Err(FfiError::CastSize {
                from: format!("{} byte buffer", bytes.len()),
                to: self.ty.c_name().to_string(),
                available: bytes.len(),
                required: self.len,
            });
        }
        self.write_bytes(0, bytes);
        Ok(())
    }

    /// Convert to a host value. Aggregates and non-char arrays have no
    /// lossless host form and fail with `Unrepresentable`.
    pub fn to_host(&self) -> Result<HostValue> {
        match self.ty.kind() {
            CTypeKind::Void => Ok(HostValue::Void),
            CTypeKind::Primitive(p) => Ok(decode_primitive(*p, &self.to_bytes())),
            CTypeKind::Enum(e) => match decode_primitive(e.base, &self.to_bytes()) {
                HostValue::UInt(v) => i64::try_from(v)
                    .map(HostValue::Int)
                    .map_err(|_| FfiError::unrepresentable(self.ty.c_name(), "value exceeds i64")),
                other => Ok(other),
            },
            CTypeKind::Pointer(_) => Ok(HostValue::Pointer(self.read_pointer())),
            CTypeKind::Array { item, .. } if item.is_char_like() => {
                let bytes = self.to_bytes();
                let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
                Ok(HostValue::Bytes(bytes[..end].to_vec()))
            }
            _ => Err(FfiError::unrepresentable(
                self.ty.c_name(),
                "no host representation; use fields, elements or bytes",
            )),
        }
    }

    /// Store a host value, range checked.
    pub fn set(&self, value: &HostValue) -> Result<()> {
        match self.ty.kind() {
            CTypeKind::Primitive(p) => {
                let bytes = encode_primitive(&self.ty, *p, value)?;
                self.write_bytes(0, &bytes);
                Ok(())
            }
            CTypeKind::Enum(e) => {
                let bytes = encode_primitive(&self.ty, e.base, value)?;
                self.write_bytes(0, &bytes);
                Ok(())
            }
            CTypeKind::Pointer(_) => {
                let addr = match value {
                    HostValue::Pointer(a) => *a,
                    HostValue::Int(0) | HostValue::UInt(0) => 0,
                    _ => return Err(mismatch(&self.ty, value)),
                };
                self.write_bytes(0, &addr.to_ne_bytes());
                Ok(())
            }
            CTypeKind::Array { item, .. } if item.is_char_like() => match value {
                HostValue::Bytes(b) if b.len() <= self.len => {
                    let mut padded = b.clone();
                    padded.resize(self.len, 0);
                    self.write_bytes(0, &padded);
                    Ok(())
                }
                HostValue::Bytes(b) => Err(FfiError::IndexOutOfBounds {
                    ctype: self.ty.c_name().to_string(),
                    index: b.len(),
                    length: self.len,
                }),
                _ => Err(mismatch(&self.ty, value)),
            },
            CTypeKind::Array { .. } | CTypeKind::Aggregate(_) => match value {
                HostValue::Bytes(b) => self.set_bytes(b),
                _ => Err(mismatch(&self.ty, value)),
            },
            CTypeKind::Void | CTypeKind::Function(_) => Err(FfiError::unrepresentable(
                self.ty.c_name(),
                "cannot store a value",
            )),
        }
    }

    pub(crate) fn read_pointer(&self) -> usize {
        let mut raw = [0u8; std::mem::size_of::<usize>()];
        let len = raw.len();
        raw.copy_from_slice(&self.read_bytes(0, len));
        usize::from_ne_bytes(raw)
    }

    /// Whether a pointer value is NULL.
    pub fn is_null(&self) -> bool {
        self.ty.is_pointer() && self.read_pointer() == 0
    }

    /// Reinterpret the same memory as `ty`.
    ///
    /// Pointer to pointer casts are always allowed. Otherwise `ty` must fit in
    /// the viewed region.
    pub fn cast(&self, ty: &CType) -> Result<Self> {
        if self.ty.is_pointer() && ty.is_pointer() {
            return Ok(self.view(ty, 0, self.len));
        }
        let required = if ty.is_flexible_array() {
            let item = ty.item().map(CType::size).transpose()?.unwrap_or(1).max(1);
            self.len - self.len % item
        } else {
            ty.size()?
        };
        if required > self.len {
            return Err(FfiError::CastSize {
                from: self.ty.c_name().to_string(),
                to: ty.c_name().to_string(),
                available: self.len,
                required,
            });
        }
        Ok(self.view(ty, 0, required))
    }

    /// View of a member; dotted paths walk nested structs.
    ///
    /// A bit-field has no addressable storage of its own, so its value is
    /// returned as a detached copy; use [`set_field`](Self::set_field) to
    /// write it.
    pub fn field(&self, path: &str) -> Result<Self> {
        let field = self.ty.field(path)?;
        if field.bitfield.is_some() {
            let value = self.read_bitfield(&field)?;
            return Self::from_host(&field.ty, &value);
        }
        let len = if field.ty.is_flexible_array() {
            let item = field.ty.item().map(CType::size).transpose()?.unwrap_or(1).max(1);
            let rest = self.len.saturating_sub(field.offset);
            rest - rest % item
        } else {
            field.ty.size()?
        };
        Ok(self.view(&field.ty, field.offset, len))
    }

    /// Store into a member, including bit-fields.
    pub fn set_field(&self, path: &str, value: &HostValue) -> Result<()> {
        let field = self.ty.field(path)?;
        if field.bitfield.is_some() {
            return self.write_bitfield(&field, value);
        }
        self.field(path)?.set(value)
    }

    fn bitfield_span(&self, field: &Field) -> Result<(usize, u32, u32)> {
        let bits = field
            .bitfield
            .ok_or_else(|| FfiError::unrepresentable(field.ty.c_name(), "not a bit-field"))?;
        let span = ((bits.shift + bits.width) as usize).div_ceil(8);
        if span > 8 || field.offset + span > self.len {
            return Err(FfiError::unrepresentable(
                format!("{}:{}", field.name, bits.width),
                "bit-field spans more than 8 bytes",
            ));
        }
        let shift = if cfg!(target_endian = "little") {
            bits.shift
        } else {
            span as u32 * 8 - bits.shift - bits.width
        };
        Ok((span, shift, bits.width))
    }

    fn read_bitfield(&self, field: &Field) -> Result<HostValue> {
        let (span, shift, width) = self.bitfield_span(field)?;
        let raw = read_uint(&self.read_bytes(field.offset, span));
        let mask = low_mask(width);
        let value = (raw >> shift) & mask;
        let prim = field
            .ty
            .scalar_primitive()
            .ok_or_else(|| FfiError::unrepresentable(field.ty.c_name(), "not an integer"))?;
        Ok(match prim.class() {
            PrimitiveClass::Bool => HostValue::Bool(value != 0),
            _ if prim.is_signed() || field.ty.as_enum().is_some() => {
                let unused = 64 - width;
                HostValue::Int(((value << unused) as i64) >> unused)
            }
            _ => HostValue::UInt(value),
        })
    }

    fn write_bitfield(&self, field: &Field, value: &HostValue) -> Result<()> {
        let (span, shift, width) = self.bitfield_span(field)?;
        let prim = field
            .ty
            .scalar_primitive()
            .ok_or_else(|| FfiError::unrepresentable(field.ty.c_name(), "not an integer"))?;
        let v: i128 = match value {
            HostValue::Int(v) => *v as i128,
            HostValue::UInt(v) => *v as i128,
            HostValue::Bool(b) => *b as i128,
            _ => return Err(mismatch(&field.ty, value)),
        };
        let (lo, hi) = if prim.is_signed() {
            (-(1i128 << (width - 1)), (1i128 << (width - 1)) - 1)
        } else {
            (0, (1i128 << width) - 1)
        };
        if v < lo || v > hi {
            return Err(FfiError::unrepresentable(
                format!("{}:{}", field.name, width),
                format!("value {} out of range {}..={}", v, lo, hi),
            ));
        }
        let mask = low_mask(width) << shift;
        let raw = read_uint(&self.read_bytes(field.offset, span));
        let updated = (raw & !mask) | (((v as u64) << shift) & mask);
        let mut bytes = vec![0u8; span];
        write_uint(updated, &mut bytes);
        self.write_bytes(field.offset, &bytes);
        Ok(())
    }

    /// View of array element `index`.
    pub fn index(&self, index: usize) -> Result<Self> {
        let item = self
            .ty
            .item()
            .ok_or_else(|| FfiError::unrepresentable(self.ty.c_name(), "not an array"))?;
        let length = self.length().unwrap_or(0);
        if index >= length {
            return Err(FfiError::IndexOutOfBounds {
                ctype: self.ty.c_name().to_string(),
                index,
                length,
            });
        }
        let size = item.size()?;
        Ok(self.view(item, index * size, size))
    }

    pub fn set_index(&self, index: usize, value: &HostValue) -> Result<()> {
        self.index(index)?.set(value)
    }

    /// A pointer value of type `pointer_ty` holding this value's address.
    /// The pointed-to memory stays alive as long as the pointer value does.
    pub fn address_of(&self, pointer_ty: &CType) -> Result<Self> {
        if !pointer_ty.is_pointer() {
            return Err(FfiError::unrepresentable(pointer_ty.c_name(), "not a pointer type"));
        }
        let out = Self::new(pointer_ty)?;
        out.set(&HostValue::Pointer(self.address()))?;
        Ok(out.with_referent(Rc::clone(&self.region)))
    }

    /// Follow a pointer to a view of its complete pointee.
    ///
    /// # Safety
    ///
    /// The pointer must address a live object of the pointee type.
    pub unsafe fn deref(&self) -> Result<Self> {
        let pointee = self
            .ty
            .pointee()
            .ok_or_else(|| FfiError::unrepresentable(self.ty.c_name(), "not a pointer"))?;
        let size = pointee.size()?;
        let addr = self.read_pointer();
        let mut out = Self::from_raw(pointee, addr as *mut u8, size)?;
        out.referent = self.referent.clone();
        Ok(out)
    }

    /// Bytes of a char array up to the first NUL, or a single `char`.
    pub fn string(&self) -> Result<Vec<u8>> {
        match self.to_host()? {
            HostValue::Bytes(b) => Ok(b),
            _ if self.ty.is_pointer() => Err(FfiError::unrepresentable(
                self.ty.c_name(),
                "pointer targets are read with read_c_string",
            )),
            _ => Err(FfiError::unrepresentable(self.ty.c_name(), "not a char array")),
        }
    }

    /// Copy of the NUL-terminated string a char pointer points at.
    ///
    /// # Safety
    ///
    /// The pointer must address a NUL-terminated string.
    pub unsafe fn read_c_string(&self) -> Result<Vec<u8>> {
        if !self.ty.pointee().is_some_and(|p| p.is_char_like()) {
            return Err(FfiError::unrepresentable(self.ty.c_name(), "not a char pointer"));
        }
        let addr = self.read_pointer();
        if addr == 0 {
            return Err(FfiError::unrepresentable(self.ty.c_name(), "null pointer"));
        }
        Ok(std::ffi::CStr::from_ptr(addr as *const std::ffi::c_char)
            .to_bytes()
            .to_vec())
    }

    /// Owned copy in fresh memory, with the same referent.
    pub fn detached_copy(&self) -> Result<Self> {
        let region = Region::allocate(self.len, self.ty.align().unwrap_or(1))?;
        // Safety: both regions hold `self.len` bytes and do not overlap.
        unsafe { std::ptr::copy_nonoverlapping(self.as_ptr(), region.ptr.as_ptr(), self.len) };
        let mut out = Self::from_region(&self.ty, region);
        out.referent = self.referent.clone();
        Ok(out)
    }
}

impl fmt::Debug for ForeignValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_host() {
            Ok(v) if !self.ty.is_void() => write!(f, "<cdata '{}' {}>", self.ty.c_name(), v),
            _ => write!(f, "<cdata '{}' {:#x}>", self.ty.c_name(), self.address()),
        }
    }
}

/// Bytes needed for `ty` with `count` variable elements.
fn variable_size(ty: &CType, count: usize) -> Result<usize> {
    let overflow = || FfiError::invalid_layout(ty.c_name(), "size overflows");
    if let Some(item) = ty.item() {
        return item.size()?.checked_mul(count).ok_or_else(overflow);
    }
    let layout = ty.layout()?;
    let tail = layout
        .members
        .last()
        .filter(|f| f.ty.is_flexible_array())
        .and_then(|f| f.ty.item().map(|item| (f.offset, item.clone())));
    match tail {
        Some((offset, item)) => {
            let end = item
                .size()?
                .checked_mul(count)
                .and_then(|n| n.checked_add(offset))
                .ok_or_else(overflow)?;
            Ok(end.max(layout.size))
        }
        None => Err(FfiError::unrepresentable(
            ty.c_name(),
            "has no flexible array member",
        )),
    }
}

/// A region of `len` bytes must exactly fit `ty`, or hold whole elements of a
/// flexible array.
fn check_region_len(ty: &CType, len: usize) -> Result<()> {
    let required = if ty.is_flexible_array() {
        let item = ty.item().map(CType::size).transpose()?.unwrap_or(1).max(1);
        if len % item == 0 {
            return Ok(());
        }
        len.div_ceil(item) * item
    } else if ty.layout().is_ok_and(|l| l.flexible) {
        let size = ty.size()?;
        if len >= size {
            return Ok(());
        }
        size
    } else {
        ty.size()?
    };
    if len == required {
        return Ok(());
    }
    Err(FfiError::CastSize {
        from: format!("{} byte buffer", len),
        to: ty.c_name().to_string(),
        available: len,
        required,
    })
}

fn mismatch(ty: &CType, value: &HostValue) -> FfiError {
    FfiError::unrepresentable(
        ty.c_name(),
        format!("cannot store {} value", value.kind_name()),
    )
}

fn low_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Native-endian unsigned integer from up to 8 bytes.
pub(crate) fn read_uint(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    if cfg!(target_endian = "little") {
        buf[..n].copy_from_slice(&bytes[..n]);
        u64::from_le_bytes(buf)
    } else {
        buf[8 - n..].copy_from_slice(&bytes[..n]);
        u64::from_be_bytes(buf)
    }
}

/// Native-endian store of the low `out.len()` bytes of `value`.
pub(crate) fn write_uint(value: u64, out: &mut [u8]) {
    let n = out.len().min(8);
    if cfg!(target_endian = "little") {
        out[..n].copy_from_slice(&value.to_le_bytes()[..n]);
    } else {
        out[..n].copy_from_slice(&value.to_be_bytes()[8 - n..]);
    }
}

fn decode_primitive(p: Primitive, bytes: &[u8]) -> HostValue {
    let size = p.size();
    match p {
        Primitive::Float => {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[..4]);
            return HostValue::Float(f32::from_ne_bytes(raw) as f64);
        }
        Primitive::Double => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            return HostValue::Float(f64::from_ne_bytes(raw));
        }
        Primitive::WChar | Primitive::Char16 | Primitive::Char32 => {
            return HostValue::UInt(read_uint(&bytes[..size]))
        }
        _ => {}
    }
    let raw = read_uint(&bytes[..size]);
    match p.class() {
        PrimitiveClass::Bool => HostValue::Bool(raw != 0),
        PrimitiveClass::Char => HostValue::Bytes(vec![bytes[0]]),
        PrimitiveClass::Signed => {
            let unused = 64 - size as u32 * 8;
            HostValue::Int(((raw << unused) as i64) >> unused)
        }
        _ => HostValue::UInt(raw),
    }
}

fn encode_primitive(ty: &CType, p: Primitive, value: &HostValue) -> Result<Vec<u8>> {
    if p.is_float() {
        let f = match value {
            HostValue::Float(f) => *f,
            HostValue::Int(i) => *i as f64,
            HostValue::UInt(u) => *u as f64,
            _ => return Err(mismatch(ty, value)),
        };
        return Ok(if p == Primitive::Float {
            (f as f32).to_ne_bytes().to_vec()
        } else {
            f.to_ne_bytes().to_vec()
        });
    }

    let v: i128 = match value {
        HostValue::Int(i) => *i as i128,
        HostValue::UInt(u) => *u as i128,
        HostValue::Bool(b) => *b as i128,
        HostValue::Bytes(b) if b.len() == 1 && p.size() == 1 => {
            if p.is_signed() {
                b[0] as i8 as i128
            } else {
                b[0] as i128
            }
        }
        _ => return Err(mismatch(ty, value)),
    };
    let (lo, hi) = match p {
        // wide character types take any code unit of their width
        Primitive::WChar | Primitive::Char16 | Primitive::Char32 => {
            let bits = p.size() as u32 * 8;
            (-(1i128 << (bits - 1)), (1i128 << bits) - 1)
        }
        _ => p
            .int_range()
            .ok_or_else(|| FfiError::unrepresentable(ty.c_name(), "not an integer type"))?,
    };
    if v < lo || v > hi {
        return Err(FfiError::unrepresentable(
            ty.c_name(),
            format!("value {} out of range {}..={}", v, lo, hi),
        ));
    }
    let mut out = vec![0u8; p.size()];
    write_uint(v as u64, &mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_declarations, parse_type};
    use crate::registry::TypeRegistry;

    #[test]
    fn test_int_round_trip() {
        let reg = TypeRegistry::new();
        let int = parse_type("int32_t", &reg).unwrap();
        let v = ForeignValue::wrap(&int, &(-123456i32).to_ne_bytes()).unwrap();
        assert_eq!(v.to_host().unwrap(), HostValue::Int(-123456));
        assert!(ForeignValue::wrap(&int, &[0u8; 3]).is_err());
    }

    #[test]
    fn test_range_checks() {
        let reg = TypeRegistry::new();
        let u8t = parse_type("uint8_t", &reg).unwrap();
        assert!(ForeignValue::from_host(&u8t, &HostValue::Int(255)).is_ok());
        assert!(matches!(
            ForeignValue::from_host(&u8t, &HostValue::Int(256)),
            Err(FfiError::Unrepresentable { .. })
        ));
        assert!(ForeignValue::from_host(&u8t, &HostValue::Int(-1)).is_err());
        assert!(ForeignValue::from_host(&u8t, &HostValue::Float(1.0)).is_err());
    }

    #[test]
    fn test_char_array_string() {
        let reg = TypeRegistry::new();
        let arr = parse_type("char[8]", &reg).unwrap();
        let v = ForeignValue::from_host(&arr, &HostValue::from("hi")).unwrap();
        assert_eq!(v.string().unwrap(), b"hi");
        assert_eq!(v.size(), 8);
        assert!(v.set(&HostValue::from("far too long")).is_err());
    }

    #[test]
    fn test_bitfield_access() {
        let reg = TypeRegistry::new();
        parse_declarations("struct flags { unsigned a : 3; int b : 4; unsigned c : 1; };", &reg).unwrap();
        let ty = reg.lookup_tag("flags").unwrap();
        let v = ForeignValue::new(&ty).unwrap();
        v.set_field("a", &HostValue::UInt(5)).unwrap();
        v.set_field("b", &HostValue::Int(-3)).unwrap();
        v.set_field("c", &HostValue::UInt(1)).unwrap();
        assert_eq!(v.field("a").unwrap().to_host().unwrap(), HostValue::UInt(5));
        assert_eq!(v.field("b").unwrap().to_host().unwrap(), HostValue::Int(-3));
        assert_eq!(v.field("c").unwrap().to_host().unwrap(), HostValue::UInt(1));
        assert!(v.set_field("a", &HostValue::UInt(8)).is_err());
        #[cfg(target_endian = "little")]
        assert_eq!(v.to_bytes()[0], 0b1_1101_101);
    }

    #[test]
    fn test_pointer_keeps_referent_alive() {
        let reg = TypeRegistry::new();
        let int = parse_type("int", &reg).unwrap();
        let ptr_ty = reg.pointer_to(&int);
        let ptr = {
            let target = ForeignValue::from_host(&int, &HostValue::Int(77)).unwrap();
            target.address_of(&ptr_ty).unwrap()
        };
        let back = unsafe { ptr.deref() }.unwrap();
        assert_eq!(back.to_host().unwrap(), HostValue::Int(77));
    }

    #[test]
    fn test_bytes_to_char_pointer() {
        let reg = TypeRegistry::new();
        let ty = parse_type("const char *", &reg).unwrap();
        let v = ForeignValue::from_host(&ty, &HostValue::from("hello")).unwrap();
        assert!(!v.is_null());
        assert_eq!(unsafe { v.read_c_string() }.unwrap(), b"hello");
    }

    #[test]
    fn test_flexible_struct() {
        let reg = TypeRegistry::new();
        parse_declarations("struct vec { int n; int data[]; };", &reg).unwrap();
        let ty = reg.lookup_tag("vec").unwrap();
        let v = ForeignValue::new_array(&ty, 3).unwrap();
        assert_eq!(v.size(), 4 * std::mem::size_of::<std::ffi::c_int>());
        let data = v.field("data").unwrap();
        assert_eq!(data.length(), Some(3));
        data.set_index(2, &HostValue::Int(9)).unwrap();
        assert_eq!(v.field("data").unwrap().index(2).unwrap().to_host().unwrap(), HostValue::Int(9));
        assert!(matches!(data.index(3), Err(FfiError::IndexOutOfBounds { .. })));
    }
}
