//! Struct and union layout
//!
//! Natural alignment rules: every member starts at the next offset that is a
//! multiple of its alignment, and the aggregate size is rounded up to the
//! largest member alignment. Bit-fields follow the System V rule: a bit-field
//! stays at the current bit position unless it would cross a storage unit of
//! its declared type, in which case it moves to the next unit.

use std::collections::HashSet;

use super::{AggregateKind, CType};
use crate::error::{FfiError, Result};

/// One declared member, as produced by the parser.
#[derive(Debug, Clone)]
pub struct Member {
    /// `None` for anonymous struct/union members and unnamed bit-fields
    pub name: Option<String>,
    pub ty: CType,
    pub bit_width: Option<u32>,
}

impl Member {
    pub fn named(name: impl Into<String>, ty: &CType) -> Self {
        Self {
            name: Some(name.into()),
            ty: ty.clone(),
            bit_width: None,
        }
    }

    pub fn anonymous(ty: &CType) -> Self {
        Self {
            name: None,
            ty: ty.clone(),
            bit_width: None,
        }
    }

    pub fn bits(name: Option<&str>, ty: &CType, width: u32) -> Self {
        Self {
            name: name.map(str::to_string),
            ty: ty.clone(),
            bit_width: Some(width),
        }
    }
}

/// Placement of a bit-field inside its storage unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub width: u32,
    /// Bit position counted from the least significant bit of the unit
    /// starting at the field offset (allocation order on little-endian targets).
    pub shift: u32,
}

/// A laid-out member.
#[derive(Debug, Clone)]
pub struct Field {
    /// Empty for anonymous struct/union members
    pub name: String,
    pub ty: CType,
    pub offset: usize,
    pub bitfield: Option<BitField>,
}

impl Field {
    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty()
    }
}

/// Completed layout of a struct or union.
#[derive(Debug, Clone)]
pub struct AggregateLayout {
    /// Direct members in declaration order; anonymous aggregates appear once, unnamed
    pub members: Vec<Field>,
    pub size: usize,
    pub align: usize,
    /// Some member sits below its natural alignment
    pub packed: bool,
    pub has_bitfields: bool,
    /// Ends in a flexible array member (directly or through a nested struct)
    pub flexible: bool,
}

impl AggregateLayout {
    /// Find a member by name, looking through anonymous members.
    /// The returned offset is relative to this aggregate.
    pub fn find(&self, name: &str) -> Option<Field> {
        for member in &self.members {
            if member.name == name {
                return Some(member.clone());
            }
            if member.is_anonymous() {
                if let Some(inner) = member.ty.as_aggregate().and_then(|a| a.layout()) {
                    if let Some(found) = inner.find(name) {
                        return Some(Field {
                            offset: member.offset + found.offset,
                            ..found
                        });
                    }
                }
            }
        }
        None
    }

    /// Named members with anonymous aggregates flattened in.
    pub fn fields(&self) -> Vec<Field> {
        let mut out = Vec::with_capacity(self.members.len());
        for member in &self.members {
            if member.is_anonymous() {
                if let Some(inner) = member.ty.as_aggregate().and_then(|a| a.layout()) {
                    out.extend(inner.fields().into_iter().map(|f| Field {
                        offset: member.offset + f.offset,
                        ..f
                    }));
                }
            } else {
                out.push(member.clone());
            }
        }
        out
    }
}

fn round_up(value: usize, align: usize) -> usize {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

fn cap(align: usize, pack: Option<usize>) -> usize {
    match pack {
        Some(p) if p > 0 => align.min(p),
        _ => align,
    }
}

/// Lay out `members` as a struct or union named `name`.
///
/// `pack` caps member alignment (`#pragma pack(n)` semantics); `None` keeps
/// natural alignment.
pub fn compute(
    kind: AggregateKind,
    name: &str,
    members: &[Member],
    pack: Option<usize>,
) -> Result<AggregateLayout> {
    let full_name = format!("{} {}", kind.keyword(), name);
    let invalid = |reason: String| FfiError::invalid_layout(full_name.clone(), reason);

    let mut fields = Vec::with_capacity(members.len());
    let mut names: HashSet<String> = HashSet::new();
    let mut bit_pos = 0usize;
    let mut union_size = 0usize;
    let mut align = 1usize;
    let mut packed = false;
    let mut has_bitfields = false;
    let mut flexible = false;

    for (index, member) in members.iter().enumerate() {
        let is_last = index + 1 == members.len();
        let label = member.name.as_deref().unwrap_or("<anonymous>");

        if member.ty.is_function() || member.ty.is_void() {
            return Err(invalid(format!(
                "member '{}' has type '{}'",
                label,
                member.ty.c_name()
            )));
        }

        match &member.name {
            Some(n) => {
                if !names.insert(n.clone()) {
                    return Err(invalid(format!("duplicate member '{}'", n)));
                }
            }
            None if member.bit_width.is_none() => {
                let inner = member.ty.layout().map_err(|_| {
                    invalid(format!(
                        "unnamed member of type '{}' declares nothing",
                        member.ty.c_name()
                    ))
                })?;
                for f in inner.fields() {
                    if !names.insert(f.name.clone()) {
                        return Err(invalid(format!("duplicate member '{}'", f.name)));
                    }
                }
            }
            None => {}
        }

        if let Some(width) = member.bit_width {
            let prim = member
                .ty
                .scalar_primitive()
                .filter(|p| p.is_integer())
                .ok_or_else(|| {
                    invalid(format!(
                        "bit-field '{}' has non-integer type '{}'",
                        label,
                        member.ty.c_name()
                    ))
                })?;
            let unit_bits = prim.size() * 8;
            if width as usize > unit_bits {
                return Err(invalid(format!(
                    "width of bit-field '{}' ({} bits) exceeds its type ({} bits)",
                    label, width, unit_bits
                )));
            }
            if width == 0 && member.name.is_some() {
                return Err(invalid(format!("zero-width bit-field '{}' must be unnamed", label)));
            }
            has_bitfields = true;
            let unit_align_bits = cap(prim.align(), pack) * 8;

            match kind {
                AggregateKind::Struct => {
                    if width == 0 {
                        bit_pos = round_up(bit_pos, unit_align_bits);
                        continue;
                    }
                    let mut start = bit_pos - bit_pos % unit_align_bits;
                    if start + unit_bits < bit_pos + width as usize {
                        bit_pos = round_up(bit_pos, unit_align_bits);
                        start = bit_pos;
                    }
                    if let Some(n) = &member.name {
                        align = align.max(unit_align_bits / 8);
                        fields.push(Field {
                            name: n.clone(),
                            ty: member.ty.clone(),
                            offset: start / 8,
                            bitfield: Some(BitField {
                                width,
                                shift: (bit_pos - start) as u32,
                            }),
                        });
                    }
                    bit_pos += width as usize;
                }
                AggregateKind::Union => {
                    if width == 0 {
                        continue;
                    }
                    union_size = union_size.max((width as usize).div_ceil(8));
                    if let Some(n) = &member.name {
                        align = align.max(unit_align_bits / 8);
                        fields.push(Field {
                            name: n.clone(),
                            ty: member.ty.clone(),
                            offset: 0,
                            bitfield: Some(BitField { width, shift: 0 }),
                        });
                    }
                }
            }
            continue;
        }

        let (member_size, natural_align) = if member.ty.is_flexible_array() {
            if kind == AggregateKind::Union || !is_last {
                return Err(invalid(format!(
                    "flexible array member '{}' must be the last member of a struct",
                    label
                )));
            }
            flexible = true;
            (0, member.ty.align()?)
        } else {
            (member.ty.size()?, member.ty.align()?)
        };

        if member.ty.layout().is_ok_and(|l| l.flexible) {
            if kind == AggregateKind::Union || !is_last {
                return Err(invalid(format!(
                    "member '{}' ends in a flexible array and must be last",
                    label
                )));
            }
            flexible = true;
        }

        let member_align = cap(natural_align, pack);
        if member_align < natural_align {
            packed = true;
        }

        let offset = match kind {
            AggregateKind::Struct => {
                let offset = round_up(bit_pos.div_ceil(8), member_align);
                bit_pos = (offset + member_size) * 8;
                offset
            }
            AggregateKind::Union => {
                union_size = union_size.max(member_size);
                0
            }
        };
        align = align.max(member_align);
        fields.push(Field {
            name: member.name.clone().unwrap_or_default(),
            ty: member.ty.clone(),
            offset,
            bitfield: None,
        });
    }

    let raw_size = match kind {
        AggregateKind::Struct => bit_pos.div_ceil(8),
        AggregateKind::Union => union_size,
    };

    Ok(AggregateLayout {
        members: fields,
        size: round_up(raw_size, align),
        align,
        packed,
        has_bitfields,
        flexible,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctype::Primitive;

    fn prim(p: Primitive) -> CType {
        CType::primitive(p)
    }

    #[test]
    fn test_char_int_struct() {
        let layout = compute(
            AggregateKind::Struct,
            "s",
            &[
                Member::named("a", &prim(Primitive::Char)),
                Member::named("b", &prim(Primitive::Int32)),
            ],
            None,
        )
        .unwrap();
        assert_eq!(layout.size, 8);
        assert_eq!(layout.align, 4);
        assert_eq!(layout.find("a").unwrap().offset, 0);
        assert_eq!(layout.find("b").unwrap().offset, 4);
    }

    #[test]
    fn test_union_layout() {
        let layout = compute(
            AggregateKind::Union,
            "u",
            &[
                Member::named("c", &prim(Primitive::Char)),
                Member::named("d", &prim(Primitive::Int64)),
                Member::named("s", &CType::array_of(&prim(Primitive::Char), Some(9))),
            ],
            None,
        )
        .unwrap();
        assert_eq!(layout.align, 8);
        assert_eq!(layout.size, 16);
        assert!(layout.members.iter().all(|f| f.offset == 0));
    }

    #[test]
    fn test_trailing_padding() {
        let layout = compute(
            AggregateKind::Struct,
            "s",
            &[
                Member::named("d", &prim(Primitive::Int64)),
                Member::named("c", &prim(Primitive::Char)),
            ],
            None,
        )
        .unwrap();
        assert_eq!(layout.size, 16);
    }

    #[test]
    fn test_packed() {
        let layout = compute(
            AggregateKind::Struct,
            "p",
            &[
                Member::named("a", &prim(Primitive::Char)),
                Member::named("b", &prim(Primitive::Int32)),
            ],
            Some(1),
        )
        .unwrap();
        assert_eq!(layout.size, 5);
        assert_eq!(layout.align, 1);
        assert!(layout.packed);
    }

    #[test]
    fn test_bitfields() {
        let uint = prim(Primitive::UInt32);
        let layout = compute(
            AggregateKind::Struct,
            "flags",
            &[
                Member::bits(Some("a"), &uint, 3),
                Member::bits(Some("b"), &uint, 5),
                Member::bits(Some("c"), &uint, 30),
            ],
            None,
        )
        .unwrap();
        let a = layout.find("a").unwrap();
        let b = layout.find("b").unwrap();
        let c = layout.find("c").unwrap();
        assert_eq!((a.offset, a.bitfield.unwrap().shift), (0, 0));
        assert_eq!((b.offset, b.bitfield.unwrap().shift), (0, 3));
        // 8 + 30 crosses the first 32-bit unit
        assert_eq!((c.offset, c.bitfield.unwrap().shift), (4, 0));
        assert_eq!(layout.size, 8);
        assert!(layout.has_bitfields);
    }

    #[test]
    fn test_zero_width_bitfield_aligns() {
        let uint = prim(Primitive::UInt32);
        let layout = compute(
            AggregateKind::Struct,
            "z",
            &[
                Member::bits(Some("a"), &uint, 1),
                Member::bits(None, &uint, 0),
                Member::bits(Some("b"), &uint, 1),
            ],
            None,
        )
        .unwrap();
        assert_eq!(layout.find("b").unwrap().offset, 4);
        assert_eq!(layout.size, 8);
    }

    #[test]
    fn test_flexible_array_last_only() {
        let int = prim(Primitive::Int);
        let flex = CType::array_of(&int, None);
        let ok = compute(
            AggregateKind::Struct,
            "v",
            &[Member::named("n", &int), Member::named("data", &flex)],
            None,
        )
        .unwrap();
        assert!(ok.flexible);
        assert_eq!(ok.size, int.size().unwrap());
        assert_eq!(ok.find("data").unwrap().offset, int.size().unwrap());

        let err = compute(
            AggregateKind::Struct,
            "bad",
            &[Member::named("data", &flex), Member::named("n", &int)],
            None,
        );
        assert!(matches!(err, Err(FfiError::InvalidLayout { .. })));
    }

    #[test]
    fn test_duplicate_member() {
        let int = prim(Primitive::Int);
        let err = compute(
            AggregateKind::Struct,
            "d",
            &[Member::named("x", &int), Member::named("x", &int)],
            None,
        );
        assert!(matches!(err, Err(FfiError::InvalidLayout { .. })));
    }

    #[test]
    fn test_bitfield_too_wide() {
        let err = compute(
            AggregateKind::Struct,
            "w",
            &[Member::bits(Some("x"), &prim(Primitive::UInt8), 9)],
            None,
        );
        assert!(matches!(err, Err(FfiError::InvalidLayout { .. })));
    }
}
