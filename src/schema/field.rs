//! Compiled field model: the closed construct-kind set of §3.3.
//!
//! Generalizes `bitcraft::field::{Field, FieldKind, ArraySpec}` (scalar or
//! fixed-array-of-scalar only) to every kind a wire format needs.

use crate::bitstream::Endianness;
use crate::expr::Expr;
use crate::schema::computed::Computed;
use crate::schema::union::UnionDef;

/// A literal value fixed by the schema itself (a `const`-valued field, used
/// for magic numbers and inline-choice discriminators).
#[derive(Debug, Clone, PartialEq)]
pub enum ConstLiteral {
    Int(i128),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Ascii,
    Latin1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixWidth {
    U8,
    U16,
    U32,
    U64,
}

impl PrefixWidth {
    pub fn bits(self) -> usize {
        match self {
            PrefixWidth::U8 => 8,
            PrefixWidth::U16 => 16,
            PrefixWidth::U32 => 32,
            PrefixWidth::U64 => 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringLen {
    Fixed(usize),
    LengthPrefixed(PrefixWidth),
    NullTerminated,
    /// Length from an earlier field, by name.
    FieldReferenced(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringSpec {
    pub length: StringLen,
    pub encoding: TextEncoding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayLen {
    Fixed(usize),
    /// Element count in the prefix.
    LengthPrefixed(PrefixWidth),
    /// Element count from an earlier field, by name.
    FieldReferenced(String),
    /// Byte count in the prefix; items decoded until that many bytes are
    /// consumed.
    ByteLengthPrefixed(PrefixWidth),
    /// Items decoded until end of the bounded region (end of buffer, or
    /// an instance's `size`).
    EofTerminated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArraySpec {
    pub length: ArrayLen,
    pub item: Box<Field>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarlengthEncoding {
    Der,
    Leb128,
    Ebml,
    Vlq,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubField {
    pub name: String,
    pub offset: usize,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    UInt(u8),
    Int(u8),
    Float32,
    Float64,
    /// An N-bit unsigned integer, `1 <= size <= 64`.
    BitField { size: usize },
    /// A byte-aligned block of fixed bit-size with named `(offset, size)`
    /// sub-fields, which need not collectively cover the block.
    BitfieldContainer { size: usize, subfields: Vec<SubField> },
    StringField(StringSpec),
    ArrayField(ArraySpec),
    Varlength(VarlengthEncoding),
    /// Names another type in the schema.
    TypeRef(String),
    /// `type: "choice"`: candidate types, each with a `const`-valued first
    /// field used as the decode-time discriminator.
    Choice(Vec<String>),
    /// Inline discriminated union (§3.6).
    Union(UnionDef),
    /// Compression-pointer reference to another type (§3.7). Inline form;
    /// top-level back-reference *types* compile to a one-field sequence
    /// wrapping this kind, the same way a type alias wraps a leaf.
    BackReference(crate::schema::backref::BackRefDef),
    /// Marker that the field may be absent. Not well-defined on the wire:
    /// encode emits the inner value if supplied, decode always raises
    /// `SchemaInvalid` (documented decision, DESIGN.md).
    Optional(Box<FieldKind>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub description: Option<String>,
    pub conditional: Option<Expr>,
    pub endianness: Option<Endianness>,
    pub computed: Option<Computed>,
    pub const_value: Option<ConstLiteral>,
}

impl Field {
    pub fn is_unsigned_integer_or_varlength(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::UInt(_) | FieldKind::BitField { .. } | FieldKind::Varlength(_)
        )
    }
}
