//! Raw JSON schema shape and its conversion into the compiled model.
//!
//! The authoring surface (an external schema-builder layer analogous to
//! `bitcraft-wasm`'s typed bindings) is out of scope here, so this module
//! defines its own plain-JSON wire shape for a `Schema`, tagged the way
//! `struct-compression-analyzer::schema::FieldDefinition` tags its field
//! variants (`#[serde(tag = "kind", rename_all = "snake_case")]`), and
//! converts it into `schema::{Field, TypeDef, ...}` via `TryFrom`, the same
//! two-phase pattern `bitcraft::serde` uses for `SchemaDef -> Schema`.

use std::collections::HashMap;

use serde::Deserialize;

use crate::bitstream::Endianness;
use crate::error::{BinSchemaError, Result};
use crate::expr::{self, Expr};
use crate::schema::backref::{BackRefDef, OffsetFrom};
use crate::schema::computed::{Computed, ComputedKind};
use crate::schema::field::{
    ArrayLen, ArraySpec, ConstLiteral, Field, FieldKind, PrefixWidth, StringLen, StringSpec,
    SubField, TextEncoding, VarlengthEncoding,
};
use crate::schema::path::{self, TargetPath};
use crate::schema::union::{Discriminator, UnionDef, Variant};
use crate::schema::{Config, Instance, Schema, SequenceType, TypeDef};

#[derive(Debug, Deserialize)]
pub struct SchemaDef {
    #[serde(default)]
    pub config: ConfigDef,
    pub types: HashMap<String, TypeDefRaw>,
}

#[derive(Debug, Deserialize)]
pub struct ConfigDef {
    #[serde(default)]
    pub endianness: EndiannessDef,
    #[serde(default)]
    pub bit_order: BitOrderDef,
}

impl Default for ConfigDef {
    fn default() -> Self {
        ConfigDef {
            endianness: EndiannessDef::default(),
            bit_order: BitOrderDef::default(),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum EndiannessDef {
    #[default]
    Big,
    Little,
}

impl From<EndiannessDef> for Endianness {
    fn from(v: EndiannessDef) -> Self {
        match v {
            EndiannessDef::Big => Endianness::Big,
            EndiannessDef::Little => Endianness::Little,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum BitOrderDef {
    #[default]
    MsbFirst,
    LsbFirst,
}

impl From<BitOrderDef> for crate::bitstream::BitOrder {
    fn from(v: BitOrderDef) -> Self {
        match v {
            BitOrderDef::MsbFirst => crate::bitstream::BitOrder::MsbFirst,
            BitOrderDef::LsbFirst => crate::bitstream::BitOrder::LsbFirst,
        }
    }
}

/// Top-level named type: a field sequence, a union, or a back-reference.
/// A plain type *alias* (one leaf field with no `name`) is expressed as a
/// `Sequence` with a single synthetic field named `"value"`, the same
/// normalization §4.B calls for.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeDefRaw {
    Sequence {
        #[serde(default)]
        fields: Vec<FieldDef>,
        #[serde(default)]
        instances: Vec<InstanceDef>,
    },
    Alias {
        #[serde(flatten)]
        field: FieldDef,
    },
    Union(UnionDefRaw),
    BackReference(BackRefDefRaw),
}

#[derive(Debug, Deserialize)]
pub struct InstanceDef {
    pub name: String,
    pub position: String,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Deserialize)]
pub struct UnionDefRaw {
    pub discriminator: DiscriminatorDef,
    pub variants: Vec<VariantDef>,
    #[serde(default)]
    pub byte_budget_field: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DiscriminatorDef {
    Peek {
        width: u8,
        #[serde(default)]
        endianness: Option<EndiannessDef>,
    },
    Field { name: String },
}

#[derive(Debug, Deserialize)]
pub struct VariantDef {
    #[serde(default)]
    pub when: Option<String>,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Deserialize)]
pub struct BackRefDefRaw {
    pub storage_width: u8,
    pub offset_mask: u64,
    pub marker_value: u64,
    pub offset_from: OffsetFromDef,
    pub target_type: String,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum OffsetFromDef {
    MessageStart,
    CurrentPosition,
}

impl From<OffsetFromDef> for OffsetFrom {
    fn from(v: OffsetFromDef) -> Self {
        match v {
            OffsetFromDef::MessageStart => OffsetFrom::MessageStart,
            OffsetFromDef::CurrentPosition => OffsetFrom::CurrentPosition,
        }
    }
}

/// Mirrors `FieldKind`, but every nested field/type reference is still raw
/// JSON (`serde_json::Value` for const literals, `String` for expressions).
#[derive(Debug, Deserialize)]
pub struct FieldDef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: FieldKindDef,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub conditional: Option<String>,
    #[serde(default)]
    pub endianness: Option<EndiannessDef>,
    #[serde(default)]
    pub computed: Option<ComputedDef>,
    #[serde(default)]
    pub const_value: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKindDef {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bits {
        size: usize,
    },
    Bitfield {
        size: usize,
        subfields: Vec<SubFieldDef>,
    },
    String(StringSpecDef),
    Array {
        length: ArrayLenDef,
        item: Box<FieldDef>,
    },
    Varlength {
        encoding: VarlengthEncodingDef,
    },
    TypeRef {
        // Renamed on the wire: `FieldDef::name` (the field's own name) is
        // flattened alongside this variant, and both would otherwise bind to
        // the same JSON key.
        #[serde(rename = "ref")]
        name: String,
    },
    Choice {
        options: Vec<String>,
    },
    Union(UnionDefRaw),
    BackReference(BackRefDefRaw),
    Optional {
        inner: Box<FieldDef>,
    },
}

#[derive(Debug, Deserialize)]
pub struct SubFieldDef {
    pub name: String,
    pub offset: usize,
    pub size: usize,
}

#[derive(Debug, Deserialize)]
pub struct StringSpecDef {
    pub length: StringLenDef,
    #[serde(default)]
    pub encoding: TextEncodingDef,
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum TextEncodingDef {
    #[default]
    Utf8,
    Ascii,
    Latin1,
}

impl From<TextEncodingDef> for TextEncoding {
    fn from(v: TextEncodingDef) -> Self {
        match v {
            TextEncodingDef::Utf8 => TextEncoding::Utf8,
            TextEncodingDef::Ascii => TextEncoding::Ascii,
            TextEncodingDef::Latin1 => TextEncoding::Latin1,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StringLenDef {
    Fixed { size: usize },
    LengthPrefixed { width: PrefixWidthDef },
    NullTerminated,
    FieldReferenced { field: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ArrayLenDef {
    Fixed { size: usize },
    LengthPrefixed { width: PrefixWidthDef },
    FieldReferenced { field: String },
    ByteLengthPrefixed { width: PrefixWidthDef },
    EofTerminated,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum PrefixWidthDef {
    U8,
    U16,
    U32,
    U64,
}

impl From<PrefixWidthDef> for PrefixWidth {
    fn from(v: PrefixWidthDef) -> Self {
        match v {
            PrefixWidthDef::U8 => PrefixWidth::U8,
            PrefixWidthDef::U16 => PrefixWidth::U16,
            PrefixWidthDef::U32 => PrefixWidth::U32,
            PrefixWidthDef::U64 => PrefixWidth::U64,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum VarlengthEncodingDef {
    Der,
    Leb128,
    Ebml,
    Vlq,
}

impl From<VarlengthEncodingDef> for VarlengthEncoding {
    fn from(v: VarlengthEncodingDef) -> Self {
        match v {
            VarlengthEncodingDef::Der => VarlengthEncoding::Der,
            VarlengthEncodingDef::Leb128 => VarlengthEncoding::Leb128,
            VarlengthEncodingDef::Ebml => VarlengthEncoding::Ebml,
            VarlengthEncodingDef::Vlq => VarlengthEncoding::Vlq,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ComputedDef {
    LengthOf {
        target: String,
        #[serde(default)]
        offset: i64,
        #[serde(default)]
        from_after_field: bool,
    },
    CountOf {
        target: String,
    },
    PositionOf {
        target: String,
    },
    Crc32Of {
        target: String,
    },
    SumOfSizes {
        target: String,
    },
    SumOfTypeSizes {
        target: String,
        element_type: String,
    },
}

// --- conversions ------------------------------------------------------------

impl TryFrom<SchemaDef> for Schema {
    type Error = BinSchemaError;

    fn try_from(raw: SchemaDef) -> Result<Self> {
        let config = Config {
            endianness: raw.config.endianness.into(),
            bit_order: raw.config.bit_order.into(),
        };
        let mut types = HashMap::with_capacity(raw.types.len());
        for (name, def) in raw.types {
            types.insert(name.clone(), TypeDef::try_from(def)?);
        }
        Ok(Schema { config, types })
    }
}

impl TryFrom<TypeDefRaw> for TypeDef {
    type Error = BinSchemaError;

    fn try_from(raw: TypeDefRaw) -> Result<Self> {
        match raw {
            TypeDefRaw::Sequence { fields, instances } => {
                let fields = fields
                    .into_iter()
                    .map(Field::try_from)
                    .collect::<Result<Vec<_>>>()?;
                let instances = instances
                    .into_iter()
                    .map(Instance::try_from)
                    .collect::<Result<Vec<_>>>()?;
                Ok(TypeDef::Sequence(SequenceType { fields, instances }))
            }
            TypeDefRaw::Alias { mut field } => {
                field.name.get_or_insert_with(|| "value".to_string());
                let field = Field::try_from(field)?;
                Ok(TypeDef::Sequence(SequenceType {
                    fields: vec![field],
                    instances: Vec::new(),
                }))
            }
            TypeDefRaw::Union(u) => Ok(TypeDef::Union(UnionDef::try_from(u)?)),
            TypeDefRaw::BackReference(b) => Ok(TypeDef::BackRef(BackRefDef::try_from(b)?)),
        }
    }
}

impl TryFrom<InstanceDef> for Instance {
    type Error = BinSchemaError;

    fn try_from(raw: InstanceDef) -> Result<Self> {
        Ok(Instance {
            name: raw.name,
            position: parse_expr(&raw.position)?,
            size: raw.size.as_deref().map(parse_expr).transpose()?,
            type_name: raw.type_name,
        })
    }
}

impl TryFrom<UnionDefRaw> for UnionDef {
    type Error = BinSchemaError;

    fn try_from(raw: UnionDefRaw) -> Result<Self> {
        let discriminator = match raw.discriminator {
            DiscriminatorDef::Peek { width, endianness } => Discriminator::Peek {
                width,
                endianness: endianness.map(Endianness::from),
            },
            DiscriminatorDef::Field { name } => Discriminator::Field(name),
        };
        let variants = raw
            .variants
            .into_iter()
            .map(|v| {
                Ok(Variant {
                    when: v.when.as_deref().map(expr::parse).transpose()?,
                    type_name: v.type_name,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(UnionDef {
            discriminator,
            variants,
            byte_budget_field: raw.byte_budget_field,
        })
    }
}

impl TryFrom<BackRefDefRaw> for BackRefDef {
    type Error = BinSchemaError;

    fn try_from(raw: BackRefDefRaw) -> Result<Self> {
        Ok(BackRefDef {
            storage_width: raw.storage_width,
            offset_mask: raw.offset_mask,
            marker_value: raw.marker_value,
            offset_from: raw.offset_from.into(),
            target_type: raw.target_type,
        })
    }
}

impl TryFrom<FieldDef> for Field {
    type Error = BinSchemaError;

    fn try_from(raw: FieldDef) -> Result<Self> {
        let const_value = raw
            .const_value
            .map(|v| const_literal_from_json(&v))
            .transpose()?;
        Ok(Field {
            name: raw.name.unwrap_or_default(),
            kind: FieldKind::try_from(raw.kind)?,
            description: raw.description,
            conditional: raw.conditional.as_deref().map(expr::parse).transpose()?,
            endianness: raw.endianness.map(Endianness::from),
            computed: raw.computed.map(Computed::try_from).transpose()?,
            const_value,
        })
    }
}

fn const_literal_from_json(v: &serde_json::Value) -> Result<ConstLiteral> {
    match v {
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(|i| ConstLiteral::Int(i as i128))
            .ok_or_else(|| BinSchemaError::encoding("const_value number out of range")),
        serde_json::Value::String(s) => Ok(ConstLiteral::Str(s.clone())),
        other => Err(BinSchemaError::encoding(format!(
            "unsupported const_value shape: {other}"
        ))),
    }
}

impl TryFrom<FieldKindDef> for FieldKind {
    type Error = BinSchemaError;

    fn try_from(raw: FieldKindDef) -> Result<Self> {
        Ok(match raw {
            FieldKindDef::U8 => FieldKind::UInt(8),
            FieldKindDef::U16 => FieldKind::UInt(16),
            FieldKindDef::U32 => FieldKind::UInt(32),
            FieldKindDef::U64 => FieldKind::UInt(64),
            FieldKindDef::I8 => FieldKind::Int(8),
            FieldKindDef::I16 => FieldKind::Int(16),
            FieldKindDef::I32 => FieldKind::Int(32),
            FieldKindDef::I64 => FieldKind::Int(64),
            FieldKindDef::F32 => FieldKind::Float32,
            FieldKindDef::F64 => FieldKind::Float64,
            FieldKindDef::Bits { size } => FieldKind::BitField { size },
            FieldKindDef::Bitfield { size, subfields } => FieldKind::BitfieldContainer {
                size,
                subfields: subfields
                    .into_iter()
                    .map(|s| SubField {
                        name: s.name,
                        offset: s.offset,
                        size: s.size,
                    })
                    .collect(),
            },
            FieldKindDef::String(spec) => FieldKind::StringField(StringSpec {
                length: match spec.length {
                    StringLenDef::Fixed { size } => StringLen::Fixed(size),
                    StringLenDef::LengthPrefixed { width } => {
                        StringLen::LengthPrefixed(width.into())
                    }
                    StringLenDef::NullTerminated => StringLen::NullTerminated,
                    StringLenDef::FieldReferenced { field } => StringLen::FieldReferenced(field),
                },
                encoding: spec.encoding.into(),
            }),
            FieldKindDef::Array { length, item } => FieldKind::ArrayField(ArraySpec {
                length: match length {
                    ArrayLenDef::Fixed { size } => ArrayLen::Fixed(size),
                    ArrayLenDef::LengthPrefixed { width } => ArrayLen::LengthPrefixed(width.into()),
                    ArrayLenDef::FieldReferenced { field } => ArrayLen::FieldReferenced(field),
                    ArrayLenDef::ByteLengthPrefixed { width } => {
                        ArrayLen::ByteLengthPrefixed(width.into())
                    }
                    ArrayLenDef::EofTerminated => ArrayLen::EofTerminated,
                },
                item: Box::new(Field::try_from(*item)?),
            }),
            FieldKindDef::Varlength { encoding } => FieldKind::Varlength(encoding.into()),
            FieldKindDef::TypeRef { name } => FieldKind::TypeRef(name),
            FieldKindDef::Choice { options } => FieldKind::Choice(options),
            FieldKindDef::Union(u) => FieldKind::Union(UnionDef::try_from(u)?),
            FieldKindDef::BackReference(b) => FieldKind::BackReference(BackRefDef::try_from(b)?),
            FieldKindDef::Optional { inner } => {
                FieldKind::Optional(Box::new(FieldKind::try_from(inner.kind)?))
            }
        })
    }
}

impl TryFrom<ComputedDef> for Computed {
    type Error = BinSchemaError;

    fn try_from(raw: ComputedDef) -> Result<Self> {
        let kind = match raw {
            ComputedDef::LengthOf {
                target,
                offset,
                from_after_field,
            } => ComputedKind::LengthOf {
                target: parse_target(&target)?,
                offset,
                from_after_field,
            },
            ComputedDef::CountOf { target } => ComputedKind::CountOf {
                target: parse_target(&target)?,
            },
            ComputedDef::PositionOf { target } => ComputedKind::PositionOf {
                target: parse_target(&target)?,
            },
            ComputedDef::Crc32Of { target } => ComputedKind::Crc32Of {
                target: parse_target(&target)?,
            },
            ComputedDef::SumOfSizes { target } => ComputedKind::SumOfSizes {
                target: parse_target(&target)?,
            },
            ComputedDef::SumOfTypeSizes {
                target,
                element_type,
            } => ComputedKind::SumOfTypeSizes {
                target: parse_target(&target)?,
                element_type,
            },
        };
        Ok(Computed { kind })
    }
}

fn parse_target(src: &str) -> Result<TargetPath> {
    path::parse_target_path(src)
}

fn parse_expr(src: &str) -> Result<Expr> {
    expr::parse(src)
}
