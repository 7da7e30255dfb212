//! Component E: the codec engine. Dispatches every closed field/type kind
//! to its dedicated codec and hosts the top-level `encode`/`decode`/
//! `calculate_size` entry points.
//!
//! Generalizes `bitcraft::assembly::Assemble`, which only ever walks one
//! flat `Vec<Field>` of scalars/fixed arrays over a single buffer.

use crate::bitstream::{BitReader, BitWriter, Endianness};
use crate::context::Context;
use crate::error::{BinSchemaError, Result};
use crate::schema::field::{ConstLiteral, Field, FieldKind};
use crate::schema::{Schema, TypeDef};
use crate::value::Value;

pub mod array;
pub mod backref;
pub mod bitfield;
pub mod sequence;
pub mod string;
pub mod union;
pub mod varint;

/// Encodes `value` as `type_name` and returns the finished byte buffer.
pub fn encode(schema: &Schema, type_name: &str, value: &Value) -> Result<Vec<u8>> {
    let mut writer = BitWriter::new();
    writer.set_bit_order(schema.config.bit_order);
    let mut ctx = Context::new_root();
    encode_type(schema, type_name, value, &mut writer, &mut ctx)?;
    resolve_pending_patches(&ctx, &mut writer)?;
    Ok(writer.into_bytes())
}

/// Patches every `position_of` field that reserved a zero placeholder
/// because its target hadn't been encoded yet at the time it was reached
/// (§4.E.1 step 3): by the time the whole root type has been walked, every
/// reachable target's offset is in `positions_by_name`.
fn resolve_pending_patches(ctx: &Context, writer: &mut BitWriter) -> Result<()> {
    for patch in ctx.pending_patches.borrow().iter() {
        let pos = ctx.lookup_position(&patch.key).ok_or_else(|| {
            BinSchemaError::encoding(format!(
                "position_of target `{}` was never encoded",
                patch.key
            ))
        })?;
        let width_bytes = patch.width_bits / 8;
        writer.write_at(
            patch.byte_offset,
            &uint_to_bytes(pos as u64, width_bytes, patch.endian),
        )?;
    }
    Ok(())
}

/// Decodes `bytes` as `type_name`.
pub fn decode(schema: &Schema, type_name: &str, bytes: &[u8]) -> Result<Value> {
    let mut reader = BitReader::with_bit_order(bytes, schema.config.bit_order);
    let mut ctx = Context::new_root();
    decode_type(schema, type_name, &mut reader, &mut ctx)
}

/// `calculate_size(v) == len(encode(v))` (§8, property 3): implemented by
/// running a real encode into an isolated probe context and discarding
/// the bytes, the same strategy `from_after_field` uses locally,
/// generalized to every composite kind.
pub fn calculate_size(schema: &Schema, type_name: &str, value: &Value) -> Result<usize> {
    let mut writer = BitWriter::new();
    writer.set_bit_order(schema.config.bit_order);
    let mut ctx = Context::new_root();
    encode_type(schema, type_name, value, &mut writer, &mut ctx)?;
    Ok(writer.len())
}

pub(crate) fn encode_type(
    schema: &Schema,
    type_name: &str,
    value: &Value,
    writer: &mut BitWriter,
    ctx: &mut Context,
) -> Result<()> {
    match schema.get(type_name) {
        Some(TypeDef::Sequence(seq)) => sequence::encode_sequence(schema, seq, value, writer, ctx),
        Some(TypeDef::Union(u)) => union::encode_union(schema, u, value, writer, ctx),
        Some(TypeDef::BackRef(b)) => backref::encode_backref(schema, b, value, writer, ctx),
        None => Err(BinSchemaError::encoding(format!(
            "reference to unknown type `{type_name}`"
        ))),
    }
}

pub(crate) fn decode_type(
    schema: &Schema,
    type_name: &str,
    reader: &mut BitReader,
    ctx: &mut Context,
) -> Result<Value> {
    match schema.get(type_name) {
        Some(TypeDef::Sequence(seq)) => sequence::decode_sequence(schema, seq, reader, ctx),
        Some(TypeDef::Union(u)) => union::decode_union(schema, u, reader, ctx),
        Some(TypeDef::BackRef(b)) => backref::decode_backref(schema, b, reader, ctx),
        None => Err(BinSchemaError::decoding(format!(
            "reference to unknown type `{type_name}`"
        ))),
    }
}

/// Resolves a field's effective endianness: its own override, else the
/// schema-wide default.
pub(crate) fn field_endianness(schema: &Schema, field: &Field) -> Endianness {
    field.endianness.unwrap_or(schema.config.endianness)
}

/// Renders an unsigned value as exactly `width_bytes` bytes in `endian`
/// order, for patching a previously-reserved placeholder via
/// `BitWriter::write_at` (which copies raw bytes with no byte-order
/// awareness of its own).
pub(crate) fn uint_to_bytes(value: u64, width_bytes: usize, endian: Endianness) -> Vec<u8> {
    let be = value.to_be_bytes();
    let mut bytes = be[8 - width_bytes..].to_vec();
    if endian == Endianness::Little {
        bytes.reverse();
    }
    bytes
}

pub(crate) fn encode_field_kind(
    schema: &Schema,
    kind: &FieldKind,
    endian: Endianness,
    value: &Value,
    writer: &mut BitWriter,
    ctx: &mut Context,
) -> Result<()> {
    match kind {
        FieldKind::UInt(bits) => writer.write_uint(
            value
                .as_u64()
                .ok_or_else(|| BinSchemaError::encoding("expected an unsigned integer value"))?,
            *bits as usize,
            endian,
        ),
        FieldKind::Int(bits) => writer.write_int(
            value
                .as_i128()
                .ok_or_else(|| BinSchemaError::encoding("expected an integer value"))? as i64,
            *bits as usize,
            endian,
        ),
        FieldKind::Float32 => match value {
            Value::Float32(v) => writer.write_f32(*v, endian),
            Value::Float64(v) => writer.write_f32(*v as f32, endian),
            _ => Err(BinSchemaError::encoding("expected a float32 value")),
        },
        FieldKind::Float64 => match value {
            Value::Float64(v) => writer.write_f64(*v, endian),
            Value::Float32(v) => writer.write_f64(*v as f64, endian),
            _ => Err(BinSchemaError::encoding("expected a float64 value")),
        },
        FieldKind::BitField { size } => bitfield::encode_bitfield(writer, *size, value),
        FieldKind::BitfieldContainer { size, subfields } => {
            bitfield::encode_bitfield_container(writer, *size, subfields, value)
        }
        FieldKind::StringField(spec) => string::encode_string(writer, spec, endian, value),
        FieldKind::ArrayField(spec) => {
            array::encode_array(schema, spec, endian, "", value, writer, ctx)
        }
        FieldKind::Varlength(enc) => encode_varlength(*enc, writer, value),
        FieldKind::TypeRef(name) => {
            let mut child = ctx.child_for_nested();
            encode_type(schema, name, value, writer, &mut child)
        }
        FieldKind::Choice(_) => union::encode_choice(schema, value, writer, ctx),
        FieldKind::Union(u) => union::encode_union(schema, u, value, writer, ctx),
        FieldKind::BackReference(b) => backref::encode_backref(schema, b, value, writer, ctx),
        FieldKind::Optional(inner) => encode_field_kind(schema, inner, endian, value, writer, ctx),
    }
}

pub(crate) fn decode_field_kind(
    schema: &Schema,
    kind: &FieldKind,
    endian: Endianness,
    reader: &mut BitReader,
    ctx: &mut Context,
) -> Result<Value> {
    match kind {
        FieldKind::UInt(bits) => Ok(Value::UInt(reader.read_uint(*bits as usize, endian)?)),
        FieldKind::Int(bits) => Ok(Value::Int(reader.read_int(*bits as usize, endian)?)),
        FieldKind::Float32 => Ok(Value::Float32(reader.read_f32(endian)?)),
        FieldKind::Float64 => Ok(Value::Float64(reader.read_f64(endian)?)),
        FieldKind::BitField { size } => bitfield::decode_bitfield(reader, *size),
        FieldKind::BitfieldContainer { size, subfields } => {
            bitfield::decode_bitfield_container(reader, *size, subfields)
        }
        FieldKind::StringField(spec) => string::decode_string(reader, spec, endian, ctx),
        FieldKind::ArrayField(spec) => {
            array::decode_array(schema, spec, endian, "", None, reader, ctx)
        }
        FieldKind::Varlength(enc) => decode_varlength(*enc, reader),
        FieldKind::TypeRef(name) => {
            let mut child = ctx.child_for_nested();
            decode_type(schema, name, reader, &mut child)
        }
        FieldKind::Choice(options) => union::decode_choice(schema, options, reader, ctx),
        FieldKind::Union(u) => union::decode_union(schema, u, reader, ctx),
        FieldKind::BackReference(b) => backref::decode_backref(schema, b, reader, ctx),
        FieldKind::Optional(_) => Err(BinSchemaError::schema_invalid(
            "optional",
            "optional fields have no defined wire decoding",
        )),
    }
}

fn encode_varlength(
    enc: crate::schema::field::VarlengthEncoding,
    writer: &mut BitWriter,
    value: &Value,
) -> Result<()> {
    use crate::schema::field::VarlengthEncoding::*;
    let v = value
        .as_u64()
        .ok_or_else(|| BinSchemaError::encoding("varlength value must be a non-negative integer"))?;
    match enc {
        Der => varint::encode_der(writer, v),
        Leb128 => varint::encode_leb128(writer, v),
        Ebml => varint::encode_ebml(writer, v),
        Vlq => varint::encode_vlq(writer, v),
    }
}

fn decode_varlength(enc: crate::schema::field::VarlengthEncoding, reader: &mut BitReader) -> Result<Value> {
    use crate::schema::field::VarlengthEncoding::*;
    let v = match enc {
        Der => varint::decode_der(reader)?,
        Leb128 => varint::decode_leb128(reader)?,
        Ebml => varint::decode_ebml(reader)?,
        Vlq => varint::decode_vlq(reader)?,
    };
    Ok(Value::UInt(v))
}

/// Evaluates a `const_value` declaration into its wire `Value`.
pub(crate) fn const_literal_value(lit: &ConstLiteral) -> Value {
    match lit {
        ConstLiteral::Int(v) => Value::UInt(*v as u64),
        ConstLiteral::Str(s) => Value::Str(s.clone()),
    }
}

/// CRC-32, IEEE 802.3 polynomial (reversed 0xEDB88320), init/final XOR
/// 0xFFFFFFFF (§6.2).
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in bytes {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    crc ^ 0xFFFF_FFFF
}

/// Shared prefix (count/length) helpers used by array and string codecs.
pub(crate) mod helpers {
    use super::*;
    use crate::schema::field::PrefixWidth;

    pub fn write_prefix(
        writer: &mut BitWriter,
        width: PrefixWidth,
        value: u64,
        endian: Endianness,
    ) -> Result<()> {
        writer.write_uint(value, width.bits(), endian)
    }

    pub fn read_prefix(reader: &mut BitReader, width: PrefixWidth, endian: Endianness) -> Result<u64> {
        reader.read_uint(width.bits(), endian)
    }
}
