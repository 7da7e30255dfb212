//! Sequence-type codec: §4.E.1 (encode), §4.E.2 (decode).
//!
//! Generalizes `bitcraft::assembly::Assemble`'s single flat field walk to a
//! field list carrying conditionals, consts, computed declarations and
//! trailing position-addressed instances.

use crate::bitstream::{BitReader, BitWriter};
use crate::codec::{self, array};
use crate::context::{Context, PendingPatch};
use crate::error::{BinSchemaError, Result};
use crate::expr::{self, ExprValue};
use crate::schema::computed::{Computed, ComputedKind};
use crate::schema::field::{Field, FieldKind};
use crate::schema::{Instance, Schema, SequenceType};
use crate::value::Value;

/// Encodes `value` against `seq`.
///
/// Every field's final value is already known up front (the caller supplies
/// the whole struct), so `computed` targets anywhere in the sequence —
/// earlier or later — resolve by reading `ctx.current` directly rather than
/// needing a literal two-pass measure-then-emit protocol; the two
/// genuinely order-dependent cases, `position_of` and `length_of` with
/// `from_after_field`, reserve a placeholder and patch it once the real
/// byte offset is known (locally, at the end of this call, for
/// `from_after_field`; globally, at the end of the root `codec::encode`
/// call, for `position_of`). See DESIGN.md.
pub fn encode_sequence(
    schema: &Schema,
    seq: &SequenceType,
    value: &Value,
    writer: &mut BitWriter,
    ctx: &mut Context,
) -> Result<()> {
    let is_root = ctx.parents.is_empty();
    let fields_map = value
        .as_struct()
        .ok_or_else(|| BinSchemaError::encoding("expected a struct value for a sequence type"))?
        .clone();
    ctx.current = fields_map.clone();
    if is_root {
        *ctx.root.borrow_mut() = Value::Struct(fields_map.clone());
    }

    let mut from_after_patches: Vec<(usize, usize, i64, crate::bitstream::Endianness)> = Vec::new();

    for field in &seq.fields {
        if let Some(cond) = &field.conditional {
            if !expr::eval_conditional(cond, ctx) {
                continue;
            }
        }

        let endian = codec::field_endianness(schema, field);
        let field_start = writer.byte_offset();
        ctx.record_position(field.name.clone(), field_start as i64);

        if let Some(lit) = &field.const_value {
            let v = codec::const_literal_value(lit);
            codec::encode_field_kind(schema, &field.kind, endian, &v, writer, ctx)?;
            continue;
        }

        if let Some(computed) = &field.computed {
            encode_computed_field(
                schema,
                field,
                computed,
                endian,
                writer,
                ctx,
                &mut from_after_patches,
            )?;
            continue;
        }

        let Some(v) = fields_map.get(&field.name).cloned() else {
            if matches!(field.kind, FieldKind::Optional(_)) {
                continue;
            }
            return Err(BinSchemaError::encoding(format!(
                "missing value for field `{}`",
                field.name
            )));
        };
        // An array field declared directly on a sequence keeps its own
        // name so later sibling fields can resolve `name[selector]` and
        // `position_of` targets into its elements (§3.8, §4.E.5); routing
        // it through the generic, name-blind dispatcher would lose that.
        if let FieldKind::ArrayField(spec) = &field.kind {
            array::encode_array(schema, spec, endian, &field.name, &v, writer, ctx)?;
        } else {
            codec::encode_field_kind(schema, &field.kind, endian, &v, writer, ctx)?;
        }
    }

    let seq_end = writer.byte_offset() as i64;
    for (byte_offset, width_bits, offset_adj, patch_endian) in from_after_patches {
        let after = byte_offset as i64 + (width_bits / 8) as i64;
        let length = seq_end - after + offset_adj;
        if length < 0 {
            return Err(BinSchemaError::encoding(
                "from_after_field length computed negative",
            ));
        }
        writer.write_at(
            byte_offset,
            &codec::uint_to_bytes(length as u64, width_bits / 8, patch_endian),
        )?;
    }

    for inst in &seq.instances {
        encode_instance(schema, inst, &fields_map, writer, ctx)?;
    }

    Ok(())
}

/// Decodes a value of `seq`'s shape. Instances are evaluated eagerly right
/// after the ordered fields (§6.3 permits this so long as nothing reads them
/// before they would naturally be needed; this crate has no lazy-value
/// wrapper to defer further, so it decodes them here instead).
pub fn decode_sequence(
    schema: &Schema,
    seq: &SequenceType,
    reader: &mut BitReader,
    ctx: &mut Context,
) -> Result<Value> {
    let is_root = ctx.parents.is_empty();

    for field in &seq.fields {
        if let Some(cond) = &field.conditional {
            if !expr::eval_conditional(cond, ctx) {
                continue;
            }
        }

        let endian = codec::field_endianness(schema, field);
        let field_start = reader.position();
        ctx.record_position(field.name.clone(), field_start as i64);

        let value = if let FieldKind::ArrayField(spec) = &field.kind {
            array::decode_array(schema, spec, endian, &field.name, None, reader, ctx)?
        } else {
            codec::decode_field_kind(schema, &field.kind, endian, reader, ctx)?
        };

        if let Some(lit) = &field.const_value {
            let want = codec::const_literal_value(lit);
            if value != want {
                return Err(BinSchemaError::decoding(format!(
                    "field `{}` expected const value {:?}, found {:?}",
                    field.name, want, value
                )));
            }
        }

        ctx.set_field(&field.name, value, is_root);
    }

    for inst in &seq.instances {
        let value = decode_instance(schema, inst, reader, ctx)?;
        ctx.set_field(&inst.name, value, is_root);
    }

    Ok(Value::Struct(ctx.current.clone()))
}

fn encode_computed_field(
    schema: &Schema,
    field: &Field,
    computed: &Computed,
    endian: crate::bitstream::Endianness,
    writer: &mut BitWriter,
    ctx: &mut Context,
    from_after_patches: &mut Vec<(usize, usize, i64, crate::bitstream::Endianness)>,
) -> Result<()> {
    match &computed.kind {
        ComputedKind::LengthOf {
            target,
            offset,
            from_after_field,
        } => {
            if *from_after_field {
                let width = fixed_byte_width(&field.kind)?;
                let start = writer.byte_offset();
                writer.write_uint(0, width * 8, endian)?;
                from_after_patches.push((start, width * 8, *offset, endian));
                return Ok(());
            }
            let resolved = ctx.resolve_target(target)?;
            let n = length_of_natural_unit(&resolved)? as i64 + offset;
            codec::encode_field_kind(schema, &field.kind, endian, &Value::UInt(n as u64), writer, ctx)
        }
        ComputedKind::CountOf { target } => {
            let resolved = ctx.resolve_target(target)?;
            let items = resolved
                .as_array()
                .ok_or_else(|| BinSchemaError::encoding("count_of target is not an array"))?;
            codec::encode_field_kind(
                schema,
                &field.kind,
                endian,
                &Value::UInt(items.len() as u64),
                writer,
                ctx,
            )
        }
        ComputedKind::PositionOf { target } => {
            let key = ctx.position_key(target)?;
            if let Some(pos) = ctx.lookup_position(&key) {
                codec::encode_field_kind(schema, &field.kind, endian, &Value::UInt(pos as u64), writer, ctx)
            } else {
                let width = fixed_byte_width(&field.kind)?;
                let byte_offset = writer.byte_offset();
                writer.write_uint(0, width * 8, endian)?;
                ctx.pending_patches.borrow_mut().push(PendingPatch {
                    byte_offset,
                    width_bits: width * 8,
                    key,
                    endian,
                });
                Ok(())
            }
        }
        ComputedKind::Crc32Of { target } => {
            let resolved = ctx.resolve_target(target)?;
            let bytes = value_as_bytes(&resolved)?;
            let crc = codec::crc32(&bytes);
            codec::encode_field_kind(schema, &field.kind, endian, &Value::UInt(crc as u64), writer, ctx)
        }
        ComputedKind::SumOfSizes { target } => {
            let resolved = ctx.resolve_target(target)?;
            let items = resolved
                .as_array()
                .ok_or_else(|| BinSchemaError::encoding("sum_of_sizes target is not an array"))?;
            let mut total = 0usize;
            for item in items {
                total += encoded_len_of_item(schema, item, ctx)?;
            }
            codec::encode_field_kind(schema, &field.kind, endian, &Value::UInt(total as u64), writer, ctx)
        }
        ComputedKind::SumOfTypeSizes {
            target,
            element_type,
        } => {
            let resolved = ctx.resolve_target(target)?;
            let items = resolved.as_array().ok_or_else(|| {
                BinSchemaError::encoding("sum_of_type_sizes target is not an array")
            })?;
            let mut total = 0usize;
            for item in items {
                if item.type_name() == Some(element_type.as_str()) {
                    total += encoded_len_of_item(schema, item, ctx)?;
                }
            }
            codec::encode_field_kind(schema, &field.kind, endian, &Value::UInt(total as u64), writer, ctx)
        }
    }
}

/// `length_of`'s natural unit: element count for arrays, byte count for
/// strings/byte blobs. A target that is itself a composite value has no
/// well-defined natural length here; callers needing encoded byte size of a
/// nested type use `sum_of_sizes`/`sum_of_type_sizes` instead.
fn length_of_natural_unit(value: &Value) -> Result<usize> {
    match value {
        Value::Str(s) => Ok(s.len()),
        Value::Bytes(b) => Ok(b.len()),
        Value::Array(items) => Ok(items.len()),
        other => Err(BinSchemaError::encoding(format!(
            "length_of target has no natural length: {other:?}"
        ))),
    }
}

fn value_as_bytes(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Bytes(b) => Ok(b.clone()),
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| BinSchemaError::encoding("crc32_of target must be an array of uint8"))
            })
            .collect(),
        other => Err(BinSchemaError::encoding(format!(
            "crc32_of target must be bytes or an array of uint8, found {other:?}"
        ))),
    }
}

/// Encoded byte length of one array element, used by `sum_of_sizes` /
/// `sum_of_type_sizes`. Only meaningful for tagged (union/choice) items,
/// whose concrete type is carried on the value itself.
fn encoded_len_of_item(schema: &Schema, item: &Value, ctx: &Context) -> Result<usize> {
    match item {
        Value::Variant { type_name, value } => {
            let mut probe_writer = BitWriter::new();
            let mut probe_ctx = ctx.probe().child_for_nested();
            codec::encode_type(schema, type_name, value, &mut probe_writer, &mut probe_ctx)?;
            Ok(probe_writer.len())
        }
        other => Err(BinSchemaError::encoding(format!(
            "sum_of_sizes/sum_of_type_sizes requires an array of tagged variant values, found {other:?}"
        ))),
    }
}

/// The byte width a `position_of`/`from_after_field` host field reserves: a
/// byte-aligned fixed-width integer. Bit fields and varlength encodings
/// cannot host a deferred patch since `BitWriter::write_at` is byte-oriented.
fn fixed_byte_width(kind: &FieldKind) -> Result<usize> {
    let bits = match kind {
        FieldKind::UInt(bits) | FieldKind::Int(bits) => *bits as usize,
        _ => {
            return Err(BinSchemaError::schema_invalid(
                "computed",
                "position_of/from_after_field host field must be a fixed-width integer",
            ));
        }
    };
    if bits % 8 != 0 {
        return Err(BinSchemaError::schema_invalid(
            "computed",
            "position_of/from_after_field host field width must be byte-aligned",
        ));
    }
    Ok(bits / 8)
}

/// Encodes a declared instance's value at its own computed position,
/// patching the buffer in place via `write_at` (§3.5). `fields_map` is the
/// full input struct, since an instance's value is supplied the same way an
/// ordinary field's is.
fn encode_instance(
    schema: &Schema,
    inst: &Instance,
    fields_map: &std::collections::BTreeMap<String, Value>,
    writer: &mut BitWriter,
    ctx: &mut Context,
) -> Result<()> {
    let Some(value) = fields_map.get(&inst.name) else {
        return Ok(());
    };
    let pos = match expr::eval(&inst.position, ctx)? {
        ExprValue::Int(v) => v,
        other => {
            return Err(BinSchemaError::encoding(format!(
                "instance position must be numeric, found {other}"
            )));
        }
    };
    let resolved = if pos < 0 { writer.len() as i64 + pos } else { pos };
    if resolved < 0 {
        return Err(BinSchemaError::encoding("instance position resolves before start of buffer"));
    }
    ctx.record_position(inst.name.clone(), resolved);

    let mut body = BitWriter::new();
    let mut child = ctx.child_for_nested();
    codec::encode_type(schema, &inst.type_name, value, &mut body, &mut child)?;
    writer.write_at(resolved as usize, &body.into_bytes())
}

/// Decodes a declared instance by seeking a fresh bit-stream viewport to its
/// computed position — `size`, when given, both bounds the viewport (so a
/// nested `eof_terminated` array stops at the instance's own edge rather
/// than the whole buffer's) and is what an out-of-range position fails
/// against.
fn decode_instance(
    schema: &Schema,
    inst: &Instance,
    reader: &BitReader,
    ctx: &Context,
) -> Result<Value> {
    let pos = match expr::eval(&inst.position, ctx)? {
        ExprValue::Int(v) => v,
        other => {
            return Err(BinSchemaError::decoding(format!(
                "instance position must be numeric, found {other}"
            )));
        }
    };
    let resolved = if pos < 0 { reader.size() + pos } else { pos };
    if resolved < 0 || resolved > reader.size() {
        return Err(BinSchemaError::BoundsExceeded {
            position: resolved,
            length: 0,
            size: reader.size(),
        });
    }

    let size = match &inst.size {
        Some(expr) => match expr::eval(expr, ctx)? {
            ExprValue::Int(v) => Some(v as usize),
            other => {
                return Err(BinSchemaError::decoding(format!(
                    "instance size must be numeric, found {other}"
                )));
            }
        },
        None => None,
    };
    let len = size.unwrap_or((reader.size() - resolved) as usize);

    ctx.record_position(inst.name.clone(), resolved);
    let data = reader.read_at(resolved, len)?;
    let mut sub_reader = BitReader::with_bit_order(&data, reader.bit_order());
    let mut child = ctx.child_for_nested();
    codec::decode_type(schema, &inst.type_name, &mut sub_reader, &mut child)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::{BitOrder, Endianness};
    use crate::schema::backref::BackRefDef;
    use crate::schema::computed::{Computed, ComputedKind};
    use crate::schema::field::{ArrayLen, ArraySpec, ConstLiteral, PrefixWidth, StringLen, StringSpec, TextEncoding};
    use crate::schema::path::parse_target_path;
    use crate::schema::{Config, TypeDef};
    use std::collections::{BTreeMap, HashMap};

    fn field(name: &str, kind: FieldKind) -> Field {
        Field {
            name: name.to_string(),
            kind,
            description: None,
            conditional: None,
            endianness: None,
            computed: None,
            const_value: None,
        }
    }

    fn schema_with(types: Vec<(&str, TypeDef)>) -> Schema {
        Schema {
            config: Config::default(),
            types: types.into_iter().map(|(n, t)| (n.to_string(), t)).collect(),
        }
    }

    #[test]
    fn encode_decode_const_and_plain_fields_roundtrip() {
        let mut magic = field("magic", FieldKind::UInt(32));
        magic.const_value = Some(ConstLiteral::Int(0x5249_4646));
        let len_field = field("count", FieldKind::UInt(16));

        let seq = SequenceType {
            fields: vec![magic, len_field],
            instances: vec![],
        };
        let schema = schema_with(vec![("Root", TypeDef::Sequence(seq))]);

        let mut map = BTreeMap::new();
        map.insert("count".to_string(), Value::UInt(7));
        let value = Value::Struct(map);

        let bytes = codec::encode(&schema, "Root", &value).unwrap();
        assert_eq!(bytes, vec![0x52, 0x49, 0x46, 0x46, 0x00, 0x07]);

        let decoded = codec::decode(&schema, "Root", &bytes).unwrap();
        assert_eq!(decoded.field("magic"), Some(&Value::UInt(0x5249_4646)));
        assert_eq!(decoded.field("count"), Some(&Value::UInt(7)));
    }

    #[test]
    fn length_of_string_computed_eagerly() {
        let mut len_field = field("len", FieldKind::UInt(8));
        len_field.computed = Some(Computed {
            kind: ComputedKind::LengthOf {
                target: parse_target_path("name").unwrap(),
                offset: 0,
                from_after_field: false,
            },
        });
        let name_field = field(
            "name",
            FieldKind::StringField(StringSpec {
                length: StringLen::FieldReferenced("len".to_string()),
                encoding: TextEncoding::Utf8,
            }),
        );

        let seq = SequenceType {
            fields: vec![len_field, name_field],
            instances: vec![],
        };
        let schema = schema_with(vec![("Root", TypeDef::Sequence(seq))]);

        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::Str("hello".to_string()));
        let value = Value::Struct(map);

        let bytes = codec::encode(&schema, "Root", &value).unwrap();
        assert_eq!(bytes[0], 5);

        let decoded = codec::decode(&schema, "Root", &bytes).unwrap();
        assert_eq!(decoded.field("name"), Some(&Value::Str("hello".to_string())));
    }

    #[test]
    fn conditional_field_is_skipped_both_ways() {
        let flag = field("flag", FieldKind::UInt(8));
        let mut maybe = field("maybe", FieldKind::UInt(8));
        maybe.conditional = Some(crate::expr::parse("flag != 0").unwrap());

        let seq = SequenceType {
            fields: vec![flag, maybe],
            instances: vec![],
        };
        let schema = schema_with(vec![("Root", TypeDef::Sequence(seq))]);

        let mut map = BTreeMap::new();
        map.insert("flag".to_string(), Value::UInt(0));
        let value = Value::Struct(map);
        let bytes = codec::encode(&schema, "Root", &value).unwrap();
        assert_eq!(bytes, vec![0]);

        let decoded = codec::decode(&schema, "Root", &bytes).unwrap();
        assert_eq!(decoded.field("maybe"), None);
    }

    #[test]
    fn position_of_forward_reference_patches_after_encode() {
        let mut pos_field = field("body_pos", FieldKind::UInt(32));
        pos_field.computed = Some(Computed {
            kind: ComputedKind::PositionOf {
                target: parse_target_path("body").unwrap(),
            },
        });
        let body = field("body", FieldKind::UInt(16));

        let seq = SequenceType {
            fields: vec![pos_field, body],
            instances: vec![],
        };
        let schema = schema_with(vec![("Root", TypeDef::Sequence(seq))]);

        let mut map = BTreeMap::new();
        map.insert("body".to_string(), Value::UInt(0xBEEF));
        let value = Value::Struct(map);
        let bytes = codec::encode(&schema, "Root", &value).unwrap();
        assert_eq!(&bytes[0..4], &[0, 0, 0, 4]);
        assert_eq!(&bytes[4..6], &[0xBE, 0xEF]);
    }

    #[test]
    fn array_field_referenced_count_roundtrips() {
        let mut count = field("count", FieldKind::UInt(8));
        count.computed = Some(Computed {
            kind: ComputedKind::CountOf {
                target: parse_target_path("items").unwrap(),
            },
        });
        let items = field(
            "items",
            FieldKind::ArrayField(ArraySpec {
                length: ArrayLen::FieldReferenced("count".to_string()),
                item: Box::new(field("item", FieldKind::UInt(8))),
            }),
        );

        let seq = SequenceType {
            fields: vec![count, items],
            instances: vec![],
        };
        let schema = schema_with(vec![("Root", TypeDef::Sequence(seq))]);

        let mut map = BTreeMap::new();
        map.insert(
            "items".to_string(),
            Value::Array(vec![Value::UInt(1), Value::UInt(2), Value::UInt(3)]),
        );
        let value = Value::Struct(map);
        let bytes = codec::encode(&schema, "Root", &value).unwrap();
        assert_eq!(bytes, vec![3, 1, 2, 3]);

        let decoded = codec::decode(&schema, "Root", &bytes).unwrap();
        assert_eq!(
            decoded.field("items"),
            Some(&Value::Array(vec![Value::UInt(1), Value::UInt(2), Value::UInt(3)]))
        );
    }

    #[test]
    fn instance_decodes_lazily_at_its_position() {
        let header = field("hdr_pos", FieldKind::UInt(8));
        let seq = SequenceType {
            fields: vec![header],
            instances: vec![Instance {
                name: "extra".to_string(),
                position: crate::expr::parse("hdr_pos").unwrap(),
                size: None,
                type_name: "Tail".to_string(),
            }],
        };
        let tail = SequenceType {
            fields: vec![field("value", FieldKind::UInt(16))],
            instances: vec![],
        };
        let schema = schema_with(vec![
            ("Root", TypeDef::Sequence(seq)),
            ("Tail", TypeDef::Sequence(tail)),
        ]);

        let data = vec![0x02, 0xAA, 0x12, 0x34];
        let decoded = codec::decode(&schema, "Root", &data).unwrap();
        let extra = decoded.field("extra").unwrap();
        assert_eq!(extra.field("value"), Some(&Value::UInt(0x1234)));
    }

    #[allow(dead_code)]
    fn unused_imports_guard(_: BitOrder, _: Endianness, _: PrefixWidth, _: BackRefDef, _: HashMap<(), ()>) {}
}
