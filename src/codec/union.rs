//! Discriminated-union and inline-choice codecs: §4.E.3, §4.E.6.

use crate::bitstream::{BitReader, BitWriter, Endianness};
use crate::codec;
use crate::context::Context;
use crate::error::{BinSchemaError, Result};
use crate::expr::{self, ExprValue};
use crate::schema::field::FieldKind;
use crate::schema::union::{Discriminator, UnionDef};
use crate::schema::{Schema, TypeDef};
use crate::value::Value;

/// Discriminator value produced by a peek, or by reading a sibling field,
/// used to select a variant both at decode time and (via the synthetic
/// `value` identifier) when evaluating each variant's `when` clause.
fn discriminator_value(raw: u64) -> ExprValue {
    ExprValue::Int(raw as i128)
}

fn swap_byte_order(value: u64, n_bytes: usize) -> u64 {
    let full = value.to_be_bytes();
    let mut logical = full[8 - n_bytes..].to_vec();
    logical.reverse();
    let mut buf = [0u8; 8];
    buf[8 - n_bytes..].copy_from_slice(&logical);
    u64::from_be_bytes(buf)
}

pub fn decode_union(
    schema: &Schema,
    u: &UnionDef,
    reader: &mut BitReader,
    ctx: &mut Context,
) -> Result<Value> {
    let discriminator = match &u.discriminator {
        Discriminator::Peek { width, endianness } => {
            let bits = *width as usize;
            let raw = reader.peek_bits(bits)?;
            if bits % 8 == 0 && matches!(endianness, Some(Endianness::Little)) {
                swap_byte_order(raw, bits / 8)
            } else {
                raw
            }
        }
        Discriminator::Field(name) => {
            let v = ctx.current.get(name).cloned().ok_or_else(|| {
                BinSchemaError::decoding(format!("discriminator field `{name}` not found"))
            })?;
            v.as_u64().unwrap_or(0)
        }
    };

    let discriminator_expr = discriminator_value(discriminator);
    let mut chosen = None;
    for variant in &u.variants {
        match &variant.when {
            Some(expr) => {
                if expr::eval_when(expr, &discriminator_expr, ctx)? {
                    chosen = Some(variant);
                    break;
                }
            }
            None => {
                chosen = Some(variant);
                break;
            }
        }
    }
    let variant = chosen.ok_or_else(|| {
        BinSchemaError::decoding("no union variant matched and no fallback was declared")
    })?;

    let budget_end = match &u.byte_budget_field {
        Some(field_name) => {
            let budget = ctx
                .current
                .get(field_name)
                .and_then(Value::as_usize)
                .ok_or_else(|| {
                    BinSchemaError::decoding(format!("byte_budget field `{field_name}` not found"))
                })?;
            Some(reader.position() + budget)
        }
        None => None,
    };

    let mut child = ctx.child_for_nested();
    let decoded = codec::decode_type(schema, &variant.type_name, reader, &mut child)?;

    if let Some(end) = budget_end {
        if reader.position() > end {
            return Err(BinSchemaError::decoding(
                "union variant consumed more bytes than its byte_budget allows",
            ));
        }
        reader.seek(end as i64)?;
    }

    Ok(Value::Variant {
        type_name: variant.type_name.clone(),
        value: Box::new(decoded),
    })
}

pub fn encode_union(
    schema: &Schema,
    u: &UnionDef,
    value: &Value,
    writer: &mut BitWriter,
    ctx: &mut Context,
) -> Result<()> {
    let (type_name, payload) = match value {
        Value::Variant { type_name, value } => (type_name.clone(), value.as_ref()),
        other => {
            return Err(BinSchemaError::encoding(format!(
                "expected a tagged union value, found {other:?}"
            )));
        }
    };

    if let Discriminator::Field(_) = &u.discriminator {
        // The discriminator is a sibling field already emitted separately;
        // nothing extra is written here.
    }

    let start = writer.byte_offset();
    let mut child = ctx.child_for_nested();
    codec::encode_type(schema, &type_name, payload, writer, &mut child)?;

    if let Some(field_name) = &u.byte_budget_field {
        let budget = ctx
            .current
            .get(field_name)
            .and_then(Value::as_usize)
            .ok_or_else(|| {
                BinSchemaError::encoding(format!("byte_budget field `{field_name}` not found"))
            })?;
        let consumed = writer.byte_offset() - start;
        if consumed < budget {
            writer.write_raw_bytes(&vec![0u8; budget - consumed])?;
        }
    }
    Ok(())
}

/// The width (in bits), endianness and const value of a choice candidate's
/// distinguished first field, used to peek-and-match without a trial
/// decode (§4.E.6).
fn first_field_discriminator(
    schema: &Schema,
    type_name: &str,
) -> Result<(usize, Endianness, i128)> {
    let seq = match schema.get(type_name) {
        Some(TypeDef::Sequence(seq)) => seq,
        _ => {
            return Err(BinSchemaError::schema_invalid(
                type_name,
                "choice candidate must be a sequence type",
            ));
        }
    };
    let first = seq.fields.first().ok_or_else(|| {
        BinSchemaError::schema_invalid(type_name, "choice candidate has no fields")
    })?;
    let width = match &first.kind {
        FieldKind::UInt(bits) | FieldKind::Int(bits) => *bits as usize,
        FieldKind::BitField { size } => *size,
        other => {
            return Err(BinSchemaError::schema_invalid(
                type_name,
                format!("choice candidate's first field kind {other:?} cannot be peeked"),
            ));
        }
    };
    let literal = first.const_value.as_ref().ok_or_else(|| {
        BinSchemaError::schema_invalid(type_name, "choice candidate's first field has no const")
    })?;
    let value = match literal {
        crate::schema::field::ConstLiteral::Int(v) => *v,
        crate::schema::field::ConstLiteral::Str(_) => {
            return Err(BinSchemaError::schema_invalid(
                type_name,
                "choice candidate's discriminator const must be numeric",
            ));
        }
    };
    Ok((width, codec::field_endianness(schema, first), value))
}

/// Inline-choice dispatch: peeks the first field's width of each candidate
/// and matches against its declared const, rather than trial-decoding each
/// one (§4.E.6).
pub fn decode_choice(
    schema: &Schema,
    options: &[String],
    reader: &mut BitReader,
    ctx: &mut Context,
) -> Result<Value> {
    for opt in options {
        let (width, endian, want) = first_field_discriminator(schema, opt)?;
        reader.push_position();
        let peeked = reader.read_uint(width, endian);
        reader.pop_position()?;
        if peeked? as i128 == want {
            let mut child = ctx.child_for_nested();
            let value = codec::decode_type(schema, opt, reader, &mut child)?;
            return Ok(Value::Variant {
                type_name: opt.clone(),
                value: Box::new(value),
            });
        }
    }
    Err(BinSchemaError::decoding(
        "no choice candidate's const-valued first field matched",
    ))
}

pub fn encode_choice(
    schema: &Schema,
    value: &Value,
    writer: &mut BitWriter,
    ctx: &mut Context,
) -> Result<()> {
    let (type_name, payload) = match value {
        Value::Variant { type_name, value } => (type_name.clone(), value.as_ref()),
        other => {
            return Err(BinSchemaError::encoding(format!(
                "expected a tagged choice value, found {other:?}"
            )));
        }
    };
    let mut child = ctx.child_for_nested();
    codec::encode_type(schema, &type_name, payload, writer, &mut child)
}
