//! Array codecs: §4.E.3.
//!
//! Generalizes `bitcraft::field::FieldKind::Array` (fixed length of a
//! scalar only) to every length-determination strategy and to arbitrary
//! item kinds, including nested composites and correlated selectors
//! (§4.E.5).

use crate::bitstream::{BitReader, BitWriter, Endianness};
use crate::codec::{self, helpers};
use crate::context::{ArrayIter, Context};
use crate::error::{BinSchemaError, Result};
use crate::schema::field::{ArrayLen, ArraySpec};
use crate::schema::Schema;
use crate::value::Value;

pub fn encode_array(
    schema: &Schema,
    spec: &ArraySpec,
    endian: Endianness,
    field_name: &str,
    value: &Value,
    writer: &mut BitWriter,
    ctx: &mut Context,
) -> Result<()> {
    let items = value
        .as_array()
        .ok_or_else(|| BinSchemaError::encoding("expected an array value"))?
        .to_vec();

    match &spec.length {
        ArrayLen::Fixed(n) => {
            if items.len() != *n {
                return Err(BinSchemaError::encoding(format!(
                    "fixed array expects {n} items, found {}",
                    items.len()
                )));
            }
        }
        ArrayLen::LengthPrefixed(width) => {
            helpers::write_prefix(writer, *width, items.len() as u64, endian)?;
        }
        ArrayLen::FieldReferenced(_) | ArrayLen::EofTerminated => {}
        ArrayLen::ByteLengthPrefixed(width) => {
            let mut body = BitWriter::new();
            encode_items(schema, &spec.item, field_name, &items, &mut body, ctx)?;
            let bytes = body.into_bytes();
            helpers::write_prefix(writer, *width, bytes.len() as u64, endian)?;
            return writer.write_raw_bytes(&bytes);
        }
    }

    encode_items(schema, &spec.item, field_name, &items, writer, ctx)
}

fn encode_items(
    schema: &Schema,
    item_field: &crate::schema::field::Field,
    field_name: &str,
    items: &[Value],
    writer: &mut BitWriter,
    ctx: &mut Context,
) -> Result<()> {
    let mut type_indices = std::collections::HashMap::new();
    for (i, item) in items.iter().enumerate() {
        if !field_name.is_empty() {
            ctx.record_position(format!("{field_name}[{i}]"), writer.byte_offset() as i64);
        }
        let iter = ArrayIter {
            items: items.to_vec(),
            index: i,
            type_indices: type_indices.clone(),
        };
        let mut child = ctx.child_for_array_element(field_name, iter);
        codec::encode_field_kind(
            schema,
            &item_field.kind,
            codec::field_endianness(schema, item_field),
            item,
            writer,
            &mut child,
        )?;
        if let Some(t) = item.type_name() {
            *type_indices.entry(t.to_string()).or_insert(0) += 1;
        }
    }
    if !field_name.is_empty() {
        ctx.array_iterations.insert(
            field_name.to_string(),
            ArrayIter {
                items: items.to_vec(),
                index: items.len().saturating_sub(1),
                type_indices,
            },
        );
    }
    Ok(())
}

pub fn decode_array(
    schema: &Schema,
    spec: &ArraySpec,
    endian: Endianness,
    field_name: &str,
    region_end: Option<usize>,
    reader: &mut BitReader,
    ctx: &mut Context,
) -> Result<Value> {
    let items: Vec<Value> = match &spec.length {
        ArrayLen::Fixed(n) => decode_n_items(schema, spec, field_name, *n, reader, ctx)?,
        ArrayLen::LengthPrefixed(width) => {
            let n = helpers::read_prefix(reader, *width, endian)? as usize;
            decode_n_items(schema, spec, field_name, n, reader, ctx)?
        }
        ArrayLen::FieldReferenced(name) => {
            let n = ctx
                .resolve_conditional(&[name.clone()])
                .ok()
                .and_then(|v| v.as_usize())
                .ok_or_else(|| {
                    BinSchemaError::decoding(format!("field_referenced field `{name}` not found"))
                })?;
            decode_n_items(schema, spec, field_name, n, reader, ctx)?
        }
        ArrayLen::ByteLengthPrefixed(width) => {
            let byte_len = helpers::read_prefix(reader, *width, endian)? as usize;
            let end = reader.position() + byte_len;
            decode_until(schema, spec, field_name, end, reader, ctx)?
        }
        ArrayLen::EofTerminated => {
            let end = region_end.unwrap_or_else(|| reader.data().len());
            decode_until(schema, spec, field_name, end, reader, ctx)?
        }
    };
    if !field_name.is_empty() {
        ctx.array_iterations.insert(
            field_name.to_string(),
            ArrayIter {
                items: items.clone(),
                index: items.len().saturating_sub(1),
                type_indices: std::collections::HashMap::new(),
            },
        );
    }
    Ok(Value::Array(items))
}

fn decode_n_items(
    schema: &Schema,
    spec: &ArraySpec,
    field_name: &str,
    n: usize,
    reader: &mut BitReader,
    ctx: &mut Context,
) -> Result<Vec<Value>> {
    let mut items = Vec::with_capacity(n);
    for i in 0..n {
        let iter = ArrayIter {
            items: items.clone(),
            index: i,
            type_indices: std::collections::HashMap::new(),
        };
        let mut child = ctx.child_for_array_element(field_name, iter);
        let v = codec::decode_field_kind(
            schema,
            &spec.item.kind,
            codec::field_endianness(schema, &spec.item),
            reader,
            &mut child,
        )?;
        items.push(v);
    }
    Ok(items)
}

fn decode_until(
    schema: &Schema,
    spec: &ArraySpec,
    field_name: &str,
    end_byte: usize,
    reader: &mut BitReader,
    ctx: &mut Context,
) -> Result<Vec<Value>> {
    let mut items = Vec::new();
    let mut i = 0;
    while reader.position() < end_byte {
        let iter = ArrayIter {
            items: items.clone(),
            index: i,
            type_indices: std::collections::HashMap::new(),
        };
        let mut child = ctx.child_for_array_element(field_name, iter);
        let v = codec::decode_field_kind(
            schema,
            &spec.item.kind,
            codec::field_endianness(schema, &spec.item),
            reader,
            &mut child,
        )?;
        items.push(v);
        i += 1;
    }
    Ok(items)
}
