//! Back-reference (compression pointer) codec: §3.7, §4.E.3.
//!
//! The encoder dictionary keys on a throwaway canonical encoding of the
//! target value: a canonical byte representation of the already-built
//! value is used as a dictionary key rather than requiring value types
//! to be structurally hashable.

use crate::bitstream::{BitReader, BitWriter, Endianness};
use crate::codec;
use crate::context::Context;
use crate::error::{BinSchemaError, Result};
use crate::schema::backref::{BackRefDef, OffsetFrom};
use crate::schema::Schema;
use crate::value::Value;

fn canonical_key(schema: &Schema, target_type: &str, value: &Value, ctx: &Context) -> Result<Vec<u8>> {
    let mut probe = ctx.probe().child_for_nested();
    let mut writer = BitWriter::new();
    codec::encode_type(schema, target_type, value, &mut writer, &mut probe)?;
    Ok(writer.into_bytes())
}

pub fn encode_backref(
    schema: &Schema,
    b: &BackRefDef,
    value: &Value,
    writer: &mut BitWriter,
    ctx: &mut Context,
) -> Result<()> {
    let endian = Endianness::Big;
    let key = canonical_key(schema, &b.target_type, value, ctx)?;

    let anchor = match b.offset_from {
        OffsetFrom::MessageStart => 0i64,
        OffsetFrom::CurrentPosition => writer.byte_offset() as i64,
    };

    let existing = ctx
        .backref_dicts
        .borrow()
        .get(&b.target_type)
        .and_then(|dict| dict.get(&key).copied());

    if let Some(seen_at) = existing {
        let offset = (seen_at - anchor) as u64 & b.offset_mask;
        let raw = b.encode_pointer(offset);
        writer.write_uint(raw, b.storage_width as usize, endian)
    } else {
        let start = writer.byte_offset() as i64;
        ctx.backref_dicts
            .borrow_mut()
            .entry(b.target_type.clone())
            .or_default()
            .insert(key, start);
        let mut child = ctx.child_for_nested();
        codec::encode_type(schema, &b.target_type, value, writer, &mut child)
    }
}

pub fn decode_backref(
    schema: &Schema,
    b: &BackRefDef,
    reader: &mut BitReader,
    ctx: &mut Context,
) -> Result<Value> {
    let endian = Endianness::Big;
    let anchor = match b.offset_from {
        OffsetFrom::MessageStart => 0i64,
        OffsetFrom::CurrentPosition => reader.position() as i64,
    };
    let peeked = reader.peek_bits(b.storage_width as usize)?;

    if !b.is_pointer(peeked) {
        let mut child = ctx.child_for_nested();
        return codec::decode_type(schema, &b.target_type, reader, &mut child);
    }
    reader.read_uint(b.storage_width as usize, endian)?;
    let raw = peeked;

    let offset = b.decode_offset(raw) as i64;
    let target_pos = anchor + offset;

    if !ctx.backref_visiting.borrow_mut().insert(target_pos) {
        return Err(BinSchemaError::CircularReference { offset: target_pos });
    }

    let resume_at = reader.position() as i64;
    reader.seek(target_pos)?;
    let mut child = ctx.child_for_nested();
    let result = codec::decode_type(schema, &b.target_type, reader, &mut child);
    reader.seek(resume_at)?;

    ctx.backref_visiting.borrow_mut().remove(&target_pos);
    result
}
