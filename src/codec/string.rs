//! String codecs: §4.E.3.

use crate::bitstream::{BitReader, BitWriter, Endianness};
use crate::codec::helpers;
use crate::context::Context;
use crate::error::{BinSchemaError, Result};
use crate::schema::field::{StringLen, StringSpec, TextEncoding};
use crate::value::Value;

fn encode_text(spec: &TextEncoding, s: &str) -> Result<Vec<u8>> {
    match spec {
        TextEncoding::Utf8 => Ok(s.as_bytes().to_vec()),
        TextEncoding::Ascii => {
            if !s.is_ascii() {
                return Err(BinSchemaError::encoding(
                    "string contains non-ASCII characters but encoding is ascii",
                ));
            }
            Ok(s.as_bytes().to_vec())
        }
        TextEncoding::Latin1 => s
            .chars()
            .map(|c| u8::try_from(c as u32).map_err(|_| {
                BinSchemaError::encoding(format!("character `{c}` is not representable in latin1"))
            }))
            .collect(),
    }
}

fn decode_text(spec: &TextEncoding, bytes: &[u8]) -> Result<String> {
    match spec {
        TextEncoding::Utf8 | TextEncoding::Ascii => String::from_utf8(bytes.to_vec())
            .map_err(|e| BinSchemaError::decoding(format!("invalid utf-8 in string field: {e}"))),
        TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
    }
}

/// The length, in bytes, `s` occupies on the wire once transcoded.
pub fn encoded_len(spec: &TextEncoding, s: &str) -> Result<usize> {
    Ok(encode_text(spec, s)?.len())
}

pub fn encode_string(
    writer: &mut BitWriter,
    spec: &StringSpec,
    endian: Endianness,
    value: &Value,
) -> Result<()> {
    let s = value
        .as_str()
        .ok_or_else(|| BinSchemaError::encoding("expected a string value"))?;
    let bytes = encode_text(&spec.encoding, s)?;

    match &spec.length {
        StringLen::Fixed(size) => {
            if bytes.len() > *size {
                return Err(BinSchemaError::encoding(format!(
                    "string of {} bytes does not fit in fixed field of {size} bytes",
                    bytes.len()
                )));
            }
            let mut padded = bytes;
            padded.resize(*size, 0);
            writer.write_raw_bytes(&padded)
        }
        StringLen::LengthPrefixed(width) => {
            helpers::write_prefix(writer, *width, bytes.len() as u64, endian)?;
            writer.write_raw_bytes(&bytes)
        }
        StringLen::NullTerminated => {
            writer.write_raw_bytes(&bytes)?;
            writer.write_u8(0)
        }
        StringLen::FieldReferenced(_) => writer.write_raw_bytes(&bytes),
    }
}

pub fn decode_string(
    reader: &mut BitReader,
    spec: &StringSpec,
    endian: Endianness,
    ctx: &Context,
) -> Result<Value> {
    let bytes = match &spec.length {
        StringLen::Fixed(size) => {
            let raw = reader.read_raw_bytes(*size)?;
            let trimmed_len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            raw[..trimmed_len].to_vec()
        }
        StringLen::LengthPrefixed(width) => {
            let len = helpers::read_prefix(reader, *width, endian)? as usize;
            reader.read_raw_bytes(len)?
        }
        StringLen::NullTerminated => {
            let mut out = Vec::new();
            loop {
                let b = reader.read_u8()?;
                if b == 0 {
                    break;
                }
                out.push(b);
            }
            out
        }
        StringLen::FieldReferenced(name) => {
            let len = ctx
                .resolve_conditional(&[name.clone()])
                .ok()
                .and_then(|v| v.as_usize())
                .ok_or_else(|| {
                    BinSchemaError::decoding(format!("field_referenced field `{name}` not found"))
                })?;
            reader.read_raw_bytes(len)?
        }
    };
    Ok(Value::Str(decode_text(&spec.encoding, &bytes)?))
}

pub fn calculate_size(spec: &StringSpec, value: &Value) -> Result<usize> {
    let s = value
        .as_str()
        .ok_or_else(|| BinSchemaError::encoding("expected a string value"))?;
    let len = encoded_len(&spec.encoding, s)?;
    Ok(match &spec.length {
        StringLen::Fixed(size) => *size,
        StringLen::LengthPrefixed(width) => width.bits() / 8 + len,
        StringLen::NullTerminated => len + 1,
        StringLen::FieldReferenced(_) => len,
    })
}
