//! Bit field and bitfield-container codecs: §4.E.3.
//!
//! Generalizes `bitcraft::bits::read_bits_at` (MSB-first only, read-only)
//! to both bit orders and to the named-subfield container.

use crate::bitstream::{BitReader, BitWriter};
use crate::error::{BinSchemaError, Result};
use crate::schema::field::SubField;
use crate::value::Value;

pub fn encode_bitfield(writer: &mut BitWriter, size: usize, value: &Value) -> Result<()> {
    let raw = value
        .as_i128()
        .ok_or_else(|| BinSchemaError::encoding("bit field value must be a numeric type"))?;
    writer.write_bits(raw as u64 & mask64(size), size)
}

pub fn decode_bitfield(reader: &mut BitReader, size: usize) -> Result<Value> {
    let raw = reader.read_bits(size)?;
    Ok(if size > 32 {
        Value::BigUInt(raw as u128)
    } else {
        Value::UInt(raw)
    })
}

pub fn encode_bitfield_container(
    writer: &mut BitWriter,
    size: usize,
    subfields: &[SubField],
    value: &Value,
) -> Result<()> {
    if size > 64 {
        return Err(BinSchemaError::encoding(
            "bitfield containers wider than 64 bits are not supported",
        ));
    }
    let fields = value
        .as_struct()
        .ok_or_else(|| BinSchemaError::encoding("bitfield container value must be a struct"))?;
    let mut block: u128 = 0;
    for sf in subfields {
        let v = fields.get(&sf.name).and_then(Value::as_i128).ok_or_else(|| {
            BinSchemaError::encoding(format!("bitfield subfield `{}` not found", sf.name))
        })?;
        let shifted = (v as u128 & mask128(sf.size)) << (size - sf.offset - sf.size);
        block |= shifted;
    }
    writer.write_bits(block as u64, size)

}

pub fn decode_bitfield_container(
    reader: &mut BitReader,
    size: usize,
    subfields: &[SubField],
) -> Result<Value> {
    if size > 64 {
        return Err(BinSchemaError::decoding(
            "bitfield containers wider than 64 bits are not supported",
        ));
    }
    let block = reader.read_bits(size)? as u128;
    let mut out = std::collections::BTreeMap::new();
    for sf in subfields {
        let shift = size - sf.offset - sf.size;
        let raw = (block >> shift) & mask128(sf.size);
        let v = if sf.size > 32 {
            Value::BigUInt(raw)
        } else {
            Value::UInt(raw as u64)
        };
        out.insert(sf.name.clone(), v);
    }
    Ok(Value::Struct(out))
}

fn mask64(bits: usize) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

fn mask128(bits: usize) -> u128 {
    if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_roundtrip() {
        let subfields = vec![
            SubField { name: "major".to_string(), offset: 0, size: 4 },
            SubField { name: "minor".to_string(), offset: 4, size: 4 },
        ];
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("major".to_string(), Value::UInt(9));
        fields.insert("minor".to_string(), Value::UInt(2));
        let value = Value::Struct(fields);

        let mut w = BitWriter::new();
        encode_bitfield_container(&mut w, 8, &subfields, &value).unwrap();
        let bytes = w.into_bytes();
        assert_eq!(bytes, vec![0x92]);

        let mut r = BitReader::new(&bytes);
        let decoded = decode_bitfield_container(&mut r, 8, &subfields).unwrap();
        assert_eq!(decoded, value);
    }
}
