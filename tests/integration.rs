//! End-to-end encode/decode scenarios spanning the schema parser, the
//! validator and the codec engine together, built from JSON schema text the
//! way a caller of the crate actually authors one, rather than by
//! constructing `Field`/`TypeDef` values by hand as the unit tests under
//! `src/` do.

use std::collections::BTreeMap;

use binschema::codec;
use binschema::schema::Schema;
use binschema::validate;
use binschema::value::Value;

fn compile(schema_json: &str) -> Schema {
    let schema = Schema::from_json(schema_json).expect("schema parses");
    validate::validate_schema(&schema).expect("schema validates");
    schema
}

fn struct_of(fields: &[(&str, Value)]) -> Value {
    let mut map = BTreeMap::new();
    for (name, value) in fields {
        map.insert(name.to_string(), value.clone());
    }
    Value::Struct(map)
}

fn field(v: &Value, name: &str) -> &Value {
    v.field(name).unwrap_or_else(|| panic!("missing field `{name}`"))
}

// --- E1: fixed header with a const magic field -----------------------------

#[test]
fn e1_const_header_round_trips() {
    let schema = compile(
        r#"{
            "config": { "endianness": "big" },
            "types": {
                "Header": {
                    "kind": "sequence",
                    "fields": [
                        { "name": "magic", "type": "u16", "const_value": 19802 },
                        { "name": "version", "type": "u16" }
                    ]
                }
            }
        }"#,
    );

    let value = struct_of(&[("version", Value::UInt(3))]);
    let bytes = codec::encode(&schema, "Header", &value).unwrap();
    assert_eq!(bytes, vec![0x4D, 0x5A, 0x00, 0x03]);

    let decoded = codec::decode(&schema, "Header", &bytes).unwrap();
    assert_eq!(field(&decoded, "magic"), &Value::UInt(0x4D5A));
    assert_eq!(field(&decoded, "version"), &Value::UInt(3));
}

// --- E2: conditional field gated on a sibling -------------------------------

#[test]
fn e2_conditional_field_present_and_absent() {
    let schema = compile(
        r#"{
            "types": {
                "Packet": {
                    "kind": "sequence",
                    "fields": [
                        { "name": "flags", "type": "u8" },
                        { "name": "extra", "type": "u16", "conditional": "flags & 1 == 1" }
                    ]
                }
            }
        }"#,
    );

    let with_extra = struct_of(&[("flags", Value::UInt(1)), ("extra", Value::UInt(0xBEEF))]);
    let bytes = codec::encode(&schema, "Packet", &with_extra).unwrap();
    assert_eq!(bytes, vec![0x01, 0xBE, 0xEF]);
    let decoded = codec::decode(&schema, "Packet", &bytes).unwrap();
    assert_eq!(field(&decoded, "extra"), &Value::UInt(0xBEEF));

    let without_extra = struct_of(&[("flags", Value::UInt(0))]);
    let bytes = codec::encode(&schema, "Packet", &without_extra).unwrap();
    assert_eq!(bytes, vec![0x00]);
    let decoded = codec::decode(&schema, "Packet", &bytes).unwrap();
    assert_eq!(decoded.field("extra"), None);
}

// --- E3: length_of driving a field_referenced string ------------------------

#[test]
fn e3_length_of_string_round_trips() {
    let schema = compile(
        r#"{
            "types": {
                "Message": {
                    "kind": "sequence",
                    "fields": [
                        {
                            "name": "name_len",
                            "type": "u8",
                            "computed": { "op": "length_of", "target": "name" }
                        },
                        {
                            "name": "name",
                            "type": "string",
                            "length": { "mode": "field_referenced", "field": "name_len" },
                            "encoding": "ascii"
                        }
                    ]
                }
            }
        }"#,
    );

    let value = struct_of(&[("name", Value::Str("binschema".to_string()))]);
    let bytes = codec::encode(&schema, "Message", &value).unwrap();
    assert_eq!(bytes[0], 9);
    assert_eq!(&bytes[1..], b"binschema");

    let decoded = codec::decode(&schema, "Message", &bytes).unwrap();
    assert_eq!(field(&decoded, "name"), &Value::Str("binschema".to_string()));
}

// --- E4: crc32_of a preceding field, little-endian override -----------------

#[test]
fn e4_crc32_of_round_trips() {
    let schema = compile(
        r#"{
            "config": { "endianness": "big" },
            "types": {
                "Frame": {
                    "kind": "sequence",
                    "fields": [
                        {
                            "name": "checksum",
                            "type": "u32",
                            "endianness": "little",
                            "computed": { "op": "crc32_of", "target": "payload" }
                        },
                        {
                            "name": "payload",
                            "type": "array",
                            "length": { "mode": "fixed", "size": 4 },
                            "item": { "type": "u8" }
                        }
                    ]
                }
            }
        }"#,
    );

    let payload: Vec<Value> = [1u8, 2, 3, 4].iter().map(|b| Value::UInt(*b as u64)).collect();
    let value = struct_of(&[("payload", Value::Array(payload))]);
    let bytes = codec::encode(&schema, "Frame", &value).unwrap();

    let expected_crc = codec::crc32(&[1, 2, 3, 4]);
    assert_eq!(&bytes[0..4], expected_crc.to_le_bytes());
    assert_eq!(&bytes[4..8], &[1, 2, 3, 4]);

    let decoded = codec::decode(&schema, "Frame", &bytes).unwrap();
    assert_eq!(field(&decoded, "checksum"), &Value::UInt(expected_crc as u64));
}

// --- E5: RIFF-style chunk, byte-budget union on a numeric sibling -----------

fn riff_schema() -> Schema {
    compile(
        r#"{
            "config": { "endianness": "big" },
            "types": {
                "Chunk": {
                    "kind": "sequence",
                    "fields": [
                        { "name": "chunk_type", "type": "u32" },
                        { "name": "chunk_size", "type": "u32" },
                        {
                            "name": "body",
                            "type": "union",
                            "discriminator": { "source": "field", "name": "chunk_type" },
                            "byte_budget_field": "chunk_size",
                            "variants": [
                                { "when": "value == 1397316165", "type": "SizeBody" },
                                { "type": "RawBody" }
                            ]
                        }
                    ]
                },
                "SizeBody": {
                    "kind": "sequence",
                    "fields": [ { "name": "value", "type": "u32" } ]
                },
                "RawBody": {
                    "kind": "sequence",
                    "fields": []
                }
            }
        }"#,
    )
}

#[test]
fn e5_known_chunk_type_decodes_named_variant() {
    let schema = riff_schema();
    let body = Value::Variant {
        type_name: "SizeBody".to_string(),
        value: Box::new(struct_of(&[("value", Value::UInt(4096))])),
    };
    let value = struct_of(&[
        ("chunk_type", Value::UInt(1_397_316_165)), // b"SIZE"
        ("chunk_size", Value::UInt(8)),
        ("body", body),
    ]);

    let bytes = codec::encode(&schema, "Chunk", &value).unwrap();
    assert_eq!(
        bytes,
        vec![
            0x53, 0x49, 0x5A, 0x45, // "SIZE"
            0x00, 0x00, 0x00, 0x08, // chunk_size = 8
            0x00, 0x00, 0x10, 0x00, // value = 4096
            0x00, 0x00, 0x00, 0x00, // padding out to the 8-byte budget
        ]
    );

    let decoded = codec::decode(&schema, "Chunk", &bytes).unwrap();
    match field(&decoded, "body") {
        Value::Variant { type_name, value } => {
            assert_eq!(type_name, "SizeBody");
            assert_eq!(field(value, "value"), &Value::UInt(4096));
        }
        other => panic!("expected a variant, got {other:?}"),
    }
}

#[test]
fn e5_unknown_chunk_type_falls_back_and_skips_the_budget() {
    let schema = riff_schema();
    let body = Value::Variant {
        type_name: "RawBody".to_string(),
        value: Box::new(Value::Struct(BTreeMap::new())),
    };
    let value = struct_of(&[
        ("chunk_type", Value::UInt(1_482_250_825)), // b"XYZI", no matching variant
        ("chunk_size", Value::UInt(8)),
        ("body", body),
    ]);

    let bytes = codec::encode(&schema, "Chunk", &value).unwrap();
    assert_eq!(
        bytes,
        vec![0x58, 0x59, 0x5A, 0x49, 0x00, 0x00, 0x00, 0x08, 0, 0, 0, 0, 0, 0, 0, 0]
    );

    let decoded = codec::decode(&schema, "Chunk", &bytes).unwrap();
    match field(&decoded, "body") {
        Value::Variant { type_name, value } => {
            assert_eq!(type_name, "RawBody");
            assert!(value.as_struct().unwrap().is_empty());
        }
        other => panic!("expected a variant, got {other:?}"),
    }
}

// --- E6: a minimal zip-like container ---------------------------------------
//
// Exercises `Choice` dispatch on a const-valued leading field, an array
// `position_of` targeting `first<T>` among its own siblings, and `count_of`/
// `sum_of_type_sizes` reaching across a nested `../` scope.

fn zip_schema() -> Schema {
    compile(
        r#"{
            "config": { "endianness": "little" },
            "types": {
                "LocalFileHeader": {
                    "kind": "sequence",
                    "fields": [
                        { "name": "signature", "type": "u32", "const_value": 67324752 },
                        { "name": "version", "type": "u16", "const_value": 20 },
                        { "name": "flags", "type": "u16", "const_value": 0 },
                        { "name": "compression", "type": "u16", "const_value": 0 },
                        { "name": "mod_time", "type": "u16", "const_value": 0 },
                        { "name": "mod_date", "type": "u16", "const_value": 0 },
                        {
                            "name": "crc32",
                            "type": "u32",
                            "computed": { "op": "crc32_of", "target": "data" }
                        },
                        {
                            "name": "compressed_size",
                            "type": "u32",
                            "computed": { "op": "length_of", "target": "data" }
                        },
                        {
                            "name": "uncompressed_size",
                            "type": "u32",
                            "computed": { "op": "length_of", "target": "data" }
                        },
                        {
                            "name": "name_length",
                            "type": "u16",
                            "computed": { "op": "length_of", "target": "name" }
                        },
                        { "name": "extra_length", "type": "u16", "const_value": 0 },
                        {
                            "name": "name",
                            "type": "string",
                            "length": { "mode": "field_referenced", "field": "name_length" },
                            "encoding": "ascii"
                        },
                        {
                            "name": "data",
                            "type": "array",
                            "length": { "mode": "field_referenced", "field": "compressed_size" },
                            "item": { "type": "u8" }
                        }
                    ]
                },
                "CentralDirEntry": {
                    "kind": "sequence",
                    "fields": [
                        { "name": "signature", "type": "u32", "const_value": 33639248 },
                        { "name": "version_made_by", "type": "u16", "const_value": 20 },
                        { "name": "version_needed", "type": "u16", "const_value": 20 },
                        { "name": "flags", "type": "u16", "const_value": 0 },
                        { "name": "compression", "type": "u16", "const_value": 0 },
                        { "name": "mod_time", "type": "u16", "const_value": 0 },
                        { "name": "mod_date", "type": "u16", "const_value": 0 },
                        { "name": "crc32", "type": "u32" },
                        { "name": "compressed_size", "type": "u32" },
                        { "name": "uncompressed_size", "type": "u32" },
                        {
                            "name": "name_length",
                            "type": "u16",
                            "computed": { "op": "length_of", "target": "name" }
                        },
                        { "name": "extra_length", "type": "u16", "const_value": 0 },
                        { "name": "comment_length", "type": "u16", "const_value": 0 },
                        { "name": "disk_number_start", "type": "u16", "const_value": 0 },
                        { "name": "internal_attrs", "type": "u16", "const_value": 0 },
                        {
                            "name": "name",
                            "type": "string",
                            "length": { "mode": "field_referenced", "field": "name_length" },
                            "encoding": "ascii"
                        }
                    ]
                },
                "EndOfCentralDir": {
                    "kind": "sequence",
                    "fields": [
                        { "name": "signature", "type": "u32", "const_value": 101010256 },
                        { "name": "disk_number", "type": "u16", "const_value": 0 },
                        { "name": "disk_with_cd", "type": "u16", "const_value": 0 },
                        {
                            "name": "entries_this_disk",
                            "type": "u16",
                            "computed": { "op": "count_of", "target": "../records" }
                        },
                        {
                            "name": "entries_total",
                            "type": "u16",
                            "computed": { "op": "count_of", "target": "../records" }
                        },
                        {
                            "name": "cd_size",
                            "type": "u32",
                            "computed": {
                                "op": "sum_of_type_sizes",
                                "target": "../records",
                                "element_type": "CentralDirEntry"
                            }
                        },
                        { "name": "comment_length", "type": "u16", "const_value": 0 }
                    ]
                },
                "Zip": {
                    "kind": "sequence",
                    "fields": [
                        {
                            "name": "records",
                            "type": "array",
                            "length": { "mode": "fixed", "size": 2 },
                            "item": { "type": "choice", "options": ["LocalFileHeader", "CentralDirEntry"] }
                        },
                        {
                            "name": "cd_offset",
                            "type": "u32",
                            "computed": { "op": "position_of", "target": "records[first<CentralDirEntry>]" }
                        },
                        { "name": "eocd", "type": "type_ref", "ref": "EndOfCentralDir" }
                    ]
                }
            }
        }"#,
    )
}

#[test]
fn e6_zip_like_container_round_trips() {
    let schema = zip_schema();

    let data: Vec<Value> = b"Hello, World!".iter().map(|b| Value::UInt(*b as u64)).collect();
    let data_crc = codec::crc32(b"Hello, World!") as u64;

    let local_header = Value::Variant {
        type_name: "LocalFileHeader".to_string(),
        value: Box::new(struct_of(&[
            ("name", Value::Str("hello.txt".to_string())),
            ("data", Value::Array(data)),
        ])),
    };
    let central_entry = Value::Variant {
        type_name: "CentralDirEntry".to_string(),
        value: Box::new(struct_of(&[
            ("crc32", Value::UInt(data_crc)),
            ("compressed_size", Value::UInt(13)),
            ("uncompressed_size", Value::UInt(13)),
            ("name", Value::Str("hello.txt".to_string())),
        ])),
    };

    let value = struct_of(&[("records", Value::Array(vec![local_header, central_entry]))]);
    let bytes = codec::encode(&schema, "Zip", &value).unwrap();

    // LocalFileHeader: 30 fixed bytes + "hello.txt" (9) + "Hello, World!" (13) = 52.
    let local_len = 52usize;
    // CentralDirEntry: 38 fixed bytes + "hello.txt" (9) = 47.
    let central_len = 47usize;

    assert_eq!(&bytes[0..4], &0x04034b50u32.to_le_bytes());
    assert_eq!(&bytes[local_len..local_len + 4], &0x02014b50u32.to_le_bytes());

    let cd_offset_bytes = &bytes[local_len + central_len..local_len + central_len + 4];
    assert_eq!(u32::from_le_bytes(cd_offset_bytes.try_into().unwrap()), local_len as u32);

    let eocd_start = local_len + central_len + 4;
    assert_eq!(&bytes[eocd_start..eocd_start + 4], &0x06054b50u32.to_le_bytes());

    let decoded = codec::decode(&schema, "Zip", &bytes).unwrap();
    assert_eq!(field(&decoded, "cd_offset"), &Value::UInt(local_len as u64));

    let eocd = field(&decoded, "eocd");
    assert_eq!(field(eocd, "entries_this_disk"), &Value::UInt(2));
    assert_eq!(field(eocd, "entries_total"), &Value::UInt(2));
    assert_eq!(field(eocd, "cd_size"), &Value::UInt(central_len as u64));

    let records = field(&decoded, "records").as_array().unwrap();
    assert_eq!(records.len(), 2);
    match &records[0] {
        Value::Variant { type_name, value } => {
            assert_eq!(type_name, "LocalFileHeader");
            assert_eq!(field(value, "name"), &Value::Str("hello.txt".to_string()));
        }
        other => panic!("expected a variant, got {other:?}"),
    }
}

// --- supplementary: bit fields at unaligned widths/offsets ------------------

#[test]
fn odd_width_bitfields_round_trip_unaligned() {
    let schema = compile(
        r#"{
            "types": {
                "Packed": {
                    "kind": "sequence",
                    "fields": [
                        { "name": "a", "type": "bits", "size": 3 },
                        { "name": "b", "type": "bits", "size": 13 },
                        { "name": "c", "type": "bits", "size": 1 },
                        { "name": "d", "type": "bits", "size": 47 }
                    ]
                }
            }
        }"#,
    );

    let value = struct_of(&[
        ("a", Value::UInt(5)),
        ("b", Value::UInt(6001)),
        ("c", Value::UInt(1)),
        ("d", Value::BigUInt(0x7FFF_FFFF_FFFF)),
    ]);

    let bytes = codec::encode(&schema, "Packed", &value).unwrap();
    assert_eq!(bytes.len(), 8); // 3 + 13 + 1 + 47 = 64 bits

    let decoded = codec::decode(&schema, "Packed", &bytes).unwrap();
    assert_eq!(field(&decoded, "a"), &Value::UInt(5));
    assert_eq!(field(&decoded, "b"), &Value::UInt(6001));
    assert_eq!(field(&decoded, "c"), &Value::UInt(1));
}

// --- supplementary: text encodings -------------------------------------------

#[test]
fn latin1_and_utf8_strings_round_trip() {
    let schema = compile(
        r#"{
            "types": {
                "Text": {
                    "kind": "sequence",
                    "fields": [
                        {
                            "name": "latin1",
                            "type": "string",
                            "length": { "mode": "fixed", "size": 4 },
                            "encoding": "latin1"
                        },
                        {
                            "name": "utf8",
                            "type": "string",
                            "length": { "mode": "length_prefixed", "width": "u8" },
                            "encoding": "utf8"
                        }
                    ]
                }
            }
        }"#,
    );

    let value = struct_of(&[
        ("latin1", Value::Str("café".to_string())),
        ("utf8", Value::Str("héllo".to_string())),
    ]);
    let bytes = codec::encode(&schema, "Text", &value).unwrap();
    let decoded = codec::decode(&schema, "Text", &bytes).unwrap();
    assert_eq!(field(&decoded, "latin1"), &Value::Str("café".to_string()));
    assert_eq!(field(&decoded, "utf8"), &Value::Str("héllo".to_string()));
}

#[test]
fn fixed_string_pads_on_encode_and_trims_on_decode() {
    let schema = compile(
        r#"{
            "types": {
                "Tag": {
                    "kind": "sequence",
                    "fields": [
                        {
                            "name": "name",
                            "type": "string",
                            "length": { "mode": "fixed", "size": 8 },
                            "encoding": "ascii"
                        }
                    ]
                }
            }
        }"#,
    );

    let value = struct_of(&[("name", Value::Str("ok".to_string()))]);
    let bytes = codec::encode(&schema, "Tag", &value).unwrap();
    assert_eq!(bytes, vec![b'o', b'k', 0, 0, 0, 0, 0, 0]);

    let decoded = codec::decode(&schema, "Tag", &bytes).unwrap();
    assert_eq!(field(&decoded, "name"), &Value::Str("ok".to_string()));
}

// --- supplementary: inline choice dispatch ----------------------------------

#[test]
fn inline_choice_dispatches_on_leading_const() {
    let schema = compile(
        r#"{
            "types": {
                "Ping": {
                    "kind": "sequence",
                    "fields": [
                        { "name": "tag", "type": "u8", "const_value": 1 },
                        { "name": "nonce", "type": "u32" }
                    ]
                },
                "Pong": {
                    "kind": "sequence",
                    "fields": [
                        { "name": "tag", "type": "u8", "const_value": 2 },
                        { "name": "reply_to", "type": "u32" }
                    ]
                },
                "Message": {
                    "kind": "sequence",
                    "fields": [
                        { "name": "body", "type": "choice", "options": ["Ping", "Pong"] }
                    ]
                }
            }
        }"#,
    );

    let ping = struct_of(&[(
        "body",
        Value::Variant {
            type_name: "Ping".to_string(),
            value: Box::new(struct_of(&[("nonce", Value::UInt(7))])),
        },
    )]);
    let bytes = codec::encode(&schema, "Message", &ping).unwrap();
    assert_eq!(bytes, vec![1, 0, 0, 0, 7]);

    let pong = struct_of(&[(
        "body",
        Value::Variant {
            type_name: "Pong".to_string(),
            value: Box::new(struct_of(&[("reply_to", Value::UInt(9))])),
        },
    )]);
    let bytes = codec::encode(&schema, "Message", &pong).unwrap();
    assert_eq!(bytes, vec![2, 0, 0, 0, 9]);

    let decoded = codec::decode(&schema, "Message", &bytes).unwrap();
    match field(&decoded, "body") {
        Value::Variant { type_name, value } => {
            assert_eq!(type_name, "Pong");
            assert_eq!(field(value, "reply_to"), &Value::UInt(9));
        }
        other => panic!("expected a variant, got {other:?}"),
    }
}

// --- supplementary: back-reference compression pointers ---------------------

#[test]
fn back_references_compress_repeated_labels() {
    let schema = compile(
        r#"{
            "config": { "endianness": "big" },
            "types": {
                "Label": {
                    "kind": "sequence",
                    "fields": [
                        {
                            "name": "text",
                            "type": "string",
                            "length": { "mode": "length_prefixed", "width": "u8" },
                            "encoding": "ascii"
                        }
                    ]
                },
                "Pointer": {
                    "kind": "back_reference",
                    "storage_width": 16,
                    "offset_mask": 16383,
                    "marker_value": 49152,
                    "offset_from": "message_start",
                    "target_type": "Label"
                },
                "Document": {
                    "kind": "sequence",
                    "fields": [
                        { "name": "label1", "type": "back_reference", "storage_width": 16, "offset_mask": 16383, "marker_value": 49152, "offset_from": "message_start", "target_type": "Label" },
                        { "name": "label2", "type": "back_reference", "storage_width": 16, "offset_mask": 16383, "marker_value": 49152, "offset_from": "message_start", "target_type": "Label" },
                        { "name": "label3", "type": "back_reference", "storage_width": 16, "offset_mask": 16383, "marker_value": 49152, "offset_from": "message_start", "target_type": "Label" }
                    ]
                }
            }
        }"#,
    );

    let same_label = || struct_of(&[("text", Value::Str("example.com".to_string()))]);
    let value = struct_of(&[
        ("label1", same_label()),
        ("label2", same_label()),
        ("label3", Value::Struct(
            [("text".to_string(), Value::Str("other.com".to_string()))].into_iter().collect(),
        )),
    ]);

    let bytes = codec::encode(&schema, "Document", &value).unwrap();
    // label1 is written out in full; label2 is byte-identical so it should
    // compress down to a two-byte pointer back at label1's offset.
    assert!(bytes.len() < 2 * (1 + "example.com".len()) + (1 + "other.com".len()) + 2);

    let decoded = codec::decode(&schema, "Document", &bytes).unwrap();
    assert_eq!(field(&decoded, "label1"), field(&decoded, "label2"));
    assert_eq!(
        field(field(&decoded, "label1"), "text"),
        &Value::Str("example.com".to_string())
    );
    assert_eq!(
        field(field(&decoded, "label3"), "text"),
        &Value::Str("other.com".to_string())
    );
}

// --- supplementary: validator rejects malformed schemas ----------------------

#[test]
fn validator_rejects_unknown_type_reference() {
    let schema_json = r#"{
        "types": {
            "Packet": {
                "kind": "sequence",
                "fields": [ { "name": "body", "type": "type_ref", "ref": "Missing" } ]
            }
        }
    }"#;
    let schema = Schema::from_json(schema_json).unwrap();
    let err = validate::validate_schema(&schema).unwrap_err();
    assert!(err.to_string().contains("unknown type"));
}

#[test]
fn validator_rejects_duplicate_choice_discriminators() {
    let schema_json = r#"{
        "types": {
            "A": { "kind": "sequence", "fields": [ { "name": "tag", "type": "u8", "const_value": 1 } ] },
            "B": { "kind": "sequence", "fields": [ { "name": "tag", "type": "u8", "const_value": 1 } ] },
            "Packet": {
                "kind": "sequence",
                "fields": [ { "name": "body", "type": "choice", "options": ["A", "B"] } ]
            }
        }
    }"#;
    let schema = Schema::from_json(schema_json).unwrap();
    let err = validate::validate_schema(&schema).unwrap_err();
    assert!(err.to_string().contains("schema invalid"));
}

#[test]
fn validator_rejects_circular_instance_positions() {
    let schema_json = r#"{
        "types": {
            "Root": {
                "kind": "sequence",
                "fields": [],
                "instances": [
                    { "name": "a", "position": "b", "type": "u8" },
                    { "name": "b", "position": "a", "type": "u8" }
                ]
            }
        }
    }"#;
    let schema = Schema::from_json(schema_json).unwrap();
    let err = validate::validate_schema(&schema).unwrap_err();
    assert!(err.to_string().contains("schema invalid"));
}
