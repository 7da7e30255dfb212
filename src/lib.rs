//! # binschema
//!
//! A toolkit for declarative binary formats: describe a wire format as a
//! JSON schema of field sequences, discriminated unions and
//! back-references, then encode and decode structured values against it
//! without writing a parser by hand.
//!
//! The schema model supports bit-granular fields, length- and
//! byte-budget-prefixed arrays and strings, computed fields
//! (`length_of`, `crc32_of`, `position_of`, ...), lazily-addressed
//! instances, and compression-style back-references, all evaluated
//! through a small expression language for conditionals and array
//! lengths.
//!
//! ## Example
//!
//! ```
//! use binschema::schema::Schema;
//! use binschema::{codec, validate};
//! use binschema::value::Value;
//! use std::collections::BTreeMap;
//!
//! let schema_json = r#"{
//!     "config": { "endianness": "big" },
//!     "types": {
//!         "point": {
//!             "kind": "sequence",
//!             "fields": [
//!                 { "name": "x", "type": "u16" },
//!                 { "name": "y", "type": "u16" }
//!             ]
//!         }
//!     }
//! }"#;
//!
//! let schema = Schema::from_json(schema_json).unwrap();
//! validate::validate_schema(&schema).unwrap();
//!
//! let mut fields = BTreeMap::new();
//! fields.insert("x".to_string(), Value::UInt(1));
//! fields.insert("y".to_string(), Value::UInt(2));
//! let value = Value::Struct(fields);
//!
//! let bytes = codec::encode(&schema, "point", &value).unwrap();
//! assert_eq!(bytes, vec![0x00, 0x01, 0x00, 0x02]);
//! assert_eq!(codec::decode(&schema, "point", &bytes).unwrap(), value);
//! ```

pub mod bitstream;
pub mod codec;
pub mod context;
pub mod error;
pub mod expr;
pub mod schema;
pub mod validate;
pub mod value;
