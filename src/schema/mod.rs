//! Component B: the compiled schema model. Generalizes
//! `bitcraft::schema::Schema` (a flat `HashMap<String, Vec<Field>>`) to the
//! full closed type-definition set: field sequences (with lazy instances),
//! discriminated unions, and back-reference types.

use std::collections::HashMap;

use crate::bitstream::{BitOrder, Endianness};
use crate::expr::Expr;
use crate::schema::backref::BackRefDef;
use crate::schema::field::Field;
use crate::schema::union::UnionDef;

pub mod backref;
pub mod computed;
pub mod de;
pub mod field;
pub mod path;
pub mod union;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub endianness: Endianness,
    pub bit_order: BitOrder,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            endianness: Endianness::Big,
            bit_order: BitOrder::MsbFirst,
        }
    }
}

/// A lazily-decoded, position-addressed sibling structure (§3.8): read (or
/// written) at `position` bytes from the start of the root buffer, for up
/// to `size` bytes if given, independent of the enclosing sequence's own
/// cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub name: String,
    pub position: Expr,
    pub size: Option<Expr>,
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceType {
    pub fields: Vec<Field>,
    pub instances: Vec<Instance>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeDef {
    Sequence(SequenceType),
    Union(UnionDef),
    BackRef(BackRefDef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub config: Config,
    pub types: HashMap<String, TypeDef>,
}

impl Schema {
    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    /// Parses and compiles a schema from its JSON text form (§4.B), running
    /// only structural `TryFrom` conversion — full semantic validation is
    /// `validate::validate_schema`, run separately so callers can choose to
    /// skip it for schemas they already trust.
    pub fn from_json(text: &str) -> crate::error::Result<Schema> {
        let raw: de::SchemaDef = serde_json::from_str(text).map_err(|e| {
            crate::error::BinSchemaError::schema_invalid("$", format!("invalid JSON: {e}"))
        })?;
        Schema::try_from(raw)
    }
}
