//! Target-path grammar used by computed declarations (§3.4) and by
//! instance `position`/`size` expressions' field references.
//!
//! Segments are field names; `../` ascends one parent-scope level;
//! `_root.` restarts at the root value; `array[selector]` applies a
//! selector in the nearest enclosing iteration of the named array.

use crate::error::{BinSchemaError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    SameIndex(String),
    First(String),
    Last(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    Field(String),
    ArraySelector { name: String, selector: Selector },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TargetPath {
    /// Number of leading `../` ascents.
    pub ascend: usize,
    /// Whether the path starts with `_root.`.
    pub from_root: bool,
    pub segments: Vec<PathSeg>,
}

/// Parses a single dotted segment, recognizing a trailing `name[selector]`
/// bracket form.
pub fn parse_segment(raw: &str) -> Result<PathSeg> {
    if let Some(bracket_start) = raw.find('[') {
        if !raw.ends_with(']') {
            return Err(BinSchemaError::encoding(format!(
                "malformed array selector in path segment `{raw}`"
            )));
        }
        let name = raw[..bracket_start].to_string();
        let inner = &raw[bracket_start + 1..raw.len() - 1];
        let selector = parse_selector(inner)?;
        Ok(PathSeg::ArraySelector { name, selector })
    } else {
        Ok(PathSeg::Field(raw.to_string()))
    }
}

fn parse_selector(inner: &str) -> Result<Selector> {
    let (kind, rest) = inner
        .split_once('<')
        .ok_or_else(|| BinSchemaError::encoding(format!("malformed selector `{inner}`")))?;
    let type_name = rest
        .strip_suffix('>')
        .ok_or_else(|| BinSchemaError::encoding(format!("malformed selector `{inner}`")))?
        .to_string();
    match kind {
        "same_index" => Ok(Selector::SameIndex(type_name)),
        "first" => Ok(Selector::First(type_name)),
        "last" => Ok(Selector::Last(type_name)),
        other => Err(BinSchemaError::encoding(format!(
            "unknown selector `{other}`"
        ))),
    }
}

/// Parses a full target path: e.g. `../../length`, `_root.header.count`,
/// `items[same_index<Chunk>].size`, or a plain `field_name`.
pub fn parse_target_path(src: &str) -> Result<TargetPath> {
    let mut rest = src.trim();
    let mut ascend = 0usize;
    while let Some(stripped) = rest.strip_prefix("../") {
        ascend += 1;
        rest = stripped;
    }

    let mut from_root = false;
    if let Some(stripped) = rest.strip_prefix("_root.") {
        from_root = true;
        rest = stripped;
    } else if rest == "_root" {
        from_root = true;
        rest = "";
    }

    let segments = if rest.is_empty() {
        Vec::new()
    } else {
        rest.split('.')
            .map(parse_segment)
            .collect::<Result<Vec<_>>>()?
    };

    Ok(TargetPath {
        ascend,
        from_root,
        segments,
    })
}
