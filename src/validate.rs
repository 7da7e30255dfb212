//! Component F: static schema validation, run once after parsing and before
//! any encode/decode call is trusted to terminate.
//!
//! Modeled on the shape of `bitcraft::errors` (one flat error enum with
//! path context), walking the richer type graph §4.F requires.

use std::collections::{HashMap, HashSet};

use crate::error::{BinSchemaError, Result};
use crate::expr::Expr;
use crate::schema::computed::ComputedKind;
use crate::schema::field::{ArrayLen, Field, FieldKind, StringLen};
use crate::schema::path::{PathSeg, TargetPath};
use crate::schema::union::{Discriminator, UnionDef};
use crate::schema::{Schema, SequenceType, TypeDef};

/// Validates every type definition in `schema`. Returns the first problem
/// found; a schema that passes is then safe to hand to `codec::encode`/
/// `codec::decode` without bounds-checking its own structure again.
pub fn validate_schema(schema: &Schema) -> Result<()> {
    for (name, def) in &schema.types {
        validate_type(schema, name, def)?;
    }
    check_alias_cycles(schema)?;
    Ok(())
}

fn validate_type(schema: &Schema, name: &str, def: &TypeDef) -> Result<()> {
    match def {
        TypeDef::Sequence(seq) => validate_sequence(schema, name, seq),
        TypeDef::Union(u) => validate_union(schema, name, u),
        TypeDef::BackRef(b) => validate_back_ref(schema, name, b),
    }
}

fn validate_sequence(schema: &Schema, type_name: &str, seq: &SequenceType) -> Result<()> {
    let mut seen = HashSet::new();
    for (i, field) in seq.fields.iter().enumerate() {
        let path = format!("{type_name}.fields[{i}]");
        if !field.name.is_empty() && !seen.insert(field.name.clone()) {
            return Err(BinSchemaError::schema_invalid(
                &path,
                format!("duplicate field name `{}`", field.name),
            ));
        }
        if let Some(expr) = &field.conditional {
            let _ = expr;
        }
        validate_field_kind(schema, &path, &field.kind)?;
        if let FieldKind::Union(u) = &field.kind {
            validate_byte_budget_field(&path, u, seq)?;
        }
        if let Some(computed) = &field.computed {
            validate_computed(&path, field, &computed.kind, seq)?;
        }
    }

    for (i, inst) in seq.instances.iter().enumerate() {
        let path = format!("{type_name}.instances[{i}]");
        if !schema.types.contains_key(&inst.type_name) {
            return Err(BinSchemaError::schema_invalid(
                &path,
                format!("instance references unknown type `{}`", inst.type_name),
            ));
        }
    }
    check_instance_cycles(type_name, seq)?;
    Ok(())
}

/// `byte_budget_field` must name an earlier field of this sequence holding
/// a numeric byte count, the same way a `length_of` host field does.
fn validate_byte_budget_field(path: &str, u: &UnionDef, seq: &SequenceType) -> Result<()> {
    let Some(field_name) = &u.byte_budget_field else {
        return Ok(());
    };
    let sibling = seq.fields.iter().find(|f| &f.name == field_name);
    match sibling {
        None => Err(BinSchemaError::schema_invalid(
            path,
            format!("byte_budget_field `{field_name}` does not name a sibling field"),
        )),
        Some(f) if !f.is_unsigned_integer_or_varlength() => Err(BinSchemaError::schema_invalid(
            path,
            format!("byte_budget_field `{field_name}` must be an unsigned integer or varlength field"),
        )),
        Some(_) => Ok(()),
    }
}

/// Resolves a same-scope, non-ascending target path to the sibling field it
/// names. Paths that cross a type boundary (`../`, `_root.`, array
/// selectors) aren't statically resolvable here, since the enclosing
/// sequence doesn't know its own embedding context; those are left to
/// fail, if they ever do, at decode/encode time instead.
fn resolve_sibling<'a>(seq: &'a SequenceType, target: &TargetPath) -> Option<&'a Field> {
    if target.ascend != 0 || target.from_root {
        return None;
    }
    match target.segments.as_slice() {
        [PathSeg::Field(name)] => seq.fields.iter().find(|f| &f.name == name),
        _ => None,
    }
}

/// Checks the host/target type compatibility rules of §4.F for a single
/// computed field declaration. Cross-type target paths are skipped, since
/// they aren't resolvable without the embedding schema context.
fn validate_computed(
    path: &str,
    host: &Field,
    kind: &ComputedKind,
    seq: &SequenceType,
) -> Result<()> {
    let numeric_host = |name: &str| -> Result<()> {
        if host.is_unsigned_integer_or_varlength() {
            Ok(())
        } else {
            Err(BinSchemaError::schema_invalid(
                path,
                format!("`{name}` host field must be an unsigned integer or varlength field"),
            ))
        }
    };

    match kind {
        ComputedKind::LengthOf { target, .. } => {
            numeric_host("length_of")?;
            if let Some(t) = resolve_sibling(seq, target) {
                if !matches!(
                    t.kind,
                    FieldKind::StringField(_) | FieldKind::ArrayField(_) | FieldKind::TypeRef(_)
                ) {
                    return Err(BinSchemaError::schema_invalid(
                        path,
                        "length_of target must be a string, array or nested type",
                    ));
                }
            }
        }
        ComputedKind::CountOf { target } => {
            numeric_host("count_of")?;
            if let Some(t) = resolve_sibling(seq, target) {
                if !matches!(t.kind, FieldKind::ArrayField(_)) {
                    return Err(BinSchemaError::schema_invalid(
                        path,
                        "count_of target must be an array",
                    ));
                }
            }
        }
        ComputedKind::PositionOf { .. } => numeric_host("position_of")?,
        ComputedKind::Crc32Of { target } => {
            if !matches!(host.kind, FieldKind::UInt(32)) {
                return Err(BinSchemaError::schema_invalid(
                    path,
                    "crc32_of host field must be a 32-bit unsigned integer",
                ));
            }
            if let Some(t) = resolve_sibling(seq, target) {
                match &t.kind {
                    FieldKind::ArrayField(spec) if matches!(spec.item.kind, FieldKind::UInt(8)) => {
                    }
                    _ => {
                        return Err(BinSchemaError::schema_invalid(
                            path,
                            "crc32_of target must be an array of 8-bit unsigned integers",
                        ));
                    }
                }
            }
        }
        ComputedKind::SumOfSizes { target } => {
            numeric_host("sum_of_sizes")?;
            if let Some(t) = resolve_sibling(seq, target) {
                if !matches!(t.kind, FieldKind::ArrayField(_)) {
                    return Err(BinSchemaError::schema_invalid(
                        path,
                        "sum_of_sizes target must be an array",
                    ));
                }
            }
        }
        ComputedKind::SumOfTypeSizes { target, .. } => {
            numeric_host("sum_of_type_sizes")?;
            if let Some(t) = resolve_sibling(seq, target) {
                if !matches!(t.kind, FieldKind::ArrayField(_)) {
                    return Err(BinSchemaError::schema_invalid(
                        path,
                        "sum_of_type_sizes target must be an array",
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Collects the leading identifier of every `Ident`/`Path` node reachable
/// from `expr`, the set of other names it could depend on.
fn collect_idents(expr: &Expr, out: &mut HashSet<String>) {
    match expr {
        Expr::Ident(name) => {
            out.insert(name.clone());
        }
        Expr::Path(segs) => {
            if let Some(first) = segs.first() {
                out.insert(first.clone());
            }
        }
        Expr::Unary(_, inner) => collect_idents(inner, out),
        Expr::Binary(_, lhs, rhs) => {
            collect_idents(lhs, out);
            collect_idents(rhs, out);
        }
        Expr::IntLit(_) | Expr::StrLit(_) => {}
    }
}

/// Rejects instances whose `position`/`size` expressions reference each
/// other in a cycle (§3.8), which would otherwise deadlock lazy resolution
/// at decode time.
fn check_instance_cycles(type_name: &str, seq: &SequenceType) -> Result<()> {
    let names: HashSet<&str> = seq.instances.iter().map(|i| i.name.as_str()).collect();
    let mut deps: HashMap<&str, Vec<&str>> = HashMap::new();
    for inst in &seq.instances {
        let mut idents = HashSet::new();
        collect_idents(&inst.position, &mut idents);
        if let Some(size) = &inst.size {
            collect_idents(size, &mut idents);
        }
        let refs = idents
            .iter()
            .filter(|n| names.contains(n.as_str()) && n.as_str() != inst.name)
            .map(|n| n.as_str())
            .collect();
        deps.insert(inst.name.as_str(), refs);
    }

    for start in deps.keys() {
        let mut visited = HashSet::new();
        let mut stack = vec![*start];
        while let Some(cur) = stack.pop() {
            if cur == *start && visited.contains(cur) {
                return Err(BinSchemaError::schema_invalid(
                    type_name,
                    format!("instance dependency cycle detected starting at `{start}`"),
                ));
            }
            if !visited.insert(cur) {
                continue;
            }
            if let Some(next) = deps.get(cur) {
                stack.extend(next.iter().copied());
            }
        }
    }
    Ok(())
}

fn validate_field_kind(schema: &Schema, path: &str, kind: &FieldKind) -> Result<()> {
    match kind {
        FieldKind::UInt(w) | FieldKind::Int(w) => {
            if ![8u8, 16, 32, 64].contains(w) {
                return Err(BinSchemaError::schema_invalid(
                    path,
                    format!("unsupported fixed-width integer size {w}"),
                ));
            }
        }
        FieldKind::BitField { size } => {
            if *size == 0 || *size > 64 {
                return Err(BinSchemaError::schema_invalid(
                    path,
                    format!("bit field size {size} out of range 1..=64"),
                ));
            }
        }
        FieldKind::BitfieldContainer { size, subfields } => {
            if *size == 0 || size % 8 != 0 {
                return Err(BinSchemaError::schema_invalid(
                    path,
                    "bitfield container size must be a positive multiple of 8",
                ));
            }
            let mut names = HashSet::new();
            for sf in subfields {
                if !names.insert(sf.name.clone()) {
                    return Err(BinSchemaError::schema_invalid(
                        path,
                        format!("duplicate subfield name `{}`", sf.name),
                    ));
                }
                if sf.offset + sf.size > *size {
                    return Err(BinSchemaError::schema_invalid(
                        path,
                        format!("subfield `{}` exceeds container size", sf.name),
                    ));
                }
            }
        }
        FieldKind::StringField(spec) => {
            if let StringLen::FieldReferenced(field_name) = &spec.length {
                if field_name.is_empty() {
                    return Err(BinSchemaError::schema_invalid(
                        path,
                        "field_referenced string length names no field",
                    ));
                }
            }
        }
        FieldKind::ArrayField(spec) => {
            if let ArrayLen::FieldReferenced(field_name) = &spec.length {
                if field_name.is_empty() {
                    return Err(BinSchemaError::schema_invalid(
                        path,
                        "field_referenced array length names no field",
                    ));
                }
            }
            validate_field_kind(schema, &format!("{path}.item"), &spec.item.kind)?;
        }
        FieldKind::TypeRef(name) => {
            if !schema.types.contains_key(name) {
                return Err(BinSchemaError::schema_invalid(
                    path,
                    format!("reference to unknown type `{name}`"),
                ));
            }
        }
        FieldKind::Choice(options) => {
            if options.is_empty() {
                return Err(BinSchemaError::schema_invalid(
                    path,
                    "choice must list at least one candidate type",
                ));
            }
            let mut seen_consts = HashSet::new();
            for opt in options {
                if !schema.types.contains_key(opt) {
                    return Err(BinSchemaError::schema_invalid(
                        path,
                        format!("choice references unknown type `{opt}`"),
                    ));
                }
                match schema.types.get(opt) {
                    Some(TypeDef::Sequence(seq)) => {
                        match seq.fields.first().and_then(|f| f.const_value.as_ref()) {
                            None => {
                                return Err(BinSchemaError::schema_invalid(
                                    path,
                                    format!(
                                        "choice candidate `{opt}` must start with a const-valued field"
                                    ),
                                ));
                            }
                            Some(lit) => {
                                if !seen_consts.insert(format!("{lit:?}")) {
                                    return Err(BinSchemaError::schema_invalid(
                                        path,
                                        format!(
                                            "choice candidate `{opt}` has the same const discriminator as an earlier candidate"
                                        ),
                                    ));
                                }
                            }
                        }
                    }
                    _ => {
                        return Err(BinSchemaError::schema_invalid(
                            path,
                            format!("choice candidate `{opt}` must be a field sequence"),
                        ));
                    }
                }
            }
        }
        FieldKind::Union(u) => validate_union_def(schema, path, u)?,
        FieldKind::BackReference(b) => {
            if !schema.types.contains_key(&b.target_type) {
                return Err(BinSchemaError::schema_invalid(
                    path,
                    format!("back_reference targets unknown type `{}`", b.target_type),
                ));
            }
        }
        FieldKind::Optional(inner) => validate_field_kind(schema, path, inner)?,
        FieldKind::Float32 | FieldKind::Float64 | FieldKind::Varlength(_) => {}
    }
    Ok(())
}

fn validate_union(schema: &Schema, type_name: &str, u: &UnionDef) -> Result<()> {
    validate_union_def(schema, type_name, u)
}

fn validate_union_def(schema: &Schema, path: &str, u: &UnionDef) -> Result<()> {
    if let Discriminator::Peek { width, endianness } = &u.discriminator {
        match width {
            8 => {
                if endianness.is_some() {
                    return Err(BinSchemaError::schema_invalid(
                        path,
                        "an 8-bit peek discriminator must not specify endianness",
                    ));
                }
            }
            16 | 32 => {
                if endianness.is_none() {
                    return Err(BinSchemaError::schema_invalid(
                        path,
                        format!("a {width}-bit peek discriminator requires explicit endianness"),
                    ));
                }
            }
            _ => {
                return Err(BinSchemaError::schema_invalid(
                    path,
                    format!("peek discriminator width {width} is not supported (use 8, 16 or 32)"),
                ));
            }
        }
    }

    let fallback_count = u.variants.iter().filter(|v| v.when.is_none()).count();
    if fallback_count > 1 {
        return Err(BinSchemaError::schema_invalid(
            path,
            "a union may declare at most one fallback variant",
        ));
    }
    if fallback_count == 1 && u.variants.last().is_some_and(|v| v.when.is_some()) {
        return Err(BinSchemaError::schema_invalid(
            path,
            "the fallback variant must be listed last",
        ));
    }
    for (i, variant) in u.variants.iter().enumerate() {
        if !schema.types.contains_key(&variant.type_name) {
            return Err(BinSchemaError::schema_invalid(
                &format!("{path}.variants[{i}]"),
                format!("variant references unknown type `{}`", variant.type_name),
            ));
        }
    }
    if let Some(field_name) = &u.byte_budget_field {
        if field_name.is_empty() {
            return Err(BinSchemaError::schema_invalid(
                path,
                "byte_budget_field must name a sibling field",
            ));
        }
    }
    Ok(())
}

fn validate_back_ref(
    schema: &Schema,
    type_name: &str,
    b: &crate::schema::backref::BackRefDef,
) -> Result<()> {
    if ![8u8, 16, 32].contains(&b.storage_width) {
        return Err(BinSchemaError::schema_invalid(
            type_name,
            format!("back_reference storage_width {} must be 8, 16 or 32", b.storage_width),
        ));
    }
    if !schema.types.contains_key(&b.target_type) {
        return Err(BinSchemaError::schema_invalid(
            type_name,
            format!("back_reference targets unknown type `{}`", b.target_type),
        ));
    }
    Ok(())
}

/// Rejects a type-alias chain (`TypeRef`-only sequences) that cycles back
/// on itself, which would otherwise recurse forever at decode time.
fn check_alias_cycles(schema: &Schema) -> Result<()> {
    let aliases: HashMap<&str, &str> = schema
        .types
        .iter()
        .filter_map(|(name, def)| match def {
            TypeDef::Sequence(seq) if seq.fields.len() == 1 => match &seq.fields[0].kind {
                FieldKind::TypeRef(target) => Some((name.as_str(), target.as_str())),
                _ => None,
            },
            _ => None,
        })
        .collect();

    for start in aliases.keys() {
        let mut visited = HashSet::new();
        let mut cur = *start;
        loop {
            if !visited.insert(cur) {
                return Err(BinSchemaError::schema_invalid(
                    start,
                    format!("type alias cycle detected starting at `{start}`"),
                ));
            }
            match aliases.get(cur) {
                Some(next) => cur = next,
                None => break,
            }
        }
    }
    Ok(())
}
