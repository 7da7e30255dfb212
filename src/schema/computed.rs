//! Computed-field declarations: §3.4.

use crate::schema::path::TargetPath;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputedKind {
    /// Target field/array/string length in its natural unit (array
    /// elements for count-prefixed arrays; bytes for strings and
    /// byte-length-prefixed arrays).
    LengthOf {
        target: TargetPath,
        offset: i64,
        from_after_field: bool,
    },
    /// Element count of an array.
    CountOf { target: TargetPath },
    /// Byte offset of the target from the start of the root encoded
    /// buffer.
    PositionOf { target: TargetPath },
    /// CRC-32 (IEEE 802.3 polynomial) of the target's bytes.
    Crc32Of { target: TargetPath },
    /// Total encoded byte length of a target array.
    SumOfSizes { target: TargetPath },
    /// Sum of encoded byte sizes of array elements whose concrete type
    /// equals `element_type`.
    SumOfTypeSizes {
        target: TargetPath,
        element_type: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Computed {
    pub kind: ComputedKind,
}

impl Computed {
    /// A `from_after_field` length always forces the containing sequence
    /// into the two-pass measure-then-emit protocol of §4.E.1 step 3,
    /// regardless of field order, since it sums bytes up to the end of
    /// the type. Other computed kinds only need two passes when their
    /// target lies later in the sequence — that check is field-order
    /// dependent and is made by `codec::sequence`, not here.
    pub fn always_forces_two_pass(&self) -> bool {
        matches!(
            self.kind,
            ComputedKind::LengthOf {
                from_after_field: true,
                ..
            }
        )
    }
}
