//! Composite-key comparison.
//!
//! The comparator must agree byte-for-byte with `Value::to_bytes`: keys are
//! built by concatenating fixed-width column slices, and both the B+tree and
//! predicate evaluation order them through the functions here. Any mismatch
//! between serialization and comparison corrupts the tree silently.

use std::cmp::Ordering;
use corvus_common::ColType;

/// Compares a single column slice of the given type.
///
/// Integers and floats are decoded and compared numerically (floats via
/// `total_cmp` so the ordering is total); strings compare as unsigned bytes
/// over the fixed column width.
#[inline]
pub fn compare_col(a: &[u8], b: &[u8], col_type: ColType) -> Ordering {
    match col_type {
        ColType::Int => {
            let x = i32::from_le_bytes([a[0], a[1], a[2], a[3]]);
            let y = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            x.cmp(&y)
        }
        ColType::Float => {
            let x = f32::from_le_bytes([a[0], a[1], a[2], a[3]]);
            let y = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            x.total_cmp(&y)
        }
        ColType::Str => a.cmp(b),
    }
}

/// Compares two composite keys column by column.
///
/// The first non-equal column determines the result; equal across all
/// columns yields `Equal`. `types` and `lens` describe the key layout in
/// declared index order.
pub fn compare_keys(a: &[u8], b: &[u8], types: &[ColType], lens: &[usize]) -> Ordering {
    let mut offset = 0;
    for (ty, &len) in types.iter().zip(lens) {
        let width = ty.fixed_size(len);
        let ord = compare_col(&a[offset..offset + width], &b[offset..offset + width], *ty);
        if ord != Ordering::Equal {
            return ord;
        }
        offset += width;
    }
    Ordering::Equal
}
