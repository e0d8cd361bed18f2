//! Top-k selection kernels.

use std::cmp::Ordering;

/// Orders column indices by descending value, then ascending index.
///
/// `total_cmp` keeps the order total even if a NaN slips into the logits.
pub fn rank_order(row: &[f32], a: usize, b: usize) -> Ordering {
    row[b].total_cmp(&row[a]).then(a.cmp(&b))
}

/// Returns the column indices of the `k` largest entries of `row`, best
/// first, lower index first among equal values.
///
/// `k` larger than the row yields every index in rank order.
pub fn top_k_indices(row: &[f32], k: usize) -> Vec<usize> {
    let k = k.min(row.len());
    let mut idx: Vec<usize> = (0..row.len()).collect();
    if k == 0 {
        return Vec::new();
    }
    if k < idx.len() {
        idx.select_nth_unstable_by(k - 1, |&a, &b| rank_order(row, a, b));
        idx.truncate(k);
    }
    idx.sort_unstable_by(|&a, &b| rank_order(row, a, b));
    idx
}

/// Index of the largest entry, lower index first on ties. `None` for an
/// empty row.
pub fn argmax(row: &[f32]) -> Option<usize> {
    (0..row.len()).min_by(|&a, &b| rank_order(row, a, b))
}
