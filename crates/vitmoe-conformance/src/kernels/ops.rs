//! Shared kernel primitives: dot product, softmax row, top-k selection.

/// Dot product of two slices.
#[inline]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let mut sum = 0.0f64;
    for i in 0..a.len() {
        sum += a[i] * b[i];
    }
    sum
}

/// In-place softmax over a contiguous row.
///
/// Subtracts the row maximum before exponentiating. Returns `(max, sum)`,
/// the running state a streaming implementation would keep per row.
pub fn softmax_row(row: &mut [f64]) -> (f64, f64) {
    let max_val = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0f64;
    for v in row.iter_mut() {
        *v = (*v - max_val).exp();
        sum += *v;
    }
    if sum > 0.0 {
        for v in row.iter_mut() {
            *v /= sum;
        }
    }
    (max_val, sum)
}

/// `output[i] += weight * row[i]`.
#[inline]
pub fn weighted_accumulate(output: &mut [f64], weight: f64, row: &[f64]) {
    debug_assert_eq!(output.len(), row.len());
    for (o, v) in output.iter_mut().zip(row.iter()) {
        *o += weight * v;
    }
}

/// Indices of the `k` largest values, largest first. Ties keep the lower
/// index first, so selection is deterministic.
///
/// # Panics
///
/// Panics if `k > values.len()` or `out.len() != k`.
pub fn top_k(values: &[f64], k: usize, out: &mut [usize]) {
    assert!(k <= values.len(), "top_k: k = {k} exceeds {}", values.len());
    assert_eq!(out.len(), k, "top_k output length mismatch");
    for slot in 0..k {
        let mut best: Option<usize> = None;
        for (i, &v) in values.iter().enumerate() {
            if out[..slot].contains(&i) {
                continue;
            }
            match best {
                Some(b) if values[b] >= v => {}
                _ => best = Some(i),
            }
        }
        out[slot] = best.unwrap_or(0);
    }
}
