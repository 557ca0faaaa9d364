//! Linear projection: `y = W x + b` for one row.

use super::ops;

/// Project one input row.
///
/// `weight` is `out_features × in_features`, row-major. `bias` is either
/// empty or `out_features` long.
///
/// # Panics
///
/// Panics if dimensions are inconsistent.
pub fn linear_scalar(x: &[f64], weight: &[f64], bias: &[f64], output: &mut [f64]) {
    let in_features = x.len();
    let out_features = output.len();
    assert_eq!(weight.len(), out_features * in_features, "weight dimension mismatch");
    assert!(
        bias.is_empty() || bias.len() == out_features,
        "bias must be empty or out_features={out_features}, got {}",
        bias.len()
    );

    for o in 0..out_features {
        let w_row = &weight[o * in_features..(o + 1) * in_features];
        let mut val = ops::dot(x, w_row);
        if !bias.is_empty() {
            val += bias[o];
        }
        output[o] = val;
    }
}
