//! Layer normalization.
//!
//! mu = mean(x), sigma^2 = var(x), output = gamma * (x - mu) / sqrt(sigma^2 + eps) + beta

/// Epsilon used by every norm in the model.
pub const LAYERNORM_EPS: f64 = 1e-6;

/// Scalar layer normalization.
///
/// # Panics
///
/// Panics if `input`, `gamma`, `beta`, and `output` do not all have the same
/// length, or if `input` is empty.
pub fn layernorm_scalar(input: &[f64], gamma: &[f64], beta: &[f64], eps: f64, output: &mut [f64]) {
    let n = input.len();
    assert_eq!(n, gamma.len(), "input/gamma length mismatch");
    assert_eq!(n, beta.len(), "input/beta length mismatch");
    assert_eq!(n, output.len(), "input/output length mismatch");
    assert!(n > 0, "layernorm requires non-empty input");

    let mean = input.iter().sum::<f64>() / n as f64;
    let variance = input.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n as f64;
    let inv_std = 1.0 / (variance + eps).sqrt();

    for i in 0..n {
        output[i] = gamma[i] * (input[i] - mean) * inv_std + beta[i];
    }
}
