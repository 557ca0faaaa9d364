//! GELU activation (tanh approximation).
//!
//! `GELU(x) = 0.5 * x * (1 + tanh(sqrt(2/pi) * (x + 0.044715 * x^3)))`

use std::f64::consts::PI;

/// In-place GELU over a slice.
pub fn gelu_scalar(values: &mut [f64]) {
    let sqrt_2_over_pi = (2.0f64 / PI).sqrt();
    for x in values.iter_mut() {
        let inner = sqrt_2_over_pi * (*x + 0.044_715 * *x * *x * *x);
        *x = 0.5 * *x * (1.0 + inner.tanh());
    }
}
