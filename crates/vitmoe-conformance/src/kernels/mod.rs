//! Scalar `f64` reference kernels used by the software engine.
//!
//! Each kernel works on plain slices; quantization to the fixed-point
//! buffers happens in the caller.

// Kernel code naturally uses single-character math variable names (m, n, k, x, etc.).
#![allow(
    clippy::many_single_char_names,
    clippy::similar_names,
    clippy::cast_precision_loss,
    clippy::needless_range_loop,
    clippy::float_cmp
)]

pub mod activation;
pub mod layernorm;
pub mod linear;
pub mod ops;
