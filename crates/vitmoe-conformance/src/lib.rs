//! # vitmoe-conformance
//!
//! Conformance harness for a fixed-point, hardware-oriented ViT / Mixture-of-Experts
//! inference engine.
//!
//! The harness loads generated weight tables into engine-ready fixed-point buffers,
//! invokes the engine once, and checks its output embeddings against a reference trace.
//!
//! ## Modules
//!
//! - [`fixed`]: Fixed-point scalar family and role aliases
//! - [`layout`]: Blocked feature layout and the `(patch, block, offset)` lane iterator
//! - [`tensor`]: Blocked activation tensors and dense weight tensors
//! - [`config`]: Model / harness configuration, YAML parsing and validation
//! - [`shapes`]: Shape contract for every tensor the engine consumes
//! - [`tables`]: Generated source tables, directory persistence, layer-dump import
//! - [`store`]: Weight/bias store
//! - [`loader`]: Contract-checked loading of source tables into the store
//! - [`engine`]: Engine call contract, scratch buffers, debug taps
//! - [`reference`]: Scalar software model of the engine
//! - [`report`]: Sample trace, aggregate error metrics and verdict
//! - [`harness`]: Buffer ownership and the load → invoke → report pipeline
//! - [`synth`]: Seeded synthetic tables for self-consistency runs

pub mod config;
pub mod engine;
pub mod error;
pub mod fixed;
pub mod harness;
pub mod kernels;
pub mod layout;
pub mod loader;
pub mod reference;
pub mod report;
pub mod shapes;
pub mod store;
pub mod synth;
pub mod tables;
pub mod tensor;

pub use error::{HarnessError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
