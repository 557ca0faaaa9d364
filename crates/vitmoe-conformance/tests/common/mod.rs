//! Shared helpers for harness integration tests.

#![allow(dead_code)]

use vitmoe_conformance::config::{ConformanceConfig, parse_config_str};
use vitmoe_conformance::engine::{EngineError, InferRequest, InferenceEngine};
use vitmoe_conformance::fixed::Activation;
use vitmoe_conformance::layout::BlockLayout;
use vitmoe_conformance::tensor::BlockedTensor;

/// Small model exercising both FFN styles and a ragged final block.
pub const TINY_YAML: &str = r"
model:
  feature_dim: 6
  feature_block_size: 4
  num_patches: 4
  input_channels: 2
  image_height: 4
  image_width: 4
  patch_height: 2
  patch_width: 2
  num_layers: 3
  num_heads: 2
  num_experts: 4
  moe_top_k: 2
  num_gate_tasks: 2
  expert_hidden_dim: 5
  vit_hidden_dim: 8
harness:
  display_patch_limit: 2
  display_dim_limit: 3
";

pub fn tiny_config() -> ConformanceConfig {
    parse_config_str(TINY_YAML).expect("tiny config parses")
}

/// Blocked tensor with `f(patch, feature)` in every valid lane.
pub fn tensor(layout: BlockLayout, f: impl Fn(usize, usize) -> f64) -> BlockedTensor<Activation> {
    let mut t = BlockedTensor::zeros(layout);
    for p in 0..layout.num_patches {
        let row: Vec<f64> = (0..layout.feature_dim).map(|d| f(p, d)).collect();
        t.write_patch(p, &row);
    }
    t
}

/// Engine that only counts calls and leaves outputs untouched.
#[derive(Debug, Default)]
pub struct CountingEngine {
    pub calls: usize,
}

impl InferenceEngine for CountingEngine {
    fn name(&self) -> &str {
        "counting"
    }

    fn infer(&mut self, _request: InferRequest<'_>) -> Result<(), EngineError> {
        self.calls += 1;
        Ok(())
    }
}

/// Engine that always reports a structural failure.
#[derive(Debug, Default)]
pub struct FailingEngine;

impl InferenceEngine for FailingEngine {
    fn name(&self) -> &str {
        "failing"
    }

    fn infer(&mut self, _request: InferRequest<'_>) -> Result<(), EngineError> {
        Err(EngineError::Resource("out of on-chip memory".to_string()))
    }
}
