//! Seeded synthetic tables.
//!
//! [`synthesize`] draws small uniform weights and a random image, runs the
//! reference engine over them and stores its output as `reference_x`, so the
//! returned set is self-consistent: the reference engine conforms to it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::config::{ConformanceConfig, ModelConfig};
use crate::error::Result;
use crate::fixed::FixedScalar;
use crate::harness::Harness;
use crate::reference::ReferenceEngine;
use crate::shapes::{TensorId, shape_contract};
use crate::tables::{SourceTable, TableSet};

/// Sampling range for one table: uniform in `center ± spread`.
fn init_range(model: &ModelConfig, id: TensorId) -> (f32, f32) {
    let fan_in = |n: usize| 1.0 / (n.max(1) as f32).sqrt();
    match id {
        TensorId::Images => (0.5, 0.5),
        TensorId::PatchEmbedWeights => (0.0, fan_in(model.patch_elements())),
        TensorId::NormWeights => (1.0, 0.1),
        TensorId::AttnWeights
        | TensorId::MoeGate
        | TensorId::MoeWeightsL1
        | TensorId::VitWeightsL1 => (0.0, fan_in(model.feature_dim)),
        TensorId::MoeWeightsL2 => (0.0, fan_in(model.expert_hidden_dim)),
        TensorId::VitWeightsL2 => (0.0, fan_in(model.vit_hidden_dim)),
        TensorId::PatchEmbedBias
        | TensorId::PosEmbed
        | TensorId::NormBias
        | TensorId::AttnBias
        | TensorId::MoeBiasL1
        | TensorId::MoeBiasL2
        | TensorId::VitBiasL1
        | TensorId::VitBiasL2 => (0.0, 0.02),
        TensorId::Reference => (0.0, 0.0),
    }
}

fn uniform(rng: &mut StdRng, n: usize, (center, spread): (f32, f32)) -> Vec<f32> {
    (0..n)
        .map(|_| center + spread * rng.gen_range(-1.0_f32..1.0))
        .collect()
}

/// Generate a self-consistent table set for `config`.
///
/// # Errors
///
/// [`crate::HarnessError::InvalidConfig`] for an unusable configuration, or
/// any error from running the reference engine.
pub fn synthesize(config: &ConformanceConfig, seed: u64) -> Result<TableSet> {
    let model = &config.model;
    let h = &config.harness;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut tables = TableSet::new();
    for entry in shape_contract(model, h.num_images, h.gate_task) {
        let data = if entry.id == TensorId::Reference {
            vec![0.0; entry.source_elements()]
        } else {
            uniform(&mut rng, entry.source_elements(), init_range(model, entry.id))
        };
        tables.insert(SourceTable::new(entry.id.table_name(), entry.source_shape, data)?);
    }

    let mut harness = Harness::new(config.clone())?;
    let mut engine = ReferenceEngine::new(model);
    harness.load(&tables)?;
    harness.run(&mut engine)?;

    let rows: Vec<f32> = harness
        .outputs()
        .iter()
        .flat_map(|out| out.to_rows())
        .map(|v| v.to_f64() as f32)
        .collect();
    tables.insert(SourceTable::new(
        TensorId::Reference.table_name(),
        vec![h.num_images, model.num_patches, model.feature_dim],
        rows,
    )?);

    info!(seed, tables = tables.len(), "synthesized table set");
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> ConformanceConfig {
        crate::config::parse_config_str(
            r"
model:
  feature_dim: 6
  feature_block_size: 4
  num_patches: 4
  input_channels: 1
  image_height: 4
  image_width: 4
  patch_height: 2
  patch_width: 2
  num_layers: 2
  num_heads: 2
  num_experts: 3
  moe_top_k: 2
  num_gate_tasks: 2
  expert_hidden_dim: 5
  vit_hidden_dim: 7
",
        )
        .unwrap()
    }

    #[test]
    fn same_seed_same_tables() {
        let c = tiny();
        assert_eq!(synthesize(&c, 7).unwrap(), synthesize(&c, 7).unwrap());
        assert_ne!(synthesize(&c, 7).unwrap(), synthesize(&c, 8).unwrap());
    }

    #[test]
    fn every_contract_table_is_present() {
        let c = tiny();
        let tables = synthesize(&c, 1).unwrap();
        for id in TensorId::ALL {
            assert!(tables.get(id.table_name()).is_some(), "{id}");
        }
        let reference = tables.require(TensorId::Reference).unwrap();
        assert!(reference.data().iter().any(|v| *v != 0.0));
    }

    #[test]
    fn images_stay_in_unit_range() {
        let tables = synthesize(&tiny(), 3).unwrap();
        let images = tables.require(TensorId::Images).unwrap();
        assert!(images.data().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn unusable_config_is_rejected() {
        let mut c = tiny();
        c.model.num_heads = 4;
        assert!(synthesize(&c, 0).is_err());
    }
}
