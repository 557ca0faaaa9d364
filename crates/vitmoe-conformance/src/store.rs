//! Weight/bias store.
//!
//! Every parameter tensor the engine consumes, each in its own fixed-point
//! format. Shapes come from [`crate::shapes::tensor_contract`]; a zero-slot
//! feed-forward branch is an empty tensor.

use crate::config::ModelConfig;
use crate::fixed::{Activation, AttnBias, Bias, LinearWeight, NormWeight, PatchEmbedWeight};
use crate::shapes::{TensorId, tensor_contract};
use crate::tensor::{BlockedTensor, DenseTensor};

#[derive(Debug, Clone, PartialEq)]
pub struct WeightStore {
    pub patch_embed_weights: DenseTensor<PatchEmbedWeight>,
    pub patch_embed_bias: DenseTensor<Bias>,
    pub pos_embed: BlockedTensor<Activation>,
    pub norm_weights: DenseTensor<NormWeight>,
    pub norm_bias: DenseTensor<Bias>,
    pub attn_weights: DenseTensor<LinearWeight>,
    pub attn_bias: DenseTensor<AttnBias>,
    /// Gate rows for the selected task, `[moe_slots, experts, feature_dim]`.
    pub moe_w_gate: DenseTensor<LinearWeight>,
    pub moe_weights_l1: DenseTensor<LinearWeight>,
    pub moe_bias_l1: DenseTensor<Bias>,
    pub moe_weights_l2: DenseTensor<LinearWeight>,
    pub moe_bias_l2: DenseTensor<Bias>,
    pub vit_weights_l1: DenseTensor<LinearWeight>,
    pub vit_bias_l1: DenseTensor<Bias>,
    pub vit_weights_l2: DenseTensor<LinearWeight>,
    pub vit_bias_l2: DenseTensor<Bias>,
}

impl WeightStore {
    /// Allocate every tensor at its contract shape, zero-filled.
    pub fn zeroed(model: &ModelConfig) -> Self {
        let shape = |id| tensor_contract(model, id, 1, 0).dest_shape;
        Self {
            patch_embed_weights: DenseTensor::zeros(&shape(TensorId::PatchEmbedWeights)),
            patch_embed_bias: DenseTensor::zeros(&shape(TensorId::PatchEmbedBias)),
            pos_embed: BlockedTensor::zeros(model.activation_layout()),
            norm_weights: DenseTensor::zeros(&shape(TensorId::NormWeights)),
            norm_bias: DenseTensor::zeros(&shape(TensorId::NormBias)),
            attn_weights: DenseTensor::zeros(&shape(TensorId::AttnWeights)),
            attn_bias: DenseTensor::zeros(&shape(TensorId::AttnBias)),
            moe_w_gate: DenseTensor::zeros(&shape(TensorId::MoeGate)),
            moe_weights_l1: DenseTensor::zeros(&shape(TensorId::MoeWeightsL1)),
            moe_bias_l1: DenseTensor::zeros(&shape(TensorId::MoeBiasL1)),
            moe_weights_l2: DenseTensor::zeros(&shape(TensorId::MoeWeightsL2)),
            moe_bias_l2: DenseTensor::zeros(&shape(TensorId::MoeBiasL2)),
            vit_weights_l1: DenseTensor::zeros(&shape(TensorId::VitWeightsL1)),
            vit_bias_l1: DenseTensor::zeros(&shape(TensorId::VitBiasL1)),
            vit_weights_l2: DenseTensor::zeros(&shape(TensorId::VitWeightsL2)),
            vit_bias_l2: DenseTensor::zeros(&shape(TensorId::VitBiasL2)),
        }
    }

    /// Logical shape of a store member; `None` for tensors the store does
    /// not hold (images, reference).
    pub fn shape_of(&self, id: TensorId) -> Option<Vec<usize>> {
        let dense = |s: &[usize]| Some(s.to_vec());
        match id {
            TensorId::PatchEmbedWeights => dense(self.patch_embed_weights.shape()),
            TensorId::PatchEmbedBias => dense(self.patch_embed_bias.shape()),
            TensorId::PosEmbed => {
                let l = self.pos_embed.layout();
                Some(vec![l.num_patches, l.feature_dim])
            }
            TensorId::NormWeights => dense(self.norm_weights.shape()),
            TensorId::NormBias => dense(self.norm_bias.shape()),
            TensorId::AttnWeights => dense(self.attn_weights.shape()),
            TensorId::AttnBias => dense(self.attn_bias.shape()),
            TensorId::MoeGate => dense(self.moe_w_gate.shape()),
            TensorId::MoeWeightsL1 => dense(self.moe_weights_l1.shape()),
            TensorId::MoeBiasL1 => dense(self.moe_bias_l1.shape()),
            TensorId::MoeWeightsL2 => dense(self.moe_weights_l2.shape()),
            TensorId::MoeBiasL2 => dense(self.moe_bias_l2.shape()),
            TensorId::VitWeightsL1 => dense(self.vit_weights_l1.shape()),
            TensorId::VitBiasL1 => dense(self.vit_bias_l1.shape()),
            TensorId::VitWeightsL2 => dense(self.vit_weights_l2.shape()),
            TensorId::VitBiasL2 => dense(self.vit_bias_l2.shape()),
            TensorId::Images | TensorId::Reference => None,
        }
    }

    /// Compare every member against the contract for `model`.
    ///
    /// # Errors
    ///
    /// Returns a description of the first member whose shape disagrees.
    pub fn check_shapes(&self, model: &ModelConfig) -> Result<(), String> {
        if self.pos_embed.layout() != model.activation_layout() {
            return Err(format!(
                "pos_embed layout {:?} != {:?}",
                self.pos_embed.layout(),
                model.activation_layout()
            ));
        }
        for id in TensorId::WEIGHTS {
            let expected = tensor_contract(model, id, 1, 0).dest_shape;
            let actual = self.shape_of(id).unwrap_or_default();
            if actual != expected {
                return Err(format!("{id}: expected {expected:?}, got {actual:?}"));
            }
        }
        Ok(())
    }
}
