//! Shape contract for every tensor that crosses the harness/engine boundary.
//!
//! Destination shapes are what the engine consumes. Source shapes are what a
//! generated table must declare for the loader to accept it. The two differ
//! only where the loader performs a layout transform:
//!
//! | transform    | source                                 | destination                        |
//! |--------------|----------------------------------------|------------------------------------|
//! | `Direct`     | same logical shape                     | same logical shape                 |
//! | `Block`      | `[.., patches, feature_dim]` rows      | blocked `[.., patches, blocks, B]` |
//! | `SelectTask` | `[moe_slots, tasks, experts, feature]` | `[moe_slots, experts, feature]`    |

use serde::Serialize;

use crate::config::ModelConfig;

/// Every tensor the harness materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorId {
    Images,
    PatchEmbedWeights,
    PatchEmbedBias,
    PosEmbed,
    NormWeights,
    NormBias,
    AttnWeights,
    AttnBias,
    MoeGate,
    MoeWeightsL1,
    MoeBiasL1,
    MoeWeightsL2,
    MoeBiasL2,
    VitWeightsL1,
    VitBiasL1,
    VitWeightsL2,
    VitBiasL2,
    Reference,
}

impl TensorId {
    pub const ALL: [Self; 18] = [
        Self::Images,
        Self::PatchEmbedWeights,
        Self::PatchEmbedBias,
        Self::PosEmbed,
        Self::NormWeights,
        Self::NormBias,
        Self::AttnWeights,
        Self::AttnBias,
        Self::MoeGate,
        Self::MoeWeightsL1,
        Self::MoeBiasL1,
        Self::MoeWeightsL2,
        Self::MoeBiasL2,
        Self::VitWeightsL1,
        Self::VitBiasL1,
        Self::VitWeightsL2,
        Self::VitBiasL2,
        Self::Reference,
    ];

    /// Weight/bias store members, in load order.
    pub const WEIGHTS: [Self; 16] = [
        Self::PatchEmbedWeights,
        Self::PatchEmbedBias,
        Self::PosEmbed,
        Self::NormWeights,
        Self::NormBias,
        Self::AttnWeights,
        Self::AttnBias,
        Self::MoeGate,
        Self::MoeWeightsL1,
        Self::MoeBiasL1,
        Self::MoeWeightsL2,
        Self::MoeBiasL2,
        Self::VitWeightsL1,
        Self::VitBiasL1,
        Self::VitWeightsL2,
        Self::VitBiasL2,
    ];

    /// Name of the generated source table.
    pub fn table_name(self) -> &'static str {
        match self {
            Self::Images => "images",
            Self::PatchEmbedWeights => "patch_embed_weights",
            Self::PatchEmbedBias => "patch_embed_bias",
            Self::PosEmbed => "pos_embed",
            Self::NormWeights => "norm_weights",
            Self::NormBias => "norm_bias",
            Self::AttnWeights => "attn_weights",
            Self::AttnBias => "attn_bias",
            Self::MoeGate => "moe_w_gate_per_task",
            Self::MoeWeightsL1 => "moe_weights_l1",
            Self::MoeBiasL1 => "moe_bias_l1",
            Self::MoeWeightsL2 => "moe_weights_l2",
            Self::MoeBiasL2 => "moe_bias_l2",
            Self::VitWeightsL1 => "vit_weights_l1",
            Self::VitBiasL1 => "vit_bias_l1",
            Self::VitWeightsL2 => "vit_weights_l2",
            Self::VitBiasL2 => "vit_bias_l2",
            Self::Reference => "reference_x",
        }
    }
}

impl std::fmt::Display for TensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

/// How a source table maps onto its destination buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// Element-for-element, converting to the destination's fixed format.
    Direct,
    /// Unblocked feature rows scattered into the blocked activation layout.
    Block,
    /// One gate task selected per MoE slot.
    SelectTask { task: usize },
}

/// Contract entry for one tensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TensorContract {
    pub id: TensorId,
    /// Logical destination shape (blocked tensors list `[.., patches, feature_dim]`).
    pub dest_shape: Vec<usize>,
    /// Shape the source table must declare.
    pub source_shape: Vec<usize>,
    pub transform: Transform,
}

impl TensorContract {
    pub fn dest_elements(&self) -> usize {
        self.dest_shape.iter().product()
    }

    pub fn source_elements(&self) -> usize {
        self.source_shape.iter().product()
    }
}

/// Build the contract entry for `id`.
pub fn tensor_contract(
    model: &ModelConfig,
    id: TensorId,
    num_images: usize,
    gate_task: usize,
) -> TensorContract {
    let d = model.feature_dim;
    let l = model.num_layers;
    let p = model.num_patches;
    let e = model.num_experts;
    let moe = model.moe_slots();
    let vit = model.dense_ffn_slots();
    let eh = model.expert_hidden_dim;
    let vh = model.vit_hidden_dim;
    let [c, ih, iw] = model.image_shape();

    let direct = |shape: Vec<usize>| TensorContract {
        id,
        source_shape: shape.clone(),
        dest_shape: shape,
        transform: Transform::Direct,
    };

    match id {
        TensorId::Images => direct(vec![num_images, c, ih, iw]),
        TensorId::PatchEmbedWeights => {
            direct(vec![d, c, model.patch_height, model.patch_width])
        }
        TensorId::PatchEmbedBias => direct(vec![d]),
        TensorId::PosEmbed => TensorContract {
            id,
            dest_shape: vec![p, d],
            source_shape: vec![p, d],
            transform: Transform::Block,
        },
        TensorId::NormWeights | TensorId::NormBias => {
            direct(vec![l, model.num_layer_norms, d])
        }
        TensorId::AttnWeights => direct(vec![l, model.num_attn_linear, d, d]),
        TensorId::AttnBias => direct(vec![l, model.num_attn_linear, d]),
        TensorId::MoeGate => TensorContract {
            id,
            dest_shape: vec![moe, e, d],
            source_shape: vec![moe, model.num_gate_tasks, e, d],
            transform: Transform::SelectTask { task: gate_task },
        },
        TensorId::MoeWeightsL1 => direct(vec![moe, e, eh, d]),
        TensorId::MoeBiasL1 => direct(vec![moe, e, eh]),
        TensorId::MoeWeightsL2 => direct(vec![moe, e, d, eh]),
        TensorId::MoeBiasL2 => direct(vec![moe, e, d]),
        TensorId::VitWeightsL1 => direct(vec![vit, vh, d]),
        TensorId::VitBiasL1 => direct(vec![vit, vh]),
        TensorId::VitWeightsL2 => direct(vec![vit, d, vh]),
        TensorId::VitBiasL2 => direct(vec![vit, d]),
        TensorId::Reference => TensorContract {
            id,
            dest_shape: vec![num_images, p, d],
            source_shape: vec![num_images, p, d],
            transform: Transform::Block,
        },
    }
}

/// The full contract, one entry per [`TensorId::ALL`] member.
pub fn shape_contract(
    model: &ModelConfig,
    num_images: usize,
    gate_task: usize,
) -> Vec<TensorContract> {
    TensorId::ALL
        .iter()
        .map(|&id| tensor_contract(model, id, num_images, gate_task))
        .collect()
}
