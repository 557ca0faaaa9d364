use serde::{Deserialize, Serialize};

use crate::layout::BlockLayout;

/// Root configuration document.
///
/// Both sections default to the canonical ViT-MoE configuration, so an empty
/// YAML document is a valid config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConformanceConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub harness: HarnessSettings,
}

/// Constants agreed between harness and engine. All tensor shapes derive
/// from these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub feature_dim: usize,
    pub feature_block_size: usize,
    pub num_patches: usize,
    pub input_channels: usize,
    pub image_height: usize,
    pub image_width: usize,
    pub patch_height: usize,
    pub patch_width: usize,
    pub num_layers: usize,
    pub num_layer_norms: usize,
    pub num_attn_linear: usize,
    pub num_heads: usize,
    pub num_experts: usize,
    pub moe_top_k: usize,
    pub num_gate_tasks: usize,
    pub expert_hidden_dim: usize,
    pub vit_hidden_dim: usize,
    /// Feed-forward style of layer 0; layers alternate from there.
    pub first_ffn: FfnKind,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            feature_dim: 192,
            feature_block_size: 16,
            num_patches: 128,
            input_channels: 3,
            image_height: 128,
            image_width: 256,
            patch_height: 16,
            patch_width: 16,
            num_layers: 12,
            num_layer_norms: 2,
            num_attn_linear: 4,
            num_heads: 3,
            num_experts: 16,
            moe_top_k: 4,
            num_gate_tasks: 2,
            expert_hidden_dim: 384,
            vit_hidden_dim: 768,
            first_ffn: FfnKind::Dense,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FfnKind {
    /// Two-layer ViT MLP.
    Dense,
    /// Gate-routed mixture of expert MLPs.
    Moe,
}

impl std::fmt::Display for FfnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Dense => "dense",
            Self::Moe => "moe",
        };
        write!(f, "{s}")
    }
}

impl ModelConfig {
    pub fn activation_layout(&self) -> BlockLayout {
        BlockLayout::new(self.num_patches, self.feature_dim, self.feature_block_size)
    }

    pub fn blocks_per_patch(&self) -> usize {
        self.feature_dim.div_ceil(self.feature_block_size)
    }

    pub fn ffn_kind(&self, layer: usize) -> FfnKind {
        match (self.first_ffn, layer % 2 == 0) {
            (FfnKind::Dense, true) | (FfnKind::Moe, false) => FfnKind::Dense,
            (FfnKind::Dense, false) | (FfnKind::Moe, true) => FfnKind::Moe,
        }
    }

    /// Branch and slot index of `layer`'s feed-forward weights.
    pub fn ffn_slot(&self, layer: usize) -> (FfnKind, usize) {
        (self.ffn_kind(layer), layer / 2)
    }

    /// Layers whose parity matches the first layer: `ceil(num_layers / 2)`.
    fn leading_slots(&self) -> usize {
        self.num_layers.div_ceil(2)
    }

    pub fn dense_ffn_slots(&self) -> usize {
        match self.first_ffn {
            FfnKind::Dense => self.leading_slots(),
            FfnKind::Moe => self.num_layers / 2,
        }
    }

    pub fn moe_slots(&self) -> usize {
        match self.first_ffn {
            FfnKind::Moe => self.leading_slots(),
            FfnKind::Dense => self.num_layers / 2,
        }
    }

    /// Blocks per patch of the shared FFN hidden buffer.
    pub fn hidden_blocks(&self) -> usize {
        self.vit_hidden_dim
            .max(self.expert_hidden_dim)
            .div_ceil(self.feature_block_size)
    }

    /// `(rows, cols)` of the patch grid over the input image.
    pub fn patch_grid(&self) -> (usize, usize) {
        (
            self.image_height / self.patch_height.max(1),
            self.image_width / self.patch_width.max(1),
        )
    }

    pub fn head_dim(&self) -> usize {
        self.feature_dim / self.num_heads.max(1)
    }

    pub fn image_shape(&self) -> [usize; 3] {
        [self.input_channels, self.image_height, self.image_width]
    }

    pub fn patch_elements(&self) -> usize {
        self.input_channels * self.patch_height * self.patch_width
    }
}

/// Harness-side knobs. None of these change the engine's contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessSettings {
    /// Inclusive pass bound on mean squared error.
    pub mse_threshold: f64,
    pub display_patch_limit: usize,
    pub display_dim_limit: usize,
    pub reload_weights: bool,
    pub debug_tap: u32,
    /// Which per-task gate is loaded into the engine's gate buffer.
    pub gate_task: usize,
    pub num_images: usize,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            mse_threshold: 0.1,
            display_patch_limit: 5,
            display_dim_limit: 5,
            reload_weights: true,
            debug_tap: 0,
            gate_task: 0,
            num_images: 1,
        }
    }
}
