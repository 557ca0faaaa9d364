//! Engine call contract.
//!
//! The inference engine is an external collaborator. The harness owns every
//! buffer and lends them to the engine for exactly one [`InferenceEngine::infer`]
//! call; [`invoke`] checks the call's preconditions first so a shape problem
//! is reported as a structural error, never as a numerical FAIL.

use thiserror::Error;
use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::error::{HarnessError, Result};
use crate::fixed::{Activation, Pixel};
use crate::layout::BlockLayout;
use crate::store::WeightStore;
use crate::tensor::{BlockedTensor, DenseTensor};

/// Structural failure signalled by an engine. Numerical disagreement is not
/// an error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("shape error: {0}")]
    Shape(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Which intermediate the engine should additionally expose.
///
/// `0` none, `1` patch embedding, `2` after the positional add, `3 + 2l` after
/// layer `l`'s attention residual, `4 + 2l` after its feed-forward residual.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DebugTap(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapPoint {
    None,
    PatchEmbed,
    PosEmbed,
    Attention { layer: usize },
    FeedForward { layer: usize },
}

impl DebugTap {
    pub const NONE: Self = Self(0);

    pub fn point(self) -> TapPoint {
        match self.0 {
            0 => TapPoint::None,
            1 => TapPoint::PatchEmbed,
            2 => TapPoint::PosEmbed,
            n => {
                let layer = ((n - 3) / 2) as usize;
                if n % 2 == 1 {
                    TapPoint::Attention { layer }
                } else {
                    TapPoint::FeedForward { layer }
                }
            }
        }
    }

    /// True when the tap names a stage that exists for `num_layers` layers.
    pub fn is_valid_for(self, num_layers: usize) -> bool {
        match self.point() {
            TapPoint::Attention { layer } | TapPoint::FeedForward { layer } => layer < num_layers,
            _ => true,
        }
    }
}

impl From<TapPoint> for DebugTap {
    fn from(point: TapPoint) -> Self {
        let layer_code = |layer: usize, base: u32| {
            u32::try_from(layer).map_or(u32::MAX, |l| l.saturating_mul(2).saturating_add(base))
        };
        match point {
            TapPoint::None => Self(0),
            TapPoint::PatchEmbed => Self(1),
            TapPoint::PosEmbed => Self(2),
            TapPoint::Attention { layer } => Self(layer_code(layer, 3)),
            TapPoint::FeedForward { layer } => Self(layer_code(layer, 4)),
        }
    }
}

impl std::fmt::Display for TapPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::PatchEmbed => write!(f, "patch-embed"),
            Self::PosEmbed => write!(f, "pos-embed"),
            Self::Attention { layer } => write!(f, "layer{layer}.attention"),
            Self::FeedForward { layer } => write!(f, "layer{layer}.ffn"),
        }
    }
}

/// Running max and sum of one softmax row.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SoftmaxAux {
    pub max: Activation,
    pub sum: Activation,
}

/// Caller-owned working memory. Contents are unspecified after a call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScratchBuffers {
    pub activations: [BlockedTensor<Activation>; 4],
    /// `num_patches × hidden_blocks × block_size`, shared by both FFN styles.
    pub hidden: BlockedTensor<Activation>,
    /// `[heads, patches, patches]`.
    pub attn_scores: DenseTensor<Activation>,
    /// `[heads, patches]`.
    pub softmax_aux: DenseTensor<SoftmaxAux>,
}

impl ScratchBuffers {
    pub fn new(model: &ModelConfig) -> Self {
        let layout = model.activation_layout();
        let p = model.num_patches;
        let h = model.num_heads;
        Self {
            activations: std::array::from_fn(|_| BlockedTensor::zeros(layout)),
            hidden: BlockedTensor::zeros(Self::hidden_layout(model)),
            attn_scores: DenseTensor::zeros(&[h, p, p]),
            softmax_aux: DenseTensor::zeros(&[h, p]),
        }
    }

    pub fn hidden_layout(model: &ModelConfig) -> BlockLayout {
        BlockLayout::new(
            model.num_patches,
            model.vit_hidden_dim.max(model.expert_hidden_dim),
            model.feature_block_size,
        )
    }

    /// # Errors
    ///
    /// Returns a description of the first buffer that does not fit `model`.
    pub fn check_shapes(&self, model: &ModelConfig) -> std::result::Result<(), String> {
        let layout = model.activation_layout();
        if let Some(i) = self.activations.iter().position(|a| a.layout() != layout) {
            return Err(format!(
                "scratch activation {i} has layout {:?}",
                self.activations[i].layout()
            ));
        }
        if self.hidden.layout() != Self::hidden_layout(model) {
            return Err(format!("scratch hidden buffer has layout {:?}", self.hidden.layout()));
        }
        let (p, h) = (model.num_patches, model.num_heads);
        if self.attn_scores.shape() != [h, p, p] {
            return Err(format!("attention scores have shape {:?}", self.attn_scores.shape()));
        }
        if self.softmax_aux.shape() != [h, p] {
            return Err(format!("softmax state has shape {:?}", self.softmax_aux.shape()));
        }
        Ok(())
    }
}

/// Parameters of one engine call, by reference.
#[derive(Debug)]
pub struct InferRequest<'a> {
    pub num_images: usize,
    pub reload_weights: bool,
    /// `[num_images, channels, height, width]`.
    pub images: &'a DenseTensor<Pixel>,
    pub outputs: &'a mut [BlockedTensor<Activation>],
    pub scratch: &'a mut ScratchBuffers,
    pub weights: &'a WeightStore,
    pub debug_tap: DebugTap,
}

/// An inference engine the harness can drive.
pub trait InferenceEngine {
    fn name(&self) -> &str;

    /// Compute `outputs[i]` for every image.
    ///
    /// Return an error only for structural failures (bad shapes, resource
    /// exhaustion). Numerically wrong output is still `Ok`.
    fn infer(&mut self, request: InferRequest<'_>) -> std::result::Result<(), EngineError>;
}

/// Check the call preconditions against `model`, then call the engine.
///
/// # Errors
///
/// [`HarnessError::Precondition`] when a buffer does not match the
/// configuration, [`HarnessError::Engine`] when the engine reports a
/// structural failure.
pub fn invoke(
    engine: &mut dyn InferenceEngine,
    model: &ModelConfig,
    request: InferRequest<'_>,
) -> Result<()> {
    check_request(model, &request).map_err(HarnessError::Precondition)?;
    info!(
        engine = engine.name(),
        images = request.num_images,
        reload = request.reload_weights,
        tap = %request.debug_tap.point(),
        "invoking engine"
    );
    engine.infer(request)?;
    debug!(engine = engine.name(), "engine call returned");
    Ok(())
}

fn check_request(model: &ModelConfig, r: &InferRequest<'_>) -> std::result::Result<(), String> {
    if r.num_images == 0 {
        return Err("num_images must be at least 1".to_string());
    }
    let [c, h, w] = model.image_shape();
    let expected = [r.num_images, c, h, w];
    if r.images.shape() != expected {
        return Err(format!(
            "images have shape {:?}, expected {expected:?}",
            r.images.shape()
        ));
    }
    if r.outputs.len() != r.num_images {
        return Err(format!(
            "{} output tensors for {} images",
            r.outputs.len(),
            r.num_images
        ));
    }
    let layout = model.activation_layout();
    if let Some(i) = r.outputs.iter().position(|o| o.layout() != layout) {
        return Err(format!(
            "output {i} has layout {:?}, expected {layout:?}",
            r.outputs[i].layout()
        ));
    }
    if !r.debug_tap.is_valid_for(model.num_layers) {
        return Err(format!(
            "debug tap {} names a layer beyond {}",
            r.debug_tap.0, model.num_layers
        ));
    }
    r.scratch.check_shapes(model)?;
    r.weights.check_shapes(model)
}
