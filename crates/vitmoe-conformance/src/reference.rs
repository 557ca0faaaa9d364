//! Scalar software model of the engine.
//!
//! [`ReferenceEngine`] computes in `f64` but stores every intermediate in the
//! caller's fixed-point buffers, reading it back before the next stage, so
//! its output carries the same quantization points a hardware engine has:
//!
//! 1. patch embedding, then the positional add
//! 2. per layer: pre-norm multi-head self-attention with residual
//! 3. per layer: pre-norm dense GELU FFN or top-k routed MoE, with residual
//!
//! Weights are widened to `f64` once and cached; `reload_weights = false`
//! reuses the cache from the previous call.

use tracing::{debug, trace, warn};

use crate::config::{FfnKind, ModelConfig};
use crate::engine::{
    DebugTap, EngineError, InferRequest, InferenceEngine, ScratchBuffers, SoftmaxAux, TapPoint,
};
use crate::fixed::{Activation, FixedScalar, Pixel};
use crate::kernels::activation::gelu_scalar;
use crate::kernels::layernorm::{LAYERNORM_EPS, layernorm_scalar};
use crate::kernels::linear::linear_scalar;
use crate::kernels::ops::{dot, softmax_row, top_k, weighted_accumulate};
use crate::store::WeightStore;
use crate::tensor::{BlockedTensor, DenseTensor};

/// Call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub calls: u64,
    /// Times the `f64` weight cache was rebuilt.
    pub cache_builds: u64,
    /// Lanes clamped to the activation range during the last call.
    pub saturated: u64,
}

#[derive(Debug)]
pub struct ReferenceEngine {
    model: ModelConfig,
    cache: Option<WeightCache>,
    work: Workspace,
    taps: Vec<BlockedTensor<Activation>>,
    stats: EngineStats,
}

impl ReferenceEngine {
    pub fn new(model: &ModelConfig) -> Self {
        Self {
            model: model.clone(),
            cache: None,
            work: Workspace::new(model),
            taps: Vec::new(),
            stats: EngineStats::default(),
        }
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Intermediate captured for `image` by the last call's debug tap.
    pub fn tap(&self, image: usize) -> Option<&BlockedTensor<Activation>> {
        self.taps.get(image)
    }

    fn check(&self, r: &InferRequest<'_>) -> Result<(), EngineError> {
        let m = &self.model;
        if m.num_attn_linear < 4 || m.num_layer_norms < 2 {
            return Err(EngineError::Unsupported(format!(
                "needs 4 attention projections and 2 norms per layer, got {} and {}",
                m.num_attn_linear, m.num_layer_norms
            )));
        }
        if m.num_heads == 0 || m.feature_dim % m.num_heads != 0 {
            return Err(EngineError::Unsupported(format!(
                "feature_dim {} does not split into {} heads",
                m.feature_dim, m.num_heads
            )));
        }
        if m.moe_slots() > 0 && (m.moe_top_k == 0 || m.moe_top_k > m.num_experts) {
            return Err(EngineError::Unsupported(format!(
                "top-{} routing over {} experts",
                m.moe_top_k, m.num_experts
            )));
        }
        let layout = m.activation_layout();
        if r.outputs.len() != r.num_images || r.outputs.iter().any(|o| o.layout() != layout) {
            return Err(EngineError::Shape(
                "output tensors do not match the engine configuration".to_string(),
            ));
        }
        let [c, h, w] = m.image_shape();
        if r.images.shape() != [r.num_images, c, h, w] {
            return Err(EngineError::Shape(format!(
                "images have shape {:?}",
                r.images.shape()
            )));
        }
        r.scratch.check_shapes(m).map_err(EngineError::Shape)?;
        r.weights.check_shapes(m).map_err(EngineError::Shape)
    }
}

impl InferenceEngine for ReferenceEngine {
    fn name(&self) -> &str {
        "reference"
    }

    fn infer(&mut self, request: InferRequest<'_>) -> Result<(), EngineError> {
        self.check(&request)?;
        self.stats.calls += 1;

        if request.reload_weights || self.cache.is_none() {
            self.cache = Some(WeightCache::build(request.weights));
            self.stats.cache_builds += 1;
            debug!("rebuilt f64 weight cache");
        }
        let Some(cache) = self.cache.as_ref() else {
            return Err(EngineError::Resource("weight cache unavailable".to_string()));
        };

        let tap = request.debug_tap.point();
        let layout = self.model.activation_layout();
        self.taps.clear();
        if tap != TapPoint::None {
            self.taps
                .resize_with(request.num_images, || BlockedTensor::zeros(layout));
        }

        let mut saturated = 0;
        for (n, out) in request.outputs.iter_mut().enumerate() {
            let mut forward = Forward {
                model: &self.model,
                cache,
                work: &mut self.work,
                scratch: &mut *request.scratch,
                tap,
                tapped: self.taps.get_mut(n),
                saturated: 0,
            };
            forward.run(request.images.sub(&[n]), out)?;
            trace!(image = n, saturated = forward.saturated, "image done");
            saturated += forward.saturated;
        }

        self.stats.saturated = saturated as u64;
        if saturated > 0 {
            warn!(lanes = saturated, "activations saturated during inference");
        }
        Ok(())
    }
}

/// Weights widened to `f64`.
#[derive(Debug)]
struct WeightCache {
    patch_w: Vec<f64>,
    patch_b: Vec<f64>,
    pos: Vec<f64>,
    norm_w: Vec<f64>,
    norm_b: Vec<f64>,
    attn_w: Vec<f64>,
    attn_b: Vec<f64>,
    gate: Vec<f64>,
    moe_w1: Vec<f64>,
    moe_b1: Vec<f64>,
    moe_w2: Vec<f64>,
    moe_b2: Vec<f64>,
    vit_w1: Vec<f64>,
    vit_b1: Vec<f64>,
    vit_w2: Vec<f64>,
    vit_b2: Vec<f64>,
}

fn widen<T: FixedScalar>(t: &DenseTensor<T>) -> Vec<f64> {
    t.as_slice().iter().map(|v| v.to_f64()).collect()
}

impl WeightCache {
    fn build(store: &WeightStore) -> Self {
        Self {
            patch_w: widen(&store.patch_embed_weights),
            patch_b: widen(&store.patch_embed_bias),
            pos: store.pos_embed.to_rows().iter().map(|v| v.to_f64()).collect(),
            norm_w: widen(&store.norm_weights),
            norm_b: widen(&store.norm_bias),
            attn_w: widen(&store.attn_weights),
            attn_b: widen(&store.attn_bias),
            gate: widen(&store.moe_w_gate),
            moe_w1: widen(&store.moe_weights_l1),
            moe_b1: widen(&store.moe_bias_l1),
            moe_w2: widen(&store.moe_weights_l2),
            moe_b2: widen(&store.moe_bias_l2),
            vit_w1: widen(&store.vit_weights_l1),
            vit_b1: widen(&store.vit_bias_l1),
            vit_w2: widen(&store.vit_weights_l2),
            vit_b2: widen(&store.vit_bias_l2),
        }
    }
}

/// `index`-th chunk of `size` elements.
#[inline]
fn chunk(v: &[f64], index: usize, size: usize) -> &[f64] {
    &v[index * size..(index + 1) * size]
}

/// Reusable `f64` rows, sized once per model.
#[derive(Debug)]
struct Workspace {
    x: Vec<f64>,
    y: Vec<f64>,
    normed: Vec<f64>,
    q: Vec<f64>,
    ctx: Vec<f64>,
    acc: Vec<f64>,
    patch: Vec<f64>,
    hidden: Vec<f64>,
    keys: Vec<f64>,
    values: Vec<f64>,
    scores: Vec<f64>,
    logits: Vec<f64>,
    gate_w: Vec<f64>,
    selected: Vec<usize>,
}

impl Workspace {
    fn new(m: &ModelConfig) -> Self {
        let d = m.feature_dim;
        let p = m.num_patches;
        let k = m.moe_top_k.min(m.num_experts);
        Self {
            x: vec![0.0; d],
            y: vec![0.0; d],
            normed: vec![0.0; d],
            q: vec![0.0; d],
            ctx: vec![0.0; d],
            acc: vec![0.0; d],
            patch: vec![0.0; m.patch_elements()],
            hidden: vec![0.0; m.vit_hidden_dim.max(m.expert_hidden_dim)],
            keys: vec![0.0; p * d],
            values: vec![0.0; p * d],
            scores: vec![0.0; p],
            logits: vec![0.0; m.num_experts],
            gate_w: vec![0.0; k],
            selected: vec![0; k],
        }
    }
}

fn quantize(value: f64, saturated: &mut usize) -> Activation {
    let (v, sat) = Activation::from_f64_saturating(value);
    *saturated += usize::from(sat);
    v
}

/// One image's pass through the model.
struct Forward<'a> {
    model: &'a ModelConfig,
    cache: &'a WeightCache,
    work: &'a mut Workspace,
    scratch: &'a mut ScratchBuffers,
    tap: TapPoint,
    tapped: Option<&'a mut BlockedTensor<Activation>>,
    saturated: usize,
}

impl Forward<'_> {
    fn run(
        &mut self,
        image: &[Pixel],
        out: &mut BlockedTensor<Activation>,
    ) -> Result<(), EngineError> {
        self.patch_embed(image, out);
        self.capture(TapPoint::PatchEmbed, out)?;
        self.add_pos(out);
        self.capture(TapPoint::PosEmbed, out)?;
        for layer in 0..self.model.num_layers {
            self.attention(layer, out);
            self.capture(TapPoint::Attention { layer }, out)?;
            self.feed_forward(layer, out);
            self.capture(TapPoint::FeedForward { layer }, out)?;
        }
        Ok(())
    }

    fn capture(
        &mut self,
        point: TapPoint,
        out: &BlockedTensor<Activation>,
    ) -> Result<(), EngineError> {
        if self.tap != point {
            return Ok(());
        }
        if let Some(tapped) = self.tapped.as_deref_mut() {
            tapped
                .copy_from(out)
                .map_err(|e| EngineError::Shape(e.to_string()))?;
            trace!(tap = DebugTap::from(point).0, "captured debug tap");
        }
        Ok(())
    }

    fn patch_embed(&mut self, image: &[Pixel], out: &mut BlockedTensor<Activation>) {
        let m = self.model;
        let c = self.cache;
        let w = &mut *self.work;
        let (_, cols) = m.patch_grid();
        for p in 0..m.num_patches {
            let (row0, col0) = ((p / cols) * m.patch_height, (p % cols) * m.patch_width);
            let mut i = 0;
            for ch in 0..m.input_channels {
                for y in 0..m.patch_height {
                    let start = (ch * m.image_height + row0 + y) * m.image_width + col0;
                    for px in &image[start..start + m.patch_width] {
                        w.patch[i] = px.to_f64();
                        i += 1;
                    }
                }
            }
            linear_scalar(&w.patch, &c.patch_w, &c.patch_b, &mut w.y);
            self.saturated += out.write_patch(p, &w.y);
        }
    }

    fn add_pos(&mut self, out: &mut BlockedTensor<Activation>) {
        let d = self.model.feature_dim;
        let w = &mut *self.work;
        for p in 0..self.model.num_patches {
            out.read_patch(p, &mut w.x);
            for (x, pos) in w.x.iter_mut().zip(chunk(&self.cache.pos, p, d)) {
                *x += pos;
            }
            self.saturated += out.write_patch(p, &w.x);
        }
    }

    fn attention(&mut self, layer: usize, out: &mut BlockedTensor<Activation>) {
        let m = self.model;
        let c = self.cache;
        let w = &mut *self.work;
        let (d, np) = (m.feature_dim, m.num_patches);
        let hd = m.head_dim();
        let a = m.num_attn_linear;
        let norm = layer * m.num_layer_norms;
        let [normed, q_buf, k_buf, v_buf] = &mut self.scratch.activations;
        let scores = self.scratch.attn_scores.as_mut_slice();
        let aux = self.scratch.softmax_aux.as_mut_slice();
        let mut sat = 0;

        for p in 0..np {
            out.read_patch(p, &mut w.x);
            layernorm_scalar(
                &w.x,
                chunk(&c.norm_w, norm, d),
                chunk(&c.norm_b, norm, d),
                LAYERNORM_EPS,
                &mut w.normed,
            );
            sat += normed.write_patch(p, &w.normed);
        }

        for p in 0..np {
            normed.read_patch(p, &mut w.normed);
            for (j, buf) in [&mut *q_buf, &mut *k_buf, &mut *v_buf].into_iter().enumerate() {
                let ix = layer * a + j;
                linear_scalar(
                    &w.normed,
                    chunk(&c.attn_w, ix, d * d),
                    chunk(&c.attn_b, ix, d),
                    &mut w.y,
                );
                sat += buf.write_patch(p, &w.y);
            }
        }

        for p in 0..np {
            k_buf.read_patch(p, &mut w.keys[p * d..(p + 1) * d]);
            v_buf.read_patch(p, &mut w.values[p * d..(p + 1) * d]);
        }

        let scale = 1.0 / (hd as f64).sqrt();
        for i in 0..np {
            q_buf.read_patch(i, &mut w.q);
            for h in 0..m.num_heads {
                let head = h * hd..(h + 1) * hd;
                let row = (h * np + i) * np;
                for j in 0..np {
                    let key = &w.keys[j * d + head.start..j * d + head.end];
                    let s = dot(&w.q[head.clone()], key) * scale;
                    let v = quantize(s, &mut sat);
                    scores[row + j] = v;
                    w.scores[j] = v.to_f64();
                }
                let (max, sum) = softmax_row(&mut w.scores);
                aux[h * np + i] = SoftmaxAux {
                    max: quantize(max, &mut sat),
                    sum: quantize(sum, &mut sat),
                };
                w.ctx[head.clone()].fill(0.0);
                for j in 0..np {
                    let prob = quantize(w.scores[j], &mut sat);
                    scores[row + j] = prob;
                    weighted_accumulate(
                        &mut w.ctx[head.clone()],
                        prob.to_f64(),
                        &w.values[j * d + head.start..j * d + head.end],
                    );
                }
            }
            // normed rows are no longer needed; reuse for the head outputs
            sat += normed.write_patch(i, &w.ctx);
        }

        let ix = layer * a + 3;
        for p in 0..np {
            normed.read_patch(p, &mut w.ctx);
            linear_scalar(&w.ctx, chunk(&c.attn_w, ix, d * d), chunk(&c.attn_b, ix, d), &mut w.y);
            out.read_patch(p, &mut w.x);
            for (x, y) in w.x.iter_mut().zip(&w.y) {
                *x += y;
            }
            sat += out.write_patch(p, &w.x);
        }
        self.saturated += sat;
    }

    fn feed_forward(&mut self, layer: usize, out: &mut BlockedTensor<Activation>) {
        let m = self.model;
        let c = self.cache;
        let d = m.feature_dim;
        let norm = layer * m.num_layer_norms + 1;
        let (kind, slot) = m.ffn_slot(layer);

        for p in 0..m.num_patches {
            let w = &mut *self.work;
            out.read_patch(p, &mut w.x);
            layernorm_scalar(
                &w.x,
                chunk(&c.norm_w, norm, d),
                chunk(&c.norm_b, norm, d),
                LAYERNORM_EPS,
                &mut w.normed,
            );
            let normed = &mut self.scratch.activations[0];
            self.saturated += normed.write_patch(p, &w.normed);
            normed.read_patch(p, &mut w.normed);

            match kind {
                FfnKind::Dense => {
                    let vh = m.vit_hidden_dim;
                    self.expert(
                        p,
                        chunk(&c.vit_w1, slot, vh * d),
                        chunk(&c.vit_b1, slot, vh),
                        chunk(&c.vit_w2, slot, d * vh),
                        chunk(&c.vit_b2, slot, d),
                    );
                }
                FfnKind::Moe => self.route(p, slot),
            }

            let w = &mut *self.work;
            out.read_patch(p, &mut w.x);
            for (x, y) in w.x.iter_mut().zip(&w.y) {
                *x += y;
            }
            self.saturated += out.write_patch(p, &w.x);
        }
    }

    /// Top-k gated mixture for one patch; leaves the result in `work.y`.
    fn route(&mut self, p: usize, slot: usize) {
        let m = self.model;
        let c = self.cache;
        let (d, e, eh) = (m.feature_dim, m.num_experts, m.expert_hidden_dim);
        let k = self.work.selected.len();
        {
            let w = &mut *self.work;
            linear_scalar(&w.normed, chunk(&c.gate, slot, e * d), &[], &mut w.logits);
            top_k(&w.logits, k, &mut w.selected);
            for (g, &ix) in w.gate_w.iter_mut().zip(&w.selected) {
                *g = w.logits[ix];
            }
            softmax_row(&mut w.gate_w);
            w.acc.fill(0.0);
        }
        for i in 0..k {
            let ex = slot * e + self.work.selected[i];
            self.expert(
                p,
                chunk(&c.moe_w1, ex, eh * d),
                chunk(&c.moe_b1, ex, eh),
                chunk(&c.moe_w2, ex, d * eh),
                chunk(&c.moe_b2, ex, d),
            );
            let w = &mut *self.work;
            weighted_accumulate(&mut w.acc, w.gate_w[i], &w.y);
        }
        let w = &mut *self.work;
        let mixed = &mut self.scratch.activations[1];
        self.saturated += mixed.write_patch(p, &w.acc);
        mixed.read_patch(p, &mut w.y);
    }

    /// Two-layer GELU MLP on `work.normed`; leaves the result in `work.y`.
    fn expert(&mut self, p: usize, w1: &[f64], b1: &[f64], w2: &[f64], b2: &[f64]) {
        let w = &mut *self.work;
        let hidden = &mut w.hidden[..b1.len()];
        linear_scalar(&w.normed, w1, b1, hidden);
        gelu_scalar(hidden);
        for (f, h) in hidden.iter_mut().enumerate() {
            let v = quantize(*h, &mut self.saturated);
            self.scratch.hidden.set(p, f, v);
            *h = v.to_f64();
        }
        linear_scalar(hidden, w2, b2, &mut w.y);
    }
}
