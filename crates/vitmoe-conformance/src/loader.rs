//! Contract-checked loading of source tables into engine buffers.
//!
//! Loading is two-phase. Every table is first checked against the shape
//! contract; the first disagreement aborts with nothing written. Only then is
//! each table transformed into its destination:
//!
//! - `Direct`: element-for-element `f32` to fixed-point conversion
//! - `Block`: unblocked `[patches, feature_dim]` rows scattered into the
//!   blocked layout, padding left zero
//! - `SelectTask`: the configured gate task copied out of every MoE slot

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ModelConfig;
use crate::error::{HarnessError, Result};
use crate::fixed::{Activation, FixedScalar, Pixel, quantize_into};
use crate::shapes::{TensorContract, TensorId, Transform, shape_contract};
use crate::store::WeightStore;
use crate::tables::{SourceTable, TableSet};
use crate::tensor::{BlockedTensor, DenseTensor};

/// Destination buffers the loader fills.
#[derive(Debug)]
pub struct LoadTargets<'a> {
    pub store: &'a mut WeightStore,
    pub images: &'a mut DenseTensor<Pixel>,
    pub references: &'a mut [BlockedTensor<Activation>],
}

/// What one load wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub tables: usize,
    pub elements: usize,
    /// Tensors with at least one saturated conversion, in load order.
    pub saturated: Vec<(TensorId, usize)>,
}

impl LoadSummary {
    pub fn total_saturated(&self) -> usize {
        self.saturated.iter().map(|(_, n)| n).sum()
    }
}

/// Verify every table, then populate `targets`.
///
/// # Errors
///
/// - [`HarnessError::MissingTable`] when a contract tensor has no table
/// - [`HarnessError::ShapeMismatch`] when a table's declared shape differs
///   from the contract, or a destination buffer was allocated for a different
///   configuration
pub fn load_tables(
    tables: &TableSet,
    model: &ModelConfig,
    num_images: usize,
    gate_task: usize,
    targets: LoadTargets<'_>,
) -> Result<LoadSummary> {
    let contract = shape_contract(model, num_images, gate_task);
    let sources = verify(tables, &contract, model, &targets)?;
    let LoadTargets {
        store,
        images,
        references,
    } = targets;

    let mut summary = LoadSummary::default();
    for (entry, table) in contract.iter().zip(sources) {
        let saturated = transform(entry, table, model, store, images, references);
        debug!(
            tensor = %entry.id,
            elements = table.len(),
            transform = ?entry.transform,
            "loaded"
        );
        summary.tables += 1;
        summary.elements += table.len();
        if saturated > 0 {
            warn!(tensor = %entry.id, lanes = saturated, "values saturated on conversion");
            summary.saturated.push((entry.id, saturated));
        }
    }
    info!(
        tables = summary.tables,
        elements = summary.elements,
        saturated = summary.total_saturated(),
        "tables loaded"
    );
    Ok(summary)
}

/// Phase one: resolve and check every table without touching a buffer.
fn verify<'t>(
    tables: &'t TableSet,
    contract: &[TensorContract],
    model: &ModelConfig,
    targets: &LoadTargets<'_>,
) -> Result<Vec<&'t SourceTable>> {
    let mut sources = Vec::with_capacity(contract.len());
    for entry in contract {
        if !supports(entry.transform, entry.id) {
            return Err(HarnessError::Precondition(format!(
                "no {:?} destination for {}",
                entry.transform, entry.id
            )));
        }
        let table = tables.require(entry.id)?;
        if table.shape() != entry.source_shape.as_slice() {
            return Err(HarnessError::ShapeMismatch {
                tensor: entry.id.to_string(),
                expected: entry.source_shape.clone(),
                actual: table.shape().to_vec(),
            });
        }
        let dest = destination_shape(entry.id, model, targets);
        if dest != entry.dest_shape {
            return Err(HarnessError::ShapeMismatch {
                tensor: format!("{} (destination)", entry.id),
                expected: entry.dest_shape.clone(),
                actual: dest,
            });
        }
        sources.push(table);
    }
    Ok(sources)
}

fn destination_shape(id: TensorId, model: &ModelConfig, targets: &LoadTargets<'_>) -> Vec<usize> {
    match id {
        TensorId::Images => targets.images.shape().to_vec(),
        TensorId::Reference => {
            let layout = model.activation_layout();
            if targets.references.iter().all(|r| r.layout() == layout) {
                vec![targets.references.len(), layout.num_patches, layout.feature_dim]
            } else {
                Vec::new()
            }
        }
        _ => targets.store.shape_of(id).unwrap_or_default(),
    }
}

/// Phase two: write one verified table. Returns the saturation count.
fn transform(
    entry: &TensorContract,
    table: &SourceTable,
    model: &ModelConfig,
    store: &mut WeightStore,
    images: &mut DenseTensor<Pixel>,
    references: &mut [BlockedTensor<Activation>],
) -> usize {
    let src = table.data();
    match (entry.transform, entry.id) {
        (Transform::Block, TensorId::PosEmbed) => scatter_rows(src, &mut store.pos_embed),
        (Transform::Block, TensorId::Reference) => {
            let per_image = model.num_patches * model.feature_dim;
            references
                .iter_mut()
                .zip(src.chunks_exact(per_image.max(1)))
                .map(|(dst, rows)| scatter_rows(rows, dst))
                .sum()
        }
        (Transform::SelectTask { task }, TensorId::MoeGate) => {
            select_task(table, task, &mut store.moe_w_gate)
        }
        (Transform::Direct, id) => direct(id, src, store, images),
        (t, id) => unreachable!("{id} has no {t:?} destination; rejected by verify"),
    }
}

/// Whether the loader has a destination for `id` under `transform`.
fn supports(transform: Transform, id: TensorId) -> bool {
    match transform {
        Transform::Block => matches!(id, TensorId::PosEmbed | TensorId::Reference),
        Transform::SelectTask { .. } => id == TensorId::MoeGate,
        Transform::Direct => !matches!(
            id,
            TensorId::PosEmbed | TensorId::Reference | TensorId::MoeGate
        ),
    }
}

/// # Panics
///
/// Panics for tensors without a direct destination; [`supports`] rules
/// those out before any write.
fn direct(
    id: TensorId,
    src: &[f32],
    store: &mut WeightStore,
    images: &mut DenseTensor<Pixel>,
) -> usize {
    match id {
        TensorId::Images => quantize_into(src, images.as_mut_slice()),
        TensorId::PatchEmbedWeights => {
            quantize_into(src, store.patch_embed_weights.as_mut_slice())
        }
        TensorId::PatchEmbedBias => quantize_into(src, store.patch_embed_bias.as_mut_slice()),
        TensorId::NormWeights => quantize_into(src, store.norm_weights.as_mut_slice()),
        TensorId::NormBias => quantize_into(src, store.norm_bias.as_mut_slice()),
        TensorId::AttnWeights => quantize_into(src, store.attn_weights.as_mut_slice()),
        TensorId::AttnBias => quantize_into(src, store.attn_bias.as_mut_slice()),
        TensorId::MoeWeightsL1 => quantize_into(src, store.moe_weights_l1.as_mut_slice()),
        TensorId::MoeBiasL1 => quantize_into(src, store.moe_bias_l1.as_mut_slice()),
        TensorId::MoeWeightsL2 => quantize_into(src, store.moe_weights_l2.as_mut_slice()),
        TensorId::MoeBiasL2 => quantize_into(src, store.moe_bias_l2.as_mut_slice()),
        TensorId::VitWeightsL1 => quantize_into(src, store.vit_weights_l1.as_mut_slice()),
        TensorId::VitBiasL1 => quantize_into(src, store.vit_bias_l1.as_mut_slice()),
        TensorId::VitWeightsL2 => quantize_into(src, store.vit_weights_l2.as_mut_slice()),
        TensorId::VitBiasL2 => quantize_into(src, store.vit_bias_l2.as_mut_slice()),
        TensorId::PosEmbed | TensorId::Reference | TensorId::MoeGate => {
            unreachable!("{id} has no direct destination")
        }
    }
}

/// Scatter unblocked rows into a blocked tensor.
fn scatter_rows<T: FixedScalar>(rows: &[f32], dst: &mut BlockedTensor<T>) -> usize {
    let d = dst.layout().feature_dim;
    let mut saturated = 0;
    for lane in dst.layout().lanes() {
        let (v, sat) = T::from_f64_saturating(f64::from(rows[lane.patch * d + lane.feature]));
        dst.set(lane.patch, lane.feature, v);
        saturated += usize::from(sat);
    }
    saturated
}

/// Copy `task`'s `[experts, feature_dim]` gate out of every slot.
fn select_task<T: FixedScalar>(
    table: &SourceTable,
    task: usize,
    dst: &mut DenseTensor<T>,
) -> usize {
    let slots = table.shape()[0];
    let per_slot = dst.shape()[1..].iter().product::<usize>();
    let out = dst.as_mut_slice();
    (0..slots)
        .map(|s| quantize_into(table.sub(&[s, task]), &mut out[s * per_slot..(s + 1) * per_slot]))
        .sum()
}
