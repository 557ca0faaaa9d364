//! Generated source tables.
//!
//! A [`TableSet`] is the external, read-only representation the loader
//! consumes: one `f32` array per tensor with a declared shape. On disk it is a
//! directory holding a `tables.yaml` manifest and one little-endian
//! `<name>.float32.bin` file per table.
//!
//! [`import_layer_dumps`] assembles a table set from per-layer exports of a
//! trained model (one raw file per parameter per layer).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{FfnKind, ModelConfig};
use crate::error::{HarnessError, Result};
use crate::shapes::TensorId;

/// Manifest file name inside a table directory.
pub const MANIFEST: &str = "tables.yaml";

const MANIFEST_VERSION: &str = "1";

/// One generated constant table.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTable {
    name: String,
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl SourceTable {
    /// # Errors
    ///
    /// Returns [`HarnessError::TableSize`] when `data` does not hold exactly
    /// `product(shape)` elements.
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let name = name.into();
        let declared: usize = shape.iter().product();
        if declared != data.len() {
            return Err(HarnessError::TableSize {
                name,
                declared,
                actual: data.len(),
            });
        }
        Ok(Self { name, shape, data })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Contiguous slice addressed by leading indices.
    ///
    /// # Panics
    ///
    /// Panics if an index is out of range.
    pub fn sub(&self, index: &[usize]) -> &[f32] {
        let mut start = 0;
        for (&ix, &dim) in index.iter().zip(&self.shape) {
            assert!(ix < dim, "{}: index {ix} out of range {dim}", self.name);
            start = start * dim + ix;
        }
        let len: usize = self.shape[index.len()..].iter().product();
        &self.data[start * len..(start + 1) * len]
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: String,
    tables: Vec<ManifestEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestEntry {
    name: String,
    file: String,
    shape: Vec<usize>,
}

/// Named collection of source tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSet {
    tables: BTreeMap<String, SourceTable>,
}

impl TableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a table.
    pub fn insert(&mut self, table: SourceTable) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn get(&self, name: &str) -> Option<&SourceTable> {
        self.tables.get(name)
    }

    /// # Errors
    ///
    /// Returns [`HarnessError::MissingTable`] if absent.
    pub fn require(&self, id: TensorId) -> Result<&SourceTable> {
        self.get(id.table_name())
            .ok_or_else(|| HarnessError::MissingTable {
                name: id.table_name().to_string(),
            })
    }

    pub fn remove(&mut self, name: &str) -> Option<SourceTable> {
        self.tables.remove(name)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Load a table directory written by [`TableSet::save_dir`].
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let manifest: Manifest =
            serde_yaml::from_str(&std::fs::read_to_string(dir.join(MANIFEST))?)?;
        let mut set = Self::new();
        for entry in manifest.tables {
            let data = read_f32_file(&dir.join(&entry.file))?;
            debug!(table = %entry.name, elements = data.len(), "read table");
            set.insert(SourceTable::new(entry.name, entry.shape, data)?);
        }
        info!(dir = %dir.display(), tables = set.len(), "loaded table set");
        Ok(set)
    }

    /// Write every table and the manifest into `dir`, creating it if needed.
    pub fn save_dir(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let mut entries = Vec::with_capacity(self.tables.len());
        for table in self.tables.values() {
            let file = format!("{}.float32.bin", table.name);
            write_f32_file(&dir.join(&file), &table.data)?;
            entries.push(ManifestEntry {
                name: table.name.clone(),
                file,
                shape: table.shape.clone(),
            });
        }
        let manifest = Manifest {
            version: MANIFEST_VERSION.to_string(),
            tables: entries,
        };
        std::fs::write(dir.join(MANIFEST), serde_yaml::to_string(&manifest)?)?;
        info!(dir = %dir.display(), tables = self.tables.len(), "saved table set");
        Ok(())
    }
}

/// Read a raw little-endian `f32` file.
pub fn read_f32_file(path: &Path) -> Result<Vec<f32>> {
    let bytes = std::fs::read(path)?;
    if bytes.len() % 4 != 0 {
        return Err(HarnessError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{}: length {} is not a multiple of 4", path.display(), bytes.len()),
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Write a raw little-endian `f32` file.
pub fn write_f32_file(path: &Path, data: &[f32]) -> Result<()> {
    let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
    std::fs::write(path, bytes)?;
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Layer-dump import
// ────────────────────────────────────────────────────────────────────────────

fn dump(dir: &Path, stem: &str, expected: usize) -> Result<Vec<f32>> {
    let path = dir.join(format!("{stem}.float32.bin"));
    let data = read_f32_file(&path)?;
    if data.len() != expected {
        return Err(HarnessError::TableSize {
            name: stem.to_string(),
            declared: expected,
            actual: data.len(),
        });
    }
    Ok(data)
}

/// Stacks per-layer parameter vectors into one table.
struct Stack {
    name: &'static str,
    inner: Vec<usize>,
    slots: usize,
    data: Vec<f32>,
}

impl Stack {
    fn new(name: &'static str, inner: Vec<usize>) -> Self {
        Self {
            name,
            inner,
            slots: 0,
            data: Vec::new(),
        }
    }

    fn push(&mut self, part: &[f32]) {
        self.data.extend_from_slice(part);
        self.slots += 1;
    }

    fn finish(self) -> Result<SourceTable> {
        let mut shape = vec![self.slots];
        shape.extend(self.inner);
        SourceTable::new(self.name, shape, self.data)
    }
}

/// Assemble a [`TableSet`] from per-layer exports in `dir`.
///
/// Expected files (all `*.float32.bin`): `image`, `patch_embed_weight`,
/// `patch_embed_bias`, `pos_embed`, and per layer `l{l}_norm{1,2}_{weight,bias}`,
/// `l{l}_qkv_{weight,bias}` (q, k and v stacked), `l{l}_attn_proj_{weight,bias}`,
/// then `l{l}_fc{1,2}_{weight,bias}` on dense layers or
/// `l{l}_htoh4_*`, `l{l}_h4toh_*` and `l{l}_w_gate_T_task{t}` on MoE layers.
/// The reference is `l{L-1}_x_post_moe`, or `l{L-1}_x_post_mlp` when the last
/// layer is dense.
///
/// # Errors
///
/// [`HarnessError::Precondition`] unless the model has exactly two norms and
/// four attention projections per layer, which is all the dumps carry; I/O or
/// [`HarnessError::TableSize`] for a missing or mis-sized dump.
pub fn import_layer_dumps(dir: &Path, model: &ModelConfig) -> Result<TableSet> {
    if model.num_layer_norms != 2 || model.num_attn_linear != 4 {
        return Err(HarnessError::Precondition(format!(
            "layer dumps carry norm1/norm2 and qkv + attn_proj per layer; \
             model declares {} norms and {} attention projections",
            model.num_layer_norms, model.num_attn_linear
        )));
    }
    let d = model.feature_dim;
    let [c, ih, iw] = model.image_shape();
    let (ph, pw) = (model.patch_height, model.patch_width);
    let (e, eh, vh) = (model.num_experts, model.expert_hidden_dim, model.vit_hidden_dim);
    let tasks = model.num_gate_tasks;

    let mut set = TableSet::new();
    set.insert(SourceTable::new(
        TensorId::Images.table_name(),
        vec![1, c, ih, iw],
        dump(dir, "image", c * ih * iw)?,
    )?);
    set.insert(SourceTable::new(
        TensorId::PatchEmbedWeights.table_name(),
        vec![d, c, ph, pw],
        dump(dir, "patch_embed_weight", d * c * ph * pw)?,
    )?);
    set.insert(SourceTable::new(
        TensorId::PatchEmbedBias.table_name(),
        vec![d],
        dump(dir, "patch_embed_bias", d)?,
    )?);
    // Row count comes from the file; the loader checks it against the contract.
    let pos = read_f32_file(&dir.join("pos_embed.float32.bin"))?;
    let rows = pos.len() / d.max(1);
    set.insert(SourceTable::new(
        TensorId::PosEmbed.table_name(),
        vec![rows, d],
        pos,
    )?);

    let mut norm_w = Stack::new(TensorId::NormWeights.table_name(), vec![2, d]);
    let mut norm_b = Stack::new(TensorId::NormBias.table_name(), vec![2, d]);
    let mut attn_w = Stack::new(TensorId::AttnWeights.table_name(), vec![4, d, d]);
    let mut attn_b = Stack::new(TensorId::AttnBias.table_name(), vec![4, d]);
    let mut vit_w1 = Stack::new(TensorId::VitWeightsL1.table_name(), vec![vh, d]);
    let mut vit_b1 = Stack::new(TensorId::VitBiasL1.table_name(), vec![vh]);
    let mut vit_w2 = Stack::new(TensorId::VitWeightsL2.table_name(), vec![d, vh]);
    let mut vit_b2 = Stack::new(TensorId::VitBiasL2.table_name(), vec![d]);
    let mut moe_w1 = Stack::new(TensorId::MoeWeightsL1.table_name(), vec![e, eh, d]);
    let mut moe_b1 = Stack::new(TensorId::MoeBiasL1.table_name(), vec![e, eh]);
    let mut moe_w2 = Stack::new(TensorId::MoeWeightsL2.table_name(), vec![e, d, eh]);
    let mut moe_b2 = Stack::new(TensorId::MoeBiasL2.table_name(), vec![e, d]);
    let mut gate = Stack::new(TensorId::MoeGate.table_name(), vec![tasks, e, d]);

    for l in 0..model.num_layers {
        let mut nw = dump(dir, &format!("l{l}_norm1_weight"), d)?;
        nw.extend(dump(dir, &format!("l{l}_norm2_weight"), d)?);
        norm_w.push(&nw);
        let mut nb = dump(dir, &format!("l{l}_norm1_bias"), d)?;
        nb.extend(dump(dir, &format!("l{l}_norm2_bias"), d)?);
        norm_b.push(&nb);

        // qkv is [3 * d, d]: q, k, v stacked along rows, then the output projection.
        let mut aw = dump(dir, &format!("l{l}_qkv_weight"), 3 * d * d)?;
        aw.extend(dump(dir, &format!("l{l}_attn_proj_weight"), d * d)?);
        attn_w.push(&aw);
        let mut ab = dump(dir, &format!("l{l}_qkv_bias"), 3 * d)?;
        ab.extend(dump(dir, &format!("l{l}_attn_proj_bias"), d)?);
        attn_b.push(&ab);

        match model.ffn_kind(l) {
            FfnKind::Dense => {
                vit_w1.push(&dump(dir, &format!("l{l}_fc1_weight"), vh * d)?);
                vit_b1.push(&dump(dir, &format!("l{l}_fc1_bias"), vh)?);
                vit_w2.push(&dump(dir, &format!("l{l}_fc2_weight"), d * vh)?);
                vit_b2.push(&dump(dir, &format!("l{l}_fc2_bias"), d)?);
            }
            FfnKind::Moe => {
                moe_w1.push(&dump(dir, &format!("l{l}_htoh4_weight"), e * eh * d)?);
                moe_b1.push(&dump(dir, &format!("l{l}_htoh4_bias"), e * eh)?);
                moe_w2.push(&dump(dir, &format!("l{l}_h4toh_weight"), e * d * eh)?);
                moe_b2.push(&dump(dir, &format!("l{l}_h4toh_bias"), e * d)?);
                let mut g = Vec::with_capacity(tasks * e * d);
                for t in 0..tasks {
                    g.extend(dump(dir, &format!("l{l}_w_gate_T_task{t}"), e * d)?);
                }
                gate.push(&g);
            }
        }
        debug!(layer = l, ffn = %model.ffn_kind(l), "imported layer");
    }

    for stack in [
        norm_w, norm_b, attn_w, attn_b, vit_w1, vit_b1, vit_w2, vit_b2, moe_w1, moe_b1,
        moe_w2, moe_b2, gate,
    ] {
        set.insert(stack.finish()?);
    }

    if model.num_layers > 0 {
        let last = model.num_layers - 1;
        let candidates = [
            format!("l{last}_x_post_moe.float32.bin"),
            format!("l{last}_x_post_mlp.float32.bin"),
        ];
        if let Some(path) = candidates.iter().map(|f| dir.join(f)).find(|p| p.exists()) {
            let x = read_f32_file(&path)?;
            let rows = x.len() / d.max(1);
            set.insert(SourceTable::new(
                TensorId::Reference.table_name(),
                vec![1, rows, d],
                x,
            )?);
        }
    }

    info!(dir = %dir.display(), tables = set.len(), "imported layer dumps");
    Ok(set)
}
