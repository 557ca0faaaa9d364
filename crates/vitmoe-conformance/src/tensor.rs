//! Tensor containers.
//!
//! [`BlockedTensor`] holds one image's activations in the blocked layout;
//! [`DenseTensor`] holds row-major weight tensors with an explicit shape.

use crate::error::{HarnessError, Result};
use crate::fixed::{Activation, FixedScalar};
use crate::layout::{BlockLayout, Lane};

/// Per-image sequence of patches, each a sequence of feature blocks.
///
/// Padding lanes are zero after construction and every writer in this crate
/// leaves them zero.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockedTensor<T = Activation> {
    layout: BlockLayout,
    data: Vec<T>,
}

/// Borrowed view of one feature block.
#[derive(Debug, Clone, Copy)]
pub struct FeatureBlock<'a, T> {
    lanes: &'a [T],
    valid: usize,
}

impl<'a, T: Copy> FeatureBlock<'a, T> {
    /// All `block_size` lanes, padding included.
    pub fn raw_lanes(&self) -> &'a [T] {
        self.lanes
    }

    /// Only the semantically valid lanes.
    pub fn valid(&self) -> &'a [T] {
        &self.lanes[..self.valid]
    }

    pub fn valid_len(&self) -> usize {
        self.valid
    }
}

impl<T: FixedScalar> BlockedTensor<T> {
    pub fn zeros(layout: BlockLayout) -> Self {
        Self {
            layout,
            data: vec![T::default(); layout.storage_len()],
        }
    }

    /// Build from unblocked rows (`num_patches × feature_dim`, row-major).
    pub fn from_rows(layout: BlockLayout, rows: &[T]) -> Result<Self> {
        if rows.len() != layout.logical_len() {
            return Err(HarnessError::LayoutMismatch(format!(
                "expected {} unblocked elements, got {}",
                layout.logical_len(),
                rows.len()
            )));
        }
        let mut t = Self::zeros(layout);
        for lane in layout.lanes() {
            t.data[layout.offset_of(lane.patch, lane.block, lane.offset)] =
                rows[lane.patch * layout.feature_dim + lane.feature];
        }
        Ok(t)
    }

    pub fn layout(&self) -> BlockLayout {
        self.layout
    }

    /// Raw storage, padding included.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub fn get(&self, patch: usize, feature: usize) -> T {
        self.data[self.layout.index(patch, feature)]
    }

    #[inline]
    pub fn set(&mut self, patch: usize, feature: usize, value: T) {
        let i = self.layout.index(patch, feature);
        self.data[i] = value;
    }

    #[inline]
    pub fn at_lane(&self, lane: Lane) -> T {
        self.data[self.layout.offset_of(lane.patch, lane.block, lane.offset)]
    }

    pub fn block(&self, patch: usize, block: usize) -> FeatureBlock<'_, T> {
        let start = self.layout.offset_of(patch, block, 0);
        FeatureBlock {
            lanes: &self.data[start..start + self.layout.block_size],
            valid: self.layout.valid_lanes(block),
        }
    }

    pub fn blocks(&self, patch: usize) -> impl Iterator<Item = FeatureBlock<'_, T>> {
        (0..self.layout.blocks_per_patch()).map(move |b| self.block(patch, b))
    }

    /// Copy the valid features of `patch` into `out` as `f64`.
    ///
    /// # Panics
    ///
    /// Panics if `out.len() != feature_dim`.
    pub fn read_patch(&self, patch: usize, out: &mut [f64]) {
        assert_eq!(out.len(), self.layout.feature_dim, "patch row length mismatch");
        let mut f = 0;
        for block in self.blocks(patch) {
            for v in block.valid() {
                out[f] = v.to_f64();
                f += 1;
            }
        }
    }

    /// Quantize `row` into the valid features of `patch`; returns the number
    /// of saturated lanes.
    ///
    /// # Panics
    ///
    /// Panics if `row.len() != feature_dim`.
    pub fn write_patch(&mut self, patch: usize, row: &[f64]) -> usize {
        assert_eq!(row.len(), self.layout.feature_dim, "patch row length mismatch");
        let mut saturated = 0;
        for (feature, &x) in row.iter().enumerate() {
            let (v, sat) = T::from_f64_saturating(x);
            self.set(patch, feature, v);
            saturated += usize::from(sat);
        }
        saturated
    }

    /// Unblocked copy of the valid lanes.
    pub fn to_rows(&self) -> Vec<T> {
        self.layout.lanes().map(|lane| self.at_lane(lane)).collect()
    }

    pub fn fill(&mut self, value: T) {
        for lane in self.layout.lanes() {
            let i = self.layout.offset_of(lane.patch, lane.block, lane.offset);
            self.data[i] = value;
        }
    }

    pub fn copy_from(&mut self, other: &Self) -> Result<()> {
        if self.layout != other.layout {
            return Err(HarnessError::LayoutMismatch(format!(
                "cannot copy {:?} into {:?}",
                other.layout, self.layout
            )));
        }
        self.data.copy_from_slice(&other.data);
        Ok(())
    }

    /// Raw storage for tests that need to dirty padding lanes.
    #[cfg(test)]
    pub(crate) fn storage_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// True when no padding lane holds a non-zero value.
    pub fn padding_is_clear(&self) -> bool {
        let l = self.layout;
        (0..l.num_patches).all(|p| {
            self.blocks(p)
                .all(|b| b.raw_lanes()[b.valid_len()..].iter().all(|v| *v == T::default()))
        })
    }
}

/// Row-major tensor with an explicit shape.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseTensor<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T: Copy + Default> DenseTensor<T> {
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            data: vec![T::default(); shape.iter().product()],
        }
    }

    pub fn from_vec(shape: Vec<usize>, data: Vec<T>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(HarnessError::TableSize {
                name: "dense tensor".to_string(),
                declared: expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Contiguous sub-tensor addressed by leading indices, e.g.
    /// `attn.sub(&[layer, j])` is one `feature_dim × feature_dim` matrix.
    ///
    /// # Panics
    ///
    /// Panics if more indices than dimensions are given or any index is out
    /// of range.
    pub fn sub(&self, index: &[usize]) -> &[T] {
        let (start, len) = self.span(index);
        &self.data[start..start + len]
    }

    fn span(&self, index: &[usize]) -> (usize, usize) {
        assert!(index.len() <= self.shape.len(), "too many indices");
        let mut start = 0;
        for (i, (&ix, &dim)) in index.iter().zip(self.shape.iter()).enumerate() {
            assert!(ix < dim, "index {ix} out of range for axis {i} of size {dim}");
            start = start * dim + ix;
        }
        let len: usize = self.shape[index.len()..].iter().product();
        (start * len, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> BlockLayout {
        BlockLayout::new(2, 5, 4)
    }

    fn ramp(n: usize) -> Vec<Activation> {
        (0..n).map(|i| Activation::from_f64(i as f64)).collect()
    }

    #[test]
    fn from_rows_scatters_into_blocks() {
        let t = BlockedTensor::from_rows(layout(), &ramp(10)).unwrap();
        assert_eq!(t.as_slice().len(), 16);
        assert_eq!(t.get(0, 4).to_f64(), 4.0);
        assert_eq!(t.get(1, 0).to_f64(), 5.0);
        assert_eq!(t.block(0, 1).valid_len(), 1);
        assert!(t.padding_is_clear());
    }

    #[test]
    fn from_rows_rejects_wrong_length() {
        let err = BlockedTensor::from_rows(layout(), &ramp(12)).unwrap_err();
        assert!(matches!(err, HarnessError::LayoutMismatch(_)));
    }

    #[test]
    fn rows_survive_blocking() {
        let rows = ramp(10);
        let t = BlockedTensor::from_rows(layout(), &rows).unwrap();
        assert_eq!(t.to_rows(), rows);
    }

    #[test]
    fn fill_leaves_padding_clear() {
        let mut t = BlockedTensor::<Activation>::zeros(layout());
        t.fill(Activation::from_f64(1.5));
        assert!(t.padding_is_clear());
        assert_eq!(t.get(1, 4).to_f64(), 1.5);
    }

    #[test]
    fn read_and_write_patch() {
        let mut t = BlockedTensor::<Activation>::zeros(layout());
        let sat = t.write_patch(1, &[1.0, -2.0, 3.0, -4.0, 5.0]);
        assert_eq!(sat, 0);
        let mut out = vec![0.0; 5];
        t.read_patch(1, &mut out);
        assert_eq!(out, vec![1.0, -2.0, 3.0, -4.0, 5.0]);
        t.read_patch(0, &mut out);
        assert!(out.iter().all(|v| *v == 0.0));
        assert!(t.padding_is_clear());
    }

    #[test]
    fn copy_from_requires_same_layout() {
        let mut a = BlockedTensor::<Activation>::zeros(layout());
        let b = BlockedTensor::<Activation>::zeros(BlockLayout::new(2, 5, 5));
        assert!(a.copy_from(&b).is_err());
        let c = BlockedTensor::from_rows(layout(), &ramp(10)).unwrap();
        a.copy_from(&c).unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn dense_sub_addresses_leading_axes() {
        let data: Vec<i32> = (0..24).collect();
        let t = DenseTensor::from_vec(vec![2, 3, 4], data).unwrap();
        assert_eq!(t.sub(&[1]), &(12..24).collect::<Vec<_>>()[..]);
        assert_eq!(t.sub(&[1, 2]), &[20, 21, 22, 23]);
        assert_eq!(t.sub(&[]).len(), 24);
    }

    #[test]
    fn dense_from_vec_checks_size() {
        assert!(DenseTensor::from_vec(vec![2, 2], vec![0_i32; 3]).is_err());
    }

    #[test]
    fn dense_zero_sized_axis_is_empty() {
        let t = DenseTensor::<i32>::zeros(&[0, 4, 4]);
        assert!(t.is_empty());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn dense_sub_checks_bounds() {
        let t = DenseTensor::<i32>::zeros(&[2, 2]);
        let _ = t.sub(&[2]);
    }
}
