//! Blocked feature layout.
//!
//! An activation tensor stores each patch's `feature_dim` features as
//! `ceil(feature_dim / block_size)` contiguous feature blocks. The final
//! block of a patch carries `feature_dim mod block_size` valid lanes (all of
//! them when the division is exact); the remaining lanes are padding.
//!
//! [`BlockLayout`] is the only place that boundary is computed. Everything
//! that walks activation data goes through [`BlockLayout::lanes`] or
//! [`BlockLayout::lanes_limited`], which never yield a padding lane.

use serde::{Deserialize, Serialize};

/// Shape of one blocked activation tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockLayout {
    pub num_patches: usize,
    pub feature_dim: usize,
    pub block_size: usize,
}

/// One valid lane: logical feature `feature` of `patch`, stored at
/// `block`/`offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lane {
    pub patch: usize,
    pub block: usize,
    pub offset: usize,
    pub feature: usize,
}

impl BlockLayout {
    /// # Panics
    ///
    /// Panics if `block_size` is zero.
    pub fn new(num_patches: usize, feature_dim: usize, block_size: usize) -> Self {
        assert!(block_size > 0, "block_size must be non-zero");
        Self {
            num_patches,
            feature_dim,
            block_size,
        }
    }

    pub fn blocks_per_patch(&self) -> usize {
        self.feature_dim.div_ceil(self.block_size)
    }

    /// Stored lanes per patch, padding included.
    pub fn padded_dim(&self) -> usize {
        self.blocks_per_patch() * self.block_size
    }

    /// Stored elements in the whole tensor, padding included.
    pub fn storage_len(&self) -> usize {
        self.num_patches * self.padded_dim()
    }

    /// Semantically valid elements (`num_patches * feature_dim`).
    pub fn logical_len(&self) -> usize {
        self.num_patches * self.feature_dim
    }

    /// Number of valid lanes in `block`.
    pub fn valid_lanes(&self, block: usize) -> usize {
        let start = block * self.block_size;
        self.feature_dim.saturating_sub(start).min(self.block_size)
    }

    /// Storage index of `(patch, block, offset)`.
    #[inline]
    pub fn offset_of(&self, patch: usize, block: usize, offset: usize) -> usize {
        debug_assert!(patch < self.num_patches);
        debug_assert!(block < self.blocks_per_patch());
        debug_assert!(offset < self.block_size);
        (patch * self.blocks_per_patch() + block) * self.block_size + offset
    }

    /// Storage index of logical feature `feature` of `patch`.
    #[inline]
    pub fn index(&self, patch: usize, feature: usize) -> usize {
        debug_assert!(feature < self.feature_dim);
        self.offset_of(
            patch,
            feature / self.block_size,
            feature % self.block_size,
        )
    }

    /// Every valid lane, patch-major, features in logical order.
    pub fn lanes(&self) -> Lanes {
        self.lanes_limited(self.num_patches, self.feature_dim)
    }

    /// Valid lanes of the first `patch_limit` patches and first `dim_limit`
    /// features. Limits larger than the tensor are clamped.
    pub fn lanes_limited(&self, patch_limit: usize, dim_limit: usize) -> Lanes {
        Lanes {
            block_size: self.block_size,
            patches: patch_limit.min(self.num_patches),
            dims: dim_limit.min(self.feature_dim),
            patch: 0,
            feature: 0,
        }
    }
}

/// Iterator over [`Lane`]s produced by [`BlockLayout`].
#[derive(Debug, Clone)]
pub struct Lanes {
    block_size: usize,
    patches: usize,
    dims: usize,
    patch: usize,
    feature: usize,
}

impl Iterator for Lanes {
    type Item = Lane;

    fn next(&mut self) -> Option<Lane> {
        if self.dims == 0 || self.patch >= self.patches {
            return None;
        }
        let lane = Lane {
            patch: self.patch,
            block: self.feature / self.block_size,
            offset: self.feature % self.block_size,
            feature: self.feature,
        };
        self.feature += 1;
        if self.feature == self.dims {
            self.feature = 0;
            self.patch += 1;
        }
        Some(lane)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.dims == 0 || self.patch >= self.patches {
            0
        } else {
            (self.patches - self.patch) * self.dims - self.feature
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Lanes {}
