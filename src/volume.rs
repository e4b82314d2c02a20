//! In-memory volumes consumed and produced by the vote
//!
//! All volumes are flat vectors over a [`Grid`] in Fortran order.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::error::{Result, SegError};
use crate::grid::Grid;

/// Background value outside the region mask
pub const BACKGROUND: u16 = 0;

/// Track density image for one lobe
#[derive(Clone, Debug)]
pub struct DensityVolume {
    /// Output label assigned to voxels this lobe wins
    pub label: u16,
    pub grid: Grid,
    /// Non-negative densities (nx * ny * nz)
    pub data: Vec<f64>,
}

impl DensityVolume {
    /// Wrap density data, rejecting negative or non-finite values
    pub fn new(label: u16, grid: Grid, data: Vec<f64>) -> Result<Self> {
        if data.len() != grid.n_total() {
            return Err(SegError::Configuration(format!(
                "density for label {}: {} values for a {:?} grid",
                label,
                data.len(),
                grid.dims
            )));
        }
        if let Some((idx, v)) = data.iter().enumerate().find(|(_, v)| !v.is_finite() || **v < 0.0) {
            let (i, j, k) = grid.coords(idx);
            return Err(SegError::Configuration(format!(
                "density for label {}: invalid value {} at voxel ({}, {}, {})",
                label, v, i, j, k
            )));
        }
        Ok(DensityVolume { label, grid, data })
    }
}

/// Binary mask of voxels eligible for voting (1 = inside)
#[derive(Clone, Debug)]
pub struct RegionMask {
    pub grid: Grid,
    pub data: Vec<u8>,
}

impl RegionMask {
    pub fn new(grid: Grid, data: Vec<u8>) -> Result<Self> {
        if data.len() != grid.n_total() {
            return Err(SegError::Configuration(format!(
                "mask: {} values for a {:?} grid",
                data.len(),
                grid.dims
            )));
        }
        Ok(RegionMask { grid, data })
    }

    /// Binarize raw values: any non-zero voxel is inside
    pub fn from_values(grid: Grid, values: &[f64]) -> Result<Self> {
        let data = values.iter().map(|&v| if v != 0.0 { 1 } else { 0 }).collect();
        RegionMask::new(grid, data)
    }

    #[inline]
    pub fn contains(&self, idx: usize) -> bool {
        self.data[idx] != 0
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&m| m != 0).count()
    }
}

/// Per-voxel categorical labels
#[derive(Clone, Debug, PartialEq)]
pub struct LabelVolume {
    pub grid: Grid,
    pub data: Vec<u16>,
}

impl LabelVolume {
    /// Volume filled with background
    pub fn empty(grid: Grid) -> Self {
        let n = grid.n_total();
        LabelVolume { grid, data: vec![BACKGROUND; n] }
    }

    pub fn new(grid: Grid, data: Vec<u16>) -> Result<Self> {
        if data.len() != grid.n_total() {
            return Err(SegError::Configuration(format!(
                "label volume: {} values for a {:?} grid",
                data.len(),
                grid.dims
            )));
        }
        Ok(LabelVolume { grid, data })
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> u16 {
        self.data[self.grid.index(i, j, k)]
    }

    /// Distinct values present, background included
    pub fn distinct_labels(&self) -> BTreeSet<u16> {
        self.data.iter().copied().collect()
    }

    /// Voxel count per non-background label
    pub fn label_counts(&self) -> BTreeMap<u16, usize> {
        let mut counts = BTreeMap::new();
        for &v in self.data.iter().filter(|&&v| v != BACKGROUND) {
            *counts.entry(v).or_insert(0) += 1;
        }
        counts
    }

    /// Number of non-background voxels
    pub fn labelled_count(&self) -> usize {
        self.data.iter().filter(|&&v| v != BACKGROUND).count()
    }
}
