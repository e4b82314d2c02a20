//! Common test utilities for ccseg-core integration tests
#![allow(dead_code)]

use std::fs;
use std::path::Path;

use ccseg_core::config::StudyConfig;
use ccseg_core::nifti_io::save_nifti_to_file;
use ccseg_core::vote::DEFAULT_LOBES;
use ccseg_core::{DensityVolume, Grid, RegionMask};

/// Identity `.trm` transform (translation row first)
pub const IDENTITY_TRM: &str = "0 0 0\n1 0 0\n0 1 0\n0 0 1\n";

/// Lobe labels in priority order
pub fn lobe_labels() -> Vec<u16> {
    DEFAULT_LOBES.iter().map(|&(_, label)| label).collect()
}

/// Grid of 1 mm isotropic voxels at the origin
pub fn unit_grid(dims: (usize, usize, usize)) -> Grid {
    Grid::with_voxel_size(dims, (1.0, 1.0, 1.0))
}

pub fn full_mask(grid: &Grid) -> RegionMask {
    RegionMask::new(grid.clone(), vec![1; grid.n_total()]).unwrap()
}

/// One density volume per lobe; `f(label, idx)` gives each voxel's value
pub fn lobe_volumes<F>(grid: &Grid, f: F) -> Vec<DensityVolume>
where
    F: Fn(u16, usize) -> f64,
{
    lobe_labels()
        .into_iter()
        .map(|label| {
            let data = (0..grid.n_total()).map(|idx| f(label, idx)).collect();
            DensityVolume::new(label, grid.clone(), data).unwrap()
        })
        .collect()
}

/// Reproducible pseudo-random values in [0, 1)
pub fn pseudo_random(seed: u64, n: usize) -> Vec<f64> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..n)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 11) as f64 / (1u64 << 53) as f64
        })
        .collect()
}

/// Sparse random densities: roughly a third of the values are exactly 0
pub fn random_lobe_volumes(grid: &Grid, seed: u64) -> Vec<DensityVolume> {
    lobe_labels()
        .into_iter()
        .enumerate()
        .map(|(rank, label)| {
            let data = pseudo_random(seed + rank as u64, grid.n_total())
                .into_iter()
                .map(|v| if v < 0.33 { 0.0 } else { (v * 10.0).floor() })
                .collect();
            DensityVolume::new(label, grid.clone(), data).unwrap()
        })
        .collect()
}

/// Synthetic subject: a mid-sagittal mask at x = nx/2 split between an
/// anterior lobe (80, low y) and a posterior one (20, high y)
pub struct SyntheticSubject {
    pub grid: Grid,
    pub volumes: Vec<DensityVolume>,
    pub mask: RegionMask,
}

impl SyntheticSubject {
    pub fn new(dims: (usize, usize, usize)) -> Self {
        let grid = unit_grid(dims);
        let plane = dims.0 / 2;
        let half_y = dims.1 / 2;
        let mask_data = (0..grid.n_total())
            .map(|idx| if grid.coords(idx).0 == plane { 1 } else { 0 })
            .collect();
        let mask = RegionMask::new(grid.clone(), mask_data).unwrap();
        let volumes = lobe_volumes(&grid, |label, idx| {
            let (_, j, _) = grid.coords(idx);
            match label {
                80 if j < half_y => 12.0,
                20 if j >= half_y => 9.0,
                60 => 1.0,
                _ => 0.0,
            }
        });
        SyntheticSubject { grid, volumes, mask }
    }

    /// Write every input `config` expects for `subject`
    pub fn write_inputs(&self, config: &StudyConfig, subject: &str, transform: &str, reference: &Grid) {
        let paths = config.subject_paths(subject);
        for (label, path) in &paths.densities {
            let vol = self.volumes.iter().find(|v| v.label == *label).unwrap();
            save_nifti_to_file(path, &vol.data, &vol.grid).unwrap();
        }
        let mask: Vec<f64> = self.mask.data.iter().map(|&m| m as f64).collect();
        save_nifti_to_file(&paths.mask, &mask, &self.grid).unwrap();
        fs::write(&paths.transform, transform).unwrap();
        save_nifti_to_file(&paths.reference, &vec![0.0; reference.n_total()], reference).unwrap();
    }
}

/// Study rooted at `dir` with default naming
pub fn study_in(dir: &Path, subjects: &[&str]) -> StudyConfig {
    let mut config = StudyConfig::default();
    config.result_dir = dir.to_path_buf();
    config.subjects = subjects.iter().map(|s| s.to_string()).collect();
    config
}

/// Names of files in `dir` ending in `suffix`
pub fn files_with_suffix(dir: &Path, suffix: &str) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(suffix))
        .collect();
    names.sort();
    names
}
