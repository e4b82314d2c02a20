//! Resampling of label volumes into another space
//!
//! Labels are categorical: a resampler may only copy existing values.
//! [`reproject`] enforces this both before (interpolation policy) and after
//! (no new label values) handing the volume to a [`Resampler`].

use std::collections::BTreeSet;

use rayon::prelude::*;
use serde::Deserialize;

use crate::error::{Result, SegError};
use crate::grid::{AffineTransform, Grid};
use crate::volume::{LabelVolume, BACKGROUND};

/// Interpolation kernel requested from a resampler
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    #[serde(alias = "nearest-neighbour", alias = "nn")]
    Nearest,
    Linear,
    Cubic,
}

impl Interpolation {
    /// True if the kernel only ever copies source values
    pub fn is_label_preserving(self) -> bool {
        matches!(self, Interpolation::Nearest)
    }
}

impl Default for Interpolation {
    fn default() -> Self {
        Interpolation::Nearest
    }
}

/// Resampling primitive mapping a volume onto a target grid
///
/// `transform` maps world coordinates of the source grid to world
/// coordinates of the target grid.
pub trait Resampler: Send + Sync {
    fn resample(
        &self,
        volume: &LabelVolume,
        transform: &AffineTransform,
        target: &Grid,
        interpolation: Interpolation,
    ) -> Result<LabelVolume>;
}

/// In-process nearest-neighbour resampler
#[derive(Clone, Copy, Debug, Default)]
pub struct NearestNeighbourResampler;

impl Resampler for NearestNeighbourResampler {
    fn resample(
        &self,
        volume: &LabelVolume,
        transform: &AffineTransform,
        target: &Grid,
        interpolation: Interpolation,
    ) -> Result<LabelVolume> {
        if interpolation != Interpolation::Nearest {
            return Err(SegError::InterpolationPolicy(format!(
                "nearest-neighbour resampler cannot apply {:?} interpolation",
                interpolation
            )));
        }

        // target voxel -> target world -> source world -> source voxel
        let source_from_world = volume.grid.voxel_to_world().invert()?;
        let world_back = transform.invert()?;
        let target_to_source = source_from_world
            .compose(&world_back)
            .compose(&target.voxel_to_world());

        let (sx, sy, sz) = volume.grid.dims;
        let data: Vec<u16> = (0..target.n_total())
            .into_par_iter()
            .map(|idx| {
                let (i, j, k) = target.coords(idx);
                let p = target_to_source.apply([i as f64, j as f64, k as f64]);
                let (x, y, z) = (p[0].round(), p[1].round(), p[2].round());
                if x < 0.0 || y < 0.0 || z < 0.0 || x >= sx as f64 || y >= sy as f64 || z >= sz as f64 {
                    return BACKGROUND;
                }
                volume.data[volume.grid.index(x as usize, y as usize, z as usize)]
            })
            .collect();

        LabelVolume::new(target.clone(), data)
    }
}

/// Resample a label volume onto `target`, refusing any blending kernel
///
/// # Errors
/// - `InterpolationPolicy` if `interpolation` is not label preserving, or
///   if the resampler returned a label absent from the input
/// - `Transform` if the transform or a grid affine is singular
pub fn reproject(
    volume: &LabelVolume,
    transform: &AffineTransform,
    target: &Grid,
    interpolation: Interpolation,
    resampler: &dyn Resampler,
) -> Result<LabelVolume> {
    if !interpolation.is_label_preserving() {
        return Err(SegError::InterpolationPolicy(format!(
            "{:?} interpolation would blend categorical labels; use nearest",
            interpolation
        )));
    }

    let out = resampler.resample(volume, transform, target, interpolation)?;

    let mut allowed: BTreeSet<u16> = volume.distinct_labels();
    allowed.insert(BACKGROUND);
    let introduced: Vec<u16> = out.distinct_labels().difference(&allowed).copied().collect();
    if !introduced.is_empty() {
        return Err(SegError::InterpolationPolicy(format!(
            "resampling introduced label values {:?} absent from the source",
            introduced
        )));
    }
    if !out.grid.same_as(target) {
        return Err(SegError::Configuration(format!(
            "resampler returned a {:?} grid instead of {:?}",
            out.grid.dims, target.dims
        )));
    }
    Ok(out)
}
