//! Export of the vote: extended variant and second-space reprojection
//!
//! From one vote in working (diffusion) space the exporter derives four
//! volumes: {plain, extended} x {working space, anatomical space}.

pub mod extend;
pub mod reproject;

pub use extend::{extend, mid_plane_index};
pub use reproject::{reproject, Interpolation, NearestNeighbourResampler, Resampler};

use log::debug;

use crate::error::Result;
use crate::grid::{AffineTransform, Axis, Grid};
use crate::volume::LabelVolume;

/// Parameters for the export stage
#[derive(Clone, Debug)]
pub struct ExportParams {
    /// Axis orthogonal to the mid-sagittal plane (default X, left-right)
    pub axis: Axis,
    /// Slices added on each side of the plane (default 3)
    pub slices: usize,
    /// Interpolation handed to the resampler (default nearest)
    pub interpolation: Interpolation,
}

impl Default for ExportParams {
    fn default() -> Self {
        Self {
            axis: Axis::X,
            slices: 3,
            interpolation: Interpolation::Nearest,
        }
    }
}

/// The four volumes produced per subject
#[derive(Clone, Debug)]
pub struct ExportSet {
    pub plain_working: LabelVolume,
    pub extended_working: LabelVolume,
    pub plain_second: LabelVolume,
    pub extended_second: LabelVolume,
}

/// Derives extended and reprojected volumes from a vote
pub struct SpatialExporter {
    params: ExportParams,
    resampler: Box<dyn Resampler>,
}

impl SpatialExporter {
    pub fn new(params: ExportParams, resampler: Box<dyn Resampler>) -> Self {
        SpatialExporter { params, resampler }
    }

    /// Exporter using the in-process nearest-neighbour resampler
    pub fn with_nearest(params: ExportParams) -> Self {
        SpatialExporter::new(params, Box::new(NearestNeighbourResampler))
    }

    pub fn params(&self) -> &ExportParams {
        &self.params
    }

    pub fn extend(&self, vote: &LabelVolume) -> Result<LabelVolume> {
        extend(vote, self.params.axis, self.params.slices)
    }

    pub fn reproject(&self, volume: &LabelVolume, transform: &AffineTransform, target: &Grid) -> Result<LabelVolume> {
        reproject(volume, transform, target, self.params.interpolation, self.resampler.as_ref())
    }

    /// Produce all four output volumes; inputs are not modified
    pub fn export(&self, vote: &LabelVolume, transform: &AffineTransform, target: &Grid) -> Result<ExportSet> {
        let extended = self.extend(vote)?;
        debug!(
            "extended vote: {} -> {} labelled voxels",
            vote.labelled_count(),
            extended.labelled_count()
        );
        let plain_second = self.reproject(vote, transform, target)?;
        let extended_second = self.reproject(&extended, transform, target)?;
        Ok(ExportSet {
            plain_working: vote.clone(),
            extended_working: extended,
            plain_second,
            extended_second,
        })
    }
}

impl Default for SpatialExporter {
    fn default() -> Self {
        SpatialExporter::with_nearest(ExportParams::default())
    }
}
