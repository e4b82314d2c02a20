//! CCSeg-Core: corpus callosum parcellation by regularized lobe voting
//!
//! Turns per-lobe track density images into one label volume over the
//! mid-sagittal corpus callosum, then exports it thickened for display and
//! resampled into anatomical space.
//!
//! # Modules
//! - `grid`: voxel grids and affine transforms
//! - `volume`: density, mask and label volumes
//! - `vote`: priority-ordered majority vote and its regularization
//! - `export`: slab extension and label-preserving reprojection
//! - `nifti_io`: NIfTI-1 reading and writing
//! - `config`: TOML study configuration
//! - `pipeline`: per-subject runs and parallel batches
//! - `error`: error types

// Core modules
pub mod error;
pub mod grid;
pub mod volume;

// Algorithm modules
pub mod vote;
pub mod export;

// I/O modules
pub mod nifti_io;
pub mod config;

// Orchestration
pub mod pipeline;

pub use error::{Result, SegError, SubjectError};
pub use grid::{AffineTransform, Axis, Grid};
pub use volume::{DensityVolume, LabelVolume, RegionMask, BACKGROUND};
