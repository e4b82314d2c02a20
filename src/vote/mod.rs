//! Regularized majority vote between lobe track density images
//!
//! - `config`: label set, validated inputs and regularization parameters
//! - `engine`: priority-ordered per-voxel vote
//! - `regularize`: neighbour blending and island relabelling

pub mod config;
pub mod engine;
pub mod regularize;

pub use config::{
    Connectivity, LabelSet, RegularizationParams, VoteConfiguration, DEFAULT_LOBES,
    DEFAULT_NO_VOTE_LABEL,
};
pub use engine::{pick_label, vote, vote_raw, vote_volumes, VoteSummary};
pub use regularize::{blend_densities, relabel_islands, relabel_islands_with_progress, RelabelStats};
