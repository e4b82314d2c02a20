//! Priority-ordered majority vote
//!
//! Each masked voxel goes to the first lobe, in priority order, whose density
//! attains the maximum over all lobes. When that maximum is 0 the voxel
//! receives the no-vote label instead. The raw vote is then regularized
//! (see [`super::regularize`]).

use std::collections::BTreeMap;
use std::time::Instant;

use log::{debug, info};
use rayon::prelude::*;

use super::config::{LabelSet, RegularizationParams, VoteConfiguration};
use super::regularize::{blend_densities, relabel_islands_with_progress};
use crate::error::Result;
use crate::volume::{DensityVolume, LabelVolume, RegionMask, BACKGROUND};

/// Counts reported alongside a vote
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VoteSummary {
    /// Voxels inside the region mask
    pub masked_voxels: usize,
    /// Voxel count per assigned label, no-vote included
    pub label_counts: BTreeMap<u16, usize>,
    /// Relabelling passes run (0 if regularization is disabled)
    pub passes: usize,
    /// Voxel updates made by regularization
    pub relabelled: usize,
}

/// Label for one voxel from its densities in priority order
///
/// Single ordered scan: a later candidate replaces the current best only
/// when strictly greater, so ties keep the earlier (higher priority) one,
/// and an all-zero voxel keeps the first candidate at value 0, which maps
/// to `no_vote_label`.
#[inline]
pub fn pick_label<I>(values: I, labels: &[u16], no_vote_label: u16) -> u16
where
    I: IntoIterator<Item = f64>,
{
    let mut best: Option<(usize, f64)> = None;
    for (rank, v) in values.into_iter().enumerate() {
        match best {
            Some((_, best_v)) if v <= best_v => {}
            _ => best = Some((rank, v)),
        }
    }
    match best {
        Some((rank, v)) if v > 0.0 => labels[rank],
        _ => no_vote_label,
    }
}

/// Per-voxel vote without island relabelling
///
/// Neighbour blending still applies when `params.neighbour_blend` is set.
pub fn vote_raw(config: &VoteConfiguration, params: &RegularizationParams) -> LabelVolume {
    let mask = config.mask();
    let volumes = config.volumes();
    let labels: Vec<u16> = volumes.iter().map(|v| v.label).collect();
    let no_vote = config.no_vote_label();
    let n_total = mask.grid.n_total();

    let data: Vec<u16> = match params.neighbour_blend {
        Some(own_weight) => {
            let blended = blend_densities(volumes, mask, params.connectivity, own_weight);
            blended
                .into_par_iter()
                .enumerate()
                .map(|(idx, values)| {
                    if mask.contains(idx) {
                        pick_label(values, &labels, no_vote)
                    } else {
                        BACKGROUND
                    }
                })
                .collect()
        }
        None => (0..n_total)
            .into_par_iter()
            .map(|idx| {
                if mask.contains(idx) {
                    pick_label(volumes.iter().map(|v| v.data[idx]), &labels, no_vote)
                } else {
                    BACKGROUND
                }
            })
            .collect(),
    };

    LabelVolume { grid: mask.grid.clone(), data }
}

/// Full vote: raw per-voxel vote followed by regularization
pub fn vote(config: &VoteConfiguration, params: &RegularizationParams) -> (LabelVolume, VoteSummary) {
    let start = Instant::now();
    let raw = vote_raw(config, params);
    let mut summary = VoteSummary {
        masked_voxels: config.mask().count(),
        ..VoteSummary::default()
    };
    debug!(
        "raw vote over {} masked voxels in {:.2?}",
        summary.masked_voxels,
        start.elapsed()
    );

    let result = if params.enabled {
        let (regular, stats) = relabel_islands_with_progress(
            &raw,
            config.mask(),
            &config.priority(),
            params.connectivity,
            params.max_passes,
            |pass, changed| debug!("regularization pass {}: {} voxels relabelled", pass, changed),
        );
        summary.passes = stats.passes;
        summary.relabelled = stats.relabelled;
        if !stats.converged {
            info!(
                "regularization stopped after {} passes without reaching a fixed point",
                stats.passes
            );
        }
        regular
    } else {
        raw
    };

    summary.label_counts = result.label_counts();
    info!(
        "vote done in {:.2?}: {:?} ({} relabelled in {} passes)",
        start.elapsed(),
        summary.label_counts,
        summary.relabelled,
        summary.passes
    );
    (result, summary)
}

/// Validate inputs and vote in one call
///
/// Fails with a configuration error, before any computation, when the
/// volumes do not match `label_set`, the mask grid or the no-vote rules.
pub fn vote_volumes(
    volumes: Vec<DensityVolume>,
    mask: RegionMask,
    no_vote_label: u16,
    label_set: &LabelSet,
    params: &RegularizationParams,
) -> Result<(LabelVolume, VoteSummary)> {
    params.validate()?;
    let config = VoteConfiguration::new(volumes, mask, no_vote_label, label_set)?;
    Ok(vote(&config, params))
}
