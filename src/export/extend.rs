//! Thickening of the mid-sagittal vote for visualization

use crate::error::{Result, SegError};
use crate::grid::Axis;
use crate::volume::{LabelVolume, BACKGROUND};

/// Index of the mid-sagittal plane along `axis`
///
/// Median coordinate of the labelled voxels; for an even count the mean of
/// the two middle coordinates, rounded down. `None` if nothing is labelled.
pub fn mid_plane_index(volume: &LabelVolume, axis: Axis) -> Option<usize> {
    let a = axis.index();
    let mut coords: Vec<usize> = volume
        .data
        .iter()
        .enumerate()
        .filter(|(_, &v)| v != BACKGROUND)
        .map(|(idx, _)| {
            let (i, j, k) = volume.grid.coords(idx);
            [i, j, k][a]
        })
        .collect();
    if coords.is_empty() {
        return None;
    }
    coords.sort_unstable();
    let n = coords.len();
    if n % 2 == 1 {
        Some(coords[n / 2])
    } else {
        Some((coords[n / 2 - 1] + coords[n / 2]) / 2)
    }
}

/// Copy labels up to `slices` positions either side of the mid-sagittal plane
///
/// Only background voxels inside the slab are filled. Each one takes the
/// label of the nearest labelled voxel on the same line along `axis`
/// (ties: closer to the plane, then lower index). Labelled voxels are
/// never changed and labels are never mixed.
///
/// # Errors
/// `Configuration` if the volume holds no labelled voxel.
pub fn extend(volume: &LabelVolume, axis: Axis, slices: usize) -> Result<LabelVolume> {
    let plane = mid_plane_index(volume, axis).ok_or_else(|| {
        SegError::Configuration("cannot extend a vote with no labelled voxel".to_string())
    })?;

    let grid = &volume.grid;
    let dims = [grid.dims.0, grid.dims.1, grid.dims.2];
    let a = axis.index();
    let (b, c) = match a {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    };
    let lo = plane.saturating_sub(slices);
    let hi = plane.saturating_add(slices).min(dims[a] - 1);

    let mut extended = volume.clone();
    let index_at = |t: usize, u: usize, v: usize| {
        let mut p = [0usize; 3];
        p[a] = t;
        p[b] = u;
        p[c] = v;
        grid.index(p[0], p[1], p[2])
    };

    for v in 0..dims[c] {
        for u in 0..dims[b] {
            let sources: Vec<usize> = (0..dims[a])
                .filter(|&t| volume.data[index_at(t, u, v)] != BACKGROUND)
                .collect();
            if sources.is_empty() {
                continue;
            }

            for t in lo..=hi {
                let idx = index_at(t, u, v);
                if volume.data[idx] != BACKGROUND {
                    continue;
                }
                let nearest = sources
                    .iter()
                    .copied()
                    .min_by_key(|&s| (s.abs_diff(t), s.abs_diff(plane), s));
                if let Some(s) = nearest {
                    extended.data[idx] = volume.data[index_at(s, u, v)];
                }
            }
        }
    }

    Ok(extended)
}
