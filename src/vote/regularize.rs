//! Spatial regularization of the vote
//!
//! Two operations, both restricted to the region mask:
//! - density blending before the vote (each voxel's densities mixed with
//!   the mean of its neighbours that carry any signal)
//! - island relabelling after the vote (a voxel whose label no neighbour
//!   shares takes its neighbours' plurality label)
//!
//! Both read from one buffer and write to another, so results never depend
//! on voxel visiting order.

use rayon::prelude::*;

use super::config::Connectivity;
use crate::grid::Grid;
use crate::volume::{DensityVolume, LabelVolume, RegionMask};

/// Outcome of [`relabel_islands`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelabelStats {
    /// Passes run, including the last one if it changed nothing
    pub passes: usize,
    /// Voxel updates summed over all passes
    pub relabelled: usize,
    /// True if the last pass changed nothing
    pub converged: bool,
}

/// In-mask neighbours of a voxel
fn masked_neighbours<'a>(
    grid: &'a Grid,
    mask: &'a RegionMask,
    offsets: &'a [(isize, isize, isize)],
    idx: usize,
) -> impl Iterator<Item = usize> + 'a {
    let (nx, ny, nz) = grid.dims;
    let (i, j, k) = grid.coords(idx);
    offsets.iter().filter_map(move |&(dx, dy, dz)| {
        let ni = i as isize + dx;
        let nj = j as isize + dy;
        let nk = k as isize + dz;
        if ni < 0 || nj < 0 || nk < 0 || ni >= nx as isize || nj >= ny as isize || nk >= nz as isize {
            return None;
        }
        let n = grid.index(ni as usize, nj as usize, nk as usize);
        if mask.contains(n) {
            Some(n)
        } else {
            None
        }
    })
}

/// Blend each masked voxel's densities with its neighbourhood
///
/// For a masked voxel with at least one in-mask neighbour carrying signal
/// (any density > 0), the result is
/// `own_weight * own + (1 - own_weight) * mean(neighbours with signal)`.
/// Other masked voxels keep their densities; unmasked voxels get 0.
///
/// # Returns
/// One blended vector per voxel, laid out `[voxel][volume]` with volumes
/// in the order given.
pub fn blend_densities(
    volumes: &[DensityVolume],
    mask: &RegionMask,
    connectivity: Connectivity,
    own_weight: f64,
) -> Vec<Vec<f64>> {
    let grid = &mask.grid;
    let n_total = grid.n_total();
    let offsets = connectivity.offsets();

    let has_signal: Vec<bool> = (0..n_total)
        .map(|idx| mask.contains(idx) && volumes.iter().any(|v| v.data[idx] > 0.0))
        .collect();

    (0..n_total)
        .into_par_iter()
        .map(|idx| {
            if !mask.contains(idx) {
                return vec![0.0; volumes.len()];
            }
            let own: Vec<f64> = volumes.iter().map(|v| v.data[idx]).collect();

            let mut sum = vec![0.0; volumes.len()];
            let mut count = 0usize;
            for n in masked_neighbours(grid, mask, &offsets, idx) {
                if has_signal[n] {
                    for (s, v) in sum.iter_mut().zip(volumes.iter()) {
                        *s += v.data[n];
                    }
                    count += 1;
                }
            }

            if count == 0 {
                return own;
            }
            let neighbour_weight = (1.0 - own_weight) / count as f64;
            own.iter()
                .zip(sum.iter())
                .map(|(&o, &s)| own_weight * o + neighbour_weight * s)
                .collect()
        })
        .collect()
}

/// True if the masked voxel has in-mask neighbours and none shares its label
fn is_island(
    labels: &[u16],
    grid: &Grid,
    mask: &RegionMask,
    offsets: &[(isize, isize, isize)],
    idx: usize,
) -> bool {
    let own = labels[idx];
    let mut any = false;
    for n in masked_neighbours(grid, mask, offsets, idx) {
        if labels[n] == own {
            return false;
        }
        any = true;
    }
    any
}

/// Most frequent label among the in-mask neighbours, ties by `priority`
fn plurality_label(
    labels: &[u16],
    grid: &Grid,
    mask: &RegionMask,
    offsets: &[(isize, isize, isize)],
    priority: &[u16],
    idx: usize,
) -> Option<u16> {
    // (label, count) in first-seen order; neighbourhoods hold at most 26 voxels
    let mut tally: Vec<(u16, usize)> = Vec::with_capacity(8);
    for n in masked_neighbours(grid, mask, offsets, idx) {
        let l = labels[n];
        match tally.iter_mut().find(|(label, _)| *label == l) {
            Some((_, count)) => *count += 1,
            None => tally.push((l, 1)),
        }
    }

    let rank = |label: u16| priority.iter().position(|&p| p == label).unwrap_or(usize::MAX);
    tally
        .into_iter()
        .min_by(|(la, ca), (lb, cb)| {
            cb.cmp(ca)
                .then_with(|| rank(*la).cmp(&rank(*lb)))
                .then_with(|| la.cmp(lb))
        })
        .map(|(label, _)| label)
}

/// Relabel isolated voxels until nothing changes or `max_passes` is reached
///
/// A masked voxel is an island when it has at least one in-mask neighbour
/// and none of them shares its label. It takes the most frequent label
/// among its in-mask neighbours; ties go to the label listed first in
/// `priority`. Of two neighbouring islands only the one with the lower
/// flat index is relabelled in a pass, so adjacent islands never swap
/// labels back and forth. Voxels without in-mask neighbours and unmasked
/// voxels are never touched, so no label outside the input's label set
/// can appear.
///
/// # Arguments
/// * `volume` - Raw vote
/// * `mask` - Region mask on the same grid
/// * `priority` - Tie-break order (lobes, then no-vote)
/// * `connectivity` - Neighbourhood definition
/// * `max_passes` - Upper bound on passes
pub fn relabel_islands(
    volume: &LabelVolume,
    mask: &RegionMask,
    priority: &[u16],
    connectivity: Connectivity,
    max_passes: usize,
) -> (LabelVolume, RelabelStats) {
    relabel_islands_with_progress(volume, mask, priority, connectivity, max_passes, |_, _| {})
}

/// [`relabel_islands`] with a callback receiving (pass, voxels changed)
pub fn relabel_islands_with_progress<F>(
    volume: &LabelVolume,
    mask: &RegionMask,
    priority: &[u16],
    connectivity: Connectivity,
    max_passes: usize,
    progress_callback: F,
) -> (LabelVolume, RelabelStats)
where
    F: Fn(usize, usize),
{
    let grid = &volume.grid;
    let offsets = connectivity.offsets();
    let mut current = volume.data.clone();
    let mut stats = RelabelStats::default();

    while stats.passes < max_passes {
        let islands: Vec<bool> = (0..current.len())
            .into_par_iter()
            .map(|idx| mask.contains(idx) && is_island(&current, grid, mask, &offsets, idx))
            .collect();

        let next: Vec<u16> = (0..current.len())
            .into_par_iter()
            .map(|idx| {
                if !islands[idx] {
                    return current[idx];
                }
                // Wait for a neighbouring island with a lower index to settle first
                if masked_neighbours(grid, mask, &offsets, idx).any(|n| n < idx && islands[n]) {
                    return current[idx];
                }
                plurality_label(&current, grid, mask, &offsets, priority, idx).unwrap_or(current[idx])
            })
            .collect();

        let changed = next.iter().zip(current.iter()).filter(|(a, b)| a != b).count();
        stats.passes += 1;
        stats.relabelled += changed;
        progress_callback(stats.passes, changed);
        current = next;

        if changed == 0 {
            stats.converged = true;
            break;
        }
    }

    (LabelVolume { grid: grid.clone(), data: current }, stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(nx: usize, ny: usize) -> Grid {
        Grid::with_voxel_size((nx, ny, 1), (1.0, 1.0, 1.0))
    }

    fn full_mask(grid: &Grid) -> RegionMask {
        RegionMask::new(grid.clone(), vec![1; grid.n_total()]).unwrap()
    }

    const PRIORITY: [u16; 8] = [80, 70, 60, 50, 40, 30, 20, 2];

    #[test]
    fn test_isolated_voxel_takes_plurality() {
        let grid = plane(3, 3);
        let data = vec![
            70, 70, 70,
            70, 20, 60,
            60, 60, 60,
        ];
        let vol = LabelVolume::new(grid.clone(), data).unwrap();
        let (out, stats) = relabel_islands(&vol, &full_mask(&grid), &PRIORITY, Connectivity::TwentySix, 8);
        // Centre sees 4x70 and 4x60; 70 has higher priority
        assert_eq!(out.get(1, 1, 0), 70);
        assert_eq!(stats.relabelled, 1);
        assert!(stats.converged);
    }

    #[test]
    fn test_regular_volume_unchanged() {
        let grid = plane(4, 2);
        let data = vec![
            80, 80, 30, 30,
            80, 80, 30, 30,
        ];
        let vol = LabelVolume::new(grid.clone(), data).unwrap();
        let (out, stats) = relabel_islands(&vol, &full_mask(&grid), &PRIORITY, Connectivity::Six, 8);
        assert_eq!(out, vol);
        assert_eq!(stats, RelabelStats { passes: 1, relabelled: 0, converged: true });
    }

    #[test]
    fn test_mask_limits_neighbourhood() {
        let grid = plane(3, 1);
        let vol = LabelVolume::new(grid.clone(), vec![0, 40, 50]).unwrap();
        // Only voxel 1 and 2 are masked: both are islands, voxel 1 moves first
        let mask = RegionMask::new(grid.clone(), vec![0, 1, 1]).unwrap();
        let (out, stats) = relabel_islands(&vol, &mask, &PRIORITY, Connectivity::Six, 8);
        assert_eq!(out.data, vec![0, 50, 50]);
        assert_eq!(stats, RelabelStats { passes: 2, relabelled: 1, converged: true });
    }

    #[test]
    fn test_voxel_without_neighbours_kept() {
        let grid = plane(3, 1);
        let vol = LabelVolume::new(grid.clone(), vec![40, 0, 50]).unwrap();
        let mask = RegionMask::new(grid.clone(), vec![1, 0, 1]).unwrap();
        let (out, stats) = relabel_islands(&vol, &mask, &PRIORITY, Connectivity::TwentySix, 8);
        assert_eq!(out, vol);
        assert!(stats.converged);
    }

    #[test]
    fn test_pass_bound_respected() {
        // Alternating strand needs two relabelling passes
        let grid = plane(4, 1);
        let vol = LabelVolume::new(grid.clone(), vec![40, 50, 40, 50]).unwrap();
        let (out, stats) = relabel_islands(&vol, &full_mask(&grid), &PRIORITY, Connectivity::TwentySix, 1);
        assert_eq!(out.data, vec![50, 50, 40, 50]);
        assert_eq!(stats.passes, 1);
        assert!(!stats.converged);
    }

    #[test]
    fn test_adjacent_islands_settle() {
        let grid = plane(4, 1);
        let vol = LabelVolume::new(grid.clone(), vec![40, 50, 40, 50]).unwrap();
        let mask = full_mask(&grid);
        for max_passes in 3..=10 {
            let (out, stats) = relabel_islands(&vol, &mask, &PRIORITY, Connectivity::TwentySix, max_passes);
            assert_eq!(out.data, vec![50, 50, 50, 50], "max_passes = {}", max_passes);
            assert_eq!(stats, RelabelStats { passes: 3, relabelled: 2, converged: true });
        }
    }

    #[test]
    fn test_two_voxel_swap_settles() {
        let grid = plane(2, 1);
        let vol = LabelVolume::new(grid.clone(), vec![40, 50]).unwrap();
        let (out, stats) = relabel_islands(&vol, &full_mask(&grid), &PRIORITY, Connectivity::Six, 8);
        assert_eq!(out.data, vec![50, 50]);
        assert!(stats.converged);
    }

    #[test]
    fn test_blend_uses_neighbours_with_signal() {
        let grid = plane(3, 1);
        let mask = full_mask(&grid);
        let a = DensityVolume::new(80, grid.clone(), vec![4.0, 0.0, 0.0]).unwrap();
        let b = DensityVolume::new(70, grid.clone(), vec![0.0, 1.0, 0.0]).unwrap();
        let blended = blend_densities(&[a, b], &mask, Connectivity::Six, 0.5);

        // Voxel 1: own (0, 1), neighbour 0 has signal (4, 0), neighbour 2 has none
        assert_eq!(blended[1], vec![2.0, 0.5]);
        // Voxel 2: only neighbour 1 has signal
        assert_eq!(blended[2], vec![0.0, 0.5]);
        // Voxel 0: neighbour 1 has signal
        assert_eq!(blended[0], vec![2.0, 0.5]);
    }

    #[test]
    fn test_blend_without_signal_keeps_own() {
        let grid = plane(2, 1);
        let mask = RegionMask::new(grid.clone(), vec![1, 0]).unwrap();
        let a = DensityVolume::new(80, grid.clone(), vec![3.0, 9.0]).unwrap();
        let blended = blend_densities(&[a], &mask, Connectivity::TwentySix, 0.5);
        assert_eq!(blended[0], vec![3.0]);
        assert_eq!(blended[1], vec![0.0]);
    }
}
