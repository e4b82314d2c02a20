//! Vote inputs and parameters
//!
//! A [`VoteConfiguration`] is validated once on construction; the engine
//! never re-checks it.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::error::{Result, SegError};
use crate::volume::{DensityVolume, RegionMask, BACKGROUND};

/// Default lobes in priority order (anterior to posterior)
pub const DEFAULT_LOBES: [(&str, u16); 7] = [
    ("orbitofrontal", 80),
    ("prefrontal", 70),
    ("frontal", 60),
    ("precentral", 50),
    ("postcentral", 40),
    ("parietal", 30),
    ("occipitotemporal", 20),
];

/// Default value for voxels with no connectivity to any lobe
pub const DEFAULT_NO_VOTE_LABEL: u16 = 2;

/// Ordered set of lobe labels; earlier entries win ties
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<u16>,
}

impl LabelSet {
    pub fn new(labels: Vec<u16>) -> Result<Self> {
        if labels.len() < 2 {
            return Err(SegError::Configuration(format!(
                "at least two lobe labels are required, got {}",
                labels.len()
            )));
        }
        if labels.contains(&BACKGROUND) {
            return Err(SegError::Configuration(
                "lobe label 0 is reserved for background".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for &l in &labels {
            if !seen.insert(l) {
                return Err(SegError::Configuration(format!("duplicate lobe label {}", l)));
            }
        }
        Ok(LabelSet { labels })
    }

    /// The seven lobes 80, 70, 60, 50, 40, 30, 20
    pub fn lobes() -> Self {
        LabelSet { labels: DEFAULT_LOBES.iter().map(|&(_, l)| l).collect() }
    }

    pub fn labels(&self) -> &[u16] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn rank(&self, label: u16) -> Option<usize> {
        self.labels.iter().position(|&l| l == label)
    }
}

impl Default for LabelSet {
    fn default() -> Self {
        LabelSet::lobes()
    }
}

/// Neighbourhood used by regularization
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Connectivity {
    Six,
    Eighteen,
    TwentySix,
}

impl Connectivity {
    pub fn from_count(n: u32) -> Result<Self> {
        match n {
            6 => Ok(Connectivity::Six),
            18 => Ok(Connectivity::Eighteen),
            26 => Ok(Connectivity::TwentySix),
            other => Err(SegError::Configuration(format!(
                "connectivity must be 6, 18 or 26, got {}",
                other
            ))),
        }
    }

    /// Neighbour offsets, centre excluded
    pub fn offsets(self) -> Vec<(isize, isize, isize)> {
        let max_manhattan = match self {
            Connectivity::Six => 1,
            Connectivity::Eighteen => 2,
            Connectivity::TwentySix => 3,
        };
        let mut offsets = Vec::with_capacity(26);
        for dz in -1isize..=1 {
            for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    let manhattan = dx.abs() + dy.abs() + dz.abs();
                    if manhattan != 0 && manhattan <= max_manhattan {
                        offsets.push((dx, dy, dz));
                    }
                }
            }
        }
        offsets
    }
}

impl<'de> Deserialize<'de> for Connectivity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let n = u32::deserialize(deserializer)?;
        Connectivity::from_count(n).map_err(serde::de::Error::custom)
    }
}

/// Parameters for the spatial regularization of the raw vote
#[derive(Clone, Debug)]
pub struct RegularizationParams {
    /// Relabel isolated voxels after the raw vote (default true)
    pub enabled: bool,
    /// Neighbourhood for both passes (default 26)
    pub connectivity: Connectivity,
    /// Upper bound on relabelling passes (default 8)
    pub max_passes: usize,
    /// Weight of a voxel's own densities when blending with its neighbours
    /// before the vote; `None` disables blending (default)
    pub neighbour_blend: Option<f64>,
}

impl Default for RegularizationParams {
    fn default() -> Self {
        Self {
            enabled: true,
            connectivity: Connectivity::TwentySix,
            max_passes: 8,
            neighbour_blend: None,
        }
    }
}

impl RegularizationParams {
    pub fn validate(&self) -> Result<()> {
        if let Some(w) = self.neighbour_blend {
            if !(w > 0.0 && w <= 1.0) {
                return Err(SegError::Configuration(format!(
                    "neighbour blend weight must be in (0, 1], got {}",
                    w
                )));
            }
        }
        Ok(())
    }
}

/// Validated vote inputs for one subject
#[derive(Debug)]
pub struct VoteConfiguration {
    /// Density volumes in priority order
    volumes: Vec<DensityVolume>,
    mask: RegionMask,
    no_vote_label: u16,
}

impl VoteConfiguration {
    /// Check inputs against `label_set` and order volumes by priority
    ///
    /// Fails with [`SegError::Configuration`] on a wrong volume count,
    /// unknown or duplicate labels, an invalid no-vote label, or a volume
    /// whose grid differs from the mask's.
    pub fn new(
        volumes: Vec<DensityVolume>,
        mask: RegionMask,
        no_vote_label: u16,
        label_set: &LabelSet,
    ) -> Result<Self> {
        if no_vote_label == BACKGROUND {
            return Err(SegError::Configuration(
                "no-vote label must differ from background 0".to_string(),
            ));
        }
        if label_set.rank(no_vote_label).is_some() {
            return Err(SegError::Configuration(format!(
                "no-vote label {} collides with a lobe label",
                no_vote_label
            )));
        }

        let mut slots: Vec<Option<DensityVolume>> = vec![None; label_set.len()];
        for vol in volumes {
            let rank = label_set.rank(vol.label).ok_or_else(|| {
                SegError::Configuration(format!(
                    "density volume has label {}, which is not one of {:?}",
                    vol.label,
                    label_set.labels()
                ))
            })?;
            if slots[rank].is_some() {
                return Err(SegError::Configuration(format!(
                    "two density volumes carry label {}",
                    vol.label
                )));
            }
            mask.grid.ensure_same(&vol.grid, &format!("density volume {}", vol.label))?;
            slots[rank] = Some(vol);
        }

        let missing: Vec<u16> = slots
            .iter()
            .zip(label_set.labels())
            .filter(|(slot, _)| slot.is_none())
            .map(|(_, &l)| l)
            .collect();
        if !missing.is_empty() {
            return Err(SegError::Configuration(format!(
                "expected {} density volumes, got {} (missing label(s) {:?})",
                label_set.len(),
                label_set.len() - missing.len(),
                missing
            )));
        }

        Ok(VoteConfiguration {
            volumes: slots.into_iter().flatten().collect(),
            mask,
            no_vote_label,
        })
    }

    pub fn volumes(&self) -> &[DensityVolume] {
        &self.volumes
    }

    pub fn mask(&self) -> &RegionMask {
        &self.mask
    }

    pub fn no_vote_label(&self) -> u16 {
        self.no_vote_label
    }

    /// Lobe labels in priority order followed by the no-vote label
    pub fn priority(&self) -> Vec<u16> {
        self.volumes
            .iter()
            .map(|v| v.label)
            .chain(std::iter::once(self.no_vote_label))
            .collect()
    }
}
