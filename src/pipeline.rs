//! Per-subject processing and batch dispatch
//!
//! A subject either produces all four output volumes or none of them:
//! outputs are written to `*.incomplete` staging files and only renamed into
//! place once every write succeeded. Subjects share no mutable state and
//! run in parallel on a rayon pool.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::config::{StudyConfig, SubjectPaths};
use crate::error::{Result, SegError, SubjectError};
use crate::export::{ExportSet, SpatialExporter};
use crate::grid::AffineTransform;
use crate::nifti_io::{encode_labels_for, read_nifti_file, read_nifti_grid};
use crate::volume::{DensityVolume, LabelVolume, RegionMask};
use crate::vote::{vote, LabelSet, VoteConfiguration, VoteSummary};

const STAGING_SUFFIX: &str = ".incomplete";

/// Outcome of a successful subject
#[derive(Debug, Clone)]
pub struct SubjectReport {
    pub subject: String,
    /// Written outputs: plain/extended working space, then second space
    pub outputs: Vec<PathBuf>,
    pub summary: VoteSummary,
    pub elapsed: Duration,
}

/// Load the region mask and density images of one subject
///
/// Densities come back in the order listed in `paths`. Grid agreement is
/// checked when the vote configuration is built.
pub fn load_inputs(paths: &SubjectPaths) -> Result<(Vec<DensityVolume>, RegionMask)> {
    let mask_nifti = read_nifti_file(&paths.mask)?;
    let mask = RegionMask::from_values(mask_nifti.grid(), &mask_nifti.data)?;
    debug!("mask {}: {} voxels inside", paths.mask.display(), mask.count());

    let mut volumes = Vec::with_capacity(paths.densities.len());
    for (label, path) in &paths.densities {
        let nifti = read_nifti_file(path)?;
        let volume = DensityVolume::new(*label, nifti.grid(), nifti.data)
            .map_err(|e| match e {
                SegError::Configuration(msg) => SegError::Configuration(format!("{}: {}", path.display(), msg)),
                other => other,
            })?;
        volumes.push(volume);
    }
    Ok((volumes, mask))
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SegError::io(path, e)),
    }
}

/// Remove final and staging files of every output
fn discard_outputs(paths: &SubjectPaths) {
    for output in paths.outputs() {
        for p in [output.to_path_buf(), staging_path(output)] {
            if let Err(e) = remove_if_exists(&p) {
                warn!("could not remove '{}': {}", p.display(), e);
            }
        }
    }
}

fn write_staged(paths: &SubjectPaths, set: &ExportSet) -> Result<()> {
    let volumes: [&LabelVolume; 4] = [
        &set.plain_working,
        &set.extended_working,
        &set.plain_second,
        &set.extended_second,
    ];
    for (output, volume) in paths.outputs().into_iter().zip(volumes) {
        let bytes = encode_labels_for(output, volume)?;
        let staged = staging_path(output);
        std::fs::write(&staged, &bytes).map_err(|e| SegError::io(&staged, e))?;
    }
    for output in paths.outputs() {
        let staged = staging_path(output);
        std::fs::rename(&staged, output).map_err(|e| SegError::io(output, e))?;
    }
    Ok(())
}

/// Write all four outputs, or none
fn commit_outputs(paths: &SubjectPaths, set: &ExportSet) -> Result<()> {
    write_staged(paths, set).map_err(|e| {
        discard_outputs(paths);
        e
    })
}

fn process_subject(config: &StudyConfig, label_set: &LabelSet, paths: &SubjectPaths) -> Result<VoteSummary> {
    let start = Instant::now();
    let (volumes, mask) = load_inputs(paths)?;
    let vote_config = VoteConfiguration::new(volumes, mask, config.no_vote_label, label_set)?;
    debug!("inputs for '{}' loaded in {:.2?}", paths.subject, start.elapsed());

    let (voted, summary) = vote(&vote_config, &config.regularization_params());

    let transform = AffineTransform::read_file(&paths.transform)?;
    let reference = read_nifti_grid(&paths.reference)?;
    let exporter = SpatialExporter::with_nearest(config.export_params());
    let set = exporter.export(&voted, &transform, &reference)?;

    commit_outputs(paths, &set)?;
    Ok(summary)
}

/// Process one subject end to end
///
/// Outputs left by an earlier run are removed first, so a failed run never
/// leaves files that look like a completed one.
pub fn run_subject(config: &StudyConfig, subject: &str) -> std::result::Result<SubjectReport, SubjectError> {
    let start = Instant::now();
    let wrap = |e: SegError| SubjectError::new(subject, e);
    info!("[{}] starting", subject);

    let label_set = config.label_set().map_err(wrap)?;
    let paths = config.subject_paths(subject);
    discard_outputs(&paths);

    let summary = process_subject(config, &label_set, &paths).map_err(wrap)?;
    let elapsed = start.elapsed();
    info!("[{}] completed in {:.2?}", subject, elapsed);

    Ok(SubjectReport {
        subject: subject.to_string(),
        outputs: paths.outputs().iter().map(|p| p.to_path_buf()).collect(),
        summary,
        elapsed,
    })
}

/// Process every configured subject in parallel
///
/// Results come back in subject order; one failing subject does not stop
/// the others.
///
/// # Arguments
/// * `config` - Validated study configuration
/// * `jobs` - Worker threads; `None` uses rayon's default
pub fn run_batch(
    config: &StudyConfig,
    jobs: Option<usize>,
) -> Result<Vec<std::result::Result<SubjectReport, SubjectError>>> {
    config.validate()?;

    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = jobs {
        builder = builder.num_threads(n);
    }
    let pool = builder
        .build()
        .map_err(|e| SegError::Configuration(format!("cannot start worker pool: {}", e)))?;

    info!(
        "processing {} subject(s) on {} thread(s)",
        config.subjects.len(),
        pool.current_num_threads()
    );
    let results = pool.install(|| {
        config
            .subjects
            .par_iter()
            .map(|subject| run_subject(config, subject))
            .collect::<Vec<_>>()
    });
    Ok(results)
}
