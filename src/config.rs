//! Study configuration
//!
//! Loaded in three tiers, each overriding the previous one:
//! 1. TOML file (or built-in defaults when no file is given)
//! 2. Environment variables (`CCSEG_RESULT_DIR`, `CCSEG_NO_VOTE_LABEL`)
//! 3. Command-line overrides
//!
//! Input and output names are templates in which `{subject}` is replaced by
//! the subject identifier. Relative paths resolve against `result_dir`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, SegError};
use crate::export::{ExportParams, Interpolation};
use crate::grid::Axis;
use crate::vote::{Connectivity, LabelSet, RegularizationParams, DEFAULT_LOBES, DEFAULT_NO_VOTE_LABEL};

const SUBJECT_PLACEHOLDER: &str = "{subject}";
const NAME_PLACEHOLDER: &str = "{name}";

fn default_no_vote_label() -> u16 {
    DEFAULT_NO_VOTE_LABEL
}

fn default_result_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_mask() -> String {
    "{subject}_maskCC_registered2dwi.nii.gz".to_string()
}

fn default_transform() -> String {
    "{subject}_dwi_TO_t1.trm".to_string()
}

fn default_reference() -> String {
    "{subject}_t1mri.nii.gz".to_string()
}

fn default_density() -> String {
    "{subject}_tdi_{name}_mean.nii.gz".to_string()
}

/// One lobe: output label and density image template
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LobeEntry {
    pub name: String,
    pub label: u16,
    /// Template for the density image; `{name}` is replaced by the lobe name
    #[serde(default)]
    pub density: Option<String>,
}

/// `[regularization]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegularizationSection {
    pub enabled: bool,
    pub connectivity: Connectivity,
    pub max_passes: usize,
    pub neighbour_blend: Option<f64>,
}

impl Default for RegularizationSection {
    fn default() -> Self {
        let params = RegularizationParams::default();
        Self {
            enabled: params.enabled,
            connectivity: params.connectivity,
            max_passes: params.max_passes,
            neighbour_blend: params.neighbour_blend,
        }
    }
}

/// `[extension]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtensionSection {
    pub axis: Axis,
    pub slices: usize,
    pub interpolation: Interpolation,
}

impl Default for ExtensionSection {
    fn default() -> Self {
        let params = ExportParams::default();
        Self {
            axis: params.axis,
            slices: params.slices,
            interpolation: params.interpolation,
        }
    }
}

/// `[output]` section: file name templates of the four outputs
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSection {
    pub plain_working: String,
    pub extended_working: String,
    pub plain_second: String,
    pub extended_second: String,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            plain_working: "{subject}_segmented_cc_2dwi_mean.nii.gz".to_string(),
            extended_working: "{subject}_segmented_cc_bis_2dwi_mean.nii.gz".to_string(),
            plain_second: "{subject}_segmented_cc_2t1_mean.nii.gz".to_string(),
            extended_second: "{subject}_segmented_cc_bis_2t1_mean.nii.gz".to_string(),
        }
    }
}

/// Complete study configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StudyConfig {
    #[serde(default = "default_result_dir")]
    pub result_dir: PathBuf,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default = "default_no_vote_label")]
    pub no_vote_label: u16,
    /// Lobes in priority order; empty means the seven default lobes
    #[serde(default)]
    pub lobes: Vec<LobeEntry>,
    #[serde(default = "default_mask")]
    pub mask: String,
    #[serde(default = "default_transform")]
    pub transform: String,
    #[serde(default = "default_reference")]
    pub reference: String,
    #[serde(default)]
    pub regularization: RegularizationSection,
    #[serde(default)]
    pub extension: ExtensionSection,
    #[serde(default)]
    pub output: OutputSection,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            result_dir: default_result_dir(),
            subjects: Vec::new(),
            no_vote_label: default_no_vote_label(),
            lobes: Vec::new(),
            mask: default_mask(),
            transform: default_transform(),
            reference: default_reference(),
            regularization: RegularizationSection::default(),
            extension: ExtensionSection::default(),
            output: OutputSection::default(),
        }
    }
}

/// Explicit command-line overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub subjects: Vec<String>,
    pub result_dir: Option<PathBuf>,
    pub no_vote_label: Option<u16>,
    pub slices: Option<usize>,
    pub max_passes: Option<usize>,
    pub neighbour_blend: Option<f64>,
    pub no_regularization: bool,
}

/// Every path needed to process one subject
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectPaths {
    pub subject: String,
    /// (label, density image) in priority order
    pub densities: Vec<(u16, PathBuf)>,
    pub mask: PathBuf,
    pub transform: PathBuf,
    pub reference: PathBuf,
    pub plain_working: PathBuf,
    pub extended_working: PathBuf,
    pub plain_second: PathBuf,
    pub extended_second: PathBuf,
}

impl SubjectPaths {
    /// The four outputs: plain/extended in working space, then second space
    pub fn outputs(&self) -> [&Path; 4] {
        [
            &self.plain_working,
            &self.extended_working,
            &self.plain_second,
            &self.extended_second,
        ]
    }
}

impl StudyConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SegError::Config(e.to_string()))
    }

    /// Read and parse a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SegError::io(path, e))?;
        toml::from_str(&content).map_err(|e| SegError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Apply overrides from the process environment
    pub fn apply_environment_overrides(&mut self) -> Result<()> {
        self.apply_environment_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_environment_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("CCSEG_RESULT_DIR") {
            self.result_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup("CCSEG_NO_VOTE_LABEL") {
            self.no_vote_label = value.trim().parse().map_err(|e| {
                SegError::Config(format!("CCSEG_NO_VOTE_LABEL='{}': {}", value, e))
            })?;
        }
        Ok(())
    }

    /// Apply explicit command-line overrides
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if !overrides.subjects.is_empty() {
            self.subjects = overrides.subjects.clone();
        }
        if let Some(dir) = &overrides.result_dir {
            self.result_dir = dir.clone();
        }
        if let Some(label) = overrides.no_vote_label {
            self.no_vote_label = label;
        }
        if let Some(slices) = overrides.slices {
            self.extension.slices = slices;
        }
        if let Some(passes) = overrides.max_passes {
            self.regularization.max_passes = passes;
        }
        if let Some(weight) = overrides.neighbour_blend {
            self.regularization.neighbour_blend = Some(weight);
        }
        if overrides.no_regularization {
            self.regularization.enabled = false;
        }
    }

    /// Lobes in effect, defaults filled in
    pub fn effective_lobes(&self) -> Vec<LobeEntry> {
        if self.lobes.is_empty() {
            DEFAULT_LOBES
                .iter()
                .map(|&(name, label)| LobeEntry { name: name.to_string(), label, density: None })
                .collect()
        } else {
            self.lobes.clone()
        }
    }

    pub fn label_set(&self) -> Result<LabelSet> {
        LabelSet::new(self.effective_lobes().iter().map(|l| l.label).collect())
    }

    pub fn regularization_params(&self) -> RegularizationParams {
        RegularizationParams {
            enabled: self.regularization.enabled,
            connectivity: self.regularization.connectivity,
            max_passes: self.regularization.max_passes,
            neighbour_blend: self.regularization.neighbour_blend,
        }
    }

    pub fn export_params(&self) -> ExportParams {
        ExportParams {
            axis: self.extension.axis,
            slices: self.extension.slices,
            interpolation: self.extension.interpolation,
        }
    }

    /// Check the configuration as a whole, reporting every problem at once
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.subjects.is_empty() {
            errors.push("no subjects given".to_string());
        }
        let mut seen = BTreeSet::new();
        for s in &self.subjects {
            if s.trim().is_empty() {
                errors.push("empty subject identifier".to_string());
            } else if !seen.insert(s.as_str()) {
                errors.push(format!("subject '{}' listed twice", s));
            }
        }

        let lobes = self.effective_lobes();
        let label_set = LabelSet::new(lobes.iter().map(|l| l.label).collect());
        if let Err(e) = &label_set {
            errors.push(e.to_string());
        }
        if self.no_vote_label == 0 {
            errors.push("no_vote_label must not be 0 (background)".to_string());
        }
        if lobes.iter().any(|l| l.label == self.no_vote_label) {
            errors.push(format!("no_vote_label {} is also a lobe label", self.no_vote_label));
        }
        if let Err(e) = self.regularization_params().validate() {
            errors.push(e.to_string());
        }
        if !self.extension.interpolation.is_label_preserving() {
            errors.push(format!(
                "interpolation {:?} cannot be used for label volumes",
                self.extension.interpolation
            ));
        }

        if self.subjects.len() > 1 {
            let mut templates = vec![
                ("mask", self.mask.clone()),
                ("transform", self.transform.clone()),
                ("reference", self.reference.clone()),
                ("output.plain_working", self.output.plain_working.clone()),
                ("output.extended_working", self.output.extended_working.clone()),
                ("output.plain_second", self.output.plain_second.clone()),
                ("output.extended_second", self.output.extended_second.clone()),
            ];
            for lobe in &lobes {
                templates.push(("lobe density", lobe.density.clone().unwrap_or_else(default_density)));
            }
            for (what, template) in templates {
                if !template.contains(SUBJECT_PLACEHOLDER) {
                    errors.push(format!(
                        "{} template '{}' lacks {} but several subjects are configured",
                        what, template, SUBJECT_PLACEHOLDER
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SegError::Config(errors.join("; ")))
        }
    }

    fn resolve(&self, template: &str, subject: &str) -> PathBuf {
        let name = template.replace(SUBJECT_PLACEHOLDER, subject);
        let path = PathBuf::from(name);
        if path.is_absolute() {
            path
        } else {
            self.result_dir.join(path)
        }
    }

    /// Resolve every template for `subject`
    pub fn subject_paths(&self, subject: &str) -> SubjectPaths {
        let densities = self
            .effective_lobes()
            .iter()
            .map(|lobe| {
                let template = lobe
                    .density
                    .clone()
                    .unwrap_or_else(default_density)
                    .replace(NAME_PLACEHOLDER, &lobe.name);
                (lobe.label, self.resolve(&template, subject))
            })
            .collect();

        SubjectPaths {
            subject: subject.to_string(),
            densities,
            mask: self.resolve(&self.mask, subject),
            transform: self.resolve(&self.transform, subject),
            reference: self.resolve(&self.reference, subject),
            plain_working: self.resolve(&self.output.plain_working, subject),
            extended_working: self.resolve(&self.output.extended_working, subject),
            plain_second: self.resolve(&self.output.plain_second, subject),
            extended_second: self.resolve(&self.output.extended_second, subject),
        }
    }
}
