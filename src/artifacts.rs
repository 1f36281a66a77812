//! Retrieval of xtb output files into the permanent job directory.
//!
//! xtb writes its results as a set of loose files next to the input geometry.
//! After a run, the files named on a whitelist are copied from the working
//! directory (a scratch directory, or the job directory itself) into the
//! permanent job directory. Anything else the program left behind
//! (`xtbrestart`, `.xtboptok`, temporary files) is not retrieved.
//!
//! # Whitelist
//!
//! - `<label>.out` and `<label>.err`: captured stdout and stderr
//! - `xtbopt.xyz`, `xtbopt.log`: optimized geometry and trajectory
//! - `charges`, `wbo`: atomic charges and Wiberg bond orders
//! - `hessian`, `vibspectrum`, `g98.out`: frequency calculation outputs
//! - user-specified extras from the `[artifacts]` section of
//!   `xtbrun_config.cfg`
//!
//! # Path Safety
//!
//! Every artifact name is resolved against the destination directory before
//! anything is written. Names that are absolute, that climb above the
//! directory with `..`, or whose destination would pass through a symbolic
//! link leading elsewhere are rejected and reported in
//! [`CollectReport::rejected`]. A rejected artifact is never written.

use log::{debug, info, warn};
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Output files xtb writes under fixed names.
pub const STANDARD_ARTIFACTS: [&str; 7] = [
    "xtbopt.xyz",
    "xtbopt.log",
    "charges",
    "wbo",
    "hessian",
    "vibspectrum",
    "g98.out",
];

/// Errors that can occur while collecting artifacts.
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// I/O error during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid path error
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Result type for artifact operations
pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Which files are retrieved after a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactConfig {
    /// Additional file names retrieved after the standard ones
    pub extra: Vec<String>,
}

impl ArtifactConfig {
    /// Adds extra artifact names, skipping duplicates of names already listed.
    pub fn with_extra(mut self, extra: Vec<String>) -> Self {
        for name in extra {
            if !STANDARD_ARTIFACTS.contains(&name.as_str()) && !self.extra.contains(&name) {
                self.extra.push(name);
            }
        }
        self
    }

    /// Label-independent artifact names: the standard files and the extras.
    pub fn names(&self) -> Vec<String> {
        STANDARD_ARTIFACTS
            .iter()
            .map(|s| s.to_string())
            .chain(self.extra.iter().cloned())
            .collect()
    }

    /// Full whitelist for a job, transcript and stderr capture first.
    pub fn names_for(&self, label: &str) -> Vec<String> {
        let mut names = vec![format!("{}.out", label), format!("{}.err", label)];
        names.extend(self.names());
        names
    }
}

/// What happened to each whitelisted name during collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectReport {
    /// Names now present in the destination directory
    pub copied: Vec<String>,
    /// Names the run did not produce
    pub missing: Vec<String>,
    /// Names refused because their destination escapes the directory
    pub rejected: Vec<String>,
}

impl CollectReport {
    /// True if no artifact had to be rejected.
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Copies whitelisted artifacts from a working directory to a job directory.
pub struct ArtifactCollector {
    config: ArtifactConfig,
}

impl ArtifactCollector {
    /// Creates a new collector.
    pub fn new(config: ArtifactConfig) -> Self {
        Self { config }
    }

    /// Gets the artifact configuration.
    pub fn config(&self) -> &ArtifactConfig {
        &self.config
    }

    /// Collects the artifacts of job `label` from `source` into `destination`.
    ///
    /// When both paths name the same directory nothing is copied, but every
    /// name is still checked so that an escaping name is reported either way.
    ///
    /// # Arguments
    ///
    /// * `label` - Job label, used for the transcript and stderr file names
    /// * `source` - Working directory the program ran in
    /// * `destination` - Permanent job directory
    ///
    /// # Returns
    ///
    /// Returns a [`CollectReport`], or an [`ArtifactError`] if the destination
    /// is unusable or a copy fails.
    pub fn collect(&self, label: &str, source: &Path, destination: &Path) -> Result<CollectReport> {
        self.collect_names(&self.config.names_for(label), source, destination)
    }

    /// Collects an explicit list of artifact names.
    pub fn collect_names(
        &self,
        names: &[String],
        source: &Path,
        destination: &Path,
    ) -> Result<CollectReport> {
        if !destination.is_dir() {
            return Err(ArtifactError::InvalidPath(format!(
                "Destination is not a directory: {}",
                destination.display()
            )));
        }
        let base = destination.canonicalize()?;
        let in_place = source.canonicalize().map(|s| s == base).unwrap_or(false);

        info!(
            "Collecting artifacts from {} into {}",
            source.display(),
            destination.display()
        );

        let mut report = CollectReport::default();

        for name in names {
            let relative = match normalize_relative(name) {
                Some(relative) => relative,
                None => {
                    warn!(
                        "Skipping artifact '{}': path leaves {}",
                        name,
                        destination.display()
                    );
                    report.rejected.push(name.clone());
                    continue;
                }
            };

            let from = source.join(&relative);
            if !from.is_file() {
                debug!("Artifact not produced: {}", name);
                report.missing.push(name.clone());
                continue;
            }

            if in_place {
                report.copied.push(name.clone());
                continue;
            }

            let to = match resolve_within(&base, &relative)? {
                Some(to) => to,
                None => {
                    warn!(
                        "Skipping artifact '{}': destination resolves outside {}",
                        name,
                        destination.display()
                    );
                    report.rejected.push(name.clone());
                    continue;
                }
            };

            fs::copy(&from, &to)?;
            info!("Copied {} to {}", from.display(), to.display());
            report.copied.push(name.clone());
        }

        info!(
            "Collection completed: {} copied, {} missing, {} rejected",
            report.copied.len(),
            report.missing.len(),
            report.rejected.len()
        );

        Ok(report)
    }
}

/// Lexically normalizes an artifact name into a relative path.
///
/// Returns `None` for empty names, absolute names, and names whose `..`
/// segments climb above the starting directory.
pub fn normalize_relative(name: &str) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.iter().collect())
}

/// Resolves `relative` against the canonical directory `base`.
///
/// Parent directories are created as needed. Returns `None` if the
/// destination, once symbolic links are followed, would not lie strictly
/// inside `base`, or if the destination itself is a symbolic link.
pub fn resolve_within(base: &Path, relative: &Path) -> Result<Option<PathBuf>> {
    let target = base.join(relative);
    let parent = match target.parent() {
        Some(parent) => parent.to_path_buf(),
        None => return Ok(None),
    };

    // Check the deepest existing ancestor before creating anything
    let mut existing = parent.as_path();
    while !existing.exists() {
        match existing.parent() {
            Some(up) => existing = up,
            None => return Ok(None),
        }
    }
    if !existing.canonicalize()?.starts_with(base) {
        return Ok(None);
    }

    fs::create_dir_all(&parent)?;
    let parent = parent.canonicalize()?;
    if !parent.starts_with(base) {
        return Ok(None);
    }

    let file_name = match target.file_name() {
        Some(file_name) => file_name,
        None => return Ok(None),
    };
    let destination = parent.join(file_name);
    if destination == base {
        return Ok(None);
    }
    if let Ok(meta) = fs::symlink_metadata(&destination) {
        if meta.file_type().is_symlink() || meta.is_dir() {
            return Ok(None);
        }
    }

    Ok(Some(destination))
}
