//! xtb jobs and their lifecycle state.
//!
//! A [`Job`] ties together a molecule, the calculation settings, a label and
//! the permanent directory results end up in. It is created by the caller and
//! advanced through its states only by [`JobRunner`](crate::runner::JobRunner):
//!
//! ```text
//! Created --stage--> Staged --run--> Running --collect--> Completed
//!    |                  |               |
//!    +------------------+---------------+-----------------> Failed
//! ```
//!
//! A completed or failed job is never run again; build a new `Job` instead.
//!
//! # File Layout
//!
//! For a job labelled `water` in directory `runs/water`:
//!
//! - `runs/water/water.xyz`: input geometry (written in the working directory)
//! - `runs/water/water.out`: captured stdout, the transcript
//! - `runs/water/water.err`: captured stderr
//! - `runs/water/xtbopt.xyz`, `charges`, ...: program outputs

use crate::config::{ConfigurationError, Task, XtbSettings};
use crate::geometry::Geometry;
use crate::output::Output;
use crate::runner::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Job type keys accepted by [`job_from_kind`].
pub const JOB_KINDS: [&str; 5] = ["xtbjob", "xtbsp", "xtbopt", "xtbfreq", "xtbohess"];

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Constructed, nothing on disk yet
    Created,
    /// Working directory prepared and input geometry written
    Staged,
    /// xtb launched, artifacts not yet collected
    Running,
    /// Collected, transcript shows normal termination
    Completed,
    /// A step failed or xtb terminated abnormally
    Failed,
}

impl JobState {
    /// True for `Completed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Created => "created",
            JobState::Staged => "staged",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Category of the error
    pub kind: ErrorKind,
    /// Error message as reported to the caller
    pub message: String,
}

/// Directory the program runs in.
#[derive(Debug)]
pub(crate) enum WorkDir {
    /// The permanent job directory itself
    InPlace(PathBuf),
    /// A temporary directory, removed when dropped
    Scratch(TempDir),
}

impl WorkDir {
    pub(crate) fn path(&self) -> &Path {
        match self {
            WorkDir::InPlace(path) => path,
            WorkDir::Scratch(dir) => dir.path(),
        }
    }
}

/// One xtb calculation.
#[derive(Debug)]
pub struct Job {
    pub(crate) label: String,
    pub(crate) folder: PathBuf,
    pub(crate) settings: XtbSettings,
    pub(crate) molecule: Geometry,
    pub(crate) state: JobState,
    pub(crate) output: Option<Output>,
    pub(crate) exit_code: Option<i32>,
    pub(crate) failure: Option<JobFailure>,
    pub(crate) workdir: Option<WorkDir>,
}

impl Job {
    /// Creates a job in the `Created` state.
    ///
    /// Without a label, the Hill-order empirical formula of the molecule is
    /// used. Nothing is written to disk until the job is staged.
    ///
    /// # Examples
    ///
    /// ```
    /// use xtbrun::config::{Method, Task, XtbSettings};
    /// use xtbrun::geometry::Geometry;
    /// use xtbrun::job::Job;
    ///
    /// let water = Geometry::new(
    ///     vec!["O".into(), "H".into(), "H".into()],
    ///     vec![0.0, 0.0, 0.117, 0.0, 0.757, -0.469, 0.0, -0.757, -0.469],
    /// );
    /// let job = Job::new(water, XtbSettings::new(Method::Gfn2, Task::Optimize), None, "runs/water");
    /// assert_eq!(job.label(), "H2O");
    /// ```
    pub fn new(
        molecule: Geometry,
        settings: XtbSettings,
        label: Option<String>,
        folder: impl Into<PathBuf>,
    ) -> Self {
        let label = label.unwrap_or_else(|| molecule.chemical_formula());
        Self {
            label,
            folder: folder.into(),
            settings,
            molecule,
            state: JobState::Created,
            output: None,
            exit_code: None,
            failure: None,
            workdir: None,
        }
    }

    /// Job label; names the `.xyz`, `.out` and `.err` files.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Permanent job directory.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Calculation settings.
    pub fn settings(&self) -> &XtbSettings {
        &self.settings
    }

    /// Input molecule; never modified by running the job.
    pub fn molecule(&self) -> &Geometry {
        &self.molecule
    }

    /// Current lifecycle state.
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Parsed results, available once the job has been collected.
    pub fn output(&self) -> Option<&Output> {
        self.output.as_ref()
    }

    /// Exit status of the program, if it ran and exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Error that failed the job. `None` for a job that ran to the end but
    /// whose transcript lacks the normal termination marker.
    pub fn failure(&self) -> Option<&JobFailure> {
        self.failure.as_ref()
    }

    /// Directory the program runs in, while the job is staged or running.
    pub fn working_dir(&self) -> Option<&Path> {
        self.workdir.as_ref().map(WorkDir::path)
    }

    /// True if the job runs in a temporary scratch directory.
    pub fn uses_scratch(&self) -> bool {
        matches!(self.workdir, Some(WorkDir::Scratch(_)))
    }

    /// Name of the geometry file xtb reads.
    pub fn input_name(&self) -> String {
        format!("{}.xyz", self.label)
    }

    /// Transcript path in the permanent directory.
    pub fn output_file(&self) -> PathBuf {
        self.folder.join(format!("{}.out", self.label))
    }

    /// Captured stderr path in the permanent directory.
    pub fn err_file(&self) -> PathBuf {
        self.folder.join(format!("{}.err", self.label))
    }

    /// Optimized geometry path in the permanent directory.
    pub fn xtbopt_file(&self) -> PathBuf {
        self.folder.join(crate::output::OPTIMIZED_XYZ)
    }
}

/// Builds a job from a job type key.
///
/// `xtbjob` keeps the settings as given; the others force the task kind:
/// `xtbsp` single point, `xtbopt` optimization, `xtbfreq` frequencies,
/// `xtbohess` optimization followed by frequencies. Keys are case-insensitive
/// and may contain underscores (`xtb_sp`).
pub fn job_from_kind(
    kind: &str,
    molecule: Geometry,
    settings: XtbSettings,
    label: Option<String>,
    folder: impl Into<PathBuf>,
) -> Result<Job, ConfigurationError> {
    let key = kind.to_lowercase().replace('_', "");
    let settings = match key.as_str() {
        "xtbjob" => settings,
        "xtbsp" => settings.with_task(Task::SinglePoint),
        "xtbopt" => settings.with_task(Task::Optimize),
        "xtbfreq" | "xtbhess" => settings.with_task(Task::Frequency),
        "xtbohess" => settings.with_task(Task::OptimizeFrequency),
        _ => {
            return Err(ConfigurationError::UnknownKeyword {
                kind: "job type",
                value: kind.to_string(),
            })
        }
    };
    Ok(Job::new(molecule, settings, label, folder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Method;

    fn methane() -> Geometry {
        Geometry::new(
            vec!["C", "H", "H", "H", "H"].into_iter().map(String::from).collect(),
            vec![
                0.0, 0.0, 0.0, 0.63, 0.63, 0.63, -0.63, -0.63, 0.63, -0.63, 0.63, -0.63, 0.63,
                -0.63, -0.63,
            ],
        )
    }

    #[test]
    fn test_default_label_is_formula() {
        let job = Job::new(methane(), XtbSettings::default(), None, "runs");
        assert_eq!(job.label(), "CH4");
        assert_eq!(job.state(), JobState::Created);
        assert_eq!(job.output_file(), PathBuf::from("runs/CH4.out"));
        assert_eq!(job.err_file(), PathBuf::from("runs/CH4.err"));
        assert_eq!(job.input_name(), "CH4.xyz");
        assert!(job.working_dir().is_none());
    }

    #[test]
    fn test_explicit_label() {
        let job = Job::new(methane(), XtbSettings::default(), Some("ch4_opt".into()), "runs");
        assert_eq!(job.label(), "ch4_opt");
        assert_eq!(job.xtbopt_file(), PathBuf::from("runs/xtbopt.xyz"));
    }

    #[test]
    fn test_registry_forces_task() {
        let base = XtbSettings::new(Method::Gfn1, Task::SinglePoint).with_charge(1);

        let opt = job_from_kind("xtbopt", methane(), base.clone(), None, "a").unwrap();
        assert_eq!(opt.settings().task, Task::Optimize);
        assert_eq!(opt.settings().charge, 1);
        assert_eq!(opt.settings().method, Method::Gfn1);

        let freq = job_from_kind("xtb_freq", methane(), base.clone(), None, "b").unwrap();
        assert_eq!(freq.settings().task, Task::Frequency);

        let ohess = job_from_kind("XTBOHESS", methane(), base.clone(), None, "c").unwrap();
        assert_eq!(ohess.settings().task, Task::OptimizeFrequency);

        let generic = job_from_kind("xtbjob", methane(), base.clone(), None, "d").unwrap();
        assert_eq!(generic.settings(), &base);
    }

    #[test]
    fn test_registry_rejects_unknown_kind() {
        let err = job_from_kind("g16opt", methane(), XtbSettings::default(), None, "x").unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownKeyword { .. }));
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert_eq!(JobState::Staged.to_string(), "staged");
    }
}
