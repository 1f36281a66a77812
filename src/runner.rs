//! Execution of xtb jobs.
//!
//! The [`JobRunner`] moves a [`Job`] through its lifecycle in three steps:
//!
//! 1. [`stage`](JobRunner::stage): validate the settings against the molecule,
//!    prepare the working directory and write `<label>.xyz` into it
//! 2. [`run`](JobRunner::run): resolve the executable and run
//!    `xtb <label>.xyz <flags...>` synchronously, stdout to `<label>.out` and
//!    stderr to `<label>.err`
//! 3. [`collect`](JobRunner::collect): copy whitelisted artifacts into the
//!    permanent job directory and parse them into an [`Output`]
//!
//! # Working Directory
//!
//! Without scratch, xtb runs directly in the permanent job directory, which
//! must be new or empty when the job is staged. With scratch, a fresh
//! temporary directory is created (under `scratch_dir`, or the system temp
//! directory) and removed once `run` fails or `collect` finishes, whatever
//! the outcome.
//!
//! # Exit Status
//!
//! A non-zero exit status is recorded on the job and logged but is not an
//! error: whether the job completed is decided by the transcript.
//!
//! # Concurrency
//!
//! The runner holds no mutable state. Jobs with distinct directories may be
//! run concurrently from several threads sharing one runner. Thread counts are
//! set on the child process environment only.

use crate::artifacts::{ArtifactCollector, ArtifactConfig, ArtifactError};
use crate::command;
use crate::config::ConfigurationError;
use crate::executable::{ExecutableNotFound, ExecutableResolver};
use crate::io;
use crate::job::{Job, JobFailure, JobState, WorkDir};
use crate::output::{self, Output, OutputError};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

/// Environment variables that carry the thread count to xtb.
pub const THREAD_ENV_VARS: [&str; 2] = ["OMP_NUM_THREADS", "MKL_NUM_THREADS"];

/// Category of a [`JobError`], kept on a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// [`JobError::Configuration`]
    Configuration,
    /// [`JobError::ExecutableNotFound`]
    ExecutableNotFound,
    /// [`JobError::Staging`]
    Staging,
    /// [`JobError::Execution`]
    Execution,
    /// [`JobError::ArtifactEscape`]
    ArtifactEscape,
    /// [`JobError::Collection`]
    Collection,
    /// [`JobError::Extraction`]
    Extraction,
    /// [`JobError::InvalidState`]
    InvalidState,
}

/// Errors raised while staging, running or collecting a job.
#[derive(Error, Debug)]
pub enum JobError {
    /// Settings are invalid or inconsistent with the molecule
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    /// xtb could not be found
    #[error(transparent)]
    ExecutableNotFound(#[from] ExecutableNotFound),
    /// The working directory or input geometry could not be prepared
    #[error("Staging failed: {0}")]
    Staging(String),
    /// The process could not be launched
    #[error("Failed to launch {}: {source}", .program.display())]
    Execution {
        /// Resolved executable
        program: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
    /// Artifacts whose destination would leave the job directory
    #[error(
        "Artifact(s) {} resolve outside {}; not written",
        .artifacts.join(", "),
        .directory.display()
    )]
    ArtifactEscape {
        /// Rejected artifact names
        artifacts: Vec<String>,
        /// Job directory they would have escaped
        directory: PathBuf,
    },
    /// Artifacts could not be copied
    #[error("Collection failed: {0}")]
    Collection(#[from] ArtifactError),
    /// The transcript could not be read
    #[error("Extraction failed: {0}")]
    Extraction(#[from] OutputError),
    /// Operation not allowed in the job's current state
    #[error("Cannot {operation} job '{label}' in state {state}")]
    InvalidState {
        /// Attempted operation
        operation: &'static str,
        /// Job label
        label: String,
        /// State the job was in
        state: JobState,
    },
}

impl JobError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Configuration(_) => ErrorKind::Configuration,
            JobError::ExecutableNotFound(_) => ErrorKind::ExecutableNotFound,
            JobError::Staging(_) => ErrorKind::Staging,
            JobError::Execution { .. } => ErrorKind::Execution,
            JobError::ArtifactEscape { .. } => ErrorKind::ArtifactEscape,
            JobError::Collection(_) => ErrorKind::Collection,
            JobError::Extraction(_) => ErrorKind::Extraction,
            JobError::InvalidState { .. } => ErrorKind::InvalidState,
        }
    }
}

/// Result type for runner operations
pub type Result<T> = std::result::Result<T, JobError>;

/// How jobs are executed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunnerOptions {
    /// Run in a temporary directory instead of the job directory
    pub scratch: bool,
    /// Parent of scratch directories (default: system temp directory)
    pub scratch_dir: Option<PathBuf>,
    /// Thread count for jobs whose settings do not specify one
    pub threads: Option<u32>,
    /// Files retrieved after the run
    pub artifacts: ArtifactConfig,
}

/// Stages, runs and collects xtb jobs.
pub struct JobRunner {
    resolver: ExecutableResolver,
    options: RunnerOptions,
}

impl JobRunner {
    /// Creates a runner using `resolver` to locate xtb.
    pub fn new(resolver: ExecutableResolver, options: RunnerOptions) -> Self {
        Self { resolver, options }
    }

    /// Execution options.
    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Executable resolver.
    pub fn resolver(&self) -> &ExecutableResolver {
        &self.resolver
    }

    /// Stages, runs and collects `job`.
    ///
    /// Returns the parsed output. A job whose transcript shows abnormal
    /// termination still returns its output, with the job left `Failed`.
    pub fn execute<'a>(&self, job: &'a mut Job) -> Result<&'a Output> {
        self.stage(job)?;
        self.run(job)?;
        self.collect(job)?;
        job.output.as_ref().ok_or_else(|| JobError::InvalidState {
            operation: "read output of",
            label: job.label.clone(),
            state: job.state,
        })
    }

    /// Prepares the working directory and writes the input geometry.
    ///
    /// Settings are checked first, so an invalid job leaves nothing on disk.
    ///
    /// # Errors
    ///
    /// - [`JobError::InvalidState`] unless the job is `Created` (job unchanged)
    /// - [`JobError::Configuration`] for invalid settings
    /// - [`JobError::Staging`] if the directory or the geometry file cannot be
    ///   written, or the job directory is not empty
    pub fn stage(&self, job: &mut Job) -> Result<()> {
        require_state(job, JobState::Created, "stage")?;

        match self.prepare(job) {
            Ok(workdir) => {
                info!(
                    "Staged job '{}' in {}",
                    job.label,
                    workdir.path().display()
                );
                job.workdir = Some(workdir);
                job.state = JobState::Staged;
                Ok(())
            }
            Err(e) => Err(fail(job, e)),
        }
    }

    fn prepare(&self, job: &Job) -> Result<WorkDir> {
        command::build_command_args_for(&job.settings, &job.molecule)?;
        check_label(&job.label)?;

        fs::create_dir_all(&job.folder).map_err(|e| {
            JobError::Staging(format!(
                "Cannot create job directory {}: {}",
                job.folder.display(),
                e
            ))
        })?;

        let workdir = if self.options.scratch {
            let parent = self
                .options
                .scratch_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir);
            fs::create_dir_all(&parent).map_err(|e| {
                JobError::Staging(format!(
                    "Cannot create scratch directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
            let dir = tempfile::Builder::new()
                .prefix(&format!("xtbrun-{}-", job.label))
                .tempdir_in(&parent)
                .map_err(|e| {
                    JobError::Staging(format!(
                        "Cannot create scratch directory in {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            debug!("Running in scratch directory: {}", dir.path().display());
            WorkDir::Scratch(dir)
        } else {
            let not_empty = fs::read_dir(&job.folder)
                .map(|mut entries| entries.next().is_some())
                .map_err(|e| JobError::Staging(e.to_string()))?;
            if not_empty {
                return Err(JobError::Staging(format!(
                    "Job directory {} is not empty",
                    job.folder.display()
                )));
            }
            WorkDir::InPlace(job.folder.clone())
        };

        let input = workdir.path().join(job.input_name());
        io::write_xyz(&job.molecule, &job.label, &input).map_err(|e| {
            JobError::Staging(format!(
                "Cannot write geometry to {}: {}",
                input.display(),
                e
            ))
        })?;
        debug!("Wrote input geometry: {}", input.display());

        Ok(workdir)
    }

    /// Runs xtb in the working directory of a staged job.
    ///
    /// On success the job is left `Running` with its exit code recorded,
    /// ready for [`collect`](Self::collect). On failure the job is marked
    /// `Failed`; in scratch mode, whatever can be salvaged is copied to the
    /// job directory and the scratch directory is removed.
    pub fn run(&self, job: &mut Job) -> Result<()> {
        require_state(job, JobState::Staged, "run")?;
        job.state = JobState::Running;

        match self.launch(job) {
            Ok(code) => {
                job.exit_code = code;
                match code {
                    Some(0) => debug!("xtb exited normally"),
                    Some(code) => warn!(
                        "xtb exited with status {} for job '{}'; judging termination from the transcript",
                        code, job.label
                    ),
                    None => warn!("xtb for job '{}' was terminated by a signal", job.label),
                }
                Ok(())
            }
            Err(e) => {
                if let Some(workdir) = job.workdir.take() {
                    if matches!(workdir, WorkDir::Scratch(_)) {
                        self.salvage(job, &workdir);
                    }
                    release(workdir);
                }
                Err(fail(job, e))
            }
        }
    }

    fn launch(&self, job: &Job) -> Result<Option<i32>> {
        let exe = self.resolver.resolve()?;
        info!("xtb executable: {}", exe.display());

        let args = command::build_command_args(&job.settings)?;
        let workdir = job
            .workdir
            .as_ref()
            .map(WorkDir::path)
            .ok_or_else(|| JobError::Staging("Job has no working directory".to_string()))?;

        let out_path = workdir.join(format!("{}.out", job.label));
        let err_path = workdir.join(format!("{}.err", job.label));
        let launch_error = |source: std::io::Error| JobError::Execution {
            program: exe.clone(),
            source,
        };
        let out = fs::File::create(&out_path).map_err(launch_error)?;
        let err = fs::File::create(&err_path).map_err(launch_error)?;

        let mut cmd = Command::new(&exe);
        cmd.arg(job.input_name())
            .args(&args)
            .current_dir(workdir)
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err));

        if let Some(threads) = job.settings.threads.or(self.options.threads) {
            for var in THREAD_ENV_VARS {
                cmd.env(var, threads.to_string());
            }
            debug!("Running with {} threads", threads);
        }

        info!(
            "Command executed: {} {} {}",
            exe.display(),
            job.input_name(),
            args.join(" ")
        );
        info!(
            "Writing output file to: {}\nAnd err file to: {}",
            out_path.display(),
            err_path.display()
        );

        let status = cmd.status().map_err(launch_error)?;
        Ok(status.code())
    }

    /// Copies artifacts to the job directory and parses the results.
    ///
    /// The job becomes `Completed` if the transcript shows normal termination
    /// and `Failed` otherwise; in both cases the output is kept on the job.
    ///
    /// # Errors
    ///
    /// - [`JobError::InvalidState`] unless `run` has finished (job unchanged)
    /// - [`JobError::ArtifactEscape`] if any artifact name would resolve
    ///   outside the job directory; the safe artifacts are still copied
    /// - [`JobError::Collection`] if copying fails
    /// - [`JobError::Extraction`] if the transcript cannot be read
    pub fn collect(&self, job: &mut Job) -> Result<()> {
        require_state(job, JobState::Running, "collect")?;

        let Some(workdir) = job.workdir.take() else {
            return Err(fail(
                job,
                JobError::Staging("Job has no working directory".to_string()),
            ));
        };

        let collector = ArtifactCollector::new(self.options.artifacts.clone());
        let report = collector.collect(&job.label, workdir.path(), &job.folder);
        release(workdir);

        let report = match report {
            Ok(report) => report,
            Err(e) => return Err(fail(job, e.into())),
        };

        let parsed = output::parse_transcript(&job.output_file(), &job.folder);

        if !report.is_clean() {
            if let Ok(output) = parsed {
                job.output = Some(output);
            }
            let err = JobError::ArtifactEscape {
                artifacts: report.rejected,
                directory: job.folder.clone(),
            };
            return Err(fail(job, err));
        }

        let output = match parsed {
            Ok(output) => output,
            Err(e) => return Err(fail(job, e.into())),
        };

        if output.normal_termination {
            info!("Job '{}' completed", job.label);
            job.state = JobState::Completed;
        } else {
            warn!(
                "Job '{}' did not terminate normally; see {}",
                job.label,
                job.output_file().display()
            );
            job.state = JobState::Failed;
        }
        job.output = Some(output);
        Ok(())
    }

    fn salvage(&self, job: &Job, workdir: &WorkDir) {
        let collector = ArtifactCollector::new(self.options.artifacts.clone());
        match collector.collect(&job.label, workdir.path(), &job.folder) {
            Ok(report) => debug!("Salvaged {} artifact(s)", report.copied.len()),
            Err(e) => warn!("Could not salvage artifacts of job '{}': {}", job.label, e),
        }
    }
}

fn require_state(job: &Job, expected: JobState, operation: &'static str) -> Result<()> {
    if job.state == expected {
        Ok(())
    } else {
        Err(JobError::InvalidState {
            operation,
            label: job.label.clone(),
            state: job.state,
        })
    }
}

/// Marks the job failed and hands the error back.
fn fail(job: &mut Job, err: JobError) -> JobError {
    error!("Job '{}' failed: {}", job.label, err);
    job.state = JobState::Failed;
    job.failure = Some(JobFailure {
        kind: err.kind(),
        message: err.to_string(),
    });
    err
}

/// Drops the working directory, removing it if it is a scratch directory.
fn release(workdir: WorkDir) {
    if let WorkDir::Scratch(dir) = workdir {
        let path = dir.path().to_path_buf();
        match dir.close() {
            Ok(()) => debug!("Removed scratch directory {}", path.display()),
            Err(e) => warn!("Failed to remove scratch directory {}: {}", path.display(), e),
        }
    }
}

/// A label must be a plain file name, since it names files in the job
/// directory.
fn check_label(label: &str) -> Result<()> {
    let mut components = Path::new(label).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if name == label => Ok(()),
        _ => Err(JobError::Staging(format!(
            "Invalid job label '{}': must be a plain file name",
            label
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Spin, XtbSettings};
    use crate::geometry::Geometry;
    use tempfile::TempDir;

    fn h2() -> Geometry {
        Geometry::new(
            vec!["H".to_string(), "H".to_string()],
            vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.74],
        )
    }

    fn runner(options: RunnerOptions) -> JobRunner {
        let empty = TempDir::new().unwrap();
        let resolver = ExecutableResolver::new("xtb-not-installed", None)
            .with_search_path(empty.path());
        JobRunner::new(resolver, options)
    }

    #[test]
    fn test_check_label() {
        assert!(check_label("water").is_ok());
        assert!(check_label("water.opt").is_ok());
        assert!(check_label("../water").is_err());
        assert!(check_label("a/b").is_err());
        assert!(check_label("").is_err());
        assert!(check_label("..").is_err());
    }

    #[test]
    fn test_stage_writes_geometry_in_place() {
        let root = TempDir::new().unwrap();
        let folder = root.path().join("h2");
        let mut job = Job::new(h2(), XtbSettings::default(), None, &folder);

        runner(RunnerOptions::default()).stage(&mut job).unwrap();
        assert_eq!(job.state(), JobState::Staged);
        assert_eq!(job.working_dir(), Some(folder.as_path()));
        assert!(folder.join("H2.xyz").exists());
    }

    #[test]
    fn test_invalid_spin_fails_before_touching_disk() {
        let root = TempDir::new().unwrap();
        let folder = root.path().join("h2");
        let settings = XtbSettings::default().with_spin(Spin::Multiplicity(2));
        let mut job = Job::new(h2(), settings, None, &folder);

        let err = runner(RunnerOptions::default()).stage(&mut job).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.failure().unwrap().kind, ErrorKind::Configuration);
        assert!(!folder.exists());
    }

    #[test]
    fn test_non_empty_job_directory_is_rejected() {
        let folder = TempDir::new().unwrap();
        fs::write(folder.path().join("old.out"), "previous run").unwrap();
        let mut job = Job::new(h2(), XtbSettings::default(), None, folder.path());

        let err = runner(RunnerOptions::default()).stage(&mut job).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Staging);
    }

    #[test]
    fn test_scratch_directory_is_removed_when_executable_missing() {
        let root = TempDir::new().unwrap();
        let scratch = root.path().join("scratch");
        let options = RunnerOptions {
            scratch: true,
            scratch_dir: Some(scratch.clone()),
            ..RunnerOptions::default()
        };
        let runner = runner(options);
        let mut job = Job::new(h2(), XtbSettings::default(), None, root.path().join("job"));

        runner.stage(&mut job).unwrap();
        assert!(job.uses_scratch());
        let workdir = job.working_dir().unwrap().to_path_buf();
        assert!(workdir.starts_with(&scratch));
        assert!(workdir.join("H2.xyz").exists());

        let err = runner.run(&mut job).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutableNotFound);
        assert_eq!(job.state(), JobState::Failed);
        assert!(!workdir.exists());
    }

    #[test]
    fn test_wrong_state_leaves_job_unchanged() {
        let root = TempDir::new().unwrap();
        let mut job = Job::new(h2(), XtbSettings::default(), None, root.path().join("job"));
        let runner = runner(RunnerOptions::default());

        let err = runner.run(&mut job).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(job.state(), JobState::Created);
        assert!(job.failure().is_none());

        assert!(runner.collect(&mut job).is_err());
        assert_eq!(job.state(), JobState::Created);
    }
}
