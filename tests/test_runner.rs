#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;
use xtbrun::artifacts::ArtifactConfig;
use xtbrun::config::{Method, Spin, Task, XtbSettings};
use xtbrun::executable::ExecutableResolver;
use xtbrun::geometry::Geometry;
use xtbrun::job::{Job, JobState};
use xtbrun::runner::{ErrorKind, JobRunner, RunnerOptions};

// Writing an executable while another test forks can make exec fail with ETXTBSY
static SERIAL: Mutex<()> = Mutex::new(());

const FAKE_XTB: &str = r#"#!/bin/sh
input="$1"
shift
echo "     |                           x T B                           |"
echo "   * xtb version 6.6.1 (fake)"
echo "   args: $*"
echo "   threads: ${OMP_NUM_THREADS:-unset}"
for arg in "$@"; do
  if [ "$arg" = "--opt" ]; then
    echo "   *** GEOMETRY OPTIMIZATION CONVERGED AFTER 3 ITERATIONS ***"
    cp "$input" xtbopt.xyz
  fi
done
echo "          | TOTAL ENERGY              -5.070544440612 Eh   |"
echo "   * finished run on 2024/01/01 at 12:00:00.000"
echo "fake stderr" >&2
echo "restart" > xtbrestart
exit 0
"#;

const CRASHING_XTB: &str = r##"#!/bin/sh
echo "   * xtb version 6.6.1 (fake)"
echo "          | TOTAL ENERGY              -5.0 Eh   |"
echo "#ERROR! SCF not converged" >&2
exit 3
"##;

const ABNORMAL_XTB: &str = r##"#!/bin/sh
echo "   * xtb version 6.6.1 (fake)"
echo "          | TOTAL ENERGY              -5.0 Eh   |"
echo "           -------------------------------------------------"
echo "          | abnormal termination of xtb"
exit 0
"##;

fn install(bin: &Path, script: &str) -> ExecutableResolver {
    let exe = bin.join("xtb");
    fs::write(&exe, script).unwrap();
    fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
    ExecutableResolver::new("xtb", None).with_search_path(bin)
}

fn water() -> Geometry {
    Geometry::new(
        vec!["O".to_string(), "H".to_string(), "H".to_string()],
        vec![0.0, 0.0, 0.117, 0.0, 0.757, -0.469, 0.0, -0.757, -0.469],
    )
}

fn opt_settings() -> XtbSettings {
    XtbSettings::new(Method::Gfn2, Task::Optimize)
}

#[test]
fn test_in_place_optimization() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let bin = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    let runner = JobRunner::new(install(bin.path(), FAKE_XTB), RunnerOptions::default());

    let folder = root.path().join("water_opt");
    let mut job = Job::new(water(), opt_settings(), Some("water".into()), &folder);
    let output = runner.execute(&mut job).unwrap().clone();

    assert_eq!(job.state(), JobState::Completed);
    assert_eq!(job.exit_code(), Some(0));
    assert!(job.failure().is_none());
    assert_eq!(output.energy, Some(-5.070544440612));
    assert_eq!(output.optimization_converged, Some(true));
    assert_eq!(output.optimized_geometry.unwrap().elements, water().elements);

    let transcript = fs::read_to_string(folder.join("water.out")).unwrap();
    assert!(transcript.contains("args: --opt --gfn 2 --chrg 0\n"));
    assert!(transcript.contains("threads: unset"));
    assert_eq!(fs::read_to_string(folder.join("water.err")).unwrap(), "fake stderr\n");
    assert!(folder.join("water.xyz").exists());
}

#[test]
fn test_scratch_run_copies_back_and_cleans_up() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let bin = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    let scratch = root.path().join("scratch");
    let options = RunnerOptions {
        scratch: true,
        scratch_dir: Some(scratch.clone()),
        threads: Some(2),
        artifacts: ArtifactConfig::default(),
    };
    let runner = JobRunner::new(install(bin.path(), FAKE_XTB), options);

    let folder = root.path().join("job");
    let settings = opt_settings().with_threads(4);
    let mut job = Job::new(water(), settings, Some("water".into()), &folder);
    runner.execute(&mut job).unwrap();

    assert_eq!(job.state(), JobState::Completed);
    assert!(job.working_dir().is_none());
    assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);

    assert!(folder.join("water.out").exists());
    assert!(folder.join("water.err").exists());
    assert!(folder.join("xtbopt.xyz").exists());
    assert!(!folder.join("xtbrestart").exists());
    assert!(!folder.join("water.xyz").exists());

    let transcript = fs::read_to_string(folder.join("water.out")).unwrap();
    assert!(transcript.contains("threads: 4"));
}

#[test]
fn test_nonzero_exit_is_recorded_not_raised() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let bin = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    let runner = JobRunner::new(install(bin.path(), CRASHING_XTB), RunnerOptions::default());

    let mut job = Job::new(water(), XtbSettings::default(), None, root.path().join("h2o"));
    runner.stage(&mut job).unwrap();
    runner.run(&mut job).unwrap();
    assert_eq!(job.state(), JobState::Running);
    assert_eq!(job.exit_code(), Some(3));

    runner.collect(&mut job).unwrap();
    assert_eq!(job.state(), JobState::Failed);
    assert!(job.failure().is_none());
    let output = job.output().unwrap();
    assert!(!output.normal_termination);
    assert_eq!(output.energy, Some(-5.0));
}

#[test]
fn test_abnormal_termination_with_zero_exit_fails_job() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let bin = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    let runner = JobRunner::new(install(bin.path(), ABNORMAL_XTB), RunnerOptions::default());

    let mut job = Job::new(water(), XtbSettings::default(), None, root.path().join("h2o"));
    let output = runner.execute(&mut job).unwrap();
    assert!(!output.normal_termination);
    assert_eq!(job.exit_code(), Some(0));
    assert_eq!(job.state(), JobState::Failed);
}

#[test]
fn test_escaping_artifact_is_rejected() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let bin = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    let options = RunnerOptions {
        scratch: true,
        scratch_dir: Some(root.path().join("scratch")),
        artifacts: ArtifactConfig::default()
            .with_extra(vec!["../../etc/passwd".to_string(), "../leak".to_string()]),
        ..RunnerOptions::default()
    };
    let runner = JobRunner::new(install(bin.path(), FAKE_XTB), options);

    let folder = root.path().join("nested").join("job");
    let mut job = Job::new(water(), opt_settings(), Some("water".into()), &folder);
    let err = runner.execute(&mut job).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ArtifactEscape);
    assert_eq!(job.state(), JobState::Failed);
    assert_eq!(job.failure().unwrap().kind, ErrorKind::ArtifactEscape);
    assert!(err.to_string().contains("../../etc/passwd"));

    // Safe artifacts were still collected and parsed
    assert!(folder.join("water.out").exists());
    assert!(job.output().is_some());
    assert!(!root.path().join("nested").join("leak").exists());
    assert!(!root.path().join("etc").exists());
    assert_eq!(fs::read_dir(root.path().join("scratch")).unwrap().count(), 0);
}

#[test]
fn test_missing_executable_fails_job() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let empty = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    let resolver = ExecutableResolver::new("xtb", Some(empty.path().join("nowhere")))
        .with_search_path(empty.path());
    let runner = JobRunner::new(resolver, RunnerOptions::default());

    let mut job = Job::new(water(), XtbSettings::default(), None, root.path().join("job"));
    runner.stage(&mut job).unwrap();
    let err = runner.run(&mut job).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExecutableNotFound);
    assert_eq!(job.state(), JobState::Failed);
    assert!(job.exit_code().is_none());
}

#[test]
fn test_configuration_error_before_launch() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let bin = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    let runner = JobRunner::new(install(bin.path(), FAKE_XTB), RunnerOptions::default());

    // Water has 10 electrons; a doublet is impossible
    let settings = XtbSettings::default().with_spin(Spin::Multiplicity(2));
    let folder = root.path().join("job");
    let mut job = Job::new(water(), settings, None, &folder);
    let err = runner.execute(&mut job).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(job.state(), JobState::Failed);
    assert!(!folder.exists());
}

#[test]
fn test_completed_job_cannot_run_again() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let bin = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    let runner = JobRunner::new(install(bin.path(), FAKE_XTB), RunnerOptions::default());

    let mut job = Job::new(water(), XtbSettings::default(), None, root.path().join("job"));
    runner.execute(&mut job).unwrap();
    assert_eq!(job.state(), JobState::Completed);

    for err in [
        runner.stage(&mut job).unwrap_err(),
        runner.run(&mut job).unwrap_err(),
        runner.collect(&mut job).unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }
    assert_eq!(job.state(), JobState::Completed);
    assert!(job.failure().is_none());
}

#[test]
fn test_override_path_is_used_when_not_on_path() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let bin = TempDir::new().unwrap();
    let empty = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    install(bin.path(), FAKE_XTB);
    let resolver =
        ExecutableResolver::new("xtb", Some(bin.path().to_path_buf())).with_search_path(empty.path());
    let runner = JobRunner::new(resolver, RunnerOptions::default());

    let mut job = Job::new(water(), XtbSettings::default(), None, root.path().join("job"));
    let output = runner.execute(&mut job).unwrap();
    assert!(output.normal_termination);
}
