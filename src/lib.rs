#![deny(missing_docs)]

//! xtbrun - Running and reading xtb calculations
//!
//! xtbrun drives the [xtb](https://github.com/grimme-lab/xtb) semi-empirical
//! quantum chemistry program. It turns typed calculation settings into an xtb
//! command line, runs the program in a managed working directory, retrieves
//! its output files safely, and parses the console transcript and auxiliary
//! files into a structured result.
//!
//! # Overview
//!
//! xtb is configured entirely by command-line flags and writes its results as
//! loose files next to the input geometry:
//!
//! ```text
//! xtb water.xyz --opt --gfn 2 --chrg 0 > water.out 2> water.err
//!     -> water.out, xtbopt.xyz, xtbopt.log, charges, wbo, ...
//! ```
//!
//! A calculation goes through three stages:
//!
//! 1. **Stage**: validate settings against the molecule, prepare the working
//!    directory (the job directory itself or a scratch directory) and write
//!    the input geometry
//! 2. **Run**: resolve the executable and run it synchronously
//! 3. **Collect**: copy whitelisted artifacts into the job directory and
//!    parse them into an [`Output`](output::Output)
//!
//! # Quick Start
//!
//! ```no_run
//! use xtbrun::config::{Method, Task, XtbSettings};
//! use xtbrun::job::Job;
//! use xtbrun::runner::JobRunner;
//! use xtbrun::settings::SettingsManager;
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = SettingsManager::load()?;
//!     let runner = JobRunner::new(manager.resolver(), manager.runner_options());
//!
//!     let molecule = xtbrun::io::read_xyz(Path::new("water.xyz"))?;
//!     let settings = XtbSettings::new(Method::Gfn2, Task::Optimize);
//!     let mut job = Job::new(molecule, settings, Some("water".into()), "water_opt");
//!
//!     let output = runner.execute(&mut job)?;
//!     println!("E = {:?} Eh, converged: {:?}", output.energy, output.optimization_converged);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`](config/index.html) - Calculation settings and validation
//! - [`command`](command/index.html) - xtb command-line construction
//! - [`executable`](executable/index.html) - Locating the xtb executable
//! - [`geometry`](geometry/index.html) - Molecular geometry and element data
//! - [`io`](io/index.html) - XYZ file reading and writing
//! - [`job`](job/index.html) - Jobs, lifecycle state and the job registry
//! - [`runner`](runner/index.html) - Staging, running and collecting jobs
//! - [`artifacts`](artifacts/index.html) - Safe retrieval of output files
//! - [`output`](output/index.html) - Result extraction
//! - [`settings`](settings/index.html) - Program configuration file
//!
//! # Version
//!
//! 0.1.0

/// Safe retrieval of xtb output files
pub mod artifacts;
/// xtb command-line construction
pub mod command;
/// Calculation settings and validation
pub mod config;
/// Locating the xtb executable
pub mod executable;
/// Molecular geometry and element data
pub mod geometry;
/// XYZ file reading and writing
pub mod io;
/// Jobs and their lifecycle
pub mod job;
/// Result extraction from xtb output
pub mod output;
/// Job execution
pub mod runner;
/// Configuration management system
pub mod settings;

pub use config::XtbSettings;
pub use geometry::Geometry;
pub use job::Job;
pub use output::Output;
pub use runner::JobRunner;
