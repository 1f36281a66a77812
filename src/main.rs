//! xtbrun Command-Line Interface
//!
//! This module contains the main entry point for the xtbrun program: it parses
//! command-line arguments, loads the configuration file, runs one xtb job and
//! writes the parsed results next to the xtb output.
//!
//! # Usage
//!
//! 1. **Run a calculation** (`xtbrun <geometry.xyz> [options]`):
//!    Runs xtb on the geometry and writes `<label>.json` in the job directory
//!
//! 2. **Settings template** (`xtbrun ci xtbrun_config.cfg`):
//!    Creates a commented configuration file in the current directory
//!
//! # Examples
//!
//! ```bash
//! # GFN2 optimization of water in implicit water
//! xtbrun water.xyz --task opt --alpb water
//!
//! # Triplet single point, run in a scratch directory
//! xtbrun o2.xyz --mult 3 --scratch
//!
//! # Create settings template
//! xtbrun ci xtbrun_config.cfg
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use xtbrun::config::{Method, Solvation, SolventModel, Spin, XtbSettings};
use xtbrun::job::Job;
use xtbrun::runner::{JobRunner, RunnerOptions};
use xtbrun::settings::{Settings, SettingsManager, CONFIG_FILE_NAME};
use xtbrun::{io, Output};

/// Options for one calculation, as given on the command line.
#[derive(Debug)]
struct CliOptions {
    geometry: PathBuf,
    settings: XtbSettings,
    label: Option<String>,
    directory: Option<PathBuf>,
    scratch: bool,
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        process::exit(1);
    }

    if args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(0);
    }

    let manager = SettingsManager::load().unwrap_or_else(|e| {
        eprintln!("Warning: could not load configuration, using defaults: {}", e);
        SettingsManager::from_settings(Settings::default())
    });

    // Initialize console logger for all commands
    env_logger::Builder::from_default_env()
        .filter_level(manager.settings().logging.level_filter())
        .target(env_logger::Target::Stdout)
        .format_timestamp_millis()
        .init();
    log::info!("Configuration loaded from: {}", manager.config_source());

    match args[1].as_str() {
        "ci" => {
            let file_arg = args.get(2).map(String::as_str).unwrap_or(CONFIG_FILE_NAME);
            match SettingsManager::create_template(Path::new(file_arg)) {
                Ok(()) => {
                    println!("✓ Settings template created successfully!");
                    println!("  Output file: {}", file_arg);
                    println!("\nNext steps:");
                    println!("  1. Review and edit the {} file", file_arg);
                    println!("  2. Set the xtb path if xtb is not on your PATH");
                    println!("  3. The settings will be automatically loaded by xtbrun");
                }
                Err(e) => {
                    eprintln!("Error creating settings template: {}", e);
                    process::exit(1);
                }
            }
        }
        command if command.starts_with('-') => {
            eprintln!("Error: Unknown command: {}", command);
            print_usage(&args[0]);
            process::exit(1);
        }
        _ => {
            let options = match parse_args(&args[1..]) {
                Ok(options) => options,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    print_usage(&args[0]);
                    process::exit(1);
                }
            };
            match run_job(&manager, options) {
                Ok(output) => {
                    if !output.normal_termination {
                        eprintln!("xtb did not terminate normally");
                        process::exit(2);
                    }
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                }
            }
        }
    }
}

/// Parses the arguments of a calculation, starting with the geometry file.
fn parse_args(args: &[String]) -> Result<CliOptions, String> {
    let mut iter = args.iter();
    let geometry = iter
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| "Missing geometry file".to_string())?;

    let mut settings = XtbSettings::default();
    let mut label = None;
    let mut directory = None;
    let mut scratch = false;
    let mut solvation: Option<Solvation> = None;

    while let Some(flag) = iter.next() {
        let mut value = || {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("Missing value for {}", flag))
        };
        match flag.as_str() {
            "--task" => settings.task = value()?.parse().map_err(to_string)?,
            "--gfn" => settings.method = value()?.parse().map_err(to_string)?,
            "--gfnff" => settings.method = Method::GfnFf,
            "--chrg" => settings.charge = parse_number(flag, &value()?)?,
            "--uhf" => settings.spin = Spin::Unpaired(parse_number(flag, &value()?)?),
            "--mult" => settings.spin = Spin::Multiplicity(parse_number(flag, &value()?)?),
            "--alpb" | "--gbsa" => {
                let model: SolventModel = flag[2..].parse().map_err(to_string)?;
                solvation = Some(Solvation::new(model, value()?));
            }
            "--level" => settings.opt_level = Some(value()?.parse().map_err(to_string)?),
            "--acc" => settings.accuracy = Some(parse_number(flag, &value()?)?),
            "--etemp" => settings.electronic_temp = Some(parse_number(flag, &value()?)?),
            "--iterations" => settings.max_iterations = Some(parse_number(flag, &value()?)?),
            "--threads" => settings.threads = Some(parse_number(flag, &value()?)?),
            "--options" => settings.additional_options = Some(value()?),
            "--label" => label = Some(value()?),
            "--dir" => directory = Some(PathBuf::from(value()?)),
            "--scratch" => scratch = true,
            other => return Err(format!("Unknown option: {}", other)),
        }
    }
    settings.solvation = solvation;

    Ok(CliOptions {
        geometry,
        settings,
        label,
        directory,
        scratch,
    })
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("Invalid value for {}: {}", flag, value))
}

fn to_string(e: impl std::fmt::Display) -> String {
    e.to_string()
}

/// Runs one job and writes `<label>.json` into its directory.
fn run_job(
    manager: &SettingsManager,
    options: CliOptions,
) -> Result<Output, Box<dyn std::error::Error>> {
    let molecule = io::read_xyz(&options.geometry)?;
    log::info!(
        "Read {} atoms from {}",
        molecule.num_atoms,
        options.geometry.display()
    );

    let label = options.label.or_else(|| {
        options
            .geometry
            .file_stem()
            .and_then(|s| s.to_str())
            .map(String::from)
    });
    let label_for_dir = label.clone().unwrap_or_else(|| molecule.chemical_formula());
    let directory = options
        .directory
        .unwrap_or_else(|| PathBuf::from(format!("{}_{}", label_for_dir, options.settings.task)));

    let mut runner_options: RunnerOptions = manager.runner_options();
    runner_options.scratch |= options.scratch;
    let runner = JobRunner::new(manager.resolver(), runner_options);

    let mut job = Job::new(molecule, options.settings, label, directory);
    println!(
        "Running {} job '{}' in {}",
        job.settings().task,
        job.label(),
        job.folder().display()
    );

    let result = runner.execute(&mut job).map(|output| output.clone());

    if let Some(output) = job.output() {
        let json_path = job.folder().join(format!("{}.json", job.label()));
        fs::write(&json_path, serde_json::to_string_pretty(output)?)?;
        println!("Results written to: {}", json_path.display());
        print_summary(output);
    }

    Ok(result?)
}

fn print_summary(output: &Output) {
    println!();
    println!(" Normal termination: {}", if output.normal_termination { "YES" } else { "NO" });
    if let Some(energy) = output.energy {
        println!(" Total energy:       {:>18.10} Eh", energy);
    }
    if let Some(gap) = output.homo_lumo_gap {
        println!(" HOMO-LUMO gap:      {:>18.6} eV", gap);
    }
    if let Some(converged) = output.optimization_converged {
        println!(" Optimization:       {}", if converged { "converged" } else { "NOT converged" });
    }
    if let Some(freqs) = &output.frequencies {
        let imaginary = freqs.iter().filter(|&&f| f < 0.0).count();
        println!(" Frequencies:        {} ({} imaginary)", freqs.len(), imaginary);
    }
    if let Some(total) = output.dipole_total {
        println!(" Dipole moment:      {:>18.4} Debye", total);
    }
}

/// Prints usage information to stderr.
fn print_usage(program_name: &str) {
    eprintln!("xtbrun - run xtb calculations and collect their results");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  {} <geometry.xyz> [options]", program_name);
    eprintln!("                    Run xtb and write <label>.json with the parsed results");
    eprintln!();
    eprintln!("  {} ci {}", program_name, CONFIG_FILE_NAME);
    eprintln!("                    Create a settings template file for configuration");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --task <sp|opt|freq|ohess>   Calculation type (default: sp)");
    eprintln!("  --gfn <0|1|2|ff>             Method (default: 2)");
    eprintln!("  --gfnff                      GFN-FF force field");
    eprintln!("  --chrg <N>                   Molecular charge (default: 0)");
    eprintln!("  --uhf <N> | --mult <M>       Unpaired electrons or multiplicity");
    eprintln!("  --alpb <S> | --gbsa <S>      Implicit solvation in solvent S");
    eprintln!("  --level <L>                  Optimization level (crude ... extreme)");
    eprintln!("  --acc <X>                    Numerical accuracy");
    eprintln!("  --etemp <T>                  Electronic temperature (K)");
    eprintln!("  --iterations <N>             Maximum iterations");
    eprintln!("  --threads <N>                OpenMP threads");
    eprintln!("  --options \"<flags>\"          Extra xtb flags, passed through");
    eprintln!("  --label <L>                  Job label (default: geometry file name)");
    eprintln!("  --dir <D>                    Job directory (default: <label>_<task>)");
    eprintln!("  --scratch                    Run in a temporary scratch directory");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} water.xyz --task opt --alpb water", program_name);
    eprintln!("  {} o2.xyz --mult 3 --scratch", program_name);
    eprintln!("  {} ci {}", program_name, CONFIG_FILE_NAME);
}

#[cfg(test)]
mod tests {
    use super::*;
    use xtbrun::config::{OptLevel, Task};

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_full_command_line() {
        let options = parse_args(&args(&[
            "water.xyz", "--task", "opt", "--gfn", "1", "--chrg", "-1", "--mult", "2", "--alpb",
            "water", "--level", "vtight", "--label", "w", "--scratch",
        ]))
        .unwrap();
        assert_eq!(options.geometry, PathBuf::from("water.xyz"));
        assert_eq!(options.settings.task, Task::Optimize);
        assert_eq!(options.settings.method, Method::Gfn1);
        assert_eq!(options.settings.charge, -1);
        assert_eq!(options.settings.spin, Spin::Multiplicity(2));
        assert_eq!(
            options.settings.solvation,
            Some(Solvation::new(SolventModel::Alpb, "water"))
        );
        assert_eq!(options.settings.opt_level, Some(OptLevel::VeryTight));
        assert_eq!(options.label.as_deref(), Some("w"));
        assert!(options.scratch);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["a.xyz", "--chrg"])).is_err());
        assert!(parse_args(&args(&["a.xyz", "--chrg", "x"])).is_err());
        assert!(parse_args(&args(&["a.xyz", "--bogus"])).is_err());
        assert!(parse_args(&args(&["a.xyz", "--task", "md"])).is_err());
    }
}
