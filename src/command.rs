//! Command-line construction for xtb.
//!
//! xtb is configured entirely through command-line flags; the only file it
//! reads is the coordinate file given as the first argument. This module turns
//! an [`XtbSettings`] value into the ordered flag list that follows that
//! argument. It performs no I/O.
//!
//! # Token order
//!
//! The order is fixed and does not depend on how the settings were assembled:
//!
//! 1. task flag (`--opt`, `--hess`, `--ohess`) and, for optimizing tasks, a
//!    non-default convergence tier
//! 2. method (`--gfn N` or `--gfnff`)
//! 3. `--chrg C`
//! 4. `--uhf U`, only when there are unpaired electrons
//! 5. solvation model selector followed by the solvent name
//! 6. `--acc`, `--etemp`, `--iterations`
//! 7. additional options, verbatim
//!
//! # Examples
//!
//! ```
//! use xtbrun::command::build_command_args;
//! use xtbrun::config::{Method, Task, XtbSettings};
//!
//! let settings = XtbSettings::new(Method::Gfn2, Task::Optimize);
//! let args = build_command_args(&settings).unwrap();
//! assert_eq!(args, ["--opt", "--gfn", "2", "--chrg", "0"]);
//! ```

use crate::config::{OptLevel, Result, XtbSettings};
use crate::geometry::Geometry;

/// Builds the xtb flag list for the given settings.
///
/// Settings are validated first (see [`XtbSettings::validate`]); spin given as
/// a multiplicity is converted to unpaired electrons.
pub fn build_command_args(settings: &XtbSettings) -> Result<Vec<String>> {
    settings.validate()?;

    let mut args: Vec<String> = Vec::new();

    // === 1. Task ===
    if let Some(flag) = settings.task.flag() {
        args.push(flag.to_string());
        if settings.task.optimizes() {
            match settings.opt_level {
                Some(level) if level != OptLevel::Normal => args.push(level.keyword().to_string()),
                _ => {}
            }
        }
    }

    // === 2. Method ===
    match settings.method.gfn_version() {
        Some(version) => {
            args.push("--gfn".to_string());
            args.push(version.to_string());
        }
        None => args.push("--gfnff".to_string()),
    }

    // === 3. Charge and spin ===
    args.push("--chrg".to_string());
    args.push(settings.charge.to_string());

    let unpaired = settings.spin.unpaired()?;
    if unpaired != 0 {
        args.push("--uhf".to_string());
        args.push(unpaired.to_string());
    }

    // === 4. Solvation ===
    if let Some(solvation) = &settings.solvation {
        args.push(solvation.model.flag().to_string());
        args.push(solvation.solvent.trim().to_string());
    }

    // === 5. Numerical options ===
    if let Some(acc) = settings.accuracy {
        args.push("--acc".to_string());
        args.push(acc.to_string());
    }
    if let Some(etemp) = settings.electronic_temp {
        args.push("--etemp".to_string());
        args.push(etemp.to_string());
    }
    if let Some(iterations) = settings.max_iterations {
        args.push("--iterations".to_string());
        args.push(iterations.to_string());
    }

    // === 6. Pass-through ===
    if let Some(extra) = &settings.additional_options {
        args.extend(extra.split_whitespace().map(str::to_string));
    }

    Ok(args)
}

/// Builds the flag list after checking the settings against the molecule.
///
/// Fails with a [`ConfigurationError`](crate::config::ConfigurationError) if
/// charge and spin are inconsistent with the molecule's electron count.
pub fn build_command_args_for(settings: &XtbSettings, molecule: &Geometry) -> Result<Vec<String>> {
    settings.validate_for(molecule)?;
    build_command_args(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigurationError, Method, Solvation, SolventModel, Spin, Task};

    #[test]
    fn test_single_point_has_no_task_flag() {
        let args = build_command_args(&XtbSettings::default()).unwrap();
        assert_eq!(args, ["--gfn", "2", "--chrg", "0"]);
    }

    #[test]
    fn test_method_flags() {
        let gfn1 = XtbSettings::new(Method::Gfn1, Task::SinglePoint);
        assert_eq!(build_command_args(&gfn1).unwrap()[..2], ["--gfn", "1"]);

        let gfn0 = XtbSettings::new(Method::Gfn0, Task::SinglePoint);
        assert_eq!(build_command_args(&gfn0).unwrap()[..2], ["--gfn", "0"]);

        let ff = XtbSettings::new(Method::GfnFf, Task::SinglePoint);
        assert_eq!(build_command_args(&ff).unwrap(), ["--gfnff", "--chrg", "0"]);
    }

    #[test]
    fn test_opt_level_only_for_optimizing_tasks() {
        let opt = XtbSettings::new(Method::Gfn2, Task::Optimize).with_opt_level(OptLevel::Tight);
        assert_eq!(
            build_command_args(&opt).unwrap(),
            ["--opt", "tight", "--gfn", "2", "--chrg", "0"]
        );

        let ohess = opt.clone().with_task(Task::OptimizeFrequency);
        assert_eq!(build_command_args(&ohess).unwrap()[..2], ["--ohess", "tight"]);

        let sp = opt.clone().with_task(Task::SinglePoint);
        assert_eq!(build_command_args(&sp).unwrap(), ["--gfn", "2", "--chrg", "0"]);

        let hess = opt.with_task(Task::Frequency);
        assert_eq!(
            build_command_args(&hess).unwrap(),
            ["--hess", "--gfn", "2", "--chrg", "0"]
        );
    }

    #[test]
    fn test_default_opt_level_is_omitted() {
        let opt = XtbSettings::new(Method::Gfn2, Task::Optimize).with_opt_level(OptLevel::Normal);
        assert_eq!(
            build_command_args(&opt).unwrap(),
            ["--opt", "--gfn", "2", "--chrg", "0"]
        );
    }

    #[test]
    fn test_numeric_and_extra_options_come_last() {
        let settings = XtbSettings::default()
            .with_additional_options("--vparam  custom.param")
            .with_max_iterations(500)
            .with_electronic_temp(1000.0)
            .with_accuracy(0.5);
        assert_eq!(
            build_command_args(&settings).unwrap(),
            [
                "--gfn",
                "2",
                "--chrg",
                "0",
                "--acc",
                "0.5",
                "--etemp",
                "1000",
                "--iterations",
                "500",
                "--vparam",
                "custom.param"
            ]
        );
    }

    #[test]
    fn test_threads_do_not_appear_on_command_line() {
        let settings = XtbSettings::default().with_threads(8);
        let args = build_command_args(&settings).unwrap();
        assert!(!args.iter().any(|a| a.contains("parallel") || a == "8"));
    }

    #[test]
    fn test_gbsa_solvation() {
        let settings = XtbSettings::default()
            .with_solvation(Solvation::new(SolventModel::Gbsa, " methanol "));
        assert_eq!(
            build_command_args(&settings).unwrap(),
            ["--gfn", "2", "--chrg", "0", "--gbsa", "methanol"]
        );
    }

    #[test]
    fn test_zero_multiplicity_is_rejected() {
        let settings = XtbSettings::default().with_spin(Spin::Multiplicity(0));
        assert_eq!(
            build_command_args(&settings),
            Err(ConfigurationError::InvalidMultiplicity(0))
        );
    }

    #[test]
    fn test_build_for_molecule_checks_parity() {
        let h2 = Geometry::new(
            vec!["H".to_string(), "H".to_string()],
            vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.74],
        );
        let triplet = XtbSettings::default().with_spin(Spin::Multiplicity(3));
        assert_eq!(
            build_command_args_for(&triplet, &h2).unwrap(),
            ["--gfn", "2", "--chrg", "0", "--uhf", "2"]
        );

        let doublet = XtbSettings::default().with_spin(Spin::Multiplicity(2));
        assert!(matches!(
            build_command_args_for(&doublet, &h2),
            Err(ConfigurationError::SpinParity { .. })
        ));
    }
}
