//! Calculation settings for xtb jobs.
//!
//! [`XtbSettings`] is the declarative description of one xtb calculation:
//! which Hamiltonian to use, what to do with the structure, charge and spin,
//! implicit solvation and a handful of numerical knobs. Settings are plain
//! values; they are validated when turned into command-line arguments (see
//! [`crate::command`]) and, once the molecule is known, by
//! [`XtbSettings::validate_for`].
//!
//! # Spin conventions
//!
//! Chemists usually give the spin multiplicity `M = 2S + 1`, while xtb expects
//! the number of unpaired electrons `U` (`--uhf`). The two are related by
//! `U = M - 1`. [`Spin`] accepts either form and always hands xtb the unpaired
//! count.
//!
//! # Examples
//!
//! ```
//! use xtbrun::config::{Method, OptLevel, Solvation, SolventModel, Spin, Task, XtbSettings};
//!
//! let settings = XtbSettings::new(Method::Gfn2, Task::Optimize)
//!     .with_charge(-1)
//!     .with_spin(Spin::Multiplicity(2))
//!     .with_solvation(Solvation::new(SolventModel::Alpb, "water"))
//!     .with_opt_level(OptLevel::Tight);
//!
//! assert_eq!(settings.spin.unpaired().unwrap(), 1);
//! ```

use crate::geometry::Geometry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Invalid or physically inconsistent calculation settings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// A multiplicity of zero has no unpaired-electron equivalent
    #[error("Invalid multiplicity {0}: multiplicity must be at least 1")]
    InvalidMultiplicity(u32),
    /// Unpaired electron count with no representable multiplicity
    #[error("Invalid number of unpaired electrons {0}: multiplicity would overflow")]
    UnpairedOutOfRange(u32),
    /// Electron count and unpaired electrons have different parity
    #[error(
        "{electrons} electrons cannot have {unpaired} unpaired electrons \
         (multiplicity {multiplicity}); check charge and spin"
    )]
    SpinParity {
        /// Total number of electrons
        electrons: i64,
        /// Requested unpaired electrons
        unpaired: u32,
        /// Equivalent multiplicity
        multiplicity: u32,
    },
    /// More unpaired electrons than electrons
    #[error("{unpaired} unpaired electrons requested but the molecule only has {electrons} electrons")]
    TooManyUnpaired {
        /// Total number of electrons
        electrons: i64,
        /// Requested unpaired electrons
        unpaired: u32,
    },
    /// Charge removes more electrons than the molecule has
    #[error("Charge {charge} leaves a negative electron count ({electrons})")]
    NegativeElectronCount {
        /// Molecular charge
        charge: i32,
        /// Resulting electron count
        electrons: i64,
    },
    /// Geometry contains a symbol that is not an element
    #[error("Unknown element symbol '{0}'")]
    UnknownElement(String),
    /// Solvation requested with an empty solvent name
    #[error("Solvation model {0} requires a solvent name")]
    EmptySolvent(SolventModel),
    /// Numerical accuracy must be positive
    #[error("Invalid accuracy {0}: must be a positive number")]
    InvalidAccuracy(f64),
    /// Electronic temperature must be positive
    #[error("Invalid electronic temperature {0} K: must be positive")]
    InvalidElectronicTemperature(f64),
    /// Thread count of zero
    #[error("Thread count must be at least 1")]
    InvalidThreads,
    /// Iteration limit of zero
    #[error("Maximum iterations must be at least 1")]
    InvalidIterations,
    /// Unrecognised keyword while parsing a settings value
    #[error("Unknown {kind} '{value}'")]
    UnknownKeyword {
        /// Which setting was being parsed
        kind: &'static str,
        /// The rejected value
        value: String,
    },
}

/// Result type for settings validation
pub type Result<T> = std::result::Result<T, ConfigurationError>;

/// xtb Hamiltonian variants.
///
/// | Variant | Flag | Notes |
/// |---------|------|-------|
/// | `Gfn0` | `--gfn 0` | Non-self-consistent, fastest |
/// | `Gfn1` | `--gfn 1` | Original GFN-xTB |
/// | `Gfn2` | `--gfn 2` | Default, multipole electrostatics |
/// | `GfnFf` | `--gfnff` | Force field |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Method {
    /// GFN0-xTB
    Gfn0,
    /// GFN1-xTB
    Gfn1,
    /// GFN2-xTB
    #[default]
    Gfn2,
    /// GFN-FF force field
    GfnFf,
}

impl Method {
    /// Version argument passed after `--gfn`, or `None` for GFN-FF.
    pub fn gfn_version(self) -> Option<&'static str> {
        match self {
            Method::Gfn0 => Some("0"),
            Method::Gfn1 => Some("1"),
            Method::Gfn2 => Some("2"),
            Method::GfnFf => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Gfn0 => "GFN0-xTB",
            Method::Gfn1 => "GFN1-xTB",
            Method::Gfn2 => "GFN2-xTB",
            Method::GfnFf => "GFN-FF",
        };
        f.write_str(name)
    }
}

impl FromStr for Method {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace(&['-', '_'][..], "").as_str() {
            "gfn0xtb" | "gfn0" | "0" => Ok(Method::Gfn0),
            "gfn1xtb" | "gfn1" | "1" => Ok(Method::Gfn1),
            "gfn2xtb" | "gfn2" | "2" => Ok(Method::Gfn2),
            "gfnff" | "ff" => Ok(Method::GfnFf),
            _ => Err(ConfigurationError::UnknownKeyword {
                kind: "method",
                value: s.to_string(),
            }),
        }
    }
}

/// What xtb should do with the structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Task {
    /// Energy at the input geometry (no task flag)
    #[default]
    SinglePoint,
    /// Geometry optimization (`--opt`)
    Optimize,
    /// Hessian and harmonic frequencies (`--hess`)
    Frequency,
    /// Optimization followed by frequencies (`--ohess`)
    OptimizeFrequency,
}

impl Task {
    /// Whether the task includes a geometry optimization.
    pub fn optimizes(self) -> bool {
        matches!(self, Task::Optimize | Task::OptimizeFrequency)
    }

    /// Whether the task computes vibrational frequencies.
    pub fn has_frequencies(self) -> bool {
        matches!(self, Task::Frequency | Task::OptimizeFrequency)
    }

    /// Command-line flag for the task, `None` for single points.
    pub fn flag(self) -> Option<&'static str> {
        match self {
            Task::SinglePoint => None,
            Task::Optimize => Some("--opt"),
            Task::Frequency => Some("--hess"),
            Task::OptimizeFrequency => Some("--ohess"),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Task::SinglePoint => "sp",
            Task::Optimize => "opt",
            Task::Frequency => "freq",
            Task::OptimizeFrequency => "ohess",
        };
        f.write_str(name)
    }
}

impl FromStr for Task {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sp" | "singlepoint" | "single-point" | "energy" => Ok(Task::SinglePoint),
            "opt" | "optimize" | "optimization" => Ok(Task::Optimize),
            "freq" | "frequency" | "hess" => Ok(Task::Frequency),
            "ohess" | "opt+freq" | "optfreq" => Ok(Task::OptimizeFrequency),
            _ => Err(ConfigurationError::UnknownKeyword {
                kind: "task",
                value: s.to_string(),
            }),
        }
    }
}

/// Spin state, given either as multiplicity or as unpaired electrons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Spin {
    /// Spin multiplicity `2S + 1`
    Multiplicity(u32),
    /// Number of unpaired electrons (xtb's `--uhf`)
    Unpaired(u32),
}

impl Default for Spin {
    fn default() -> Self {
        Spin::Unpaired(0)
    }
}

impl Spin {
    /// Number of unpaired electrons, converting from multiplicity if needed.
    ///
    /// ```
    /// use xtbrun::config::Spin;
    ///
    /// assert_eq!(Spin::Multiplicity(3).unpaired().unwrap(), 2);
    /// assert!(Spin::Multiplicity(0).unpaired().is_err());
    /// ```
    pub fn unpaired(self) -> Result<u32> {
        match self {
            Spin::Unpaired(u) => Ok(u),
            Spin::Multiplicity(0) => Err(ConfigurationError::InvalidMultiplicity(0)),
            Spin::Multiplicity(m) => Ok(m - 1),
        }
    }

    /// Spin multiplicity, converting from unpaired electrons if needed.
    pub fn multiplicity(self) -> Result<u32> {
        let unpaired = self.unpaired()?;
        unpaired
            .checked_add(1)
            .ok_or(ConfigurationError::UnpairedOutOfRange(unpaired))
    }

    /// The same spin state expressed as unpaired electrons.
    pub fn to_unpaired(self) -> Result<Spin> {
        self.unpaired().map(Spin::Unpaired)
    }

    /// The same spin state expressed as a multiplicity.
    pub fn to_multiplicity(self) -> Result<Spin> {
        self.multiplicity().map(Spin::Multiplicity)
    }
}

/// Implicit solvation models supported by xtb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SolventModel {
    /// Generalized Born with surface area (`--gbsa`)
    Gbsa,
    /// Analytical linearized Poisson-Boltzmann (`--alpb`)
    Alpb,
}

impl SolventModel {
    /// Command-line selector for the model.
    pub fn flag(self) -> &'static str {
        match self {
            SolventModel::Gbsa => "--gbsa",
            SolventModel::Alpb => "--alpb",
        }
    }
}

impl fmt::Display for SolventModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolventModel::Gbsa => f.write_str("gbsa"),
            SolventModel::Alpb => f.write_str("alpb"),
        }
    }
}

impl FromStr for SolventModel {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gbsa" => Ok(SolventModel::Gbsa),
            "alpb" => Ok(SolventModel::Alpb),
            _ => Err(ConfigurationError::UnknownKeyword {
                kind: "solvent model",
                value: s.to_string(),
            }),
        }
    }
}

/// Implicit solvent: a model plus the solvent name xtb knows it by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Solvation {
    /// Continuum model
    pub model: SolventModel,
    /// Solvent identifier, e.g. `water`, `methanol`, `thf`
    pub solvent: String,
}

impl Solvation {
    /// Creates a solvation specification.
    pub fn new(model: SolventModel, solvent: impl Into<String>) -> Self {
        Self {
            model,
            solvent: solvent.into(),
        }
    }
}

/// Geometry optimization convergence tiers, loosest first.
///
/// The derived ordering follows strictness: `Crude < ... < Extreme`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum OptLevel {
    /// `crude`
    Crude,
    /// `sloppy`
    Sloppy,
    /// `loose`
    Loose,
    /// `lax`
    Lax,
    /// `normal`, xtb's default
    #[default]
    Normal,
    /// `tight`
    Tight,
    /// `vtight`
    VeryTight,
    /// `extreme`
    Extreme,
}

impl OptLevel {
    /// All tiers, loosest to tightest.
    pub const ALL: [OptLevel; 8] = [
        OptLevel::Crude,
        OptLevel::Sloppy,
        OptLevel::Loose,
        OptLevel::Lax,
        OptLevel::Normal,
        OptLevel::Tight,
        OptLevel::VeryTight,
        OptLevel::Extreme,
    ];

    /// Keyword xtb expects after `--opt`/`--ohess`.
    pub fn keyword(self) -> &'static str {
        match self {
            OptLevel::Crude => "crude",
            OptLevel::Sloppy => "sloppy",
            OptLevel::Loose => "loose",
            OptLevel::Lax => "lax",
            OptLevel::Normal => "normal",
            OptLevel::Tight => "tight",
            OptLevel::VeryTight => "vtight",
            OptLevel::Extreme => "extreme",
        }
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for OptLevel {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        OptLevel::ALL
            .into_iter()
            .find(|level| {
                level.keyword() == wanted
                    || (wanted == "verytight" && *level == OptLevel::VeryTight)
            })
            .ok_or_else(|| ConfigurationError::UnknownKeyword {
                kind: "optimization level",
                value: s.to_string(),
            })
    }
}

/// Complete description of one xtb calculation.
///
/// Fields that do not apply to the chosen task (e.g. an optimization level on
/// a single point) are ignored when the command line is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct XtbSettings {
    /// Hamiltonian
    pub method: Method,
    /// Calculation type
    pub task: Task,
    /// Total molecular charge
    pub charge: i32,
    /// Spin state
    pub spin: Spin,
    /// Implicit solvation, if any
    pub solvation: Option<Solvation>,
    /// Optimization convergence tier (optimizing tasks only)
    pub opt_level: Option<OptLevel>,
    /// Numerical accuracy factor (`--acc`)
    pub accuracy: Option<f64>,
    /// Electronic temperature in Kelvin (`--etemp`)
    pub electronic_temp: Option<f64>,
    /// Maximum SCC/optimization iterations (`--iterations`)
    pub max_iterations: Option<u32>,
    /// Threads handed to xtb through the OpenMP environment
    pub threads: Option<u32>,
    /// Extra command-line options appended verbatim (whitespace separated)
    pub additional_options: Option<String>,
}

impl XtbSettings {
    /// Neutral closed-shell settings for the given method and task.
    pub fn new(method: Method, task: Task) -> Self {
        Self {
            method,
            task,
            ..Self::default()
        }
    }

    /// Sets the molecular charge.
    pub fn with_charge(mut self, charge: i32) -> Self {
        self.charge = charge;
        self
    }

    /// Sets the spin state.
    pub fn with_spin(mut self, spin: Spin) -> Self {
        self.spin = spin;
        self
    }

    /// Enables implicit solvation.
    pub fn with_solvation(mut self, solvation: Solvation) -> Self {
        self.solvation = Some(solvation);
        self
    }

    /// Sets the optimization convergence tier.
    pub fn with_opt_level(mut self, level: OptLevel) -> Self {
        self.opt_level = Some(level);
        self
    }

    /// Sets the numerical accuracy factor.
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    /// Sets the electronic temperature (K).
    pub fn with_electronic_temp(mut self, kelvin: f64) -> Self {
        self.electronic_temp = Some(kelvin);
        self
    }

    /// Sets the iteration limit.
    pub fn with_max_iterations(mut self, iterations: u32) -> Self {
        self.max_iterations = Some(iterations);
        self
    }

    /// Sets the thread count.
    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Appends free-form options to the command line.
    pub fn with_additional_options(mut self, options: impl Into<String>) -> Self {
        self.additional_options = Some(options.into());
        self
    }

    /// Same settings with a different task.
    pub fn with_task(mut self, task: Task) -> Self {
        self.task = task;
        self
    }

    /// Checks settings that can be judged without a molecule.
    pub fn validate(&self) -> Result<()> {
        self.spin.unpaired()?;

        if let Some(solvation) = &self.solvation {
            if solvation.solvent.trim().is_empty() {
                return Err(ConfigurationError::EmptySolvent(solvation.model));
            }
        }
        if let Some(acc) = self.accuracy {
            if !(acc.is_finite() && acc > 0.0) {
                return Err(ConfigurationError::InvalidAccuracy(acc));
            }
        }
        if let Some(etemp) = self.electronic_temp {
            if !(etemp.is_finite() && etemp > 0.0) {
                return Err(ConfigurationError::InvalidElectronicTemperature(etemp));
            }
        }
        if self.threads == Some(0) {
            return Err(ConfigurationError::InvalidThreads);
        }
        if self.max_iterations == Some(0) {
            return Err(ConfigurationError::InvalidIterations);
        }
        Ok(())
    }

    /// Checks the settings against the molecule they will be applied to.
    ///
    /// In addition to [`validate`](Self::validate), the electron count
    /// (`sum(Z) - charge`) must be non-negative, at least the number of
    /// unpaired electrons, and of the same parity.
    pub fn validate_for(&self, molecule: &Geometry) -> Result<()> {
        self.validate()?;

        let unpaired = self.spin.unpaired()?;
        let electrons = molecule
            .electron_count(self.charge)
            .map_err(ConfigurationError::UnknownElement)?;

        if electrons < 0 {
            return Err(ConfigurationError::NegativeElectronCount {
                charge: self.charge,
                electrons,
            });
        }
        if unpaired as i64 > electrons {
            return Err(ConfigurationError::TooManyUnpaired {
                electrons,
                unpaired,
            });
        }
        if (electrons - unpaired as i64) % 2 != 0 {
            return Err(ConfigurationError::SpinParity {
                electrons,
                unpaired,
                multiplicity: unpaired.saturating_add(1),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn water() -> Geometry {
        Geometry::new(
            vec!["O".to_string(), "H".to_string(), "H".to_string()],
            vec![0.0, 0.0, 0.117, 0.0, 0.757, -0.469, 0.0, -0.757, -0.469],
        )
    }

    #[test]
    fn test_default_settings() {
        let settings = XtbSettings::default();
        assert_eq!(settings.method, Method::Gfn2);
        assert_eq!(settings.task, Task::SinglePoint);
        assert_eq!(settings.charge, 0);
        assert_eq!(settings.spin.multiplicity().unwrap(), 1);
        assert!(settings.solvation.is_none());
    }

    #[test]
    fn test_spin_conversion_round_trip() {
        for m in 1..10 {
            let spin = Spin::Multiplicity(m);
            let unpaired = spin.to_unpaired().unwrap();
            assert_eq!(unpaired, Spin::Unpaired(m - 1));
            assert_eq!(unpaired.to_multiplicity().unwrap(), spin);
        }
        assert_eq!(
            Spin::Multiplicity(0).unpaired(),
            Err(ConfigurationError::InvalidMultiplicity(0))
        );
    }

    #[test]
    fn test_largest_unpaired_count_has_no_multiplicity() {
        assert_eq!(
            Spin::Unpaired(u32::MAX).multiplicity(),
            Err(ConfigurationError::UnpairedOutOfRange(u32::MAX))
        );
        assert_eq!(
            Spin::Unpaired(u32::MAX - 1).to_multiplicity(),
            Ok(Spin::Multiplicity(u32::MAX))
        );
    }

    #[test]
    fn test_method_from_str() {
        assert_eq!("GFN2-xTB".parse::<Method>().unwrap(), Method::Gfn2);
        assert_eq!("gfn1".parse::<Method>().unwrap(), Method::Gfn1);
        assert_eq!("GFN0-xTB".parse::<Method>().unwrap(), Method::Gfn0);
        assert_eq!("GFN-FF".parse::<Method>().unwrap(), Method::GfnFf);
        assert!("PM6".parse::<Method>().is_err());
        assert_eq!(Method::Gfn1.to_string(), "GFN1-xTB");
    }

    #[test]
    fn test_task_from_str() {
        assert_eq!("sp".parse::<Task>().unwrap(), Task::SinglePoint);
        assert_eq!("opt".parse::<Task>().unwrap(), Task::Optimize);
        assert_eq!("hess".parse::<Task>().unwrap(), Task::Frequency);
        assert_eq!("ohess".parse::<Task>().unwrap(), Task::OptimizeFrequency);
        assert!("md".parse::<Task>().is_err());
    }

    #[test]
    fn test_opt_level_ordering_and_parsing() {
        assert!(OptLevel::Crude < OptLevel::Normal);
        assert!(OptLevel::Tight < OptLevel::VeryTight);
        assert!(OptLevel::VeryTight < OptLevel::Extreme);
        assert_eq!("vtight".parse::<OptLevel>().unwrap(), OptLevel::VeryTight);
        assert_eq!("VeryTight".parse::<OptLevel>().unwrap(), OptLevel::VeryTight);
        assert_eq!("LAX".parse::<OptLevel>().unwrap(), OptLevel::Lax);
        assert!("ultra".parse::<OptLevel>().is_err());
    }

    #[test]
    fn test_validate_for_closed_shell_water() {
        let settings = XtbSettings::default();
        assert!(settings.validate_for(&water()).is_ok());
    }

    #[test]
    fn test_validate_for_rejects_even_multiplicity_on_even_electrons() {
        // Water has 10 electrons; a doublet is impossible
        let settings = XtbSettings::default().with_spin(Spin::Multiplicity(2));
        let err = settings.validate_for(&water()).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::SpinParity {
                electrons: 10,
                unpaired: 1,
                multiplicity: 2
            }
        );
    }

    #[test]
    fn test_validate_for_cation_doublet() {
        let settings = XtbSettings::default()
            .with_charge(1)
            .with_spin(Spin::Multiplicity(2));
        assert!(settings.validate_for(&water()).is_ok());
    }

    #[test]
    fn test_validate_for_too_many_unpaired() {
        let h = Geometry::new(vec!["H".to_string()], vec![0.0, 0.0, 0.0]);
        let settings = XtbSettings::default().with_spin(Spin::Unpaired(3));
        assert!(matches!(
            settings.validate_for(&h),
            Err(ConfigurationError::TooManyUnpaired { .. })
        ));
    }

    #[test]
    fn test_validate_for_negative_electrons() {
        let h = Geometry::new(vec!["H".to_string()], vec![0.0, 0.0, 0.0]);
        let settings = XtbSettings::default().with_charge(2);
        assert!(matches!(
            settings.validate_for(&h),
            Err(ConfigurationError::NegativeElectronCount { .. })
        ));
    }

    #[test]
    fn test_validate_numeric_options() {
        assert_eq!(
            XtbSettings::default().with_accuracy(0.0).validate(),
            Err(ConfigurationError::InvalidAccuracy(0.0))
        );
        assert_eq!(
            XtbSettings::default().with_threads(0).validate(),
            Err(ConfigurationError::InvalidThreads)
        );
        assert_eq!(
            XtbSettings::default().with_max_iterations(0).validate(),
            Err(ConfigurationError::InvalidIterations)
        );
        assert!(XtbSettings::default()
            .with_solvation(Solvation::new(SolventModel::Gbsa, "  "))
            .validate()
            .is_err());
    }
}
