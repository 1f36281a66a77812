//! Result extraction from xtb output.
//!
//! xtb prints its results as free-form text on stdout and leaves a few
//! auxiliary files behind. [`parse`] reads a job directory (the transcript
//! plus `xtbopt.xyz`, `xtbopt.log`, `charges` and `wbo` when present) into an
//! [`Output`] value.
//!
//! # Extraction Model
//!
//! The transcript is not a stable, versioned format, so every field is found
//! by an independent scanner:
//!
//! - termination marker (`normal termination of xtb`, `finished run`)
//! - total energies (the last one wins), HOMO-LUMO gap, free energy
//! - vibrational frequencies, in printed order
//! - Mulliken and CM5 charges, keyed by 1-based atom index
//! - molecular dipole vector and magnitude
//! - geometry optimization convergence
//!
//! A section that is missing leaves its field as `None`. A section that is
//! present but contains a malformed number also leaves its field as `None`
//! and logs a warning; the remaining fields are still extracted.
//!
//! The only hard failure is a transcript that is missing or unreadable.
//!
//! # Examples
//!
//! ```no_run
//! use std::path::Path;
//! use xtbrun::output;
//!
//! let result = output::parse(Path::new("water"))?;
//! if result.normal_termination {
//!     println!("E = {:?} Eh", result.energy);
//! }
//! # Ok::<(), xtbrun::output::OutputError>(())
//! ```

use crate::geometry::Geometry;
use crate::io;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Optimized structure written by xtb.
pub const OPTIMIZED_XYZ: &str = "xtbopt.xyz";
/// Optimization trajectory written by xtb.
pub const OPTIMIZATION_LOG: &str = "xtbopt.log";
/// Atomic partial charges, one per line.
pub const CHARGES_FILE: &str = "charges";
/// Wiberg bond orders, `i j order` per line.
pub const WBO_FILE: &str = "wbo";

/// Errors that prevent extraction altogether.
#[derive(Error, Debug)]
pub enum OutputError {
    /// The transcript could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// No transcript file in the directory
    #[error("No xtb transcript (*.out) found in {0}")]
    TranscriptNotFound(PathBuf),
}

/// Result type for extraction
pub type Result<T> = std::result::Result<T, OutputError>;

/// A Wiberg bond order between two atoms (1-based indices).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BondOrder {
    /// First atom
    pub atom_i: usize,
    /// Second atom
    pub atom_j: usize,
    /// Wiberg bond order
    pub order: f64,
}

/// Results of one xtb run.
///
/// Produced once by [`parse`] and not modified afterwards. Optional fields are
/// `None` when the corresponding section or file is absent or malformed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Output {
    /// Transcript carries the normal termination marker
    pub normal_termination: bool,
    /// Program version from the banner
    pub version: Option<String>,
    /// Final total energy (Eh)
    pub energy: Option<f64>,
    /// Every total energy printed, in order (Eh)
    pub energies: Vec<f64>,
    /// Final HOMO-LUMO gap (eV)
    pub homo_lumo_gap: Option<f64>,
    /// Total free energy from a frequency calculation (Eh)
    pub free_energy: Option<f64>,
    /// Final structure of a geometry optimization (Angstrom)
    pub optimized_geometry: Option<Geometry>,
    /// Vibrational frequencies (cm^-1), negative values are imaginary modes
    pub frequencies: Option<Vec<f64>>,
    /// Mulliken charges by atom index
    pub mulliken_charges: Option<BTreeMap<usize, f64>>,
    /// CM5 charges by atom index
    pub cm5_charges: Option<BTreeMap<usize, f64>>,
    /// Charges from the `charges` file, in atom order
    pub file_charges: Option<Vec<f64>>,
    /// Wiberg bond orders from the `wbo` file
    pub bond_orders: Option<Vec<BondOrder>>,
    /// Dipole moment vector (a.u.)
    pub dipole: Option<[f64; 3]>,
    /// Dipole moment magnitude (Debye)
    pub dipole_total: Option<f64>,
    /// Geometry optimization converged; `None` when no optimization ran
    pub optimization_converged: Option<bool>,
}

lazy_static! {
    // Robust floating-point regex: handles 1.23, -0.032, 1.2e-4, .123, etc.
    static ref FLOAT_RE: String = r"[-+]?(?:\d+\.\d*|\.\d+|\d+)(?:[eE][-+]?\d+)?".to_string();

    static ref NUMBER_RE: Regex = Regex::new(&format!(r"^{0}$", *FLOAT_RE)).unwrap();

    // "| TOTAL ENERGY   -5.070544440612 Eh |" or "* total energy  :  -12.345 Eh"
    static ref ENERGY_RE: Regex = Regex::new(&format!(
        r"(?i)total\s+energy\s*:?\s*({0})\s*Eh",
        *FLOAT_RE
    )).unwrap();

    // "| HOMO-LUMO GAP   14.381173000143 eV |"
    static ref GAP_RE: Regex = Regex::new(&format!(
        r"(?i)HOMO-LUMO\s+GAP\s*:?\s*({0})\s*eV",
        *FLOAT_RE
    )).unwrap();

    // "| TOTAL FREE ENERGY   -5.063121214 Eh |"
    static ref FREE_ENERGY_RE: Regex = Regex::new(&format!(
        r"(?i)total\s+free\s+energy\s*:?\s*({0})\s*Eh",
        *FLOAT_RE
    )).unwrap();

    // "normal termination of xtb" but not "abnormal termination of xtb"
    static ref TERMINATION_RE: Regex =
        Regex::new(r"(?i)\bnormal\s+termination\s+of\s+xtb|\bfinished\s+run").unwrap();

    static ref VERSION_RE: Regex = Regex::new(r"xtb\s+version\s+(\S+)").unwrap();

    // "    1   -25.32 cm**-1"
    static ref FREQ_ROW_RE: Regex = Regex::new(r"^\s*\d+\s+(\S+)\s+cm\*\*-1").unwrap();

    // "     1O  -0.57232 -0.40938 ..." or "   1  C    -0.123456"
    static ref CHARGE_ROW_RE: Regex =
        Regex::new(r"^\s*(\d+)\s*([A-Z][a-z]?)\s+(\S+)(?:\s+(\S+))?").unwrap();
}

/// Parses the xtb results in `job_dir`.
///
/// The transcript is located with [`find_transcript`].
pub fn parse(job_dir: &Path) -> Result<Output> {
    let transcript = find_transcript(job_dir)?;
    parse_transcript(&transcript, job_dir)
}

/// Parses a transcript, reading auxiliary files from `job_dir`.
pub fn parse_transcript(transcript: &Path, job_dir: &Path) -> Result<Output> {
    debug!("Parsing xtb transcript: {}", transcript.display());
    let content = fs::read_to_string(transcript)?;
    Ok(Output::from_transcript(&content, job_dir))
}

/// Finds the xtb transcript in a directory.
///
/// Among the `.out` files (sorted by name, `g98.out` excluded) the first one
/// carrying the xtb banner is chosen; if none does, the first `.out` file.
pub fn find_transcript(dir: &Path) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some("out")
                && path.file_name().and_then(|n| n.to_str()) != Some("g98.out")
        })
        .collect();
    candidates.sort();

    for path in &candidates {
        match fs::read_to_string(path) {
            Ok(content) if is_xtb_transcript(&content) => return Ok(path.clone()),
            Ok(_) => {}
            Err(e) => debug!("Could not read {}: {}", path.display(), e),
        }
    }

    candidates
        .into_iter()
        .next()
        .ok_or_else(|| OutputError::TranscriptNotFound(dir.to_path_buf()))
}

fn is_xtb_transcript(content: &str) -> bool {
    content.contains("x T B") || VERSION_RE.is_match(content)
}

impl Output {
    /// Builds an output from transcript text and the auxiliary files in
    /// `job_dir`. Never fails; unusable sections are left empty.
    pub fn from_transcript(content: &str, job_dir: &Path) -> Self {
        let lines: Vec<&str> = content.lines().collect();

        let energies = find_energies(&lines);
        let (mulliken_charges, cm5_charges) = find_charges(&lines);
        let (dipole, dipole_total) = find_dipole(&lines);

        let output = Output {
            normal_termination: find_normal_termination(&lines),
            version: find_version(&lines),
            energy: energies.last().copied(),
            energies,
            homo_lumo_gap: last_value(&lines, &GAP_RE, "HOMO-LUMO gap"),
            free_energy: last_value(&lines, &FREE_ENERGY_RE, "free energy"),
            optimized_geometry: read_optimized_geometry(job_dir),
            frequencies: find_frequencies(&lines),
            mulliken_charges,
            cm5_charges,
            file_charges: read_charges_file(job_dir),
            bond_orders: read_bond_orders(job_dir),
            dipole,
            dipole_total,
            optimization_converged: find_convergence(&lines),
        };

        debug!(
            "Extracted: normal_termination={}, energy={:?}, {} frequencies",
            output.normal_termination,
            output.energy,
            output.frequencies.as_ref().map_or(0, |f| f.len())
        );
        output
    }

    /// Number of imaginary (negative) frequencies, if frequencies were found.
    pub fn num_imaginary_frequencies(&self) -> Option<usize> {
        self.frequencies
            .as_ref()
            .map(|f| f.iter().filter(|&&v| v < 0.0).count())
    }
}

/// Parses a number in fixed or scientific notation; rejects `inf`, `NaN` and
/// Fortran overflow markers such as `*****`.
fn parse_number(token: &str) -> Option<f64> {
    let token = token.trim();
    if NUMBER_RE.is_match(token) {
        token.parse().ok()
    } else {
        None
    }
}

fn find_normal_termination(lines: &[&str]) -> bool {
    lines.iter().rev().any(|line| TERMINATION_RE.is_match(line))
}

fn find_version(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .find_map(|line| VERSION_RE.captures(line).map(|caps| caps[1].to_string()))
}

fn find_energies(lines: &[&str]) -> Vec<f64> {
    lines
        .iter()
        .filter_map(|line| ENERGY_RE.captures(line))
        .filter_map(|caps| parse_number(&caps[1]))
        .collect()
}

fn last_value(lines: &[&str], re: &Regex, what: &str) -> Option<f64> {
    let value = lines
        .iter()
        .rev()
        .find_map(|line| re.captures(line))
        .and_then(|caps| parse_number(&caps[1]));
    if value.is_some() {
        debug!("Found {}", what);
    }
    value
}

/// Frequencies from the last frequency section.
///
/// Two layouts are recognized: the `vibrational frequencies` header followed
/// by `eigval :` rows, and a `mode ... cm**-1` table ending at a blank line.
fn find_frequencies(lines: &[&str]) -> Option<Vec<f64>> {
    let mut last: Option<Option<Vec<f64>>> = None;
    let mut i = 0;

    while i < lines.len() {
        let lower = lines[i].to_lowercase();

        if lower.contains("vibrational frequencies") {
            let mut values = Vec::new();
            let mut malformed = false;
            let mut j = i + 1;
            while j < lines.len() {
                let line = lines[j].trim_start();
                let Some(rest) = line.strip_prefix("eigval") else {
                    break;
                };
                let rest = rest.trim_start().trim_start_matches(':');
                for token in rest.split_whitespace() {
                    match parse_number(token) {
                        Some(v) => values.push(v),
                        None => {
                            warn!("Malformed frequency '{}' on line {}", token, j + 1);
                            malformed = true;
                        }
                    }
                }
                j += 1;
            }
            if malformed {
                last = Some(None);
            } else if !values.is_empty() {
                last = Some(Some(values));
            }
            i = j;
            continue;
        }

        if lower.contains("mode") && lower.contains("cm**-1") {
            let mut values = Vec::new();
            let mut malformed = false;
            let mut j = i + 1;
            while j < lines.len() && !lines[j].trim().is_empty() {
                if let Some(caps) = FREQ_ROW_RE.captures(lines[j]) {
                    match parse_number(&caps[1]) {
                        Some(v) => values.push(v),
                        None => {
                            warn!("Malformed frequency '{}' on line {}", &caps[1], j + 1);
                            malformed = true;
                        }
                    }
                }
                j += 1;
            }
            if malformed {
                last = Some(None);
            } else if !values.is_empty() {
                last = Some(Some(values));
            }
            i = j;
            continue;
        }

        i += 1;
    }

    last.flatten()
}

#[derive(Clone, Copy)]
enum ChargeScheme {
    Mulliken,
    Cm5,
}

type ChargeMap = BTreeMap<usize, f64>;

/// Mulliken and CM5 charges, each from its last section.
///
/// A combined `Mulliken/CM5 charges` header yields both schemes from one
/// table, first column Mulliken and second column CM5.
fn find_charges(lines: &[&str]) -> (Option<ChargeMap>, Option<ChargeMap>) {
    // Rows that do not look like atoms are allowed before the table starts
    const MAX_DECORATION: usize = 3;

    let mut mulliken: Option<Option<ChargeMap>> = None;
    let mut cm5: Option<Option<ChargeMap>> = None;
    let mut i = 0;

    while i < lines.len() {
        let lower = lines[i].to_lowercase();
        if !lower.contains("charges") {
            i += 1;
            continue;
        }
        let columns: Vec<ChargeScheme> = match (lower.contains("mulliken"), lower.contains("cm5")) {
            (true, true) => vec![ChargeScheme::Mulliken, ChargeScheme::Cm5],
            (true, false) => vec![ChargeScheme::Mulliken],
            (false, true) => vec![ChargeScheme::Cm5],
            (false, false) => {
                i += 1;
                continue;
            }
        };

        let mut maps: Vec<ChargeMap> = vec![ChargeMap::new(); columns.len()];
        let mut malformed = vec![false; columns.len()];
        let mut skipped = 0;
        let mut j = i + 1;

        while j < lines.len() {
            let Some(caps) = CHARGE_ROW_RE.captures(lines[j]) else {
                if maps[0].is_empty() && !malformed[0] && skipped < MAX_DECORATION {
                    skipped += 1;
                    j += 1;
                    continue;
                }
                break;
            };
            let index: usize = match caps[1].parse() {
                Ok(index) => index,
                Err(_) => break,
            };
            for (col, map) in maps.iter_mut().enumerate() {
                let token = caps.get(3 + col).map(|m| m.as_str()).unwrap_or("");
                match parse_number(token) {
                    Some(q) => {
                        map.insert(index, q);
                    }
                    None => {
                        warn!("Malformed charge '{}' for atom {} on line {}", token, index, j + 1);
                        malformed[col] = true;
                    }
                }
            }
            j += 1;
        }

        for (col, scheme) in columns.iter().enumerate() {
            let result = if malformed[col] {
                Some(None)
            } else if maps[col].is_empty() {
                continue;
            } else {
                Some(Some(std::mem::take(&mut maps[col])))
            };
            match scheme {
                ChargeScheme::Mulliken => mulliken = result,
                ChargeScheme::Cm5 => cm5 = result,
            }
        }

        i = j.max(i + 1);
    }

    (mulliken.flatten(), cm5.flatten())
}

/// Dipole vector and magnitude from the last `molecular dipole` block.
///
/// ```text
/// molecular dipole:
///                  x           y           z       tot (Debye)
///  q only:        0.000       0.000      -0.389
///    full:        0.000       0.000      -0.620       1.576
/// ```
fn find_dipole(lines: &[&str]) -> (Option<[f64; 3]>, Option<f64>) {
    const SEARCH_WINDOW: usize = 5;

    let Some(start) = lines
        .iter()
        .rposition(|line| line.to_lowercase().contains("molecular dipole"))
    else {
        return (None, None);
    };

    let full = lines[start + 1..]
        .iter()
        .take(SEARCH_WINDOW)
        .find_map(|line| line.trim_start().strip_prefix("full:"));
    let Some(full) = full else {
        return (None, None);
    };

    let tokens: Vec<&str> = full.split_whitespace().collect();
    if tokens.len() < 3 {
        warn!("Incomplete dipole line: '{}'", full.trim());
        return (None, None);
    }
    let mut vector = [0.0; 3];
    for (k, token) in tokens.iter().take(3).enumerate() {
        match parse_number(token) {
            Some(v) => vector[k] = v,
            None => {
                warn!("Malformed dipole component '{}'", token);
                return (None, None);
            }
        }
    }
    let total = match tokens.get(3) {
        Some(token) => {
            let total = parse_number(token);
            if total.is_none() {
                warn!("Malformed dipole magnitude '{}'", token);
            }
            total
        }
        None => None,
    };

    (Some(vector), total)
}

/// Geometry optimization convergence, distinct from normal termination.
fn find_convergence(lines: &[&str]) -> Option<bool> {
    let mut optimization_ran = false;
    for line in lines.iter().rev() {
        let upper = line.to_uppercase();
        if upper.contains("FAILED TO CONVERGE GEOMETRY OPTIMIZATION") {
            return Some(false);
        }
        if upper.contains("GEOMETRY OPTIMIZATION CONVERGED") || upper.contains("OPTIMIZATION CONVERGED")
        {
            return Some(true);
        }
        if upper.contains("GEOMETRY OPTIMIZATION") || upper.contains("ANCOPT") {
            optimization_ran = true;
        }
    }
    if optimization_ran {
        Some(false)
    } else {
        None
    }
}

/// Final optimized structure: `xtbopt.xyz`, else the last frame of
/// `xtbopt.log`.
fn read_optimized_geometry(job_dir: &Path) -> Option<Geometry> {
    for name in [OPTIMIZED_XYZ, OPTIMIZATION_LOG] {
        let path = job_dir.join(name);
        if !path.is_file() {
            continue;
        }
        match io::read_xyz(&path) {
            Ok(geometry) => {
                debug!("Read optimized structure from {}", path.display());
                return Some(geometry);
            }
            Err(e) => warn!("Failed to read optimized structure from {}: {}", path.display(), e),
        }
    }
    None
}

fn read_charges_file(job_dir: &Path) -> Option<Vec<f64>> {
    let path = job_dir.join(CHARGES_FILE);
    let content = read_optional(&path)?;
    let mut charges = Vec::new();
    for (n, line) in content.lines().enumerate() {
        let Some(token) = line.split_whitespace().last() else {
            continue;
        };
        match parse_number(token) {
            Some(q) => charges.push(q),
            None => {
                warn!("Malformed charge '{}' in {} line {}", token, path.display(), n + 1);
                return None;
            }
        }
    }
    (!charges.is_empty()).then_some(charges)
}

fn read_bond_orders(job_dir: &Path) -> Option<Vec<BondOrder>> {
    let path = job_dir.join(WBO_FILE);
    let content = read_optional(&path)?;
    let mut bonds = Vec::new();
    for (n, line) in content.lines().enumerate() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }
        let parsed = match parts.as_slice() {
            [i, j, order] => match (i.parse(), j.parse(), parse_number(order)) {
                (Ok(atom_i), Ok(atom_j), Some(order)) => Some(BondOrder {
                    atom_i,
                    atom_j,
                    order,
                }),
                _ => None,
            },
            _ => None,
        };
        match parsed {
            Some(bond) => bonds.push(bond),
            None => {
                warn!("Malformed bond order line {} in {}: '{}'", n + 1, path.display(), line);
                return None;
            }
        }
    }
    (!bonds.is_empty()).then_some(bonds)
}

fn read_optional(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            None
        }
    }
}
