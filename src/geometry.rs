//! Molecular geometry snapshots.
//!
//! [`Geometry`] is the molecule collaborator used throughout the crate: the
//! runner serializes it to the xtb input file, and the extractor builds a new
//! one from the optimized structure that xtb writes. An input geometry is never
//! modified; optimized structures are always returned as fresh snapshots.
//!
//! Coordinates are Cartesian, in Angstrom, stored flat as
//! `[x1, y1, z1, x2, y2, z2, ...]`.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Element symbols indexed by atomic number minus one.
const ELEMENTS: [&str; 118] = [
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S", "Cl",
    "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As",
    "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In",
    "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm", "Sm", "Eu", "Gd", "Tb",
    "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg", "Tl",
    "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "Ac", "Th", "Pa", "U", "Np", "Pu", "Am", "Cm", "Bk",
    "Cf", "Es", "Fm", "Md", "No", "Lr", "Rf", "Db", "Sg", "Bh", "Hs", "Mt", "Ds", "Rg", "Cn", "Nh",
    "Fl", "Mc", "Lv", "Ts", "Og",
];

/// Returns the atomic number for an element symbol.
///
/// Matching is case-insensitive (`"CL"`, `"cl"` and `"Cl"` are all chlorine).
/// Returns `None` for unknown symbols.
///
/// # Examples
///
/// ```
/// use xtbrun::geometry::atomic_number;
///
/// assert_eq!(atomic_number("O"), Some(8));
/// assert_eq!(atomic_number("cl"), Some(17));
/// assert_eq!(atomic_number("Xx"), None);
/// ```
pub fn atomic_number(symbol: &str) -> Option<u32> {
    let symbol = symbol.trim();
    ELEMENTS
        .iter()
        .position(|e| e.eq_ignore_ascii_case(symbol))
        .map(|idx| idx as u32 + 1)
}

/// Returns the element symbol for an atomic number, or `"X"` if out of range.
pub fn atomic_number_to_symbol(num: usize) -> String {
    match num {
        1..=118 => ELEMENTS[num - 1],
        _ => "X",
    }
    .to_string()
}

/// Normalizes the case of an element symbol (`"CL"` -> `"Cl"`).
///
/// Unknown symbols are returned trimmed but otherwise unchanged.
pub fn normalize_symbol(symbol: &str) -> String {
    match atomic_number(symbol) {
        Some(z) => atomic_number_to_symbol(z as usize),
        None => symbol.trim().to_string(),
    }
}

/// Represents a molecular geometry with atomic elements and Cartesian coordinates.
///
/// # Examples
///
/// ```
/// use xtbrun::geometry::Geometry;
///
/// let elements = vec!["O".to_string(), "H".to_string(), "H".to_string()];
/// let coords = vec![
///     0.0, 0.0, 0.117,
///     0.0, 0.757, -0.469,
///     0.0, -0.757, -0.469,
/// ];
///
/// let water = Geometry::new(elements, coords);
/// assert_eq!(water.num_atoms, 3);
/// assert_eq!(water.get_atom_coords(1), [0.0, 0.757, -0.469]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    /// Chemical element symbols for each atom in order
    pub elements: Vec<String>,
    /// Flattened Cartesian coordinates [x1, y1, z1, x2, y2, z2, ...] in Angstrom
    pub coords: DVector<f64>,
    /// Number of atoms in the molecule
    pub num_atoms: usize,
}

impl Geometry {
    /// Create a new `Geometry` from element list and coordinate vector.
    ///
    /// # Panics
    ///
    /// Panics if `coords.len() != elements.len() * 3`.
    pub fn new(elements: Vec<String>, coords: Vec<f64>) -> Self {
        let num_atoms = elements.len();
        assert_eq!(coords.len(), num_atoms * 3);
        Self {
            elements,
            coords: DVector::from_vec(coords),
            num_atoms,
        }
    }

    /// Get the Cartesian coordinates of a specific atom (zero-based index).
    pub fn get_atom_coords(&self, atom_idx: usize) -> [f64; 3] {
        let i = atom_idx * 3;
        [self.coords[i], self.coords[i + 1], self.coords[i + 2]]
    }

    /// Sum of atomic numbers, or the first unrecognised element symbol.
    pub fn nuclear_charge(&self) -> Result<i64, String> {
        self.elements.iter().try_fold(0_i64, |acc, symbol| {
            atomic_number(symbol)
                .map(|z| acc + z as i64)
                .ok_or_else(|| symbol.clone())
        })
    }

    /// Number of electrons for the given total molecular charge.
    ///
    /// Returns `Err(symbol)` if an element symbol is not recognised.
    pub fn electron_count(&self, charge: i32) -> Result<i64, String> {
        Ok(self.nuclear_charge()? - charge as i64)
    }

    /// Empirical formula in Hill order (C first, then H, then alphabetical).
    ///
    /// Used as the default job label.
    ///
    /// ```
    /// use xtbrun::geometry::Geometry;
    ///
    /// let elements = ["O", "C", "H", "H", "H", "H"].iter().map(|s| s.to_string()).collect();
    /// let methanol = Geometry::new(elements, vec![0.0; 18]);
    /// assert_eq!(methanol.chemical_formula(), "CH4O");
    /// ```
    pub fn chemical_formula(&self) -> String {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for symbol in &self.elements {
            *counts.entry(normalize_symbol(symbol)).or_insert(0) += 1;
        }

        let mut formula = String::new();
        let mut push = |symbol: &str, count: usize| {
            formula.push_str(symbol);
            if count > 1 {
                formula.push_str(&count.to_string());
            }
        };

        if let Some(c) = counts.remove("C") {
            push("C", c);
            if let Some(h) = counts.remove("H") {
                push("H", h);
            }
        }
        for (symbol, count) in counts {
            push(&symbol, count);
        }
        formula
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
    fn test_atomic_number_lookup() {
        assert_eq!(atomic_number("H"), Some(1));
        assert_eq!(atomic_number("og"), Some(118));
        assert_eq!(atomic_number(" Fe "), Some(26));
        assert_eq!(atomic_number("Q"), None);
        assert_eq!(atomic_number_to_symbol(6), "C");
        assert_eq!(atomic_number_to_symbol(0), "X");
        assert_eq!(atomic_number_to_symbol(200), "X");
    }

    #[test]
    fn test_electron_count() {
        let geom = water();
        assert_eq!(geom.electron_count(0), Ok(10));
        assert_eq!(geom.electron_count(1), Ok(9));
        assert_eq!(geom.electron_count(-2), Ok(12));
    }

    #[test]
    fn test_electron_count_unknown_element() {
        let geom = Geometry::new(vec!["Zz".to_string()], vec![0.0, 0.0, 0.0]);
        assert_eq!(geom.electron_count(0), Err("Zz".to_string()));
    }

    #[test]
    fn test_chemical_formula_hill_order() {
        assert_eq!(water().chemical_formula(), "H2O");

        let elements = ["N", "H", "C", "cl", "H", "H"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let geom = Geometry::new(elements, vec![0.0; 18]);
        assert_eq!(geom.chemical_formula(), "CH3ClN");
    }
}
