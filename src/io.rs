//! File I/O utilities for XYZ geometry files.
//!
//! xtb reads its input structure from an XYZ file and writes optimized
//! structures (`xtbopt.xyz`) and optimization trajectories (`xtbopt.log`) in
//! the same format, one frame after another. [`read_xyz`] always returns the
//! final frame.

use crate::geometry::{normalize_symbol, Geometry};
use std::fs;
use std::io::{Error, ErrorKind, Result};
use std::path::Path;

/// Writes a molecular geometry to an XYZ file.
///
/// The file consists of the atom count, a comment line and one
/// `Element X Y Z` line per atom (Angstrom).
///
/// # Examples
///
/// ```
/// use xtbrun::geometry::Geometry;
/// use xtbrun::io;
///
/// fn main() -> std::io::Result<()> {
///     let dir = tempfile::tempdir()?;
///     let path = dir.path().join("h2.xyz");
///     let geometry = Geometry::new(
///         vec!["H".to_string(), "H".to_string()],
///         vec![0.0, 0.0, 0.0, 0.74, 0.0, 0.0],
///     );
///
///     io::write_xyz(&geometry, "h2", &path)?;
///     let back = io::read_xyz(&path)?;
///     assert_eq!(back.num_atoms, 2);
///     Ok(())
/// }
/// ```
pub fn write_xyz(geom: &Geometry, comment: &str, path: &Path) -> Result<()> {
    // The comment line must stay a single line or the frame becomes unreadable
    let comment = comment.lines().next().unwrap_or("");
    let mut content = format!("{}\n{}\n", geom.num_atoms, comment);

    for i in 0..geom.num_atoms {
        let coords = geom.get_atom_coords(i);
        content.push_str(&format!(
            "{:<5} {:15.10} {:15.10} {:15.10}\n",
            geom.elements[i], coords[0], coords[1], coords[2]
        ));
    }

    fs::write(path, content)
}

/// Reads the final frame of a (possibly multi-frame) XYZ file.
///
/// Returns an `InvalidData` error if the file holds no complete frame.
pub fn read_xyz(path: &Path) -> Result<Geometry> {
    let content = fs::read_to_string(path)?;
    parse_xyz_frames(&content)?.pop().ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidData,
            format!("No geometry frames found in {}", path.display()),
        )
    })
}

/// Parses every frame of an XYZ trajectory.
///
/// Frames are read sequentially: an atom count, a comment line, then that many
/// atom lines. Trailing blank lines are ignored; a truncated or malformed frame
/// is an `InvalidData` error.
pub fn parse_xyz_frames(content: &str) -> Result<Vec<Geometry>> {
    let lines: Vec<&str> = content.lines().collect();
    let mut frames = Vec::new();
    let mut pos = 0;

    while pos < lines.len() {
        let header = lines[pos].trim();
        if header.is_empty() {
            pos += 1;
            continue;
        }

        let num_atoms: usize = header.parse().map_err(|_| {
            invalid(format!(
                "Expected atom count on line {}, found '{}'",
                pos + 1,
                header
            ))
        })?;

        let first_atom = pos + 2;
        if first_atom > lines.len() || num_atoms > lines.len() - first_atom {
            return Err(invalid(format!(
                "Truncated frame starting on line {}: expected {} atoms",
                pos + 1,
                num_atoms
            )));
        }

        let mut elements = Vec::with_capacity(num_atoms);
        let mut coords = Vec::with_capacity(3 * num_atoms);
        for (offset, line) in lines[first_atom..first_atom + num_atoms].iter().enumerate() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return Err(invalid(format!(
                    "Malformed atom line {}: '{}'",
                    first_atom + offset + 1,
                    line
                )));
            }
            elements.push(normalize_symbol(parts[0]));
            for value in &parts[1..4] {
                coords.push(value.parse::<f64>().map_err(|_| {
                    invalid(format!(
                        "Invalid coordinate '{}' on line {}",
                        value,
                        first_atom + offset + 1
                    ))
                })?);
            }
        }

        frames.push(Geometry::new(elements, coords));
        pos = first_atom + num_atoms;
    }

    Ok(frames)
}

fn invalid(message: String) -> Error {
    Error::new(ErrorKind::InvalidData, message)
}
