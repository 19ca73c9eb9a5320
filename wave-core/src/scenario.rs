//! Scenario (`.wo`) files describing an initial state.
//!
//! Little-endian: `rows u64`, `cols u64`, `damping f64`, `time f64`, then
//! `rows*cols` displacement values and `rows*cols` velocity values, row-major.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::ScenarioError;
use crate::grid::{Field, checked_size};
use crate::state::SimulationState;

const HEADER_LEN: usize = 4 * 8;

/// Load a scenario as a step-0 state. `dt` and `dx` keep their defaults;
/// the caller applies the run configuration.
pub fn load(path: &Path) -> Result<SimulationState, ScenarioError> {
    let read_err = |source| ScenarioError::Read {
        path: path.to_path_buf(),
        source,
    };
    let malformed = |detail: String| ScenarioError::Malformed {
        path: path.to_path_buf(),
        detail,
    };

    let mut r = BufReader::new(File::open(path).map_err(read_err)?);
    let mut buf8 = [0u8; 8];
    let mut next8 = |r: &mut BufReader<File>| -> Result<[u8; 8], ScenarioError> {
        r.read_exact(&mut buf8).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                malformed("file ends inside the header".into())
            } else {
                read_err(e)
            }
        })?;
        Ok(buf8)
    };

    let rows = u64::from_le_bytes(next8(&mut r)?);
    let cols = u64::from_le_bytes(next8(&mut r)?);
    let damping = f64::from_le_bytes(next8(&mut r)?);
    let time = f64::from_le_bytes(next8(&mut r)?);

    let rows = usize::try_from(rows).map_err(|_| malformed(format!("row count {rows} too large")))?;
    let cols = usize::try_from(cols).map_err(|_| malformed(format!("column count {cols} too large")))?;
    let cells = checked_size(rows, cols).map_err(|e| malformed(e.to_string()))?;
    if !damping.is_finite() || damping < 0.0 {
        return Err(malformed(format!("damping must be finite and >= 0, got {damping}")));
    }

    // Check the header against the file size before allocating the fields.
    let found = r.get_ref().metadata().map_err(read_err)?.len();
    let expected = cells
        .checked_mul(16)
        .and_then(|n| n.checked_add(HEADER_LEN))
        .and_then(|n| u64::try_from(n).ok());
    match expected {
        Some(expected) if expected == found => {}
        Some(expected) => {
            return Err(malformed(format!(
                "{rows}x{cols} grid needs {expected} bytes, file has {found}"
            )));
        }
        None => return Err(malformed(format!("{rows}x{cols} grid is too large"))),
    }

    let mut read_field = |what: &str| -> Result<Field, ScenarioError> {
        let mut bytes = vec![0u8; cells * 8];
        r.read_exact(&mut bytes).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                malformed(format!("file ends inside the {what} field"))
            } else {
                read_err(e)
            }
        })?;
        let data = bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect();
        Field::from_vec(rows, cols, data).map_err(|e| malformed(e.to_string()))
    };
    let u = read_field("displacement")?;
    let v = read_field("velocity")?;

    let mut state = SimulationState::from_fields(u, v, damping).map_err(|e| malformed(e.to_string()))?;
    state.time = time;
    Ok(state)
}

/// Write `state` in scenario layout.
pub fn save(state: &SimulationState, path: &Path) -> Result<(), ScenarioError> {
    let write_err = |source| ScenarioError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut w = BufWriter::new(File::create(path).map_err(write_err)?);
    write_to(&mut w, state).map_err(write_err)?;
    w.flush().map_err(write_err)
}

fn write_to<W: Write>(w: &mut W, state: &SimulationState) -> std::io::Result<()> {
    w.write_all(&(state.rows() as u64).to_le_bytes())?;
    w.write_all(&(state.cols() as u64).to_le_bytes())?;
    w.write_all(&state.damping.to_le_bytes())?;
    w.write_all(&state.time.to_le_bytes())?;
    for field in [&state.u, &state.v] {
        for &x in field.as_slice() {
            w.write_all(&x.to_le_bytes())?;
        }
    }
    Ok(())
}
