//! JSON sidecar persistence of a comparison result.
//!
//! The sidecar is a JSON array of `{x, y, w, h}` objects stored alongside
//! the compared source files. Saving preserves rectangle order and loading
//! returns the same order, so a result round-trips exactly: same count,
//! same values, same sequence. Rehydrating a sidecar skips detection
//! entirely.
//!
//! Any failure to read or parse maps to
//! [`DiffError::PersistedResultIncomplete`]; the caller either gets the
//! full rectangle list or nothing, never a partial one.

use std::fs;
use std::path::Path;

use log::debug;

use crate::core_modules::diff_result::Rectangle;
use crate::error::DiffError;

pub fn save(path: &Path, rectangles: &[Rectangle]) -> Result<(), DiffError> {
    let json = serde_json::to_string_pretty(rectangles).map_err(|error| {
        DiffError::PersistedResultIncomplete(format!(
            "cannot encode {} rectangles: {error}",
            rectangles.len()
        ))
    })?;
    fs::write(path, json).map_err(|error| {
        DiffError::PersistedResultIncomplete(format!(
            "cannot write sidecar {}: {error}",
            path.display()
        ))
    })?;
    debug!("saved {} rectangles to {}", rectangles.len(), path.display());
    Ok(())
}

pub fn load(path: &Path) -> Result<Vec<Rectangle>, DiffError> {
    let text = fs::read_to_string(path).map_err(|error| {
        DiffError::PersistedResultIncomplete(format!(
            "cannot read sidecar {}: {error}",
            path.display()
        ))
    })?;
    let rectangles: Vec<Rectangle> = serde_json::from_str(&text).map_err(|error| {
        DiffError::PersistedResultIncomplete(format!(
            "malformed sidecar {}: {error}",
            path.display()
        ))
    })?;
    debug!(
        "loaded {} rectangles from {}",
        rectangles.len(),
        path.display()
    );
    Ok(rectangles)
}
