use serde::{Deserialize, Deserializer, Serialize};

use crate::core_modules::diff_mask::DiffMask;

/// One difference region: the tight axis-aligned bound of a single
/// 8-connected set of differing pixels, in full-resolution coordinates.
/// Width and height are at least 1. Bounding boxes of distinct components
/// never share a differing pixel but may overlap or touch.
///
/// This is also the persisted record shape: a JSON object with exactly the
/// keys `x`, `y`, `w`, `h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Rectangle {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rectangle {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }
}

// Sidecars written by earlier revisions of the tool stored coordinates as
// floats; accept integer or floating values on read.
impl<'de> Deserialize<'de> for Rectangle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            x: f64,
            y: f64,
            w: f64,
            h: f64,
        }

        fn field<E: serde::de::Error>(value: f64, name: &str) -> Result<u32, E> {
            if !value.is_finite() || value < 0.0 || value > u32::MAX as f64 {
                return Err(E::custom(format!("rectangle {name} out of range: {value}")));
            }
            Ok(value.round() as u32)
        }

        let raw = Raw::deserialize(deserializer)?;
        Ok(Rectangle {
            x: field(raw.x, "x")?,
            y: field(raw.y, "y")?,
            w: field(raw.w, "w")?,
            h: field(raw.h, "h")?,
        })
    }
}

/// The final output of one comparison run: the ordered rectangle list
/// (insertion order is label discovery order, not spatial) and the
/// full-resolution mask they were extracted from, kept for inspection and
/// overlay rendering.
///
/// One instance per comparison; the next run supersedes it entirely. There
/// is no incremental update.
#[derive(Debug, Clone)]
pub struct DiffResult {
    pub rectangles: Vec<Rectangle>,
    pub mask: DiffMask,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_short_keys() {
        let rect = Rectangle::new(4, 8, 15, 16);
        let json = serde_json::to_string(&rect).expect("serializes");
        assert_eq!(json, r#"{"x":4,"y":8,"w":15,"h":16}"#);
    }

    #[test]
    fn accepts_integer_and_floating_values() {
        let from_ints: Rectangle = serde_json::from_str(r#"{"x":1,"y":2,"w":3,"h":4}"#)
            .expect("integers parse");
        let from_floats: Rectangle =
            serde_json::from_str(r#"{"x":1.0,"y":2.0,"w":3.0,"h":4.0}"#).expect("floats parse");
        assert_eq!(from_ints, from_floats);
        assert_eq!(from_ints, Rectangle::new(1, 2, 3, 4));
    }

    #[test]
    fn rejects_negative_and_non_finite_values() {
        assert!(serde_json::from_str::<Rectangle>(r#"{"x":-1,"y":0,"w":1,"h":1}"#).is_err());
        assert!(serde_json::from_str::<Rectangle>(r#"{"x":0,"y":0,"w":1e300,"h":1}"#).is_err());
    }
}
