//! Page regions in PDF user space
//! Author: kartik4091

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Axis-aligned rectangle, `x0 <= x1` and `y0 <= y1`, y axis pointing up
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Region {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        const EPS: f64 = 1e-6;
        x >= self.x0 - EPS && x <= self.x1 + EPS && y >= self.y0 - EPS && y <= self.y1 + EPS
    }

    pub fn intersects(&self, other: &Region) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1 && self.y0 < other.y1 && other.y0 < self.y1
    }

    /// Smallest region covering both
    pub fn union(&self, other: &Region) -> Region {
        Region {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rect({}, {}, {}, {})", self.x0, self.y0, self.x1, self.y1)
    }
}

impl FromStr for Region {
    type Err = Error;

    /// Parses the stored `Rect(x0, y0, x1, y1)` form; a bare `x0, y0, x1, y1` list is accepted too
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let body = trimmed
            .strip_prefix("Rect(")
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(trimmed);

        let bounds = body
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<f64>()
                    .map_err(|_| Error::ValidationError(format!("invalid region bound in {:?}", s)))
            })
            .collect::<Result<Vec<f64>>>()?;

        match bounds.as_slice() {
            [x0, y0, x1, y1] if bounds.iter().all(|v| v.is_finite()) => {
                Ok(Region::new(*x0, *y0, *x1, *y1))
            }
            _ => Err(Error::ValidationError(format!(
                "region needs four finite bounds: {:?}",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_text_form() {
        let region = Region::new(72.0, 695.6, 120.5, 709.6);
        let stored = region.to_string();
        assert_eq!(stored, "Rect(72, 695.6, 120.5, 709.6)");
        assert_eq!(stored.parse::<Region>().unwrap(), region);
        assert_eq!("1, 2, 3, 4".parse::<Region>().unwrap(), Region::new(1.0, 2.0, 3.0, 4.0));
    }

    #[test]
    fn test_region_rejects_code_like_input() {
        assert!("__import__('os').system('rm -rf /')".parse::<Region>().is_err());
        assert!("Rect(1, 2, 3)".parse::<Region>().is_err());
        assert!("Rect(1, 2, 3, NaN)".parse::<Region>().is_err());
        assert!("Rect(1, 2, 3, inf)".parse::<Region>().is_err());
    }

    #[test]
    fn test_region_normalizes_bounds() {
        let region = Region::new(10.0, 20.0, 5.0, 2.0);
        assert_eq!(region, Region { x0: 5.0, y0: 2.0, x1: 10.0, y1: 20.0 });
        assert!(region.contains_point(7.5, 11.0));
        assert!(!region.contains_point(11.0, 11.0));
    }
}
