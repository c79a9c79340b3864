//! Position and camera primitives shared by every module.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single position reading. Immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsFix {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// `[lng, lat]` order, as map engines expect it.
    #[must_use]
    pub fn lng_lat(self) -> [f64; 2] {
        [self.longitude, self.latitude]
    }

    /// Whether both coordinates are finite and inside WGS84 bounds.
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for GpsFix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

/// Camera state of the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Viewport {
    pub center: GpsFix,
    pub zoom: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lng_lat_order() {
        let fix = GpsFix::new(41.15, -8.61);
        assert_eq!(fix.lng_lat(), [-8.61, 41.15]);
    }

    #[test]
    fn test_is_valid() {
        assert!(GpsFix::new(0.0, 0.0).is_valid());
        assert!(GpsFix::new(-90.0, 180.0).is_valid());
        assert!(!GpsFix::new(91.0, 0.0).is_valid());
        assert!(!GpsFix::new(0.0, f64::NAN).is_valid());
    }

    #[test]
    fn test_display() {
        assert_eq!(GpsFix::new(45.502, -73.567).to_string(), "45.502000,-73.567000");
    }
}
