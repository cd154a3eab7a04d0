//! Geographic bounding boxes.

use serde::{Deserialize, Serialize};

/// A geographic bounding box in degrees.
///
/// A box spanning the ±180° meridian is represented with
/// `min_lon > max_lon` (the GeoJSON antimeridian convention).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// The full-globe bounding box.
    pub fn global() -> Self {
        Self::new(-180.0, -90.0, 180.0, 90.0)
    }

    /// Whether the box spans the ±180° meridian.
    pub fn crosses_dateline(&self) -> bool {
        self.min_lon > self.max_lon
    }

    /// Longitudinal extent in degrees, dateline crossing included.
    pub fn width(&self) -> f64 {
        if self.crosses_dateline() {
            360.0 - self.min_lon + self.max_lon
        } else {
            self.max_lon - self.min_lon
        }
    }

    /// Latitudinal extent in degrees.
    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Check if a point falls within the box.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        let lat_ok = lat >= self.min_lat && lat <= self.max_lat;
        let lon_ok = if self.crosses_dateline() {
            lon >= self.min_lon || lon <= self.max_lon
        } else {
            lon >= self.min_lon && lon <= self.max_lon
        };
        lat_ok && lon_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_box() {
        let bbox = BoundingBox::new(10.0, -5.0, 20.0, 5.0);
        assert!(!bbox.crosses_dateline());
        assert_eq!(bbox.width(), 10.0);
        assert_eq!(bbox.height(), 10.0);
        assert!(bbox.contains(15.0, 0.0));
        assert!(!bbox.contains(25.0, 0.0));
    }

    #[test]
    fn test_dateline_box() {
        let bbox = BoundingBox::new(170.0, -50.0, -160.0, -30.0);
        assert!(bbox.crosses_dateline());
        assert_eq!(bbox.width(), 30.0);
        assert!(bbox.contains(175.0, -40.0));
        assert!(bbox.contains(-170.0, -40.0));
        assert!(!bbox.contains(0.0, -40.0));
    }
}
