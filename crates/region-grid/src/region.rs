//! Regions of interest.

use geo::{Contains, MultiPolygon, Point};

use crate::BoundingBox;

/// A named area of interest, or the whole globe.
///
/// Regions are cheap to construct and are looked up lazily per sync run;
/// they are never persisted.
#[derive(Debug, Clone)]
pub enum Region {
    /// Full global extent, no polygon.
    Global,
    /// A polygon-bounded area. The polygon may be multi-part and its
    /// bounding box may span the ±180° meridian.
    Named {
        code: String,
        bbox: BoundingBox,
        polygon: MultiPolygon<f64>,
    },
}

impl Region {
    /// Region identifier, `"global"` for the global variant.
    pub fn code(&self) -> &str {
        match self {
            Region::Global => "global",
            Region::Named { code, .. } => code,
        }
    }

    /// Bounding box of the region.
    pub fn bbox(&self) -> BoundingBox {
        match self {
            Region::Global => BoundingBox::global(),
            Region::Named { bbox, .. } => *bbox,
        }
    }

    /// Whether a point lies strictly inside the region.
    ///
    /// Boundary-touching points count as outside; for the global region
    /// every point is inside.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        match self {
            Region::Global => true,
            Region::Named { polygon, .. } => polygon.contains(&Point::new(lon, lat)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon};

    fn square_region() -> Region {
        let poly = polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 0.0, y: 10.0),
            (x: 0.0, y: 0.0),
        ];
        Region::Named {
            code: "SQ".to_string(),
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            polygon: MultiPolygon(vec![poly]),
        }
    }

    #[test]
    fn test_strict_containment() {
        let region = square_region();
        assert!(region.contains(5.0, 5.0));
        assert!(!region.contains(15.0, 5.0));
        // Points on the boundary are excluded.
        assert!(!region.contains(0.0, 5.0));
        assert!(!region.contains(10.0, 10.0));
    }

    #[test]
    fn test_global_contains_everything() {
        assert!(Region::Global.contains(-179.9, 89.9));
        assert_eq!(Region::Global.code(), "global");
    }
}
