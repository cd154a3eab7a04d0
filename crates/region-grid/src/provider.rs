//! Region polygon providers.
//!
//! The provider boundary hides where polygons come from. The bundled
//! implementation reads a GeoJSON FeatureCollection whose features carry
//! a `code` property; `global` is always resolvable without a file.

use std::fs;
use std::path::{Path, PathBuf};

use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde::Deserialize;
use tracing::debug;

use crate::{BoundingBox, Region, RegionError, Result};

/// Resolves region codes to bounding boxes and polygons.
pub trait RegionProvider: Send + Sync {
    /// Look up a region by code. `"global"` must always resolve; any
    /// other unknown code fails with [`RegionError::RegionNotFound`].
    fn region(&self, code: &str) -> Result<Region>;
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    bbox: Option<Vec<f64>>,
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Geometry {
    Polygon {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<[f64; 2]>>>,
    },
}

/// Region provider backed by a GeoJSON file.
pub struct GeoJsonRegions {
    path: PathBuf,
}

impl GeoJsonRegions {
    /// Create a provider reading from the given GeoJSON file.
    ///
    /// The file is parsed per lookup; region construction is cheap and
    /// regions are not cached.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl RegionProvider for GeoJsonRegions {
    fn region(&self, code: &str) -> Result<Region> {
        if code.eq_ignore_ascii_case("global") {
            return Ok(Region::Global);
        }

        let content = fs::read_to_string(&self.path)?;
        let collection: FeatureCollection = serde_json::from_str(&content)
            .map_err(|e| RegionError::InvalidGeometry(e.to_string()))?;

        for feature in collection.features {
            let feature_code = feature
                .properties
                .get("code")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if !feature_code.eq_ignore_ascii_case(code) {
                continue;
            }

            let polygon = to_multi_polygon(&feature.geometry);
            let bbox = match feature.bbox.as_deref() {
                Some([min_lon, min_lat, max_lon, max_lat]) => {
                    BoundingBox::new(*min_lon, *min_lat, *max_lon, *max_lat)
                }
                _ => polygon_bbox(&polygon).ok_or_else(|| {
                    RegionError::InvalidGeometry(format!("region {code} has no coordinates"))
                })?,
            };

            debug!(region = %code, "resolved region polygon");
            return Ok(Region::Named {
                code: code.to_string(),
                bbox,
                polygon,
            });
        }

        Err(RegionError::RegionNotFound(code.to_string()))
    }
}

fn ring(points: &[[f64; 2]]) -> LineString<f64> {
    LineString::from(
        points
            .iter()
            .map(|p| Coord { x: p[0], y: p[1] })
            .collect::<Vec<_>>(),
    )
}

fn to_polygon(rings: &[Vec<[f64; 2]>]) -> Polygon<f64> {
    let exterior = rings.first().map(|r| ring(r)).unwrap_or_else(|| LineString::new(vec![]));
    let interiors = rings.iter().skip(1).map(|r| ring(r)).collect();
    Polygon::new(exterior, interiors)
}

fn to_multi_polygon(geometry: &Geometry) -> MultiPolygon<f64> {
    match geometry {
        Geometry::Polygon { coordinates } => MultiPolygon(vec![to_polygon(coordinates)]),
        Geometry::MultiPolygon { coordinates } => {
            MultiPolygon(coordinates.iter().map(|p| to_polygon(p)).collect())
        }
    }
}

/// Bounding box of all exterior ring coordinates.
fn polygon_bbox(polygon: &MultiPolygon<f64>) -> Option<BoundingBox> {
    let mut min_lon = f64::INFINITY;
    let mut min_lat = f64::INFINITY;
    let mut max_lon = f64::NEG_INFINITY;
    let mut max_lat = f64::NEG_INFINITY;
    let mut seen = false;

    for poly in &polygon.0 {
        for coord in poly.exterior().coords() {
            min_lon = min_lon.min(coord.x);
            max_lon = max_lon.max(coord.x);
            min_lat = min_lat.min(coord.y);
            max_lat = max_lat.max(coord.y);
            seen = true;
        }
    }

    seen.then(|| BoundingBox::new(min_lon, min_lat, max_lon, max_lat))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const REGIONS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": { "code": "UG", "name": "Testland" },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[29.5, -1.5], [35.0, -1.5], [35.0, 4.2], [29.5, 4.2], [29.5, -1.5]]]
                }
            },
            {
                "type": "Feature",
                "properties": { "code": "FJ" },
                "bbox": [177.0, -19.0, -178.0, -16.0],
                "geometry": {
                    "type": "MultiPolygon",
                    "coordinates": [
                        [[[177.0, -19.0], [180.0, -19.0], [180.0, -16.0], [177.0, -16.0], [177.0, -19.0]]],
                        [[[-180.0, -19.0], [-178.0, -19.0], [-178.0, -16.0], [-180.0, -16.0], [-180.0, -19.0]]]
                    ]
                }
            }
        ]
    }"#;

    fn provider() -> (tempfile::TempDir, GeoJsonRegions) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regions.geojson");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(REGIONS.as_bytes()).unwrap();
        (dir, GeoJsonRegions::new(path))
    }

    #[test]
    fn test_lookup_polygon_region() {
        let (_dir, provider) = provider();
        let region = provider.region("UG").unwrap();
        assert_eq!(region.code(), "UG");
        let bbox = region.bbox();
        assert_eq!(bbox.min_lon, 29.5);
        assert_eq!(bbox.max_lat, 4.2);
        assert!(region.contains(32.0, 1.0));
        assert!(!region.contains(40.0, 1.0));
    }

    #[test]
    fn test_lookup_dateline_region_uses_feature_bbox() {
        let (_dir, provider) = provider();
        let region = provider.region("FJ").unwrap();
        assert!(region.bbox().crosses_dateline());
        assert!(region.contains(178.5, -17.5));
        assert!(region.contains(-179.0, -17.5));
    }

    #[test]
    fn test_global_always_resolves() {
        let provider = GeoJsonRegions::new("/nonexistent/regions.geojson");
        assert!(matches!(provider.region("global"), Ok(Region::Global)));
    }

    #[test]
    fn test_unknown_code() {
        let (_dir, provider) = provider();
        assert!(matches!(
            provider.region("XX"),
            Err(RegionError::RegionNotFound(_))
        ));
    }
}
