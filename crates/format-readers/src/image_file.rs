//! Reader for plain image formats (PNG, JPEG, GIF, BMP, TIFF).
//!
//! These formats carry no georeferencing; the pixel raster is assumed
//! to cover the supplied bounding box edge to edge, row 0 at the
//! northern edge. Pixels are decoded to a single grayscale band named
//! `dataset`; nodata sentinels (commonly 255) are handled downstream by
//! the resampling step.

use std::collections::BTreeMap;
use std::path::Path;

use region_grid::BoundingBox;
use tracing::debug;

use crate::{FormatReader, ReaderError, Result, SourceImage};

/// Decodes plain images against a known geographic extent.
pub struct ImageReader {
    bbox: BoundingBox,
}

impl ImageReader {
    /// Create a reader whose rasters span `bbox`.
    pub fn new(bbox: BoundingBox) -> Self {
        Self { bbox }
    }
}

impl FormatReader for ImageReader {
    fn read(&self, path: &Path) -> Result<SourceImage> {
        let img = image::open(path).map_err(|e| ReaderError::Decode {
            path: path.to_string_lossy().into_owned(),
            reason: e.to_string(),
        })?;

        let gray = img.to_luma8();
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Err(ReaderError::Decode {
                path: path.to_string_lossy().into_owned(),
                reason: "empty image".to_string(),
            });
        }

        let data: Vec<f32> = gray.pixels().map(|p| p.0[0] as f32).collect();

        let lon_step = self.bbox.width() / width as f64;
        let lat_step = self.bbox.height() / height as f64;

        let lons: Vec<f64> = (0..width)
            .map(|i| {
                let lon = self.bbox.min_lon + lon_step * (i as f64 + 0.5);
                // Wrap dateline-crossing extents back into [-180, 180).
                if lon >= 180.0 {
                    lon - 360.0
                } else {
                    lon
                }
            })
            .collect();
        // Row 0 is the northern edge.
        let lats: Vec<f64> = (0..height)
            .map(|j| self.bbox.max_lat - lat_step * (j as f64 + 0.5))
            .collect();

        debug!(path = %path.display(), width, height, "decoded image");

        let mut variables = BTreeMap::new();
        variables.insert("dataset".to_string(), data);

        Ok(SourceImage {
            variables,
            lons,
            lats,
            timestamp: None,
            metadata: BTreeMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn test_read_grayscale_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");

        let mut img = GrayImage::new(4, 2);
        for (i, pixel) in img.pixels_mut().enumerate() {
            *pixel = Luma([i as u8 * 10]);
        }
        img.save(&path).unwrap();

        let reader = ImageReader::new(BoundingBox::new(0.0, 0.0, 4.0, 2.0));
        let out = reader.read(&path).unwrap();

        assert_eq!(out.width(), 4);
        assert_eq!(out.height(), 2);
        assert_eq!(out.lons, vec![0.5, 1.5, 2.5, 3.5]);
        assert_eq!(out.lats, vec![1.5, 0.5]);
        let data = &out.variables["dataset"];
        assert_eq!(data[0], 0.0);
        assert_eq!(data[7], 70.0);
    }
}
