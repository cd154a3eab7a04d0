//! Source-format readers.
//!
//! Every remote source delivers files in some on-disk format; the
//! pipeline only ever sees the [`SourceImage`] they decode to. One
//! reader exists per supported file type, selected by extension via
//! [`reader_for`]. Gzip-compressed files are unpacked first (see
//! [`unpack`]).

pub mod image_file;
pub mod unpack;
pub mod zarr_file;

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDateTime;
use region_grid::BoundingBox;
use thiserror::Error;

pub use image_file::ImageReader;
pub use unpack::{is_compressed, unpack};
pub use zarr_file::ZarrSourceReader;

/// Errors raised while decoding source files.
#[derive(Error, Debug)]
pub enum ReaderError {
    /// No reader is registered for this file extension.
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// The file exists but could not be decoded.
    #[error("failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for reader operations.
pub type Result<T> = std::result::Result<T, ReaderError>;

/// A decoded source file: one or more named 2-D arrays with their
/// geographic axes.
///
/// Arrays are row-major `[lat][lon]` matching the order of `lats` and
/// `lons`; axes may run in either direction. Missing samples are NaN.
#[derive(Debug, Clone)]
pub struct SourceImage {
    /// Named data arrays; sources without variable names use `dataset`.
    pub variables: BTreeMap<String, Vec<f32>>,
    /// Longitudes of the array columns.
    pub lons: Vec<f64>,
    /// Latitudes of the array rows.
    pub lats: Vec<f64>,
    /// Observation timestamp carried by the file, when present.
    pub timestamp: Option<NaiveDateTime>,
    /// Per-variable attribute metadata.
    pub metadata: BTreeMap<String, BTreeMap<String, String>>,
}

impl SourceImage {
    /// Number of columns.
    pub fn width(&self) -> usize {
        self.lons.len()
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.lats.len()
    }
}

/// Decodes a source file into a [`SourceImage`].
pub trait FormatReader: Send + Sync {
    /// Read and decode the file at `path`.
    fn read(&self, path: &Path) -> Result<SourceImage>;
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff"];

/// Select a reader for a file by its extension.
///
/// `region_bbox` supplies the geographic extent for formats that carry
/// no georeferencing of their own (plain images cover the region's
/// bounding box edge to edge).
pub fn reader_for(path: &Path, region_bbox: BoundingBox) -> Result<Box<dyn FormatReader>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if extension == "zarr" {
        return Ok(Box::new(ZarrSourceReader::new()));
    }
    if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        return Ok(Box::new(ImageReader::new(region_bbox)));
    }

    Err(ReaderError::UnsupportedFormat(
        path.to_string_lossy().into_owned(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_reader_selection() {
        let bbox = BoundingBox::global();
        assert!(reader_for(&PathBuf::from("rain_20040210.zarr"), bbox).is_ok());
        assert!(reader_for(&PathBuf::from("rain_20040210.PNG"), bbox).is_ok());
        assert!(reader_for(&PathBuf::from("rain_20040210.tiff"), bbox).is_ok());
        assert!(matches!(
            reader_for(&PathBuf::from("rain_20040210.grib2"), bbox),
            Err(ReaderError::UnsupportedFormat(_))
        ));
    }
}
