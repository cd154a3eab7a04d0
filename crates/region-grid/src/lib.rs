//! Regions of interest and the canonical equal-angle point grids they
//! are resampled onto.
//!
//! A region is either the whole globe or a named polygon-bounded area.
//! Grids are regular lon/lat lattices with cell centers aligned to the
//! global lattice, so the same physical point always maps to the same
//! grid index across runs.

pub mod bbox;
pub mod grid;
pub mod provider;
pub mod region;

pub use bbox::BoundingBox;
pub use grid::Grid;
pub use provider::{GeoJsonRegions, RegionProvider};
pub use region::Region;

use thiserror::Error;

/// Errors raised by region lookup and grid construction.
#[derive(Error, Debug)]
pub enum RegionError {
    /// The region code is not known to the polygon provider.
    #[error("region not found: {0}")]
    RegionNotFound(String),

    /// Every grid cell of the region was masked out by its polygon.
    #[error("region {0} yields an empty grid")]
    EmptyRegion(String),

    /// The polygon provider file could not be read.
    #[error("failed to read region file: {0}")]
    Io(#[from] std::io::Error),

    /// The polygon provider file is not valid GeoJSON.
    #[error("invalid region geometry: {0}")]
    InvalidGeometry(String),

    /// A spatial resolution that cannot form a lattice.
    #[error("invalid spatial resolution: {0}")]
    InvalidResolution(f64),
}

/// Result type for region and grid operations.
pub type Result<T> = std::result::Result<T, RegionError>;
