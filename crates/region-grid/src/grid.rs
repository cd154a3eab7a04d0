//! Canonical equal-angle point grids.

use tracing::debug;

use crate::{BoundingBox, Region, RegionError, Result};

/// A regular lon/lat point lattice clipped to a region.
///
/// `lons` run west to east (for dateline-crossing regions the eastern
/// slice up to 180° comes first, then the western slice from -180°),
/// `lats` run south to north. Data buffers associated with a grid are
/// row-major `[lat][lon]`. The mask marks cells whose center lies
/// strictly inside the region polygon.
#[derive(Debug, Clone)]
pub struct Grid {
    lons: Vec<f64>,
    lats: Vec<f64>,
    mask: Vec<bool>,
    sp_res: f64,
}

impl Grid {
    /// Build the canonical grid for a region at a spatial resolution.
    ///
    /// The global grid covers ±180°/±90° with cell centers offset by
    /// half the resolution. A named region's lattice is restricted to
    /// its bounding box, kept aligned with the global lattice, and
    /// trimmed of outer rows and columns that contain no in-polygon
    /// point. Fails with [`RegionError::EmptyRegion`] when the polygon
    /// masks out every cell.
    pub fn build(region: &Region, sp_res: f64) -> Result<Grid> {
        if !(sp_res > 0.0) || sp_res > 180.0 {
            return Err(RegionError::InvalidResolution(sp_res));
        }

        match region {
            Region::Global => {
                let lons = axis(-180.0 + sp_res / 2.0, 180.0, sp_res);
                let lats = axis(-90.0 + sp_res / 2.0, 90.0, sp_res);
                let mask = vec![true; lons.len() * lats.len()];
                Ok(Grid {
                    lons,
                    lats,
                    mask,
                    sp_res,
                })
            }
            Region::Named { code, bbox, .. } => {
                let (lons, lats) = region_axes(bbox, sp_res);
                let grid = mask_and_trim(region, lons, lats, sp_res)?;
                debug!(
                    region = %code,
                    width = grid.width(),
                    height = grid.height(),
                    "built region grid"
                );
                Ok(grid)
            }
        }
    }

    /// Number of longitude columns.
    pub fn width(&self) -> usize {
        self.lons.len()
    }

    /// Number of latitude rows.
    pub fn height(&self) -> usize {
        self.lats.len()
    }

    /// Total number of grid points.
    pub fn len(&self) -> usize {
        self.mask.len()
    }

    /// True when the grid has no points.
    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }

    /// Longitudes of the grid columns.
    pub fn lons(&self) -> &[f64] {
        &self.lons
    }

    /// Latitudes of the grid rows.
    pub fn lats(&self) -> &[f64] {
        &self.lats
    }

    /// Spatial resolution in degrees.
    pub fn sp_res(&self) -> f64 {
        self.sp_res
    }

    /// In-region mask, row-major `[lat][lon]`.
    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// Whether the cell at (row, col) lies inside the region.
    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        self.mask[row * self.lons.len() + col]
    }

    /// Coordinates of a flat grid index.
    pub fn lonlat(&self, index: usize) -> (f64, f64) {
        let row = index / self.lons.len();
        let col = index % self.lons.len();
        (self.lons[col], self.lats[row])
    }

    /// Flat index of the grid point nearest to (lon, lat).
    ///
    /// Ties are broken by the smallest index. Longitude distance wraps
    /// around the ±180° meridian.
    pub fn nearest_index(&self, lon: f64, lat: f64) -> usize {
        let col = nearest_axis_index(&self.lons, lon, true);
        let row = nearest_axis_index(&self.lats, lat, false);
        row * self.lons.len() + col
    }

    /// Bounding box of the cell centers.
    pub fn extent(&self) -> BoundingBox {
        let min_lon = self.lons.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_lon = self.lons.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min_lat = self.lats.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_lat = self.lats.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        BoundingBox::new(min_lon, min_lat, max_lon, max_lat)
    }
}

/// Ascending axis of cell centers from `start` (inclusive) to below `stop`.
fn axis(start: f64, stop: f64, step: f64) -> Vec<f64> {
    let mut values = Vec::new();
    let mut v = start;
    // Epsilon guards against accumulating one step past the boundary.
    while v < stop - step * 1e-9 {
        values.push(v);
        v += step;
    }
    values
}

/// Inclusive axis used for region bounding boxes.
fn axis_inclusive(start: f64, stop: f64, step: f64) -> Vec<f64> {
    let mut values = Vec::new();
    let mut v = start;
    while v <= stop + step * 1e-9 {
        values.push(v);
        v += step;
    }
    values
}

/// Snap a min/max coordinate pair onto the global lattice.
///
/// The lattice has cell centers at odd multiples of half the resolution,
/// so the snapped bounds are moved a half step inward or outward to land
/// on a center while still covering the requested range.
fn minmax_coord(min: f64, max: f64, sp_res: f64) -> (f64, f64) {
    let mut minval = (min / sp_res).ceil() * sp_res;
    let mut maxval = (max / sp_res).floor() * sp_res;

    if minval != maxval {
        if minval - sp_res / 2.0 < min {
            minval += sp_res / 2.0;
        } else {
            minval -= sp_res / 2.0;
        }
        if maxval + sp_res / 2.0 > max {
            maxval -= sp_res / 2.0;
        } else {
            maxval += sp_res / 2.0;
        }
    }

    (minval, maxval)
}

/// Axes for a named region's bounding box, dateline crossing included.
fn region_axes(bbox: &BoundingBox, sp_res: f64) -> (Vec<f64>, Vec<f64>) {
    let (lat_min, lat_max) = minmax_coord(bbox.min_lat, bbox.max_lat, sp_res);
    let lats = axis_inclusive(lat_min, lat_max, sp_res);

    let lons = if bbox.crosses_dateline() {
        // Eastern slice up to 180°, then western slice from -180°, both
        // on the global lattice.
        let (lon_min, _) = minmax_coord(bbox.min_lon, 180.0, sp_res);
        let (_, lon_max) = minmax_coord(-180.0, bbox.max_lon, sp_res);
        let mut lons = axis(lon_min, 180.0, sp_res);
        lons.extend(axis_inclusive(-180.0 + sp_res / 2.0, lon_max, sp_res));
        lons
    } else {
        let (lon_min, lon_max) = minmax_coord(bbox.min_lon, bbox.max_lon, sp_res);
        axis_inclusive(lon_min, lon_max, sp_res)
    };

    (lons, lats)
}

/// Compute the polygon mask and trim empty outer rows and columns.
fn mask_and_trim(region: &Region, lons: Vec<f64>, lats: Vec<f64>, sp_res: f64) -> Result<Grid> {
    let inside =
        |lon: f64, lat: f64| -> bool { region.contains(lon, lat) };

    let col_has_point = |lon: f64, lats: &[f64]| lats.iter().any(|&lat| inside(lon, lat));
    let row_has_point = |lat: f64, lons: &[f64]| lons.iter().any(|&lon| inside(lon, lat));

    // Trim from the outside in, stopping at the first occupied line.
    let mut lon_lo = 0;
    while lon_lo < lons.len() && !col_has_point(lons[lon_lo], &lats) {
        lon_lo += 1;
    }
    let mut lon_hi = lons.len();
    while lon_hi > lon_lo && !col_has_point(lons[lon_hi - 1], &lats) {
        lon_hi -= 1;
    }
    let mut lat_lo = 0;
    while lat_lo < lats.len() && !row_has_point(lats[lat_lo], &lons[lon_lo..lon_hi]) {
        lat_lo += 1;
    }
    let mut lat_hi = lats.len();
    while lat_hi > lat_lo && !row_has_point(lats[lat_hi - 1], &lons[lon_lo..lon_hi]) {
        lat_hi -= 1;
    }

    let lons: Vec<f64> = lons[lon_lo..lon_hi].to_vec();
    let lats: Vec<f64> = lats[lat_lo..lat_hi].to_vec();

    if lons.is_empty() || lats.is_empty() {
        return Err(RegionError::EmptyRegion(region.code().to_string()));
    }

    let mut mask = vec![false; lons.len() * lats.len()];
    let mut any = false;
    for (row, &lat) in lats.iter().enumerate() {
        for (col, &lon) in lons.iter().enumerate() {
            if inside(lon, lat) {
                mask[row * lons.len() + col] = true;
                any = true;
            }
        }
    }

    if !any {
        return Err(RegionError::EmptyRegion(region.code().to_string()));
    }

    Ok(Grid {
        lons,
        lats,
        mask,
        sp_res,
    })
}

/// Index of the axis value nearest to `target`; ties keep the first hit.
fn nearest_axis_index(values: &[f64], target: f64, wrap_lon: bool) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, &v) in values.iter().enumerate() {
        let mut d = (v - target).abs();
        if wrap_lon {
            d = d.min(360.0 - d);
        }
        if d < best_dist {
            best_dist = d;
            best = i;
        }
    }
    best
}
