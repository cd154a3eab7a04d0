//! Resampling of source arrays onto canonical grids.
//!
//! Spatial resampling picks the nearest source sample within a search
//! radius proportional to the target resolution; temporal aggregation
//! averages the canonical sub-steps of one calendar period. Invalid
//! cells are NaN throughout; they are never coerced to zero.

use region_grid::Grid;
use thiserror::Error;
use tracing::trace;

/// Search radius per degree of target resolution, in meters.
const SEARCH_RADIUS_M_PER_DEG: f64 = 180_000.0;
/// Mean meters per degree of latitude.
const M_PER_DEG: f64 = 111_195.0;

/// Errors raised during resampling.
#[derive(Error, Debug)]
pub enum ResampleError {
    /// Data buffer does not match its axes.
    #[error("array shape {len} does not match axes {height}x{width}")]
    ShapeMismatch {
        len: usize,
        height: usize,
        width: usize,
    },

    /// Temporal aggregation over no layers.
    #[error("cannot aggregate an empty layer stack")]
    EmptyStack,

    /// Layers of differing sizes in one stack.
    #[error("layer {index} has {len} cells, expected {expected}")]
    LayerMismatch {
        index: usize,
        len: usize,
        expected: usize,
    },
}

/// Result type for resampling operations.
pub type Result<T> = std::result::Result<T, ResampleError>;

/// Resample a source array onto a canonical grid.
///
/// For each target grid point the value is the nearest source sample
/// within the search radius; target points with no sample in range,
/// or whose nearest sample equals `nodata` (or is NaN), become NaN.
/// Points outside the grid's region mask are forced NaN regardless of
/// source data. The returned buffer is row-major `[lat][lon]` over the
/// grid axes.
pub fn resample_to_grid(
    data: &[f32],
    src_lons: &[f64],
    src_lats: &[f64],
    grid: &Grid,
    nodata: Option<f32>,
) -> Result<Vec<f32>> {
    if data.len() != src_lons.len() * src_lats.len() {
        return Err(ResampleError::ShapeMismatch {
            len: data.len(),
            height: src_lats.len(),
            width: src_lons.len(),
        });
    }

    let radius_deg = SEARCH_RADIUS_M_PER_DEG * grid.sp_res() / M_PER_DEG;
    let width = grid.width();
    let mut out = vec![f32::NAN; grid.len()];

    for row in 0..grid.height() {
        let lat = grid.lats()[row];
        let src_row = nearest_within(src_lats, lat, radius_deg, false);
        for col in 0..width {
            if !grid.is_valid(row, col) {
                continue;
            }
            let lon = grid.lons()[col];
            let (src_row, src_col) = match (src_row, nearest_within(src_lons, lon, radius_deg, true))
            {
                (Some(r), Some(c)) => (r, c),
                _ => continue,
            };

            let value = data[src_row * src_lons.len() + src_col];
            if value.is_nan() {
                continue;
            }
            if let Some(nodata) = nodata {
                if value == nodata {
                    continue;
                }
            }
            out[row * width + col] = value;
        }
    }

    trace!(
        cells = out.len(),
        valid = out.iter().filter(|v| !v.is_nan()).count(),
        "resampled source array"
    );

    Ok(out)
}

/// Element-wise mean across stacked layers, ignoring NaN cells.
///
/// A cell invalid in every layer stays NaN in the result. Used when the
/// source's native resolution is finer than the canonical calendar.
pub fn average_layers(layers: &[Vec<f32>]) -> Result<Vec<f32>> {
    let first = layers.first().ok_or(ResampleError::EmptyStack)?;
    let len = first.len();

    for (index, layer) in layers.iter().enumerate() {
        if layer.len() != len {
            return Err(ResampleError::LayerMismatch {
                index,
                len: layer.len(),
                expected: len,
            });
        }
    }

    let mut out = vec![f32::NAN; len];
    for (i, cell) in out.iter_mut().enumerate() {
        let mut sum = 0.0f64;
        let mut count = 0u32;
        for layer in layers {
            let v = layer[i];
            if !v.is_nan() {
                sum += v as f64;
                count += 1;
            }
        }
        if count > 0 {
            *cell = (sum / count as f64) as f32;
        }
    }

    Ok(out)
}

/// Linearly map valid cells from `data_range` onto `valid_range`.
///
/// Applied after resampling; NaN cells are left untouched.
pub fn scale_values(data: &mut [f32], data_range: (f32, f32), valid_range: (f32, f32)) {
    let (d0, d1) = data_range;
    let (v0, v1) = valid_range;
    if d1 == d0 {
        return;
    }
    for value in data.iter_mut() {
        if !value.is_nan() {
            *value = (*value - d0) / (d1 - d0) * (v1 - v0) + v0;
        }
    }
}

/// Nearest axis index within `radius` of `target`; ties keep the first.
fn nearest_within(values: &[f64], target: f64, radius: f64, wrap_lon: bool) -> Option<usize> {
    let mut best = None;
    let mut best_dist = f64::INFINITY;
    for (i, &v) in values.iter().enumerate() {
        let mut d = (v - target).abs();
        if wrap_lon {
            d = d.min(360.0 - d);
        }
        if d < best_dist {
            best_dist = d;
            best = Some(i);
        }
    }
    best.filter(|_| best_dist <= radius)
}

#[cfg(test)]
mod tests {
    use super::*;
    use region_grid::{BoundingBox, Grid, Region};

    fn global_grid(sp_res: f64) -> Grid {
        Grid::build(&Region::Global, sp_res).unwrap()
    }

    #[test]
    fn test_coincident_grid_roundtrip() {
        let grid = global_grid(30.0);
        let data: Vec<f32> = (0..grid.len()).map(|v| v as f32).collect();
        let out =
            resample_to_grid(&data, grid.lons(), grid.lats(), &grid, None).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_nodata_becomes_nan() {
        let grid = global_grid(30.0);
        let mut data: Vec<f32> = (0..grid.len()).map(|v| v as f32).collect();
        data[5] = 255.0;
        let out =
            resample_to_grid(&data, grid.lons(), grid.lats(), &grid, Some(255.0)).unwrap();
        assert!(out[5].is_nan());
        assert_eq!(out[6], 6.0);
    }

    #[test]
    fn test_out_of_radius_is_nan() {
        // A single source sample near the origin cannot cover the poles.
        let grid = global_grid(10.0);
        let data = vec![1.0f32];
        let out = resample_to_grid(&data, &[5.0], &[5.0], &grid, None).unwrap();
        let near = grid.nearest_index(5.0, 5.0);
        assert_eq!(out[near], 1.0);
        let far = grid.nearest_index(5.0, 85.0);
        assert!(out[far].is_nan());
    }

    #[test]
    fn test_region_mask_forces_invalid() {
        use geo::{polygon, MultiPolygon};
        // Triangle inside its bounding box: cells above the diagonal are
        // outside the region but still inside the grid frame.
        let region = Region::Named {
            code: "TR".to_string(),
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            polygon: MultiPolygon(vec![polygon![
                (x: 0.0, y: 0.0),
                (x: 10.0, y: 0.0),
                (x: 0.0, y: 10.0),
                (x: 0.0, y: 0.0),
            ]]),
        };
        let grid = Grid::build(&region, 1.0).unwrap();
        assert!(grid.mask().iter().any(|&m| !m));
        let src: Vec<f32> = vec![7.0; grid.len()];
        let out = resample_to_grid(&src, grid.lons(), grid.lats(), &grid, None).unwrap();
        for row in 0..grid.height() {
            for col in 0..grid.width() {
                let v = out[row * grid.width() + col];
                if grid.is_valid(row, col) {
                    assert_eq!(v, 7.0);
                } else {
                    assert!(v.is_nan());
                }
            }
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let grid = global_grid(30.0);
        let result = resample_to_grid(&[1.0, 2.0], &[0.0], &[0.0], &grid, None);
        assert!(matches!(result, Err(ResampleError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_average_layers_ignores_nan() {
        let layers = vec![
            vec![1.0, f32::NAN, f32::NAN],
            vec![3.0, 4.0, f32::NAN],
        ];
        let out = average_layers(&layers).unwrap();
        assert_eq!(out[0], 2.0);
        assert_eq!(out[1], 4.0);
        assert!(out[2].is_nan());
    }

    #[test]
    fn test_average_layers_errors() {
        assert!(matches!(average_layers(&[]), Err(ResampleError::EmptyStack)));
        let layers = vec![vec![1.0, 2.0], vec![1.0]];
        assert!(matches!(
            average_layers(&layers),
            Err(ResampleError::LayerMismatch { .. })
        ));
    }

    #[test]
    fn test_scale_values() {
        let mut data = vec![0.0, 127.5, 255.0, f32::NAN];
        scale_values(&mut data, (0.0, 255.0), (0.0, 100.0));
        assert_eq!(data[0], 0.0);
        assert_eq!(data[1], 50.0);
        assert_eq!(data[2], 100.0);
        assert!(data[3].is_nan());
    }
}
