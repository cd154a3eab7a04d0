//! The canonical store: one Zarr V3 group per (region, spatial
//! resolution, temporal resolution), holding 1-D `lon`/`lat` axis arrays
//! and, per variable, one 2-D `f32` array per canonical time step.
//!
//! Steps are named by date (`YYYYMMDD`), which makes the time axis
//! monotonically increasing and duplicate-free by construction; writing
//! an existing step overwrites its array in place. Variables are fully
//! independent: a calendar step with some variables present and others
//! missing is a valid state, not an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use calendar::{is_period_end, TemporalResolution};
use chrono::NaiveDate;
use region_grid::Grid;
use thiserror::Error;
use tracing::{debug, info};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::{Group, GroupBuilder};
use zarrs_filesystem::FilesystemStore;

const STEP_DATE_FORMAT: &str = "%Y%m%d";

/// Errors raised by store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The exact canonical date is absent for the variable.
    #[error("no step {date} for variable {variable}")]
    StepNotFound { variable: String, date: NaiveDate },

    /// The date is not a step of the store's calendar.
    #[error("{date} is not a {temp_res} period end")]
    NotCanonicalStep {
        date: NaiveDate,
        temp_res: TemporalResolution,
    },

    /// Data buffer does not match the store's spatial axes.
    #[error("array has {len} cells, store grid is {height}x{width}")]
    ShapeMismatch {
        len: usize,
        height: usize,
        width: usize,
    },

    /// Zarr-level failure.
    #[error("zarr error: {0}")]
    Zarr(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

fn zarr_err(e: impl ToString) -> StoreError {
    StoreError::Zarr(e.to_string())
}

/// A single stored step: the data array plus its attribute metadata.
#[derive(Debug, Clone)]
pub struct StepData {
    /// Row-major `[lat][lon]` values, NaN where invalid.
    pub data: Vec<f32>,
    /// Attribute metadata attached to the variable.
    pub metadata: BTreeMap<String, String>,
}

/// A persisted canonical dataset for one (region, spatial resolution,
/// temporal resolution) combination.
pub struct CanonicalStore {
    root: PathBuf,
    store: Arc<FilesystemStore>,
    temp_res: TemporalResolution,
    lons: Vec<f64>,
    lats: Vec<f64>,
}

impl CanonicalStore {
    /// On-disk location of a store under `data_dir`.
    pub fn store_path(
        data_dir: &Path,
        region: &str,
        sp_res: f64,
        temp_res: TemporalResolution,
    ) -> PathBuf {
        data_dir.join(format!("{region}_{sp_res}_{temp_res}.zarr"))
    }

    /// Open an existing store, or create one laid out for `grid`.
    ///
    /// Creation writes the root group attributes and the `lon`/`lat`
    /// axis arrays; both are fixed for the lifetime of the store.
    pub fn create_or_open(
        data_dir: &Path,
        region: &str,
        sp_res: f64,
        temp_res: TemporalResolution,
        grid: &Grid,
        start_date: NaiveDate,
    ) -> Result<Self> {
        let root = Self::store_path(data_dir, region, sp_res, temp_res);

        if root.join("zarr.json").exists() {
            return Self::open(&root);
        }

        std::fs::create_dir_all(&root)?;
        let store = Arc::new(FilesystemStore::new(&root).map_err(zarr_err)?);

        let mut attrs = serde_json::Map::new();
        attrs.insert("region".to_string(), serde_json::json!(region));
        attrs.insert("sp_res".to_string(), serde_json::json!(sp_res));
        attrs.insert(
            "temp_res".to_string(),
            serde_json::json!(temp_res.as_str()),
        );
        attrs.insert(
            "start_date".to_string(),
            serde_json::json!(start_date.to_string()),
        );

        let group = GroupBuilder::new()
            .attributes(attrs)
            .build(store.clone(), "/")
            .map_err(zarr_err)?;
        group.store_metadata().map_err(zarr_err)?;

        write_axis(&store, "/lon", grid.lons())?;
        write_axis(&store, "/lat", grid.lats())?;

        info!(path = %root.display(), "created canonical store");

        Ok(Self {
            root,
            store,
            temp_res,
            lons: grid.lons().to_vec(),
            lats: grid.lats().to_vec(),
        })
    }

    /// Open an existing store directory.
    pub fn open(root: &Path) -> Result<Self> {
        let store = Arc::new(FilesystemStore::new(root).map_err(zarr_err)?);
        let group = Group::open(store.clone(), "/").map_err(zarr_err)?;
        let temp_res = group
            .attributes()
            .get("temp_res")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StoreError::Zarr("store has no temp_res attribute".to_string()))?;
        let lons = read_axis(&store, "/lon")?;
        let lats = read_axis(&store, "/lat")?;
        Ok(Self {
            root: root.to_path_buf(),
            store,
            temp_res,
            lons,
            lats,
        })
    }

    /// Store directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Longitudes of the store's grid columns.
    pub fn lons(&self) -> &[f64] {
        &self.lons
    }

    /// Latitudes of the store's grid rows.
    pub fn lats(&self) -> &[f64] {
        &self.lats
    }

    /// Temporal resolution of the store's calendar.
    pub fn temp_res(&self) -> TemporalResolution {
        self.temp_res
    }

    /// Write one canonical step for a variable.
    ///
    /// A new date is appended to the variable's time axis; an existing
    /// date is overwritten in place. The date must be a period end of
    /// the store's calendar. Metadata is attached to the step's array
    /// and is idempotent to re-set. Writes for different variables at
    /// the same date are fully independent.
    pub fn write_step(
        &self,
        variable: &str,
        date: NaiveDate,
        data: &[f32],
        metadata: &BTreeMap<String, String>,
    ) -> Result<()> {
        if !is_period_end(self.temp_res, date) {
            return Err(StoreError::NotCanonicalStep {
                date,
                temp_res: self.temp_res,
            });
        }
        let height = self.lats.len();
        let width = self.lons.len();
        if data.len() != height * width {
            return Err(StoreError::ShapeMismatch {
                len: data.len(),
                height,
                width,
            });
        }

        // Variable group metadata; re-writing it is a no-op overwrite.
        let group = GroupBuilder::new()
            .build(self.store.clone(), &format!("/{variable}"))
            .map_err(zarr_err)?;
        group.store_metadata().map_err(zarr_err)?;

        let mut attrs = serde_json::Map::new();
        attrs.insert(
            "date".to_string(),
            serde_json::json!(date.to_string()),
        );
        for (key, value) in metadata {
            attrs.insert(key.clone(), serde_json::json!(value));
        }

        let node = self.step_node(variable, date);
        let chunk_grid: zarrs::array::ChunkGrid = vec![height as u64, width as u64]
            .try_into()
            .map_err(|e| StoreError::Zarr(format!("{e:?}")))?;
        let mut binding = ArrayBuilder::new(
            vec![height as u64, width as u64],
            DataType::Float32,
            chunk_grid,
            FillValue::from(f32::NAN),
        );
        let builder = binding.attributes(attrs);
        let array = builder
            .build(self.store.clone(), &node)
            .map_err(zarr_err)?;
        array.store_metadata().map_err(zarr_err)?;

        let subset =
            ArraySubset::new_with_start_shape(vec![0, 0], vec![height as u64, width as u64])
                .map_err(zarr_err)?;
        array
            .store_array_subset_elements(&subset, data)
            .map_err(zarr_err)?;

        debug!(variable, %date, "wrote canonical step");
        Ok(())
    }

    /// Variables present in the store.
    pub fn variables(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == "lon" || name == "lat" {
                continue;
            }
            if entry.path().join("zarr.json").exists() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// All canonical steps of a variable, ascending; empty when the
    /// variable has never been written.
    pub fn steps(&self, variable: &str) -> Result<Vec<NaiveDate>> {
        let dir = self.root.join(variable);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut dates = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Ok(date) = NaiveDate::parse_from_str(&name, STEP_DATE_FORMAT) {
                if entry.path().join("zarr.json").exists() {
                    dates.push(date);
                }
            }
        }
        dates.sort();
        Ok(dates)
    }

    /// Whether the exact canonical date is present for a variable.
    pub fn has_step(&self, variable: &str, date: NaiveDate) -> bool {
        self.root
            .join(variable)
            .join(date.format(STEP_DATE_FORMAT).to_string())
            .join("zarr.json")
            .exists()
    }

    /// Read one step of a variable.
    pub fn read_step(&self, variable: &str, date: NaiveDate) -> Result<StepData> {
        if !self.has_step(variable, date) {
            return Err(StoreError::StepNotFound {
                variable: variable.to_string(),
                date,
            });
        }

        let node = self.step_node(variable, date);
        let array = Array::open(self.store.clone(), &node).map_err(zarr_err)?;
        let shape = array.shape().to_vec();
        let subset =
            ArraySubset::new_with_start_shape(vec![0, 0], shape).map_err(zarr_err)?;
        let data = array
            .retrieve_array_subset_elements::<f32>(&subset)
            .map_err(zarr_err)?;

        let mut metadata = BTreeMap::new();
        for (key, value) in array.attributes() {
            if key == "date" {
                continue;
            }
            let rendered = match value.as_str() {
                Some(s) => s.to_string(),
                None => value.to_string(),
            };
            metadata.insert(key.clone(), rendered);
        }

        Ok(StepData { data, metadata })
    }

    /// Read all steps of a variable within `[from, to]`, ascending.
    pub fn read_range(
        &self,
        variable: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<(NaiveDate, StepData)>> {
        let mut out = Vec::new();
        for date in self.steps(variable)? {
            if date >= from && date <= to {
                out.push((date, self.read_step(variable, date)?));
            }
        }
        Ok(out)
    }

    /// Earliest step of a variable holding any real (non-NaN) data.
    pub fn first_non_empty_step(&self, variable: &str) -> Result<Option<NaiveDate>> {
        for date in self.steps(variable)? {
            if !self.step_is_empty(variable, date)? {
                return Ok(Some(date));
            }
        }
        Ok(None)
    }

    /// Latest step of a variable holding any real (non-NaN) data.
    ///
    /// Steps are processed strictly in date order by the sync pipeline,
    /// so this always reflects a contiguous prefix of written data.
    pub fn last_non_empty_step(&self, variable: &str) -> Result<Option<NaiveDate>> {
        for date in self.steps(variable)?.into_iter().rev() {
            if !self.step_is_empty(variable, date)? {
                return Ok(Some(date));
            }
        }
        Ok(None)
    }

    /// Whether a present step holds no real data at all.
    pub fn step_is_empty(&self, variable: &str, date: NaiveDate) -> Result<bool> {
        let step = self.read_step(variable, date)?;
        Ok(step.data.iter().all(|v| v.is_nan()))
    }

    /// Per-point time series across all steps of a variable, taken at
    /// the grid point nearest to (lon, lat). Invalid cells are NaN.
    pub fn read_timeseries(
        &self,
        variable: &str,
        lon: f64,
        lat: f64,
    ) -> Result<Vec<(NaiveDate, f32)>> {
        let col = nearest_axis_index(&self.lons, lon);
        let row = nearest_axis_index(&self.lats, lat);

        let mut series = Vec::new();
        for date in self.steps(variable)? {
            let node = self.step_node(variable, date);
            let array = Array::open(self.store.clone(), &node).map_err(zarr_err)?;
            let subset =
                ArraySubset::new_with_start_shape(vec![row as u64, col as u64], vec![1, 1])
                    .map_err(zarr_err)?;
            let values = array
                .retrieve_array_subset_elements::<f32>(&subset)
                .map_err(zarr_err)?;
            series.push((date, values.first().copied().unwrap_or(f32::NAN)));
        }
        Ok(series)
    }

    fn step_node(&self, variable: &str, date: NaiveDate) -> String {
        format!("/{variable}/{}", date.format(STEP_DATE_FORMAT))
    }
}

fn write_axis(store: &Arc<FilesystemStore>, node: &str, values: &[f64]) -> Result<()> {
    let chunk_grid: zarrs::array::ChunkGrid = vec![values.len() as u64]
        .try_into()
        .map_err(|e| StoreError::Zarr(format!("{e:?}")))?;
    let array = ArrayBuilder::new(
        vec![values.len() as u64],
        DataType::Float64,
        chunk_grid,
        FillValue::from(f64::NAN),
    )
    .build(store.clone(), node)
    .map_err(zarr_err)?;
    array.store_metadata().map_err(zarr_err)?;
    let subset = ArraySubset::new_with_start_shape(vec![0], vec![values.len() as u64])
        .map_err(zarr_err)?;
    array
        .store_array_subset_elements(&subset, values)
        .map_err(zarr_err)?;
    Ok(())
}

fn read_axis(store: &Arc<FilesystemStore>, node: &str) -> Result<Vec<f64>> {
    let array = Array::open(store.clone(), node).map_err(zarr_err)?;
    let len = array
        .shape()
        .first()
        .copied()
        .ok_or_else(|| StoreError::Zarr(format!("{node} is not one-dimensional")))?;
    let subset =
        ArraySubset::new_with_start_shape(vec![0], vec![len]).map_err(zarr_err)?;
    array
        .retrieve_array_subset_elements::<f64>(&subset)
        .map_err(zarr_err)
}

/// Index of the axis value nearest to `target`; ties keep the first.
fn nearest_axis_index(values: &[f64], target: f64) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, &v) in values.iter().enumerate() {
        let d = (v - target).abs();
        if d < best_dist {
            best_dist = d;
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use region_grid::Region;

    fn d(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn test_store(dir: &Path) -> CanonicalStore {
        let grid = Grid::build(&Region::Global, 30.0).unwrap();
        CanonicalStore::create_or_open(
            dir,
            "global",
            30.0,
            TemporalResolution::Dekad,
            &grid,
            d(2004, 1, 1),
        )
        .unwrap()
    }

    fn filled(store: &CanonicalStore, value: f32) -> Vec<f32> {
        vec![value; store.lons().len() * store.lats().len()]
    }

    #[test]
    fn test_write_and_read_step() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());

        let mut meta = BTreeMap::new();
        meta.insert("units".to_string(), "mm".to_string());
        store
            .write_step("rain", d(2004, 2, 10), &filled(&store, 3.0), &meta)
            .unwrap();

        let step = store.read_step("rain", d(2004, 2, 10)).unwrap();
        assert_eq!(step.data, filled(&store, 3.0));
        assert_eq!(step.metadata["units"], "mm");
    }

    #[test]
    fn test_missing_step() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        assert!(matches!(
            store.read_step("rain", d(2004, 2, 10)),
            Err(StoreError::StepNotFound { .. })
        ));
    }

    #[test]
    fn test_overwrite_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        let meta = BTreeMap::new();

        store
            .write_step("rain", d(2004, 2, 10), &filled(&store, 1.0), &meta)
            .unwrap();
        store
            .write_step("rain", d(2004, 2, 10), &filled(&store, 2.0), &meta)
            .unwrap();

        assert_eq!(store.steps("rain").unwrap(), vec![d(2004, 2, 10)]);
        let step = store.read_step("rain", d(2004, 2, 10)).unwrap();
        assert_eq!(step.data[0], 2.0);
    }

    #[test]
    fn test_time_axis_sorted_regardless_of_write_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        let meta = BTreeMap::new();

        store
            .write_step("rain", d(2004, 2, 29), &filled(&store, 1.0), &meta)
            .unwrap();
        store
            .write_step("rain", d(2004, 2, 10), &filled(&store, 1.0), &meta)
            .unwrap();
        store
            .write_step("rain", d(2004, 2, 20), &filled(&store, 1.0), &meta)
            .unwrap();

        assert_eq!(
            store.steps("rain").unwrap(),
            vec![d(2004, 2, 10), d(2004, 2, 20), d(2004, 2, 29)]
        );
    }

    #[test]
    fn test_non_empty_scan_skips_all_nan_steps() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        let meta = BTreeMap::new();

        store
            .write_step("rain", d(2004, 2, 10), &filled(&store, f32::NAN), &meta)
            .unwrap();
        store
            .write_step("rain", d(2004, 2, 20), &filled(&store, 5.0), &meta)
            .unwrap();
        store
            .write_step("rain", d(2004, 2, 29), &filled(&store, f32::NAN), &meta)
            .unwrap();

        assert_eq!(
            store.first_non_empty_step("rain").unwrap(),
            Some(d(2004, 2, 20))
        );
        assert_eq!(
            store.last_non_empty_step("rain").unwrap(),
            Some(d(2004, 2, 20))
        );
    }

    #[test]
    fn test_non_empty_none_without_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        assert_eq!(store.last_non_empty_step("rain").unwrap(), None);
    }

    #[test]
    fn test_variables_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        let meta = BTreeMap::new();

        store
            .write_step("rain", d(2004, 2, 10), &filled(&store, 1.0), &meta)
            .unwrap();

        // A partially-written calendar step is a valid state.
        assert!(store.has_step("rain", d(2004, 2, 10)));
        assert!(!store.has_step("soil", d(2004, 2, 10)));
        assert_eq!(store.variables().unwrap(), vec!["rain".to_string()]);
    }

    #[test]
    fn test_read_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        let meta = BTreeMap::new();

        for date in [d(2004, 2, 10), d(2004, 2, 20), d(2004, 2, 29), d(2004, 3, 10)] {
            store
                .write_step("rain", date, &filled(&store, 1.0), &meta)
                .unwrap();
        }

        let range = store
            .read_range("rain", d(2004, 2, 15), d(2004, 3, 5))
            .unwrap();
        let dates: Vec<_> = range.iter().map(|(date, _)| *date).collect();
        assert_eq!(dates, vec![d(2004, 2, 20), d(2004, 2, 29)]);
    }

    #[test]
    fn test_read_timeseries() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        let meta = BTreeMap::new();

        store
            .write_step("rain", d(2004, 2, 10), &filled(&store, 1.0), &meta)
            .unwrap();
        store
            .write_step("rain", d(2004, 2, 20), &filled(&store, 2.0), &meta)
            .unwrap();

        let series = store.read_timeseries("rain", 15.0, -15.0).unwrap();
        assert_eq!(series, vec![(d(2004, 2, 10), 1.0), (d(2004, 2, 20), 2.0)]);
    }

    #[test]
    fn test_reopen_preserves_axes() {
        let dir = tempfile::tempdir().unwrap();
        let (lons, lats) = {
            let store = test_store(dir.path());
            (store.lons().to_vec(), store.lats().to_vec())
        };
        let reopened = CanonicalStore::open(
            &CanonicalStore::store_path(dir.path(), "global", 30.0, TemporalResolution::Dekad),
        )
        .unwrap();
        assert_eq!(reopened.lons(), lons.as_slice());
        assert_eq!(reopened.lats(), lats.as_slice());
    }

    #[test]
    fn test_non_canonical_date_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        // Feb 15 falls inside a dekad, it does not end one.
        let result = store.write_step(
            "rain",
            d(2004, 2, 15),
            &filled(&store, 1.0),
            &BTreeMap::new(),
        );
        assert!(matches!(result, Err(StoreError::NotCanonicalStep { .. })));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        let result = store.write_step("rain", d(2004, 2, 10), &[1.0, 2.0], &BTreeMap::new());
        assert!(matches!(result, Err(StoreError::ShapeMismatch { .. })));
    }
}
