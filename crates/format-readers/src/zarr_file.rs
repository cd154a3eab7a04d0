//! Reader for Zarr-packaged gridded arrays.
//!
//! The expected layout is a `.zarr` directory with 1-D `lon` and `lat`
//! axis arrays and one 2-D `[lat][lon]` array per variable at the root.
//! Variable attributes become metadata; a `timestamp` attribute in
//! RFC 3339 form becomes the observation timestamp.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::debug;
use zarrs::array::Array;
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use crate::{FormatReader, ReaderError, Result, SourceImage};

/// Decodes Zarr groups of gridded geophysical arrays.
#[derive(Default)]
pub struct ZarrSourceReader;

impl ZarrSourceReader {
    pub fn new() -> Self {
        Self
    }
}

fn decode_err(path: &Path, reason: impl ToString) -> ReaderError {
    ReaderError::Decode {
        path: path.to_string_lossy().into_owned(),
        reason: reason.to_string(),
    }
}

/// Read a whole 1-D f64 axis array.
fn read_axis(store: &Arc<FilesystemStore>, path: &Path, node: &str) -> Result<Vec<f64>> {
    let array = Array::open(store.clone(), node).map_err(|e| decode_err(path, e))?;
    let len = array
        .shape()
        .first()
        .copied()
        .ok_or_else(|| decode_err(path, format!("{node} is not one-dimensional")))?;
    let subset = ArraySubset::new_with_start_shape(vec![0], vec![len])
        .map_err(|e| decode_err(path, e))?;
    array
        .retrieve_array_subset_elements::<f64>(&subset)
        .map_err(|e| decode_err(path, e))
}

/// Read a whole 2-D f32 variable array.
fn read_variable(
    store: &Arc<FilesystemStore>,
    path: &Path,
    node: &str,
) -> Result<(Vec<f32>, serde_json::Map<String, serde_json::Value>)> {
    let array = Array::open(store.clone(), node).map_err(|e| decode_err(path, e))?;
    let shape = array.shape().to_vec();
    if shape.len() != 2 {
        return Err(decode_err(path, format!("{node} is not two-dimensional")));
    }
    let subset = ArraySubset::new_with_start_shape(vec![0, 0], shape)
        .map_err(|e| decode_err(path, e))?;
    let data = array
        .retrieve_array_subset_elements::<f32>(&subset)
        .map_err(|e| decode_err(path, e))?;
    Ok((data, array.attributes().clone()))
}

/// Names of the root-level child nodes of a Zarr group on disk.
fn child_nodes(path: &Path) -> Result<Vec<String>> {
    let mut nodes = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        if entry.path().join("zarr.json").exists() {
            if let Some(name) = entry.file_name().to_str() {
                nodes.push(name.to_string());
            }
        }
    }
    nodes.sort();
    Ok(nodes)
}

impl FormatReader for ZarrSourceReader {
    fn read(&self, path: &Path) -> Result<SourceImage> {
        let store = Arc::new(
            FilesystemStore::new(path).map_err(|e| decode_err(path, e))?,
        );

        let lons = read_axis(&store, path, "/lon")?;
        let lats = read_axis(&store, path, "/lat")?;

        let mut variables = BTreeMap::new();
        let mut metadata = BTreeMap::new();
        let mut timestamp: Option<NaiveDateTime> = None;

        for node in child_nodes(path)? {
            if node == "lon" || node == "lat" {
                continue;
            }
            let (data, attrs) = read_variable(&store, path, &format!("/{node}"))?;
            if data.len() != lons.len() * lats.len() {
                return Err(decode_err(
                    path,
                    format!("variable {node} does not match the lon/lat axes"),
                ));
            }

            let mut var_meta = BTreeMap::new();
            for (key, value) in &attrs {
                if key == "timestamp" {
                    timestamp = value
                        .as_str()
                        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                        .map(|dt| dt.naive_utc());
                    continue;
                }
                let rendered = match value.as_str() {
                    Some(s) => s.to_string(),
                    None => value.to_string(),
                };
                var_meta.insert(key.clone(), rendered);
            }
            metadata.insert(node.clone(), var_meta);
            variables.insert(node, data);
        }

        if variables.is_empty() {
            return Err(decode_err(path, "no variable arrays found"));
        }

        debug!(
            path = %path.display(),
            variables = variables.len(),
            "decoded zarr source"
        );

        Ok(SourceImage {
            variables,
            lons,
            lats,
            timestamp,
            metadata,
        })
    }
}
