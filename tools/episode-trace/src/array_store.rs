//! Compressed named-array containers.
//!
//! Each trace file holds exactly one array under [`ARRAY_FIELD`]. The
//! production store writes NumPy `.npz` archives so traces stay readable
//! with `numpy.load(path)["data"]`.

use crate::errors::TraceError;
use ndarray::{Array, Array1, Array2, ArrayBase, Data, Dimension};
use ndarray_npy::{NpzReader, NpzWriter};
use std::collections::HashMap;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const ARRAY_FIELD: &str = "data";

pub trait ArrayStore: Send + Sync {
    fn save_rows(&self, path: &Path, rows: &Array2<f64>) -> Result<(), TraceError>;
    fn save_series(&self, path: &Path, values: &Array1<f64>) -> Result<(), TraceError>;
    fn load_rows(&self, path: &Path) -> Result<Array2<f64>, TraceError>;
    fn load_series(&self, path: &Path) -> Result<Array1<f64>, TraceError>;
}

pub struct NpzArrayStore;

impl ArrayStore for NpzArrayStore {
    fn save_rows(&self, path: &Path, rows: &Array2<f64>) -> Result<(), TraceError> {
        write_npz(path, rows)
    }

    fn save_series(&self, path: &Path, values: &Array1<f64>) -> Result<(), TraceError> {
        write_npz(path, values)
    }

    fn load_rows(&self, path: &Path) -> Result<Array2<f64>, TraceError> {
        read_npz(path)
    }

    fn load_series(&self, path: &Path) -> Result<Array1<f64>, TraceError> {
        read_npz(path)
    }
}

fn storage_error(path: &Path, error: impl std::fmt::Display) -> TraceError {
    TraceError::Storage(format!("{}: {error}", path.display()))
}

fn write_npz<S, D>(path: &Path, array: &ArrayBase<S, D>) -> Result<(), TraceError>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let file = File::create(path).map_err(|e| storage_error(path, e))?;
    let mut npz = NpzWriter::new_compressed(file);
    npz.add_array(ARRAY_FIELD, array)
        .map_err(|e| storage_error(path, e))?;
    npz.finish().map_err(|e| storage_error(path, e))?;
    Ok(())
}

fn read_npz<D: Dimension>(path: &Path) -> Result<Array<f64, D>, TraceError> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            TraceError::MissingTraceFile {
                file: path.display().to_string(),
            }
        } else {
            storage_error(path, e)
        }
    })?;
    let mut npz = NpzReader::new(file).map_err(|e| storage_error(path, e))?;
    // numpy names the member `data.npy`; accept the bare name too.
    let member = npz
        .names()
        .map_err(|e| storage_error(path, e))?
        .into_iter()
        .find(|name| name == ARRAY_FIELD || name.strip_suffix(".npy") == Some(ARRAY_FIELD))
        .ok_or_else(|| storage_error(path, format!("no `{ARRAY_FIELD}` array")))?;
    npz.by_name(&member).map_err(|e| storage_error(path, e))
}

#[derive(Debug, Clone, PartialEq)]
enum StoredArray {
    Rows(Array2<f64>),
    Series(Array1<f64>),
}

/// In-memory store for tests.
#[derive(Default, Clone)]
pub struct MemoryArrayStore {
    arrays: Arc<Mutex<HashMap<PathBuf, StoredArray>>>,
}

impl MemoryArrayStore {
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths = self
            .arrays
            .lock()
            .expect("arrays lock")
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        paths.sort();
        paths
    }

    pub fn remove(&self, path: &Path) {
        self.arrays.lock().expect("arrays lock").remove(path);
    }

    fn get(&self, path: &Path) -> Result<StoredArray, TraceError> {
        self.arrays
            .lock()
            .expect("arrays lock")
            .get(path)
            .cloned()
            .ok_or_else(|| TraceError::MissingTraceFile {
                file: path.display().to_string(),
            })
    }
}

impl ArrayStore for MemoryArrayStore {
    fn save_rows(&self, path: &Path, rows: &Array2<f64>) -> Result<(), TraceError> {
        self.arrays
            .lock()
            .expect("arrays lock")
            .insert(path.to_path_buf(), StoredArray::Rows(rows.clone()));
        Ok(())
    }

    fn save_series(&self, path: &Path, values: &Array1<f64>) -> Result<(), TraceError> {
        self.arrays
            .lock()
            .expect("arrays lock")
            .insert(path.to_path_buf(), StoredArray::Series(values.clone()));
        Ok(())
    }

    fn load_rows(&self, path: &Path) -> Result<Array2<f64>, TraceError> {
        match self.get(path)? {
            StoredArray::Rows(rows) => Ok(rows),
            StoredArray::Series(_) => Err(storage_error(path, "expected a 2-d array")),
        }
    }

    fn load_series(&self, path: &Path) -> Result<Array1<f64>, TraceError> {
        match self.get(path)? {
            StoredArray::Series(values) => Ok(values),
            StoredArray::Rows(_) => Err(storage_error(path, "expected a 1-d array")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn npz_store_preserves_rows_and_nan_padding() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("actions.npz");
        let rows = array![[1.0, 2.0], [f64::NAN, f64::NAN]];

        NpzArrayStore.save_rows(&path, &rows).expect("save");
        let loaded = NpzArrayStore.load_rows(&path).expect("load");

        assert_eq!(loaded.shape(), &[2, 2]);
        assert_eq!(loaded.row(0).to_vec(), vec![1.0, 2.0]);
        assert!(loaded.row(1).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn npz_store_handles_empty_series() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rewards.npz");
        NpzArrayStore
            .save_series(&path, &Array1::<f64>::zeros(0))
            .expect("save");
        assert_eq!(NpzArrayStore.load_series(&path).expect("load").len(), 0);
    }

    #[test]
    fn missing_container_is_a_missing_trace_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = NpzArrayStore
            .load_series(&dir.path().join("rewards.npz"))
            .expect_err("missing");
        assert!(matches!(err, TraceError::MissingTraceFile { file } if file.ends_with("rewards.npz")));
    }

    #[test]
    fn memory_store_checks_rank() {
        let store = MemoryArrayStore::default();
        let path = Path::new("/trace/rewards.npz");
        store.save_series(path, &array![1.0, 2.0]).expect("save");
        assert!(store.load_rows(path).is_err());
        assert_eq!(store.load_series(path).expect("load").to_vec(), vec![1.0, 2.0]);
    }
}
