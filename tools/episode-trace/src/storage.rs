//! Backing storage for per-timestep data.
//!
//! Two layouts exist and one is picked when a trace is created:
//! a pre-allocated array sized to the longest possible episode, written by
//! index, or a growable list that every step appends to. Step numbers handed
//! to `write` are 1-based; step `t` lands in row `t - 1`.

use crate::errors::TraceError;
use ndarray::{Array1, Array2, ArrayView1};
use std::borrow::Cow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Fixed capacity, rows overwritten in place.
    Preallocated { capacity: usize },
    /// Append-only.
    Growable,
}

impl StorageMode {
    pub fn from_flag(efficient: bool, max_timestep: usize) -> Self {
        if efficient {
            Self::Preallocated {
                capacity: max_timestep,
            }
        } else {
            Self::Growable
        }
    }

    pub fn is_efficient(self) -> bool {
        matches!(self, Self::Preallocated { .. })
    }
}

// ── RowStore ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum RowStore {
    Preallocated(Array2<f64>),
    Growable { width: usize, rows: Vec<Vec<f64>> },
}

impl RowStore {
    pub fn preallocated(capacity: usize, width: usize, fill: f64) -> Self {
        Self::Preallocated(Array2::from_elem((capacity, width), fill))
    }

    pub fn growable(width: usize) -> Self {
        Self::Growable {
            width,
            rows: Vec::new(),
        }
    }

    pub fn for_mode(mode: StorageMode, capacity: usize, width: usize, fill: f64) -> Self {
        match mode {
            StorageMode::Preallocated { .. } => Self::preallocated(capacity, width, fill),
            StorageMode::Growable => Self::growable(width),
        }
    }

    pub fn width(&self) -> usize {
        match self {
            Self::Preallocated(rows) => rows.ncols(),
            Self::Growable { width, .. } => *width,
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            Self::Preallocated(rows) => rows.nrows(),
            Self::Growable { rows, .. } => rows.len(),
        }
    }

    pub fn row(&self, index: usize) -> Option<Cow<'_, [f64]>> {
        match self {
            Self::Preallocated(rows) => {
                if index >= rows.nrows() {
                    return None;
                }
                Some(view_as_slice(rows.row(index)))
            }
            Self::Growable { rows, .. } => rows.get(index).map(|r| Cow::Borrowed(r.as_slice())),
        }
    }

    /// Fails exactly when [`RowStore::write`] would, without writing.
    pub fn check_write(&self, step: usize, values: &[f64], buffer: &str) -> Result<(), TraceError> {
        let expected = self.width();
        if values.len() != expected {
            return Err(TraceError::RowWidth {
                buffer: buffer.to_string(),
                expected,
                actual: values.len(),
            });
        }
        if let Self::Preallocated(rows) = self {
            preallocated_index(step, rows.nrows(), buffer)?;
        }
        Ok(())
    }

    /// Stores `values` for 1-based `step`. Growable storage ignores the step
    /// and appends.
    pub fn write(&mut self, step: usize, values: &[f64], buffer: &str) -> Result<(), TraceError> {
        self.check_write(step, values, buffer)?;
        match self {
            Self::Preallocated(rows) => {
                let index = preallocated_index(step, rows.nrows(), buffer)?;
                rows.row_mut(index)
                    .iter_mut()
                    .zip(values)
                    .for_each(|(slot, value)| *slot = *value);
            }
            Self::Growable { rows, .. } => rows.push(values.to_vec()),
        }
        Ok(())
    }

    pub fn to_array(&self) -> Result<Array2<f64>, TraceError> {
        match self {
            Self::Preallocated(rows) => Ok(rows.clone()),
            Self::Growable { width, rows } => {
                let flat = rows.iter().flatten().copied().collect::<Vec<_>>();
                Array2::from_shape_vec((rows.len(), *width), flat)
                    .map_err(|e| TraceError::Storage(e.to_string()))
            }
        }
    }
}

fn view_as_slice(view: ArrayView1<'_, f64>) -> Cow<'_, [f64]> {
    match view.to_slice() {
        Some(slice) => Cow::Borrowed(slice),
        None => Cow::Owned(view.to_vec()),
    }
}

fn preallocated_index(step: usize, rows: usize, buffer: &str) -> Result<usize, TraceError> {
    match step.checked_sub(1) {
        Some(index) if index < rows => Ok(index),
        _ => Err(TraceError::IndexOutOfRange {
            index: step.saturating_sub(1),
            element: buffer.to_string(),
            length: rows,
        }),
    }
}

// ── SeriesStore ───────────────────────────────────────────────────────────────

/// One scalar per step (rewards, step durations).
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesStore {
    Preallocated(Array1<f64>),
    Growable(Vec<f64>),
}

impl SeriesStore {
    pub fn for_mode(mode: StorageMode, capacity: usize, fill: f64) -> Self {
        match mode {
            StorageMode::Preallocated { .. } => {
                Self::Preallocated(Array1::from_elem(capacity, fill))
            }
            StorageMode::Growable => Self::Growable(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Preallocated(values) => values.len(),
            Self::Growable(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        match self {
            Self::Preallocated(values) => values.get(index).copied(),
            Self::Growable(values) => values.get(index).copied(),
        }
    }

    pub fn check_write(&self, step: usize, buffer: &str) -> Result<(), TraceError> {
        if let Self::Preallocated(values) = self {
            preallocated_index(step, values.len(), buffer)?;
        }
        Ok(())
    }

    pub fn write(&mut self, step: usize, value: f64, buffer: &str) -> Result<(), TraceError> {
        match self {
            Self::Preallocated(values) => {
                let index = preallocated_index(step, values.len(), buffer)?;
                values[index] = value;
            }
            Self::Growable(values) => values.push(value),
        }
        Ok(())
    }

    pub fn to_array(&self) -> Array1<f64> {
        match self {
            Self::Preallocated(values) => values.clone(),
            Self::Growable(values) => Array1::from_vec(values.clone()),
        }
    }

    pub fn to_vec(&self) -> Vec<f64> {
        match self {
            Self::Preallocated(values) => values.to_vec(),
            Self::Growable(values) => values.clone(),
        }
    }
}
