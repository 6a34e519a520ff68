//! Decoded view over one stream of per-step vectors.

use crate::array_store::ArrayStore;
use crate::codec::{require_decode, VectorCodec};
use crate::errors::TraceError;
use crate::storage::RowStore;
use ndarray::Array2;
use std::borrow::Cow;
use std::ops::Range;
use std::path::Path;

/// Raw rows plus the objects decoded from them.
///
/// Rows are decoded once, when the buffer is built, up to the first row the
/// codec rejects. That row's index becomes the end index. Rows written later
/// through [`SequenceBuffer::update`] are stored but not decoded, so during a
/// live recording the decoded view only covers what the buffer started with.
#[derive(Debug, Clone)]
pub struct SequenceBuffer<C: VectorCodec> {
    name: String,
    codec: C,
    rows: RowStore,
    objects: Vec<C::Item>,
    end_index: Option<usize>,
}

impl<C: VectorCodec> SequenceBuffer<C> {
    pub fn new(rows: RowStore, codec: C, name: impl Into<String>) -> Result<Self, TraceError> {
        require_decode(&codec)?;
        let mut objects = Vec::new();
        let mut end_index = None;
        for index in 0..rows.row_count() {
            let Some(row) = rows.row(index) else {
                break;
            };
            match codec.decode(&row) {
                Ok(object) => objects.push(object),
                Err(_) => {
                    end_index = Some(index);
                    break;
                }
            }
        }
        Ok(Self {
            name: name.into(),
            codec,
            rows,
            objects,
            end_index,
        })
    }

    pub fn from_array(
        rows: Array2<f64>,
        codec: C,
        name: impl Into<String>,
    ) -> Result<Self, TraceError> {
        Self::new(RowStore::Preallocated(rows), codec, name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Singular form used in diagnostics: `actions` -> `action`.
    pub fn element_name(&self) -> &str {
        self.name.strip_suffix('s').unwrap_or(&self.name)
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn rows(&self) -> &RowStore {
        &self.rows
    }

    pub fn raw_row(&self, index: usize) -> Option<Cow<'_, [f64]>> {
        self.rows.row(index)
    }

    pub fn end_index(&self) -> Option<usize> {
        self.end_index
    }

    /// Overrides the end index after the owning trace reconciled all streams.
    pub fn set_end_index(&mut self, end_index: Option<usize>) {
        self.end_index = end_index;
    }

    /// Number of valid steps.
    ///
    /// With an end index this is the end index, capped at the number of rows
    /// that actually decoded; without one it is the raw row count.
    pub fn len(&self) -> usize {
        match self.end_index {
            Some(end) => end.min(self.objects.len()),
            None => self.rows.row_count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Result<&C::Item, TraceError> {
        if index < self.len() {
            if let Some(object) = self.objects.get(index) {
                return Ok(object);
            }
        }
        Err(self.out_of_range(index))
    }

    pub fn slice(&self, range: Range<usize>) -> Result<&[C::Item], TraceError> {
        let visible = self.objects();
        if range.start > range.end {
            return Err(self.out_of_range(range.start));
        }
        if range.end > visible.len() {
            return Err(self.out_of_range(range.end.saturating_sub(1)));
        }
        Ok(&visible[range])
    }

    /// Decoded objects inside the valid range.
    pub fn objects(&self) -> &[C::Item] {
        let end = self.len().min(self.objects.len());
        &self.objects[..end]
    }

    pub fn iter(&self) -> BufferIter<'_, C::Item> {
        BufferIter::new(self.objects())
    }

    /// Stores the encoded vector for 1-based `step`: row `step - 1` of
    /// pre-allocated storage, or a new last row of growable storage.
    pub fn update(&mut self, step: usize, values: &[f64]) -> Result<(), TraceError> {
        self.rows.write(step, values, &self.name)
    }

    /// Fails exactly when [`SequenceBuffer::update`] would, without writing.
    pub fn check_update(&self, step: usize, values: &[f64]) -> Result<(), TraceError> {
        self.rows.check_write(step, values, &self.name)
    }

    /// Persists the raw rows, not the decoded objects.
    pub fn save(&self, store: &dyn ArrayStore, path: &Path) -> Result<(), TraceError> {
        store.save_rows(path, &self.rows.to_array()?)
    }

    fn out_of_range(&self, index: usize) -> TraceError {
        TraceError::IndexOutOfRange {
            index,
            element: self.element_name().to_string(),
            length: self.len(),
        }
    }
}

impl<'a, C: VectorCodec> IntoIterator for &'a SequenceBuffer<C> {
    type Item = &'a C::Item;
    type IntoIter = BufferIter<'a, C::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Finite cursor over a buffer's decoded objects.
///
/// [`BufferIter::restart`] rewinds the cursor; nothing is decoded again.
#[derive(Debug, Clone)]
pub struct BufferIter<'a, T> {
    items: &'a [T],
    cursor: usize,
}

impl<'a, T> BufferIter<'a, T> {
    fn new(items: &'a [T]) -> Self {
        Self { items, cursor: 0 }
    }

    pub fn restart(&mut self) {
        self.cursor = 0;
    }
}

impl<'a, T> Iterator for BufferIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.items.get(self.cursor)?;
        self.cursor += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.items.len().saturating_sub(self.cursor);
        (remaining, Some(remaining))
    }
}

impl<T> ExactSizeIterator for BufferIter<'_, T> {}
