//! Array subsets.
//!
//! An [`ArraySubset`] represents a rectangular region of an array's
//! coordinate space: the user's subarray, a partition of it, one space tile,
//! or a region of the space-tile grid itself. [`iterators`] provides the
//! cell-slab iterators used when assembling query results.

pub mod iterators;

use std::ops::Range;

use itertools::izip;
use thiserror::Error;

/// The coordinates of one array element.
pub type ArrayIndices = Vec<u64>;

/// The shape of an array or subset.
pub type ArrayShape = Vec<u64>;

/// An incompatible dimensionality error.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
#[error("incompatible dimensionality {0}, expected {1}")]
pub struct IncompatibleDimensionalityError(usize, usize);

impl IncompatibleDimensionalityError {
    /// Create a new incompatible dimensionality error.
    #[must_use]
    pub const fn new(got: usize, expected: usize) -> Self {
        Self(got, expected)
    }
}

/// An array subset.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct ArraySubset {
    /// The start of the array subset.
    start: ArrayIndices,
    /// The shape of the array subset.
    shape: ArrayShape,
}

impl std::fmt::Display for ArraySubset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.to_ranges())
    }
}

impl ArraySubset {
    /// Create a new empty array subset with the given dimensionality.
    #[must_use]
    pub fn new_empty(dimensionality: usize) -> Self {
        Self {
            start: vec![0; dimensionality],
            shape: vec![0; dimensionality],
        }
    }

    /// Create a new array subset from a list of [`Range`]s.
    #[must_use]
    pub fn new_with_ranges(ranges: &[Range<u64>]) -> Self {
        Self {
            start: ranges.iter().map(|range| range.start).collect(),
            shape: ranges
                .iter()
                .map(|range| range.end.saturating_sub(range.start))
                .collect(),
        }
    }

    /// Create a new array subset with `shape` starting at the origin.
    #[must_use]
    pub fn new_with_shape(shape: ArrayShape) -> Self {
        Self {
            start: vec![0; shape.len()],
            shape,
        }
    }

    /// Create a new array subset from a start and a shape.
    ///
    /// # Errors
    /// Returns [`IncompatibleDimensionalityError`] if the lengths of `start`
    /// and `shape` do not match.
    pub fn new_with_start_shape(
        start: ArrayIndices,
        shape: ArrayShape,
    ) -> Result<Self, IncompatibleDimensionalityError> {
        if start.len() == shape.len() {
            Ok(Self { start, shape })
        } else {
            Err(IncompatibleDimensionalityError(shape.len(), start.len()))
        }
    }

    /// Create a new array subset from inclusive per-dimension bounds.
    ///
    /// A dimension with `end < start` yields an empty subset.
    ///
    /// # Errors
    /// Returns [`IncompatibleDimensionalityError`] if the lengths of `start`
    /// and `end` do not match.
    pub fn new_with_bounds_inclusive(
        start: &[u64],
        end: &[u64],
    ) -> Result<Self, IncompatibleDimensionalityError> {
        if start.len() == end.len() {
            Ok(Self {
                start: start.to_vec(),
                shape: izip!(start, end)
                    .map(|(s, e)| (e + 1).saturating_sub(*s))
                    .collect(),
            })
        } else {
            Err(IncompatibleDimensionalityError(end.len(), start.len()))
        }
    }

    /// The start of the array subset.
    #[must_use]
    pub fn start(&self) -> &[u64] {
        &self.start
    }

    /// The shape of the array subset.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// The dimensionality of the array subset.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.start.len()
    }

    /// The exclusive end of the array subset.
    #[must_use]
    pub fn end_exc(&self) -> ArrayIndices {
        izip!(&self.start, &self.shape)
            .map(|(start, size)| start + size)
            .collect()
    }

    /// The inclusive end of the array subset.
    ///
    /// Meaningful only for a non-empty subset.
    #[must_use]
    pub fn end_inc(&self) -> ArrayIndices {
        izip!(&self.start, &self.shape)
            .map(|(start, size)| (start + size).saturating_sub(1))
            .collect()
    }

    /// The number of elements of the array subset.
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// Returns true if the array subset has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shape.iter().any(|&size| size == 0)
    }

    /// Returns true if the array subset contains `indices`.
    #[must_use]
    pub fn contains(&self, indices: &[u64]) -> bool {
        indices.len() == self.dimensionality()
            && izip!(indices, &self.start, &self.shape)
                .all(|(index, start, size)| index >= start && index - start < *size)
    }

    /// Returns true if the array subset fully contains `other`.
    #[must_use]
    pub fn contains_subset(&self, other: &ArraySubset) -> bool {
        other.dimensionality() == self.dimensionality()
            && (other.is_empty()
                || izip!(&other.start, other.end_exc(), &self.start, self.end_exc())
                    .all(|(os, oe, s, e)| os >= s && oe <= e))
    }

    /// The overlap of the array subset with `other`.
    ///
    /// The result is empty if the subsets are disjoint.
    ///
    /// # Errors
    /// Returns [`IncompatibleDimensionalityError`] if the dimensionalities
    /// do not match.
    pub fn overlap(&self, other: &ArraySubset) -> Result<ArraySubset, IncompatibleDimensionalityError> {
        if other.dimensionality() != self.dimensionality() {
            return Err(IncompatibleDimensionalityError(
                other.dimensionality(),
                self.dimensionality(),
            ));
        }
        let start: ArrayIndices = izip!(&self.start, &other.start)
            .map(|(a, b)| std::cmp::max(*a, *b))
            .collect();
        let shape: ArrayShape = izip!(&start, self.end_exc(), other.end_exc())
            .map(|(start, a, b)| std::cmp::min(a, b).saturating_sub(*start))
            .collect();
        Ok(ArraySubset { start, shape })
    }

    /// The position of `indices` in a row-major traversal of the subset.
    ///
    /// Returns [`None`] if `indices` is not inside the subset.
    #[must_use]
    pub fn linear_index_row_major(&self, indices: &[u64]) -> Option<u64> {
        if !self.contains(indices) {
            return None;
        }
        let mut index = 0;
        for (i, start, size) in izip!(indices, &self.start, &self.shape) {
            index = index * size + (i - start);
        }
        Some(index)
    }

    /// The position of `indices` in a column-major traversal of the subset.
    ///
    /// Returns [`None`] if `indices` is not inside the subset.
    #[must_use]
    pub fn linear_index_col_major(&self, indices: &[u64]) -> Option<u64> {
        if !self.contains(indices) {
            return None;
        }
        let mut index = 0;
        for d in (0..self.dimensionality()).rev() {
            index = index * self.shape[d] + (indices[d] - self.start[d]);
        }
        Some(index)
    }

    /// Split the subset in half along the first dimension with more than one
    /// element.
    ///
    /// The halves partition the subset, and concatenating a row-major
    /// traversal of the first half with one of the second reproduces a
    /// row-major traversal of the whole. Returns [`None`] if the subset has
    /// at most one element, i.e. it is unsplittable.
    #[must_use]
    pub fn split_half_row_major(&self) -> Option<(ArraySubset, ArraySubset)> {
        let dim = self.shape.iter().position(|&size| size >= 2)?;
        Some(self.split_dim(dim))
    }

    /// Split the subset in half along the last dimension with more than one
    /// element, preserving column-major traversal order across the halves.
    ///
    /// Returns [`None`] if the subset has at most one element.
    #[must_use]
    pub fn split_half_col_major(&self) -> Option<(ArraySubset, ArraySubset)> {
        let dim = self.shape.iter().rposition(|&size| size >= 2)?;
        Some(self.split_dim(dim))
    }

    fn split_dim(&self, dim: usize) -> (ArraySubset, ArraySubset) {
        let size = self.shape[dim];
        let mut first = self.clone();
        let mut second = self.clone();
        first.shape[dim] = size / 2;
        second.start[dim] = self.start[dim] + size / 2;
        second.shape[dim] = size - size / 2;
        (first, second)
    }

    /// The subset as a list of half-open ranges.
    #[must_use]
    pub fn to_ranges(&self) -> Vec<Range<u64>> {
        izip!(&self.start, &self.shape)
            .map(|(start, size)| *start..start + size)
            .collect()
    }
}
