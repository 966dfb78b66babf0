//! Array subset iterators.
//!
//! Query assembly walks subsets as *cell slabs*: maximal runs of contiguous
//! cells along the layout's fastest-varying dimension. A slab is described
//! by its starting coordinates and its length, so a 2-D subset
//! `[3..4, 1..4]` iterated row-major yields the single slab `((3, 1), 3)`.

use std::iter::FusedIterator;

use super::{ArrayIndices, ArraySubset};

/// A contiguous run of cells along one dimension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellSlab {
    /// The coordinates of the slab's first cell.
    pub start: ArrayIndices,
    /// The dimension the slab runs along.
    pub dim: usize,
    /// The number of cells in the slab.
    pub num: u64,
}

impl CellSlab {
    /// The coordinates of the `k`th cell of the slab.
    #[must_use]
    pub fn cell(&self, k: u64) -> ArrayIndices {
        let mut indices = self.start.clone();
        indices[self.dim] += k;
        indices
    }
}

/// Iterates over the cell slabs of an array subset.
///
/// In row-major order the slabs run along the last dimension and are emitted
/// with the second-to-last dimension varying fastest; in column-major order
/// they run along the first dimension and are emitted with the second
/// dimension varying fastest.
pub struct Slabs<'a> {
    subset: &'a ArraySubset,
    col_major: bool,
    /// Start coordinates of the next slab, [`None`] once exhausted.
    next: Option<ArrayIndices>,
}

impl<'a> Slabs<'a> {
    /// Create a row-major cell-slab iterator.
    #[must_use]
    pub fn new_row_major(subset: &'a ArraySubset) -> Self {
        Self::new(subset, false)
    }

    /// Create a column-major cell-slab iterator.
    #[must_use]
    pub fn new_col_major(subset: &'a ArraySubset) -> Self {
        Self::new(subset, true)
    }

    fn new(subset: &'a ArraySubset, col_major: bool) -> Self {
        let next = (!subset.is_empty() && subset.dimensionality() > 0)
            .then(|| subset.start().to_vec());
        Self {
            subset,
            col_major,
            next,
        }
    }

    fn slab_dim(&self) -> usize {
        if self.col_major {
            0
        } else {
            self.subset.dimensionality() - 1
        }
    }

    /// Advance `indices` to the next slab start, odometer style over the
    /// non-slab dimensions.
    fn advance(&self, mut indices: ArrayIndices) -> Option<ArrayIndices> {
        let slab_dim = self.slab_dim();
        let start = self.subset.start();
        let shape = self.subset.shape();

        let dims: Box<dyn Iterator<Item = usize>> = if self.col_major {
            Box::new(1..self.subset.dimensionality())
        } else {
            Box::new((0..self.subset.dimensionality() - 1).rev())
        };
        for d in dims {
            debug_assert_ne!(d, slab_dim);
            indices[d] += 1;
            if indices[d] < start[d] + shape[d] {
                return Some(indices);
            }
            indices[d] = start[d];
        }
        None
    }
}

impl Iterator for Slabs<'_> {
    type Item = CellSlab;

    fn next(&mut self) -> Option<Self::Item> {
        let indices = self.next.take()?;
        let dim = self.slab_dim();
        let slab = CellSlab {
            start: indices.clone(),
            dim,
            num: self.subset.shape()[dim],
        };
        self.next = self.advance(indices);
        Some(slab)
    }
}

impl FusedIterator for Slabs<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_major_slabs() {
        let subset = ArraySubset::new_with_ranges(&[3..4, 1..4]);
        let slabs: Vec<CellSlab> = Slabs::new_row_major(&subset).collect();
        assert_eq!(
            slabs,
            vec![CellSlab {
                start: vec![3, 1],
                dim: 1,
                num: 3
            }]
        );
        assert_eq!(slabs[0].cell(0), vec![3, 1]);
        assert_eq!(slabs[0].cell(2), vec![3, 3]);
    }

    #[test]
    fn row_major_slab_order() {
        let subset = ArraySubset::new_with_ranges(&[0..2, 5..7, 0..3]);
        let starts: Vec<ArrayIndices> = Slabs::new_row_major(&subset)
            .map(|slab| slab.start)
            .collect();
        assert_eq!(
            starts,
            vec![vec![0, 5, 0], vec![0, 6, 0], vec![1, 5, 0], vec![1, 6, 0]]
        );
    }

    #[test]
    fn col_major_slabs() {
        let subset = ArraySubset::new_with_ranges(&[4..7, 1..3]);
        let slabs: Vec<CellSlab> = Slabs::new_col_major(&subset).collect();
        assert_eq!(slabs.len(), 2);
        assert_eq!(slabs[0].start, vec![4, 1]);
        assert_eq!(slabs[0].num, 3);
        assert_eq!(slabs[0].cell(2), vec![6, 1]);
        assert_eq!(slabs[1].start, vec![4, 2]);
    }

    #[test]
    fn one_dimensional() {
        let subset = ArraySubset::new_with_ranges(&[2..5]);
        assert_eq!(Slabs::new_row_major(&subset).count(), 1);
        assert_eq!(Slabs::new_col_major(&subset).count(), 1);
        let empty = ArraySubset::new_empty(2);
        assert_eq!(Slabs::new_row_major(&empty).count(), 0);
    }
}
