//! Per-query read state and subarray partitioning.

use std::collections::VecDeque;

use crate::array::Layout;
use crate::array_subset::ArraySubset;
use crate::query::QueryError;

/// Produces the stream of partitions a read query is served in.
///
/// Implementations must uphold: every partition is a subset of the original
/// subarray, successive partitions are disjoint, the union of all partitions
/// equals the original subarray, and when a partition is reported
/// unsplittable, [`split_current`](Self::split_current) leaves it unchanged.
pub trait SubarrayPartitioner: Send + std::fmt::Debug {
    /// Returns true when the partition stream is exhausted.
    fn done(&self) -> bool;

    /// Advance to the next partition.
    ///
    /// Returns true if the new current partition is unsplittable.
    fn next(&mut self) -> Result<bool, QueryError>;

    /// Split the current partition, keeping its first half current.
    ///
    /// Returns true if the partition cannot be split.
    fn split_current(&mut self) -> Result<bool, QueryError>;

    /// The current partition, if any.
    fn current(&self) -> Option<&ArraySubset>;
}

/// A partitioner that halves partitions until they fit a cell budget.
///
/// Splits follow the query layout (the first splittable dimension for
/// row-major and global order, the last for column-major), so concatenating
/// the partitions preserves the layout's traversal order.
#[derive(Debug)]
pub struct BudgetPartitioner {
    pending: VecDeque<ArraySubset>,
    current: Option<ArraySubset>,
    budget_cells: u64,
    col_major: bool,
}

impl BudgetPartitioner {
    /// Create a partitioner over `subarray` with a budget in cells.
    #[must_use]
    pub fn new(subarray: ArraySubset, budget_cells: u64, layout: Layout) -> Self {
        let mut pending = VecDeque::new();
        if !subarray.is_empty() {
            pending.push_back(subarray);
        }
        Self {
            pending,
            current: None,
            budget_cells: budget_cells.max(1),
            col_major: matches!(layout, Layout::ColMajor),
        }
    }

    fn split(&self, partition: &ArraySubset) -> Option<(ArraySubset, ArraySubset)> {
        if self.col_major {
            partition.split_half_col_major()
        } else {
            partition.split_half_row_major()
        }
    }
}

impl SubarrayPartitioner for BudgetPartitioner {
    fn done(&self) -> bool {
        self.current.is_none() && self.pending.is_empty()
    }

    fn next(&mut self) -> Result<bool, QueryError> {
        let Some(mut partition) = self.pending.pop_front() else {
            self.current = None;
            return Ok(false);
        };
        let mut unsplittable = false;
        while partition.num_elements() > self.budget_cells {
            match self.split(&partition) {
                Some((first, second)) => {
                    self.pending.push_front(second);
                    partition = first;
                }
                None => {
                    unsplittable = true;
                    break;
                }
            }
        }
        self.current = Some(partition);
        Ok(unsplittable)
    }

    fn split_current(&mut self) -> Result<bool, QueryError> {
        let Some(partition) = self.current.take() else {
            return Ok(false);
        };
        match self.split(&partition) {
            Some((first, second)) => {
                self.pending.push_front(second);
                self.current = Some(first);
                Ok(false)
            }
            None => {
                self.current = Some(partition);
                Ok(true)
            }
        }
    }

    fn current(&self) -> Option<&ArraySubset> {
        self.current.as_ref()
    }
}

/// The mutable state of one read query.
#[derive(Debug)]
pub struct ReadState {
    /// True if the query produced results that did not fit the user
    /// buffers.
    overflowed: bool,
    /// True if the current partition cannot be split further.
    unsplittable: bool,
    /// True once the first partition has been retrieved.
    initialized: bool,
    partitioner: Box<dyn SubarrayPartitioner>,
}

impl ReadState {
    /// Create the state for a new read query.
    #[must_use]
    pub fn new(partitioner: Box<dyn SubarrayPartitioner>) -> Self {
        Self {
            overflowed: false,
            unsplittable: false,
            initialized: false,
            partitioner,
        }
    }

    /// Retrieve the first partition.
    pub fn initialize(&mut self) -> Result<(), QueryError> {
        self.unsplittable = self.partitioner.next()?;
        self.initialized = true;
        Ok(())
    }

    /// Returns true once the first partition has been retrieved.
    #[must_use]
    pub fn initialized(&self) -> bool {
        self.initialized
    }

    /// Returns true when there are no more partitions.
    #[must_use]
    pub fn done(&self) -> bool {
        self.partitioner.done()
    }

    /// Retrieve the next partition.
    pub fn next(&mut self) -> Result<(), QueryError> {
        self.unsplittable = self.partitioner.next()?;
        Ok(())
    }

    /// Split the current partition, typically after it was estimated to fit
    /// the user buffers but did not.
    pub fn split_current(&mut self) -> Result<(), QueryError> {
        self.unsplittable = self.partitioner.split_current()?;
        Ok(())
    }

    /// The current partition, if any.
    #[must_use]
    pub fn current(&self) -> Option<&ArraySubset> {
        self.partitioner.current()
    }

    /// Returns true if the current partition cannot be split further.
    #[must_use]
    pub fn unsplittable(&self) -> bool {
        self.unsplittable
    }

    /// Returns true if the query overflowed the user buffers.
    #[must_use]
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub(crate) fn set_overflowed(&mut self, overflowed: bool) {
        self.overflowed = overflowed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_partitions(mut partitioner: BudgetPartitioner) -> Vec<ArraySubset> {
        let mut partitions = Vec::new();
        loop {
            partitioner.next().unwrap();
            match partitioner.current() {
                Some(partition) => partitions.push(partition.clone()),
                None => break,
            }
        }
        partitions
    }

    #[test]
    fn partitions_cover_disjointly() {
        let subarray = ArraySubset::new_with_ranges(&[0..4, 0..6]);
        let partitions = collect_partitions(BudgetPartitioner::new(
            subarray.clone(),
            5,
            Layout::RowMajor,
        ));

        let total: u64 = partitions.iter().map(ArraySubset::num_elements).sum();
        assert_eq!(total, subarray.num_elements());
        for partition in &partitions {
            assert!(partition.num_elements() <= 5);
            assert!(subarray.contains_subset(partition));
        }
        for (i, a) in partitions.iter().enumerate() {
            for b in &partitions[i + 1..] {
                assert!(a.overlap(b).unwrap().is_empty());
            }
        }
    }

    #[test]
    fn row_major_partitions_preserve_order() {
        let subarray = ArraySubset::new_with_ranges(&[0..4, 0..2]);
        let partitions =
            collect_partitions(BudgetPartitioner::new(subarray, 2, Layout::RowMajor));
        // Each partition is one row; rows arrive top to bottom.
        let rows: Vec<u64> = partitions.iter().map(|p| p.start()[0]).collect();
        assert_eq!(rows, vec![0, 1, 2, 3]);
    }

    #[test]
    fn unsplittable_single_cell() {
        let subarray = ArraySubset::new_with_ranges(&[0..1, 0..1]);
        let mut partitioner = BudgetPartitioner::new(subarray, 1, Layout::RowMajor);
        assert!(!partitioner.next().unwrap());
        assert!(partitioner.split_current().unwrap());
        assert_eq!(
            partitioner.current(),
            Some(&ArraySubset::new_with_ranges(&[0..1, 0..1]))
        );
    }

    #[test]
    fn read_state_transitions() {
        let subarray = ArraySubset::new_with_ranges(&[0..2, 0..2]);
        let partitioner = BudgetPartitioner::new(subarray, u64::MAX, Layout::RowMajor);
        let mut state = ReadState::new(Box::new(partitioner));
        assert!(!state.initialized());
        state.initialize().unwrap();
        assert!(state.initialized());
        assert!(state.current().is_some());
        assert!(!state.done());

        state.split_current().unwrap();
        assert!(!state.unsplittable());
        assert_eq!(
            state.current(),
            Some(&ArraySubset::new_with_ranges(&[0..1, 0..2]))
        );

        state.next().unwrap();
        assert!(state.current().is_some());
        state.next().unwrap();
        assert!(state.done());
    }
}
