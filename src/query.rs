//! Queries.
//!
//! [`reader::ReadStrategy`] executes dense read queries against an open
//! array; [`writer::FragmentWriter`] is the write-side companion that turns
//! cell data into filtered, statistics-carrying fragment tiles. The
//! supporting types here are shared by both paths: user [`QueryBuffer`]s,
//! the [`QueryCondition`] carried by reads, and the [`QueryError`] taxonomy.

pub mod cache;
pub mod read_state;
pub mod reader;
pub mod result_tile;
pub mod writer;

pub use cache::TileCache;
pub use read_state::{BudgetPartitioner, ReadState, SubarrayPartitioner};
pub use reader::ReadStrategy;
pub use result_tile::{ResultSpaceTile, ResultTile, TileTuple};
pub use writer::FragmentWriter;

use thiserror::Error;

use crate::array::{ArrayError, ArraySchema, StorageError};
use crate::array_subset::IncompatibleDimensionalityError;
use crate::filter::FilterError;
use crate::thread_pool::ThreadPoolError;
use crate::tile::trailer::TrailerError;

/// A query failure.
///
/// Buffer overflow is not an error: a read returns success with
/// [`ReadStrategy::overflowed`] set.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The subarray does not match the schema.
    #[error("invalid subarray: {0}")]
    InvalidSubarray(String),
    /// A user buffer contradicts the schema.
    #[error("invalid buffer for `{name}`: {reason}")]
    InvalidBuffer {
        /// The buffer name.
        name: String,
        /// Why the buffer is invalid.
        reason: String,
    },
    /// A buffer or condition field that is not in the schema.
    #[error("unknown attribute or dimension `{0}`")]
    UnknownField(String),
    /// Read strategies require a dense array.
    #[error("read strategies require a dense array")]
    NotDense,
    /// An unfiltered tile does not hold the cells its schema implies.
    #[error("tile of `{name}` is inconsistent after unfiltering")]
    CorruptTile {
        /// The attribute name.
        name: String,
    },
    /// A thread-pool failure.
    #[error(transparent)]
    ThreadPool(#[from] ThreadPoolError),
    /// A fragment or tile read failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A filter-pipeline stage failure.
    #[error(transparent)]
    Filter(#[from] FilterError),
    /// A statistics-trailer decode failure.
    #[error(transparent)]
    Trailer(#[from] TrailerError),
    /// An array or fragment construction failure.
    #[error(transparent)]
    Array(#[from] ArrayError),
    /// A dimensionality mismatch in subset arithmetic.
    #[error(transparent)]
    Dimensionality(#[from] IncompatibleDimensionalityError),
}

#[derive(Clone, Debug, Default)]
struct BufferArea {
    bytes: Vec<u8>,
    size: usize,
}

impl BufferArea {
    fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity],
            size: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn written(&self) -> &[u8] {
        &self.bytes[..self.size]
    }

    /// Appends `bytes`, or returns false without writing if they do not
    /// fit.
    fn write(&mut self, bytes: &[u8]) -> bool {
        if self.size + bytes.len() > self.bytes.len() {
            return false;
        }
        self.bytes[self.size..self.size + bytes.len()].copy_from_slice(bytes);
        self.size += bytes.len();
        true
    }
}

/// Sizes of a buffer's areas, used to roll back partial writes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct BufferMark {
    data: usize,
    offsets: usize,
    validity: usize,
}

/// A user query buffer: a data area with a fixed declared capacity, plus an
/// offsets area for var-sized attributes and a validity area for nullable
/// attributes.
///
/// A read writes cell values into the data area, cell starting positions
/// (little-endian `u64`) into the offsets area, and one byte per cell into
/// the validity area. The written sizes are reset to their pre-call values
/// when a read overflows.
#[derive(Clone, Debug)]
pub struct QueryBuffer {
    data: BufferArea,
    offsets: Option<BufferArea>,
    validity: Option<BufferArea>,
    snapshot: BufferMark,
}

impl QueryBuffer {
    /// Create a fixed-size buffer with a data capacity in bytes.
    #[must_use]
    pub fn new(data_capacity: usize) -> Self {
        Self {
            data: BufferArea::new(data_capacity),
            offsets: None,
            validity: None,
            snapshot: BufferMark::default(),
        }
    }

    /// Create a var-sized buffer with offsets and data capacities in bytes.
    #[must_use]
    pub fn new_var(offsets_capacity: usize, data_capacity: usize) -> Self {
        Self {
            data: BufferArea::new(data_capacity),
            offsets: Some(BufferArea::new(offsets_capacity)),
            validity: None,
            snapshot: BufferMark::default(),
        }
    }

    /// Add a validity area with a capacity in bytes (one byte per cell).
    #[must_use]
    pub fn with_validity(mut self, validity_capacity: usize) -> Self {
        self.validity = Some(BufferArea::new(validity_capacity));
        self
    }

    /// The written cell data.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.written()
    }

    /// The written size of the data area in bytes.
    #[must_use]
    pub fn data_size(&self) -> usize {
        self.data.size
    }

    /// The data area capacity in bytes.
    #[must_use]
    pub fn data_capacity(&self) -> usize {
        self.data.capacity()
    }

    /// The written cell offsets, for var-sized attributes.
    #[must_use]
    pub fn offsets(&self) -> Option<Vec<u64>> {
        self.offsets.as_ref().map(|area| {
            area.written()
                .chunks_exact(size_of::<u64>())
                .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()))
                .collect()
        })
    }

    /// The offsets area capacity in bytes.
    #[must_use]
    pub fn offsets_capacity(&self) -> Option<usize> {
        self.offsets.as_ref().map(BufferArea::capacity)
    }

    /// The written validity bytes, for nullable attributes.
    #[must_use]
    pub fn validity(&self) -> Option<&[u8]> {
        self.validity.as_ref().map(BufferArea::written)
    }

    /// The validity area capacity in bytes.
    #[must_use]
    pub fn validity_capacity(&self) -> Option<usize> {
        self.validity.as_ref().map(BufferArea::capacity)
    }

    /// Whether the buffer has an offsets area.
    #[must_use]
    pub fn var_sized(&self) -> bool {
        self.offsets.is_some()
    }

    /// Whether the buffer has a validity area.
    #[must_use]
    pub fn nullable(&self) -> bool {
        self.validity.is_some()
    }

    /// Reset the written sizes; each read call writes from the start.
    pub(crate) fn clear_sizes(&mut self) {
        self.rollback(BufferMark::default());
    }

    pub(crate) fn snapshot_sizes(&mut self) {
        self.snapshot = self.mark();
    }

    pub(crate) fn restore_snapshot(&mut self) {
        self.rollback(self.snapshot);
    }

    pub(crate) fn mark(&self) -> BufferMark {
        BufferMark {
            data: self.data.size,
            offsets: self.offsets.as_ref().map_or(0, |area| area.size),
            validity: self.validity.as_ref().map_or(0, |area| area.size),
        }
    }

    pub(crate) fn rollback(&mut self, mark: BufferMark) {
        self.data.size = mark.data;
        if let Some(offsets) = &mut self.offsets {
            offsets.size = mark.offsets;
        }
        if let Some(validity) = &mut self.validity {
            validity.size = mark.validity;
        }
    }

    /// Append one fixed-size cell; false on overflow.
    pub(crate) fn write_fixed(&mut self, cell: &[u8]) -> bool {
        self.data.write(cell)
    }

    /// Append one var-sized cell and its starting offset; false on
    /// overflow.
    pub(crate) fn write_var(&mut self, cell: &[u8]) -> bool {
        let Some(offsets) = &mut self.offsets else {
            return false;
        };
        let offset = self.data.size as u64;
        if !offsets.write(&offset.to_le_bytes()) {
            return false;
        }
        if self.data.write(cell) {
            true
        } else {
            offsets.size -= size_of::<u64>();
            false
        }
    }

    /// Append one validity byte; false on overflow.
    pub(crate) fn write_validity(&mut self, valid: u8) -> bool {
        self.validity
            .as_mut()
            .is_some_and(|area| area.write(&[valid]))
    }
}

/// A comparison operator of a query-condition clause.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConditionOp {
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
}

/// One clause of a query condition.
#[derive(Clone, Debug)]
pub struct ConditionClause {
    /// The attribute the clause applies to.
    pub field: String,
    /// The comparison operator.
    pub op: ConditionOp,
    /// The comparison value, in the attribute's cell representation.
    pub value: Vec<u8>,
}

/// A conjunctive query condition.
///
/// The read path validates the condition and fetches the tiles of every
/// referenced attribute alongside the requested buffers; evaluating the
/// clauses over cells is the query layer's concern, not the storage
/// engine's.
#[derive(Clone, Debug, Default)]
pub struct QueryCondition {
    clauses: Vec<ConditionClause>,
}

impl QueryCondition {
    /// Create an empty condition.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a clause.
    #[must_use]
    pub fn with_clause(mut self, field: impl Into<String>, op: ConditionOp, value: Vec<u8>) -> Self {
        self.clauses.push(ConditionClause {
            field: field.into(),
            op,
            value,
        });
        self
    }

    /// Returns true if the condition has no clauses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// The clauses.
    #[must_use]
    pub fn clauses(&self) -> &[ConditionClause] {
        &self.clauses
    }

    /// The attributes the condition references.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.clauses.iter().map(|clause| clause.field.as_str())
    }

    /// Validate the condition against a schema.
    ///
    /// # Errors
    /// Returns [`QueryError`] if a field is not an attribute or a
    /// fixed-size comparison value does not match the attribute datatype.
    pub fn check(&self, schema: &ArraySchema) -> Result<(), QueryError> {
        for clause in &self.clauses {
            let Some(attribute) = schema.attribute(&clause.field) else {
                return Err(QueryError::UnknownField(clause.field.clone()));
            };
            if !attribute.var_sized() && clause.value.len() as u64 != attribute.cell_size() {
                return Err(QueryError::InvalidBuffer {
                    name: clause.field.clone(),
                    reason: format!(
                        "condition value has {} bytes, expected {} ({})",
                        clause.value.len(),
                        attribute.cell_size(),
                        attribute.datatype().name(),
                    ),
                });
            }
        }
        Ok(())
    }
}
