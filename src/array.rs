//! Arrays, schemas, and fragments.
//!
//! These are the minimal concrete forms of the collaborators the read and
//! write paths require: a dense [`ArraySchema`] (dimensions with tile
//! extents, attributes with filter pipelines), immutable write-batch
//! [`FragmentMetadata`], and the open-[`Array`] handle tying the schema to
//! its fragments and deserialized key/value metadata.

pub mod fragment;

pub use fragment::{FragmentMetadata, StorageError, StoredPiece, StoredTile};

use std::sync::Arc;

use derive_more::Display;
use itertools::izip;
use thiserror::Error;

use crate::array_subset::ArraySubset;
use crate::datatype::Datatype;
use crate::filter::FilterPipeline;
use crate::metadata::{ArrayMetadata, MetadataError};

/// The current tile format version.
pub const FORMAT_VERSION: u32 = 1;

/// A cell or tile layout.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, Default)]
pub enum Layout {
    /// The last dimension varies fastest.
    #[default]
    #[display("row-major")]
    RowMajor,
    /// The first dimension varies fastest.
    #[display("col-major")]
    ColMajor,
    /// The array's space-tile traversal and intra-tile cell order.
    #[display("global-order")]
    GlobalOrder,
    /// No guaranteed order.
    #[display("unordered")]
    Unordered,
}

/// An array or schema construction error.
#[derive(Debug, Error)]
pub enum ArrayError {
    /// A schema with no dimensions or no attributes.
    #[error("an array schema requires at least one dimension and one attribute")]
    EmptySchema,
    /// A dimension domain with `high < low`.
    #[error("dimension `{0}` has an empty domain")]
    EmptyDomain(String),
    /// A dimension with a zero tile extent.
    #[error("dimension `{0}` has a zero tile extent")]
    ZeroTileExtent(String),
    /// Two fields share a name.
    #[error("duplicate field name `{0}`")]
    DuplicateName(String),
    /// A cell or tile order other than row- or column-major.
    #[error("cell and tile order must be row-major or col-major")]
    InvalidOrder,
    /// A fill value whose size does not match the attribute cell size.
    #[error("attribute `{0}` has a fill value of the wrong size")]
    InvalidFillValue(String),
    /// A fragment whose domain does not match the array.
    #[error("fragment `{uri}` domain {domain} is not a tile-aligned region of the array domain")]
    InvalidFragmentDomain {
        /// The fragment uri.
        uri: String,
        /// The fragment domain.
        domain: ArraySubset,
    },
    /// A metadata buffer failed to deserialize.
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// An array dimension: a name, an inclusive domain, and a space-tile extent.
#[derive(Clone, Debug)]
pub struct Dimension {
    name: String,
    domain: (u64, u64),
    tile_extent: u64,
}

impl Dimension {
    /// Create a new dimension.
    #[must_use]
    pub fn new(name: impl Into<String>, domain: (u64, u64), tile_extent: u64) -> Self {
        Self {
            name: name.into(),
            domain,
            tile_extent,
        }
    }

    /// The dimension name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The inclusive domain.
    #[must_use]
    pub fn domain(&self) -> (u64, u64) {
        self.domain
    }

    /// The space-tile extent.
    #[must_use]
    pub fn tile_extent(&self) -> u64 {
        self.tile_extent
    }
}

/// An array attribute.
#[derive(Clone, Debug)]
pub struct Attribute {
    name: String,
    datatype: Datatype,
    nullable: bool,
    var_sized: bool,
    fill_value: Vec<u8>,
    pipeline: FilterPipeline,
}

impl Attribute {
    /// Create a new fixed-size, non-nullable attribute with a zero fill
    /// value and an empty filter pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>, datatype: Datatype) -> Self {
        Self {
            name: name.into(),
            datatype,
            nullable: false,
            var_sized: false,
            fill_value: vec![0; datatype.size() as usize],
            pipeline: FilterPipeline::new(),
        }
    }

    /// Set nullability.
    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Make the attribute var-sized. Var-sized attributes have an empty
    /// fill value.
    #[must_use]
    pub fn with_var_sized(mut self, var_sized: bool) -> Self {
        self.var_sized = var_sized;
        if var_sized {
            self.fill_value = Vec::new();
        }
        self
    }

    /// Set the fill value used for cells no fragment covers.
    #[must_use]
    pub fn with_fill_value(mut self, fill_value: Vec<u8>) -> Self {
        self.fill_value = fill_value;
        self
    }

    /// Set the filter pipeline.
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: FilterPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// The attribute name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The attribute datatype.
    #[must_use]
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// Whether cells may be null.
    #[must_use]
    pub fn nullable(&self) -> bool {
        self.nullable
    }

    /// Whether cells are var-sized.
    #[must_use]
    pub fn var_sized(&self) -> bool {
        self.var_sized
    }

    /// The fill value for uncovered cells.
    #[must_use]
    pub fn fill_value(&self) -> &[u8] {
        &self.fill_value
    }

    /// The filter pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &FilterPipeline {
        &self.pipeline
    }

    /// The size in bytes of one fixed-size cell.
    #[must_use]
    pub fn cell_size(&self) -> u64 {
        self.datatype.size()
    }
}

/// A dense array schema.
#[derive(Clone, Debug)]
pub struct ArraySchema {
    dimensions: Vec<Dimension>,
    attributes: Vec<Attribute>,
    cell_order: Layout,
    tile_order: Layout,
    dense: bool,
    format_version: u32,
}

impl ArraySchema {
    /// Create a new schema.
    ///
    /// # Errors
    /// Returns [`ArrayError`] if the schema is empty, a domain or tile
    /// extent is degenerate, names clash, an order is not row- or
    /// column-major, or a fill value does not match its attribute.
    pub fn new(
        dimensions: Vec<Dimension>,
        attributes: Vec<Attribute>,
        cell_order: Layout,
        tile_order: Layout,
        dense: bool,
    ) -> Result<Self, ArrayError> {
        if dimensions.is_empty() || attributes.is_empty() {
            return Err(ArrayError::EmptySchema);
        }
        if !matches!(cell_order, Layout::RowMajor | Layout::ColMajor)
            || !matches!(tile_order, Layout::RowMajor | Layout::ColMajor)
        {
            return Err(ArrayError::InvalidOrder);
        }

        let mut names = std::collections::HashSet::new();
        for dimension in &dimensions {
            if dimension.domain.1 < dimension.domain.0 {
                return Err(ArrayError::EmptyDomain(dimension.name.clone()));
            }
            if dimension.tile_extent == 0 {
                return Err(ArrayError::ZeroTileExtent(dimension.name.clone()));
            }
            if !names.insert(dimension.name.clone()) {
                return Err(ArrayError::DuplicateName(dimension.name.clone()));
            }
        }
        for attribute in &attributes {
            if !names.insert(attribute.name.clone()) {
                return Err(ArrayError::DuplicateName(attribute.name.clone()));
            }
            if !attribute.var_sized
                && attribute.fill_value.len() as u64 != attribute.cell_size()
            {
                return Err(ArrayError::InvalidFillValue(attribute.name.clone()));
            }
        }

        Ok(Self {
            dimensions,
            attributes,
            cell_order,
            tile_order,
            dense,
            format_version: FORMAT_VERSION,
        })
    }

    /// The dimensions.
    #[must_use]
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// The attributes.
    #[must_use]
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// The number of dimensions.
    #[must_use]
    pub fn dim_num(&self) -> usize {
        self.dimensions.len()
    }

    /// The intra-tile cell order.
    #[must_use]
    pub fn cell_order(&self) -> Layout {
        self.cell_order
    }

    /// The space-tile traversal order.
    #[must_use]
    pub fn tile_order(&self) -> Layout {
        self.tile_order
    }

    /// Whether the array is dense.
    #[must_use]
    pub fn dense(&self) -> bool {
        self.dense
    }

    /// The tile format version.
    #[must_use]
    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    /// Look up an attribute by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Look up a dimension by name.
    #[must_use]
    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    /// The index of a dimension by name.
    #[must_use]
    pub fn dimension_index(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.name == name)
    }

    /// The whole domain as an array subset.
    #[must_use]
    pub fn domain(&self) -> ArraySubset {
        let start: Vec<u64> = self.dimensions.iter().map(|d| d.domain.0).collect();
        let end: Vec<u64> = self.dimensions.iter().map(|d| d.domain.1).collect();
        // The per-dimension bounds were validated at construction.
        ArraySubset::new_with_bounds_inclusive(&start, &end)
            .unwrap_or_else(|_| ArraySubset::new_empty(self.dim_num()))
    }

    /// The per-dimension space-tile extents.
    #[must_use]
    pub fn tile_extents(&self) -> Vec<u64> {
        self.dimensions.iter().map(|d| d.tile_extent).collect()
    }

    /// The space-tile coordinates containing `indices`.
    #[must_use]
    pub fn tile_coords_of(&self, indices: &[u64]) -> Vec<u64> {
        izip!(indices, &self.dimensions)
            .map(|(i, d)| (i - d.domain.0) / d.tile_extent)
            .collect()
    }

    /// The region of the space-tile grid covered by `subset`.
    ///
    /// The result is a subset in tile coordinates; `subset` must be
    /// non-empty and inside the domain.
    #[must_use]
    pub fn tile_coverage(&self, subset: &ArraySubset) -> ArraySubset {
        if subset.is_empty() {
            return ArraySubset::new_empty(self.dim_num());
        }
        let start = self.tile_coords_of(subset.start());
        let end = self.tile_coords_of(&subset.end_inc());
        ArraySubset::new_with_bounds_inclusive(&start, &end)
            .unwrap_or_else(|_| ArraySubset::new_empty(self.dim_num()))
    }

    /// The cells of the space tile at `tile_coords`, clamped to the domain.
    #[must_use]
    pub fn space_tile_subset(&self, tile_coords: &[u64]) -> ArraySubset {
        let start: Vec<u64> = izip!(tile_coords, &self.dimensions)
            .map(|(t, d)| d.domain.0 + t * d.tile_extent)
            .collect();
        let end: Vec<u64> = izip!(&start, &self.dimensions)
            .map(|(s, d)| std::cmp::min(s + d.tile_extent - 1, d.domain.1))
            .collect();
        ArraySubset::new_with_bounds_inclusive(&start, &end)
            .unwrap_or_else(|_| ArraySubset::new_empty(self.dim_num()))
    }

    /// Returns true if `subset` is a region of whole space tiles (clamped to
    /// the domain edge), as fragment domains must be.
    #[must_use]
    pub fn tile_aligned(&self, subset: &ArraySubset) -> bool {
        if subset.dimensionality() != self.dim_num() || subset.is_empty() {
            return false;
        }
        izip!(subset.start(), subset.end_inc(), &self.dimensions).all(|(start, end, d)| {
            (start - d.domain.0) % d.tile_extent == 0
                && ((end + 1 - d.domain.0) % d.tile_extent == 0 || end == d.domain.1)
        })
    }
}

/// An open array: a schema, the fragments visible to queries ordered newest
/// to oldest, and the array's key/value metadata.
#[derive(Debug)]
pub struct Array {
    schema: Arc<ArraySchema>,
    fragments: Vec<Arc<FragmentMetadata>>,
    metadata: ArrayMetadata,
}

impl Array {
    /// Open an array.
    ///
    /// Fragments are sorted newest first; `metadata_buffers` are the
    /// persisted metadata transactions ordered oldest to newest.
    ///
    /// # Errors
    /// Returns [`ArrayError`] if a fragment domain is not a tile-aligned
    /// region of the array domain or the metadata fails to deserialize.
    pub fn open(
        schema: Arc<ArraySchema>,
        mut fragments: Vec<Arc<FragmentMetadata>>,
        metadata_buffers: &[Vec<u8>],
    ) -> Result<Self, ArrayError> {
        let domain = schema.domain();
        for fragment in &fragments {
            if !domain.contains_subset(fragment.domain())
                || !schema.tile_aligned(fragment.domain())
            {
                return Err(ArrayError::InvalidFragmentDomain {
                    uri: fragment.uri().to_string(),
                    domain: fragment.domain().clone(),
                });
            }
        }
        fragments.sort_by_key(|fragment| std::cmp::Reverse(fragment.timestamp()));
        let metadata = ArrayMetadata::deserialize(metadata_buffers)?;
        Ok(Self {
            schema,
            fragments,
            metadata,
        })
    }

    /// The array schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<ArraySchema> {
        &self.schema
    }

    /// The fragments, newest first.
    #[must_use]
    pub fn fragments(&self) -> &[Arc<FragmentMetadata>] {
        &self.fragments
    }

    /// The array's key/value metadata.
    #[must_use]
    pub fn metadata(&self) -> &ArrayMetadata {
        &self.metadata
    }
}
