//! The filter pipeline.
//!
//! Each attribute and dimension declares a sequence of filter stages, each a
//! bidirectional byte transform (compression, checksums, byte reordering).
//! The write path runs tiles through the stages in declared order
//! ([`FilterPipeline::forward`]); the read path runs them in strict reverse
//! order ([`FilterPipeline::reverse`]), restoring the logical cell layout
//! regardless of how many stages exist.
//!
//! The pipeline operates on whole tile buffers; var-sized and nullable
//! attributes run each companion tile (offsets, var data, validity) through
//! the pipeline independently.

pub mod gzip;

pub use gzip::GzipFilter;

use std::sync::Arc;

use thiserror::Error;

use crate::tile::Tile;

/// A filter stage failure; the affected tile is dropped.
#[derive(Debug, Error)]
pub enum FilterError {
    /// A pipeline stage failed.
    #[error("filter stage `{stage}` failed: {reason}")]
    StageFailed {
        /// The stage's name.
        stage: &'static str,
        /// The underlying failure.
        reason: String,
    },
}

/// A bidirectional tile-byte transform.
pub trait Filter: Send + Sync + std::fmt::Debug {
    /// The filter's name.
    fn name(&self) -> &'static str;

    /// Apply the transform, used at write time.
    fn forward(&self, input: Vec<u8>) -> Result<Vec<u8>, FilterError>;

    /// Apply the inverse transform, used at read time.
    fn reverse(&self, input: Vec<u8>) -> Result<Vec<u8>, FilterError>;
}

/// An ordered sequence of filter stages.
#[derive(Clone, Debug, Default)]
pub struct FilterPipeline {
    stages: Vec<Arc<dyn Filter>>,
}

impl FilterPipeline {
    /// Create an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: Arc<dyn Filter>) -> Self {
        self.stages.push(stage);
        self
    }

    /// The number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the pipeline has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run a tile through the stages in declared order.
    ///
    /// The tile buffer is replaced by the pipeline output and the tile is
    /// marked filtered.
    pub fn forward(&self, tile: &mut Tile) -> Result<(), FilterError> {
        let mut data = tile.take_data();
        for stage in &self.stages {
            data = stage.forward(data)?;
        }
        tile.set_data(data);
        tile.set_filtered(true);
        Ok(())
    }

    /// Run a var-sized tile pair through the stages in declared order.
    pub fn forward_var(&self, tile: &mut Tile, tile_var: &mut Tile) -> Result<(), FilterError> {
        self.forward(tile)?;
        self.forward(tile_var)
    }

    /// Run a nullable tile and its validity tile through the stages in
    /// declared order.
    pub fn forward_nullable(
        &self,
        tile: &mut Tile,
        tile_validity: &mut Tile,
    ) -> Result<(), FilterError> {
        self.forward(tile)?;
        self.forward(tile_validity)
    }

    /// Run a tile through the stages in reverse-declared order.
    ///
    /// The tile buffer is replaced by the pipeline output and the tile is
    /// marked unfiltered.
    pub fn reverse(&self, tile: &mut Tile) -> Result<(), FilterError> {
        let mut data = tile.take_data();
        for stage in self.stages.iter().rev() {
            data = stage.reverse(data)?;
        }
        tile.set_data(data);
        tile.set_filtered(false);
        Ok(())
    }

    /// Run a var-sized tile pair through the stages in reverse order.
    pub fn reverse_var(&self, tile: &mut Tile, tile_var: &mut Tile) -> Result<(), FilterError> {
        self.reverse(tile)?;
        self.reverse(tile_var)
    }

    /// Run a nullable tile and its validity tile through the stages in
    /// reverse order.
    pub fn reverse_nullable(
        &self,
        tile: &mut Tile,
        tile_validity: &mut Tile,
    ) -> Result<(), FilterError> {
        self.reverse(tile)?;
        self.reverse(tile_validity)
    }
}
