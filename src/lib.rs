//! `tilestore` is the core storage engine of a multidimensional array database.
//!
//! The crate implements the machinery that sits between an array's on-disk
//! fragments and a user's query buffers:
//!  - [`query::ReadStrategy`] executes dense read queries: it partitions a
//!    subarray, plans the result space tiles contributed by each fragment,
//!    fetches and unfilters the matching tiles concurrently, and assembles
//!    cells into user buffers in row-major, column-major, or global order,
//!    signalling overflow when the buffers are too small.
//!  - [`tile::TileStatistics`] computes per-tile min/max/sum/non-null
//!    aggregates at write time; readers decode them from the persisted
//!    statistics trailer ([`tile::trailer`]).
//!  - [`metadata::ArrayMetadata`] is the binary key/value metadata store
//!    persisted alongside an array.
//!  - [`thread_pool::ThreadPool`] carries the concurrent work with bounded
//!    parallelism and recursive work stealing, so tasks may submit and await
//!    sub-tasks without deadlocking.
//!
//! Array creation, consolidation, condition evaluation, compression codec
//! internals, and the VFS layer are external collaborators; the crate holds
//! only the minimal concrete forms of them that the read and write paths
//! require ([`array`], [`filter`]).

pub mod array;
pub mod array_subset;
pub mod config;
pub mod datatype;
pub mod filter;
pub mod metadata;
pub mod query;
pub mod thread_pool;
pub mod tile;

pub use array::{Array, ArraySchema, Attribute, Dimension, Layout};
pub use array_subset::ArraySubset;
pub use config::{global_config, global_config_mut, Config};
pub use datatype::Datatype;
pub use filter::{Filter, FilterError, FilterPipeline};
pub use metadata::{ArrayMetadata, MetadataError};
pub use query::{QueryBuffer, QueryCondition, QueryError, ReadStrategy};
pub use thread_pool::{Task, ThreadPool, ThreadPoolError};
pub use tile::{Tile, TileStatistics, WriterTile};

/// The name of the special zipped coordinates buffer.
///
/// A dense read query may materialize coordinates either into one buffer per
/// dimension (keyed by the dimension name) or into a single interleaved
/// buffer keyed by this name.
pub const COORDS: &str = "__coords";
