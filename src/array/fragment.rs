//! Fragments: immutable write batches.
//!
//! A fragment contributes cells to an array over a tile-aligned domain;
//! newer fragments logically overwrite older ones. [`FragmentMetadata`]
//! holds the fragment's persisted tiles keyed by attribute name and space
//! tile coordinates, each piece stored as filtered payload bytes followed by
//! its statistics trailer.
//!
//! Readers must load a name's tile offsets before reading its tile bytes;
//! [`FragmentMetadata::read_tile`] enforces the ordering.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::array_subset::ArraySubset;
use crate::tile::statistics::OwnedTileStats;
use crate::tile::trailer::{self, TrailerError};

/// A fragment or tile read failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A tile read for a (name, coordinates) pair the fragment does not
    /// hold.
    #[error("fragment `{path}` has no tile for `{name}` at {coords:?}")]
    TileNotFound {
        /// The fragment path.
        path: String,
        /// The attribute or dimension name.
        name: String,
        /// The space-tile coordinates.
        coords: Vec<u64>,
    },
    /// A tile read before the name's tile offsets were loaded.
    #[error("tile offsets of `{name}` are not loaded for fragment `{path}`")]
    OffsetsNotLoaded {
        /// The fragment path.
        path: String,
        /// The attribute or dimension name.
        name: String,
    },
}

/// One persisted piece of a tile: filtered payload bytes followed by the
/// statistics trailer.
#[derive(Clone, Debug)]
pub struct StoredPiece {
    bytes: Vec<u8>,
    payload_size: u64,
}

impl StoredPiece {
    /// Assemble a stored piece from a filtered payload and an encoded
    /// trailer.
    #[must_use]
    pub fn new(payload: Vec<u8>, trailer: &[u8]) -> Self {
        let payload_size = payload.len() as u64;
        let mut bytes = payload;
        bytes.extend_from_slice(trailer);
        Self {
            bytes,
            payload_size,
        }
    }

    /// The filtered payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.payload_size as usize]
    }

    /// The persisted statistics trailer bytes.
    #[must_use]
    pub fn trailer(&self) -> &[u8] {
        &self.bytes[self.payload_size as usize..]
    }

    /// Decode the persisted statistics.
    ///
    /// # Errors
    /// Returns [`TrailerError`] if the trailer is truncated or inconsistent.
    pub fn stats(&self) -> Result<OwnedTileStats, TrailerError> {
        trailer::decode(self.trailer())
    }
}

/// The persisted tile set for one (name, space tile) pair: the fixed or
/// offsets piece, the var-data piece for var-sized attributes, and the
/// validity piece for nullable attributes.
#[derive(Clone, Debug)]
pub struct StoredTile {
    /// The fixed-size piece, or the offsets piece for var-sized attributes.
    pub fixed: StoredPiece,
    /// The var-data piece.
    pub var: Option<StoredPiece>,
    /// The validity piece.
    pub validity: Option<StoredPiece>,
}

type TileKey = (String, Vec<u64>);

/// The metadata and tile store of one fragment.
#[derive(Debug)]
pub struct FragmentMetadata {
    uri: String,
    timestamp: u64,
    /// The tile-aligned region of the array domain this fragment wrote.
    domain: ArraySubset,
    format_version: u32,
    tiles: HashMap<TileKey, Arc<StoredTile>>,
    /// Names whose tile offsets have been loaded; loaded once per name and
    /// read-only afterwards.
    loaded_offsets: RwLock<HashSet<String>>,
    /// Names whose var-tile sizes have been loaded.
    loaded_var_sizes: RwLock<HashSet<String>>,
}

impl FragmentMetadata {
    /// Create an empty fragment.
    #[must_use]
    pub fn new(uri: impl Into<String>, timestamp: u64, domain: ArraySubset, format_version: u32) -> Self {
        Self {
            uri: uri.into(),
            timestamp,
            domain,
            format_version,
            tiles: HashMap::new(),
            loaded_offsets: RwLock::new(HashSet::new()),
            loaded_var_sizes: RwLock::new(HashSet::new()),
        }
    }

    /// The fragment uri.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The fragment timestamp; larger is newer.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// The tile-aligned domain the fragment wrote.
    #[must_use]
    pub fn domain(&self) -> &ArraySubset {
        &self.domain
    }

    /// The fragment's tile format version.
    #[must_use]
    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    /// Store the tile for a (name, space tile) pair, replacing any previous
    /// tile.
    pub fn put_tile(&mut self, name: &str, tile_coords: &[u64], tile: StoredTile) {
        self.tiles
            .insert((name.to_string(), tile_coords.to_vec()), Arc::new(tile));
    }

    /// Returns true if a tile is stored for the (name, space tile) pair.
    #[must_use]
    pub fn has_tile(&self, name: &str, tile_coords: &[u64]) -> bool {
        self.tiles
            .contains_key(&(name.to_string(), tile_coords.to_vec()))
    }

    /// Load the tile offsets for `name`. Idempotent; must precede any
    /// [`read_tile`](Self::read_tile) for the name.
    pub fn load_tile_offsets(&self, name: &str) {
        self.loaded_offsets.write().insert(name.to_string());
    }

    /// Load the var-tile sizes for `name`. Idempotent.
    pub fn load_tile_var_sizes(&self, name: &str) {
        self.loaded_var_sizes.write().insert(name.to_string());
    }

    /// Returns true if the var-tile sizes of `name` have been loaded.
    #[must_use]
    pub fn tile_var_sizes_loaded(&self, name: &str) -> bool {
        self.loaded_var_sizes.read().contains(name)
    }

    /// Read the stored tile for a (name, space tile) pair.
    ///
    /// # Errors
    /// Returns [`StorageError::OffsetsNotLoaded`] if the name's tile offsets
    /// were never loaded and [`StorageError::TileNotFound`] if the fragment
    /// holds no such tile.
    pub fn read_tile(
        &self,
        name: &str,
        tile_coords: &[u64],
    ) -> Result<Arc<StoredTile>, StorageError> {
        if !self.loaded_offsets.read().contains(name) {
            return Err(StorageError::OffsetsNotLoaded {
                path: self.uri.clone(),
                name: name.to_string(),
            });
        }
        self.tiles
            .get(&(name.to_string(), tile_coords.to_vec()))
            .cloned()
            .ok_or_else(|| StorageError::TileNotFound {
                path: self.uri.clone(),
                name: name.to_string(),
                coords: tile_coords.to_vec(),
            })
    }
}
