//! Tiles: the unit of storage and I/O.
//!
//! A [`Tile`] holds the contiguous cell bytes of one attribute or dimension
//! within one fragment. A var-sized attribute is represented as a pair of
//! tiles (offsets tile, data tile): the offsets tile holds monotonically
//! increasing byte positions into the data tile, and cell `k` occupies
//! `[offsets[k], offsets[k + 1])` with the final cell extending to the data
//! tile's end. A nullable attribute adds a validity tile with one byte per
//! cell (0 = null, non-zero = present).
//!
//! [`WriterTile`] augments a tile with the write-side bookkeeping: the
//! pre-filtered size and the statistics attached before filtering.

pub mod statistics;
pub mod trailer;

pub use statistics::{OwnedTileStats, TileStatistics, TileStats};

use crate::datatype::Datatype;

/// The size in bytes of one cell of an offsets tile.
pub const CELL_VAR_OFFSET_SIZE: u64 = 8;

/// A contiguous unit of cells of one attribute or dimension in one fragment.
#[derive(Clone, Debug)]
pub struct Tile {
    datatype: Datatype,
    cell_size: u64,
    format_version: u32,
    /// Whether `data` currently holds filtered (encoded) bytes.
    filtered: bool,
    data: Vec<u8>,
}

impl Tile {
    /// Create a new tile.
    #[must_use]
    pub fn new(
        datatype: Datatype,
        cell_size: u64,
        format_version: u32,
        filtered: bool,
        data: Vec<u8>,
    ) -> Self {
        Self {
            datatype,
            cell_size,
            format_version,
            filtered,
            data,
        }
    }

    /// Create an unfiltered offsets tile from cell byte positions.
    #[must_use]
    pub fn new_offsets(format_version: u32, offsets: &[u64]) -> Self {
        let mut data = Vec::with_capacity(offsets.len() * CELL_VAR_OFFSET_SIZE as usize);
        for offset in offsets {
            data.extend_from_slice(&offset.to_le_bytes());
        }
        Self::new(
            Datatype::UInt64,
            CELL_VAR_OFFSET_SIZE,
            format_version,
            false,
            data,
        )
    }

    /// Create an unfiltered validity tile, one byte per cell.
    #[must_use]
    pub fn new_validity(format_version: u32, validity: Vec<u8>) -> Self {
        Self::new(Datatype::UInt8, 1, format_version, false, validity)
    }

    /// The tile's datatype.
    #[must_use]
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// The size in bytes of one cell.
    #[must_use]
    pub fn cell_size(&self) -> u64 {
        self.cell_size
    }

    /// The tile's format version.
    #[must_use]
    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    /// Whether the tile currently holds filtered bytes.
    #[must_use]
    pub fn filtered(&self) -> bool {
        self.filtered
    }

    /// Set the filtered state.
    pub fn set_filtered(&mut self, filtered: bool) {
        self.filtered = filtered;
    }

    /// The tile's bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take the tile's bytes, leaving it empty.
    #[must_use]
    pub fn take_data(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    /// Replace the tile's bytes.
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }

    /// The size of the tile's bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// The number of cells held by an unfiltered tile.
    #[must_use]
    pub fn cell_num(&self) -> u64 {
        self.size() / self.cell_size
    }

    /// The bytes of cell `index` of an unfiltered fixed-size tile.
    #[must_use]
    pub fn cell(&self, index: u64) -> Option<&[u8]> {
        let cell_size = usize::try_from(self.cell_size).ok()?;
        let begin = usize::try_from(index).ok()?.checked_mul(cell_size)?;
        self.data.get(begin..begin + cell_size)
    }

    /// Decode an unfiltered offsets tile into cell byte positions.
    ///
    /// The tile size must be a multiple of [`CELL_VAR_OFFSET_SIZE`].
    #[must_use]
    pub fn offsets(&self) -> Vec<u64> {
        debug_assert_eq!(self.data.len() % CELL_VAR_OFFSET_SIZE as usize, 0);
        self.data
            .chunks_exact(CELL_VAR_OFFSET_SIZE as usize)
            .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()))
            .collect()
    }
}

/// A tile under construction by a writer, carrying the pre-filtered size and
/// the statistics attached before the tile is filtered and persisted.
#[derive(Clone, Debug)]
pub struct WriterTile {
    tile: Tile,
    pre_filtered_size: u64,
    stats: Option<OwnedTileStats>,
}

impl WriterTile {
    /// Wrap an unfiltered tile for writing.
    #[must_use]
    pub fn new(tile: Tile) -> Self {
        let pre_filtered_size = tile.size();
        Self {
            tile,
            pre_filtered_size,
            stats: None,
        }
    }

    /// The wrapped tile.
    #[must_use]
    pub fn tile(&self) -> &Tile {
        &self.tile
    }

    /// The wrapped tile, mutably.
    pub fn tile_mut(&mut self) -> &mut Tile {
        &mut self.tile
    }

    /// The size in bytes of the tile data before filtering.
    #[must_use]
    pub fn pre_filtered_size(&self) -> u64 {
        self.pre_filtered_size
    }

    /// Attach the tile statistics.
    pub fn set_statistics(&mut self, stats: OwnedTileStats) {
        self.stats = Some(stats);
    }

    /// The attached tile statistics, if computed.
    #[must_use]
    pub fn statistics(&self) -> Option<&OwnedTileStats> {
        self.stats.as_ref()
    }

    /// Unwrap into the tile and its statistics.
    #[must_use]
    pub fn into_parts(self) -> (Tile, Option<OwnedTileStats>) {
        (self.tile, self.stats)
    }
}
