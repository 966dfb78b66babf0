//! Result tiles and result space tiles.

use std::collections::HashMap;
use std::sync::Arc;

use crate::array::{ArraySchema, FragmentMetadata, Layout};
use crate::array_subset::iterators::Slabs;
use crate::array_subset::ArraySubset;
use crate::tile::Tile;

/// The unfiltered (or yet-to-be-unfiltered) tiles of one attribute within
/// one result tile: the fixed or offsets tile, plus the var-data and
/// validity companions where the attribute calls for them.
#[derive(Debug)]
pub struct TileTuple {
    /// The fixed-size tile, or the offsets tile for var-sized attributes.
    pub fixed: Tile,
    /// The var-data tile.
    pub var: Option<Tile>,
    /// The validity tile.
    pub validity: Option<Tile>,
}

/// The tiles read for one (fragment, space tile) pair on behalf of one
/// partition. Lives only for the duration of that partition.
#[derive(Debug)]
pub struct ResultTile {
    fragment_idx: usize,
    tile_coords: Vec<u64>,
    tiles: HashMap<String, TileTuple>,
}

impl ResultTile {
    /// Create an empty result tile.
    #[must_use]
    pub fn new(fragment_idx: usize, tile_coords: Vec<u64>) -> Self {
        Self {
            fragment_idx,
            tile_coords,
            tiles: HashMap::new(),
        }
    }

    /// The index of the owning fragment in the array's newest-first list.
    #[must_use]
    pub fn fragment_idx(&self) -> usize {
        self.fragment_idx
    }

    /// The space-tile coordinates.
    #[must_use]
    pub fn tile_coords(&self) -> &[u64] {
        &self.tile_coords
    }

    /// Store the tiles fetched for an attribute.
    pub fn insert_tile(&mut self, name: String, tuple: TileTuple) {
        self.tiles.insert(name, tuple);
    }

    /// The tiles of an attribute.
    #[must_use]
    pub fn tile(&self, name: &str) -> Option<&TileTuple> {
        self.tiles.get(name)
    }

    /// Remove and return the tiles of an attribute.
    pub fn take_tile(&mut self, name: &str) -> Option<TileTuple> {
        self.tiles.remove(name)
    }

    /// Delete the tiles of an attribute.
    pub fn clear_tiles(&mut self, name: &str) {
        self.tiles.remove(name);
    }
}

/// The fragments contributing to one space tile, newest first.
///
/// A fragment fully covered by a more recent fragment within the tile
/// cannot contribute results and is omitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultSpaceTile {
    tile_coords: Vec<u64>,
    subset: ArraySubset,
    fragments: Vec<usize>,
}

impl ResultSpaceTile {
    /// The space-tile coordinates.
    #[must_use]
    pub fn tile_coords(&self) -> &[u64] {
        &self.tile_coords
    }

    /// The cells of the space tile, clamped to the array domain.
    #[must_use]
    pub fn subset(&self) -> &ArraySubset {
        &self.subset
    }

    /// Indices of the contributing fragments in the array's newest-first
    /// list, newest first.
    #[must_use]
    pub fn fragments(&self) -> &[usize] {
        &self.fragments
    }
}

/// Compute the result space tiles of a partition, in the schema's tile
/// order.
///
/// For each space tile the partition touches, the contributing fragments
/// are listed newest first; once a fragment's domain fully covers the tile,
/// older fragments are dropped.
#[must_use]
pub fn compute_result_space_tiles(
    schema: &ArraySchema,
    fragments: &[Arc<FragmentMetadata>],
    partition: &ArraySubset,
) -> Vec<ResultSpaceTile> {
    let coverage = schema.tile_coverage(partition);
    let slabs = match schema.tile_order() {
        Layout::ColMajor => Slabs::new_col_major(&coverage),
        _ => Slabs::new_row_major(&coverage),
    };

    let mut space_tiles = Vec::new();
    for slab in slabs {
        for k in 0..slab.num {
            let tile_coords = slab.cell(k);
            let subset = schema.space_tile_subset(&tile_coords);
            let mut contributing = Vec::new();
            for (idx, fragment) in fragments.iter().enumerate() {
                let overlaps = fragment
                    .domain()
                    .overlap(&subset)
                    .is_ok_and(|overlap| !overlap.is_empty());
                if overlaps {
                    contributing.push(idx);
                    if fragment.domain().contains_subset(&subset) {
                        break;
                    }
                }
            }
            space_tiles.push(ResultSpaceTile {
                tile_coords,
                subset,
                fragments: contributing,
            });
        }
    }
    space_tiles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{Attribute, Dimension};
    use crate::datatype::Datatype;

    fn schema_4x4() -> ArraySchema {
        ArraySchema::new(
            vec![
                Dimension::new("rows", (1, 4), 2),
                Dimension::new("cols", (1, 4), 2),
            ],
            vec![Attribute::new("a", Datatype::Int32)],
            Layout::RowMajor,
            Layout::RowMajor,
            true,
        )
        .unwrap()
    }

    fn fragment(uri: &str, timestamp: u64, ranges: &[std::ops::Range<u64>]) -> Arc<FragmentMetadata> {
        Arc::new(FragmentMetadata::new(
            uri,
            timestamp,
            ArraySubset::new_with_ranges(ranges),
            1,
        ))
    }

    #[test]
    fn newer_full_cover_omits_older() {
        let schema = schema_4x4();
        // Newest first, as an open array orders them.
        let fragments = vec![
            fragment("new", 2, &[1..5, 1..5]),
            fragment("old", 1, &[1..5, 1..5]),
        ];
        let partition = ArraySubset::new_with_ranges(&[1..5, 1..5]);
        let space_tiles = compute_result_space_tiles(&schema, &fragments, &partition);
        assert_eq!(space_tiles.len(), 4);
        for space_tile in &space_tiles {
            assert_eq!(space_tile.fragments(), &[0]);
        }
    }

    #[test]
    fn partial_cover_keeps_older() {
        let schema = schema_4x4();
        let fragments = vec![
            // Newest covers only the top half (rows 1..=2).
            fragment("new", 2, &[1..3, 1..5]),
            fragment("old", 1, &[1..5, 1..5]),
        ];
        let partition = ArraySubset::new_with_ranges(&[1..5, 1..5]);
        let space_tiles = compute_result_space_tiles(&schema, &fragments, &partition);
        assert_eq!(space_tiles.len(), 4);
        // Top tiles: the newest fully covers them, the older is omitted.
        assert_eq!(space_tiles[0].fragments(), &[0]);
        assert_eq!(space_tiles[1].fragments(), &[0]);
        // Bottom tiles: only the older contributes.
        assert_eq!(space_tiles[2].fragments(), &[1]);
        assert_eq!(space_tiles[3].fragments(), &[1]);
    }

    #[test]
    fn tile_order_row_major() {
        let schema = schema_4x4();
        let fragments = vec![fragment("f", 1, &[1..5, 1..5])];
        let partition = ArraySubset::new_with_ranges(&[1..5, 1..5]);
        let space_tiles = compute_result_space_tiles(&schema, &fragments, &partition);
        let coords: Vec<&[u64]> = space_tiles.iter().map(ResultSpaceTile::tile_coords).collect();
        assert_eq!(
            coords,
            vec![&[0, 0][..], &[0, 1][..], &[1, 0][..], &[1, 1][..]]
        );
    }
}
