//! The write-side companion: builds filtered, statistics-carrying fragment
//! tiles from cell data.
//!
//! For each tile the writer computes the per-tile statistics over the
//! unfiltered cells, attaches them to the tile, runs the attribute's filter
//! pipeline forward, and persists the filtered payload with its statistics
//! trailer into the fragment.

use std::sync::Arc;

use crate::array::{ArrayError, ArraySchema, Attribute, FragmentMetadata, StoredPiece, StoredTile};
use crate::array_subset::ArraySubset;
use crate::query::QueryError;
use crate::tile::statistics::{OwnedTileStats, TileStatistics};
use crate::tile::{trailer, Tile, WriterTile};

/// Writes one fragment: an immutable batch of whole tiles over a
/// tile-aligned domain.
#[derive(Debug)]
pub struct FragmentWriter {
    schema: Arc<ArraySchema>,
    fragment: FragmentMetadata,
}

impl FragmentWriter {
    /// Create a writer for a fragment covering `domain`.
    ///
    /// # Errors
    /// Returns [`ArrayError::InvalidFragmentDomain`] if `domain` is not a
    /// tile-aligned region of the array domain.
    pub fn new(
        schema: Arc<ArraySchema>,
        uri: impl Into<String>,
        timestamp: u64,
        domain: ArraySubset,
    ) -> Result<Self, QueryError> {
        let uri = uri.into();
        if !schema.domain().contains_subset(&domain) || !schema.tile_aligned(&domain) {
            return Err(ArrayError::InvalidFragmentDomain { uri, domain }.into());
        }
        let format_version = schema.format_version();
        Ok(Self {
            fragment: FragmentMetadata::new(uri, timestamp, domain, format_version),
            schema,
        })
    }

    /// Write the tile of a fixed-size attribute at `tile_coords`.
    ///
    /// `cells` holds every cell of the space tile in the schema's cell
    /// order; `validity` holds one byte per cell and is required exactly for
    /// nullable attributes.
    ///
    /// # Errors
    /// Returns [`QueryError`] if the attribute is unknown or var-sized, the
    /// tile is outside the fragment domain, or the cell or validity counts
    /// do not match the tile.
    pub fn write_fixed_tile(
        &mut self,
        name: &str,
        tile_coords: &[u64],
        cells: &[u8],
        validity: Option<&[u8]>,
    ) -> Result<(), QueryError> {
        let attribute = self.checked_attribute(name, false)?;
        let cell_num = self.checked_tile_cell_num(name, tile_coords)?;
        if cells.len() as u64 != cell_num * attribute.cell_size() {
            return Err(QueryError::InvalidBuffer {
                name: name.to_string(),
                reason: format!(
                    "tile holds {} bytes, expected {} cells of {} bytes",
                    cells.len(),
                    cell_num,
                    attribute.cell_size()
                ),
            });
        }
        let tile_validity = self.checked_validity(&attribute, name, cell_num, validity)?;

        let format_version = self.schema.format_version();
        let mut writer_tile = WriterTile::new(Tile::new(
            attribute.datatype(),
            attribute.cell_size(),
            format_version,
            false,
            cells.to_vec(),
        ));

        let stats = TileStatistics::new(attribute.datatype()).compute(
            writer_tile.tile(),
            None,
            tile_validity.as_ref(),
        );
        writer_tile.set_statistics(OwnedTileStats::from(&stats));

        let stored = filter_and_store(&attribute, writer_tile, None, tile_validity)?;
        self.fragment.put_tile(name, tile_coords, stored);
        Ok(())
    }

    /// Write the tile of a var-sized attribute at `tile_coords`.
    ///
    /// `offsets` holds one starting byte position per cell, beginning at
    /// zero and non-decreasing; `var_data` holds the concatenated cell
    /// values.
    ///
    /// # Errors
    /// Returns [`QueryError`] if the attribute is unknown or fixed-size, the
    /// tile is outside the fragment domain, or the offsets are inconsistent.
    pub fn write_var_tile(
        &mut self,
        name: &str,
        tile_coords: &[u64],
        offsets: &[u64],
        var_data: &[u8],
        validity: Option<&[u8]>,
    ) -> Result<(), QueryError> {
        let attribute = self.checked_attribute(name, true)?;
        let cell_num = self.checked_tile_cell_num(name, tile_coords)?;
        let consistent = offsets.len() as u64 == cell_num
            && offsets.first().copied().unwrap_or(0) == 0
            && offsets.windows(2).all(|pair| pair[0] <= pair[1])
            && offsets.last().copied().unwrap_or(0) <= var_data.len() as u64;
        if !consistent {
            return Err(QueryError::InvalidBuffer {
                name: name.to_string(),
                reason: format!("inconsistent offsets for a {cell_num}-cell tile"),
            });
        }
        let tile_validity = self.checked_validity(&attribute, name, cell_num, validity)?;

        let format_version = self.schema.format_version();
        let mut writer_tile = WriterTile::new(Tile::new_offsets(format_version, offsets));
        let tile_var = Tile::new(
            attribute.datatype(),
            attribute.datatype().size(),
            format_version,
            false,
            var_data.to_vec(),
        );

        let stats = TileStatistics::new(attribute.datatype()).compute(
            writer_tile.tile(),
            Some(&tile_var),
            tile_validity.as_ref(),
        );
        writer_tile.set_statistics(OwnedTileStats::from(&stats));

        let stored = filter_and_store(&attribute, writer_tile, Some(tile_var), tile_validity)?;
        self.fragment.put_tile(name, tile_coords, stored);
        Ok(())
    }

    /// Finish the fragment.
    #[must_use]
    pub fn finish(self) -> FragmentMetadata {
        self.fragment
    }

    fn checked_attribute(&self, name: &str, var_sized: bool) -> Result<Attribute, QueryError> {
        let Some(attribute) = self.schema.attribute(name) else {
            return Err(QueryError::UnknownField(name.to_string()));
        };
        if attribute.var_sized() != var_sized {
            return Err(QueryError::InvalidBuffer {
                name: name.to_string(),
                reason: if var_sized {
                    "attribute is fixed-size".to_string()
                } else {
                    "attribute is var-sized".to_string()
                },
            });
        }
        Ok(attribute.clone())
    }

    fn checked_tile_cell_num(&self, name: &str, tile_coords: &[u64]) -> Result<u64, QueryError> {
        let tile_subset = self.schema.space_tile_subset(tile_coords);
        if !self.fragment.domain().contains_subset(&tile_subset) {
            return Err(QueryError::InvalidBuffer {
                name: name.to_string(),
                reason: format!("space tile {tile_coords:?} is outside the fragment domain"),
            });
        }
        Ok(tile_subset.num_elements())
    }

    fn checked_validity(
        &self,
        attribute: &Attribute,
        name: &str,
        cell_num: u64,
        validity: Option<&[u8]>,
    ) -> Result<Option<Tile>, QueryError> {
        match (attribute.nullable(), validity) {
            (true, Some(validity)) if validity.len() as u64 == cell_num => Ok(Some(
                Tile::new_validity(self.schema.format_version(), validity.to_vec()),
            )),
            (false, None) => Ok(None),
            (true, _) => Err(QueryError::InvalidBuffer {
                name: name.to_string(),
                reason: format!("nullable attribute requires {cell_num} validity bytes"),
            }),
            (false, Some(_)) => Err(QueryError::InvalidBuffer {
                name: name.to_string(),
                reason: "attribute is not nullable".to_string(),
            }),
        }
    }
}

/// Run the pipeline forward over the tile set and persist the filtered
/// payloads; the statistics trailer rides on the primary piece (the var
/// piece for var-sized attributes, the fixed piece otherwise).
fn filter_and_store(
    attribute: &Attribute,
    writer_tile: WriterTile,
    tile_var: Option<Tile>,
    tile_validity: Option<Tile>,
) -> Result<StoredTile, QueryError> {
    let pipeline = attribute.pipeline();
    let (mut tile, stats) = writer_tile.into_parts();
    let trailer_bytes = trailer::encode(&stats.unwrap_or_default());

    let (var, validity) = match (tile_var, tile_validity) {
        (Some(mut tile_var), mut tile_validity) => {
            pipeline.forward_var(&mut tile, &mut tile_var)?;
            if let Some(tile_validity) = &mut tile_validity {
                pipeline.forward(tile_validity)?;
            }
            (
                Some(StoredPiece::new(tile_var.take_data(), &trailer_bytes)),
                tile_validity,
            )
        }
        (None, Some(mut tile_validity)) => {
            pipeline.forward_nullable(&mut tile, &mut tile_validity)?;
            (None, Some(tile_validity))
        }
        (None, None) => {
            pipeline.forward(&mut tile)?;
            (None, None)
        }
    };
    let fixed = if var.is_some() {
        StoredPiece::new(tile.take_data(), &[])
    } else {
        StoredPiece::new(tile.take_data(), &trailer_bytes)
    };
    let validity =
        validity.map(|mut tile_validity| StoredPiece::new(tile_validity.take_data(), &[]));

    Ok(StoredTile {
        fixed,
        var,
        validity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{Dimension, Layout};
    use crate::datatype::Datatype;

    fn schema() -> Arc<ArraySchema> {
        Arc::new(
            ArraySchema::new(
                vec![Dimension::new("d", (0, 3), 2)],
                vec![
                    Attribute::new("a", Datatype::Int32),
                    Attribute::new("s", Datatype::StringAscii).with_var_sized(true),
                ],
                Layout::RowMajor,
                Layout::RowMajor,
                true,
            )
            .unwrap(),
        )
    }

    #[test]
    fn fixed_tile_carries_statistics() {
        let schema = schema();
        let domain = schema.domain();
        let mut writer = FragmentWriter::new(schema, "mem://f", 1, domain).unwrap();
        let cells: Vec<u8> = [1_i32, -3]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        writer.write_fixed_tile("a", &[0], &cells, None).unwrap();

        let fragment = writer.finish();
        fragment.load_tile_offsets("a");
        let stored = fragment.read_tile("a", &[0]).unwrap();
        let stats = stored.fixed.stats().unwrap();
        assert_eq!(stats.min.as_deref(), Some((-3_i32).to_le_bytes().as_slice()));
        assert_eq!(stats.sum as i64, -2);
        assert_eq!(stats.non_null_count, 2);
    }

    #[test]
    fn var_tile_trailer_on_var_piece() {
        let schema = schema();
        let domain = schema.domain();
        let mut writer = FragmentWriter::new(schema, "mem://f", 1, domain).unwrap();
        writer
            .write_var_tile("s", &[1], &[0, 2], b"hiyo", None)
            .unwrap();

        let fragment = writer.finish();
        fragment.load_tile_offsets("s");
        let stored = fragment.read_tile("s", &[1]).unwrap();
        let stats = stored.var.as_ref().unwrap().stats().unwrap();
        assert_eq!(stats.min.as_deref(), Some(b"hi".as_slice()));
        assert_eq!(stats.max.as_deref(), Some(b"yo".as_slice()));
        assert!(stored.fixed.trailer().is_empty());
    }

    #[test]
    fn tile_shape_validation() {
        let schema = schema();
        let domain = schema.domain();
        let mut writer = FragmentWriter::new(schema, "mem://f", 1, domain).unwrap();
        // Wrong cell count for a 2-cell tile.
        assert!(writer
            .write_fixed_tile("a", &[0], &1_i32.to_le_bytes(), None)
            .is_err());
        // Offsets that do not start at zero.
        assert!(writer
            .write_var_tile("s", &[0], &[1, 2], b"abc", None)
            .is_err());
        // Validity for a non-nullable attribute.
        let cells: Vec<u8> = [1_i32, 2].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert!(writer
            .write_fixed_tile("a", &[0], &cells, Some(&[1, 1]))
            .is_err());
    }
}
