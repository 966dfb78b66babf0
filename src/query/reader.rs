//! The dense read strategy.
//!
//! [`ReadStrategy`] fills user buffers with the cells of a subarray in a
//! requested layout. Each call to [`read`](ReadStrategy::read) serves whole
//! partitions of the subarray: it plans the result space tiles contributed
//! by each fragment (newest first), fetches and unfilters the matching
//! tiles through the thread pool, and copies cells into the buffers,
//! materializing coordinates for explicitly requested dimension buffers.
//!
//! Buffers are written from the start at each call; the written sizes
//! report that call's results. A partition that does not fit the remaining
//! buffer space ends the call, and the next call resumes from it. If a
//! partition cannot fit even in empty buffers it is split and retried, and
//! only an unsplittable partition yields overflow: the call succeeds with
//! [`overflowed`](ReadStrategy::overflowed) set and every buffer size reset
//! to zero, so no partial cell is ever observable.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::error;

use crate::array::{Array, ArraySchema, Attribute, Layout, StoredTile};
use crate::array_subset::iterators::Slabs;
use crate::array_subset::ArraySubset;
use crate::config::global_config;
use crate::query::cache::TileCache;
use crate::query::read_state::{BudgetPartitioner, ReadState};
use crate::query::result_tile::{
    compute_result_space_tiles, ResultSpaceTile, ResultTile, TileTuple,
};
use crate::query::{BufferMark, QueryBuffer, QueryCondition, QueryError};
use crate::thread_pool::{Task, ThreadPool};
use crate::tile::{Tile, CELL_VAR_OFFSET_SIZE};
use crate::{Datatype, COORDS};

/// Executes dense read queries against an open array.
#[derive(Debug)]
pub struct ReadStrategy {
    array: Arc<Array>,
    pool: Arc<ThreadPool>,
    layout: Layout,
    subarray: ArraySubset,
    condition: QueryCondition,
    state: ReadState,
    cache: Arc<TileCache>,
    disable_cache: bool,
}

impl ReadStrategy {
    /// Create a read strategy.
    ///
    /// # Errors
    /// Returns [`QueryError`] if the array is not dense, the subarray does
    /// not match the schema, or the condition references unknown fields.
    pub fn new(
        array: Arc<Array>,
        pool: Arc<ThreadPool>,
        subarray: ArraySubset,
        layout: Layout,
        condition: QueryCondition,
    ) -> Result<Self, QueryError> {
        if !array.schema().dense() {
            return Err(QueryError::NotDense);
        }
        check_subarray(&array, &subarray)?;
        condition.check(array.schema())?;

        let (disable_cache, cache_capacity) = {
            let config = global_config();
            (config.disable_tile_cache(), config.tile_cache_capacity())
        };
        let state = ReadState::new(Box::new(BudgetPartitioner::new(
            subarray.clone(),
            u64::MAX,
            layout,
        )));
        Ok(Self {
            array,
            pool,
            layout,
            subarray,
            condition,
            state,
            cache: Arc::new(TileCache::new(cache_capacity)),
            disable_cache,
        })
    }

    /// Bound partitions to a cell budget.
    ///
    /// Takes effect only before the first [`read`](Self::read); by default a
    /// query starts from a single partition spanning the whole subarray and
    /// splits on demand.
    #[must_use]
    pub fn with_partition_budget(mut self, budget_cells: u64) -> Self {
        if !self.state.initialized() {
            self.state = ReadState::new(Box::new(BudgetPartitioner::new(
                self.subarray.clone(),
                budget_cells,
                self.layout,
            )));
        }
        self
    }

    /// Bypass the filtered-tile cache for fetches and unfilters.
    pub fn set_disable_cache(&mut self, disable_cache: bool) {
        self.disable_cache = disable_cache;
    }

    /// The query layout.
    #[must_use]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// The query subarray.
    #[must_use]
    pub fn subarray(&self) -> &ArraySubset {
        &self.subarray
    }

    /// The per-query read state.
    #[must_use]
    pub fn read_state(&self) -> &ReadState {
        &self.state
    }

    /// Returns true if the last [`read`](Self::read) overflowed the user
    /// buffers.
    #[must_use]
    pub fn overflowed(&self) -> bool {
        self.state.overflowed()
    }

    /// Returns true when the whole subarray has been served.
    #[must_use]
    pub fn done(&self) -> bool {
        self.state.initialized() && self.state.done()
    }

    /// Serve as many remaining partitions as fit the buffers.
    ///
    /// On overflow the call still succeeds: buffer sizes are reset to zero
    /// and [`overflowed`](Self::overflowed) reports true.
    ///
    /// # Errors
    /// Returns [`QueryError`] on invalid buffers or a fetch, filter, or pool
    /// failure; the first task error is returned and subsequent ones are
    /// logged.
    pub fn read(&mut self, buffers: &mut HashMap<String, QueryBuffer>) -> Result<(), QueryError> {
        self.check_buffers(buffers)?;
        for buffer in buffers.values_mut() {
            buffer.clear_sizes();
            buffer.snapshot_sizes();
        }
        self.state.set_overflowed(false);

        if !self.state.initialized() {
            self.state.initialize()?;
        }

        let mut committed = false;
        loop {
            let Some(partition) = self.state.current().cloned() else {
                break;
            };
            if partition.is_empty() {
                self.state.next()?;
                continue;
            }

            if self.read_partition(&partition, buffers)? {
                committed = true;
                self.state.next()?;
                continue;
            }

            // The partition did not fit. If this call already produced
            // results, stop here and let the next call resume from it.
            if committed {
                break;
            }
            if self.state.unsplittable() {
                self.state.set_overflowed(true);
                for buffer in buffers.values_mut() {
                    buffer.restore_snapshot();
                }
                return Ok(());
            }
            self.state.split_current()?;
        }
        Ok(())
    }

    /// Serve one partition. Returns false (with the buffers rolled back to
    /// their state at entry) if it does not fit.
    fn read_partition(
        &self,
        partition: &ArraySubset,
        buffers: &mut HashMap<String, QueryBuffer>,
    ) -> Result<bool, QueryError> {
        let schema = Arc::clone(self.array.schema());
        let marks: HashMap<String, BufferMark> = buffers
            .iter()
            .map(|(name, buffer)| (name.clone(), buffer.mark()))
            .collect();

        // Plan the space tiles and the (fragment, tile) pairs they need.
        let space_tiles = compute_result_space_tiles(&schema, self.array.fragments(), partition);
        let mut st_index: HashMap<Vec<u64>, usize> = HashMap::new();
        for (idx, space_tile) in space_tiles.iter().enumerate() {
            st_index.insert(space_tile.tile_coords().to_vec(), idx);
        }
        let mut result_tiles: Vec<ResultTile> = Vec::new();
        let mut tile_index: HashMap<(usize, Vec<u64>), usize> = HashMap::new();
        for space_tile in &space_tiles {
            for &fragment_idx in space_tile.fragments() {
                let key = (fragment_idx, space_tile.tile_coords().to_vec());
                if !tile_index.contains_key(&key) {
                    tile_index.insert(key, result_tiles.len());
                    result_tiles.push(ResultTile::new(
                        fragment_idx,
                        space_tile.tile_coords().to_vec(),
                    ));
                }
            }
        }

        // The fetch set: requested attributes plus condition fields.
        let mut names: Vec<String> = buffers
            .keys()
            .filter(|name| schema.attribute(name).is_some())
            .cloned()
            .collect();
        for field in self.condition.field_names() {
            if !names.iter().any(|name| name == field) {
                names.push(field.to_string());
            }
        }
        names.sort_unstable();

        // Tile offsets (and var sizes) load before any tile bytes.
        for name in &names {
            let Some(attribute) = schema.attribute(name) else {
                continue;
            };
            let var_sized = attribute.var_sized();
            for result_tile in &result_tiles {
                let fragment = &self.array.fragments()[result_tile.fragment_idx()];
                fragment.load_tile_offsets(name);
                if var_sized {
                    fragment.load_tile_var_sizes(name);
                }
            }
        }

        self.read_attribute_tiles(&schema, &names, &mut result_tiles)?;
        self.unfilter_tiles(&schema, &names, &mut result_tiles)?;

        // Assemble attribute cells.
        let buffer_names: Vec<String> = buffers.keys().cloned().collect();
        for name in &buffer_names {
            let Some(attribute) = schema.attribute(name).cloned() else {
                continue;
            };
            let Some(buffer) = buffers.get_mut(name) else {
                continue;
            };
            let fit = self.copy_attribute(
                name,
                &attribute,
                partition,
                &space_tiles,
                &st_index,
                &tile_index,
                &result_tiles,
                buffer,
            )?;
            if !fit {
                rollback(buffers, &marks);
                return Ok(false);
            }
        }

        // Materialize coordinates for requested dimension buffers.
        if !self.fill_dense_coords(partition, &space_tiles, buffers)? {
            rollback(buffers, &marks);
            return Ok(false);
        }
        Ok(true)
    }

    /// Fetch the filtered tiles of each name for each result tile, in
    /// parallel through the pool.
    fn read_attribute_tiles(
        &self,
        schema: &Arc<ArraySchema>,
        names: &[String],
        result_tiles: &mut [ResultTile],
    ) -> Result<(), QueryError> {
        let mut tasks = Vec::new();
        for name in names {
            let Some(attribute) = schema.attribute(name).cloned() else {
                continue;
            };
            for (slot, result_tile) in result_tiles.iter().enumerate() {
                let fragment = Arc::clone(&self.array.fragments()[result_tile.fragment_idx()]);
                let tile_coords = result_tile.tile_coords().to_vec();
                let name = name.clone();
                let attribute = attribute.clone();
                let cache = Arc::clone(&self.cache);
                let disable_cache = self.disable_cache;
                tasks.push(self.pool.execute(
                    move || -> Result<(usize, String, TileTuple), QueryError> {
                        let cached = if disable_cache {
                            None
                        } else {
                            cache.retrieve(fragment.uri(), &name, &tile_coords)
                        };
                        let stored = match cached {
                            Some(stored) => stored,
                            None => {
                                let stored = fragment.read_tile(&name, &tile_coords)?;
                                if !disable_cache {
                                    cache.insert(
                                        fragment.uri(),
                                        &name,
                                        &tile_coords,
                                        Arc::clone(&stored),
                                    );
                                }
                                stored
                            }
                        };
                        let tuple =
                            tuple_from_stored(&attribute, fragment.format_version(), &stored);
                        Ok((slot, name, tuple))
                    },
                ));
            }
        }
        self.collect_tile_tasks(tasks, result_tiles)
    }

    /// Unfilter fetched tiles in parallel, running each attribute's
    /// pipeline in reverse-declared order.
    fn unfilter_tiles(
        &self,
        schema: &Arc<ArraySchema>,
        names: &[String],
        result_tiles: &mut [ResultTile],
    ) -> Result<(), QueryError> {
        let mut tasks = Vec::new();
        for name in names {
            let Some(attribute) = schema.attribute(name) else {
                continue;
            };
            let pipeline = attribute.pipeline().clone();
            for (slot, result_tile) in result_tiles.iter_mut().enumerate() {
                let Some(mut tuple) = result_tile.take_tile(name) else {
                    continue;
                };
                let pipeline = pipeline.clone();
                let name = name.clone();
                tasks.push(self.pool.execute(
                    move || -> Result<(usize, String, TileTuple), QueryError> {
                        match (&mut tuple.var, &mut tuple.validity) {
                            (Some(var), Some(validity)) => {
                                pipeline.reverse_var(&mut tuple.fixed, var)?;
                                pipeline.reverse(validity)?;
                            }
                            (Some(var), None) => {
                                pipeline.reverse_var(&mut tuple.fixed, var)?;
                            }
                            (None, Some(validity)) => {
                                pipeline.reverse_nullable(&mut tuple.fixed, validity)?;
                            }
                            (None, None) => {
                                pipeline.reverse(&mut tuple.fixed)?;
                            }
                        }
                        Ok((slot, name, tuple))
                    },
                ));
            }
        }
        self.collect_tile_tasks(tasks, result_tiles)
    }

    /// Await tile tasks, storing their tiles. The first error is returned;
    /// subsequent errors are logged.
    fn collect_tile_tasks(
        &self,
        tasks: Vec<Task<Result<(usize, String, TileTuple), QueryError>>>,
        result_tiles: &mut [ResultTile],
    ) -> Result<(), QueryError> {
        let mut first_err: Option<QueryError> = None;
        for task in tasks {
            let outcome = match self.pool.wait(task) {
                Ok(outcome) => outcome,
                Err(err) => Err(err.into()),
            };
            match outcome {
                Ok((slot, name, tuple)) => result_tiles[slot].insert_tile(name, tuple),
                Err(err) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    } else {
                        error!("{err}");
                    }
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Copy one attribute's cells for a partition. Returns false on
    /// overflow; the caller rolls the buffers back.
    #[allow(clippy::too_many_arguments)]
    fn copy_attribute(
        &self,
        name: &str,
        attribute: &Attribute,
        partition: &ArraySubset,
        space_tiles: &[ResultSpaceTile],
        st_index: &HashMap<Vec<u64>, usize>,
        tile_index: &HashMap<(usize, Vec<u64>), usize>,
        result_tiles: &[ResultTile],
        buffer: &mut QueryBuffer,
    ) -> Result<bool, QueryError> {
        let schema = self.array.schema();
        let cell_order = schema.cell_order();
        let mut offsets_cache: HashMap<usize, Vec<u64>> = HashMap::new();

        for_each_cell(
            self.layout,
            cell_order,
            partition,
            space_tiles,
            |indices| {
                let tile_coords = schema.tile_coords_of(indices);
                let Some(&st_idx) = st_index.get(&tile_coords) else {
                    return Err(QueryError::CorruptTile {
                        name: name.to_string(),
                    });
                };
                let space_tile = &space_tiles[st_idx];

                let fragment_idx = space_tile.fragments().iter().copied().find(|&idx| {
                    self.array.fragments()[idx].domain().contains(indices)
                });
                let Some(fragment_idx) = fragment_idx else {
                    // No fragment covers the cell: fill value, null
                    // validity.
                    let fit = if attribute.var_sized() {
                        buffer.write_var(attribute.fill_value())
                    } else {
                        buffer.write_fixed(attribute.fill_value())
                    };
                    let fit = fit && (!attribute.nullable() || buffer.write_validity(0));
                    return Ok(fit);
                };

                let Some(&slot) = tile_index.get(&(fragment_idx, tile_coords)) else {
                    return Err(QueryError::CorruptTile {
                        name: name.to_string(),
                    });
                };
                let Some(tuple) = result_tiles[slot].tile(name) else {
                    return Err(QueryError::CorruptTile {
                        name: name.to_string(),
                    });
                };
                let position = match cell_order {
                    Layout::ColMajor => space_tile.subset().linear_index_col_major(indices),
                    _ => space_tile.subset().linear_index_row_major(indices),
                };
                let Some(position) = position else {
                    return Err(QueryError::CorruptTile {
                        name: name.to_string(),
                    });
                };

                let fit = if attribute.var_sized() {
                    let offsets = offsets_cache
                        .entry(slot)
                        .or_insert_with(|| tuple.fixed.offsets());
                    let Some(cell) = var_cell(tuple, offsets, position) else {
                        return Err(QueryError::CorruptTile {
                            name: name.to_string(),
                        });
                    };
                    buffer.write_var(cell)
                } else {
                    let Some(cell) = tuple.fixed.cell(position) else {
                        return Err(QueryError::CorruptTile {
                            name: name.to_string(),
                        });
                    };
                    buffer.write_fixed(cell)
                };
                if !fit {
                    return Ok(false);
                }

                if attribute.nullable() {
                    let byte = tuple
                        .validity
                        .as_ref()
                        .and_then(|validity| validity.data().get(position as usize).copied());
                    let Some(byte) = byte else {
                        return Err(QueryError::CorruptTile {
                            name: name.to_string(),
                        });
                    };
                    return Ok(buffer.write_validity(byte));
                }
                Ok(true)
            },
        )
    }

    /// Fill the requested coordinate buffers for a partition: one buffer
    /// per dimension name, and the zipped [`COORDS`] buffer interleaving
    /// every dimension. Returns false on overflow.
    fn fill_dense_coords(
        &self,
        partition: &ArraySubset,
        space_tiles: &[ResultSpaceTile],
        buffers: &mut HashMap<String, QueryBuffer>,
    ) -> Result<bool, QueryError> {
        let schema = self.array.schema();
        let dim_buffers: Vec<(usize, String)> = buffers
            .keys()
            .filter_map(|name| {
                schema
                    .dimension_index(name)
                    .map(|dim_idx| (dim_idx, name.clone()))
            })
            .collect();
        let has_zipped = buffers.contains_key(COORDS);
        if dim_buffers.is_empty() && !has_zipped {
            return Ok(true);
        }

        for_each_cell(
            self.layout,
            schema.cell_order(),
            partition,
            space_tiles,
            |indices| {
                for (dim_idx, name) in &dim_buffers {
                    let Some(buffer) = buffers.get_mut(name) else {
                        continue;
                    };
                    if !buffer.write_fixed(&indices[*dim_idx].to_le_bytes()) {
                        return Ok(false);
                    }
                }
                if has_zipped {
                    let Some(buffer) = buffers.get_mut(COORDS) else {
                        return Ok(true);
                    };
                    for index in indices {
                        if !buffer.write_fixed(&index.to_le_bytes()) {
                            return Ok(false);
                        }
                    }
                }
                Ok(true)
            },
        )
    }

    /// Correctness checks for the user buffers against the schema.
    fn check_buffers(&self, buffers: &HashMap<String, QueryBuffer>) -> Result<(), QueryError> {
        let schema = self.array.schema();
        for (name, buffer) in buffers {
            if let Some(attribute) = schema.attribute(name) {
                if attribute.var_sized() != buffer.var_sized() {
                    return Err(QueryError::InvalidBuffer {
                        name: name.clone(),
                        reason: if attribute.var_sized() {
                            "var-sized attribute requires an offsets area".to_string()
                        } else {
                            "fixed-size attribute takes no offsets area".to_string()
                        },
                    });
                }
                if attribute.nullable() != buffer.nullable() {
                    return Err(QueryError::InvalidBuffer {
                        name: name.clone(),
                        reason: if attribute.nullable() {
                            "nullable attribute requires a validity area".to_string()
                        } else {
                            "attribute is not nullable".to_string()
                        },
                    });
                }
                check_validity_buffer_size(name, attribute, buffer)?;
            } else if name == COORDS || schema.dimension(name).is_some() {
                if buffer.var_sized() || buffer.nullable() {
                    return Err(QueryError::InvalidBuffer {
                        name: name.clone(),
                        reason: "coordinate buffers take only a data area".to_string(),
                    });
                }
            } else {
                return Err(QueryError::UnknownField(name.clone()));
            }
        }
        Ok(())
    }
}

/// The validity area must hold one byte for every cell the data (or
/// offsets) area can hold.
fn check_validity_buffer_size(
    name: &str,
    attribute: &Attribute,
    buffer: &QueryBuffer,
) -> Result<(), QueryError> {
    let Some(validity_capacity) = buffer.validity_capacity() else {
        return Ok(());
    };
    let max_cells = if attribute.var_sized() {
        buffer.offsets_capacity().unwrap_or(0) / CELL_VAR_OFFSET_SIZE as usize
    } else {
        buffer.data_capacity() / attribute.cell_size().max(1) as usize
    };
    if validity_capacity < max_cells {
        return Err(QueryError::InvalidBuffer {
            name: name.to_string(),
            reason: format!(
                "validity area holds {validity_capacity} cells but the buffer holds {max_cells}"
            ),
        });
    }
    Ok(())
}

fn check_subarray(array: &Array, subarray: &ArraySubset) -> Result<(), QueryError> {
    let schema = array.schema();
    if subarray.dimensionality() != schema.dim_num() {
        return Err(QueryError::InvalidSubarray(format!(
            "{} ranges for a {}-dimensional array",
            subarray.dimensionality(),
            schema.dim_num()
        )));
    }
    if subarray.is_empty() {
        return Err(QueryError::InvalidSubarray("empty range".to_string()));
    }
    if !schema.domain().contains_subset(subarray) {
        return Err(QueryError::InvalidSubarray(format!(
            "{subarray} exceeds the array domain {}",
            schema.domain()
        )));
    }
    Ok(())
}

/// Visit every cell of a partition in the query layout, stopping early when
/// the callback reports an unfit cell.
fn for_each_cell<F>(
    layout: Layout,
    cell_order: Layout,
    partition: &ArraySubset,
    space_tiles: &[ResultSpaceTile],
    mut f: F,
) -> Result<bool, QueryError>
where
    F: FnMut(&[u64]) -> Result<bool, QueryError>,
{
    match layout {
        Layout::GlobalOrder => {
            // Space tiles arrive in tile order; within each, cells follow
            // the schema's cell order.
            for space_tile in space_tiles {
                let tile_partition = partition.overlap(space_tile.subset())?;
                if tile_partition.is_empty() {
                    continue;
                }
                if !visit_slabs(&tile_partition, cell_order, &mut f)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Layout::ColMajor => visit_slabs(partition, Layout::ColMajor, &mut f),
        _ => visit_slabs(partition, Layout::RowMajor, &mut f),
    }
}

fn visit_slabs<F>(subset: &ArraySubset, order: Layout, f: &mut F) -> Result<bool, QueryError>
where
    F: FnMut(&[u64]) -> Result<bool, QueryError>,
{
    let slabs = match order {
        Layout::ColMajor => Slabs::new_col_major(subset),
        _ => Slabs::new_row_major(subset),
    };
    for slab in slabs {
        for k in 0..slab.num {
            if !f(&slab.cell(k))? {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Build the filtered tile tuple for an attribute from its stored pieces.
fn tuple_from_stored(
    attribute: &Attribute,
    format_version: u32,
    stored: &StoredTile,
) -> TileTuple {
    let fixed = if attribute.var_sized() {
        Tile::new(
            Datatype::UInt64,
            CELL_VAR_OFFSET_SIZE,
            format_version,
            true,
            stored.fixed.payload().to_vec(),
        )
    } else {
        Tile::new(
            attribute.datatype(),
            attribute.cell_size(),
            format_version,
            true,
            stored.fixed.payload().to_vec(),
        )
    };
    let var = stored.var.as_ref().map(|piece| {
        Tile::new(
            attribute.datatype(),
            attribute.datatype().size(),
            format_version,
            true,
            piece.payload().to_vec(),
        )
    });
    let validity = stored.validity.as_ref().map(|piece| {
        let mut tile = Tile::new_validity(format_version, piece.payload().to_vec());
        tile.set_filtered(true);
        tile
    });
    TileTuple {
        fixed,
        var,
        validity,
    }
}

fn var_cell<'a>(tuple: &'a TileTuple, offsets: &[u64], position: u64) -> Option<&'a [u8]> {
    let var_tile = tuple.var.as_ref()?;
    let position = usize::try_from(position).ok()?;
    let begin = usize::try_from(*offsets.get(position)?).ok()?;
    let end = if position + 1 < offsets.len() {
        usize::try_from(offsets[position + 1]).ok()?
    } else {
        var_tile.data().len()
    };
    var_tile.data().get(begin..end)
}

fn rollback(buffers: &mut HashMap<String, QueryBuffer>, marks: &HashMap<String, BufferMark>) {
    for (name, buffer) in buffers {
        if let Some(mark) = marks.get(name) {
            buffer.rollback(*mark);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{ArraySchema, Dimension};
    use crate::query::QueryCondition;

    fn dense_array(rows: (u64, u64), cols: (u64, u64)) -> Arc<Array> {
        let schema = Arc::new(
            ArraySchema::new(
                vec![
                    Dimension::new("rows", rows, 2),
                    Dimension::new("cols", cols, 2),
                ],
                vec![Attribute::new("a", Datatype::Int32)],
                Layout::RowMajor,
                Layout::RowMajor,
                true,
            )
            .unwrap(),
        );
        Arc::new(Array::open(schema, Vec::new(), &[]).unwrap())
    }

    fn coords_of(buffer: &QueryBuffer) -> Vec<u64> {
        buffer
            .data()
            .chunks_exact(size_of::<u64>())
            .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn subarray_checks() {
        let array = dense_array((1, 4), (1, 4));
        let pool = Arc::new(ThreadPool::new(1).unwrap());
        for subarray in [
            ArraySubset::new_with_ranges(&[1..3]),
            ArraySubset::new_empty(2),
            ArraySubset::new_with_ranges(&[1..6, 1..3]),
        ] {
            assert!(matches!(
                ReadStrategy::new(
                    Arc::clone(&array),
                    Arc::clone(&pool),
                    subarray,
                    Layout::RowMajor,
                    QueryCondition::new(),
                ),
                Err(QueryError::InvalidSubarray(_))
            ));
        }
    }

    #[test]
    fn validity_buffer_size_check() {
        let array = Arc::new(
            Array::open(
                Arc::new(
                    ArraySchema::new(
                        vec![Dimension::new("d", (0, 3), 2)],
                        vec![Attribute::new("n", Datatype::Int32).with_nullable(true)],
                        Layout::RowMajor,
                        Layout::RowMajor,
                        true,
                    )
                    .unwrap(),
                ),
                Vec::new(),
                &[],
            )
            .unwrap(),
        );
        let pool = Arc::new(ThreadPool::new(1).unwrap());
        let mut strategy = ReadStrategy::new(
            array,
            pool,
            ArraySubset::new_with_ranges(&[0..4]),
            Layout::RowMajor,
            QueryCondition::new(),
        )
        .unwrap();

        // Room for 4 cells of data but only 2 validity bytes.
        let mut buffers = HashMap::from([("n".to_string(), QueryBuffer::new(16).with_validity(2))]);
        assert!(matches!(
            strategy.read(&mut buffers),
            Err(QueryError::InvalidBuffer { .. })
        ));
    }

    #[test]
    fn row_slab_coords() {
        // Subarray [[3, 3], [1, 3]] row-major materializes
        // (3,1) (3,2) (3,3).
        let array = dense_array((1, 4), (1, 4));
        let pool = Arc::new(ThreadPool::new(1).unwrap());
        let mut strategy = ReadStrategy::new(
            array,
            pool,
            ArraySubset::new_with_bounds_inclusive(&[3, 1], &[3, 3]).unwrap(),
            Layout::RowMajor,
            QueryCondition::new(),
        )
        .unwrap();

        let mut buffers = HashMap::from([(COORDS.to_string(), QueryBuffer::new(3 * 2 * 8))]);
        strategy.read(&mut buffers).unwrap();
        assert!(!strategy.overflowed());
        assert_eq!(coords_of(&buffers[COORDS]), vec![3, 1, 3, 2, 3, 3]);
    }

    #[test]
    fn col_slab_coords() {
        // Subarray [[4, 6], [1, 1]] col-major materializes
        // (4,1) (5,1) (6,1).
        let array = dense_array((1, 6), (1, 4));
        let pool = Arc::new(ThreadPool::new(1).unwrap());
        let mut strategy = ReadStrategy::new(
            array,
            pool,
            ArraySubset::new_with_bounds_inclusive(&[4, 1], &[6, 1]).unwrap(),
            Layout::ColMajor,
            QueryCondition::new(),
        )
        .unwrap();

        let mut buffers = HashMap::from([(COORDS.to_string(), QueryBuffer::new(3 * 2 * 8))]);
        strategy.read(&mut buffers).unwrap();
        assert_eq!(coords_of(&buffers[COORDS]), vec![4, 1, 5, 1, 6, 1]);
    }

    #[test]
    fn per_dimension_coord_buffers() {
        let array = dense_array((1, 4), (1, 4));
        let pool = Arc::new(ThreadPool::new(1).unwrap());
        let mut strategy = ReadStrategy::new(
            array,
            pool,
            ArraySubset::new_with_bounds_inclusive(&[3, 1], &[3, 3]).unwrap(),
            Layout::RowMajor,
            QueryCondition::new(),
        )
        .unwrap();

        let mut buffers = HashMap::from([
            ("rows".to_string(), QueryBuffer::new(3 * 8)),
            ("cols".to_string(), QueryBuffer::new(3 * 8)),
        ]);
        strategy.read(&mut buffers).unwrap();
        assert_eq!(coords_of(&buffers["rows"]), vec![3, 3, 3]);
        assert_eq!(coords_of(&buffers["cols"]), vec![1, 2, 3]);
    }

    #[test]
    fn coords_overflow_resets_sizes() {
        let array = dense_array((1, 4), (1, 4));
        let pool = Arc::new(ThreadPool::new(1).unwrap());
        let mut strategy = ReadStrategy::new(
            array,
            pool,
            ArraySubset::new_with_bounds_inclusive(&[1, 1], &[1, 1]).unwrap(),
            Layout::RowMajor,
            QueryCondition::new(),
        )
        .unwrap();

        // A single unsplittable cell needs 16 bytes; offer 8.
        let mut buffers = HashMap::from([(COORDS.to_string(), QueryBuffer::new(8))]);
        strategy.read(&mut buffers).unwrap();
        assert!(strategy.overflowed());
        assert_eq!(buffers[COORDS].data_size(), 0);
    }
}
