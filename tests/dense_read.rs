use std::collections::HashMap;
use std::sync::Arc;

use tilestore::array::{
    Array, ArraySchema, Attribute, Dimension, FragmentMetadata, Layout,
};
use tilestore::array_subset::ArraySubset;
use tilestore::datatype::Datatype;
use tilestore::filter::{FilterPipeline, GzipFilter};
use tilestore::metadata::ArrayMetadata;
use tilestore::query::{
    ConditionOp, FragmentWriter, QueryBuffer, QueryCondition, QueryError, ReadStrategy,
};
use tilestore::thread_pool::ThreadPool;
use tilestore::COORDS;

fn schema() -> Arc<ArraySchema> {
    let gzip = FilterPipeline::new().with_stage(Arc::new(GzipFilter::default()));
    Arc::new(
        ArraySchema::new(
            vec![
                Dimension::new("rows", (1, 4), 2),
                Dimension::new("cols", (1, 4), 2),
            ],
            vec![
                Attribute::new("a", Datatype::Int32).with_pipeline(gzip.clone()),
                Attribute::new("n", Datatype::Int32).with_nullable(true),
                Attribute::new("s", Datatype::StringAscii)
                    .with_var_sized(true)
                    .with_pipeline(gzip),
            ],
            Layout::RowMajor,
            Layout::RowMajor,
            true,
        )
        .unwrap(),
    )
}

/// The cells of a 2-D subset in row-major order.
fn row_major_cells(subset: &ArraySubset) -> Vec<(u64, u64)> {
    let start = subset.start();
    let end = subset.end_inc();
    let mut cells = Vec::new();
    for r in start[0]..=end[0] {
        for c in start[1]..=end[1] {
            cells.push((r, c));
        }
    }
    cells
}

struct CellValues {
    a: fn(u64, u64) -> i32,
    n: fn(u64, u64) -> (i32, u8),
    s: fn(u64, u64) -> String,
}

const F1: CellValues = CellValues {
    a: |r, c| (10 * r + c) as i32,
    n: |r, c| (r as i32, u8::from(c % 2 == 1)),
    s: |r, c| format!("r{r}c{c}"),
};

const F2: CellValues = CellValues {
    a: |r, c| (900 + 10 * r + c) as i32,
    n: |_, _| (7, 1),
    s: |r, c| format!("N{r}{c}"),
};

fn write_fragment(
    schema: &Arc<ArraySchema>,
    uri: &str,
    timestamp: u64,
    region: &ArraySubset,
    values: &CellValues,
) -> Arc<FragmentMetadata> {
    let mut writer =
        FragmentWriter::new(Arc::clone(schema), uri, timestamp, region.clone()).unwrap();
    let coverage = schema.tile_coverage(region);
    for (tr, tc) in row_major_cells(&coverage) {
        let tile_coords = [tr, tc];
        let cells = row_major_cells(&schema.space_tile_subset(&tile_coords));

        let a: Vec<u8> = cells
            .iter()
            .flat_map(|&(r, c)| (values.a)(r, c).to_le_bytes())
            .collect();
        writer.write_fixed_tile("a", &tile_coords, &a, None).unwrap();

        let n: Vec<u8> = cells
            .iter()
            .flat_map(|&(r, c)| (values.n)(r, c).0.to_le_bytes())
            .collect();
        let validity: Vec<u8> = cells.iter().map(|&(r, c)| (values.n)(r, c).1).collect();
        writer
            .write_fixed_tile("n", &tile_coords, &n, Some(&validity))
            .unwrap();

        let mut offsets = Vec::new();
        let mut var_data = Vec::new();
        for &(r, c) in &cells {
            offsets.push(var_data.len() as u64);
            var_data.extend_from_slice((values.s)(r, c).as_bytes());
        }
        writer
            .write_var_tile("s", &tile_coords, &offsets, &var_data, None)
            .unwrap();
    }
    Arc::new(writer.finish())
}

/// An array with an older full-domain fragment shadowed in the top-left
/// space tile (rows 1..=2, cols 1..=2) by a newer fragment.
fn two_fragment_array() -> Arc<Array> {
    let schema = schema();
    let full = schema.domain();
    let top_left = ArraySubset::new_with_bounds_inclusive(&[1, 1], &[2, 2]).unwrap();
    let f1 = write_fragment(&schema, "mem://f1", 1, &full, &F1);
    let f2 = write_fragment(&schema, "mem://f2", 2, &top_left, &F2);
    Arc::new(Array::open(schema, vec![f1, f2], &[]).unwrap())
}

fn shadowed(r: u64, c: u64) -> bool {
    r <= 2 && c <= 2
}

fn expected_a(r: u64, c: u64) -> i32 {
    if shadowed(r, c) {
        (F2.a)(r, c)
    } else {
        (F1.a)(r, c)
    }
}

fn strategy(array: &Arc<Array>, subarray: ArraySubset, layout: Layout) -> ReadStrategy {
    let pool = Arc::new(ThreadPool::new(4).unwrap());
    ReadStrategy::new(
        Arc::clone(array),
        pool,
        subarray,
        layout,
        QueryCondition::new(),
    )
    .unwrap()
}

fn i32s(buffer: &QueryBuffer) -> Vec<i32> {
    buffer
        .data()
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

#[test]
fn row_major_read_shadows_older_fragment() {
    let array = two_fragment_array();
    let mut strategy = strategy(&array, array.schema().domain(), Layout::RowMajor);

    let mut buffers = HashMap::from([("a".to_string(), QueryBuffer::new(16 * 4))]);
    strategy.read(&mut buffers).unwrap();
    assert!(!strategy.overflowed());
    assert!(strategy.done());

    let expected: Vec<i32> = row_major_cells(&array.schema().domain())
        .into_iter()
        .map(|(r, c)| expected_a(r, c))
        .collect();
    assert_eq!(i32s(&buffers["a"]), expected);
}

#[test]
fn col_major_read() {
    let array = two_fragment_array();
    let mut strategy = strategy(&array, array.schema().domain(), Layout::ColMajor);

    let mut buffers = HashMap::from([("a".to_string(), QueryBuffer::new(16 * 4))]);
    strategy.read(&mut buffers).unwrap();

    let mut expected = Vec::new();
    for c in 1..=4 {
        for r in 1..=4 {
            expected.push(expected_a(r, c));
        }
    }
    assert_eq!(i32s(&buffers["a"]), expected);
}

#[test]
fn global_order_read_follows_tile_then_cell_order() {
    let array = two_fragment_array();
    let mut strategy = strategy(&array, array.schema().domain(), Layout::GlobalOrder);

    let mut buffers = HashMap::from([("a".to_string(), QueryBuffer::new(16 * 4))]);
    strategy.read(&mut buffers).unwrap();

    let schema = array.schema();
    let mut expected = Vec::new();
    for (tr, tc) in row_major_cells(&schema.tile_coverage(&schema.domain())) {
        for (r, c) in row_major_cells(&schema.space_tile_subset(&[tr, tc])) {
            expected.push(expected_a(r, c));
        }
    }
    assert_eq!(i32s(&buffers["a"]), expected);
}

#[test]
fn var_and_nullable_reads() {
    let array = two_fragment_array();
    let mut strategy = strategy(&array, array.schema().domain(), Layout::RowMajor);

    let mut buffers = HashMap::from([
        ("s".to_string(), QueryBuffer::new_var(16 * 8, 256)),
        ("n".to_string(), QueryBuffer::new(16 * 4).with_validity(16)),
    ]);
    strategy.read(&mut buffers).unwrap();
    assert!(!strategy.overflowed());

    let cells = row_major_cells(&array.schema().domain());

    // Var-sized: offsets delimit the concatenated strings.
    let mut expected_data = String::new();
    let mut expected_offsets = Vec::new();
    for &(r, c) in &cells {
        expected_offsets.push(expected_data.len() as u64);
        let s = if shadowed(r, c) {
            (F2.s)(r, c)
        } else {
            (F1.s)(r, c)
        };
        expected_data.push_str(&s);
    }
    assert_eq!(buffers["s"].offsets().unwrap(), expected_offsets);
    assert_eq!(buffers["s"].data(), expected_data.as_bytes());

    // Nullable: values and validity bytes, newest fragment first.
    let expected_n: Vec<i32> = cells
        .iter()
        .map(|&(r, c)| {
            if shadowed(r, c) {
                (F2.n)(r, c).0
            } else {
                (F1.n)(r, c).0
            }
        })
        .collect();
    let expected_validity: Vec<u8> = cells
        .iter()
        .map(|&(r, c)| {
            if shadowed(r, c) {
                (F2.n)(r, c).1
            } else {
                (F1.n)(r, c).1
            }
        })
        .collect();
    assert_eq!(i32s(&buffers["n"]), expected_n);
    assert_eq!(buffers["n"].validity().unwrap(), expected_validity);
}

#[test]
fn incremental_reads_serve_partitions_in_order() {
    let array = two_fragment_array();
    let mut strategy =
        strategy(&array, array.schema().domain(), Layout::RowMajor).with_partition_budget(4);

    // Room for one 4-cell partition per call.
    let mut buffers = HashMap::from([("a".to_string(), QueryBuffer::new(4 * 4))]);
    let mut collected = Vec::new();
    let mut reads = 0;
    while !strategy.done() {
        strategy.read(&mut buffers).unwrap();
        assert!(!strategy.overflowed());
        collected.extend(i32s(&buffers["a"]));
        reads += 1;
        assert!(reads <= 16, "read loop failed to make progress");
    }

    let expected: Vec<i32> = row_major_cells(&array.schema().domain())
        .into_iter()
        .map(|(r, c)| expected_a(r, c))
        .collect();
    assert_eq!(collected, expected);
    assert_eq!(reads, 4);
}

#[test]
fn unsplittable_overflow_zeroes_sizes() {
    let array = two_fragment_array();
    let mut strategy = strategy(&array, array.schema().domain(), Layout::RowMajor);

    // Not enough room for a single cell.
    let mut buffers = HashMap::from([
        ("a".to_string(), QueryBuffer::new(2)),
        ("rows".to_string(), QueryBuffer::new(64)),
    ]);
    strategy.read(&mut buffers).unwrap();
    assert!(strategy.overflowed());
    assert_eq!(buffers["a"].data_size(), 0);
    assert_eq!(buffers["rows"].data_size(), 0);

    // A later call with adequate buffers succeeds.
    let mut buffers = HashMap::from([("a".to_string(), QueryBuffer::new(16 * 4))]);
    strategy.read(&mut buffers).unwrap();
    assert!(!strategy.overflowed());
    assert_eq!(i32s(&buffers["a"]).len(), 16);
}

#[test]
fn condition_fields_join_the_fetch_set() {
    let array = two_fragment_array();
    let pool = Arc::new(ThreadPool::new(2).unwrap());
    let condition =
        QueryCondition::new().with_clause("a", ConditionOp::Gt, 20_i32.to_le_bytes().to_vec());
    let mut strategy = ReadStrategy::new(
        Arc::clone(&array),
        pool,
        array.schema().domain(),
        Layout::RowMajor,
        condition,
    )
    .unwrap();

    // Only `n` is requested; `a` is fetched for the condition.
    let mut buffers =
        HashMap::from([("n".to_string(), QueryBuffer::new(16 * 4).with_validity(16))]);
    strategy.read(&mut buffers).unwrap();
    assert_eq!(i32s(&buffers["n"]).len(), 16);
}

#[test]
fn condition_with_unknown_field_is_rejected() {
    let array = two_fragment_array();
    let pool = Arc::new(ThreadPool::new(1).unwrap());
    let condition = QueryCondition::new().with_clause("zzz", ConditionOp::Eq, vec![0; 4]);
    assert!(matches!(
        ReadStrategy::new(
            array,
            pool,
            ArraySubset::new_with_ranges(&[1..5, 1..5]),
            Layout::RowMajor,
            condition,
        ),
        Err(QueryError::UnknownField(_))
    ));
}

#[test]
fn uncovered_cells_read_fill_values() {
    let schema = schema();
    let top_left = ArraySubset::new_with_bounds_inclusive(&[1, 1], &[2, 2]).unwrap();
    let f2 = write_fragment(&schema, "mem://f2", 2, &top_left, &F2);
    let array = Arc::new(Array::open(schema, vec![f2], &[]).unwrap());

    let mut strategy = strategy(&array, array.schema().domain(), Layout::RowMajor);
    let mut buffers = HashMap::from([
        ("a".to_string(), QueryBuffer::new(16 * 4)),
        ("n".to_string(), QueryBuffer::new(16 * 4).with_validity(16)),
        ("s".to_string(), QueryBuffer::new_var(16 * 8, 256)),
    ]);
    strategy.read(&mut buffers).unwrap();

    let cells = row_major_cells(&array.schema().domain());
    let expected_a: Vec<i32> = cells
        .iter()
        .map(|&(r, c)| if shadowed(r, c) { (F2.a)(r, c) } else { 0 })
        .collect();
    assert_eq!(i32s(&buffers["a"]), expected_a);

    // Uncovered cells are null.
    let expected_validity: Vec<u8> = cells
        .iter()
        .map(|&(r, c)| u8::from(shadowed(r, c)))
        .collect();
    assert_eq!(buffers["n"].validity().unwrap(), expected_validity);

    // Uncovered var cells are empty.
    let offsets = buffers["s"].offsets().unwrap();
    assert_eq!(offsets.len(), 16);
    let expected_s: String = cells
        .iter()
        .filter(|&&(r, c)| shadowed(r, c))
        .map(|&(r, c)| (F2.s)(r, c))
        .collect();
    assert_eq!(buffers["s"].data(), expected_s.as_bytes());
}

#[test]
fn coords_and_attributes_together() {
    let array = two_fragment_array();
    let subarray = ArraySubset::new_with_bounds_inclusive(&[3, 1], &[3, 3]).unwrap();
    let mut strategy = strategy(&array, subarray, Layout::RowMajor);

    let mut buffers = HashMap::from([
        ("a".to_string(), QueryBuffer::new(3 * 4)),
        (COORDS.to_string(), QueryBuffer::new(3 * 2 * 8)),
    ]);
    strategy.read(&mut buffers).unwrap();

    assert_eq!(i32s(&buffers["a"]), vec![31, 32, 33]);
    let coords: Vec<u64> = buffers[COORDS]
        .data()
        .chunks_exact(8)
        .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()))
        .collect();
    assert_eq!(coords, vec![3, 1, 3, 2, 3, 3]);
}

#[test]
fn disable_cache_reads_are_identical() {
    let array = two_fragment_array();
    let subarray = array.schema().domain();

    let mut cached = strategy(&array, subarray.clone(), Layout::RowMajor);
    let mut uncached = strategy(&array, subarray, Layout::RowMajor);
    uncached.set_disable_cache(true);

    let mut buffers_a = HashMap::from([("a".to_string(), QueryBuffer::new(16 * 4))]);
    let mut buffers_b = HashMap::from([("a".to_string(), QueryBuffer::new(16 * 4))]);
    cached.read(&mut buffers_a).unwrap();
    uncached.read(&mut buffers_b).unwrap();
    assert_eq!(i32s(&buffers_a["a"]), i32s(&buffers_b["a"]));
}

#[test]
fn array_metadata_is_available_after_open() {
    let mut first = ArrayMetadata::new();
    first
        .put("ticks", Datatype::Int32, 2, &{
            let mut bytes = Vec::new();
            bytes.extend_from_slice(&100_i32.to_le_bytes());
            bytes.extend_from_slice(&200_i32.to_le_bytes());
            bytes
        })
        .unwrap();
    first.put("gone", Datatype::UInt8, 1, &[1]).unwrap();

    let mut second = ArrayMetadata::new();
    second.put("label", Datatype::StringAscii, 4, b"cold").unwrap();
    second.delete_key("gone");

    let schema = schema();
    let f1 = write_fragment(&schema, "mem://f1", 1, &schema.domain(), &F1);
    let array = Array::open(
        schema,
        vec![f1],
        &[first.serialize(), second.serialize()],
    )
    .unwrap();

    let (datatype, num, value) = array.metadata().get("ticks").unwrap();
    assert_eq!(datatype, Datatype::Int32);
    assert_eq!(num, 2);
    assert_eq!(&value[..4], 100_i32.to_le_bytes());
    assert!(array.metadata().get("gone").is_none());
    let (datatype, num, value) = array.metadata().get("label").unwrap();
    assert_eq!(datatype, Datatype::StringAscii);
    assert_eq!(num, 4);
    assert_eq!(value, b"cold");
}
