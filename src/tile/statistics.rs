//! Per-tile summary statistics.
//!
//! A writer computes the minimum, maximum, sum, and non-null count over the
//! cells of each tile before filtering it; readers use the persisted values
//! for pruning and summarization. [`TileStatistics`] is configured once from
//! the attribute's datatype and dispatches to the matching typed kernel.
//!
//! The sum accumulates into a 64-bit slot whose interpretation depends on
//! the attribute category: the widest signed integer for signed and
//! datetime/time attributes, the widest unsigned integer for unsigned
//! attributes, and an IEEE 754 double for floating point. Integer overflow
//! wraps and is not detected.

use crate::datatype::Datatype;
use crate::tile::Tile;

/// Statistics over the cells of one tile.
///
/// The `min`/`max` views borrow from the tile buffers passed to
/// [`TileStatistics::compute`]; hold the tiles alive for as long as the
/// views are used, or convert with [`OwnedTileStats::from`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileStats<'a> {
    /// The minimum cell value, absent for an empty or all-null tile.
    pub min: Option<&'a [u8]>,
    /// The maximum cell value, absent for an empty or all-null tile.
    pub max: Option<&'a [u8]>,
    /// The raw bit pattern of the sum accumulator.
    pub sum: u64,
    /// The number of non-null cells.
    pub non_null_count: u64,
}

impl<'a> TileStats<'a> {
    const fn empty() -> Self {
        Self {
            min: None,
            max: None,
            sum: 0,
            non_null_count: 0,
        }
    }

    /// The size in bytes of the minimum value.
    #[must_use]
    pub fn min_size(&self) -> u64 {
        self.min.map_or(0, |min| min.len() as u64)
    }

    /// The size in bytes of the maximum value.
    #[must_use]
    pub fn max_size(&self) -> u64 {
        self.max.map_or(0, |max| max.len() as u64)
    }

    /// The sum as a signed accumulator.
    #[must_use]
    pub fn sum_signed(&self) -> i64 {
        self.sum as i64
    }

    /// The sum as an unsigned accumulator.
    #[must_use]
    pub fn sum_unsigned(&self) -> u64 {
        self.sum
    }

    /// The sum as a double accumulator.
    #[must_use]
    pub fn sum_double(&self) -> f64 {
        f64::from_bits(self.sum)
    }
}

/// Owned tile statistics, attachable to a [`WriterTile`](crate::tile::WriterTile).
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct OwnedTileStats {
    /// The minimum cell value.
    pub min: Option<Vec<u8>>,
    /// The maximum cell value.
    pub max: Option<Vec<u8>>,
    /// The raw bit pattern of the sum accumulator.
    pub sum: u64,
    /// The number of non-null cells.
    pub non_null_count: u64,
}

impl From<&TileStats<'_>> for OwnedTileStats {
    fn from(stats: &TileStats<'_>) -> Self {
        Self {
            min: stats.min.map(<[u8]>::to_vec),
            max: stats.max.map(<[u8]>::to_vec),
            sum: stats.sum,
            non_null_count: stats.non_null_count,
        }
    }
}

/// A fixed-width cell value usable by the statistics kernels.
trait FixedCell: Copy + PartialOrd {
    const SIZE: usize;
    fn read(bytes: &[u8]) -> Self;
    fn accumulate(self, sum: &mut u64);
}

macro_rules! fixed_cell_signed {
    ($t:ty) => {
        impl FixedCell for $t {
            const SIZE: usize = size_of::<$t>();

            fn read(bytes: &[u8]) -> Self {
                <$t>::from_le_bytes(bytes.try_into().unwrap())
            }

            fn accumulate(self, sum: &mut u64) {
                *sum = (*sum as i64).wrapping_add(self as i64) as u64;
            }
        }
    };
}

macro_rules! fixed_cell_unsigned {
    ($t:ty) => {
        impl FixedCell for $t {
            const SIZE: usize = size_of::<$t>();

            fn read(bytes: &[u8]) -> Self {
                <$t>::from_le_bytes(bytes.try_into().unwrap())
            }

            fn accumulate(self, sum: &mut u64) {
                *sum = sum.wrapping_add(self as u64);
            }
        }
    };
}

macro_rules! fixed_cell_float {
    ($t:ty) => {
        impl FixedCell for $t {
            const SIZE: usize = size_of::<$t>();

            fn read(bytes: &[u8]) -> Self {
                <$t>::from_le_bytes(bytes.try_into().unwrap())
            }

            fn accumulate(self, sum: &mut u64) {
                *sum = (f64::from_bits(*sum) + self as f64).to_bits();
            }
        }
    };
}

fixed_cell_signed!(i8);
fixed_cell_signed!(i16);
fixed_cell_signed!(i32);
fixed_cell_signed!(i64);
fixed_cell_unsigned!(u8);
fixed_cell_unsigned!(u16);
fixed_cell_unsigned!(u32);
fixed_cell_unsigned!(u64);
fixed_cell_float!(f32);
fixed_cell_float!(f64);

#[derive(Copy, Clone, Debug)]
enum FixedKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

#[derive(Copy, Clone, Debug)]
enum Kernel {
    Fixed(FixedKind),
    Var,
    /// [`Datatype::Any`]: statistics are disabled.
    Disabled,
}

/// Computes [`TileStats`] for tiles of one attribute.
#[derive(Copy, Clone, Debug)]
pub struct TileStatistics {
    datatype: Datatype,
    kernel: Kernel,
}

impl TileStatistics {
    /// Create a statistics computer for an attribute datatype.
    #[must_use]
    pub fn new(datatype: Datatype) -> Self {
        use Datatype as D;
        let kernel = match datatype {
            D::Int8 => Kernel::Fixed(FixedKind::I8),
            D::Int16 => Kernel::Fixed(FixedKind::I16),
            D::Int32 => Kernel::Fixed(FixedKind::I32),
            D::Int64 => Kernel::Fixed(FixedKind::I64),
            D::UInt8 => Kernel::Fixed(FixedKind::U8),
            D::UInt16 => Kernel::Fixed(FixedKind::U16),
            D::UInt32 => Kernel::Fixed(FixedKind::U32),
            D::UInt64 => Kernel::Fixed(FixedKind::U64),
            D::Float32 => Kernel::Fixed(FixedKind::F32),
            D::Float64 => Kernel::Fixed(FixedKind::F64),
            D::Any => Kernel::Disabled,
            d if d.is_string() => Kernel::Var,
            // Datetime and time datatypes compare and sum as signed 64-bit.
            _ => Kernel::Fixed(FixedKind::I64),
        };
        Self { datatype, kernel }
    }

    /// The configured datatype.
    #[must_use]
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// Compute statistics over one tile.
    ///
    /// `tile` is the fixed-size tile, or the offsets tile when `tile_var` is
    /// present; `tile_validity` holds one byte per cell for nullable
    /// attributes. All tiles must be unfiltered.
    ///
    /// Fixed-size cells update min/max under typed comparison and accumulate
    /// into the sum; a nullable cell participates only if its validity byte
    /// is non-zero. Var-sized cells update min/max under byte-wise
    /// lexicographic comparison (on an equal prefix the shorter value is
    /// smaller) and define no sum.
    #[must_use]
    pub fn compute<'a>(
        &self,
        tile: &'a Tile,
        tile_var: Option<&'a Tile>,
        tile_validity: Option<&Tile>,
    ) -> TileStats<'a> {
        if matches!(self.kernel, Kernel::Disabled) || tile.size() == 0 {
            return TileStats::empty();
        }

        if let Some(tile_var) = tile_var {
            return compute_var(tile, tile_var, tile_validity);
        }

        let validity = tile_validity.map(Tile::data);
        match self.kernel {
            Kernel::Fixed(FixedKind::I8) => compute_fixed::<i8>(tile.data(), validity),
            Kernel::Fixed(FixedKind::I16) => compute_fixed::<i16>(tile.data(), validity),
            Kernel::Fixed(FixedKind::I32) => compute_fixed::<i32>(tile.data(), validity),
            Kernel::Fixed(FixedKind::I64) => compute_fixed::<i64>(tile.data(), validity),
            Kernel::Fixed(FixedKind::U8) => compute_fixed::<u8>(tile.data(), validity),
            Kernel::Fixed(FixedKind::U16) => compute_fixed::<u16>(tile.data(), validity),
            Kernel::Fixed(FixedKind::U32) => compute_fixed::<u32>(tile.data(), validity),
            Kernel::Fixed(FixedKind::U64) => compute_fixed::<u64>(tile.data(), validity),
            Kernel::Fixed(FixedKind::F32) => compute_fixed::<f32>(tile.data(), validity),
            Kernel::Fixed(FixedKind::F64) => compute_fixed::<f64>(tile.data(), validity),
            // A var-sized datatype without a var tile has no cells to
            // compare.
            Kernel::Var | Kernel::Disabled => TileStats::empty(),
        }
    }
}

fn compute_fixed<'a, T: FixedCell>(data: &'a [u8], validity: Option<&[u8]>) -> TileStats<'a> {
    let mut min: Option<(T, usize)> = None;
    let mut max: Option<(T, usize)> = None;
    let mut sum = 0_u64;
    let mut non_null_count = 0_u64;

    for (c, cell) in data.chunks_exact(T::SIZE).enumerate() {
        if let Some(validity) = validity {
            if validity.get(c).copied().unwrap_or(0) == 0 {
                continue;
            }
        }
        non_null_count += 1;

        let value = T::read(cell);
        let offset = c * T::SIZE;
        if min.as_ref().map_or(true, |(m, _)| value < *m) {
            min = Some((value, offset));
        }
        if max.as_ref().map_or(true, |(m, _)| value > *m) {
            max = Some((value, offset));
        }
        value.accumulate(&mut sum);
    }

    TileStats {
        min: min.map(|(_, offset)| &data[offset..offset + T::SIZE]),
        max: max.map(|(_, offset)| &data[offset..offset + T::SIZE]),
        sum,
        non_null_count,
    }
}

fn compute_var<'a>(
    tile_offsets: &Tile,
    tile_var: &'a Tile,
    tile_validity: Option<&Tile>,
) -> TileStats<'a> {
    let offsets = tile_offsets.offsets();
    let cell_num = offsets.len();
    if cell_num == 0 {
        return TileStats::empty();
    }

    let data = tile_var.data();
    let mut min: Option<&[u8]> = None;
    let mut max: Option<&[u8]> = None;
    for k in 0..cell_num {
        let begin = offsets[k] as usize;
        let end = if k + 1 < cell_num {
            offsets[k + 1] as usize
        } else {
            data.len()
        };
        let Some(cell) = data.get(begin..end) else {
            continue;
        };
        if min.map_or(true, |m| cell < m) {
            min = Some(cell);
        }
        if max.map_or(true, |m| cell > m) {
            max = Some(cell);
        }
    }

    let non_null_count = tile_validity.map_or(cell_num as u64, |validity| {
        validity.data().iter().filter(|&&v| v != 0).count() as u64
    });

    TileStats {
        min,
        max,
        sum: 0,
        non_null_count,
    }
}
