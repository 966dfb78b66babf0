//! The persisted tile-statistics trailer.
//!
//! Each filtered tile carries a little-endian trailer after its payload:
//!
//! ```text
//! uint64 min_size
//! bytes[min_size] min
//! uint64 max_size
//! bytes[max_size] max
//! uint64 sum          // raw accumulator bits
//! uint64 non_null_count
//! ```
//!
//! The fragment records each tile's payload size, so the trailer's position
//! is known at read time. For fixed-size numeric attributes `min_size` and
//! `max_size` equal the cell size; for var-sized attributes they are the
//! respective byte lengths; a zero size denotes an absent value (an empty or
//! all-null tile).

use thiserror::Error;

use super::statistics::OwnedTileStats;

/// A truncated or inconsistent tile-statistics trailer.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
#[error("tile statistics trailer truncated or inconsistent ({0} bytes)")]
pub struct TrailerError(pub usize);

/// Encode a statistics trailer.
#[must_use]
pub fn encode(stats: &OwnedTileStats) -> Vec<u8> {
    let min = stats.min.as_deref().unwrap_or_default();
    let max = stats.max.as_deref().unwrap_or_default();
    let mut trailer =
        Vec::with_capacity(4 * size_of::<u64>() + min.len() + max.len());
    trailer.extend_from_slice(&(min.len() as u64).to_le_bytes());
    trailer.extend_from_slice(min);
    trailer.extend_from_slice(&(max.len() as u64).to_le_bytes());
    trailer.extend_from_slice(max);
    trailer.extend_from_slice(&stats.sum.to_le_bytes());
    trailer.extend_from_slice(&stats.non_null_count.to_le_bytes());
    trailer
}

/// Decode a statistics trailer.
///
/// `bytes` must span exactly one trailer.
///
/// # Errors
/// Returns [`TrailerError`] if `bytes` is truncated or holds surplus bytes.
pub fn decode(bytes: &[u8]) -> Result<OwnedTileStats, TrailerError> {
    let mut reader = Reader { bytes, offset: 0 };
    let min_size = reader.read_u64()?;
    let min = reader.read_bytes(min_size as usize)?.to_vec();
    let max_size = reader.read_u64()?;
    let max = reader.read_bytes(max_size as usize)?.to_vec();
    let sum = reader.read_u64()?;
    let non_null_count = reader.read_u64()?;
    if reader.offset != bytes.len() {
        return Err(TrailerError(bytes.len()));
    }
    Ok(OwnedTileStats {
        min: (min_size > 0).then_some(min),
        max: (max_size > 0).then_some(max),
        sum,
        non_null_count,
    })
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], TrailerError> {
        let bytes = self
            .bytes
            .get(self.offset..self.offset + len)
            .ok_or(TrailerError(self.bytes.len()))?;
        self.offset += len;
        Ok(bytes)
    }

    fn read_u64(&mut self) -> Result<u64, TrailerError> {
        let bytes = self.read_bytes(size_of::<u64>())?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let stats = OwnedTileStats {
            min: Some(vec![1, 2, 3]),
            max: Some(vec![9, 9]),
            sum: 0x0102_0304,
            non_null_count: 7,
        };
        let trailer = encode(&stats);
        assert_eq!(decode(&trailer).unwrap(), stats);
    }

    #[test]
    fn round_trip_absent_extrema() {
        let stats = OwnedTileStats::default();
        let trailer = encode(&stats);
        assert_eq!(trailer.len(), 4 * size_of::<u64>());
        assert_eq!(decode(&trailer).unwrap(), stats);
    }

    #[test]
    fn truncation() {
        let stats = OwnedTileStats {
            min: Some(vec![0; 4]),
            max: Some(vec![0; 4]),
            sum: 0,
            non_null_count: 1,
        };
        let trailer = encode(&stats);
        assert!(decode(&trailer[..trailer.len() - 1]).is_err());
        let mut surplus = trailer.clone();
        surplus.push(0);
        assert!(decode(&surplus).is_err());
    }
}
