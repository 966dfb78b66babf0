//! The gzip compression filter.

use std::io::{Cursor, Read};

use flate2::bufread::{GzDecoder, GzEncoder};
use flate2::Compression;

use super::{Filter, FilterError};

/// A gzip compression filter stage.
#[derive(Clone, Debug)]
pub struct GzipFilter {
    compression_level: u32,
}

/// An invalid gzip compression level.
#[derive(Copy, Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid gzip compression level {0}, must be in 0..=9")]
pub struct GzipCompressionLevelError(pub u32);

impl GzipFilter {
    /// Create a new gzip filter.
    ///
    /// # Errors
    /// Returns [`GzipCompressionLevelError`] if `compression_level` is not
    /// in `0..=9`.
    pub fn new(compression_level: u32) -> Result<Self, GzipCompressionLevelError> {
        if compression_level <= 9 {
            Ok(Self { compression_level })
        } else {
            Err(GzipCompressionLevelError(compression_level))
        }
    }
}

impl Default for GzipFilter {
    fn default() -> Self {
        Self {
            compression_level: Compression::default().level(),
        }
    }
}

impl Filter for GzipFilter {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn forward(&self, input: Vec<u8>) -> Result<Vec<u8>, FilterError> {
        let mut encoder = GzEncoder::new(
            Cursor::new(input),
            Compression::new(self.compression_level),
        );
        let mut out: Vec<u8> = Vec::new();
        encoder
            .read_to_end(&mut out)
            .map_err(|err| FilterError::StageFailed {
                stage: "gzip",
                reason: err.to_string(),
            })?;
        Ok(out)
    }

    fn reverse(&self, input: Vec<u8>) -> Result<Vec<u8>, FilterError> {
        let mut decoder = GzDecoder::new(Cursor::new(input));
        let mut out: Vec<u8> = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|err| FilterError::StageFailed {
                stage: "gzip",
                reason: err.to_string(),
            })?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let filter = GzipFilter::new(5).unwrap();
        let bytes: Vec<u8> = (0..128).cycle().take(4096).collect();
        let encoded = filter.forward(bytes.clone()).unwrap();
        assert_ne!(encoded, bytes);
        assert_eq!(filter.reverse(encoded).unwrap(), bytes);
    }

    #[test]
    fn invalid_level() {
        assert_eq!(GzipFilter::new(10).err(), Some(GzipCompressionLevelError(10)));
    }

    #[test]
    fn corrupt_input() {
        let filter = GzipFilter::default();
        assert!(filter.reverse(vec![1, 2, 3]).is_err());
    }
}
