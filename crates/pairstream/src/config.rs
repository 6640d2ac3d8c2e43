//! # Configuration
//!
//! Pair stream settings, loadable from TOML:
//!
//! ```toml
//! block_size_bytes = 32768
//! headers_per_block = 512
//!
//! [multibox]
//! subdivisions = [4, 1, 4]
//! ```
//!
//! Every field has a default, so an empty document is a valid config.

use std::mem::size_of;

use serde::{Deserialize, Serialize};

use crate::error::{PairStreamError, PairStreamResult};
use crate::stream::PairHeader;
use pairstream_core::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};

/// Largest bucket count whose stream layout still fits in `u32`.
pub const MAX_BUCKET_COUNT: u32 = (u32::MAX - 2) / 2;

/// Uniform grid the broad phase sorts objects into.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiBoxConfig {
    /// Cells along x, y and z.
    pub subdivisions: [u32; 3],
}

impl Default for MultiBoxConfig {
    fn default() -> Self {
        Self {
            subdivisions: [2, 2, 2],
        }
    }
}

impl MultiBoxConfig {
    /// Creates a grid with the given cell counts per axis.
    #[must_use]
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self {
            subdivisions: [x, y, z],
        }
    }

    /// Number of grid cells, not counting the overflow bucket.
    ///
    /// # Errors
    ///
    /// Fails if any axis is zero or the product overflows.
    pub fn cell_count(&self) -> PairStreamResult<u32> {
        let [x, y, z] = self.subdivisions;
        if x == 0 || y == 0 || z == 0 {
            return Err(PairStreamError::InvalidConfig(format!(
                "multibox subdivisions must be non-zero, got {:?}",
                self.subdivisions
            )));
        }
        x.checked_mul(y)
            .and_then(|xy| xy.checked_mul(z))
            .ok_or_else(|| {
                PairStreamError::InvalidConfig(format!(
                    "multibox subdivisions {:?} overflow the cell count",
                    self.subdivisions
                ))
            })
    }

    /// Number of buckets: every grid cell plus one overflow bucket for
    /// objects that span cells.
    ///
    /// # Errors
    ///
    /// Fails if the grid is invalid or too large.
    pub fn bucket_count(&self) -> PairStreamResult<u32> {
        let buckets = self.cell_count()?.saturating_add(1);
        validate_bucket_count(buckets)?;
        Ok(buckets)
    }
}

/// Storage settings for a pair stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairStreamConfig {
    /// Grid the bucket indices refer to.
    pub multibox: MultiBoxConfig,
    /// Size of regular payload arena blocks (at least 16 KiB).
    pub block_size_bytes: usize,
    /// Pair headers per header block.
    pub headers_per_block: usize,
}

impl Default for PairStreamConfig {
    fn default() -> Self {
        Self {
            multibox: MultiBoxConfig::default(),
            block_size_bytes: MIN_BLOCK_SIZE,
            headers_per_block: 256,
        }
    }
}

impl PairStreamConfig {
    /// Parses and validates a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`PairStreamError::InvalidConfig`] for malformed TOML or values
    /// that fail [`PairStreamConfig::validate`].
    pub fn from_toml_str(text: &str) -> PairStreamResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| PairStreamError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field.
    ///
    /// # Errors
    ///
    /// Returns [`PairStreamError::InvalidConfig`] describing the first bad field.
    pub fn validate(&self) -> PairStreamResult<()> {
        self.multibox.bucket_count()?;
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size_bytes) {
            return Err(PairStreamError::InvalidConfig(format!(
                "block_size_bytes must be in {MIN_BLOCK_SIZE}..={MAX_BLOCK_SIZE}, got {}",
                self.block_size_bytes
            )));
        }
        if self.headers_per_block == 0 {
            return Err(PairStreamError::InvalidConfig(
                "headers_per_block must be non-zero".to_owned(),
            ));
        }
        let max_headers = MAX_BLOCK_SIZE / size_of::<PairHeader>();
        if self.headers_per_block > max_headers {
            return Err(PairStreamError::InvalidConfig(format!(
                "headers_per_block must be at most {max_headers}, got {}",
                self.headers_per_block
            )));
        }
        Ok(())
    }
}

/// Checks that `bucket_count` can back a stream layout.
pub(crate) fn validate_bucket_count(bucket_count: u32) -> PairStreamResult<()> {
    if bucket_count == 0 || bucket_count > MAX_BUCKET_COUNT {
        return Err(PairStreamError::InvalidConfig(format!(
            "bucket count must be in 1..={MAX_BUCKET_COUNT}, got {bucket_count}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PairStreamConfig::default();
        config.validate().unwrap();
        assert_eq!(config.multibox.bucket_count().unwrap(), 9);
    }

    #[test]
    fn test_from_toml() {
        let config = PairStreamConfig::from_toml_str(
            r"
            block_size_bytes = 32768

            [multibox]
            subdivisions = [4, 1, 4]
            ",
        )
        .unwrap();

        assert_eq!(config.block_size_bytes, 32_768);
        assert_eq!(config.headers_per_block, 256);
        assert_eq!(config.multibox.cell_count().unwrap(), 16);
        assert_eq!(config.multibox.bucket_count().unwrap(), 17);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        assert_eq!(PairStreamConfig::from_toml_str("").unwrap(), PairStreamConfig::default());
    }

    #[test]
    fn test_rejects_bad_values() {
        let zero_axis = PairStreamConfig::from_toml_str("[multibox]\nsubdivisions = [0, 1, 1]");
        assert!(matches!(zero_axis, Err(PairStreamError::InvalidConfig(_))));

        let small_blocks = PairStreamConfig::from_toml_str("block_size_bytes = 1024");
        assert!(matches!(small_blocks, Err(PairStreamError::InvalidConfig(_))));

        let huge = MultiBoxConfig::new(u32::MAX, 2, 1);
        assert!(huge.bucket_count().is_err());

        let malformed = PairStreamConfig::from_toml_str("headers_per_block = \"many\"");
        assert!(matches!(malformed, Err(PairStreamError::InvalidConfig(_))));
    }

    #[test]
    fn test_block_size_limits() {
        let max_headers = MAX_BLOCK_SIZE / size_of::<PairHeader>();
        let with = |headers_per_block, block_size_bytes| PairStreamConfig {
            headers_per_block,
            block_size_bytes,
            ..PairStreamConfig::default()
        };

        assert!(with(max_headers, MAX_BLOCK_SIZE).validate().is_ok());
        assert!(matches!(
            with(max_headers + 1, MIN_BLOCK_SIZE).validate(),
            Err(PairStreamError::InvalidConfig(_))
        ));
        assert!(matches!(
            with(usize::MAX / 8, MIN_BLOCK_SIZE).validate(),
            Err(PairStreamError::InvalidConfig(_))
        ));
        assert!(matches!(
            with(256, MAX_BLOCK_SIZE + 1).validate(),
            Err(PairStreamError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_bucket_count_bounds() {
        assert!(validate_bucket_count(0).is_err());
        assert!(validate_bucket_count(1).is_ok());
        assert!(validate_bucket_count(MAX_BUCKET_COUNT).is_ok());
        assert!(validate_bucket_count(MAX_BUCKET_COUNT + 1).is_err());
    }
}
