//! Configuration types shared across crates.

use crate::error::{Error, Result};
use crate::{DEFAULT_SECTOR_SIZE, MAX_SECTOR_SIZE, MIN_SECTOR_SIZE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// VFS configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VfsConfig {
    /// Sector size in bytes for newly created files.
    /// Must be a power of two between 512 and 65536.
    #[serde(default = "default_sector_size")]
    pub sector_size: i64,
    /// On-store schema version for newly created files (1 or 2).
    /// Existing files keep the version recorded in their metadata.
    #[serde(default = "default_schema_version")]
    pub default_schema_version: u32,
}

impl VfsConfig {
    /// Validate the configured values.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_SECTOR_SIZE..=MAX_SECTOR_SIZE).contains(&self.sector_size)
            || !(self.sector_size as u64).is_power_of_two()
        {
            return Err(Error::InvalidSectorSize {
                size: self.sector_size,
                min: MIN_SECTOR_SIZE,
                max: MAX_SECTOR_SIZE,
            });
        }
        if !(1..=2).contains(&self.default_schema_version) {
            return Err(Error::InvalidSchemaVersion(self.default_schema_version));
        }
        Ok(())
    }
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            sector_size: default_sector_size(),
            default_schema_version: default_schema_version(),
        }
    }
}

/// Lock lease timing.
///
/// A held lease expires `lease_duration_ms` after its last renewal; the
/// heartbeat renews it every `renew_interval_ms`. The renew interval must be
/// comfortably shorter than the lease duration or a healthy holder will see
/// its own lease stolen.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lease_duration_ms")]
    pub lease_duration_ms: u64,
    #[serde(default = "default_renew_interval_ms")]
    pub renew_interval_ms: u64,
}

impl LockConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis(self.renew_interval_ms)
    }

    pub fn lease_duration_us(&self) -> i64 {
        (self.lease_duration_ms * 1_000) as i64
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_duration_ms: default_lease_duration_ms(),
            renew_interval_ms: default_renew_interval_ms(),
        }
    }
}

fn default_sector_size() -> i64 {
    DEFAULT_SECTOR_SIZE
}

fn default_schema_version() -> u32 {
    2
}

fn default_lease_duration_ms() -> u64 {
    2_000
}

fn default_renew_interval_ms() -> u64 {
    750
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = VfsConfig::default();
        assert_eq!(cfg.sector_size, 65536);
        assert_eq!(cfg.default_schema_version, 2);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_sector_size_bounds() {
        for size in [512, 1024, 4096, 65536] {
            let cfg = VfsConfig {
                sector_size: size,
                ..Default::default()
            };
            cfg.validate().unwrap();
        }

        for size in [0, 256, 1000, 65537, 131072] {
            let cfg = VfsConfig {
                sector_size: size,
                ..Default::default()
            };
            assert!(cfg.validate().is_err(), "size {size} should be rejected");
        }
    }

    #[test]
    fn test_schema_version_bounds() {
        for version in [0, 3] {
            let cfg = VfsConfig {
                default_schema_version: version,
                ..Default::default()
            };
            assert!(cfg.validate().is_err());
        }
    }

    #[test]
    fn test_lock_defaults() {
        let cfg = LockConfig::default();
        assert_eq!(cfg.lease_duration(), Duration::from_secs(2));
        assert_eq!(cfg.renew_interval(), Duration::from_millis(750));
        assert_eq!(cfg.lease_duration_us(), 2_000_000);
    }
}
