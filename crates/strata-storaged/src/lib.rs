//! Strata storage node daemon: serves block and tag operations for workers
//! over TCP.

pub mod handler;
pub mod server;

use anyhow::{Context, Result};
use strata_config::Config;
use strata_store::{Storage, StorageOptions, Superblock};

/// Open the configured mount point, formatting it first when `fresh` is set.
pub fn open_storage(config: &Config, fresh: bool) -> Result<Storage> {
    let s = &config.storage;
    let mount_point = strata_config::path::prepare_mount_point(s.mount_point()?)?;
    let options = StorageOptions {
        block_access_delay: s.block_access_delay(),
    };

    if fresh {
        let superblock = Superblock::new(s.fs_size, s.block_size)?;
        Storage::format(&mount_point, superblock, options)
            .with_context(|| format!("Failed to format {}", mount_point.display()))
    } else {
        Storage::open(&mount_point, options).with_context(|| {
            format!(
                "{} is not a formatted mount point (set fresh_start or run `format`)",
                mount_point.display()
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_config::testing::TestEnvironment;

    #[test]
    fn test_open_requires_format() {
        let env = TestEnvironment::new().unwrap();
        let err = open_storage(&env.config, false).unwrap_err();
        assert!(err.to_string().contains("not a formatted mount point"));

        open_storage(&env.config, true).unwrap();
        let storage = open_storage(&env.config, false).unwrap();
        assert_eq!(storage.superblock().unwrap().block_size, 128);
    }

    #[test]
    fn test_format_uses_configured_geometry() {
        let env = TestEnvironment::new()
            .unwrap()
            .with_geometry(2048, 256)
            .unwrap();
        let storage = open_storage(&env.config, true).unwrap();
        let sb = storage.superblock().unwrap();
        assert_eq!(sb.total_blocks(), 8);
    }
}
