//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - An isolated mount point
//! - A matching, already validated `Config`
//!
//! # Usage
//!
//! ```ignore
//! use strata_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     // env.mount_point and env.config are isolated per test
//!     // The mount point is NOT formatted - tests control that
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with a private mount point
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    temp_dir: TempDir,
    /// Empty mount point directory
    pub mount_point: PathBuf,
    /// Validated config pointing at `mount_point`
    pub config: Config,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;

        let mount_point = temp_dir.path().join(format!("mnt-{test_id}"));
        std::fs::create_dir_all(&mount_point)?;

        let mut config = Config::default();
        config.storage.mount_point = Some(mount_point.clone());
        config.storage.fresh_start = true;
        config.validate()?;

        Ok(Self {
            temp_dir,
            mount_point,
            config,
            test_id,
        })
    }

    /// Same environment with a different geometry.
    pub fn with_geometry(mut self, fs_size: u64, block_size: u64) -> anyhow::Result<Self> {
        self.config.storage.fs_size = fs_size;
        self.config.storage.block_size = block_size;
        self.config.validate()?;
        Ok(self)
    }

    /// Write the config as TOML next to the mount point and return its path.
    pub fn write_config(&self) -> anyhow::Result<PathBuf> {
        let path = self.temp_dir.path().join("storage.toml");
        std::fs::write(&path, toml::to_string_pretty(&self.config)?)?;
        Ok(path)
    }
}
