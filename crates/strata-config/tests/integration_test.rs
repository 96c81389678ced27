//! Integration tests for strata-config
//!
//! These tests verify the full config loading pipeline with real file system operations.

use std::path::PathBuf;
use strata_config::{Config, ConfigError, LogLevel};
use tempfile::tempdir;

/// Test config loading from a real config file
#[test]
fn test_load_config_from_file() {
    let temp = tempdir().unwrap();
    let config_path = temp.path().join("storage.toml");
    let config_content = r#"
[storage]
port = 7001
fresh_start = true
mount_point = "/srv/strata"
fs_size = 8192
block_size = 256
operation_delay_ms = 10
block_access_delay_ms = 2
log_level = "debug"
"#;
    std::fs::write(&config_path, config_content).unwrap();

    let config = Config::from_file(&config_path).unwrap();
    config.validate().unwrap();

    assert_eq!(config.storage.port, 7001);
    assert!(config.storage.fresh_start);
    assert_eq!(config.storage.mount_point, Some(PathBuf::from("/srv/strata")));
    assert_eq!(config.storage.fs_size, 8192);
    assert_eq!(config.storage.block_size, 256);
    assert_eq!(config.storage.operation_delay_ms, 10);
    assert_eq!(config.storage.block_access_delay_ms, 2);
    assert_eq!(config.storage.log_level, LogLevel::Debug);
}

/// Environment variables win over the file. All env handling lives in this
/// one test so parallel tests never observe the variables.
#[test]
fn test_config_env_override_integration() {
    let temp = tempdir().unwrap();
    let config_path = temp.path().join("storage.toml");
    std::fs::write(
        &config_path,
        "[storage]\nport = 7001\nmount_point = \"/from/file\"\n",
    )
    .unwrap();

    std::env::set_var("STRATA_MOUNT_POINT", "/from/env");
    std::env::set_var("STRATA_PORT", "7100");
    std::env::set_var("STRATA_LOG_LEVEL", "TRACE");
    let loaded = Config::load(Some(&config_path));

    std::env::set_var("STRATA_PORT", "not-a-port");
    let bad_port = Config::load(Some(&config_path));

    std::env::remove_var("STRATA_MOUNT_POINT");
    std::env::remove_var("STRATA_PORT");
    std::env::remove_var("STRATA_LOG_LEVEL");

    let config = loaded.unwrap();
    assert_eq!(config.storage.mount_point, Some(PathBuf::from("/from/env")));
    assert_eq!(config.storage.port, 7100);
    assert_eq!(config.storage.log_level, LogLevel::Trace);
    assert!(matches!(
        bad_port,
        Err(ConfigError::InvalidEnv {
            key: "STRATA_PORT",
            ..
        })
    ));
}

#[test]
fn test_missing_file_is_io_error() {
    let temp = tempdir().unwrap();
    let err = Config::from_file(&temp.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let temp = tempdir().unwrap();
    let config_path = temp.path().join("storage.toml");
    std::fs::write(&config_path, "[storage]\nport = \"seven\"\n").unwrap();
    assert!(matches!(
        Config::from_file(&config_path),
        Err(ConfigError::Toml(_))
    ));
}

/// Test complete config serialization/deserialization cycle
#[test]
fn test_config_full_roundtrip() {
    let mut original = Config::default();
    original.storage.mount_point = Some(PathBuf::from("/mnt/strata"));
    original.storage.log_level = LogLevel::Warn;

    let temp = tempdir().unwrap();
    let config_path = temp.path().join("storage.toml");
    std::fs::write(&config_path, toml::to_string_pretty(&original).unwrap()).unwrap();

    let loaded = Config::from_file(&config_path).unwrap();
    assert_eq!(loaded, original);
}

/// Zero port and missing mount point are startup errors
#[test]
fn test_validation_errors() {
    let config: Config = toml::from_str("[storage]\nport = 0\nmount_point = \"/x\"\n").unwrap();
    assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

    let config: Config = toml::from_str("[storage]\nport = 7001\n").unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("mount_point"));
}
