use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use toolbridge::mcp::config::{ClientOptions, DuplicatePolicy, ServerDescriptor};

/// Path to the `tool_test_server` helper binary.
#[allow(dead_code)]
pub fn test_server_exe() -> PathBuf {
    if let Ok(p) = std::env::var("CARGO_BIN_EXE_tool_test_server") {
        return PathBuf::from(p);
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("target")
        .join("debug")
        .join("tool_test_server")
}

/// A local descriptor running the helper binary with `args`.
#[allow(dead_code)]
pub fn helper_descriptor(name: &str, args: &[&str]) -> ServerDescriptor {
    ServerDescriptor::local(
        name,
        test_server_exe().to_string_lossy(),
        args.iter().map(|a| a.to_string()).collect(),
    )
}

/// Short timeouts so failure paths settle quickly.
#[allow(dead_code)]
pub fn fast_options() -> ClientOptions {
    ClientOptions {
        init_timeout: Duration::from_secs(3),
        tool_timeout: Duration::from_secs(3),
        duplicate_names: DuplicatePolicy::Skip,
    }
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("toolbridge.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
