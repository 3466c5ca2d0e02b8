//! Shared test utilities for armimg tests.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use armimg::config::BuildConfig;

/// Test environment with a temporary directory tree.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Root of the temporary tree
    pub root: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        Self {
            _temp_dir: temp_dir,
            root,
        }
    }

    /// Create an executable file, e.g. a stand-in qemu binary.
    pub fn fake_executable(&self, name: &str) -> PathBuf {
        let dir = self.root.join("bin");
        fs::create_dir_all(&dir).expect("Failed to create bin dir");
        let path = dir.join(name);
        fs::write(&path, b"#!/bin/sh\nexit 0\n").expect("Failed to write fake executable");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod fake executable");
        path
    }
}

/// Restore PATH when dropped.
pub struct PathGuard {
    old: Option<String>,
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        match &self.old {
            Some(v) => std::env::set_var("PATH", v),
            None => std::env::remove_var("PATH"),
        }
    }
}

/// Point PATH at the given directory only. Tests using this must be #[serial].
pub fn override_path(dir: &Path) -> PathGuard {
    let old = std::env::var("PATH").ok();
    std::env::set_var("PATH", dir);
    PathGuard { old }
}

/// Minimal valid config: one URL, a checksum, and the given image type.
pub fn base_config(image_type: &str, url: &str) -> BuildConfig {
    BuildConfig {
        image_urls: vec![url.to_string()],
        image_checksum: "0".repeat(64),
        image_type: image_type.to_string(),
        ..Default::default()
    }
}
