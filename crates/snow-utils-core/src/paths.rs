use crate::error::{Result, SnowUtilsError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const SNOW_UTILS_DIR: &str = ".snow-utils";

/// The only manifest path automated flows read or write.
pub const MANIFEST_FILE: &str = ".snow-utils/snow-utils-manifest.md";
pub const LOCK_FILE: &str = ".snow-utils/.manifest.lock";
pub const CONFIG_FILE: &str = ".snow-utils/config.yaml";

/// Suffix of portable manifests written next to the project root.
pub const PORTABLE_SUFFIX: &str = "-manifest.md";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn snow_utils_dir(root: &Path) -> PathBuf {
    root.join(SNOW_UTILS_DIR)
}

pub fn manifest_path(root: &Path) -> PathBuf {
    root.join(MANIFEST_FILE)
}

pub fn lock_path(root: &Path) -> PathBuf {
    root.join(LOCK_FILE)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn portable_manifest_path(root: &Path, project_name: &str) -> PathBuf {
    root.join(format!("{project_name}{PORTABLE_SUFFIX}"))
}

/// Project name derived from the working directory, used once when a manifest is born.
pub fn project_name_from_root(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "project".to_string())
}

// ---------------------------------------------------------------------------
// Instance key validation
// ---------------------------------------------------------------------------

static KEY_RE: OnceLock<Regex> = OnceLock::new();

fn key_re() -> &'static Regex {
    KEY_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-]*$").unwrap())
}

pub fn validate_instance_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > 255 || !key_re().is_match(key) {
        return Err(SnowUtilsError::InvalidInstanceKey(key.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
