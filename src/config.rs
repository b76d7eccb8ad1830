use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `filesystem.*` / `s3.*` knobs consumed by the tree (§6.3).
///
/// A configuration loader (external, out of scope) resolves the `-1`-means-
/// default sentinel for mode bits before constructing this struct; by the
/// time a `TreeConfig` exists, `file_mode`/`dir_mode` already carry their
/// final, type-bit-tagged values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Default mode for newly created files, type bits included (`S_IFREG | 0644`).
    pub file_mode: u32,
    /// Default mode for newly created/promoted directories (`S_IFDIR | 0755`).
    pub dir_mode: u32,
    /// How long a directory listing (or a HEAD-derived attribute set) stays fresh.
    pub dir_cache_max_time: Duration,
    /// How long a tombstoned negative lookup stays fresh before falling through to a refresh.
    pub file_cache_max_time: Duration,
    /// Bucket name used to qualify copy-source headers during rename.
    pub bucket_name: String,
    /// Key prefix prepended to copy-source headers during rename.
    pub key_prefix: String,
    /// `x-amz-storage-class` value applied to rename-copy PUTs.
    pub storage_type: String,
    /// HEAD a zero-length file on lookup to see if it is a directory marker.
    pub check_empty_files: bool,
    /// Force a HEAD request on every lookup of a zero-length file, regardless of staleness.
    pub force_head_requests_on_lookup: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        const S_IFREG: u32 = 0o100000;
        const S_IFDIR: u32 = 0o040000;
        Self {
            file_mode: S_IFREG | 0o644,
            dir_mode: S_IFDIR | 0o755,
            dir_cache_max_time: Duration::from_secs(5),
            file_cache_max_time: Duration::from_secs(5),
            bucket_name: String::new(),
            key_prefix: String::new(),
            storage_type: "STANDARD".to_string(),
            check_empty_files: false,
            force_head_requests_on_lookup: false,
        }
    }
}

impl TreeConfig {
    /// Resolves a `-1`-means-default mode value from a configuration loader
    /// into a concrete mode, tagging it with `type_bits` (`S_IFREG`/`S_IFDIR`).
    pub fn resolve_mode(configured: i64, default_mode: u32, type_bits: u32) -> u32 {
        if configured < 0 {
            default_mode
        } else {
            (configured as u32 & 0o7777) | type_bits
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_file_mode_is_regular_with_644() {
        let cfg = TreeConfig::default();
        assert_eq!(cfg.file_mode & 0o777, 0o644);
        assert_eq!(cfg.file_mode & 0o170000, 0o100000);
    }

    #[test]
    fn default_dir_mode_is_directory_with_755() {
        let cfg = TreeConfig::default();
        assert_eq!(cfg.dir_mode & 0o777, 0o755);
        assert_eq!(cfg.dir_mode & 0o170000, 0o040000);
    }

    #[test]
    fn resolve_mode_uses_default_on_negative_sentinel() {
        let resolved = TreeConfig::resolve_mode(-1, 0o100644, 0o100000);
        assert_eq!(resolved, 0o100644);
    }

    #[test]
    fn resolve_mode_tags_configured_value_with_type_bits() {
        let resolved = TreeConfig::resolve_mode(0o600, 0o100644, 0o100000);
        assert_eq!(resolved, 0o100600);
    }
}
