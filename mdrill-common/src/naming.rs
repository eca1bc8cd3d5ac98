//! Deterministic test and cluster naming.

use std::path::Path;

use sha2::{Digest, Sha256};

/// Length of generated cluster names (hex characters).
pub const CLUSTER_NAME_LEN: usize = 10;

/// Derive a test name from its spec file: the file stem with `-` replaced by `_`.
pub fn test_name_from_spec_file(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().replace('-', "_"))
        .unwrap_or_default()
}

/// Derive a stable cluster name from a test name and a per-run salt.
///
/// The same `(test_name, salt)` pair always yields the same name, so a rerun
/// with the same salt finds the cluster the previous run created.
pub fn cluster_name(test_name: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(test_name.as_bytes());
    hasher.update(salt.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..CLUSTER_NAME_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_replaces_dashes() {
        let name = test_name_from_spec_file(Path::new("/specs/retryReads-resizeCluster.yml"));
        assert_eq!(name, "retryReads_resizeCluster");
    }

    #[test]
    fn test_name_keeps_inner_dots() {
        let name = test_name_from_spec_file(Path::new("specs/tls-1.2.yaml"));
        assert_eq!(name, "tls_1.2");
    }

    #[test]
    fn cluster_name_is_stable_and_truncated() {
        let first = cluster_name("retryReads_resizeCluster", "build-42");
        let second = cluster_name("retryReads_resizeCluster", "build-42");
        assert_eq!(first, second);
        assert_eq!(first.len(), CLUSTER_NAME_LEN);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn cluster_name_matches_known_digest() {
        // sha256("a" + "b") == sha256("ab")
        assert_eq!(cluster_name("a", "b"), "fb8e20fc2e");
    }

    #[test]
    fn salt_changes_cluster_name() {
        assert_ne!(cluster_name("test", "salt-1"), cluster_name("test", "salt-2"));
    }
}
