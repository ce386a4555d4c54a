// FILE: src/core/path.rs
//! Replica path resolution.
//!
//! The replica of `/a/b/test.db` lives at `{replica_dir}/test.db`. Only the
//! final component of the primary path takes part, so two primaries with the
//! same base name share a replica.

use std::path::MAIN_SEPARATOR;

/// Final component of a path, split on either separator style.
///
/// ```text
/// /home/drh/xyzzy.txt -> xyzzy.txt
/// xyzzy.txt           -> xyzzy.txt
/// ```
pub fn file_tail(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Replica location for `primary` inside `replica_dir`.
pub fn replica_path(replica_dir: &str, primary: &str) -> String {
    format!("{}{}{}", replica_dir, MAIN_SEPARATOR, file_tail(primary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_tail() {
        assert_eq!(file_tail("/home/drh/xyzzy.txt"), "xyzzy.txt");
        assert_eq!(file_tail("xyzzy.txt"), "xyzzy.txt");
        assert_eq!(file_tail("C:\\data\\main.db"), "main.db");
        assert_eq!(file_tail("/a/b/"), "");
    }

    #[test]
    fn test_replica_path_ignores_directory() {
        let a = replica_path("/srv/replica", "/a/b/test.db");
        let b = replica_path("/srv/replica", "/elsewhere/test.db");
        let c = replica_path("/srv/replica", "test.db");
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a, format!("/srv/replica{}test.db", MAIN_SEPARATOR));
        assert!(!a.contains("/a/b"));
    }

    #[test]
    fn test_replica_path_is_idempotent() {
        let first = replica_path("/srv/replica", "/data/app.db-journal");
        let second = replica_path("/srv/replica", "/data/app.db-journal");
        assert_eq!(first, second);
    }
}
