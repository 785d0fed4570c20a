//! Absolute-path parsing and normalization.
//!
//! The engine accepts POSIX-style absolute paths only. Parsing is pure: it
//! never consults the tree, so `/a/../b` normalizes to `/b` whether or not
//! `/a` exists. Symlinks are never resolved here; path traversal through the
//! store is purely structural.

use crate::error::{FsError, Result};

/// Split an absolute path into normalized components.
///
/// Rules:
/// - the path must be non-empty, start with `/`, and contain no NUL byte;
/// - empty segments (`//`) and `.` are dropped;
/// - `..` pops the previous segment, saturating at the root.
///
/// An empty component vector denotes the root itself.
pub fn parse(path: &str) -> Result<Vec<String>> {
    if path.is_empty() {
        return Err(FsError::BadPath("empty path".into()));
    }
    if path.contains('\0') {
        return Err(FsError::BadPath(format!("path contains NUL: {path:?}")));
    }
    if !path.starts_with('/') {
        return Err(FsError::BadPath(format!("path is not absolute: {path}")));
    }

    let mut parts: Vec<String> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other.to_string()),
        }
    }
    Ok(parts)
}

/// Split an absolute path into the components of its parent directory plus
/// the final name.
///
/// Fails with `InvalidArgument` when the path normalizes to the root, since
/// the root has no parent entry to operate on.
pub fn parse_parent(path: &str) -> Result<(Vec<String>, String)> {
    let mut parts = parse(path)?;
    match parts.pop() {
        Some(name) => Ok((parts, name)),
        None => Err(FsError::InvalidArgument(format!(
            "cannot operate on the root directory: {path}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_simple_paths() {
        assert_eq!(parse("/").unwrap(), Vec::<String>::new());
        assert_eq!(parse("/a").unwrap(), vec!["a"]);
        assert_eq!(parse("/a/b/c").unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn collapses_empty_segments_and_dot() {
        assert_eq!(parse("//a//b/").unwrap(), vec!["a", "b"]);
        assert_eq!(parse("/a/./b").unwrap(), vec!["a", "b"]);
        assert_eq!(parse("/./.").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn dotdot_pops_and_saturates_at_root() {
        assert_eq!(parse("/a/../b").unwrap(), vec!["b"]);
        assert_eq!(parse("/..").unwrap(), Vec::<String>::new());
        assert_eq!(parse("/../../x").unwrap(), vec!["x"]);
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(matches!(parse(""), Err(FsError::BadPath(_))));
        assert!(matches!(parse("relative/path"), Err(FsError::BadPath(_))));
        assert!(matches!(parse("/a\0b"), Err(FsError::BadPath(_))));
    }

    #[test]
    fn parent_split() {
        let (parent, name) = parse_parent("/a/b/c").unwrap();
        assert_eq!(parent, vec!["a", "b"]);
        assert_eq!(name, "c");

        let (parent, name) = parse_parent("/top").unwrap();
        assert!(parent.is_empty());
        assert_eq!(name, "top");
    }

    #[test]
    fn parent_of_root_is_invalid() {
        assert!(matches!(parse_parent("/"), Err(FsError::InvalidArgument(_))));
        assert!(matches!(
            parse_parent("/a/.."),
            Err(FsError::InvalidArgument(_))
        ));
    }
}
