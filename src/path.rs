//! Resource path handling.
//!
//! Per spec §3, a resource path is "exactly the string the kernel would use;
//! no normalization beyond cleaning." This module owns that cleaning: it
//! collapses `.`/`..`/repeated slashes lexically, never resolving symlinks or
//! touching the filesystem, since most of these paths do not exist outside a
//! container's mount namespace.

use std::path::{Component, Path, PathBuf};

/// Lexically cleans an absolute resource path: collapses repeated slashes,
/// drops `.` components, and resolves `..` components against the preceding
/// component without touching the filesystem.
///
/// # Examples
/// ```
///# use procsys_overlay::path::clean;
/// assert_eq!(clean("/proc//sys/./net/../net/core"), "/proc/sys/net/core");
/// assert_eq!(clean("/proc/sys/kernel"), "/proc/sys/kernel");
/// ```
pub fn clean(path: &str) -> String {
    let mut out: Vec<Component> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::CurDir => continue,
            Component::ParentDir => {
                if !matches!(out.last(), Some(Component::RootDir) | None) {
                    out.pop();
                }
            }
            other => out.push(other),
        }
    }

    let mut cleaned = PathBuf::new();
    for component in out {
        cleaned.push(component);
    }

    cleaned.to_string_lossy().into_owned()
}

/// Returns the parent directory of a cleaned resource path, or `/` if `path`
/// is already the root.
pub fn parent_of(path: &str) -> String {
    let cleaned = clean(path);
    match Path::new(&cleaned).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_string_lossy().into_owned(),
        _ => "/".to_string(),
    }
}

/// Returns the final component of a cleaned resource path.
pub fn base_name(path: &str) -> String {
    let cleaned = clean(path);
    Path::new(&cleaned)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Returns `true` if `prefix` is a path-component prefix of `path`: either
/// they are equal, or `path` continues with `/` right after `prefix`.
///
/// This is the primitive the handler registry's longest-prefix match (§4.1)
/// is built on; naive `str::starts_with` would wrongly match `/proc/sys/vmx`
/// against the registered prefix `/proc/sys/vm`.
pub fn is_prefix(prefix: &str, path: &str) -> bool {
    let prefix = clean(prefix);
    let path = clean(path);

    if prefix == path {
        return true;
    }

    if prefix == "/" {
        return true;
    }

    path.starts_with(&prefix) && path[prefix.len()..].starts_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_dot_and_dotdot() {
        assert_eq!(clean("/proc//sys/./net/../net/core"), "/proc/sys/net/core");
        assert_eq!(clean("/proc/sys/kernel"), "/proc/sys/kernel");
        assert_eq!(clean("/../../etc"), "/etc");
    }

    #[test]
    fn prefix_does_not_match_sibling_with_shared_stem() {
        assert!(is_prefix("/proc/sys/vm", "/proc/sys/vm/overcommit_memory"));
        assert!(!is_prefix("/proc/sys/vm", "/proc/sys/vmx/foo"));
        assert!(is_prefix("/proc/sys/vm", "/proc/sys/vm"));
    }

    #[test]
    fn root_prefix_matches_everything() {
        assert!(is_prefix("/", "/proc/sys/kernel/hostname"));
    }

    #[test]
    fn parent_and_base_name() {
        assert_eq!(parent_of("/proc/sys/vm/overcommit_memory"), "/proc/sys/vm");
        assert_eq!(base_name("/proc/sys/vm/overcommit_memory"), "overcommit_memory");
        assert_eq!(parent_of("/proc"), "/");
    }
}
