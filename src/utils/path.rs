//! Lexical path handling for the path policy.
//!
//! Nothing here touches the filesystem: symlinks are not resolved, `..` is
//! folded purely by text, and the root's parent is the root.

/// Resolve `path` against `cwd` (when relative) and normalise it.
///
/// The result is always absolute, has no `.` or `..` segments, no repeated
/// separators and no trailing separator (except for `/` itself).
pub fn resolve(cwd: &str, path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    if !path.starts_with('/') {
        push_segments(&mut segments, cwd);
    }
    push_segments(&mut segments, path);

    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = String::with_capacity(path.len() + cwd.len());
    for segment in segments {
        out.push('/');
        out.push_str(segment);
    }
    out
}

fn push_segments<'a>(segments: &mut Vec<&'a str>, path: &'a str) {
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
}

/// Split a normalised absolute path into its parent directory and final name.
pub fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

/// Non-empty segments of a path.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// True when every segment of `dir` is a leading segment of `path`.
/// `/usr/lib/` covers `/usr/lib` and `/usr/lib/x`, but not `/usr/libexec`.
pub fn is_within(dir: &str, path: &str) -> bool {
    let mut path_segments = segments(path);
    segments(dir).all(|d| path_segments.next() == Some(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_against_cwd() {
        assert_eq!(resolve("/home/user", "out.txt"), "/home/user/out.txt");
        assert_eq!(resolve("/home/user", "./a/../b"), "/home/user/b");
        assert_eq!(resolve("/home/user", "../../../etc"), "/etc");
    }

    #[test]
    fn test_resolve_absolute_ignores_cwd() {
        assert_eq!(resolve("/tmp", "/etc//passwd"), "/etc/passwd");
        assert_eq!(resolve("/tmp", "/usr/lib/"), "/usr/lib");
        assert_eq!(resolve("/tmp", "/.."), "/");
        assert_eq!(resolve("/tmp", ""), "/tmp");
    }

    #[test]
    fn test_split_parent() {
        assert_eq!(split_parent("/home/user/out.txt"), ("/home/user", "out.txt"));
        assert_eq!(split_parent("/etc"), ("/", "etc"));
        assert_eq!(split_parent("/"), ("/", ""));
    }

    #[test]
    fn test_is_within_matches_whole_segments() {
        assert!(is_within("/usr/lib/", "/usr/lib"));
        assert!(is_within("/usr/lib/", "/usr/lib/libc.so.6"));
        assert!(!is_within("/usr/lib/", "/usr/libexec/x"));
        assert!(!is_within("/usr/lib/", "/usr"));
        assert!(is_within("/", "/anything"));
    }
}
