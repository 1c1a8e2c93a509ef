//! Path normalization for the VFS surface.

/// Normalize a file name to a `/`-rooted, lexically cleaned path.
///
/// Repeated separators collapse, `.` segments drop, and `..` segments pop
/// (never past the root). The result is idempotent:
/// `full_pathname(full_pathname(x)) == full_pathname(x)`.
pub fn full_pathname(name: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in name.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return "/".to_string();
    }

    let mut out = String::with_capacity(name.len() + 1);
    for part in parts {
        out.push('/');
        out.push_str(part);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_repeated_separators() {
        assert_eq!(full_pathname("//a///b"), "/a/b");
    }

    #[test]
    fn test_roots_relative_names() {
        assert_eq!(full_pathname("test.db"), "/test.db");
        assert_eq!(full_pathname("dir/test.db"), "/dir/test.db");
    }

    #[test]
    fn test_resolves_dot_segments() {
        assert_eq!(full_pathname("/a/./b"), "/a/b");
        assert_eq!(full_pathname("/a/b/../c"), "/a/c");
        assert_eq!(full_pathname("/../a"), "/a");
        assert_eq!(full_pathname(""), "/");
        assert_eq!(full_pathname("/.."), "/");
    }

    #[test]
    fn test_idempotent() {
        for name in ["//a///b", "x/./y/../z", "", "/already/clean"] {
            let once = full_pathname(name);
            assert_eq!(full_pathname(&once), once);
        }
    }
}
