//! Helpers for the `/`-separated, root-relative paths used by every [`FileSystem`](super::FileSystem).

/// Canonical form: no leading/trailing separators, no empty or `.` segments.
#[must_use]
pub fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Join two path fragments, tolerating empty sides.
#[must_use]
pub fn join(base: &str, child: &str) -> String {
    let base = normalize(base);
    let child = normalize(child);
    match (base.is_empty(), child.is_empty()) {
        (true, _) => child,
        (_, true) => base,
        _ => format!("{base}/{child}"),
    }
}

/// Everything before the last separator (empty for top-level entries).
#[must_use]
pub fn parent(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rfind('/').map_or("", |i| &trimmed[..i])
}

/// The last path segment.
#[must_use]
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rfind('/').map_or(trimmed, |i| &trimmed[i + 1..])
}

/// Strip `base` from `path` if `path` lives underneath it.
#[must_use]
pub fn relative_to<'a>(base: &str, path: &'a str) -> Option<&'a str> {
    let base = base.trim_matches('/');
    let path = path.trim_start_matches('/');
    if base.is_empty() {
        return Some(path);
    }
    let rest = path.strip_prefix(base)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

/// Segments of a normalized path.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty() && *s != ".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_and_joins() {
        assert_eq!(normalize("/a//b/./c/"), "a/b/c");
        assert_eq!(join("", "x.parquet"), "x.parquet");
        assert_eq!(join("root/", "/a=1/x"), "root/a=1/x");
    }

    #[test]
    fn splits_parent_and_basename() {
        assert_eq!(parent("root/a=1/part0.parquet"), "root/a=1");
        assert_eq!(parent("top.csv"), "");
        assert_eq!(basename("root/a=1/part0.parquet"), "part0.parquet");
    }

    #[test]
    fn relative_paths() {
        assert_eq!(relative_to("root", "root/a=1/f"), Some("a=1/f"));
        assert_eq!(relative_to("", "a/b"), Some("a/b"));
        assert_eq!(relative_to("root", "rootless/f"), None);
    }
}
