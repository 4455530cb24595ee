//! Scheme-qualified URL helpers
//!
//! Storage locations are addressed as `scheme://authority/path`, e.g.
//! `mem://src-bucket/incoming/data.json` or `file:///var/spool/mirror`.
//! These helpers deliberately avoid a full URL parser: object-store keys may
//! contain characters a generic parser would reject or re-encode.

/// Parsed view of a scheme-qualified URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrlParts<'a> {
    /// URL scheme, e.g. `mem`, `file`
    pub scheme: &'a str,
    /// Bucket or host component (may be empty for `file://` URLs)
    pub authority: &'a str,
    /// Object path relative to the authority, without a leading slash
    pub path: &'a str,
}

/// Split a URL into scheme, authority and path
///
/// Returns `None` when the URL carries no `scheme://` marker; matching code
/// treats that as "matches nothing" rather than an error.
pub fn split(url: &str) -> Option<UrlParts<'_>> {
    let (scheme, rest) = url.split_once("://")?;
    if scheme.is_empty() {
        return None;
    }
    match rest.split_once('/') {
        Some((authority, path)) => Some(UrlParts {
            scheme,
            authority,
            path,
        }),
        None => Some(UrlParts {
            scheme,
            authority: rest,
            path: "",
        }),
    }
}

/// The scheme of a URL, when present
pub fn scheme(url: &str) -> Option<&str> {
    split(url).map(|parts| parts.scheme)
}

/// Join a base URL and a relative path, normalizing slashes
pub fn join(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if name.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base, name)
}

/// The last path segment of a URL
pub fn file_name(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((_, name)) => name,
        None => trimmed,
    }
}

/// File name without its final extension
pub fn file_stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

/// Final extension of a file name, without the dot
pub fn extension(name: &str) -> Option<&str> {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
        _ => None,
    }
}

/// The URL with its last path segment removed
pub fn parent(url: &str) -> Option<&str> {
    let trimmed = url.trim_end_matches('/');
    let (parent, _) = trimmed.rsplit_once('/')?;
    // Never truncate into the scheme marker.
    if parent.ends_with(':') || parent.ends_with('/') {
        return None;
    }
    Some(parent)
}

/// Path of `url` relative to `base`, when `url` lies under `base`
///
/// Both URLs must share scheme and authority, and the base path must end on
/// a path-segment boundary: `mem://b/dir` contains `mem://b/dir/x` but not
/// `mem://b/dir2/x`.
pub fn relative_to<'a>(base: &str, url: &'a str) -> Option<&'a str> {
    let base_parts = split(base)?;
    let url_parts = split(url)?;
    if base_parts.scheme != url_parts.scheme || base_parts.authority != url_parts.authority {
        return None;
    }
    let base_path = base_parts.path.trim_end_matches('/');
    if base_path.is_empty() {
        return Some(url_parts.path);
    }
    let remainder = url_parts.path.strip_prefix(base_path)?;
    if remainder.is_empty() {
        return Some("");
    }
    remainder.strip_prefix('/')
}

/// Whether `url` lies under `base` (same scheme and authority, path below)
pub fn is_under(base: &str, url: &str) -> bool {
    relative_to(base, url).is_some()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_split_full_url() {
        let parts = split("mem://bucket/dir/file.txt").unwrap();
        assert_eq!(parts.scheme, "mem");
        assert_eq!(parts.authority, "bucket");
        assert_eq!(parts.path, "dir/file.txt");
    }

    #[test]
    fn test_split_bucket_only() {
        let parts = split("mem://bucket").unwrap();
        assert_eq!(parts.scheme, "mem");
        assert_eq!(parts.authority, "bucket");
        assert_eq!(parts.path, "");
    }

    #[test]
    fn test_split_rejects_plain_paths() {
        assert!(split("/var/data/file.txt").is_none());
        assert!(split("://missing-scheme").is_none());
    }

    #[test]
    fn test_join_normalizes_slashes() {
        assert_eq!(join("mem://b/dir/", "/a.txt"), "mem://b/dir/a.txt");
        assert_eq!(join("mem://b", "a.txt"), "mem://b/a.txt");
        assert_eq!(join("mem://b/dir", ""), "mem://b/dir");
    }

    #[test]
    fn test_file_name_and_stem() {
        assert_eq!(file_name("mem://b/dir/data.json.gz"), "data.json.gz");
        assert_eq!(file_stem("data.json.gz"), "data.json");
        assert_eq!(extension("data.json.gz"), Some("gz"));
        assert_eq!(extension("README"), None);
        assert_eq!(file_stem(".hidden"), ".hidden");
    }

    #[test]
    fn test_parent() {
        assert_eq!(parent("mem://b/dir/file.txt"), Some("mem://b/dir"));
        assert_eq!(parent("mem://b/file.txt"), Some("mem://b"));
        assert_eq!(parent("mem://b"), None);
    }

    #[test]
    fn test_relative_to_segment_boundary() {
        assert_eq!(relative_to("mem://b/dir", "mem://b/dir/x/y"), Some("x/y"));
        assert_eq!(relative_to("mem://b", "mem://b/x"), Some("x"));
        assert_eq!(relative_to("mem://b/dir", "mem://b/dir2/x"), None);
        assert_eq!(relative_to("mem://b/dir", "gs://b/dir/x"), None);
    }
}
