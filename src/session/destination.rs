//! Destination path resolution for queued files.

use std::path::{Component, Path, PathBuf};

use url::Url;

use super::SessionError;

/// Derives a file name from the last non-empty URL path segment.
///
/// Characters invalid on common filesystems are replaced with `_`.
pub(crate) fn file_name_from_url(url: &Url) -> Option<String> {
    let last = url.path_segments()?.filter(|s| !s.is_empty()).next_back()?;
    let name = sanitize_filename(last);
    (name != "." && name != "..").then_some(name)
}

/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}

/// Joins `dest_dir` and a relative `file_name` into an absolute destination.
///
/// `file_name` may contain sub-directories but must stay below `dest_dir`.
pub(crate) fn resolve_destination(dest_dir: &Path, file_name: &str) -> Result<PathBuf, SessionError> {
    let relative = Path::new(file_name);
    if file_name.trim().is_empty() {
        return Err(SessionError::invalid_destination(
            dest_dir.join(file_name),
            "empty file name",
        ));
    }

    let mut cleaned = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => cleaned.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(SessionError::invalid_destination(
                    dest_dir.join(relative),
                    "file name must not contain '..'",
                ));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(SessionError::invalid_destination(
                    relative,
                    "file name must be relative",
                ));
            }
        }
    }
    if cleaned.as_os_str().is_empty() {
        return Err(SessionError::invalid_destination(
            dest_dir.join(relative),
            "file name has no file component",
        ));
    }

    let dir = std::path::absolute(dest_dir)
        .map_err(|e| SessionError::invalid_destination(dest_dir, e.to_string()))?;
    Ok(dir.join(cleaned))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_from_url_uses_last_segment() {
        let url = Url::parse("https://example.com/files/1MB.dat").unwrap();
        assert_eq!(file_name_from_url(&url).as_deref(), Some("1MB.dat"));
    }

    #[test]
    fn test_file_name_from_url_ignores_trailing_slash() {
        let url = Url::parse("https://example.com/files/archive/").unwrap();
        assert_eq!(file_name_from_url(&url).as_deref(), Some("archive"));
    }

    #[test]
    fn test_file_name_from_url_ignores_query() {
        let url = Url::parse("https://example.com/a/data.bin?token=1").unwrap();
        assert_eq!(file_name_from_url(&url).as_deref(), Some("data.bin"));
    }

    #[test]
    fn test_file_name_from_url_empty_path_is_none() {
        let url = Url::parse("https://example.com/").unwrap();
        assert!(file_name_from_url(&url).is_none());
    }

    #[test]
    fn test_sanitize_filename_removes_invalid_chars() {
        assert_eq!(sanitize_filename("file:name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("a*b?c"), "a_b_c");
        assert_eq!(sanitize_filename(""), "_");
    }

    #[test]
    fn test_resolve_destination_allows_nested_names() {
        let base = std::env::temp_dir();
        let path = resolve_destination(&base, "nested/dir/file.bin").unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("nested/dir/file.bin"));
    }

    #[test]
    fn test_resolve_destination_makes_relative_dir_absolute() {
        let path = resolve_destination(Path::new("downloads"), "file.bin").unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("downloads/file.bin"));
    }

    #[test]
    fn test_resolve_destination_strips_current_dir_components() {
        let base = std::env::temp_dir();
        let path = resolve_destination(&base, "./a/./b.bin").unwrap();
        assert_eq!(path, std::path::absolute(&base).unwrap().join("a/b.bin"));
    }

    #[test]
    fn test_resolve_destination_rejects_parent_components() {
        let result = resolve_destination(Path::new("/tmp/out"), "../escape.bin");
        assert!(matches!(result, Err(SessionError::InvalidDestination { .. })));
    }

    #[test]
    fn test_resolve_destination_rejects_absolute_names() {
        let result = resolve_destination(Path::new("/tmp/out"), "/etc/passwd");
        assert!(matches!(result, Err(SessionError::InvalidDestination { .. })));
    }

    #[test]
    fn test_resolve_destination_rejects_empty_names() {
        assert!(resolve_destination(Path::new("/tmp/out"), "").is_err());
        assert!(resolve_destination(Path::new("/tmp/out"), "./").is_err());
    }
}
