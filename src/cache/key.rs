//! Cache key → filesystem path mapping.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::http::request::Target;

/// File name used for targets whose path names a directory (`/`, `/docs/`).
pub const DIRECTORY_ENTRY: &str = "index";

/// Location of a target's entry: `<root>/<host>/<port><path>`.
///
/// Every component stays below `<root>/<host>/<port>`: `.` and `..` segments
/// are escaped, and the query string is appended to the last file name with
/// its `/` escaped, since URL parsing normalizes the path but not the query.
pub fn entry_path(root: &Path, target: &Target) -> PathBuf {
    let (path, query) = match target.path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target.path.as_str(), None),
    };

    let mut entry = root
        .join(escape_segment(&target.host))
        .join(target.port.to_string());
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        entry.push(escape_segment(segment));
    }
    if path.ends_with('/') {
        entry.push(DIRECTORY_ENTRY);
    }

    if let Some(query) = query {
        let mut name = entry.file_name().map(OsString::from).unwrap_or_default();
        name.push("?");
        name.push(query.replace('/', "%2F"));
        entry.set_file_name(name);
    }
    entry
}

fn escape_segment(segment: &str) -> &str {
    match segment {
        "." => "%2E",
        ".." => "%2E%2E",
        other => other,
    }
}
