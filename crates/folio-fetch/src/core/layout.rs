use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};

use crate::data::SourceName;

/// Category directory used when a record carries none.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Deterministic storage location of a record's file:
/// `<base>/<source>/<category>/<yyyy>/<mm>/<source_id>.<ext>`.
///
/// Components are sanitized so identifiers such as `hep-th/9901001v1` stay a
/// single path segment.
pub fn target_path(
    base: &Path,
    source: &SourceName,
    category: Option<&str>,
    published_at: DateTime<Utc>,
    source_id: &str,
    ext: &str,
) -> PathBuf {
    let category = category
        .map(sanitize_component)
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| UNCATEGORIZED.to_string());

    base.join(sanitize_component(source.as_str()))
        .join(category)
        .join(format!("{:04}", published_at.year()))
        .join(format!("{:02}", published_at.month()))
        .join(format!("{}.{ext}", sanitize_component(source_id)))
}

/// Replaces separators and whitespace with `_` and strips leading dots.
pub fn sanitize_component(raw: &str) -> String {
    let replaced: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        })
        .collect();
    replaced.trim_start_matches('.').to_string()
}
