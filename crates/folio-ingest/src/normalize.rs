//! Raw payload to [`CanonicalRecord`]: validation, cleaning, deduplication.
//!
//! [`normalize`] is pure. Rejections are data-quality outcomes, reported
//! separately from fetch failures.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use folio_fetch::RecordKey;
use thiserror::Error;
use url::Url;

use crate::record::{CanonicalRecord, RawRecord};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("record has no source id")]
    MissingId,

    #[error("record {source_id} has no title")]
    MissingTitle { source_id: String },

    #[error("record {source_id} has no publication date")]
    MissingPublished { source_id: String },

    #[error("record {source_id} has unparseable publication date {value:?}")]
    BadDate { source_id: String, value: String },

    #[error("record {source_id} has unusable file url {url:?}")]
    BadFileUrl { source_id: String, url: String },
}

/// Trims and collapses every internal whitespace run to one space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Accepts RFC 3339 timestamps and bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Revision number from a trailing `v<digits>`, e.g. `3` for `2508.00001v3`.
pub fn id_version(source_id: &str) -> Option<u32> {
    let (base, digits) = source_id.rsplit_once('v')?;
    if base.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Only absolute http(s) URLs with a host are downloadable.
fn parse_file_url(source_id: &str, text: &str) -> Result<String, Rejection> {
    let bad = || Rejection::BadFileUrl {
        source_id: source_id.to_string(),
        url:       text.to_string(),
    };
    let url = Url::parse(text).map_err(|_| bad())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none_or(str::is_empty) {
        return Err(bad());
    }
    Ok(url.into())
}

pub fn normalize(raw: &RawRecord) -> Result<CanonicalRecord, Rejection> {
    let source_id = raw
        .source_id
        .as_deref()
        .map(collapse_whitespace)
        .filter(|id| !id.is_empty())
        .ok_or(Rejection::MissingId)?;

    let title = raw
        .title
        .as_deref()
        .map(collapse_whitespace)
        .ok_or_else(|| Rejection::MissingTitle {
            source_id: source_id.clone(),
        })?;

    let published_raw = raw
        .published
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| Rejection::MissingPublished {
            source_id: source_id.clone(),
        })?;
    let published_at = parse_timestamp(published_raw).ok_or_else(|| Rejection::BadDate {
        source_id: source_id.clone(),
        value:     published_raw.to_string(),
    })?;

    let file_url = raw
        .file_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(|u| parse_file_url(&source_id, u))
        .transpose()?;

    // same author listed twice keeps its first position
    let mut seen = HashSet::new();
    let authors = raw
        .authors
        .iter()
        .map(|a| collapse_whitespace(a))
        .filter(|a| !a.is_empty() && seen.insert(a.clone()))
        .collect();

    let primary_category = raw
        .primary_category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    let mut categories: BTreeSet<String> = raw
        .categories
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    if let Some(primary) = &primary_category {
        categories.insert(primary.clone());
    }

    Ok(CanonicalRecord {
        version: id_version(&source_id),
        source_id,
        source_name: raw.source_name.clone(),
        title,
        abstract_text: raw
            .abstract_text
            .as_deref()
            .map(collapse_whitespace)
            .unwrap_or_default(),
        authors,
        categories,
        primary_category,
        published_at,
        // an unparseable revision date is dropped, not fatal
        updated_at: raw.updated.as_deref().and_then(parse_timestamp),
        file_url,
    })
}

/// First-seen filter over record keys for one run.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<RecordKey>,
}

impl Deduplicator {
    pub fn new() -> Self { Self::default() }

    /// `true` the first time `key` is offered.
    pub fn first_seen(&mut self, key: &RecordKey) -> bool {
        if self.seen.contains(key) {
            return false;
        }
        self.seen.insert(key.clone())
    }

    pub fn len(&self) -> usize { self.seen.len() }

    pub fn is_empty(&self) -> bool { self.seen.is_empty() }
}
