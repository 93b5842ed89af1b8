//! Raw source payloads and the canonical record they normalize into.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use folio_fetch::{RecordKey, SourceName};
use serde::{Deserialize, Serialize};

/// One entry as a metadata source delivered it. Every field a source may omit
/// is optional; dates are kept as the source's text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source_name:      SourceName,
    pub source_id:        Option<String>,
    pub title:            Option<String>,
    pub abstract_text:    Option<String>,
    pub authors:          Vec<String>,
    pub categories:       Vec<String>,
    pub primary_category: Option<String>,
    pub published:        Option<String>,
    pub updated:          Option<String>,
    pub file_url:         Option<String>,
}

/// Source-agnostic metadata of one paper.
///
/// Identity is `(source_name, source_id)`. Nothing in here depends on when it
/// was normalized, so normalizing the same payload twice yields equal values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub source_id:        String,
    pub source_name:      SourceName,
    pub title:            String,
    #[serde(rename = "abstract")]
    pub abstract_text:    String,
    /// Citation order.
    pub authors:          Vec<String>,
    pub categories:       BTreeSet<String>,
    pub primary_category: Option<String>,
    pub published_at:     DateTime<Utc>,
    pub updated_at:       Option<DateTime<Utc>>,
    /// `None` means metadata only. Always an absolute http(s) URL otherwise.
    pub file_url:         Option<String>,
    /// Revision from a trailing `v<N>` on the id, as arXiv numbers them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version:          Option<u32>,
}

impl CanonicalRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.source_name.clone(), self.source_id.clone())
    }

    /// Category used for the storage layout: the primary one if the source
    /// named it, otherwise the first in sort order.
    pub fn storage_category(&self) -> Option<&str> {
        self.primary_category
            .as_deref()
            .or_else(|| self.categories.iter().next().map(String::as_str))
    }
}
