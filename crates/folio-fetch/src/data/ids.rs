use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of an upstream, used to key rate gates, circuits and storage paths.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceName(String);

impl SourceName {
    pub fn new(name: impl Into<String>) -> Self { Self(name.into()) }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for SourceName {
    fn from(name: &str) -> Self { Self::new(name) }
}

impl From<String> for SourceName {
    fn from(name: String) -> Self { Self(name) }
}

impl Borrow<str> for SourceName {
    fn borrow(&self) -> &str { &self.0 }
}

/// `(source_name, source_id)`: the identity of a record across runs.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub source_name: SourceName,
    pub source_id:   String,
}

impl RecordKey {
    pub fn new(source_name: impl Into<SourceName>, source_id: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            source_id:   source_id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_name, self.source_id)
    }
}
